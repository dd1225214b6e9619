//! "Do not repeat" instructions for regenerating a unit.
//!
//! Each unit type extracts whatever makes its previous output recognisable
//! (terms, sentences, the paragraph, the dialogue opening) and turns it into
//! one instruction that is prepended to the next generation's prompt.

use crate::unit::{CompiledUnit, UnitOutput};

/// Longest excerpt of free text quoted back to the model.
const EXCERPT_CHARS: usize = 500;

/// Builds the avoid-context for regenerating `previous`.
///
/// Returns an empty string when the previous output has nothing to avoid
/// (for example an empty card list); regeneration then proceeds without one.
pub fn build_avoid_context(previous: &CompiledUnit) -> String {
    match previous.output() {
        UnitOutput::Flashcard(output) => list_rule(
            "These flashcard terms were already used. DO NOT use any of these terms",
            output.cards.iter().map(|c| c.term.as_str()),
        ),
        UnitOutput::Explanation(text) => quote_rule(
            "A previous explanation began as follows. Explain the topic from a different angle with new examples and DO NOT reuse its wording",
            text,
        ),
        UnitOutput::FillInBlanks(output) => list_rule(
            "These sentences were already used. DO NOT reuse any of these sentences or their answers",
            output.sentences.iter().map(|s| s.sentence.as_str()),
        ),
        UnitOutput::WordMatch(output) => list_rule(
            "These words were already matched. DO NOT use any of these words",
            output.pairs.iter().map(|p| p.word.as_str()),
        ),
        UnitOutput::WriteInBlanks(output) => list_rule(
            "These sentences were already used. DO NOT reuse any of these sentences or their answers",
            output.exercises.iter().map(|e| e.sentence.as_str()),
        ),
        UnitOutput::Translation(output) => quote_rule(
            "The previous translation exercise used this paragraph. Write a completely different paragraph and DO NOT reuse it",
            &output.paragraph,
        ),
        UnitOutput::Conversation(output) => quote_rule(
            "The previous conversation went like this. Write a new dialogue with a different scenario and DO NOT repeat these lines",
            &output.transcript(),
        ),
        UnitOutput::WritingPractice(output) => quote_rule(
            "The previous writing task was the following. Set a different task and DO NOT repeat this prompt",
            &output.prompt,
        ),
        UnitOutput::WordOrder(output) => list_rule(
            "These sentences were already used. DO NOT use any of these sentences",
            output.sentences.iter().map(|s| s.answer.as_str()),
        ),
    }
}

fn list_rule<'a>(rule: &str, items: impl Iterator<Item = &'a str>) -> String {
    let items: Vec<&str> = items
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .collect();
    if items.is_empty() {
        return String::new();
    }
    format!("IMPORTANT: {rule}: {}.", items.join(", "))
}

fn quote_rule(rule: &str, text: &str) -> String {
    let text = text.trim();
    if text.is_empty() {
        return String::new();
    }
    format!("IMPORTANT: {rule}:\n\"\"\"\n{}\n\"\"\"", excerpt(text))
}

/// The first [`EXCERPT_CHARS`] characters of `text`, cut on a char boundary.
fn excerpt(text: &str) -> &str {
    match text.char_indices().nth(EXCERPT_CHARS) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::*;

    fn compiled(unit_type: UnitType, output: UnitOutput) -> CompiledUnit {
        CompiledUnit::new(LessonPlanUnit::new(unit_type, "instructions"), output)
    }

    fn card(term: &str) -> Flashcard {
        Flashcard {
            term: term.into(),
            translation: String::new(),
            example: String::new(),
        }
    }

    #[test]
    fn test_flashcard_lists_previous_terms() {
        let previous = compiled(
            UnitType::Flashcard,
            UnitOutput::Flashcard(FlashcardOutput {
                cards: vec![card("hola"), card("adiós")],
            }),
        );
        let context = build_avoid_context(&previous);
        assert!(context.contains("DO NOT use any of these terms"));
        assert!(context.contains("hola"));
        assert!(context.contains("adiós"));
    }

    #[test]
    fn test_empty_output_yields_empty_context() {
        let previous = compiled(
            UnitType::Flashcard,
            UnitOutput::Flashcard(FlashcardOutput { cards: vec![] }),
        );
        assert_eq!(build_avoid_context(&previous), "");

        let previous = compiled(UnitType::Explanation, UnitOutput::Explanation("  ".into()));
        assert_eq!(build_avoid_context(&previous), "");
    }

    #[test]
    fn test_translation_quotes_paragraph() {
        let previous = compiled(
            UnitType::Translation,
            UnitOutput::Translation(TranslationOutput {
                paragraph: "Me llamo Ana y vivo en Madrid.".into(),
                translation: "My name is Ana and I live in Madrid.".into(),
                direction: "target_to_native".into(),
            }),
        );
        let context = build_avoid_context(&previous);
        assert!(context.contains("\"\"\"\nMe llamo Ana y vivo en Madrid.\n\"\"\""));
        assert!(!context.contains("My name is Ana"));
    }

    #[test]
    fn test_conversation_quotes_first_500_chars() {
        let long_line = "é".repeat(600);
        let previous = compiled(
            UnitType::Conversation,
            UnitOutput::Conversation(ConversationOutput {
                scenario: "Market".into(),
                lines: vec![DialogueLine {
                    speaker: "A".into(),
                    text: long_line,
                    translation: String::new(),
                }],
            }),
        );
        let context = build_avoid_context(&previous);
        let quoted = context
            .split("\"\"\"\n")
            .nth(1)
            .and_then(|rest| rest.split("\n\"\"\"").next())
            .unwrap();
        assert_eq!(quoted.chars().count(), 500);
        assert!(quoted.starts_with("A: é"));
    }

    #[test]
    fn test_word_order_lists_answers() {
        let previous = compiled(
            UnitType::WordOrder,
            UnitOutput::WordOrder(WordOrderOutput {
                sentences: vec![OrderSentence {
                    words: vec!["Ana".into(), "llamo".into(), "Me".into()],
                    answer: "Me llamo Ana".into(),
                    translation: "My name is Ana".into(),
                }],
            }),
        );
        assert!(build_avoid_context(&previous).ends_with("Me llamo Ana."));
    }
}
