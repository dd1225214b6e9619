//! Exercise units: the closed set of unit types, their plans, and the
//! schema-validated output each type produces.
//!
//! Every [`UnitType`] maps to exactly one prompt ([`UnitType::prompt_key`])
//! and one output shape ([`UnitOutput`]). Both mappings are exhaustive
//! `match`es, so adding a variant does not compile until it is registered.

use crate::error::{CompletionError, LessonError};
use crate::llm_client::{CompletionClient, complete_structured_with_raw};
use crate::prompts::PromptKey;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// The kind of exercise a unit generates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum UnitType {
    Flashcard,
    Explanation,
    FillInBlanks,
    WordMatch,
    WriteInBlanks,
    Translation,
    Conversation,
    WritingPractice,
    WordOrder,
}

impl UnitType {
    pub const ALL: [UnitType; 9] = [
        UnitType::Flashcard,
        UnitType::Explanation,
        UnitType::FillInBlanks,
        UnitType::WordMatch,
        UnitType::WriteInBlanks,
        UnitType::Translation,
        UnitType::Conversation,
        UnitType::WritingPractice,
        UnitType::WordOrder,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            UnitType::Flashcard => "flashcard",
            UnitType::Explanation => "explanation",
            UnitType::FillInBlanks => "fill_in_blanks",
            UnitType::WordMatch => "word_match",
            UnitType::WriteInBlanks => "write_in_blanks",
            UnitType::Translation => "translation",
            UnitType::Conversation => "conversation",
            UnitType::WritingPractice => "writing_practice",
            UnitType::WordOrder => "word_order",
        }
    }

    /// Human readable label, used when markup omits a unit name.
    pub fn label(&self) -> &'static str {
        match self {
            UnitType::Flashcard => "Flashcards",
            UnitType::Explanation => "Explanation",
            UnitType::FillInBlanks => "Fill in the Blanks",
            UnitType::WordMatch => "Word Match",
            UnitType::WriteInBlanks => "Write in the Blanks",
            UnitType::Translation => "Translation",
            UnitType::Conversation => "Conversation",
            UnitType::WritingPractice => "Writing Practice",
            UnitType::WordOrder => "Word Order",
        }
    }

    pub fn prompt_key(&self) -> PromptKey {
        match self {
            UnitType::Flashcard => PromptKey::Flashcard,
            UnitType::Explanation => PromptKey::Explanation,
            UnitType::FillInBlanks => PromptKey::FillInBlanks,
            UnitType::WordMatch => PromptKey::WordMatch,
            UnitType::WriteInBlanks => PromptKey::WriteInBlanks,
            UnitType::Translation => PromptKey::Translation,
            UnitType::Conversation => PromptKey::Conversation,
            UnitType::WritingPractice => PromptKey::WritingPractice,
            UnitType::WordOrder => PromptKey::WordOrder,
        }
    }

    /// Runs the completion matching this type and wraps the validated result.
    ///
    /// Explanations are free text; every other type goes through a
    /// structured completion against its own output schema. The reply is
    /// returned next to the output as it came from the client.
    pub async fn generate(
        &self,
        client: &dyn CompletionClient,
        prompt: &str,
    ) -> Result<(UnitOutput, Value), CompletionError> {
        match self {
            UnitType::Explanation => {
                let text = client.complete_free_text(prompt).await?;
                Ok((UnitOutput::Explanation(text.clone()), Value::String(text)))
            }
            UnitType::Flashcard => structured(client, prompt, UnitOutput::Flashcard).await,
            UnitType::FillInBlanks => structured(client, prompt, UnitOutput::FillInBlanks).await,
            UnitType::WordMatch => structured(client, prompt, UnitOutput::WordMatch).await,
            UnitType::WriteInBlanks => structured(client, prompt, UnitOutput::WriteInBlanks).await,
            UnitType::Translation => structured(client, prompt, UnitOutput::Translation).await,
            UnitType::Conversation => structured(client, prompt, UnitOutput::Conversation).await,
            UnitType::WritingPractice => {
                structured(client, prompt, UnitOutput::WritingPractice).await
            }
            UnitType::WordOrder => structured(client, prompt, UnitOutput::WordOrder).await,
        }
    }
}

async fn structured<T>(
    client: &dyn CompletionClient,
    prompt: &str,
    wrap: fn(T) -> UnitOutput,
) -> Result<(UnitOutput, Value), CompletionError>
where
    T: DeserializeOwned + JsonSchema,
{
    let (parsed, raw) = complete_structured_with_raw::<T>(client, prompt).await?;
    Ok((wrap(parsed), raw))
}

impl fmt::Display for UnitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UnitType {
    type Err = LessonError;

    /// Parses a type tag, ignoring surrounding whitespace and ASCII case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        UnitType::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| LessonError::UnknownUnitType(s.trim().to_string()))
    }
}

/// The pre-generation description of one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct LessonPlanUnit {
    /// Which exercise to generate.
    #[serde(rename = "type")]
    pub unit_type: UnitType,
    /// What the exercise should cover, in the learner's terms.
    pub instructions: String,
}

impl LessonPlanUnit {
    pub fn new(unit_type: UnitType, instructions: impl Into<String>) -> Self {
        Self {
            unit_type,
            instructions: instructions.into(),
        }
    }
}

// --- Output schemas ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Flashcard {
    /// Word or phrase in the target language.
    pub term: String,
    /// Meaning in the learner's native language.
    pub translation: String,
    /// Short sentence using the term in the target language.
    pub example: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FlashcardOutput {
    pub cards: Vec<Flashcard>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BlankSentence {
    /// Sentence with `___` marking the blank.
    pub sentence: String,
    /// Options to choose from, including the answer.
    pub options: Vec<String>,
    pub answer: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FillInBlanksOutput {
    pub sentences: Vec<BlankSentence>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WordPair {
    /// Target-language word.
    pub word: String,
    /// Native-language match.
    pub meaning: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WordMatchOutput {
    pub pairs: Vec<WordPair>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WriteInBlank {
    /// Sentence with `___` marking the blank.
    pub sentence: String,
    pub answer: String,
    /// Hint in the native language.
    pub hint: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WriteInBlanksOutput {
    pub exercises: Vec<WriteInBlank>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TranslationOutput {
    /// Paragraph the learner translates.
    pub paragraph: String,
    /// Reference translation.
    pub translation: String,
    /// Which direction the learner translates in, e.g. "native_to_target".
    pub direction: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DialogueLine {
    pub speaker: String,
    pub text: String,
    pub translation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ConversationOutput {
    /// Where the conversation takes place.
    pub scenario: String,
    pub lines: Vec<DialogueLine>,
}

impl ConversationOutput {
    /// The dialogue as `speaker: text` lines.
    pub fn transcript(&self) -> String {
        self.lines
            .iter()
            .map(|line| format!("{}: {}", line.speaker, line.text))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WritingPracticeOutput {
    pub prompt: String,
    /// What a good answer should include.
    pub guidelines: Vec<String>,
    pub example_answer: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct OrderSentence {
    /// Words of the sentence in shuffled order.
    pub words: Vec<String>,
    /// The correctly ordered sentence.
    pub answer: String,
    pub translation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WordOrderOutput {
    pub sentences: Vec<OrderSentence>,
}

/// Validated output of one unit; the variant always matches the unit type.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum UnitOutput {
    Flashcard(FlashcardOutput),
    Explanation(String),
    FillInBlanks(FillInBlanksOutput),
    WordMatch(WordMatchOutput),
    WriteInBlanks(WriteInBlanksOutput),
    Translation(TranslationOutput),
    Conversation(ConversationOutput),
    WritingPractice(WritingPracticeOutput),
    WordOrder(WordOrderOutput),
}

impl UnitOutput {
    pub fn unit_type(&self) -> UnitType {
        match self {
            UnitOutput::Flashcard(_) => UnitType::Flashcard,
            UnitOutput::Explanation(_) => UnitType::Explanation,
            UnitOutput::FillInBlanks(_) => UnitType::FillInBlanks,
            UnitOutput::WordMatch(_) => UnitType::WordMatch,
            UnitOutput::WriteInBlanks(_) => UnitType::WriteInBlanks,
            UnitOutput::Translation(_) => UnitType::Translation,
            UnitOutput::Conversation(_) => UnitType::Conversation,
            UnitOutput::WritingPractice(_) => UnitType::WritingPractice,
            UnitOutput::WordOrder(_) => UnitType::WordOrder,
        }
    }

    /// Reads a serialized output back, using `unit_type` to pick the shape.
    pub fn from_value(
        unit_type: UnitType,
        value: serde_json::Value,
    ) -> Result<Self, serde_json::Error> {
        Ok(match unit_type {
            UnitType::Flashcard => UnitOutput::Flashcard(serde_json::from_value(value)?),
            UnitType::Explanation => UnitOutput::Explanation(serde_json::from_value(value)?),
            UnitType::FillInBlanks => UnitOutput::FillInBlanks(serde_json::from_value(value)?),
            UnitType::WordMatch => UnitOutput::WordMatch(serde_json::from_value(value)?),
            UnitType::WriteInBlanks => UnitOutput::WriteInBlanks(serde_json::from_value(value)?),
            UnitType::Translation => UnitOutput::Translation(serde_json::from_value(value)?),
            UnitType::Conversation => UnitOutput::Conversation(serde_json::from_value(value)?),
            UnitType::WritingPractice => {
                UnitOutput::WritingPractice(serde_json::from_value(value)?)
            }
            UnitType::WordOrder => UnitOutput::WordOrder(serde_json::from_value(value)?),
        })
    }
}

/// A lesson-plan unit after successful generation and validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CompiledUnitRepr")]
pub struct CompiledUnit {
    #[serde(rename = "type")]
    unit_type: UnitType,
    plan: LessonPlanUnit,
    output: UnitOutput,
}

impl CompiledUnit {
    /// Pairs a plan with its output. The output's type wins if the two
    /// disagree, which can only happen through a caller bug.
    pub fn new(plan: LessonPlanUnit, output: UnitOutput) -> Self {
        debug_assert_eq!(plan.unit_type, output.unit_type());
        Self {
            unit_type: output.unit_type(),
            plan,
            output,
        }
    }

    pub fn unit_type(&self) -> UnitType {
        self.unit_type
    }

    pub fn plan(&self) -> &LessonPlanUnit {
        &self.plan
    }

    pub fn output(&self) -> &UnitOutput {
        &self.output
    }
}

#[derive(Deserialize)]
struct CompiledUnitRepr {
    #[serde(rename = "type")]
    unit_type: String,
    plan: LessonPlanUnit,
    output: serde_json::Value,
}

impl TryFrom<CompiledUnitRepr> for CompiledUnit {
    type Error = String;

    fn try_from(repr: CompiledUnitRepr) -> Result<Self, Self::Error> {
        let unit_type: UnitType = repr.unit_type.parse().map_err(|e: LessonError| e.to_string())?;
        if unit_type != repr.plan.unit_type {
            return Err(format!(
                "unit type '{}' does not match plan type '{}'",
                unit_type, repr.plan.unit_type
            ));
        }
        let output = UnitOutput::from_value(unit_type, repr.output)
            .map_err(|e| format!("invalid {unit_type} output: {e}"))?;
        Ok(Self {
            unit_type,
            plan: repr.plan,
            output,
        })
    }
}
