//! Prompt templates addressed by [`PromptKey`].
//!
//! Built-in templates are compiled into the crate from `prompts/*.md`. A
//! deployment can override any of them by name (the file stem of a
//! `<key>.md` file) without touching the rest.

use std::collections::HashMap;
use tracing::warn;

/// Every prompt the pipeline renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptKey {
    TopicBreakdown,
    SectionGeneration,
    FlatGeneration,
    LessonStructure,
    SectionSummary,
    Curriculum,
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

impl PromptKey {
    pub const ALL: [PromptKey; 15] = [
        PromptKey::TopicBreakdown,
        PromptKey::SectionGeneration,
        PromptKey::FlatGeneration,
        PromptKey::LessonStructure,
        PromptKey::SectionSummary,
        PromptKey::Curriculum,
        PromptKey::Flashcard,
        PromptKey::Explanation,
        PromptKey::FillInBlanks,
        PromptKey::WordMatch,
        PromptKey::WriteInBlanks,
        PromptKey::Translation,
        PromptKey::Conversation,
        PromptKey::WritingPractice,
        PromptKey::WordOrder,
    ];

    /// The file stem used for overrides, e.g. `topic_breakdown`.
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptKey::TopicBreakdown => "topic_breakdown",
            PromptKey::SectionGeneration => "section_generation",
            PromptKey::FlatGeneration => "flat_generation",
            PromptKey::LessonStructure => "lesson_structure",
            PromptKey::SectionSummary => "section_summary",
            PromptKey::Curriculum => "curriculum",
            PromptKey::Flashcard => "flashcard",
            PromptKey::Explanation => "explanation",
            PromptKey::FillInBlanks => "fill_in_blanks",
            PromptKey::WordMatch => "word_match",
            PromptKey::WriteInBlanks => "write_in_blanks",
            PromptKey::Translation => "translation",
            PromptKey::Conversation => "conversation",
            PromptKey::WritingPractice => "writing_practice",
            PromptKey::WordOrder => "word_order",
        }
    }

    fn builtin(&self) -> &'static str {
        match self {
            PromptKey::TopicBreakdown => include_str!("../prompts/topic_breakdown.md"),
            PromptKey::SectionGeneration => include_str!("../prompts/section_generation.md"),
            PromptKey::FlatGeneration => include_str!("../prompts/flat_generation.md"),
            PromptKey::LessonStructure => include_str!("../prompts/lesson_structure.md"),
            PromptKey::SectionSummary => include_str!("../prompts/section_summary.md"),
            PromptKey::Curriculum => include_str!("../prompts/curriculum.md"),
            PromptKey::Flashcard => include_str!("../prompts/flashcard.md"),
            PromptKey::Explanation => include_str!("../prompts/explanation.md"),
            PromptKey::FillInBlanks => include_str!("../prompts/fill_in_blanks.md"),
            PromptKey::WordMatch => include_str!("../prompts/word_match.md"),
            PromptKey::WriteInBlanks => include_str!("../prompts/write_in_blanks.md"),
            PromptKey::Translation => include_str!("../prompts/translation.md"),
            PromptKey::Conversation => include_str!("../prompts/conversation.md"),
            PromptKey::WritingPractice => include_str!("../prompts/writing_practice.md"),
            PromptKey::WordOrder => include_str!("../prompts/word_order.md"),
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        PromptKey::ALL.into_iter().find(|k| k.as_str() == name)
    }
}

/// The full set of templates used by one pipeline.
#[derive(Debug, Clone)]
pub struct PromptLibrary {
    templates: HashMap<PromptKey, String>,
}

impl Default for PromptLibrary {
    fn default() -> Self {
        Self {
            templates: PromptKey::ALL
                .into_iter()
                .map(|key| (key, key.builtin().to_string()))
                .collect(),
        }
    }
}

impl PromptLibrary {
    /// Starts from the built-in templates and replaces those named in
    /// `overrides`. Names that match no prompt are ignored with a warning.
    pub fn with_overrides(overrides: HashMap<String, String>) -> Self {
        let mut library = Self::default();
        for (name, template) in overrides {
            match PromptKey::from_name(&name) {
                Some(key) => library.set(key, template),
                None => warn!(prompt = %name, "Ignoring override for unknown prompt"),
            }
        }
        library
    }

    pub fn set(&mut self, key: PromptKey, template: impl Into<String>) {
        self.templates.insert(key, template.into());
    }

    pub fn get(&self, key: PromptKey) -> &str {
        self.templates
            .get(&key)
            .map(String::as_str)
            .unwrap_or_else(|| key.builtin())
    }
}
