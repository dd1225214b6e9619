//! Requests accepted by the pipeline and the lesson documents it returns.

use crate::template::TemplateVars;
use crate::unit::{CompiledUnit, LessonPlanUnit};
use serde::{Deserialize, Serialize};

/// Learner context plus free-text instructions for one lesson.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonRequest {
    pub instructions: String,
    pub user_level: String,
    pub target_language: String,
    pub native_language: String,
}

impl LessonRequest {
    /// Placeholder bindings shared by every prompt of the lesson.
    pub fn template_vars(&self) -> TemplateVars {
        TemplateVars::from([
            ("instructions", self.instructions.clone()),
            ("user_level", self.user_level.clone()),
            ("target_language", self.target_language.clone()),
            ("native_language", self.native_language.clone()),
        ])
    }
}

/// A lesson request that sits inside a curriculum, generated through the
/// tagged-markup structure prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredLessonRequest {
    #[serde(flatten)]
    pub lesson: LessonRequest,
    pub lesson_title: String,
    pub lesson_description: String,
    #[serde(default)]
    pub week_title: Option<String>,
    #[serde(default)]
    pub week_description: Option<String>,
    /// Titles of the lessons that precede this one in its week.
    #[serde(default)]
    pub week_lessons_so_far: Vec<String>,
    #[serde(default)]
    pub previous_weeks_summary: Option<String>,
}

impl StructuredLessonRequest {
    pub fn template_vars(&self) -> TemplateVars {
        let mut vars = self.lesson.template_vars();
        vars.insert("lesson_title", self.lesson_title.clone());
        vars.insert("lesson_description", self.lesson_description.clone());
        vars.insert("week_title", self.week_title.clone().unwrap_or_default());
        vars.insert(
            "week_description",
            self.week_description.clone().unwrap_or_default(),
        );
        let so_far = if self.week_lessons_so_far.is_empty() {
            "(none yet)".to_string()
        } else {
            self.week_lessons_so_far
                .iter()
                .map(|title| format!("- {title}"))
                .collect::<Vec<_>>()
                .join("\n")
        };
        vars.insert("week_lessons_so_far", so_far);
        vars.insert(
            "previous_weeks_summary",
            self.previous_weeks_summary
                .clone()
                .unwrap_or_else(|| "(this is the first week)".to_string()),
        );
        vars
    }
}

/// One generated section: its plan and the compiled unit for each plan entry.
///
/// `units[i]` is always the compiled form of `unit_plans[i]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompiledSection {
    pub section_instruction: String,
    pub section_index: usize,
    pub unit_plans: Vec<LessonPlanUnit>,
    pub units: Vec<CompiledUnit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub learning_summary: Option<String>,
}

/// A section dropped under [`crate::config::SectionFailurePolicy::KeepSucceeded`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionFailure {
    pub section_index: usize,
    pub section_instruction: String,
    pub error: String,
}

/// The root artifact returned by every lesson pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionedLesson {
    pub input: LessonRequest,
    pub section_instructions: Vec<String>,
    pub sections: Vec<CompiledSection>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_sections: Vec<SectionFailure>,
}

impl SectionedLesson {
    /// Total number of compiled units across all sections.
    pub fn unit_count(&self) -> usize {
        self.sections.iter().map(|s| s.units.len()).sum()
    }
}
