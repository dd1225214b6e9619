//! Curriculum Generation Service
//!
//! This module turns a learner's long-term goals into a month / week / lesson
//! roadmap. The model writes the roadmap as tagged markup, which is parsed by
//! [`crate::markup::parse_curriculum_markup`].

use crate::error::LessonError;
use crate::lesson::LessonRequest;
use crate::llm_client::CompletionClient;
use crate::markup::parse_curriculum_markup;
use crate::prompts::{PromptKey, PromptLibrary};
use crate::template::render_template;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// The long-horizon learning roadmap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Curriculum {
    pub months: Vec<CurriculumMonth>,
}

impl Curriculum {
    /// All lessons in document order.
    pub fn lessons(&self) -> impl Iterator<Item = &CurriculumLesson> {
        self.months
            .iter()
            .flat_map(|m| &m.weeks)
            .flat_map(|w| &w.lessons)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurriculumMonth {
    pub month_index: usize,
    pub name: String,
    pub description: String,
    pub weeks: Vec<CurriculumWeek>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurriculumWeek {
    /// Position within its month.
    pub week_index: usize,
    /// Position across the whole curriculum.
    pub global_week_index: usize,
    pub name: String,
    pub description: String,
    pub lessons: Vec<CurriculumLesson>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurriculumLesson {
    /// Position within its week.
    pub lesson_index: usize,
    /// Position across the whole curriculum.
    pub global_lesson_index: usize,
    pub name: String,
    pub description: String,
}

/// What a curriculum should cover and for how long.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurriculumRequest {
    #[serde(flatten)]
    pub learner: LessonRequest,
    pub months: u32,
}

/// Defines the contract for any service that can generate a curriculum.
///
/// This abstraction allows the system to swap between different curriculum
/// generation approaches (e.g., AI-powered, static mock) while keeping a
/// consistent interface for callers.
#[async_trait]
pub trait CurriculumService: Send + Sync {
    /// Generates a month / week / lesson roadmap for the request.
    async fn generate_curriculum(&self, request: &CurriculumRequest) -> Result<Curriculum, LessonError>;
}

/// An implementation of `CurriculumService` backed by a language model.
pub struct LLMCurriculumService {
    client: Arc<dyn CompletionClient>,
    prompts: Arc<PromptLibrary>,
}

impl LLMCurriculumService {
    /// Creates a new LLM-based curriculum service.
    ///
    /// # Arguments
    ///
    /// * `client` - Completion client used for the single roadmap call.
    /// * `prompts` - Prompt library providing the `curriculum` template.
    pub fn new(client: Arc<dyn CompletionClient>, prompts: Arc<PromptLibrary>) -> Self {
        Self { client, prompts }
    }
}

#[async_trait]
impl CurriculumService for LLMCurriculumService {
    async fn generate_curriculum(&self, request: &CurriculumRequest) -> Result<Curriculum, LessonError> {
        let mut vars = request.learner.template_vars();
        vars.insert("months", request.months.to_string());
        let prompt = render_template(self.prompts.get(PromptKey::Curriculum), &vars);

        let reply = self.client.complete_free_text(&prompt).await?;
        let curriculum = parse_curriculum_markup(&reply)?;

        info!(
            months = curriculum.months.len(),
            lessons = curriculum.lessons().count(),
            "Curriculum generated"
        );
        Ok(curriculum)
    }
}

/// A mock `CurriculumService` for development and integration testing.
///
/// Produces one week of three lessons per requested month, with indices
/// assigned the same way the markup parser assigns them.
pub struct MockCurriculumService;

#[async_trait]
impl CurriculumService for MockCurriculumService {
    async fn generate_curriculum(&self, request: &CurriculumRequest) -> Result<Curriculum, LessonError> {
        let language = &request.learner.target_language;
        let months = (0..request.months.max(1) as usize)
            .map(|m| CurriculumMonth {
                month_index: m,
                name: format!("Month {}", m + 1),
                description: format!("{language} foundations, part {}", m + 1),
                weeks: vec![CurriculumWeek {
                    week_index: 0,
                    global_week_index: m,
                    name: format!("Week {}", m + 1),
                    description: "Core practice".to_string(),
                    lessons: ["Vocabulary", "Grammar", "Conversation"]
                        .iter()
                        .enumerate()
                        .map(|(l, name)| CurriculumLesson {
                            lesson_index: l,
                            global_lesson_index: m * 3 + l,
                            name: name.to_string(),
                            description: format!("{name} in {language}"),
                        })
                        .collect(),
                }],
            })
            .collect();
        Ok(Curriculum { months })
    }
}
