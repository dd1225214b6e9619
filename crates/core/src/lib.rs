pub mod avoid_context;
pub mod config;
pub mod curriculum;
pub mod debug;
pub mod error;
pub mod executor;
pub mod lesson;
pub mod llm_client;
pub mod markup;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod template;
pub mod topic;
pub mod unit;

pub use config::{PipelineConfig, RetryPolicy, SectionFailurePolicy};
pub use error::{CompletionError, LessonError, MarkupParseError};
pub use lesson::{
    CompiledSection, LessonRequest, SectionFailure, SectionedLesson, StructuredLessonRequest,
};
pub use pipeline::LessonPipeline;
pub use unit::{CompiledUnit, LessonPlanUnit, UnitOutput, UnitType};
