//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds the services built
//! once at startup from the configuration.

use crate::config::Config;
use crate::prompts::prompt_library;
use async_openai::config::OpenAIConfig;
use lingua_core::curriculum::{CurriculumService, LLMCurriculumService};
use lingua_core::debug::{DebugRecorder, FileDebugSink};
use lingua_core::llm_client::{CompletionClient, OpenAICompatibleClient};
use lingua_core::pipeline::LessonPipeline;
use std::sync::Arc;
use tracing::info;

/// All fields are public to be accessible from the command handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: LessonPipeline,
    pub curriculum_service: Arc<dyn CurriculumService>,
    pub config: Arc<Config>,
}

impl AppState {
    /// Wires the services around an existing completion client.
    pub fn new(config: Config, client: Arc<dyn CompletionClient>) -> anyhow::Result<Self> {
        let prompts = Arc::new(prompt_library(config.prompts_path.as_deref())?);

        let debug = match &config.debug_log_dir {
            Some(dir) => {
                info!(dir = %dir.display(), "Debug reports enabled");
                DebugRecorder::new(Arc::new(FileDebugSink::new(dir)))
            }
            None => DebugRecorder::disabled(),
        };

        let pipeline = LessonPipeline::new(client.clone(), prompts.clone(), config.pipeline.clone())
            .with_debug(debug);
        let curriculum_service = Arc::new(LLMCurriculumService::new(client, prompts));

        Ok(Self {
            pipeline,
            curriculum_service,
            config: Arc::new(config),
        })
    }

    /// Builds the OpenAI-compatible client for the configured provider and
    /// wires the services around it.
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let api_key = config
            .api_key()
            .ok_or_else(|| anyhow::anyhow!("No API key configured for {:?}", config.provider))?;
        let openai_config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(config.provider.api_base());
        info!(provider = ?config.provider, model = %config.chat_model, "Using completion provider");

        let client = Arc::new(OpenAICompatibleClient::new(
            openai_config,
            config.chat_model.clone(),
            config.llm_timeout,
        ));
        Self::new(config, client)
    }
}
