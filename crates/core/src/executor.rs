//! Turns one [`LessonPlanUnit`] into one [`CompiledUnit`], retrying failed
//! completions under a [`RetryPolicy`].

use crate::config::RetryPolicy;
use crate::error::CompletionError;
use crate::lesson::LessonRequest;
use crate::llm_client::CompletionClient;
use crate::prompts::PromptLibrary;
use crate::template::render_template;
use crate::unit::{CompiledUnit, LessonPlanUnit};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Generates single units. Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct UnitExecutor {
    client: Arc<dyn CompletionClient>,
    prompts: Arc<PromptLibrary>,
    retry: RetryPolicy,
}

impl UnitExecutor {
    pub fn new(
        client: Arc<dyn CompletionClient>,
        prompts: Arc<PromptLibrary>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            prompts,
            retry,
        }
    }

    /// Renders the prompt for `plan`.
    ///
    /// `lesson_so_far` fills the optional `{{lesson_so_far}}` block. A
    /// non-empty `avoid_context` is prepended verbatim.
    pub fn build_prompt(
        &self,
        plan: &LessonPlanUnit,
        request: &LessonRequest,
        lesson_so_far: Option<&str>,
        avoid_context: Option<&str>,
    ) -> String {
        let mut vars = request.template_vars();
        vars.insert("instructions", plan.instructions.clone());
        if let Some(so_far) = lesson_so_far {
            vars.insert("lesson_so_far", so_far.to_string());
        }
        let rendered = render_template(self.prompts.get(plan.unit_type.prompt_key()), &vars);

        match avoid_context {
            Some(avoid) if !avoid.trim().is_empty() => format!("{avoid}\n\n{rendered}"),
            _ => rendered,
        }
    }

    /// Builds the prompt for `plan` and generates it.
    pub async fn execute(
        &self,
        plan: &LessonPlanUnit,
        request: &LessonRequest,
        avoid_context: Option<&str>,
    ) -> Result<CompiledUnit, CompletionError> {
        let prompt = self.build_prompt(plan, request, None, avoid_context);
        self.execute_prompt(plan, &prompt, |_, _| {})
            .await
            .map(|(unit, _)| unit)
    }

    /// Generates `plan` from an already rendered prompt.
    ///
    /// Every failed attempt is reported to `on_failure` with its 1-based
    /// attempt number. The error of the final attempt is returned unchanged.
    /// On success the raw reply of the winning attempt comes back with the unit.
    pub async fn execute_prompt<F>(
        &self,
        plan: &LessonPlanUnit,
        prompt: &str,
        mut on_failure: F,
    ) -> Result<(CompiledUnit, Value), CompletionError>
    where
        F: FnMut(u32, &CompletionError),
    {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match plan.unit_type.generate(self.client.as_ref(), prompt).await {
                Ok((output, raw)) => {
                    debug!(unit_type = %plan.unit_type, attempt, "Unit generated");
                    return Ok((CompiledUnit::new(plan.clone(), output), raw));
                }
                Err(err) => {
                    on_failure(attempt, &err);
                    if attempt >= max_attempts {
                        return Err(err);
                    }
                    warn!(
                        unit_type = %plan.unit_type,
                        attempt,
                        max_attempts,
                        error = %err,
                        "Unit generation failed, retrying"
                    );
                    tokio::time::sleep(self.retry.delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
