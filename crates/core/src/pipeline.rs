//! Stage Orchestrator
//!
//! [`LessonPipeline`] drives the lesson generation stages:
//!
//! 1. **Topic breakdown**: one structured call turns the request into an
//!    ordered list of section instructions.
//! 2. **Section fan-out**: every section concurrently plans its units
//!    (section generation) and then generates all of them concurrently
//!    through the [`UnitExecutor`].
//! 3. **Assembly**: results are stored by position, so the lesson always
//!    follows the order of the breakdown and of each section's plan.
//!
//! Fan-outs are joined, never cancelled: a failing section or unit only
//! fails the run after its siblings have finished, so every attempt ends up
//! in the debug report.
//!
//! The flat and markup variants replace stages 1-2 with a single planning
//! call. Every operation records its own [`DebugSession`].

use crate::avoid_context::build_avoid_context;
use crate::config::{PipelineConfig, SectionFailurePolicy};
use crate::debug::{DebugEntry, DebugRecorder, DebugSession, DebugStage};
use crate::error::{CompletionError, LessonError};
use crate::executor::UnitExecutor;
use crate::lesson::{
    CompiledSection, LessonRequest, SectionFailure, SectionedLesson, StructuredLessonRequest,
};
use crate::llm_client::{CompletionClient, OutputSchema};
use crate::markup::{ParsedUnit, parse_lesson_markup};
use crate::progress::{ProgressReporter, ProgressStage};
use crate::prompts::{PromptKey, PromptLibrary};
use crate::template::{TemplateVars, render_template};
use crate::topic::{SectionPlan, TopicBreakdown};
use crate::unit::{CompiledUnit, LessonPlanUnit, UnitType};
use futures::future::join_all;
use schemars::JsonSchema;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{error, info, warn};

/// Orchestrates lesson generation. Cheap to clone; one instance can serve
/// any number of concurrent runs.
#[derive(Clone)]
pub struct LessonPipeline {
    client: Arc<dyn CompletionClient>,
    prompts: Arc<PromptLibrary>,
    executor: UnitExecutor,
    config: PipelineConfig,
    debug: DebugRecorder,
    progress: ProgressReporter,
}

impl LessonPipeline {
    pub fn new(
        client: Arc<dyn CompletionClient>,
        prompts: Arc<PromptLibrary>,
        config: PipelineConfig,
    ) -> Self {
        let executor = UnitExecutor::new(client.clone(), prompts.clone(), config.retry);
        Self {
            client,
            prompts,
            executor,
            config,
            debug: DebugRecorder::disabled(),
            progress: ProgressReporter::disabled(),
        }
    }

    pub fn with_debug(mut self, debug: DebugRecorder) -> Self {
        self.debug = debug;
        self
    }

    /// Attaches a progress channel. Clone the pipeline first to scope the
    /// channel to a single run.
    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Breaks the request into sections and generates every section.
    pub async fn generate_sectioned(
        &self,
        request: &LessonRequest,
    ) -> Result<SectionedLesson, LessonError> {
        let session = self.debug.start_session(&request.instructions);
        let result = self.run_sectioned(request, &session).await;
        self.close("generate_sectioned", session, &result).await;
        result
    }

    /// Plans and generates one flat list of units, returned as a lesson with
    /// a single section.
    pub async fn generate_flat(
        &self,
        request: &LessonRequest,
    ) -> Result<SectionedLesson, LessonError> {
        let session = self.debug.start_session(&request.instructions);
        let result = self.run_flat(request, &session).await;
        self.close("generate_flat", session, &result).await;
        result
    }

    /// Plans a curriculum lesson through tagged markup and generates its
    /// units with the whole lesson outline as context.
    pub async fn generate_from_markup(
        &self,
        request: &StructuredLessonRequest,
    ) -> Result<SectionedLesson, LessonError> {
        let session = self.debug.start_session(&request.lesson.instructions);
        let result = self.run_markup(request, &session).await;
        self.close("generate_from_markup", session, &result).await;
        result
    }

    /// Regenerates a single unit with the same plan, telling the model what
    /// the previous output contained.
    pub async fn redo_unit(
        &self,
        request: &LessonRequest,
        previous: &CompiledUnit,
    ) -> Result<CompiledUnit, LessonError> {
        let session = self.debug.start_session(&previous.plan().instructions);
        let avoid = build_avoid_context(previous);
        let plan = previous.plan().clone();
        let prompt = self.executor.build_prompt(&plan, request, None, Some(&avoid));
        let result = self.execute_unit(&plan, &prompt, None, 0, &session).await;
        self.close("redo_unit", session, &result).await;
        result
    }

    /// Re-plans and regenerates one section, avoiding its previous units.
    /// Sibling sections are untouched; the index and instruction are kept.
    pub async fn redo_section(
        &self,
        request: &LessonRequest,
        previous: &CompiledSection,
    ) -> Result<CompiledSection, LessonError> {
        let session = self.debug.start_session(&previous.section_instruction);
        let avoid = (!previous.unit_plans.is_empty()).then(|| {
            format!(
                "A previous version of this section used the exercises below. Plan a different set and DO NOT repeat them:\n{}",
                SectionPlan::outline(&previous.unit_plans)
            )
        });
        let result = self
            .compile_section(
                request,
                previous.section_index,
                &previous.section_instruction,
                avoid.as_deref(),
                &session,
            )
            .await;
        self.close("redo_section", session, &result).await;
        result
    }

    async fn run_sectioned(
        &self,
        request: &LessonRequest,
        session: &DebugSession,
    ) -> Result<SectionedLesson, LessonError> {
        self.progress.report(ProgressStage::Structure, "Breaking the topic into sections");
        let prompt = render_template(
            self.prompts.get(PromptKey::TopicBreakdown),
            &request.template_vars(),
        );
        let breakdown: TopicBreakdown = self
            .structured_call(&prompt, || DebugEntry::new(DebugStage::TopicBreakdown), session)
            .await?;
        let section_instructions = breakdown.into_instructions();
        info!(sections = section_instructions.len(), "Topic breakdown complete");
        if section_instructions.is_empty() {
            warn!("Topic breakdown returned no sections");
        }

        let sections = section_instructions
            .iter()
            .enumerate()
            .map(|(index, instruction)| {
                self.compile_section(request, index, instruction, None, session)
            });

        let results = join_all(sections).await;
        let (sections, failed_sections) = match self.config.section_failure {
            SectionFailurePolicy::AllOrNothing => (first_error_by_position(results)?, Vec::new()),
            SectionFailurePolicy::KeepSucceeded => keep_succeeded(&section_instructions, results)?,
        };

        self.progress.report(ProgressStage::Complete, "Lesson ready");
        Ok(SectionedLesson {
            input: request.clone(),
            section_instructions,
            sections,
            failed_sections,
        })
    }

    async fn run_flat(
        &self,
        request: &LessonRequest,
        session: &DebugSession,
    ) -> Result<SectionedLesson, LessonError> {
        self.progress.report(ProgressStage::Structure, "Planning lesson units");
        let prompt = render_template(
            self.prompts.get(PromptKey::FlatGeneration),
            &request.template_vars(),
        );
        let plan: SectionPlan = self
            .structured_call(
                &prompt,
                || DebugEntry::new(DebugStage::SectionGeneration).section(0),
                session,
            )
            .await?;
        info!(units = plan.units.len(), "Flat lesson planned");

        let units = self
            .fan_out_units(request, 0, &plan.units, None, session)
            .await?;
        let learning_summary = self
            .summarize(request, 0, &request.instructions, &plan.units, session)
            .await;

        self.progress.report(ProgressStage::Complete, "Lesson ready");
        Ok(SectionedLesson {
            input: request.clone(),
            section_instructions: vec![request.instructions.clone()],
            sections: vec![CompiledSection {
                section_instruction: request.instructions.clone(),
                section_index: 0,
                unit_plans: plan.units,
                units,
                learning_summary,
            }],
            failed_sections: Vec::new(),
        })
    }

    async fn run_markup(
        &self,
        request: &StructuredLessonRequest,
        session: &DebugSession,
    ) -> Result<SectionedLesson, LessonError> {
        self.progress.report(ProgressStage::Structure, "Designing the lesson structure");
        let prompt = render_template(
            self.prompts.get(PromptKey::LessonStructure),
            &request.template_vars(),
        );
        let entry = DebugEntry::new(DebugStage::LessonStructure).prompt(prompt.as_str());
        let reply = match self.client.complete_free_text(&prompt).await {
            Ok(reply) => {
                session.record(entry.raw_response(Value::String(reply.clone())));
                reply
            }
            Err(err) => {
                session.record(entry.error(&err));
                return Err(err.into());
            }
        };

        self.progress.report(ProgressStage::Parsing, "Reading the lesson structure");
        let parsed = match parse_lesson_markup(&reply) {
            Ok(parsed) => parsed,
            Err(err) => {
                let err = LessonError::from(err);
                session.record(DebugEntry::new(DebugStage::MarkupParse).error(&err));
                return Err(err);
            }
        };
        session.record(DebugEntry::new(DebugStage::MarkupParse).parsed_output(to_debug_value(&parsed)));
        info!(units = parsed.len(), lesson = %request.lesson_title, "Lesson structure parsed");

        let outline = lesson_outline(&request.lesson_title, &parsed);
        let unit_plans: Vec<LessonPlanUnit> = parsed.into_iter().map(Into::into).collect();
        let units = self
            .fan_out_units(&request.lesson, 0, &unit_plans, Some(&outline), session)
            .await?;
        let learning_summary = self
            .summarize(&request.lesson, 0, &request.lesson_title, &unit_plans, session)
            .await;

        self.progress.report(ProgressStage::Complete, "Lesson ready");
        Ok(SectionedLesson {
            input: request.lesson.clone(),
            section_instructions: vec![request.lesson_title.clone()],
            sections: vec![CompiledSection {
                section_instruction: request.lesson_title.clone(),
                section_index: 0,
                unit_plans,
                units,
                learning_summary,
            }],
            failed_sections: Vec::new(),
        })
    }

    /// Section generation followed by the unit fan-out for one section.
    async fn compile_section(
        &self,
        request: &LessonRequest,
        section_index: usize,
        section_instruction: &str,
        avoid: Option<&str>,
        session: &DebugSession,
    ) -> Result<CompiledSection, LessonError> {
        let mut vars = request.template_vars();
        vars.insert("section_instruction", section_instruction.to_string());
        vars.insert("avoid", avoid.unwrap_or_default().to_string());
        let prompt = render_template(self.prompts.get(PromptKey::SectionGeneration), &vars);

        let plan: SectionPlan = self
            .structured_call(
                &prompt,
                || DebugEntry::new(DebugStage::SectionGeneration).section(section_index),
                session,
            )
            .await?;
        info!(
            section_index,
            units = plan.units.len(),
            types = ?plan.type_counts(),
            "Section planned"
        );

        let units = self
            .fan_out_units(request, section_index, &plan.units, None, session)
            .await?;
        let learning_summary = self
            .summarize(request, section_index, section_instruction, &plan.units, session)
            .await;

        Ok(CompiledSection {
            section_instruction: section_instruction.to_string(),
            section_index,
            unit_plans: plan.units,
            units,
            learning_summary,
        })
    }

    /// Generates every plan concurrently. The output keeps plan order. Every
    /// unit runs to completion; the failure of the lowest position then
    /// fails the whole section.
    async fn fan_out_units(
        &self,
        request: &LessonRequest,
        section_index: usize,
        plans: &[LessonPlanUnit],
        lesson_so_far: Option<&str>,
        session: &DebugSession,
    ) -> Result<Vec<CompiledUnit>, LessonError> {
        let total = plans.len();
        let done = AtomicUsize::new(0);
        let done = &done;

        let units = plans.iter().enumerate().map(|(unit_index, plan)| async move {
            let prompt = self.executor.build_prompt(plan, request, lesson_so_far, None);
            let unit = self
                .execute_unit(plan, &prompt, Some(section_index), unit_index, session)
                .await?;
            let current = done.fetch_add(1, Ordering::SeqCst) + 1;
            self.progress
                .report_count(
                    ProgressStage::Units,
                    format!("Section {}: {} ready", section_index + 1, plan.unit_type.label()),
                    current,
                    total,
                );
            Ok::<_, LessonError>(unit)
        });
        first_error_by_position(join_all(units).await)
    }

    /// Runs one unit through the executor, recording every failed attempt
    /// and the final outcome.
    async fn execute_unit(
        &self,
        plan: &LessonPlanUnit,
        prompt: &str,
        section_index: Option<usize>,
        unit_index: usize,
        session: &DebugSession,
    ) -> Result<CompiledUnit, LessonError> {
        let entry = || unit_entry(section_index, unit_index, plan.unit_type).prompt(prompt);
        let result = self
            .executor
            .execute_prompt(plan, prompt, |_, err| session.record(entry().error(err)))
            .await;

        match result {
            Ok((unit, raw)) => {
                session.record(
                    entry()
                        .raw_response(raw)
                        .parsed_output(to_debug_value(unit.output())),
                );
                Ok(unit)
            }
            Err(err) => {
                error!(
                    section_index,
                    unit_index,
                    unit_type = %plan.unit_type,
                    error = %err,
                    "Unit generation failed after all attempts"
                );
                Err(err.into())
            }
        }
    }

    /// Produces the learning summary of a section when enabled. Failures
    /// leave the summary empty.
    async fn summarize(
        &self,
        request: &LessonRequest,
        section_index: usize,
        section_instruction: &str,
        plans: &[LessonPlanUnit],
        session: &DebugSession,
    ) -> Option<String> {
        if !self.config.generate_summaries {
            return None;
        }
        self.progress
            .report(
                ProgressStage::Summaries,
                format!("Summarising section {}", section_index + 1),
            );

        let mut vars: TemplateVars = request.template_vars();
        vars.insert("section_instruction", section_instruction.to_string());
        vars.insert("unit_list", SectionPlan::outline(plans));
        let prompt = render_template(self.prompts.get(PromptKey::SectionSummary), &vars);
        let entry = DebugEntry::new(DebugStage::SectionSummary)
            .section(section_index)
            .prompt(prompt.as_str());

        match self.client.complete_free_text(&prompt).await {
            Ok(text) => {
                let summary = text.trim().to_string();
                session.record(entry.raw_response(Value::String(text)));
                (!summary.is_empty()).then_some(summary)
            }
            Err(err) => {
                warn!(section_index, error = %err, "Section summary failed, continuing without it");
                session.record(entry.error(&err));
                None
            }
        }
    }

    /// A structured completion for a planning stage. Not retried; the raw
    /// reply is recorded before validation.
    async fn structured_call<T, E>(
        &self,
        prompt: &str,
        entry: E,
        session: &DebugSession,
    ) -> Result<T, CompletionError>
    where
        T: DeserializeOwned + JsonSchema + Serialize,
        E: Fn() -> DebugEntry,
    {
        let schema = OutputSchema::of::<T>();
        let raw = match self.client.complete_json(prompt, &schema).await {
            Ok(raw) => raw,
            Err(err) => {
                session.record(entry().prompt(prompt).error(&err));
                return Err(err);
            }
        };

        match serde_json::from_value::<T>(raw.clone()) {
            Ok(parsed) => {
                session.record(
                    entry()
                        .prompt(prompt)
                        .raw_response(raw)
                        .parsed_output(to_debug_value(&parsed)),
                );
                Ok(parsed)
            }
            Err(e) => {
                let err = CompletionError::validation(&schema.name, e.to_string());
                session.record(entry().prompt(prompt).raw_response(raw).error(&err));
                Err(err)
            }
        }
    }

    async fn close<T>(
        &self,
        operation: &'static str,
        session: DebugSession,
        result: &Result<T, LessonError>,
    ) {
        match result {
            Ok(_) => info!(operation, session_id = session.id(), "Lesson pipeline succeeded"),
            Err(err) => error!(
                operation,
                session_id = session.id(),
                error = %err,
                "Lesson pipeline failed"
            ),
        }
        session.finish(result.is_ok()).await;
    }
}

fn unit_entry(section_index: Option<usize>, unit_index: usize, unit_type: UnitType) -> DebugEntry {
    let entry = DebugEntry::new(DebugStage::UnitExecution).unit(unit_index, unit_type);
    match section_index {
        Some(index) => entry.section(index),
        None => entry,
    }
}

fn to_debug_value<T: Serialize + ?Sized>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// Collects joined results in order, failing with the error of the lowest
/// failed position.
fn first_error_by_position<T>(
    results: Vec<Result<T, LessonError>>,
) -> Result<Vec<T>, LessonError> {
    results.into_iter().collect()
}

/// Splits joined section results under [`SectionFailurePolicy::KeepSucceeded`].
/// Fails with the first error only when no section succeeded.
fn keep_succeeded(
    instructions: &[String],
    results: Vec<Result<CompiledSection, LessonError>>,
) -> Result<(Vec<CompiledSection>, Vec<SectionFailure>), LessonError> {
    let mut sections = Vec::new();
    let mut failures = Vec::new();
    let mut first_error = None;

    for (section_index, result) in results.into_iter().enumerate() {
        match result {
            Ok(section) => sections.push(section),
            Err(err) => {
                warn!(section_index, error = %err, "Dropping failed section");
                failures.push(SectionFailure {
                    section_index,
                    section_instruction: instructions
                        .get(section_index)
                        .cloned()
                        .unwrap_or_default(),
                    error: err.to_string(),
                });
                first_error.get_or_insert(err);
            }
        }
    }

    match first_error {
        Some(err) if sections.is_empty() => Err(err),
        _ => Ok((sections, failures)),
    }
}

/// The `{{lesson_so_far}}` block for markup lessons: every unit of the
/// lesson, so each generation knows what its siblings cover.
fn lesson_outline(title: &str, units: &[ParsedUnit]) -> String {
    let mut outline = format!("This unit is part of the lesson \"{title}\", which contains:");
    for (i, unit) in units.iter().enumerate() {
        outline.push_str(&format!(
            "\n{}. {} ({}): {}",
            i + 1,
            unit.name,
            unit.unit_type,
            unit.instructions
        ));
    }
    outline
}
