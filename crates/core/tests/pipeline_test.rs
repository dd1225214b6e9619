//! End-to-end pipeline runs against a scripted completion client.
//!
//! Every test runs on paused tokio time: scripted delays decide which call
//! finishes first, and retry gaps can be asserted exactly.

use async_trait::async_trait;
use lingua_core::config::{PipelineConfig, RetryPolicy, SectionFailurePolicy};
use lingua_core::debug::{DebugRecorder, DebugSink};
use lingua_core::error::{CompletionError, LessonError};
use lingua_core::lesson::{CompiledSection, LessonRequest, StructuredLessonRequest};
use lingua_core::llm_client::{CompletionClient, OutputSchema};
use lingua_core::pipeline::LessonPipeline;
use lingua_core::progress::{ProgressReporter, ProgressStage};
use lingua_core::prompts::{PromptKey, PromptLibrary};
use lingua_core::unit::{
    CompiledUnit, Flashcard, FlashcardOutput, LessonPlanUnit, UnitOutput, UnitType,
};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

// --- Scripted client ---

struct Reply {
    delay: Duration,
    result: Result<Value, CompletionError>,
}

fn ok(delay_ms: u64, value: Value) -> Reply {
    Reply {
        delay: Duration::from_millis(delay_ms),
        result: Ok(value),
    }
}

fn fail(error: CompletionError) -> Reply {
    Reply {
        delay: Duration::ZERO,
        result: Err(error),
    }
}

type Handler = dyn Fn(&str) -> Reply + Send + Sync;

struct Call {
    prompt: String,
    started: Instant,
}

struct ScriptedClient {
    handler: Box<Handler>,
    calls: Mutex<Vec<Call>>,
    finished: Mutex<Vec<String>>,
}

impl ScriptedClient {
    fn new(handler: impl Fn(&str) -> Reply + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
            finished: Mutex::new(Vec::new()),
        })
    }

    async fn call(&self, prompt: &str) -> Result<Value, CompletionError> {
        self.calls.lock().unwrap().push(Call {
            prompt: prompt.to_string(),
            started: Instant::now(),
        });
        let reply = (self.handler)(prompt);
        tokio::time::sleep(reply.delay).await;
        self.finished.lock().unwrap().push(prompt.to_string());
        reply.result
    }

    fn prompts_containing(&self, marker: &str) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.prompt.contains(marker))
            .map(|c| c.prompt.clone())
            .collect()
    }
}

#[async_trait]
impl CompletionClient for ScriptedClient {
    async fn complete_free_text(&self, prompt: &str) -> Result<String, CompletionError> {
        self.call(prompt).await.map(|value| match value {
            Value::String(text) => text,
            other => other.to_string(),
        })
    }

    async fn complete_json(
        &self,
        prompt: &str,
        _schema: &OutputSchema,
    ) -> Result<Value, CompletionError> {
        self.call(prompt).await
    }
}

#[derive(Default)]
struct MemorySink {
    reports: Mutex<Vec<String>>,
}

#[async_trait]
impl DebugSink for MemorySink {
    async fn write_report(&self, _session_id: &str, report: &str) -> std::io::Result<()> {
        self.reports.lock().unwrap().push(report.to_string());
        Ok(())
    }
}

// --- Fixtures ---

/// Short templates whose first word tells the handler which stage is asking.
fn prompts() -> Arc<PromptLibrary> {
    let mut library = PromptLibrary::default();
    library.set(PromptKey::TopicBreakdown, "BREAKDOWN {{instructions}}");
    library.set(PromptKey::SectionGeneration, "SECTION {{section_instruction}}\n{{avoid}}");
    library.set(PromptKey::FlatGeneration, "FLAT {{instructions}}");
    library.set(PromptKey::LessonStructure, "STRUCTURE {{lesson_title}}");
    library.set(PromptKey::SectionSummary, "SUMMARY {{section_instruction}}");
    for unit_type in UnitType::ALL {
        library.set(
            unit_type.prompt_key(),
            format!("UNIT {unit_type} {{{{instructions}}}}\n{{{{lesson_so_far}}}}"),
        );
    }
    Arc::new(library)
}

fn request() -> LessonRequest {
    LessonRequest {
        instructions: "Ordering food in a restaurant".into(),
        user_level: "beginner".into(),
        target_language: "Spanish".into(),
        native_language: "English".into(),
    }
}

fn pipeline(client: Arc<ScriptedClient>, config: PipelineConfig) -> LessonPipeline {
    LessonPipeline::new(client, prompts(), config)
}

/// `(type, instructions)` of a unit prompt, skipping any prepended avoid text.
fn unit_line(prompt: &str) -> Option<(&str, &str)> {
    prompt
        .lines()
        .find_map(|line| line.strip_prefix("UNIT "))
        .and_then(|rest| rest.split_once(' '))
}

/// Parses `s{section}-u{unit}` instruction labels.
fn position(label: &str) -> (u64, u64) {
    let parse = |s: &str| s.trim_matches(|c: char| !c.is_ascii_digit()).parse::<u64>().unwrap_or(0);
    match label.split_once('-') {
        Some((section, unit)) => (parse(section), parse(unit)),
        None => (0, 0),
    }
}

fn unit_output(unit_type: &str, instructions: &str) -> Value {
    match unit_type {
        "flashcard" => json!({ "cards": [{ "term": instructions, "translation": "t", "example": "e" }] }),
        "explanation" => Value::String(format!("explained {instructions}")),
        "word_match" => json!({ "pairs": [{ "word": instructions, "meaning": "m" }] }),
        "conversation" => json!({
            "scenario": "cafe",
            "lines": [{ "speaker": "A", "text": instructions, "translation": "t" }]
        }),
        _ => Value::Null,
    }
}

/// Three sections of three units. Later sections and later units answer
/// sooner, so completion order is the reverse of document order.
fn lesson_reply(prompt: &str) -> Reply {
    if prompt.starts_with("BREAKDOWN ") {
        return ok(5, json!({ "sections": ["s0", "s1", "s2"] }));
    }
    if let Some(rest) = prompt.strip_prefix("SECTION ") {
        let section = rest.lines().next().unwrap_or_default().trim();
        let (index, _) = position(&format!("{section}-u0"));
        return ok(
            (3 - index) * 7,
            json!({ "units": [
                { "type": "flashcard", "instructions": format!("{section}-u0") },
                { "type": "explanation", "instructions": format!("{section}-u1") },
                { "type": "word_match", "instructions": format!("{section}-u2") },
            ]}),
        );
    }
    if let Some(rest) = prompt.strip_prefix("FLAT ") {
        return ok(1, json!({ "units": [{ "type": "flashcard", "instructions": rest }] }));
    }
    if let Some(rest) = prompt.strip_prefix("SUMMARY ") {
        return ok(1, Value::String(format!("summary of {rest}")));
    }
    if let Some((unit_type, instructions)) = unit_line(prompt) {
        let (section, unit) = position(instructions);
        return ok((3 - unit) * 10 + (3 - section), unit_output(unit_type, instructions));
    }
    fail(CompletionError::Transport(format!("unexpected prompt: {prompt}")))
}

// --- Sectioned lessons ---

#[tokio::test(start_paused = true)]
async fn test_sectioned_lesson_keeps_input_order_under_jitter() {
    let client = ScriptedClient::new(lesson_reply);
    let lesson = pipeline(client.clone(), PipelineConfig::default())
        .generate_sectioned(&request())
        .await
        .unwrap();

    assert_eq!(lesson.section_instructions, vec!["s0", "s1", "s2"]);
    assert_eq!(lesson.sections.len(), lesson.section_instructions.len());
    assert!(lesson.failed_sections.is_empty());
    for (i, section) in lesson.sections.iter().enumerate() {
        assert_eq!(section.section_instruction, lesson.section_instructions[i]);
        assert_eq!(section.section_index, i);
        assert_eq!(section.units.len(), section.unit_plans.len());
        for (j, unit) in section.units.iter().enumerate() {
            assert_eq!(unit.plan(), &section.unit_plans[j]);
            assert_eq!(unit.plan().instructions, format!("s{i}-u{j}"));
            let output = serde_json::to_string(unit.output()).unwrap();
            assert!(output.contains(&unit.plan().instructions));
        }
    }
    assert_eq!(lesson.unit_count(), 9);

    // Units of the first section finished in reverse order.
    let finished: Vec<String> = client
        .finished
        .lock()
        .unwrap()
        .iter()
        .filter_map(|p| unit_line(p).map(|(_, i)| i.to_string()))
        .filter(|i| i.starts_with("s0-"))
        .collect();
    assert_eq!(finished, vec!["s0-u2", "s0-u1", "s0-u0"]);
}

#[tokio::test(start_paused = true)]
async fn test_topic_breakdown_failure_stops_the_pipeline() {
    let client = ScriptedClient::new(|prompt| {
        if prompt.starts_with("BREAKDOWN ") {
            ok(0, json!({ "topics": [] }))
        } else {
            lesson_reply(prompt)
        }
    });
    let err = pipeline(client.clone(), PipelineConfig::default())
        .generate_sectioned(&request())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        LessonError::Completion(CompletionError::Validation { ref schema, .. }) if schema == "TopicBreakdown"
    ));
    // Not retried at this layer, and no section was started.
    assert_eq!(client.calls.lock().unwrap().len(), 1);
}

fn failing_section_reply(prompt: &str) -> Reply {
    match unit_line(prompt) {
        Some((_, instructions)) if instructions.starts_with("s1-") => fail(
            CompletionError::validation("FlashcardOutput", "missing field `cards`"),
        ),
        _ => lesson_reply(prompt),
    }
}

#[tokio::test(start_paused = true)]
async fn test_one_failed_section_fails_the_whole_lesson_by_default() {
    let client = ScriptedClient::new(failing_section_reply);
    let err = pipeline(client, PipelineConfig::default())
        .generate_sectioned(&request())
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    assert!(err.to_string().contains("missing field `cards`"));
}

#[tokio::test(start_paused = true)]
async fn test_failed_section_lets_siblings_finish_before_failing() {
    let sink = Arc::new(MemorySink::default());
    let client = ScriptedClient::new(|prompt| match unit_line(prompt) {
        Some((_, instructions)) if instructions.starts_with("s1-") => {
            fail(CompletionError::Transport(format!("{instructions} down")))
        }
        Some((unit_type, instructions)) => ok(5_000, unit_output(unit_type, instructions)),
        None => lesson_reply(prompt),
    });
    let config = PipelineConfig {
        retry: RetryPolicy {
            max_attempts: 1,
            delay: Duration::from_millis(500),
        },
        ..PipelineConfig::default()
    };

    let started = Instant::now();
    let err = pipeline(client.clone(), config)
        .with_debug(DebugRecorder::new(sink.clone()))
        .generate_sectioned(&request())
        .await
        .unwrap_err();

    // The lowest failed unit decides the error, but only once every sibling is done.
    assert_eq!(err.to_string(), "completion request failed: s1-u0 down");
    assert!(started.elapsed() >= Duration::from_millis(5_000));
    let unit_calls = |calls: &[String]| calls.iter().filter(|p| unit_line(p).is_some()).count();
    let started_prompts: Vec<String> =
        client.calls.lock().unwrap().iter().map(|c| c.prompt.clone()).collect();
    let finished_prompts = client.finished.lock().unwrap().clone();
    assert_eq!(unit_calls(&started_prompts), 9);
    assert_eq!(unit_calls(&finished_prompts), 9);

    let reports = sink.reports.lock().unwrap();
    assert_eq!(reports[0].matches("] UNIT_EXECUTION").count(), 9);
    assert_eq!(reports[0].matches("--- ERROR ---\ncompletion request failed: s1-").count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_keep_succeeded_policy_returns_surviving_sections() {
    let client = ScriptedClient::new(failing_section_reply);
    let config = PipelineConfig {
        section_failure: SectionFailurePolicy::KeepSucceeded,
        ..PipelineConfig::default()
    };
    let lesson = pipeline(client, config)
        .generate_sectioned(&request())
        .await
        .unwrap();

    let kept: Vec<usize> = lesson.sections.iter().map(|s| s.section_index).collect();
    assert_eq!(kept, vec![0, 2]);
    assert_eq!(lesson.section_instructions.len(), 3);
    assert_eq!(lesson.failed_sections.len(), 1);
    assert_eq!(lesson.failed_sections[0].section_index, 1);
    assert_eq!(lesson.failed_sections[0].section_instruction, "s1");

    let json = serde_json::to_value(&lesson).unwrap();
    assert_eq!(json["failedSections"][0]["sectionIndex"], 1);
}

// --- Retry ---

#[tokio::test(start_paused = true)]
async fn test_unit_retry_exhaustion_makes_three_attempts_500ms_apart() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let client = ScriptedClient::new(move |prompt| {
        if unit_line(prompt).is_some() {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            fail(CompletionError::Transport(format!("attempt {n}")))
        } else {
            lesson_reply(prompt)
        }
    });

    let err = pipeline(client.clone(), PipelineConfig::default())
        .generate_flat(&request())
        .await
        .unwrap_err();

    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert!(matches!(
        err,
        LessonError::Completion(CompletionError::Transport(ref message)) if message == "attempt 3"
    ));

    let calls = client.calls.lock().unwrap();
    let starts: Vec<Instant> = calls
        .iter()
        .filter(|c| unit_line(&c.prompt).is_some())
        .map(|c| c.started)
        .collect();
    assert_eq!(starts[1] - starts[0], Duration::from_millis(500));
    assert_eq!(starts[2] - starts[1], Duration::from_millis(500));
}

#[tokio::test(start_paused = true)]
async fn test_flat_lesson_is_a_single_section() {
    let client = ScriptedClient::new(lesson_reply);
    let lesson = pipeline(client, PipelineConfig::default())
        .generate_flat(&request())
        .await
        .unwrap();

    assert_eq!(lesson.sections.len(), 1);
    let section = &lesson.sections[0];
    assert_eq!(section.section_instruction, request().instructions);
    assert_eq!(section.units[0].unit_type(), UnitType::Flashcard);
    assert_eq!(section.learning_summary, None);
}

#[tokio::test(start_paused = true)]
async fn test_failed_summary_leaves_the_field_empty() {
    let sink = Arc::new(MemorySink::default());
    let client = ScriptedClient::new(|prompt| {
        if prompt.starts_with("SUMMARY ") {
            fail(CompletionError::Transport("summary model offline".into()))
        } else {
            lesson_reply(prompt)
        }
    });
    let config = PipelineConfig {
        generate_summaries: true,
        ..PipelineConfig::default()
    };

    let lesson = pipeline(client.clone(), config)
        .with_debug(DebugRecorder::new(sink.clone()))
        .generate_flat(&request())
        .await
        .unwrap();

    assert_eq!(lesson.sections[0].learning_summary, None);
    assert_eq!(lesson.sections[0].units.len(), 1);
    assert_eq!(client.prompts_containing("SUMMARY ").len(), 1);

    let reports = sink.reports.lock().unwrap();
    let report = &reports[0];
    let summary = &report[report.find("] SECTION_SUMMARY").unwrap()..];
    assert!(summary.contains("--- ERROR ---\ncompletion request failed: summary model offline"));
    assert!(report.contains("\"success\": true"));
}

#[tokio::test(start_paused = true)]
async fn test_undrained_progress_channel_does_not_stall_the_pipeline() {
    let client = ScriptedClient::new(lesson_reply);
    let (tx, mut rx) = mpsc::channel(1);

    let lesson = tokio::time::timeout(
        Duration::from_secs(3_600),
        pipeline(client, PipelineConfig::default())
            .with_progress(ProgressReporter::new(tx))
            .generate_sectioned(&request()),
    )
    .await
    .expect("pipeline waited on the progress channel")
    .unwrap();

    assert_eq!(lesson.unit_count(), 9);
    assert_eq!(rx.try_recv().unwrap().stage, ProgressStage::Structure);
    assert!(rx.try_recv().is_err());
}

// --- Redo ---

#[tokio::test(start_paused = true)]
async fn test_redo_unit_prepends_avoid_context() {
    let client = ScriptedClient::new(lesson_reply);
    let previous = CompiledUnit::new(
        LessonPlanUnit::new(UnitType::Flashcard, "s0-u0"),
        UnitOutput::Flashcard(FlashcardOutput {
            cards: ["hola", "adiós"]
                .iter()
                .map(|term| Flashcard {
                    term: term.to_string(),
                    translation: "t".into(),
                    example: "e".into(),
                })
                .collect(),
        }),
    );

    let unit = pipeline(client.clone(), PipelineConfig::default())
        .redo_unit(&request(), &previous)
        .await
        .unwrap();
    assert_eq!(unit.plan(), previous.plan());

    let prompts = client.prompts_containing("UNIT flashcard");
    assert_eq!(prompts.len(), 1);
    let prompt = &prompts[0];
    assert!(prompt.contains("DO NOT use any of these terms"));
    assert!(prompt.contains("hola") && prompt.contains("adiós"));
    assert!(prompt.find("hola").unwrap() < prompt.find("UNIT flashcard").unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_redo_section_keeps_position_and_avoids_previous_plans() {
    let client = ScriptedClient::new(lesson_reply);
    let previous = CompiledSection {
        section_instruction: "s2".into(),
        section_index: 2,
        unit_plans: vec![LessonPlanUnit::new(UnitType::Translation, "old paragraph")],
        units: Vec::new(),
        learning_summary: None,
    };

    let section = pipeline(client.clone(), PipelineConfig::default())
        .redo_section(&request(), &previous)
        .await
        .unwrap();
    assert_eq!(section.section_index, 2);
    assert_eq!(section.section_instruction, "s2");
    assert_eq!(section.units.len(), 3);

    let section_prompts = client.prompts_containing("SECTION s2");
    assert_eq!(section_prompts.len(), 1);
    assert!(section_prompts[0].contains("DO NOT repeat"));
    assert!(section_prompts[0].contains("[translation] old paragraph"));
    assert!(client.prompts_containing("BREAKDOWN").is_empty());
}

// --- Markup variant ---

fn structured_request() -> StructuredLessonRequest {
    StructuredLessonRequest {
        lesson: request(),
        lesson_title: "At the bakery".into(),
        lesson_description: "Buying bread".into(),
        week_title: Some("Shopping".into()),
        week_description: None,
        week_lessons_so_far: vec!["At the market".into()],
        previous_weeks_summary: None,
    }
}

#[tokio::test(start_paused = true)]
async fn test_markup_lesson_skips_unknown_units_and_shares_the_outline() {
    let client = ScriptedClient::new(|prompt| {
        if prompt.starts_with("STRUCTURE ") {
            ok(
                3,
                Value::String(
                    "Here you go:\n<lesson>\n\
                     <unit type=\"flashcard\" name=\"Breads\">s0-u0</unit>\n\
                     <unit type=\"karaoke\" name=\"Sing\">nope</unit>\n\
                     <unit type=\"conversation\" name=\"Buying\">s0-u1</unit>\n\
                     </lesson>"
                        .into(),
                ),
            )
        } else {
            lesson_reply(prompt)
        }
    });
    let (tx, mut rx) = mpsc::channel(64);
    let config = PipelineConfig {
        generate_summaries: true,
        ..PipelineConfig::default()
    };

    let lesson = pipeline(client.clone(), config)
        .with_progress(ProgressReporter::new(tx))
        .generate_from_markup(&structured_request())
        .await
        .unwrap();

    let section = &lesson.sections[0];
    assert_eq!(lesson.section_instructions, vec!["At the bakery"]);
    let types: Vec<UnitType> = section.units.iter().map(|u| u.unit_type()).collect();
    assert_eq!(types, vec![UnitType::Flashcard, UnitType::Conversation]);
    assert_eq!(section.learning_summary.as_deref(), Some("summary of At the bakery"));

    for prompt in client.prompts_containing("UNIT ") {
        assert!(prompt.contains("2. Buying (conversation): s0-u1"));
    }

    let mut stages = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if stages.last() != Some(&event.stage) {
            stages.push(event.stage);
        }
    }
    assert_eq!(
        stages,
        vec![
            ProgressStage::Structure,
            ProgressStage::Parsing,
            ProgressStage::Units,
            ProgressStage::Summaries,
            ProgressStage::Complete,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_markup_parse_failure_is_fatal_and_not_retried() {
    let client = ScriptedClient::new(|_| ok(0, Value::String("Sorry, no lesson today.".into())));
    let err = pipeline(client.clone(), PipelineConfig::default())
        .generate_from_markup(&structured_request())
        .await
        .unwrap_err();

    assert!(matches!(err, LessonError::Markup(_)));
    assert!(!err.is_retryable());
    assert_eq!(client.calls.lock().unwrap().len(), 1);
}

// --- Debug reports ---

#[tokio::test(start_paused = true)]
async fn test_debug_report_covers_every_stage() {
    let sink = Arc::new(MemorySink::default());
    let client = ScriptedClient::new(lesson_reply);
    pipeline(client, PipelineConfig::default())
        .with_debug(DebugRecorder::new(sink.clone()))
        .generate_sectioned(&request())
        .await
        .unwrap();

    let reports = sink.reports.lock().unwrap();
    assert_eq!(reports.len(), 1);
    let report = &reports[0];
    for stage in [
        "SESSION_START",
        "TOPIC_BREAKDOWN",
        "SECTION_GENERATION",
        "UNIT_EXECUTION",
        "SESSION_END",
    ] {
        assert!(report.contains(stage), "missing {stage}");
    }
    assert_eq!(report.matches("] UNIT_EXECUTION").count(), 9);
    assert!(report.contains("Type: word_match"));
    // Unit entries carry the reply as received next to the parsed output.
    assert!(report.contains("--- RAW RESPONSE ---\nexplained s1-u1\n--- PARSED OUTPUT ---"));
    assert!(report.contains("\"success\": true"));
}

#[tokio::test(start_paused = true)]
async fn test_debug_report_records_each_failed_attempt() {
    let sink = Arc::new(MemorySink::default());
    let client = ScriptedClient::new(|prompt| match unit_line(prompt) {
        Some(_) => fail(CompletionError::Transport("quota exceeded".into())),
        None => lesson_reply(prompt),
    });
    let result = pipeline(client, PipelineConfig::default())
        .with_debug(DebugRecorder::new(sink.clone()))
        .generate_flat(&request())
        .await;
    assert!(result.is_err());

    let reports = sink.reports.lock().unwrap();
    let report = &reports[0];
    assert_eq!(
        report
            .matches("--- ERROR ---\ncompletion request failed: quota exceeded")
            .count(),
        3
    );
    assert!(report.contains("\"success\": false"));
}
