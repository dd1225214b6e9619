//! Main Entrypoint for the Lesson Generator
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Initializing logging (to stderr, so stdout stays machine readable).
//! 3. Wiring the completion client, pipeline and curriculum service.
//! 4. Running one command and printing its result as JSON.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use lingua_core::curriculum::CurriculumRequest;
use lingua_core::lesson::{LessonRequest, SectionedLesson, StructuredLessonRequest};
use lingua_core::pipeline::LessonPipeline;
use lingua_core::progress::{ProgressEvent, ProgressReporter};
use lingua_lessons::{config::Config, state::AppState};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::info;

/// Generates language-learning lessons and curricula with a language model.
#[derive(Parser, Debug)]
#[command(name = "lessons")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Log progress events while the pipeline runs
    #[arg(long, global = true)]
    progress: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Break a topic into sections and generate every section
    Sectioned(LearnerArgs),
    /// Generate a single flat list of units
    Flat(LearnerArgs),
    /// Generate a curriculum lesson through the markup structure prompt
    Markup(MarkupArgs),
    /// Generate a month / week / lesson roadmap
    Curriculum {
        #[command(flatten)]
        learner: LearnerArgs,
        /// Length of the curriculum in months
        #[arg(long, default_value_t = 3)]
        months: u32,
    },
    /// Regenerate one unit of a saved lesson
    RedoUnit {
        /// Lesson JSON previously printed by this tool
        #[arg(long, value_name = "FILE")]
        lesson: PathBuf,
        #[arg(long)]
        section: usize,
        #[arg(long)]
        unit: usize,
    },
    /// Regenerate one section of a saved lesson
    RedoSection {
        /// Lesson JSON previously printed by this tool
        #[arg(long, value_name = "FILE")]
        lesson: PathBuf,
        #[arg(long)]
        section: usize,
    },
}

#[derive(Args, Debug)]
struct LearnerArgs {
    /// What the lesson should teach
    #[arg(short, long, default_value = "")]
    instructions: String,
    /// Learner level, e.g. "beginner" or "B1"
    #[arg(long, default_value = "beginner")]
    level: String,
    /// Language being learned
    #[arg(long)]
    target: String,
    /// Learner's native language
    #[arg(long, default_value = "English")]
    native: String,
}

impl From<LearnerArgs> for LessonRequest {
    fn from(args: LearnerArgs) -> Self {
        LessonRequest {
            instructions: args.instructions,
            user_level: args.level,
            target_language: args.target,
            native_language: args.native,
        }
    }
}

#[derive(Args, Debug)]
struct MarkupArgs {
    #[command(flatten)]
    learner: LearnerArgs,
    #[arg(long)]
    title: String,
    #[arg(long, default_value = "")]
    description: String,
    #[arg(long)]
    week_title: Option<String>,
    #[arg(long)]
    week_description: Option<String>,
    /// Title of an earlier lesson in the same week (repeatable)
    #[arg(long = "week-lesson")]
    week_lessons: Vec<String>,
    #[arg(long)]
    previous_weeks_summary: Option<String>,
}

impl From<MarkupArgs> for StructuredLessonRequest {
    fn from(args: MarkupArgs) -> Self {
        StructuredLessonRequest {
            lesson: args.learner.into(),
            lesson_title: args.title,
            lesson_description: args.description,
            week_title: args.week_title,
            week_description: args.week_description,
            week_lessons_so_far: args.week_lessons,
            previous_weeks_summary: args.previous_weeks_summary,
        }
    }
}

/// Attaches a progress channel whose events are logged as they arrive.
fn with_progress_logging(pipeline: LessonPipeline) -> LessonPipeline {
    let (tx, mut rx) = mpsc::channel::<ProgressEvent>(32);
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            info!(
                stage = ?event.stage,
                current = ?event.current,
                total = ?event.total,
                "{}",
                event.message
            );
        }
    });
    pipeline.with_progress(ProgressReporter::new(tx))
}

fn read_lesson(path: &Path) -> anyhow::Result<SectionedLesson> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read lesson file {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid lesson JSON in {}", path.display()))
}

fn section_position(lesson: &SectionedLesson, section: usize) -> anyhow::Result<usize> {
    lesson
        .sections
        .iter()
        .position(|s| s.section_index == section)
        .with_context(|| format!("Lesson has no section with index {section}"))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();
    info!("Configuration loaded. Initializing services...");

    // --- 3. Initialize Shared Services ---
    let state = AppState::from_config(config).context("Failed to initialize services")?;
    let pipeline = if cli.progress {
        with_progress_logging(state.pipeline.clone())
    } else {
        state.pipeline.clone()
    };

    // --- 4. Run the Command ---
    match cli.command {
        Command::Sectioned(learner) => {
            let lesson = pipeline.generate_sectioned(&learner.into()).await?;
            print_json(&lesson)
        }
        Command::Flat(learner) => {
            let lesson = pipeline.generate_flat(&learner.into()).await?;
            print_json(&lesson)
        }
        Command::Markup(args) => {
            let lesson = pipeline.generate_from_markup(&args.into()).await?;
            print_json(&lesson)
        }
        Command::Curriculum { learner, months } => {
            let request = CurriculumRequest {
                learner: learner.into(),
                months,
            };
            let curriculum = state.curriculum_service.generate_curriculum(&request).await?;
            print_json(&curriculum)
        }
        Command::RedoUnit {
            lesson,
            section,
            unit,
        } => {
            let mut lesson = read_lesson(&lesson)?;
            let position = section_position(&lesson, section)?;
            let previous = lesson.sections[position]
                .units
                .get(unit)
                .with_context(|| format!("Section {section} has no unit {unit}"))?;
            let replacement = pipeline.redo_unit(&lesson.input, previous).await?;
            lesson.sections[position].units[unit] = replacement;
            print_json(&lesson)
        }
        Command::RedoSection { lesson, section } => {
            let mut lesson = read_lesson(&lesson)?;
            let position = section_position(&lesson, section)?;
            let replacement = pipeline
                .redo_section(&lesson.input, &lesson.sections[position])
                .await?;
            lesson.sections[position] = replacement;
            print_json(&lesson)
        }
    }
}
