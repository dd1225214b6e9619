//! Error types shared by every stage of lesson generation.
//!
//! The taxonomy mirrors how failures are treated: completion errors are
//! retried by the unit executor, markup and unknown-type errors are
//! deterministic and always fatal.

use thiserror::Error;

/// Failure reported by a [`crate::llm_client::CompletionClient`].
///
/// Both variants are treated identically by the retry loop; they stay
/// distinct so callers and logs can tell a bad model reply from a failed call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompletionError {
    /// The model replied, but the reply cannot be coerced to the schema.
    #[error("model output does not match schema '{schema}': {message}")]
    Validation { schema: String, message: String },
    /// The request itself failed (network, timeout, quota, API error).
    #[error("completion request failed: {0}")]
    Transport(String),
}

impl CompletionError {
    pub fn validation(schema: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            schema: schema.into(),
            message: message.into(),
        }
    }
}

/// Fatal failure while reading model-emitted tagged markup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MarkupParseError {
    #[error("no <{root}> element found in model response")]
    MissingRoot { root: &'static str },
    #[error("<lesson> contained no unit with a recognised type")]
    NoValidUnits,
    #[error("<curriculum> contained no <Month> elements")]
    NoMonths,
}

/// Error returned by every pipeline operation.
#[derive(Debug, Error)]
pub enum LessonError {
    #[error(transparent)]
    Completion(#[from] CompletionError),
    #[error(transparent)]
    Markup(#[from] MarkupParseError),
    #[error("unknown unit type '{0}'")]
    UnknownUnitType(String),
}

impl LessonError {
    /// Whether the unit executor may retry after this error.
    ///
    /// Only completion failures qualify; the other kinds would fail the same
    /// way on every attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Completion(_))
    }
}

/// Renders an error and its `source()` chain, one cause per line.
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut lines = vec![err.to_string()];
    let mut current = err.source();
    while let Some(cause) = current {
        lines.push(format!("caused by: {cause}"));
        current = cause.source();
    }
    lines.join("\n")
}
