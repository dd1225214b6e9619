//! Tunables for one [`crate::pipeline::LessonPipeline`].

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Fixed-delay retry applied to every unit generation.
///
/// Every completion failure is retried the same way; there is no backoff
/// and no distinction between error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Values below 1 act as 1.
    pub max_attempts: u32,
    /// Pause between a failed attempt and the next one.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(500),
        }
    }
}

/// What to do when some sections of a lesson fail and others succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionFailurePolicy {
    /// Any failed section fails the whole lesson.
    #[default]
    AllOrNothing,
    /// Return the sections that succeeded and report the rest as failures.
    /// Still fails when no section succeeds.
    KeepSucceeded,
}

impl FromStr for SectionFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "all_or_nothing" => Ok(Self::AllOrNothing),
            "keep_succeeded" => Ok(Self::KeepSucceeded),
            other => Err(format!(
                "'{other}' is not a section failure policy (expected all_or_nothing or keep_succeeded)"
            )),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineConfig {
    pub retry: RetryPolicy,
    pub section_failure: SectionFailurePolicy,
    /// Generate a learning summary for every compiled section.
    pub generate_summaries: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.delay, Duration::from_millis(500));
        assert_eq!(config.section_failure, SectionFailurePolicy::AllOrNothing);
        assert!(!config.generate_summaries);
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!(
            "Keep_Succeeded".parse::<SectionFailurePolicy>().unwrap(),
            SectionFailurePolicy::KeepSucceeded
        );
        assert!("partial".parse::<SectionFailurePolicy>().is_err());
    }
}
