//! Generation status carried by content entities (courses, articles).

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Lifecycle of a generated entity as seen by the outside world.
///
/// `Failed` is terminal for automatic processing: only a manual re-trigger
/// moves the entity back to `Pending`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GenerationStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl GenerationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationStatus::Pending => "PENDING",
            GenerationStatus::InProgress => "IN_PROGRESS",
            GenerationStatus::Completed => "COMPLETED",
            GenerationStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, GenerationStatus::Completed | GenerationStatus::Failed)
    }
}

impl fmt::Display for GenerationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GenerationStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(GenerationStatus::Pending),
            "IN_PROGRESS" => Ok(GenerationStatus::InProgress),
            "COMPLETED" => Ok(GenerationStatus::Completed),
            "FAILED" => Ok(GenerationStatus::Failed),
            other => Err(DomainError::validation(format!(
                "unknown generation status: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_form_matches_serde_form() {
        for status in [
            GenerationStatus::Pending,
            GenerationStatus::InProgress,
            GenerationStatus::Completed,
            GenerationStatus::Failed,
        ] {
            let json = serde_json::to_value(status).unwrap();
            assert_eq!(json.as_str().unwrap(), status.as_str());
            assert_eq!(status.as_str().parse::<GenerationStatus>().unwrap(), status);
        }
    }

    #[test]
    fn only_completed_and_failed_are_terminal() {
        assert!(!GenerationStatus::Pending.is_terminal());
        assert!(!GenerationStatus::InProgress.is_terminal());
        assert!(GenerationStatus::Completed.is_terminal());
        assert!(GenerationStatus::Failed.is_terminal());
    }
}
