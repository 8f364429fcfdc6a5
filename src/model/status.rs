//! Status enums for projects and crawl jobs
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle stage of a crowdfunding project as shown on its detail page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ProjectStatus {
    /// Gathering interest; no funding window yet
    Idea,

    /// Announced with a start time; funding not open
    Preheat,

    /// Accepting pledges
    Active,

    Succeeded,
    Failed,
    Cancelled,

    #[default]
    Unknown,
}

impl ProjectStatus {
    /// Returns true if a project in this stage shows a funding target
    pub fn carries_target(&self) -> bool {
        matches!(
            self,
            Self::Active | Self::Succeeded | Self::Failed | Self::Cancelled
        )
    }

    /// Returns true if a project in this stage has a start/end window
    pub fn has_schedule(&self) -> bool {
        !matches!(self, Self::Idea | Self::Unknown)
    }

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Idea => "idea",
            Self::Preheat => "preheat",
            Self::Active => "active",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Unknown => "unknown",
        }
    }

    /// Returns None if the string doesn't match any known status
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "idea" => Some(Self::Idea),
            "preheat" => Some(Self::Preheat),
            "active" => Some(Self::Active),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }

    pub fn all_statuses() -> Vec<Self> {
        vec![
            Self::Idea,
            Self::Preheat,
            Self::Active,
            Self::Succeeded,
            Self::Failed,
            Self::Cancelled,
            Self::Unknown,
        ]
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

/// Outcome of one orchestrator run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    /// Run in progress
    Running,

    // ===== Terminal States =====
    /// Worker pool drained without cancellation
    Completed,

    /// No candidates were found on any listing page
    Failed,

    /// Cancellation observed; in-flight work finished and was flushed
    Stopped,

    /// Setup or sink failure before the pipeline could run
    Error,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
            Self::Error => "error",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "stopped" => Some(Self::Stopped),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
