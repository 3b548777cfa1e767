//! Outcome model: result of one key and of one (timestamp, sector) group.
//!
//! The group's "any new artifact" flag is computed once, as a fold over the outcomes of
//! its keys, when the group is closed. Nothing carries it across groups.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::key::{Sector, format_capture_time};
use super::schedule::WindowGroup;

/// What happened to one key during a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FetchOutcome {
    /// The object was already in the store; nothing was fetched.
    AlreadyPresent,
    /// The remote server does not have the file yet.
    NotYetAvailable,
    /// A new object was committed.
    Stored,
}

impl FetchOutcome {
    pub fn is_new(&self) -> bool {
        matches!(self, FetchOutcome::Stored)
    }
}

/// Closed (timestamp, sector) group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupOutcome {
    pub capture_time: DateTime<Utc>,
    pub sector: Sector,
    pub outcomes: Vec<FetchOutcome>,
    any_new: bool,
}

impl GroupOutcome {
    pub fn fold(group: &WindowGroup, outcomes: Vec<FetchOutcome>) -> Self {
        let any_new = outcomes.iter().any(FetchOutcome::is_new);
        Self {
            capture_time: group.capture_time,
            sector: group.sector,
            outcomes,
            any_new,
        }
    }

    pub fn any_new(&self) -> bool {
        self.any_new
    }

    /// Notification body for this group.
    pub fn payload(&self) -> String {
        format_capture_time(self.capture_time)
    }
}
