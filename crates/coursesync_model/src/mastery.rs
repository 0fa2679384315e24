//! Per-user topic progress records.

use crate::node::{ExternalId, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;

/// Progress of a learner on a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MasteryStatus {
    /// Record exists but no progress yet.
    NotStarted,
    /// Some attempts made.
    InProgress,
    /// Topic mastered.
    Mastered,
}

impl fmt::Display for MasteryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MasteryStatus::NotStarted => "not_started",
            MasteryStatus::InProgress => "in_progress",
            MasteryStatus::Mastered => "mastered",
        };
        f.write_str(name)
    }
}

impl FromStr for MasteryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_started" => Ok(MasteryStatus::NotStarted),
            "in_progress" => Ok(MasteryStatus::InProgress),
            "mastered" => Ok(MasteryStatus::Mastered),
            other => Err(format!("unknown mastery status: {other}")),
        }
    }
}

/// A learner's progress on one topic.
///
/// Keyed by the topic's external ID, so it survives renames and moves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicMastery {
    /// The learner.
    pub user_id: UserId,
    /// The topic, by stable source ID.
    pub topic_id: ExternalId,
    /// Current progress.
    pub status: MasteryStatus,
    /// Last change.
    pub updated_at: SystemTime,
}

impl TopicMastery {
    /// Creates a record stamped with the current time.
    pub fn new(
        user_id: impl Into<UserId>,
        topic_id: impl Into<ExternalId>,
        status: MasteryStatus,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            topic_id: topic_id.into(),
            status,
            updated_at: SystemTime::now(),
        }
    }
}

/// A mastery record retired because its topic was removed.
///
/// Archived records are kept for analytics only. They are never relinked,
/// even if a node with the same external ID is added again later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivedMastery {
    /// The record as it was when retired.
    pub record: TopicMastery,
    /// Storage identity of the removed node, identifying the lineage.
    pub node_surrogate: u64,
    /// When the record was retired.
    pub archived_at: SystemTime,
}

/// What happens to mastery records when their topic is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalPolicy {
    /// Move records to the archive.
    #[default]
    Archive,
    /// Delete records permanently.
    HardDelete,
}

impl FromStr for RemovalPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "archive" => Ok(RemovalPolicy::Archive),
            "delete" | "hard_delete" => Ok(RemovalPolicy::HardDelete),
            other => Err(format!("unknown removal policy: {other}")),
        }
    }
}
