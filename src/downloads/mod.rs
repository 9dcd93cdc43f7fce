//! Download data model and the aggregator that folds lifecycle events into toolbar state

mod aggregator;

pub use aggregator::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Platform-assigned download identifier
pub type DownloadId = u64;

/// Lifecycle state reported by the platform
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadState {
    #[default]
    InProgress,
    Complete,
    Interrupted,
}

/// Danger classification. Only `safe` and `accepted` are distinguished; every
/// other platform verdict (file, url, content, uncommon, host, unwanted, ...)
/// collapses into `Other`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DangerType {
    #[default]
    Safe,
    Accepted,
    #[serde(other)]
    Other,
}

impl DangerType {
    pub fn is_dangerous(self) -> bool {
        matches!(self, DangerType::Other)
    }
}

/// A download as the platform reports it on creation or in query results
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadItem {
    pub id: DownloadId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes_received: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_bytes: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<DownloadState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub danger: Option<DangerType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_end_time: Option<DateTime<Utc>>,
}

impl DownloadItem {
    pub fn new(id: DownloadId) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    pub fn state_or_default(&self) -> DownloadState {
        self.state.unwrap_or_default()
    }
}

/// One changed field of a change event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange<T> {
    #[serde(default)]
    pub current: Option<T>,
    #[serde(default)]
    pub previous: Option<T>,
}

impl<T> FieldChange<T> {
    pub fn to(current: T) -> Self {
        Self {
            current: Some(current),
            previous: None,
        }
    }

    pub fn between(previous: T, current: T) -> Self {
        Self {
            current: Some(current),
            previous: Some(previous),
        }
    }
}

/// A partial update for an existing download; only changed fields are present
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadDelta {
    pub id: DownloadId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes_received: Option<FieldChange<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_bytes: Option<FieldChange<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<FieldChange<DownloadState>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused: Option<FieldChange<bool>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub danger: Option<FieldChange<DangerType>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<FieldChange<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<FieldChange<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_end_time: Option<FieldChange<DateTime<Utc>>>,
}

impl DownloadDelta {
    pub fn new(id: DownloadId) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    /// The state this delta moves the download into, if it changes state at all
    pub fn new_state(&self) -> Option<DownloadState> {
        self.state.as_ref().and_then(|change| change.current)
    }

    /// True once the platform has resolved a concrete save path for a download
    /// that had none before.
    pub fn resolves_filename(&self) -> bool {
        let Some(change) = &self.filename else {
            return false;
        };
        let was_empty = change.previous.as_deref().map_or(true, str::is_empty);
        let is_set = change.current.as_deref().is_some_and(|name| !name.is_empty());
        was_empty && is_set
    }
}

/// Lifecycle events emitted by the platform's download subsystem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DownloadEvent {
    Created(DownloadItem),
    Changed(DownloadDelta),
    Erased { id: DownloadId },
}

impl DownloadEvent {
    pub fn id(&self) -> DownloadId {
        match self {
            DownloadEvent::Created(item) => item.id,
            DownloadEvent::Changed(delta) => delta.id,
            DownloadEvent::Erased { id } => *id,
        }
    }
}

/// An active download tracked by the aggregator
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadRecord {
    pub id: DownloadId,
    pub bytes_received: u64,
    /// Never zero; an unknown size is stored as 1.
    pub total_bytes: u64,
    /// Always within `[0, 1]`.
    pub progress: f64,
    pub paused: bool,
    pub state: DownloadState,
    pub danger: DangerType,
    size_known: bool,
}

impl DownloadRecord {
    /// Placeholder for an id first seen through a change event
    pub fn placeholder(id: DownloadId) -> Self {
        Self {
            id,
            bytes_received: 0,
            total_bytes: 1,
            progress: 0.0,
            paused: false,
            state: DownloadState::InProgress,
            danger: DangerType::Safe,
            size_known: false,
        }
    }

    pub fn from_item(item: &DownloadItem) -> Self {
        let mut record = Self::placeholder(item.id);
        record.merge_item(item);
        record
    }

    /// Overwrite every field the item carries, leaving the rest untouched
    pub fn merge_item(&mut self, item: &DownloadItem) {
        if let Some(received) = item.bytes_received {
            self.set_bytes_received(received);
        }
        if let Some(total) = item.total_bytes {
            self.set_total_bytes(total);
        }
        if let Some(state) = item.state {
            self.state = state;
        }
        if let Some(paused) = item.paused {
            self.paused = paused;
        }
        if let Some(danger) = item.danger {
            self.danger = danger;
        }
        self.recompute_progress();
    }

    pub fn set_bytes_received(&mut self, received: i64) {
        self.bytes_received = received.max(0) as u64;
        self.recompute_progress();
    }

    pub fn set_total_bytes(&mut self, total: i64) {
        self.size_known = total > 0;
        self.total_bytes = total.max(1) as u64;
        self.recompute_progress();
    }

    pub fn size_known(&self) -> bool {
        self.size_known
    }

    fn recompute_progress(&mut self) {
        self.progress = if self.size_known {
            (self.bytes_received as f64 / self.total_bytes as f64).clamp(0.0, 1.0)
        } else {
            0.0
        };
    }
}
