//! Host platform boundary: downloads, toolbar icon and page messaging

mod memory;
mod traits;

pub use memory::MemoryPlatform;
pub use traits::*;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::downloads::{DownloadItem, DownloadState};
use crate::messaging::TabId;
use crate::toolbar::PixelBuffer;

/// Errors surfaced by platform calls. None of these are fatal to the core.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    #[error("platform API unsupported: {0}")]
    Unsupported(String),
    #[error("platform rejected the request: {0}")]
    Rejected(String),
    #[error("message receiver is gone")]
    Disconnected,
    #[error("download query failed: {0}")]
    Query(String),
}

/// Download search filter; unset fields match everything
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<DownloadState>,
}

impl SearchFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_state(state: DownloadState) -> Self {
        Self { state: Some(state) }
    }

    pub fn matches(&self, item: &DownloadItem) -> bool {
        self.state
            .map_or(true, |state| item.state_or_default() == state)
    }
}

/// Static icon asset reference: one path, or one path per pixel size
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged, try_from = "RawIconPath")]
pub enum IconPath {
    Single(String),
    Sized(BTreeMap<u32, String>),
}

/// Wire form of [`IconPath`]. Untagged maps only ever carry string keys.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawIconPath {
    Single(String),
    Sized(BTreeMap<String, String>),
}

impl TryFrom<RawIconPath> for IconPath {
    type Error = String;

    fn try_from(raw: RawIconPath) -> Result<Self, Self::Error> {
        match raw {
            RawIconPath::Single(path) => Ok(IconPath::Single(path)),
            RawIconPath::Sized(paths) => paths
                .into_iter()
                .map(|(size, path)| {
                    size.trim()
                        .parse::<u32>()
                        .map(|size| (size, path))
                        .map_err(|_| format!("invalid icon size: {size}"))
                })
                .collect::<Result<BTreeMap<_, _>, _>>()
                .map(IconPath::Sized),
        }
    }
}

/// What gets handed to the toolbar
#[derive(Debug, Clone, PartialEq)]
pub enum IconPayload {
    /// Raw RGBA pixels keyed by their edge length
    Pixels { size: u32, buffer: PixelBuffer },
    /// Pre-baked asset fallback
    Static(IconPath),
}

impl IconPayload {
    pub fn is_pixels(&self) -> bool {
        matches!(self, IconPayload::Pixels { .. })
    }
}

/// A browser tab that may receive page messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabInfo {
    pub id: TabId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}
