//! Messages crossing the extension's process boundary.
//!
//! Inbound: the popup announces when it opens and closes. Outbound: content
//! pages are told when to fly the download gizmo and when to forget the last
//! click position. Every message is advisory, so delivery failures are logged
//! and dropped.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::platform::{PageMessenger, PlatformError};

/// Platform-assigned tab identifier
pub type TabId = i64;

/// Signals sent by the popup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PopupMessage {
    #[serde(rename = "popup_open")]
    Opened,
    #[serde(rename = "popup_closed")]
    Closed,
}

/// Signals sent to content pages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PageMessage {
    #[serde(rename = "show_gizmo")]
    ShowGizmo,
    #[serde(rename = "invalidate_gizmo")]
    InvalidateGizmo,
}

impl PageMessage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PageMessage::ShowGizmo => "show_gizmo",
            PageMessage::InvalidateGizmo => "invalidate_gizmo",
        }
    }
}

impl fmt::Display for PageMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("unknown popup message: {0}")]
pub struct UnknownMessage(pub String);

impl FromStr for PopupMessage {
    type Err = UnknownMessage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "popup_open" => Ok(PopupMessage::Opened),
            "popup_closed" => Ok(PopupMessage::Closed),
            other => Err(UnknownMessage(other.to_string())),
        }
    }
}

/// Only ordinary web pages run the gizmo content script
fn accepts_page_messages(url: Option<&str>) -> bool {
    url.and_then(|raw| Url::parse(raw).ok())
        .is_some_and(|url| matches!(url.scheme(), "http" | "https"))
}

/// Tell one tab that its download has a save path and the gizmo can fly
pub async fn notify_page_of_download_start<M>(messenger: &M, tab_id: TabId) -> Result<(), PlatformError>
where
    M: PageMessenger + ?Sized,
{
    messenger.send_to_tab(tab_id, PageMessage::ShowGizmo).await
}

/// Send a message to every active web tab. Returns how many accepted it.
pub async fn broadcast_to_active_pages<M>(messenger: &M, message: PageMessage) -> usize
where
    M: PageMessenger + ?Sized,
{
    let tabs = match messenger.active_tabs().await {
        Ok(tabs) => tabs,
        Err(e) => {
            tracing::debug!("Could not list tabs for {}: {}", message, e);
            return 0;
        }
    };

    let mut delivered = 0;
    for tab in tabs
        .iter()
        .filter(|tab| accepts_page_messages(tab.url.as_deref()))
    {
        let result = match message {
            PageMessage::ShowGizmo => notify_page_of_download_start(messenger, tab.id).await,
            PageMessage::InvalidateGizmo => messenger.send_to_tab(tab.id, message).await,
        };
        match result {
            Ok(()) => delivered += 1,
            Err(e) => tracing::debug!("Dropped {} for tab {}: {}", message, tab.id, e),
        }
    }
    delivered
}
