//! Collaborator traits the background core talks to

use async_trait::async_trait;

use super::{IconPayload, PlatformError, SearchFilter, TabInfo};
use crate::downloads::DownloadItem;
use crate::messaging::{PageMessage, TabId};

/// Read access to the platform's authoritative download list
#[async_trait]
pub trait DownloadQuery: Send + Sync {
    /// Return every download matching the filter
    async fn search(&self, filter: &SearchFilter) -> Result<Vec<DownloadItem>, PlatformError>;
}

/// The toolbar button's icon
#[async_trait]
pub trait IconSink: Send + Sync {
    /// Replace the toolbar icon with raw pixels or a static asset
    async fn set_icon(&self, icon: IconPayload) -> Result<(), PlatformError>;
}

/// Delivery of advisory messages to content pages
#[async_trait]
pub trait PageMessenger: Send + Sync {
    /// Tabs that are active in the current normal window
    async fn active_tabs(&self) -> Result<Vec<TabInfo>, PlatformError>;

    async fn send_to_tab(&self, tab_id: TabId, message: PageMessage) -> Result<(), PlatformError>;
}

/// Everything the background loop needs from its host
pub trait Platform: DownloadQuery + IconSink + PageMessenger + 'static {}

impl<T> Platform for T where T: DownloadQuery + IconSink + PageMessenger + 'static {}
