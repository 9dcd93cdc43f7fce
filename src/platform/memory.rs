//! Headless platform kept entirely in process memory

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::{DownloadQuery, IconPayload, IconSink, PageMessenger, PlatformError, SearchFilter, TabInfo};
use crate::downloads::{DownloadId, DownloadItem};
use crate::messaging::{PageMessage, TabId};

struct MemoryState {
    downloads: Vec<DownloadItem>,
    tabs: Vec<TabInfo>,
    pixel_icons_supported: bool,
    static_icons_supported: bool,
    search_error: Option<String>,
    icons: Vec<IconPayload>,
    sent: Vec<(TabId, PageMessage)>,
    searches: usize,
}

/// A platform whose download list, tabs and capabilities are set by the caller.
///
/// Every icon submission and page message is recorded so it can be inspected
/// afterwards.
pub struct MemoryPlatform {
    state: Mutex<MemoryState>,
}

impl Default for MemoryPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPlatform {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                downloads: Vec::new(),
                tabs: Vec::new(),
                pixel_icons_supported: true,
                static_icons_supported: true,
                search_error: None,
                icons: Vec::new(),
                sent: Vec::new(),
                searches: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_downloads(&self, downloads: Vec<DownloadItem>) {
        self.lock().downloads = downloads;
    }

    /// Insert the item, or overwrite the fields it carries on an existing one
    pub fn upsert_download(&self, item: DownloadItem) {
        let mut state = self.lock();
        match state.downloads.iter_mut().find(|d| d.id == item.id) {
            Some(existing) => merge_item(existing, item),
            None => state.downloads.push(item),
        }
    }

    pub fn remove_download(&self, id: DownloadId) {
        self.lock().downloads.retain(|d| d.id != id);
    }

    pub fn downloads(&self) -> Vec<DownloadItem> {
        self.lock().downloads.clone()
    }

    pub fn set_tabs(&self, tabs: Vec<TabInfo>) {
        self.lock().tabs = tabs;
    }

    pub fn set_pixel_icons_supported(&self, supported: bool) {
        self.lock().pixel_icons_supported = supported;
    }

    pub fn set_static_icons_supported(&self, supported: bool) {
        self.lock().static_icons_supported = supported;
    }

    /// Make every subsequent search fail with the given message; `None` restores it
    pub fn fail_searches(&self, message: Option<&str>) {
        self.lock().search_error = message.map(str::to_string);
    }

    pub fn icons(&self) -> Vec<IconPayload> {
        self.lock().icons.clone()
    }

    pub fn last_icon(&self) -> Option<IconPayload> {
        self.lock().icons.last().cloned()
    }

    pub fn sent_messages(&self) -> Vec<(TabId, PageMessage)> {
        self.lock().sent.clone()
    }

    pub fn search_count(&self) -> usize {
        self.lock().searches
    }
}

fn merge_item(existing: &mut DownloadItem, update: DownloadItem) {
    if update.bytes_received.is_some() {
        existing.bytes_received = update.bytes_received;
    }
    if update.total_bytes.is_some() {
        existing.total_bytes = update.total_bytes;
    }
    if update.state.is_some() {
        existing.state = update.state;
    }
    if update.paused.is_some() {
        existing.paused = update.paused;
    }
    if update.danger.is_some() {
        existing.danger = update.danger;
    }
    if update.filename.is_some() {
        existing.filename = update.filename;
    }
    if update.url.is_some() {
        existing.url = update.url;
    }
    if update.estimated_end_time.is_some() {
        existing.estimated_end_time = update.estimated_end_time;
    }
}

#[async_trait]
impl DownloadQuery for MemoryPlatform {
    async fn search(&self, filter: &SearchFilter) -> Result<Vec<DownloadItem>, PlatformError> {
        let mut state = self.lock();
        state.searches += 1;
        if let Some(message) = &state.search_error {
            return Err(PlatformError::Query(message.clone()));
        }
        Ok(state
            .downloads
            .iter()
            .filter(|item| filter.matches(item))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl IconSink for MemoryPlatform {
    async fn set_icon(&self, icon: IconPayload) -> Result<(), PlatformError> {
        let mut state = self.lock();
        let supported = if icon.is_pixels() {
            state.pixel_icons_supported
        } else {
            state.static_icons_supported
        };
        if !supported {
            let kind = if icon.is_pixels() { "pixel icons" } else { "static icons" };
            return Err(PlatformError::Unsupported(kind.to_string()));
        }
        state.icons.push(icon);
        Ok(())
    }
}

#[async_trait]
impl PageMessenger for MemoryPlatform {
    async fn active_tabs(&self) -> Result<Vec<TabInfo>, PlatformError> {
        Ok(self.lock().tabs.clone())
    }

    async fn send_to_tab(&self, tab_id: TabId, message: PageMessage) -> Result<(), PlatformError> {
        let mut state = self.lock();
        if !state.tabs.iter().any(|tab| tab.id == tab_id) {
            return Err(PlatformError::Disconnected);
        }
        state.sent.push((tab_id, message));
        Ok(())
    }
}
