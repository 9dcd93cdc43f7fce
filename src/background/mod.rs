//! Single-threaded dispatch loop that owns the aggregator.
//!
//! Platform adapters push events through a [`BackgroundHandle`]; the loop
//! handles them one at a time, so handlers never interleave. Platform calls
//! are spawned and their results come back as ordinary events.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::downloads::{Aggregator, DownloadEvent, DownloadItem, Effect, SearchTicket};
use crate::messaging::{self, PopupMessage};
use crate::platform::{Platform, PlatformError};
use crate::settings::BackgroundSettings;
use crate::timer::RefreshTimer;
use crate::toolbar::{IconState, Toolbar};

const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BackgroundError {
    #[error("background dispatcher has stopped")]
    Stopped,
    #[error("background work did not settle")]
    Unsettled,
}

/// Everything the dispatch loop reacts to
#[derive(Debug)]
pub enum BackgroundEvent {
    Download(DownloadEvent),
    Popup(PopupMessage),
    Tick,
    SearchCompleted {
        ticket: SearchTicket,
        items: Vec<DownloadItem>,
    },
    SearchFailed {
        ticket: SearchTicket,
        error: PlatformError,
    },
    Inspect(oneshot::Sender<BackgroundSnapshot>),
    Shutdown,
}

/// Point-in-time view of the background state
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackgroundSnapshot {
    pub active_count: usize,
    pub mean_progress: f64,
    pub unseen: usize,
    pub icon: IconState,
    pub timer_running: bool,
    pub popup_open: bool,
    pub pending_queries: usize,
    pub pending_icons: usize,
}

/// Platform work the loop has started but not yet seen finish
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Pending {
    queries: usize,
    icons: usize,
}

impl Pending {
    fn is_idle(&self) -> bool {
        self.queries == 0 && self.icons == 0
    }
}

/// Cloneable sender side of the dispatch loop
#[derive(Clone)]
pub struct BackgroundHandle {
    tx: mpsc::UnboundedSender<BackgroundEvent>,
    pending: watch::Receiver<Pending>,
}

impl BackgroundHandle {
    pub fn dispatch(&self, event: BackgroundEvent) -> Result<(), BackgroundError> {
        self.tx.send(event).map_err(|_| BackgroundError::Stopped)
    }

    /// Subscription point for the platform's download event source
    pub fn on_download_event(&self, event: DownloadEvent) -> Result<(), BackgroundError> {
        self.dispatch(BackgroundEvent::Download(event))
    }

    pub fn on_popup_message(&self, message: PopupMessage) -> Result<(), BackgroundError> {
        self.dispatch(BackgroundEvent::Popup(message))
    }

    pub async fn snapshot(&self) -> Result<BackgroundSnapshot, BackgroundError> {
        let (reply, rx) = oneshot::channel();
        self.dispatch(BackgroundEvent::Inspect(reply))?;
        rx.await.map_err(|_| BackgroundError::Stopped)
    }

    /// Wait until no platform queries or icon submissions are outstanding
    pub async fn settle(&self) -> Result<BackgroundSnapshot, BackgroundError> {
        let mut pending = self.pending.clone();
        let wait = async {
            loop {
                pending
                    .wait_for(Pending::is_idle)
                    .await
                    .map_err(|_| BackgroundError::Stopped)?;
                // Events queued before this call may still start new work.
                let snapshot = self.snapshot().await?;
                if snapshot.pending_queries == 0 && snapshot.pending_icons == 0 {
                    return Ok(snapshot);
                }
            }
        };
        tokio::time::timeout(SETTLE_TIMEOUT, wait)
            .await
            .map_err(|_| BackgroundError::Unsettled)?
    }

    pub fn shutdown(&self) -> Result<(), BackgroundError> {
        self.dispatch(BackgroundEvent::Shutdown)
    }
}

/// The background process: aggregator, timer and platform wiring
pub struct Background<P: Platform> {
    aggregator: Aggregator,
    platform: Arc<P>,
    timer: RefreshTimer,
    icon_tx: mpsc::UnboundedSender<IconState>,
    pending: Arc<watch::Sender<Pending>>,
    tx: mpsc::UnboundedSender<BackgroundEvent>,
    rx: mpsc::UnboundedReceiver<BackgroundEvent>,
}

impl<P: Platform> Background<P> {
    /// Build the loop and its icon worker. Must be called inside a tokio runtime.
    pub fn new(platform: Arc<P>, settings: &BackgroundSettings) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (icon_tx, icon_rx) = mpsc::unbounded_channel();
        let (pending, _) = watch::channel(Pending::default());
        let pending = Arc::new(pending);

        let toolbar = Toolbar::new(
            platform.clone(),
            settings.icon_scale(),
            settings.static_icons.clone(),
        );
        tokio::spawn(run_icon_worker(toolbar, icon_rx, pending.clone()));

        Self {
            aggregator: Aggregator::new(),
            platform,
            timer: RefreshTimer::new(settings.refresh_interval()),
            icon_tx,
            pending,
            tx,
            rx,
        }
    }

    pub fn handle(&self) -> BackgroundHandle {
        BackgroundHandle {
            tx: self.tx.clone(),
            pending: self.pending.subscribe(),
        }
    }

    /// Run until shut down. Starts with a full resync against the platform.
    pub async fn run(mut self) {
        tracing::info!("Download background started");
        let effects = self.aggregator.refresh();
        self.apply(effects);

        while let Some(event) = self.rx.recv().await {
            let effects = match event {
                BackgroundEvent::Download(event) => self.aggregator.handle(event),
                BackgroundEvent::Popup(PopupMessage::Opened) => self.aggregator.popup_opened(),
                BackgroundEvent::Popup(PopupMessage::Closed) => self.aggregator.popup_closed(),
                BackgroundEvent::Tick => self.aggregator.reconcile(),
                BackgroundEvent::SearchCompleted { ticket, items } => {
                    self.pending
                        .send_modify(|pending| pending.queries = pending.queries.saturating_sub(1));
                    self.aggregator.on_search_results(ticket, &items)
                }
                BackgroundEvent::SearchFailed { ticket, error } => {
                    self.pending
                        .send_modify(|pending| pending.queries = pending.queries.saturating_sub(1));
                    tracing::warn!("Download search {:?} failed: {}", ticket.request, error);
                    self.aggregator.on_search_failed(ticket);
                    Vec::new()
                }
                BackgroundEvent::Inspect(reply) => {
                    let _ = reply.send(self.snapshot());
                    Vec::new()
                }
                BackgroundEvent::Shutdown => break,
            };
            self.apply(effects);
        }

        self.timer.stop();
        tracing::info!("Download background stopped");
    }

    fn snapshot(&self) -> BackgroundSnapshot {
        let aggregate = self.aggregator.aggregate();
        let pending = *self.pending.borrow();
        BackgroundSnapshot {
            active_count: aggregate.active_count,
            mean_progress: aggregate.mean_progress,
            unseen: self.aggregator.unseen().len(),
            icon: aggregate.icon_state(),
            timer_running: self.timer.is_running(),
            popup_open: self.aggregator.is_popup_open(),
            pending_queries: pending.queries,
            pending_icons: pending.icons,
        }
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Draw(state) => {
                    self.pending.send_modify(|pending| pending.icons += 1);
                    if self.icon_tx.send(state).is_err() {
                        self.pending
                            .send_modify(|pending| pending.icons = pending.icons.saturating_sub(1));
                        tracing::warn!("Icon worker is gone, dropping {} icon", state.label());
                    }
                }
                Effect::StartTimer => {
                    let tx = self.tx.clone();
                    self.timer
                        .start(move || tx.send(BackgroundEvent::Tick).is_ok());
                }
                Effect::StopTimer => self.timer.stop(),
                Effect::Search(ticket) => self.spawn_search(ticket),
                Effect::NotifyPages(message) => {
                    let platform = self.platform.clone();
                    tokio::spawn(async move {
                        let delivered =
                            messaging::broadcast_to_active_pages(platform.as_ref(), message).await;
                        tracing::debug!("Sent {} to {} page(s)", message, delivered);
                    });
                }
            }
        }
    }

    fn spawn_search(&mut self, ticket: SearchTicket) {
        self.pending.send_modify(|pending| pending.queries += 1);
        let platform = self.platform.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let event = match platform.search(&ticket.request.filter()).await {
                Ok(items) => BackgroundEvent::SearchCompleted { ticket, items },
                Err(error) => BackgroundEvent::SearchFailed { ticket, error },
            };
            // A closed channel means the loop has shut down; nothing to merge into.
            let _ = tx.send(event);
        });
    }
}

async fn run_icon_worker<P: Platform>(
    toolbar: Toolbar<P>,
    mut rx: mpsc::UnboundedReceiver<IconState>,
    pending: Arc<watch::Sender<Pending>>,
) {
    while let Some(state) = rx.recv().await {
        let outcome = toolbar.show(state).await;
        tracing::debug!("Toolbar icon {} -> {:?}", state.label(), outcome);
        pending.send_modify(|pending| pending.icons = pending.icons.saturating_sub(1));
    }
}

/// Spawn the background loop on the current runtime
pub fn spawn<P: Platform>(
    platform: Arc<P>,
    settings: &BackgroundSettings,
) -> (BackgroundHandle, JoinHandle<()>) {
    let background = Background::new(platform, settings);
    let handle = background.handle();
    (handle, tokio::spawn(background.run()))
}
