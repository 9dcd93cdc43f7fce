//! dlbar - Download status toolbar
//!
//! Background core of a download-manager browser extension: folds the
//! platform's download lifecycle events into one toolbar icon (idle, in
//! progress with a bar, finished), keeps a refresh timer alive while
//! anything downloads, and relays popup and page-gizmo signals.

pub mod background;
pub mod downloads;
pub mod messaging;
pub mod platform;
pub mod settings;
pub mod timer;
pub mod toolbar;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging
pub fn init_logging() {
    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = "dlbar_lib=debug".parse() {
        filter = filter.add_directive(directive);
    }
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}
