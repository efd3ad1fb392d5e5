//! Logging setup and a reaction that logs routed events.

use crate::device::DeviceId;
use crate::event::Event;
use crate::eventbus::Reaction;
use tracing_subscriber::EnvFilter;

/// Installs a `tracing` fmt subscriber filtered at `level`.
///
/// `RUST_LOG` takes precedence when set. Calling this more than once is harmless; only
/// the first subscriber is kept.
pub fn init(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Logs every routed event at `debug`.
#[derive(Debug, Default)]
pub struct Logger;

impl Logger {
    pub fn new() -> Self {
        Logger
    }
}

impl Reaction for Logger {
    fn on_event(&mut self, device: &DeviceId, event: &Event) {
        tracing::debug!(%device, "{event}");
    }
}
