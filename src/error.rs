//! Crate error type.
//!
//! Per-device failures ([`Error::Open`], [`Error::Dispatch`], ...) are contained by the
//! [`Manager`](crate::manager::Manager) and surfaced to observers as warnings. Only
//! [`Error::MonitorCreate`] is fatal to a running system.

use crate::capability::Capability;
use crate::event::EventKind;
use std::io;
use std::path::PathBuf;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The hotplug enumeration mechanism could not be created.
    #[error("cannot create device monitor: {0}")]
    MonitorCreate(#[source] io::Error),

    /// A discovered device path could not be turned into a device handle.
    #[error("cannot open device {path}: {source}")]
    DeviceOpen {
        path: String,
        #[source]
        source: io::Error,
    },

    /// The transport refused to activate capabilities that looked available.
    #[error("device {path}: opening {requested} failed: {source}")]
    Open {
        path: String,
        requested: Capability,
        #[source]
        source: io::Error,
    },

    /// Requested capabilities are not in the device's available mask.
    #[error("device {path}: {requested} not available (available: {available})")]
    CapabilityUnavailable {
        path: String,
        requested: Capability,
        available: Capability,
    },

    /// Irrecoverable transport failure while reading an event.
    #[error("device {path}: dispatch failed: {source}")]
    Dispatch {
        path: String,
        #[source]
        source: io::Error,
    },

    /// An event accessor was used against an event of a different kind.
    #[error("event is {actual:?}, not {expected}")]
    WrongEventKind {
        expected: &'static str,
        actual: EventKind,
    },

    /// An axis slot index past the end of the payload.
    #[error("no axis slot {index}")]
    NoSuchSlot { index: usize },

    #[error("unknown capability kind {0:?}")]
    UnknownCapability(String),

    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    #[error("cannot read configuration {}: {source}", path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl Error {
    /// `true` for errors that are a caller bug rather than a device condition.
    pub fn is_usage_error(&self) -> bool {
        matches!(self, Error::WrongEventKind { .. } | Error::NoSuchSlot { .. })
    }
}
