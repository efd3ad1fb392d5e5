//! Device transport seam and the handle the manager keeps per controller.
//!
//! [`Device`] is the contract a transport implements for one physical controller:
//! capability masks, open/close, a pollable descriptor and one-event-at-a-time
//! dispatch. [`DeviceHandle`] wraps a boxed transport with its identity and enforces
//! the rules the rest of the crate relies on:
//! - `open` never asks the transport for bits the hardware does not report;
//! - a failed `open` leaves the opened mask as the transport reports it;
//! - "would block" is not an error.

use crate::capability::{Capability, CapabilityState};
use crate::error::{Error, Result};
use crate::event::Event;
use crate::metadata::DeviceMeta;
use std::fmt;
use std::io;
use std::os::fd::RawFd;

/// Transport contract for one controller.
///
/// All methods must return promptly; the only blocking point in the system is the
/// manager's readiness wait.
pub trait Device {
    /// Discovery identifier (stable across the device's lifetime).
    fn path(&self) -> &str;

    /// Capabilities the hardware currently exposes. Authoritative query.
    fn available(&self) -> io::Result<Capability>;

    /// Capabilities this process currently has open. Authoritative query.
    fn opened(&self) -> Capability;

    /// Activate `mask`. May fail if the hardware changed since it was last queried.
    fn open(&mut self, mask: Capability) -> io::Result<()>;

    fn close(&mut self, mask: Capability);

    /// Read one decoded event. `Ok(None)` or a `WouldBlock` error means nothing is
    /// pending.
    fn dispatch(&mut self) -> io::Result<Option<Event>>;

    /// Descriptor that becomes readable when `dispatch` has work.
    fn as_raw_fd(&self) -> RawFd;

    fn metadata(&self) -> DeviceMeta {
        DeviceMeta::new(self.path())
    }
}

/// Turns a discovery identifier into a live transport.
pub trait DeviceOpener {
    fn open(&mut self, path: &str) -> io::Result<Box<dyn Device>>;
}

impl<F> DeviceOpener for F
where
    F: FnMut(&str) -> io::Result<Box<dyn Device>>,
{
    fn open(&mut self, path: &str) -> io::Result<Box<dyn Device>> {
        self(path)
    }
}

/// Device identity: the discovery path.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

/// One known controller.
pub struct DeviceHandle {
    id: DeviceId,
    raw: Box<dyn Device>,
    writable: bool,
}

impl DeviceHandle {
    pub fn new(raw: Box<dyn Device>) -> Self {
        Self {
            id: DeviceId::new(raw.path()),
            raw,
            writable: false,
        }
    }

    /// Open a device through `opener`.
    pub fn open_path(opener: &mut dyn DeviceOpener, path: &str) -> Result<Self> {
        let raw = opener.open(path).map_err(|source| Error::DeviceOpen {
            path: path.to_string(),
            source,
        })?;
        Ok(Self::new(raw))
    }

    /// Request write access on every subsequent `open`.
    pub fn with_writable(mut self, writable: bool) -> Self {
        self.writable = writable;
        self
    }

    pub fn id(&self) -> &DeviceId {
        &self.id
    }

    pub fn metadata(&self) -> DeviceMeta {
        self.raw.metadata()
    }

    pub fn as_raw_fd(&self) -> RawFd {
        self.raw.as_raw_fd()
    }

    pub fn available(&self) -> Result<Capability> {
        Ok(self.raw.available()?)
    }

    pub fn opened(&self) -> Capability {
        self.raw.opened()
    }

    /// Fresh reading of both masks.
    pub fn refresh(&self) -> Result<CapabilityState> {
        Ok(CapabilityState::new(self.available()?, self.opened()))
    }

    /// Activate `mask` (kinds only; write access is added per handle setting).
    pub fn open(&mut self, mask: Capability) -> Result<()> {
        let requested = mask - Capability::WRITABLE;
        let available = self.available()?;
        if !available.contains(requested) {
            return Err(Error::CapabilityUnavailable {
                path: self.id.to_string(),
                requested,
                available,
            });
        }

        let request = if self.writable {
            requested | Capability::WRITABLE
        } else {
            requested
        };
        self.raw.open(request).map_err(|source| Error::Open {
            path: self.id.to_string(),
            requested,
            source,
        })
    }

    pub fn close(&mut self, mask: Capability) {
        self.raw.close(mask);
    }

    /// Read one event; `Ok(None)` when nothing is pending.
    pub fn dispatch(&mut self) -> Result<Option<Event>> {
        match self.raw.dispatch() {
            Ok(event) => Ok(event),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => {
                Ok(None)
            }
            Err(source) => Err(Error::Dispatch {
                path: self.id.to_string(),
                source,
            }),
        }
    }
}

impl fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("id", &self.id)
            .field("opened", &self.raw.opened())
            .finish_non_exhaustive()
    }
}
