//! Enumeration and transport backends for `wiimux`.
//!
//! A [`Backend`] supplies the two collaborators a [`Manager`](crate::manager::Manager)
//! needs: a hotplug [`Monitor`] and a [`DeviceOpener`] for the paths it reports.
//!
//! # Feature flags
//! - **`virtual`** (default): an in-process bus of scripted controllers with real,
//!   pollable descriptors. Used by the tests and the `watch` demo.
//! - **`udev`**: a [`Monitor`] over libudev that reports `wiimote` HID devices. It
//!   only enumerates; pair it with a transport through your own [`Backend`].
//!
//! This crate does not speak the controller protocol itself.

use crate::device::DeviceOpener;
use crate::monitor::{Monitor, MonitorOptions};
use std::io;

#[cfg(feature = "virtual")]
#[cfg_attr(docsrs, doc(cfg(feature = "virtual")))]
pub mod virtual_input;

#[cfg(all(feature = "udev", target_os = "linux"))]
#[cfg_attr(docsrs, doc(cfg(all(feature = "udev", target_os = "linux"))))]
pub mod udev;

pub trait Backend {
    /// Create the enumeration mechanism. Failure here is fatal for the manager.
    fn monitor(&mut self, options: MonitorOptions) -> io::Result<Box<dyn Monitor>>;

    fn opener(&mut self) -> Box<dyn DeviceOpener>;
}
