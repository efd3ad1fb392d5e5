//! libudev hotplug monitor for `wiimote` HID devices.
//!
//! Reports sysfs paths. Existing devices are collected at construction time; new
//! ones arrive through a netlink monitor socket when hotplug watching is enabled.

use crate::monitor::{Monitor, MonitorOptions};
use std::collections::VecDeque;
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use tracing::debug;

const SUBSYSTEM: &str = "hid";
const DRIVER: &str = "wiimote";

fn is_wiimote(device: &udev::Device) -> bool {
    device.driver().is_some_and(|d| d == DRIVER)
}

fn syspath(device: &udev::Device) -> String {
    device.syspath().to_string_lossy().into_owned()
}

pub struct UdevMonitor {
    pending: VecDeque<String>,
    socket: Option<udev::MonitorSocket>,
    // Never readable. Stands in for the socket when hotplug watching is off.
    idle: (UnixStream, UnixStream),
}

impl UdevMonitor {
    pub fn new(options: MonitorOptions) -> io::Result<Self> {
        let socket = if options.watch_hotplug {
            Some(
                udev::MonitorBuilder::new()
                    .and_then(|builder| builder.match_subsystem(SUBSYSTEM))
                    .and_then(|builder| builder.listen())?,
            )
        } else {
            None
        };

        let mut pending = VecDeque::new();
        if options.enumerate_existing {
            let mut enumerator = udev::Enumerator::new()?;
            enumerator.match_subsystem(SUBSYSTEM)?;
            for device in enumerator.scan_devices()? {
                if is_wiimote(&device) {
                    pending.push_back(syspath(&device));
                }
            }
        }
        debug!(existing = pending.len(), "udev monitor ready");

        Ok(Self {
            pending,
            socket,
            idle: UnixStream::pair()?,
        })
    }
}

impl Monitor for UdevMonitor {
    fn poll(&mut self) -> io::Result<Option<String>> {
        if let Some(path) = self.pending.pop_front() {
            return Ok(Some(path));
        }
        let Some(socket) = &self.socket else {
            return Ok(None);
        };
        for event in socket.iter() {
            if !matches!(event.event_type(), udev::EventType::Add) {
                continue;
            }
            let device = event.device();
            if is_wiimote(&device) {
                return Ok(Some(syspath(&device)));
            }
        }
        Ok(None)
    }

    fn as_raw_fd(&self) -> RawFd {
        match &self.socket {
            Some(socket) => socket.as_raw_fd(),
            None => self.idle.0.as_raw_fd(),
        }
    }
}
