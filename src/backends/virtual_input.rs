//! In-process virtual controllers.
//!
//! [`VirtualBus`] plays the part of the kernel: controllers are plugged into it,
//! extensions come and go, events are injected, and monitors created from it report
//! new paths. Every monitor and every controller owns a Unix socket pair that
//! signals the level of its queue: a byte is written when the queue becomes
//! non-empty and the socket is drained when it empties again, both under the queue's
//! lock. The descriptors are readable exactly while something is pending and can be
//! waited on with the real readiness set.
//!
//! ```no_run
//! use wiimux::backends::virtual_input::VirtualBus;
//! use wiimux::{Capability, Config, Manager};
//!
//! let mut bus = VirtualBus::new();
//! let remote = bus.plug("/sys/devices/virtual/wiimote0", Capability::CORE).unwrap();
//! let mut mgr = Manager::new(&mut bus, Config::default()).unwrap();
//! mgr.discover();
//! remote.set_available(Capability::CORE | Capability::CLASSIC_CONTROLLER);
//! ```

use crate::backends::Backend;
use crate::capability::Capability;
use crate::device::{Device, DeviceOpener};
use crate::event::{Event, KeyCode, KeyPayload, KeyState, Payload};
use crate::metadata::DeviceMeta;
use crate::monitor::{Monitor, MonitorOptions};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::{Arc, Weak};
use tracing::trace;

/// Readable end and writable end of one notification channel.
struct Channel {
    reader: UnixStream,
    writer: UnixStream,
}

impl Channel {
    fn new() -> io::Result<Self> {
        let (reader, writer) = UnixStream::pair()?;
        reader.set_nonblocking(true)?;
        writer.set_nonblocking(true)?;
        Ok(Self { reader, writer })
    }
}

/// The queue went from empty to non-empty.
fn raise(mut writer: &UnixStream) {
    if let Err(e) = writer.write(&[1]) {
        trace!("virtual notify failed: {e}");
    }
}

/// The queue is empty again.
fn lower(mut reader: &UnixStream) {
    let mut buf = [0u8; 64];
    while matches!(reader.read(&mut buf), Ok(n) if n > 0) {}
}

enum Queued {
    Event(Event),
    Fail(io::ErrorKind),
}

struct ControllerState {
    available: Capability,
    opened: Capability,
    refuse: Capability,
    plugged: bool,
    queue: VecDeque<Queued>,
    channel: Channel,
    meta: DeviceMeta,
}

impl ControllerState {
    fn enqueue(&mut self, item: Queued) {
        self.queue.push_back(item);
        if self.queue.len() == 1 {
            raise(&self.channel.writer);
        }
    }
}

struct MonitorFeed {
    queue: Weak<Mutex<VecDeque<String>>>,
    writer: UnixStream,
}

#[derive(Default)]
struct BusState {
    controllers: BTreeMap<String, Arc<Mutex<ControllerState>>>,
    feeds: Vec<MonitorFeed>,
}

/// The virtual "hardware". Cheap to clone; clones share state and may be driven
/// from another thread.
#[derive(Clone, Default)]
pub struct VirtualBus {
    state: Arc<Mutex<BusState>>,
}

impl VirtualBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect a controller exposing `available`, and tell hotplug monitors about it.
    pub fn plug(&self, path: &str, available: Capability) -> io::Result<VirtualController> {
        let controller = Arc::new(Mutex::new(ControllerState {
            available,
            opened: Capability::empty(),
            refuse: Capability::empty(),
            plugged: true,
            queue: VecDeque::new(),
            channel: Channel::new()?,
            meta: DeviceMeta {
                path: path.to_string(),
                devtype: Some("gen10".to_string()),
                extension: Some(extension_name(available).to_string()),
                battery: Some(100),
            },
        }));

        let mut bus = self.state.lock();
        bus.controllers
            .insert(path.to_string(), Arc::clone(&controller));
        bus.feeds.retain(|feed| match feed.queue.upgrade() {
            Some(queue) => {
                let mut queue = queue.lock();
                queue.push_back(path.to_string());
                if queue.len() == 1 {
                    raise(&feed.writer);
                }
                true
            }
            None => false,
        });
        trace!(%path, "virtual controller plugged");

        Ok(VirtualController {
            path: path.to_string(),
            state: controller,
            bus: self.clone(),
        })
    }

    /// Disconnect `path`: queries start failing and a gone event is queued.
    pub fn unplug(&self, path: &str) -> bool {
        let removed = self.state.lock().controllers.remove(path);
        match removed {
            Some(controller) => {
                let mut c = controller.lock();
                c.plugged = false;
                c.available = Capability::empty();
                c.opened = Capability::empty();
                c.enqueue(Queued::Event(Event::gone()));
                true
            }
            None => false,
        }
    }

    /// Paths currently plugged in.
    pub fn paths(&self) -> Vec<String> {
        self.state.lock().controllers.keys().cloned().collect()
    }

    pub fn create_monitor(&self, options: MonitorOptions) -> io::Result<VirtualMonitor> {
        let channel = Channel::new()?;
        let queue = Arc::new(Mutex::new(VecDeque::new()));

        let mut bus = self.state.lock();
        if options.enumerate_existing {
            let mut q = queue.lock();
            q.extend(bus.controllers.keys().cloned());
            if !q.is_empty() {
                raise(&channel.writer);
            }
        }
        if options.watch_hotplug {
            bus.feeds.push(MonitorFeed {
                queue: Arc::downgrade(&queue),
                writer: channel.writer.try_clone()?,
            });
        }

        Ok(VirtualMonitor {
            queue,
            reader: channel.reader,
            _writer: channel.writer,
        })
    }

    pub fn open_device(&self, path: &str) -> io::Result<VirtualDevice> {
        let controller = self
            .state
            .lock()
            .controllers
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no device {path}")))?;
        let reader = controller.lock().channel.reader.try_clone()?;
        Ok(VirtualDevice {
            path: path.to_string(),
            state: controller,
            reader,
        })
    }
}

impl Backend for VirtualBus {
    fn monitor(&mut self, options: MonitorOptions) -> io::Result<Box<dyn Monitor>> {
        Ok(Box::new(self.create_monitor(options)?))
    }

    fn opener(&mut self) -> Box<dyn DeviceOpener> {
        Box::new(self.clone())
    }
}

impl DeviceOpener for VirtualBus {
    fn open(&mut self, path: &str) -> io::Result<Box<dyn Device>> {
        Ok(Box::new(self.open_device(path)?))
    }
}

fn extension_name(available: Capability) -> &'static str {
    [
        (Capability::CLASSIC_CONTROLLER, "classic"),
        (Capability::NUNCHUK, "nunchuk"),
        (Capability::DRUMS, "drums"),
        (Capability::GUITAR, "guitar"),
        (Capability::MOTION_PLUS, "motionp"),
    ]
    .into_iter()
    .find(|(kind, _)| available.contains(*kind))
    .map(|(_, name)| name)
    .unwrap_or("none")
}

/// Hardware-side control of one plugged controller.
#[derive(Clone)]
pub struct VirtualController {
    path: String,
    state: Arc<Mutex<ControllerState>>,
    bus: VirtualBus,
}

impl VirtualController {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn available(&self) -> Capability {
        self.state.lock().available
    }

    pub fn opened(&self) -> Capability {
        self.state.lock().opened
    }

    /// Items queued and not yet dispatched.
    pub fn pending(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Change what the hardware exposes and queue a watch event.
    ///
    /// Interfaces that disappear are closed, as the kernel driver does.
    pub fn set_available(&self, available: Capability) {
        let mut c = self.state.lock();
        c.available = available;
        c.opened &= available | Capability::WRITABLE;
        if c.opened == Capability::WRITABLE {
            c.opened = Capability::empty();
        }
        c.meta.extension = Some(extension_name(available).to_string());
        c.enqueue(Queued::Event(Event::watch()));
    }

    /// Make `open` fail for `mask` (an extension pulled out mid-open).
    pub fn refuse_open(&self, mask: Capability) {
        self.state.lock().refuse = mask;
    }

    pub fn push(&self, event: Event) {
        self.state.lock().enqueue(Queued::Event(event));
    }

    /// Queue a press and a release of `code` on the core remote.
    pub fn tap(&self, code: KeyCode) {
        self.key(Payload::Key, code);
    }

    /// Queue a press and a release using `wrap` to pick the key event kind, e.g.
    /// `Payload::ClassicControllerKey`.
    pub fn key(&self, wrap: fn(KeyPayload) -> Payload, code: KeyCode) {
        let mut c = self.state.lock();
        for state in [KeyState::Pressed, KeyState::Released] {
            c.enqueue(Queued::Event(Event::new(wrap(KeyPayload::new(code, state)))));
        }
    }

    /// Make the next dispatch fail with `kind`.
    pub fn fail_next(&self, kind: io::ErrorKind) {
        self.state.lock().enqueue(Queued::Fail(kind));
    }

    pub fn unplug(&self) -> bool {
        self.bus.unplug(&self.path)
    }
}

/// Monitor over a [`VirtualBus`].
pub struct VirtualMonitor {
    queue: Arc<Mutex<VecDeque<String>>>,
    reader: UnixStream,
    _writer: UnixStream,
}

impl Monitor for VirtualMonitor {
    fn poll(&mut self) -> io::Result<Option<String>> {
        let mut queue = self.queue.lock();
        let next = queue.pop_front();
        if queue.is_empty() {
            lower(&self.reader);
        }
        Ok(next)
    }

    fn as_raw_fd(&self) -> RawFd {
        self.reader.as_raw_fd()
    }
}

/// Process-side view of a virtual controller.
pub struct VirtualDevice {
    path: String,
    state: Arc<Mutex<ControllerState>>,
    reader: UnixStream,
}

impl Device for VirtualDevice {
    fn path(&self) -> &str {
        &self.path
    }

    fn available(&self) -> io::Result<Capability> {
        let c = self.state.lock();
        if !c.plugged {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "device unplugged"));
        }
        Ok(c.available)
    }

    fn opened(&self) -> Capability {
        self.state.lock().opened
    }

    fn open(&mut self, mask: Capability) -> io::Result<()> {
        let mut c = self.state.lock();
        let kinds = mask - Capability::WRITABLE;
        if !c.plugged {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "device unplugged"));
        }
        if c.refuse.intersects(kinds) || !c.available.contains(kinds) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("interface {kinds} not present"),
            ));
        }
        c.opened |= mask;
        Ok(())
    }

    fn close(&mut self, mask: Capability) {
        let mut c = self.state.lock();
        c.opened -= mask;
        if c.opened == Capability::WRITABLE {
            c.opened = Capability::empty();
        }
    }

    fn dispatch(&mut self) -> io::Result<Option<Event>> {
        let mut c = self.state.lock();
        let next = c.queue.pop_front();
        if c.queue.is_empty() {
            lower(&self.reader);
        }
        match next {
            Some(Queued::Event(event)) => Ok(Some(event)),
            Some(Queued::Fail(kind)) => Err(io::Error::new(kind, "virtual transport failure")),
            None => Err(io::ErrorKind::WouldBlock.into()),
        }
    }

    fn as_raw_fd(&self) -> RawFd {
        self.reader.as_raw_fd()
    }

    fn metadata(&self) -> DeviceMeta {
        self.state.lock().meta.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Abs;
    use crate::readiness::{PollReadiness, Readiness, Token};
    use std::time::Duration;

    fn readable(fd: RawFd) -> bool {
        let mut readiness = PollReadiness::new().unwrap();
        readiness.register(fd, Token(1)).unwrap();
        let mut ready = Vec::new();
        readiness.wait(&mut ready, Some(Duration::ZERO)).unwrap();
        readiness.unregister(Token(1)).unwrap();
        !ready.is_empty()
    }

    #[test]
    fn flooded_controller_stays_readable_until_empty() {
        let bus = VirtualBus::new();
        let ctl = bus.plug("/a", Capability::CORE).unwrap();
        let mut dev = bus.open_device("/a").unwrap();
        assert!(!readable(dev.as_raw_fd()));

        for _ in 0..5000 {
            ctl.push(Event::new(Payload::Accel(Abs::new(1, 2, 3))));
        }
        for i in 0..5000 {
            if i % 100 == 0 {
                assert!(readable(dev.as_raw_fd()), "not readable with {} pending", 5000 - i);
            }
            assert!(dev.dispatch().unwrap().is_some());
        }

        assert_eq!(ctl.pending(), 0);
        assert!(!readable(dev.as_raw_fd()));
        assert_eq!(
            dev.dispatch().unwrap_err().kind(),
            io::ErrorKind::WouldBlock
        );
    }

    #[test]
    fn monitor_readable_while_paths_queued() {
        let bus = VirtualBus::new();
        let mut monitor = bus
            .create_monitor(MonitorOptions {
                enumerate_existing: false,
                watch_hotplug: true,
            })
            .unwrap();
        assert!(!readable(monitor.as_raw_fd()));

        for i in 0..200 {
            bus.plug(&format!("/w{i}"), Capability::CORE).unwrap();
        }
        for _ in 0..200 {
            assert!(readable(monitor.as_raw_fd()));
            assert!(monitor.poll().unwrap().is_some());
        }
        assert!(!readable(monitor.as_raw_fd()));
        assert_eq!(monitor.poll().unwrap(), None);
    }

    #[test]
    fn monitor_enumerates_then_watches() {
        let bus = VirtualBus::new();
        bus.plug("/a", Capability::CORE).unwrap();

        let mut existing_only = bus
            .create_monitor(MonitorOptions {
                enumerate_existing: true,
                watch_hotplug: false,
            })
            .unwrap();
        let mut hotplug_only = bus
            .create_monitor(MonitorOptions {
                enumerate_existing: false,
                watch_hotplug: true,
            })
            .unwrap();

        bus.plug("/b", Capability::CORE).unwrap();

        assert_eq!(existing_only.poll().unwrap().as_deref(), Some("/a"));
        assert_eq!(existing_only.poll().unwrap(), None);
        assert_eq!(hotplug_only.poll().unwrap().as_deref(), Some("/b"));
        assert_eq!(hotplug_only.poll().unwrap(), None);
    }

    #[test]
    fn dropped_monitor_stops_receiving() {
        let bus = VirtualBus::new();
        let monitor = bus.create_monitor(MonitorOptions::default()).unwrap();
        drop(monitor);
        bus.plug("/a", Capability::CORE).unwrap();
        assert!(bus.state.lock().feeds.is_empty());
    }

    #[test]
    fn extension_removal_closes_interface() {
        let bus = VirtualBus::new();
        let ctl = bus
            .plug("/a", Capability::CORE | Capability::GUITAR)
            .unwrap();
        let mut dev = bus.open_device("/a").unwrap();

        dev.open(Capability::GUITAR | Capability::WRITABLE).unwrap();
        assert_eq!(dev.opened(), Capability::GUITAR | Capability::WRITABLE);

        ctl.set_available(Capability::CORE);
        assert_eq!(dev.opened(), Capability::empty());
        assert_eq!(dev.dispatch().unwrap(), Some(Event::watch()));
        assert_eq!(
            dev.dispatch().unwrap_err().kind(),
            io::ErrorKind::WouldBlock
        );
        assert_eq!(dev.metadata().extension.as_deref(), Some("none"));
    }

    #[test]
    fn open_checks_hardware() {
        let bus = VirtualBus::new();
        let ctl = bus.plug("/a", Capability::DRUMS).unwrap();
        let mut dev = bus.open_device("/a").unwrap();
        assert!(dev.open(Capability::GUITAR).is_err());
        ctl.refuse_open(Capability::DRUMS);
        assert!(dev.open(Capability::DRUMS).is_err());
        assert_eq!(dev.opened(), Capability::empty());
    }

    #[test]
    fn unplug_queues_gone() {
        let bus = VirtualBus::new();
        let ctl = bus.plug("/a", Capability::CORE).unwrap();
        let mut dev = bus.open_device("/a").unwrap();
        assert!(ctl.unplug());
        assert!(!ctl.unplug());
        assert_eq!(dev.dispatch().unwrap(), Some(Event::gone()));
        assert!(dev.available().is_err());
        assert!(bus.open_device("/a").is_err());
    }

    #[test]
    fn scripted_failure() {
        let bus = VirtualBus::new();
        let ctl = bus.plug("/a", Capability::CORE).unwrap();
        let mut dev = bus.open_device("/a").unwrap();
        ctl.tap(KeyCode::A);
        ctl.fail_next(io::ErrorKind::BrokenPipe);
        assert!(dev.dispatch().unwrap().is_some());
        assert!(dev.dispatch().unwrap().is_some());
        assert_eq!(
            dev.dispatch().unwrap_err().kind(),
            io::ErrorKind::BrokenPipe
        );
        assert_eq!(ctl.pending(), 0);
    }
}
