#![cfg(feature = "virtual")]

use std::cell::RefCell;
use std::io;
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

use wiimux::backends::virtual_input::{VirtualBus, VirtualController};
use wiimux::{
    CancelToken, Capability, Change, Config, DeviceId, Error, Event, EventFilter, KeyCode,
    KeyState, Manager, Observer, Payload, RegistrySnapshot, MAX_EVENTS_PER_WAKE,
};

const SHORT: Duration = Duration::from_millis(50);

#[derive(Clone, Default)]
struct Journal {
    changes: Rc<RefCell<Vec<(Change, RegistrySnapshot)>>>,
    errors: Rc<RefCell<Vec<DeviceId>>>,
}

impl Observer for Journal {
    fn on_devices_changed(&mut self, snapshot: &RegistrySnapshot, change: &Change) {
        self.changes
            .borrow_mut()
            .push((change.clone(), snapshot.clone()));
    }

    fn on_device_error(&mut self, device: &DeviceId, _error: &Error) {
        self.errors.borrow_mut().push(device.clone());
    }
}

fn fast_config() -> Config {
    Config {
        wait_timeout_ms: Some(20),
        ..Config::default()
    }
}

/// Run the loop until a wait comes back empty.
fn pump(mgr: &mut Manager) {
    for _ in 0..64 {
        if mgr.run_once(Some(SHORT)).unwrap() == 0 {
            return;
        }
    }
    panic!("loop never settled");
}

/// Registry size, open handles and registered device descriptors agree.
fn assert_consistent(mgr: &Manager) {
    let handles = mgr.devices().count();
    assert_eq!(mgr.registry().len(), handles);
    assert_eq!(mgr.registrations(), handles + 1);
    for handle in mgr.devices() {
        assert!(mgr.registry().contains(handle.id()));
        assert!(mgr.is_waiting_on(handle.id()));
    }
}

fn manager(bus: &mut VirtualBus, config: Config) -> (Manager, Journal) {
    let mut mgr = Manager::new(bus, config).unwrap();
    let journal = Journal::default();
    mgr.set_observer(journal.clone());
    (mgr, journal)
}

#[test]
fn classic_controller_is_discovered_at_startup() {
    let mut bus = VirtualBus::new();
    let ctl = bus
        .plug("/sys/wiimote0", Capability::CORE | Capability::CLASSIC_CONTROLLER)
        .unwrap();
    let (mut mgr, journal) = manager(&mut bus, fast_config());

    pump(&mut mgr);

    let snapshot = mgr.snapshot();
    assert_eq!(snapshot.total(), 1);
    assert_eq!(snapshot.count(Capability::CLASSIC_CONTROLLER), 1);
    assert_eq!(snapshot.count(Capability::GUITAR), 0);
    assert_eq!(ctl.opened(), Capability::CLASSIC_CONTROLLER);
    assert_consistent(&mgr);

    let changes = journal.changes.borrow();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].0, Change::Added(DeviceId::from("/sys/wiimote0")));
}

#[test]
fn three_devices_in_one_drain() {
    let mut bus = VirtualBus::new();
    bus.plug("/w0", Capability::CORE).unwrap();
    bus.plug("/w1", Capability::CORE | Capability::DRUMS).unwrap();
    bus.plug("/w2", Capability::CORE | Capability::GUITAR).unwrap();
    let (mut mgr, _journal) = manager(&mut bus, fast_config());

    assert_eq!(mgr.run_once(Some(SHORT)).unwrap(), 1);
    assert_eq!(mgr.registry().len(), 3);
    assert_eq!(mgr.snapshot().count(Capability::DRUMS), 1);
    assert_eq!(mgr.snapshot().count(Capability::GUITAR), 1);
    assert_consistent(&mgr);
}

#[test]
fn hotplugged_device_is_added() {
    let mut bus = VirtualBus::new();
    let (mut mgr, _journal) = manager(&mut bus, fast_config());
    pump(&mut mgr);
    assert_eq!(mgr.registry().len(), 0);

    bus.plug("/w0", Capability::CORE | Capability::NUNCHUK).unwrap();
    pump(&mut mgr);
    assert_eq!(mgr.registry().len(), 1);
    // Nunchuk is not tracked by default.
    assert_eq!(mgr.snapshot().count(Capability::NUNCHUK), 0);
    assert_consistent(&mgr);
}

#[test]
fn enumerate_existing_off_skips_present_devices() {
    let mut bus = VirtualBus::new();
    bus.plug("/old", Capability::CORE).unwrap();
    let config = Config {
        enumerate_existing: false,
        ..fast_config()
    };
    let (mut mgr, _journal) = manager(&mut bus, config);
    pump(&mut mgr);
    assert!(mgr.registry().is_empty());

    bus.plug("/new", Capability::CORE).unwrap();
    pump(&mut mgr);
    let ids: Vec<_> = mgr.registry().devices().cloned().collect();
    assert_eq!(ids, vec![DeviceId::from("/new")]);
}

#[test]
fn extension_follows_watch_events() {
    let mut bus = VirtualBus::new();
    let ctl = bus.plug("/w0", Capability::CORE).unwrap();
    let (mut mgr, journal) = manager(&mut bus, fast_config());
    pump(&mut mgr);
    let id = DeviceId::from("/w0");

    ctl.set_available(Capability::CORE | Capability::GUITAR);
    pump(&mut mgr);
    assert!(mgr.registry().is_member(Capability::GUITAR, &id));
    assert_eq!(ctl.opened(), Capability::GUITAR);

    ctl.set_available(Capability::CORE);
    pump(&mut mgr);
    assert!(!mgr.registry().is_member(Capability::GUITAR, &id));
    assert_eq!(mgr.snapshot().count(Capability::GUITAR), 0);
    assert!(mgr.registry().contains(&id));
    assert_consistent(&mgr);

    let changes: Vec<Change> = journal
        .changes
        .borrow()
        .iter()
        .map(|(change, _)| change.clone())
        .collect();
    assert_eq!(
        changes,
        vec![
            Change::Added(id.clone()),
            Change::Reconciled(id.clone()),
            Change::Reconciled(id),
        ]
    );
}

#[test]
fn watch_without_change_is_quiet() {
    let mut bus = VirtualBus::new();
    let ctl = bus
        .plug("/w0", Capability::CORE | Capability::DRUMS)
        .unwrap();
    let (mut mgr, journal) = manager(&mut bus, fast_config());
    pump(&mut mgr);

    ctl.set_available(Capability::CORE | Capability::DRUMS);
    pump(&mut mgr);
    assert_eq!(journal.changes.borrow().len(), 1);
    assert_eq!(mgr.snapshot().count(Capability::DRUMS), 1);
}

#[test]
fn refused_open_is_retried_on_next_watch() {
    let mut bus = VirtualBus::new();
    let ctl = bus.plug("/w0", Capability::CORE).unwrap();
    let (mut mgr, journal) = manager(&mut bus, fast_config());
    pump(&mut mgr);
    let id = DeviceId::from("/w0");

    ctl.refuse_open(Capability::CLASSIC_CONTROLLER);
    ctl.set_available(Capability::CORE | Capability::CLASSIC_CONTROLLER);
    pump(&mut mgr);
    assert!(!mgr.registry().is_member(Capability::CLASSIC_CONTROLLER, &id));
    assert!(mgr.registry().contains(&id));
    assert_eq!(journal.errors.borrow().as_slice(), &[id.clone()]);

    ctl.refuse_open(Capability::empty());
    ctl.set_available(Capability::CORE | Capability::CLASSIC_CONTROLLER);
    pump(&mut mgr);
    assert!(mgr.registry().is_member(Capability::CLASSIC_CONTROLLER, &id));
}

#[test]
fn gone_event_removes_device_everywhere() {
    let mut bus = VirtualBus::new();
    let ctl = bus
        .plug("/w0", Capability::CORE | Capability::GUITAR)
        .unwrap();
    let keep = bus
        .plug("/w1", Capability::CORE | Capability::GUITAR)
        .unwrap();
    let (mut mgr, journal) = manager(&mut bus, fast_config());
    pump(&mut mgr);
    assert_eq!(mgr.snapshot().count(Capability::GUITAR), 2);

    assert!(ctl.unplug());
    pump(&mut mgr);

    let gone = DeviceId::from("/w0");
    assert!(!mgr.registry().contains(&gone));
    assert!(mgr.device(&gone).is_none());
    assert!(!mgr.is_waiting_on(&gone));
    assert_eq!(mgr.registry().memberships(&gone), Capability::empty());
    assert_eq!(mgr.snapshot().count(Capability::GUITAR), 1);
    assert_eq!(keep.opened(), Capability::GUITAR);
    assert_consistent(&mgr);

    let changes = journal.changes.borrow();
    let (change, snapshot) = changes.last().unwrap();
    assert_eq!(*change, Change::Removed(gone));
    assert_eq!(snapshot.total(), 1);
}

#[test]
fn fatal_read_error_removes_device() {
    let mut bus = VirtualBus::new();
    let ctl = bus
        .plug("/w0", Capability::CORE | Capability::DRUMS)
        .unwrap();
    let (mut mgr, journal) = manager(&mut bus, fast_config());
    pump(&mut mgr);

    ctl.fail_next(io::ErrorKind::ConnectionReset);
    pump(&mut mgr);

    assert!(mgr.registry().is_empty());
    assert_eq!(ctl.opened(), Capability::empty());
    assert_eq!(journal.errors.borrow().as_slice(), &[DeviceId::from("/w0")]);
    assert_consistent(&mgr);
}

#[test]
fn failing_device_does_not_affect_others() {
    let mut bus = VirtualBus::new();
    let bad = bus.plug("/bad", Capability::CORE).unwrap();
    let good = bus.plug("/good", Capability::CORE).unwrap();
    let (mut mgr, _journal) = manager(&mut bus, fast_config());

    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    mgr.router_mut().add_reaction(
        move |dev: &DeviceId, ev: &Event| sink.borrow_mut().push((dev.clone(), ev.kind())),
        EventFilter::Keys,
        None,
    );
    pump(&mut mgr);

    bad.fail_next(io::ErrorKind::BrokenPipe);
    good.tap(KeyCode::A);
    pump(&mut mgr);

    assert_eq!(mgr.registry().len(), 1);
    let seen = seen.borrow();
    assert_eq!(seen.len(), 2);
    assert!(seen.iter().all(|(dev, _)| dev.as_str() == "/good"));
}

#[test]
fn idle_wait_changes_nothing() {
    let mut bus = VirtualBus::new();
    bus.plug("/w0", Capability::CORE).unwrap();
    let (mut mgr, journal) = manager(&mut bus, fast_config());
    pump(&mut mgr);
    let before = mgr.snapshot();

    assert_eq!(mgr.run_once(Some(Duration::from_millis(10))).unwrap(), 0);
    assert_eq!(mgr.snapshot(), before);
    assert_eq!(journal.changes.borrow().len(), 1);
    assert!(journal.errors.borrow().is_empty());
}

#[test]
fn busy_device_is_serviced_across_wakeups() {
    let mut bus = VirtualBus::new();
    let ctl = bus.plug("/w0", Capability::CORE).unwrap();
    let (mut mgr, _journal) = manager(&mut bus, fast_config());
    pump(&mut mgr);

    let count = Rc::new(RefCell::new(0usize));
    let sink = count.clone();
    mgr.router_mut()
        .add_reaction(move |_: &DeviceId, _: &Event| *sink.borrow_mut() += 1, EventFilter::All, None);

    for _ in 0..MAX_EVENTS_PER_WAKE + 8 {
        ctl.push(Event::new(Payload::Accel(wiimux::event::Abs::new(1, 2, 3))));
    }
    assert_eq!(mgr.run_once(Some(SHORT)).unwrap(), 1);
    assert_eq!(*count.borrow(), MAX_EVENTS_PER_WAKE);
    assert_eq!(ctl.pending(), 8);

    pump(&mut mgr);
    assert_eq!(*count.borrow(), MAX_EVENTS_PER_WAKE + 8);
    assert_eq!(ctl.pending(), 0);
}

#[test]
fn flooded_device_is_fully_delivered() {
    let mut bus = VirtualBus::new();
    let ctl = bus.plug("/w0", Capability::CORE).unwrap();
    let (mut mgr, _journal) = manager(&mut bus, fast_config());
    pump(&mut mgr);

    let count = Rc::new(RefCell::new(0usize));
    let sink = count.clone();
    mgr.router_mut()
        .add_reaction(move |_: &DeviceId, _: &Event| *sink.borrow_mut() += 1, EventFilter::All, None);

    for _ in 0..5000 {
        ctl.push(Event::new(Payload::Accel(wiimux::event::Abs::new(1, 2, 3))));
    }
    let mut wakeups = 0;
    while mgr.run_once(Some(SHORT)).unwrap() > 0 {
        wakeups += 1;
        assert!(wakeups <= 1000, "loop never settled");
    }

    assert_eq!(*count.borrow(), 5000);
    assert_eq!(ctl.pending(), 0);
    assert!(wakeups >= 5000 / MAX_EVENTS_PER_WAKE);
}

#[test]
fn writable_config_requests_write_access() {
    let mut bus = VirtualBus::new();
    let ctl = bus
        .plug("/w0", Capability::CORE | Capability::CLASSIC_CONTROLLER)
        .unwrap();
    let config = Config {
        writable: true,
        ..fast_config()
    };
    let (mut mgr, _journal) = manager(&mut bus, config);
    pump(&mut mgr);
    assert_eq!(
        ctl.opened(),
        Capability::CLASSIC_CONTROLLER | Capability::WRITABLE
    );
}

#[test]
fn configured_extensions_limit_tracking() {
    let mut bus = VirtualBus::new();
    let ctl = bus
        .plug(
            "/w0",
            Capability::CORE | Capability::NUNCHUK | Capability::GUITAR,
        )
        .unwrap();
    let config = Config {
        extensions: vec![Capability::NUNCHUK],
        ..fast_config()
    };
    let (mut mgr, _journal) = manager(&mut bus, config);
    pump(&mut mgr);

    assert_eq!(ctl.opened(), Capability::NUNCHUK);
    let snapshot = mgr.snapshot();
    assert_eq!(snapshot.count(Capability::NUNCHUK), 1);
    assert_eq!(snapshot.iter().count(), 1);
}

#[test]
fn shutdown_releases_everything() {
    let mut bus = VirtualBus::new();
    let a = bus
        .plug("/w0", Capability::CORE | Capability::DRUMS)
        .unwrap();
    let b = bus
        .plug("/w1", Capability::CORE | Capability::GUITAR)
        .unwrap();
    let (mut mgr, _journal) = manager(&mut bus, fast_config());
    pump(&mut mgr);

    mgr.shutdown();
    assert!(mgr.is_shut_down());
    assert_eq!(mgr.registrations(), 0);
    assert!(mgr.registry().is_empty());
    assert_eq!(a.opened(), Capability::empty());
    assert_eq!(b.opened(), Capability::empty());

    mgr.shutdown();
    assert_eq!(mgr.run_once(Some(SHORT)).unwrap(), 0);
}

fn wait_until(deadline: Instant, mut done: impl FnMut() -> bool) {
    while !done() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn run_stops_on_cancel_and_cleans_up() {
    let mut bus = VirtualBus::new();
    let (mut mgr, journal) = manager(&mut bus, fast_config());

    let presses = Rc::new(RefCell::new(Vec::new()));
    let sink = presses.clone();
    mgr.router_mut().add_reaction(
        wiimux::PressedOnly(move |_: &DeviceId, ev: &Event| {
            sink.borrow_mut().push(ev.key().unwrap())
        }),
        EventFilter::Kind(wiimux::EventKind::ClassicControllerKey),
        None,
    );

    let cancel = CancelToken::new();
    let remote = cancel.clone();
    let hw = bus.clone();
    let driver = thread::spawn(move || -> VirtualController {
        let deadline = Instant::now() + Duration::from_secs(5);
        let ctl = hw
            .plug("/w0", Capability::CORE | Capability::CLASSIC_CONTROLLER)
            .unwrap();
        wait_until(deadline, || !ctl.opened().is_empty());
        ctl.key(Payload::ClassicControllerKey, KeyCode::Plus);
        wait_until(deadline, || ctl.pending() == 0);
        remote.cancel();
        ctl
    });

    mgr.run(&cancel).unwrap();
    let ctl = driver.join().unwrap();

    assert!(mgr.is_shut_down());
    assert_eq!(mgr.registrations(), 0);
    assert_eq!(ctl.opened(), Capability::empty());

    let presses = presses.borrow();
    assert_eq!(presses.len(), 1);
    assert_eq!(presses[0].code, KeyCode::Plus);
    assert_eq!(presses[0].state, KeyState::Pressed);

    let changes = journal.changes.borrow();
    assert_eq!(changes.first().map(|(c, _)| c.clone()), Some(Change::Added(DeviceId::from("/w0"))));
    assert_eq!(changes.last().map(|(c, _)| c.clone()), Some(Change::Removed(DeviceId::from("/w0"))));
}

#[test]
fn dropping_the_manager_closes_devices() {
    let mut bus = VirtualBus::new();
    let ctl = bus
        .plug("/w0", Capability::CORE | Capability::DRUMS)
        .unwrap();
    {
        let (mut mgr, _journal) = manager(&mut bus, fast_config());
        pump(&mut mgr);
        assert_eq!(ctl.opened(), Capability::DRUMS);
    }
    assert_eq!(ctl.opened(), Capability::empty());
}
