use std::thread;
use std::time::Duration;

use wiimux::backends::virtual_input::VirtualBus;
use wiimux::{
    logger, CancelToken, Capability, Change, Config, DeviceId, Error, Event, EventFilter,
    EventKind, KeyCode, Manager, Observer, Payload, PressedOnly, RegistrySnapshot,
};

/// Prints the device table whenever it changes.
struct Table;

impl Observer for Table {
    fn on_devices_changed(&mut self, snapshot: &RegistrySnapshot, change: &Change) {
        println!("{change:?}");
        println!("{snapshot}");
    }

    fn on_device_error(&mut self, device: &DeviceId, error: &Error) {
        eprintln!("{device}: {error}");
    }
}

fn main() {
    let config = match std::env::args().nth(1) {
        Some(path) => Config::load(path).expect("load config"),
        None => Config::default(),
    };
    logger::init(&config.log_level);

    let mut bus = VirtualBus::new();
    let first = bus
        .plug("/sys/devices/virtual/wiimote0", Capability::CORE)
        .expect("plug wiimote0");

    let mut mgr = Manager::new(&mut bus, config).expect("create manager");
    mgr.set_observer(Table);
    mgr.router_mut().add_reaction(
        PressedOnly(|dev: &DeviceId, ev: &Event| {
            if let Ok(key) = ev.key() {
                match key.code {
                    KeyCode::Plus => println!("{dev}: Plus pressed"),
                    KeyCode::Minus => println!("{dev}: Minus pressed"),
                    _ => {}
                }
            }
        }),
        EventFilter::Kind(EventKind::ClassicControllerKey),
        None,
    );
    mgr.router_mut()
        .add_reaction(logger::Logger::new(), EventFilter::All, None);

    let cancel = CancelToken::new();
    cancel
        .install_signal_handlers()
        .expect("install signal handlers");

    // Scripted hardware: attach a classic controller and press a few buttons, plug
    // a second remote with a guitar, then pull everything out.
    let script = {
        let bus = bus.clone();
        let cancel = cancel.clone();
        thread::spawn(move || {
            let pause = || thread::sleep(Duration::from_millis(300));
            pause();
            first.set_available(Capability::CORE | Capability::CLASSIC_CONTROLLER);
            pause();
            first.key(Payload::ClassicControllerKey, KeyCode::Plus);
            first.key(Payload::ClassicControllerKey, KeyCode::Minus);
            pause();

            let second = bus
                .plug(
                    "/sys/devices/virtual/wiimote1",
                    Capability::CORE | Capability::GUITAR,
                )
                .expect("plug wiimote1");
            pause();
            second.key(Payload::GuitarKey, KeyCode::FretUp);
            first.set_available(Capability::CORE);
            pause();

            for path in bus.paths() {
                bus.unplug(&path);
            }
            pause();
            cancel.cancel();
        })
    };

    if let Err(e) = mgr.run(&cancel) {
        eprintln!("manager stopped: {e}");
    }
    let _ = script.join();
    println!("{}", mgr.snapshot());
}
