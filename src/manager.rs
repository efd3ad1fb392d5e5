//! The multiplex loop.
//!
//! [`Manager`] owns everything that changes while the system runs: the hotplug
//! monitor, one [`DeviceHandle`] per known controller, the [`Registry`] and the
//! readiness set. A single thread drives it; all mutation happens inside
//! [`Manager::run_once`] (or the explicit control methods), so nothing is locked.
//!
//! Per wakeup:
//! - the monitor token drains the [`HotplugMonitor`]; each new path is opened,
//!   reconciled over every tracked kind, registered for readiness and reported;
//! - a device token dispatches events until the device would block. Watch events
//!   re-run reconciliation, gone events and fatal I/O errors remove the device, and
//!   everything else goes to the [`EventRouter`].
//!
//! Devices found during a wakeup are registered after the drain, so the earliest
//! they can be dispatched is the next wait.
//!
//! Per-device failures never end the loop. [`Manager::shutdown`] runs on every exit
//! from [`Manager::run`] and again on drop, and leaves no descriptor registered.

use crate::backends::Backend;
use crate::cancel::CancelToken;
use crate::config::Config;
use crate::device::{DeviceHandle, DeviceId, DeviceOpener};
use crate::error::{Error, Result};
use crate::event::{Event, Payload};
use crate::eventbus::EventRouter;
use crate::monitor::{HotplugMonitor, Monitor};
use crate::readiness::{PollReadiness, Readiness, Token};
use crate::reconcile::{self, Reconciliation};
use crate::registry::Registry;
use crate::snapshot::RegistrySnapshot;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Upper bound on events read from one device per wakeup.
///
/// Keeps one chatty controller from starving the others; anything left is reported
/// readable again on the next wait.
pub const MAX_EVENTS_PER_WAKE: usize = 32;

const MONITOR: Token = Token(0);

/// Why observers are being told about a new registry state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Change {
    Added(DeviceId),
    Removed(DeviceId),
    /// A watch event changed the device's capability memberships.
    Reconciled(DeviceId),
}

/// Presentation hook.
pub trait Observer {
    /// The device set or a device's memberships changed.
    fn on_devices_changed(&mut self, snapshot: &RegistrySnapshot, change: &Change) {
        let _ = (snapshot, change);
    }

    /// A per-device failure. The loop keeps running.
    fn on_device_error(&mut self, device: &DeviceId, error: &Error) {
        let _ = (device, error);
    }
}

impl Observer for () {}

pub struct Manager<R: Readiness = PollReadiness> {
    monitor: Option<HotplugMonitor>,
    opener: Box<dyn DeviceOpener>,
    readiness: R,
    registry: Registry,
    devices: HashMap<Token, DeviceHandle>,
    tokens: HashMap<DeviceId, Token>,
    next_token: usize,
    router: EventRouter,
    observer: Box<dyn Observer>,
    config: Config,
    ready: Vec<Token>,
    shut_down: bool,
}

impl Manager<PollReadiness> {
    /// Create the monitor from `backend` and set up a `polling`-backed readiness set.
    ///
    /// Fails with [`Error::MonitorCreate`] if the backend cannot enumerate devices.
    pub fn new(backend: &mut dyn Backend, config: Config) -> Result<Self> {
        let monitor = backend
            .monitor(config.monitor_options())
            .map_err(Error::MonitorCreate)?;
        Self::with_readiness(monitor, backend.opener(), PollReadiness::new()?, config)
    }
}

impl<R: Readiness> Manager<R> {
    pub fn with_readiness(
        monitor: Box<dyn Monitor>,
        opener: Box<dyn DeviceOpener>,
        mut readiness: R,
        config: Config,
    ) -> Result<Self> {
        let monitor = HotplugMonitor::new(monitor);
        readiness.register(monitor.as_raw_fd(), MONITOR)?;

        Ok(Self {
            monitor: Some(monitor),
            opener,
            readiness,
            registry: Registry::new(config.tracked()),
            devices: HashMap::new(),
            tokens: HashMap::new(),
            next_token: MONITOR.0 + 1,
            router: EventRouter::new(),
            observer: Box::new(()),
            config,
            ready: Vec::new(),
            shut_down: false,
        })
    }

    pub fn set_observer(&mut self, observer: impl Observer + 'static) {
        self.observer = Box::new(observer);
    }

    pub fn router_mut(&mut self) -> &mut EventRouter {
        &mut self.router
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        self.registry.snapshot()
    }

    pub fn devices(&self) -> impl Iterator<Item = &DeviceHandle> {
        self.devices.values()
    }

    pub fn device(&self, id: &DeviceId) -> Option<&DeviceHandle> {
        self.tokens.get(id).and_then(|token| self.devices.get(token))
    }

    /// `true` while `id`'s descriptor is in the readiness set.
    pub fn is_waiting_on(&self, id: &DeviceId) -> bool {
        self.tokens
            .get(id)
            .is_some_and(|token| self.readiness.is_registered(*token))
    }

    /// `false` once the hotplug monitor has failed or the manager is shut down.
    pub fn is_monitoring(&self) -> bool {
        self.monitor.is_some()
    }

    /// Descriptors currently registered, monitor included.
    pub fn registrations(&self) -> usize {
        self.readiness.len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    /// Run until `cancel` fires or the readiness wait fails, then shut down.
    pub fn run(&mut self, cancel: &CancelToken) -> Result<()> {
        let result = self.serve(cancel);
        self.shutdown();
        result
    }

    fn serve(&mut self, cancel: &CancelToken) -> Result<()> {
        if self.shut_down {
            return Ok(());
        }
        self.discover();

        let timeout = self.config.wait_timeout();
        while !cancel.is_cancelled() {
            self.run_once(timeout)?;
        }
        info!("cancelled, shutting down");
        Ok(())
    }

    /// One wait plus the handling of everything it reported.
    ///
    /// Returns the number of ready descriptors. An interrupted wait reports zero.
    pub fn run_once(&mut self, timeout: Option<Duration>) -> Result<usize> {
        if self.shut_down {
            return Ok(0);
        }

        let mut ready = std::mem::take(&mut self.ready);
        ready.clear();
        self.readiness.wait(&mut ready, timeout)?;
        ready.sort_unstable();
        ready.dedup();

        let count = ready.len();
        for &token in &ready {
            if token == MONITOR {
                self.discover();
            } else {
                self.service(token);
            }
        }
        self.ready = ready;
        Ok(count)
    }

    /// Drain the monitor and add every new device. Returns how many were added.
    pub fn discover(&mut self) -> usize {
        let (paths, failed) = match self.monitor.as_mut() {
            Some(monitor) => (monitor.drain(), monitor.is_failed()),
            None => return 0,
        };
        if failed {
            warn!("hotplug monitor keeps failing, no longer watching for devices");
            self.retire_monitor();
        }

        let mut added = 0;
        for path in paths {
            match self.add_device(&path) {
                Ok(Some(_)) => added += 1,
                Ok(None) => {}
                Err(e) => {
                    warn!(%path, "skipping device: {e}");
                    self.observer.on_device_error(&DeviceId::new(path), &e);
                }
            }
        }
        added
    }

    /// Open `path`, reconcile it and start waiting on it.
    ///
    /// Returns `Ok(None)` if the device is already known, either under the reported
    /// path or under the path its transport reports once opened.
    pub fn add_device(&mut self, path: &str) -> Result<Option<DeviceId>> {
        let reported = DeviceId::new(path);
        if self.registry.contains(&reported) {
            debug!(device = %reported, "already known");
            return Ok(None);
        }

        let mut handle = DeviceHandle::open_path(self.opener.as_mut(), path)?
            .with_writable(self.config.writable);
        let id = handle.id().clone();

        // Nothing is opened on the new handle yet, so dropping it leaves the live
        // device untouched.
        if !self.registry.insert(id.clone()) {
            debug!(device = %id, %path, "already known under its transport path");
            return Ok(None);
        }
        let outcome = match reconcile::reconcile(&mut handle, &mut self.registry) {
            Ok(outcome) => outcome,
            Err(e) => {
                self.registry.remove(&id);
                return Err(e);
            }
        };

        let token = Token(self.next_token);
        if let Err(e) = self.readiness.register(handle.as_raw_fd(), token) {
            self.registry.remove(&id);
            handle.close(handle.opened());
            return Err(e.into());
        }
        self.next_token += 1;

        info!(device = %id, opened = %handle.opened(), "device added");
        self.devices.insert(token, handle);
        self.tokens.insert(id.clone(), token);

        self.report_failures(&id, outcome);
        let snapshot = self.registry.snapshot();
        self.observer
            .on_devices_changed(&snapshot, &Change::Added(id.clone()));
        Ok(Some(id))
    }

    /// Re-run reconciliation for one device, as a watch event would.
    pub fn reconcile(&mut self, id: &DeviceId) -> Option<Result<bool>> {
        let token = *self.tokens.get(id)?;
        Some(self.reconcile_token(token))
    }

    /// Remove a device from every structure. Returns `false` if it was not known.
    pub fn remove(&mut self, id: &DeviceId) -> bool {
        match self.tokens.get(id).copied() {
            Some(token) => self.remove_token(token).is_some(),
            None => false,
        }
    }

    /// Mandatory cleanup: close and forget every device, deregister every descriptor.
    ///
    /// Idempotent.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        let tokens: Vec<Token> = self.devices.keys().copied().collect();
        for token in tokens {
            self.remove_token(token);
        }

        self.retire_monitor();
        debug!(registrations = self.readiness.len(), "shutdown complete");
    }

    fn retire_monitor(&mut self) {
        if self.monitor.take().is_some() {
            if let Err(e) = self.readiness.unregister(MONITOR) {
                warn!("cannot unregister monitor: {e}");
            }
        }
    }

    fn service(&mut self, token: Token) {
        for _ in 0..MAX_EVENTS_PER_WAKE {
            let Some(handle) = self.devices.get_mut(&token) else {
                return;
            };
            match handle.dispatch() {
                Ok(None) => return,
                Ok(Some(event)) => {
                    if !self.handle_event(token, event) {
                        return;
                    }
                }
                Err(e) => {
                    let id = handle.id().clone();
                    warn!(device = %id, "removing device: {e}");
                    self.observer.on_device_error(&id, &e);
                    self.remove_token(token);
                    return;
                }
            }
        }
    }

    /// Returns `false` once the device is gone.
    fn handle_event(&mut self, token: Token, event: Event) -> bool {
        match event.payload {
            Payload::Watch => match self.reconcile_token(token) {
                Ok(_) => true,
                Err(e) => {
                    if let Some(id) = self.id_of(token) {
                        warn!(device = %id, "removing device: {e}");
                        self.observer.on_device_error(&id, &e);
                    }
                    self.remove_token(token);
                    false
                }
            },
            Payload::Gone => {
                self.remove_token(token);
                false
            }
            _ => {
                if let Some(id) = self.id_of(token) {
                    self.router.route(&id, &event);
                }
                true
            }
        }
    }

    fn reconcile_token(&mut self, token: Token) -> Result<bool> {
        let Some(handle) = self.devices.get_mut(&token) else {
            return Ok(false);
        };
        let outcome = reconcile::reconcile(handle, &mut self.registry)?;
        let id = handle.id().clone();
        let changed = outcome.changed();
        self.report_failures(&id, outcome);
        if changed {
            info!(device = %id, opened = %self.registry.memberships(&id), "capabilities changed");
            let snapshot = self.registry.snapshot();
            self.observer
                .on_devices_changed(&snapshot, &Change::Reconciled(id));
        }
        Ok(changed)
    }

    fn report_failures(&mut self, id: &DeviceId, outcome: Reconciliation) {
        for (_, e) in outcome.failed {
            self.observer.on_device_error(id, &e);
        }
    }

    fn id_of(&self, token: Token) -> Option<DeviceId> {
        self.devices.get(&token).map(|h| h.id().clone())
    }

    fn remove_token(&mut self, token: Token) -> Option<DeviceId> {
        let mut handle = self.devices.remove(&token)?;
        if let Err(e) = self.readiness.unregister(token) {
            warn!(device = %handle.id(), "cannot unregister: {e}");
        }

        let id = handle.id().clone();
        self.tokens.remove(&id);
        self.registry.remove(&id);
        handle.close(handle.opened());
        drop(handle);

        info!(device = %id, "device removed");
        let snapshot = self.registry.snapshot();
        self.observer
            .on_devices_changed(&snapshot, &Change::Removed(id.clone()));
        Some(id)
    }
}

impl<R: Readiness> Drop for Manager<R> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
