//! # wiimux
//!
//! Hotplug-aware multiplexer for Wii Remote family controllers.
//!
//! A [`Manager`] watches a hotplug [`Monitor`](monitor::Monitor), opens every
//! controller it reports, and keeps a [`Registry`] of which devices currently expose
//! each tracked extension (classic controller, drums and guitar by default). All
//! descriptors are waited on from one thread; decoded events are routed to
//! [`Reaction`]s, registry changes go to an [`Observer`].
//!
//! ## Example
//! ```no_run
//! use wiimux::backends::virtual_input::VirtualBus;
//! use wiimux::{CancelToken, Config, DeviceId, Event, EventFilter, Manager, PressedOnly};
//!
//! let mut bus = VirtualBus::new();
//! let mut mgr = Manager::new(&mut bus, Config::default()).unwrap();
//! mgr.router_mut().add_reaction(
//!     PressedOnly(|dev: &DeviceId, ev: &Event| println!("{dev}: {ev}")),
//!     EventFilter::Keys,
//!     None,
//! );
//!
//! let cancel = CancelToken::new();
//! cancel.install_signal_handlers().unwrap();
//! mgr.run(&cancel).unwrap();
//! ```
//!
//! ## Modules
//! - [`capability`]: capability masks and the per-device state pair.
//! - [`event`]: the tagged event model.
//! - [`device`]: transport seam and [`DeviceHandle`].
//! - [`monitor`]: hotplug enumeration.
//! - [`registry`] and [`reconcile`]: membership sets and how they follow the hardware.
//! - [`readiness`]: the readiness set the loop waits on.
//! - [`manager`]: the multiplex loop.
//! - [`eventbus`], [`filtered_listener`], [`logger`]: event routing.
//! - [`backends`]: virtual controllers and the udev monitor.

pub mod backends;
pub mod cancel;
pub mod capability;
pub mod config;
pub mod device;
pub mod error;
pub mod event;
pub mod eventbus;
pub mod filtered_listener;
pub mod logger;
pub mod manager;
pub mod metadata;
pub mod monitor;
pub mod readiness;
pub mod reconcile;
pub mod registry;
pub mod snapshot;

pub use cancel::CancelToken;
pub use capability::{Capability, CapabilityState};
pub use config::Config;
pub use device::{Device, DeviceHandle, DeviceId, DeviceOpener};
pub use error::{Error, Result};
pub use event::{Event, EventKind, KeyCode, KeyPayload, KeyState, Payload};
pub use eventbus::{EventFilter, EventRouter, Reaction, ReactionId};
pub use filtered_listener::{FilteredReaction, PressedOnly};
pub use manager::{Change, Manager, Observer, MAX_EVENTS_PER_WAKE};
pub use registry::Registry;
pub use snapshot::RegistrySnapshot;
