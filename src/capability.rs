//! Capability kinds and masks.
//!
//! A [`Capability`] is a bitmask over the interfaces a controller can expose: the
//! core remote itself, its built-in sensors, and the extensions that can be plugged
//! into it (classic controller, drums, guitar, ...). Bit values match the kernel
//! driver's interface masks so a transport can pass them through unchanged.
//!
//! Two masks matter per device:
//! - **available**: what the hardware currently exposes (changes out of band).
//! - **opened**: what this process has activated (changes only through open/close).
//!
//! Both are plain values. They are re-queried from the transport for every
//! reconciliation pass and never cached across passes; see [`CapabilityState`].

use crate::error::Error;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct Capability: u32 {
        const CORE = 0x0000_0001;
        const ACCEL = 0x0000_0002;
        const IR = 0x0000_0004;
        const MOTION_PLUS = 0x0000_0100;
        const NUNCHUK = 0x0000_0200;
        const CLASSIC_CONTROLLER = 0x0000_0400;
        const BALANCE_BOARD = 0x0000_0800;
        const PRO_CONTROLLER = 0x0000_1000;
        const DRUMS = 0x0000_2000;
        const GUITAR = 0x0000_4000;

        /// Not a kind: requests write access (LEDs, rumble) when opening.
        const WRITABLE = 0x0001_0000;
    }
}

/// Every single-bit capability kind, in mask order.
const KINDS: [(Capability, &str, &str); 10] = [
    (Capability::CORE, "core", "Nintendo Wii Remote Core"),
    (Capability::ACCEL, "accel", "Nintendo Wii Remote Accelerometer"),
    (Capability::IR, "ir", "Nintendo Wii Remote IR"),
    (Capability::MOTION_PLUS, "motion-plus", "Nintendo Wii Remote Motion Plus"),
    (Capability::NUNCHUK, "nunchuk", "Nintendo Wii Remote Nunchuk"),
    (
        Capability::CLASSIC_CONTROLLER,
        "classic-controller",
        "Nintendo Wii Remote Classic Controller",
    ),
    (Capability::BALANCE_BOARD, "balance-board", "Nintendo Wii Balance Board"),
    (Capability::PRO_CONTROLLER, "pro-controller", "Nintendo Wii U Pro Controller"),
    (Capability::DRUMS, "drums", "Nintendo Wii Remote Drums"),
    (Capability::GUITAR, "guitar", "Nintendo Wii Remote Guitar"),
];

impl Capability {
    /// Extension kinds tracked when no configuration says otherwise.
    pub const DEFAULT_EXTENSIONS: Capability = Capability::CLASSIC_CONTROLLER
        .union(Capability::DRUMS)
        .union(Capability::GUITAR);

    /// Iterate the single-bit kinds contained in `self`, skipping [`Capability::WRITABLE`].
    pub fn kinds(self) -> impl Iterator<Item = Capability> {
        KINDS
            .iter()
            .map(|(kind, _, _)| *kind)
            .filter(move |kind| self.contains(*kind))
    }

    /// Human-readable interface name, e.g. `"Nintendo Wii Remote Drums"`.
    ///
    /// Returns `None` for masks that are not a single kind.
    pub fn display_name(self) -> Option<&'static str> {
        KINDS
            .iter()
            .find(|(kind, _, _)| *kind == self)
            .map(|(_, _, name)| *name)
    }

    /// Short configuration name, e.g. `"classic-controller"`.
    pub fn short_name(self) -> Option<&'static str> {
        KINDS
            .iter()
            .find(|(kind, _, _)| *kind == self)
            .map(|(_, short, _)| *short)
    }
}

impl Default for Capability {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        let mut first = true;
        for kind in self.kinds() {
            if !first {
                f.write_str("|")?;
            }
            first = false;
            f.write_str(kind.short_name().unwrap_or("?"))?;
        }
        if self.contains(Capability::WRITABLE) {
            f.write_str(if first { "writable" } else { "|writable" })?;
        }
        Ok(())
    }
}

impl FromStr for Capability {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('_', "-");
        KINDS
            .iter()
            .find(|(_, short, _)| *short == wanted)
            .map(|(kind, _, _)| *kind)
            .ok_or_else(|| Error::UnknownCapability(s.to_string()))
    }
}

/// Kinds serialize by short name so configuration files stay readable.
impl Serialize for Capability {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.short_name() {
            Some(name) => serializer.serialize_str(name),
            None => serializer.serialize_u32(self.bits()),
        }
    }
}

impl<'de> Deserialize<'de> for Capability {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}

/// One authoritative reading of a device's masks.
///
/// Taken at the start of a reconciliation pass and discarded at its end.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CapabilityState {
    pub available: Capability,
    pub opened: Capability,
}

impl CapabilityState {
    pub fn new(available: Capability, opened: Capability) -> Self {
        Self { available, opened }
    }

    pub fn is_opened(&self, kind: Capability) -> bool {
        self.opened.contains(kind)
    }

    pub fn is_available(&self, kind: Capability) -> bool {
        self.available.contains(kind)
    }

    /// Opened kinds the hardware no longer reports.
    pub fn stale(&self) -> Capability {
        (self.opened - self.available) - Capability::WRITABLE
    }
}
