//! Owned view of the registry for presentation.
//!
//! [`RegistrySnapshot`] is what observers receive whenever the device set or a
//! device's capability membership changes: the total device count and one count per
//! tracked capability kind. It is immutable and cheap to clone.
//!
//! The [`Display`](std::fmt::Display) impl renders the classic boxed table:
//!
//! ```text
//! +--------------------------------------------+
//! | Nintendo Wii Remote Core                 2 |
//! +--------------------------------------------+
//! | Nintendo Wii Remote Classic Controller   1 |
//! | Nintendo Wii Remote Drums                0 |
//! | Nintendo Wii Remote Guitar               0 |
//! +--------------------------------------------+
//! ```

use crate::capability::Capability;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    total: usize,
    kinds: BTreeMap<Capability, usize>,
}

impl RegistrySnapshot {
    pub fn new(total: usize, kinds: impl IntoIterator<Item = (Capability, usize)>) -> Self {
        Self {
            total,
            kinds: kinds.into_iter().collect(),
        }
    }

    /// Number of known devices.
    #[inline]
    pub fn total(&self) -> usize {
        self.total
    }

    /// Devices with `kind` open (0 for untracked kinds).
    #[inline]
    pub fn count(&self, kind: Capability) -> usize {
        self.kinds.get(&kind).copied().unwrap_or(0)
    }

    /// Iterate `(kind, count)` for tracked kinds.
    pub fn iter(&self) -> impl Iterator<Item = (Capability, usize)> + '_ {
        self.kinds.iter().map(|(kind, count)| (*kind, *count))
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl fmt::Display for RegistrySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const RULE: &str = "+--------------------------------------------+";
        let core = Capability::CORE.display_name().unwrap_or("devices");
        writeln!(f, "{RULE}")?;
        writeln!(f, "| {:<40} {} |", core, self.total)?;
        writeln!(f, "{RULE}")?;
        for (kind, count) in self.iter() {
            let name = kind.display_name().unwrap_or("?");
            writeln!(f, "| {:<40} {} |", name, count)?;
        }
        write!(f, "{RULE}")
    }
}
