//! Device metadata snapshot.
//!
//! [`DeviceMeta`] is a lightweight, cloneable description of a controller suitable
//! for UI display and logging. Transports populate what they know; unknown fields
//! remain `None`.
//!
//! # Conventions
//! - `path` is the discovery identifier (sysfs path for the kernel driver). It is the
//!   device's identity inside this crate; descriptor numbers never are.
//! - `devtype` is the transport's model string, e.g. `"gen10"`, `"gen20"`,
//!   `"balanceboard"`, `"procontroller"`.
//! - `extension` is the currently plugged extension as the transport names it,
//!   e.g. `"classic"`, `"drums"`, `"none"`.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceMeta {
    pub path: String,

    pub devtype: Option<String>,

    pub extension: Option<String>,

    /// Battery capacity in percent, if the transport reports it.
    pub battery: Option<u8>,
}

impl DeviceMeta {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }
}

impl fmt::Display for DeviceMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (type={}, extension={})",
            self.path,
            self.devtype.as_deref().unwrap_or("unknown"),
            self.extension.as_deref().unwrap_or("unknown"),
        )?;
        if let Some(battery) = self.battery {
            write!(f, " battery={battery}%")?;
        }
        Ok(())
    }
}
