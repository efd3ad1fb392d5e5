//! Extension reconciliation.
//!
//! Compares one authoritative [`CapabilityState`] reading of a device against the
//! registry and decides, per tracked kind, whether membership must change. Planning
//! and applying are separate phases: [`plan`] only reads, [`Plan::apply`] performs the
//! opens and membership edits afterwards, so no set is mutated while the kinds are
//! being walked.
//!
//! Decision per kind (first match wins):
//!
//! | kind opened | registry member | kind available | action |
//! |-------------|-----------------|----------------|--------|
//! | yes         | -               | -              | none   |
//! | no          | yes             | yes            | none   |
//! | no          | yes             | no             | remove |
//! | no          | no              | no             | none   |
//! | no          | no              | yes            | open   |
//!
//! Reconciliation is lazy: it runs on discovery and on watch events only. A kind that
//! disappears between two watch events keeps its membership until the next one.

use crate::capability::{Capability, CapabilityState};
use crate::device::DeviceHandle;
use crate::error::{Error, Result};
use crate::registry::Registry;
use tracing::{debug, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MembershipAction {
    None,
    Open,
    Remove,
}

/// Decide the action for one kind.
pub fn decide(state: &CapabilityState, member: bool, kind: Capability) -> MembershipAction {
    if state.is_opened(kind) {
        return MembershipAction::None;
    }
    if member {
        return if state.is_available(kind) {
            MembershipAction::None
        } else {
            MembershipAction::Remove
        };
    }
    if state.is_available(kind) {
        MembershipAction::Open
    } else {
        MembershipAction::None
    }
}

/// Intended membership changes for one device.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Plan {
    pub open: Capability,
    pub remove: Capability,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.open.is_empty() && self.remove.is_empty()
    }

    /// Carry out the plan against `handle` and `registry`.
    ///
    /// Each kind is opened on its own so one refused kind does not block the others.
    pub fn apply(&self, handle: &mut DeviceHandle, registry: &mut Registry) -> Reconciliation {
        let mut outcome = Reconciliation::default();

        for kind in self.remove.kinds() {
            if registry.remove_member(kind, handle.id()) {
                debug!(device = %handle.id(), %kind, "capability gone, membership dropped");
                outcome.removed |= kind;
            }
        }

        for kind in self.open.kinds() {
            match handle.open(kind) {
                Ok(()) => {
                    registry.add_member(kind, handle.id());
                    debug!(device = %handle.id(), %kind, "capability opened");
                    outcome.opened |= kind;
                }
                Err(e) => {
                    warn!(device = %handle.id(), %kind, "cannot open capability: {e}");
                    outcome.failed.push((kind, e));
                }
            }
        }

        outcome
    }
}

/// What a reconciliation pass did.
#[derive(Debug, Default)]
pub struct Reconciliation {
    pub opened: Capability,
    pub removed: Capability,
    pub failed: Vec<(Capability, Error)>,
}

impl Reconciliation {
    /// `true` if any membership changed.
    pub fn changed(&self) -> bool {
        !self.opened.is_empty() || !self.removed.is_empty()
    }
}

/// Phase one: read-only planning over every tracked kind.
pub fn plan(state: &CapabilityState, registry: &Registry, handle: &DeviceHandle) -> Plan {
    let mut plan = Plan::default();
    for kind in registry.tracked().kinds() {
        match decide(state, registry.is_member(kind, handle.id()), kind) {
            MembershipAction::None => {}
            MembershipAction::Open => plan.open |= kind,
            MembershipAction::Remove => plan.remove |= kind,
        }
    }
    plan
}

/// Query the device once, plan, then apply.
pub fn reconcile(handle: &mut DeviceHandle, registry: &mut Registry) -> Result<Reconciliation> {
    let state = handle.refresh()?;
    let stale = state.stale();
    if !stale.is_empty() {
        debug!(device = %handle.id(), %stale, "opened capabilities no longer reported");
    }
    let plan = plan(&state, registry, handle);
    if plan.is_empty() {
        return Ok(Reconciliation::default());
    }
    Ok(plan.apply(handle, registry))
}
