//! Who has which capability open.
//!
//! The registry tracks identities, not handles: the [`Manager`](crate::manager::Manager)
//! owns the handles and this structure answers membership questions about them.
//! Every tracked capability kind has its own set; the `all` set holds every known
//! top-level device regardless of capability.
//!
//! Only the manager mutates a registry. The reconciler proposes changes through a
//! [`Plan`](crate::reconcile::Plan) which is applied after planning completes.

use crate::capability::Capability;
use crate::device::DeviceId;
use crate::snapshot::RegistrySnapshot;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Clone, Debug, Default)]
pub struct Registry {
    all: BTreeSet<DeviceId>,
    kinds: BTreeMap<Capability, BTreeSet<DeviceId>>,
}

impl Registry {
    /// Registry tracking every kind contained in `tracked`.
    pub fn new(tracked: Capability) -> Self {
        Self {
            all: BTreeSet::new(),
            kinds: tracked.kinds().map(|kind| (kind, BTreeSet::new())).collect(),
        }
    }

    /// Tracked kinds, as one mask.
    pub fn tracked(&self) -> Capability {
        self.kinds
            .keys()
            .fold(Capability::empty(), |acc, kind| acc | *kind)
    }

    /// Returns `false` if the device was already known.
    pub fn insert(&mut self, id: DeviceId) -> bool {
        self.all.insert(id)
    }

    pub fn contains(&self, id: &DeviceId) -> bool {
        self.all.contains(id)
    }

    pub fn is_member(&self, kind: Capability, id: &DeviceId) -> bool {
        self.kinds.get(&kind).is_some_and(|set| set.contains(id))
    }

    /// Add `id` to `kind`'s set. Untracked kinds are ignored.
    pub fn add_member(&mut self, kind: Capability, id: &DeviceId) -> bool {
        match self.kinds.get_mut(&kind) {
            Some(set) => set.insert(id.clone()),
            None => false,
        }
    }

    pub fn remove_member(&mut self, kind: Capability, id: &DeviceId) -> bool {
        self.kinds
            .get_mut(&kind)
            .is_some_and(|set| set.remove(id))
    }

    /// Kinds `id` is currently a member of.
    pub fn memberships(&self, id: &DeviceId) -> Capability {
        self.kinds
            .iter()
            .filter(|(_, set)| set.contains(id))
            .fold(Capability::empty(), |acc, (kind, _)| acc | *kind)
    }

    /// Remove `id` from every kind set and from `all`.
    ///
    /// Returns `true` if the device was known.
    pub fn remove(&mut self, id: &DeviceId) -> bool {
        for set in self.kinds.values_mut() {
            set.remove(id);
        }
        self.all.remove(id)
    }

    /// Devices that have `kind` open.
    pub fn members(&self, kind: Capability) -> impl Iterator<Item = &DeviceId> {
        self.kinds.get(&kind).into_iter().flatten()
    }

    pub fn devices(&self) -> impl Iterator<Item = &DeviceId> {
        self.all.iter()
    }

    pub fn len(&self) -> usize {
        self.all.len()
    }

    pub fn is_empty(&self) -> bool {
        self.all.is_empty()
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot::new(
            self.all.len(),
            self.kinds.iter().map(|(kind, set)| (*kind, set.len())),
        )
    }
}
