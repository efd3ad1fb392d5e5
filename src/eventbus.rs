//! Application reactions to decoded events.
//!
//! The manager handles watch and gone events itself; every other event is handed to
//! the [`EventRouter`], which delivers it to each enabled reaction whose filter and
//! device tag match. The router keeps no state about events. Released key
//! transitions are delivered like pressed ones; reactions that only care about
//! presses can wrap themselves in [`PressedOnly`](crate::filtered_listener::PressedOnly).

use crate::device::DeviceId;
use crate::event::{Event, EventKind};
use std::collections::BTreeMap;

/// Something that reacts to routed events.
pub trait Reaction {
    fn on_event(&mut self, device: &DeviceId, event: &Event);
}

impl<F> Reaction for F
where
    F: FnMut(&DeviceId, &Event),
{
    fn on_event(&mut self, device: &DeviceId, event: &Event) {
        self(device, event)
    }
}

/// Which events a reaction wants.
#[derive(Debug, Clone, Copy)]
pub enum EventFilter {
    All,
    /// Key events from the remote and every extension.
    Keys,
    Kind(EventKind),
    Custom(fn(&Event) -> bool),
}

impl EventFilter {
    pub fn matches(&self, event: &Event) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Keys => event.kind().is_key(),
            EventFilter::Kind(kind) => event.kind() == *kind,
            EventFilter::Custom(f) => f(event),
        }
    }
}

/// Handle returned by [`EventRouter::add_reaction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReactionId(u64);

struct ReactionEntry {
    reaction: Box<dyn Reaction>,
    enabled: bool,
    filter: EventFilter,
    device: Option<DeviceId>,
}

#[derive(Default)]
pub struct EventRouter {
    next_id: u64,
    reactions: BTreeMap<ReactionId, ReactionEntry>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a reaction, optionally limited to one device.
    pub fn add_reaction(
        &mut self,
        reaction: impl Reaction + 'static,
        filter: EventFilter,
        device: Option<DeviceId>,
    ) -> ReactionId {
        let id = ReactionId(self.next_id);
        self.next_id += 1;
        self.reactions.insert(
            id,
            ReactionEntry {
                reaction: Box::new(reaction),
                enabled: true,
                filter,
                device,
            },
        );
        id
    }

    pub fn enable(&mut self, id: ReactionId) {
        if let Some(entry) = self.reactions.get_mut(&id) {
            entry.enabled = true;
        }
    }

    /// Mutes a reaction without removing it.
    pub fn disable(&mut self, id: ReactionId) {
        if let Some(entry) = self.reactions.get_mut(&id) {
            entry.enabled = false;
        }
    }

    pub fn remove_reaction(&mut self, id: ReactionId) -> bool {
        self.reactions.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.reactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reactions.is_empty()
    }

    /// Delivers `event` to every active, matching reaction, in registration order.
    /// Returns how many reactions received it.
    pub fn route(&mut self, device: &DeviceId, event: &Event) -> usize {
        let mut delivered = 0;
        for entry in self.reactions.values_mut() {
            if !entry.enabled {
                continue;
            }
            if let Some(ref wanted) = entry.device {
                if wanted != device {
                    continue;
                }
            }
            if entry.filter.matches(event) {
                entry.reaction.on_event(device, event);
                delivered += 1;
            }
        }
        delivered
    }
}
