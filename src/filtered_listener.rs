use crate::device::DeviceId;
use crate::event::Event;
use crate::eventbus::Reaction;

/// Wraps a reaction and forwards only events matching a user-supplied predicate.
pub struct FilteredReaction {
    predicate: Box<dyn Fn(&DeviceId, &Event) -> bool>,
    inner: Box<dyn Reaction>,
}

impl FilteredReaction {
    pub fn new(
        predicate: impl Fn(&DeviceId, &Event) -> bool + 'static,
        inner: impl Reaction + 'static,
    ) -> Self {
        Self {
            predicate: Box::new(predicate),
            inner: Box::new(inner),
        }
    }
}

impl Reaction for FilteredReaction {
    fn on_event(&mut self, device: &DeviceId, event: &Event) {
        if (self.predicate)(device, event) {
            self.inner.on_event(device, event);
        }
    }
}

/// Forwards key events only on the transition to pressed.
pub struct PressedOnly<R>(pub R);

impl<R: Reaction> Reaction for PressedOnly<R> {
    fn on_event(&mut self, device: &DeviceId, event: &Event) {
        if let Ok(key) = event.key() {
            if key.state == crate::event::KeyState::Pressed {
                self.0.on_event(device, event);
            }
        }
    }
}
