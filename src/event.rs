//! Decoded controller events.
//!
//! A transport fills one [`Event`] per dispatch call. The event is a timestamp plus a
//! [`Payload`], which is a proper sum type: exactly one payload shape exists per
//! [`EventKind`].
//!
//! ## Payload conventions
//! - **Keys:** a [`KeyCode`] plus a [`KeyState`]. Released and pressed transitions are
//!   both delivered; auto-repeat is reported as [`KeyState::Repeated`].
//! - **Motion / multi-axis:** up to four [`Abs`] triplets. Slots carry individual
//!   validity so sparse sources (IR tracking points) can report only what they see.
//! - **Watch / Gone:** no payload. Watch means the device's available capabilities
//!   changed; Gone means the device was removed for good.
//!
//! ### Tag-checked access
//! Pattern matching on [`Payload`] is the preferred way to read an event. The
//! accessor helpers ([`Event::key`], [`Event::abs`], ...) exist for callers that want
//! field-style access; they return [`Error::WrongEventKind`] rather than a default
//! value when used against the wrong kind.

use crate::error::{Error, Result};
use std::fmt;

/// Number of axis slots a multi-axis payload can hold.
pub const ABS_SLOTS: usize = 4;

/// Seconds and microseconds, as reported by the transport.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    pub sec: i64,
    pub usec: i64,
}

impl Timestamp {
    pub fn new(sec: i64, usec: i64) -> Self {
        Self { sec, usec }
    }
}

/// Key (button) identifiers shared by the remote and its extensions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KeyCode {
    Left,
    Right,
    Up,
    Down,
    A,
    B,
    Plus,
    Minus,
    Home,
    One,
    Two,
    X,
    Y,
    TL,
    TR,
    ZL,
    ZR,
    Thumbl,
    Thumbr,
    C,
    Z,
    StrumBarUp,
    StrumBarDown,
    FretFarUp,
    FretUp,
    FretMid,
    FretLow,
    FretFarLow,
    /// A code this crate has no name for.
    Other(u32),
}

impl From<u32> for KeyCode {
    fn from(code: u32) -> Self {
        use KeyCode::*;
        match code {
            0 => Left,
            1 => Right,
            2 => Up,
            3 => Down,
            4 => A,
            5 => B,
            6 => Plus,
            7 => Minus,
            8 => Home,
            9 => One,
            10 => Two,
            11 => X,
            12 => Y,
            13 => TL,
            14 => TR,
            15 => ZL,
            16 => ZR,
            17 => Thumbl,
            18 => Thumbr,
            19 => C,
            20 => Z,
            21 => StrumBarUp,
            22 => StrumBarDown,
            23 => FretFarUp,
            24 => FretUp,
            25 => FretMid,
            26 => FretLow,
            27 => FretFarLow,
            other => Other(other),
        }
    }
}

/// Key transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KeyState {
    Released,
    Pressed,
    Repeated,
}

impl KeyState {
    /// `true` for a press or an auto-repeat.
    pub fn is_down(self) -> bool {
        !matches!(self, KeyState::Released)
    }
}

impl From<u32> for KeyState {
    fn from(state: u32) -> Self {
        match state {
            0 => KeyState::Released,
            2 => KeyState::Repeated,
            _ => KeyState::Pressed,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct KeyPayload {
    pub code: KeyCode,
    pub state: KeyState,
}

impl KeyPayload {
    pub fn new(code: KeyCode, state: KeyState) -> Self {
        Self { code, state }
    }

    pub fn pressed(code: KeyCode) -> Self {
        Self::new(code, KeyState::Pressed)
    }

    pub fn released(code: KeyCode) -> Self {
        Self::new(code, KeyState::Released)
    }
}

/// One absolute sample triplet.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Abs {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Abs {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }
}

/// Up to [`ABS_SLOTS`] triplets with per-slot validity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct AbsSamples {
    slots: [Option<Abs>; ABS_SLOTS],
}

impl AbsSamples {
    /// All slots from `values` are valid; remaining slots are not.
    pub fn from_slice(values: &[Abs]) -> Self {
        let mut samples = Self::default();
        for (slot, value) in samples.slots.iter_mut().zip(values) {
            *slot = Some(*value);
        }
        samples
    }

    /// Sparse construction, e.g. IR points where only some sources are visible.
    pub fn sparse(slots: [Option<Abs>; ABS_SLOTS]) -> Self {
        Self { slots }
    }

    pub fn get(&self, index: usize) -> Result<Option<Abs>> {
        self.slots
            .get(index)
            .copied()
            .ok_or(Error::NoSuchSlot { index })
    }

    pub fn set(&mut self, index: usize, value: Abs) -> Result<()> {
        let slot = self
            .slots
            .get_mut(index)
            .ok_or(Error::NoSuchSlot { index })?;
        *slot = Some(value);
        Ok(())
    }

    /// Iterate `(slot, value)` for valid slots only.
    pub fn valid(&self) -> impl Iterator<Item = (usize, Abs)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.map(|abs| (i, abs)))
    }
}

/// Event tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    Key,
    Accel,
    Ir,
    BalanceBoard,
    BalanceBoardKey,
    MotionPlus,
    ProControllerKey,
    ProControllerMove,
    Watch,
    ClassicControllerKey,
    ClassicControllerMove,
    NunchukKey,
    NunchukMove,
    DrumsKey,
    DrumsMove,
    GuitarKey,
    GuitarMove,
    Gone,
}

impl EventKind {
    /// Kinds whose payload is a [`KeyPayload`].
    pub fn is_key(self) -> bool {
        matches!(
            self,
            EventKind::Key
                | EventKind::BalanceBoardKey
                | EventKind::ProControllerKey
                | EventKind::ClassicControllerKey
                | EventKind::NunchukKey
                | EventKind::DrumsKey
                | EventKind::GuitarKey
        )
    }

    /// Kinds handled by the manager itself rather than application reactions.
    pub fn is_lifecycle(self) -> bool {
        matches!(self, EventKind::Watch | EventKind::Gone)
    }
}

/// Event payload; one variant per [`EventKind`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Payload {
    Key(KeyPayload),
    Accel(Abs),
    Ir(AbsSamples),
    BalanceBoard(AbsSamples),
    BalanceBoardKey(KeyPayload),
    MotionPlus(Abs),
    ProControllerKey(KeyPayload),
    ProControllerMove(AbsSamples),
    Watch,
    ClassicControllerKey(KeyPayload),
    ClassicControllerMove(AbsSamples),
    NunchukKey(KeyPayload),
    NunchukMove(AbsSamples),
    DrumsKey(KeyPayload),
    DrumsMove(AbsSamples),
    GuitarKey(KeyPayload),
    GuitarMove(AbsSamples),
    Gone,
}

impl Payload {
    pub fn kind(&self) -> EventKind {
        match self {
            Payload::Key(_) => EventKind::Key,
            Payload::Accel(_) => EventKind::Accel,
            Payload::Ir(_) => EventKind::Ir,
            Payload::BalanceBoard(_) => EventKind::BalanceBoard,
            Payload::BalanceBoardKey(_) => EventKind::BalanceBoardKey,
            Payload::MotionPlus(_) => EventKind::MotionPlus,
            Payload::ProControllerKey(_) => EventKind::ProControllerKey,
            Payload::ProControllerMove(_) => EventKind::ProControllerMove,
            Payload::Watch => EventKind::Watch,
            Payload::ClassicControllerKey(_) => EventKind::ClassicControllerKey,
            Payload::ClassicControllerMove(_) => EventKind::ClassicControllerMove,
            Payload::NunchukKey(_) => EventKind::NunchukKey,
            Payload::NunchukMove(_) => EventKind::NunchukMove,
            Payload::DrumsKey(_) => EventKind::DrumsKey,
            Payload::DrumsMove(_) => EventKind::DrumsMove,
            Payload::GuitarKey(_) => EventKind::GuitarKey,
            Payload::GuitarMove(_) => EventKind::GuitarMove,
            Payload::Gone => EventKind::Gone,
        }
    }

    fn key_ref(&self) -> Option<&KeyPayload> {
        match self {
            Payload::Key(k)
            | Payload::BalanceBoardKey(k)
            | Payload::ProControllerKey(k)
            | Payload::ClassicControllerKey(k)
            | Payload::NunchukKey(k)
            | Payload::DrumsKey(k)
            | Payload::GuitarKey(k) => Some(k),
            _ => None,
        }
    }

    fn samples(&self) -> Option<&AbsSamples> {
        match self {
            Payload::Ir(s)
            | Payload::BalanceBoard(s)
            | Payload::ProControllerMove(s)
            | Payload::ClassicControllerMove(s)
            | Payload::NunchukMove(s)
            | Payload::DrumsMove(s)
            | Payload::GuitarMove(s) => Some(s),
            _ => None,
        }
    }

    fn key_mut(&mut self) -> Option<&mut KeyPayload> {
        match self {
            Payload::Key(k)
            | Payload::BalanceBoardKey(k)
            | Payload::ProControllerKey(k)
            | Payload::ClassicControllerKey(k)
            | Payload::NunchukKey(k)
            | Payload::DrumsKey(k)
            | Payload::GuitarKey(k) => Some(k),
            _ => None,
        }
    }

    fn samples_mut(&mut self) -> Option<&mut AbsSamples> {
        match self {
            Payload::Ir(s)
            | Payload::BalanceBoard(s)
            | Payload::ProControllerMove(s)
            | Payload::ClassicControllerMove(s)
            | Payload::NunchukMove(s)
            | Payload::DrumsMove(s)
            | Payload::GuitarMove(s) => Some(s),
            _ => None,
        }
    }
}

/// One decoded event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Event {
    pub time: Timestamp,
    pub payload: Payload,
}

impl Event {
    pub fn new(payload: Payload) -> Self {
        Self {
            time: Timestamp::default(),
            payload,
        }
    }

    pub fn at(time: Timestamp, payload: Payload) -> Self {
        Self { time, payload }
    }

    pub fn watch() -> Self {
        Self::new(Payload::Watch)
    }

    pub fn gone() -> Self {
        Self::new(Payload::Gone)
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    pub fn time(&self) -> Timestamp {
        self.time
    }

    pub fn set_time(&mut self, time: Timestamp) {
        self.time = time;
    }

    /// Key payload of any key-carrying kind.
    pub fn key(&self) -> Result<KeyPayload> {
        self.payload
            .key_ref()
            .copied()
            .ok_or(Error::WrongEventKind {
                expected: "a key event",
                actual: self.kind(),
            })
    }

    pub fn set_key(&mut self, key: KeyPayload) -> Result<()> {
        let actual = self.kind();
        let slot = self.payload.key_mut().ok_or(Error::WrongEventKind {
            expected: "a key event",
            actual,
        })?;
        *slot = key;
        Ok(())
    }

    /// Absolute triplet at `index`.
    ///
    /// Single-triplet kinds (accelerometer, motion plus) only have slot 0. Reading an
    /// invalid sparse slot (an IR point that is not visible) returns `Ok(None)`.
    pub fn abs(&self, index: usize) -> Result<Option<Abs>> {
        match &self.payload {
            Payload::Accel(abs) | Payload::MotionPlus(abs) => match index {
                0 => Ok(Some(*abs)),
                _ => Err(Error::NoSuchSlot { index }),
            },
            payload => match payload.samples() {
                Some(samples) => samples.get(index),
                None => Err(Error::WrongEventKind {
                    expected: "a motion event",
                    actual: self.kind(),
                }),
            },
        }
    }

    pub fn set_abs(&mut self, index: usize, value: Abs) -> Result<()> {
        let actual = self.kind();
        match &mut self.payload {
            Payload::Accel(abs) | Payload::MotionPlus(abs) => match index {
                0 => {
                    *abs = value;
                    Ok(())
                }
                _ => Err(Error::NoSuchSlot { index }),
            },
            payload => match payload.samples_mut() {
                Some(samples) => samples.set(index, value),
                None => Err(Error::WrongEventKind {
                    expected: "a motion event",
                    actual,
                }),
            },
        }
    }

    /// Whether the IR point at `index` is currently visible.
    pub fn ir_is_valid(&self, index: usize) -> Result<bool> {
        match &self.payload {
            Payload::Ir(samples) => Ok(samples.get(index)?.is_some()),
            _ => Err(Error::WrongEventKind {
                expected: "an IR event",
                actual: self.kind(),
            }),
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}.{:06}] ", self.time.sec, self.time.usec)?;
        match &self.payload {
            Payload::Watch => f.write_str("watch"),
            Payload::Gone => f.write_str("gone"),
            Payload::Accel(abs) | Payload::MotionPlus(abs) => {
                write!(f, "{:?} ({}, {}, {})", self.kind(), abs.x, abs.y, abs.z)
            }
            other => match self.key() {
                Ok(key) => write!(f, "{:?} {:?} {:?}", other.kind(), key.code, key.state),
                Err(_) => {
                    write!(f, "{:?}", other.kind())?;
                    if let Some(samples) = other.samples() {
                        for (i, abs) in samples.valid() {
                            write!(f, " #{i}=({}, {}, {})", abs.x, abs.y, abs.z)?;
                        }
                    }
                    Ok(())
                }
            },
        }
    }
}
