//! Readiness multiplexing.
//!
//! [`Readiness`] is the blocking primitive the manager waits on: descriptors are
//! registered with a [`Token`], and `wait` reports the tokens whose descriptors became
//! readable. [`PollReadiness`] implements it with the `polling` crate (epoll on Linux).
//!
//! # Safety
//!
//! `polling` registers raw descriptors, which is `unsafe` because the compiler cannot
//! check that a descriptor outlives its registration. The manager upholds this by
//! unregistering a device before its handle (and with it the descriptor) is dropped.
//!
//! `polling` works in oneshot mode: a reported source is disarmed until it is modified
//! again. `PollReadiness` re-arms every reported source before returning, which gives
//! the level-triggered behaviour the manager expects (a descriptor with unread input
//! is reported again on the next wait).

#![allow(unsafe_code)]

use polling::{Event as PollEvent, Events, Poller};
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::os::fd::{BorrowedFd, RawFd};
use std::time::Duration;
use tracing::warn;

/// Registration key. Tokens are never reused by the manager, so a recycled
/// descriptor number can never be mistaken for a device that was already removed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Token(pub usize);

pub trait Readiness {
    /// Start waiting for `fd` to become readable.
    fn register(&mut self, fd: RawFd, token: Token) -> io::Result<()>;

    /// Stop waiting for `token`. Unknown tokens are an error.
    fn unregister(&mut self, token: Token) -> io::Result<()>;

    /// Block until at least one registered descriptor is readable, `timeout` elapses,
    /// or the wait is interrupted. Ready tokens are appended to `ready`.
    fn wait(&mut self, ready: &mut Vec<Token>, timeout: Option<Duration>) -> io::Result<()>;

    fn is_registered(&self, token: Token) -> bool;

    /// Number of registered descriptors.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// `polling`-backed readiness set.
pub struct PollReadiness {
    poller: Poller,
    events: Events,
    registrations: HashMap<Token, RawFd>,
}

impl PollReadiness {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            poller: Poller::new()?,
            events: Events::new(),
            registrations: HashMap::new(),
        })
    }

    /// Interrupt a blocking wait from another thread.
    pub fn notify(&self) -> io::Result<()> {
        self.poller.notify()
    }
}

impl Readiness for PollReadiness {
    fn register(&mut self, fd: RawFd, token: Token) -> io::Result<()> {
        if self.registrations.contains_key(&token) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "token already registered",
            ));
        }

        // SAFETY: the caller keeps `fd` open until it unregisters `token`.
        unsafe { self.poller.add(fd, PollEvent::readable(token.0))? };
        self.registrations.insert(token, fd);
        Ok(())
    }

    fn unregister(&mut self, token: Token) -> io::Result<()> {
        let fd = self
            .registrations
            .remove(&token)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "token not registered"))?;

        // SAFETY: `fd` was registered by us and is still open (see module docs).
        let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
        self.poller.delete(borrowed)
    }

    fn wait(&mut self, ready: &mut Vec<Token>, timeout: Option<Duration>) -> io::Result<()> {
        self.events.clear();
        match self.poller.wait(&mut self.events, timeout) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e),
        }

        for event in self.events.iter() {
            let token = Token(event.key);
            let Some(&fd) = self.registrations.get(&token) else {
                continue;
            };

            // SAFETY: see `unregister`.
            let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
            match self.poller.modify(borrowed, PollEvent::readable(token.0)) {
                Ok(()) if event.readable => ready.push(token),
                Ok(()) => {}
                // The owner's next read fails on the same descriptor and removes it;
                // other tokens of this wakeup are unaffected.
                Err(e) => {
                    warn!(?token, "cannot re-arm descriptor: {e}");
                    ready.push(token);
                }
            }
        }
        Ok(())
    }

    fn is_registered(&self, token: Token) -> bool {
        self.registrations.contains_key(&token)
    }

    fn len(&self) -> usize {
        self.registrations.len()
    }
}

impl fmt::Debug for PollReadiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollReadiness")
            .field("registrations", &self.registrations.len())
            .finish_non_exhaustive()
    }
}
