//! Hotplug discovery.
//!
//! A [`Monitor`] is the enumeration mechanism's contract: a pollable descriptor plus a
//! `poll` that yields one newly seen device path at a time. One readiness wakeup on
//! the descriptor can stand for several queued devices, so [`HotplugMonitor::drain`]
//! keeps polling until the monitor reports nothing pending.
//!
//! A monitor whose drains fail [`MAX_CONSECUTIVE_FAILURES`] times in a row is
//! [`MonitorState::Failed`]; the manager stops waiting on it.

use std::io;
use std::os::fd::RawFd;
use tracing::{debug, warn};

/// Failed drains in a row before a monitor is given up.
pub const MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// What a monitor should report.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MonitorOptions {
    /// Report devices that are already present when the monitor is created.
    pub enumerate_existing: bool,
    /// Keep reporting devices that appear afterwards.
    pub watch_hotplug: bool,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            enumerate_existing: true,
            watch_hotplug: true,
        }
    }
}

/// Enumeration contract.
pub trait Monitor {
    /// Next newly discovered device path, or `None` when nothing is pending.
    fn poll(&mut self) -> io::Result<Option<String>>;

    /// Descriptor that becomes readable when `poll` has work.
    fn as_raw_fd(&self) -> RawFd;
}

/// Where a monitor is in its drain cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    Draining,
    /// Polling kept failing. Drains return nothing.
    Failed,
}

/// Drains a [`Monitor`] to completion.
pub struct HotplugMonitor {
    inner: Box<dyn Monitor>,
    state: MonitorState,
    failures: u32,
}

impl HotplugMonitor {
    pub fn new(inner: Box<dyn Monitor>) -> Self {
        Self {
            inner,
            state: MonitorState::Idle,
            failures: 0,
        }
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    pub fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }

    pub fn is_failed(&self) -> bool {
        self.state == MonitorState::Failed
    }

    /// Poll until "none pending" and return every path discovered.
    ///
    /// A poll error ends the drain early; paths collected so far are still returned.
    pub fn drain(&mut self) -> Vec<String> {
        if self.is_failed() {
            return Vec::new();
        }
        self.state = MonitorState::Draining;
        let mut found = Vec::new();
        let mut failed = false;
        loop {
            match self.inner.poll() {
                Ok(Some(path)) => {
                    debug!(%path, "monitor reported device");
                    self.failures = 0;
                    found.push(path);
                }
                Ok(None) => {
                    self.failures = 0;
                    break;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    self.failures += 1;
                    warn!(failures = self.failures, "monitor poll failed: {e}");
                    failed = self.failures >= MAX_CONSECUTIVE_FAILURES;
                    break;
                }
            }
        }
        self.state = if failed {
            MonitorState::Failed
        } else {
            MonitorState::Idle
        };
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct Queue(VecDeque<io::Result<Option<String>>>);

    impl Monitor for Queue {
        fn poll(&mut self) -> io::Result<Option<String>> {
            self.0.pop_front().unwrap_or(Ok(None))
        }
        fn as_raw_fd(&self) -> RawFd {
            -1
        }
    }

    #[test]
    fn drains_until_none_pending() {
        let queue = Queue(
            ["/a", "/b", "/c"]
                .iter()
                .map(|p| Ok(Some(p.to_string())))
                .collect(),
        );
        let mut mon = HotplugMonitor::new(Box::new(queue));
        assert_eq!(mon.state(), MonitorState::Idle);
        assert_eq!(mon.drain(), vec!["/a", "/b", "/c"]);
        assert_eq!(mon.state(), MonitorState::Idle);
        assert!(mon.drain().is_empty());
    }

    #[test]
    fn error_ends_drain() {
        let queue = Queue(VecDeque::from(vec![
            Ok(Some("/a".to_string())),
            Err(io::Error::other("socket closed")),
            Ok(Some("/b".to_string())),
        ]));
        let mut mon = HotplugMonitor::new(Box::new(queue));
        assert_eq!(mon.drain(), vec!["/a"]);
        assert_eq!(mon.drain(), vec!["/b"]);
        assert!(!mon.is_failed());
    }

    #[test]
    fn repeated_errors_fail_the_monitor() {
        let mut results: VecDeque<_> = (0..MAX_CONSECUTIVE_FAILURES - 1)
            .map(|_| Err(io::Error::other("socket closed")))
            .collect();
        // A successful poll resets the count.
        results.push_back(Ok(None));
        results.extend((0..MAX_CONSECUTIVE_FAILURES).map(|_| Err(io::Error::other("socket closed"))));
        results.push_back(Ok(Some("/late".to_string())));
        let mut mon = HotplugMonitor::new(Box::new(Queue(results)));

        for _ in 0..MAX_CONSECUTIVE_FAILURES {
            assert!(mon.drain().is_empty());
            assert_eq!(mon.state(), MonitorState::Idle);
        }
        for _ in 1..MAX_CONSECUTIVE_FAILURES {
            mon.drain();
            assert!(!mon.is_failed());
        }
        mon.drain();
        assert_eq!(mon.state(), MonitorState::Failed);
        assert!(mon.drain().is_empty());
    }
}
