//! MoveGuard - per-pin serialization of move sequences
//!
//! ## Purpose
//!
//! - A move sequence on a pin runs to completion before the next starts
//! - Different pins move concurrently
//! - Waiting past the timeout returns `Error::Busy`

use crate::error::{Error, Result};
use crate::models::PinId;
use parking_lot::{Condvar, Mutex};
use std::collections::HashSet;
use std::time::{Duration, Instant};

/// Default wait timeout (10 seconds)
const DEFAULT_WAIT_TIMEOUT_MS: u64 = 10_000;

pub struct MoveGuard {
    /// Pins with a move in progress
    busy: Mutex<HashSet<PinId>>,
    released: Condvar,
    wait_timeout: Duration,
}

impl MoveGuard {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_WAIT_TIMEOUT_MS)
    }

    pub fn with_timeout(timeout_ms: u64) -> Self {
        Self {
            busy: Mutex::new(HashSet::new()),
            released: Condvar::new(),
            wait_timeout: Duration::from_millis(timeout_ms),
        }
    }

    /// Take the pin, waiting up to the timeout for a running move
    ///
    /// The lease releases the pin when dropped.
    pub fn acquire(&self, pin: PinId) -> Result<MoveLease<'_>> {
        let deadline = Instant::now() + self.wait_timeout;
        let mut busy = self.busy.lock();
        while busy.contains(&pin) {
            if self.released.wait_until(&mut busy, deadline).timed_out() && busy.contains(&pin) {
                tracing::warn!(
                    pin = pin,
                    timeout_ms = self.wait_timeout.as_millis() as u64,
                    "Move wait timeout - pin busy"
                );
                return Err(Error::Busy(format!("pin {} is still moving", pin)));
            }
        }
        busy.insert(pin);
        tracing::trace!(pin = pin, "Move lease acquired");
        Ok(MoveLease { guard: self, pin })
    }

    /// Take the pin only if no move is running
    pub fn try_acquire(&self, pin: PinId) -> Option<MoveLease<'_>> {
        let mut busy = self.busy.lock();
        if busy.insert(pin) {
            Some(MoveLease { guard: self, pin })
        } else {
            None
        }
    }

    pub fn busy_count(&self) -> usize {
        self.busy.lock().len()
    }
}

impl Default for MoveGuard {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive right to move one pin
pub struct MoveLease<'a> {
    guard: &'a MoveGuard,
    pin: PinId,
}

impl MoveLease<'_> {
    pub fn pin(&self) -> PinId {
        self.pin
    }
}

impl Drop for MoveLease<'_> {
    fn drop(&mut self) {
        self.guard.busy.lock().remove(&self.pin);
        self.guard.released.notify_all();
        tracing::trace!(pin = self.pin, "Move lease released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_acquire_release() {
        let guard = MoveGuard::new();

        let lease = guard.acquire(31).unwrap();
        assert_eq!(lease.pin(), 31);
        drop(lease);

        let _lease2 = guard.acquire(31).unwrap();
    }

    #[test]
    fn test_try_acquire_busy() {
        let guard = MoveGuard::new();
        let _lease1 = guard.acquire(31).unwrap();
        assert!(guard.try_acquire(31).is_none());
    }

    #[test]
    fn test_different_pins() {
        let guard = MoveGuard::new();
        let lease1 = guard.acquire(31).unwrap();
        let lease2 = guard.acquire(33).unwrap();
        assert_eq!(guard.busy_count(), 2);
        drop(lease1);
        drop(lease2);
        assert_eq!(guard.busy_count(), 0);
    }

    #[test]
    fn test_timeout() {
        let guard = MoveGuard::with_timeout(100);
        let _lease1 = guard.acquire(31).unwrap();
        assert!(matches!(guard.acquire(31), Err(Error::Busy(_))));
    }

    #[test]
    fn test_waiter_proceeds_after_release() {
        let guard = Arc::new(MoveGuard::with_timeout(2_000));
        let lease = guard.acquire(35).unwrap();

        let waiter = {
            let guard = guard.clone();
            thread::spawn(move || guard.acquire(35).map(|l| l.pin()))
        };
        thread::sleep(Duration::from_millis(50));
        drop(lease);

        assert_eq!(waiter.join().unwrap().unwrap(), 35);
    }
}
