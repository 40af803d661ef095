//! Idle/Running state of the monitoring cycle
//!
//! The state is an atomically swapped enum. Acquiring it hands out a
//! [`CycleGuard`] that restores `Idle` on drop, including when the cycle
//! returns early or panics.

use serde::Serialize;
use std::sync::atomic::{AtomicU8, Ordering};

/// Orchestrator state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum CycleState {
    Idle = 0,
    Running = 1,
}

impl CycleState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => CycleState::Running,
            _ => CycleState::Idle,
        }
    }
}

/// Mutual-exclusion cell for monitoring cycles
#[derive(Debug)]
pub struct CycleFlag {
    state: AtomicU8,
}

impl Default for CycleFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl CycleFlag {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(CycleState::Idle as u8),
        }
    }

    pub fn state(&self) -> CycleState {
        CycleState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move Idle -> Running, or `None` when a cycle is already running
    pub fn try_acquire(&self) -> Option<CycleGuard<'_>> {
        self.state
            .compare_exchange(
                CycleState::Idle as u8,
                CycleState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .ok()
            .map(|_| CycleGuard { flag: self })
    }
}

/// Holds the Running state for the lifetime of one cycle
#[derive(Debug)]
pub struct CycleGuard<'a> {
    flag: &'a CycleFlag,
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.flag
            .state
            .store(CycleState::Idle as u8, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_is_refused() {
        let flag = CycleFlag::new();
        assert_eq!(flag.state(), CycleState::Idle);

        let guard = flag.try_acquire();
        assert!(guard.is_some());
        assert_eq!(flag.state(), CycleState::Running);
        assert!(flag.try_acquire().is_none());

        drop(guard);
        assert_eq!(flag.state(), CycleState::Idle);
        assert!(flag.try_acquire().is_some());
    }

    #[test]
    fn test_panic_releases_flag() {
        let flag = CycleFlag::new();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = flag.try_acquire().unwrap();
            panic!("cycle blew up");
        }));

        assert!(result.is_err());
        assert_eq!(flag.state(), CycleState::Idle);
    }
}
