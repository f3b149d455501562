//! Crash-ordering fail points.
//!
//! The durability protocol has two seams a test wants to break on purpose:
//! forcing a Commit record and writing a dirty page back to the data file.
//! Arming a fail point makes the next pass through that seam error out,
//! standing in for a crash at exactly that step. Points can also be armed
//! from outside through `MINIDB_FAILPOINTS` (comma-separated names), which
//! reaches an engine running in a spawned process.

use std::cell::Cell;
use std::io;

use crate::error::StorageError;

/// A breakable step in the durability protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    /// A commit fails before its record is forced to stable storage.
    CommitBeforeForce,
    /// A dirty page fails on its way back to the data file.
    FlushBeforePage,
}

impl FailPoint {
    /// Name accepted in `MINIDB_FAILPOINTS`.
    pub fn name(self) -> &'static str {
        match self {
            FailPoint::CommitBeforeForce => "wal.commit.before_force",
            FailPoint::FlushBeforePage => "bpm.flush.before_page",
        }
    }

    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

thread_local! {
    // Per-thread so concurrently running tests stay isolated.
    static ARMED: Cell<u8> = const { Cell::new(0) };
}

pub fn arm(point: FailPoint) {
    ARMED.with(|armed| armed.set(armed.get() | point.bit()));
}

pub fn disarm(point: FailPoint) {
    ARMED.with(|armed| armed.set(armed.get() & !point.bit()));
}

pub fn clear() {
    ARMED.with(|armed| armed.set(0));
}

pub fn is_armed(point: FailPoint) -> bool {
    if ARMED.with(|armed| armed.get() & point.bit() != 0) {
        return true;
    }
    std::env::var("MINIDB_FAILPOINTS")
        .map(|raw| raw.split(',').any(|name| name.trim() == point.name()))
        .unwrap_or(false)
}

/// Errors out when the point is armed; the caller propagates it like any
/// other storage failure.
pub fn trigger(point: FailPoint) -> Result<(), StorageError> {
    if is_armed(point) {
        return Err(StorageError::Io(io::Error::other(format!(
            "fail point triggered: {}",
            point.name()
        ))));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn armed_point_triggers_until_cleared() {
        clear();
        assert!(trigger(FailPoint::CommitBeforeForce).is_ok());

        arm(FailPoint::CommitBeforeForce);
        assert!(trigger(FailPoint::CommitBeforeForce).is_err());
        // Arming one seam leaves the other alone.
        assert!(trigger(FailPoint::FlushBeforePage).is_ok());

        disarm(FailPoint::CommitBeforeForce);
        assert!(trigger(FailPoint::CommitBeforeForce).is_ok());

        arm(FailPoint::FlushBeforePage);
        clear();
        assert!(trigger(FailPoint::FlushBeforePage).is_ok());
    }
}
