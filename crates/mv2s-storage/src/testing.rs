//! Fault-injection helpers for crash-recovery tests.

use mv2s_core::{MvError, MvResult};
use std::cell::Cell;

/// Counts down injected failures: fires once the configured call index is
/// reached, then resets so subsequent operations succeed again.
#[derive(Default)]
pub struct FaultSchedule {
    fail_at_call: Cell<Option<usize>>,
    call_count: Cell<usize>,
}

impl FaultSchedule {
    /// Build a schedule that fails the Nth call to [`FaultSchedule::check`]
    /// (zero-indexed) and succeeds on every other call.
    pub fn fail_on_call(n: usize) -> Self {
        Self {
            fail_at_call: Cell::new(Some(n)),
            call_count: Cell::new(0),
        }
    }

    /// A schedule that never injects a failure.
    pub fn never() -> Self {
        Self {
            fail_at_call: Cell::new(None),
            call_count: Cell::new(0),
        }
    }

    /// Advance the call counter and return an error if this call is the
    /// scheduled failure point.
    pub fn check(&self, op: &str) -> MvResult<()> {
        let idx = self.call_count.get();
        self.call_count.set(idx + 1);
        if self.fail_at_call.get() == Some(idx) {
            return Err(MvError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("injected fault at {op} (call {idx})"),
            )));
        }
        Ok(())
    }
}

/// Truncate a would-be full write to simulate a torn/partial write, as
/// happens when a process is killed mid-`write(2)`.
pub fn torn_write(data: &[u8], keep_bytes: usize) -> Vec<u8> {
    data[..keep_bytes.min(data.len())].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fault_schedule_fires_once_at_configured_call() {
        let sched = FaultSchedule::fail_on_call(1);
        assert!(sched.check("a").is_ok());
        assert!(sched.check("b").is_err());
        assert!(sched.check("c").is_ok());
    }

    #[test]
    fn torn_write_truncates() {
        let data = b"0123456789".to_vec();
        assert_eq!(torn_write(&data, 4), b"0123");
        assert_eq!(torn_write(&data, 100), data);
    }
}
