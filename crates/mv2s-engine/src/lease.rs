//! Named writer lease with FIFO handoff.

use crate::config::WriterLeasePolicy;
use mv2s_core::{MvError, MvResult};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

struct LeaseState {
    held: bool,
    queue: VecDeque<u64>,
}

/// Serializes at most one outstanding writer lease, handing off to waiters
/// in the order they queued.
pub struct WriterLeaseManager {
    state: Mutex<LeaseState>,
    cv: Condvar,
    next_ticket: AtomicU64,
}

impl Default for WriterLeaseManager {
    fn default() -> Self {
        Self {
            state: Mutex::new(LeaseState {
                held: false,
                queue: VecDeque::new(),
            }),
            cv: Condvar::new(),
            next_ticket: AtomicU64::new(0),
        }
    }
}

impl WriterLeaseManager {
    /// Acquire the lease under the given policy.
    pub fn acquire(self: &Arc<Self>, policy: WriterLeasePolicy) -> MvResult<LeaseHandle> {
        let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        state.queue.push_back(ticket);

        let deadline = match policy {
            WriterLeasePolicy::Timeout(d) => Some(Instant::now() + d),
            _ => None,
        };

        loop {
            let front_is_us = state.queue.front() == Some(&ticket);
            if !state.held && front_is_us {
                state.held = true;
                state.queue.pop_front();
                return Ok(LeaseHandle {
                    manager: Arc::clone(self),
                });
            }

            match policy {
                WriterLeasePolicy::Fail => {
                    state.queue.retain(|t| *t != ticket);
                    return Err(MvError::WriterBusy);
                }
                WriterLeasePolicy::Wait => {
                    self.cv.wait(&mut state);
                }
                WriterLeasePolicy::Timeout(_) => {
                    let deadline = deadline.unwrap();
                    let now = Instant::now();
                    if now >= deadline {
                        state.queue.retain(|t| *t != ticket);
                        return Err(MvError::WriterTimeout);
                    }
                    let timed_out = self.cv.wait_for(&mut state, deadline - now).timed_out();
                    if timed_out && state.queue.front() != Some(&ticket) {
                        state.queue.retain(|t| *t != ticket);
                        return Err(MvError::WriterTimeout);
                    }
                }
            }
        }
    }

    fn release(&self) {
        let mut state = self.state.lock();
        state.held = false;
        drop(state);
        self.cv.notify_all();
    }
}

/// RAII handle to an acquired writer lease; releases on drop, waking the
/// next FIFO waiter.
pub struct LeaseHandle {
    manager: Arc<WriterLeaseManager>,
}

impl Drop for LeaseHandle {
    fn drop(&mut self) {
        self.manager.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_fail_policy_acquire_errors_while_held() {
        let mgr = Arc::new(WriterLeaseManager::default());
        let lease = mgr.acquire(WriterLeasePolicy::Fail).unwrap();
        assert!(mgr.acquire(WriterLeasePolicy::Fail).is_err());
        drop(lease);
        assert!(mgr.acquire(WriterLeasePolicy::Fail).is_ok());
    }
}
