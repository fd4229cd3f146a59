//! Process-wide server allocation pool.
//!
//! Bounds concurrent back-end sessions per host. Acquisition blocks up
//! to a timeout and fails with "too many connections" on exhaustion;
//! dropping the lease frees the slot and wakes one waiter.

use std::collections::HashMap;
use std::sync::{Condvar, Mutex, OnceLock};
use std::time::{Duration, Instant};

use crate::error::{self, Result};

struct PoolState {
    connections: HashMap<String, usize>,
}

pub struct ServerPool {
    state: Mutex<PoolState>,
    released: Condvar,
}

static POOL: OnceLock<ServerPool> = OnceLock::new();

impl ServerPool {
    pub fn instance() -> &'static ServerPool {
        POOL.get_or_init(|| ServerPool {
            state: Mutex::new(PoolState {
                connections: HashMap::new(),
            }),
            released: Condvar::new(),
        })
    }

    /// Claim a session slot on `host`, waiting up to `timeout` for one
    /// to free up.
    pub fn acquire(&'static self, host: &str, max: usize, timeout: Duration) -> Result<ServerLease> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().unwrap();
        loop {
            let count = state.connections.get(host).copied().unwrap_or(0);
            if count < max.max(1) {
                *state.connections.entry(host.to_string()).or_insert(0) += 1;
                return Ok(ServerLease {
                    pool: self,
                    host: host.to_string(),
                });
            }
            let now = Instant::now();
            if now >= deadline {
                return error::TooManyConnectionsSnafu { host }.fail();
            }
            let (guard, _) = self.released.wait_timeout(state, deadline - now).unwrap();
            state = guard;
        }
    }

    fn release(&self, host: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(count) = state.connections.get_mut(host) {
            *count -= 1;
            if *count == 0 {
                state.connections.remove(host);
            }
        }
        self.released.notify_one();
    }

    /// Count of live sessions on `host`.
    pub fn active(&self, host: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .connections
            .get(host)
            .copied()
            .unwrap_or(0)
    }

    /// Drop all bookkeeping. Called at process shutdown; any live
    /// lease dropped afterwards is a no-op for its host entry.
    pub fn shutdown(&self) {
        self.state.lock().unwrap().connections.clear();
        self.released.notify_all();
    }
}

/// One claimed session slot; freed on drop.
pub struct ServerLease {
    pool: &'static ServerPool,
    host: String,
}

impl Drop for ServerLease {
    fn drop(&mut self) {
        self.pool.release(&self.host);
    }
}

impl std::fmt::Debug for ServerLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerLease").field("host", &self.host).finish()
    }
}
