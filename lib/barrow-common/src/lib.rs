//! Concurrency and container primitives shared by the barrow daemon:
//! the read/write semaphore, the scoped auto-release registry, the
//! bounded message queue, the byte-keyed dictionary and the entry
//! pattern lists.

use std::time::{Duration, Instant};

pub mod auto_release;
pub mod dictionary;
pub mod msg_queue;
pub mod pattern_list;
pub mod semaphore;

pub use auto_release::{AutoRelease, SavePoint};
pub use dictionary::Dictionary;
pub use msg_queue::MsgQueue;
pub use pattern_list::{EntryKind, EntryList, MatchMode, PatternKind};
pub use semaphore::{Semaphore, SemaphoreGuard, SemaphoreLock, SignalMode};

/// How long a blocking primitive is allowed to wait.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Timeout {
    Forever,
    After(Duration),
}

impl Timeout {
    pub fn millis(ms: u64) -> Self {
        Timeout::After(Duration::from_millis(ms))
    }

    /// Absolute deadline for this timeout, `None` meaning wait forever.
    pub(crate) fn deadline(self) -> Option<Instant> {
        match self {
            Timeout::Forever => None,
            Timeout::After(duration) => Some(Instant::now() + duration),
        }
    }
}

impl From<Duration> for Timeout {
    fn from(duration: Duration) -> Self {
        Timeout::After(duration)
    }
}
