//! Scoped auto-release registry.
//!
//! Callers register a resource key together with the closure that
//! disposes of the resource. On error unwinding the registry is rolled
//! back to a previously captured save point, running the release
//! closures of everything registered since, in LIFO order.
//!
//! Save points are positions, not validated tokens: restoring to a save
//! point captured after entries that a concurrent restore already
//! popped is undefined. Only strictly LIFO use of save points is safe.

use std::panic::Location;
use std::sync::Mutex;

type ReleaseFn = Box<dyn FnOnce() + Send>;

struct Entry {
    key: u64,
    release: ReleaseFn,
    origin: &'static Location<'static>,
}

/// Ordered registry of resources and their disposal closures.
#[derive(Default)]
pub struct AutoRelease {
    entries: Mutex<Vec<Entry>>,
}

/// Position token returned by [`AutoRelease::save`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SavePoint(usize);

impl AutoRelease {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `key` with its release closure. Duplicate keys are
    /// permitted; removal takes the most recently added match.
    #[track_caller]
    pub fn add<F>(&self, key: u64, release: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let origin = Location::caller();
        self.entries.lock().unwrap().push(Entry {
            key,
            release: Box::new(release),
            origin,
        });
    }

    /// Remove the most recent entry for `key` without running its
    /// release closure. Removing an unregistered key is a programmer
    /// error.
    pub fn remove(&self, key: u64) {
        let mut entries = self.entries.lock().unwrap();
        match entries.iter().rposition(|entry| entry.key == key) {
            Some(index) => {
                entries.remove(index);
            }
            None => panic!("auto-release: remove of unregistered resource {key:#x}"),
        }
    }

    /// Remove the most recent entry for `key` and run its release
    /// closure.
    pub fn release(&self, key: u64) {
        let entry = {
            let mut entries = self.entries.lock().unwrap();
            match entries.iter().rposition(|entry| entry.key == key) {
                Some(index) => entries.remove(index),
                None => panic!("auto-release: release of unregistered resource {key:#x}"),
            }
        };
        (entry.release)();
    }

    /// Capture the current tail as a save point.
    pub fn save(&self) -> SavePoint {
        SavePoint(self.entries.lock().unwrap().len())
    }

    /// Pop every entry added after `save_point`, in LIFO order. When
    /// `run_releases` is set each release closure runs before its entry
    /// is discarded.
    pub fn restore(&self, save_point: SavePoint, run_releases: bool) {
        let popped = {
            let mut entries = self.entries.lock().unwrap();
            let keep = save_point.0.min(entries.len());
            entries.split_off(keep)
        };
        if run_releases {
            for entry in popped.into_iter().rev() {
                tracing::trace!(
                    message = "Releasing resource registered at origin.",
                    key = entry.key,
                    origin = %entry.origin,
                );
                (entry.release)();
            }
        }
    }

    /// Pop and run everything, in LIFO order.
    pub fn release_all(&self) {
        self.restore(SavePoint(0), true);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Origin site recorded for the most recent entry of `key`, for
    /// programmer-error diagnostics.
    pub fn origin(&self, key: u64) -> Option<&'static Location<'static>> {
        let entries = self.entries.lock().unwrap();
        entries
            .iter()
            .rev()
            .find(|entry| entry.key == key)
            .map(|entry| entry.origin)
    }
}

impl std::fmt::Debug for AutoRelease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoRelease").field("len", &self.len()).finish()
    }
}
