//! Read/write semaphore with modification signaling.
//!
//! Any number of readers may hold the semaphore at once; a writer holds
//! it exclusively and may re-acquire it recursively. Threads that hold
//! the semaphore can wait for a "modified" broadcast, temporarily giving
//! up their whole acquisition depth and getting it back before the call
//! returns. Pending write requests do not block new readers; only an
//! active writer does.
//!
//! In debug builds every live semaphore is tracked in a process-wide
//! registry and each acquisition runs a transitive cycle check over the
//! holder/pending graph, aborting with a diagnostic when a deadlock is
//! certain.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::thread::{self, ThreadId};
use std::time::Instant;

use crate::Timeout;

/// Kind of acquisition requested.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SemaphoreLock {
    Read,
    ReadWrite,
}

/// How many waiters a modification signal wakes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignalMode {
    One,
    All,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LockType {
    None,
    Read,
    ReadWrite,
}

struct State {
    lock_type: LockType,
    read_lock_count: usize,
    read_write_lock_count: usize,
    /// The single writing owner while `lock_type == ReadWrite`.
    owner: Option<ThreadId>,
    /// Per-thread read depth, needed to restore acquisitions in
    /// `wait_modified` and to validate `release`.
    readers: HashMap<ThreadId, usize>,
    /// Bumped on every modification signal and writer-to-free
    /// transition; `wait_modified` waits for a change.
    modified_generation: u64,
    end: bool,
}

pub struct Semaphore {
    name: &'static str,
    id: u64,
    state: Mutex<State>,
    /// Readers and `wait_modified` callers block here.
    modified: Condvar,
    /// Writers block here until the last reader is gone.
    read_lock_zero: Condvar,
    read_requests: AtomicUsize,
    read_write_requests: AtomicUsize,
}

static NEXT_SEMAPHORE_ID: AtomicU64 = AtomicU64::new(1);

impl Semaphore {
    pub fn new(name: &'static str) -> Self {
        let id = NEXT_SEMAPHORE_ID.fetch_add(1, Ordering::Relaxed);
        #[cfg(debug_assertions)]
        deadlock::register(id, name);
        Semaphore {
            name,
            id,
            state: Mutex::new(State {
                lock_type: LockType::None,
                read_lock_count: 0,
                read_write_lock_count: 0,
                owner: None,
                readers: HashMap::new(),
                modified_generation: 0,
                end: false,
            }),
            modified: Condvar::new(),
            read_lock_zero: Condvar::new(),
            read_requests: AtomicUsize::new(0),
            read_write_requests: AtomicUsize::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Acquire the semaphore, blocking up to `timeout`. Returns false on
    /// timeout with all request accounting rolled back.
    ///
    /// The writing owner may re-acquire recursively (either kind just
    /// deepens the write lock). A reader requesting `ReadWrite` is a
    /// programmer error and panics.
    #[track_caller]
    pub fn acquire(&self, kind: SemaphoreLock, timeout: Timeout) -> bool {
        match kind {
            SemaphoreLock::Read => self.acquire_read(timeout),
            SemaphoreLock::ReadWrite => self.acquire_read_write(timeout),
        }
    }

    /// Acquire and return a guard that releases on drop.
    #[track_caller]
    pub fn lock(&self, kind: SemaphoreLock) -> SemaphoreGuard<'_> {
        let acquired = self.acquire(kind, Timeout::Forever);
        debug_assert!(acquired);
        SemaphoreGuard { semaphore: self }
    }

    /// Like [`lock`](Self::lock) with a timeout; `None` on timeout.
    #[track_caller]
    pub fn try_lock(&self, kind: SemaphoreLock, timeout: Timeout) -> Option<SemaphoreGuard<'_>> {
        if self.acquire(kind, timeout) {
            Some(SemaphoreGuard { semaphore: self })
        } else {
            None
        }
    }

    fn acquire_read(&self, timeout: Timeout) -> bool {
        let me = thread::current().id();
        self.read_requests.fetch_add(1, Ordering::SeqCst);

        let mut state = self.state.lock().unwrap();

        // The writing owner deepens its write lock instead.
        if state.owner == Some(me) {
            state.read_write_lock_count += 1;
            self.read_requests.fetch_sub(1, Ordering::SeqCst);
            return true;
        }

        #[cfg(debug_assertions)]
        deadlock::begin_pending(self.id, self.name, me);

        let deadline = timeout.deadline();
        while state.read_write_lock_count > 0 {
            match wait_deadline(&self.modified, state, deadline) {
                (s, false) => state = s,
                (_, true) => {
                    self.read_requests.fetch_sub(1, Ordering::SeqCst);
                    #[cfg(debug_assertions)]
                    deadlock::end_pending(me);
                    return false;
                }
            }
        }

        state.lock_type = LockType::Read;
        state.read_lock_count += 1;
        *state.readers.entry(me).or_insert(0) += 1;
        self.read_requests.fetch_sub(1, Ordering::SeqCst);

        #[cfg(debug_assertions)]
        {
            deadlock::end_pending(me);
            deadlock::add_holder(self.id, me);
        }

        // Cascade so every reader waiting on the writer gets through.
        self.modified.notify_one();
        true
    }

    fn acquire_read_write(&self, timeout: Timeout) -> bool {
        let me = thread::current().id();
        let mut state = self.state.lock().unwrap();

        if state.owner == Some(me) {
            state.read_write_lock_count += 1;
            return true;
        }
        if state.readers.get(&me).copied().unwrap_or(0) > 0 {
            panic!(
                "semaphore '{}': read lock cannot be promoted to read/write lock",
                self.name
            );
        }

        self.read_write_requests.fetch_add(1, Ordering::SeqCst);
        #[cfg(debug_assertions)]
        deadlock::begin_pending(self.id, self.name, me);

        let deadline = timeout.deadline();
        while state.read_lock_count > 0 || state.read_write_lock_count > 0 {
            match wait_deadline(&self.read_lock_zero, state, deadline) {
                (s, false) => state = s,
                (_, true) => {
                    self.read_write_requests.fetch_sub(1, Ordering::SeqCst);
                    #[cfg(debug_assertions)]
                    deadlock::end_pending(me);
                    return false;
                }
            }
        }

        state.lock_type = LockType::ReadWrite;
        state.read_write_lock_count = 1;
        state.owner = Some(me);
        self.read_write_requests.fetch_sub(1, Ordering::SeqCst);

        #[cfg(debug_assertions)]
        {
            deadlock::end_pending(me);
            deadlock::add_holder(self.id, me);
        }
        true
    }

    /// Release one level of the calling thread's acquisition. Releasing
    /// a semaphore the caller does not own is a programmer error.
    pub fn release(&self) {
        let me = thread::current().id();
        let mut state = self.state.lock().unwrap();

        if state.owner == Some(me) {
            state.read_write_lock_count -= 1;
            if state.read_write_lock_count == 0 {
                state.owner = None;
                state.lock_type = LockType::None;
                state.modified_generation += 1;
                #[cfg(debug_assertions)]
                deadlock::remove_holder(self.id, me);
                self.read_lock_zero.notify_all();
                self.modified.notify_one();
            }
        } else if state.readers.get(&me).copied().unwrap_or(0) > 0 {
            {
                let depth = state.readers.get_mut(&me).unwrap();
                *depth -= 1;
                if *depth == 0 {
                    state.readers.remove(&me);
                    #[cfg(debug_assertions)]
                    deadlock::remove_holder(self.id, me);
                }
            }
            state.read_lock_count -= 1;
            if state.read_lock_count == 0 {
                state.lock_type = LockType::None;
                self.read_lock_zero.notify_all();
            }
        } else {
            panic!(
                "semaphore '{}': release by thread that does not own it",
                self.name
            );
        }
    }

    /// Atomically give up the calling thread's whole acquisition, wait
    /// for a modification signal (or the writer transitioning back to
    /// free), then re-acquire the same kind and depth. Returns false on
    /// timeout; the acquisition is restored either way. Once the
    /// semaphore is ended this returns true immediately.
    pub fn wait_modified(&self, timeout: Timeout) -> bool {
        enum Held {
            Writer(usize),
            Reader(usize),
        }

        let me = thread::current().id();
        let mut state = self.state.lock().unwrap();

        if state.end {
            return true;
        }

        // Revert the caller's acquisitions, waking whoever was blocked
        // on them.
        let held = if state.owner == Some(me) {
            let depth = state.read_write_lock_count;
            state.read_write_lock_count = 0;
            state.owner = None;
            state.lock_type = LockType::None;
            state.modified_generation += 1;
            self.read_lock_zero.notify_all();
            self.modified.notify_one();
            Held::Writer(depth)
        } else if state.readers.get(&me).copied().unwrap_or(0) > 0 {
            let depth = state.readers.remove(&me).unwrap();
            state.read_lock_count -= depth;
            if state.read_lock_count == 0 {
                if state.read_write_lock_count == 0 {
                    state.lock_type = LockType::None;
                }
                self.read_lock_zero.notify_all();
            }
            Held::Reader(depth)
        } else {
            panic!(
                "semaphore '{}': wait on semaphore that is not owned",
                self.name
            );
        };

        // Wait for a signal. A generation bump between the revert and
        // here counts; spurious condvar wake-ups do not.
        let generation = state.modified_generation;
        let deadline = timeout.deadline();
        let mut signaled = true;
        while state.modified_generation == generation && !state.end {
            match wait_deadline(&self.modified, state, deadline) {
                (s, false) => state = s,
                (s, true) => {
                    state = s;
                    signaled = false;
                    break;
                }
            }
        }
        let ended = state.end;

        // Restore the exact kind and depth, waiting as long as needed.
        match held {
            Held::Writer(depth) => {
                self.read_write_requests.fetch_add(1, Ordering::SeqCst);
                while state.read_lock_count > 0 || state.read_write_lock_count > 0 {
                    state = self.read_lock_zero.wait(state).unwrap();
                }
                state.lock_type = LockType::ReadWrite;
                state.read_write_lock_count = depth;
                state.owner = Some(me);
                self.read_write_requests.fetch_sub(1, Ordering::SeqCst);
            }
            Held::Reader(depth) => {
                self.read_requests.fetch_add(1, Ordering::SeqCst);
                while state.read_write_lock_count > 0 {
                    state = self.modified.wait(state).unwrap();
                }
                state.lock_type = LockType::Read;
                state.read_lock_count += depth;
                state.readers.insert(me, depth);
                self.read_requests.fetch_sub(1, Ordering::SeqCst);
                self.modified.notify_one();
            }
        }

        signaled || ended
    }

    /// Wake waiters blocked in [`wait_modified`](Self::wait_modified).
    /// The caller must hold a read/write acquisition.
    pub fn signal_modified(&self, mode: SignalMode) {
        let me = thread::current().id();
        let mut state = self.state.lock().unwrap();
        assert!(
            state.owner == Some(me),
            "semaphore '{}': modification signal without read/write lock",
            self.name
        );
        state.modified_generation += 1;
        match mode {
            SignalMode::One => self.modified.notify_one(),
            SignalMode::All => self.modified.notify_all(),
        };
    }

    /// Permanently end the semaphore and wake every waiter. Subsequent
    /// `wait_modified` calls return true without blocking.
    pub fn set_end(&self) {
        let mut state = self.state.lock().unwrap();
        state.end = true;
        state.modified_generation += 1;
        self.modified.notify_all();
        self.read_lock_zero.notify_all();
    }

    pub fn is_end(&self) -> bool {
        self.state.lock().unwrap().end
    }

    /// Whether the calling thread holds any acquisition.
    pub fn is_owned(&self) -> bool {
        let me = thread::current().id();
        let state = self.state.lock().unwrap();
        state.owner == Some(me) || state.readers.get(&me).copied().unwrap_or(0) > 0
    }

    /// Whether any thread is currently waiting for the given kind.
    pub fn is_pending(&self, kind: SemaphoreLock) -> bool {
        match kind {
            SemaphoreLock::Read => self.read_requests.load(Ordering::SeqCst) > 0,
            SemaphoreLock::ReadWrite => self.read_write_requests.load(Ordering::SeqCst) > 0,
        }
    }

    /// Whether any thread holds any acquisition right now.
    pub fn is_locked(&self) -> bool {
        self.state.lock().unwrap().lock_type != LockType::None
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        deadlock::unregister(self.id);
    }
}

impl std::fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().unwrap();
        f.debug_struct("Semaphore")
            .field("name", &self.name)
            .field("lock_type", &state.lock_type)
            .field("read_lock_count", &state.read_lock_count)
            .field("read_write_lock_count", &state.read_write_lock_count)
            .field("end", &state.end)
            .finish()
    }
}

/// RAII acquisition of a [`Semaphore`], released on drop.
#[must_use]
pub struct SemaphoreGuard<'a> {
    semaphore: &'a Semaphore,
}

impl SemaphoreGuard<'_> {
    pub fn wait_modified(&self, timeout: Timeout) -> bool {
        self.semaphore.wait_modified(timeout)
    }

    pub fn signal_modified(&self, mode: SignalMode) {
        self.semaphore.signal_modified(mode);
    }
}

impl Drop for SemaphoreGuard<'_> {
    fn drop(&mut self) {
        self.semaphore.release();
    }
}

/// Wait on `condvar` until notified or the deadline passes. The bool is
/// true when the deadline has definitively passed.
fn wait_deadline<'a, T>(
    condvar: &Condvar,
    guard: MutexGuard<'a, T>,
    deadline: Option<Instant>,
) -> (MutexGuard<'a, T>, bool) {
    match deadline {
        None => (condvar.wait(guard).unwrap(), false),
        Some(deadline) => {
            let now = Instant::now();
            if now >= deadline {
                return (guard, true);
            }
            let (guard, result) = condvar.wait_timeout(guard, deadline - now).unwrap();
            (guard, result.timed_out() && Instant::now() >= deadline)
        }
    }
}

#[cfg(debug_assertions)]
mod deadlock {
    //! Process-wide holder/pending graph for cycle detection. Read
    //! locks are treated like exclusive holds here, so the check can
    //! report a cycle that would in fact make progress; it never misses
    //! a real writer cycle.

    use std::collections::{HashMap, HashSet};
    use std::sync::{Mutex, OnceLock};
    use std::thread::ThreadId;

    struct Registry {
        names: HashMap<u64, &'static str>,
        holders: HashMap<u64, HashSet<ThreadId>>,
        pending: HashMap<ThreadId, u64>,
    }

    fn registry() -> &'static Mutex<Registry> {
        static REGISTRY: OnceLock<Mutex<Registry>> = OnceLock::new();
        REGISTRY.get_or_init(|| {
            Mutex::new(Registry {
                names: HashMap::new(),
                holders: HashMap::new(),
                pending: HashMap::new(),
            })
        })
    }

    pub(super) fn register(id: u64, name: &'static str) {
        let mut registry = registry().lock().unwrap();
        registry.names.insert(id, name);
    }

    pub(super) fn unregister(id: u64) {
        let mut registry = registry().lock().unwrap();
        registry.names.remove(&id);
        registry.holders.remove(&id);
    }

    /// Record that `thread` is about to block on `id` and abort if the
    /// holder/pending graph already contains a cycle through the
    /// calling thread.
    pub(super) fn begin_pending(id: u64, name: &'static str, thread: ThreadId) {
        let mut registry = registry().lock().unwrap();

        let mut visited = HashSet::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if !visited.insert(current) {
                continue;
            }
            if let Some(holders) = registry.holders.get(&current) {
                for holder in holders {
                    if *holder == thread && current != id {
                        let held = registry.names.get(&current).copied().unwrap_or("?");
                        panic!(
                            "deadlock: thread {:?} requests semaphore '{}' while holding \
                             '{}', which a pending holder chain leads back to",
                            thread, name, held
                        );
                    }
                    if let Some(next) = registry.pending.get(holder) {
                        stack.push(*next);
                    }
                }
            }
        }

        registry.pending.insert(thread, id);
    }

    pub(super) fn end_pending(thread: ThreadId) {
        registry().lock().unwrap().pending.remove(&thread);
    }

    pub(super) fn add_holder(id: u64, thread: ThreadId) {
        registry()
            .lock()
            .unwrap()
            .holders
            .entry(id)
            .or_default()
            .insert(thread);
    }

    pub(super) fn remove_holder(id: u64, thread: ThreadId) {
        let mut registry = registry().lock().unwrap();
        if let Some(holders) = registry.holders.get_mut(&id) {
            holders.remove(&thread);
            if holders.is_empty() {
                registry.holders.remove(&id);
            }
        }
    }
}
