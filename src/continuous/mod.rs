//! Continuous-change watcher.
//!
//! Jobs subscribe directory trees with `init_notify`; a reconcile
//! worker turns those requests into per-directory watches, and an event
//! worker turns kernel notifications into change rows in the
//! continuous store. `list_next` hands one recorded change to the
//! archiver and deletes it.
//!
//! Watch records are shared between two indices (by watch id and by
//! path) and carry the set of `(job, schedule)` subscribers. During a
//! rescan existing subscribers are marked stale and reconfirmed; the
//! ones still stale afterwards are dropped, as are watches with no
//! subscribers left.

pub mod backend;
pub mod db;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, info, warn};
use uuid::Uuid;

use barrow_common::{EntryList, MsgQueue, Timeout};

use crate::error::Result;
use backend::{WatchBackend, WatchEvent, WatchEventKind, WatchId};
use db::ContinuousDb;

/// Sentinel files that exclude a directory tree from watching.
const NO_BACKUP_FILE_NAMES: &[&str] = &[".nobackup", ".no_backup"];

/// Poll slice for the event worker; bounds shutdown latency.
const EVENT_POLL_TIMEOUT: Duration = Duration::from_millis(200);

enum ContinuousMsg {
    Init {
        job: Uuid,
        schedule: Uuid,
        entries: EntryList,
    },
    Done {
        job: Uuid,
        schedule: Uuid,
    },
}

#[derive(Clone, Copy, PartialEq, Eq)]
struct UuidPair {
    job: Uuid,
    schedule: Uuid,
}

struct SubscriberEntry {
    pair: UuidPair,
    /// Stale until reconfirmed during a rescan.
    clean: bool,
}

struct NotifyInfo {
    id: WatchId,
    path: PathBuf,
    subscribers: Vec<SubscriberEntry>,
}

#[derive(Default)]
struct WatchRegistry {
    by_id: HashMap<WatchId, NotifyInfo>,
    by_path: HashMap<PathBuf, WatchId>,
}

impl WatchRegistry {
    fn info_by_path(&mut self, path: &Path) -> Option<&mut NotifyInfo> {
        let id = *self.by_path.get(path)?;
        self.by_id.get_mut(&id)
    }

    fn insert(&mut self, info: NotifyInfo) {
        self.by_path.insert(info.path.clone(), info.id);
        self.by_id.insert(info.id, info);
    }

    fn remove(&mut self, id: WatchId) -> Option<NotifyInfo> {
        let info = self.by_id.remove(&id)?;
        self.by_path.remove(&info.path);
        Some(info)
    }
}

struct Shared {
    registry: Mutex<WatchRegistry>,
    backend: Mutex<Box<dyn WatchBackend>>,
    queue: MsgQueue<ContinuousMsg>,
    quit: AtomicBool,
    submitted: AtomicU64,
    processed: AtomicU64,
}

/// The running watcher service.
pub struct ContinuousService {
    shared: Arc<Shared>,
    db: Mutex<ContinuousDb>,
    reconcile_worker: Option<JoinHandle<()>>,
    event_worker: Option<JoinHandle<()>>,
}

impl ContinuousService {
    pub fn start(db_path: &Path, watch_backend: Box<dyn WatchBackend>) -> Result<Self> {
        let db = ContinuousDb::open(db_path)?;
        let shared = Arc::new(Shared {
            registry: Mutex::new(WatchRegistry::default()),
            backend: Mutex::new(watch_backend),
            queue: MsgQueue::new(0),
            quit: AtomicBool::new(false),
            submitted: AtomicU64::new(0),
            processed: AtomicU64::new(0),
        });

        let reconcile_worker = {
            let shared = Arc::clone(&shared);
            std::thread::Builder::new()
                .name("continuous-init".to_string())
                .spawn(move || reconcile_worker(&shared))
                .expect("spawn continuous reconcile worker")
        };
        let event_worker = {
            let shared = Arc::clone(&shared);
            let db = ContinuousDb::open(db_path)?;
            std::thread::Builder::new()
                .name("continuous-event".to_string())
                .spawn(move || event_worker(&shared, &db))
                .expect("spawn continuous event worker")
        };

        info!(message = "Continuous watcher started.", db = ?db_path);
        Ok(ContinuousService {
            shared,
            db: Mutex::new(db),
            reconcile_worker: Some(reconcile_worker),
            event_worker: Some(event_worker),
        })
    }

    /// Subscribe `(job, schedule)` to the directory trees named by the
    /// include patterns of `entries`.
    pub fn init_notify(&self, job: Uuid, schedule: Uuid, entries: &EntryList) -> bool {
        self.shared.submitted.fetch_add(1, Ordering::SeqCst);
        self.shared.queue.put(ContinuousMsg::Init {
            job,
            schedule,
            entries: entries.clone(),
        })
    }

    /// Unsubscribe `(job, schedule)` from all watches.
    pub fn done_notify(&self, job: Uuid, schedule: Uuid) -> bool {
        self.shared.submitted.fetch_add(1, Ordering::SeqCst);
        self.shared.queue.put(ContinuousMsg::Done { job, schedule })
    }

    /// Wait until all queued init/done requests have been reconciled.
    pub fn sync(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        while self.shared.processed.load(Ordering::SeqCst)
            < self.shared.submitted.load(Ordering::SeqCst)
        {
            if std::time::Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        true
    }

    /// Take one recorded change for `(job, schedule)`, removing it.
    pub fn list_next(&self, job: Uuid, schedule: Uuid) -> Result<Option<(i64, PathBuf)>> {
        let row = self.db.lock().unwrap().next(&job, &schedule)?;
        Ok(row.map(|(id, name)| (id, PathBuf::from(name))))
    }

    /// Drop every recorded change of `job`, across all its schedules.
    /// Called when the job is removed from the configuration; usually
    /// paired with [`done_notify`](Self::done_notify). Returns the
    /// number of rows dropped.
    pub fn purge(&self, job: Uuid) -> Result<u64> {
        self.db.lock().unwrap().purge(&job)
    }

    /// Number of watched directories, for introspection.
    pub fn watch_count(&self) -> usize {
        self.shared.registry.lock().unwrap().by_id.len()
    }

    /// Stop both workers and wait for them.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.shared.quit.store(true, Ordering::SeqCst);
        self.shared.queue.set_end_of_msg();
        if let Some(worker) = self.reconcile_worker.take() {
            let _ = worker.join();
        }
        if let Some(worker) = self.event_worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for ContinuousService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn reconcile_worker(shared: &Shared) {
    while let Some(msg) = shared.queue.get(Timeout::Forever) {
        match msg {
            ContinuousMsg::Init {
                job,
                schedule,
                entries,
            } => handle_init(shared, job, schedule, &entries),
            ContinuousMsg::Done { job, schedule } => handle_done(shared, job, schedule),
        }
        shared.processed.fetch_add(1, Ordering::SeqCst);
    }
}

fn handle_init(shared: &Shared, job: Uuid, schedule: Uuid, entries: &EntryList) {
    let pair = UuidPair { job, schedule };
    debug!(message = "Continuous init.", job = %job, schedule = %schedule);

    // Mark this pair's existing subscriptions stale; the walk below
    // reconfirms the ones that still apply.
    {
        let mut registry = shared.registry.lock().unwrap();
        for info in registry.by_id.values_mut() {
            for subscriber in &mut info.subscribers {
                if subscriber.pair == pair {
                    subscriber.clean = false;
                }
            }
        }
    }

    for entry in entries.iter() {
        let base = entry.base_directory();
        if base.is_empty() {
            continue;
        }
        add_watch_tree(shared, Path::new(base), pair);
    }

    // Sweep subscriptions still stale, and watches left empty.
    let mut obsolete = Vec::new();
    {
        let mut registry = shared.registry.lock().unwrap();
        for info in registry.by_id.values_mut() {
            info.subscribers
                .retain(|subscriber| subscriber.pair != pair || subscriber.clean);
            if info.subscribers.is_empty() {
                obsolete.push(info.id);
            }
        }
        for id in &obsolete {
            registry.remove(*id);
        }
    }
    let mut watch_backend = shared.backend.lock().unwrap();
    for id in obsolete {
        watch_backend.remove_watch(id);
    }
}

fn handle_done(shared: &Shared, job: Uuid, schedule: Uuid) {
    let pair = UuidPair { job, schedule };
    debug!(message = "Continuous done.", job = %job, schedule = %schedule);

    let mut obsolete = Vec::new();
    {
        let mut registry = shared.registry.lock().unwrap();
        for info in registry.by_id.values_mut() {
            info.subscribers.retain(|subscriber| subscriber.pair != pair);
            if info.subscribers.is_empty() {
                obsolete.push(info.id);
            }
        }
        for id in &obsolete {
            registry.remove(*id);
        }
    }
    let mut watch_backend = shared.backend.lock().unwrap();
    for id in obsolete {
        watch_backend.remove_watch(id);
    }
}

/// Subscribe `pair` to `directory` and every subdirectory, skipping
/// trees that carry a no-backup sentinel.
fn add_watch_tree(shared: &Shared, directory: &Path, pair: UuidPair) {
    if !directory.is_dir() {
        return;
    }
    if has_no_backup_sentinel(directory) {
        debug!(message = "Skipping no-backup tree.", path = ?directory);
        return;
    }

    subscribe(shared, directory, pair);

    let Ok(children) = fs::read_dir(directory) else {
        return;
    };
    for child in children.flatten() {
        let path = child.path();
        let is_dir = child
            .file_type()
            .map(|file_type| file_type.is_dir())
            .unwrap_or(false);
        if is_dir {
            add_watch_tree(shared, &path, pair);
        }
    }
}

/// Get-or-create the watch on `directory` and reconfirm `pair` on it.
fn subscribe(shared: &Shared, directory: &Path, pair: UuidPair) {
    let mut registry = shared.registry.lock().unwrap();
    if let Some(info) = registry.info_by_path(directory) {
        match info
            .subscribers
            .iter_mut()
            .find(|subscriber| subscriber.pair == pair)
        {
            Some(subscriber) => subscriber.clean = true,
            None => info.subscribers.push(SubscriberEntry { pair, clean: true }),
        }
        return;
    }
    drop(registry);

    let id = {
        let mut watch_backend = shared.backend.lock().unwrap();
        match watch_backend.add_watch(directory) {
            Ok(id) => id,
            Err(cause) => {
                warn!(message = "Cannot watch directory.", path = ?directory, error = %cause);
                return;
            }
        }
    };
    let mut registry = shared.registry.lock().unwrap();
    if let Some(info) = registry.info_by_path(directory) {
        // The other worker registered the path in between; keep its
        // watch and fold our subscription into it.
        if !info.subscribers.iter().any(|subscriber| subscriber.pair == pair) {
            info.subscribers.push(SubscriberEntry { pair, clean: true });
        }
        let existing = info.id;
        if existing != id {
            shared.backend.lock().unwrap().remove_watch(id);
        }
        return;
    }
    registry.insert(NotifyInfo {
        id,
        path: directory.to_path_buf(),
        subscribers: vec![SubscriberEntry { pair, clean: true }],
    });
}

fn has_no_backup_sentinel(directory: &Path) -> bool {
    NO_BACKUP_FILE_NAMES
        .iter()
        .any(|name| directory.join(name).exists())
}

fn event_worker(shared: &Shared, db: &ContinuousDb) {
    loop {
        if shared.quit.load(Ordering::SeqCst) {
            break;
        }
        let events = shared.backend.lock().unwrap().poll(EVENT_POLL_TIMEOUT);
        for event in events {
            handle_event(shared, db, &event);
        }
    }
}

fn handle_event(shared: &Shared, db: &ContinuousDb, event: &WatchEvent) {
    // Resolve the watch and snapshot its subscribers.
    let pairs: Vec<UuidPair> = {
        let mut registry = shared.registry.lock().unwrap();
        match registry.info_by_path(&event.directory) {
            Some(info) => info
                .subscribers
                .iter()
                .map(|subscriber| subscriber.pair)
                .collect(),
            None => return,
        }
    };
    let absolute = event.absolute_path();

    if event.is_directory {
        match event.kind {
            WatchEventKind::Create | WatchEventKind::MovedTo => {
                // New subtree: record the directory and extend the
                // watch set below it.
                for pair in &pairs {
                    record_change(db, pair, &absolute);
                }
                for pair in pairs {
                    add_watch_tree(shared, &absolute, pair);
                }
            }
            WatchEventKind::Delete | WatchEventKind::MovedFrom => {
                remove_watch_subtree(shared, &absolute);
            }
            _ => {
                for pair in &pairs {
                    record_change(db, pair, &absolute);
                }
            }
        }
    } else {
        match event.kind {
            // Deleted or moved-away files need no backup entry.
            WatchEventKind::Delete | WatchEventKind::MovedFrom => {}
            _ => {
                for pair in &pairs {
                    record_change(db, pair, &absolute);
                }
            }
        }
    }
}

fn record_change(db: &ContinuousDb, pair: &UuidPair, path: &Path) {
    let name = path.to_string_lossy();
    match db.add(&pair.job, &pair.schedule, &name) {
        Ok(true) => {
            debug!(message = "Marked for storage.", path = ?path, job = %pair.job);
        }
        Ok(false) => {}
        Err(cause) => {
            warn!(message = "Cannot store continuous entry.", path = ?path, error = %cause);
        }
    }
}

/// Drop the watches on `root` and everything below it.
fn remove_watch_subtree(shared: &Shared, root: &Path) {
    let mut obsolete = Vec::new();
    {
        let mut registry = shared.registry.lock().unwrap();
        for info in registry.by_id.values() {
            if info.path.starts_with(root) {
                obsolete.push(info.id);
            }
        }
        for id in &obsolete {
            registry.remove(*id);
        }
    }
    let mut watch_backend = shared.backend.lock().unwrap();
    for id in obsolete {
        watch_backend.remove_watch(id);
    }
}
