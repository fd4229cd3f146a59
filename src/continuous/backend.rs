//! Filesystem watch backend.
//!
//! The watcher core is platform-neutral; everything kernel-specific
//! sits behind [`WatchBackend`]. The production implementation uses the
//! `notify` crate with one non-recursive watch per directory, which
//! maps one-to-one onto inotify watch descriptors on Linux. Tests
//! substitute a scripted backend.

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;

use notify::event::{AccessKind, AccessMode, CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use snafu::IntoError;
use tracing::trace;

use crate::error::{self, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WatchId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatchEventKind {
    Create,
    Modify,
    Attrib,
    CloseWrite,
    Delete,
    MovedFrom,
    MovedTo,
}

/// One filesystem event, resolved against a watched directory.
#[derive(Clone, Debug)]
pub struct WatchEvent {
    /// The watched directory the event belongs to.
    pub directory: PathBuf,
    /// Entry name within the directory; `None` means the directory
    /// itself changed.
    pub name: Option<OsString>,
    pub is_directory: bool,
    pub kind: WatchEventKind,
}

impl WatchEvent {
    /// Absolute path of the affected entry.
    pub fn absolute_path(&self) -> PathBuf {
        match &self.name {
            Some(name) => self.directory.join(name),
            None => self.directory.clone(),
        }
    }
}

/// Kernel notification interface: per-directory watches plus an event
/// poll with timeout.
pub trait WatchBackend: Send {
    fn add_watch(&mut self, directory: &Path) -> Result<WatchId>;
    fn remove_watch(&mut self, id: WatchId);
    fn poll(&mut self, timeout: Duration) -> Vec<WatchEvent>;
}

/// Production backend over the `notify` crate.
pub struct NotifyBackend {
    watcher: RecommendedWatcher,
    receiver: mpsc::Receiver<notify::Result<Event>>,
    next_id: u64,
    paths: HashMap<WatchId, PathBuf>,
    ids: HashMap<PathBuf, WatchId>,
}

impl NotifyBackend {
    pub fn new() -> Result<Self> {
        let (sender, receiver) = mpsc::channel();
        let watcher = RecommendedWatcher::new(sender, Config::default()).map_err(|source| {
            error::WatchSnafu {
                path: PathBuf::new(),
            }
            .into_error(source)
        })?;
        Ok(NotifyBackend {
            watcher,
            receiver,
            next_id: 1,
            paths: HashMap::new(),
            ids: HashMap::new(),
        })
    }

    fn translate(&self, event: Event) -> Vec<WatchEvent> {
        let mut translated = Vec::new();

        // A rename with both ends resolves into two separate events.
        if let EventKind::Modify(ModifyKind::Name(RenameMode::Both)) = event.kind {
            if event.paths.len() == 2 {
                for (path, kind) in [
                    (&event.paths[0], WatchEventKind::MovedFrom),
                    (&event.paths[1], WatchEventKind::MovedTo),
                ] {
                    if let Some(resolved) = self.resolve(path, kind, None) {
                        translated.push(resolved);
                    }
                }
                return translated;
            }
        }

        let (kind, is_directory) = match event.kind {
            EventKind::Create(create) => (
                WatchEventKind::Create,
                Some(create == CreateKind::Folder),
            ),
            EventKind::Remove(remove) => (
                WatchEventKind::Delete,
                Some(remove == RemoveKind::Folder),
            ),
            EventKind::Modify(ModifyKind::Data(_)) | EventKind::Modify(ModifyKind::Any) => {
                (WatchEventKind::Modify, None)
            }
            EventKind::Modify(ModifyKind::Metadata(_)) => (WatchEventKind::Attrib, None),
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                (WatchEventKind::MovedFrom, None)
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                (WatchEventKind::MovedTo, None)
            }
            EventKind::Access(AccessKind::Close(AccessMode::Write)) => {
                (WatchEventKind::CloseWrite, None)
            }
            _ => return translated,
        };

        for path in &event.paths {
            if let Some(resolved) = self.resolve(path, kind, is_directory) {
                translated.push(resolved);
            }
        }
        translated
    }

    /// Attach an event path to a watched directory: events on entries
    /// resolve against the parent watch, events on a watched directory
    /// itself against its own watch.
    fn resolve(
        &self,
        path: &Path,
        kind: WatchEventKind,
        is_directory: Option<bool>,
    ) -> Option<WatchEvent> {
        let parent_watched = path
            .parent()
            .map(|parent| self.ids.contains_key(parent))
            .unwrap_or(false);
        let (directory, name) = if parent_watched {
            (
                path.parent().unwrap().to_path_buf(),
                Some(path.file_name()?.to_os_string()),
            )
        } else if self.ids.contains_key(path) {
            (path.to_path_buf(), None)
        } else {
            trace!(message = "Event outside watched directories.", path = ?path);
            return None;
        };

        let is_directory = is_directory.unwrap_or_else(|| {
            // Gone entries cannot be checked; a registered watch on the
            // path means it was a directory.
            path.is_dir() || self.ids.contains_key(path)
        });
        Some(WatchEvent {
            directory,
            name,
            is_directory,
            kind,
        })
    }
}

impl WatchBackend for NotifyBackend {
    fn add_watch(&mut self, directory: &Path) -> Result<WatchId> {
        if let Some(id) = self.ids.get(directory) {
            return Ok(*id);
        }
        self.watcher
            .watch(directory, RecursiveMode::NonRecursive)
            .map_err(|source| {
                error::WatchSnafu { path: directory }.into_error(source)
            })?;
        let id = WatchId(self.next_id);
        self.next_id += 1;
        self.paths.insert(id, directory.to_path_buf());
        self.ids.insert(directory.to_path_buf(), id);
        trace!(message = "Watch added.", path = ?directory, id = id.0);
        Ok(id)
    }

    fn remove_watch(&mut self, id: WatchId) {
        if let Some(path) = self.paths.remove(&id) {
            self.ids.remove(&path);
            // The directory may already be gone; the kernel dropped the
            // watch with it.
            if let Err(cause) = self.watcher.unwatch(&path) {
                trace!(message = "Unwatch failed.", path = ?path, error = %cause);
            }
        }
    }

    fn poll(&mut self, timeout: Duration) -> Vec<WatchEvent> {
        let mut events = Vec::new();
        let first = match self.receiver.recv_timeout(timeout) {
            Ok(event) => event,
            Err(_) => return events,
        };
        let mut pending = vec![first];
        while let Ok(event) = self.receiver.try_recv() {
            pending.push(event);
        }
        for event in pending {
            match event {
                Ok(event) => events.extend(self.translate(event)),
                Err(cause) => {
                    trace!(message = "Watch backend error.", error = %cause);
                }
            }
        }
        events
    }
}
