//! Change Tracking Service
//!
//! [`Vfs`] ties the name translator and change log to a watch source. Events
//! from the source flow over a channel to one consumer thread, which is the
//! only writer of the change log.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use thiserror::Error;
use walkdir::WalkDir;

use super::change_log::{ChangeKind, ChangeLog, ChangeRecord};
use super::identity::{ObjectIdentity, SCRIPT_EXTENSION};
use super::naming::{NameTranslator, TranslateError};
use crate::services::watcher::{Envelope, EventSink, WatchError, WatchEvent, WatchEventKind, WatchSource};

/// Errors surfaced by the change tracking service
#[derive(Debug, Error)]
pub enum VfsError {
    #[error(transparent)]
    Watch(#[from] WatchError),

    #[error("Directory scan failed: {0}")]
    Scan(#[from] walkdir::Error),

    #[error("Invalid root object pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Failed to spawn watch consumer: {0}")]
    Io(#[from] std::io::Error),
}

/// Changes since a cutoff plus the clock reading taken with them
#[derive(Debug, Clone, serde::Serialize)]
pub struct ChangesSince {
    pub changed: Vec<ChangeRecord>,
    pub now: f64,
}

struct Subscription {
    sink: EventSink,
    consumer: JoinHandle<()>,
}

struct WatchState {
    source: Box<dyn WatchSource>,
    subscription: Option<Subscription>,
}

/// Change tracking service for one root directory
pub struct Vfs {
    translator: Arc<NameTranslator>,
    changes: Arc<ChangeLog>,
    watch: Mutex<WatchState>,
}

impl Vfs {
    /// Create a service; the root directory is canonicalized when it exists
    pub fn new(
        root_directory: &Path,
        root_object: &str,
        source: Box<dyn WatchSource>,
    ) -> Result<Self, VfsError> {
        let root = root_directory
            .canonicalize()
            .unwrap_or_else(|_| root_directory.to_path_buf());
        let translator = NameTranslator::new(root, root_object)?;

        Ok(Self {
            translator: Arc::new(translator),
            changes: Arc::new(ChangeLog::new()),
            watch: Mutex::new(WatchState {
                source,
                subscription: None,
            }),
        })
    }

    pub fn root_directory(&self) -> &Path {
        self.translator.root_directory()
    }

    pub fn translator(&self) -> &NameTranslator {
        &self.translator
    }

    /// Current clock reading
    pub fn now(&self) -> f64 {
        self.changes.clock()
    }

    pub fn is_watching(&self) -> bool {
        self.lock_watch().subscription.is_some()
    }

    /// Subscribe to the watch source; no-op when already watching
    pub fn start_watching(&self) -> Result<(), VfsError> {
        let mut state = self.lock_watch();
        if state.subscription.is_some() {
            return Ok(());
        }

        let (tx, rx) = mpsc::channel();
        let sink = EventSink::new(tx);

        let mut tracker = Tracker::new(Arc::clone(&self.translator), Arc::clone(&self.changes));
        tracker.seed();

        let consumer = std::thread::Builder::new()
            .name("rbxfs-vfs-events".to_string())
            .spawn(move || {
                while let Ok(Envelope::Event(event)) = rx.recv() {
                    tracker.apply(&event);
                }
            })?;

        if let Err(e) = state.source.subscribe(self.translator.root_directory(), sink.clone()) {
            sink.shutdown();
            let _ = consumer.join();
            return Err(e.into());
        }

        state.subscription = Some(Subscription { sink, consumer });
        Ok(())
    }

    /// Unsubscribe and wait for the consumer to finish; no-op when not watching
    ///
    /// Events delivered before this call are applied before it returns and no
    /// event is applied afterwards.
    pub fn stop_watching(&self) {
        let mut state = self.lock_watch();
        let Some(subscription) = state.subscription.take() else {
            return;
        };

        state.source.unsubscribe();
        subscription.sink.shutdown();
        if subscription.consumer.join().is_err() {
            tracing::warn!("Watch consumer panicked");
        }
        tracing::info!("Stopped watching {}", self.translator.root_directory().display());
    }

    /// Scan the root directory and translate every script found
    pub fn list_all(&self) -> Result<Vec<ObjectIdentity>, VfsError> {
        let mut objects = Vec::new();
        for script in scripts_under(&self.translator, self.translator.root_directory()) {
            let (_, identity) = script?;
            objects.push(identity);
        }
        Ok(objects)
    }

    /// Records at or after `timestamp`, paired with the current clock
    pub fn changes_since(&self, timestamp: f64) -> ChangesSince {
        let (changed, now) = self.changes.snapshot(timestamp);
        ChangesSince { changed, now }
    }

    pub fn resolve_read_path(&self, identity: &ObjectIdentity) -> Result<PathBuf, TranslateError> {
        self.translator.identity_to_file(identity)
    }

    pub fn resolve_write_path(&self, identity: &ObjectIdentity) -> Result<PathBuf, TranslateError> {
        self.translator.identity_to_file(identity)
    }

    fn lock_watch(&self) -> std::sync::MutexGuard<'_, WatchState> {
        self.watch.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Vfs {
    fn drop(&mut self) {
        self.stop_watching();
    }
}

/// Every recognized script at or below `dir`, in file name order
fn scripts_under<'a>(
    translator: &'a NameTranslator,
    dir: &Path,
) -> impl Iterator<Item = Result<(PathBuf, ObjectIdentity), walkdir::Error>> + 'a {
    WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(move |entry| {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => return Some(Err(e)),
            };
            if !entry.file_type().is_file() {
                return None;
            }
            if entry.path().extension().map_or(true, |ext| ext != SCRIPT_EXTENSION) {
                return None;
            }
            let identity = translator.file_to_identity(entry.path()).ok()?;
            Some(Ok((entry.into_path(), identity)))
        })
}

/// Consumer-side state: applies watch events to the change log
///
/// Keeps the scripts currently on disk so that a removed or renamed-away
/// directory can be expanded into deletions of the scripts it held.
struct Tracker {
    translator: Arc<NameTranslator>,
    changes: Arc<ChangeLog>,
    known: BTreeMap<PathBuf, ObjectIdentity>,
}

impl Tracker {
    fn new(translator: Arc<NameTranslator>, changes: Arc<ChangeLog>) -> Self {
        Self {
            translator,
            changes,
            known: BTreeMap::new(),
        }
    }

    /// Learn the scripts already on disk without recording anything
    fn seed(&mut self) {
        for script in scripts_under(&self.translator, self.translator.root_directory()) {
            match script {
                Ok((path, identity)) => {
                    self.known.insert(path, identity);
                }
                Err(e) => tracing::warn!("Initial scan: {}", e),
            }
        }
        tracing::debug!(scripts = self.known.len(), "Initial scan complete");
    }

    fn apply(&mut self, event: &WatchEvent) {
        match event.kind {
            WatchEventKind::CreatedOrModified if event.path.is_dir() => self.directory_added(&event.path),
            WatchEventKind::CreatedOrModified => self.file_changed(&event.path),
            WatchEventKind::Removed => self.removed(&event.path),
        }
    }

    fn file_changed(&mut self, path: &Path) {
        match self.translator.file_to_identity(path) {
            Ok(identity) => {
                self.known.insert(path.to_path_buf(), identity.clone());
                self.record(ChangeKind::Changed, identity);
            }
            Err(e) => tracing::trace!("Ignoring {}: {}", path.display(), e),
        }
    }

    fn directory_added(&mut self, dir: &Path) {
        let scripts: Vec<_> = scripts_under(&self.translator, dir)
            .filter_map(|script| match script {
                Ok(script) => Some(script),
                Err(e) => {
                    tracing::warn!("Scanning {}: {}", dir.display(), e);
                    None
                }
            })
            .collect();

        for (path, identity) in scripts {
            self.known.insert(path, identity.clone());
            self.record(ChangeKind::Changed, identity);
        }
    }

    /// A removed path may have been a script or a directory holding scripts
    fn removed(&mut self, path: &Path) {
        let gone: Vec<PathBuf> = self
            .known
            .range(path.to_path_buf()..)
            .take_while(|(known, _)| known.starts_with(path))
            .map(|(known, _)| known.clone())
            .collect();

        if gone.is_empty() {
            match self.translator.file_to_identity(path) {
                Ok(identity) => self.record(ChangeKind::Deleted, identity),
                Err(e) => tracing::trace!("Ignoring {}: {}", path.display(), e),
            }
            return;
        }

        for known in gone {
            if let Some(identity) = self.known.remove(&known) {
                self.record(ChangeKind::Deleted, identity);
            }
        }
    }

    fn record(&self, kind: ChangeKind, object: ObjectIdentity) {
        let record = self.changes.record_now(kind, object);
        tracing::debug!(
            name = %record.object.name,
            timestamp = record.timestamp,
            "Added change"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::watcher::ManualWatchSource;
    use crate::vfs::identity::ScriptKind;
    use std::fs;
    use tempfile::tempdir;

    fn manual_vfs(root: &Path, root_object: &str) -> (Vfs, crate::services::watcher::ManualWatchHandle) {
        let (source, handle) = ManualWatchSource::new();
        let vfs = Vfs::new(root, root_object, Box::new(source)).unwrap();
        (vfs, handle)
    }

    #[test]
    fn test_events_are_recorded() {
        let dir = tempdir().unwrap();
        let (vfs, handle) = manual_vfs(dir.path(), "Game");
        let root = vfs.root_directory().to_path_buf();

        vfs.start_watching().unwrap();
        assert!(handle.push(WatchEvent::changed(root.join("a/b.server.lua"))));
        assert!(handle.push(WatchEvent::removed(root.join("c.lua"))));
        vfs.stop_watching();

        let changed = vfs.changes_since(0.0).changed;
        assert_eq!(changed.len(), 2);
        assert_eq!(changed[0].kind, ChangeKind::Changed);
        assert_eq!(changed[0].object, ObjectIdentity::new("Game.a.b", ScriptKind::Server));
        assert_eq!(changed[1].kind, ChangeKind::Deleted);
        assert_eq!(changed[1].object, ObjectIdentity::new("Game.c", ScriptKind::Module));
    }

    #[test]
    fn test_unrecognized_paths_not_recorded() {
        let dir = tempdir().unwrap();
        let (vfs, handle) = manual_vfs(dir.path(), "");
        let root = vfs.root_directory().to_path_buf();

        vfs.start_watching().unwrap();
        handle.push(WatchEvent::changed(root.join("notes.txt")));
        handle.push(WatchEvent::changed(root.join("a.b/c.lua")));
        handle.push(WatchEvent::changed("/somewhere/else.lua"));
        vfs.stop_watching();

        assert!(vfs.changes_since(0.0).changed.is_empty());
    }

    #[test]
    fn test_latest_delivered_event_wins() {
        let dir = tempdir().unwrap();
        let (vfs, handle) = manual_vfs(dir.path(), "");
        let path = vfs.root_directory().join("x.lua");

        vfs.start_watching().unwrap();
        handle.push(WatchEvent::changed(&path));
        handle.push(WatchEvent::removed(&path));
        vfs.stop_watching();

        let changed = vfs.changes_since(0.0).changed;
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].kind, ChangeKind::Deleted);
    }

    #[test]
    fn test_start_and_stop_are_idempotent() {
        let dir = tempdir().unwrap();
        let (vfs, handle) = manual_vfs(dir.path(), "");

        assert!(!vfs.is_watching());
        vfs.stop_watching();

        vfs.start_watching().unwrap();
        vfs.start_watching().unwrap();
        assert!(vfs.is_watching());
        assert_eq!(handle.subscribed_roots().len(), 1);

        vfs.stop_watching();
        vfs.stop_watching();
        assert!(!vfs.is_watching());
        assert!(!handle.is_subscribed());
    }

    #[test]
    fn test_no_events_after_stop() {
        let dir = tempdir().unwrap();
        let (vfs, handle) = manual_vfs(dir.path(), "");
        let path = vfs.root_directory().join("x.lua");

        vfs.start_watching().unwrap();
        vfs.stop_watching();

        assert!(!handle.push(WatchEvent::changed(&path)));
        assert!(vfs.changes_since(0.0).changed.is_empty());
    }

    #[test]
    fn test_restart_after_stop() {
        let dir = tempdir().unwrap();
        let (vfs, handle) = manual_vfs(dir.path(), "");
        let path = vfs.root_directory().join("x.client.lua");

        vfs.start_watching().unwrap();
        vfs.stop_watching();
        vfs.start_watching().unwrap();
        handle.push(WatchEvent::changed(&path));
        vfs.stop_watching();

        assert_eq!(vfs.changes_since(0.0).changed.len(), 1);
        assert_eq!(handle.subscribed_roots().len(), 2);
    }

    #[test]
    fn test_changes_since_reports_now() {
        let dir = tempdir().unwrap();
        let (vfs, handle) = manual_vfs(dir.path(), "");
        let path = vfs.root_directory().join("x.lua");

        vfs.start_watching().unwrap();
        handle.push(WatchEvent::changed(&path));
        vfs.stop_watching();

        let first = vfs.changes_since(0.0);
        assert_eq!(first.changed.len(), 1);
        assert!(first.now >= first.changed[0].timestamp);

        // Polling from the returned clock only sees newer changes
        let cutoff = first.now + 1.0;
        assert!(vfs.changes_since(cutoff).changed.is_empty());
    }

    #[test]
    fn test_directory_rename_expands_to_scripts() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("a/inner")).unwrap();
        fs::write(dir.path().join("a/b.lua"), "").unwrap();
        fs::write(dir.path().join("a/inner/c.server.lua"), "").unwrap();
        fs::write(dir.path().join("ab.lua"), "").unwrap();

        let (vfs, handle) = manual_vfs(dir.path(), "");
        let root = vfs.root_directory().to_path_buf();
        vfs.start_watching().unwrap();

        fs::rename(root.join("a"), root.join("moved")).unwrap();
        handle.push(WatchEvent::removed(root.join("a")));
        handle.push(WatchEvent::changed(root.join("moved")));
        vfs.stop_watching();

        let mut changed: Vec<(String, ChangeKind)> = vfs
            .changes_since(0.0)
            .changed
            .into_iter()
            .map(|r| (r.object.name, r.kind))
            .collect();
        changed.sort_by(|a, b| a.0.cmp(&b.0));

        assert_eq!(
            changed,
            vec![
                ("a.b".to_string(), ChangeKind::Deleted),
                ("a.inner.c".to_string(), ChangeKind::Deleted),
                ("moved.b".to_string(), ChangeKind::Changed),
                ("moved.inner.c".to_string(), ChangeKind::Changed),
            ]
        );
    }

    #[test]
    fn test_removed_directory_forgets_its_scripts() {
        let dir = tempdir().unwrap();
        let (vfs, handle) = manual_vfs(dir.path(), "");
        let root = vfs.root_directory().to_path_buf();
        vfs.start_watching().unwrap();

        fs::create_dir(root.join("lib")).unwrap();
        fs::write(root.join("lib/util.lua"), "").unwrap();
        handle.push(WatchEvent::changed(root.join("lib")));
        handle.push(WatchEvent::removed(root.join("lib")));
        // Already forgotten: a second removal records nothing new
        handle.push(WatchEvent::removed(root.join("lib")));
        vfs.stop_watching();

        let changed = vfs.changes_since(0.0).changed;
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].object, ObjectIdentity::new("lib.util", ScriptKind::Module));
        assert_eq!(changed[0].kind, ChangeKind::Deleted);
    }

    fn wait_for(vfs: &Vfs, done: impl Fn(&[ChangeRecord]) -> bool) -> Vec<ChangeRecord> {
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(10);
        loop {
            let changed = vfs.changes_since(0.0).changed;
            if done(&changed) || std::time::Instant::now() > deadline {
                return changed;
            }
            std::thread::sleep(std::time::Duration::from_millis(25));
        }
    }

    fn has(changed: &[ChangeRecord], name: &str, kind: ChangeKind) -> bool {
        changed.iter().any(|r| r.object.name == name && r.kind == kind)
    }

    #[test]
    fn test_notify_source_end_to_end() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("existing.lua"), "").unwrap();

        let source = crate::services::NotifyWatchSource::new(std::time::Duration::from_millis(50));
        let vfs = Vfs::new(dir.path(), "Game", Box::new(source)).unwrap();
        let root = vfs.root_directory().to_path_buf();
        vfs.start_watching().unwrap();

        fs::write(root.join("fresh.server.lua"), "print(1)").unwrap();
        let changed = wait_for(&vfs, |c| has(c, "Game.fresh", ChangeKind::Changed));
        assert!(has(&changed, "Game.fresh", ChangeKind::Changed), "{:?}", changed);

        fs::remove_file(root.join("fresh.server.lua")).unwrap();
        let changed = wait_for(&vfs, |c| has(c, "Game.fresh", ChangeKind::Deleted));
        assert!(has(&changed, "Game.fresh", ChangeKind::Deleted), "{:?}", changed);

        // Files present before watching started are never reported
        assert!(!changed.iter().any(|r| r.object.name == "Game.existing"));

        vfs.stop_watching();
    }

    #[test]
    fn test_notify_source_directory_rename() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("a")).unwrap();
        fs::write(dir.path().join("a/b.lua"), "").unwrap();

        let source = crate::services::NotifyWatchSource::new(std::time::Duration::from_millis(50));
        let vfs = Vfs::new(dir.path(), "", Box::new(source)).unwrap();
        let root = vfs.root_directory().to_path_buf();
        vfs.start_watching().unwrap();

        fs::rename(root.join("a"), root.join("c")).unwrap();
        let changed = wait_for(&vfs, |c| {
            has(c, "a.b", ChangeKind::Deleted) && has(c, "c.b", ChangeKind::Changed)
        });
        vfs.stop_watching();

        assert!(has(&changed, "a.b", ChangeKind::Deleted), "{:?}", changed);
        assert!(has(&changed, "c.b", ChangeKind::Changed), "{:?}", changed);
    }

    #[test]
    fn test_list_all() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("a/b")).unwrap();
        fs::write(root.join("top.lua"), "").unwrap();
        fs::write(root.join("a/b/deep.server.lua"), "").unwrap();
        fs::write(root.join("a/ui.client.lua"), "").unwrap();
        fs::write(root.join("a/readme.txt"), "").unwrap();
        fs::write(root.join("a/x.shared.lua"), "").unwrap();

        let (vfs, _handle) = manual_vfs(root, "Game");
        let mut files = vfs.list_all().unwrap();
        files.sort_by(|a, b| a.name.cmp(&b.name));

        assert_eq!(
            files,
            vec![
                ObjectIdentity::new("Game.a.b.deep", ScriptKind::Server),
                ObjectIdentity::new("Game.a.ui", ScriptKind::Client),
                ObjectIdentity::new("Game.top", ScriptKind::Module),
            ]
        );
    }

    #[test]
    fn test_list_all_missing_root_fails() {
        let dir = tempdir().unwrap();
        let (vfs, _handle) = manual_vfs(&dir.path().join("missing"), "");

        assert!(matches!(vfs.list_all(), Err(VfsError::Scan(_))));
    }

    #[test]
    fn test_resolve_paths() {
        let dir = tempdir().unwrap();
        let (vfs, _handle) = manual_vfs(dir.path(), "Game");
        let identity = ObjectIdentity::new("Game.a.b", ScriptKind::Server);

        let expected = vfs.root_directory().join("a").join("b.server.lua");
        assert_eq!(vfs.resolve_read_path(&identity).unwrap(), expected);
        assert_eq!(vfs.resolve_write_path(&identity).unwrap(), expected);
    }
}
