//! Filesystem watch sources
//!
//! A [`WatchSource`] pushes `{kind, path}` events for a root directory into an
//! [`EventSink`]. The OS-backed source debounces notify events; the manual
//! source lets callers inject events deterministically.

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode};
use notify_debouncer_full::{new_debouncer, DebounceEventResult, Debouncer, RecommendedCache};
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;

/// Errors raised while establishing a subscription
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("Watch root does not exist or is not a directory: {0}")]
    RootMissing(PathBuf),

    #[error("Failed to watch path: {0}")]
    Notify(#[from] notify::Error),
}

/// Kind of change reported by a watch source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    CreatedOrModified,
    Removed,
}

/// A single change to a path under the watched root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub path: PathBuf,
}

impl WatchEvent {
    pub fn changed(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: WatchEventKind::CreatedOrModified,
            path: path.into(),
        }
    }

    pub fn removed(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: WatchEventKind::Removed,
            path: path.into(),
        }
    }
}

/// Message on the channel between a watch source and its consumer
#[derive(Debug)]
pub(crate) enum Envelope {
    Event(WatchEvent),
    Shutdown,
}

/// Sending half handed to a watch source on subscribe
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Sender<Envelope>,
}

impl EventSink {
    pub(crate) fn new(tx: Sender<Envelope>) -> Self {
        Self { tx }
    }

    /// Deliver an event; returns false once the consumer has gone away
    pub fn send(&self, event: WatchEvent) -> bool {
        self.tx.send(Envelope::Event(event)).is_ok()
    }

    pub(crate) fn shutdown(&self) {
        let _ = self.tx.send(Envelope::Shutdown);
    }
}

/// Something that can deliver change events for a directory tree
pub trait WatchSource: Send {
    /// Begin delivering events for `root` into `sink`
    fn subscribe(&mut self, root: &Path, sink: EventSink) -> Result<(), WatchError>;

    /// Stop delivering events; must not return while events can still be sent
    fn unsubscribe(&mut self);
}

/// Map a raw notify event onto watch events
///
/// Access events are ignored and renames become a removal of the old path
/// plus a change of the new one. Created or renamed-in directories are
/// reported as changed so the consumer can walk them; other modifications of
/// a directory are dropped.
pub fn classify(event: &Event) -> Vec<WatchEvent> {
    let mut out = Vec::new();

    match event.kind {
        EventKind::Create(_) => {
            out.extend(event.paths.iter().map(WatchEvent::changed));
        }
        EventKind::Remove(_) => {
            out.extend(event.paths.iter().map(WatchEvent::removed));
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            out.extend(event.paths.iter().map(WatchEvent::removed));
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            out.extend(event.paths.iter().map(WatchEvent::changed));
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            if let [from, to] = event.paths.as_slice() {
                out.push(WatchEvent::removed(from));
                out.push(WatchEvent::changed(to));
            }
        }
        EventKind::Modify(ModifyKind::Name(_)) => {
            // Direction unknown; decide by whether the path still exists
            for path in &event.paths {
                if path.exists() {
                    out.push(WatchEvent::changed(path));
                } else {
                    out.push(WatchEvent::removed(path));
                }
            }
        }
        EventKind::Modify(_) => {
            out.extend(event.paths.iter().filter(|p| !p.is_dir()).map(WatchEvent::changed));
        }
        EventKind::Access(_) | EventKind::Any | EventKind::Other => {}
    }

    out
}

/// Debounced OS watcher built on notify
pub struct NotifyWatchSource {
    debounce: Duration,
    debouncer: Option<Debouncer<RecommendedWatcher, RecommendedCache>>,
}

impl NotifyWatchSource {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            debouncer: None,
        }
    }
}

impl WatchSource for NotifyWatchSource {
    fn subscribe(&mut self, root: &Path, sink: EventSink) -> Result<(), WatchError> {
        if !root.is_dir() {
            return Err(WatchError::RootMissing(root.to_path_buf()));
        }

        // Replace any previous subscription
        self.unsubscribe();

        let mut debouncer = new_debouncer(self.debounce, None, move |result: DebounceEventResult| {
            match result {
                Ok(events) => {
                    for event in events {
                        for change in classify(&event) {
                            if !sink.send(change) {
                                return;
                            }
                        }
                    }
                }
                Err(errors) => {
                    for error in errors {
                        tracing::warn!("Watcher error: {}", error);
                    }
                }
            }
        })?;

        debouncer.watch(root, RecursiveMode::Recursive)?;

        tracing::info!(root = %root.display(), "Watching for script changes");
        self.debouncer = Some(debouncer);
        Ok(())
    }

    fn unsubscribe(&mut self) {
        if let Some(debouncer) = self.debouncer.take() {
            // Joins the debounce thread, dropping its sink
            debouncer.stop();
        }
    }
}

/// Watch source driven by explicit calls to [`ManualWatchHandle::push`]
#[derive(Debug, Default)]
pub struct ManualWatchSource {
    sink: Arc<Mutex<Option<EventSink>>>,
    roots: Arc<Mutex<Vec<PathBuf>>>,
}

/// Injects events into a [`ManualWatchSource`]
#[derive(Debug, Clone)]
pub struct ManualWatchHandle {
    sink: Arc<Mutex<Option<EventSink>>>,
    roots: Arc<Mutex<Vec<PathBuf>>>,
}

impl ManualWatchSource {
    pub fn new() -> (Self, ManualWatchHandle) {
        let source = Self::default();
        let handle = ManualWatchHandle {
            sink: Arc::clone(&source.sink),
            roots: Arc::clone(&source.roots),
        };
        (source, handle)
    }
}

impl WatchSource for ManualWatchSource {
    fn subscribe(&mut self, root: &Path, sink: EventSink) -> Result<(), WatchError> {
        self.roots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(root.to_path_buf());
        *self.sink.lock().unwrap_or_else(PoisonError::into_inner) = Some(sink);
        Ok(())
    }

    fn unsubscribe(&mut self) {
        self.sink.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}

impl ManualWatchHandle {
    /// Deliver an event; returns false when nothing is subscribed
    pub fn push(&self, event: WatchEvent) -> bool {
        match self.sink.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
            Some(sink) => sink.send(event),
            None => false,
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.sink.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    /// Roots passed to `subscribe`, in call order
    pub fn subscribed_roots(&self) -> Vec<PathBuf> {
        self.roots.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}
