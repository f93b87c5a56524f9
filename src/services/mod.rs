pub mod watcher;

pub use watcher::{
    classify, EventSink, ManualWatchHandle, ManualWatchSource, NotifyWatchSource, WatchError,
    WatchEvent, WatchEventKind, WatchSource,
};
