//! rbxfs: serve a directory of Lua scripts to a remote object namespace.
//!
//! Script files under a root directory are mapped to dotted object names
//! (see [`vfs::NameTranslator`]); edits on disk are tracked in a change log
//! that clients poll over HTTP, and clients can read and push script
//! contents through the same server.

pub mod commands;
pub mod config;
pub mod server;
pub mod services;
pub mod utils;
pub mod vfs;

use std::sync::Arc;

use config::Config;
use services::NotifyWatchSource;
use vfs::{Vfs, VfsError};

/// Build a watching service for a loaded configuration
pub fn open_project(config: &Config) -> Result<Arc<Vfs>, VfsError> {
    let source = NotifyWatchSource::new(config.debounce());
    let vfs = Vfs::new(&config.root_directory, &config.root_object, Box::new(source))?;
    vfs.start_watching()?;
    Ok(Arc::new(vfs))
}
