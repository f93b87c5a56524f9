//! Virtual File System (VFS) Module
//!
//! Maps script files under a root directory to named, typed objects and keeps
//! a log of the latest change to each object as the tree is edited.

pub mod change_log;
pub mod identity;
pub mod naming;
pub mod service;

pub use change_log::*;
pub use identity::*;
pub use naming::*;
pub use service::*;
