//! Filesystem helpers

pub mod io;

pub use io::atomic_write;
