//! Crash-safe file writes
//!
//! Script files pushed by the client are written to a temporary sibling and
//! renamed into place, so the watcher never observes a half-written script.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

/// Write data to a file atomically with fsync
///
/// This function:
/// 1. Creates the parent directory if needed
/// 2. Writes data to a temporary file in the same directory
/// 3. Calls fsync on the file and atomically renames it to the target
/// 4. Syncs the directory to ensure the rename is durable
///
/// The temporary name ends in the process id, never in a script extension.
/// If any step fails, the temporary file is cleaned up.
pub fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    let parent = path.parent().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("Cannot determine parent directory for: {}", path.display()),
        )
    })?;

    fs::create_dir_all(parent)?;

    let temp_name = format!(
        ".{}.tmp.{}",
        path.file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "file".to_string()),
        std::process::id()
    );
    let temp_path = parent.join(&temp_name);

    let write_result = (|| -> io::Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)?;
        file.write_all(data)?;
        file.sync_all()
    })();

    if let Err(e) = write_result.and_then(|_| fs::rename(&temp_path, path)) {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }

    sync_directory(parent)
}

/// Sync a directory so a rename inside it is durable
pub fn sync_directory(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        fs::File::open(path)?.sync_all()?;
    }

    // NTFS renames are atomic; directories cannot be opened for sync
    #[cfg(not(unix))]
    {
        let _ = path;
    }

    Ok(())
}
