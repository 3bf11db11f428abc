use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::trace;

/// Return a [`NamedTempFile`] in the specified directory.
///
/// Sets the permissions of the temporary file to `0o666`, to match the non-temporary file default.
/// ([`NamedTempfile`] defaults to `0o600`.)
#[cfg(unix)]
pub fn tempfile_in(path: &Path) -> std::io::Result<NamedTempFile> {
    use std::os::unix::fs::PermissionsExt;
    tempfile::Builder::new()
        .permissions(std::fs::Permissions::from_mode(0o666))
        .tempfile_in(path)
}

/// Return a [`NamedTempFile`] in the specified directory.
#[cfg(not(unix))]
pub fn tempfile_in(path: &Path) -> std::io::Result<NamedTempFile> {
    tempfile::Builder::new().tempfile_in(path)
}

fn parent_of(path: &Path) -> std::io::Result<&Path> {
    path.parent().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("Write path has no parent: {}", path.display()),
        )
    })
}

fn persist(temp_file: NamedTempFile, path: &Path) -> std::io::Result<()> {
    temp_file.persist(path).map_err(|err| {
        std::io::Error::other(format!(
            "Failed to persist temporary file to {}: {}",
            path.display(),
            err.error
        ))
    })?;
    Ok(())
}

/// Write `data` to `path` atomically using a temporary file and atomic rename.
pub fn write_atomic_sync(path: impl AsRef<Path>, data: impl AsRef<[u8]>) -> std::io::Result<()> {
    let path = path.as_ref();
    let temp_file = tempfile_in(parent_of(path)?)?;
    fs_err::write(&temp_file, &data)?;
    persist(temp_file, path)
}

/// Find the first `*.egg-info` directory below `root`, as left behind by a legacy
/// `setup.py egg_info` run.
///
/// Directories are visited in name order, so the result is stable across platforms.
pub fn find_egg_info(root: impl AsRef<Path>) -> Option<PathBuf> {
    let root = root.as_ref();
    let found = walkdir::WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(err) => {
                trace!("Skipping unreadable entry under {}: {err}", root.display());
                None
            }
        })
        .find(|entry| {
            entry.file_type().is_dir()
                && entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| name.ends_with(".egg-info"))
        })
        .map(walkdir::DirEntry::into_path);
    found
}
