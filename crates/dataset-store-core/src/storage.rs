//! Storage-medium primitives shared by the physical layout handlers.
//!
//! This module centralizes the low-level file operations the handlers, the
//! catalog, and the persist path build on:
//!
//! - Atomic replacement writes (temp-write-then-rename), so a reader never
//!   observes a partially written artifact.
//! - Create-new writes ("create only if not exists"), used where a path must
//!   be claimed exactly once (immutable as-of versions, archived snapshots).
//! - Reads with `NotFound` special-casing so callers can distinguish a
//!   missing artifact from an I/O failure.
//! - Directory listings for version discovery and catalog scans.
//!
//! All paths are resolved relative to a [`RepoLocation`]. Only a local
//! filesystem backend exists today; the enum keeps the door open for object
//! storage without rewriting the handlers.

use snafu::{Backtrace, prelude::*};
use std::{
    error::Error,
    fmt,
    io,
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, OpenOptions},
    io::AsyncWriteExt,
};

/// Result type used by storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// The root location of a repository's physical storage.
#[derive(Clone, Debug)]
pub enum RepoLocation {
    /// A repository rooted at a local filesystem directory.
    Local(PathBuf),
    // Future:
    // ObjectStore { bucket: String, prefix: String },
}

impl RepoLocation {
    /// Creates a `RepoLocation` for a local filesystem root.
    pub fn local(root: impl Into<PathBuf>) -> Self {
        RepoLocation::Local(root.into())
    }

    /// Resolve a relative path against this location.
    pub fn join(&self, rel: &Path) -> PathBuf {
        match self {
            RepoLocation::Local(root) => root.join(rel),
        }
    }
}

/// Errors produced by the storage backend implementation.
///
/// Backend-specific I/O errors are wrapped so higher layers can map them into
/// [`StorageError`] variants with additional context.
#[derive(Debug)]
pub enum BackendError {
    /// A local filesystem I/O error.
    Local(io::Error),
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::Local(e) => write!(f, "local I/O error: {e}"),
        }
    }
}

impl Error for BackendError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            BackendError::Local(e) => Some(e),
        }
    }
}

/// Errors that can occur during storage operations.
#[derive(Debug, Snafu)]
pub enum StorageError {
    /// The specified path was not found.
    #[snafu(display("Path not found: {path}"))]
    NotFound {
        /// The path that was not found.
        path: String,
        /// Underlying backend error that caused the failure.
        source: BackendError,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// The specified path already exists when creation was requested with
    /// create-new semantics.
    #[snafu(display("Path already exists: {path}"))]
    AlreadyExists {
        /// The path that was found to already exist.
        path: String,
        /// Underlying backend error that indicates the existing resource.
        source: BackendError,
        /// The backtrace captured when the error occurred.
        backtrace: Backtrace,
    },

    /// An I/O error occurred on the local filesystem.
    #[snafu(display("Local I/O error at {path}: {source}"))]
    OtherIo {
        /// The path where the I/O error occurred.
        path: String,
        /// Underlying backend I/O error with platform-specific details.
        source: BackendError,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },
}

async fn create_parent_dir(abs: &Path) -> StorageResult<()> {
    if let Some(parent) = abs.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(BackendError::Local)
            .context(OtherIoSnafu {
                path: parent.display().to_string(),
            })?;
    }
    Ok(())
}

/// Guard that removes a temporary file on drop unless disarmed.
/// Used to ensure cleanup on error paths during atomic writes.
struct TempFileGuard {
    path: PathBuf,
    armed: bool,
}

impl TempFileGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    /// Disarm the guard so the file is NOT removed on drop.
    /// Call this after a successful rename.
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if self.armed {
            // Best-effort cleanup; we are likely already handling another error.
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Write `contents` to `rel_path` inside `location` using an atomic write.
///
/// Performs a write-then-rename sequence: the payload goes to a temporary
/// file next to the target path, is synced, and is then renamed into place.
/// An existing file at the target path is replaced wholesale; a concurrent
/// reader sees either the old artifact or the new one, never a mixture.
pub async fn write_atomic(
    location: &RepoLocation,
    rel_path: &Path,
    contents: &[u8],
) -> StorageResult<()> {
    let abs = location.join(rel_path);

    create_parent_dir(&abs).await?;

    let tmp_path = abs.with_extension("tmp");
    let mut guard = TempFileGuard::new(tmp_path.clone());

    {
        let mut file = fs::File::create(&tmp_path)
            .await
            .map_err(BackendError::Local)
            .context(OtherIoSnafu {
                path: tmp_path.display().to_string(),
            })?;

        file.write_all(contents)
            .await
            .map_err(BackendError::Local)
            .context(OtherIoSnafu {
                path: tmp_path.display().to_string(),
            })?;

        file.sync_all()
            .await
            .map_err(BackendError::Local)
            .context(OtherIoSnafu {
                path: tmp_path.display().to_string(),
            })?;
    }

    fs::rename(&tmp_path, &abs)
        .await
        .map_err(BackendError::Local)
        .context(OtherIoSnafu {
            path: abs.display().to_string(),
        })?;

    guard.disarm();

    Ok(())
}

/// Create a *new* file at `rel_path` and write `contents`, failing with
/// [`StorageError::AlreadyExists`] if the file already exists.
///
/// This is the primitive behind per-version uniqueness: an as-of version or
/// an archived snapshot is claimed exactly once, and a losing racer gets a
/// clean error instead of clobbering the winner.
pub async fn write_new(
    location: &RepoLocation,
    rel_path: &Path,
    contents: &[u8],
) -> StorageResult<()> {
    let abs = location.join(rel_path);
    create_parent_dir(&abs).await?;

    let path_str = abs.display().to_string();

    let open_result = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&abs)
        .await;

    let mut file = match open_result {
        Ok(f) => f,
        Err(e) => {
            let backend = BackendError::Local(e);
            let storage_err = match &backend {
                BackendError::Local(inner) if inner.kind() == io::ErrorKind::AlreadyExists => {
                    StorageError::AlreadyExists {
                        path: path_str,
                        source: backend,
                        backtrace: Backtrace::capture(),
                    }
                }
                _ => StorageError::OtherIo {
                    path: path_str,
                    source: backend,
                    backtrace: Backtrace::capture(),
                },
            };
            return Err(storage_err);
        }
    };

    file.write_all(contents)
        .await
        .map_err(BackendError::Local)
        .context(OtherIoSnafu {
            path: abs.display().to_string(),
        })?;

    file.sync_all()
        .await
        .map_err(BackendError::Local)
        .context(OtherIoSnafu {
            path: abs.display().to_string(),
        })?;

    Ok(())
}

/// Read the full contents of the file at `rel_path` within `location`.
///
/// Returns `StorageError::NotFound` if the file does not exist.
pub async fn read_all_bytes(location: &RepoLocation, rel_path: &Path) -> StorageResult<Vec<u8>> {
    let abs = location.join(rel_path);
    let path_str = abs.display().to_string();

    match fs::read(&abs).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            Err(BackendError::Local(e)).context(NotFoundSnafu { path: path_str })
        }
        Err(e) => Err(BackendError::Local(e)).context(OtherIoSnafu { path: path_str }),
    }
}

/// Read the file at `rel_path` within `location` as a `String`.
pub async fn read_to_string(location: &RepoLocation, rel_path: &Path) -> StorageResult<String> {
    let abs = location.join(rel_path);
    let path_str = abs.display().to_string();

    match fs::read_to_string(&abs).await {
        Ok(s) => Ok(s),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            Err(BackendError::Local(e)).context(NotFoundSnafu { path: path_str })
        }
        Err(e) => Err(BackendError::Local(e)).context(OtherIoSnafu { path: path_str }),
    }
}

/// Whether an entry is a file or a directory, as reported by [`list_dir`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    /// A regular file.
    File,
    /// A directory.
    Dir,
}

/// A single directory entry returned by [`list_dir`].
#[derive(Clone, Debug)]
pub struct DirEntry {
    /// The entry's file name (final path component).
    pub name: String,
    /// Whether the entry is a file or a directory.
    pub kind: EntryKind,
}

/// List the entries of the directory at `rel_path` within `location`.
///
/// A missing directory yields an empty listing rather than an error: the
/// version-discovery and catalog-scan callers treat "nothing written yet"
/// and "directory absent" the same way. Entries that are neither regular
/// files nor directories are skipped.
pub async fn list_dir(location: &RepoLocation, rel_path: &Path) -> StorageResult<Vec<DirEntry>> {
    let abs = location.join(rel_path);
    let path_str = abs.display().to_string();

    let mut rd = match fs::read_dir(&abs).await {
        Ok(rd) => rd,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(BackendError::Local(e)).context(OtherIoSnafu { path: path_str }),
    };

    let mut entries = Vec::new();
    loop {
        let next = rd
            .next_entry()
            .await
            .map_err(BackendError::Local)
            .context(OtherIoSnafu {
                path: path_str.clone(),
            })?;
        let Some(entry) = next else { break };

        let file_type = entry
            .file_type()
            .await
            .map_err(BackendError::Local)
            .context(OtherIoSnafu {
                path: path_str.clone(),
            })?;

        let kind = if file_type.is_file() {
            EntryKind::File
        } else if file_type.is_dir() {
            EntryKind::Dir
        } else {
            continue;
        };

        entries.push(DirEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            kind,
        });
    }

    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[tokio::test]
    async fn write_atomic_creates_file_with_contents() -> TestResult {
        let tmp = TempDir::new()?;
        let location = RepoLocation::local(tmp.path());

        write_atomic(&location, Path::new("test.bin"), b"hello world").await?;

        let read_back = tokio::fs::read(tmp.path().join("test.bin")).await?;
        assert_eq!(read_back, b"hello world");
        Ok(())
    }

    #[tokio::test]
    async fn write_atomic_creates_parent_directories() -> TestResult {
        let tmp = TempDir::new()?;
        let location = RepoLocation::local(tmp.path());

        write_atomic(&location, Path::new("nested/deep/file.bin"), b"nested").await?;

        assert!(tmp.path().join("nested/deep/file.bin").exists());
        Ok(())
    }

    #[tokio::test]
    async fn write_atomic_overwrites_existing_file() -> TestResult {
        let tmp = TempDir::new()?;
        let location = RepoLocation::local(tmp.path());
        let rel = Path::new("overwrite.bin");

        write_atomic(&location, rel, b"original").await?;
        write_atomic(&location, rel, b"updated").await?;

        let read_back = tokio::fs::read(tmp.path().join(rel)).await?;
        assert_eq!(read_back, b"updated");
        Ok(())
    }

    #[tokio::test]
    async fn write_atomic_no_leftover_tmp_file() -> TestResult {
        let tmp = TempDir::new()?;
        let location = RepoLocation::local(tmp.path());

        write_atomic(&location, Path::new("clean.bin"), b"data").await?;

        assert!(!tmp.path().join("clean.tmp").exists());
        Ok(())
    }

    #[tokio::test]
    async fn write_new_fails_if_file_exists() -> TestResult {
        let tmp = TempDir::new()?;
        let location = RepoLocation::local(tmp.path());
        let rel = Path::new("existing.bin");

        write_new(&location, rel, b"first").await?;
        let result = write_new(&location, rel, b"second").await;

        let err = result.expect_err("expected AlreadyExists error");
        assert!(matches!(err, StorageError::AlreadyExists { .. }));

        // Original content should be unchanged.
        let read_back = tokio::fs::read(tmp.path().join(rel)).await?;
        assert_eq!(read_back, b"first");
        Ok(())
    }

    #[tokio::test]
    async fn read_all_bytes_returns_not_found_for_missing_file() -> TestResult {
        let tmp = TempDir::new()?;
        let location = RepoLocation::local(tmp.path());

        let result = read_all_bytes(&location, Path::new("missing.bin")).await;

        let err = result.expect_err("expected NotFound error");
        assert!(matches!(err, StorageError::NotFound { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn list_dir_missing_directory_is_empty() -> TestResult {
        let tmp = TempDir::new()?;
        let location = RepoLocation::local(tmp.path());

        let entries = list_dir(&location, Path::new("no_such_dir")).await?;

        assert!(entries.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn list_dir_reports_files_and_dirs_sorted() -> TestResult {
        let tmp = TempDir::new()?;
        let location = RepoLocation::local(tmp.path());

        tokio::fs::create_dir(tmp.path().join("b_dir")).await?;
        tokio::fs::write(tmp.path().join("a_file"), b"x").await?;

        let entries = list_dir(&location, Path::new("")).await?;

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "a_file");
        assert_eq!(entries[0].kind, EntryKind::File);
        assert_eq!(entries[1].name, "b_dir");
        assert_eq!(entries[1].kind, EntryKind::Dir);
        Ok(())
    }
}
