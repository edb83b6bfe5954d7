//! Error types for staging prebuilt libraries.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that abort a staging run.
#[derive(Debug, Error)]
pub enum PackageError {
    /// The library directory is absent, empty, or holds no libraries.
    #[error("library directory {path} is not usable: {reason}")]
    MissingSource {
        /// The library directory that was checked.
        path: PathBuf,
        /// Human-readable description of every violation found.
        reason: String,
    },

    /// The destination lies inside the tree being copied.
    #[error("destination {destination} is inside source directory {root}")]
    NestedDestination {
        /// The normalised source directory.
        root: PathBuf,
        /// The normalised destination directory.
        destination: PathBuf,
    },

    /// A filesystem operation failed on a specific path.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// The path being read or written.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },
}

/// Convenience alias for staging results.
pub type Result<T> = std::result::Result<T, PackageError>;

/// Attach the offending path to an [`io::Result`].
pub(crate) trait IoResultExt<T> {
    fn at(self, path: &Path) -> Result<T>;
}

impl<T> IoResultExt<T> for io::Result<T> {
    fn at(self, path: &Path) -> Result<T> {
        self.map_err(|source| PackageError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_names_path() {
        let err: Result<()> =
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied")).at(Path::new("/x/y"));
        let msg = err.unwrap_err().to_string();
        assert!(msg.contains("/x/y"), "got: {msg}");
        assert!(msg.contains("denied"), "got: {msg}");
    }
}
