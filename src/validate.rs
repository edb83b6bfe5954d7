//! Prerequisite checks on the library directory before staging.

use log::warn;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::copy::is_shared_library;
use crate::error::{PackageError, Result};

/// Extensions recognised as native libraries (shared, static, import).
pub const LIBRARY_EXTENSIONS: &[&str] = &["so", "dylib", "dll", "pyd", "a", "lib"];

/// What to do when the library directory fails its checks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ValidationMode {
    /// Abort with [`PackageError::MissingSource`].
    #[default]
    Strict,
    /// Log each issue and let the caller continue.
    WarnOnly,
}

/// A single problem found in the library directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrerequisiteIssue {
    Missing(PathBuf),
    Empty(PathBuf),
    NoLibraries(PathBuf),
}

impl fmt::Display for PrerequisiteIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing(p) => write!(f, "Directory '{}' does not exist.", p.display()),
            Self::Empty(p) => write!(f, "Directory '{}' is empty.", p.display()),
            Self::NoLibraries(p) => write!(f, "No library files found in '{}'", p.display()),
        }
    }
}

/// Whether a file name looks like a native library.
#[must_use]
pub fn is_library_file(file_name: &str) -> bool {
    if is_shared_library(file_name) {
        return true;
    }
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| LIBRARY_EXTENSIONS.contains(&ext))
}

/// Collect every issue with `lib_dir`. An empty list means it is usable.
#[must_use]
pub fn check_prerequisites(lib_dir: &Path) -> Vec<PrerequisiteIssue> {
    if !lib_dir.is_dir() {
        return vec![PrerequisiteIssue::Missing(lib_dir.to_path_buf())];
    }

    let mut issues = Vec::new();
    let is_empty = fs::read_dir(lib_dir)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(true);
    if is_empty {
        issues.push(PrerequisiteIssue::Empty(lib_dir.to_path_buf()));
    }
    if !contains_library(lib_dir) {
        issues.push(PrerequisiteIssue::NoLibraries(lib_dir.to_path_buf()));
    }
    issues
}

/// Check `lib_dir` and apply `mode` to the result.
///
/// # Errors
///
/// In [`ValidationMode::Strict`], any issue becomes
/// [`PackageError::MissingSource`] listing all of them.
pub fn validate(lib_dir: &Path, mode: ValidationMode) -> Result<Vec<PrerequisiteIssue>> {
    let issues = check_prerequisites(lib_dir);
    if issues.is_empty() {
        return Ok(issues);
    }

    match mode {
        ValidationMode::Strict => Err(PackageError::MissingSource {
            path: lib_dir.to_path_buf(),
            reason: issues
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; "),
        }),
        ValidationMode::WarnOnly => {
            for issue in &issues {
                warn!("{issue}");
            }
            warn!("Continuing, but staging may fail if libraries are missing.");
            Ok(issues)
        }
    }
}

/// Unreadable subdirectories count as holding no libraries.
fn contains_library(dir: &Path) -> bool {
    let Ok(entries) = fs::read_dir(dir) else {
        return false;
    };
    entries.flatten().any(|entry| {
        let path = entry.path();
        match entry.file_type() {
            Ok(ft) if ft.is_dir() => contains_library(&path),
            Ok(_) => path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(is_library_file),
            Err(_) => false,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    #[rstest]
    #[case("libfoo.so", true)]
    #[case("libfoo.so.2", true)]
    #[case("foo.dll", true)]
    #[case("foo.lib", true)]
    #[case("_native.pyd", true)]
    #[case("libfoo.a", true)]
    #[case("foo.h", false)]
    #[case("config.cmake", false)]
    fn test_is_library_file(#[case] name: &str, #[case] expected: bool) {
        assert_eq!(is_library_file(name), expected, "{name}");
    }

    #[test]
    fn test_missing_directory() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("install/lib");
        assert_eq!(
            check_prerequisites(&dir),
            vec![PrerequisiteIssue::Missing(dir.clone())]
        );
    }

    #[test]
    fn test_empty_directory_reports_both_issues() {
        let temp = TempDir::new().unwrap();
        let issues = check_prerequisites(temp.path());
        assert_eq!(
            issues,
            vec![
                PrerequisiteIssue::Empty(temp.path().to_path_buf()),
                PrerequisiteIssue::NoLibraries(temp.path().to_path_buf()),
            ]
        );
    }

    #[test]
    fn test_nested_library_is_found() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("x/y")).unwrap();
        fs::write(temp.path().join("x/y/libdeep.so.3"), b"").unwrap();
        assert!(check_prerequisites(temp.path()).is_empty());
    }

    #[test]
    fn test_headers_only_is_not_enough() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("api.h"), b"").unwrap();
        assert_eq!(
            check_prerequisites(temp.path()),
            vec![PrerequisiteIssue::NoLibraries(temp.path().to_path_buf())]
        );
    }

    #[test]
    fn test_strict_mode_fails() {
        let temp = TempDir::new().unwrap();
        let err = validate(&temp.path().join("nope"), ValidationMode::Strict).unwrap_err();
        assert!(matches!(err, PackageError::MissingSource { .. }));
        assert!(err.to_string().contains("does not exist"), "{err}");
    }

    #[test]
    fn test_warn_only_mode_continues() {
        let temp = TempDir::new().unwrap();
        let issues = validate(temp.path(), ValidationMode::WarnOnly).unwrap();
        assert_eq!(issues.len(), 2);
    }
}
