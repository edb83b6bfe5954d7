//! Staging driver: validate, replicate, record, tag.

use log::info;
use std::path::PathBuf;

use crate::copy::{installed_files, replicate_tree, ReplicateStats};
use crate::error::Result;
use crate::host::HostEnvironment;
use crate::tag::{resolve_tag, Resolution};
use crate::validate::{validate, PrerequisiteIssue, ValidationMode};

/// Inputs for one staging run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageOptions {
    /// Directory populated by the native build.
    pub library_dir: PathBuf,
    /// Destination tree. Should be empty or absent.
    pub staging_dir: PathBuf,
    pub mode: ValidationMode,
    /// Tag used when the host OS is not recognised.
    pub default_tag: String,
}

impl StageOptions {
    #[must_use]
    pub fn new(library_dir: impl Into<PathBuf>, staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            library_dir: library_dir.into(),
            staging_dir: staging_dir.into(),
            mode: ValidationMode::Strict,
            default_tag: "any".to_owned(),
        }
    }

    #[must_use]
    pub fn with_mode(mut self, mode: ValidationMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_default_tag(mut self, tag: impl Into<String>) -> Self {
        self.default_tag = tag.into();
        self
    }
}

/// Outcome of a staging run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    pub tag: Resolution,
    pub stats: ReplicateStats,
    /// Files and links in the staging tree, relative to it.
    pub installed: Vec<PathBuf>,
    /// Issues tolerated under [`ValidationMode::WarnOnly`].
    pub issues: Vec<PrerequisiteIssue>,
}

/// Runs the staging steps in order.
pub struct Stager {
    options: StageOptions,
}

impl Stager {
    #[must_use]
    pub fn new(options: StageOptions) -> Self {
        Self { options }
    }

    /// Stage the library directory and resolve the tag for `host`.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails in strict mode, or if
    /// replication fails. Replication always rejects a missing or empty
    /// library directory, even in warn-only mode.
    pub fn run(&self, host: &HostEnvironment) -> Result<StageReport> {
        let opts = &self.options;
        let issues = validate(&opts.library_dir, opts.mode)?;

        let stats = replicate_tree(&opts.library_dir, &opts.staging_dir)?;
        let installed = installed_files(&opts.staging_dir)?;
        let tag = resolve_tag(host, &opts.default_tag);

        info!(
            "Staged {} files ({} links, {} bytes) into {} with tag {}",
            stats.files,
            stats.links,
            stats.bytes,
            opts.staging_dir.display(),
            tag.tag
        );

        Ok(StageReport {
            tag,
            stats,
            installed,
            issues,
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::error::PackageError;
    use crate::host::{LibcVersion, OsFamily};
    use crate::tag::Detection;
    use std::fs;
    use std::os::unix::fs::symlink;
    use tempfile::TempDir;

    fn host() -> HostEnvironment {
        HostEnvironment::new(OsFamily::Linux, "x86_64")
            .with_libc_version(Some(LibcVersion::new(2, 36)))
    }

    #[test]
    fn test_run_stages_and_tags() {
        let temp = TempDir::new().unwrap();
        let lib = temp.path().join("install/lib");
        fs::create_dir_all(&lib).unwrap();
        fs::write(lib.join("libOrbbecSDK.so.2.1.0"), b"elf").unwrap();
        symlink("libOrbbecSDK.so.2.1.0", lib.join("libOrbbecSDK.so.2")).unwrap();

        let out = temp.path().join("stage");
        let report = Stager::new(StageOptions::new(&lib, &out)).run(&host()).unwrap();

        assert_eq!(report.tag.tag.as_str(), "manylinux_2_35_x86_64");
        assert_eq!(report.tag.detection, Detection::Probed(LibcVersion::new(2, 36)));
        assert_eq!(report.stats.files, 1);
        assert_eq!(report.stats.links, 1);
        assert_eq!(report.stats.permissions_fixed, 1);
        assert_eq!(
            report.installed,
            vec![
                PathBuf::from("libOrbbecSDK.so.2"),
                PathBuf::from("libOrbbecSDK.so.2.1.0"),
            ]
        );
        assert!(report.issues.is_empty());
    }

    #[test]
    fn test_strict_mode_rejects_headers_only() {
        let temp = TempDir::new().unwrap();
        let lib = temp.path().join("lib");
        fs::create_dir_all(&lib).unwrap();
        fs::write(lib.join("api.h"), b"").unwrap();

        let out = temp.path().join("stage");
        let err = Stager::new(StageOptions::new(&lib, &out))
            .run(&host())
            .unwrap_err();
        assert!(matches!(err, PackageError::MissingSource { .. }));
        assert!(!out.exists(), "strict failure must not touch the destination");
    }

    #[test]
    fn test_warn_only_mode_continues_past_issues() {
        let temp = TempDir::new().unwrap();
        let lib = temp.path().join("lib");
        fs::create_dir_all(&lib).unwrap();
        fs::write(lib.join("api.h"), b"").unwrap();

        let out = temp.path().join("stage");
        let options = StageOptions::new(&lib, &out).with_mode(ValidationMode::WarnOnly);
        let report = Stager::new(options).run(&host()).unwrap();

        assert_eq!(
            report.issues,
            vec![PrerequisiteIssue::NoLibraries(lib.clone())]
        );
        assert!(out.join("api.h").is_file());
    }

    #[test]
    fn test_warn_only_still_rejects_missing_source() {
        let temp = TempDir::new().unwrap();
        let options = StageOptions::new(temp.path().join("absent"), temp.path().join("stage"))
            .with_mode(ValidationMode::WarnOnly);
        let err = Stager::new(options).run(&host()).unwrap_err();
        assert!(matches!(err, PackageError::MissingSource { .. }));
    }

    #[test]
    fn test_default_tag_for_unknown_os() {
        let temp = TempDir::new().unwrap();
        let lib = temp.path().join("lib");
        fs::create_dir_all(&lib).unwrap();
        fs::write(lib.join("libz.so"), b"").unwrap();

        let options =
            StageOptions::new(&lib, temp.path().join("stage")).with_default_tag("plan9_any");
        let env = HostEnvironment::new(OsFamily::from_os_name("plan9"), "mips");
        let report = Stager::new(options).run(&env).unwrap();
        assert_eq!(report.tag.tag.as_str(), "plan9_any");
    }
}
