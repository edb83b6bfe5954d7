//! Host environment inspection.
//!
//! All live host state (OS, CPU architecture, C library version) is read
//! here, once, into a [`HostEnvironment`]. Tag resolution works on that
//! value and never looks at the host itself.

use anyhow::{Context, Result};
use log::debug;
use std::cmp::Ordering;
use std::fmt;
use std::path::Path;
use std::process::Command;

/// Conventional location of the 64-bit glibc shared object.
pub const LIBC64_PATH: &str = "/lib64/libc.so.6";

/// Operating system family, as far as tagging cares.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OsFamily {
    Linux,
    MacOs,
    Windows,
    /// Anything else, carrying the reported OS name.
    Other(String),
}

impl OsFamily {
    /// Map an OS name (`std::env::consts::OS` style) to a family.
    #[must_use]
    pub fn from_os_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "linux" => Self::Linux,
            "macos" | "darwin" => Self::MacOs,
            "windows" => Self::Windows,
            other => Self::Other(other.to_owned()),
        }
    }
}

/// A `major.minor` C library version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LibcVersion {
    pub major: u32,
    pub minor: u32,
}

impl LibcVersion {
    #[must_use]
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Parse `"2.35"` or `"2.35.1"`; extra components are ignored.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let mut parts = text.trim().split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next()?.parse().ok()?;
        Some(Self { major, minor })
    }
}

impl Ord for LibcVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor).cmp(&(other.major, other.minor))
    }
}

impl PartialOrd for LibcVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for LibcVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Everything the tag resolver is allowed to know about the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEnvironment {
    pub os: OsFamily,
    /// CPU architecture name, e.g. `x86_64`, `aarch64`, `arm64`.
    pub arch: String,
    /// glibc version reported by the dynamic linker, if it could be probed.
    pub libc_version: Option<LibcVersion>,
    /// Whether [`LIBC64_PATH`] exists.
    pub libc_path_exists: bool,
}

impl HostEnvironment {
    /// Build an environment by hand, with no libc evidence.
    #[must_use]
    pub fn new(os: OsFamily, arch: impl Into<String>) -> Self {
        Self {
            os,
            arch: arch.into(),
            libc_version: None,
            libc_path_exists: false,
        }
    }

    #[must_use]
    pub fn with_libc_version(mut self, version: Option<LibcVersion>) -> Self {
        self.libc_version = version;
        self
    }

    #[must_use]
    pub fn with_libc_path(mut self, exists: bool) -> Self {
        self.libc_path_exists = exists;
        self
    }

    /// Inspect the running host.
    ///
    /// The libc probe only runs on Linux. A failed probe is recorded as
    /// `libc_version: None`, never as an error.
    #[must_use]
    pub fn detect() -> Self {
        let os = OsFamily::from_os_name(std::env::consts::OS);
        let arch = std::env::consts::ARCH.to_owned();

        let (libc_version, libc_path_exists) = if os == OsFamily::Linux {
            let version = match probe_libc_version() {
                Ok(version) => version,
                Err(e) => {
                    debug!("glibc probe failed: {e:#}");
                    None
                }
            };
            (version, Path::new(LIBC64_PATH).exists())
        } else {
            (None, false)
        };

        let env = Self {
            os,
            arch,
            libc_version,
            libc_path_exists,
        };
        debug!("Detected host environment: {env:?}");
        env
    }
}

/// Ask the dynamic linker for its C library version via `ldd --version`.
///
/// Returns `Ok(None)` if `ldd` ran but did not report a glibc version
/// (e.g. musl).
///
/// # Errors
///
/// Returns an error if `ldd` cannot be spawned.
pub fn probe_libc_version() -> Result<Option<LibcVersion>> {
    let output = Command::new("ldd")
        .arg("--version")
        .output()
        .context("ldd command not found")?;

    // musl's ldd prints its banner to stderr and exits non-zero.
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));

    let version = parse_ldd_output(&text);
    if let Some(version) = version {
        debug!("Detected glibc version: {version}");
    }
    Ok(version)
}

/// Extract the glibc version from `ldd --version` output.
///
/// Example output:
/// ```text
/// ldd (Ubuntu GLIBC 2.35-0ubuntu3.1) 2.35
/// Copyright (C) 2022 Free Software Foundation, Inc.
/// ```
///
/// Only output that identifies glibc is accepted. The first `major.minor`
/// number pair wins.
#[must_use]
pub fn parse_ldd_output(output: &str) -> Option<LibcVersion> {
    if !(output.contains("GLIBC") || output.contains("glibc") || output.contains("GNU libc")) {
        return None;
    }

    output
        .split(|c: char| !(c.is_ascii_digit() || c == '.'))
        .filter(|token| token.contains('.'))
        .find_map(|token| LibcVersion::parse(token.trim_matches('.')))
}
