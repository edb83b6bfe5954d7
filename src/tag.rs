//! Platform compatibility tags for packaged artifacts.

use log::warn;
use std::fmt;

use crate::host::{HostEnvironment, LibcVersion, OsFamily};

/// glibc baselines, newest first. The oldest baseline catches everything
/// below the last threshold.
const MANYLINUX_THRESHOLDS: &[LibcVersion] = &[
    LibcVersion::new(2, 35),
    LibcVersion::new(2, 34),
    LibcVersion::new(2, 31),
    LibcVersion::new(2, 17),
];
const MANYLINUX_OLDEST: LibcVersion = LibcVersion::new(2, 12);

/// Baseline used when the glibc version cannot be determined.
const MANYLINUX_RECENT: LibcVersion = LibcVersion::new(2, 34);

const MACOS_ARM64_TAG: &str = "macosx_11_0_arm64";
const MACOS_X86_64_TAG: &str = "macosx_10_15_x86_64";
const WINDOWS_64_TAG: &str = "win_amd64";
const WINDOWS_32_TAG: &str = "win32";

const WINDOWS_64_MARKERS: &[&str] = &["amd64", "x86_64", "x64"];

/// A platform compatibility tag, e.g. `manylinux_2_35_x86_64`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PlatformTag(String);

impl PlatformTag {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn manylinux(baseline: LibcVersion, arch: &str) -> Self {
        Self(format!(
            "manylinux_{}_{}_{arch}",
            baseline.major, baseline.minor
        ))
    }
}

impl fmt::Display for PlatformTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a tag was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detection {
    /// The probed glibc version selected a baseline.
    Probed(LibcVersion),
    /// No version, but the 64-bit libc path exists.
    LibcPathHeuristic,
    /// No evidence at all; the recent baseline was assumed.
    Default,
    /// Chosen from the CPU architecture alone (macOS, Windows).
    Architecture,
    /// Unknown OS; the caller's default tag was used unchanged.
    PassThrough,
}

impl Detection {
    /// Whether the tag is a degraded guess rather than a precise detection.
    #[must_use]
    pub fn is_fallback(self) -> bool {
        matches!(self, Self::LibcPathHeuristic | Self::Default | Self::PassThrough)
    }
}

/// A resolved tag and the evidence behind it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub tag: PlatformTag,
    pub detection: Detection,
}

/// Compute the platform tag for `env`.
///
/// Never fails. Unknown operating systems get `default_tag` back unchanged.
#[must_use]
pub fn resolve_tag(env: &HostEnvironment, default_tag: &str) -> Resolution {
    let resolution = match &env.os {
        OsFamily::Linux => resolve_linux(env),
        OsFamily::MacOs => Resolution {
            tag: PlatformTag(macos_tag(&env.arch).to_owned()),
            detection: Detection::Architecture,
        },
        OsFamily::Windows => Resolution {
            tag: PlatformTag(windows_tag(&env.arch).to_owned()),
            detection: Detection::Architecture,
        },
        OsFamily::Other(name) => {
            warn!("Unrecognised OS '{name}', using default platform tag '{default_tag}'");
            Resolution {
                tag: PlatformTag(default_tag.to_owned()),
                detection: Detection::PassThrough,
            }
        }
    };

    if resolution.detection.is_fallback() && env.os == OsFamily::Linux {
        warn!(
            "Could not determine glibc version, assuming {} ({:?})",
            resolution.tag, resolution.detection
        );
    }
    resolution
}

/// Select the newest baseline not above `version`.
#[must_use]
pub fn manylinux_baseline(version: LibcVersion) -> LibcVersion {
    MANYLINUX_THRESHOLDS
        .iter()
        .copied()
        .find(|threshold| *threshold <= version)
        .unwrap_or(MANYLINUX_OLDEST)
}

fn resolve_linux(env: &HostEnvironment) -> Resolution {
    let (baseline, detection) = match env.libc_version {
        Some(version) => (manylinux_baseline(version), Detection::Probed(version)),
        None if env.libc_path_exists => (MANYLINUX_RECENT, Detection::LibcPathHeuristic),
        None => (MANYLINUX_RECENT, Detection::Default),
    };
    Resolution {
        tag: PlatformTag::manylinux(baseline, &env.arch),
        detection,
    }
}

fn macos_tag(arch: &str) -> &'static str {
    match arch.to_ascii_lowercase().as_str() {
        "arm64" | "aarch64" => MACOS_ARM64_TAG,
        _ => MACOS_X86_64_TAG,
    }
}

/// Only x86-64 names count as 64-bit; Windows on ARM64 gets `win32`.
fn windows_tag(arch: &str) -> &'static str {
    let arch = arch.to_ascii_lowercase();
    if WINDOWS_64_MARKERS.iter().any(|marker| arch.contains(marker)) {
        WINDOWS_64_TAG
    } else {
        WINDOWS_32_TAG
    }
}
