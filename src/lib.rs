//! Staging of prebuilt native libraries and platform tag resolution.
//!
//! Copies a directory of already-built shared libraries into a staging tree
//! without dereferencing symlinks, marks shared libraries executable, and
//! computes the compatibility tag (`manylinux_2_35_x86_64`,
//! `macosx_11_0_arm64`, `win_amd64`, ...) for the packaged artifact.
//!
//! The host is inspected once into a [`HostEnvironment`]; tag resolution is
//! a pure function of that value.

mod copy;
mod error;
mod host;
mod stage;
mod tag;
mod validate;

pub use copy::{
    fix_library_permissions, installed_files, is_shared_library, make_executable,
    remove_existing, replicate_tree, EntryKind, ReplicateStats,
};
pub use error::{PackageError, Result};
pub use host::{
    parse_ldd_output, probe_libc_version, HostEnvironment, LibcVersion, OsFamily, LIBC64_PATH,
};
pub use stage::{StageOptions, StageReport, Stager};
pub use tag::{manylinux_baseline, resolve_tag, Detection, PlatformTag, Resolution};
pub use validate::{
    check_prerequisites, is_library_file, validate, PrerequisiteIssue, ValidationMode,
    LIBRARY_EXTENSIONS,
};
