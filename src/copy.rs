//! Tree replication that keeps symlinks as symlinks and marks shared
//! libraries executable.

use log::{debug, info};
use std::fs::{self, File, FileTimes};
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::error::{IoResultExt, PackageError, Result};

/// Counters collected while replicating a tree.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplicateStats {
    /// Regular files copied.
    pub files: usize,
    /// Symbolic links recreated.
    pub links: usize,
    /// Bytes written for regular files.
    pub bytes: u64,
    /// Shared libraries whose mode gained execute bits.
    pub permissions_fixed: usize,
}

/// What a directory entry is, without following symlinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Symlink,
    Directory,
    File,
    /// FIFOs, sockets and device nodes.
    Other,
}

impl EntryKind {
    /// Classify `path` using `symlink_metadata`.
    pub fn of(path: &Path) -> Result<Self> {
        let file_type = fs::symlink_metadata(path).at(path)?.file_type();
        Ok(if file_type.is_symlink() {
            Self::Symlink
        } else if file_type.is_dir() {
            Self::Directory
        } else if file_type.is_file() {
            Self::File
        } else {
            Self::Other
        })
    }
}

/// Whether a file name marks a dynamically loaded shared library.
///
/// Matches `.so`, `.dylib` and versioned names such as `libfoo.so.1.2`.
#[must_use]
pub fn is_shared_library(file_name: &str) -> bool {
    if file_name.ends_with(".so") || file_name.ends_with(".dylib") {
        return true;
    }
    file_name
        .match_indices(".so.")
        .any(|(i, _)| file_name[i + 4..].starts_with(|c: char| c.is_ascii_digit()))
}

/// Add execute bits for owner, group and other to an existing mode.
///
/// Returns `Ok(true)` if the mode changed. Always `Ok(false)` on non-Unix
/// platforms.
pub fn make_executable(path: &Path) -> Result<bool> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let mut perms = fs::metadata(path).at(path)?.permissions();
        let mode = perms.mode();
        if mode & 0o111 == 0o111 {
            return Ok(false);
        }
        perms.set_mode(mode | 0o111);
        fs::set_permissions(path, perms).at(path)?;
        info!(
            "Set executable bits: {} ({:o} -> {:o})",
            path.display(),
            mode & 0o7777,
            (mode | 0o111) & 0o7777
        );
        Ok(true)
    }
    #[cfg(not(unix))]
    {
        let _ = path;
        Ok(false)
    }
}

/// Remove whatever sits at `path`: symlinks and files are unlinked,
/// directories removed recursively. A missing path is not an error.
pub fn remove_existing(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_symlink() => fs::remove_file(path)
            .or_else(|_| fs::remove_dir(path))
            .at(path),
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path).at(path),
        Ok(_) => fs::remove_file(path).at(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(PackageError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Copy `source_dir` into `destination_dir`, then mark every shared library
/// in the destination executable.
///
/// Symlinks are recreated rather than followed. Links whose targets lie
/// inside `source_dir` are rewritten to point at the same entry inside
/// `destination_dir`, relative to the new link's directory.
///
/// # Errors
///
/// - [`PackageError::MissingSource`] if `source_dir` is absent or empty;
///   nothing is written in that case.
/// - [`PackageError::NestedDestination`] if `destination_dir` lies inside
///   `source_dir`; nothing is written in that case.
/// - [`PackageError::Io`] naming the path of the first failed operation.
///   Entries written before the failure stay on disk.
pub fn replicate_tree(source_dir: &Path, destination_dir: &Path) -> Result<ReplicateStats> {
    ensure_populated(source_dir)?;

    let src_root = normalize(&std::path::absolute(source_dir).at(source_dir)?);
    let dst_root = normalize(&std::path::absolute(destination_dir).at(destination_dir)?);
    if dst_root.starts_with(&src_root) {
        return Err(PackageError::NestedDestination {
            root: src_root,
            destination: dst_root,
        });
    }
    let replicator = Replicator {
        src_root: &src_root,
        dst_root: &dst_root,
    };

    let mut stats = ReplicateStats::default();
    replicator.copy_dir(&src_root, &dst_root, &mut stats)?;
    stats.permissions_fixed = fix_library_permissions(&dst_root)?;
    Ok(stats)
}

/// Walk `root` and add execute bits to every shared library file.
///
/// Returns the number of files whose mode changed.
pub fn fix_library_permissions(root: &Path) -> Result<usize> {
    let mut fixed = 0;
    walk(root, &mut |path, kind| {
        let is_lib = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(is_shared_library);
        if kind == EntryKind::File && is_lib && make_executable(path)? {
            fixed += 1;
        }
        Ok(())
    })?;
    Ok(fixed)
}

/// List regular files and symlinks under `root`, relative to it, sorted.
pub fn installed_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    walk(root, &mut |path, kind| {
        if matches!(kind, EntryKind::File | EntryKind::Symlink) {
            if let Ok(rel) = path.strip_prefix(root) {
                files.push(rel.to_path_buf());
            }
        }
        Ok(())
    })?;
    files.sort();

    debug!("Installed {} files:", files.len());
    for file in &files {
        debug!("  - {}", file.display());
    }
    Ok(files)
}

fn ensure_populated(source_dir: &Path) -> Result<()> {
    if !source_dir.is_dir() {
        return Err(PackageError::MissingSource {
            path: source_dir.to_path_buf(),
            reason: "directory does not exist".to_owned(),
        });
    }
    if fs::read_dir(source_dir).at(source_dir)?.next().is_none() {
        return Err(PackageError::MissingSource {
            path: source_dir.to_path_buf(),
            reason: "directory is empty".to_owned(),
        });
    }
    Ok(())
}

/// Visit every entry under `dir` depth-first without following symlinks.
fn walk(dir: &Path, visit: &mut dyn FnMut(&Path, EntryKind) -> Result<()>) -> Result<()> {
    for entry in fs::read_dir(dir).at(dir)? {
        let path = entry.at(dir)?.path();
        let kind = EntryKind::of(&path)?;
        visit(&path, kind)?;
        if kind == EntryKind::Directory {
            walk(&path, visit)?;
        }
    }
    Ok(())
}

struct Replicator<'a> {
    src_root: &'a Path,
    dst_root: &'a Path,
}

impl Replicator<'_> {
    fn copy_dir(&self, src: &Path, dst: &Path, stats: &mut ReplicateStats) -> Result<()> {
        prepare_directory(dst)?;

        for entry in fs::read_dir(src).at(src)? {
            let path = entry.at(src)?.path();
            let Some(name) = path.file_name() else {
                continue;
            };
            let dest_path = dst.join(name);

            match EntryKind::of(&path)? {
                EntryKind::Symlink => {
                    self.copy_symlink(&path, &dest_path)?;
                    stats.links += 1;
                }
                EntryKind::Directory => self.copy_dir(&path, &dest_path, stats)?,
                EntryKind::File => {
                    stats.bytes += copy_file(&path, &dest_path)?;
                    stats.files += 1;
                }
                EntryKind::Other => {
                    return Err(PackageError::Io {
                        path,
                        source: io::Error::new(
                            io::ErrorKind::InvalidInput,
                            "not a regular file, directory or symlink",
                        ),
                    });
                }
            }
        }

        Ok(())
    }

    fn copy_symlink(&self, src: &Path, dst: &Path) -> Result<()> {
        let target = fs::read_link(src).at(src)?;
        let new_target = self.relink_target(src, dst, &target);

        remove_existing(dst)?;
        create_symlink(&new_target, dst).at(dst)?;
        info!(
            "Created symbolic link: {} -> {}",
            dst.display(),
            new_target.display()
        );
        Ok(())
    }

    /// Compute the target for the recreated link at `dst_link`.
    fn relink_target(&self, src_link: &Path, dst_link: &Path, target: &Path) -> PathBuf {
        let resolved = if target.is_absolute() {
            normalize(target)
        } else {
            let base = src_link.parent().unwrap_or(self.src_root);
            normalize(&base.join(target))
        };

        let equivalent = match resolved.strip_prefix(self.src_root) {
            Ok(rest) => self.dst_root.join(rest),
            // Absolute links out of the tree point at the host system.
            Err(_) if target.is_absolute() => return target.to_path_buf(),
            Err(_) => resolved,
        };

        let base = dst_link.parent().unwrap_or(self.dst_root);
        relative_path(&equivalent, base).unwrap_or(equivalent)
    }
}

/// Make sure `dst` is a real directory, replacing any file or link there.
fn prepare_directory(dst: &Path) -> Result<()> {
    match fs::symlink_metadata(dst) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => {
            remove_existing(dst)?;
            fs::create_dir_all(dst).at(dst)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => fs::create_dir_all(dst).at(dst),
        Err(e) => Err(PackageError::Io {
            path: dst.to_path_buf(),
            source: e,
        }),
    }
}

/// Copy contents, mode and timestamps. Returns the number of bytes copied.
fn copy_file(src: &Path, dst: &Path) -> Result<u64> {
    let mut reader = File::open(src).at(src)?;
    let meta = reader.metadata().at(src)?;

    // Writing through an existing symlink would escape the tree.
    remove_existing(dst)?;
    let mut writer = File::create(dst).at(dst)?;
    let bytes = io::copy(&mut reader, &mut writer).at(dst)?;

    let mut times = FileTimes::new().set_modified(meta.modified().at(src)?);
    if let Ok(accessed) = meta.accessed() {
        times = times.set_accessed(accessed);
    }
    writer.set_times(times).at(dst)?;
    fs::set_permissions(dst, meta.permissions()).at(dst)?;

    info!("Copied: {} -> {}", src.display(), dst.display());
    Ok(bytes)
}

#[cfg(unix)]
fn create_symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn create_symlink(target: &Path, link: &Path) -> io::Result<()> {
    let resolved = match link.parent() {
        Some(parent) => parent.join(target),
        None => target.to_path_buf(),
    };
    if resolved.is_dir() {
        std::os::windows::fs::symlink_dir(target, link)
    } else {
        std::os::windows::fs::symlink_file(target, link)
    }
}

/// Resolve `.` and `..` components without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(out.components().next_back(), Some(Component::Normal(_))) {
                    out.pop();
                } else if !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Path from directory `base` to `target`, both absolute.
///
/// Returns `None` when the two paths share no root (e.g. different drive
/// prefixes on Windows).
fn relative_path(target: &Path, base: &Path) -> Option<PathBuf> {
    let target: Vec<Component<'_>> = target.components().collect();
    let base: Vec<Component<'_>> = base.components().collect();
    if target.first() != base.first() {
        return None;
    }

    let common = target
        .iter()
        .zip(&base)
        .take_while(|(a, b)| a == b)
        .count();

    let mut rel = PathBuf::new();
    for _ in common..base.len() {
        rel.push("..");
    }
    for component in &target[common..] {
        rel.push(component.as_os_str());
    }
    if rel.as_os_str().is_empty() {
        rel.push(".");
    }
    Some(rel)
}
