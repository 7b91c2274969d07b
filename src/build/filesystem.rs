//! Filesystem helpers for mutating the rootfs in place.
//!
//! The copy here is stricter than a plain recursive copy: the relocated
//! `/var` is later bind-mounted by a sandbox that checks ownership, so
//! permission bits, uid/gid, symlinks and special files all have to survive.

use std::fs::{self, Metadata};
use std::io;
use std::os::unix::fs::{lchown, MetadataExt, PermissionsExt};
use std::path::Path;

use nix::sys::stat::{mknod, Mode, SFlag};
use tracing::debug;

use crate::error::{LayoutError, Result};
use crate::stages::Stage;

/// Result of an operation that is allowed to fail in enumerated ways.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Done,
    Ignored(io::ErrorKind),
}

/// Turn an IO result into an [`Outcome`], tolerating only the listed kinds.
///
/// Anything outside `allowed` is a fatal [`LayoutError::Io`].
pub fn tolerate(
    stage: Stage,
    op: &'static str,
    path: &Path,
    result: io::Result<()>,
    allowed: &[io::ErrorKind],
) -> Result<Outcome> {
    match result {
        Ok(()) => Ok(Outcome::Done),
        Err(e) if allowed.contains(&e.kind()) => {
            debug!("{} '{}' ignored: {}", op, path.display(), e);
            Ok(Outcome::Ignored(e.kind()))
        }
        Err(e) => Err(LayoutError::io(stage, op, path, e)),
    }
}

/// Remove whatever is at `path` without following symlinks.
///
/// Symlinks and files are unlinked, directories removed recursively.
/// Returns `Ok(false)` if nothing was there.
pub fn remove_entry(stage: Stage, path: &Path) -> Result<bool> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(LayoutError::io(stage, "stat", path, e)),
    };

    if meta.file_type().is_dir() {
        fs::remove_dir_all(path).map_err(|e| LayoutError::io(stage, "remove tree", path, e))?;
    } else {
        fs::remove_file(path).map_err(|e| LayoutError::io(stage, "unlink", path, e))?;
    }
    Ok(true)
}

/// Create a directory with an explicit mode.
pub fn create_dir_mode(stage: Stage, path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::DirBuilderExt;

    fs::DirBuilder::new()
        .mode(mode)
        .create(path)
        .map_err(|e| LayoutError::io(stage, "mkdir", path, e))
}

/// Recursively copy `src` to `dst`, preserving symlinks, permissions and ownership.
///
/// `dst` must not exist. Regular files are copied by content, symlinks are
/// recreated with the same target string, fifos and device nodes are
/// recreated with `mknod`.
pub fn copy_tree(stage: Stage, src: &Path, dst: &Path) -> Result<()> {
    let meta = fs::symlink_metadata(src).map_err(|e| LayoutError::io(stage, "stat", src, e))?;
    copy_entry(stage, src, dst, &meta)
}

fn copy_entry(stage: Stage, src: &Path, dst: &Path, meta: &Metadata) -> Result<()> {
    let file_type = meta.file_type();

    if file_type.is_symlink() {
        let target = fs::read_link(src).map_err(|e| LayoutError::io(stage, "readlink", src, e))?;
        std::os::unix::fs::symlink(&target, dst)
            .map_err(|e| LayoutError::io(stage, "symlink", dst, e))?;
        preserve_owner(stage, meta, dst)?;
        return Ok(());
    }

    if file_type.is_dir() {
        fs::create_dir(dst).map_err(|e| LayoutError::io(stage, "mkdir", dst, e))?;
        for entry in fs::read_dir(src).map_err(|e| LayoutError::io(stage, "read dir", src, e))? {
            let entry = entry.map_err(|e| LayoutError::io(stage, "read dir", src, e))?;
            let child = entry.path();
            let child_meta = fs::symlink_metadata(&child)
                .map_err(|e| LayoutError::io(stage, "stat", &child, e))?;
            copy_entry(stage, &child, &dst.join(entry.file_name()), &child_meta)?;
        }
    } else if file_type.is_file() {
        fs::copy(src, dst).map_err(|e| LayoutError::io(stage, "copy", src, e))?;
    } else {
        make_node(dst, meta).map_err(|e| LayoutError::io(stage, "mknod", dst, e))?;
    }

    // chown clears setuid/setgid, so the mode goes on last.
    preserve_owner(stage, meta, dst)?;
    fs::set_permissions(dst, fs::Permissions::from_mode(meta.mode() & 0o7777))
        .map_err(|e| LayoutError::io(stage, "chmod", dst, e))?;
    Ok(())
}

fn preserve_owner(stage: Stage, src_meta: &Metadata, dst: &Path) -> Result<()> {
    let dst_meta = fs::symlink_metadata(dst).map_err(|e| LayoutError::io(stage, "stat", dst, e))?;
    if dst_meta.uid() == src_meta.uid() && dst_meta.gid() == src_meta.gid() {
        return Ok(());
    }
    lchown(dst, Some(src_meta.uid()), Some(src_meta.gid()))
        .map_err(|e| LayoutError::io(stage, "chown", dst, e))
}

fn make_node(dst: &Path, meta: &Metadata) -> io::Result<()> {
    let kind = SFlag::from_bits_truncate(meta.mode() & SFlag::S_IFMT.bits());
    let perm = Mode::from_bits_truncate(meta.mode() & 0o7777);
    mknod(dst, kind, perm, meta.rdev())?;
    Ok(())
}
