//! Symlink target resolution relative to a tree root.
//!
//! The host's view of a link is irrelevant while building a rootfs: an
//! absolute target `/var/lib/foo` means `<root>/var/lib/foo`. Classification
//! is purely lexical, so dangling targets are classified rather than
//! followed. [`follow_in_tree`] dereferences one component at a time and
//! re-roots every link it meets, so no lookup ever leaves the tree.

use std::ffi::OsString;
use std::fs::{self, Metadata};
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::build::context::{USR_DIR, VAR_DIR};

/// Bounded number of links dereferenced in one resolution.
pub const MAX_LINK_DEPTH: usize = 40;

/// Where a symlink points relative to the layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkClass {
    /// Target already lives in the shared tree.
    InternalShared,
    /// Target lives in mutable state and must be sanitized.
    ExternalMutable,
    /// Any other top-level directory; left alone.
    ExternalOther,
}

/// One inspected symlink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymlinkRecord {
    pub link: PathBuf,
    pub raw_target: PathBuf,
    /// Lexical target relative to the tree root.
    pub relative: PathBuf,
    pub class: LinkClass,
}

/// Read and classify the symlink at `link`.
pub fn inspect(root: &Path, link: &Path) -> io::Result<SymlinkRecord> {
    let raw_target = fs::read_link(link)?;
    let relative = resolve_relative(root, link, &raw_target);
    let class = classify(&relative);
    Ok(SymlinkRecord {
        link: link.to_path_buf(),
        raw_target,
        relative,
        class,
    })
}

/// Resolve `target` (as stored in the link at `link`) to a root-relative path.
///
/// Absolute targets are re-rooted under `root`; relative ones are joined to
/// the link's parent. `..` never climbs above the root.
pub fn resolve_relative(root: &Path, link: &Path, target: &Path) -> PathBuf {
    let mut out = PathBuf::new();

    if !target.is_absolute() {
        push_normalized(&mut out, link_dir(root, link));
    }
    push_normalized(&mut out, target);
    out
}

fn link_dir<'a>(root: &Path, link: &'a Path) -> &'a Path {
    let parent = link.parent().unwrap_or(Path::new(""));
    parent.strip_prefix(root).unwrap_or(parent)
}

fn push_normalized(out: &mut PathBuf, path: &Path) {
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::ParentDir => {
                out.pop();
            }
            Component::RootDir | Component::Prefix(_) => out.clear(),
            Component::CurDir => {}
        }
    }
}

/// Dereference the link at `link` inside the tree at `root`.
///
/// Every component is looked up with `lstat` under `root`; symlinks found
/// along the way are read and their targets re-rooted, absolute ones at
/// `root`. Returns the physical in-tree path of the final entry with its
/// metadata, or `None` when some component does not exist in the tree.
pub fn follow_in_tree(root: &Path, link: &Path) -> io::Result<Option<(PathBuf, Metadata)>> {
    let target = fs::read_link(link)?;
    let mut resolved = PathBuf::new();
    if !target.is_absolute() {
        resolved.push(link_dir(root, link));
    }
    let mut pending = Vec::new();
    queue_components(&mut pending, &target);

    let mut hops = 0;
    let mut last = None;
    while let Some(part) = pending.pop() {
        if part == ".." {
            resolved.pop();
            last = None;
            continue;
        }
        let candidate = root.join(&resolved).join(&part);
        let meta = match fs::symlink_metadata(&candidate) {
            Ok(meta) => meta,
            Err(e) if is_missing(&e) => return Ok(None),
            Err(e) => return Err(e),
        };

        if meta.file_type().is_symlink() {
            hops += 1;
            if hops > MAX_LINK_DEPTH {
                return Err(io::Error::new(
                    io::ErrorKind::Other,
                    format!("too many levels of symbolic links from '{}'", link.display()),
                ));
            }
            let next = fs::read_link(&candidate)?;
            if next.is_absolute() {
                resolved.clear();
            }
            queue_components(&mut pending, &next);
            last = None;
            continue;
        }

        if !meta.is_dir() && !pending.is_empty() {
            return Ok(None);
        }
        resolved.push(&part);
        last = Some(meta);
    }

    let meta = match last {
        Some(meta) => meta,
        None => fs::symlink_metadata(root.join(&resolved))?,
    };
    Ok(Some((root.join(resolved), meta)))
}

/// Push the components of `path` so that the first one is popped first.
fn queue_components(pending: &mut Vec<OsString>, path: &Path) {
    let parts: Vec<OsString> = path
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_os_string()),
            Component::ParentDir => Some(OsString::from("..")),
            _ => None,
        })
        .collect();
    pending.extend(parts.into_iter().rev());
}

fn is_missing(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::NotFound || e.raw_os_error() == Some(libc::ENOTDIR)
}

/// First component of a root-relative path, the classification key.
pub fn toplevel(relative: &Path) -> Option<&str> {
    relative.components().find_map(|c| match c {
        Component::Normal(part) => part.to_str(),
        _ => None,
    })
}

pub fn classify(relative: &Path) -> LinkClass {
    if relative.starts_with(USR_DIR) {
        return LinkClass::InternalShared;
    }
    match toplevel(relative) {
        Some(VAR_DIR) => LinkClass::ExternalMutable,
        _ => LinkClass::ExternalOther,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;
    use tempfile::tempdir;

    #[test]
    fn test_absolute_target_is_rerooted() {
        let root = Path::new("/build/rootfs");
        let link = root.join("usr/share/doc/foo");
        let rel = resolve_relative(root, &link, Path::new("/var/lib/foo/doc"));
        assert_eq!(rel, Path::new("var/lib/foo/doc"));
    }

    #[test]
    fn test_relative_target_joins_link_dir() {
        let root = Path::new("/build/rootfs");
        let link = root.join("usr/lib/foo/state");
        let rel = resolve_relative(root, &link, Path::new("../../../var/lib/foo"));
        assert_eq!(rel, Path::new("var/lib/foo"));
    }

    #[test]
    fn test_parent_dirs_clamp_at_root() {
        let root = Path::new("/build/rootfs");
        let link = root.join("usr/x");
        let rel = resolve_relative(root, &link, Path::new("../../../../etc/passwd"));
        assert_eq!(rel, Path::new("etc/passwd"));
    }

    #[test]
    fn test_toplevel() {
        assert_eq!(toplevel(Path::new("var/lib/dpkg")), Some("var"));
        assert_eq!(toplevel(Path::new("/var")), Some("var"));
        assert_eq!(toplevel(Path::new("")), None);
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(Path::new("usr/lib/x")), LinkClass::InternalShared);
        assert_eq!(classify(Path::new("var/lib/x")), LinkClass::ExternalMutable);
        assert_eq!(classify(Path::new("etc/alternatives/x")), LinkClass::ExternalOther);
        // Prefix match must be per component.
        assert_eq!(classify(Path::new("usrlocal/x")), LinkClass::ExternalOther);
        assert_eq!(classify(Path::new("variant/x")), LinkClass::ExternalOther);
    }

    #[test]
    fn test_inspect_dangling_link_is_classified() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("usr/bin")).unwrap();
        let link = root.join("usr/bin/tool");
        symlink("/var/lib/nowhere/tool", &link).unwrap();

        let record = inspect(root, &link).unwrap();
        assert_eq!(record.class, LinkClass::ExternalMutable);
        assert_eq!(record.relative, Path::new("var/lib/nowhere/tool"));
        assert_eq!(record.raw_target, Path::new("/var/lib/nowhere/tool"));
        assert!(follow_in_tree(root, &link).unwrap().is_none());
    }

    #[test]
    fn test_follow_reroots_intermediate_absolute_links() {
        let host = tempdir().unwrap();
        fs::write(host.path().join("secret"), "HOST").unwrap();
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("usr/bin")).unwrap();
        fs::create_dir_all(root.join("var")).unwrap();
        fs::create_dir_all(root.join("run")).unwrap();
        fs::write(root.join("run/secret"), "TREE").unwrap();
        // Absolute link inside the tree naming a real host directory.
        symlink(host.path(), root.join("var/run")).unwrap();
        let host_rel = host.path().strip_prefix("/").unwrap();
        fs::create_dir_all(root.join(host_rel)).unwrap();
        let link = root.join("usr/bin/x");
        symlink("/var/run/secret", &link).unwrap();

        // The in-tree copy of the host path has no `secret`.
        assert!(follow_in_tree(root, &link).unwrap().is_none());

        fs::remove_file(root.join("var/run")).unwrap();
        symlink("/run", root.join("var/run")).unwrap();
        let (path, meta) = follow_in_tree(root, &link).unwrap().unwrap();
        assert_eq!(path, root.join("run/secret"));
        assert!(meta.is_file());
        assert_eq!(fs::read_to_string(path).unwrap(), "TREE");
    }

    #[test]
    fn test_follow_handles_parent_dirs_physically() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("usr/lib")).unwrap();
        fs::create_dir_all(root.join("srv/data")).unwrap();
        fs::create_dir_all(root.join("var")).unwrap();
        fs::write(root.join("srv/file"), "x").unwrap();
        symlink("../srv/data", root.join("var/data")).unwrap();
        let link = root.join("usr/lib/f");
        symlink("../../var/data/../file", &link).unwrap();

        let (path, _) = follow_in_tree(root, &link).unwrap().unwrap();

        assert_eq!(path, root.join("srv/file"));
    }

    #[test]
    fn test_follow_rejects_loops() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("var")).unwrap();
        symlink("/var/b", root.join("var/a")).unwrap();
        symlink("/var/a", root.join("var/b")).unwrap();

        assert!(follow_in_tree(root, &root.join("var/a")).is_err());
    }

    #[test]
    fn test_follow_through_file_is_missing() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("var")).unwrap();
        fs::write(root.join("var/file"), "x").unwrap();
        symlink("/var/file/child", root.join("var/link")).unwrap();

        assert!(follow_in_tree(root, &root.join("var/link")).unwrap().is_none());
    }
}
