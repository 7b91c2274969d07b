//! Replace fixed top-level directories with symlinks into `var`, `run` and
//! `sysroot`.
//!
//! This stage is **not** idempotent. Running it against a tree that already
//! has the links is rejected before anything is removed: deleting `home` as
//! a directory when it is a link into `var` would otherwise take the
//! deployment's state with it.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;

use nix::fcntl::OFlag;

use tracing::{debug, info};

use super::Stage;
use crate::build::context::BuildContext;
use crate::build::filesystem::remove_entry;
use crate::error::{LayoutError, Result};

const STAGE: Stage = Stage::BuildTopLevelLinks;

/// `(link, target)` pairs, relative to the tree root.
pub const TOPLEVEL_LINKS: &[(&str, &str)] = &[
    ("home", "var/home"),
    ("media", "run/media"),
    ("mnt", "var/mnt"),
    ("opt", "var/opt"),
    ("ostree", "sysroot/ostree"),
    ("root", "var/roothome"),
    ("srv", "var/srv"),
    ("usr/local", "../var/usrlocal"),
];

/// Build every link in [`TOPLEVEL_LINKS`].
pub fn build_toplevel_links(ctx: &BuildContext) -> Result<()> {
    let _span = ctx.stage_span(STAGE.as_str()).entered();

    reject_existing_links(ctx)?;

    info!("Setting up top-level symlinks");
    let root = open_dir(&ctx.root).map_err(|e| LayoutError::io(STAGE, "open", &ctx.root, e))?;
    for (link, target) in TOPLEVEL_LINKS {
        let path = ctx.path(link);
        if !remove_entry(STAGE, &path)? {
            debug!("'{}' was absent", path.display());
        }
        symlink_at(&root, target, link).map_err(|e| LayoutError::io(STAGE, "symlink", &path, e))?;
        debug!("/{} -> {}", link, target);
    }
    Ok(())
}

fn reject_existing_links(ctx: &BuildContext) -> Result<()> {
    for (link, target) in TOPLEVEL_LINKS {
        let path = ctx.path(link);
        let Ok(current) = fs::read_link(&path) else {
            continue;
        };
        if current == Path::new(target) {
            return Err(LayoutError::AlreadyTransformed { stage: STAGE, path });
        }
    }
    Ok(())
}

fn open_dir(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .read(true)
        .custom_flags((OFlag::O_DIRECTORY | OFlag::O_CLOEXEC).bits())
        .open(path)
}

/// `symlinkat(2)` relative to an open directory handle.
fn symlink_at(dir: &File, target: &str, link: &str) -> io::Result<()> {
    nix::unistd::symlinkat(target, Some(dir.as_raw_fd()), link)?;
    Ok(())
}
