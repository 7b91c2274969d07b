//! Restructure the raw rootfs: `/var` into `usr/rootdirs`, cruft out,
//! `/etc` into `usr/etc`, mount-point placeholders in.
//!
//! Each step assumes the previous one completed. Symlink sanitization has to
//! run before [`relocate_mutable`] so that copies still have a source.

use std::fs;
use std::io;

use tracing::{info, warn};

use super::Stage;
use crate::build::context::{BuildContext, ETC_DIR, ROOTDIRS_DIR};
use crate::build::filesystem::{copy_tree, create_dir_mode, tolerate, Outcome};
use crate::error::{LayoutError, Result};

const DIR_MODE: u32 = 0o755;

/// Kernel/initrd convenience links left behind by the Debian kernel packages.
pub const CRUFT: &[&str] = &[
    "boot/initrd.img",
    "boot/initrd.img.old",
    "boot/vmlinuz",
    "boot/vmlinuz.old",
    "initrd.img",
    "initrd.img.old",
    "vmlinuz",
    "vmlinuz.old",
];

/// Mount points OSTree expects at the deployment root.
pub const MOUNTPOINTS: &[&str] = &["ostree", "sysroot"];

/// Copy `var` to `usr/rootdirs/var`, then recreate `var` empty.
///
/// `usr/rootdirs` must not exist yet; its presence means the tree has
/// already been through this stage.
pub fn relocate_mutable(ctx: &BuildContext) -> Result<()> {
    let stage = Stage::RelocateMutable;
    let _span = ctx.stage_span(stage.as_str()).entered();

    let var = ctx.var();
    let rootdirs = ctx.path(ROOTDIRS_DIR);
    let relocated = rootdirs.join("var");

    info!("Moving /var to /{}/var", ROOTDIRS_DIR);
    create_dir_mode(stage, &rootdirs, DIR_MODE)?;
    copy_tree(stage, &var, &relocated)?;

    fs::remove_dir_all(&var).map_err(|e| LayoutError::io(stage, "remove tree", &var, e))?;
    create_dir_mode(stage, &var, DIR_MODE)?;
    Ok(())
}

/// Remove the enumerated cruft entries; missing ones are fine.
pub fn remove_cruft(ctx: &BuildContext) -> Result<usize> {
    let stage = Stage::RemoveCruft;
    let _span = ctx.stage_span(stage.as_str()).entered();

    info!("Removing kernel/initrd links");
    let mut removed = 0;
    for rel in CRUFT {
        let path = ctx.path(rel);
        let outcome = tolerate(
            stage,
            "unlink",
            &path,
            fs::remove_file(&path),
            &[io::ErrorKind::NotFound],
        )?;
        if outcome == Outcome::Done {
            removed += 1;
        }
    }
    Ok(removed)
}

/// Move `etc` wholesale to `usr/etc`.
pub fn relocate_config(ctx: &BuildContext) -> Result<()> {
    let stage = Stage::RelocateConfig;
    let _span = ctx.stage_span(stage.as_str()).entered();

    let etc = ctx.path(ETC_DIR);
    let dest = ctx.usr().join(ETC_DIR);
    info!("Moving /etc to /usr/etc");

    if fs::symlink_metadata(&dest).is_ok() {
        return Err(LayoutError::invariant(
            stage,
            &dest,
            "destination already exists",
        ));
    }
    fs::rename(&etc, &dest).map_err(|e| LayoutError::io(stage, "rename", &etc, e))
}

/// Create the empty placeholder directories.
///
/// These are only mount points, so every creation failure is tolerated.
pub fn create_mountpoints(ctx: &BuildContext) -> Result<()> {
    let stage = Stage::CreateMountpoints;
    let _span = ctx.stage_span(stage.as_str()).entered();

    info!("Setting up /ostree and /sysroot");
    for name in MOUNTPOINTS {
        let path = ctx.path(name);
        if let Err(e) = fs::create_dir_all(&path) {
            warn!("could not create '{}': {}", path.display(), e);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::{symlink, PermissionsExt};
    use tempfile::TempDir;

    fn rootfs() -> (TempDir, BuildContext) {
        let temp = TempDir::new().unwrap();
        for dir in ["usr/lib", "var/lib/apt/lists", "var/log", "etc", "boot"] {
            fs::create_dir_all(temp.path().join(dir)).unwrap();
        }
        fs::write(temp.path().join("var/lib/apt/lists/x"), "list").unwrap();
        fs::write(temp.path().join("etc/hostname"), "debian\n").unwrap();
        let ctx = BuildContext::new(temp.path(), false);
        (temp, ctx)
    }

    #[test]
    fn test_relocate_mutable_moves_content() {
        let (temp, ctx) = rootfs();
        symlink("/run", temp.path().join("var/run")).unwrap();
        fs::set_permissions(temp.path().join("var/log"), fs::Permissions::from_mode(0o2755))
            .unwrap();

        relocate_mutable(&ctx).unwrap();

        let relocated = temp.path().join("usr/rootdirs/var");
        assert_eq!(
            fs::read_to_string(relocated.join("lib/apt/lists/x")).unwrap(),
            "list"
        );
        assert_eq!(fs::read_link(relocated.join("run")).unwrap().to_str(), Some("/run"));
        let mode = fs::metadata(relocated.join("log")).unwrap().permissions().mode();
        assert_eq!(mode & 0o7777, 0o2755);

        let var = temp.path().join("var");
        assert!(var.is_dir());
        assert_eq!(fs::read_dir(&var).unwrap().count(), 0);
    }

    #[test]
    fn test_relocate_mutable_fails_when_already_relocated() {
        let (temp, ctx) = rootfs();
        fs::create_dir_all(temp.path().join("usr/rootdirs")).unwrap();

        let err = relocate_mutable(&ctx).unwrap_err();

        assert!(matches!(err, LayoutError::Io { op: "mkdir", .. }));
        assert!(temp.path().join("var/lib/apt/lists/x").exists());
    }

    #[test]
    fn test_remove_cruft_tolerates_missing() {
        let (temp, ctx) = rootfs();
        symlink("boot/vmlinuz-6.1.0-amd64", temp.path().join("vmlinuz")).unwrap();
        symlink("vmlinuz-6.1.0-amd64", temp.path().join("boot/vmlinuz")).unwrap();
        fs::write(temp.path().join("boot/vmlinuz-6.1.0-amd64"), "kernel").unwrap();

        let removed = remove_cruft(&ctx).unwrap();

        assert_eq!(removed, 2);
        assert!(!temp.path().join("vmlinuz").is_symlink());
        assert!(!temp.path().join("boot/vmlinuz").is_symlink());
        assert!(temp.path().join("boot/vmlinuz-6.1.0-amd64").exists());
    }

    #[test]
    fn test_remove_cruft_rejects_directory_in_place_of_link() {
        let (temp, ctx) = rootfs();
        fs::create_dir_all(temp.path().join("vmlinuz.old")).unwrap();

        assert!(remove_cruft(&ctx).is_err());
    }

    #[test]
    fn test_relocate_config() {
        let (temp, ctx) = rootfs();

        relocate_config(&ctx).unwrap();

        assert!(!temp.path().join("etc").exists());
        assert_eq!(
            fs::read_to_string(temp.path().join("usr/etc/hostname")).unwrap(),
            "debian\n"
        );
    }

    #[test]
    fn test_relocate_config_refuses_existing_usr_etc() {
        let (temp, ctx) = rootfs();
        fs::create_dir_all(temp.path().join("usr/etc")).unwrap();

        let err = relocate_config(&ctx).unwrap_err();
        assert!(matches!(err, LayoutError::InvariantViolation { .. }));
        assert!(temp.path().join("etc/hostname").exists());
    }

    #[test]
    fn test_create_mountpoints_idempotent() {
        let (temp, ctx) = rootfs();
        fs::create_dir_all(temp.path().join("sysroot")).unwrap();

        create_mountpoints(&ctx).unwrap();
        create_mountpoints(&ctx).unwrap();

        assert!(temp.path().join("ostree").is_dir());
        assert!(temp.path().join("sysroot").is_dir());
    }
}
