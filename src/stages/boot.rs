//! Kernel artifact relocation from `/boot` into `usr/lib/modules/<version>`.
//!
//! OSTree finds the kernel and initramfs next to the modules of the same
//! version. Boot entries downstream are keyed by that version, so the set is
//! validated completely before anything is renamed.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};

use super::Stage;
use crate::build::context::BuildContext;
use crate::error::{LayoutError, Result};

const STAGE: Stage = Stage::SetupBoot;

/// Name of the kernel inside the version directory.
pub const KERNEL_NAME: &str = "vmlinuz";
/// Name of the initramfs inside the version directory.
pub const INITRAMFS_NAME: &str = "initramfs.img";

/// Classification of one `/boot` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootEntryKind {
    Kernel,
    Initrd,
    DeviceTree,
    SymbolMap,
    Other,
}

impl BootEntryKind {
    pub fn classify(name: &str) -> Self {
        if name.starts_with("vmlinuz") {
            BootEntryKind::Kernel
        } else if name.starts_with("initrd.img") || name.starts_with("initramfs") {
            BootEntryKind::Initrd
        } else if name.starts_with("dtbs") {
            BootEntryKind::DeviceTree
        } else if name.starts_with("System.map") {
            BootEntryKind::SymbolMap
        } else {
            BootEntryKind::Other
        }
    }
}

/// Kernel artifact set found in one boot directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BootArtifactSet {
    pub kernel: String,
    pub version: String,
    pub initrd: Option<String>,
    /// Recorded for the bootloader setup; not moved.
    pub dtbs: Option<PathBuf>,
    pub symbol_maps: Vec<String>,
}

impl BootArtifactSet {
    /// Scan `bootdir` and validate cardinalities. Touches nothing.
    pub fn scan(bootdir: &Path) -> Result<Self> {
        let mut names = Vec::new();
        for entry in fs::read_dir(bootdir).map_err(|e| LayoutError::io(STAGE, "read dir", bootdir, e))? {
            let entry = entry.map_err(|e| LayoutError::io(STAGE, "read dir", bootdir, e))?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();

        let mut kernels = Vec::new();
        let mut initrds = Vec::new();
        let mut dtbs = Vec::new();
        let mut symbol_maps = Vec::new();
        for name in names {
            match BootEntryKind::classify(&name) {
                BootEntryKind::Kernel => kernels.push(name),
                BootEntryKind::Initrd => initrds.push(name),
                BootEntryKind::DeviceTree => dtbs.push(name),
                BootEntryKind::SymbolMap => symbol_maps.push(name),
                BootEntryKind::Other => debug!("ignoring /boot/{}", name),
            }
        }

        let kernel = exactly_one(bootdir, "kernel image", kernels)?;
        let initrd = at_most_one(bootdir, "initrd", initrds)?;
        let dtbs = at_most_one(bootdir, "device tree directory", dtbs)?.map(|d| bootdir.join(d));

        let version = match kernel.split_once('-') {
            Some((_, version)) if !version.is_empty() => version.to_string(),
            _ => {
                return Err(LayoutError::invariant(
                    STAGE,
                    bootdir.join(&kernel),
                    "kernel image name carries no version suffix",
                ))
            }
        };

        Ok(Self {
            kernel,
            version,
            initrd,
            dtbs,
            symbol_maps,
        })
    }
}

fn exactly_one(bootdir: &Path, what: &str, mut found: Vec<String>) -> Result<String> {
    if found.len() != 1 {
        return Err(LayoutError::invariant(
            STAGE,
            bootdir,
            format!("expected exactly one {what}, found {}: {:?}", found.len(), found),
        ));
    }
    Ok(found.remove(0))
}

fn at_most_one(bootdir: &Path, what: &str, mut found: Vec<String>) -> Result<Option<String>> {
    if found.len() > 1 {
        return Err(LayoutError::invariant(
            STAGE,
            bootdir,
            format!("expected at most one {what}, found {:?}", found),
        ));
    }
    Ok(found.pop())
}

/// Move the kernel artifact set from `bootdir` into `targetdir`.
///
/// Produces `<targetdir>/<version>/vmlinuz` and, when present,
/// `<targetdir>/<version>/initramfs.img`. `System.map` files go into
/// `targetdir` unversioned. A version directory left by an aborted run is
/// reused.
pub fn setup_boot(ctx: &BuildContext, bootdir: &Path, targetdir: &Path) -> Result<BootArtifactSet> {
    let _span = ctx.stage_span(STAGE.as_str()).entered();

    let set = BootArtifactSet::scan(bootdir)?;
    info!("Setting up kernel {} and initramfs", set.version);

    let versioned = targetdir.join(&set.version);
    fs::create_dir_all(&versioned).map_err(|e| LayoutError::io(STAGE, "mkdir", &versioned, e))?;

    for map in &set.symbol_maps {
        rename(&bootdir.join(map), &targetdir.join(map))?;
    }
    rename(&bootdir.join(&set.kernel), &versioned.join(KERNEL_NAME))?;
    if let Some(initrd) = &set.initrd {
        rename(&bootdir.join(initrd), &versioned.join(INITRAMFS_NAME))?;
    }
    if let Some(dtbs) = &set.dtbs {
        debug!("device trees stay at '{}'", dtbs.display());
    }
    Ok(set)
}

fn rename(from: &Path, to: &Path) -> Result<()> {
    debug!("'{}' -> '{}'", from.display(), to.display());
    fs::rename(from, to).map_err(|e| LayoutError::io(STAGE, "rename", from, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn boot_with(names: &[&str]) -> (TempDir, BuildContext, PathBuf, PathBuf) {
        let temp = TempDir::new().unwrap();
        let boot = temp.path().join("boot");
        let modules = temp.path().join("usr/lib/modules");
        fs::create_dir_all(&boot).unwrap();
        fs::create_dir_all(&modules).unwrap();
        for name in names {
            if name.starts_with("dtbs") {
                fs::create_dir_all(boot.join(name)).unwrap();
            } else {
                fs::write(boot.join(name), *name).unwrap();
            }
        }
        let ctx = BuildContext::new(temp.path(), false);
        (temp, ctx, boot, modules)
    }

    fn listing(dir: &Path) -> Vec<String> {
        let mut names: Vec<_> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_classify() {
        assert_eq!(BootEntryKind::classify("vmlinuz-6.1.0-amd64"), BootEntryKind::Kernel);
        assert_eq!(BootEntryKind::classify("initrd.img-6.1.0-amd64"), BootEntryKind::Initrd);
        assert_eq!(BootEntryKind::classify("initramfs-6.1.0.img"), BootEntryKind::Initrd);
        assert_eq!(BootEntryKind::classify("dtbs"), BootEntryKind::DeviceTree);
        assert_eq!(BootEntryKind::classify("System.map-6.1.0-amd64"), BootEntryKind::SymbolMap);
        assert_eq!(BootEntryKind::classify("config-6.1.0-amd64"), BootEntryKind::Other);
    }

    #[test]
    fn test_relocates_kernel_and_initrd() {
        let (_temp, ctx, boot, modules) = boot_with(&[
            "vmlinuz-6.1.0-amd64",
            "initrd.img-6.1.0-amd64",
            "System.map-6.1.0-amd64",
            "config-6.1.0-amd64",
        ]);

        let set = setup_boot(&ctx, &boot, &modules).unwrap();

        assert_eq!(set.version, "6.1.0-amd64");
        let versioned = modules.join("6.1.0-amd64");
        assert_eq!(fs::read_to_string(versioned.join("vmlinuz")).unwrap(), "vmlinuz-6.1.0-amd64");
        assert_eq!(
            fs::read_to_string(versioned.join("initramfs.img")).unwrap(),
            "initrd.img-6.1.0-amd64"
        );
        assert!(modules.join("System.map-6.1.0-amd64").exists());
        assert_eq!(listing(&boot), vec!["config-6.1.0-amd64"]);
    }

    #[test]
    fn test_records_dtbs_without_moving() {
        let (_temp, ctx, boot, modules) = boot_with(&["vmlinuz-6.6.0-arm64", "dtbs"]);

        let set = setup_boot(&ctx, &boot, &modules).unwrap();

        assert_eq!(set.dtbs, Some(boot.join("dtbs")));
        assert!(boot.join("dtbs").is_dir());
        assert_eq!(set.initrd, None);
        assert!(!modules.join("6.6.0-arm64/initramfs.img").exists());
    }

    #[test]
    fn test_no_kernel_is_invariant_violation() {
        let (_temp, ctx, boot, modules) = boot_with(&["initrd.img-6.1.0-amd64"]);

        let err = setup_boot(&ctx, &boot, &modules).unwrap_err();

        assert!(matches!(err, LayoutError::InvariantViolation { .. }));
        assert_eq!(listing(&boot), vec!["initrd.img-6.1.0-amd64"]);
        assert!(listing(&modules).is_empty());
    }

    #[test]
    fn test_two_kernels_is_invariant_violation_without_mutation() {
        let (_temp, ctx, boot, modules) = boot_with(&[
            "vmlinuz-6.1.0-amd64",
            "vmlinuz-6.1.0-rt-amd64",
            "System.map-6.1.0-amd64",
        ]);

        let err = setup_boot(&ctx, &boot, &modules).unwrap_err();

        assert!(matches!(err, LayoutError::InvariantViolation { .. }));
        assert_eq!(listing(&boot).len(), 3);
        assert!(listing(&modules).is_empty());
    }

    #[test]
    fn test_two_initrds_is_invariant_violation() {
        let (_temp, ctx, boot, modules) = boot_with(&[
            "vmlinuz-6.1.0-amd64",
            "initrd.img-6.1.0-amd64",
            "initramfs-6.1.0-amd64.img",
        ]);

        assert!(matches!(
            setup_boot(&ctx, &boot, &modules),
            Err(LayoutError::InvariantViolation { .. })
        ));
        assert!(boot.join("vmlinuz-6.1.0-amd64").exists());
    }

    #[test]
    fn test_unversioned_kernel_is_rejected() {
        let (_temp, ctx, boot, modules) = boot_with(&["vmlinuz"]);

        assert!(matches!(
            setup_boot(&ctx, &boot, &modules),
            Err(LayoutError::InvariantViolation { .. })
        ));
    }

    #[test]
    fn test_existing_version_dir_is_reused() {
        let (_temp, ctx, boot, modules) = boot_with(&["vmlinuz-6.1.0-amd64"]);
        fs::create_dir_all(modules.join("6.1.0-amd64/kernel")).unwrap();

        setup_boot(&ctx, &boot, &modules).unwrap();

        assert!(modules.join("6.1.0-amd64/vmlinuz").exists());
        assert!(modules.join("6.1.0-amd64/kernel").is_dir());
    }
}
