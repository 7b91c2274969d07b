//! Layout stages, one module per transformation.
//!
//! Stages are plain functions over a [`BuildContext`](crate::BuildContext);
//! ordering lives in [`crate::pipeline`].

use std::fmt;

use serde::Serialize;

pub mod boot;
pub mod resolve;
pub mod restructure;
pub mod sanitize;
pub mod tmpfiles;
pub mod toplevel;

/// A unit of work in the layout pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    /// Replace `usr` symlinks into `var` with owned content.
    SanitizeSymlinks,
    /// Copy `var` into `usr/rootdirs/var` and empty it.
    RelocateMutable,
    /// Drop kernel/initrd convenience links.
    RemoveCruft,
    /// Move `etc` into `usr/etc`.
    RelocateConfig,
    /// Create `ostree/` and `sysroot/`.
    CreateMountpoints,
    /// Replace top-level directories with symlinks.
    BuildTopLevelLinks,
    /// Move the kernel artifact set into `usr/lib/modules`.
    SetupBoot,
    /// Generate tmpfiles.d rules for packaged `/var` content.
    WriteTmpfiles,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::SanitizeSymlinks => "sanitize-symlinks",
            Stage::RelocateMutable => "relocate-mutable",
            Stage::RemoveCruft => "remove-cruft",
            Stage::RelocateConfig => "relocate-config",
            Stage::CreateMountpoints => "create-mountpoints",
            Stage::BuildTopLevelLinks => "build-toplevel-links",
            Stage::SetupBoot => "setup-boot",
            Stage::WriteTmpfiles => "write-tmpfiles",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
