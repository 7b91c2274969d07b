//! Build context shared by every pipeline stage.
//!
//! One context is created per pipeline invocation. It carries the tree root,
//! the debug flag and the tracing span every stage logs under, so nothing in
//! the crate reaches for a global console or logger.

use std::path::{Path, PathBuf};

use tracing::Span;

/// Relative path of the shared tree.
pub const USR_DIR: &str = "usr";
/// Relative path of the mutable-state tree.
pub const VAR_DIR: &str = "var";
/// Relative path of the configuration directory before relocation.
pub const ETC_DIR: &str = "etc";
/// Relative path of the boot directory.
pub const BOOT_DIR: &str = "boot";
/// Where the original `/var` content lives after relocation.
pub const ROOTDIRS_DIR: &str = "usr/rootdirs";
/// Module directory that receives the kernel artifact set.
pub const MODULES_DIR: &str = "usr/lib/modules";
/// Directory holding generated tmpfiles.d rules.
pub const TMPFILES_DIR: &str = "usr/lib/tmpfiles.d";

/// Per-invocation context for a layout transformation.
#[derive(Debug, Clone)]
pub struct BuildContext {
    /// Root of the tree being transformed.
    pub root: PathBuf,
    /// Extra diagnostics; also makes the commit backend verbose.
    pub debug: bool,
    span: Span,
}

impl BuildContext {
    /// Create a context for the tree at `root`.
    pub fn new(root: &Path, debug: bool) -> Self {
        let span = tracing::info_span!("layout", root = %root.display());
        Self {
            root: root.to_path_buf(),
            debug,
            span,
        }
    }

    /// Span that owns all log output of this invocation.
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Child span for one stage.
    pub fn stage_span(&self, stage: &str) -> Span {
        tracing::info_span!(parent: &self.span, "stage", name = stage)
    }

    /// Resolve a tree-relative path.
    pub fn path(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }

    pub fn usr(&self) -> PathBuf {
        self.path(USR_DIR)
    }

    pub fn var(&self) -> PathBuf {
        self.path(VAR_DIR)
    }

    pub fn boot(&self) -> PathBuf {
        self.path(BOOT_DIR)
    }

    pub fn modules(&self) -> PathBuf {
        self.path(MODULES_DIR)
    }
}
