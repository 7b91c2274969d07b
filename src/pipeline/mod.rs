//! The layout transformer: drives the stages in order over one tree.
//!
//! ```text
//! Init -> SymlinksSanitized -> MutableRelocated -> CruftRemoved
//!      -> ConfigRelocated -> MountpointsCreated -> TopLevelLinksBuilt
//!      -> BootSetup -> TmpfilesWritten -> Done
//! ```
//!
//! Any stage error parks the transformer in `Failed { at }`. The tree is then
//! partially transformed and must be rebuilt from the raw rootfs.

pub mod config;

use std::fmt;
use std::fs;
use std::path::PathBuf;

use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{error, info};

use crate::build::context::{BuildContext, ROOTDIRS_DIR};
use crate::commit::{CommitBackend, CommitRequest};
use crate::error::{LayoutError, Result};
use crate::packages::OwnershipIndex;
use crate::stages::boot::{setup_boot, BootArtifactSet};
use crate::stages::restructure::{create_mountpoints, relocate_config, relocate_mutable, remove_cruft};
use crate::stages::sanitize::{sanitize_usr_symlinks, SanitizeSummary};
use crate::stages::tmpfiles::{write_tmpfiles, TmpfilesOptions, TmpfilesSummary};
use crate::stages::toplevel::build_toplevel_links;
use crate::stages::Stage;

/// Transformer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum State {
    Init,
    SymlinksSanitized,
    MutableRelocated,
    CruftRemoved,
    ConfigRelocated,
    MountpointsCreated,
    TopLevelLinksBuilt,
    BootSetup,
    TmpfilesWritten,
    Done,
    Failed { at: Stage },
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Failed { at } => write!(f, "Failed({at})"),
            other => write!(f, "{other:?}"),
        }
    }
}

/// Knobs for one transformation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayoutOptions {
    pub tmpfiles: TmpfilesOptions,
}

/// What a completed run did, for logs and the JSON report.
#[derive(Debug, Clone, Serialize)]
pub struct TransformReport {
    pub root: PathBuf,
    pub state: State,
    pub started_at: String,
    pub finished_at: String,
    pub symlinks: SanitizeSummary,
    pub cruft_removed: usize,
    pub boot: BootArtifactSet,
    pub tmpfiles: TmpfilesSummary,
}

/// Drives one tree through the layout stages exactly once.
pub struct LayoutTransformer {
    ctx: BuildContext,
    index: OwnershipIndex,
    options: LayoutOptions,
    state: State,
}

impl LayoutTransformer {
    /// `index` must be loaded from the raw tree; the package database moves
    /// with `var` during the run.
    pub fn new(ctx: BuildContext, index: OwnershipIndex, options: LayoutOptions) -> Self {
        Self {
            ctx,
            index,
            options,
            state: State::Init,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn context(&self) -> &BuildContext {
        &self.ctx
    }

    /// Run every stage in order.
    pub fn run(&mut self) -> Result<TransformReport> {
        self.expect_state(State::Init)?;
        let span = self.ctx.span().clone();
        let _enter = span.enter();

        let rootdirs = self.ctx.path(ROOTDIRS_DIR);
        if fs::symlink_metadata(&rootdirs).is_ok() {
            self.state = State::Failed {
                at: Stage::SanitizeSymlinks,
            };
            return Err(LayoutError::AlreadyTransformed {
                stage: Stage::SanitizeSymlinks,
                path: rootdirs,
            });
        }

        let started_at = now();
        info!("Transforming {} into the OSTree layout", self.ctx.root.display());

        let Self {
            ctx,
            index,
            options,
            state,
        } = self;
        let symlinks = step(state, Stage::SanitizeSymlinks, State::SymlinksSanitized, || {
            sanitize_usr_symlinks(ctx)
        })?;
        step(state, Stage::RelocateMutable, State::MutableRelocated, || {
            relocate_mutable(ctx)
        })?;
        let cruft_removed = step(state, Stage::RemoveCruft, State::CruftRemoved, || {
            remove_cruft(ctx)
        })?;
        step(state, Stage::RelocateConfig, State::ConfigRelocated, || {
            relocate_config(ctx)
        })?;
        step(state, Stage::CreateMountpoints, State::MountpointsCreated, || {
            create_mountpoints(ctx)
        })?;
        step(state, Stage::BuildTopLevelLinks, State::TopLevelLinksBuilt, || {
            build_toplevel_links(ctx)
        })?;
        let boot = step(state, Stage::SetupBoot, State::BootSetup, || {
            setup_boot(ctx, &ctx.boot(), &ctx.modules())
        })?;
        let tmpfiles = step(state, Stage::WriteTmpfiles, State::TmpfilesWritten, || {
            write_tmpfiles(ctx, index, &options.tmpfiles)
        })?;

        self.state = State::Done;
        info!(
            "Layout complete: {} symlink(s) sanitized, kernel {}, {} tmpfiles rule(s)",
            symlinks.replaced(),
            boot.version,
            tmpfiles.rules
        );

        Ok(TransformReport {
            root: self.ctx.root.clone(),
            state: self.state,
            started_at,
            finished_at: now(),
            symlinks,
            cruft_removed,
            boot,
            tmpfiles,
        })
    }

    /// Hand the finished tree to `backend`. Only legal once the run is done.
    pub fn commit(
        &self,
        backend: &dyn CommitBackend,
        branch: &str,
        subject: &str,
        body: &str,
    ) -> anyhow::Result<CommitRequest> {
        self.expect_state(State::Done)?;
        let request = CommitRequest {
            root: self.ctx.root.clone(),
            branch: branch.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        };
        backend.commit(&request)?;
        Ok(request)
    }

    fn expect_state(&self, expected: State) -> Result<()> {
        if self.state != expected {
            return Err(LayoutError::NotReentrant {
                state: self.state,
                expected,
            });
        }
        Ok(())
    }
}

/// Run one stage, advancing `state` on success and parking it on failure.
fn step<T>(
    state: &mut State,
    stage: Stage,
    next: State,
    f: impl FnOnce() -> Result<T>,
) -> Result<T> {
    match f() {
        Ok(value) => {
            *state = next;
            Ok(value)
        }
        Err(e) => {
            error!("{} failed: {}", stage, e);
            *state = State::Failed { at: stage };
            Err(e)
        }
    }
}

fn now() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "unknown".to_string())
}
