//! Replace `usr` symlinks that point into `var` with real content.
//!
//! `usr` ends up read-only and shared between deployments while `var` is
//! per-deployment, so a link from one into the other would dangle or leak
//! state once deployed. Links into `var` are turned into hard links (files)
//! or full copies (directories) before `var` is relocated. Targets are
//! dereferenced inside the tree only; the build host is never consulted.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::resolve::{self, LinkClass, SymlinkRecord};
use super::Stage;
use crate::build::context::BuildContext;
use crate::build::filesystem::copy_tree;
use crate::error::{LayoutError, Result};

const STAGE: Stage = Stage::SanitizeSymlinks;

/// What the sanitizer did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SanitizeSummary {
    pub hardlinked: usize,
    pub copied: usize,
    /// Links into `var` whose target does not exist; removed, nothing materialized.
    pub dangling: usize,
}

impl SanitizeSummary {
    pub fn replaced(&self) -> usize {
        self.hardlinked + self.copied + self.dangling
    }
}

/// A link still to be checked, with the `var` directories already copied on
/// the way to it.
struct Pending {
    link: PathBuf,
    copied_from: Vec<PathBuf>,
}

/// Sanitize every symlink under `usr`.
///
/// Directories copied out of `var` are scanned in turn, so links they carry
/// into `var` are materialized as well.
pub fn sanitize_usr_symlinks(ctx: &BuildContext) -> Result<SanitizeSummary> {
    let _span = ctx.stage_span(STAGE.as_str()).entered();

    let mut pending = Vec::new();
    queue_symlinks(&mut pending, &ctx.usr(), &[])?;

    let mut summary = SanitizeSummary::default();
    while let Some(Pending { link, copied_from }) = pending.pop() {
        let record = resolve::inspect(&ctx.root, &link)
            .map_err(|e| LayoutError::io(STAGE, "readlink", &link, e))?;

        match record.class {
            LinkClass::InternalShared => continue,
            LinkClass::ExternalOther => {
                debug!("keeping '{}' -> '{}'", link.display(), record.raw_target.display());
                continue;
            }
            LinkClass::ExternalMutable => {
                if let Some(source) = replace_link(&ctx.root, &record, &copied_from, &mut summary)? {
                    let mut chain = copied_from;
                    chain.push(source);
                    queue_symlinks(&mut pending, &link, &chain)?;
                }
            }
        }
    }

    info!(
        "sanitized {} symlink(s) into /var ({} hard links, {} copies, {} dangling)",
        summary.replaced(),
        summary.hardlinked,
        summary.copied,
        summary.dangling
    );
    Ok(summary)
}

/// Queue every symlink under `dir`, in walk order.
///
/// Symlinked directories are not descended. The list is collected up front
/// so replacing links does not disturb the walk.
fn queue_symlinks(pending: &mut Vec<Pending>, dir: &Path, copied_from: &[PathBuf]) -> Result<()> {
    let mut links = Vec::new();
    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(dir).to_path_buf();
            LayoutError::io(STAGE, "walk", path, std::io::Error::from(e))
        })?;
        if entry.path_is_symlink() {
            links.push(entry.into_path());
        }
    }
    pending.extend(links.into_iter().rev().map(|link| Pending {
        link,
        copied_from: copied_from.to_vec(),
    }));
    Ok(())
}

/// Replace one link into `var`. Returns the source directory when the link
/// was replaced by a copy.
fn replace_link(
    root: &Path,
    record: &SymlinkRecord,
    copied_from: &[PathBuf],
    summary: &mut SanitizeSummary,
) -> Result<Option<PathBuf>> {
    let link = &record.link;
    let source = resolve::follow_in_tree(root, link)
        .map_err(|e| LayoutError::io(STAGE, "resolve", link, e))?;

    if let Some((path, meta)) = &source {
        if meta.is_dir() && copied_from.iter().any(|done| done.starts_with(path)) {
            return Err(LayoutError::invariant(
                STAGE,
                link,
                format!("copying '{}' would recurse into itself", path.display()),
            ));
        }
    }

    fs::remove_file(link).map_err(|e| LayoutError::io(STAGE, "unlink", link, e))?;

    match source {
        Some((path, meta)) if meta.is_dir() => {
            debug!("copying '{}' into '{}'", path.display(), link.display());
            copy_tree(STAGE, &path, link)?;
            summary.copied += 1;
            Ok(Some(path))
        }
        Some((path, _)) => {
            debug!("hard linking '{}' at '{}'", path.display(), link.display());
            fs::hard_link(&path, link).map_err(|e| LayoutError::io(STAGE, "hard link", link, e))?;
            summary.hardlinked += 1;
            Ok(None)
        }
        None => {
            warn!(
                "'{}' pointed at missing /{}; removed",
                link.display(),
                record.relative.display()
            );
            summary.dangling += 1;
            Ok(None)
        }
    }
}
