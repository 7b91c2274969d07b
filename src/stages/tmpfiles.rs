//! tmpfiles.d rules for packaged `/var` content.
//!
//! After relocation `/var` starts empty on every deployment. Each path a
//! package shipped under `/var` gets an `L` rule so systemd-tmpfiles links
//! it back to the copy in `usr/rootdirs` at boot.

use std::borrow::Cow;
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;

use super::resolve::toplevel;
use super::Stage;
use crate::build::context::{BuildContext, TMPFILES_DIR, VAR_DIR};
use crate::build::filesystem::tolerate;
use crate::error::{LayoutError, Result};
use crate::packages::{OwnershipIndex, EXCLUDED_PACKAGES};

const STAGE: Stage = Stage::WriteTmpfiles;

/// Default configuration file stem under `usr/lib/tmpfiles.d`.
pub const DEFAULT_TMPFILES_NAME: &str = "ostree-integration-autovar";

/// Covered by the base tmpfiles policy, never emitted per package.
pub const BASE_PATHS: &[&str] = &[
    "/var",
    "/var/lock",
    "/var/cache",
    "/var/spool",
    "/var/log",
    "/var/lib",
];

/// Options for rule generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TmpfilesOptions {
    /// File stem; the file is `<name>.conf`.
    pub name: String,
    pub excluded_packages: Vec<String>,
}

impl Default for TmpfilesOptions {
    fn default() -> Self {
        Self {
            name: DEFAULT_TMPFILES_NAME.to_string(),
            excluded_packages: EXCLUDED_PACKAGES.iter().map(|p| p.to_string()).collect(),
        }
    }
}

/// One `L` rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TmpfileRule {
    pub path: String,
    pub relocated: String,
}

impl TmpfileRule {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            relocated: format!("../../usr/rootdirs{path}"),
        }
    }
}

impl fmt::Display for TmpfileRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "L {} - - - - {}",
            escape_field(&self.path),
            escape_field(&self.relocated)
        )
    }
}

/// Escape a path for a tmpfiles.d field.
///
/// Fields are whitespace separated, unquoted with C escapes and subject to
/// `%` specifier expansion.
fn escape_field(path: &str) -> Cow<'_, str> {
    let needs_escape = |c: char| {
        c.is_whitespace() || c.is_control() || matches!(c, '\\' | '"' | '\'' | '%')
    };
    if !path.contains(needs_escape) {
        return Cow::Borrowed(path);
    }
    let mut out = String::with_capacity(path.len() + 8);
    for c in path.chars() {
        match c {
            '%' => out.push_str("%%"),
            c if needs_escape(c) && c.is_ascii() => out.push_str(&format!("\\x{:02x}", c as u32)),
            c if needs_escape(c) => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// Result of the tmpfiles stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TmpfilesSummary {
    pub conf: PathBuf,
    /// Zero when no file was written.
    pub rules: usize,
}

/// Rules for every `/var` path owned by a non-excluded package.
///
/// The first occurrence of a path decides its position.
pub fn collect_rules(index: &OwnershipIndex, excluded: &[String]) -> Vec<TmpfileRule> {
    let mut seen = HashSet::new();
    index
        .packages()
        .iter()
        .filter(|pkg| !excluded.iter().any(|ex| ex == &pkg.name))
        .flat_map(|pkg| pkg.files.iter().map(String::as_str))
        .filter(|path| toplevel(Path::new(path)) == Some(VAR_DIR))
        .filter(|path| !BASE_PATHS.contains(path))
        .filter(|path| seen.insert(*path))
        .map(TmpfileRule::new)
        .collect()
}

/// Write `usr/lib/tmpfiles.d/<name>.conf` from scratch.
///
/// Without rules nothing is written and a stale file is removed.
pub fn write_tmpfiles(
    ctx: &BuildContext,
    index: &OwnershipIndex,
    options: &TmpfilesOptions,
) -> Result<TmpfilesSummary> {
    let _span = ctx.stage_span(STAGE.as_str()).entered();

    let dir = ctx.path(TMPFILES_DIR);
    let conf = dir.join(format!("{}.conf", options.name));
    let rules = collect_rules(index, &options.excluded_packages);

    tolerate(
        STAGE,
        "unlink",
        &conf,
        fs::remove_file(&conf),
        &[io::ErrorKind::NotFound],
    )?;

    if rules.is_empty() {
        info!("No packaged /var content; skipping {}", conf.display());
        return Ok(TmpfilesSummary { conf, rules: 0 });
    }

    fs::create_dir_all(&dir).map_err(|e| LayoutError::io(STAGE, "mkdir", &dir, e))?;
    let body: String = rules.iter().map(|rule| format!("{rule}\n")).collect();
    fs::write(&conf, body).map_err(|e| LayoutError::io(STAGE, "write", &conf, e))?;

    info!("Wrote {} tmpfiles.d rule(s) to {}", rules.len(), conf.display());
    Ok(TmpfilesSummary {
        conf,
        rules: rules.len(),
    })
}
