//! Read the ownership index from a dpkg database.
//!
//! dpkg keeps one `<package>[:<arch>].list` file per installed package under
//! `var/lib/dpkg/info`, one absolute path per line.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use super::{OwnershipIndex, PackageFiles};

/// Location of the dpkg info directory relative to a tree root.
pub const DPKG_INFO_DIR: &str = "var/lib/dpkg/info";

/// dpkg info directory of the tree at `root`.
pub fn info_dir(root: &Path) -> PathBuf {
    root.join(DPKG_INFO_DIR)
}

/// Load every `*.list` file in `info_dir`.
///
/// Multi-arch instances of the same package are merged under one name.
pub fn load_index(info_dir: &Path) -> Result<OwnershipIndex> {
    let mut packages: BTreeMap<String, Vec<String>> = BTreeMap::new();

    let mut lists = Vec::new();
    for entry in fs::read_dir(info_dir)
        .with_context(|| format!("reading dpkg info directory '{}'", info_dir.display()))?
    {
        let entry = entry
            .with_context(|| format!("iterating dpkg info directory '{}'", info_dir.display()))?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("list") {
            lists.push(path);
        }
    }
    lists.sort();

    for path in lists {
        let Some(name) = package_name(&path) else {
            continue;
        };
        let content =
            fs::read(&path).with_context(|| format!("reading dpkg file list '{}'", path.display()))?;
        let files = packages.entry(name.to_string()).or_default();
        for line in content.split(|b| *b == b'\n') {
            match std::str::from_utf8(line) {
                Ok("") => {}
                Ok(line) => files.push(line.to_string()),
                Err(_) => warn!(
                    "skipping non-UTF-8 path {:?} in '{}'",
                    String::from_utf8_lossy(line),
                    path.display()
                ),
            }
        }
    }

    debug!("loaded {} package file lists from '{}'", packages.len(), info_dir.display());
    Ok(OwnershipIndex::new(
        packages
            .into_iter()
            .map(|(name, files)| PackageFiles { name, files })
            .collect(),
    ))
}

/// `libc6:amd64.list` -> `libc6`.
fn package_name(path: &Path) -> Option<&str> {
    let stem = path.file_stem()?.to_str()?;
    let name = stem.split_once(':').map_or(stem, |(name, _arch)| name);
    (!name.is_empty()).then_some(name)
}
