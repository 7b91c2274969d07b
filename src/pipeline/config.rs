use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::commit::{DEFAULT_BODY, DEFAULT_SUBJECT};
use crate::pipeline::LayoutOptions;
use crate::stages::tmpfiles::TmpfilesOptions;

/// Validated configuration for one invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadedConfig {
    pub layout: LayoutOptions,
    pub commit: Option<CommitConfig>,
}

/// Where and how to commit the finished tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitConfig {
    pub repo: PathBuf,
    pub branch: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct LayoutConfigToml {
    layout: Option<LayoutToml>,
    commit: Option<CommitToml>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LayoutToml {
    tmpfiles_name: Option<String>,
    excluded_packages: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CommitToml {
    repo: String,
    branch: String,
    subject: Option<String>,
    body: Option<String>,
}

/// Read and validate the TOML config at `config_path`.
pub fn load_config(config_path: &Path) -> Result<LoadedConfig> {
    let config_bytes = fs::read_to_string(config_path)
        .with_context(|| format!("reading layout config '{}'", config_path.display()))?;
    parse_config(&config_bytes, config_path)
}

fn parse_config(raw: &str, config_path: &Path) -> Result<LoadedConfig> {
    let parsed: LayoutConfigToml = toml::from_str(raw)
        .with_context(|| format!("parsing layout config '{}'", config_path.display()))?;

    let mut tmpfiles = TmpfilesOptions::default();
    if let Some(layout) = parsed.layout {
        if let Some(name) = layout.tmpfiles_name {
            tmpfiles.name = parse_tmpfiles_name(&name, config_path)?;
        }
        if let Some(excluded) = layout.excluded_packages {
            let mut excluded = excluded
                .into_iter()
                .map(|pkg| pkg.trim().to_string())
                .filter(|pkg| !pkg.is_empty())
                .collect::<Vec<_>>();
            excluded.sort();
            excluded.dedup();
            tmpfiles.excluded_packages = excluded;
        }
    }

    let commit = parsed
        .commit
        .map(|commit| parse_commit(commit, config_path))
        .transpose()?;

    Ok(LoadedConfig {
        layout: LayoutOptions { tmpfiles },
        commit,
    })
}

fn parse_tmpfiles_name(raw: &str, config_path: &Path) -> Result<String> {
    let name = raw.trim();
    if name.is_empty() || name.contains('/') {
        bail!(
            "invalid layout config '{}': tmpfiles_name '{}' must be a bare file stem",
            config_path.display(),
            raw
        );
    }
    if name.ends_with(".conf") {
        bail!(
            "invalid layout config '{}': tmpfiles_name '{}' must not carry the .conf suffix",
            config_path.display(),
            raw
        );
    }
    Ok(name.to_string())
}

fn parse_commit(commit: CommitToml, config_path: &Path) -> Result<CommitConfig> {
    let branch = commit.branch.trim();
    if branch.is_empty() {
        bail!(
            "invalid layout config '{}': commit.branch must not be empty",
            config_path.display()
        );
    }
    let repo = PathBuf::from(commit.repo.trim());
    if !repo.is_absolute() {
        bail!(
            "invalid layout config '{}': commit.repo must be absolute, got '{}'",
            config_path.display(),
            repo.display()
        );
    }

    Ok(CommitConfig {
        repo,
        branch: branch.to_string(),
        subject: commit.subject.unwrap_or_else(|| DEFAULT_SUBJECT.to_string()),
        body: commit.body.unwrap_or_else(|| DEFAULT_BODY.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn parse(raw: &str) -> Result<LoadedConfig> {
        parse_config(raw, Path::new("layout.toml"))
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config = parse("").unwrap();
        assert_eq!(config, LoadedConfig::default());
        assert_eq!(config.layout.tmpfiles.name, "ostree-integration-autovar");
    }

    #[test]
    fn full_config_is_loaded() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("layout.toml");
        fs::write(
            &path,
            r#"
[layout]
tmpfiles_name = "bookworm-var"
excluded_packages = ["systemd", " dbus ", "systemd", ""]

[commit]
repo = "/srv/ostree/repo"
branch = "debian/bookworm/amd64"
subject = "nightly"
"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();

        assert_eq!(config.layout.tmpfiles.name, "bookworm-var");
        assert_eq!(config.layout.tmpfiles.excluded_packages, ["dbus", "systemd"]);
        let commit = config.commit.unwrap();
        assert_eq!(commit.repo, Path::new("/srv/ostree/repo"));
        assert_eq!(commit.branch, "debian/bookworm/amd64");
        assert_eq!(commit.subject, "nightly");
        assert_eq!(commit.body, DEFAULT_BODY);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = parse("[layout]\ntmpfile_name = \"x\"\n").unwrap_err();
        assert!(format!("{err:#}").contains("tmpfile_name"));
    }

    #[test]
    fn tmpfiles_name_must_be_a_stem() {
        assert!(parse("[layout]\ntmpfiles_name = \"a/b\"\n").is_err());
        assert!(parse("[layout]\ntmpfiles_name = \"autovar.conf\"\n").is_err());
        assert!(parse("[layout]\ntmpfiles_name = \" \"\n").is_err());
    }

    #[test]
    fn commit_requires_branch_and_absolute_repo() {
        assert!(parse("[commit]\nrepo = \"/srv/repo\"\nbranch = \"  \"\n").is_err());
        assert!(parse("[commit]\nrepo = \"repo\"\nbranch = \"debian\"\n").is_err());
        assert!(parse("[commit]\nbranch = \"debian\"\n").is_err());
    }

    #[test]
    fn missing_file_names_path() {
        let err = load_config(Path::new("/nonexistent/layout.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/layout.toml"));
    }
}
