//! Hand-off to the commit backend.
//!
//! The layout core finishes by describing what to commit; snapshotting the
//! tree is the backend's business. [`OstreeCli`] drives the `ostree` binary.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};
use tracing::info;

/// Default subject for a freshly composed tree.
pub const DEFAULT_SUBJECT: &str = "Commit by apt-ostree";
/// Default body for a freshly composed tree.
pub const DEFAULT_BODY: &str = "Initialized by apt-ostree.";

/// What the backend receives for one finished tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRequest {
    pub root: PathBuf,
    pub branch: String,
    pub subject: String,
    pub body: String,
}

/// Snapshots a finished tree into an immutable revision.
pub trait CommitBackend {
    fn commit(&self, request: &CommitRequest) -> Result<()>;
}

/// `ostree` command-line backend.
#[derive(Debug, Clone)]
pub struct OstreeCli {
    pub repo: PathBuf,
    pub verbose: bool,
}

impl OstreeCli {
    pub fn new(repo: &Path, verbose: bool) -> Self {
        Self {
            repo: repo.to_path_buf(),
            verbose,
        }
    }

    /// Initialize the repository in archive mode unless it already exists.
    pub fn ensure_repo(&self) -> Result<()> {
        if self.repo.join("config").is_file() {
            return Ok(());
        }
        std::fs::create_dir_all(&self.repo)
            .with_context(|| format!("creating ostree repository '{}'", self.repo.display()))?;
        info!("Initializing ostree repository {}", self.repo.display());
        self.run(&["init".to_string(), "--mode=archive".to_string()])
    }

    /// Regenerate the repository summary.
    pub fn update_summary(&self) -> Result<()> {
        self.run(&["summary".to_string(), "--update".to_string()])
    }

    fn commit_args(&self, request: &CommitRequest) -> Vec<String> {
        vec![
            "commit".to_string(),
            format!("--branch={}", request.branch),
            format!("--subject={}", request.subject),
            format!("--body={}", request.body),
            format!("--tree=dir={}", request.root.display()),
        ]
    }

    fn command(&self, args: &[String]) -> Command {
        let mut cmd = Command::new("ostree");
        cmd.args(args).arg(format!("--repo={}", self.repo.display()));
        if self.verbose {
            cmd.arg("--verbose");
        }
        cmd
    }

    fn run(&self, args: &[String]) -> Result<()> {
        let output = self
            .command(args)
            .output()
            .with_context(|| format!("running ostree {}", args[0]))?;
        if output.status.success() {
            return Ok(());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(
            "ostree {} failed ({}) for repo '{}': {}\n{}",
            args[0],
            output.status,
            self.repo.display(),
            stdout.trim(),
            stderr.trim()
        )
    }
}

impl CommitBackend for OstreeCli {
    fn commit(&self, request: &CommitRequest) -> Result<()> {
        self.ensure_repo()?;
        info!(
            "Committing {} to branch {} in {}",
            request.root.display(),
            request.branch,
            self.repo.display()
        );
        self.run(&self.commit_args(request))
            .with_context(|| format!("committing branch '{}'", request.branch))?;
        self.update_summary()
    }
}
