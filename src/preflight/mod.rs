//! Preflight checks for the commit hand-off.
//!
//! The layout stages only touch the filesystem. Committing shells out to
//! `ostree`, so the binary checks for it before a long run rather than after.
//!
//! # Example
//!
//! ```rust
//! use ostree_layout::preflight::{check_required_tools, command_exists};
//!
//! if !command_exists("ostree") {
//!     println!("ostree not installed");
//! }
//!
//! if let Err(e) = check_required_tools(&[("ostree", "ostree")]) {
//!     eprintln!("{}", e);
//! }
//! ```

use anyhow::{bail, Result};

/// Check if a command exists in PATH.
pub fn command_exists(cmd: &str) -> bool {
    which::which(cmd).is_ok()
}

/// Host tools needed to commit a finished tree.
///
/// Each tuple is (command_name, package_name).
pub const REQUIRED_TOOLS: &[(&str, &str)] = &[("ostree", "ostree")];

/// Check that specific tools are available.
///
/// # Returns
///
/// * `Ok(())` if all tools are found
/// * `Err` with list of missing tools and their packages
pub fn check_required_tools(tools: &[(&str, &str)]) -> Result<()> {
    let missing = tools
        .iter()
        .filter(|(tool, _)| !command_exists(tool))
        .map(|(t, p)| format!("  {} (install: {})", t, p))
        .collect::<Vec<_>>();

    if !missing.is_empty() {
        bail!("Missing required host tools:\n{}", missing.join("\n"));
    }

    Ok(())
}

/// Check every tool in [`REQUIRED_TOOLS`].
pub fn check_host_tools() -> Result<()> {
    check_required_tools(REQUIRED_TOOLS)
}
