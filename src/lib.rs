//! Converts a bootstrapped Debian rootfs into the OSTree deployment layout.
//!
//! A raw rootfs keeps mutable state in `/var`, configuration in `/etc` and
//! the kernel in `/boot`. OSTree deploys a read-only `/usr` shared between
//! deployments and a per-deployment `/var`, so the tree is rewritten before
//! it is committed:
//!
//! - **Symlink sanitizing** - `usr` links into `var` become real content
//! - **Restructuring** - `var` into `usr/rootdirs`, `etc` into `usr/etc`
//! - **Top-level links** - `/home`, `/root`, `/opt`, ... point into `var`
//! - **Boot setup** - kernel and initramfs move to `usr/lib/modules/<version>`
//! - **tmpfiles.d** - packaged `/var` content is linked back at boot
//!
//! # Architecture
//!
//! ```text
//! packages::dpkg  ──> OwnershipIndex ─┐
//!                                      │
//! BuildContext ──> LayoutTransformer ──┼─> stages::* (in order)
//!                        │             │
//!                        └─> commit::CommitBackend (ostree CLI)
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use ostree_layout::{BuildContext, LayoutOptions, LayoutTransformer};
//! use ostree_layout::packages::dpkg;
//!
//! let root = std::path::Path::new("/build/rootfs");
//! let index = dpkg::load_index(&dpkg::info_dir(root))?;
//! let mut transformer =
//!     LayoutTransformer::new(BuildContext::new(root, false), index, LayoutOptions::default());
//! let report = transformer.run()?;
//! println!("kernel {}", report.boot.version);
//! ```

pub mod build;
pub mod commit;
pub mod error;
pub mod packages;
pub mod pipeline;
pub mod preflight;
pub mod stages;

pub use build::context::BuildContext;
pub use commit::{CommitBackend, CommitRequest, OstreeCli};
pub use error::{LayoutError, Result};
pub use packages::{OwnershipIndex, PackageFiles};
pub use pipeline::config::{load_config, CommitConfig, LoadedConfig};
pub use pipeline::{LayoutOptions, LayoutTransformer, State, TransformReport};
pub use stages::Stage;
