//! Package ownership index: which installed package owns which paths.
//!
//! The layout core only needs names and owned paths. The index is normally
//! read from the dpkg database of the tree before the pipeline runs (see
//! [`dpkg`]), since the database itself moves with `/var`.

pub mod dpkg;

/// Packages whose `/var` content is covered by the base tmpfiles policy.
pub const EXCLUDED_PACKAGES: &[&str] = &[
    "ucf",
    "base-files",
    "systemd",
    "init-system-helpers",
    "dbus",
    "policykit-1",
    "polkitd",
    "debconf",
];

/// Paths owned by one installed package, in database order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageFiles {
    pub name: String,
    pub files: Vec<String>,
}

/// Installed packages and their files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnershipIndex {
    packages: Vec<PackageFiles>,
}

impl OwnershipIndex {
    pub fn new(mut packages: Vec<PackageFiles>) -> Self {
        packages.sort_by(|a, b| a.name.cmp(&b.name));
        Self { packages }
    }

    pub fn packages(&self) -> &[PackageFiles] {
        &self.packages
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}

impl<N, F, S> FromIterator<(N, F)> for OwnershipIndex
where
    N: Into<String>,
    F: IntoIterator<Item = S>,
    S: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (N, F)>>(iter: I) -> Self {
        let packages = iter
            .into_iter()
            .map(|(name, files)| PackageFiles {
                name: name.into(),
                files: files.into_iter().map(Into::into).collect(),
            })
            .collect();
        Self::new(packages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_iter_sorts_by_name() {
        let index: OwnershipIndex = [
            ("zsh", vec!["/usr/bin/zsh"]),
            ("apt", vec!["/var/lib/apt", "/usr/bin/apt"]),
        ]
        .into_iter()
        .collect();

        let names: Vec<_> = index.packages().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["apt", "zsh"]);
        assert_eq!(index.packages()[0].files, ["/var/lib/apt", "/usr/bin/apt"]);
    }
}
