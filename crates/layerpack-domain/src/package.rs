use std::{cmp::Ordering, fmt, path::PathBuf};

use serde::Serialize;

/// Where the artifact for a locked package is obtained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PackageSource {
    /// Looked up on a PyPI-compatible JSON index.
    Index { url: String },
    /// Direct reference to a wheel or sdist URL.
    Url { url: String },
    /// Local wheel or sdist on disk.
    Path { path: PathBuf },
}

/// One entry of the locked version set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockedPackage {
    pub name: String,
    pub normalized: String,
    pub version: String,
    pub source: PackageSource,
    pub platform: String,
    pub direct: bool,
}

impl LockedPackage {
    pub fn pin(&self) -> String {
        format!("{}=={}", self.name, self.version)
    }
}

impl fmt::Display for LockedPackage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.version)
    }
}

impl PartialOrd for LockedPackage {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LockedPackage {
    fn cmp(&self, other: &Self) -> Ordering {
        self.normalized
            .cmp(&other.normalized)
            .then_with(|| self.version.cmp(&other.version))
    }
}
