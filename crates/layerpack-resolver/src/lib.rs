//! Turns requirement specs into a locked version set.
//!
//! Resolution itself is delegated to `uv pip compile`; this crate validates
//! the direct requirements, drives the external tool and maps its failures
//! onto [`PackagingError`](layerpack_domain::PackagingError) variants.

#![deny(clippy::all)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

mod conflict;
mod process;
mod uv;

use anyhow::Result;
use layerpack_domain::{Deadline, LambdaTarget, LockedPackage, RequirementSpec};

pub use conflict::check_direct_conflicts;
pub use process::{run_command, RunOutput};
pub use uv::{locate_uv, UvResolver, UV_ENV};

#[derive(Debug, Clone)]
pub struct ResolveRequest {
    pub requirements: Vec<RequirementSpec>,
    pub target: LambdaTarget,
    /// Base URL of a PyPI-compatible index (`https://pypi.org`).
    pub index_url: String,
    pub include_dependencies: bool,
    pub deadline: Option<Deadline>,
}

impl ResolveRequest {
    /// Requirements whose markers hold on the target.
    pub fn applicable(&self) -> Result<Vec<&RequirementSpec>> {
        let env = self.target.marker_environment()?;
        let mut applicable = Vec::with_capacity(self.requirements.len());
        for spec in &self.requirements {
            if spec.applies_to(&env) {
                applicable.push(spec);
            } else {
                tracing::debug!(requirement = %spec, target = %self.target, "marker excludes requirement");
            }
        }
        Ok(applicable)
    }
}

/// Produces the locked version set for a request.
///
/// Implementations return packages sorted by normalized name.
pub trait DependencyResolver: Send + Sync {
    fn resolve(&self, request: &ResolveRequest) -> Result<Vec<LockedPackage>>;
}
