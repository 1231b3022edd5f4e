//! Artifact retrieval for locked packages: index queries, wheel selection,
//! the on-disk cache and wheel extraction.

#![deny(clippy::all)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

mod cache;
mod download;
mod fetch;
mod pool;
mod pypi;
mod sdist;
mod select;
mod unpack;

pub use cache::{artifact_path, compute_sha256, resolve_cache_path, CacheLocation, CACHE_PATH_ENV};
pub use download::{http_client, RetryPolicy};
pub use fetch::{FetchOptions, FetchedArtifact, Fetcher, PlannedArtifact};
pub use pool::{download_concurrency, run_pool, DOWNLOADS_ENV};
pub use pypi::{PackageIndex, PypiDigests, PypiFile, PypiIndex, PypiReleaseResponse};
pub use select::{select_artifact, ArtifactChoice};
pub use unpack::{unpack_wheel, UnpackSummary};
