use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{anyhow, Result};
use layerpack_domain::{
    check_deadline, Deadline, LambdaRuntime, LambdaTarget, LockedPackage, PackageSource,
    PackagingError, WheelFilename,
};
use layerpack_resolver::locate_uv;
use reqwest::blocking::Client;
use serde::Serialize;

use crate::{
    cache::{artifact_path, built_wheel_dir},
    download::{cache_artifact, http_client, CachedArtifact, DownloadRequest, RetryPolicy},
    pool::{download_concurrency, run_pool},
    pypi::PackageIndex,
    sdist::build_wheel_from_sdist,
    select::{incompatible, select_artifact, ArtifactChoice},
};

const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub target: LambdaTarget,
    /// Runtimes each artifact is checked against for the layer metadata.
    pub compatible_runtimes: Vec<LambdaRuntime>,
    pub build_sdists: bool,
    pub workers: Option<usize>,
    pub deadline: Option<Deadline>,
    pub retry: RetryPolicy,
}

impl FetchOptions {
    pub fn new(target: LambdaTarget) -> Self {
        Self {
            target,
            compatible_runtimes: vec![target.runtime],
            build_sdists: true,
            workers: None,
            deadline: None,
            retry: RetryPolicy::default(),
        }
    }
}

/// A wheel on local disk ready to be unpacked.
#[derive(Debug, Clone, Serialize)]
pub struct FetchedArtifact {
    pub package: LockedPackage,
    pub filename: String,
    pub path: PathBuf,
    pub size: u64,
    pub supported_runtimes: Vec<LambdaRuntime>,
    pub built_from_sdist: bool,
    /// Download came from a verified cache entry.
    pub from_cache: bool,
    /// Bytes transferred over the network for this package.
    pub downloaded_bytes: u64,
}

impl FetchedArtifact {
    fn with_transfer(mut self, cached: CachedArtifact) -> Self {
        self.from_cache = cached.reused;
        self.downloaded_bytes = if cached.reused { 0 } else { cached.size };
        self
    }
}

/// What would be fetched, without downloading anything.
#[derive(Debug, Clone, Serialize)]
pub struct PlannedArtifact {
    pub package: LockedPackage,
    pub filename: String,
    pub kind: &'static str,
    pub size: Option<u64>,
    pub supported_runtimes: Vec<LambdaRuntime>,
}

pub struct Fetcher {
    index: Arc<dyn PackageIndex>,
    client: Client,
    cache_root: PathBuf,
    uv: Option<PathBuf>,
    options: FetchOptions,
}

impl Fetcher {
    pub fn new(index: Arc<dyn PackageIndex>, cache_root: PathBuf, options: FetchOptions) -> Result<Self> {
        Ok(Self {
            index,
            client: http_client(HTTP_TIMEOUT)?,
            cache_root,
            uv: None,
            options,
        })
    }

    /// Use this `uv` for sdist builds instead of locating one on demand.
    #[must_use]
    pub fn with_uv(mut self, uv: PathBuf) -> Self {
        self.uv = Some(uv);
        self
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    /// Fetch every package on the worker pool; results are in name order.
    pub fn fetch_all(&self, packages: &[LockedPackage]) -> Result<Vec<FetchedArtifact>> {
        let mut ordered = packages.to_vec();
        ordered.sort();
        let workers = download_concurrency(self.options.workers, ordered.len());
        tracing::info!(packages = ordered.len(), workers, "fetching artifacts");
        let fetched = run_pool(ordered, workers, |package| {
            check_deadline(self.options.deadline.as_ref(), "fetch")?;
            self.fetch(&package)
        })?;
        let reused = fetched.iter().filter(|artifact| artifact.from_cache).count();
        let downloaded_bytes: u64 = fetched.iter().map(|artifact| artifact.downloaded_bytes).sum();
        tracing::info!(
            artifacts = fetched.len(),
            reused,
            downloaded_bytes,
            "artifacts ready"
        );
        Ok(fetched)
    }

    pub fn fetch(&self, package: &LockedPackage) -> Result<FetchedArtifact> {
        match &package.source {
            PackageSource::Index { .. } => self.fetch_from_index(package),
            PackageSource::Url { url } => self.fetch_from_url(package, url),
            PackageSource::Path { path } => self.fetch_from_path(package, path),
        }
    }

    /// Select artifacts for `packages` without downloading or building.
    pub fn plan(&self, packages: &[LockedPackage]) -> Result<Vec<PlannedArtifact>> {
        let mut ordered = packages.to_vec();
        ordered.sort();
        let workers = download_concurrency(self.options.workers, ordered.len());
        run_pool(ordered, workers, |package| {
            check_deadline(self.options.deadline.as_ref(), "analyze")?;
            self.plan_one(package)
        })
    }

    fn plan_one(&self, package: LockedPackage) -> Result<PlannedArtifact> {
        match &package.source {
            PackageSource::Index { .. } => {
                let release = self.index.release_within(
                    &package.name,
                    &package.version,
                    self.options.deadline.as_ref(),
                )?;
                let choice = select_artifact(
                    &package,
                    &release.urls,
                    &self.options.target,
                    self.options.build_sdists,
                )?;
                let file = choice.file();
                Ok(PlannedArtifact {
                    filename: file.filename.clone(),
                    kind: choice.kind(),
                    size: file.size,
                    supported_runtimes: self.supported_runtimes(&file.filename),
                    package,
                })
            }
            PackageSource::Url { url } => {
                let filename = filename_from_url(url)?;
                Ok(PlannedArtifact {
                    kind: artifact_kind(&filename),
                    size: None,
                    supported_runtimes: self.supported_runtimes(&filename),
                    filename,
                    package,
                })
            }
            PackageSource::Path { path } => {
                let filename = file_name(path)?;
                let size = fs::metadata(path).ok().map(|meta| meta.len());
                Ok(PlannedArtifact {
                    kind: artifact_kind(&filename),
                    size,
                    supported_runtimes: self.supported_runtimes(&filename),
                    filename,
                    package,
                })
            }
        }
    }

    fn fetch_from_index(&self, package: &LockedPackage) -> Result<FetchedArtifact> {
        let release = self.index.release_within(
            &package.name,
            &package.version,
            self.options.deadline.as_ref(),
        )?;
        let choice = select_artifact(
            package,
            &release.urls,
            &self.options.target,
            self.options.build_sdists,
        )?;
        let file = choice.file();
        let dest = artifact_path(
            &self.cache_root,
            &package.normalized,
            &package.version,
            &package.platform,
            &file.filename,
        );
        let pin = package.pin();
        let cached = cache_artifact(
            &self.client,
            &dest,
            &DownloadRequest {
                package: &pin,
                url: &file.url,
                filename: &file.filename,
                sha256: Some(&file.digests.sha256),
                deadline: self.options.deadline.as_ref(),
            },
            self.options.retry,
        )?;
        let artifact = match choice {
            ArtifactChoice::Wheel { .. } => self.ready_wheel(package, dest, false)?,
            ArtifactChoice::Sdist { .. } => self.build_sdist(package, &dest)?,
        };
        Ok(artifact.with_transfer(cached))
    }

    fn fetch_from_url(&self, package: &LockedPackage, url: &str) -> Result<FetchedArtifact> {
        let filename = filename_from_url(url)?;
        let dest = artifact_path(
            &self.cache_root,
            &package.normalized,
            &package.version,
            &package.platform,
            &filename,
        );
        let pin = package.pin();
        let sha256 = url
            .split_once("#sha256=")
            .map(|(_, digest)| digest.to_string());
        let download_url = url.split('#').next().unwrap_or(url);
        let cached = cache_artifact(
            &self.client,
            &dest,
            &DownloadRequest {
                package: &pin,
                url: download_url,
                filename: &filename,
                sha256: sha256.as_deref(),
                deadline: self.options.deadline.as_ref(),
            },
            self.options.retry,
        )?;
        Ok(self.dispatch_local(package, dest)?.with_transfer(cached))
    }

    fn fetch_from_path(&self, package: &LockedPackage, path: &Path) -> Result<FetchedArtifact> {
        if !path.is_file() {
            return Err(PackagingError::PackageNotFound {
                package: package.pin(),
                detail: Some(format!("{} does not exist", path.display())),
            }
            .into());
        }
        self.dispatch_local(package, path.to_path_buf())
    }

    fn dispatch_local(&self, package: &LockedPackage, path: PathBuf) -> Result<FetchedArtifact> {
        if WheelFilename::parse(&file_name(&path)?).is_some() {
            self.ready_wheel(package, path, false)
        } else if self.options.build_sdists {
            self.build_sdist(package, &path)
        } else {
            Err(incompatible(
                package,
                &self.options.target,
                format!(
                    "{} is not a wheel and building sdists is disabled",
                    path.display()
                ),
            )
            .into())
        }
    }

    fn build_sdist(&self, package: &LockedPackage, sdist: &Path) -> Result<FetchedArtifact> {
        let uv = match &self.uv {
            Some(uv) => uv.clone(),
            None => locate_uv()?,
        };
        let out_dir = built_wheel_dir(
            &self.cache_root,
            &package.normalized,
            &package.version,
            &package.platform,
        );
        let wheel = build_wheel_from_sdist(
            &uv,
            sdist,
            &out_dir,
            &self.options.target,
            self.options.deadline.as_ref(),
        )
        .map_err(|err| match err.downcast::<PackagingError>() {
            Ok(packaging) => anyhow::Error::from(packaging),
            Err(other) => incompatible(package, &self.options.target, format!("{other:#}")).into(),
        })?;
        self.ready_wheel(package, wheel, true)
    }

    /// Final gate: the wheel must load on the target runtime.
    fn ready_wheel(&self, package: &LockedPackage, path: PathBuf, built: bool) -> Result<FetchedArtifact> {
        let filename = file_name(&path)?;
        let parsed = WheelFilename::parse(&filename)
            .ok_or_else(|| anyhow!("{filename} is not a wheel filename"))?;
        if parsed.compatibility(&self.options.target).is_none() {
            return Err(incompatible(
                package,
                &self.options.target,
                format!("{filename} does not match {}", self.options.target),
            )
            .into());
        }
        let size = fs::metadata(&path)?.len();
        tracing::debug!(package = %package, file = %filename, built, "artifact ready");
        Ok(FetchedArtifact {
            package: package.clone(),
            supported_runtimes: self.supported_runtimes(&filename),
            filename,
            path,
            size,
            built_from_sdist: built,
            from_cache: false,
            downloaded_bytes: 0,
        })
    }

    fn supported_runtimes(&self, filename: &str) -> Vec<LambdaRuntime> {
        let Some(wheel) = WheelFilename::parse(filename) else {
            // sdists are built per runtime, so only the target is known to work
            return vec![self.options.target.runtime];
        };
        self.options
            .compatible_runtimes
            .iter()
            .copied()
            .filter(|runtime| {
                wheel
                    .compatibility(&self.options.target.with_runtime(*runtime))
                    .is_some()
            })
            .collect()
    }
}

fn artifact_kind(filename: &str) -> &'static str {
    if WheelFilename::parse(filename).is_some() {
        "wheel"
    } else {
        "sdist"
    }
}

fn filename_from_url(url: &str) -> Result<String> {
    url.split(['#', '?'])
        .next()
        .and_then(|path| path.rsplit('/').next())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("cannot derive a filename from {url}"))
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("{} has no file name", path.display()))
}
