use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::Result;
use layerpack_domain::{
    check_deadline, parse_package_list, read_requirements_file, Architecture, Deadline,
    LambdaRuntime, LockedPackage, PackagingError, RequirementSpec,
};
use layerpack_resolver::{DependencyResolver, ResolveRequest, UvResolver};
use layerpack_store::{
    http_client, resolve_cache_path, FetchOptions, FetchedArtifact, Fetcher, PackageIndex,
    PypiIndex, RetryPolicy,
};
use serde::Serialize;

use crate::{
    archive::{validate_layer_name, write_archive},
    config::PackagingConfig,
    filter::{apply_filters, FilterOptions, FilterReport},
    layout::{build_layout, LayerPackage, StagedLayer},
};

const INDEX_TIMEOUT: Duration = Duration::from_secs(30);

/// The written layer and what went into it.
#[derive(Debug, Clone, Serialize)]
pub struct LayerArtifact {
    pub name: String,
    pub path: PathBuf,
    pub archive_bytes: u64,
    pub staged_bytes: u64,
    pub sha256: String,
    pub runtime: LambdaRuntime,
    pub architecture: Architecture,
    pub compatible_runtimes: Vec<LambdaRuntime>,
    pub packages: Vec<LayerPackage>,
    pub excluded: Vec<String>,
    pub filter: FilterReport,
    /// Artifacts served from the local cache.
    pub cache_hits: usize,
    pub downloaded_bytes: u64,
    /// Kept staging tree, when requested.
    pub staging_dir: Option<PathBuf>,
}

/// Resolution and artifact choice without downloading.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub runtime: LambdaRuntime,
    pub architecture: Architecture,
    pub packages: Vec<AnalyzedPackage>,
    pub total_known_bytes: u64,
    pub unknown_sizes: usize,
    pub compatible_runtimes: Vec<LambdaRuntime>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalyzedPackage {
    pub name: String,
    pub version: String,
    /// `top-level` when requested directly, otherwise `transitive`.
    pub role: &'static str,
    pub filename: Option<String>,
    pub kind: Option<&'static str>,
    pub size: Option<u64>,
    pub excluded: bool,
}

/// Runs the resolve, fetch, layout, filter and archive stages.
pub struct Packager {
    config: PackagingConfig,
    output_dir: PathBuf,
    resolver: Arc<dyn DependencyResolver>,
    index: Arc<dyn PackageIndex>,
    cache_root: PathBuf,
    uv: Option<PathBuf>,
}

impl Packager {
    /// Packager wired to `uv`, the configured index and the user cache.
    pub fn new(config: PackagingConfig, output_dir: PathBuf) -> Result<Self> {
        config.validate()?;
        let uv = UvResolver::locate()?;
        let index = PypiIndex::new(
            http_client(INDEX_TIMEOUT)?,
            &config.index_url,
            RetryPolicy::default(),
        );
        let cache = resolve_cache_path()?;
        tracing::debug!(cache = %cache.path.display(), source = cache.source, "artifact cache");
        let program = uv.program().to_path_buf();
        Ok(Self {
            config,
            output_dir,
            resolver: Arc::new(uv),
            index: Arc::new(index),
            cache_root: cache.path,
            uv: Some(program),
        })
    }

    /// Packager with caller-provided collaborators.
    pub fn with_services(
        config: PackagingConfig,
        output_dir: PathBuf,
        resolver: Arc<dyn DependencyResolver>,
        index: Arc<dyn PackageIndex>,
        cache_root: PathBuf,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            output_dir,
            resolver,
            index,
            cache_root,
            uv: None,
        })
    }

    pub fn config(&self) -> &PackagingConfig {
        &self.config
    }

    pub fn create_layer_from_packages(&self, packages: &[String], name: &str) -> Result<LayerArtifact> {
        validate_layer_name(name)?;
        let specs = parse_package_list(packages)?;
        self.create_layer(specs, name)
    }

    pub fn create_layer_from_requirements(&self, path: &Path, name: &str) -> Result<LayerArtifact> {
        validate_layer_name(name)?;
        let specs = read_requirements_file(path)?;
        self.create_layer(specs, name)
    }

    pub fn analyze_packages(&self, packages: &[String]) -> Result<AnalysisReport> {
        let specs = parse_package_list(packages)?;
        self.analyze(specs)
    }

    pub fn analyze_requirements(&self, path: &Path) -> Result<AnalysisReport> {
        let specs = read_requirements_file(path)?;
        self.analyze(specs)
    }

    fn create_layer(&self, specs: Vec<RequirementSpec>, name: &str) -> Result<LayerArtifact> {
        let deadline = self.deadline();
        let target = self.config.target();
        tracing::info!(layer = name, %target, requirements = specs.len(), "creating layer");

        let locked = self.resolve(specs, deadline)?;
        check_deadline(deadline.as_ref(), "resolve")?;

        let excluded = self.config.excluded_names();
        let (wanted, skipped): (Vec<LockedPackage>, Vec<LockedPackage>) = locked
            .into_iter()
            .partition(|package| !excluded.contains(&package.normalized));
        for package in &skipped {
            tracing::info!(package = %package, "excluded; not fetched");
        }

        let artifacts = self.fetcher(deadline)?.fetch_all(&wanted)?;
        check_deadline(deadline.as_ref(), "fetch")?;

        let staged = StagedLayer::create(self.config.runtime, self.config.keep_staging)?;
        let mut layout = build_layout(&staged, &artifacts, &excluded, &self.config.include_source)?;
        layout
            .excluded
            .extend(skipped.iter().map(|package| package.normalized.clone()));
        layout.excluded.sort();
        check_deadline(deadline.as_ref(), "layout")?;

        let filter = apply_filters(
            staged.root(),
            FilterOptions {
                strip_test_files: self.config.strip_test_files,
                optimization_level: self.config.optimization_level,
                max_size_mb: self.config.max_size_mb,
            },
        )?;
        check_deadline(deadline.as_ref(), "filter")?;

        let archive = write_archive(staged.root(), &self.output_dir, name)?;
        let staging_dir = self
            .config
            .keep_staging
            .then(|| staged.root().to_path_buf());
        if let Some(dir) = &staging_dir {
            tracing::info!(path = %dir.display(), "staging directory kept");
        }

        Ok(LayerArtifact {
            name: name.to_string(),
            path: archive.path,
            archive_bytes: archive.size,
            staged_bytes: filter.final_bytes,
            sha256: archive.sha256,
            runtime: self.config.runtime,
            architecture: self.config.architecture,
            compatible_runtimes: self.layer_runtimes(&artifacts, &excluded),
            packages: layout.packages,
            excluded: layout.excluded,
            filter,
            cache_hits: artifacts.iter().filter(|artifact| artifact.from_cache).count(),
            downloaded_bytes: artifacts.iter().map(|artifact| artifact.downloaded_bytes).sum(),
            staging_dir,
        })
    }

    fn analyze(&self, specs: Vec<RequirementSpec>) -> Result<AnalysisReport> {
        let deadline = self.deadline();
        let locked = self.resolve(specs, deadline)?;
        let excluded = self.config.excluded_names();
        let wanted: Vec<LockedPackage> = locked
            .iter()
            .filter(|package| !excluded.contains(&package.normalized))
            .cloned()
            .collect();
        let planned = self.fetcher(deadline)?.plan(&wanted)?;

        let mut compatible = self.config.effective_compatible_runtimes();
        let mut packages = Vec::with_capacity(locked.len());
        let mut total_known_bytes = 0;
        let mut unknown_sizes = 0;
        for package in &locked {
            let role = if package.direct { "top-level" } else { "transitive" };
            let plan = planned
                .iter()
                .find(|plan| plan.package.normalized == package.normalized);
            let is_excluded = plan.is_none();
            if let Some(plan) = plan {
                match plan.size {
                    Some(size) => total_known_bytes += size,
                    None => unknown_sizes += 1,
                }
                compatible.retain(|runtime| plan.supported_runtimes.contains(runtime));
            }
            packages.push(AnalyzedPackage {
                name: package.name.clone(),
                version: package.version.clone(),
                role,
                filename: plan.map(|plan| plan.filename.clone()),
                kind: plan.map(|plan| plan.kind),
                size: plan.and_then(|plan| plan.size),
                excluded: is_excluded,
            });
        }

        Ok(AnalysisReport {
            runtime: self.config.runtime,
            architecture: self.config.architecture,
            packages,
            total_known_bytes,
            unknown_sizes,
            compatible_runtimes: compatible,
        })
    }

    fn resolve(&self, specs: Vec<RequirementSpec>, deadline: Option<Deadline>) -> Result<Vec<LockedPackage>> {
        if specs.is_empty() {
            return Err(PackagingError::configuration("packages", "no requirements were given").into());
        }
        let request = ResolveRequest {
            requirements: specs,
            target: self.config.target(),
            index_url: self.config.index_url.clone(),
            include_dependencies: self.config.include_dependencies,
            deadline,
        };
        let locked = self.resolver.resolve(&request)?;
        tracing::info!(packages = locked.len(), "resolved");
        Ok(locked)
    }

    fn fetcher(&self, deadline: Option<Deadline>) -> Result<Fetcher> {
        let options = FetchOptions {
            target: self.config.target(),
            compatible_runtimes: self.config.effective_compatible_runtimes(),
            build_sdists: self.config.build_sdists,
            workers: self.config.download_workers,
            deadline,
            retry: RetryPolicy::default(),
        };
        let fetcher = Fetcher::new(Arc::clone(&self.index), self.cache_root.clone(), options)?;
        Ok(match &self.uv {
            Some(uv) => fetcher.with_uv(uv.clone()),
            None => fetcher,
        })
    }

    fn deadline(&self) -> Option<Deadline> {
        self.config
            .timeout_secs
            .map(|secs| Deadline::new(Duration::from_secs(secs)))
    }

    /// Runtimes every laid-out package supports.
    fn layer_runtimes(&self, artifacts: &[FetchedArtifact], excluded: &[String]) -> Vec<LambdaRuntime> {
        let mut runtimes = self.config.effective_compatible_runtimes();
        for artifact in artifacts
            .iter()
            .filter(|artifact| !excluded.contains(&artifact.package.normalized))
        {
            runtimes.retain(|runtime| artifact.supported_runtimes.contains(runtime));
        }
        runtimes
    }
}
