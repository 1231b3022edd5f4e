use std::{
    collections::BTreeSet,
    env, fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::{anyhow, Context, Result};
use layerpack_domain::{
    check_deadline, normalize_dist_name, LockedPackage, PackageSource, PackagingError,
    RequirementSpec, WheelFilename,
};
use pep508_rs::{Requirement as PepRequirement, VersionOrUrl};

use crate::{check_direct_conflicts, process::run_command, DependencyResolver, ResolveRequest};

/// Overrides the `uv` executable found on `PATH`.
pub const UV_ENV: &str = "LAYERPACK_UV";

const NOT_FOUND_MARKERS: &[&str] = &[
    "not found in the package registry",
    "not found in the provided package locations",
    "no matching distribution",
    "there is no version of",
    "404 not found",
];
const NETWORK_MARKERS: &[&str] = &[
    "error sending request",
    "failed to fetch",
    "dns error",
    "connection refused",
    "operation timed out",
];
const MAX_DETAIL_CHARS: usize = 600;

pub fn locate_uv() -> Result<PathBuf, PackagingError> {
    if let Some(value) = env::var_os(UV_ENV).filter(|value| !value.is_empty()) {
        let path = PathBuf::from(value);
        if path.is_file() {
            return Ok(path);
        }
        return Err(PackagingError::ResolverUnavailable(format!(
            "{UV_ENV} points at {}, which does not exist",
            path.display()
        )));
    }
    which::which("uv")
        .map_err(|err| PackagingError::ResolverUnavailable(format!("`uv` not found on PATH ({err})")))
}

/// Resolver backed by `uv pip compile`.
#[derive(Debug, Clone)]
pub struct UvResolver {
    program: PathBuf,
}

impl UvResolver {
    pub fn new(program: PathBuf) -> Self {
        Self { program }
    }

    pub fn locate() -> Result<Self> {
        Ok(Self::new(locate_uv()?))
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl DependencyResolver for UvResolver {
    fn resolve(&self, request: &ResolveRequest) -> Result<Vec<LockedPackage>> {
        check_direct_conflicts(&request.requirements)?;
        let applicable = request.applicable()?;
        if applicable.is_empty() {
            return Ok(Vec::new());
        }
        check_deadline(request.deadline.as_ref(), "resolve")?;

        let workdir = tempfile::Builder::new()
            .prefix("layerpack-resolve-")
            .tempdir()
            .context("failed to create resolver workspace")?;
        let input = workdir.path().join("requirements.in");
        fs::write(&input, render_input(&applicable))
            .with_context(|| format!("failed to write {}", input.display()))?;

        let args = compile_args(request, &input);
        tracing::info!(
            requirements = applicable.len(),
            target = %request.target,
            "resolving with uv"
        );
        let output = run_command(
            &self.program,
            &args,
            &[("UV_NO_CONFIG", "1")],
            workdir.path(),
            request.deadline.as_ref(),
            "resolve",
        )?;
        if !output.success() {
            return Err(classify_failure(&output.stderr, &applicable));
        }

        let direct: BTreeSet<&str> = applicable
            .iter()
            .map(|spec| spec.normalized.as_str())
            .collect();
        let mut locked = parse_compiled(&output.stdout, request, &direct)?;
        locked.sort();
        locked.dedup_by(|a, b| a.normalized == b.normalized);
        tracing::debug!(packages = locked.len(), "resolution finished");
        Ok(locked)
    }
}

fn render_input(specs: &[&RequirementSpec]) -> String {
    let mut text = String::new();
    for spec in specs {
        text.push_str(&spec.raw);
        text.push('\n');
    }
    text
}

fn compile_args(request: &ResolveRequest, input: &Path) -> Vec<String> {
    let mut args = vec![
        "pip".to_string(),
        "compile".to_string(),
        input.display().to_string(),
        "--python-version".to_string(),
        request.target.runtime.python_version(),
        "--python-platform".to_string(),
        request.target.resolver_platform(),
        "--index-url".to_string(),
        simple_index(&request.index_url),
        "--no-header".to_string(),
        "--no-annotate".to_string(),
        "--quiet".to_string(),
    ];
    if !request.include_dependencies {
        args.push("--no-deps".to_string());
    }
    args
}

fn simple_index(index_url: &str) -> String {
    format!("{}/simple", index_url.trim_end_matches('/'))
}

fn parse_compiled(
    stdout: &str,
    request: &ResolveRequest,
    direct: &BTreeSet<&str>,
) -> Result<Vec<LockedPackage>> {
    let platform = request.target.platform_tag();
    let mut locked = Vec::new();
    for line in stdout.lines() {
        if line.starts_with(char::is_whitespace) {
            continue;
        }
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('-') {
            continue;
        }
        let requirement = PepRequirement::from_str(line)
            .map_err(|err| anyhow!("unexpected resolver output `{line}`: {err}"))?;
        let name = requirement.name.to_string();
        let normalized = normalize_dist_name(&name);
        let (version, source) = match requirement.version_or_url.as_ref() {
            Some(VersionOrUrl::VersionSpecifier(spec)) => {
                let text = spec.to_string();
                let version = text
                    .strip_prefix("===")
                    .or_else(|| text.strip_prefix("=="))
                    .ok_or_else(|| anyhow!("resolver returned an unpinned requirement `{line}`"))?
                    .trim()
                    .to_string();
                let source = PackageSource::Index {
                    url: request.index_url.clone(),
                };
                (version, source)
            }
            Some(VersionOrUrl::Url(url)) => {
                let raw = url.to_string();
                let version = version_from_artifact(&raw)
                    .ok_or_else(|| anyhow!("cannot derive a version for `{line}`"))?;
                (version, direct_source(&raw))
            }
            None => return Err(anyhow!("resolver returned an unpinned requirement `{line}`")),
        };
        locked.push(LockedPackage {
            direct: direct.contains(normalized.as_str()),
            name,
            normalized,
            version,
            source,
            platform: platform.clone(),
        });
    }
    Ok(locked)
}

fn direct_source(raw: &str) -> PackageSource {
    match url::Url::parse(raw) {
        Ok(parsed) if parsed.scheme() == "file" => match parsed.to_file_path() {
            Ok(path) => PackageSource::Path { path },
            Err(()) => PackageSource::Url {
                url: raw.to_string(),
            },
        },
        _ => PackageSource::Url {
            url: raw.to_string(),
        },
    }
}

/// Version encoded in a wheel or sdist filename at the end of a URL.
fn version_from_artifact(url: &str) -> Option<String> {
    let path = url.split(['#', '?']).next()?;
    let filename = path.rsplit('/').next()?;
    if let Some(wheel) = WheelFilename::parse(filename) {
        return Some(wheel.version);
    }
    let stem = [".tar.gz", ".zip", ".tar.bz2"]
        .iter()
        .find_map(|suffix| filename.strip_suffix(suffix))?;
    let (_, version) = stem.rsplit_once('-')?;
    (!version.is_empty()).then(|| version.to_string())
}

fn classify_failure(stderr: &str, applicable: &[&RequirementSpec]) -> anyhow::Error {
    let lowered = stderr.to_ascii_lowercase();
    let detail = summarize(stderr);

    if NOT_FOUND_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        let package = applicable
            .iter()
            .find(|spec| mentions_package(&lowered, &spec.normalized))
            .map_or_else(|| "unknown package".to_string(), |spec| spec.name.clone());
        return PackagingError::PackageNotFound {
            package,
            detail: Some(detail),
        }
        .into();
    }
    if NETWORK_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        return anyhow!("uv could not reach the package index: {detail}");
    }
    PackagingError::DependencyConflict {
        requirements: applicable.iter().map(|spec| spec.raw.clone()).collect(),
        detail: Some(detail),
    }
    .into()
}

/// Whether `text` names `normalized` as a whole distribution-name token.
fn mentions_package(text: &str, normalized: &str) -> bool {
    text.split(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        .map(|token| token.trim_matches(|c| matches!(c, '-' | '_' | '.')))
        .filter(|token| !token.is_empty())
        .any(|token| normalize_dist_name(token) == normalized)
}

/// Flatten uv's boxed diagnostic into one line.
fn summarize(stderr: &str) -> String {
    let mut summary = stderr
        .lines()
        .map(|line| line.trim_start_matches(|c: char| !c.is_alphanumeric()).trim())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    if summary.chars().count() > MAX_DETAIL_CHARS {
        summary = summary.chars().take(MAX_DETAIL_CHARS).collect();
        summary.push_str("...");
    }
    if summary.is_empty() {
        summary.push_str("uv exited without diagnostics");
    }
    summary
}
