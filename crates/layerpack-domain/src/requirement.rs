use std::{
    collections::HashSet,
    fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::{anyhow, Context, Result};
use pep440_rs::{Operator, Version, VersionSpecifiers};
use pep508_rs::{MarkerEnvironment, Requirement as PepRequirement, VersionOrUrl};
use serde::Serialize;

use crate::error::PackagingError;

/// Where a requirement came from, for error messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RequirementOrigin {
    Cli,
    File { path: PathBuf, line: usize },
}

impl fmt::Display for RequirementOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cli => f.write_str("command line"),
            Self::File { path, line } => write!(f, "{}:{line}", path.display()),
        }
    }
}

/// One parsed PEP 508 requirement.
#[derive(Debug, Clone)]
pub struct RequirementSpec {
    pub raw: String,
    pub name: String,
    pub normalized: String,
    pub specifiers: Option<VersionSpecifiers>,
    pub url: Option<String>,
    pub extras: Vec<String>,
    pub marker: Option<String>,
    pub origin: RequirementOrigin,
    inner: PepRequirement,
}

impl RequirementSpec {
    /// Exact version when the requirement is a single `==`/`===` pin.
    pub fn pinned_version(&self) -> Option<Version> {
        let specifiers = self.specifiers.as_ref()?;
        let mut iter = specifiers.iter();
        let first = iter.next()?;
        if iter.next().is_some() {
            return None;
        }
        match first.operator() {
            Operator::Equal | Operator::ExactEqual => Some(first.version().clone()),
            _ => None,
        }
    }

    pub fn allows(&self, version: &Version) -> bool {
        self.specifiers
            .as_ref()
            .map_or(true, |specifiers| specifiers.contains(version))
    }

    pub fn applies_to(&self, env: &MarkerEnvironment) -> bool {
        self.inner.evaluate_markers(env, &[])
    }
}

impl fmt::Display for RequirementSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// PEP 503 normalization: lowercase, runs of `-`, `_`, `.` become `-`.
pub fn normalize_dist_name(name: &str) -> String {
    let mut normalized = String::with_capacity(name.len());
    let mut pending_sep = false;
    for ch in name.trim().chars() {
        if matches!(ch, '-' | '_' | '.') {
            pending_sep = true;
            continue;
        }
        if pending_sep && !normalized.is_empty() {
            normalized.push('-');
        }
        pending_sep = false;
        normalized.push(ch.to_ascii_lowercase());
    }
    normalized
}

pub fn parse_requirement(raw: &str, origin: RequirementOrigin) -> Result<RequirementSpec> {
    let trimmed = raw.trim();
    let inner = PepRequirement::from_str(trimmed).map_err(|err| {
        PackagingError::configuration(
            origin_key(&origin),
            format!("failed to parse requirement `{trimmed}` ({origin}): {err}"),
        )
    })?;

    let (specifiers, url) = match inner.version_or_url.as_ref() {
        Some(VersionOrUrl::VersionSpecifier(spec)) => {
            let parsed = VersionSpecifiers::from_str(&spec.to_string())
                .map_err(|err| anyhow!("failed to parse specifiers `{spec}`: {err}"))?;
            (Some(parsed), None)
        }
        Some(VersionOrUrl::Url(url)) => (None, Some(url.to_string())),
        None => (None, None),
    };

    let mut extras = inner
        .extras
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>();
    extras.sort();
    extras.dedup();

    Ok(RequirementSpec {
        raw: trimmed.to_string(),
        name: inner.name.to_string(),
        normalized: normalize_dist_name(inner.name.as_ref()),
        specifiers,
        url,
        extras,
        marker: inner.marker.as_ref().map(ToString::to_string),
        origin,
        inner,
    })
}

/// Parse `-p/--packages` style entries; blank entries are skipped.
pub fn parse_package_list(items: &[String]) -> Result<Vec<RequirementSpec>> {
    items
        .iter()
        .map(|item| item.trim())
        .filter(|item| !item.is_empty())
        .map(|item| parse_requirement(item, RequirementOrigin::Cli))
        .collect()
}

/// Read a pip-style requirements file, following `-r` includes.
pub fn read_requirements_file(path: &Path) -> Result<Vec<RequirementSpec>> {
    let mut visited = HashSet::new();
    let mut specs = Vec::new();
    read_requirements_file_inner(path, &mut visited, &mut specs)?;
    Ok(specs)
}

fn read_requirements_file_inner(
    path: &Path,
    visited: &mut HashSet<PathBuf>,
    specs: &mut Vec<RequirementSpec>,
) -> Result<()> {
    if !path.is_file() {
        return Err(PackagingError::configuration(
            "requirements",
            format!("requirements file not found: {}", path.display()),
        )
        .into());
    }
    let canonical = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    if !visited.insert(canonical.clone()) {
        tracing::debug!(path = %canonical.display(), "requirements file already read");
        return Ok(());
    }
    let contents = fs::read_to_string(&canonical)
        .with_context(|| format!("failed to read {}", canonical.display()))?;
    let base_dir = canonical.parent().unwrap_or_else(|| Path::new("."));

    for (line_no, line) in logical_lines(&contents) {
        let spec = strip_comment(&line);
        if spec.is_empty() {
            continue;
        }
        if let Some(target) = include_target(spec) {
            let include = if Path::new(target).is_absolute() {
                PathBuf::from(target)
            } else {
                base_dir.join(target)
            };
            tracing::debug!(from = %canonical.display(), include = %include.display(), "following include");
            read_requirements_file_inner(&include, visited, specs)?;
            continue;
        }
        if spec.starts_with('-') {
            return Err(PackagingError::configuration(
                "requirements",
                format!(
                    "unsupported option `{spec}` at {}:{line_no}",
                    canonical.display()
                ),
            )
            .into());
        }
        let origin = RequirementOrigin::File {
            path: canonical.clone(),
            line: line_no,
        };
        specs.push(parse_requirement(spec, origin)?);
    }
    Ok(())
}

/// Join `\` continuations, keeping the number of the first physical line.
fn logical_lines(contents: &str) -> Vec<(usize, String)> {
    let mut lines = Vec::new();
    let mut current: Option<(usize, String)> = None;
    for (idx, raw) in contents.lines().enumerate() {
        let (start, mut buffer) = current.take().unwrap_or((idx + 1, String::new()));
        if let Some(head) = raw.strip_suffix('\\') {
            buffer.push_str(head);
            buffer.push(' ');
            current = Some((start, buffer));
        } else {
            buffer.push_str(raw);
            lines.push((start, buffer));
        }
    }
    if let Some(pending) = current {
        lines.push(pending);
    }
    lines
}

/// `#` opens a comment at line start or after whitespace; URL fragments survive.
fn strip_comment(line: &str) -> &str {
    let bytes = line.as_bytes();
    for (idx, byte) in bytes.iter().enumerate() {
        if *byte == b'#' && (idx == 0 || bytes[idx - 1].is_ascii_whitespace()) {
            return line[..idx].trim();
        }
    }
    line.trim()
}

fn include_target(spec: &str) -> Option<&str> {
    let rest = spec
        .strip_prefix("--requirement")
        .or_else(|| spec.strip_prefix("-r"))?;
    let target = rest.trim_start_matches([' ', '=', '\t']).trim();
    (!target.is_empty()).then_some(target)
}

fn origin_key(origin: &RequirementOrigin) -> &'static str {
    match origin {
        RequirementOrigin::Cli => "packages",
        RequirementOrigin::File { .. } => "requirements",
    }
}
