use std::{
    fs,
    io::{Read, Write},
    path::Path,
    thread,
    time::Duration,
};

use anyhow::{Context, Result};
use layerpack_domain::{check_deadline, Deadline, PackagingError};
use reqwest::blocking::Client;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use crate::cache::validate_existing;

const USER_AGENT: &str = concat!("layerpack/", env!("CARGO_PKG_VERSION"));

/// Fixed-attempt retry with doubling backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: usize,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// Delay after the given (1-based) failed attempt.
    pub fn delay(&self, attempt: usize) -> Duration {
        let shift = u32::try_from(attempt.saturating_sub(1)).unwrap_or(u32::MAX).min(16);
        self.base_delay.saturating_mul(1_u32 << shift)
    }
}

pub fn http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .context("failed to build http client")
}

pub struct DownloadRequest<'a> {
    /// Pin shown in errors (`name==version`).
    pub package: &'a str,
    pub url: &'a str,
    pub filename: &'a str,
    pub sha256: Option<&'a str>,
    /// Caps each attempt's timeout at the remaining budget.
    pub deadline: Option<&'a Deadline>,
}

#[derive(Debug, Clone, Copy)]
pub struct CachedArtifact {
    pub size: u64,
    /// Served from an existing verified cache entry.
    pub reused: bool,
}

enum AttemptError {
    Transient(String),
    Permanent(String),
}

/// Ensure `dest` holds the requested file, downloading it when missing.
pub fn cache_artifact(
    client: &Client,
    dest: &Path,
    request: &DownloadRequest<'_>,
    retry: RetryPolicy,
) -> Result<CachedArtifact> {
    if let Some(size) = validate_existing(dest, request.sha256)? {
        tracing::debug!(file = request.filename, "cache hit");
        return Ok(CachedArtifact { size, reused: true });
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let mut last_error = String::new();
    for attempt in 1..=retry.attempts {
        check_deadline(request.deadline, "fetch")?;
        match download_once(client, dest, request) {
            Ok(size) => {
                tracing::debug!(file = request.filename, size, attempt, "downloaded");
                return Ok(CachedArtifact {
                    size,
                    reused: false,
                });
            }
            Err(AttemptError::Permanent(reason)) => {
                return Err(PackagingError::Download {
                    package: request.package.to_string(),
                    attempts: attempt,
                    reason,
                }
                .into());
            }
            Err(AttemptError::Transient(reason)) => last_error = reason,
        }
        if let Some(deadline) = request.deadline.filter(|deadline| deadline.expired()) {
            tracing::debug!(file = request.filename, error = %last_error, "download cut off by deadline");
            return Err(deadline.timeout("fetch").into());
        }
        if attempt < retry.attempts {
            tracing::warn!(
                file = request.filename,
                attempt,
                error = %last_error,
                "download failed; retrying"
            );
            thread::sleep(retry.delay(attempt));
        }
    }
    Err(PackagingError::Download {
        package: request.package.to_string(),
        attempts: retry.attempts,
        reason: last_error,
    }
    .into())
}

fn download_once(
    client: &Client,
    dest: &Path,
    request: &DownloadRequest<'_>,
) -> Result<u64, AttemptError> {
    let mut builder = client.get(request.url);
    if let Some(deadline) = request.deadline {
        builder = builder.timeout(deadline.remaining());
    }
    let mut response = builder
        .send()
        .map_err(|err| AttemptError::Transient(format!("request to {} failed: {err}", request.url)))?;
    let status = response.status();
    if status.is_server_error() {
        return Err(AttemptError::Transient(format!("{} returned {status}", request.url)));
    }
    if !status.is_success() {
        return Err(AttemptError::Permanent(format!("{} returned {status}", request.url)));
    }

    let parent = dest.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(parent).map_err(permanent)?;
    let mut hasher = Sha256::new();
    let mut written: u64 = 0;
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = response.read(&mut buffer).map_err(|err| {
            AttemptError::Transient(format!("stream error for {}: {err}", request.filename))
        })?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        tmp.write_all(&buffer[..read]).map_err(permanent)?;
        written += read as u64;
    }

    if let Some(expected) = request.sha256 {
        let actual = hex::encode(hasher.finalize());
        if !actual.eq_ignore_ascii_case(expected) {
            return Err(AttemptError::Transient(format!(
                "sha256 mismatch for {} (expected {expected}, got {actual})",
                request.filename
            )));
        }
    }

    tmp.persist(dest)
        .map_err(|err| AttemptError::Permanent(format!("failed to persist {}: {err}", dest.display())))?;
    Ok(written)
}

fn permanent(err: std::io::Error) -> AttemptError {
    AttemptError::Permanent(err.to_string())
}
