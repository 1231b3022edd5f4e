use std::thread;

use anyhow::Result;
use layerpack_domain::{check_deadline, Deadline, PackagingError};
use reqwest::{blocking::Client, StatusCode};
use serde::Deserialize;

use crate::download::RetryPolicy;

/// Release document served at `{index}/pypi/{name}/{version}/json`.
#[derive(Debug, Clone, Deserialize)]
pub struct PypiReleaseResponse {
    pub urls: Vec<PypiFile>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PypiFile {
    pub filename: String,
    pub url: String,
    pub packagetype: String,
    #[serde(default)]
    pub yanked: Option<bool>,
    #[serde(default)]
    pub size: Option<u64>,
    pub digests: PypiDigests,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PypiDigests {
    pub sha256: String,
}

/// Source of release metadata; swapped out in tests.
pub trait PackageIndex: Send + Sync {
    fn release(&self, name: &str, version: &str) -> Result<PypiReleaseResponse>;

    /// `release`, giving up once `deadline` has passed.
    fn release_within(
        &self,
        name: &str,
        version: &str,
        deadline: Option<&Deadline>,
    ) -> Result<PypiReleaseResponse> {
        check_deadline(deadline, "fetch")?;
        self.release(name, version)
    }
}

/// PyPI JSON API client.
#[derive(Debug, Clone)]
pub struct PypiIndex {
    client: Client,
    base_url: String,
    retry: RetryPolicy,
}

impl PypiIndex {
    pub fn new(client: Client, base_url: &str, retry: RetryPolicy) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry,
        }
    }

    pub fn release_url(&self, name: &str, version: &str) -> String {
        format!("{}/pypi/{name}/{version}/json", self.base_url)
    }
}

impl PackageIndex for PypiIndex {
    fn release(&self, name: &str, version: &str) -> Result<PypiReleaseResponse> {
        self.release_within(name, version, None)
    }

    fn release_within(
        &self,
        name: &str,
        version: &str,
        deadline: Option<&Deadline>,
    ) -> Result<PypiReleaseResponse> {
        let url = self.release_url(name, version);
        let package = format!("{name}=={version}");
        let mut last_error = String::new();
        for attempt in 1..=self.retry.attempts {
            check_deadline(deadline, "fetch")?;
            let mut builder = self.client.get(&url);
            if let Some(deadline) = deadline {
                builder = builder.timeout(deadline.remaining());
            }
            match builder.send() {
                Err(err) => last_error = format!("request to {url} failed: {err}"),
                Ok(response) if response.status() == StatusCode::NOT_FOUND => {
                    return Err(PackagingError::PackageNotFound {
                        package,
                        detail: Some(format!("{url} returned 404")),
                    }
                    .into());
                }
                Ok(response) if response.status().is_server_error() => {
                    last_error = format!("{url} returned {}", response.status());
                }
                Ok(response) if !response.status().is_success() => {
                    return Err(PackagingError::Download {
                        package,
                        attempts: attempt,
                        reason: format!("{url} returned {}", response.status()),
                    }
                    .into());
                }
                Ok(response) => match response.json::<PypiReleaseResponse>() {
                    Ok(release) => return Ok(release),
                    Err(err) => last_error = format!("invalid JSON from {url}: {err}"),
                },
            }
            if let Some(deadline) = deadline.filter(|deadline| deadline.expired()) {
                tracing::debug!(%package, error = %last_error, "index query cut off by deadline");
                return Err(deadline.timeout("fetch").into());
            }
            if attempt < self.retry.attempts {
                tracing::warn!(%package, attempt, error = %last_error, "index query failed; retrying");
                thread::sleep(self.retry.delay(attempt));
            }
        }
        Err(PackagingError::Download {
            package,
            attempts: self.retry.attempts,
            reason: last_error,
        }
        .into())
    }
}
