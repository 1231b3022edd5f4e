//! Error taxonomy surfaced by every packaging stage.
//!
//! Stages return `anyhow::Result` and raise one of these variants when the
//! failure is actionable by the user; callers recover the variant with
//! `downcast_ref::<PackagingError>()`.

use thiserror::Error;

pub const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone, Error)]
pub enum PackagingError {
    #[error("package not found: {package}{}", detail_suffix(.detail))]
    PackageNotFound {
        package: String,
        detail: Option<String>,
    },
    #[error("{subject} is not compatible with {runtime} ({platform}): {detail}")]
    IncompatibleRuntime {
        subject: String,
        runtime: String,
        platform: String,
        detail: String,
    },
    #[error(
        "layer size {} MB exceeds the {limit_mb} MB limit",
        format_mb(.measured_bytes)
    )]
    LayerSizeLimit { measured_bytes: u64, limit_mb: u64 },
    #[error("conflicting requirements: {}{}", .requirements.join(", "), detail_suffix(.detail))]
    DependencyConflict {
        requirements: Vec<String>,
        detail: Option<String>,
    },
    #[error("invalid `{key}`: {message}")]
    Configuration { key: String, message: String },
    #[error("failed to download {package} after {attempts} attempt(s): {reason}")]
    Download {
        package: String,
        attempts: usize,
        reason: String,
    },
    #[error("timed out after {limit_secs}s during {stage}")]
    Timeout { stage: String, limit_secs: u64 },
    #[error("dependency resolver unavailable: {0}")]
    ResolverUnavailable(String),
}

impl PackagingError {
    pub fn configuration(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Stable name of the error kind, printed by the CLI and the JSON envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PackageNotFound { .. } => "PackageNotFoundError",
            Self::IncompatibleRuntime { .. } => "IncompatibleRuntimeError",
            Self::LayerSizeLimit { .. } => "LayerSizeLimitError",
            Self::DependencyConflict { .. } => "DependencyConflictError",
            Self::Configuration { .. } => "ConfigurationError",
            Self::Download { .. } => "DownloadError",
            Self::Timeout { .. } => "TimeoutError",
            Self::ResolverUnavailable(_) => "ResolverUnavailableError",
        }
    }

    pub fn hint(&self) -> String {
        match self {
            Self::PackageNotFound { .. } => "Verify the package name and version.".to_string(),
            Self::IncompatibleRuntime { .. } => {
                "Pick a version that ships manylinux wheels for this runtime, or change --runtime/--architecture."
                    .to_string()
            }
            Self::LayerSizeLimit { .. } => {
                "Exclude unnecessary packages, enable --strip-test-files, or raise --max-size-mb."
                    .to_string()
            }
            Self::DependencyConflict { .. } => {
                "Check the listed requirements for conflicting versions.".to_string()
            }
            Self::Configuration { key, .. } => format!("Check the `{key}` setting."),
            Self::Download { .. } => {
                "Check network access to the package index and retry.".to_string()
            }
            Self::Timeout { .. } => "Raise --timeout or reduce the requirement set.".to_string(),
            Self::ResolverUnavailable(_) => {
                "Install uv (https://docs.astral.sh/uv/) or point LAYERPACK_UV at it.".to_string()
            }
        }
    }
}

fn detail_suffix(detail: &Option<String>) -> String {
    match detail.as_deref().map(str::trim) {
        Some(text) if !text.is_empty() => format!(" ({text})"),
        _ => String::new(),
    }
}

#[allow(clippy::trivially_copy_pass_by_ref, clippy::cast_precision_loss)]
fn format_mb(bytes: &u64) -> String {
    format!("{:.2}", *bytes as f64 / MIB as f64)
}
