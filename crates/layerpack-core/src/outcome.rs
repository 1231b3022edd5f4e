use layerpack_domain::{PackagingError, MIB};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::pipeline::{AnalysisReport, LayerArtifact};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub status: CommandStatus,
    pub message: String,
    #[serde(default)]
    pub details: Value,
}

impl ExecutionOutcome {
    pub fn success(message: impl Into<String>, details: Value) -> Self {
        Self {
            status: CommandStatus::Ok,
            message: message.into(),
            details,
        }
    }

    pub fn failure(message: impl Into<String>, details: Value) -> Self {
        Self {
            status: CommandStatus::Failure,
            message: message.into(),
            details,
        }
    }

    pub fn user_error(message: impl Into<String>, details: Value) -> Self {
        Self {
            status: CommandStatus::UserError,
            message: message.into(),
            details,
        }
    }

    /// Process exit code for this outcome.
    pub fn exit_code(&self) -> i32 {
        match self.status {
            CommandStatus::Ok => 0,
            CommandStatus::UserError => 1,
            CommandStatus::Failure => 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum CommandStatus {
    Ok,
    UserError,
    Failure,
}

/// Packaging errors become user errors; anything else is a failure.
pub fn outcome_from_error(err: &anyhow::Error) -> ExecutionOutcome {
    match err.downcast_ref::<PackagingError>() {
        Some(packaging) => ExecutionOutcome::user_error(
            packaging.to_string(),
            json!({
                "kind": packaging.kind(),
                "hint": packaging.hint(),
                "error": error_fields(packaging),
            }),
        ),
        None => ExecutionOutcome::failure(
            format!("{err:#}"),
            json!({
                "kind": "InternalError",
                "hint": "Re-run with -v for more detail.",
            }),
        ),
    }
}

fn error_fields(err: &PackagingError) -> Value {
    match err {
        PackagingError::PackageNotFound { package, detail } => {
            json!({ "package": package, "detail": detail })
        }
        PackagingError::IncompatibleRuntime {
            subject,
            runtime,
            platform,
            detail,
        } => json!({
            "subject": subject,
            "runtime": runtime,
            "platform": platform,
            "detail": detail,
        }),
        PackagingError::LayerSizeLimit {
            measured_bytes,
            limit_mb,
        } => json!({
            "measured_bytes": measured_bytes,
            "limit_bytes": limit_mb.saturating_mul(MIB),
            "limit_mb": limit_mb,
        }),
        PackagingError::DependencyConflict {
            requirements,
            detail,
        } => json!({ "requirements": requirements, "detail": detail }),
        PackagingError::Configuration { key, message } => {
            json!({ "key": key, "message": message })
        }
        PackagingError::Download {
            package,
            attempts,
            reason,
        } => json!({ "package": package, "attempts": attempts, "reason": reason }),
        PackagingError::Timeout { stage, limit_secs } => {
            json!({ "stage": stage, "limit_secs": limit_secs })
        }
        PackagingError::ResolverUnavailable(reason) => json!({ "reason": reason }),
    }
}

pub fn layer_outcome(artifact: &LayerArtifact) -> ExecutionOutcome {
    let message = format!(
        "created {} ({} packages, {} compressed, {} unpacked)",
        artifact.path.display(),
        artifact.packages.len(),
        human_bytes(artifact.archive_bytes),
        human_bytes(artifact.staged_bytes),
    );
    ExecutionOutcome::success(message, json!({ "layer": artifact }))
}

pub fn analysis_outcome(report: &AnalysisReport) -> ExecutionOutcome {
    let top_level = report
        .packages
        .iter()
        .filter(|package| package.role == "top-level")
        .count();
    let mut message = format!(
        "{} packages ({} top-level, {} transitive), {} of artifacts",
        report.packages.len(),
        top_level,
        report.packages.len() - top_level,
        human_bytes(report.total_known_bytes),
    );
    if report.unknown_sizes > 0 {
        message.push_str(&format!(" plus {} of unknown size", report.unknown_sizes));
    }
    ExecutionOutcome::success(message, json!({ "analysis": report }))
}

#[allow(clippy::cast_precision_loss)]
pub fn human_bytes(bytes: u64) -> String {
    if bytes >= MIB {
        format!("{:.2} MB", bytes as f64 / MIB as f64)
    } else if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes} B")
    }
}
