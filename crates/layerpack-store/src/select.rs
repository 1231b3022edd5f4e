use std::cmp::Ordering;

use layerpack_domain::{LambdaTarget, LockedPackage, PackagingError, WheelCompatibility, WheelFilename};

use crate::pypi::PypiFile;

/// Artifact picked for one locked package.
#[derive(Debug, Clone)]
pub enum ArtifactChoice {
    Wheel {
        file: PypiFile,
        compatibility: WheelCompatibility,
    },
    /// No compatible wheel; the sdist is built locally.
    Sdist { file: PypiFile },
}

impl ArtifactChoice {
    pub fn file(&self) -> &PypiFile {
        match self {
            Self::Wheel { file, .. } | Self::Sdist { file } => file,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Wheel { .. } => "wheel",
            Self::Sdist { .. } => "sdist",
        }
    }
}

/// Best wheel for the target, falling back to the sdist when allowed.
pub fn select_artifact(
    package: &LockedPackage,
    files: &[PypiFile],
    target: &LambdaTarget,
    build_sdists: bool,
) -> Result<ArtifactChoice, PackagingError> {
    let mut live: Vec<&PypiFile> = files
        .iter()
        .filter(|file| !file.yanked.unwrap_or(false))
        .collect();
    // A fully yanked release is still installable when pinned exactly.
    if live.is_empty() && !files.is_empty() {
        tracing::warn!(package = %package, "every file of this release is yanked; using it anyway");
        live = files.iter().collect();
    }

    let best_wheel = live
        .iter()
        .filter(|file| file.packagetype == "bdist_wheel")
        .filter_map(|file| {
            let compatibility = WheelFilename::parse(&file.filename)?.compatibility(target)?;
            Some((*file, compatibility))
        })
        .max_by(|(a, left), (b, right)| match left.cmp(right) {
            Ordering::Equal => b.filename.cmp(&a.filename),
            other => other,
        });
    if let Some((file, compatibility)) = best_wheel {
        return Ok(ArtifactChoice::Wheel {
            file: file.clone(),
            compatibility,
        });
    }

    let sdist = live.iter().find(|file| file.packagetype == "sdist");
    match sdist {
        Some(file) if build_sdists => Ok(ArtifactChoice::Sdist {
            file: (*file).clone(),
        }),
        Some(file) => Err(incompatible(
            package,
            target,
            format!(
                "no compatible wheel; only the sdist {} is available and building sdists is disabled",
                file.filename
            ),
        )),
        None if live.is_empty() => Err(incompatible(
            package,
            target,
            "the release publishes no installable files".to_string(),
        )),
        None => {
            let considered: Vec<&str> = live.iter().map(|file| file.filename.as_str()).collect();
            Err(incompatible(
                package,
                target,
                format!("no compatible wheel among {}", considered.join(", ")),
            ))
        }
    }
}

pub(crate) fn incompatible(
    package: &LockedPackage,
    target: &LambdaTarget,
    detail: String,
) -> PackagingError {
    PackagingError::IncompatibleRuntime {
        subject: package.pin(),
        runtime: target.runtime.identifier(),
        platform: target.platform_tag(),
        detail,
    }
}
