use std::{
    fs,
    path::{Component, Path, PathBuf},
};

use anyhow::{Context, Result};
use layerpack_domain::{LambdaRuntime, PackagingError};
use layerpack_store::{unpack_wheel, FetchedArtifact};
use serde::Serialize;
use tempfile::TempDir;
use walkdir::WalkDir;

/// Per-invocation staging directory mirroring the archive root.
#[derive(Debug)]
pub struct StagedLayer {
    dir: TempDir,
    runtime: LambdaRuntime,
}

impl StagedLayer {
    pub fn create(runtime: LambdaRuntime, keep: bool) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("layerpack-")
            .disable_cleanup(keep)
            .tempdir()
            .context("failed to create staging directory")?;
        let staged = Self { dir, runtime };
        fs::create_dir_all(staged.site_packages())?;
        tracing::debug!(path = %staged.root().display(), keep, "staging directory ready");
        Ok(staged)
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn site_packages(&self) -> PathBuf {
        self.root().join(self.runtime.site_packages())
    }
}

/// One distribution placed in the staged tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerPackage {
    pub name: String,
    pub version: String,
    pub filename: String,
    pub direct: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LayoutReport {
    pub packages: Vec<LayerPackage>,
    pub excluded: Vec<String>,
    pub sources: Vec<PathBuf>,
    pub unpacked_files: u64,
}

/// Unpack artifacts in name order and copy extra sources under `python/`.
pub fn build_layout(
    staged: &StagedLayer,
    artifacts: &[FetchedArtifact],
    excluded: &[String],
    include_source: &[PathBuf],
) -> Result<LayoutReport> {
    let site_packages = staged.site_packages();
    let mut ordered: Vec<&FetchedArtifact> = artifacts.iter().collect();
    ordered.sort_by(|a, b| a.package.cmp(&b.package));

    let mut report = LayoutReport::default();
    for artifact in ordered {
        if excluded.contains(&artifact.package.normalized) {
            tracing::debug!(package = %artifact.package, "excluded from layer");
            report.excluded.push(artifact.package.normalized.clone());
            continue;
        }
        let summary = unpack_wheel(&artifact.path, &site_packages)
            .with_context(|| format!("failed to unpack {}", artifact.filename))?;
        tracing::debug!(package = %artifact.package, files = summary.files, "unpacked");
        report.unpacked_files += summary.files;
        report.packages.push(LayerPackage {
            name: artifact.package.name.clone(),
            version: artifact.package.version.clone(),
            filename: artifact.filename.clone(),
            direct: artifact.package.direct,
        });
    }

    let python_root = staged.root().join("python");
    for source in include_source {
        let dest = python_root.join(source_destination(source)?);
        copy_source(source, &dest)?;
        report.sources.push(source.clone());
    }
    Ok(report)
}

/// Relative paths are kept; anything absolute or escaping keeps its last component.
fn source_destination(source: &Path) -> Result<PathBuf, PackagingError> {
    let escapes = source.components().any(|component| {
        matches!(
            component,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    let relative: PathBuf = if escapes {
        source.file_name().map(PathBuf::from).unwrap_or_default()
    } else {
        source
            .components()
            .filter(|component| matches!(component, Component::Normal(_)))
            .collect()
    };
    if relative.as_os_str().is_empty() {
        return Err(PackagingError::configuration(
            "include_source",
            format!("`{}` does not name a file or directory", source.display()),
        ));
    }
    Ok(relative)
}

fn copy_source(source: &Path, dest: &Path) -> Result<()> {
    if !source.exists() {
        return Err(PackagingError::configuration(
            "include_source",
            format!("{} does not exist", source.display()),
        )
        .into());
    }
    if source.is_file() {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(source, dest)
            .with_context(|| format!("failed to copy {}", source.display()))?;
        return Ok(());
    }
    for entry in WalkDir::new(source)
        .follow_links(true)
        .sort_by(|a, b| a.path().cmp(b.path()))
    {
        let entry = entry.with_context(|| format!("failed to walk {}", source.display()))?;
        let relative = entry.path().strip_prefix(source)?;
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)
                .with_context(|| format!("failed to copy {}", entry.path().display()))?;
        } else {
            tracing::warn!(
                path = %entry.path().display(),
                "skipping special file in include_source"
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staging_uses_runtime_site_packages() -> Result<()> {
        let staged = StagedLayer::create("python3.10".parse().unwrap(), false)?;
        let site = staged.site_packages();
        assert!(site.ends_with("python/lib/python3.10/site-packages"));
        assert!(site.is_dir());
        let root = staged.root().to_path_buf();
        drop(staged);
        assert!(!root.exists());
        Ok(())
    }

    #[test]
    fn kept_staging_survives_drop() -> Result<()> {
        let staged = StagedLayer::create("python3.9".parse().unwrap(), true)?;
        let root = staged.root().to_path_buf();
        drop(staged);
        assert!(root.join("python/lib/python3.9/site-packages").is_dir());
        fs::remove_dir_all(&root)?;
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_sources_are_copied_as_files() -> Result<()> {
        let work = tempfile::tempdir()?;
        let outside = work.path().join("real_config.py");
        fs::write(&outside, "DEBUG = False\n")?;
        let shared = work.path().join("shared");
        fs::create_dir_all(&shared)?;
        std::os::unix::fs::symlink(&outside, shared.join("config.py"))?;
        std::os::unix::fs::symlink(&outside, work.path().join("linked.py"))?;
        let staged = StagedLayer::create("python3.9".parse().unwrap(), false)?;

        build_layout(&staged, &[], &[], &[shared, work.path().join("linked.py")])?;
        let copied = staged.root().join("python/shared/config.py");
        assert!(!fs::symlink_metadata(&copied)?.file_type().is_symlink());
        assert_eq!(fs::read_to_string(copied)?, "DEBUG = False\n");
        assert!(staged.root().join("python/linked.py").is_file());
        Ok(())
    }

    #[test]
    fn source_destinations() {
        assert_eq!(
            source_destination(Path::new("./src/handler.py")).unwrap(),
            PathBuf::from("src/handler.py")
        );
        assert_eq!(
            source_destination(Path::new("/opt/app/shared")).unwrap(),
            PathBuf::from("shared")
        );
        assert_eq!(
            source_destination(Path::new("../common/utils.py")).unwrap(),
            PathBuf::from("utils.py")
        );
        assert!(source_destination(Path::new("..")).is_err());
    }

    #[test]
    fn copies_directories_and_rejects_missing_sources() -> Result<()> {
        let work = tempfile::tempdir()?;
        let shared = work.path().join("shared");
        fs::create_dir_all(shared.join("nested"))?;
        fs::write(shared.join("nested/util.py"), "def f():\n    pass\n")?;
        let staged = StagedLayer::create("python3.9".parse().unwrap(), false)?;

        let report = build_layout(&staged, &[], &[], &[shared.clone()])?;
        assert_eq!(report.sources, vec![shared]);
        assert!(staged.root().join("python/shared/nested/util.py").is_file());

        let err = build_layout(&staged, &[], &[], &[work.path().join("missing.py")]).unwrap_err();
        assert_eq!(
            err.downcast_ref::<PackagingError>().unwrap().kind(),
            "ConfigurationError"
        );
        Ok(())
    }
}
