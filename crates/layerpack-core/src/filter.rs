//! Content stripping and the layer size budget.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use layerpack_domain::{PackagingError, MIB};
use serde::Serialize;
use walkdir::WalkDir;

const TEST_DIRS: &[&str] = &["tests", "test", "testing"];
const BYTECODE_EXTENSIONS: &[&str] = &["pyc", "pyo"];
const SOURCE_EXTENSIONS: &[&str] = &["pyi", "pyx", "pxd", "c", "h", "cpp", "pdb"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterOptions {
    pub strip_test_files: bool,
    pub optimization_level: u8,
    pub max_size_mb: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FilterReport {
    pub removed_files: u64,
    pub removed_bytes: u64,
    pub final_files: u64,
    pub final_bytes: u64,
}

/// Strip tests, then optimization targets, then enforce `max_size_mb`.
pub fn apply_filters(root: &Path, options: FilterOptions) -> Result<FilterReport> {
    let mut report = FilterReport::default();
    if options.strip_test_files {
        remove_matching(root, &mut report, is_test_path)?;
    }
    if options.optimization_level >= 1 {
        let level = options.optimization_level;
        remove_matching(root, &mut report, |path, is_dir| {
            is_optimization_target(path, is_dir, level)
        })?;
    }

    let (files, bytes) = measure(root)?;
    report.final_files = files;
    report.final_bytes = bytes;
    tracing::debug!(
        removed_files = report.removed_files,
        removed_bytes = report.removed_bytes,
        final_bytes = bytes,
        "filters applied"
    );
    if bytes > options.max_size_mb.saturating_mul(MIB) {
        return Err(PackagingError::LayerSizeLimit {
            measured_bytes: bytes,
            limit_mb: options.max_size_mb,
        }
        .into());
    }
    Ok(report)
}

/// File count and total bytes of every regular file under `root`.
pub fn measure(root: &Path) -> Result<(u64, u64)> {
    let mut files = 0;
    let mut bytes = 0;
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if entry.file_type().is_file() {
            files += 1;
            bytes += entry.metadata()?.len();
        }
    }
    Ok((files, bytes))
}

fn remove_matching(
    root: &Path,
    report: &mut FilterReport,
    matches: impl Fn(&Path, bool) -> bool,
) -> Result<()> {
    let mut doomed: Vec<(PathBuf, bool)> = Vec::new();
    let mut walker = WalkDir::new(root)
        .min_depth(1)
        .sort_by(|a, b| a.path().cmp(b.path()))
        .into_iter();
    while let Some(entry) = walker.next() {
        let entry = entry?;
        let is_dir = entry.file_type().is_dir();
        if is_dir && entry.file_name().to_string_lossy().ends_with(".dist-info") {
            walker.skip_current_dir();
            continue;
        }
        if matches(entry.path(), is_dir) {
            doomed.push((entry.path().to_path_buf(), is_dir));
            if is_dir {
                walker.skip_current_dir();
            }
        }
    }

    for (path, is_dir) in doomed {
        let (files, bytes) = if is_dir {
            measure(&path)?
        } else {
            (1, fs::metadata(&path)?.len())
        };
        if is_dir {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        }
        .with_context(|| format!("failed to remove {}", path.display()))?;
        report.removed_files += files;
        report.removed_bytes += bytes;
    }
    Ok(())
}

fn is_test_path(path: &Path, is_dir: bool) -> bool {
    let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
        return false;
    };
    if is_dir {
        return TEST_DIRS.contains(&name);
    }
    name == "conftest.py"
        || (name.starts_with("test_") && name.ends_with(".py"))
        || name.ends_with("_test.py")
}

fn is_optimization_target(path: &Path, is_dir: bool, level: u8) -> bool {
    if is_dir {
        return path.file_name().is_some_and(|name| name == "__pycache__");
    }
    let Some(ext) = path.extension().and_then(|ext| ext.to_str()) else {
        return false;
    };
    BYTECODE_EXTENSIONS.contains(&ext) || (level >= 2 && SOURCE_EXTENSIONS.contains(&ext))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &Path, relative: &str, bytes: usize) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, vec![b'x'; bytes]).unwrap();
    }

    fn tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "pkg/__init__.py", 10);
        write(root, "pkg/core.py", 10);
        write(root, "pkg/core.pyi", 10);
        write(root, "pkg/_speedups.c", 10);
        write(root, "pkg/__pycache__/core.cpython-39.pyc", 10);
        write(root, "pkg/tests/test_core.py", 10);
        write(root, "pkg/testing/helpers.py", 10);
        write(root, "pkg/test_utils.py", 10);
        write(root, "pkg/util_test.py", 10);
        write(root, "pkg/conftest.py", 10);
        write(root, "pkg-1.0.dist-info/tests/RECORD", 10);
        write(root, "pkg-1.0.dist-info/METADATA", 10);
        dir
    }

    fn options(strip: bool, level: u8) -> FilterOptions {
        FilterOptions {
            strip_test_files: strip,
            optimization_level: level,
            max_size_mb: 250,
        }
    }

    #[test]
    fn level_zero_without_stripping_keeps_everything() -> Result<()> {
        let dir = tree();
        let report = apply_filters(dir.path(), options(false, 0))?;
        assert_eq!(report.removed_files, 0);
        assert_eq!(report.final_files, 12);
        Ok(())
    }

    #[test]
    fn strips_tests_but_not_dist_info() -> Result<()> {
        let dir = tree();
        let report = apply_filters(dir.path(), options(true, 0))?;
        let root = dir.path();
        assert!(!root.join("pkg/tests").exists());
        assert!(!root.join("pkg/testing").exists());
        assert!(!root.join("pkg/test_utils.py").exists());
        assert!(!root.join("pkg/util_test.py").exists());
        assert!(!root.join("pkg/conftest.py").exists());
        assert!(root.join("pkg-1.0.dist-info/tests/RECORD").exists());
        assert!(root.join("pkg/__pycache__").exists());
        assert_eq!(report.removed_files, 5);
        assert_eq!(report.removed_bytes, 50);
        Ok(())
    }

    #[test]
    fn optimization_levels() -> Result<()> {
        let dir = tree();
        apply_filters(dir.path(), options(false, 1))?;
        assert!(!dir.path().join("pkg/__pycache__").exists());
        assert!(dir.path().join("pkg/core.pyi").exists());

        let dir = tree();
        apply_filters(dir.path(), options(false, 2))?;
        assert!(!dir.path().join("pkg/core.pyi").exists());
        assert!(!dir.path().join("pkg/_speedups.c").exists());
        assert!(dir.path().join("pkg/core.py").exists());
        Ok(())
    }

    #[test]
    fn size_limit_is_enforced_after_stripping() -> Result<()> {
        let dir = tempfile::tempdir()?;
        write(dir.path(), "big/tests/fixture.bin", 2 * MIB as usize);
        write(dir.path(), "big/__init__.py", 100);
        let opts = FilterOptions {
            strip_test_files: false,
            optimization_level: 0,
            max_size_mb: 1,
        };
        let err = apply_filters(dir.path(), opts).unwrap_err();
        match err.downcast_ref::<PackagingError>() {
            Some(PackagingError::LayerSizeLimit {
                measured_bytes,
                limit_mb,
            }) => {
                assert!(*measured_bytes > MIB);
                assert_eq!(*limit_mb, 1);
            }
            other => panic!("unexpected {other:?}"),
        }

        let report = apply_filters(
            dir.path(),
            FilterOptions {
                strip_test_files: true,
                ..opts
            },
        )?;
        assert_eq!(report.final_bytes, 100);
        Ok(())
    }
}
