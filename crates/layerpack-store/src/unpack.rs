use std::{
    fs::{self, File},
    io,
    path::{Component, Path, PathBuf},
};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

use anyhow::{bail, Context, Result};
use zip::ZipArchive;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnpackSummary {
    pub files: u64,
    pub bytes: u64,
}

/// Extract a wheel into `dest` (a site-packages directory).
///
/// `<dist>.data/purelib` and `<dist>.data/platlib` land in `dest` itself;
/// other `.data` categories have no place in a layer and are skipped.
pub fn unpack_wheel(wheel: &Path, dest: &Path) -> Result<UnpackSummary> {
    let file = File::open(wheel).with_context(|| format!("failed to open {}", wheel.display()))?;
    let mut archive =
        ZipArchive::new(file).with_context(|| format!("{} is not a valid wheel", wheel.display()))?;
    let mut summary = UnpackSummary::default();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let Some(enclosed) = entry.enclosed_name().map(Path::to_path_buf) else {
            bail!(
                "{} contains an entry escaping the install directory: {}",
                wheel.display(),
                entry.name()
            );
        };
        let Some(relative) = relocate(&enclosed) else {
            tracing::debug!(entry = entry.name(), "skipping non-library wheel data");
            continue;
        };
        let target = dest.join(relative);
        if entry.name().ends_with('/') || entry.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut outfile =
            File::create(&target).with_context(|| format!("failed to create {}", target.display()))?;
        summary.bytes += io::copy(&mut entry, &mut outfile)?;
        summary.files += 1;
        #[cfg(unix)]
        {
            if let Some(mode) = entry.unix_mode() {
                fs::set_permissions(&target, fs::Permissions::from_mode(mode & 0o777))?;
            }
        }
    }
    Ok(summary)
}

fn relocate(path: &Path) -> Option<PathBuf> {
    let mut components = path.components();
    let first = match components.next()? {
        Component::Normal(first) => first.to_str()?,
        _ => return None,
    };
    if !first.ends_with(".data") {
        return Some(path.to_path_buf());
    }
    match components.next() {
        Some(Component::Normal(category)) if category == "purelib" || category == "platlib" => {
            Some(components.as_path().to_path_buf())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::{write::FileOptions, ZipWriter};

    fn wheel(path: &Path, entries: &[(&str, &str)]) {
        let mut writer = ZipWriter::new(File::create(path).unwrap());
        for (name, body) in entries {
            writer.start_file(*name, FileOptions::default()).unwrap();
            writer.write_all(body.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn relocates_purelib_and_skips_scripts() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let whl = temp.path().join("demo-1.0-py3-none-any.whl");
        wheel(
            &whl,
            &[
                ("demo/__init__.py", "x = 1\n"),
                ("demo-1.0.dist-info/METADATA", "Name: demo\n"),
                ("demo-1.0.data/purelib/demo_extra.py", "y = 2\n"),
                ("demo-1.0.data/scripts/demo", "#!/bin/sh\n"),
            ],
        );
        let site = temp.path().join("site-packages");
        let summary = unpack_wheel(&whl, &site)?;
        assert_eq!(summary.files, 3);
        assert!(site.join("demo/__init__.py").is_file());
        assert!(site.join("demo-1.0.dist-info/METADATA").is_file());
        assert!(site.join("demo_extra.py").is_file());
        assert!(!site.join("demo-1.0.data").exists());
        Ok(())
    }

    #[test]
    fn rejects_path_traversal() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let whl = temp.path().join("evil-1.0-py3-none-any.whl");
        wheel(&whl, &[("../escape.py", "boom")]);
        let err = unpack_wheel(&whl, &temp.path().join("site")).unwrap_err();
        assert!(err.to_string().contains("escaping"));
        assert!(!temp.path().join("escape.py").exists());
        Ok(())
    }

    #[test]
    fn relocate_rules() {
        assert_eq!(
            relocate(Path::new("pkg/mod.py")),
            Some(PathBuf::from("pkg/mod.py"))
        );
        assert_eq!(
            relocate(Path::new("pkg-1.0.data/platlib/pkg/_ext.so")),
            Some(PathBuf::from("pkg/_ext.so"))
        );
        assert_eq!(relocate(Path::new("pkg-1.0.data/headers/pkg.h")), None);
    }
}
