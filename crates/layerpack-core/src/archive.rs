use std::{
    fs::{self, File},
    io,
    path::{Path, PathBuf},
};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

use anyhow::{anyhow, Context, Result};
use layerpack_domain::PackagingError;
use layerpack_store::compute_sha256;
use tempfile::NamedTempFile;
use walkdir::WalkDir;
use zip::{write::FileOptions, CompressionMethod, DateTime, ZipWriter};

#[derive(Debug, Clone)]
pub struct ArchiveSummary {
    pub path: PathBuf,
    pub size: u64,
    pub sha256: String,
    pub entries: usize,
}

pub fn validate_layer_name(name: &str) -> Result<(), PackagingError> {
    if name.is_empty() {
        return Err(PackagingError::configuration("name", "layer name must not be empty"));
    }
    if let Some(bad) = name
        .chars()
        .find(|ch| !(ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-')))
    {
        return Err(PackagingError::configuration(
            "name",
            format!("`{name}` contains `{bad}`; use letters, digits, `.`, `_` or `-`"),
        ));
    }
    if name.chars().all(|ch| ch == '.') {
        return Err(PackagingError::configuration(
            "name",
            format!("`{name}` is not a usable file name"),
        ));
    }
    Ok(())
}

/// Zip `root` into `<output_dir>/<name>.zip`.
///
/// Entries are written in path order with fixed timestamps so identical
/// trees give identical archives. The file only appears once complete.
pub fn write_archive(root: &Path, output_dir: &Path, name: &str) -> Result<ArchiveSummary> {
    validate_layer_name(name)?;
    fs::create_dir_all(output_dir).map_err(|err| {
        PackagingError::configuration(
            "output_dir",
            format!("cannot create {}: {err}", output_dir.display()),
        )
    })?;
    let dest = output_dir.join(format!("{name}.zip"));
    let mut tmp = NamedTempFile::new_in(output_dir).map_err(|err| {
        PackagingError::configuration(
            "output_dir",
            format!("{} is not writable: {err}", output_dir.display()),
        )
    })?;

    let entries = {
        let mut zip = ZipWriter::new(tmp.as_file_mut());
        let entries = append_tree(&mut zip, root)?;
        zip.finish().context("failed to finalize layer archive")?;
        entries
    };
    tmp.persist(&dest)
        .map_err(|err| anyhow!("failed to write {}: {}", dest.display(), err.error))?;

    let size = fs::metadata(&dest)?.len();
    let sha256 = compute_sha256(&dest)?;
    tracing::info!(path = %dest.display(), size, entries, "layer archive written");
    Ok(ArchiveSummary {
        path: dest,
        size,
        sha256,
        entries,
    })
}

fn append_tree<W: io::Write + io::Seek>(zip: &mut ZipWriter<W>, root: &Path) -> Result<usize> {
    let base = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default());
    let mut entries = 0;
    for entry in WalkDir::new(root)
        .min_depth(1)
        .sort_by(|a, b| a.file_name().cmp(b.file_name()))
    {
        let entry = entry?;
        let relative = entry.path().strip_prefix(root)?;
        let name = archive_name(relative)?;
        if entry.file_type().is_dir() {
            zip.add_directory(name, base.unix_permissions(0o755))?;
        } else if entry.file_type().is_file() {
            let options = base.unix_permissions(file_mode(entry.path())?);
            zip.start_file(name, options)?;
            let mut file = File::open(entry.path())
                .with_context(|| format!("failed to read {}", entry.path().display()))?;
            io::copy(&mut file, zip)?;
        } else {
            tracing::debug!(path = %entry.path().display(), "skipping non-regular file");
            continue;
        }
        entries += 1;
    }
    Ok(entries)
}

fn archive_name(relative: &Path) -> Result<String> {
    let parts = relative
        .components()
        .map(|component| {
            component
                .as_os_str()
                .to_str()
                .ok_or_else(|| anyhow!("{} is not valid UTF-8", relative.display()))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(parts.join("/"))
}

#[cfg(unix)]
fn file_mode(path: &Path) -> Result<u32> {
    let mode = fs::metadata(path)?.permissions().mode();
    Ok(if mode & 0o111 != 0 { 0o755 } else { 0o644 })
}

#[cfg(not(unix))]
fn file_mode(_path: &Path) -> Result<u32> {
    Ok(0o644)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use zip::ZipArchive;

    fn sample_tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let site = dir.path().join("python/lib/python3.9/site-packages");
        fs::create_dir_all(site.join("pkg")).unwrap();
        fs::write(site.join("pkg/__init__.py"), "print('hi')\n").unwrap();
        fs::write(site.join("zzz.py"), "z = 1\n").unwrap();
        dir
    }

    #[test]
    fn layer_names() {
        assert!(validate_layer_name("my-layer_1.0").is_ok());
        assert!(validate_layer_name("").is_err());
        assert!(validate_layer_name("my layer").is_err());
        assert!(validate_layer_name("../escape").is_err());
        assert!(validate_layer_name("..").is_err());
    }

    #[test]
    fn archives_are_deterministic() -> Result<()> {
        let tree = sample_tree();
        let out = tempfile::tempdir()?;
        let first = write_archive(tree.path(), &out.path().join("a"), "layer")?;
        std::thread::sleep(std::time::Duration::from_millis(1100));
        let second = write_archive(tree.path(), &out.path().join("b"), "layer")?;
        assert_eq!(first.sha256, second.sha256);
        assert_eq!(fs::read(&first.path)?, fs::read(&second.path)?);
        Ok(())
    }

    #[test]
    fn entries_are_sorted_with_directories() -> Result<()> {
        let tree = sample_tree();
        let out = tempfile::tempdir()?;
        let summary = write_archive(tree.path(), out.path(), "layer")?;
        let mut archive = ZipArchive::new(File::open(&summary.path)?)?;
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "python/",
                "python/lib/",
                "python/lib/python3.9/",
                "python/lib/python3.9/site-packages/",
                "python/lib/python3.9/site-packages/pkg/",
                "python/lib/python3.9/site-packages/pkg/__init__.py",
                "python/lib/python3.9/site-packages/zzz.py",
            ]
        );
        let mut body = String::new();
        archive
            .by_name("python/lib/python3.9/site-packages/pkg/__init__.py")?
            .read_to_string(&mut body)?;
        assert_eq!(body, "print('hi')\n");
        assert_eq!(summary.entries, 7);
        Ok(())
    }

    #[test]
    fn overwrites_existing_archive() -> Result<()> {
        let tree = sample_tree();
        let out = tempfile::tempdir()?;
        fs::write(out.path().join("layer.zip"), b"stale")?;
        let summary = write_archive(tree.path(), out.path(), "layer")?;
        assert!(summary.size > 5);
        let leftovers: Vec<_> = fs::read_dir(out.path())?.collect();
        assert_eq!(leftovers.len(), 1);
        Ok(())
    }
}
