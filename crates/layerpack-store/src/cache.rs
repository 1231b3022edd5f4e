use std::{
    env,
    fs::{self, File},
    io::Read,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Result};
use dirs_next::home_dir;
use sha2::{Digest, Sha256};

pub const CACHE_PATH_ENV: &str = "LAYERPACK_CACHE_PATH";

#[derive(Debug, Clone)]
pub struct CacheLocation {
    pub path: PathBuf,
    pub source: &'static str,
}

/// Where downloaded and built artifacts are kept between runs.
pub fn resolve_cache_path() -> Result<CacheLocation> {
    if let Some(override_path) = env::var_os(CACHE_PATH_ENV).filter(|value| !value.is_empty()) {
        return Ok(CacheLocation {
            path: absolutize(PathBuf::from(override_path))?,
            source: CACHE_PATH_ENV,
        });
    }
    if let Some(xdg) = env::var_os("XDG_CACHE_HOME").filter(|value| !value.is_empty()) {
        return Ok(CacheLocation {
            path: PathBuf::from(xdg).join("layerpack"),
            source: "XDG_CACHE_HOME",
        });
    }
    let home = home_dir().ok_or_else(|| anyhow!("unable to determine home directory"))?;
    Ok(CacheLocation {
        path: home.join(".cache").join("layerpack"),
        source: "~/.cache",
    })
}

/// `<root>/wheels/<name>/<version>/<platform>/<filename>`
pub fn artifact_path(
    cache_root: &Path,
    normalized: &str,
    version: &str,
    platform: &str,
    filename: &str,
) -> PathBuf {
    cache_root
        .join("wheels")
        .join(normalized)
        .join(version)
        .join(platform)
        .join(filename)
}

/// Directory holding the wheel built from an sdist.
pub fn built_wheel_dir(cache_root: &Path, normalized: &str, version: &str, platform: &str) -> PathBuf {
    cache_root
        .join("built")
        .join(normalized)
        .join(version)
        .join(platform)
}

/// Reuse a cached file when its digest matches; corrupt entries are removed.
pub fn validate_existing(path: &Path, expected_sha: Option<&str>) -> Result<Option<u64>> {
    if !path.is_file() {
        return Ok(None);
    }
    let Some(expected) = expected_sha else {
        return Ok(Some(fs::metadata(path)?.len()));
    };
    match compute_sha256(path) {
        Ok(actual) if actual.eq_ignore_ascii_case(expected) => Ok(Some(fs::metadata(path)?.len())),
        Ok(_) | Err(_) => {
            tracing::debug!(path = %path.display(), "discarding cached artifact with bad digest");
            let _ = fs::remove_file(path);
            Ok(None)
        }
    }
}

pub fn compute_sha256(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0_u8; 32 * 1024];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn absolutize(path: PathBuf) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path)
    } else {
        Ok(env::current_dir()?.join(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::ffi::OsString;

    #[test]
    #[serial]
    fn override_wins_over_xdg() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let previous: Option<OsString> = env::var_os(CACHE_PATH_ENV);
        env::set_var(CACHE_PATH_ENV, temp.path());
        let location = resolve_cache_path();
        match previous {
            Some(value) => env::set_var(CACHE_PATH_ENV, value),
            None => env::remove_var(CACHE_PATH_ENV),
        }
        let location = location?;
        assert_eq!(location.source, CACHE_PATH_ENV);
        assert_eq!(location.path, temp.path());
        Ok(())
    }

    #[test]
    #[serial]
    fn xdg_cache_home_is_namespaced() -> Result<()> {
        let previous_override = env::var_os(CACHE_PATH_ENV);
        let previous_xdg = env::var_os("XDG_CACHE_HOME");
        env::remove_var(CACHE_PATH_ENV);
        env::set_var("XDG_CACHE_HOME", "/srv/cache");
        let location = resolve_cache_path();
        match previous_xdg {
            Some(value) => env::set_var("XDG_CACHE_HOME", value),
            None => env::remove_var("XDG_CACHE_HOME"),
        }
        if let Some(value) = previous_override {
            env::set_var(CACHE_PATH_ENV, value);
        }
        assert_eq!(location?.path, PathBuf::from("/srv/cache/layerpack"));
        Ok(())
    }

    #[test]
    fn artifacts_are_keyed_by_platform() {
        let path = artifact_path(
            Path::new("/c"),
            "numpy",
            "1.26.4",
            "manylinux2014_aarch64",
            "numpy.whl",
        );
        assert_eq!(
            path,
            PathBuf::from("/c/wheels/numpy/1.26.4/manylinux2014_aarch64/numpy.whl")
        );
    }

    #[test]
    fn corrupt_cache_entries_are_dropped() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("demo.whl");
        fs::write(&path, b"demo")?;
        let good = hex::encode(Sha256::digest(b"demo"));
        assert_eq!(validate_existing(&path, Some(&good))?, Some(4));
        assert_eq!(validate_existing(&path, None)?, Some(4));
        assert_eq!(validate_existing(&path, Some("00"))?, None);
        assert!(!path.exists());
        Ok(())
    }
}
