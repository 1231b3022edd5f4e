use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, bail, Context, Result};
use layerpack_domain::{Deadline, LambdaTarget};
use layerpack_resolver::run_command;

/// Build a wheel from an sdist with `uv build`, caching it in `out_dir`.
///
/// A wheel already present in `out_dir` is reused.
pub fn build_wheel_from_sdist(
    uv: &Path,
    sdist: &Path,
    out_dir: &Path,
    target: &LambdaTarget,
    deadline: Option<&Deadline>,
) -> Result<PathBuf> {
    if let Some(existing) = find_wheel(out_dir)? {
        tracing::debug!(wheel = %existing.display(), "reusing wheel built from sdist");
        return Ok(existing);
    }
    let parent = out_dir
        .parent()
        .ok_or_else(|| anyhow!("build directory {} has no parent", out_dir.display()))?;
    fs::create_dir_all(parent)?;
    let staging = tempfile::Builder::new()
        .prefix(".layerpack-build-")
        .tempdir_in(parent)
        .context("failed to create sdist build directory")?;

    let args = vec![
        "build".to_string(),
        "--wheel".to_string(),
        "--python".to_string(),
        target.runtime.python_version(),
        "--out-dir".to_string(),
        staging.path().display().to_string(),
        sdist.display().to_string(),
    ];
    tracing::info!(sdist = %sdist.display(), "building wheel from sdist");
    let output = run_command(
        uv,
        &args,
        &[("UV_NO_CONFIG", "1")],
        staging.path(),
        deadline,
        "build",
    )?;
    if !output.success() {
        bail!(
            "building {} failed: {}",
            sdist.display(),
            output.stderr.trim()
        );
    }
    let built = find_wheel(staging.path())?
        .ok_or_else(|| anyhow!("uv build did not produce a wheel for {}", sdist.display()))?;
    let filename = built
        .file_name()
        .ok_or_else(|| anyhow!("wheel missing filename"))?
        .to_owned();

    fs::create_dir_all(out_dir)?;
    let dest = out_dir.join(filename);
    fs::rename(&built, &dest)
        .with_context(|| format!("failed to move built wheel to {}", dest.display()))?;
    Ok(dest)
}

fn find_wheel(dir: &Path) -> Result<Option<PathBuf>> {
    if !dir.is_dir() {
        return Ok(None);
    }
    let mut wheels = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "whl") {
            wheels.push(path);
        }
    }
    wheels.sort();
    match wheels.len() {
        0 => Ok(None),
        1 => Ok(wheels.pop()),
        _ => bail!("{} holds more than one built wheel", dir.display()),
    }
}
