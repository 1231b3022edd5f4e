//! Wheel filename parsing and compatibility with a Lambda target.

use std::path::Path;

use crate::runtime::LambdaTarget;

/// Parsed `{name}-{version}(-{build})?-{python}-{abi}-{platform}.whl`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WheelFilename {
    pub name: String,
    pub version: String,
    pub build: Option<String>,
    pub python: Vec<String>,
    pub abi: Vec<String>,
    pub platform: Vec<String>,
}

/// How well a wheel fits a target; higher scores are preferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct WheelCompatibility {
    pub score: u32,
}

impl WheelFilename {
    pub fn parse(filename: &str) -> Option<Self> {
        let path = Path::new(filename);
        if !path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("whl"))
        {
            return None;
        }
        let stem = path.file_stem()?.to_str()?;
        let parts: Vec<&str> = stem.split('-').collect();
        let (build, tags) = match parts.len() {
            5 => (None, &parts[2..]),
            6 => (Some(parts[2].to_string()), &parts[3..]),
            _ => return None,
        };
        Some(Self {
            name: parts[0].to_string(),
            version: parts[1].to_string(),
            build,
            python: split_tag_values(tags[0]),
            abi: split_tag_values(tags[1]),
            platform: split_tag_values(tags[2]),
        })
    }

    pub fn is_pure(&self) -> bool {
        self.abi.iter().all(|abi| abi == "none") && self.platform.iter().all(|p| p == "any")
    }

    /// Best score over every tag triple the wheel advertises, or `None` when
    /// no triple can load on the target.
    pub fn compatibility(&self, target: &LambdaTarget) -> Option<WheelCompatibility> {
        let mut best: Option<u32> = None;
        for python in &self.python {
            for abi in &self.abi {
                let Some(interp) = interpreter_score(python, abi, target) else {
                    continue;
                };
                for platform in &self.platform {
                    let Some(plat) = platform_score(platform, target) else {
                        continue;
                    };
                    let score = interp * 100 + plat;
                    best = Some(best.map_or(score, |current| current.max(score)));
                }
            }
        }
        best.map(|score| WheelCompatibility { score })
    }
}

fn split_tag_values(value: &str) -> Vec<String> {
    value
        .split('.')
        .filter(|part| !part.is_empty())
        .map(str::to_ascii_lowercase)
        .collect()
}

fn interpreter_score(python: &str, abi: &str, target: &LambdaTarget) -> Option<u32> {
    let minor = u32::from(target.runtime.minor());
    let exact = format!("cp3{minor}");
    match abi {
        "none" => {
            if python == exact {
                Some(4)
            } else if python == format!("py3{minor}") {
                Some(3)
            } else if python == "py3" {
                Some(2)
            } else {
                None
            }
        }
        "abi3" => {
            let built_for = python.strip_prefix("cp3")?.parse::<u32>().ok()?;
            (built_for <= minor).then_some(5)
        }
        other => {
            let matches = other == exact || (minor == 7 && other == "cp37m");
            (matches && python == exact).then_some(6)
        }
    }
}

fn platform_score(platform: &str, target: &LambdaTarget) -> Option<u32> {
    if platform == "any" {
        return Some(0);
    }
    let machine = target.architecture.machine();
    let prefix = platform.strip_suffix(machine)?.strip_suffix('_')?;
    let (major, minor) = match prefix {
        "manylinux1" => (2, 5),
        "manylinux2010" => (2, 12),
        "manylinux2014" => (2, 17),
        other => {
            let rest = other.strip_prefix("manylinux_")?;
            let (major, minor) = rest.split_once('_')?;
            (major.parse::<u16>().ok()?, minor.parse::<u16>().ok()?)
        }
    };
    let (glibc_major, glibc_minor) = target.runtime.glibc();
    if (major, minor) > (glibc_major, glibc_minor) {
        return None;
    }
    Some(1 + u32::from(minor))
}
