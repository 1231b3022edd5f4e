use std::{fmt, path::PathBuf, str::FromStr};

use anyhow::{anyhow, Result};
use pep508_rs::{MarkerEnvironment, StringVersion};
use serde::{Deserialize, Serialize};

/// Python runtimes Lambda accepts for layers built by this tool.
pub const SUPPORTED_RUNTIMES: &[&str] = &[
    "python3.7",
    "python3.8",
    "python3.9",
    "python3.10",
    "python3.11",
    "python3.12",
    "python3.13",
];

const MIN_MINOR: u8 = 7;
const MAX_MINOR: u8 = 13;

/// A Lambda Python runtime such as `python3.9`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LambdaRuntime {
    minor: u8,
}

impl LambdaRuntime {
    pub fn minor(self) -> u8 {
        self.minor
    }

    pub fn identifier(self) -> String {
        format!("python3.{}", self.minor)
    }

    /// `3.9` style version passed to the resolver.
    pub fn python_version(self) -> String {
        format!("3.{}", self.minor)
    }

    /// Directory inside the layer that Lambda adds to `sys.path`.
    pub fn site_packages(self) -> PathBuf {
        PathBuf::from("python")
            .join("lib")
            .join(self.identifier())
            .join("site-packages")
    }

    /// Highest glibc version available on the runtime's base image.
    ///
    /// Runtimes up to 3.11 run on Amazon Linux 2 (glibc 2.26); later ones on
    /// Amazon Linux 2023 (glibc 2.34).
    pub fn glibc(self) -> (u16, u16) {
        if self.minor >= 12 {
            (2, 34)
        } else {
            (2, 26)
        }
    }
}

impl Default for LambdaRuntime {
    fn default() -> Self {
        Self { minor: 9 }
    }
}

impl FromStr for LambdaRuntime {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let minor = trimmed
            .strip_prefix("python3.")
            .and_then(|rest| rest.parse::<u8>().ok())
            .ok_or_else(|| format!("`{trimmed}` is not a Python runtime identifier"))?;
        if !(MIN_MINOR..=MAX_MINOR).contains(&minor) {
            return Err(format!(
                "unsupported runtime `{trimmed}` (expected one of {})",
                SUPPORTED_RUNTIMES.join(", ")
            ));
        }
        Ok(Self { minor })
    }
}

impl fmt::Display for LambdaRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "python3.{}", self.minor)
    }
}

impl Serialize for LambdaRuntime {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.identifier())
    }
}

impl<'de> Deserialize<'de> for LambdaRuntime {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Lambda instruction set architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Architecture {
    #[default]
    #[serde(rename = "x86_64")]
    X86_64,
    #[serde(rename = "arm64")]
    Arm64,
}

impl Architecture {
    /// Machine name used in wheel platform tags.
    pub fn machine(self) -> &'static str {
        match self {
            Self::X86_64 => "x86_64",
            Self::Arm64 => "aarch64",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::X86_64 => "x86_64",
            Self::Arm64 => "arm64",
        }
    }
}

impl FromStr for Architecture {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "x86_64" | "amd64" => Ok(Self::X86_64),
            "arm64" | "aarch64" => Ok(Self::Arm64),
            other => Err(format!(
                "unsupported architecture `{other}` (expected x86_64 or arm64)"
            )),
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The runtime/architecture pair a layer is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LambdaTarget {
    pub runtime: LambdaRuntime,
    pub architecture: Architecture,
}

impl LambdaTarget {
    pub fn new(runtime: LambdaRuntime, architecture: Architecture) -> Self {
        Self {
            runtime,
            architecture,
        }
    }

    /// Canonical platform tag, also used to key the artifact cache.
    pub fn platform_tag(&self) -> String {
        format!("manylinux2014_{}", self.architecture.machine())
    }

    /// Value for `uv pip compile --python-platform`.
    pub fn resolver_platform(&self) -> String {
        format!("{}-manylinux2014", self.architecture.machine())
    }

    pub fn with_runtime(&self, runtime: LambdaRuntime) -> Self {
        Self {
            runtime,
            architecture: self.architecture,
        }
    }

    /// Marker environment of the Lambda execution environment, used to drop
    /// requirements whose markers exclude the target.
    pub fn marker_environment(&self) -> Result<MarkerEnvironment> {
        let full = format!("{}.0", self.runtime.python_version());
        Ok(MarkerEnvironment {
            implementation_name: "cpython".into(),
            implementation_version: string_version(&full)?,
            os_name: "posix".into(),
            platform_machine: self.architecture.machine().into(),
            platform_python_implementation: "CPython".into(),
            platform_release: String::new(),
            platform_system: "Linux".into(),
            platform_version: String::new(),
            python_full_version: string_version(&full)?,
            python_version: string_version(&self.runtime.python_version())?,
            sys_platform: "linux".into(),
        })
    }
}

impl fmt::Display for LambdaTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.runtime, self.architecture)
    }
}

fn string_version(value: &str) -> Result<StringVersion> {
    StringVersion::from_str(value)
        .map_err(|err| anyhow!("`{value}` is not a valid PEP 440 version: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_supported_runtimes() {
        for id in SUPPORTED_RUNTIMES {
            let runtime: LambdaRuntime = id.parse().unwrap();
            assert_eq!(&runtime.identifier(), id);
        }
    }

    #[test]
    fn rejects_unknown_runtimes() {
        assert!("python2.7".parse::<LambdaRuntime>().is_err());
        assert!("python3.6".parse::<LambdaRuntime>().is_err());
        assert!("nodejs18.x".parse::<LambdaRuntime>().is_err());
    }

    #[test]
    fn site_packages_follows_layer_convention() {
        let runtime: LambdaRuntime = "python3.11".parse().unwrap();
        assert_eq!(
            runtime.site_packages(),
            PathBuf::from("python/lib/python3.11/site-packages")
        );
    }

    #[test]
    fn glibc_tracks_base_image() {
        assert_eq!("python3.9".parse::<LambdaRuntime>().unwrap().glibc(), (2, 26));
        assert_eq!("python3.12".parse::<LambdaRuntime>().unwrap().glibc(), (2, 34));
    }

    #[test]
    fn architecture_aliases() {
        assert_eq!("aarch64".parse::<Architecture>().unwrap(), Architecture::Arm64);
        assert_eq!("AMD64".parse::<Architecture>().unwrap(), Architecture::X86_64);
        let target = LambdaTarget::new("python3.10".parse().unwrap(), Architecture::Arm64);
        assert_eq!(target.platform_tag(), "manylinux2014_aarch64");
        assert_eq!(target.resolver_platform(), "aarch64-manylinux2014");
    }

    #[test]
    fn marker_environment_matches_runtime() {
        let target = LambdaTarget::new("python3.9".parse().unwrap(), Architecture::X86_64);
        let env = target.marker_environment().unwrap();
        assert_eq!(env.platform_machine, "x86_64");
        assert_eq!(env.sys_platform, "linux");
    }
}
