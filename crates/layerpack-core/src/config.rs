use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use layerpack_domain::{normalize_dist_name, Architecture, LambdaRuntime, LambdaTarget, PackagingError};
use serde::{Deserialize, Serialize};
use toml_edit::DocumentMut;

pub const INDEX_URL_ENV: &str = "LAYERPACK_INDEX_URL";
pub const DEFAULT_INDEX_URL: &str = "https://pypi.org";
pub const DEFAULT_MAX_SIZE_MB: u64 = 250;

const KNOWN_KEYS: &[&str] = &[
    "runtime",
    "architecture",
    "exclude_packages",
    "include_source",
    "optimization_level",
    "max_size_mb",
    "compatible_runtimes",
    "strip_test_files",
    "include_dependencies",
    "index_url",
    "build_sdists",
    "timeout_secs",
    "keep_staging",
    "download_workers",
];

/// Process environment captured once so configuration stays testable.
#[derive(Debug, Clone, Default)]
pub struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    pub fn capture() -> Self {
        Self {
            vars: env::vars().collect(),
        }
    }

    pub fn var(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    pub fn flag_is_enabled(&self, key: &str) -> bool {
        matches!(self.var(key), Some("1"))
    }

    pub fn testing(pairs: &[(&str, &str)]) -> Self {
        let vars = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Self { vars }
    }
}

/// Options controlling how a layer is assembled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PackagingConfig {
    pub runtime: LambdaRuntime,
    pub architecture: Architecture,
    pub exclude_packages: Vec<String>,
    pub include_source: Vec<PathBuf>,
    /// 0 keeps everything, 1 drops bytecode, 2 also drops stubs and sources.
    pub optimization_level: u8,
    pub max_size_mb: u64,
    /// Empty means `[runtime]`.
    pub compatible_runtimes: Vec<LambdaRuntime>,
    pub strip_test_files: bool,
    pub include_dependencies: bool,
    pub index_url: String,
    pub build_sdists: bool,
    pub timeout_secs: Option<u64>,
    pub keep_staging: bool,
    pub download_workers: Option<usize>,
}

impl Default for PackagingConfig {
    fn default() -> Self {
        Self {
            runtime: LambdaRuntime::default(),
            architecture: Architecture::X86_64,
            exclude_packages: Vec::new(),
            include_source: Vec::new(),
            optimization_level: 1,
            max_size_mb: DEFAULT_MAX_SIZE_MB,
            compatible_runtimes: Vec::new(),
            strip_test_files: true,
            include_dependencies: true,
            index_url: DEFAULT_INDEX_URL.to_string(),
            build_sdists: true,
            timeout_secs: None,
            keep_staging: false,
            download_workers: None,
        }
    }
}

/// Values given on the command line; `None` leaves the loaded value alone.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub runtime: Option<LambdaRuntime>,
    pub architecture: Option<Architecture>,
    pub exclude_packages: Option<Vec<String>>,
    pub include_source: Option<Vec<PathBuf>>,
    pub optimization_level: Option<u8>,
    pub max_size_mb: Option<u64>,
    pub compatible_runtimes: Option<Vec<LambdaRuntime>>,
    pub strip_test_files: Option<bool>,
    pub include_dependencies: Option<bool>,
    pub index_url: Option<String>,
    pub build_sdists: Option<bool>,
    pub timeout_secs: Option<u64>,
    pub keep_staging: Option<bool>,
    pub download_workers: Option<usize>,
}

impl PackagingConfig {
    /// Defaults, then the TOML file, then the environment, then `overrides`.
    pub fn load(
        file: Option<&Path>,
        env: &EnvSnapshot,
        overrides: ConfigOverrides,
    ) -> Result<Self> {
        let mut config = match file {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        if let Some(index_url) = env.var(INDEX_URL_ENV) {
            config.index_url = index_url.trim().to_string();
        }
        config.apply(overrides);
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(PackagingError::configuration(
                "config",
                format!("config file not found: {}", path.display()),
            )
            .into());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml(&contents).map_err(|err| match err.downcast::<PackagingError>() {
            Ok(PackagingError::Configuration { key, message }) => PackagingError::Configuration {
                key,
                message: format!("{message} (in {})", path.display()),
            }
            .into(),
            Ok(other) => other.into(),
            Err(other) => other,
        })
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let doc: DocumentMut = contents
            .parse()
            .map_err(|err| PackagingError::configuration("config", format!("invalid TOML: {err}")))?;
        if let Some((key, _)) = doc
            .as_table()
            .iter()
            .find(|(key, _)| !KNOWN_KEYS.contains(key))
        {
            return Err(PackagingError::configuration(
                key,
                "unknown configuration key".to_string(),
            )
            .into());
        }
        toml_edit::de::from_str(contents)
            .map_err(|err| PackagingError::configuration("config", err.to_string().trim().to_string()).into())
    }

    pub fn apply(&mut self, overrides: ConfigOverrides) {
        let ConfigOverrides {
            runtime,
            architecture,
            exclude_packages,
            include_source,
            optimization_level,
            max_size_mb,
            compatible_runtimes,
            strip_test_files,
            include_dependencies,
            index_url,
            build_sdists,
            timeout_secs,
            keep_staging,
            download_workers,
        } = overrides;
        if let Some(value) = runtime {
            self.runtime = value;
        }
        if let Some(value) = architecture {
            self.architecture = value;
        }
        if let Some(value) = exclude_packages {
            self.exclude_packages = value;
        }
        if let Some(value) = include_source {
            self.include_source = value;
        }
        if let Some(value) = optimization_level {
            self.optimization_level = value;
        }
        if let Some(value) = max_size_mb {
            self.max_size_mb = value;
        }
        if let Some(value) = compatible_runtimes {
            self.compatible_runtimes = value;
        }
        if let Some(value) = strip_test_files {
            self.strip_test_files = value;
        }
        if let Some(value) = include_dependencies {
            self.include_dependencies = value;
        }
        if let Some(value) = index_url {
            self.index_url = value;
        }
        if let Some(value) = build_sdists {
            self.build_sdists = value;
        }
        if timeout_secs.is_some() {
            self.timeout_secs = timeout_secs;
        }
        if let Some(value) = keep_staging {
            self.keep_staging = value;
        }
        if download_workers.is_some() {
            self.download_workers = download_workers;
        }
    }

    pub fn validate(&self) -> Result<(), PackagingError> {
        if self.optimization_level > 2 {
            return Err(PackagingError::configuration(
                "optimization_level",
                format!("must be 0, 1 or 2 (got {})", self.optimization_level),
            ));
        }
        if self.max_size_mb == 0 {
            return Err(PackagingError::configuration(
                "max_size_mb",
                "must be a positive number of megabytes",
            ));
        }
        if self.timeout_secs == Some(0) {
            return Err(PackagingError::configuration(
                "timeout_secs",
                "must be at least one second",
            ));
        }
        if self.download_workers == Some(0) {
            return Err(PackagingError::configuration(
                "download_workers",
                "must be at least 1",
            ));
        }
        match url::Url::parse(&self.index_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(url) => {
                return Err(PackagingError::configuration(
                    "index_url",
                    format!("unsupported scheme `{}`", url.scheme()),
                ))
            }
            Err(err) => {
                return Err(PackagingError::configuration(
                    "index_url",
                    format!("`{}` is not a URL: {err}", self.index_url),
                ))
            }
        }
        if let Some(name) = self
            .exclude_packages
            .iter()
            .find(|name| normalize_dist_name(name).is_empty())
        {
            return Err(PackagingError::configuration(
                "exclude_packages",
                format!("`{name}` is not a package name"),
            ));
        }
        if !self.compatible_runtimes.is_empty() && !self.compatible_runtimes.contains(&self.runtime) {
            return Err(PackagingError::IncompatibleRuntime {
                subject: "compatible_runtimes".to_string(),
                runtime: self.runtime.identifier(),
                platform: self.target().platform_tag(),
                detail: format!(
                    "the build runtime must be one of {}",
                    self.compatible_runtimes
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            });
        }
        Ok(())
    }

    pub fn target(&self) -> LambdaTarget {
        LambdaTarget::new(self.runtime, self.architecture)
    }

    pub fn effective_compatible_runtimes(&self) -> Vec<LambdaRuntime> {
        if self.compatible_runtimes.is_empty() {
            vec![self.runtime]
        } else {
            let mut runtimes = self.compatible_runtimes.clone();
            runtimes.sort();
            runtimes.dedup();
            runtimes
        }
    }

    /// Normalized names of excluded distributions.
    pub fn excluded_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .exclude_packages
            .iter()
            .map(|name| normalize_dist_name(name))
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind(err: &anyhow::Error) -> &'static str {
        err.downcast_ref::<PackagingError>()
            .map_or("other", PackagingError::kind)
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = PackagingConfig::default();
        assert_eq!(config.runtime.identifier(), "python3.9");
        assert_eq!(config.optimization_level, 1);
        assert_eq!(config.max_size_mb, 250);
        assert!(config.strip_test_files);
        assert!(config.include_dependencies);
        assert_eq!(
            config.effective_compatible_runtimes(),
            vec![config.runtime]
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn reads_toml_and_rejects_unknown_keys() -> Result<()> {
        let config = PackagingConfig::from_toml(
            r#"
runtime = "python3.11"
architecture = "arm64"
exclude_packages = ["boto3", "Botocore"]
optimization_level = 2
"#,
        )?;
        assert_eq!(config.runtime.identifier(), "python3.11");
        assert_eq!(config.architecture, Architecture::Arm64);
        assert_eq!(config.excluded_names(), vec!["boto3", "botocore"]);
        assert_eq!(config.max_size_mb, 250);

        let err = PackagingConfig::from_toml("strip_tests = true\n").unwrap_err();
        assert_eq!(kind(&err), "ConfigurationError");
        assert!(err.to_string().contains("strip_tests"));
        Ok(())
    }

    #[test]
    fn bad_values_are_configuration_errors() {
        let err = PackagingConfig::from_toml("runtime = \"python2.7\"\n").unwrap_err();
        assert_eq!(kind(&err), "ConfigurationError");
        let err = PackagingConfig::from_toml("max_size_mb = \"big\"\n").unwrap_err();
        assert_eq!(kind(&err), "ConfigurationError");
    }

    #[test]
    fn validation_rules() {
        let mut config = PackagingConfig {
            optimization_level: 3,
            ..PackagingConfig::default()
        };
        assert_eq!(config.validate().unwrap_err().kind(), "ConfigurationError");
        config.optimization_level = 0;
        config.max_size_mb = 0;
        assert!(config.validate().is_err());
        config.max_size_mb = 50;
        config.index_url = "ftp://mirror.example".into();
        assert!(config.validate().is_err());
        config.index_url = DEFAULT_INDEX_URL.into();
        config.compatible_runtimes = vec!["python3.12".parse().unwrap()];
        assert_eq!(
            config.validate().unwrap_err().kind(),
            "IncompatibleRuntimeError"
        );
    }

    #[test]
    fn layering_order() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("layerpack.toml");
        fs::write(&path, "max_size_mb = 100\nindex_url = \"https://file.example\"\n")?;
        let env = EnvSnapshot::testing(&[(INDEX_URL_ENV, "https://env.example")]);
        let config = PackagingConfig::load(
            Some(&path),
            &env,
            ConfigOverrides {
                max_size_mb: Some(10),
                ..ConfigOverrides::default()
            },
        )?;
        assert_eq!(config.max_size_mb, 10);
        assert_eq!(config.index_url, "https://env.example");
        Ok(())
    }

    #[test]
    fn missing_config_file() {
        let err = PackagingConfig::load(
            Some(Path::new("/definitely/missing/layerpack.toml")),
            &EnvSnapshot::default(),
            ConfigOverrides::default(),
        )
        .unwrap_err();
        assert_eq!(kind(&err), "ConfigurationError");
    }
}
