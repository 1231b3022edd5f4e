#![allow(dead_code)]

use std::{
    io::{Cursor, Write},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use anyhow::Result;
use httptest::{matchers::*, responders::*, Expectation, Server};
use layerpack_core::{Packager, PackagingConfig};
use layerpack_domain::{normalize_dist_name, LockedPackage, PackageSource};
use layerpack_resolver::{check_direct_conflicts, DependencyResolver, ResolveRequest};
use layerpack_store::{http_client, PypiIndex, RetryPolicy};
use sha2::{Digest, Sha256};
use tempfile::TempDir;
use zip::{write::FileOptions, ZipWriter};

/// Resolver answering from a fixed lock, honouring the direct-conflict check
/// and `include_dependencies`.
pub struct StaticResolver {
    pub locked: Vec<LockedPackage>,
    pub delay: Option<Duration>,
}

impl StaticResolver {
    pub fn new(locked: Vec<LockedPackage>) -> Self {
        Self {
            locked,
            delay: None,
        }
    }
}

impl DependencyResolver for StaticResolver {
    fn resolve(&self, request: &ResolveRequest) -> Result<Vec<LockedPackage>> {
        check_direct_conflicts(&request.requirements)?;
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        let direct: Vec<String> = request
            .applicable()?
            .iter()
            .map(|spec| spec.normalized.clone())
            .collect();
        let mut locked: Vec<LockedPackage> = self
            .locked
            .iter()
            .filter(|package| request.include_dependencies || direct.contains(&package.normalized))
            .cloned()
            .map(|mut package| {
                package.direct = direct.contains(&package.normalized);
                package.platform = request.target.platform_tag();
                package
            })
            .collect();
        locked.sort();
        Ok(locked)
    }
}

pub fn locked(name: &str, version: &str, index: &FakeIndex) -> LockedPackage {
    LockedPackage {
        name: name.to_string(),
        normalized: normalize_dist_name(name),
        version: version.to_string(),
        source: PackageSource::Index { url: index.url() },
        platform: "manylinux2014_x86_64".to_string(),
        direct: false,
    }
}

/// Build an in-memory wheel holding `files` plus minimal dist-info.
pub fn wheel_bytes(name: &str, version: &str, files: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default();
    let dist_info = format!("{}-{version}.dist-info", name.replace('-', "_"));
    for (path, body) in files {
        writer.start_file(*path, options).unwrap();
        writer.write_all(body).unwrap();
    }
    writer
        .start_file(format!("{dist_info}/METADATA"), options)
        .unwrap();
    writer
        .write_all(format!("Metadata-Version: 2.1\nName: {name}\nVersion: {version}\n").as_bytes())
        .unwrap();
    writer.start_file(format!("{dist_info}/RECORD"), options).unwrap();
    writer.finish().unwrap().into_inner()
}

/// PyPI JSON API stand-in serving generated wheels.
pub struct FakeIndex {
    pub server: Server,
}

impl FakeIndex {
    pub fn new() -> Self {
        Self {
            server: Server::run(),
        }
    }

    pub fn url(&self) -> String {
        self.server.url_str("/").trim_end_matches('/').to_string()
    }

    /// Publish one wheel with tag `tag` (e.g. `py3-none-any`).
    pub fn publish(&self, name: &str, version: &str, tag: &str, files: &[(&str, Vec<u8>)]) -> String {
        let filename = format!("{}-{version}-{tag}.whl", name.replace('-', "_"));
        let bytes = wheel_bytes(name, version, files);
        let sha256 = hex::encode(Sha256::digest(&bytes));
        let file_path = format!("/files/{filename}");
        self.server.expect(
            Expectation::matching(request::method_path("GET", release_path(name, version)))
                .times(..)
                .respond_with(json_encoded(serde_json::json!({
                    "urls": [{
                        "filename": filename,
                        "url": self.server.url_str(&file_path),
                        "packagetype": "bdist_wheel",
                        "size": bytes.len(),
                        "digests": {"sha256": sha256},
                    }]
                }))),
        );
        let file_path: &'static str = Box::leak(file_path.into_boxed_str());
        self.server.expect(
            Expectation::matching(request::method_path("GET", file_path))
                .times(..)
                .respond_with(status_code(200).body(bytes)),
        );
        filename
    }

    pub fn missing(&self, name: &str, version: &str) {
        self.server.expect(
            Expectation::matching(request::method_path("GET", release_path(name, version)))
                .times(..)
                .respond_with(status_code(404)),
        );
    }
}

fn release_path(name: &str, version: &str) -> &'static str {
    Box::leak(format!("/pypi/{name}/{version}/json").into_boxed_str())
}

/// Temporary cache and output directories for one pipeline run.
pub struct Workspace {
    pub cache: TempDir,
    pub output: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            cache: tempfile::tempdir().unwrap(),
            output: tempfile::tempdir().unwrap(),
        }
    }

    pub fn output_dir(&self) -> PathBuf {
        self.output.path().join("dist")
    }

    pub fn packager(
        &self,
        config: PackagingConfig,
        index: &FakeIndex,
        resolver: StaticResolver,
    ) -> Result<Packager> {
        let pypi = PypiIndex::new(
            http_client(Duration::from_secs(10))?,
            &index.url(),
            RetryPolicy {
                attempts: 3,
                base_delay: Duration::from_millis(1),
            },
        );
        Packager::with_services(
            config,
            self.output_dir(),
            Arc::new(resolver),
            Arc::new(pypi),
            self.cache.path().to_path_buf(),
        )
    }
}

pub fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|item| (*item).to_string()).collect()
}
