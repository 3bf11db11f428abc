use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::anyhow;
use sha2::{Digest, Sha256};
use tempfile::TempDir;
use url::Url;

use pinion_cache::Cache;
use pinion_git::GitResolver;
use pinion_normalize::PackageName;
use pinion_pep440::Version;
use pinion_pypi_types::{HashDigest, PackageInfo, PackageJson};
use pinion_resolver::{Lock, LockError, LockMode, Locker, Manifest, ResolverOptions};
use pinion_types::{
    BuildContext, BuildError, IndexError, IndexFile, PackageIndex, Requirement, Source,
    WheelPolicy,
};

#[derive(Debug, Clone)]
struct Release {
    version: Version,
    requires_dist: Vec<String>,
    requires_python: Option<String>,
}

/// An in-memory package index that also builds metadata for its own releases.
///
/// Plain pins are answered by the JSON API; requirements with extras go through a metadata build,
/// which writes a `.dist-info` directory to a temporary directory.
pub(crate) struct FakeRegistry {
    releases: BTreeMap<PackageName, Vec<Release>>,
    list_hashes: bool,
    json_api: bool,
    builds: TempDir,
}

impl FakeRegistry {
    pub(crate) fn new() -> Self {
        Self {
            releases: BTreeMap::new(),
            list_hashes: true,
            json_api: true,
            builds: tempfile::tempdir().unwrap(),
        }
    }

    /// Add a release of `name` depending on `requires_dist`.
    #[must_use]
    pub(crate) fn release(self, name: &str, version: &str, requires_dist: &[&str]) -> Self {
        self.release_for_python(name, version, requires_dist, None)
    }

    #[must_use]
    pub(crate) fn release_for_python(
        mut self,
        name: &str,
        version: &str,
        requires_dist: &[&str],
        requires_python: Option<&str>,
    ) -> Self {
        self.releases
            .entry(PackageName::from_str(name).unwrap())
            .or_default()
            .push(Release {
                version: Version::from_str(version).unwrap(),
                requires_dist: requires_dist.iter().map(ToString::to_string).collect(),
                requires_python: requires_python.map(ToString::to_string),
            });
        self
    }

    /// Serve files without listed digests, so hashing has to download them.
    #[must_use]
    pub(crate) fn without_listed_hashes(self) -> Self {
        Self {
            list_hashes: false,
            ..self
        }
    }

    /// Answer every JSON API query with "not found".
    #[must_use]
    pub(crate) fn without_json_api(self) -> Self {
        Self {
            json_api: false,
            ..self
        }
    }

    fn release_of(&self, name: &PackageName, version: &Version) -> Option<&Release> {
        self.releases
            .get(name)?
            .iter()
            .find(|release| release.version == *version)
    }
}

/// The wheel filename of a release.
pub(crate) fn wheel(name: &str, version: &str) -> String {
    format!("{name}-{version}-py3-none-any.whl")
}

/// The bytes [`FakeRegistry`] serves for `filename`.
pub(crate) fn content(filename: &str) -> Vec<u8> {
    format!("contents of {filename}").into_bytes()
}

/// The digest of the bytes [`FakeRegistry`] serves for `filename`.
pub(crate) fn digest(filename: &str) -> HashDigest {
    HashDigest::sha256(hex::encode(Sha256::digest(content(filename))))
}

impl PackageIndex for FakeRegistry {
    async fn files(
        &self,
        name: &PackageName,
        sources: &[Source],
        _policy: &WheelPolicy,
    ) -> Result<Vec<IndexFile>, IndexError> {
        let Some(source) = sources.first() else {
            return Ok(Vec::new());
        };
        let Some(releases) = self.releases.get(name) else {
            return Ok(Vec::new());
        };
        Ok(releases
            .iter()
            .map(|release| {
                let filename = wheel(name.as_str(), &release.version.to_string());
                IndexFile {
                    url: Url::parse(&format!("https://files.example.com/{filename}")).unwrap(),
                    version: release.version.clone(),
                    index: source.name.clone(),
                    requires_python: release.requires_python.clone(),
                    hashes: if self.list_hashes {
                        vec![digest(&filename)]
                    } else {
                        Vec::new()
                    },
                    yanked: false,
                    filename,
                }
            })
            .collect())
    }

    async fn package_json(
        &self,
        _source: &Source,
        name: &PackageName,
        version: &Version,
    ) -> Result<Option<PackageJson>, IndexError> {
        if !self.json_api {
            return Ok(None);
        }
        Ok(self
            .release_of(name, version)
            .map(|release| PackageJson {
                info: PackageInfo {
                    requires_python: release.requires_python.clone(),
                    requires_dist: Some(release.requires_dist.clone()),
                    requires: None,
                },
            }))
    }

    async fn download(&self, url: &Url) -> Result<Vec<u8>, IndexError> {
        let filename = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .ok_or_else(|| IndexError::new(url.as_str(), anyhow!("No filename")))?;
        Ok(content(filename))
    }
}

impl BuildContext for FakeRegistry {
    async fn metadata(
        &self,
        requirement: &Requirement,
        _sources: &[Source],
    ) -> Result<PathBuf, BuildError> {
        let release = requirement
            .pinned_version()
            .and_then(|version| self.release_of(&requirement.name, version))
            .ok_or_else(|| BuildError {
                requirement: requirement.to_string(),
                source_tree: None,
                err: anyhow!("No such release"),
            })?;

        let dist_info = self
            .builds
            .path()
            .join(format!("{}-{}.dist-info", requirement.name, release.version));
        fs_err::create_dir_all(&dist_info).unwrap();
        let mut metadata = format!(
            "Metadata-Version: 2.1\nName: {}\nVersion: {}\n",
            requirement.name, release.version
        );
        if let Some(requires_python) = &release.requires_python {
            metadata.push_str(&format!("Requires-Python: {requires_python}\n"));
        }
        for line in &release.requires_dist {
            metadata.push_str(&format!("Requires-Dist: {line}\n"));
        }
        fs_err::write(dist_info.join("METADATA"), metadata).unwrap();
        Ok(dist_info)
    }
}

/// Everything a lock run borrows.
pub(crate) struct Context {
    pub(crate) registry: FakeRegistry,
    pub(crate) git: GitResolver,
    pub(crate) cache: Cache,
    pub(crate) options: ResolverOptions,
}

impl Context {
    pub(crate) fn new(registry: FakeRegistry) -> Self {
        Self {
            registry,
            git: GitResolver::default(),
            cache: Cache::temp().unwrap(),
            options: ResolverOptions::default(),
        }
    }

    /// Replace the registry, keeping the cache.
    #[must_use]
    pub(crate) fn with_registry(self, registry: FakeRegistry) -> Self {
        Self { registry, ..self }
    }

    pub(crate) fn locker(&self) -> Locker<'_, FakeRegistry, FakeRegistry> {
        Locker::new(
            &self.registry,
            &self.registry,
            &self.git,
            &self.cache,
            self.options.clone(),
        )
    }

    pub(crate) async fn lock(&self, manifest: &str, mode: LockMode) -> Result<Lock, LockError> {
        let manifest = Manifest::from_toml(manifest).unwrap();
        self.locker().lock(&manifest, mode).await
    }
}

/// The `name==version` pins of a lock section.
pub(crate) fn pins(
    section: &BTreeMap<PackageName, pinion_resolver::LockedPackage>,
) -> Vec<String> {
    section
        .iter()
        .map(|(name, package)| format!("{name}{}", package.version.as_deref().unwrap_or("")))
        .collect()
}
