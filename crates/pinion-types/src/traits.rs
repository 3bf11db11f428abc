use std::future::Future;
use std::path::PathBuf;

use thiserror::Error;
use url::Url;

use pinion_normalize::PackageName;
use pinion_pep440::Version;
use pinion_pypi_types::{HashDigest, PackageJson};

use crate::{Requirement, Source};

/// Which wheels to consider when listing a release's files.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum WheelPolicy {
    /// Source distributions, pure-Python wheels and wheels for the listed platform tags.
    Compatible(Vec<String>),
    /// Every file, whatever its platform tags; used when collecting hashes for a lock that has to
    /// work everywhere.
    #[default]
    AllowAll,
}

impl WheelPolicy {
    /// Whether the file called `filename` passes this policy.
    pub fn accepts(&self, filename: &str) -> bool {
        let Self::Compatible(platforms) = self else {
            return true;
        };
        let Some(stem) = filename.strip_suffix(".whl") else {
            return true;
        };
        // `{name}-{version}(-{build})?-{python}-{abi}-{platform}`; compressed tag sets use `.`.
        let Some((_, platform)) = stem.rsplit_once('-') else {
            return false;
        };
        platform
            .split('.')
            .any(|tag| tag == "any" || platforms.iter().any(|accepted| accepted == tag))
    }
}

/// A single distribution file of a release, as listed by an index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexFile {
    pub filename: String,
    pub url: Url,
    pub version: Version,
    /// The name of the [`Source`] that listed the file.
    pub index: String,
    pub requires_python: Option<String>,
    pub hashes: Vec<HashDigest>,
    pub yanked: bool,
}

#[derive(Debug, Error)]
#[error("Failed to query `{url}`")]
pub struct IndexError {
    pub url: String,
    #[source]
    pub err: anyhow::Error,
}

impl IndexError {
    pub fn new(url: impl Into<String>, err: impl Into<anyhow::Error>) -> Self {
        Self {
            url: url.into(),
            err: err.into(),
        }
    }
}

/// Access to package indexes.
pub trait PackageIndex {
    /// Every file of every release of `name` across `sources`, in source order.
    fn files(
        &self,
        name: &PackageName,
        sources: &[Source],
        policy: &WheelPolicy,
    ) -> impl Future<Output = Result<Vec<IndexFile>, IndexError>>;

    /// The JSON API document for a pinned release, or `None` if the index has no such page.
    fn package_json(
        &self,
        source: &Source,
        name: &PackageName,
        version: &Version,
    ) -> impl Future<Output = Result<Option<PackageJson>, IndexError>>;

    /// The bytes of the artifact at `url`.
    fn download(&self, url: &Url) -> impl Future<Output = Result<Vec<u8>, IndexError>>;
}

/// A metadata build that failed.
///
/// `source_tree` is the unpacked source tree, if the build got far enough to produce one; legacy
/// `egg-info` metadata may still be readable from it.
#[derive(Debug, Error)]
#[error("Failed to build metadata for `{requirement}`")]
pub struct BuildError {
    pub requirement: String,
    pub source_tree: Option<PathBuf>,
    #[source]
    pub err: anyhow::Error,
}

/// Builds packages far enough to read their metadata.
pub trait BuildContext {
    /// Prepare the metadata of the distribution `requirement` selects, returning the
    /// `.dist-info` directory it was written to.
    fn metadata(
        &self,
        requirement: &Requirement,
        sources: &[Source],
    ) -> impl Future<Output = Result<PathBuf, BuildError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wheel_policy() {
        let compatible = WheelPolicy::Compatible(vec!["manylinux_2_17_x86_64".to_string()]);
        assert!(compatible.accepts("six-1.16.0.tar.gz"));
        assert!(compatible.accepts("six-1.16.0-py2.py3-none-any.whl"));
        assert!(compatible.accepts(
            "numpy-1.26.4-cp312-cp312-manylinux_2_17_x86_64.manylinux2014_x86_64.whl"
        ));
        assert!(!compatible.accepts("numpy-1.26.4-cp312-cp312-win_amd64.whl"));
        assert!(WheelPolicy::AllowAll.accepts("numpy-1.26.4-cp312-cp312-win_amd64.whl"));
    }
}
