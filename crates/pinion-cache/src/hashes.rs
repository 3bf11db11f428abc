use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};

use rustc_hash::FxHashMap;
use tracing::{debug, trace, warn};
use url::Url;

use pinion_pypi_types::{HashAlgorithm, HashDigest};

use crate::{Cache, CacheBucket, CacheError};

/// Hashes of index artifacts, keyed by URL, so that artifacts are not downloaded twice.
///
/// A URL whose fragment already names a SHA-256 digest is trusted without a download. Digests
/// computed for URLs whose fragment names some other algorithm are persisted, since the fragment
/// pins the content the URL refers to. Digests for URLs without a fragment only live in memory.
#[derive(Debug)]
pub struct HashCache {
    path: PathBuf,
    memory: Mutex<FxHashMap<String, HashDigest>>,
    disk: Mutex<Option<BTreeMap<String, String>>>,
}

impl HashCache {
    pub fn open(cache: &Cache) -> Self {
        Self::new(cache.bucket(CacheBucket::Hashes).join("hashes.json"))
    }

    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            memory: Mutex::default(),
            disk: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The digest of the artifact at `url`, if it is known without downloading it.
    pub fn get(&self, url: &Url) -> Option<HashDigest> {
        let fragment = url.fragment().and_then(HashDigest::from_fragment);
        if let Some(digest) = fragment
            .as_ref()
            .filter(|digest| digest.algorithm == HashAlgorithm::Sha256)
        {
            trace!("Using the hash from the URL fragment of {url}");
            self.memory
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(url.to_string(), digest.clone());
            return Some(digest.clone());
        }

        if let Some(digest) = self
            .memory
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url.as_str())
        {
            return Some(digest.clone());
        }

        if fragment.is_some() {
            return self.with_disk(|disk| {
                disk.get(url.as_str())
                    .and_then(|digest| HashDigest::from_str(digest).ok())
            });
        }
        None
    }

    /// Record the digest computed for the artifact at `url`.
    pub fn insert(&self, url: &Url, digest: HashDigest) -> Result<(), CacheError> {
        self.memory
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.to_string(), digest.clone());

        if url.fragment().and_then(HashDigest::from_fragment).is_none() {
            return Ok(());
        }
        self.with_disk(|disk| {
            disk.insert(url.to_string(), digest.to_string());
            let content = serde_json::to_vec(&*disk).map_err(|err| CacheError::Serialize {
                path: self.path.clone(),
                err,
            })?;
            if let Some(parent) = self.path.parent() {
                fs_err::create_dir_all(parent)?;
            }
            pinion_fs::write_atomic_sync(&self.path, content)?;
            debug!("Persisted hash of {url}");
            Ok(())
        })
    }

    fn with_disk<R>(&self, f: impl FnOnce(&mut BTreeMap<String, String>) -> R) -> R {
        let mut disk = self.disk.lock().unwrap_or_else(PoisonError::into_inner);
        let disk = disk.get_or_insert_with(|| match read_hashes(&self.path) {
            Ok(hashes) => hashes,
            Err(err) => {
                warn!("{err}");
                BTreeMap::new()
            }
        });
        f(disk)
    }
}

fn read_hashes(path: &Path) -> Result<BTreeMap<String, String>, CacheError> {
    match fs_err::read(path) {
        Ok(content) => serde_json::from_slice(&content).map_err(|err| CacheError::Corrupt {
            path: path.to_path_buf(),
            err: Some(err),
        }),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(BTreeMap::new()),
        Err(err) => Err(CacheError::Io(err)),
    }
}
