use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use pinion_normalize::{ExtraName, PackageName};
use pinion_pep440::Version;
use pinion_warnings::warn_user;

use crate::{Cache, CacheBucket, CacheError};

const FORMAT: u32 = 1;

/// The key of a cached value: the package name, and the pinned version followed by the sorted
/// extras in brackets, e.g. `("ipython", "2.1.0[nbconvert,notebook]")`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CacheKey {
    name: String,
    version: String,
}

impl CacheKey {
    pub fn new(name: &PackageName, version: &Version, extras: &[ExtraName]) -> Self {
        let mut extras = extras.iter().map(ExtraName::as_str).collect::<Vec<_>>();
        extras.sort_unstable();
        extras.dedup();
        let version = if extras.is_empty() {
            version.to_string()
        } else {
            format!("{version}[{}]", extras.join(","))
        };
        Self {
            name: name.as_str().to_string(),
            version,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}=={}", self.name, self.version)
    }
}

type Entries<V> = BTreeMap<String, BTreeMap<String, V>>;

#[derive(Deserialize)]
#[serde(bound(deserialize = "V: DeserializeOwned"))]
struct Document<V> {
    #[serde(rename = "__format__")]
    format: u32,
    dependencies: Entries<V>,
}

/// A persistent map from [`CacheKey`] to `V`, backed by one JSON document.
///
/// The document is loaded lazily on first access and rewritten atomically after every change,
/// so readers never observe a partially written file.
#[derive(Debug)]
pub struct JsonCache<V> {
    path: PathBuf,
    entries: Mutex<Option<Entries<V>>>,
}

/// Requirement lines of a pinned candidate.
pub type DependencyCache = JsonCache<Vec<String>>;

/// The `Requires-Python` value of a pinned candidate; empty when the candidate declares none.
pub type RequiresPythonCache = JsonCache<String>;

impl JsonCache<Vec<String>> {
    /// The dependency cache for the given target Python, e.g. `3.11`.
    pub fn open(cache: &Cache, python_version: &str) -> Self {
        Self::new(
            cache
                .bucket(CacheBucket::Dependencies)
                .join(format!("depcache-py{python_version}.json")),
        )
    }
}

impl JsonCache<String> {
    /// The `Requires-Python` cache for the given target Python, e.g. `3.11`.
    pub fn open(cache: &Cache, python_version: &str) -> Self {
        Self::new(
            cache
                .bucket(CacheBucket::Dependencies)
                .join(format!("pyreqcache-py{python_version}.json")),
        )
    }
}

impl<V: Clone + Serialize + DeserializeOwned> JsonCache<V> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the document from disk, replacing anything held in memory.
    ///
    /// A missing file is an empty cache. A file that is not a valid document is reported, and
    /// the in-memory cache is left empty.
    pub fn read_cache(&self) -> Result<(), CacheError> {
        let document = read_document(&self.path);
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match document {
            Ok(document) => {
                *entries = Some(document);
                Ok(())
            }
            Err(err) => {
                *entries = Some(Entries::new());
                Err(err)
            }
        }
    }

    fn with_entries<R>(&self, f: impl FnOnce(&mut Entries<V>) -> R) -> R {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let entries = entries.get_or_insert_with(|| match read_document(&self.path) {
            Ok(document) => document,
            Err(err) => {
                warn!("{err}");
                warn_user!("{err}");
                Entries::new()
            }
        });
        f(entries)
    }

    pub fn get(&self, key: &CacheKey) -> Option<V> {
        self.with_entries(|entries| {
            entries
                .get(&key.name)
                .and_then(|versions| versions.get(&key.version))
                .cloned()
        })
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.get(key).is_some()
    }

    pub fn insert(&self, key: &CacheKey, value: V) -> Result<(), CacheError> {
        self.with_entries(|entries| {
            entries
                .entry(key.name.clone())
                .or_default()
                .insert(key.version.clone(), value);
            write_document(&self.path, entries)
        })
    }

    /// Drop the entry for `key`, returning whether there was one.
    pub fn remove(&self, key: &CacheKey) -> Result<bool, CacheError> {
        self.with_entries(|entries| {
            let Some(versions) = entries.get_mut(&key.name) else {
                return Ok(false);
            };
            if versions.remove(&key.version).is_none() {
                return Ok(false);
            }
            if versions.is_empty() {
                entries.remove(&key.name);
            }
            debug!("Removed {key} from {}", self.path.display());
            write_document(&self.path, entries)?;
            Ok(true)
        })
    }

    pub fn clear(&self) -> Result<(), CacheError> {
        self.with_entries(|entries| {
            entries.clear();
            write_document(&self.path, entries)
        })
    }
}

fn read_document<V: DeserializeOwned>(path: &Path) -> Result<Entries<V>, CacheError> {
    let content = match fs_err::read(path) {
        Ok(content) => content,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Entries::new()),
        Err(err) => return Err(CacheError::Io(err)),
    };
    let document: Document<V> =
        serde_json::from_slice(&content).map_err(|err| CacheError::Corrupt {
            path: path.to_path_buf(),
            err: Some(err),
        })?;
    if document.format != FORMAT {
        return Err(CacheError::Corrupt {
            path: path.to_path_buf(),
            err: None,
        });
    }
    Ok(document.dependencies)
}

fn write_document<V: Serialize>(path: &Path, entries: &Entries<V>) -> Result<(), CacheError> {
    #[derive(Serialize)]
    struct DocumentRef<'a, V> {
        #[serde(rename = "__format__")]
        format: u32,
        dependencies: &'a Entries<V>,
    }

    let content = serde_json::to_vec(&DocumentRef {
        format: FORMAT,
        dependencies: entries,
    })
    .map_err(|err| CacheError::Serialize {
        path: path.to_path_buf(),
        err,
    })?;
    if let Some(parent) = path.parent() {
        fs_err::create_dir_all(parent)?;
    }
    pinion_fs::write_atomic_sync(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use insta::assert_snapshot;

    use super::*;

    fn key(name: &str, version: &str, extras: &[&str]) -> CacheKey {
        CacheKey::new(
            &PackageName::from_str(name).unwrap(),
            &Version::from_str(version).unwrap(),
            &extras
                .iter()
                .map(|extra| ExtraName::from_str(extra).unwrap())
                .collect::<Vec<_>>(),
        )
    }

    #[test]
    fn key_format() {
        let key = key("IPython", "2.1.0", &["notebook", "nbconvert", "notebook"]);
        assert_eq!(key.name(), "ipython");
        assert_eq!(key.version(), "2.1.0[nbconvert,notebook]");
    }

    #[test]
    fn persists_across_instances() {
        let cache = Cache::temp().unwrap().init().unwrap();
        let dependencies = DependencyCache::open(&cache, "3.11");
        dependencies
            .insert(
                &key("requests", "2.31.0", &[]),
                vec!["idna<4,>=2.5".to_string(), "urllib3<3,>=1.21.1".to_string()],
            )
            .unwrap();

        assert_snapshot!(fs_err::read_to_string(dependencies.path()).unwrap(), @r#"{"__format__":1,"dependencies":{"requests":{"2.31.0":["idna<4,>=2.5","urllib3<3,>=1.21.1"]}}}"#);

        let reopened = DependencyCache::open(&cache, "3.11");
        assert_eq!(
            reopened.get(&key("requests", "2.31.0", &[])).unwrap().len(),
            2
        );
        assert!(!reopened.contains(&key("requests", "2.31.0", &["socks"])));
        assert!(
            !DependencyCache::open(&cache, "3.12").contains(&key("requests", "2.31.0", &[]))
        );
    }

    #[test]
    fn remove_entry() {
        let cache = Cache::temp().unwrap().init().unwrap();
        let requires_python = RequiresPythonCache::open(&cache, "3.11");
        requires_python
            .insert(&key("six", "1.16.0", &[]), ">=2.7".to_string())
            .unwrap();
        assert!(requires_python.remove(&key("six", "1.16.0", &[])).unwrap());
        assert!(!requires_python.remove(&key("six", "1.16.0", &[])).unwrap());
        assert_snapshot!(fs_err::read_to_string(requires_python.path()).unwrap(), @r#"{"__format__":1,"dependencies":{}}"#);
    }

    #[test]
    fn unknown_format_is_corrupt() {
        let cache = Cache::temp().unwrap().init().unwrap();
        let dependencies = DependencyCache::open(&cache, "3.11");
        fs_err::write(
            dependencies.path(),
            r#"{"__format__": 2, "dependencies": {"six": {"1.16.0": []}}}"#,
        )
        .unwrap();

        let err = dependencies.read_cache().unwrap_err();
        assert!(matches!(err, CacheError::Corrupt { err: None, .. }));
        assert_eq!(dependencies.get(&key("six", "1.16.0", &[])), None);
    }

    #[test]
    fn invalid_json_is_treated_as_empty() {
        let cache = Cache::temp().unwrap().init().unwrap();
        let dependencies = DependencyCache::open(&cache, "3.11");
        fs_err::write(dependencies.path(), "{not json").unwrap();
        assert_eq!(dependencies.get(&key("six", "1.16.0", &[])), None);
    }
}
