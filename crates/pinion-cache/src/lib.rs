use std::fmt::{Display, Formatter};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use pinion_static::EnvVars;

pub use crate::dependencies::{CacheKey, DependencyCache, JsonCache, RequiresPythonCache};
pub use crate::hashes::HashCache;

mod dependencies;
mod hashes;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error(
        "The cache file at `{}` is corrupted; inspect or delete it",
        path.display()
    )]
    Corrupt {
        path: PathBuf,
        #[source]
        err: Option<serde_json::Error>,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("Failed to serialize the cache file at `{}`", path.display())]
    Serialize {
        path: PathBuf,
        #[source]
        err: serde_json::Error,
    },
}

/// The main cache abstraction: a root directory holding one directory per [`CacheBucket`].
#[derive(Debug, Clone)]
pub struct Cache {
    /// The cache directory.
    root: PathBuf,
    /// A temporary cache directory, kept alive for as long as the cache is.
    temp_dir: Option<Arc<tempfile::TempDir>>,
}

impl Cache {
    /// A persistent cache directory at `root`.
    pub fn from_path(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            temp_dir: None,
        }
    }

    /// Create a temporary cache directory.
    pub fn temp() -> Result<Self, io::Error> {
        let temp_dir = tempfile::tempdir()?;
        Ok(Self {
            root: temp_dir.path().to_path_buf(),
            temp_dir: Some(Arc::new(temp_dir)),
        })
    }

    /// Prefer, in order:
    /// 1. `PINION_CACHE_DIR`.
    /// 2. The directory passed by the caller.
    /// 3. `$XDG_CACHE_HOME/pinion`, then `$HOME/.cache/pinion`.
    /// 4. A temporary directory.
    pub fn from_settings(cache_dir: Option<PathBuf>) -> Result<Self, io::Error> {
        if let Some(dir) = std::env::var_os(EnvVars::PINION_CACHE_DIR) {
            Ok(Self::from_path(dir))
        } else if let Some(dir) = cache_dir {
            Ok(Self::from_path(dir))
        } else if let Some(dir) = std::env::var_os(EnvVars::XDG_CACHE_HOME) {
            Ok(Self::from_path(PathBuf::from(dir).join("pinion")))
        } else if let Some(home) = std::env::var_os(EnvVars::HOME) {
            Ok(Self::from_path(PathBuf::from(home).join(".cache").join("pinion")))
        } else {
            Self::temp()
        }
    }

    /// Return the root of the cache.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The folder for a specific cache bucket.
    pub fn bucket(&self, cache_bucket: CacheBucket) -> PathBuf {
        self.root.join(cache_bucket.to_str())
    }

    pub fn is_temporary(&self) -> bool {
        self.temp_dir.is_some()
    }

    /// Initialize the [`Cache`], creating the root and every bucket.
    pub fn init(self) -> Result<Self, io::Error> {
        let root = &self.root;

        fs_err::create_dir_all(root)?;

        // Keep the cache out of version control if it lands inside a project.
        match fs_err::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(root.join(".gitignore"))
        {
            Ok(mut file) => file.write_all(b"*")?,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => (),
            Err(err) => return Err(err),
        }

        for bucket in CacheBucket::iter() {
            fs_err::create_dir_all(self.bucket(bucket))?;
        }

        Ok(Self {
            root: std::path::absolute(root)?,
            ..self
        })
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum CacheBucket {
    /// Dependency lists and `Requires-Python` values, one JSON document per target Python.
    Dependencies,
    /// Artifact hashes keyed by URL.
    Hashes,
}

impl CacheBucket {
    fn to_str(self) -> &'static str {
        match self {
            Self::Dependencies => "dependencies-v1",
            Self::Hashes => "hashes-v1",
        }
    }

    pub fn iter() -> impl Iterator<Item = Self> {
        [Self::Dependencies, Self::Hashes].into_iter()
    }
}

impl Display for CacheBucket {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.to_str())
    }
}
