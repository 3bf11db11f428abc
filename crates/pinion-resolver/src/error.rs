use std::io;
use std::path::PathBuf;

use thiserror::Error;

use pinion_git::GitResolverError;
use pinion_pypi_types::MetadataError;
use pinion_types::{BuildError, IndexError, RequirementError};

use crate::Identifier;
use crate::resolver::ResolutionError;

/// A failure to find candidates or dependencies for a single package.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Git(#[from] GitResolverError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("Failed to read metadata from `{}`", path.display())]
    Metadata {
        path: PathBuf,
        #[source]
        err: MetadataError,
    },

    #[error(transparent)]
    Requirement(#[from] RequirementError),

    #[error("Failed to read `{}`", path.display())]
    Io {
        path: PathBuf,
        #[source]
        err: io::Error,
    },
}

/// A failure to produce a lock.
#[derive(Debug, Error)]
pub enum LockError {
    #[error(transparent)]
    Resolution(
        #[from] Box<ResolutionError<pinion_types::Requirement, pinion_types::Candidate, ResolveError>>,
    ),

    #[error("Failed to collect hashes for `{identifier}`")]
    Hashes {
        identifier: Identifier,
        #[source]
        err: ResolveError,
    },

    #[error(transparent)]
    Manifest(#[from] ManifestError),
}

impl From<ResolutionError<pinion_types::Requirement, pinion_types::Candidate, ResolveError>>
    for LockError
{
    fn from(
        err: ResolutionError<pinion_types::Requirement, pinion_types::Candidate, ResolveError>,
    ) -> Self {
        Self::Resolution(Box::new(err))
    }
}

/// A manifest or lock document that cannot be read.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error(transparent)]
    Toml(#[from] toml::de::Error),

    #[error("Failed to read `{}`", path.display())]
    Io {
        path: PathBuf,
        #[source]
        err: io::Error,
    },

    #[error("Invalid entry for `{name}`: {message}")]
    Entry { name: String, message: String },

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ManifestError {
    pub(crate) fn entry(name: &str, message: impl ToString) -> Self {
        Self::Entry {
            name: name.to_string(),
            message: message.to_string(),
        }
    }
}
