use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;
use url::Url;

use pinion_git::{GitReference, GitSha};
use pinion_normalize::{ExtraName, PackageName};
use pinion_pep440::{Operator, Version, VersionSpecifiers};
use pinion_pep508::{MarkerTree, Pep508Error, VersionOrUrl};

#[derive(Debug, Error)]
pub enum RequirementError {
    #[error(transparent)]
    Pep508(#[from] Pep508Error),
    #[error("Invalid Git URL: `{0}`")]
    InvalidGitUrl(String),
    #[error("`{0}` does not point to a local path")]
    InvalidFileUrl(Url),
}

/// Where a requirement is satisfied from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RequirementSource {
    /// A named requirement, satisfied by any matching release on an index.
    Registry {
        specifier: VersionSpecifiers,
        /// Restricts the lookup to the source of this name.
        index: Option<String>,
    },
    /// A Git repository at some reference, locked to `precise` once resolved.
    Git {
        repository: Url,
        reference: GitReference,
        precise: Option<GitSha>,
        subdirectory: Option<String>,
        editable: bool,
    },
    /// A direct link to an archive.
    Url { url: Url },
    /// A local directory or archive.
    Path { path: PathBuf, editable: bool },
}

/// An abstract dependency request: a name, optional extras, a source and an optional marker.
///
/// Extras are kept sorted and deduplicated.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Requirement {
    pub name: PackageName,
    pub extras: Vec<ExtraName>,
    pub source: RequirementSource,
    pub marker: Option<MarkerTree>,
}

impl Requirement {
    pub fn new(
        name: PackageName,
        extras: impl IntoIterator<Item = ExtraName>,
        source: RequirementSource,
        marker: Option<MarkerTree>,
    ) -> Self {
        let mut extras = extras.into_iter().collect::<Vec<_>>();
        extras.sort();
        extras.dedup();
        Self {
            name,
            extras,
            source,
            marker,
        }
    }

    /// A named requirement with the given specifiers and no index restriction.
    pub fn registry(name: PackageName, specifier: VersionSpecifiers) -> Self {
        Self::new(
            name,
            [],
            RequirementSource::Registry {
                specifier,
                index: None,
            },
            None,
        )
    }

    /// Whether this requirement is looked up by name on an index.
    pub fn is_named(&self) -> bool {
        matches!(self.source, RequirementSource::Registry { .. })
    }

    pub fn is_vcs(&self) -> bool {
        matches!(self.source, RequirementSource::Git { .. })
    }

    pub fn is_editable(&self) -> bool {
        matches!(
            self.source,
            RequirementSource::Git { editable: true, .. }
                | RequirementSource::Path { editable: true, .. }
        )
    }

    pub fn specifier(&self) -> Option<&VersionSpecifiers> {
        match &self.source {
            RequirementSource::Registry { specifier, .. } => Some(specifier),
            _ => None,
        }
    }

    pub fn index(&self) -> Option<&str> {
        match &self.source {
            RequirementSource::Registry { index, .. } => index.as_deref(),
            _ => None,
        }
    }

    /// The exact version this requirement pins, if any.
    ///
    /// Only a non-editable named requirement whose specifier set is a single `==` or `===` without
    /// a wildcard is pinned.
    pub fn pinned_version(&self) -> Option<&Version> {
        let specifier = self.specifier()?;
        let [specifier] = &specifier[..] else {
            return None;
        };
        matches!(specifier.operator(), Operator::Equal | Operator::ExactEqual)
            .then(|| specifier.version())
    }

    /// A copy of this requirement without extras.
    #[must_use]
    pub fn strip_extras(&self) -> Self {
        Self {
            extras: Vec::new(),
            ..self.clone()
        }
    }

    #[must_use]
    pub fn with_marker(self, marker: Option<MarkerTree>) -> Self {
        Self { marker, ..self }
    }

    /// Convert a PEP 508 line, recognizing `git+` URLs and local `file:` URLs.
    pub fn from_pep508(requirement: pinion_pep508::Requirement) -> Result<Self, RequirementError> {
        let source = match requirement.version_or_url {
            None => RequirementSource::Registry {
                specifier: VersionSpecifiers::empty(),
                index: None,
            },
            Some(VersionOrUrl::VersionSpecifier(specifier)) => RequirementSource::Registry {
                specifier,
                index: None,
            },
            Some(VersionOrUrl::Url(url)) => source_from_url(url, false)?,
        };
        Ok(Self::new(
            requirement.name,
            requirement.extras,
            source,
            requirement.marker,
        ))
    }
}

/// Interpret a direct URL: `git+<scheme>://...[@rev][#subdirectory=...]`, `file://...`, or any
/// other archive link.
pub(crate) fn source_from_url(url: Url, editable: bool) -> Result<RequirementSource, RequirementError> {
    if let Some(scheme) = url.scheme().strip_prefix("git+") {
        let (repository, reference, subdirectory) = parse_git_url(&url, scheme)?;
        return Ok(RequirementSource::Git {
            repository,
            reference,
            precise: None,
            subdirectory,
            editable,
        });
    }
    if url.scheme() == "file" {
        let path = url
            .to_file_path()
            .map_err(|()| RequirementError::InvalidFileUrl(url.clone()))?;
        return Ok(RequirementSource::Path { path, editable });
    }
    Ok(RequirementSource::Url { url })
}

fn parse_git_url(
    url: &Url,
    scheme: &str,
) -> Result<(Url, GitReference, Option<String>), RequirementError> {
    let invalid = || RequirementError::InvalidGitUrl(url.to_string());

    let subdirectory = url.fragment().and_then(|fragment| {
        fragment
            .split('&')
            .find_map(|part| part.strip_prefix("subdirectory="))
            .map(ToString::to_string)
    });

    let mut repository = url.clone();
    repository.set_fragment(None);
    let (path, rev) = match repository.path().rsplit_once('@') {
        Some((path, rev)) => (path.to_string(), Some(rev.to_string())),
        None => (repository.path().to_string(), None),
    };
    repository.set_path(&path);

    // `Url::set_scheme` refuses to switch between special and non-special schemes.
    let rest = &repository.as_str()[repository.scheme().len()..];
    let repository = Url::parse(&format!("{scheme}{rest}")).map_err(|_| invalid())?;

    Ok((
        repository,
        GitReference::from_rev(rev.as_deref()),
        subdirectory,
    ))
}

impl FromStr for Requirement {
    type Err = RequirementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_pep508(pinion_pep508::Requirement::from_str(s)?)
    }
}

impl Display for Requirement {
    /// Render as a PEP 508 line.
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.extras.is_empty() {
            f.write_str("[")?;
            for (idx, extra) in self.extras.iter().enumerate() {
                if idx > 0 {
                    f.write_str(",")?;
                }
                write!(f, "{extra}")?;
            }
            f.write_str("]")?;
        }
        let has_url = match &self.source {
            RequirementSource::Registry { specifier, .. } => {
                write!(f, "{specifier}")?;
                false
            }
            RequirementSource::Git {
                repository,
                reference,
                precise,
                subdirectory,
                ..
            } => {
                write!(f, " @ git+{repository}")?;
                if let Some(precise) = precise {
                    write!(f, "@{precise}")?;
                } else if *reference != GitReference::DefaultBranch {
                    write!(f, "@{reference}")?;
                }
                if let Some(subdirectory) = subdirectory {
                    write!(f, "#subdirectory={subdirectory}")?;
                }
                true
            }
            RequirementSource::Url { url } => {
                write!(f, " @ {url}")?;
                true
            }
            RequirementSource::Path { path, .. } => {
                match Url::from_file_path(path) {
                    Ok(url) => write!(f, " @ {url}")?,
                    Err(()) => write!(f, " @ file://{}", path.display())?,
                }
                true
            }
        };
        if let Some(marker) = &self.marker {
            // A space keeps the marker separator out of the URL.
            if has_url {
                f.write_str(" ")?;
            }
            write!(f, "; {marker}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use insta::assert_snapshot;

    use super::*;

    #[test]
    fn pinned_version() {
        let pinned = Requirement::from_str("requests==2.31.0").unwrap();
        assert_eq!(pinned.pinned_version().unwrap().to_string(), "2.31.0");

        for unpinned in ["requests", "requests>=2", "requests==2.*", "requests==2.31.0,!=2.30"] {
            assert_eq!(
                Requirement::from_str(unpinned).unwrap().pinned_version(),
                None,
                "{unpinned}"
            );
        }

        let arbitrary = Requirement::from_str("requests===2.31.0").unwrap();
        assert!(arbitrary.pinned_version().is_some());
    }

    #[test]
    fn extras_are_sorted() {
        let requirement = Requirement::from_str("requests[socks,Security,socks]>=2").unwrap();
        assert_snapshot!(requirement, @"requests[security,socks]>=2");
        assert_snapshot!(requirement.strip_extras(), @"requests>=2");
    }

    #[test]
    fn git_url() {
        let requirement = Requirement::from_str(
            "requests @ git+https://github.com/psf/requests@v2.31.0#egg=requests&subdirectory=src ; python_version >= '3.8'",
        )
        .unwrap();
        let RequirementSource::Git {
            repository,
            reference,
            subdirectory,
            ..
        } = &requirement.source
        else {
            panic!("expected a Git requirement: {requirement:?}");
        };
        assert_eq!(repository.as_str(), "https://github.com/psf/requests");
        assert_eq!(*reference, GitReference::BranchOrTag("v2.31.0".to_string()));
        assert_eq!(subdirectory.as_deref(), Some("src"));
        assert!(requirement.is_vcs());
        assert!(!requirement.is_named());
        assert_snapshot!(requirement, @r#"requests @ git+https://github.com/psf/requests@v2.31.0#subdirectory=src ; python_version >= "3.8""#);
    }

    #[test]
    fn git_ssh_url() {
        let requirement =
            Requirement::from_str("private @ git+ssh://git@example.com/org/private.git").unwrap();
        let RequirementSource::Git {
            repository,
            reference,
            ..
        } = &requirement.source
        else {
            panic!("expected a Git requirement: {requirement:?}");
        };
        assert_eq!(repository.as_str(), "ssh://git@example.com/org/private.git");
        assert_eq!(*reference, GitReference::DefaultBranch);
    }

    #[test]
    fn direct_urls() {
        let archive =
            Requirement::from_str("six @ https://files.example.com/six-1.16.0.tar.gz").unwrap();
        assert!(matches!(archive.source, RequirementSource::Url { .. }));

        let path = Requirement::from_str("local @ file:///srv/projects/local").unwrap();
        assert_eq!(
            path.source,
            RequirementSource::Path {
                path: PathBuf::from("/srv/projects/local"),
                editable: false
            }
        );
        assert!(!path.is_editable());
    }
}
