use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

use pinion_normalize::{ExtraName, PackageName};
use pinion_pep440::{Version, VersionSpecifier, VersionSpecifiers};
use pinion_pep508::MarkerTree;
use pinion_pypi_types::HashDigest;

use crate::{Requirement, RequirementSource};

/// A concrete, installable unit considered during resolution.
///
/// Index releases carry their version and a `==<version>` source. VCS, URL and path candidates
/// are copies of the requirement they were found for, with VCS references locked to a commit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Candidate {
    pub name: PackageName,
    pub extras: Vec<ExtraName>,
    pub version: Option<Version>,
    pub source: RequirementSource,
    pub hashes: BTreeSet<HashDigest>,
    /// The combined marker under which the candidate is needed, filled in after resolution.
    pub markers: Option<MarkerTree>,
    /// Whether the candidate was carried over from a previous lock.
    pub preferred: bool,
}

impl Candidate {
    /// A release of a named package, found on the index called `index`.
    pub fn from_release(
        name: PackageName,
        extras: Vec<ExtraName>,
        version: Version,
        index: Option<String>,
    ) -> Self {
        Self {
            name,
            extras,
            source: RequirementSource::Registry {
                specifier: VersionSpecifiers::from(VersionSpecifier::equals_version(
                    version.clone(),
                )),
                index,
            },
            version: Some(version),
            hashes: BTreeSet::new(),
            markers: None,
            preferred: false,
        }
    }

    /// A candidate standing for the requirement itself, without its marker.
    pub fn from_requirement(requirement: &Requirement) -> Self {
        Self {
            name: requirement.name.clone(),
            extras: requirement.extras.clone(),
            version: requirement.pinned_version().cloned(),
            source: requirement.source.clone(),
            hashes: BTreeSet::new(),
            markers: None,
            preferred: false,
        }
    }

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

    pub fn is_prerelease(&self) -> bool {
        self.version.as_ref().is_some_and(Version::any_prerelease)
    }

    pub fn index(&self) -> Option<&str> {
        match &self.source {
            RequirementSource::Registry { index, .. } => index.as_deref(),
            _ => None,
        }
    }

    /// The requirement that selects exactly this candidate.
    pub fn as_requirement(&self) -> Requirement {
        Requirement::new(self.name.clone(), self.extras.clone(), self.source.clone(), None)
    }

    #[must_use]
    pub fn strip_extras(&self) -> Self {
        Self {
            extras: Vec::new(),
            ..self.clone()
        }
    }
}

impl Display for Candidate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_requirement())
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn release_round_trips_to_pinned_requirement() {
        let candidate = Candidate::from_release(
            PackageName::from_str("requests").unwrap(),
            vec![ExtraName::from_str("socks").unwrap()],
            Version::from_str("2.31.0rc1").unwrap(),
            Some("pypi".to_string()),
        );
        assert!(candidate.is_prerelease());
        assert_eq!(candidate.to_string(), "requests[socks]==2.31.0rc1");
        let requirement = candidate.as_requirement();
        assert_eq!(
            requirement.pinned_version(),
            candidate.version.as_ref()
        );
        assert_eq!(requirement.index(), Some("pypi"));
        assert_eq!(candidate.strip_extras().to_string(), "requests==2.31.0rc1");
    }

    #[test]
    fn requirement_copy_drops_marker() {
        let requirement = Requirement::from_str(
            "tool @ git+https://example.com/tool@main ; sys_platform == 'linux'",
        )
        .unwrap();
        let candidate = Candidate::from_requirement(&requirement);
        assert!(candidate.is_vcs());
        assert_eq!(candidate.version, None);
        assert_eq!(candidate.as_requirement().marker, None);
    }
}
