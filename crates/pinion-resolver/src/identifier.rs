use std::fmt::{Display, Formatter};

use itertools::Itertools;

use pinion_normalize::{ExtraName, PackageName};
use pinion_types::{Candidate, Requirement, Source};

/// The key the resolver tracks a package under: the normalized name followed by the sorted
/// extras, e.g. `requests[security,socks]`.
///
/// The same package requested with different extras gets distinct identifiers. The provider ties
/// them back together by making every extra-bearing candidate depend on its bare counterpart.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Identifier {
    key: String,
    name: PackageName,
}

impl Identifier {
    pub fn new(name: &PackageName, extras: &[ExtraName]) -> Self {
        let key = if extras.is_empty() {
            name.to_string()
        } else {
            let extras = extras.iter().map(ExtraName::as_str).sorted().dedup().join(",");
            format!("{name}[{extras}]")
        };
        Self {
            key,
            name: name.clone(),
        }
    }

    pub fn from_requirement(requirement: &Requirement) -> Self {
        Self::new(&requirement.name, &requirement.extras)
    }

    pub fn from_candidate(candidate: &Candidate) -> Self {
        Self::new(&candidate.name, &candidate.extras)
    }

    pub fn as_str(&self) -> &str {
        &self.key
    }

    /// The package this identifier belongs to, whatever its extras.
    pub fn name(&self) -> &PackageName {
        &self.name
    }
}

impl Display for Identifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key)
    }
}

/// The sources to query for a requirement pinned to the index called `index`.
///
/// Falls back to every source when the requirement names no index, or an index that isn't
/// configured.
pub fn filter_sources(index: Option<&str>, sources: &[Source]) -> Vec<Source> {
    let Some(index) = index else {
        return sources.to_vec();
    };
    let filtered = sources
        .iter()
        .filter(|source| source.name == index)
        .cloned()
        .collect::<Vec<_>>();
    if filtered.is_empty() {
        sources.to_vec()
    } else {
        filtered
    }
}
