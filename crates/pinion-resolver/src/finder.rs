use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};

use rustc_hash::FxHashMap;
use tracing::{debug, instrument, trace};

use pinion_git::GitResolver;
use pinion_normalize::PackageName;
use pinion_pep440::{Version, VersionSpecifiers};
use pinion_types::{
    Candidate, IndexFile, PackageIndex, Requirement, RequirementSource, Source, WheelPolicy,
};

use crate::error::ResolveError;

/// Finds the candidates that may satisfy a requirement.
pub struct CandidateFinder<'a, Index: PackageIndex> {
    index: &'a Index,
    git: &'a GitResolver,
    policy: WheelPolicy,
    /// File listings per package and source list, fetched once per run.
    files: Mutex<FxHashMap<(PackageName, Vec<String>), Vec<IndexFile>>>,
}

impl<'a, Index: PackageIndex> CandidateFinder<'a, Index> {
    pub fn new(index: &'a Index, git: &'a GitResolver, policy: WheelPolicy) -> Self {
        Self {
            index,
            git,
            policy,
            files: Mutex::default(),
        }
    }

    /// The candidates for `requirement`, oldest version first.
    ///
    /// A requirement that doesn't name an index package is its own single candidate, with Git
    /// references locked to a commit. Index releases are filtered by `requires_python` (unless
    /// that would leave nothing) and then by the requirement's specifiers, falling back to
    /// pre-releases when no stable release matches.
    #[instrument(skip_all, fields(requirement = %requirement))]
    pub async fn find_candidates(
        &self,
        requirement: &Requirement,
        sources: &[Source],
        requires_python: Option<&Version>,
        allow_prereleases: bool,
    ) -> Result<Vec<Candidate>, ResolveError> {
        let Some(specifier) = requirement.specifier() else {
            return Ok(vec![self.locked_copy(requirement).await?]);
        };

        let files = self.files(&requirement.name, sources).await?;
        let pinned = requirement.pinned_version();
        let files = files
            .iter()
            .filter(|file| {
                if file.yanked && pinned != Some(&file.version) {
                    trace!("Skipping yanked {}", file.filename);
                    return false;
                }
                true
            })
            .collect::<Vec<_>>();

        let files = match requires_python {
            Some(python) => {
                let matching = files
                    .iter()
                    .copied()
                    .filter(|file| supports_python(file, python))
                    .collect::<Vec<_>>();
                if matching.is_empty() {
                    debug!(
                        "No release of {} supports Python {python}; ignoring Requires-Python",
                        requirement.name
                    );
                    files
                } else {
                    matching
                }
            }
            None => files,
        };

        let versions = files
            .iter()
            .map(|file| &file.version)
            .collect::<BTreeSet<_>>();
        let mut matching = filter_versions(&versions, specifier, allow_prereleases);
        if matching.is_empty() && !allow_prereleases {
            matching = filter_versions(&versions, specifier, true);
        }
        trace!(
            "Found {} matching versions of {}",
            matching.len(),
            requirement.name
        );

        let index = requirement.index().map(ToString::to_string);
        Ok(matching
            .into_iter()
            .map(|version| {
                Candidate::from_release(
                    requirement.name.clone(),
                    requirement.extras.clone(),
                    version.clone(),
                    index.clone(),
                )
            })
            .collect())
    }

    /// The requirement as a candidate of its own, with a Git reference locked to a commit.
    async fn locked_copy(&self, requirement: &Requirement) -> Result<Candidate, ResolveError> {
        let mut candidate = Candidate::from_requirement(requirement);
        if let RequirementSource::Git {
            repository,
            reference,
            precise,
            ..
        } = &mut candidate.source
        {
            if precise.is_none() {
                *precise = Some(self.git.resolve(repository, reference, true).await?);
            }
        }
        Ok(candidate)
    }

    async fn files(
        &self,
        name: &PackageName,
        sources: &[Source],
    ) -> Result<Vec<IndexFile>, ResolveError> {
        let key = (
            name.clone(),
            sources.iter().map(|source| source.name.clone()).collect(),
        );
        if let Some(files) = self
            .files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return Ok(files.clone());
        }

        let files = self.index.files(name, sources, &self.policy).await?;
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, files.clone());
        Ok(files)
    }
}

/// Whether `file` declares support for `python`.
///
/// Files without a Requires-Python support everything; files with an unparsable one support
/// nothing. A bare major version `N`, as some old releases declare, means `>=N,<N+1`.
fn supports_python(file: &IndexFile, python: &Version) -> bool {
    let Some(requires_python) = file.requires_python.as_deref().map(str::trim) else {
        return true;
    };
    if requires_python.is_empty() {
        return true;
    }
    let requires_python = match requires_python.parse::<u64>() {
        Ok(major) => format!(">={major},<{}", major + 1),
        Err(_) => requires_python.to_string(),
    };
    match VersionSpecifiers::from_str(&requires_python) {
        Ok(specifiers) => specifiers.contains(python),
        Err(err) => {
            trace!(
                "Skipping {} with invalid Requires-Python: {err}",
                file.filename
            );
            false
        }
    }
}

/// The versions that `specifier` admits, in ascending order.
///
/// Pre-releases are admitted when `allow_prereleases` is set or the specifier itself names one.
fn filter_versions<'v>(
    versions: &BTreeSet<&'v Version>,
    specifier: &VersionSpecifiers,
    allow_prereleases: bool,
) -> Vec<&'v Version> {
    let allow_prereleases = allow_prereleases || specifier.any_prerelease();
    versions
        .iter()
        .copied()
        .filter(|version| allow_prereleases || !version.any_prerelease())
        .filter(|version| specifier.contains(version))
        .collect()
}
