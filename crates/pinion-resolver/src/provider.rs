use indexmap::IndexMap;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, warn};

use pinion_normalize::PackageName;
use pinion_pep440::Version;
use pinion_types::{BuildContext, Candidate, PackageIndex, Requirement, Source};
use pinion_warnings::{warn_user, warn_user_once};

use crate::Identifier;
use crate::dependencies::{Dependencies, DependencyFetcher};
use crate::error::ResolveError;
use crate::finder::CandidateFinder;
use crate::identifier::filter_sources;
use crate::metadata::{DependencyTable, RequiresPythonTable};
use crate::options::ResolverOptions;
use crate::resolver::{Provider, RequirementInformation};

/// Packages that are never locked as a dependency of another package.
///
/// They can still be locked when listed in the manifest.
const PROTECTED_PACKAGES: &[&str] = &["pip", "setuptools"];

/// The order in which unsatisfied identifiers are pinned; smaller goes first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Preference {
    /// An identifier being upgraded, pinned before anything that might reuse an old pin.
    Upgrade,
    /// Any other identifier, ranked by how many candidates are left.
    Remaining(usize),
}

/// How a previous lock influences the resolution.
#[derive(Debug, Clone, Default)]
pub enum ProviderPolicy {
    /// Ignore any previous lock.
    #[default]
    Basic,
    /// Prefer the candidates of a previous lock wherever they still satisfy the requirements.
    PinReuse {
        preferred_pins: FxHashMap<Identifier, Candidate>,
    },
    /// Prefer previous pins, except for the tracked packages and everything they depend on,
    /// which are resolved afresh.
    ///
    /// Tracking is by package name, so a tracked package is released under all of its extras.
    EagerUpgrade {
        preferred_pins: FxHashMap<Identifier, Candidate>,
        tracked: FxHashSet<PackageName>,
    },
}

impl ProviderPolicy {
    pub fn pin_reuse(preferred_pins: FxHashMap<Identifier, Candidate>) -> Self {
        Self::PinReuse { preferred_pins }
    }

    /// Release the pins of `tracked` and mark every remaining pin as carried over.
    pub fn eager_upgrade(
        mut preferred_pins: FxHashMap<Identifier, Candidate>,
        tracked: impl IntoIterator<Item = PackageName>,
    ) -> Self {
        let tracked = tracked.into_iter().collect::<FxHashSet<_>>();
        preferred_pins.retain(|identifier, _| !tracked.contains(identifier.name()));
        for pin in preferred_pins.values_mut() {
            pin.preferred = true;
        }
        Self::EagerUpgrade {
            preferred_pins,
            tracked,
        }
    }

    fn preferred_pin(&self, identifier: &Identifier) -> Option<&Candidate> {
        match self {
            Self::Basic => None,
            Self::PinReuse { preferred_pins } | Self::EagerUpgrade { preferred_pins, .. } => {
                preferred_pins.get(identifier)
            }
        }
    }

    fn is_tracked(&self, identifier: &Identifier) -> bool {
        match self {
            Self::EagerUpgrade { tracked, .. } => tracked.contains(identifier.name()),
            Self::Basic | Self::PinReuse { .. } => false,
        }
    }

    /// Start tracking the dependencies of a tracked package, dropping their pins.
    fn track_dependencies(&mut self, parent: &Identifier, dependencies: &[Requirement]) {
        let Self::EagerUpgrade {
            preferred_pins,
            tracked,
        } = self
        else {
            return;
        };
        if !tracked.contains(parent.name()) {
            return;
        }
        for dependency in dependencies {
            preferred_pins.retain(|identifier, _| {
                if *identifier.name() == dependency.name {
                    debug!("Releasing the pin of {identifier} for upgrade");
                    false
                } else {
                    true
                }
            });
            tracked.insert(dependency.name.clone());
        }
    }
}

/// Supplies the resolver with index candidates and their dependencies.
///
/// Every dependency list handed out is recorded, keyed by the identifier of the candidate it
/// belongs to, so markers can be computed once the resolution is done.
pub struct PinionProvider<'a, Index: PackageIndex, Build: BuildContext> {
    finder: CandidateFinder<'a, Index>,
    fetcher: DependencyFetcher<'a, Index, Build>,
    sources: Vec<Source>,
    requires_python: Option<Version>,
    allow_prereleases: bool,
    strict: bool,
    policy: ProviderPolicy,
    /// Candidates whose version cannot be compared, by their rendered line.
    invalid_candidates: FxHashSet<String>,
    fetched_dependencies: DependencyTable,
    requires_pythons: RequiresPythonTable,
}

impl<'a, Index: PackageIndex, Build: BuildContext> PinionProvider<'a, Index, Build> {
    pub fn new(
        finder: CandidateFinder<'a, Index>,
        fetcher: DependencyFetcher<'a, Index, Build>,
        root: &[Requirement],
        sources: Vec<Source>,
        options: &ResolverOptions,
        policy: ProviderPolicy,
    ) -> Self {
        let mut fetched_dependencies = DependencyTable::default();
        fetched_dependencies.insert(None, by_identifier(root));
        let mut requires_pythons = RequiresPythonTable::default();
        requires_pythons.insert(None, String::new());

        Self {
            finder,
            fetcher,
            sources,
            requires_python: options.requires_python.clone(),
            allow_prereleases: options.allow_prereleases,
            strict: options.strict,
            policy,
            invalid_candidates: FxHashSet::default(),
            fetched_dependencies,
            requires_pythons,
        }
    }

    /// The dependency lists and Requires-Python values recorded during the resolution.
    pub fn into_tables(self) -> (DependencyTable, RequiresPythonTable) {
        (self.fetched_dependencies, self.requires_pythons)
    }

    pub fn policy(&self) -> &ProviderPolicy {
        &self.policy
    }
}

impl<Index: PackageIndex, Build: BuildContext> Provider for PinionProvider<'_, Index, Build> {
    type Requirement = Requirement;
    type Candidate = Candidate;
    type Identifier = Identifier;
    type Preference = Preference;
    type Error = ResolveError;

    fn identify_requirement(&self, requirement: &Requirement) -> Identifier {
        Identifier::from_requirement(requirement)
    }

    fn identify_candidate(&self, candidate: &Candidate) -> Identifier {
        Identifier::from_candidate(candidate)
    }

    fn get_preference(
        &self,
        identifier: &Identifier,
        _resolution: Option<&Candidate>,
        candidates: &[Candidate],
        _information: &[RequirementInformation<Requirement, Candidate>],
    ) -> Preference {
        if self.policy.is_tracked(identifier) {
            Preference::Upgrade
        } else {
            Preference::Remaining(candidates.len())
        }
    }

    async fn find_matches(
        &mut self,
        requirement: &Requirement,
    ) -> Result<Vec<Candidate>, ResolveError> {
        let sources = filter_sources(requirement.index(), &self.sources);
        let mut candidates = self
            .finder
            .find_candidates(
                requirement,
                &sources,
                self.requires_python.as_ref(),
                self.allow_prereleases,
            )
            .await?;

        // The resolver tries candidates from the back, so a reused pin goes last.
        let identifier = Identifier::from_requirement(requirement);
        if let Some(pin) = self.policy.preferred_pin(&identifier).cloned()
            && self.is_satisfied_by(requirement, &pin)
        {
            candidates.push(pin);
        }
        Ok(candidates)
    }

    fn is_satisfied_by(&mut self, requirement: &Requirement, candidate: &Candidate) -> bool {
        if candidate.preferred
            && self
                .policy
                .is_tracked(&Identifier::from_requirement(requirement))
        {
            return false;
        }

        // Direct references have exactly one candidate: themselves.
        let Some(specifier) = requirement.specifier() else {
            return true;
        };
        if !candidate.is_named() || specifier.is_empty() {
            return true;
        }

        let Some(version) = &candidate.version else {
            let line = candidate.to_string();
            if self.invalid_candidates.insert(line.clone()) {
                warn_user_once!("Ignoring invalid version from {line}");
            }
            return false;
        };
        specifier.contains(version)
    }

    async fn get_dependencies(
        &mut self,
        candidate: &Candidate,
    ) -> Result<Vec<Requirement>, ResolveError> {
        let identifier = Identifier::from_candidate(candidate);
        let sources = filter_sources(candidate.index(), &self.sources);

        let Dependencies {
            requirements,
            requires_python,
        } = match self
            .fetcher
            .get_dependencies(&candidate.as_requirement(), &sources)
            .await
        {
            Ok(dependencies) => dependencies,
            Err(err) if !self.strict => {
                warn!("Failed to get dependencies for {candidate}: {err}");
                warn_user!("Failed to get dependencies for {candidate}: {err}");
                Dependencies::default()
            }
            Err(err) => return Err(err),
        };

        let mut requirements = requirements
            .into_iter()
            .filter(|requirement| !PROTECTED_PACKAGES.contains(&requirement.name.as_str()))
            .collect::<Vec<_>>();
        // Ties every extra-bearing identifier to the bare package, so they share a version.
        if !candidate.extras.is_empty() {
            requirements.push(candidate.strip_extras().as_requirement());
        }

        self.fetched_dependencies
            .insert(Some(identifier.clone()), by_identifier(&requirements));
        self.requires_pythons
            .insert(Some(identifier.clone()), requires_python);
        self.policy.track_dependencies(&identifier, &requirements);

        Ok(requirements)
    }
}

fn by_identifier(requirements: &[Requirement]) -> IndexMap<Identifier, Requirement> {
    requirements
        .iter()
        .map(|requirement| (Identifier::from_requirement(requirement), requirement.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use pinion_normalize::{ExtraName, PackageName};

    use super::*;

    fn pin(name: &str, version: &str) -> (Identifier, Candidate) {
        let name = PackageName::from_str(name).unwrap();
        let candidate = Candidate::from_release(
            name.clone(),
            Vec::new(),
            Version::from_str(version).unwrap(),
            None,
        );
        (Identifier::new(&name, &[]), candidate)
    }

    fn name(name: &str) -> PackageName {
        PackageName::from_str(name).unwrap()
    }

    fn identifier(package: &str) -> Identifier {
        Identifier::new(&name(package), &[])
    }

    fn with_extra(package: &str, extra: &str) -> Identifier {
        Identifier::new(&name(package), &[ExtraName::from_str(extra).unwrap()])
    }

    #[test]
    fn upgrades_are_pinned_first() {
        assert!(Preference::Upgrade < Preference::Remaining(0));
        assert!(Preference::Remaining(1) < Preference::Remaining(2));
    }

    #[test]
    fn eager_upgrade_releases_tracked_pins() {
        let pins = [pin("requests", "2.20.0"), pin("urllib3", "1.24.0")]
            .into_iter()
            .collect();
        let policy = ProviderPolicy::eager_upgrade(pins, [name("requests")]);

        assert!(policy.preferred_pin(&identifier("requests")).is_none());
        let urllib3 = policy.preferred_pin(&identifier("urllib3")).unwrap();
        assert!(urllib3.preferred);
        assert!(policy.is_tracked(&identifier("requests")));
        assert!(!policy.is_tracked(&identifier("urllib3")));
    }

    #[test]
    fn eager_upgrade_releases_pins_under_every_extra() {
        let (_, requests) = pin("requests", "2.20.0");
        let (_, socks) = pin("pysocks", "1.0");
        let pins = [
            (identifier("requests"), requests.clone()),
            (with_extra("requests", "socks"), requests),
            (with_extra("pysocks", "win"), socks),
        ]
        .into_iter()
        .collect();
        let mut policy = ProviderPolicy::eager_upgrade(pins, [name("requests")]);

        assert!(policy.preferred_pin(&identifier("requests")).is_none());
        assert!(policy.preferred_pin(&with_extra("requests", "socks")).is_none());
        assert!(policy.is_tracked(&with_extra("requests", "security")));

        let dependencies = [Requirement::from_str("pysocks>=1.0").unwrap()];
        policy.track_dependencies(&with_extra("requests", "socks"), &dependencies);
        assert!(policy.preferred_pin(&with_extra("pysocks", "win")).is_none());
        assert!(policy.is_tracked(&with_extra("pysocks", "win")));
    }

    #[test]
    fn tracking_spreads_to_dependencies() {
        let pins = [pin("requests", "2.20.0"), pin("urllib3", "1.24.0"), pin("six", "1.0")]
            .into_iter()
            .collect();
        let mut policy = ProviderPolicy::eager_upgrade(pins, [name("requests")]);

        let dependencies = [Requirement::from_str("urllib3>=1.21").unwrap()];
        policy.track_dependencies(&identifier("six"), &dependencies);
        assert!(!policy.is_tracked(&identifier("urllib3")));

        policy.track_dependencies(&identifier("requests"), &dependencies);
        assert!(policy.is_tracked(&identifier("urllib3")));
        assert!(policy.preferred_pin(&identifier("urllib3")).is_none());
        assert!(policy.preferred_pin(&identifier("six")).is_some());
    }

    #[test]
    fn pin_reuse_keeps_pins_unmarked() {
        let pins = [pin("requests", "2.20.0")].into_iter().collect();
        let policy = ProviderPolicy::pin_reuse(pins);
        let requests = policy.preferred_pin(&identifier("requests")).unwrap();
        assert!(!requests.preferred);
        assert!(!policy.is_tracked(&identifier("requests")));
    }
}
