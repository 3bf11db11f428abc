use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::Arc;

use indexmap::IndexMap;
use itertools::Itertools;
use rustc_hash::FxHashSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use pinion_cache::{Cache, DependencyCache, HashCache, RequiresPythonCache};
use pinion_git::GitResolver;
use pinion_normalize::PackageName;
use pinion_pep440::Version;
use pinion_types::{BuildContext, Candidate, PackageIndex, Requirement};

use crate::Identifier;
use crate::dependencies::{DependencyFetcher, FetchOptions};
use crate::error::LockError;
use crate::finder::CandidateFinder;
use crate::hashes::HashFetcher;
use crate::identifier::filter_sources;
use crate::lock::{Lock, LockedPackage};
use crate::manifest::Manifest;
use crate::metadata::set_metadata;
use crate::options::ResolverOptions;
use crate::provider::{PinionProvider, ProviderPolicy};
use crate::resolver::{Reporter, Resolver, TracingReporter};
use crate::trace::{Traces, trace_graph};

/// How an existing lock shapes a new one.
#[derive(Debug, Clone, Default)]
pub enum LockMode {
    /// Resolve from scratch.
    #[default]
    Basic,
    /// Keep the pins of an existing lock wherever they still fit, for example after adding or
    /// removing a package.
    PinReuse(Lock),
    /// Keep the pins of an existing lock except for `tracked` and their dependencies, which are
    /// upgraded.
    EagerUpgrade {
        lock: Lock,
        tracked: Vec<PackageName>,
    },
}

/// Progress hooks for a whole lock run, on top of those of the resolution.
pub trait LockReporter: Reporter<Identifier, Candidate> {
    /// Called before the resolution starts.
    fn lock_starting(&self, _requirements: &[Requirement]) {}

    /// Called once the routes to every resolved package are known.
    fn lock_trace_ended(
        &self,
        _mapping: &IndexMap<Identifier, Candidate>,
        _traces: &Traces<Identifier>,
    ) {
    }

    /// Called when no lock can be produced.
    fn lock_failed(&self, _err: &LockError) {}
}

impl LockReporter for TracingReporter<Identifier, Candidate> {
    fn lock_starting(&self, requirements: &[Requirement]) {
        debug!(
            "Locking {} requirements: {}",
            requirements.len(),
            requirements.iter().join(", ")
        );
    }

    fn lock_trace_ended(
        &self,
        mapping: &IndexMap<Identifier, Candidate>,
        traces: &Traces<Identifier>,
    ) {
        for (identifier, candidate) in mapping {
            let routes = traces
                .get(&Some(identifier.clone()))
                .map(|routes| {
                    routes
                        .iter()
                        .map(|route| route.iter().flatten().join(" -> "))
                        .join("; ")
                })
                .unwrap_or_default();
            debug!("{candidate} required by: {routes}");
        }
    }

    fn lock_failed(&self, err: &LockError) {
        warn!("Locking failed: {err}");
    }
}

/// Turns a manifest into a lock document.
///
/// The pipeline is the same for every [`LockMode`]: resolve the merged default and develop
/// requirements, trace every package back to the root requirements, collect hashes, compute
/// markers and split the packages into the default and develop sections.
pub struct Locker<'a, Index: PackageIndex, Build: BuildContext> {
    index: &'a Index,
    build: &'a Build,
    git: &'a GitResolver,
    cache: &'a Cache,
    options: ResolverOptions,
    reporter: Arc<dyn LockReporter>,
    cancellation: CancellationToken,
}

impl<'a, Index: PackageIndex, Build: BuildContext> Locker<'a, Index, Build> {
    pub fn new(
        index: &'a Index,
        build: &'a Build,
        git: &'a GitResolver,
        cache: &'a Cache,
        options: ResolverOptions,
    ) -> Self {
        Self {
            index,
            build,
            git,
            cache,
            options,
            reporter: Arc::new(TracingReporter::default()),
            cancellation: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_reporter(self, reporter: Arc<dyn LockReporter>) -> Self {
        Self { reporter, ..self }
    }

    #[must_use]
    pub fn with_cancellation(self, cancellation: CancellationToken) -> Self {
        Self {
            cancellation,
            ..self
        }
    }

    /// Lock `manifest`. Nothing is returned unless every step succeeds.
    #[instrument(skip_all)]
    pub async fn lock(&self, manifest: &Manifest, mode: LockMode) -> Result<Lock, LockError> {
        match self.lock_inner(manifest, mode).await {
            Ok(lock) => Ok(lock),
            Err(err) => {
                self.reporter.lock_failed(&err);
                Err(err)
            }
        }
    }

    async fn lock_inner(&self, manifest: &Manifest, mode: LockMode) -> Result<Lock, LockError> {
        let default = manifest.default_requirements()?;
        let develop = manifest.develop_requirements()?;

        // Default entries win over develop entries for the same identifier.
        let mut merged = develop.clone();
        merged.extend(default.clone());
        let requirements = merged.into_values().collect::<Vec<_>>();

        let mut options = self.options.clone();
        options.allow_prereleases |= manifest.settings.allow_prereleases;
        if options.requires_python.is_none() {
            options.requires_python = manifest.python_version();
        }

        let policy = match mode {
            LockMode::Basic => ProviderPolicy::Basic,
            LockMode::PinReuse(lock) => ProviderPolicy::pin_reuse(lock.preferred_pins()?),
            LockMode::EagerUpgrade { lock, tracked } => {
                ProviderPolicy::eager_upgrade(lock.preferred_pins()?, tracked)
            }
        };

        let python = cache_python_key(options.requires_python.as_ref());
        let dependency_cache = DependencyCache::open(self.cache, &python);
        let requires_python_cache = RequiresPythonCache::open(self.cache, &python);
        let hash_cache = HashCache::open(self.cache);

        let finder = CandidateFinder::new(self.index, self.git, options.wheel_policy());
        let fetcher = DependencyFetcher::new(
            self.index,
            self.build,
            &dependency_cache,
            &requires_python_cache,
            FetchOptions {
                ignore_local_cache: options.ignore_local_cache,
                ignore_json_api: options.ignore_json_api,
            },
        );
        let provider = PinionProvider::new(
            finder,
            fetcher,
            &requirements,
            manifest.sources.clone(),
            &options,
            policy,
        );

        self.reporter.lock_starting(&requirements);
        let max_rounds = options.max_rounds_for(requirements.len());
        let mut resolver = Resolver::new(provider)
            .with_reporter(self.reporter.clone())
            .with_cancellation(self.cancellation.clone());
        let resolution = resolver.resolve(requirements, max_rounds).await?;

        let traces = trace_graph(&resolution.graph);
        let mut mapping = resolution.mapping;
        self.reporter.lock_trace_ended(&mapping, &traces);

        let hashes = HashFetcher::new(self.index, &hash_cache, options.wheel_policy());
        for (identifier, candidate) in &mut mapping {
            if !candidate.hashes.is_empty() {
                continue;
            }
            let sources = filter_sources(candidate.index(), &manifest.sources);
            candidate.hashes = hashes
                .get_hashes(candidate, &sources)
                .await
                .map_err(|err| LockError::Hashes {
                    identifier: identifier.clone(),
                    err,
                })?;
        }

        let (dependencies, pythons) = resolver.into_provider().into_tables();
        set_metadata(&mut mapping, &traces, &dependencies, &pythons);

        let mut lock = Lock::with_meta_from(manifest)?;
        lock.default = collect_derived_entries(&mapping, &traces, default.keys());
        lock.develop = collect_derived_entries(&mapping, &traces, develop.keys());
        lock.develop
            .retain(|name, _| !lock.default.contains_key(name));
        debug!(
            "Locked {} default and {} develop packages",
            lock.default.len(),
            lock.develop.len()
        );
        Ok(lock)
    }
}

/// The lock entries of every package that is, or is needed by, one of `roots`.
///
/// Packages are keyed by name. Identifiers of the same package with different extras share an
/// entry whose extras are the union of theirs.
pub fn collect_derived_entries<'i>(
    mapping: &IndexMap<Identifier, Candidate>,
    traces: &Traces<Identifier>,
    roots: impl IntoIterator<Item = &'i Identifier>,
) -> BTreeMap<PackageName, LockedPackage> {
    let roots = roots.into_iter().collect::<FxHashSet<_>>();
    let mut entries = BTreeMap::new();
    if roots.is_empty() {
        return entries;
    }

    for (identifier, candidate) in mapping {
        let reached = roots.contains(identifier)
            || traces
                .get(&Some(identifier.clone()))
                .into_iter()
                .flatten()
                .filter_map(|route| route.get(1).and_then(Option::as_ref))
                .any(|route| roots.contains(route));
        if !reached {
            continue;
        }

        let entry = LockedPackage::from_candidate(candidate);
        match entries.entry(candidate.name.clone()) {
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
            }
            Entry::Occupied(mut occupied) => {
                let mut extras = std::mem::take(&mut occupied.get_mut().extras);
                extras.extend(entry.extras.iter().cloned());
                occupied.insert(LockedPackage { extras, ..entry });
            }
        }
    }
    entries
}

/// The Python version the dependency caches are keyed by, e.g. `3.8`.
fn cache_python_key(python: Option<&Version>) -> String {
    match python {
        Some(version) => version.release().iter().take(2).join("."),
        None => "any".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;
    use crate::resolver::ResolutionGraph;

    fn identifier(requirement: &str) -> Identifier {
        Identifier::from_requirement(&Requirement::from_str(requirement).unwrap())
    }

    fn candidate(line: &str) -> Candidate {
        Candidate::from_requirement(&Requirement::from_str(line).unwrap())
    }

    #[test]
    fn python_cache_keys() {
        let python = Version::from_str("3.8.10").unwrap();
        assert_eq!(cache_python_key(Some(&python)), "3.8");
        assert_eq!(cache_python_key(None), "any");
    }

    #[test]
    fn derived_entries() {
        // default: a -> b, requests[socks] -> requests
        // develop: pytest -> b
        let mut graph = ResolutionGraph::default();
        for (parent, child) in [
            (None, "a"),
            (Some("a"), "b"),
            (None, "requests[socks]"),
            (Some("requests[socks]"), "requests"),
            (None, "pytest"),
            (Some("pytest"), "b"),
        ] {
            graph.connect(parent.map(identifier), Some(identifier(child)));
        }
        let traces = trace_graph(&graph);

        let mapping = [
            "a==1.0",
            "b==2.0",
            "requests[socks]==2.31.0",
            "requests==2.31.0",
            "pytest==8.0",
        ]
        .into_iter()
        .map(|line| {
            let candidate = candidate(line);
            (Identifier::from_candidate(&candidate), candidate)
        })
        .collect::<IndexMap<_, _>>();

        let default = [identifier("a"), identifier("requests[socks]")];
        let entries = collect_derived_entries(&mapping, &traces, &default);
        assert_eq!(
            entries.keys().map(PackageName::as_str).collect::<Vec<_>>(),
            ["a", "b", "requests"]
        );
        let requests = &entries[&PackageName::from_str("requests").unwrap()];
        assert_eq!(requests.version.as_deref(), Some("==2.31.0"));
        assert_eq!(requests.extras.iter().collect::<Vec<_>>(), ["socks"]);

        let develop = [identifier("pytest")];
        let entries = collect_derived_entries(&mapping, &traces, &develop);
        assert_eq!(
            entries.keys().map(PackageName::as_str).collect::<Vec<_>>(),
            ["b", "pytest"]
        );

        assert!(collect_derived_entries(&mapping, &traces, std::iter::empty()).is_empty());
    }
}
