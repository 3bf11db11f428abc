//! Fetching the dependencies of a candidate.
//!
//! Three strategies are tried in order: the local dependency cache, the index's JSON API and a
//! metadata build. Results of the latter two are written back to the cache when the candidate is
//! pinned to an exact version.

use std::io;
use std::path::Path;
use std::str::FromStr;

use tracing::{debug, instrument, trace, warn};

use pinion_cache::{CacheKey, DependencyCache, RequiresPythonCache};
use pinion_pep440::VersionSpecifiers;
use pinion_pypi_types::Metadata;
use pinion_types::{BuildContext, PackageIndex, Requirement, Source};
use pinion_warnings::warn_user;

use crate::error::ResolveError;
use crate::markers::{contained_extras, contains_extra, without_extra};

/// The run-time requirements of a candidate, and its Requires-Python (empty if undeclared).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dependencies {
    pub requirements: Vec<Requirement>,
    pub requires_python: String,
}

/// Which strategies [`DependencyFetcher`] skips.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchOptions {
    pub ignore_local_cache: bool,
    pub ignore_json_api: bool,
}

pub struct DependencyFetcher<'a, Index: PackageIndex, Build: BuildContext> {
    index: &'a Index,
    build: &'a Build,
    dependency_cache: &'a DependencyCache,
    requires_python_cache: &'a RequiresPythonCache,
    options: FetchOptions,
}

impl<'a, Index: PackageIndex, Build: BuildContext> DependencyFetcher<'a, Index, Build> {
    pub fn new(
        index: &'a Index,
        build: &'a Build,
        dependency_cache: &'a DependencyCache,
        requires_python_cache: &'a RequiresPythonCache,
        options: FetchOptions,
    ) -> Self {
        Self {
            index,
            build,
            dependency_cache,
            requires_python_cache,
            options,
        }
    }

    /// The dependencies of the distribution `requirement` selects.
    ///
    /// A failing build is the only error that surfaces; cache and JSON API problems fall through
    /// to the next strategy.
    #[instrument(skip_all, fields(requirement = %requirement))]
    pub async fn get_dependencies(
        &self,
        requirement: &Requirement,
        sources: &[Source],
    ) -> Result<Dependencies, ResolveError> {
        let key = cache_key(requirement);

        if let Some(key) = &key
            && let Some(dependencies) = self.from_cache(requirement, key)
        {
            trace!("Using cached dependencies of {requirement}");
            return Ok(dependencies);
        }

        let dependencies = match self.from_json(requirement, sources).await {
            Some(dependencies) => dependencies,
            None => self.from_build(requirement, sources).await?,
        };

        if let Some(key) = &key {
            self.store(key, &dependencies);
        }
        Ok(dependencies)
    }

    /// Read the cached entry for `key`, dropping it if it is inconsistent.
    fn from_cache(&self, requirement: &Requirement, key: &CacheKey) -> Option<Dependencies> {
        if self.options.ignore_local_cache || requirement.is_editable() {
            return None;
        }
        let lines = self.dependency_cache.get(key)?;
        let requires_python = self.requires_python_cache.get(key)?;

        if let Some(dependencies) = parse_cached(requirement, &lines, requires_python) {
            return Some(dependencies);
        }

        warn!("Dropping broken cache entry for {key}");
        warn_user!("Dropping broken cache for {}", requirement.name);
        for result in [
            self.dependency_cache.remove(key),
            self.requires_python_cache.remove(key),
        ] {
            if let Err(err) = result {
                warn!("Failed to remove cache entry for {key}: {err}");
            }
        }
        None
    }

    /// Ask each index's JSON API, stopping at the first that knows the requirement lines.
    ///
    /// Only pinned requirements without extras are looked up. Lines that depend on an extra are
    /// dropped, since the API does not say which extras they belong to.
    async fn from_json(
        &self,
        requirement: &Requirement,
        sources: &[Source],
    ) -> Option<Dependencies> {
        if self.options.ignore_json_api || !requirement.extras.is_empty() {
            return None;
        }
        let version = requirement.pinned_version()?;

        for source in sources.iter().filter(|source| has_simple_api(source)) {
            let json = match self
                .index
                .package_json(source, &requirement.name, version)
                .await
            {
                Ok(Some(json)) => json,
                Ok(None) => {
                    trace!("No JSON metadata for {requirement} on {}", source.name);
                    continue;
                }
                Err(err) => {
                    warn!("Unable to read dependencies via {} ({err})", source.url);
                    continue;
                }
            };

            // `null` means either no requirements or unknown ones; only a build can tell.
            let Some(lines) = json.info.requirement_lines() else {
                continue;
            };
            let requirements = match lines
                .iter()
                .map(|line| Requirement::from_str(line))
                .collect::<Result<Vec<_>, _>>()
            {
                Ok(requirements) => requirements,
                Err(err) => {
                    warn!("Unable to read dependencies via {} ({err})", source.url);
                    continue;
                }
            };

            debug!("Read dependencies of {requirement} from the JSON API of {}", source.name);
            return Some(Dependencies {
                requirements: requirements
                    .into_iter()
                    .filter(|requirement| !contains_extra(requirement.marker.as_ref()))
                    .collect(),
                requires_python: json
                    .info
                    .requires_python()
                    .unwrap_or_default()
                    .to_string(),
            });
        }
        None
    }

    /// Build the distribution's metadata, falling back to a partial build's `egg-info`.
    async fn from_build(
        &self,
        requirement: &Requirement,
        sources: &[Source],
    ) -> Result<Dependencies, ResolveError> {
        let metadata = match self.build.metadata(requirement, sources).await {
            Ok(dist_info) => read_dist_info(&dist_info).await?,
            Err(err) => {
                let Some(egg_info) = err.source_tree.as_deref().and_then(pinion_fs::find_egg_info)
                else {
                    return Err(err.into());
                };
                debug!(
                    "Build of {requirement} failed; reading {} instead",
                    egg_info.display()
                );
                read_egg_info(&egg_info).await?
            }
        };

        Ok(Dependencies {
            requirements: read_requirements(&metadata, requirement)?,
            requires_python: metadata.requires_python.unwrap_or_default(),
        })
    }

    fn store(&self, key: &CacheKey, dependencies: &Dependencies) {
        let lines = dependencies
            .requirements
            .iter()
            .map(ToString::to_string)
            .collect();
        let result = self
            .dependency_cache
            .insert(key, lines)
            .and_then(|()| {
                self.requires_python_cache
                    .insert(key, dependencies.requires_python.clone())
            });
        if let Err(err) = result {
            warn!("Failed to cache dependencies of {key}: {err}");
        }
    }
}

/// The cache key of a requirement pinned to an exact, non-editable version.
fn cache_key(requirement: &Requirement) -> Option<CacheKey> {
    if requirement.is_editable() {
        return None;
    }
    let version = requirement.pinned_version()?;
    Some(CacheKey::new(&requirement.name, version, &requirement.extras))
}

/// Parse a cache entry, or return `None` if it cannot be trusted.
///
/// An entry is broken if its Requires-Python doesn't parse, a line doesn't parse, a line still
/// carries an `extra` marker or a line depends on the package itself.
fn parse_cached(
    requirement: &Requirement,
    lines: &[String],
    requires_python: String,
) -> Option<Dependencies> {
    if !requires_python.trim().is_empty() && VersionSpecifiers::from_str(&requires_python).is_err()
    {
        return None;
    }
    let mut requirements = Vec::with_capacity(lines.len());
    for line in lines {
        let dependency = Requirement::from_str(line).ok()?;
        if contains_extra(dependency.marker.as_ref()) || dependency.name == requirement.name {
            return None;
        }
        requirements.push(dependency);
    }
    Some(Dependencies {
        requirements,
        requires_python,
    })
}

/// Whether `source` serves the simple API under a `/simple` path, next to which the JSON API
/// lives.
fn has_simple_api(source: &Source) -> bool {
    source.url.path().trim_end_matches('/').ends_with("/simple")
}

/// The requirements of `metadata` that apply to the extras `requirement` asks for.
///
/// Requirements scoped to other extras are dropped; the `extra` clause is removed from the rest.
fn read_requirements(
    metadata: &Metadata,
    requirement: &Requirement,
) -> Result<Vec<Requirement>, ResolveError> {
    let mut requirements = Vec::with_capacity(metadata.requires_dist.len());
    for dependency in &metadata.requires_dist {
        let dependency = Requirement::from_pep508(dependency.clone())?;
        let contained = contained_extras(dependency.marker.as_ref());
        if !contained.is_empty()
            && !requirement
                .extras
                .iter()
                .any(|extra| contained.contains(extra))
        {
            continue;
        }
        let marker = without_extra(dependency.marker.as_ref());
        requirements.push(dependency.with_marker(marker));
    }
    Ok(requirements)
}

async fn read_dist_info(dist_info: &Path) -> Result<Metadata, ResolveError> {
    let path = dist_info.join("METADATA");
    let content = read(&path).await?;
    Metadata::parse(&content).map_err(|err| ResolveError::Metadata { path, err })
}

async fn read_egg_info(egg_info: &Path) -> Result<Metadata, ResolveError> {
    let path = egg_info.join("PKG-INFO");
    let pkg_info = read(&path).await?;
    let requires_txt = match fs_err::tokio::read(egg_info.join("requires.txt")).await {
        Ok(content) => Some(content),
        Err(err) if err.kind() == io::ErrorKind::NotFound => None,
        Err(err) => {
            return Err(ResolveError::Io {
                path: egg_info.join("requires.txt"),
                err,
            });
        }
    };
    Metadata::parse_egg_info(&pkg_info, requires_txt.as_deref())
        .map_err(|err| ResolveError::Metadata { path, err })
}

async fn read(path: &Path) -> Result<Vec<u8>, ResolveError> {
    fs_err::tokio::read(path)
        .await
        .map_err(|err| ResolveError::Io {
            path: path.to_path_buf(),
            err,
        })
}
