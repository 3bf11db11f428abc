use std::str::FromStr;

use tracing::warn;

use pinion_pep440::Version;
use pinion_static::EnvVars;
use pinion_types::WheelPolicy;

/// Rounds allowed per root requirement before a resolution is abandoned.
const ROUNDS_PER_REQUIREMENT: usize = 1000;

/// Options for resolving and locking a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverOptions {
    /// Consider pre-releases even when a stable version satisfies a requirement.
    pub allow_prereleases: bool,
    /// The Python version the lock targets; releases whose Requires-Python excludes it are
    /// skipped unless nothing else is left.
    pub requires_python: Option<Version>,
    /// Abort on a failure to fetch a candidate's dependencies instead of treating the candidate
    /// as dependency-free.
    pub strict: bool,
    pub ignore_local_cache: bool,
    pub ignore_json_api: bool,
    /// A fixed round limit; by default the limit scales with the number of root requirements.
    pub max_rounds: Option<usize>,
    /// Accept wheels for every platform when listing files and collecting hashes.
    pub all_wheels: bool,
    /// The platform tags to accept when `all_wheels` is off.
    pub platform_tags: Vec<String>,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            allow_prereleases: false,
            requires_python: None,
            strict: false,
            ignore_local_cache: false,
            ignore_json_api: false,
            max_rounds: None,
            all_wheels: true,
            platform_tags: Vec::new(),
        }
    }
}

impl ResolverOptions {
    /// The defaults, with the toggles in the environment applied on top.
    pub fn from_env() -> Self {
        OptionsBuilder::new().env().build()
    }

    /// The round limit for a resolution of `requirements` root requirements.
    pub fn max_rounds_for(&self, requirements: usize) -> usize {
        self.max_rounds
            .unwrap_or_else(|| ROUNDS_PER_REQUIREMENT * requirements.max(1))
    }

    pub fn wheel_policy(&self) -> WheelPolicy {
        if self.all_wheels || self.platform_tags.is_empty() {
            WheelPolicy::AllowAll
        } else {
            WheelPolicy::Compatible(self.platform_tags.clone())
        }
    }
}

/// Builder for [`ResolverOptions`].
#[derive(Debug, Default, Clone)]
pub struct OptionsBuilder {
    options: ResolverOptions,
}

impl OptionsBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn allow_prereleases(mut self, allow_prereleases: bool) -> Self {
        self.options.allow_prereleases = allow_prereleases;
        self
    }

    /// Sets the target Python version.
    #[must_use]
    pub fn requires_python(mut self, requires_python: Option<Version>) -> Self {
        self.options.requires_python = requires_python;
        self
    }

    #[must_use]
    pub fn strict(mut self, strict: bool) -> Self {
        self.options.strict = strict;
        self
    }

    #[must_use]
    pub fn ignore_local_cache(mut self, ignore_local_cache: bool) -> Self {
        self.options.ignore_local_cache = ignore_local_cache;
        self
    }

    #[must_use]
    pub fn ignore_json_api(mut self, ignore_json_api: bool) -> Self {
        self.options.ignore_json_api = ignore_json_api;
        self
    }

    #[must_use]
    pub fn max_rounds(mut self, max_rounds: Option<usize>) -> Self {
        self.options.max_rounds = max_rounds;
        self
    }

    #[must_use]
    pub fn all_wheels(mut self, all_wheels: bool) -> Self {
        self.options.all_wheels = all_wheels;
        self
    }

    #[must_use]
    pub fn platform_tags(mut self, platform_tags: Vec<String>) -> Self {
        self.options.platform_tags = platform_tags;
        self
    }

    /// Apply `PINION_IGNORE_LOCAL_CACHE`, `PINION_IGNORE_JSON_API`,
    /// `PINION_NO_SUPPRESS_EXCEPTIONS` and `PINION_MAX_ROUNDS`.
    ///
    /// The boolean toggles are on when set to any non-empty value.
    #[must_use]
    pub fn env(mut self) -> Self {
        if is_set(EnvVars::PINION_IGNORE_LOCAL_CACHE) {
            self.options.ignore_local_cache = true;
        }
        if is_set(EnvVars::PINION_IGNORE_JSON_API) {
            self.options.ignore_json_api = true;
        }
        if is_set(EnvVars::PINION_NO_SUPPRESS_EXCEPTIONS) {
            self.options.strict = true;
        }
        if let Some(value) = std::env::var_os(EnvVars::PINION_MAX_ROUNDS) {
            match value.to_str().map(usize::from_str) {
                Some(Ok(max_rounds)) => self.options.max_rounds = Some(max_rounds),
                _ => warn!(
                    "Ignoring invalid {}: {}",
                    EnvVars::PINION_MAX_ROUNDS,
                    value.to_string_lossy()
                ),
            }
        }
        self
    }

    /// Builds the options.
    pub fn build(self) -> ResolverOptions {
        self.options
    }
}

fn is_set(name: &str) -> bool {
    std::env::var_os(name).is_some_and(|value| !value.is_empty())
}
