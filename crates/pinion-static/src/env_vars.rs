/// Declares all environment variables read by `pinion` and its crates.
pub struct EnvVars;

impl EnvVars {
    /// If set, the local dependency cache is neither read nor written, forcing every lookup
    /// through the JSON API or a metadata build.
    pub const PINION_IGNORE_LOCAL_CACHE: &'static str = "PINION_IGNORE_LOCAL_CACHE";

    /// If set, dependencies are never looked up through an index's JSON API.
    pub const PINION_IGNORE_JSON_API: &'static str = "PINION_IGNORE_JSON_API";

    /// If set, failures while fetching dependencies or requires-python abort the resolution
    /// instead of being logged and treated as "no information".
    pub const PINION_NO_SUPPRESS_EXCEPTIONS: &'static str = "PINION_NO_SUPPRESS_EXCEPTIONS";

    /// The directory holding the dependency and hash caches.
    pub const PINION_CACHE_DIR: &'static str = "PINION_CACHE_DIR";

    /// Overrides the number of rounds the resolver may run before giving up.
    pub const PINION_MAX_ROUNDS: &'static str = "PINION_MAX_ROUNDS";

    /// Used to locate the default cache directory when `PINION_CACHE_DIR` is not set.
    #[doc(hidden)]
    pub const XDG_CACHE_HOME: &'static str = "XDG_CACHE_HOME";

    #[doc(hidden)]
    pub const HOME: &'static str = "HOME";

    /// Set to `0` for `git` subprocesses so they fail instead of prompting for credentials.
    #[doc(hidden)]
    pub const GIT_TERMINAL_PROMPT: &'static str = "GIT_TERMINAL_PROMPT";

    /// Set for `git` subprocesses that talk to a source with `verify_ssl = false`.
    #[doc(hidden)]
    pub const GIT_SSL_NO_VERIFY: &'static str = "GIT_SSL_NO_VERIFY";
}
