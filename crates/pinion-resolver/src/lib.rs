pub use dependencies::{Dependencies, DependencyFetcher, FetchOptions};
pub use error::{LockError, ManifestError, ResolveError};
pub use finder::CandidateFinder;
pub use hashes::HashFetcher;
pub use identifier::{Identifier, filter_sources};
pub use lock::{Lock, LockMeta, LockedPackage};
pub use locker::{LockMode, LockReporter, Locker, collect_derived_entries};
pub use manifest::{Manifest, PackageEntry, PackageTable, Requires, Settings};
pub use metadata::{DependencyTable, MetaSet, RequiresPythonTable, format_metasets, set_metadata};
pub use options::{OptionsBuilder, ResolverOptions};
pub use provider::{PinionProvider, Preference, ProviderPolicy};
pub use resolver::{
    Criterion, Provider, Reporter, RequirementInformation, Resolution, ResolutionError,
    ResolutionGraph, Resolver, TracingReporter,
};
pub use trace::{Route, Traces, trace_graph};

pub mod markers;
pub mod specifiers;

mod dependencies;
mod error;
mod finder;
mod hashes;
mod identifier;
mod lock;
mod locker;
mod manifest;
mod metadata;
mod options;
mod provider;
mod resolver;
mod trace;
