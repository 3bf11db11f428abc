pub use api::{PackageInfo, PackageJson};
pub use hash::{HashAlgorithm, HashDigest, HashParseError};
pub use metadata::{Metadata, MetadataError, RequiresTxt};
pub use simple_json::{File, Hashes, SimpleJson, Yanked};

mod api;
mod hash;
mod metadata;
mod simple_json;
