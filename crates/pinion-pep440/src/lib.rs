//! Python version numbers and version specifiers, following
//! [PEP 440](https://peps.python.org/pep-0440).
//!
//! Only the parts needed for locking are covered: parsing, normalised display, ordering, and
//! specifier matching including the pre-release, post-release and local-version special cases.

pub use version::{LocalSegment, Operator, PreRelease, Version, VersionParseError};
pub use version_specifier::{
    VersionSpecifier, VersionSpecifierParseError, VersionSpecifiers, VersionSpecifiersParseError,
};

mod version;
mod version_specifier;
