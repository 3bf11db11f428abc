pub use crate::reference::GitReference;
pub use crate::resolver::{GitResolver, GitResolverError, RepositoryReference};
pub use crate::sha::{GitSha, ShaParseError};

mod reference;
mod resolver;
mod sha;
