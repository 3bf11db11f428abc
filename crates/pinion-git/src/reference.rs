use std::fmt::Display;

use crate::GitSha;

/// A Git reference as written after `@` in a VCS URL, or in a `ref` field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GitReference {
    /// A branch or tag name; which one is only known once the remote is asked.
    BranchOrTag(String),
    /// A full commit hash, used as-is.
    FullCommit(String),
    /// An abbreviated commit hash.
    ShortCommit(String),
    /// The remote's `HEAD`.
    DefaultBranch,
}

impl GitReference {
    /// Classify a revision string; `None` or an empty string means the default branch.
    pub fn from_rev(rev: Option<&str>) -> Self {
        match rev.map(str::trim) {
            None | Some("") => Self::DefaultBranch,
            Some(rev) if GitSha::is_full_sha(rev) => Self::FullCommit(rev.to_ascii_lowercase()),
            Some(rev)
                if rev.len() >= 7
                    && rev.len() < 40
                    && rev
                        .bytes()
                        .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)) =>
            {
                Self::ShortCommit(rev.to_string())
            }
            Some(rev) => Self::BranchOrTag(rev.to_string()),
        }
    }

    /// The revision as it would be written in a URL, or `HEAD`.
    pub fn as_rev(&self) -> &str {
        match self {
            Self::BranchOrTag(rev) | Self::FullCommit(rev) | Self::ShortCommit(rev) => rev,
            Self::DefaultBranch => "HEAD",
        }
    }

    /// The refspecs to ask `git ls-remote` for, if the reference can be resolved that way.
    ///
    /// Tags are queried together with their peeled form (`refs/tags/<tag>^{}`), which points at
    /// the commit rather than the annotated tag object.
    pub(crate) fn refspecs(&self) -> Option<Vec<String>> {
        match self {
            Self::BranchOrTag(name) => Some(vec![
                format!("refs/heads/{name}"),
                format!("refs/tags/{name}"),
                format!("refs/tags/{name}^{{}}"),
            ]),
            Self::DefaultBranch => Some(vec!["HEAD".to_string()]),
            Self::FullCommit(_) | Self::ShortCommit(_) => None,
        }
    }
}

impl Display for GitReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_rev())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify() {
        assert_eq!(GitReference::from_rev(None), GitReference::DefaultBranch);
        assert_eq!(GitReference::from_rev(Some("")), GitReference::DefaultBranch);
        assert_eq!(
            GitReference::from_rev(Some("v1.2.0")),
            GitReference::BranchOrTag("v1.2.0".to_string())
        );
        assert_eq!(
            GitReference::from_rev(Some("deadbeef")),
            GitReference::ShortCommit("deadbeef".to_string())
        );
        assert_eq!(
            GitReference::from_rev(Some("4a23745badf5bf5ef7928f1e346e9986bd696d82")),
            GitReference::FullCommit("4a23745badf5bf5ef7928f1e346e9986bd696d82".to_string())
        );
        // Branch names that merely look like hex stay names when too short.
        assert_eq!(
            GitReference::from_rev(Some("cafe")),
            GitReference::BranchOrTag("cafe".to_string())
        );
    }
}
