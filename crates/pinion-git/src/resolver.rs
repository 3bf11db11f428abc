use std::str::FromStr;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, instrument};
use url::Url;

use pinion_static::EnvVars;

use crate::{GitReference, GitSha};

#[derive(Debug, thiserror::Error)]
pub enum GitResolverError {
    #[error("Failed to run `git ls-remote`; is `git` installed?")]
    Spawn(#[source] std::io::Error),
    #[error("`git ls-remote` failed for `{url}` at `{reference}`:\n{stderr}")]
    Command {
        url: Url,
        reference: GitReference,
        stderr: String,
    },
    #[error("Reference `{reference}` was not found in `{url}`")]
    NotFound { url: Url, reference: GitReference },
    #[error(
        "Abbreviated commit `{reference}` of `{url}` cannot be resolved without a clone; use the full commit hash"
    )]
    ShortCommit { url: Url, reference: GitReference },
    #[error(transparent)]
    Sha(#[from] crate::ShaParseError),
}

/// A repository URL together with a reference into it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepositoryReference {
    /// The repository URL, without a trailing slash or fragment.
    pub url: String,
    pub reference: GitReference,
}

impl RepositoryReference {
    pub fn new(url: &Url, reference: &GitReference) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self {
            url: url.as_str().trim_end_matches('/').to_string(),
            reference: reference.clone(),
        }
    }
}

/// Locks Git references to exact commits.
///
/// Every `(repository, reference)` pair is resolved at most once per resolver, so every candidate
/// produced during one run sees the same commit.
#[derive(Debug, Default, Clone)]
pub struct GitResolver(Arc<DashMap<RepositoryReference, GitSha>>);

impl GitResolver {
    /// Inserts a new [`GitSha`] for the given [`RepositoryReference`].
    pub fn insert(&self, reference: RepositoryReference, sha: GitSha) {
        self.0.insert(reference, sha);
    }

    /// Returns the [`GitSha`] for the given [`RepositoryReference`], if it was resolved before.
    pub fn get(&self, reference: &RepositoryReference) -> Option<GitSha> {
        self.0.get(reference).map(|sha| *sha)
    }

    /// Resolve `reference` in the repository at `url` to a full commit hash.
    #[instrument(skip(self), fields(url = %url, reference = %reference))]
    pub async fn resolve(
        &self,
        url: &Url,
        reference: &GitReference,
        verify_ssl: bool,
    ) -> Result<GitSha, GitResolverError> {
        if let GitReference::FullCommit(rev) = reference {
            return Ok(GitSha::from_str(rev)?);
        }

        let key = RepositoryReference::new(url, reference);
        if let Some(sha) = self.get(&key) {
            debug!("Reusing {sha} for {url}@{reference}");
            return Ok(sha);
        }

        let Some(refspecs) = reference.refspecs() else {
            return Err(GitResolverError::ShortCommit {
                url: url.clone(),
                reference: reference.clone(),
            });
        };

        let stdout = git_ls_remote(url, reference, &refspecs, verify_ssl).await?;
        let sha = parse_ls_remote(&stdout).ok_or_else(|| GitResolverError::NotFound {
            url: url.clone(),
            reference: reference.clone(),
        })?;
        debug!("Resolved {url}@{reference} to {sha}");

        // Entries are never replaced, so that concurrent lookups agree on the first answer.
        Ok(*self.0.entry(key).or_insert(sha))
    }
}

/// Query the remote for the refs matching `refspecs`, returning the raw `<hash>\t<ref>` lines.
async fn git_ls_remote(
    url: &Url,
    reference: &GitReference,
    refspecs: &[String],
    verify_ssl: bool,
) -> Result<String, GitResolverError> {
    debug!("Running git ls-remote for {url} with refspecs {refspecs:?}");

    let mut cmd = tokio::process::Command::new("git");
    cmd.arg("ls-remote");
    cmd.env(EnvVars::GIT_TERMINAL_PROMPT, "0");
    if !verify_ssl {
        debug!("Disabling SSL verification for git ls-remote");
        cmd.env(EnvVars::GIT_SSL_NO_VERIFY, "true");
    }
    cmd.arg(url.as_str());
    cmd.args(refspecs);

    let output = cmd.output().await.map_err(GitResolverError::Spawn)?;
    if !output.status.success() {
        return Err(GitResolverError::Command {
            url: url.clone(),
            reference: reference.clone(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Pick the commit from `git ls-remote` output.
///
/// A peeled tag (`refs/tags/<tag>^{}`) wins over the tag itself, which may name an annotated tag
/// object, and a tag wins over a branch of the same name.
fn parse_ls_remote(stdout: &str) -> Option<GitSha> {
    stdout
        .lines()
        .filter_map(|line| {
            let (hash, ref_name) = line.split_once('\t')?;
            let sha = GitSha::from_str(hash.trim()).ok()?;
            let ref_name = ref_name.trim();
            let rank = if ref_name.ends_with("^{}") {
                2
            } else if ref_name.starts_with("refs/tags/") {
                1
            } else {
                0
            };
            Some((rank, sha))
        })
        .max_by_key(|(rank, _)| *rank)
        .map(|(_, sha)| sha)
}
