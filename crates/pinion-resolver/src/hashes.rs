use std::collections::BTreeSet;

use futures::future::try_join_all;
use sha2::{Digest, Sha256};
use tracing::{debug, instrument, trace, warn};

use pinion_cache::HashCache;
use pinion_pypi_types::{HashAlgorithm, HashDigest};
use pinion_types::{Candidate, IndexFile, PackageIndex, Source, WheelPolicy};

use crate::error::ResolveError;

/// Collects the artifact hashes of pinned candidates.
pub struct HashFetcher<'a, Index: PackageIndex> {
    index: &'a Index,
    cache: &'a HashCache,
    policy: WheelPolicy,
}

impl<'a, Index: PackageIndex> HashFetcher<'a, Index> {
    pub fn new(index: &'a Index, cache: &'a HashCache, policy: WheelPolicy) -> Self {
        Self {
            index,
            cache,
            policy,
        }
    }

    /// The SHA-256 digests of every artifact of the candidate's release.
    ///
    /// VCS, editable and unpinned candidates have no stable artifacts and get no hashes.
    #[instrument(skip_all, fields(candidate = %candidate))]
    pub async fn get_hashes(
        &self,
        candidate: &Candidate,
        sources: &[Source],
    ) -> Result<BTreeSet<HashDigest>, ResolveError> {
        if candidate.is_vcs() || candidate.is_editable() || !candidate.is_named() {
            return Ok(BTreeSet::new());
        }
        let Some(version) = &candidate.version else {
            return Ok(BTreeSet::new());
        };

        let files = self
            .index
            .files(&candidate.name, sources, &self.policy)
            .await?;
        let files = files
            .iter()
            .filter(|file| file.version == *version)
            .collect::<Vec<_>>();
        if files.is_empty() {
            debug!("No artifacts to hash for {candidate}");
        }

        let digests = try_join_all(files.into_iter().map(|file| self.hash_file(file))).await?;
        Ok(digests.into_iter().collect())
    }

    async fn hash_file(&self, file: &IndexFile) -> Result<HashDigest, ResolveError> {
        if let Some(digest) = self.cache.get(&file.url) {
            return Ok(digest);
        }

        let digest = match file
            .hashes
            .iter()
            .find(|digest| digest.algorithm == HashAlgorithm::Sha256)
        {
            Some(digest) => {
                trace!("Using the listed hash of {}", file.filename);
                digest.clone()
            }
            None => {
                debug!("Downloading {} to hash it", file.filename);
                let content = self.index.download(&file.url).await?;
                HashDigest::sha256(hex::encode(Sha256::digest(&content)))
            }
        };

        if let Err(err) = self.cache.insert(&file.url, digest.clone()) {
            warn!("Failed to cache the hash of {}: {err}", file.url);
        }
        Ok(digest)
    }
}
