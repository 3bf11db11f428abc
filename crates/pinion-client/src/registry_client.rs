use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use reqwest::{ClientBuilder, StatusCode};
use reqwest_middleware::ClientWithMiddleware;
use reqwest_retry::RetryTransientMiddleware;
use reqwest_retry::policies::ExponentialBackoff;
use tracing::{debug, instrument, trace};
use url::Url;

use pinion_normalize::PackageName;
use pinion_pep440::Version;
use pinion_pypi_types::{HashDigest, PackageJson, SimpleJson};
use pinion_types::{IndexError, IndexFile, PackageIndex, Source, WheelPolicy};

use crate::{DistFilename, Error};

const SIMPLE_JSON: &str = "application/vnd.pypi.simple.v1+json";

/// A builder for a [`RegistryClient`].
#[derive(Debug, Clone)]
pub struct RegistryClientBuilder {
    retries: u32,
    timeout: Duration,
    user_agent: String,
}

impl Default for RegistryClientBuilder {
    fn default() -> Self {
        Self {
            retries: 3,
            timeout: Duration::from_secs(60 * 5),
            user_agent: format!("pinion/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl RegistryClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn build(self) -> Result<RegistryClient, Error> {
        let client = self.build_client(true)?;
        let insecure = self.build_client(false)?;
        Ok(RegistryClient {
            client,
            insecure,
            insecure_hosts: Mutex::default(),
        })
    }

    fn build_client(&self, verify_ssl: bool) -> Result<ClientWithMiddleware, Error> {
        let client_raw = ClientBuilder::new()
            .user_agent(&self.user_agent)
            .pool_max_idle_per_host(20)
            .timeout(self.timeout)
            .danger_accept_invalid_certs(!verify_ssl)
            .build()?;

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(self.retries);
        let retry_strategy = RetryTransientMiddleware::new_with_policy(retry_policy);

        Ok(reqwest_middleware::ClientBuilder::new(client_raw)
            .with(retry_strategy)
            .build())
    }
}

/// A client for PEP 691 indexes and the JSON API that sits next to them.
#[derive(Debug)]
pub struct RegistryClient {
    client: ClientWithMiddleware,
    /// Used for sources with `verify_ssl = false`.
    insecure: ClientWithMiddleware,
    /// Hosts of files listed by sources with `verify_ssl = false`.
    insecure_hosts: Mutex<HashSet<String>>,
}

impl RegistryClient {
    fn client_for(&self, verify_ssl: bool) -> &ClientWithMiddleware {
        if verify_ssl {
            &self.client
        } else {
            &self.insecure
        }
    }

    /// Fetch the project page of `package_name` from `source`, or `None` if the index doesn't
    /// know the project.
    #[instrument(skip_all, fields(package = %package_name, source = %source.name))]
    pub async fn simple(
        &self,
        package_name: &PackageName,
        source: &Source,
    ) -> Result<Option<(Url, SimpleJson)>, Error> {
        let url = Url::parse(&format!(
            "{}/{}/",
            source.url.as_str().trim_end_matches('/'),
            package_name
        ))?;
        trace!("Fetching project page from {url}");

        let response = self
            .client_for(source.verify_ssl)
            .get(url.clone())
            .header("Accept", SIMPLE_JSON)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!("{package_name} not found on {}", source.name);
            return Ok(None);
        }
        let bytes = response.error_for_status()?.bytes().await?;
        let page: SimpleJson = serde_json::from_slice(bytes.as_ref())
            .map_err(|err| Error::BadJson {
                url: url.clone(),
                err,
            })?;
        Ok(Some((url, page)))
    }

    /// Every file of `package_name` on each of `sources` that passes `policy`.
    pub async fn index_files(
        &self,
        package_name: &PackageName,
        sources: &[Source],
        policy: &WheelPolicy,
    ) -> Result<Vec<IndexFile>, Error> {
        let mut files = Vec::new();
        for source in sources {
            let Some((base, page)) = self.simple(package_name, source).await? else {
                continue;
            };
            for file in page.files {
                if !policy.accepts(&file.filename) {
                    trace!("Skipping incompatible file {}", file.filename);
                    continue;
                }
                let Some(filename) = DistFilename::parse(&file.filename, package_name) else {
                    trace!("Skipping unparseable file {}", file.filename);
                    continue;
                };
                let url = base.join(&file.url)?;
                if !source.verify_ssl
                    && let Some(host) = url.host_str()
                {
                    self.insecure_hosts
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .insert(host.to_string());
                }
                let hashes = file
                    .hashes
                    .sha256
                    .map(HashDigest::sha256)
                    .or_else(|| url.fragment().and_then(HashDigest::from_fragment))
                    .into_iter()
                    .collect();
                files.push(IndexFile {
                    filename: file.filename,
                    url,
                    version: filename.version,
                    index: source.name.clone(),
                    requires_python: file.requires_python,
                    hashes,
                    yanked: file.yanked.is_some_and(|yanked| yanked.is_yanked()),
                });
            }
        }
        Ok(files)
    }

    /// Fetch `{api}/pypi/{name}/{version}/json`, or `None` if there is no such page.
    #[instrument(skip_all, fields(package = %package_name, version = %version))]
    pub async fn json_api(
        &self,
        source: &Source,
        package_name: &PackageName,
        version: &Version,
    ) -> Result<Option<PackageJson>, Error> {
        let url = Url::parse(&format!(
            "{}/pypi/{package_name}/{version}/json",
            source.api_prefix()
        ))?;
        trace!("Fetching JSON API page from {url}");

        let response = self.client_for(source.verify_ssl).get(url.clone()).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let bytes = response.error_for_status()?.bytes().await?;
        let package = serde_json::from_slice(bytes.as_ref())
            .map_err(|err| Error::BadJson { url, err })?;
        Ok(Some(package))
    }

    /// Read the artifact at `url`, which may be a `file://` URL.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn fetch(&self, url: &Url) -> Result<Vec<u8>, Error> {
        if url.scheme() == "file" {
            let path = url
                .to_file_path()
                .map_err(|()| Error::NotALocalPath(url.clone()))?;
            return fs_err::tokio::read(path)
                .await
                .map_err(|err| Error::FileRead {
                    url: url.clone(),
                    err,
                });
        }

        let verify_ssl = url.host_str().is_none_or(|host| {
            !self
                .insecure_hosts
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .contains(host)
        });
        debug!("Downloading {url}");
        let response = self
            .client_for(verify_ssl)
            .get(url.clone())
            .send()
            .await?
            .error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }
}

impl PackageIndex for RegistryClient {
    async fn files(
        &self,
        name: &PackageName,
        sources: &[Source],
        policy: &WheelPolicy,
    ) -> Result<Vec<IndexFile>, IndexError> {
        self.index_files(name, sources, policy)
            .await
            .map_err(|err| IndexError::new(name.to_string(), err))
    }

    async fn package_json(
        &self,
        source: &Source,
        name: &PackageName,
        version: &Version,
    ) -> Result<Option<PackageJson>, IndexError> {
        self.json_api(source, name, version)
            .await
            .map_err(|err| IndexError::new(format!("{name}=={version}"), err))
    }

    async fn download(&self, url: &Url) -> Result<Vec<u8>, IndexError> {
        self.fetch(url)
            .await
            .map_err(|err| IndexError::new(url.to_string(), err))
    }
}
