mod requires_txt;

use std::str::FromStr;

use mailparse::{MailHeaderMap, MailParseError};
use thiserror::Error;
use tracing::warn;

use pinion_normalize::{ExtraName, InvalidNameError, PackageName};
use pinion_pep440::{Version, VersionParseError};
use pinion_pep508::{Pep508Error, Requirement};

pub use requires_txt::RequiresTxt;

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error(transparent)]
    MailParse(#[from] MailParseError),
    #[error("Metadata field {0} not found")]
    FieldNotFound(&'static str),
    #[error("Invalid version: {0}")]
    Pep440VersionError(VersionParseError),
    #[error(transparent)]
    Pep508Error(#[from] Box<Pep508Error>),
    #[error(transparent)]
    InvalidName(#[from] InvalidNameError),
    #[error("Failed to read `requires.txt` contents")]
    RequiresTxtContents(#[from] std::io::Error),
}

impl From<Pep508Error> for MetadataError {
    fn from(error: Pep508Error) -> Self {
        Self::Pep508Error(Box::new(error))
    }
}

/// The headers of a distribution metadata file.
#[derive(Debug)]
struct Headers<'a> {
    headers: Vec<mailparse::MailHeader<'a>>,
}

impl<'a> Headers<'a> {
    /// Parse the headers from the given metadata file content.
    fn parse(content: &'a [u8]) -> Result<Self, MailParseError> {
        let (headers, _) = mailparse::parse_headers(content)?;
        Ok(Self { headers })
    }

    /// Return the first value associated with the header with the given name.
    fn get_first_value(&self, name: &str) -> Option<String> {
        self.headers.get_first_header(name).and_then(|header| {
            let value = header.get_value();
            if value == "UNKNOWN" {
                None
            } else {
                Some(value)
            }
        })
    }

    /// Return all values associated with the header with the given name.
    fn get_all_values(&self, name: &str) -> impl Iterator<Item = String> {
        self.headers
            .get_all_values(name)
            .into_iter()
            .filter(|value| value != "UNKNOWN")
    }
}

/// The subset of core metadata that drives dependency resolution.
///
/// `requires_python` is kept verbatim: it is recorded as discovered and only interpreted when
/// markers are aggregated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub name: PackageName,
    pub version: Version,
    pub requires_dist: Vec<Requirement>,
    pub requires_python: Option<String>,
    pub provides_extras: Vec<ExtraName>,
}

impl Metadata {
    /// Parse a `METADATA` file from a `.dist-info` directory, or a `PKG-INFO` file.
    pub fn parse(content: &[u8]) -> Result<Self, MetadataError> {
        let headers = Headers::parse(content)?;

        let name = PackageName::new(
            headers
                .get_first_value("Name")
                .ok_or(MetadataError::FieldNotFound("Name"))?,
        )?;
        let version = Version::from_str(
            headers
                .get_first_value("Version")
                .ok_or(MetadataError::FieldNotFound("Version"))?
                .trim(),
        )
        .map_err(MetadataError::Pep440VersionError)?;
        let requires_dist = headers
            .get_all_values("Requires-Dist")
            .map(|requires_dist| Requirement::from_str(requires_dist.trim()))
            .collect::<Result<Vec<_>, _>>()?;
        let requires_python = headers
            .get_first_value("Requires-Python")
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        let provides_extras = headers
            .get_all_values("Provides-Extra")
            .filter_map(|provides_extra| match ExtraName::new(provides_extra) {
                Ok(extra_name) => Some(extra_name),
                Err(err) => {
                    warn!("Ignoring invalid extra: {err}");
                    None
                }
            })
            .collect::<Vec<_>>();

        Ok(Self {
            name,
            version,
            requires_dist,
            requires_python,
            provides_extras,
        })
    }

    /// Combine an egg-info `PKG-INFO` with its sibling `requires.txt`.
    ///
    /// Legacy `PKG-INFO` files carry no `Requires-Dist`; the requirements live in `requires.txt`.
    pub fn parse_egg_info(
        pkg_info: &[u8],
        requires_txt: Option<&[u8]>,
    ) -> Result<Self, MetadataError> {
        let mut metadata = Self::parse(pkg_info)?;
        if let Some(requires_txt) = requires_txt {
            let requires_txt = RequiresTxt::parse(requires_txt)?;
            metadata.requires_dist = requires_txt.requires_dist;
            for extra in requires_txt.provides_extras {
                if !metadata.provides_extras.contains(&extra) {
                    metadata.provides_extras.push(extra);
                }
            }
        }
        Ok(metadata)
    }
}
