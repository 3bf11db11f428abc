//! The project manifest: root requirements, development requirements and package indexes.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use pinion_git::GitReference;
use pinion_normalize::{ExtraName, PackageName};
use pinion_pep440::{Version, VersionSpecifiers};
use pinion_pep508::MarkerTree;
use pinion_types::{Requirement, RequirementSource, Source};

use crate::Identifier;
use crate::error::ManifestError;

/// A `Pipfile`-shaped project manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Manifest {
    #[serde(rename = "source", default = "default_sources")]
    pub sources: Vec<Source>,
    #[serde(default)]
    pub packages: IndexMap<String, PackageEntry>,
    #[serde(default)]
    pub dev_packages: IndexMap<String, PackageEntry>,
    #[serde(default)]
    pub requires: Requires,
    #[serde(rename = "pipenv", default)]
    pub settings: Settings,
}

fn default_sources() -> Vec<Source> {
    vec![Source::pypi()]
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            sources: default_sources(),
            packages: IndexMap::new(),
            dev_packages: IndexMap::new(),
            requires: Requires::default(),
            settings: Settings::default(),
        }
    }
}

/// The `[requires]` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requires {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub python_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub python_full_version: Option<String>,
}

/// The `[pipenv]` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub allow_prereleases: bool,
}

/// A `[packages]` entry: a bare specifier such as `"*"` or `">=1.0"`, or a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PackageEntry {
    Specifier(String),
    Table(PackageTable),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageTable {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extras: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub markers: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<String>,
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subdirectory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub editable: bool,
}

impl PackageEntry {
    pub fn to_requirement(&self, name: &str) -> Result<Requirement, ManifestError> {
        match self {
            Self::Specifier(specifier) => PackageTable {
                version: Some(specifier.clone()),
                ..PackageTable::default()
            }
            .to_requirement(name),
            Self::Table(table) => table.to_requirement(name),
        }
    }
}

impl PackageTable {
    /// The requirement this entry describes. `git`, `path` and `file` take precedence over
    /// `version`, in that order; a `version` of `*` means any version.
    pub fn to_requirement(&self, name: &str) -> Result<Requirement, ManifestError> {
        let package = PackageName::from_str(name).map_err(|err| ManifestError::entry(name, err))?;
        let extras = self
            .extras
            .iter()
            .map(|extra| ExtraName::from_str(extra))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| ManifestError::entry(name, err))?;
        let marker = self
            .markers
            .as_deref()
            .map(str::trim)
            .filter(|marker| !marker.is_empty())
            .map(MarkerTree::from_str)
            .transpose()
            .map_err(|err| ManifestError::entry(name, err))?;

        let source = if let Some(git) = &self.git {
            let repository = Url::parse(git.strip_prefix("git+").unwrap_or(git))
                .map_err(|err| ManifestError::entry(name, err))?;
            RequirementSource::Git {
                repository,
                reference: GitReference::from_rev(self.reference.as_deref()),
                precise: None,
                subdirectory: self.subdirectory.clone(),
                editable: self.editable,
            }
        } else if let Some(path) = &self.path {
            RequirementSource::Path {
                path: PathBuf::from(path),
                editable: self.editable,
            }
        } else if let Some(file) = &self.file {
            match Url::parse(file) {
                Ok(url) if url.scheme() == "file" => RequirementSource::Path {
                    path: url
                        .to_file_path()
                        .map_err(|()| ManifestError::entry(name, "invalid file URL"))?,
                    editable: self.editable,
                },
                Ok(url) => RequirementSource::Url { url },
                Err(_) => RequirementSource::Path {
                    path: PathBuf::from(file),
                    editable: self.editable,
                },
            }
        } else {
            let specifier = match self.version.as_deref().map(str::trim) {
                None | Some("" | "*") => VersionSpecifiers::empty(),
                Some(version) => VersionSpecifiers::from_str(version)
                    .map_err(|err| ManifestError::entry(name, err))?,
            };
            RequirementSource::Registry {
                specifier,
                index: self.index.clone(),
            }
        };

        Ok(Requirement::new(package, extras, source, marker))
    }
}

impl Manifest {
    pub fn from_toml(content: &str) -> Result<Self, ManifestError> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_path(path: &Path) -> Result<Self, ManifestError> {
        let content = fs_err::read_to_string(path).map_err(|err| ManifestError::Io {
            path: path.to_path_buf(),
            err,
        })?;
        Self::from_toml(&content)
    }

    /// The `[packages]` requirements, by identifier.
    pub fn default_requirements(
        &self,
    ) -> Result<IndexMap<Identifier, Requirement>, ManifestError> {
        requirements(&self.packages)
    }

    /// The `[dev-packages]` requirements, by identifier.
    pub fn develop_requirements(
        &self,
    ) -> Result<IndexMap<Identifier, Requirement>, ManifestError> {
        requirements(&self.dev_packages)
    }

    /// The declared Python version, preferring `python_full_version`.
    pub fn requires_python(&self) -> Option<&str> {
        self.requires
            .python_full_version
            .as_deref()
            .or(self.requires.python_version.as_deref())
            .map(str::trim)
            .filter(|python| !python.is_empty())
    }

    /// [`Manifest::requires_python`] as a version, if it parses as one.
    pub fn python_version(&self) -> Option<Version> {
        self.requires_python()
            .and_then(|python| Version::from_str(python).ok())
    }

    /// The SHA-256 of the manifest's resolution inputs, as lowercase hex.
    ///
    /// Covers sources, `[requires]` and both package sections, rendered as compact JSON with
    /// sorted keys, so that reformatting the TOML does not change it.
    pub fn content_hash(&self) -> Result<String, ManifestError> {
        #[derive(Serialize)]
        struct Meta<'a> {
            requires: &'a Requires,
            sources: &'a [Source],
        }

        #[derive(Serialize)]
        struct Document<'a> {
            #[serde(rename = "_meta")]
            meta: Meta<'a>,
            default: &'a IndexMap<String, PackageEntry>,
            develop: &'a IndexMap<String, PackageEntry>,
        }

        // Going through `serde_json::Value` sorts every object by key.
        let document = serde_json::to_value(Document {
            meta: Meta {
                requires: &self.requires,
                sources: &self.sources,
            },
            default: &self.packages,
            develop: &self.dev_packages,
        })?;
        let content = serde_json::to_string(&document)?;
        Ok(hex::encode(Sha256::digest(content.as_bytes())))
    }
}

fn requirements(
    section: &IndexMap<String, PackageEntry>,
) -> Result<IndexMap<Identifier, Requirement>, ManifestError> {
    section
        .iter()
        .map(|(name, entry)| {
            let requirement = entry.to_requirement(name)?;
            Ok((Identifier::from_requirement(&requirement), requirement))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use insta::assert_snapshot;
    use itertools::Itertools;

    use super::*;

    const PIPFILE: &str = indoc! {r#"
        [[source]]
        name = "pypi"
        url = "https://pypi.org/simple"
        verify_ssl = true

        [[source]]
        name = "internal"
        url = "https://pypi.example.com/simple"
        verify_ssl = false

        [packages]
        requests = {version = ">=2.20", extras = ["socks"]}
        six = "*"
        private = {version = "==1.0", index = "internal"}
        tool = {git = "https://github.com/example/tool.git", ref = "v1.2", editable = true}
        colorama = {version = "*", markers = "sys_platform == 'win32'"}

        [dev-packages]
        pytest = ">=7"

        [requires]
        python_version = "3.8"

        [pipenv]
        allow_prereleases = true

        [scripts]
        test = "pytest"
    "#};

    #[test]
    fn parse() {
        let manifest = Manifest::from_toml(PIPFILE).unwrap();
        assert_eq!(manifest.sources.len(), 2);
        assert!(!manifest.sources[1].verify_ssl);
        assert!(manifest.settings.allow_prereleases);
        assert_eq!(manifest.requires_python(), Some("3.8"));
        assert_eq!(
            manifest.python_version(),
            Some(Version::from_str("3.8").unwrap())
        );

        let default = manifest.default_requirements().unwrap();
        let rendered = default
            .iter()
            .map(|(identifier, requirement)| format!("{identifier}: {requirement}"))
            .join("\n");
        assert_snapshot!(rendered, @r#"
        requests[socks]: requests[socks]>=2.20
        six: six
        private: private==1.0
        tool: tool @ git+https://github.com/example/tool.git@v1.2
        colorama: colorama; sys_platform == "win32"
        "#);
        assert_eq!(default[2].index(), Some("internal"));
        assert!(default[3].is_editable());

        let develop = manifest.develop_requirements().unwrap();
        assert_eq!(develop.len(), 1);
    }

    #[test]
    fn pypi_is_the_default_source() {
        let manifest = Manifest::from_toml("[packages]\nsix = \"*\"\n").unwrap();
        assert_eq!(manifest.sources, [Source::pypi()]);
        assert_eq!(manifest.requires_python(), None);
    }

    #[test]
    fn full_python_version_wins() {
        let manifest = Manifest::from_toml(indoc! {r#"
            [requires]
            python_version = "3.8"
            python_full_version = "3.8.10"
        "#})
        .unwrap();
        assert_eq!(manifest.requires_python(), Some("3.8.10"));
    }

    #[test]
    fn invalid_entries() {
        let manifest = Manifest::from_toml("[packages]\nsix = \"not a version\"\n").unwrap();
        let err = manifest.default_requirements().unwrap_err();
        assert!(matches!(err, ManifestError::Entry { ref name, .. } if name == "six"));
    }

    #[test]
    fn content_hash_ignores_formatting() {
        let compact = Manifest::from_toml(indoc! {r#"
            [packages]
            six = "*"
            requests = {version = ">=2", extras = ["socks"]}
        "#})
        .unwrap();
        let spread = Manifest::from_toml(indoc! {r#"
            # A comment.
            [[source]]
            url = "https://pypi.org/simple"
            verify_ssl = true
            name = "pypi"

            [packages]
            six = "*"

            [packages.requests]
            extras = ["socks"]
            version = ">=2"
        "#})
        .unwrap();
        assert_eq!(
            compact.content_hash().unwrap(),
            spread.content_hash().unwrap()
        );

        let changed = Manifest::from_toml("[packages]\nsix = \">=1\"\n").unwrap();
        assert_ne!(
            compact.content_hash().unwrap(),
            changed.content_hash().unwrap()
        );
        assert_eq!(compact.content_hash().unwrap().len(), 64);
    }
}
