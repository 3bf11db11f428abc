//! The lock document produced by a [`crate::Locker`].

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use rustc_hash::FxHashMap;
use serde::Deserialize;
use toml_edit::{Array, ArrayOfTables, Item, Table, Value, value};

use pinion_git::GitSha;
use pinion_normalize::PackageName;
use pinion_pypi_types::HashDigest;
use pinion_types::{Candidate, RequirementSource, Source};

use crate::Identifier;
use crate::error::ManifestError;
use crate::manifest::{Manifest, PackageTable};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Lock {
    pub meta: LockMeta,
    #[serde(default)]
    pub default: BTreeMap<PackageName, LockedPackage>,
    #[serde(default)]
    pub develop: BTreeMap<PackageName, LockedPackage>,
}

/// What the lock was produced from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LockMeta {
    /// [`Manifest::content_hash`] of the manifest at lock time.
    pub hash: String,
    #[serde(default)]
    pub requires_python: Option<String>,
    #[serde(default)]
    pub sources: Vec<Source>,
}

/// A locked package: a pinned version or a locked direct reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct LockedPackage {
    /// `==<version>` for index packages.
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub hashes: BTreeSet<HashDigest>,
    #[serde(default)]
    pub markers: Option<String>,
    #[serde(default)]
    pub extras: BTreeSet<String>,
    #[serde(default)]
    pub index: Option<String>,
    #[serde(default)]
    pub git: Option<String>,
    /// The commit a Git reference was locked to.
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub subdirectory: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub editable: bool,
}

impl LockedPackage {
    /// The lock entry for a resolved candidate.
    pub fn from_candidate(candidate: &Candidate) -> Self {
        let mut package = Self {
            hashes: candidate.hashes.clone(),
            markers: candidate.markers.as_ref().map(ToString::to_string),
            extras: candidate.extras.iter().map(ToString::to_string).collect(),
            editable: candidate.is_editable(),
            ..Self::default()
        };
        match &candidate.source {
            RequirementSource::Registry { index, .. } => {
                package.version = candidate
                    .version
                    .as_ref()
                    .map(|version| format!("=={version}"));
                package.index.clone_from(index);
            }
            RequirementSource::Git {
                repository,
                reference,
                precise,
                subdirectory,
                ..
            } => {
                package.git = Some(repository.to_string());
                package.reference = Some(match precise {
                    Some(precise) => precise.to_string(),
                    None => reference.to_string(),
                });
                package.subdirectory.clone_from(subdirectory);
            }
            RequirementSource::Url { url } => {
                package.file = Some(url.to_string());
            }
            RequirementSource::Path { path, .. } => {
                package.path = Some(path.to_string_lossy().into_owned());
            }
        }
        package
    }

    /// The candidate this entry locks, with its hashes but without markers.
    pub fn to_candidate(&self, name: &PackageName) -> Result<Candidate, ManifestError> {
        let table = PackageTable {
            version: self.version.clone(),
            extras: self.extras.iter().cloned().collect(),
            index: self.index.clone(),
            markers: None,
            git: self.git.clone(),
            reference: self.reference.clone(),
            subdirectory: self.subdirectory.clone(),
            path: self.path.clone(),
            file: self.file.clone(),
            editable: self.editable,
        };
        let requirement = table.to_requirement(name.as_str())?;
        let mut candidate = Candidate::from_requirement(&requirement);
        if let RequirementSource::Git { precise, .. } = &mut candidate.source {
            *precise = self
                .reference
                .as_deref()
                .and_then(|reference| GitSha::from_str(reference).ok());
        }
        candidate.hashes.clone_from(&self.hashes);
        Ok(candidate)
    }

    fn to_toml(&self) -> Table {
        let mut table = Table::new();
        if let Some(version) = &self.version {
            table.insert("version", value(version));
        }
        if let Some(git) = &self.git {
            table.insert("git", value(git));
        }
        if let Some(reference) = &self.reference {
            table.insert("ref", value(reference));
        }
        if let Some(subdirectory) = &self.subdirectory {
            table.insert("subdirectory", value(subdirectory));
        }
        if let Some(path) = &self.path {
            table.insert("path", value(path));
        }
        if let Some(file) = &self.file {
            table.insert("file", value(file));
        }
        if self.editable {
            table.insert("editable", value(true));
        }
        if !self.extras.is_empty() {
            table.insert(
                "extras",
                value(self.extras.iter().map(String::as_str).collect::<Array>()),
            );
        }
        if let Some(index) = &self.index {
            table.insert("index", value(index));
        }
        if let Some(markers) = &self.markers {
            table.insert("markers", value(markers));
        }
        if !self.hashes.is_empty() {
            table.insert(
                "hashes",
                value(each_element_on_its_line_array(
                    self.hashes.iter().map(ToString::to_string),
                )),
            );
        }
        table
    }
}

impl Lock {
    /// An empty lock carrying the manifest's hash, Python requirement and sources.
    pub fn with_meta_from(manifest: &Manifest) -> Result<Self, ManifestError> {
        Ok(Self {
            meta: LockMeta {
                hash: manifest.content_hash()?,
                requires_python: manifest.requires_python().map(ToString::to_string),
                sources: manifest.sources.clone(),
            },
            default: BTreeMap::new(),
            develop: BTreeMap::new(),
        })
    }

    pub fn from_toml(content: &str) -> Result<Self, ManifestError> {
        Ok(toml::from_str(content)?)
    }

    /// Render the lock as TOML, sections and packages in a stable order.
    pub fn to_toml(&self) -> String {
        let mut doc = toml_edit::DocumentMut::new();

        let mut meta = Table::new();
        meta.insert("hash", value(&self.meta.hash));
        if let Some(requires_python) = &self.meta.requires_python {
            meta.insert("requires-python", value(requires_python));
        }
        let mut sources = ArrayOfTables::new();
        for source in &self.meta.sources {
            let mut table = Table::new();
            table.insert("name", value(&source.name));
            table.insert("url", value(source.url.as_str()));
            table.insert("verify_ssl", value(source.verify_ssl));
            sources.push(table);
        }
        meta.insert("sources", Item::ArrayOfTables(sources));
        doc.insert("meta", Item::Table(meta));

        for (name, section) in [("default", &self.default), ("develop", &self.develop)] {
            let mut table = Table::new();
            // Only the per-package tables get headers.
            table.set_implicit(true);
            for (package, locked) in section {
                table.insert(package.as_str(), Item::Table(locked.to_toml()));
            }
            doc.insert(name, Item::Table(table));
        }

        doc.to_string()
    }

    /// Whether the lock was produced from a manifest with the same content.
    pub fn is_up_to_date(&self, manifest: &Manifest) -> Result<bool, ManifestError> {
        Ok(self.meta.hash == manifest.content_hash()?)
    }

    /// The locked candidates to prefer when relocking, by identifier.
    ///
    /// Default entries override develop entries of the same identifier. Markers are dropped, since
    /// they are recomputed for every lock.
    pub fn preferred_pins(&self) -> Result<FxHashMap<Identifier, Candidate>, ManifestError> {
        let mut pins = FxHashMap::default();
        for (name, locked) in self.develop.iter().chain(&self.default) {
            let candidate = locked.to_candidate(name)?;
            pins.insert(Identifier::from_candidate(&candidate), candidate);
        }
        Ok(pins)
    }
}

fn each_element_on_its_line_array(elements: impl Iterator<Item = impl Into<Value>>) -> Array {
    let mut array = elements
        .map(|item| {
            let mut value = item.into();
            value.decor_mut().set_prefix("\n    ");
            value
        })
        .collect::<Array>();
    array.set_trailing_comma(true);
    array.set_trailing("\n");
    array
}
