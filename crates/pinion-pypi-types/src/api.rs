use serde::Deserialize;

/// The response of the legacy JSON API at `/pypi/<name>/<version>/json`.
///
/// Only the fields needed to learn a release's dependencies are modeled.
#[derive(Debug, Clone, Deserialize)]
pub struct PackageJson {
    pub info: PackageInfo,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PackageInfo {
    #[serde(default)]
    pub requires_python: Option<String>,
    /// `null` when the release has no wheel the index could read metadata from.
    #[serde(default)]
    pub requires_dist: Option<Vec<String>>,
    /// Metadata 1.1 name for the same list, still served for some old releases.
    #[serde(default)]
    pub requires: Option<Vec<String>>,
}

impl PackageInfo {
    /// The declared requirement lines, or `None` if the index does not know them.
    pub fn requirement_lines(&self) -> Option<&[String]> {
        self.requires_dist
            .as_deref()
            .or(self.requires.as_deref())
    }

    /// The declared `Requires-Python`, with blank values treated as absent.
    pub fn requires_python(&self) -> Option<&str> {
        self.requires_python
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requires_dist() {
        let json = r#"{"info": {"name": "requests", "requires_python": ">=3.8", "requires_dist": ["idna<4,>=2.5", "PySocks!=1.5.7,>=1.5.6; extra == \"socks\""]}}"#;
        let package: PackageJson = serde_json::from_str(json).unwrap();
        assert_eq!(package.info.requires_python(), Some(">=3.8"));
        assert_eq!(package.info.requirement_lines().unwrap().len(), 2);
    }

    #[test]
    fn legacy_requires() {
        let json = r#"{"info": {"requires_python": "", "requires_dist": null, "requires": ["six"]}}"#;
        let package: PackageJson = serde_json::from_str(json).unwrap();
        assert_eq!(package.info.requires_python(), None);
        assert_eq!(package.info.requirement_lines(), Some(&["six".to_string()][..]));
    }

    #[test]
    fn unknown_dependencies() {
        let json = r#"{"info": {"requires_dist": null}}"#;
        let package: PackageJson = serde_json::from_str(json).unwrap();
        assert_eq!(package.info.requirement_lines(), None);
    }
}
