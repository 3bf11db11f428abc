use serde::{Deserialize, Serialize};

use pinion_pep440::Version;

/// A PEP 691 project page.
#[derive(Debug, Clone, Deserialize)]
pub struct SimpleJson {
    pub files: Vec<File>,
    /// Present since PEP 700; older indexes leave it out.
    #[serde(default)]
    pub versions: Vec<Version>,
}

/// A single (remote) file belonging to a package, either a wheel or a source distribution.
///
/// <https://peps.python.org/pep-0691/#project-detail>
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct File {
    pub filename: String,
    #[serde(default)]
    pub hashes: Hashes,
    /// Kept as written; plenty of published values are not valid specifiers.
    #[serde(default)]
    pub requires_python: Option<String>,
    pub url: String,
    #[serde(default)]
    pub yanked: Option<Yanked>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Yanked {
    Bool(bool),
    Reason(String),
}

impl Yanked {
    pub fn is_yanked(&self) -> bool {
        match self {
            Self::Bool(is_yanked) => *is_yanked,
            Self::Reason(_) => true,
        }
    }
}

/// A dictionary mapping a hash name to a hex encoded digest of the file.
///
/// PEP 691 says multiple hashes can be included and the interpretation is left to the client, we
/// only support SHA 256 atm.
#[derive(Debug, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Default, Serialize, Deserialize)]
pub struct Hashes {
    pub sha256: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_page() {
        let json = r#"{
            "meta": {"api-version": "1.1"},
            "name": "six",
            "files": [
                {
                    "filename": "six-1.16.0-py2.py3-none-any.whl",
                    "url": "https://files.example.com/six-1.16.0-py2.py3-none-any.whl",
                    "hashes": {"sha256": "8abb2f1d86890a2dfb989f9a77cfcfd3e47c2a354b01111771326f8aa26e0254"},
                    "requires-python": ">=2.7, !=3.0.*, !=3.1.*, !=3.2.*",
                    "yanked": false
                },
                {
                    "filename": "six-1.15.0.tar.gz",
                    "url": "https://files.example.com/six-1.15.0.tar.gz",
                    "hashes": {},
                    "yanked": "broken metadata"
                }
            ],
            "versions": ["1.15.0", "1.16.0"]
        }"#;
        let page: SimpleJson = serde_json::from_str(json).unwrap();
        assert_eq!(page.files.len(), 2);
        assert_eq!(page.versions.len(), 2);
        assert!(page.files[0].hashes.sha256.is_some());
        assert!(!page.files[0].yanked.as_ref().unwrap().is_yanked());
        assert!(page.files[1].yanked.as_ref().unwrap().is_yanked());
        assert_eq!(page.files[1].requires_python, None);
    }
}
