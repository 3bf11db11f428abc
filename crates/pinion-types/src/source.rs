use std::sync::LazyLock;

use serde::{Deserialize, Serialize};
use url::Url;

static PYPI_URL: LazyLock<Url> = LazyLock::new(|| Url::parse("https://pypi.org/simple").unwrap());

/// A package index, as listed in a manifest's `[[source]]` tables.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Source {
    pub name: String,
    pub url: Url,
    #[serde(default = "default_verify_ssl")]
    pub verify_ssl: bool,
}

fn default_verify_ssl() -> bool {
    true
}

impl Source {
    /// The public Python Package Index.
    pub fn pypi() -> Self {
        Self {
            name: "pypi".to_string(),
            url: PYPI_URL.clone(),
            verify_ssl: true,
        }
    }

    /// The index URL with a trailing `/simple` removed, under which the JSON API lives.
    pub fn api_prefix(&self) -> String {
        let url = self.url.as_str().trim_end_matches('/');
        url.strip_suffix("/simple").unwrap_or(url).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_prefix() {
        assert_eq!(Source::pypi().api_prefix(), "https://pypi.org");
        let source = Source {
            name: "internal".to_string(),
            url: Url::parse("https://example.com/root/simple/").unwrap(),
            verify_ssl: false,
        };
        assert_eq!(source.api_prefix(), "https://example.com/root");
        let source = Source {
            name: "flat".to_string(),
            url: Url::parse("https://example.com/packages").unwrap(),
            verify_ssl: true,
        };
        assert_eq!(source.api_prefix(), "https://example.com/packages");
    }
}
