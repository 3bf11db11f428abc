use std::str::FromStr;

use pinion_normalize::PackageName;
use pinion_pep440::Version;

/// The name and version encoded in a distribution filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistFilename {
    pub name: PackageName,
    pub version: Version,
    pub wheel: bool,
}

const SOURCE_DIST_EXTENSIONS: &[&str] = &[".tar.gz", ".zip", ".tar.bz2", ".tar.xz", ".tgz", ".tar"];

impl DistFilename {
    /// Parse a wheel or source distribution filename belonging to `package_name`.
    ///
    /// Returns `None` for files of other packages, unknown archive formats and versions that are
    /// not valid PEP 440.
    pub fn parse(filename: &str, package_name: &PackageName) -> Option<Self> {
        if let Some(stem) = filename.strip_suffix(".whl") {
            // `{name}-{version}(-{build})?-{python}-{abi}-{platform}`
            let mut parts = stem.split('-');
            let name = PackageName::from_str(parts.next()?).ok()?;
            if &name != package_name {
                return None;
            }
            let version = Version::from_str(parts.next()?).ok()?;
            return Some(Self {
                name,
                version,
                wheel: true,
            });
        }

        let stem = SOURCE_DIST_EXTENSIONS
            .iter()
            .find_map(|extension| filename.strip_suffix(extension))?;

        // Source distribution names aren't escaped, so try every `-` as the separator; `a-1-1.zip`
        // only has a version if the name is known.
        stem.match_indices('-').find_map(|(idx, _)| {
            let name = PackageName::from_str(&stem[..idx]).ok()?;
            if &name != package_name {
                return None;
            }
            let version = Version::from_str(&stem[idx + 1..]).ok()?;
            Some(Self {
                name,
                version,
                wheel: false,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(name: &str) -> PackageName {
        PackageName::from_str(name).unwrap()
    }

    #[test]
    fn wheel() {
        let filename = DistFilename::parse(
            "zope.interface-6.1-cp312-cp312-manylinux_2_17_x86_64.whl",
            &name("zope-interface"),
        )
        .unwrap();
        assert_eq!(filename.version.to_string(), "6.1");
        assert!(filename.wheel);

        assert_eq!(
            DistFilename::parse("six-1.16.0-py2.py3-none-any.whl", &name("requests")),
            None
        );
    }

    #[test]
    fn source_dist() {
        let filename = DistFilename::parse("Django-4.2.7.tar.gz", &name("django")).unwrap();
        assert_eq!(filename.version.to_string(), "4.2.7");
        assert!(!filename.wheel);

        let filename = DistFilename::parse("a-1-1.zip", &name("a-1")).unwrap();
        assert_eq!(filename.version.to_string(), "1");

        assert_eq!(DistFilename::parse("six-1.16.0.exe", &name("six")), None);
        assert_eq!(DistFilename::parse("six-latest.tar.gz", &name("six")), None);
    }
}
