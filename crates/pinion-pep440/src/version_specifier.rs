use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use std::ops::Deref;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

use crate::version::compare_release;
use crate::{Operator, Version, VersionParseError};

/// A comma-separated set of version specifiers such as `>=2.1,<3`, all of which must hold.
///
/// An empty set matches every version.
#[derive(Eq, PartialEq, Debug, Clone, Hash, Default)]
pub struct VersionSpecifiers(Vec<VersionSpecifier>);

impl Deref for VersionSpecifiers {
    type Target = [VersionSpecifier];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl VersionSpecifiers {
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Whether every specifier in the set contains `version`.
    pub fn contains(&self, version: &Version) -> bool {
        self.0.iter().all(|specifier| specifier.contains(version))
    }

    /// Whether any member names a pre-release, which opts the set into matching pre-releases.
    pub fn any_prerelease(&self) -> bool {
        self.0.iter().any(VersionSpecifier::any_prerelease)
    }

    pub fn into_inner(self) -> Vec<VersionSpecifier> {
        self.0
    }
}

impl FromIterator<VersionSpecifier> for VersionSpecifiers {
    fn from_iter<T: IntoIterator<Item = VersionSpecifier>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl From<VersionSpecifier> for VersionSpecifiers {
    fn from(specifier: VersionSpecifier) -> Self {
        Self(vec![specifier])
    }
}

impl FromStr for VersionSpecifiers {
    type Err = VersionSpecifiersParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut specifiers = Vec::new();
        for part in s.split(',') {
            if part.trim().is_empty() {
                if s.trim().is_empty() {
                    continue;
                }
                return Err(VersionSpecifiersParseError {
                    line: s.to_string(),
                    source: VersionSpecifierParseError::MissingOperator,
                });
            }
            let specifier =
                VersionSpecifier::from_str(part).map_err(|source| VersionSpecifiersParseError {
                    line: s.to_string(),
                    source,
                })?;
            specifiers.push(specifier);
        }
        Ok(Self(specifiers))
    }
}

impl Display for VersionSpecifiers {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (idx, specifier) in self.0.iter().enumerate() {
            if idx == 0 {
                write!(f, "{specifier}")?;
            } else {
                write!(f, ",{specifier}")?;
            }
        }
        Ok(())
    }
}

impl Serialize for VersionSpecifiers {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for VersionSpecifiers {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(de::Error::custom)
    }
}

/// A single comparison such as `>1.2.3`, `~=4.1` or `== 4.1.*`.
#[derive(Eq, PartialEq, Debug, Clone, Hash)]
pub struct VersionSpecifier {
    operator: Operator,
    version: Version,
}

impl VersionSpecifier {
    /// Build from parts, checking the operator/version combination.
    ///
    /// `star` marks a trailing `.*` and switches `==`/`!=` to their wildcard forms.
    pub fn new(
        operator: Operator,
        version: Version,
        star: bool,
    ) -> Result<Self, VersionSpecifierParseError> {
        let operator = if star {
            operator
                .to_star()
                .ok_or(VersionSpecifierParseError::OperatorWithStar(operator))?
        } else {
            operator
        };

        if version.is_local()
            && !matches!(
                operator,
                Operator::Equal | Operator::ExactEqual | Operator::NotEqual
            )
        {
            return Err(VersionSpecifierParseError::OperatorLocalCombo {
                operator,
                version: version.to_string(),
            });
        }

        if operator == Operator::TildeEqual && version.release.len() < 2 {
            return Err(VersionSpecifierParseError::CompatibleRelease);
        }

        Ok(Self { operator, version })
    }

    /// `==<version>`
    pub fn equals_version(version: Version) -> Self {
        Self {
            operator: Operator::Equal,
            version,
        }
    }

    pub fn operator(&self) -> Operator {
        self.operator
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn into_parts(self) -> (Operator, Version) {
        (self.operator, self.version)
    }

    pub fn any_prerelease(&self) -> bool {
        self.version.any_prerelease()
    }

    /// Whether `version` satisfies this specifier.
    ///
    /// See <https://peps.python.org/pep-0440/#version-specifiers>.
    pub fn contains(&self, version: &Version) -> bool {
        // Local labels are ignored unless the specifier itself carries one.
        let other = if self.version.is_local() {
            version.clone()
        } else {
            version.without_local()
        };
        let this = &self.version;

        match self.operator {
            Operator::Equal => other == *this,
            Operator::EqualStar => {
                this.epoch == other.epoch && release_prefix_matches(&this.release, &other.release)
            }
            Operator::ExactEqual => this.to_string() == version.to_string(),
            Operator::NotEqual => other != *this,
            Operator::NotEqualStar => {
                this.epoch != other.epoch
                    || !release_prefix_matches(&this.release, &other.release)
            }
            Operator::TildeEqual => {
                // `~=V.N` is `>=V.N, ==V.*`.
                let prefix = &this.release[..this.release.len() - 1];
                this.epoch == other.epoch
                    && release_prefix_matches(prefix, &other.release)
                    && other >= *this
            }
            Operator::GreaterThan => greater_than(this, &other),
            Operator::GreaterThanEqual => other >= *this,
            Operator::LessThan => less_than(this, &other),
            Operator::LessThanEqual => other <= *this,
        }
    }
}

/// `this` padded with zeros is a prefix of `other`.
fn release_prefix_matches(this: &[u64], other: &[u64]) -> bool {
    this.iter()
        .enumerate()
        .all(|(idx, segment)| other.get(idx).copied().unwrap_or(0) == *segment)
}

/// `<V` excludes pre-releases of `V` itself unless `V` is one.
fn less_than(this: &Version, other: &Version) -> bool {
    if !this.any_prerelease()
        && other.any_prerelease()
        && this.epoch == other.epoch
        && compare_release(&this.release, &other.release) == Ordering::Equal
    {
        return false;
    }
    other < this
}

/// `>V` excludes post-releases and local versions of `V` itself unless `V` is a post-release.
fn greater_than(this: &Version, other: &Version) -> bool {
    if this.epoch == other.epoch
        && compare_release(&this.release, &other.release) == Ordering::Equal
    {
        if !this.is_post() && other.is_post() {
            return false;
        }
        if other.is_local() {
            return false;
        }
    }
    other > this
}

impl FromStr for VersionSpecifier {
    type Err = VersionSpecifierParseError;

    /// Parses `>= 1.19`, `== 1.1.*`, `~=1.0` or `<=1!2012.2`.
    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let mut s = unscanny::Scanner::new(spec);
        s.eat_whitespace();
        let operator = s.eat_while(['=', '!', '~', '<', '>']);
        if operator.is_empty() {
            return Err(VersionSpecifierParseError::MissingOperator);
        }
        let operator =
            Operator::from_str(operator).map_err(VersionSpecifierParseError::InvalidOperator)?;
        s.eat_whitespace();
        let version = s.eat_while(|c: char| !c.is_whitespace());
        if version.is_empty() {
            return Err(VersionSpecifierParseError::MissingVersion);
        }
        let (version, star) =
            Version::from_str_star(version).map_err(VersionSpecifierParseError::InvalidVersion)?;
        s.eat_whitespace();
        if !s.done() {
            return Err(VersionSpecifierParseError::InvalidTrailing(
                s.after().to_string(),
            ));
        }
        Self::new(operator, version, star)
    }
}

impl Display for VersionSpecifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.operator {
            Operator::EqualStar | Operator::NotEqualStar => {
                write!(f, "{}{}.*", self.operator, self.version)
            }
            _ => write!(f, "{}{}", self.operator, self.version),
        }
    }
}

impl Serialize for VersionSpecifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for VersionSpecifier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(de::Error::custom)
    }
}

/// A single specifier failed to parse.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VersionSpecifierParseError {
    #[error("Unexpected end of version specifier, expected operator")]
    MissingOperator,
    #[error("{0}")]
    InvalidOperator(String),
    #[error("Unexpected end of version specifier, expected version")]
    MissingVersion,
    #[error(transparent)]
    InvalidVersion(#[from] VersionParseError),
    #[error("Trailing `{0}` is not allowed")]
    InvalidTrailing(String),
    #[error("Operator {0} cannot be used with a wildcard version specifier")]
    OperatorWithStar(Operator),
    #[error("Operator {operator} is incompatible with the local version `{version}`")]
    OperatorLocalCombo { operator: Operator, version: String },
    #[error("The ~= operator requires at least two segments in the release version")]
    CompatibleRelease,
}

/// A comma-separated specifier set failed to parse.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Failed to parse version specifiers `{line}`")]
pub struct VersionSpecifiersParseError {
    line: String,
    #[source]
    source: VersionSpecifierParseError,
}

impl VersionSpecifiersParseError {
    pub fn line(&self) -> &str {
        &self.line
    }
}
