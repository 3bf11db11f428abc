use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};
use std::iter;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

/// The PEP 440 appendix B regex, extended with a trailing `.*` for specifier matching.
const VERSION_PATTERN: &str = r"
    v?
    (?:(?P<epoch>[0-9]+)!)?
    (?P<release>[0-9]+(?:\.[0-9]+)*)
    (?P<pre_field>
        [-_\.]?
        (?P<pre_name>alpha|beta|preview|pre|rc|a|b|c)
        [-_\.]?
        (?P<pre>[0-9]+)?
    )?
    (?P<post_field>
        (?:-(?P<post_old>[0-9]+))
        |
        (?:[-_\.]?(?P<post_l>post|rev|r)[-_\.]?(?P<post_new>[0-9]+)?)
    )?
    (?P<dev_field>
        [-_\.]?
        dev
        [-_\.]?
        (?P<dev>[0-9]+)?
    )?
    (?:\+(?P<local>[a-z0-9]+(?:[-_\.][a-z0-9]+)*))?
    (?P<trailing_dot_star>\.\*)?
";

static VERSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?xi)^\s*{VERSION_PATTERN}\s*$"))
        .unwrap_or_else(|err| unreachable!("invalid version regex: {err}"))
});

/// One of `~=` `==` `!=` `<=` `>=` `<` `>` `===`, with the `.*` forms split out.
#[derive(Eq, PartialEq, Debug, Hash, Clone, Copy, PartialOrd, Ord)]
pub enum Operator {
    /// `== 1.2.3`
    Equal,
    /// `== 1.2.*`
    EqualStar,
    /// `===`
    ExactEqual,
    /// `!= 1.2.3`
    NotEqual,
    /// `!= 1.2.*`
    NotEqualStar,
    /// `~=`
    TildeEqual,
    /// `<`
    LessThan,
    /// `<=`
    LessThanEqual,
    /// `>`
    GreaterThan,
    /// `>=`
    GreaterThanEqual,
}

impl Operator {
    /// The wildcard form of this operator, if it has one.
    pub(crate) fn to_star(self) -> Option<Self> {
        match self {
            Self::Equal => Some(Self::EqualStar),
            Self::NotEqual => Some(Self::NotEqualStar),
            _ => None,
        }
    }

    /// The operator as written, without any wildcard suffix.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Equal | Self::EqualStar => "==",
            Self::ExactEqual => "===",
            Self::NotEqual | Self::NotEqualStar => "!=",
            Self::TildeEqual => "~=",
            Self::LessThan => "<",
            Self::LessThanEqual => "<=",
            Self::GreaterThan => ">",
            Self::GreaterThanEqual => ">=",
        }
    }
}

impl FromStr for Operator {
    type Err = String;

    /// Parses the plain operator; wildcards are handled by the specifier parser.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let operator = match s {
            "==" => Self::Equal,
            "===" => {
                tracing::debug!("Using arbitrary equality (`===`)");
                Self::ExactEqual
            }
            "!=" => Self::NotEqual,
            "~=" => Self::TildeEqual,
            "<" => Self::LessThan,
            "<=" => Self::LessThanEqual,
            ">" => Self::GreaterThan,
            ">=" => Self::GreaterThanEqual,
            other => {
                return Err(format!(
                    "No such comparison operator '{other}', must be one of ~= == != <= >= < > ==="
                ));
            }
        };
        Ok(operator)
    }
}

impl Display for Operator {
    /// `EqualStar` and `NotEqualStar` print without the star.
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alpha, beta or release candidate.
#[derive(PartialEq, Eq, Debug, Hash, Clone, Copy, Ord, PartialOrd)]
pub enum PreRelease {
    Alpha,
    Beta,
    Rc,
}

impl FromStr for PreRelease {
    type Err = String;

    fn from_str(prerelease: &str) -> Result<Self, Self::Err> {
        match prerelease.to_ascii_lowercase().as_str() {
            "a" | "alpha" => Ok(Self::Alpha),
            "b" | "beta" => Ok(Self::Beta),
            "c" | "rc" | "pre" | "preview" => Ok(Self::Rc),
            _ => Err(format!(
                "'{prerelease}' isn't recognized as alpha, beta or release candidate"
            )),
        }
    }
}

impl Display for PreRelease {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Alpha => f.write_str("a"),
            Self::Beta => f.write_str("b"),
            Self::Rc => f.write_str("rc"),
        }
    }
}

/// A segment of a [local version label](https://peps.python.org/pep-0440/#local-version-identifiers).
///
/// Numeric segments sort above alphanumeric ones; the derived `Ord` on `Vec<LocalSegment>`
/// then matches the PEP 440 rules for labels of different lengths.
#[derive(Eq, PartialEq, Debug, Clone, Hash)]
pub enum LocalSegment {
    String(String),
    Number(u64),
}

impl Display for LocalSegment {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String(string) => f.write_str(string),
            Self::Number(number) => write!(f, "{number}"),
        }
    }
}

impl PartialOrd for LocalSegment {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LocalSegment {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Number(n1), Self::Number(n2)) => n1.cmp(n2),
            (Self::String(s1), Self::String(s2)) => s1.cmp(s2),
            (Self::Number(_), Self::String(_)) => Ordering::Greater,
            (Self::String(_), Self::Number(_)) => Ordering::Less,
        }
    }
}

/// A version number such as `1.2.3` or `4!5.6.7-a8.post9.dev0`.
///
/// Ordering follows PEP 440 sorting, which is not the same as specifier matching: `1.0+local`
/// sorts above `1.0`, yet `==1.0` matches it.
#[derive(Debug, Clone)]
pub struct Version {
    pub epoch: u64,
    pub release: Vec<u64>,
    pub pre: Option<(PreRelease, u64)>,
    pub post: Option<u64>,
    pub dev: Option<u64>,
    pub local: Option<Vec<LocalSegment>>,
}

/// A string that is not a valid PEP 440 version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionParseError {
    version: String,
    reason: Option<String>,
}

impl Display for VersionParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Version `{}` doesn't match PEP 440 rules", self.version)?;
        if let Some(reason) = &self.reason {
            write!(f, ": {reason}")?;
        }
        Ok(())
    }
}

impl std::error::Error for VersionParseError {}

impl Version {
    /// A final release such as `3.8`.
    pub fn from_release(release: Vec<u64>) -> Self {
        Self {
            epoch: 0,
            release,
            pre: None,
            post: None,
            dev: None,
            local: None,
        }
    }

    pub fn release(&self) -> &[u64] {
        &self.release
    }

    /// Whether this is an alpha, beta, rc or dev version.
    pub fn any_prerelease(&self) -> bool {
        self.pre.is_some() || self.dev.is_some()
    }

    pub fn is_pre(&self) -> bool {
        self.pre.is_some()
    }

    pub fn is_post(&self) -> bool {
        self.post.is_some()
    }

    pub fn is_local(&self) -> bool {
        self.local.is_some()
    }

    pub(crate) fn without_local(&self) -> Self {
        Self {
            local: None,
            ..self.clone()
        }
    }

    /// Like [`Version::from_str`], but also accepts a trailing `.*` and reports whether it was
    /// present.
    pub fn from_str_star(version: &str) -> Result<(Self, bool), VersionParseError> {
        let captures = VERSION_RE.captures(version).ok_or_else(|| VersionParseError {
            version: version.to_string(),
            reason: None,
        })?;
        Self::from_captures(version, &captures)
    }

    fn from_captures(input: &str, captures: &Captures) -> Result<(Self, bool), VersionParseError> {
        let error = |reason: String| VersionParseError {
            version: input.to_string(),
            reason: Some(reason),
        };
        let number = |field: &str| -> Result<Option<u64>, VersionParseError> {
            captures
                .name(field)
                .map(|value| {
                    value
                        .as_str()
                        .parse::<u64>()
                        .map_err(|err| error(format!("`{}` in {field}: {err}", value.as_str())))
                })
                .transpose()
        };

        let epoch = number("epoch")?.unwrap_or_default();
        let release = captures
            .name("release")
            .ok_or_else(|| error("missing release segment".to_string()))?
            .as_str()
            .split('.')
            .map(|segment| segment.parse::<u64>().map_err(|err| error(err.to_string())))
            .collect::<Result<Vec<_>, _>>()?;
        let pre = captures
            .name("pre_name")
            .map(|name| PreRelease::from_str(name.as_str()).map_err(error))
            .transpose()?
            .map(|kind| number("pre").map(|n| (kind, n.unwrap_or_default())))
            .transpose()?;
        let post = if captures.name("post_field").is_some() {
            Some(number("post_new")?.or(number("post_old")?).unwrap_or_default())
        } else {
            None
        };
        let dev = if captures.name("dev_field").is_some() {
            Some(number("dev")?.unwrap_or_default())
        } else {
            None
        };
        let local = captures.name("local").map(|local| {
            local
                .as_str()
                .split(['-', '_', '.'])
                .map(|segment| match segment.parse::<u64>() {
                    Ok(number) => LocalSegment::Number(number),
                    Err(_) => LocalSegment::String(segment.to_ascii_lowercase()),
                })
                .collect()
        });

        let star = captures.name("trailing_dot_star").is_some();
        if star && (pre.is_some() || post.is_some() || dev.is_some() || local.is_some()) {
            return Err(error(
                "a trailing `.*` is only allowed on a plain release".to_string(),
            ));
        }

        Ok((
            Self {
                epoch,
                release,
                pre,
                post,
                dev,
                local,
            },
            star,
        ))
    }
}

impl FromStr for Version {
    type Err = VersionParseError;

    /// Parses `1.19`, `1.0a1`, `1.0+abc.5` or `1!2012.2`; a trailing `.*` is rejected.
    fn from_str(version: &str) -> Result<Self, Self::Err> {
        let (parsed, star) = Self::from_str_star(version)?;
        if star {
            return Err(VersionParseError {
                version: version.to_string(),
                reason: Some("a star is not allowed in a fixed version".to_string()),
            });
        }
        Ok(parsed)
    }
}

/// Normalised form, e.g. `1.0-alpha-1` prints as `1.0a1`.
impl Display for Version {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.epoch != 0 {
            write!(f, "{}!", self.epoch)?;
        }
        let mut release = self.release.iter();
        if let Some(first) = release.next() {
            write!(f, "{first}")?;
        }
        for segment in release {
            write!(f, ".{segment}")?;
        }
        if let Some((kind, number)) = &self.pre {
            write!(f, "{kind}{number}")?;
        }
        if let Some(post) = self.post {
            write!(f, ".post{post}")?;
        }
        if let Some(dev) = self.dev {
            write!(f, ".dev{dev}")?;
        }
        if let Some(local) = &self.local {
            let mut segments = local.iter();
            if let Some(first) = segments.next() {
                write!(f, "+{first}")?;
            }
            for segment in segments {
                write!(f, ".{segment}")?;
            }
        }
        Ok(())
    }
}

/// Release segments compare zero-padded: `1.1.0 == 1.1`.
pub(crate) fn compare_release(this: &[u64], other: &[u64]) -> Ordering {
    let len = this.len().max(other.len());
    let padded = |release: &[u64]| {
        release
            .iter()
            .copied()
            .chain(iter::repeat(0))
            .take(len)
            .collect::<Vec<_>>()
    };
    padded(this).cmp(&padded(other))
}

/// Suffix ordering for equal releases:
/// `.devN < aN < bN < rcN < (final) < .postN`, with dev suffixes sorting below their
/// pre- or post-release and local labels breaking the remaining ties.
fn suffix_key(version: &Version) -> (u8, u64, Option<u64>, u64, Option<&[LocalSegment]>) {
    let local = version.local.as_deref();
    match (&version.pre, &version.post, &version.dev) {
        (None, None, Some(dev)) => (0, 0, None, *dev, local),
        (Some((kind, n)), post, dev) => {
            let tier = match kind {
                PreRelease::Alpha => 1,
                PreRelease::Beta => 2,
                PreRelease::Rc => 3,
            };
            (tier, *n, *post, dev.unwrap_or(u64::MAX), local)
        }
        (None, None, None) => (4, 0, None, 0, local),
        (None, Some(post), dev) => (5, 0, Some(*post), dev.unwrap_or(u64::MAX), local),
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl Hash for Version {
    /// Trailing zeros are skipped to stay consistent with the zero-padding `Eq`.
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.epoch.hash(state);
        let significant = self
            .release
            .iter()
            .rposition(|segment| *segment != 0)
            .map_or(0, |last| last + 1);
        self.release[..significant].hash(state);
        self.pre.hash(state);
        self.post.hash(state);
        self.dev.hash(state);
        self.local.hash(state);
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.epoch
            .cmp(&other.epoch)
            .then_with(|| compare_release(&self.release, &other.release))
            .then_with(|| suffix_key(self).cmp(&suffix_key(other)))
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(de::Error::custom)
    }
}
