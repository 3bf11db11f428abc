//! [Dependency specifiers](https://packaging.python.org/en/latest/specifications/dependency-specifiers/)
//! as defined by [PEP 508](https://peps.python.org/pep-0508/), e.g.
//! `requests [security,tests] >= 2.8.1, == 2.8.* ; python_version > "3.8"`.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use url::Url;

use pinion_normalize::{ExtraName, PackageName};
use pinion_pep440::{VersionSpecifier, VersionSpecifiers};

pub use marker::{MarkerExpression, MarkerOperator, MarkerTree, MarkerValue, MarkerVariable};

use crate::cursor::Cursor;

mod cursor;
mod marker;

/// A parse error, with the byte span of the offending input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pep508Error {
    pub message: String,
    pub start: usize,
    pub len: usize,
    pub input: String,
}

impl Display for Pep508Error {
    /// The message, followed by the input with the span underlined.
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let indent = self.input[..self.start.min(self.input.len())].chars().count();
        let underline = if self.start >= self.input.len() {
            1
        } else {
            let end = (self.start + self.len).min(self.input.len());
            self.input[self.start..end].chars().count().max(1)
        };
        write!(
            f,
            "{}\n{}\n{}{}",
            self.message,
            self.input,
            " ".repeat(indent),
            "^".repeat(underline)
        )
    }
}

impl std::error::Error for Pep508Error {}

/// A PEP 508 dependency specification.
#[derive(Hash, Debug, Clone, Eq, PartialEq)]
pub struct Requirement {
    pub name: PackageName,
    pub extras: Vec<ExtraName>,
    pub version_or_url: Option<VersionOrUrl>,
    pub marker: Option<MarkerTree>,
}

/// Either a set of version specifiers or a direct URL.
#[derive(Hash, Debug, Clone, Eq, PartialEq)]
pub enum VersionOrUrl {
    VersionSpecifier(VersionSpecifiers),
    Url(Url),
}

impl Requirement {
    /// The version specifiers, empty for URL requirements and bare names.
    pub fn specifiers(&self) -> VersionSpecifiers {
        match &self.version_or_url {
            Some(VersionOrUrl::VersionSpecifier(specifiers)) => specifiers.clone(),
            Some(VersionOrUrl::Url(_)) | None => VersionSpecifiers::empty(),
        }
    }
}

impl Display for Requirement {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.extras.is_empty() {
            f.write_str("[")?;
            for (idx, extra) in self.extras.iter().enumerate() {
                if idx > 0 {
                    f.write_str(",")?;
                }
                write!(f, "{extra}")?;
            }
            f.write_str("]")?;
        }
        match &self.version_or_url {
            Some(VersionOrUrl::VersionSpecifier(specifiers)) => write!(f, "{specifiers}")?,
            Some(VersionOrUrl::Url(url)) => {
                // A space keeps the marker separator out of the URL.
                write!(f, " @ {url}")?;
                if self.marker.is_some() {
                    f.write_str(" ")?;
                }
            }
            None => {}
        }
        if let Some(marker) = &self.marker {
            write!(f, "; {marker}")?;
        }
        Ok(())
    }
}

impl FromStr for Requirement {
    type Err = Pep508Error;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        parse(&mut Cursor::new(input))
    }
}

impl Serialize for Requirement {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Requirement {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(de::Error::custom)
    }
}

/// ```text
/// name = ^([A-Z0-9]|[A-Z0-9][A-Z0-9._-]*[A-Z0-9])$
/// ```
fn parse_name(cursor: &mut Cursor) -> Result<PackageName, Pep508Error> {
    match cursor.peek() {
        Some((_, char)) if char.is_ascii_alphanumeric() => {}
        Some((pos, char)) => {
            return Err(cursor.error(
                format!(
                    "Expected package name starting with an alphanumeric character, found '{char}'"
                ),
                pos,
                char.len_utf8(),
            ));
        }
        None => return Err(cursor.error("Empty field is not allowed for PEP508", 0, 1)),
    }
    let (start, len) =
        cursor.take_while(|char| char.is_ascii_alphanumeric() || matches!(char, '.' | '-' | '_'));
    let name = cursor.slice(start, len);
    PackageName::new(name).map_err(|err| cursor.error(err.to_string(), start, len))
}

/// ```text
/// extras = '[' wsp* (identifier (wsp* ',' wsp* identifier)*)? wsp* ']'
/// ```
fn parse_extras(cursor: &mut Cursor) -> Result<Vec<ExtraName>, Pep508Error> {
    let Some(bracket_pos) = cursor.eat_char('[') else {
        return Ok(Vec::new());
    };
    let mut extras = Vec::new();
    loop {
        cursor.eat_whitespace();
        if extras.is_empty() && cursor.eat_char(']').is_some() {
            return Ok(extras);
        }
        let (start, len) = cursor
            .take_while(|char| char.is_ascii_alphanumeric() || matches!(char, '-' | '_' | '.'));
        if len == 0 {
            return match cursor.peek() {
                Some((pos, other)) => Err(cursor.error(
                    format!(
                        "Expected an alphanumeric character starting the extra name, found '{other}'"
                    ),
                    pos,
                    other.len_utf8(),
                )),
                None => Err(cursor.error(
                    "Missing closing bracket (expected ']', found end of dependency specification)",
                    bracket_pos,
                    1,
                )),
            };
        }
        let extra = ExtraName::new(cursor.slice(start, len))
            .map_err(|err| cursor.error(err.to_string(), start, len))?;
        extras.push(extra);
        cursor.eat_whitespace();
        match cursor.next() {
            Some((_, ',')) => {}
            Some((_, ']')) => return Ok(extras),
            Some((pos, other)) => {
                return Err(cursor.error(
                    format!(
                        "Expected either ',' (separating extras) or ']' (ending the extras section), found '{other}'"
                    ),
                    pos,
                    other.len_utf8(),
                ));
            }
            None => {
                return Err(cursor.error(
                    "Missing closing bracket (expected ']', found end of dependency specification)",
                    bracket_pos,
                    1,
                ));
            }
        }
    }
}

/// `@ <url>`, terminated by whitespace.
fn parse_url(cursor: &mut Cursor) -> Result<Url, Pep508Error> {
    cursor.eat_whitespace();
    let (start, len) = cursor.take_while(|char| !char.is_whitespace());
    if len == 0 {
        return Err(cursor.error("Expected URL", start, 1));
    }
    Url::parse(cursor.slice(start, len)).map_err(|err| cursor.error(err.to_string(), start, len))
}

/// Comma-separated specifiers, optionally in parentheses, up to the marker separator.
fn parse_version_specifiers(cursor: &mut Cursor) -> Result<VersionSpecifiers, Pep508Error> {
    let parenthesized = cursor.eat_char('(');
    let mut specifiers = Vec::new();
    loop {
        cursor.eat_whitespace();
        let (start, len) = cursor.take_while(|char| !matches!(char, ',' | ';' | ')'));
        let text = cursor.slice(start, len);
        let specifier = VersionSpecifier::from_str(text)
            .map_err(|err| cursor.error(err.to_string(), start, len.max(1)))?;
        specifiers.push(specifier);
        match cursor.peek_char() {
            Some(',') => {
                cursor.next();
            }
            Some(')') if parenthesized.is_some() => {
                cursor.next();
                break;
            }
            _ => {
                if let Some(open) = parenthesized {
                    return Err(cursor.error(
                        "Missing closing parenthesis (expected ')', found end of dependency specification)",
                        open,
                        1,
                    ));
                }
                break;
            }
        }
    }
    Ok(specifiers.into_iter().collect())
}

/// ```text
/// specification = wsp* name wsp* extras? wsp* (('@' url) | versionspec)? wsp* (';' marker)? wsp*
/// ```
fn parse(cursor: &mut Cursor) -> Result<Requirement, Pep508Error> {
    cursor.eat_whitespace();
    let name = parse_name(cursor)?;
    cursor.eat_whitespace();
    let extras = parse_extras(cursor)?;
    cursor.eat_whitespace();

    let version_or_url = match cursor.peek() {
        Some((_, '@')) => {
            cursor.next();
            Some(VersionOrUrl::Url(parse_url(cursor)?))
        }
        Some((_, '(' | '<' | '=' | '>' | '~' | '!')) => Some(VersionOrUrl::VersionSpecifier(
            parse_version_specifiers(cursor)?,
        )),
        Some((_, ';')) | None => None,
        Some((pos, other)) => {
            return Err(cursor.error(
                format!("Expected one of `@`, `(`, `<`, `=`, `>`, `~`, `!`, `;`, found `{other}`"),
                pos,
                other.len_utf8(),
            ));
        }
    };

    cursor.eat_whitespace();
    let marker = if cursor.eat_char(';').is_some() {
        Some(marker::parse_markers_impl(cursor)?)
    } else {
        None
    };
    cursor.eat_whitespace();
    if let Some((pos, char)) = cursor.next() {
        let message = if marker.is_none() {
            format!("Expected end of input or ';', found '{char}'")
        } else {
            format!("Expected end of input, found '{char}'")
        };
        return Err(cursor.error(message, pos, char.len_utf8()));
    }

    Ok(Requirement {
        name,
        extras,
        version_or_url,
        marker,
    })
}
