//! Python version specifier arithmetic for lock file markers.
//!
//! The constraints collected along a dependency path are reduced to one `python_version` clause
//! per operator. Bounds are first rewritten into half-open `[lower, upper)` form so that the
//! tightest or loosest bound of each kind can be picked by comparing versions alone.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use itertools::Itertools;

use pinion_pep440::{Operator, Version, VersionSpecifier};
use pinion_pep508::{MarkerOperator, MarkerTree, MarkerValue, MarkerVariable};

/// How the merged specifiers combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Joiner {
    /// All specifiers must hold; the tightest bound wins.
    And,
    /// Any specifier may hold; the loosest bound wins.
    Or,
}

/// The operator of a merged `python_version` clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PySpecOperator {
    Specifier(Operator),
    In,
    NotIn,
}

impl Display for PySpecOperator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Specifier(operator) => write!(f, "{operator}"),
            Self::In => f.write_str("in"),
            Self::NotIn => f.write_str("not in"),
        }
    }
}

/// A merged `python_version` clause, e.g. `python_version >= '3.6'` or
/// `python_version not in '3.0, 3.1'`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PySpec {
    pub operator: PySpecOperator,
    pub version: String,
}

impl PySpec {
    /// The clause as a specifier, if it is a plain comparison.
    pub fn as_specifier(&self) -> Option<VersionSpecifier> {
        let PySpecOperator::Specifier(operator) = self.operator else {
            return None;
        };
        VersionSpecifier::from_str(&format!("{operator}{}", self.version)).ok()
    }
}

impl Display for PySpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "python_version {} '{}'", self.operator, self.version)
    }
}

/// Rewrite a specifier into half-open range form.
///
/// `==X.*` becomes `==X`. `>X` becomes `>=` and `<=X` becomes `<` against the next minor version
/// of `X` (`>3.6` is `>=3.7`, `<=3` is `<3.1`). Everything else is returned unchanged.
pub fn format_pyspec(specifier: &VersionSpecifier) -> VersionSpecifier {
    let version = specifier.version();
    let (operator, version) = match specifier.operator() {
        Operator::EqualStar => (Operator::Equal, version.clone()),
        Operator::GreaterThan => (Operator::GreaterThanEqual, next_minor(version)),
        Operator::LessThanEqual => (Operator::LessThan, next_minor(version)),
        _ => return specifier.clone(),
    };
    VersionSpecifier::new(operator, version, false).unwrap_or_else(|_| specifier.clone())
}

/// `(major, minor + 1)`, or `(major, 1)` for a single-segment version.
fn next_minor(version: &Version) -> Version {
    match version.release() {
        [major, minor, ..] => Version::from_release(vec![*major, minor + 1]),
        [major] => Version::from_release(vec![*major, 1]),
        [] => version.clone(),
    }
}

/// Merge specifiers into at most one clause per comparison operator.
///
/// Lower bounds (`>=`) keep the smallest version under [`Joiner::Or`] and the largest under
/// [`Joiner::And`]; upper bounds (`<`) the other way around. Several `==` or `!=` versions turn
/// into a single `in` or `not in` clause listing them; a single one is kept as is.
pub fn cleanup_pyspecs<'a>(
    specifiers: impl IntoIterator<Item = &'a VersionSpecifier>,
    joiner: Joiner,
) -> BTreeSet<PySpec> {
    let mut groups: BTreeMap<Operator, BTreeSet<Vec<u64>>> = BTreeMap::new();
    for specifier in specifiers {
        let specifier = format_pyspec(specifier);
        // Wildcards are compared by their prefix.
        let operator = match specifier.operator() {
            Operator::EqualStar => Operator::Equal,
            Operator::NotEqualStar => Operator::NotEqual,
            operator => operator,
        };
        groups
            .entry(operator)
            .or_default()
            .insert(specifier.version().release().to_vec());
    }

    let mut results = BTreeSet::new();
    for (operator, versions) in groups {
        let bound = match (operator, joiner) {
            (Operator::GreaterThan | Operator::GreaterThanEqual, Joiner::Or)
            | (Operator::LessThan | Operator::LessThanEqual, Joiner::And) => versions.first(),
            (Operator::GreaterThan | Operator::GreaterThanEqual, Joiner::And)
            | (Operator::LessThan | Operator::LessThanEqual, Joiner::Or) => versions.last(),
            _ => None,
        };
        if let Some(bound) = bound {
            results.insert(PySpec {
                operator: PySpecOperator::Specifier(operator),
                version: format_release(bound),
            });
            continue;
        }

        // Listed in string order.
        let versions = versions
            .iter()
            .map(|release| format_release(release))
            .sorted()
            .collect::<Vec<_>>();
        match (operator, versions.as_slice()) {
            (_, [version]) => {
                results.insert(PySpec {
                    operator: PySpecOperator::Specifier(operator),
                    version: version.clone(),
                });
            }
            (Operator::NotEqual, _) => {
                results.insert(PySpec {
                    operator: PySpecOperator::NotIn,
                    version: versions.join(", "),
                });
            }
            (Operator::Equal, _) => {
                results.insert(PySpec {
                    operator: PySpecOperator::In,
                    version: versions.join(", "),
                });
            }
            // `~=` and `===` have no list form.
            _ => {
                results.extend(versions.into_iter().map(|version| PySpec {
                    operator: PySpecOperator::Specifier(operator),
                    version,
                }));
            }
        }
    }
    results
}

fn format_release(release: &[u64]) -> String {
    release.iter().join(".")
}

/// Convert a marker consisting of a single `python_version` clause into specifiers.
///
/// `python_version in '2.7, 3.4'` yields one `==` per listed version and `not in` one `!=` per
/// version. Returns `None` for any other marker, including compound markers that merely contain
/// a `python_version` clause, so that callers keep those whole as markers instead of reading
/// only their first clause.
pub fn pyspec_from_markers(marker: &MarkerTree) -> Option<Vec<VersionSpecifier>> {
    let MarkerTree::Expression(expression) = marker else {
        return None;
    };
    if expression.l_value != MarkerValue::Variable(MarkerVariable::PythonVersion) {
        return None;
    }
    let value = expression.r_value.as_quoted()?;

    let specifiers = match expression.operator {
        MarkerOperator::In => value
            .split(',')
            .map(|version| VersionSpecifier::from_str(&format!("=={}", version.trim())).ok())
            .collect::<Option<Vec<_>>>()?,
        MarkerOperator::NotIn => value
            .split(',')
            .map(|version| VersionSpecifier::from_str(&format!("!={}", version.trim())).ok())
            .collect::<Option<Vec<_>>>()?,
        operator => vec![VersionSpecifier::from_str(&format!("{operator}{value}")).ok()?],
    };
    (!specifiers.is_empty()).then_some(specifiers)
}
