use std::io::BufRead;
use std::str::FromStr;

use pinion_normalize::ExtraName;
use pinion_pep508::{
    MarkerExpression, MarkerOperator, MarkerTree, MarkerValue, MarkerVariable, Requirement,
};

use crate::MetadataError;

/// `requires.txt` metadata as defined in <https://setuptools.pypa.io/en/latest/deprecated/python_eggs.html#dependency-metadata>.
///
/// Section headers become markers on the requirements below them: `[dev]` adds
/// `extra == "dev"`, `[:sys_platform == "win32"]` adds the marker as written, and
/// `[dev:sys_platform == "win32"]` adds both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequiresTxt {
    pub requires_dist: Vec<Requirement>,
    pub provides_extras: Vec<ExtraName>,
}

impl RequiresTxt {
    pub fn parse(content: &[u8]) -> Result<Self, MetadataError> {
        let mut requires_dist = vec![];
        let mut provides_extras = vec![];
        let mut current_marker: Option<MarkerTree> = None;

        for line in content.lines() {
            let line = line.map_err(MetadataError::RequiresTxtContents)?;

            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if line.starts_with('[') {
                let line = line.trim_start_matches('[').trim_end_matches(']');
                let (extra, marker) = match line.split_once(':') {
                    Some((extra, marker)) => (extra.trim(), marker.trim()),
                    None => (line.trim(), ""),
                };

                let marker = if marker.is_empty() {
                    None
                } else {
                    Some(MarkerTree::from_str(marker)?)
                };
                let extra = if extra.is_empty() {
                    None
                } else {
                    let extra = ExtraName::new(extra)?;
                    provides_extras.push(extra.clone());
                    Some(extra_marker(&extra))
                };

                current_marker = match (marker, extra) {
                    (Some(marker), Some(extra)) => Some(and(marker, extra)),
                    (Some(marker), None) => Some(marker),
                    (None, Some(extra)) => Some(extra),
                    (None, None) => None,
                };
                continue;
            }

            let mut requirement = Requirement::from_str(line)?;
            if let Some(section) = &current_marker {
                requirement.marker = Some(match requirement.marker.take() {
                    Some(own) => and(own, section.clone()),
                    None => section.clone(),
                });
            }
            requires_dist.push(requirement);
        }

        Ok(Self {
            requires_dist,
            provides_extras,
        })
    }
}

fn extra_marker(extra: &ExtraName) -> MarkerTree {
    MarkerTree::Expression(MarkerExpression {
        l_value: MarkerValue::Variable(MarkerVariable::Extra),
        operator: MarkerOperator::Equal,
        r_value: MarkerValue::QuotedString(extra.to_string()),
    })
}

/// Conjunction of two markers, flattening nested `And`s.
fn and(left: MarkerTree, right: MarkerTree) -> MarkerTree {
    let mut children = Vec::new();
    for tree in [left, right] {
        match tree {
            MarkerTree::And(nested) => children.extend(nested),
            tree => children.push(tree),
        }
    }
    MarkerTree::And(children)
}
