use std::collections::BTreeSet;
use std::str::FromStr;

use pinion_normalize::ExtraName;
use pinion_pep508::{MarkerExpression, MarkerOperator, MarkerTree, MarkerValue, MarkerVariable};

/// Remove every `extra == "..."` clause from `marker`, at any depth.
///
/// A compound left with a single operand collapses into it. Returns `None` if nothing but `extra`
/// clauses were present.
pub fn strip_extra(marker: &MarkerTree) -> Option<MarkerTree> {
    let (children, is_and) = match marker {
        MarkerTree::Expression(expression) if expression.mentions_extra() => return None,
        MarkerTree::Expression(_) => return Some(marker.clone()),
        MarkerTree::And(children) => (children, true),
        MarkerTree::Or(children) => (children, false),
    };

    let mut children = children.clone();
    // Back to front, so that removals don't shift the indices still to visit.
    for idx in (0..children.len()).rev() {
        match strip_extra(&children[idx]) {
            Some(child) => children[idx] = child,
            None => {
                children.remove(idx);
            }
        }
    }

    match children.len() {
        0 => None,
        1 => children.pop(),
        _ if is_and => Some(MarkerTree::And(children)),
        _ => Some(MarkerTree::Or(children)),
    }
}

/// [`strip_extra`] for an optional marker.
pub fn without_extra(marker: Option<&MarkerTree>) -> Option<MarkerTree> {
    marker.and_then(strip_extra)
}

/// The extra named by a `extra == "<name>"` clause.
fn asserted_extra(expression: &MarkerExpression) -> Option<ExtraName> {
    if expression.operator != MarkerOperator::Equal {
        return None;
    }
    let value = match (&expression.l_value, &expression.r_value) {
        (MarkerValue::Variable(MarkerVariable::Extra), MarkerValue::QuotedString(value))
        | (MarkerValue::QuotedString(value), MarkerValue::Variable(MarkerVariable::Extra)) => {
            value
        }
        _ => return None,
    };
    ExtraName::from_str(value).ok()
}

/// Every extra asserted anywhere in `marker` through `extra == "<name>"`.
pub fn contained_extras(marker: Option<&MarkerTree>) -> BTreeSet<ExtraName> {
    let Some(marker) = marker else {
        return BTreeSet::new();
    };
    // Generators append the extra clause last.
    marker
        .expressions()
        .into_iter()
        .rev()
        .filter_map(asserted_extra)
        .collect()
}

/// Whether `marker` contains any clause on the `extra` variable.
pub fn contains_extra(marker: Option<&MarkerTree>) -> bool {
    marker.is_some_and(|marker| {
        marker
            .expressions()
            .into_iter()
            .rev()
            .any(MarkerExpression::mentions_extra)
    })
}
