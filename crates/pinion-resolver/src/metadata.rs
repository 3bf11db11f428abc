//! Combined environment markers for resolved packages.
//!
//! Every route from the root to a package contributes the markers and Python constraints of the
//! edges along it. A package is needed when any of its routes applies, so its final marker is the
//! disjunction of the per-route conjunctions.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use indexmap::IndexMap;
use itertools::Itertools;
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use pinion_pep440::{VersionSpecifier, VersionSpecifiers};
use pinion_pep508::MarkerTree;
use pinion_types::{Candidate, Requirement};
use pinion_warnings::warn_user;

use crate::Identifier;
use crate::markers::without_extra;
use crate::specifiers::{Joiner, cleanup_pyspecs, pyspec_from_markers};
use crate::trace::{Route, Traces};

/// The dependencies each candidate requested, keyed by the candidate's identifier (`None` for the
/// root requirements) and then by the dependency's identifier.
pub type DependencyTable = FxHashMap<Option<Identifier>, IndexMap<Identifier, Requirement>>;

/// The Requires-Python each candidate declared, keyed like [`DependencyTable`].
pub type RequiresPythonTable = FxHashMap<Option<Identifier>, String>;

/// The markers and Python version constraints accumulated along one route.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetaSet {
    markers: BTreeSet<String>,
    python: Vec<VersionSpecifier>,
}

impl MetaSet {
    /// Whether the route applies everywhere.
    pub fn is_unconditional(&self) -> bool {
        self.markers.is_empty() && self.python.is_empty()
    }

    /// Extend the route by one edge.
    ///
    /// A marker that is a single `python_version` clause joins the Python constraints instead of
    /// the markers.
    #[must_use]
    pub fn and(&self, marker: Option<&MarkerTree>, python: &[VersionSpecifier]) -> Self {
        let mut metaset = self.clone();
        metaset.add_python(python);
        if let Some(marker) = marker {
            match pyspec_from_markers(marker) {
                Some(specifiers) => metaset.add_python(&specifiers),
                None => {
                    metaset.markers.insert(marker.to_string());
                }
            }
        }
        metaset
    }

    fn add_python(&mut self, specifiers: &[VersionSpecifier]) {
        for specifier in specifiers {
            if !self.python.contains(specifier) {
                self.python.push(specifier.clone());
            }
        }
    }
}

impl Display for MetaSet {
    /// Render as `<markers> and <python_version clauses>`, sorted and deduplicated.
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        // Single quotes throughout, so that equal markers compare equal as strings.
        let markers = self.markers.iter().map(|marker| {
            let marker = marker.replace('"', "'");
            if marker.contains(" or ") {
                format!("({marker})")
            } else {
                marker
            }
        });
        let pyspecs = cleanup_pyspecs(&self.python, Joiner::And)
            .into_iter()
            .map(|pyspec| pyspec.to_string());
        let clauses = markers.chain(pyspecs).collect::<BTreeSet<_>>();
        f.write_str(&clauses.iter().join(" and "))
    }
}

/// The marker of a package reached through `metasets`, or `None` if it is needed everywhere.
pub fn format_metasets(metasets: &[MetaSet]) -> Option<MarkerTree> {
    if metasets.is_empty() || metasets.iter().any(MetaSet::is_unconditional) {
        return None;
    }
    let joined = metasets
        .iter()
        .map(ToString::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(|metaset| {
            if metaset.contains(" and ") {
                format!("({metaset})")
            } else {
                metaset
            }
        })
        .join(" or ");
    match MarkerTree::from_str(&joined) {
        Ok(marker) => Some(marker),
        Err(err) => {
            warn!("Failed to parse combined marker `{joined}`: {err}");
            None
        }
    }
}

/// Set the marker of every candidate from the routes that lead to it.
///
/// `dependencies` holds the requirement behind each edge and `pythons` the Requires-Python of each
/// parent. Packages whose routes form a cycle of mutually unknown parents cannot be computed; they
/// are reported and left unconditional.
pub fn set_metadata(
    candidates: &mut IndexMap<Identifier, Candidate>,
    traces: &Traces<Identifier>,
    dependencies: &DependencyTable,
    pythons: &RequiresPythonTable,
) {
    let metasets = calculate_metasets(traces, dependencies, pythons);
    for (key, candidate) in candidates.iter_mut() {
        candidate.markers = metasets
            .get(&Some(key.clone()))
            .and_then(|metasets| format_metasets(metasets));
    }
}

fn calculate_metasets(
    traces: &Traces<Identifier>,
    dependencies: &DependencyTable,
    pythons: &RequiresPythonTable,
) -> FxHashMap<Option<Identifier>, Vec<MetaSet>> {
    let mut computed = FxHashMap::default();
    computed.insert(None, vec![MetaSet::default()]);

    let mut pending = traces
        .iter()
        .filter_map(|(key, routes)| Some((key.as_ref()?, routes)))
        .collect::<BTreeMap<_, _>>();

    while !pending.is_empty() {
        let ready = pending
            .iter()
            .filter_map(|(key, routes)| {
                let metasets = build_metasets(key, routes, dependencies, pythons, &computed)?;
                Some((*key, metasets))
            })
            .collect::<Vec<_>>();

        if ready.is_empty() {
            let stuck = pending.keys().join(", ");
            warn!("Marker aggregation made no progress; leaving unconditional: {stuck}");
            warn_user!(
                "Could not compute markers for {stuck}; they will be installed unconditionally"
            );
            break;
        }

        for (key, metasets) in ready {
            pending.remove(key);
            computed.insert(Some(key.clone()), metasets);
        }
    }

    computed
}

/// The metasets of `key`, or `None` while any of its parents is still unknown.
fn build_metasets(
    key: &Identifier,
    routes: &[Route<Identifier>],
    dependencies: &DependencyTable,
    pythons: &RequiresPythonTable,
    computed: &FxHashMap<Option<Identifier>, Vec<MetaSet>>,
) -> Option<Vec<MetaSet>> {
    let mut parents = Vec::with_capacity(routes.len());
    for route in routes {
        let Some(parent) = route.last() else {
            continue;
        };
        parents.push((parent, computed.get(parent)?));
    }

    let mut metasets = Vec::new();
    for (parent, parent_metasets) in parents {
        let marker = dependencies
            .get(parent)
            .and_then(|requirements| requirements.get(key))
            .and_then(|requirement| without_extra(requirement.marker.as_ref()));
        let python = parse_requires_python(pythons.get(parent).map(String::as_str));
        metasets.extend(
            parent_metasets
                .iter()
                .map(|metaset| metaset.and(marker.as_ref(), &python)),
        );
    }
    Some(metasets)
}

fn parse_requires_python(requires_python: Option<&str>) -> Vec<VersionSpecifier> {
    let Some(requires_python) = requires_python.filter(|value| !value.trim().is_empty()) else {
        return Vec::new();
    };
    match VersionSpecifiers::from_str(requires_python) {
        Ok(specifiers) => specifiers.into_inner(),
        Err(err) => {
            debug!("Ignoring invalid Requires-Python `{requires_python}`: {err}");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use insta::assert_snapshot;
    use pinion_normalize::PackageName;
    use pinion_pep440::Version;

    use super::*;
    use crate::resolver::ResolutionGraph;
    use crate::trace::trace_graph;

    fn marker(s: &str) -> MarkerTree {
        MarkerTree::from_str(s).unwrap()
    }

    fn specifiers(s: &str) -> Vec<VersionSpecifier> {
        VersionSpecifiers::from_str(s).unwrap().into_inner()
    }

    fn id(name: &str) -> Identifier {
        Identifier::new(&PackageName::from_str(name).unwrap(), &[])
    }

    fn candidate(name: &str) -> Candidate {
        Candidate::from_release(
            PackageName::from_str(name).unwrap(),
            Vec::new(),
            Version::from_str("1.0").unwrap(),
            None,
        )
    }

    fn requirement(s: &str) -> Requirement {
        Requirement::from_str(s).unwrap()
    }

    #[test]
    fn metaset_rendering() {
        let metaset = MetaSet::default()
            .and(Some(&marker("os_name == 'nt'")), &specifiers(">=3.6"))
            .and(Some(&marker("python_version < '3.10'")), &[])
            .and(
                Some(&marker("sys_platform == 'linux' or sys_platform == 'darwin'")),
                &specifiers(">=3.7"),
            );
        assert_snapshot!(
            metaset,
            @r#"(sys_platform == 'linux' or sys_platform == 'darwin') and os_name == 'nt' and python_version < '3.10' and python_version >= '3.7'"#
        );
        assert!(MetaSet::default().is_unconditional());
        assert!(MetaSet::default().and(None, &[]).is_unconditional());
    }

    #[test]
    fn compound_python_markers_stay_whole() {
        let metaset = MetaSet::default().and(
            Some(&marker("python_version >= '3.6' and os_name == 'nt'")),
            &[],
        );
        assert!(metaset.python.is_empty());
        assert_eq!(metaset.markers.len(), 1);
        let rendered = metaset.to_string();
        assert!(rendered.contains("python_version >= '3.6'"), "{rendered}");
        assert!(rendered.contains("os_name == 'nt'"), "{rendered}");
    }

    #[test]
    fn unconditional_route_wins() {
        let conditional = MetaSet::default().and(Some(&marker("os_name == 'nt'")), &[]);
        assert_eq!(format_metasets(&[]), None);
        assert_eq!(
            format_metasets(&[conditional.clone(), MetaSet::default()]),
            None
        );
        assert_snapshot!(
            format_metasets(&[conditional.clone(), conditional]).unwrap(),
            @r#"os_name == "nt""#
        );
    }

    #[test]
    fn routes_are_or_joined() {
        let windows = MetaSet::default().and(Some(&marker("sys_platform == 'win32'")), &[]);
        let old_python = MetaSet::default().and(None, &specifiers("<3.8,>=3.6"));
        assert_snapshot!(
            format_metasets(&[windows, old_python]).unwrap(),
            @r#"(python_version < "3.8" and python_version >= "3.6") or sys_platform == "win32""#
        );
    }

    #[test]
    fn diamond_markers() {
        let mut graph = ResolutionGraph::default();
        graph.connect(None, Some(id("a")));
        graph.connect(None, Some(id("b")));
        graph.connect(Some(id("a")), Some(id("c")));
        graph.connect(Some(id("b")), Some(id("c")));
        let traces = trace_graph(&graph);

        let mut dependencies = DependencyTable::default();
        dependencies.insert(
            None,
            IndexMap::from([
                (id("a"), requirement("a; sys_platform == 'win32'")),
                (id("b"), requirement("b")),
            ]),
        );
        dependencies.insert(Some(id("a")), IndexMap::from([(id("c"), requirement("c"))]));
        dependencies.insert(
            Some(id("b")),
            IndexMap::from([(
                id("c"),
                requirement("c; python_version < '3.8' and extra == 'speedups'"),
            )]),
        );

        let mut pythons = RequiresPythonTable::default();
        pythons.insert(None, String::new());
        pythons.insert(Some(id("a")), String::new());
        pythons.insert(Some(id("b")), ">=3.6".to_string());

        let mut candidates = ["a", "b", "c"]
            .into_iter()
            .map(|name| (id(name), candidate(name)))
            .collect::<IndexMap<_, _>>();
        set_metadata(&mut candidates, &traces, &dependencies, &pythons);

        let markers = candidates
            .iter()
            .map(|(key, candidate)| {
                let marker = candidate
                    .markers
                    .as_ref()
                    .map_or_else(|| "*".to_string(), ToString::to_string);
                format!("{key}: {marker}")
            })
            .join("\n");
        assert_snapshot!(markers, @r#"
        a: sys_platform == "win32"
        b: *
        c: (python_version < "3.8" and python_version >= "3.6") or sys_platform == "win32"
        "#);
    }

    #[test]
    fn cycles_without_a_known_parent_stay_unconditional() {
        let mut traces = Traces::new();
        traces.insert(None, Vec::new());
        traces.insert(Some(id("a")), vec![vec![None, Some(id("b"))]]);
        traces.insert(Some(id("b")), vec![vec![None, Some(id("a"))]]);

        let metasets = calculate_metasets(
            &traces,
            &DependencyTable::default(),
            &RequiresPythonTable::default(),
        );
        assert!(!metasets.contains_key(&Some(id("a"))));
        assert!(!metasets.contains_key(&Some(id("b"))));

        let mut candidates = IndexMap::from([(id("a"), candidate("a"))]);
        set_metadata(
            &mut candidates,
            &traces,
            &DependencyTable::default(),
            &RequiresPythonTable::default(),
        );
        assert_eq!(candidates[&id("a")].markers, None);
    }
}
