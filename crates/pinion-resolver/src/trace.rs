use std::collections::BTreeMap;
use std::hash::Hash;

use petgraph::graph::NodeIndex;
use rustc_hash::FxHashSet;

use crate::resolver::ResolutionGraph;

/// One justification for a package: the keys from the root (`None`) down to, but excluding, the
/// package itself.
pub type Route<I> = Vec<Option<I>>;

/// Every route to every key of a graph. The root maps to no routes.
pub type Traces<I> = BTreeMap<Option<I>, Vec<Route<I>>>;

/// Enumerate every simple path from the root to each key of `graph`.
///
/// Paths never visit a key twice, so cycles terminate while diamonds yield one route per
/// branch. A direct dependency of the root gets the single route `[None]`.
pub fn trace_graph<I: Clone + Eq + Hash + Ord>(graph: &ResolutionGraph<I>) -> Traces<I> {
    let mut traces = Traces::new();
    traces.insert(None, Vec::new());

    let roots = graph.children(&None);
    for target in graph.keys() {
        let Some(target) = target else {
            continue;
        };
        let mut routes = Vec::new();
        for root in &roots {
            let mut visited = FxHashSet::default();
            visited.extend(graph.index(&None));
            let mut path = vec![None];
            visit(graph, root, target, &mut visited, &mut path, &mut routes);
        }
        traces.insert(Some(target.clone()), routes);
    }
    traces
}

fn visit<I: Clone + Eq + Hash + Ord>(
    graph: &ResolutionGraph<I>,
    current: &Option<I>,
    target: &I,
    visited: &mut FxHashSet<NodeIndex>,
    path: &mut Route<I>,
    routes: &mut Vec<Route<I>>,
) {
    if current.as_ref() == Some(target) {
        routes.push(path.clone());
        return;
    }
    let Some(index) = graph.index(current) else {
        return;
    };

    visited.insert(index);
    path.push(current.clone());
    for child in graph.children(current) {
        if child == current || graph.index(child).is_some_and(|child| visited.contains(&child)) {
            continue;
        }
        visit(graph, child, target, visited, path, routes);
    }
    path.pop();
    visited.remove(&index);
}

#[cfg(test)]
mod tests {
    use insta::assert_snapshot;
    use itertools::Itertools;

    use super::*;

    fn render(traces: &Traces<&'static str>) -> String {
        assert_eq!(traces[&None], Vec::<Route<&str>>::new());
        traces
            .iter()
            .filter_map(|(key, routes)| Some((key.as_ref()?, routes)))
            .map(|(key, routes)| {
                let routes = routes
                    .iter()
                    .map(|route| route.iter().map(|key| key.unwrap_or("<root>")).join(" -> "))
                    .join(" | ");
                format!("{key}: {routes}")
            })
            .join("\n")
    }

    #[test]
    fn diamond() {
        let mut graph = ResolutionGraph::default();
        graph.connect(None, Some("a"));
        graph.connect(None, Some("b"));
        graph.connect(Some("a"), Some("c"));
        graph.connect(Some("b"), Some("c"));

        let traces = trace_graph(&graph);
        assert_eq!(traces[&Some("c")].len(), 2);
        assert_snapshot!(render(&traces), @r"
        a: <root>
        b: <root>
        c: <root> -> a | <root> -> b
        ");
    }

    #[test]
    fn cycles_terminate() {
        let mut graph = ResolutionGraph::default();
        graph.connect(None, Some("a"));
        graph.connect(Some("a"), Some("b"));
        graph.connect(Some("b"), Some("a"));
        graph.connect(Some("b"), Some("b"));
        graph.connect(Some("b"), Some("c"));

        assert_snapshot!(render(&trace_graph(&graph)), @r"
        a: <root>
        b: <root> -> a
        c: <root> -> a -> b
        ");
    }

    #[test]
    fn shared_dependency_reached_from_root_and_parent() {
        let mut graph = ResolutionGraph::default();
        graph.connect(None, Some("a"));
        graph.connect(None, Some("b"));
        graph.connect(Some("a"), Some("b"));

        let traces = trace_graph(&graph);
        assert_eq!(
            traces[&Some("b")],
            vec![vec![None, Some("a")], vec![None]]
        );
    }
}
