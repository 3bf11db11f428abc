use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex};

use indexmap::IndexMap;
use insta::assert_snapshot;
use itertools::Itertools;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::*;

#[derive(Debug, Clone)]
struct Req {
    name: &'static str,
    versions: Vec<u32>,
}

impl Display for Req {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} in {:?}", self.name, self.versions)
    }
}

fn req(name: &'static str, versions: &[u32]) -> Req {
    Req {
        name,
        versions: versions.to_vec(),
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Pin {
    name: &'static str,
    version: u32,
}

impl Display for Pin {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}=={}", self.name, self.version)
    }
}

#[derive(Debug, Error)]
#[error("Unknown package `{0}`")]
struct Unknown(&'static str);

/// An in-memory index: every release of every package, with its dependencies.
#[derive(Default)]
struct Toy {
    packages: FxHashMap<&'static str, Vec<(u32, Vec<Req>)>>,
}

impl Toy {
    fn release(mut self, name: &'static str, version: u32, dependencies: Vec<Req>) -> Self {
        self.packages
            .entry(name)
            .or_default()
            .push((version, dependencies));
        self
    }
}

impl Provider for Toy {
    type Requirement = Req;
    type Candidate = Pin;
    type Identifier = &'static str;
    type Preference = usize;
    type Error = Unknown;

    fn identify_requirement(&self, requirement: &Req) -> &'static str {
        requirement.name
    }

    fn identify_candidate(&self, candidate: &Pin) -> &'static str {
        candidate.name
    }

    fn get_preference(
        &self,
        _identifier: &&'static str,
        _resolution: Option<&Pin>,
        candidates: &[Pin],
        _information: &[RequirementInformation<Req, Pin>],
    ) -> usize {
        candidates.len()
    }

    async fn find_matches(&mut self, requirement: &Req) -> Result<Vec<Pin>, Unknown> {
        let releases = self
            .packages
            .get(requirement.name)
            .ok_or(Unknown(requirement.name))?;
        Ok(releases
            .iter()
            .map(|(version, _)| *version)
            .filter(|version| requirement.versions.contains(version))
            .sorted()
            .map(|version| Pin {
                name: requirement.name,
                version,
            })
            .collect())
    }

    fn is_satisfied_by(&mut self, requirement: &Req, candidate: &Pin) -> bool {
        requirement.versions.contains(&candidate.version)
    }

    async fn get_dependencies(&mut self, candidate: &Pin) -> Result<Vec<Req>, Unknown> {
        let releases = self
            .packages
            .get(candidate.name)
            .ok_or(Unknown(candidate.name))?;
        Ok(releases
            .iter()
            .find(|(version, _)| *version == candidate.version)
            .map(|(_, dependencies)| dependencies.clone())
            .unwrap_or_default())
    }
}

fn pins(mapping: &IndexMap<&'static str, Pin>) -> String {
    mapping.values().map(ToString::to_string).sorted().join(", ")
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl Reporter<&'static str, Pin> for Recorder {
    fn pinning(&self, candidate: &Pin) {
        self.events.lock().unwrap().push(format!("pin {candidate}"));
    }

    fn backtracking(&self, candidate: &Pin) {
        self.events.lock().unwrap().push(format!("retract {candidate}"));
    }
}

#[tokio::test]
async fn picks_newest_versions() {
    let toy = Toy::default()
        .release("a", 1, vec![])
        .release("a", 2, vec![req("b", &[1, 2])])
        .release("b", 1, vec![])
        .release("b", 2, vec![])
        .release("b", 3, vec![]);

    let mut resolver = Resolver::new(toy);
    let resolution = resolver.resolve(vec![req("a", &[1, 2])], 100).await.unwrap();

    assert_snapshot!(pins(&resolution.mapping), @"a==2, b==2");
    assert_eq!(resolution.graph.children(&None), [&Some("a")]);
    assert_eq!(resolution.graph.children(&Some("a")), [&Some("b")]);
    assert_eq!(resolution.criteria["b"].candidates.len(), 2);
}

#[tokio::test]
async fn backtracks_out_of_a_dead_end() {
    let toy = Toy::default()
        .release("a", 1, vec![req("c", &[1])])
        .release("a", 2, vec![req("c", &[2])])
        .release("b", 1, vec![req("c", &[1])])
        .release("b", 2, vec![req("c", &[1])])
        .release("b", 3, vec![req("c", &[1])])
        .release("c", 1, vec![])
        .release("c", 2, vec![]);

    let recorder = Arc::new(Recorder::default());
    let mut resolver = Resolver::new(toy).with_reporter(recorder.clone());
    let resolution = resolver
        .resolve(vec![req("a", &[1, 2]), req("b", &[1, 2, 3])], 100)
        .await
        .unwrap();

    assert_snapshot!(pins(&resolution.mapping), @"a==1, b==3, c==1");
    assert_eq!(
        resolution.graph.parents(&Some("c")),
        [&Some("a"), &Some("b")]
    );
    assert_eq!(resolution.criteria["a"].incompatibilities, [Pin { name: "a", version: 2 }]);

    let events = recorder.events.lock().unwrap().join("\n");
    assert_snapshot!(events, @r"
    pin a==2
    pin c==2
    retract c==2
    retract a==2
    pin a==1
    pin c==1
    pin b==3
    ");
}

#[tokio::test]
async fn reports_conflicting_requirements() {
    let toy = Toy::default()
        .release("a", 1, vec![req("c", &[1])])
        .release("b", 1, vec![req("c", &[2])])
        .release("c", 1, vec![])
        .release("c", 2, vec![]);

    let mut resolver = Resolver::new(toy);
    let err = resolver
        .resolve(vec![req("a", &[1]), req("b", &[1])], 100)
        .await
        .unwrap_err();

    assert_snapshot!(err, @r"
    No versions satisfy every requirement:
      c in [1] (from a==1)
      c in [2] (from b==1)
    ");
}

#[tokio::test]
async fn unsatisfiable_root_requirement() {
    let toy = Toy::default().release("a", 1, vec![]);

    let mut resolver = Resolver::new(toy);
    let err = resolver
        .resolve(vec![req("a", &[2])], 100)
        .await
        .unwrap_err();

    assert!(matches!(err, ResolutionError::Impossible(ref causes) if causes.len() == 1));
}

#[tokio::test]
async fn provider_errors_propagate() {
    let toy = Toy::default().release("a", 1, vec![req("missing", &[1])]);

    let mut resolver = Resolver::new(toy);
    let err = resolver
        .resolve(vec![req("a", &[1])], 100)
        .await
        .unwrap_err();

    assert_snapshot!(err, @"Unknown package `missing`");
}

#[tokio::test]
async fn round_limit() {
    let toy = Toy::default()
        .release("a", 1, vec![])
        .release("b", 1, vec![]);

    let mut resolver = Resolver::new(toy);
    let err = resolver
        .resolve(vec![req("a", &[1]), req("b", &[1])], 1)
        .await
        .unwrap_err();

    assert!(matches!(err, ResolutionError::TooDeep(1)));
}

#[tokio::test]
async fn cancellation() {
    let toy = Toy::default().release("a", 1, vec![]);
    let cancellation = CancellationToken::new();
    cancellation.cancel();

    let mut resolver = Resolver::new(toy).with_cancellation(cancellation);
    let err = resolver
        .resolve(vec![req("a", &[1])], 100)
        .await
        .unwrap_err();

    assert!(matches!(err, ResolutionError::Cancelled));
}
