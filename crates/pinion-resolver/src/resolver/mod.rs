//! A backtracking dependency resolver.
//!
//! The resolver knows nothing about packages. A [`Provider`] tells it how to name requirements
//! and candidates, which candidates match a requirement and what a candidate depends on. Each
//! round pins the unsatisfied identifier the provider prefers most. When no candidate of that
//! identifier can be pinned without emptying some other identifier's candidate list, the most
//! recent pin is retracted and its candidate excluded.

use std::fmt::{Debug, Display, Formatter};
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use indexmap::IndexMap;
use rustc_hash::FxHashSet;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace};

pub use graph::ResolutionGraph;
pub use reporter::{Reporter, TracingReporter};

mod graph;
mod reporter;
#[cfg(test)]
mod tests;

/// The package-specific half of a resolution.
pub trait Provider {
    type Requirement: Clone + Debug + Display;
    type Candidate: Clone + Debug + Display + PartialEq;
    type Identifier: Clone + Debug + Display + Eq + Hash + Ord;
    /// Smaller preferences are resolved first.
    type Preference: Ord;
    type Error: std::error::Error + 'static;

    fn identify_requirement(&self, requirement: &Self::Requirement) -> Self::Identifier;

    fn identify_candidate(&self, candidate: &Self::Candidate) -> Self::Identifier;

    /// Rank an unsatisfied identifier against the others.
    fn get_preference(
        &self,
        identifier: &Self::Identifier,
        resolution: Option<&Self::Candidate>,
        candidates: &[Self::Candidate],
        information: &[RequirementInformation<Self::Requirement, Self::Candidate>],
    ) -> Self::Preference;

    /// Every candidate that may satisfy `requirement`, least preferred first.
    fn find_matches(
        &mut self,
        requirement: &Self::Requirement,
    ) -> impl Future<Output = Result<Vec<Self::Candidate>, Self::Error>>;

    fn is_satisfied_by(
        &mut self,
        requirement: &Self::Requirement,
        candidate: &Self::Candidate,
    ) -> bool;

    fn get_dependencies(
        &mut self,
        candidate: &Self::Candidate,
    ) -> impl Future<Output = Result<Vec<Self::Requirement>, Self::Error>>;
}

/// A requirement, and the candidate that introduced it (`None` for a root requirement).
#[derive(Debug, Clone)]
pub struct RequirementInformation<R, C> {
    pub requirement: R,
    pub parent: Option<C>,
}

impl<R: Display, C: Display> Display for RequirementInformation<R, C> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.parent {
            Some(parent) => write!(f, "{} (from {parent})", self.requirement),
            None => write!(f, "{}", self.requirement),
        }
    }
}

/// What is known about one identifier: the candidates still in play, the requirements that
/// narrowed them down and the candidates excluded by backtracking.
#[derive(Debug, Clone)]
pub struct Criterion<R, C> {
    pub candidates: Vec<C>,
    pub information: Vec<RequirementInformation<R, C>>,
    pub incompatibilities: Vec<C>,
}

impl<R: Clone, C: Clone + PartialEq> Criterion<R, C> {
    /// The candidates that brought in a requirement on this identifier.
    pub fn parents(&self) -> impl Iterator<Item = Option<&C>> {
        self.information.iter().map(|information| information.parent.as_ref())
    }

    /// A copy without `candidate`, or `None` if it was the last one.
    fn excluded_of(&self, candidate: &C) -> Option<Self> {
        let candidates = self
            .candidates
            .iter()
            .filter(|other| *other != candidate)
            .cloned()
            .collect::<Vec<_>>();
        if candidates.is_empty() {
            return None;
        }
        let mut incompatibilities = self.incompatibilities.clone();
        incompatibilities.push(candidate.clone());
        Some(Self {
            candidates,
            information: self.information.clone(),
            incompatibilities,
        })
    }
}

#[derive(Debug, Error)]
pub enum ResolutionError<R, C, E>
where
    R: Debug + Display,
    C: Debug + Display,
{
    #[error("No versions satisfy every requirement:\n{}", Causes(.0))]
    Impossible(Vec<RequirementInformation<R, C>>),
    #[error("Resolution did not settle within {0} rounds")]
    TooDeep(usize),
    #[error("Resolution was cancelled")]
    Cancelled,
    #[error(transparent)]
    Provider(E),
}

struct Causes<'a, R, C>(&'a [RequirementInformation<R, C>]);

impl<R: Display, C: Display> Display for Causes<'_, R, C> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (idx, cause) in self.0.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            write!(f, "  {cause}")?;
        }
        Ok(())
    }
}

/// The outcome of a successful resolution.
#[derive(Debug)]
pub struct Resolution<I, R, C> {
    /// The pinned candidate of every identifier reachable from the root, in pinning order.
    pub mapping: IndexMap<I, C>,
    pub graph: ResolutionGraph<I>,
    pub criteria: IndexMap<I, Criterion<R, C>>,
}

type ResolutionOf<P> = Resolution<
    <P as Provider>::Identifier,
    <P as Provider>::Requirement,
    <P as Provider>::Candidate,
>;

type ErrorOf<P> = ResolutionError<
    <P as Provider>::Requirement,
    <P as Provider>::Candidate,
    <P as Provider>::Error,
>;

type CriterionOf<P> = Criterion<<P as Provider>::Requirement, <P as Provider>::Candidate>;

#[derive(Debug)]
struct State<I, R, C> {
    mapping: IndexMap<I, C>,
    criteria: IndexMap<I, Criterion<R, C>>,
}

impl<I: Clone, R: Clone, C: Clone> Clone for State<I, R, C> {
    fn clone(&self) -> Self {
        Self {
            mapping: self.mapping.clone(),
            criteria: self.criteria.clone(),
        }
    }
}

impl<I, R, C> Default for State<I, R, C> {
    fn default() -> Self {
        Self {
            mapping: IndexMap::new(),
            criteria: IndexMap::new(),
        }
    }
}

type StateOf<P> = State<
    <P as Provider>::Identifier,
    <P as Provider>::Requirement,
    <P as Provider>::Candidate,
>;

/// Merging a requirement into a criterion either empties its candidates or fails outright.
enum MergeError<R, C, E> {
    Conflict(Criterion<R, C>),
    Provider(E),
}

type MergeErrorOf<P> = MergeError<
    <P as Provider>::Requirement,
    <P as Provider>::Candidate,
    <P as Provider>::Error,
>;

pub struct Resolver<P: Provider> {
    provider: P,
    reporter: Option<Arc<dyn Reporter<P::Identifier, P::Candidate>>>,
    cancellation: CancellationToken,
}

impl<P: Provider> Resolver<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            reporter: None,
            cancellation: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_reporter(self, reporter: Arc<dyn Reporter<P::Identifier, P::Candidate>>) -> Self {
        Self {
            reporter: Some(reporter),
            ..self
        }
    }

    /// Abort the resolution at the next round boundary once `cancellation` fires.
    #[must_use]
    pub fn with_cancellation(self, cancellation: CancellationToken) -> Self {
        Self {
            cancellation,
            ..self
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn into_provider(self) -> P {
        self.provider
    }

    /// Resolve `requirements`, giving up after `max_rounds` pinning rounds.
    #[instrument(skip_all, fields(requirements = requirements.len()))]
    pub async fn resolve(
        &mut self,
        requirements: Vec<P::Requirement>,
        max_rounds: usize,
    ) -> Result<ResolutionOf<P>, ErrorOf<P>> {
        let mut run = Run {
            provider: &mut self.provider,
            reporter: self.reporter.as_deref(),
            states: vec![State::default()],
        };

        if let Some(reporter) = run.reporter {
            reporter.starting();
        }

        for requirement in requirements {
            match run.merge_into_criterion(requirement, None, None).await {
                Ok((name, criterion)) => {
                    run.state_mut().criteria.insert(name, criterion);
                }
                Err(MergeError::Conflict(criterion)) => {
                    return Err(ResolutionError::Impossible(criterion.information));
                }
                Err(MergeError::Provider(err)) => return Err(ResolutionError::Provider(err)),
            }
        }

        for round in 0..max_rounds {
            if self.cancellation.is_cancelled() {
                return Err(ResolutionError::Cancelled);
            }
            if let Some(reporter) = run.reporter {
                reporter.starting_round(round);
            }
            trace!("Starting round {round}");

            run.push_new_state();

            let unsatisfied = run.unsatisfied();
            let Some(name) = run.most_preferred(unsatisfied) else {
                // Every criterion holds. The state pushed above is an unchanged copy.
                let state = run.states.pop().unwrap_or_default();
                if let Some(reporter) = run.reporter {
                    reporter.ending(&state.mapping);
                }
                debug!("Resolution settled after {} rounds", round + 1);
                return Ok(build_result(run.provider, state));
            };

            let failure_causes = run.attempt_to_pin_criterion(name).await?;
            if !failure_causes.is_empty() && !run.backtrack() {
                let causes = failure_causes
                    .into_iter()
                    .flat_map(|criterion| criterion.information)
                    .collect();
                return Err(ResolutionError::Impossible(causes));
            }

            if let Some(reporter) = run.reporter {
                reporter.ending_round(round, &run.state().mapping);
            }
        }

        Err(ResolutionError::TooDeep(max_rounds))
    }
}

/// The mutable state of a single [`Resolver::resolve`] call.
struct Run<'a, P: Provider> {
    provider: &'a mut P,
    reporter: Option<&'a dyn Reporter<P::Identifier, P::Candidate>>,
    states: Vec<StateOf<P>>,
}

impl<P: Provider> Run<'_, P> {
    fn state(&self) -> &StateOf<P> {
        &self.states[self.states.len() - 1]
    }

    fn state_mut(&mut self) -> &mut StateOf<P> {
        let last = self.states.len() - 1;
        &mut self.states[last]
    }

    fn push_new_state(&mut self) {
        let state = self.state().clone();
        self.states.push(state);
    }

    /// Fold `requirement` into the criterion of its identifier, looking the criterion up in
    /// `pending` before the current state.
    async fn merge_into_criterion(
        &mut self,
        requirement: P::Requirement,
        parent: Option<P::Candidate>,
        pending: Option<&IndexMap<P::Identifier, CriterionOf<P>>>,
    ) -> Result<(P::Identifier, CriterionOf<P>), MergeErrorOf<P>> {
        let name = self.provider.identify_requirement(&requirement);
        let existing = pending
            .and_then(|pending| pending.get(&name))
            .or_else(|| self.states[self.states.len() - 1].criteria.get(&name));

        let criterion = if let Some(existing) = existing {
            let provider = &mut *self.provider;
            let candidates = existing
                .candidates
                .iter()
                .filter(|candidate| provider.is_satisfied_by(&requirement, candidate))
                .cloned()
                .collect();
            let mut information = existing.information.clone();
            information.push(RequirementInformation {
                requirement,
                parent,
            });
            Criterion {
                candidates,
                information,
                incompatibilities: existing.incompatibilities.clone(),
            }
        } else {
            let candidates = self
                .provider
                .find_matches(&requirement)
                .await
                .map_err(MergeError::Provider)?;
            Criterion {
                candidates,
                information: vec![RequirementInformation {
                    requirement,
                    parent,
                }],
                incompatibilities: Vec::new(),
            }
        };

        if criterion.candidates.is_empty() {
            return Err(MergeError::Conflict(criterion));
        }
        Ok((name, criterion))
    }

    /// The identifiers whose current pin, if any, fails one of their requirements.
    fn unsatisfied(&mut self) -> Vec<P::Identifier> {
        let state = &self.states[self.states.len() - 1];
        let provider = &mut *self.provider;
        state
            .criteria
            .iter()
            .filter(|(name, criterion)| {
                let Some(pin) = state.mapping.get(*name) else {
                    return true;
                };
                !criterion
                    .information
                    .iter()
                    .all(|information| provider.is_satisfied_by(&information.requirement, pin))
            })
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// The first identifier with the smallest preference.
    fn most_preferred(&self, names: Vec<P::Identifier>) -> Option<P::Identifier> {
        let state = self.state();
        names.into_iter().min_by_key(|name| {
            let criterion = &state.criteria[name];
            self.provider.get_preference(
                name,
                state.mapping.get(name),
                &criterion.candidates,
                &criterion.information,
            )
        })
    }

    /// The updated criteria of every dependency of `candidate`.
    async fn criteria_to_update(
        &mut self,
        candidate: &P::Candidate,
    ) -> Result<IndexMap<P::Identifier, CriterionOf<P>>, MergeErrorOf<P>> {
        let dependencies = self
            .provider
            .get_dependencies(candidate)
            .await
            .map_err(MergeError::Provider)?;
        let mut criteria = IndexMap::new();
        for dependency in dependencies {
            let (name, criterion) = self
                .merge_into_criterion(dependency, Some(candidate.clone()), Some(&criteria))
                .await?;
            criteria.insert(name, criterion);
        }
        Ok(criteria)
    }

    /// Pin the most preferred workable candidate of `name`.
    ///
    /// Returns the conflicting criteria if no candidate works, or nothing if one was pinned.
    async fn attempt_to_pin_criterion(
        &mut self,
        name: P::Identifier,
    ) -> Result<Vec<CriterionOf<P>>, ErrorOf<P>> {
        let candidates = self.state().criteria[&name].candidates.clone();
        let mut causes = Vec::new();
        for candidate in candidates.into_iter().rev() {
            let criteria = match self.criteria_to_update(&candidate).await {
                Ok(criteria) => criteria,
                Err(MergeError::Conflict(criterion)) => {
                    trace!("Pinning {candidate} conflicts");
                    causes.push(criterion);
                    continue;
                }
                Err(MergeError::Provider(err)) => return Err(ResolutionError::Provider(err)),
            };

            if let Some(reporter) = self.reporter {
                reporter.pinning(&candidate);
            }
            let state = self.state_mut();
            // Re-inserting moves the pin to the end, keeping the mapping in pinning order.
            state.mapping.shift_remove(&name);
            state.mapping.insert(name, candidate);
            state.criteria.extend(criteria);
            return Ok(Vec::new());
        }
        Ok(causes)
    }

    /// Retract the most recent pin that has an alternative, excluding the retracted candidate.
    ///
    /// Returns `false` once every state is exhausted.
    fn backtrack(&mut self) -> bool {
        self.states.pop();
        while self.states.len() >= 2 {
            let Some(mut previous) = self.states.pop() else {
                break;
            };
            let Some((name, candidate)) = previous.mapping.pop() else {
                continue;
            };
            if let Some(reporter) = self.reporter {
                reporter.backtracking(&candidate);
            }
            debug!("Backtracking from {candidate}");
            self.push_new_state();

            let excluded = self
                .state()
                .criteria
                .get(&name)
                .and_then(|criterion| criterion.excluded_of(&candidate));
            match excluded {
                Some(criterion) => {
                    self.state_mut().criteria.insert(name, criterion);
                    return true;
                }
                None => {
                    self.states.pop();
                }
            }
        }
        false
    }
}

/// Keep the pins that a chain of pinned parents connects to the root, and wire up the graph.
fn build_result<P: Provider>(provider: &P, state: StateOf<P>) -> ResolutionOf<P> {
    let mut connected = FxHashSet::default();
    connected.insert(None);
    for key in state.criteria.keys() {
        let mut visiting = FxHashSet::default();
        has_route_to_root(provider, &state, key, &mut connected, &mut visiting);
    }

    let mut graph = ResolutionGraph::default();
    for (key, criterion) in &state.criteria {
        let key = Some(key.clone());
        if !connected.contains(&key) {
            continue;
        }
        graph.add(key.clone());
        for parent in criterion.parents() {
            let Some(parent_key) = pinned_parent(provider, &state, parent) else {
                continue;
            };
            if connected.contains(&parent_key) {
                graph.connect(parent_key, key.clone());
            }
        }
    }

    let mapping = state
        .mapping
        .into_iter()
        .filter(|(key, _)| connected.contains(&Some(key.clone())))
        .collect();

    Resolution {
        mapping,
        graph,
        criteria: state.criteria,
    }
}

/// The key of `parent`, if it is the root or the candidate actually pinned for its identifier.
fn pinned_parent<P: Provider>(
    provider: &P,
    state: &StateOf<P>,
    parent: Option<&P::Candidate>,
) -> Option<Option<P::Identifier>> {
    let Some(parent) = parent else {
        return Some(None);
    };
    let key = provider.identify_candidate(parent);
    (state.mapping.get(&key) == Some(parent)).then_some(Some(key))
}

fn has_route_to_root<P: Provider>(
    provider: &P,
    state: &StateOf<P>,
    key: &P::Identifier,
    connected: &mut FxHashSet<Option<P::Identifier>>,
    visiting: &mut FxHashSet<P::Identifier>,
) -> bool {
    if connected.contains(&Some(key.clone())) {
        return true;
    }
    let Some(criterion) = state.criteria.get(key) else {
        return false;
    };
    visiting.insert(key.clone());
    for parent in criterion.parents() {
        let Some(parent_key) = pinned_parent(provider, state, parent) else {
            continue;
        };
        let reachable = match &parent_key {
            None => true,
            Some(parent_key) if connected.contains(&Some(parent_key.clone())) => true,
            Some(parent_key) if visiting.contains(parent_key) => false,
            Some(parent_key) => has_route_to_root(provider, state, parent_key, connected, visiting),
        };
        if reachable {
            connected.insert(Some(key.clone()));
            return true;
        }
    }
    false
}
