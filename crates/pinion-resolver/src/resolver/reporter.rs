use std::fmt::Display;
use std::hash::Hash;
use std::sync::{Mutex, PoisonError};

use indexmap::IndexMap;
use tracing::debug;

/// Hooks into the progress of a resolution. Every hook defaults to doing nothing.
pub trait Reporter<I, C> {
    /// Called before the first round.
    fn starting(&self) {}

    /// Called at the start of round `index`.
    fn starting_round(&self, _index: usize) {}

    /// Called at the end of round `index` with the pins made so far.
    fn ending_round(&self, _index: usize, _mapping: &IndexMap<I, C>) {}

    /// Called once the resolution is stable.
    fn ending(&self, _mapping: &IndexMap<I, C>) {}

    /// Called when `candidate` gets pinned.
    fn pinning(&self, _candidate: &C) {}

    /// Called when the pin of `candidate` is retracted.
    fn backtracking(&self, _candidate: &C) {}
}

/// Logs new and changed pins at the end of every round.
#[derive(Debug)]
pub struct TracingReporter<I, C> {
    previous: Mutex<IndexMap<I, C>>,
}

impl<I, C> Default for TracingReporter<I, C> {
    fn default() -> Self {
        Self {
            previous: Mutex::new(IndexMap::new()),
        }
    }
}

impl<I, C> Reporter<I, C> for TracingReporter<I, C>
where
    I: Clone + Eq + Hash + Display,
    C: Clone + PartialEq + Display,
{
    fn starting(&self) {
        debug!("Starting resolution");
    }

    fn ending_round(&self, index: usize, mapping: &IndexMap<I, C>) {
        let mut previous = self.previous.lock().unwrap_or_else(PoisonError::into_inner);
        for (key, candidate) in mapping {
            match previous.get(key) {
                None => debug!("Round {index}: pinned {candidate}"),
                Some(old) if old != candidate => {
                    debug!("Round {index}: changed {key} from {old} to {candidate}");
                }
                Some(_) => {}
            }
        }
        for (key, old) in previous.iter() {
            if !mapping.contains_key(key) {
                debug!("Round {index}: unpinned {old}");
            }
        }
        *previous = mapping.clone();
    }

    fn ending(&self, mapping: &IndexMap<I, C>) {
        debug!("Resolution finished with {} pins", mapping.len());
    }

    fn backtracking(&self, candidate: &C) {
        debug!("Backtracking from {candidate}");
    }
}
