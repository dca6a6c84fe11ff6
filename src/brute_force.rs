//! Exhaustive optimizer for small instances.
//!
//! Evaluates every event of the search space. Mostly useful as an oracle
//! when checking the tree search.

use itertools::Itertools;

use crate::error::{CertError, CertResult};
use crate::event::{Outcome, Score};
use crate::event_tree::EventTree;
use crate::objective::{check_domain, Objective};
use crate::optimizer::{Optimizer, PreSolution, StopMode};

pub struct BruteForceOpt {
    /// Outcomes enumerated for every party.
    levels: Vec<Vec<Outcome>>,
    n_leaves: u64,
}

impl BruteForceOpt {
    /// Enumerate the raw outcome domain `0..n_outcomes` of every party.
    pub fn new(n_parties: usize, n_outcomes: u8) -> CertResult<Self> {
        let level: Vec<Outcome> = (0..n_outcomes).map(Outcome::Value).collect();
        Self::from_levels(vec![level; n_parties])
    }

    /// Enumerate the same events as the leaves of `tree`.
    pub fn from_tree(tree: &EventTree) -> CertResult<Self> {
        let levels = (0..tree.get_depth())
            .map(|d| tree.level_outcomes(d).map(|l| l.to_vec()))
            .collect::<CertResult<Vec<_>>>()?;
        Self::from_levels(levels)
    }

    pub fn from_levels(levels: Vec<Vec<Outcome>>) -> CertResult<Self> {
        if levels.is_empty() {
            return Err(CertError::ZeroDepth);
        }
        if let Some(empty) = levels.iter().position(|l| l.is_empty()) {
            return Err(CertError::EmptyLevel(empty));
        }
        let n_leaves = levels
            .iter()
            .try_fold(1u64, |acc, l| acc.checked_mul(l.len() as u64))
            .ok_or(CertError::TreeTooLarge)?;
        Ok(BruteForceOpt { levels, n_leaves })
    }

    pub fn n_parties(&self) -> usize {
        self.levels.len()
    }

    pub fn get_n_leaves(&self) -> u64 {
        self.n_leaves
    }
}

impl Optimizer for BruteForceOpt {
    fn name(&self) -> &'static str {
        "brute_force"
    }

    fn optimize<O: Objective>(
        &mut self,
        objective: &O,
        stop_mode: StopMode,
    ) -> CertResult<PreSolution> {
        if objective.n_parties() != self.n_parties() {
            return Err(CertError::PartyMismatch {
                expected: self.n_parties(),
                got: objective.n_parties(),
            });
        }
        check_domain(objective, self.levels.iter().map(|l| l.as_slice()))?;

        let mut local = objective.clone();
        let mut best: Option<PreSolution> = None;
        let mut n_visited = 0u64;

        for event in self
            .levels
            .iter()
            .map(|l| l.iter().copied())
            .multi_cartesian_product()
        {
            for (party, &o) in event.iter().enumerate() {
                local.set_outcome(party, o);
            }
            let score: Score = local.evaluate();
            n_visited += 1;

            let candidate = PreSolution::new(score, event);
            if best.as_ref().map_or(true, |b| candidate.is_better_than(b)) {
                best = Some(candidate);
            }
            if stop_mode.is_satisfied_by(score) {
                log::debug!("brute force hit the threshold after {} events", n_visited);
                break;
            }
        }

        let mut best = best.ok_or(CertError::ZeroDepth)?;
        best.n_leaves_effective = Some(n_visited);
        Ok(best)
    }
}
