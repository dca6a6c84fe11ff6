//! Objective evaluators consumed by the optimizers.
//!
//! An objective is a linear functional over events, typically a dual vector
//! of the outer convex program. The search drives it incrementally: it fixes
//! one party's outcome at a time with `set_outcome` and asks for a score.
//! While some parties are still `Unknown`, the score must be a lower bound
//! on every completion of the partial event; once all are fixed it is the
//! exact score.
//!
//! The concrete evaluators below sum tables over marginals (subsets of
//! parties). Bound entries for tuples containing `Unknown` are precomputed
//! as the minimum over all completions, so a partial evaluation costs the
//! same as a full one.

use std::sync::Arc;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{CertError, CertResult};
use crate::event::{Outcome, Score};

pub trait Objective: Clone + Send + Sync {
    fn n_parties(&self) -> usize;

    /// Every party's outcomes are `0..n_outcomes`.
    fn n_outcomes(&self) -> u8;

    fn set_outcome(&mut self, party: usize, outcome: Outcome);

    /// Exact score of a complete event, lower bound of a partial one.
    fn evaluate(&self) -> Score;

    /// Whether partial evaluations are meaningful bounds. Without them the
    /// tree search cannot prune.
    fn stores_bounds(&self) -> bool {
        true
    }

    /// Score of a complete event, leaving `self` untouched.
    fn evaluate_event(&self, event: &[Outcome]) -> Score {
        let mut scratch = self.clone();
        for (party, &o) in event.iter().enumerate() {
            scratch.set_outcome(party, o);
        }
        scratch.evaluate()
    }
}

/// Reject search spaces containing outcomes `objective` cannot score.
/// `levels[k]` lists the outcomes enumerated for party `k`.
pub fn check_domain<'l, O, I>(objective: &O, levels: I) -> CertResult<()>
where
    O: Objective,
    I: IntoIterator<Item = &'l [Outcome]>,
{
    let n_outcomes = objective.n_outcomes();
    for (party, level) in levels.into_iter().enumerate() {
        if let Some(bad) = level.iter().find(|o| match o {
            Outcome::Value(v) => *v >= n_outcomes,
            Outcome::Unknown => false,
        }) {
            return Err(CertError::InvalidOutcome {
                party,
                outcome: bad.to_string(),
            });
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Marginal tables
// ---------------------------------------------------------------------------

/// Scores over the outcome tuples of a subset of parties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarginalTable {
    parties: Vec<usize>,
    n_outcomes: u8,
    /// Indexed by the mixed-radix hash in base `n_outcomes + 1`, first party
    /// most significant. The top digit stands for `Unknown`.
    values: Vec<Score>,
}

impl MarginalTable {
    /// `scores` lists the concrete tuples in lexicographic order (base `n_outcomes`).
    pub fn new(parties: Vec<usize>, n_outcomes: u8, scores: Vec<Score>) -> CertResult<Self> {
        if n_outcomes == 0 {
            return Err(CertError::InvalidValue(
                "marginal needs at least one outcome".to_string(),
            ));
        }
        let mut sorted = parties.clone();
        sorted.sort_unstable();
        sorted.dedup();
        if sorted.len() != parties.len() {
            return Err(CertError::InvalidValue(format!(
                "marginal parties {:?} contain duplicates",
                parties
            )));
        }

        let k = parties.len() as u32;
        let n = n_outcomes as usize;
        let n_concrete = n
            .checked_pow(k)
            .ok_or_else(|| CertError::InvalidValue("marginal is too large".to_string()))?;
        if scores.len() != n_concrete {
            return Err(CertError::InvalidValue(format!(
                "marginal over {} parties needs {} scores, got {}",
                k,
                n_concrete,
                scores.len()
            )));
        }
        let radix = n + 1;
        let size = radix
            .checked_pow(k)
            .ok_or_else(|| CertError::InvalidValue("marginal is too large".to_string()))?;

        let weights = radix_weights(parties.len(), radix);
        let concrete_weights = radix_weights(parties.len(), n);

        // Fill tuples by increasing number of unknowns: each bound entry is
        // the minimum over its first unknown digit, which has one fewer unknown.
        let mut order: Vec<(usize, usize)> = (0..size)
            .map(|h| (decode(h, &weights, radix).iter().filter(|&&d| d == n).count(), h))
            .collect();
        order.sort_unstable();

        let mut values = vec![0.0; size];
        for (n_unknown, h) in order {
            let digits = decode(h, &weights, radix);
            if n_unknown == 0 {
                let c: usize = digits
                    .iter()
                    .zip(&concrete_weights)
                    .map(|(d, w)| d * w)
                    .sum();
                values[h] = scores[c];
            } else {
                let j = digits.iter().position(|&d| d == n).unwrap_or(0);
                let base = h - n * weights[j];
                values[h] = (0..n)
                    .map(|o| values[base + o * weights[j]])
                    .fold(Score::INFINITY, Score::min);
            }
        }

        Ok(MarginalTable {
            parties,
            n_outcomes,
            values,
        })
    }

    /// Table whose concrete entries are `f(outcomes)`.
    pub fn from_fn(
        parties: Vec<usize>,
        n_outcomes: u8,
        f: impl Fn(&[u8]) -> Score,
    ) -> CertResult<Self> {
        let k = parties.len();
        let n = n_outcomes as usize;
        let n_concrete = n
            .checked_pow(k as u32)
            .ok_or_else(|| CertError::InvalidValue("marginal is too large".to_string()))?;
        let weights = radix_weights(k, n);
        let scores = (0..n_concrete)
            .map(|c| {
                let tuple: Vec<u8> = decode(c, &weights, n).iter().map(|&d| d as u8).collect();
                f(&tuple)
            })
            .collect();
        MarginalTable::new(parties, n_outcomes, scores)
    }

    pub fn parties(&self) -> &[usize] {
        &self.parties
    }

    pub fn n_outcomes(&self) -> u8 {
        self.n_outcomes
    }

    /// Entry for a tuple of outcomes of the marginal's parties.
    pub fn value(&self, outcomes: &[Outcome]) -> Score {
        let radix = self.n_outcomes as usize + 1;
        let h = outcomes
            .iter()
            .fold(0usize, |h, o| h * radix + o.slot(self.n_outcomes).min(radix - 1));
        self.values.get(h).copied().unwrap_or(Score::INFINITY)
    }
}

fn radix_weights(k: usize, radix: usize) -> Vec<usize> {
    let mut weights = vec![1usize; k];
    for j in (0..k.saturating_sub(1)).rev() {
        weights[j] = weights[j + 1] * radix;
    }
    weights
}

fn decode(mut h: usize, weights: &[usize], radix: usize) -> Vec<usize> {
    weights
        .iter()
        .map(|&w| {
            let d = (h / w) % radix;
            h %= w;
            d
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Evaluators
// ---------------------------------------------------------------------------

/// Incremental evaluation of one marginal table on a changing event.
#[derive(Debug, Clone)]
pub struct MarginalEvaluator {
    table: Arc<MarginalTable>,
    /// For every inflation party, its digit position in the marginal.
    slots: Vec<Option<usize>>,
    weights: Vec<usize>,
    digits: Vec<usize>,
    hash: usize,
}

impl MarginalEvaluator {
    pub fn new(table: Arc<MarginalTable>, n_parties: usize) -> CertResult<Self> {
        let mut slots = vec![None; n_parties];
        for (j, &party) in table.parties().iter().enumerate() {
            let slot = slots.get_mut(party).ok_or(CertError::PartyMismatch {
                expected: n_parties,
                got: party + 1,
            })?;
            *slot = Some(j);
        }
        let unknown = table.n_outcomes() as usize;
        let weights = radix_weights(table.parties().len(), unknown + 1);
        let digits = vec![unknown; weights.len()];
        let hash = weights.iter().map(|w| w * unknown).sum();
        Ok(MarginalEvaluator {
            table,
            slots,
            weights,
            digits,
            hash,
        })
    }

    #[inline]
    pub fn set_outcome(&mut self, party: usize, outcome: Outcome) {
        if let Some(&Some(j)) = self.slots.get(party) {
            let unknown = self.table.n_outcomes() as usize;
            let digit = outcome.slot(self.table.n_outcomes()).min(unknown);
            self.hash = self.hash - self.digits[j] * self.weights[j] + digit * self.weights[j];
            self.digits[j] = digit;
        }
    }

    #[inline]
    pub fn evaluate(&self) -> Score {
        self.table.values[self.hash]
    }
}

/// Sum of marginal evaluators sharing one event.
#[derive(Debug, Clone)]
pub struct EvaluatorSet {
    n_parties: usize,
    n_outcomes: u8,
    evaluators: Vec<MarginalEvaluator>,
    store_bounds: bool,
}

impl EvaluatorSet {
    pub fn new(n_parties: usize, n_outcomes: u8, tables: Vec<MarginalTable>) -> CertResult<Self> {
        if n_parties == 0 {
            return Err(CertError::ZeroDepth);
        }
        let evaluators = tables
            .into_iter()
            .map(|table| {
                if table.n_outcomes() != n_outcomes {
                    return Err(CertError::InvalidValue(format!(
                        "marginal has {} outcomes, expected {}",
                        table.n_outcomes(),
                        n_outcomes
                    )));
                }
                MarginalEvaluator::new(Arc::new(table), n_parties)
            })
            .collect::<CertResult<Vec<_>>>()?;
        Ok(EvaluatorSet {
            n_parties,
            n_outcomes,
            evaluators,
            store_bounds: true,
        })
    }

    /// Turn branch-and-bound support on or off.
    pub fn with_bounds(mut self, store_bounds: bool) -> Self {
        self.store_bounds = store_bounds;
        self
    }

    /// Score of an event is the sum of its outcome values.
    pub fn sum_of_outcomes(n_parties: usize, n_outcomes: u8) -> CertResult<Self> {
        let tables = (0..n_parties)
            .map(|party| MarginalTable::from_fn(vec![party], n_outcomes, |t| t[0] as Score))
            .collect::<CertResult<Vec<_>>>()?;
        EvaluatorSet::new(n_parties, n_outcomes, tables)
    }

    /// Uniform random scores in `[-1, 1)` on every listed marginal.
    pub fn random<R: Rng>(
        n_parties: usize,
        n_outcomes: u8,
        marginals: &[Vec<usize>],
        rng: &mut R,
    ) -> CertResult<Self> {
        let tables = marginals
            .iter()
            .map(|parties| {
                let n_concrete = (n_outcomes as usize).pow(parties.len() as u32);
                let scores = (0..n_concrete).map(|_| rng.gen_range(-1.0..1.0)).collect();
                MarginalTable::new(parties.clone(), n_outcomes, scores)
            })
            .collect::<CertResult<Vec<_>>>()?;
        EvaluatorSet::new(n_parties, n_outcomes, tables)
    }

    /// Marginals `{i, i + 1}` around a ring of parties.
    pub fn ring_pairs(n_parties: usize) -> Vec<Vec<usize>> {
        match n_parties {
            0 | 1 => vec![(0..n_parties).collect()],
            2 => vec![vec![0, 1]],
            _ => (0..n_parties).map(|i| vec![i, (i + 1) % n_parties]).collect(),
        }
    }

    pub fn n_outcomes(&self) -> u8 {
        self.n_outcomes
    }

    pub fn n_marginals(&self) -> usize {
        self.evaluators.len()
    }
}

impl Objective for EvaluatorSet {
    fn n_parties(&self) -> usize {
        self.n_parties
    }

    fn n_outcomes(&self) -> u8 {
        self.n_outcomes
    }

    #[inline]
    fn set_outcome(&mut self, party: usize, outcome: Outcome) {
        for evaluator in &mut self.evaluators {
            evaluator.set_outcome(party, outcome);
        }
    }

    #[inline]
    fn evaluate(&self) -> Score {
        self.evaluators.iter().map(|e| e.evaluate()).sum()
    }

    fn stores_bounds(&self) -> bool {
        self.store_bounds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bound_entries_are_minimum_over_completions() {
        let table =
            MarginalTable::new(vec![0, 1], 2, vec![3.0, -1.0, 2.0, 5.0]).unwrap();
        use Outcome::{Unknown, Value};
        assert_eq!(table.value(&[Value(0), Value(1)]), -1.0);
        assert_eq!(table.value(&[Value(1), Unknown]), 2.0);
        assert_eq!(table.value(&[Unknown, Value(1)]), -1.0);
        assert_eq!(table.value(&[Unknown, Unknown]), -1.0);
    }

    #[test]
    fn evaluator_tracks_outcome_changes() {
        let table = MarginalTable::from_fn(vec![2, 0], 3, |t| (t[0] * 10 + t[1]) as Score).unwrap();
        let mut eval = MarginalEvaluator::new(Arc::new(table), 3).unwrap();
        assert_eq!(eval.evaluate(), 0.0);
        eval.set_outcome(2, Outcome::Value(2));
        assert_eq!(eval.evaluate(), 20.0);
        eval.set_outcome(0, Outcome::Value(1));
        assert_eq!(eval.evaluate(), 21.0);
        eval.set_outcome(1, Outcome::Value(2));
        assert_eq!(eval.evaluate(), 21.0);
        eval.set_outcome(2, Outcome::Unknown);
        assert_eq!(eval.evaluate(), 1.0);
    }

    #[test]
    fn rejects_party_outside_event() {
        let table = MarginalTable::from_fn(vec![4], 2, |_| 0.0).unwrap();
        assert!(EvaluatorSet::new(3, 2, vec![table]).is_err());
    }

    #[test]
    fn ring_pairs_wrap_around() {
        assert_eq!(
            EvaluatorSet::ring_pairs(3),
            vec![vec![0, 1], vec![1, 2], vec![2, 0]]
        );
    }
}
