//! Symmetry contract consumed by the event tree.
//!
//! Orbit computation lives outside this crate. What the tree needs from a
//! symmetry group is the reduced set of outcomes kept at each party and a
//! generation counter, so that a tree built under one set of symmetry
//! assumptions is never searched after those assumptions changed.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{CertError, CertResult};
use crate::event::Outcome;

pub trait SymmetryGroup: Send + Sync {
    fn n_parties(&self) -> usize;

    /// Size of the raw outcome domain of every party.
    fn n_outcomes(&self) -> u8;

    /// Outcomes kept at `party` after symmetry reduction, in canonical order.
    fn reduced_outcomes(&self, party: usize) -> Vec<Outcome>;

    /// Bumped every time the group changes.
    fn generation(&self) -> u64;
}

/// Fail unless a structure built at generation `built` is still valid for `group`.
pub fn check_generation(built: u64, group: &dyn SymmetryGroup) -> CertResult<()> {
    let current = group.generation();
    if built != current {
        return Err(CertError::SymmetriesChanged { built, current });
    }
    Ok(())
}

/// A symmetry group described directly by its reduced outcome lists.
pub struct ReducedOutcomes {
    outcomes: Vec<Vec<Outcome>>,
    n_outcomes: u8,
    generation: AtomicU64,
}

impl ReducedOutcomes {
    /// No reduction: every party keeps its full outcome domain.
    pub fn full(n_parties: usize, n_outcomes: u8) -> CertResult<Self> {
        let level: Vec<Outcome> = (0..n_outcomes).map(Outcome::Value).collect();
        Self::new(vec![level; n_parties], n_outcomes)
    }

    /// Outcome-relabelling symmetry: every orbit has a member in which the
    /// first party outputs 0, so only that branch is kept at depth 0.
    pub fn relabelled(n_parties: usize, n_outcomes: u8) -> CertResult<Self> {
        let mut outcomes: Vec<Vec<Outcome>> = (0..n_parties)
            .map(|_| (0..n_outcomes).map(Outcome::Value).collect())
            .collect();
        if let Some(first) = outcomes.first_mut() {
            first.truncate(1);
        }
        Self::new(outcomes, n_outcomes)
    }

    pub fn new(outcomes: Vec<Vec<Outcome>>, n_outcomes: u8) -> CertResult<Self> {
        if outcomes.is_empty() {
            return Err(CertError::ZeroDepth);
        }
        for (party, level) in outcomes.iter().enumerate() {
            if level.is_empty() {
                return Err(CertError::EmptyLevel(party));
            }
            for &o in level {
                match o.value() {
                    Some(v) if v < n_outcomes => {}
                    _ => {
                        return Err(CertError::InvalidOutcome {
                            party,
                            outcome: o.to_string(),
                        })
                    }
                }
            }
        }
        Ok(ReducedOutcomes {
            outcomes,
            n_outcomes,
            generation: AtomicU64::new(0),
        })
    }

    /// Signal that the symmetry assumptions no longer hold.
    pub fn invalidate(&self) {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        log::warn!("symmetry group invalidated, now at generation {}", generation);
    }
}

impl SymmetryGroup for ReducedOutcomes {
    fn n_parties(&self) -> usize {
        self.outcomes.len()
    }

    fn n_outcomes(&self) -> u8 {
        self.n_outcomes
    }

    fn reduced_outcomes(&self, party: usize) -> Vec<Outcome> {
        self.outcomes.get(party).cloned().unwrap_or_default()
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relabelled_fixes_first_party() {
        let group = ReducedOutcomes::relabelled(3, 2).unwrap();
        assert_eq!(group.reduced_outcomes(0), vec![Outcome::Value(0)]);
        assert_eq!(group.reduced_outcomes(1).len(), 2);
        assert_eq!(group.reduced_outcomes(2).len(), 2);
    }

    #[test]
    fn invalidate_breaks_generation_check() {
        let group = ReducedOutcomes::full(2, 2).unwrap();
        let built = group.generation();
        assert!(check_generation(built, &group).is_ok());
        group.invalidate();
        assert!(matches!(
            check_generation(built, &group),
            Err(CertError::SymmetriesChanged { built: 0, current: 1 })
        ));
    }

    #[test]
    fn rejects_out_of_domain_outcome() {
        let res = ReducedOutcomes::new(vec![vec![Outcome::Value(2)]], 2);
        assert!(res.is_err());
        let res = ReducedOutcomes::new(vec![vec![Outcome::Unknown]], 2);
        assert!(res.is_err());
    }
}
