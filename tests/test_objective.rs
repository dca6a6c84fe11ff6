//! Tests for marginal-table objectives.

use approx::assert_abs_diff_eq;
use itertools::Itertools;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use inflation_cert::error::CertError;
use inflation_cert::event::{event_from_values, Outcome};
use inflation_cert::objective::{EvaluatorSet, MarginalTable, Objective};

fn all_events(n_parties: usize, n_outcomes: u8) -> Vec<Vec<Outcome>> {
    (0..n_parties)
        .map(|_| (0..n_outcomes).map(Outcome::Value))
        .multi_cartesian_product()
        .collect()
}

#[test]
fn sum_of_outcomes_scores_events() {
    let objective = EvaluatorSet::sum_of_outcomes(3, 4).unwrap();
    assert_eq!(objective.evaluate_event(&event_from_values(&[0, 0, 0])), 0.0);
    assert_eq!(objective.evaluate_event(&event_from_values(&[3, 1, 2])), 6.0);
    assert_eq!(objective.n_marginals(), 3);
}

#[test]
fn evaluate_event_leaves_objective_untouched() {
    let mut objective = EvaluatorSet::sum_of_outcomes(2, 3).unwrap();
    objective.set_outcome(0, Outcome::Value(2));
    let before = objective.evaluate();
    objective.evaluate_event(&event_from_values(&[1, 1]));
    assert_eq!(objective.evaluate(), before);
}

#[test]
fn partial_scores_bound_every_completion() {
    let mut rng = StdRng::seed_from_u64(7);
    let n_parties = 4;
    let n_outcomes = 3;
    let pairs = EvaluatorSet::ring_pairs(n_parties);
    let objective = EvaluatorSet::random(n_parties, n_outcomes, &pairs, &mut rng).unwrap();
    let events = all_events(n_parties, n_outcomes);

    for fixed in 0..=n_parties {
        for prefix in events.iter().map(|e| &e[..fixed]).unique() {
            let mut partial = objective.clone();
            for (party, &o) in prefix.iter().enumerate() {
                partial.set_outcome(party, o);
            }
            let bound = partial.evaluate();
            let best_completion = events
                .iter()
                .filter(|e| e.starts_with(prefix))
                .map(|e| objective.evaluate_event(e))
                .fold(f64::INFINITY, f64::min);
            assert!(
                bound <= best_completion,
                "bound {} exceeds completion {} for prefix {:?}",
                bound,
                best_completion,
                prefix
            );
        }
    }
}

#[test]
fn single_marginal_bound_is_tight() {
    let table = MarginalTable::new(vec![1], 3, vec![2.0, -0.5, 1.0]).unwrap();
    let objective = EvaluatorSet::new(2, 3, vec![table]).unwrap();
    assert_eq!(objective.evaluate(), -0.5);
}

#[test]
fn incremental_updates_match_fresh_evaluation() {
    let mut rng = StdRng::seed_from_u64(11);
    let n_parties = 5;
    let n_outcomes = 3;
    let marginals = vec![vec![0, 1, 2], vec![2, 4], vec![3], vec![4, 0]];
    let objective = EvaluatorSet::random(n_parties, n_outcomes, &marginals, &mut rng).unwrap();

    let mut running = objective.clone();
    let mut event = vec![Outcome::Unknown; n_parties];
    for _ in 0..200 {
        let party = rng.gen_range(0..n_parties);
        let outcome = if rng.gen_bool(0.2) {
            Outcome::Unknown
        } else {
            Outcome::Value(rng.gen_range(0..n_outcomes))
        };
        running.set_outcome(party, outcome);
        event[party] = outcome;
        assert_abs_diff_eq!(running.evaluate(), objective.evaluate_event(&event), epsilon = 1e-12);
    }
}

#[test]
fn same_seed_gives_same_objective() {
    let pairs = EvaluatorSet::ring_pairs(3);
    let a = EvaluatorSet::random(3, 2, &pairs, &mut StdRng::seed_from_u64(3)).unwrap();
    let b = EvaluatorSet::random(3, 2, &pairs, &mut StdRng::seed_from_u64(3)).unwrap();
    for e in all_events(3, 2) {
        assert_eq!(a.evaluate_event(&e), b.evaluate_event(&e));
    }
}

#[test]
fn bounds_can_be_switched_off() {
    let objective = EvaluatorSet::sum_of_outcomes(2, 2).unwrap();
    assert!(objective.stores_bounds());
    assert!(!objective.with_bounds(false).stores_bounds());
}

#[test]
fn malformed_tables_are_rejected() {
    assert!(MarginalTable::new(vec![0, 1], 2, vec![0.0; 3]).is_err());
    assert!(MarginalTable::new(vec![0, 0], 2, vec![0.0; 4]).is_err());
    assert!(MarginalTable::new(vec![0], 0, vec![]).is_err());

    let table = MarginalTable::from_fn(vec![0], 3, |_| 0.0).unwrap();
    assert!(matches!(
        EvaluatorSet::new(2, 2, vec![table]),
        Err(CertError::InvalidValue(_))
    ));
}
