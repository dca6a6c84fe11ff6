//! Common surface of the event optimizers.

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::brute_force::BruteForceOpt;
use crate::config::SearchConfig;
use crate::error::{CertError, CertResult};
use crate::event::{format_event, Event, Score};
use crate::event_tree::EventTree;
use crate::objective::Objective;
use crate::symmetry::{check_generation, SymmetryGroup};
use crate::tree_opt::TreeOpt;

/// When a search may stop.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopMode {
    /// Stop at the first event scoring strictly below `threshold`.
    Sat { threshold: Score },
    /// Find the minimum over the whole search space.
    Opt,
}

impl StopMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopMode::Sat { .. } => "sat",
            StopMode::Opt => "opt",
        }
    }

    /// True when `score` ends a `Sat` search.
    #[inline]
    pub fn is_satisfied_by(&self, score: Score) -> bool {
        match *self {
            StopMode::Sat { threshold } => score < threshold,
            StopMode::Opt => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    BruteForce,
    TreeSearch,
    #[default]
    Auto,
}

impl SearchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMode::BruteForce => "brute_force",
            SearchMode::TreeSearch => "tree_search",
            SearchMode::Auto => "auto",
        }
    }
}

/// Best event found by one optimizer run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreSolution {
    pub score: Score,
    pub event: Event,
    /// Leaves actually evaluated, when the optimizer tracks it.
    pub n_leaves_effective: Option<u64>,
}

impl PreSolution {
    pub fn new(score: Score, event: Event) -> Self {
        PreSolution {
            score,
            event,
            n_leaves_effective: None,
        }
    }

    /// Lower score wins, equal scores go to the lexicographically smaller event.
    pub fn is_better_than(&self, other: &PreSolution) -> bool {
        self.score < other.score || (self.score == other.score && self.event < other.event)
    }
}

/// A pre-solution together with how it was obtained.
#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    pub pre: PreSolution,
    pub stop_mode: StopMode,
    pub optimizer: &'static str,
    pub elapsed: Duration,
}

impl Solution {
    /// True when the event beats the `Sat` threshold.
    pub fn is_certificate(&self) -> bool {
        self.stop_mode.is_satisfied_by(self.pre.score)
    }

    pub fn score(&self) -> Score {
        self.pre.score
    }

    pub fn event(&self) -> &Event {
        &self.pre.event
    }
}

impl fmt::Display for Solution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] score {:.6} at {} in {:.3}s",
            self.optimizer,
            self.stop_mode.as_str(),
            self.pre.score,
            format_event(&self.pre.event),
            self.elapsed.as_secs_f64()
        )?;
        if let Some(n) = self.pre.n_leaves_effective {
            write!(f, ", {} leaves effective", n)?;
        }
        if let StopMode::Sat { threshold } = self.stop_mode {
            if self.is_certificate() {
                write!(f, ", certificate below {}", threshold)?;
            }
        }
        Ok(())
    }
}

pub trait Optimizer {
    fn name(&self) -> &'static str;

    fn optimize<O: Objective>(
        &mut self,
        objective: &O,
        stop_mode: StopMode,
    ) -> CertResult<PreSolution>;

    /// Run `optimize` and record timing.
    fn solve<O: Objective>(&mut self, objective: &O, stop_mode: StopMode) -> CertResult<Solution> {
        let start = Instant::now();
        let pre = self.optimize(objective, stop_mode)?;
        let solution = Solution {
            pre,
            stop_mode,
            optimizer: self.name(),
            elapsed: start.elapsed(),
        };
        log::info!("{}", solution);
        Ok(solution)
    }
}

/// One of the available optimizers, picked at run time.
pub enum AnyOptimizer<'a> {
    BruteForce(BruteForceOpt),
    TreeSearch(TreeOpt<'a>),
}

impl<'a> AnyOptimizer<'a> {
    /// Pick an optimizer for `tree` according to `config.search_mode`. In
    /// `Auto` mode brute force is used when the raw event count is at most
    /// `config.brute_force_leaf_limit`. Both search the leaves of `tree`.
    pub fn from_config(
        config: &SearchConfig,
        tree: &'a EventTree,
        group: &'a dyn SymmetryGroup,
    ) -> CertResult<Self> {
        config.validate()?;
        check_generation(tree.symmetry_generation(), group)?;
        let n_parties = group.n_parties();
        let n_outcomes = group.n_outcomes();
        let mode = match config.search_mode {
            SearchMode::Auto => {
                let raw = (n_outcomes as u64).checked_pow(n_parties as u32);
                match raw {
                    Some(n) if n <= config.brute_force_leaf_limit => SearchMode::BruteForce,
                    _ => SearchMode::TreeSearch,
                }
            }
            mode => mode,
        };
        log::debug!("search mode {} resolved to {}", config.search_mode.as_str(), mode.as_str());
        match mode {
            SearchMode::BruteForce => Ok(AnyOptimizer::BruteForce(BruteForceOpt::from_tree(tree)?)),
            SearchMode::TreeSearch => Ok(AnyOptimizer::TreeSearch(
                TreeOpt::new(tree, group, config.n_threads)?
                    .with_quality_factor(config.quality_factor)
                    .with_bounds(config.store_bounds),
            )),
            SearchMode::Auto => Err(CertError::InvalidValue(
                "search mode did not resolve".to_string(),
            )),
        }
    }
}

impl Optimizer for AnyOptimizer<'_> {
    fn name(&self) -> &'static str {
        match self {
            AnyOptimizer::BruteForce(opt) => opt.name(),
            AnyOptimizer::TreeSearch(opt) => opt.name(),
        }
    }

    fn optimize<O: Objective>(
        &mut self,
        objective: &O,
        stop_mode: StopMode,
    ) -> CertResult<PreSolution> {
        match self {
            AnyOptimizer::BruteForce(opt) => opt.optimize(objective, stop_mode),
            AnyOptimizer::TreeSearch(opt) => opt.optimize(objective, stop_mode),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::event_from_values;

    #[test]
    fn sat_threshold_is_strict() {
        let stop = StopMode::Sat { threshold: 0.0 };
        assert!(stop.is_satisfied_by(-1e-12));
        assert!(!stop.is_satisfied_by(0.0));
        assert!(!StopMode::Opt.is_satisfied_by(f64::NEG_INFINITY));
    }

    #[test]
    fn ties_go_to_smaller_event() {
        let a = PreSolution::new(1.0, event_from_values(&[0, 1]));
        let b = PreSolution::new(1.0, event_from_values(&[1, 0]));
        assert!(a.is_better_than(&b));
        assert!(!b.is_better_than(&a));
        assert!(!a.is_better_than(&a));
    }

    #[test]
    fn search_mode_serializes_snake_case() {
        let json = serde_json::to_string(&SearchMode::TreeSearch).unwrap();
        assert_eq!(json, "\"tree_search\"");
    }
}
