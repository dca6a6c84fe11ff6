//! Multithreaded branch-and-bound over the event tree.
//!
//! The tree is split into one path group per thread. Each thread runs a
//! [`ThreadWorker`] that walks its paths depth first, keeping a thread-local
//! copy of the objective in sync with the partial event. At interior nodes
//! the objective's lower bound is compared with the best score known so far
//! (the worker's own and the shared [`GlobalMinimum`]); subtrees whose bound
//! is strictly greater are skipped without materialising any of their nodes.
//!
//! In `Sat` mode the first leaf scoring below the threshold raises a shared
//! flag that every worker checks before visiting its next node.
//!
//! Equal scores are resolved towards the lexicographically smallest event.
//! Pruning is strict, so in `Opt` mode every minimiser is reached by some
//! worker and the merged result does not depend on the thread count.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use rayon::prelude::*;

use crate::error::{CertError, CertResult};
use crate::event::{Event, Outcome, Score};
use crate::event_tree::{EventTree, NodePos};
use crate::objective::{check_domain, Objective};
use crate::optimizer::{Optimizer, PreSolution, StopMode};
use crate::symmetry::{check_generation, SymmetryGroup};
use crate::tree_splitter::{PathAndLeaves, PathPartition, TreeSplitter, TARGET_QUALITY_FACTOR};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Best score published by any worker during one search.
#[derive(Debug)]
pub struct GlobalMinimum {
    score: RwLock<Score>,
}

impl Default for GlobalMinimum {
    fn default() -> Self {
        Self::new()
    }
}

impl GlobalMinimum {
    pub fn new() -> Self {
        GlobalMinimum {
            score: RwLock::new(Score::INFINITY),
        }
    }

    #[inline]
    pub fn get(&self) -> Score {
        *self.score.read()
    }

    /// Publish `score` if it is strictly below the current value.
    pub fn set_if_smaller(&self, score: Score) -> bool {
        if score >= *self.score.read() {
            return false;
        }
        let mut current = self.score.write();
        if score < *current {
            *current = score;
            true
        } else {
            false
        }
    }

    pub fn reset(&self) {
        *self.score.write() = Score::INFINITY;
    }
}

// ---------------------------------------------------------------------------
// Workers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Descending,
    Pruned,
    LeafEvaluated,
    Exhausted,
}

/// What one worker hands back after exploring its group.
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadReturn {
    pub worker: usize,
    /// Best event seen by this worker, if any leaf it reached could matter.
    pub pre_solution: Option<PreSolution>,
    /// Leaves evaluated.
    pub n_leaves_effective: u64,
    /// Subtrees skipped on their bound.
    pub n_pruned: u64,
    pub cancelled: bool,
}

pub struct ThreadWorker<'t, O: Objective> {
    id: usize,
    tree: &'t EventTree,
    objective: O,
    event: Event,
    best: Option<PreSolution>,
    stack: Vec<NodePos>,
    /// Parties `0..last_depth` currently hold a concrete outcome.
    last_depth: usize,
    n_leaves_effective: u64,
    n_pruned: u64,
    state: WorkerState,
    stop_mode: StopMode,
    use_bounds: bool,
}

impl<'t, O: Objective> ThreadWorker<'t, O> {
    pub fn new(
        id: usize,
        tree: &'t EventTree,
        objective: &O,
        stop_mode: StopMode,
        use_bounds: bool,
    ) -> Self {
        let depth = tree.get_depth();
        let mut objective = objective.clone();
        for party in 0..depth {
            objective.set_outcome(party, Outcome::Unknown);
        }
        ThreadWorker {
            id,
            tree,
            objective,
            event: vec![Outcome::Unknown; depth],
            best: None,
            stack: Vec::new(),
            last_depth: 0,
            n_leaves_effective: 0,
            n_pruned: 0,
            state: WorkerState::Idle,
            stop_mode,
            use_bounds,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn best(&self) -> Option<&PreSolution> {
        self.best.as_ref()
    }

    /// Explore every path of `group`, then report.
    pub fn explore(
        mut self,
        group: &[PathAndLeaves],
        global: &GlobalMinimum,
        cancel: &AtomicBool,
    ) -> CertResult<ThreadReturn> {
        log::trace!("worker {} starts on {} paths", self.id, group.len());
        let mut cancelled = false;

        'paths: for item in group {
            let start = self.tree.pos_of(&item.path)?;
            self.seed(start)?;
            self.stack.push(start);
            while let Some(pos) = self.stack.pop() {
                if cancel.load(Ordering::Relaxed) {
                    cancelled = true;
                    self.stack.clear();
                    break 'paths;
                }
                self.go_down_from(pos, global, cancel)?;
            }
        }

        self.state = WorkerState::Exhausted;
        log::trace!(
            "worker {} exhausted: {} leaves, {} pruned, cancelled {}",
            self.id,
            self.n_leaves_effective,
            self.n_pruned,
            cancelled
        );
        Ok(ThreadReturn {
            worker: self.id,
            pre_solution: self.best,
            n_leaves_effective: self.n_leaves_effective,
            n_pruned: self.n_pruned,
            cancelled,
        })
    }

    #[inline]
    fn set(&mut self, party: usize, outcome: Outcome) {
        if self.event[party] != outcome {
            self.event[party] = outcome;
            self.objective.set_outcome(party, outcome);
        }
    }

    /// Load the partial event leading to `pos` before a new path is walked.
    fn seed(&mut self, pos: NodePos) -> CertResult<()> {
        let prefix = self.tree.event_prefix(pos)?;
        for (party, outcome) in prefix.into_iter().enumerate() {
            self.set(party, outcome);
        }
        self.last_depth = pos.depth;
        Ok(())
    }

    #[inline]
    fn incumbent(&self, global: &GlobalMinimum) -> Score {
        let local = self.best.as_ref().map_or(Score::INFINITY, |b| b.score);
        local.min(global.get())
    }

    /// Visit `pos`: bring the event in line with it, then either prune,
    /// queue its children or score the leaf.
    fn go_down_from(
        &mut self,
        pos: NodePos,
        global: &GlobalMinimum,
        cancel: &AtomicBool,
    ) -> CertResult<()> {
        self.state = WorkerState::Descending;

        for party in pos.depth..self.last_depth {
            self.set(party, Outcome::Unknown);
        }
        if pos.depth > 0 {
            let outcome = self.tree.outcome_at(pos)?;
            self.set(pos.depth - 1, outcome);
        }
        self.last_depth = pos.depth;

        if !self.tree.is_leaf(pos) {
            if self.use_bounds && self.objective.evaluate() > self.incumbent(global) {
                self.state = WorkerState::Pruned;
                self.n_pruned += 1;
                return Ok(());
            }
            self.tree.add_children_to_queue(&mut self.stack, pos);
            return Ok(());
        }

        self.state = WorkerState::LeafEvaluated;
        self.n_leaves_effective += 1;
        let score = self.objective.evaluate();

        let improves = match &self.best {
            None => true,
            Some(b) => score < b.score || (score == b.score && self.event < b.event),
        };
        if improves && score <= global.get() {
            self.best = Some(PreSolution::new(score, self.event.clone()));
            global.set_if_smaller(score);
        }

        if self.stop_mode.is_satisfied_by(score) && !cancel.swap(true, Ordering::Relaxed) {
            log::debug!("worker {} found a certificate with score {}", self.id, score);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Optimizer
// ---------------------------------------------------------------------------

pub struct TreeOpt<'a> {
    tree: &'a EventTree,
    group: &'a dyn SymmetryGroup,
    n_threads: usize,
    quality_factor: f64,
    use_bounds: bool,
    partition: Option<PathPartition>,
    pool: Option<rayon::ThreadPool>,
    global: GlobalMinimum,
    cancel: AtomicBool,
}

impl<'a> TreeOpt<'a> {
    pub fn new(
        tree: &'a EventTree,
        group: &'a dyn SymmetryGroup,
        n_threads: usize,
    ) -> CertResult<Self> {
        if n_threads == 0 {
            return Err(CertError::InvalidThreadCount);
        }
        if !tree.is_initialized() {
            return Err(CertError::Uninitialized);
        }
        check_generation(tree.symmetry_generation(), group)?;
        if group.n_parties() != tree.get_depth() {
            return Err(CertError::PartyMismatch {
                expected: tree.get_depth(),
                got: group.n_parties(),
            });
        }

        let pool = if n_threads > 1 {
            Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(n_threads)
                    .thread_name(|i| format!("tree-opt-{}", i))
                    .build()?,
            )
        } else {
            None
        };

        Ok(TreeOpt {
            tree,
            group,
            n_threads,
            quality_factor: TARGET_QUALITY_FACTOR,
            use_bounds: true,
            partition: None,
            pool,
            global: GlobalMinimum::new(),
            cancel: AtomicBool::new(false),
        })
    }

    pub fn with_quality_factor(mut self, quality_factor: f64) -> Self {
        self.quality_factor = quality_factor;
        self.partition = None;
        self
    }

    /// Disable pruning to visit every leaf.
    pub fn with_bounds(mut self, use_bounds: bool) -> Self {
        self.use_bounds = use_bounds;
        self
    }

    pub fn n_threads(&self) -> usize {
        self.n_threads
    }

    /// Work partition used by the workers, computed on first use.
    pub fn partition(&mut self) -> CertResult<&PathPartition> {
        if self.partition.is_none() {
            let n_leaves = self.tree.get_n_leaves()?;
            let n_splits = (self.n_threads as u64).min(n_leaves) as usize;
            let partition = TreeSplitter::new(self.tree, n_splits)
                .with_quality_factor(self.quality_factor)
                .split()?;
            self.partition = Some(partition);
        }
        self.partition
            .as_ref()
            .ok_or_else(|| CertError::InvalidValue("missing path partition".to_string()))
    }

    fn check_preconditions<O: Objective>(&self, objective: &O) -> CertResult<()> {
        if !self.tree.is_initialized() {
            return Err(CertError::Uninitialized);
        }
        check_generation(self.tree.symmetry_generation(), self.group)?;
        if objective.n_parties() != self.tree.get_depth() {
            return Err(CertError::PartyMismatch {
                expected: self.tree.get_depth(),
                got: objective.n_parties(),
            });
        }
        let levels = (0..self.tree.get_depth())
            .map(|d| self.tree.level_outcomes(d))
            .collect::<CertResult<Vec<_>>>()?;
        check_domain(objective, levels)
    }

    pub fn log_info(&self) {
        match self.tree.info() {
            Ok(info) => log::info!(
                "tree search on {} threads: depth {}, breadths {:?}, {} leaves, {} nodes cached",
                self.n_threads,
                info.depth,
                info.breadths,
                info.n_leaves,
                info.n_nodes_cached
            ),
            Err(e) => log::warn!("tree search has no usable tree: {}", e),
        }
    }

    fn log_status(&self, returns: &[ThreadReturn]) {
        for r in returns {
            log::debug!(
                "worker {}: {} leaves evaluated, {} subtrees pruned{}",
                r.worker,
                r.n_leaves_effective,
                r.n_pruned,
                if r.cancelled { ", cancelled" } else { "" }
            );
        }
    }
}

impl Optimizer for TreeOpt<'_> {
    fn name(&self) -> &'static str {
        "tree_search"
    }

    fn optimize<O: Objective>(
        &mut self,
        objective: &O,
        stop_mode: StopMode,
    ) -> CertResult<PreSolution> {
        self.check_preconditions(objective)?;
        let built = self.partition()?.symmetry_generation();
        if built != self.tree.symmetry_generation() {
            return Err(CertError::SymmetriesChanged {
                built,
                current: self.tree.symmetry_generation(),
            });
        }

        self.global.reset();
        self.cancel.store(false, Ordering::Relaxed);
        self.log_info();

        let use_bounds = self.use_bounds && objective.stores_bounds();
        let tree = self.tree;
        let global = &self.global;
        let cancel = &self.cancel;
        let partition = self
            .partition
            .as_ref()
            .ok_or_else(|| CertError::InvalidValue("missing path partition".to_string()))?;

        let run = |(id, group): (usize, &Vec<PathAndLeaves>)| {
            ThreadWorker::new(id, tree, objective, stop_mode, use_bounds).explore(group, global, cancel)
        };
        let returns: Vec<ThreadReturn> = match &self.pool {
            Some(pool) => pool.install(|| {
                partition
                    .groups()
                    .par_iter()
                    .enumerate()
                    .map(run)
                    .collect::<CertResult<Vec<_>>>()
            })?,
            None => partition
                .groups()
                .iter()
                .enumerate()
                .map(run)
                .collect::<CertResult<Vec<_>>>()?,
        };
        self.log_status(&returns);

        let mut best: Option<PreSolution> = None;
        let mut n_leaves_effective = 0u64;
        for r in returns {
            n_leaves_effective += r.n_leaves_effective;
            if let Some(candidate) = r.pre_solution {
                if best.as_ref().map_or(true, |b| candidate.is_better_than(b)) {
                    best = Some(candidate);
                }
            }
        }
        let mut best =
            best.ok_or_else(|| CertError::InvalidValue("no worker reached a leaf".to_string()))?;
        debug_assert_eq!(best.score, self.global.get());
        best.n_leaves_effective = Some(n_leaves_effective);

        log::info!(
            "tree search visited {} of {} leaves",
            n_leaves_effective,
            tree.get_n_leaves()?
        );
        Ok(best)
    }
}
