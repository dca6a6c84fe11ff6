//! Load-balanced partition of an event tree's leaves.
//!
//! The splitter walks the tree depth-first in canonical order using only the
//! analytic leaf counts, and cuts the leaf sequence at the cumulative
//! boundaries `(g + 1) * n_leaves / n_splits`. A subtree that would overshoot
//! the current boundary by more than the tolerance is replaced by its
//! children, one level deeper, so every group is a list of paths whose leaf
//! ranges are consecutive.
//!
//! The tolerance starts at `(quality_factor - 1) * ideal` and is halved after
//! every pass that misses the quality target. The last pass uses a tolerance
//! of zero and cuts exactly at the boundaries, so the number of passes is
//! bounded and a valid partition always comes out.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::{CertError, CertResult};
use crate::event_tree::EventTree;
pub use crate::event_tree::Path;

/// Upper bound on `n_max / n_min` over the groups of a partition.
pub const TARGET_QUALITY_FACTOR: f64 = 1.1;

/// A path from the root together with the number of leaves below it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathAndLeaves {
    pub path: Path,
    pub n_leaves: u64,
}

/// One group of paths per worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathPartition {
    groups: Vec<Vec<PathAndLeaves>>,
    quality_factor: f64,
    n_leaves: u64,
    symmetry_generation: u64,
    met_target: bool,
}

impl PathPartition {
    pub fn groups(&self) -> &[Vec<PathAndLeaves>] {
        &self.groups
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Ratio between the largest and the smallest group, in leaves.
    pub fn quality_factor(&self) -> f64 {
        self.quality_factor
    }

    /// False when the partition is a best effort that missed the target.
    pub fn met_target(&self) -> bool {
        self.met_target
    }

    pub fn n_leaves(&self) -> u64 {
        self.n_leaves
    }

    pub fn symmetry_generation(&self) -> u64 {
        self.symmetry_generation
    }

    pub fn leaves_per_group(&self) -> Vec<u64> {
        self.groups.iter().map(|g| group_leaves(g)).collect()
    }

    /// Leaf index ranges covered by each group.
    pub fn leaf_ranges(&self, tree: &EventTree) -> CertResult<Vec<Vec<Range<u64>>>> {
        self.groups
            .iter()
            .map(|group| {
                group
                    .iter()
                    .map(|p| tree.leaf_range(tree.pos_of(&p.path)?))
                    .collect()
            })
            .collect()
    }
}

fn group_leaves(group: &[PathAndLeaves]) -> u64 {
    group.iter().map(|p| p.n_leaves).sum()
}

fn quality(groups: &[Vec<PathAndLeaves>]) -> f64 {
    let leaves: Vec<u64> = groups.iter().map(|g| group_leaves(g)).collect();
    let min = leaves.iter().copied().min().unwrap_or(0);
    let max = leaves.iter().copied().max().unwrap_or(0);
    if min == 0 {
        f64::INFINITY
    } else {
        max as f64 / min as f64
    }
}

pub struct TreeSplitter<'a> {
    tree: &'a EventTree,
    n_splits: usize,
    target_quality: f64,
}

impl<'a> TreeSplitter<'a> {
    pub fn new(tree: &'a EventTree, n_splits: usize) -> Self {
        TreeSplitter {
            tree,
            n_splits,
            target_quality: TARGET_QUALITY_FACTOR,
        }
    }

    pub fn with_quality_factor(mut self, quality_factor: f64) -> Self {
        self.target_quality = quality_factor;
        self
    }

    /// Split `tree` into `n_splits` groups with the default quality target.
    pub fn get_path_partition(tree: &EventTree, n_splits: usize) -> CertResult<PathPartition> {
        TreeSplitter::new(tree, n_splits).split()
    }

    pub fn split(&self) -> CertResult<PathPartition> {
        let n_leaves = self.tree.get_n_leaves()?;
        if self.n_splits == 0 || self.n_splits as u64 > n_leaves {
            return Err(CertError::InvalidSplitCount {
                n_splits: self.n_splits,
                n_leaves,
            });
        }
        if !(self.target_quality >= 1.0) {
            return Err(CertError::InvalidValue(format!(
                "quality factor must be at least 1, got {}",
                self.target_quality
            )));
        }

        if self.n_splits == 1 {
            let groups = vec![self.root_paths()?];
            return Ok(self.finish(groups, 1.0, n_leaves, true));
        }

        let n = self.n_splits as u128;
        let boundaries: Vec<u64> = (0..self.n_splits)
            .map(|g| ((g as u128 + 1) * n_leaves as u128 / n) as u64)
            .collect();
        let ideal = n_leaves as f64 / self.n_splits as f64;

        let mut best: Option<(Vec<Vec<PathAndLeaves>>, f64)> = None;
        for tol in self.tolerances(ideal, n_leaves) {
            let groups = self.split_with_tolerance(tol, &boundaries)?;
            let qf = quality(&groups);
            log::trace!("split pass with tolerance {}: quality {:.3}", tol, qf);
            if qf.is_finite() && qf <= self.target_quality {
                return Ok(self.finish(groups, qf, n_leaves, true));
            }
            if best.as_ref().map_or(true, |(_, b)| qf < *b) {
                best = Some((groups, qf));
            }
        }

        let (groups, qf) = best.ok_or_else(|| {
            CertError::InvalidValue("tree splitter ran no pass".to_string())
        })?;
        log::warn!(
            "could not split {} leaves into {} groups within quality factor {}, using {:.3}",
            n_leaves,
            self.n_splits,
            self.target_quality,
            qf
        );
        Ok(self.finish(groups, qf, n_leaves, false))
    }

    fn finish(
        &self,
        groups: Vec<Vec<PathAndLeaves>>,
        quality_factor: f64,
        n_leaves: u64,
        met_target: bool,
    ) -> PathPartition {
        let partition = PathPartition {
            groups,
            quality_factor,
            n_leaves,
            symmetry_generation: self.tree.symmetry_generation(),
            met_target,
        };
        let slack_permill = ((quality_factor - 1.0) * 1000.0).round() as u64;
        log::info!(
            "event tree split into {} groups, the largest has {}.{}% more leaves than the smallest",
            partition.len(),
            slack_permill / 10,
            slack_permill % 10
        );
        for (i, group) in partition.groups.iter().enumerate() {
            log::debug!(
                "group {} gets {} paths with {} leaves",
                i,
                group.len(),
                group_leaves(group)
            );
        }
        partition
    }

    fn root_paths(&self) -> CertResult<Vec<PathAndLeaves>> {
        let breadth = self.tree.get_breadth_at_depth(0)?;
        let n_leaves = self.tree.count_leaves_from(self.tree.pos_of(&[0])?)?;
        Ok((0..breadth)
            .map(|k| PathAndLeaves {
                path: vec![k],
                n_leaves,
            })
            .collect())
    }

    /// `tol_0, tol_0 / 2, ..., 0`, with `tol_0` capped at the leaf count.
    fn tolerances(&self, ideal: f64, n_leaves: u64) -> Vec<u64> {
        let mut tol = ((self.target_quality - 1.0) * ideal)
            .floor()
            .clamp(0.0, n_leaves as f64) as u64;
        tol = tol.min(n_leaves);
        let mut out = vec![tol];
        while tol > 0 {
            tol /= 2;
            out.push(tol);
        }
        out
    }

    fn split_with_tolerance(
        &self,
        tol: u64,
        boundaries: &[u64],
    ) -> CertResult<Vec<Vec<PathAndLeaves>>> {
        let depth = self.tree.get_depth();
        let mut stack = self.root_paths()?;
        stack.reverse();

        let mut groups: Vec<Vec<PathAndLeaves>> = vec![Vec::new(); self.n_splits];
        let mut acc = 0u64;
        let mut g = 0usize;

        while let Some(item) = stack.pop() {
            if g + 1 == self.n_splits {
                acc += item.n_leaves;
                groups[g].push(item);
                continue;
            }

            let target = boundaries[g];
            if acc + item.n_leaves <= target.saturating_add(tol) {
                acc += item.n_leaves;
                groups[g].push(item);
                if acc.saturating_add(tol) >= target {
                    g += 1;
                }
            } else if item.path.len() < depth {
                let breadth = self.tree.get_breadth_at_depth(item.path.len())?;
                let child_leaves = item.n_leaves / breadth as u64;
                for k in (0..breadth).rev() {
                    let mut path = item.path.clone();
                    path.push(k);
                    stack.push(PathAndLeaves {
                        path,
                        n_leaves: child_leaves,
                    });
                }
            } else {
                g += 1;
                stack.push(item);
            }
        }

        Ok(groups)
    }
}
