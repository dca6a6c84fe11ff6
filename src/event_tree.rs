//! Virtual event tree over symmetry-reduced inflation events.
//!
//! Depth `k` of the tree fixes the outcome of party `k - 1`: the root sits at
//! depth 0 and carries no outcome, leaves sit at depth `D` (the party count)
//! and each stand for one complete event. Every node at depth `k` has the same
//! branching factor `B[k]`, the number of outcomes kept for party `k` after
//! symmetry reduction, so all sizes follow from the breadth sequence:
//!
//!   leaves below a node at depth k = B[k] * B[k+1] * ... * B[D-1]
//!   nodes at depth k               = B[0] * ... * B[k-1]
//!
//! A node's index within its depth is the mixed-radix number formed by the
//! child ordinals along its root path. Positions, paths and leaf ranges thus
//! convert into one another without touching the tree.
//!
//! Nodes are only materialised on demand. Each node owns a lazily filled
//! child slot; the first thread to fill it wins and everyone else observes
//! the same children. The cache only ever grows.

use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::ops::Range;
use std::path::Path as FsPath;
use std::sync::atomic::{AtomicU64, Ordering};

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::error::{CertError, CertResult};
use crate::event::{Event, Outcome};
use crate::symmetry::{check_generation, SymmetryGroup};

/// Snapshot format version written by [`EventTree::to_snapshot`].
pub const SNAPSHOT_VERSION: u32 = 1;

/// Child ordinals from the root down to some node.
pub type Path = Vec<usize>;

/// Whether the symmetrised tree should be read from or written to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TreeIo {
    Read,
    Write,
    #[default]
    None,
}

impl TreeIo {
    pub fn as_str(&self) -> &'static str {
        match self {
            TreeIo::Read => "read",
            TreeIo::Write => "write",
            TreeIo::None => "none",
        }
    }
}

/// Identifies a node by depth and index within that depth, without holding
/// a reference into the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodePos {
    pub depth: usize,
    pub index: u64,
}

impl NodePos {
    pub const ROOT: NodePos = NodePos { depth: 0, index: 0 };

    pub fn new(depth: usize, index: u64) -> Self {
        NodePos { depth, index }
    }
}

impl fmt::Display for NodePos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "N[{},{}]", self.depth, self.index)
    }
}

/// A materialised node.
pub struct Node {
    outcome: Outcome,
    pos: NodePos,
    children: OnceCell<Vec<Node>>,
}

impl Node {
    fn new(outcome: Outcome, pos: NodePos) -> Self {
        Node {
            outcome,
            pos,
            children: OnceCell::new(),
        }
    }

    #[inline]
    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    #[inline]
    pub fn pos(&self) -> NodePos {
        self.pos
    }

    /// Children if this node has been expanded, `None` otherwise.
    pub fn children(&self) -> Option<&[Node]> {
        self.children.get().map(|c| c.as_slice())
    }

    pub fn is_expanded(&self) -> bool {
        self.children.get().is_some()
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("outcome", &self.outcome)
            .field("pos", &self.pos)
            .field("expanded", &self.is_expanded())
            .finish()
    }
}

/// Size-related summary of a tree.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeInfo {
    pub depth: usize,
    pub breadths: Vec<usize>,
    pub n_leaves: u64,
    pub n_nodes_total: u64,
    pub n_nodes_cached: u64,
    pub memory_bytes: u64,
}

/// Serializable form of a tree: its structure plus which nodes were expanded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeSnapshot {
    pub version: u32,
    pub levels: Vec<Vec<Outcome>>,
    pub symmetry_generation: u64,
    pub cache_depth: usize,
    /// Positions whose children are materialised, in depth-first order.
    pub expanded: Vec<NodePos>,
}

pub struct EventTree {
    depth: usize,
    /// `levels[k]` lists the outcomes party `k` may take, in canonical order.
    levels: Vec<Vec<Outcome>>,
    initialized: bool,
    symmetry_generation: u64,
    /// Deepest level whose nodes are memoised by [`EventTree::outcome_at`].
    cache_depth: usize,
    n_leaves: u64,
    n_nodes_total: u64,
    /// `widths[k]` = number of nodes at depth k, for k in 0..=depth.
    widths: Vec<u64>,
    /// `suffix_leaves[k]` = leaves below any node at depth k.
    suffix_leaves: Vec<u64>,
    root: Node,
    n_nodes_cached: AtomicU64,
}

impl EventTree {
    /// An empty tree for `depth` parties. Levels are filled with
    /// [`EventTree::insert_node`] and sealed with [`EventTree::finish_initialization`].
    pub fn new(depth: usize) -> CertResult<Self> {
        if depth == 0 {
            return Err(CertError::ZeroDepth);
        }
        Ok(EventTree {
            depth,
            levels: vec![Vec::new(); depth],
            initialized: false,
            symmetry_generation: 0,
            cache_depth: depth,
            n_leaves: 0,
            n_nodes_total: 0,
            widths: Vec::new(),
            suffix_leaves: Vec::new(),
            root: Node::new(Outcome::Unknown, NodePos::ROOT),
            n_nodes_cached: AtomicU64::new(0),
        })
    }

    /// Build the reduced tree of a symmetry group and tag it with the group's generation.
    pub fn from_symmetry(
        group: &dyn SymmetryGroup,
        eager_depth: usize,
        cache_depth: usize,
    ) -> CertResult<Self> {
        let mut tree = EventTree::new(group.n_parties())?;
        for party in 0..group.n_parties() {
            for outcome in group.reduced_outcomes(party) {
                tree.insert_node(party, outcome)?;
            }
        }
        tree.set_symmetry_generation(group.generation())?;
        tree.set_cache_depth(cache_depth);
        tree.finish_initialization(eager_depth)?;
        Ok(tree)
    }

    /// Obtain the symmetrised tree according to `io`.
    pub fn load_or_build(
        io: TreeIo,
        path: Option<&FsPath>,
        group: &dyn SymmetryGroup,
        eager_depth: usize,
        cache_depth: usize,
    ) -> CertResult<Self> {
        match io {
            TreeIo::Read => {
                let path = path.ok_or_else(|| {
                    CertError::InvalidValue("reading the event tree needs a path".to_string())
                })?;
                log::info!("reading the symmetrized event tree from {}", path.display());
                let tree = EventTree::load(path)?;
                if tree.depth != group.n_parties() {
                    return Err(CertError::PartyMismatch {
                        expected: group.n_parties(),
                        got: tree.depth,
                    });
                }
                check_generation(tree.symmetry_generation, group)?;
                Ok(tree)
            }
            TreeIo::Write => {
                let path = path.ok_or_else(|| {
                    CertError::InvalidValue("writing the event tree needs a path".to_string())
                })?;
                log::info!("filling the symmetrized event tree");
                let tree = EventTree::from_symmetry(group, eager_depth, cache_depth)?;
                log::info!("saving the symmetrized event tree to {}", path.display());
                tree.save(path)?;
                Ok(tree)
            }
            TreeIo::None => {
                log::info!("filling the symmetrized event tree");
                EventTree::from_symmetry(group, eager_depth, cache_depth)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Construction
    // -----------------------------------------------------------------------

    /// Declare `outcome` as a branch of every node at `depth` and return its
    /// ordinal among the siblings. Inserting the same outcome twice returns
    /// the existing ordinal.
    pub fn insert_node(&mut self, depth: usize, outcome: Outcome) -> CertResult<usize> {
        if self.initialized {
            return Err(CertError::AlreadyInitialized);
        }
        if depth >= self.depth {
            return Err(CertError::InvalidDepth {
                depth,
                tree_depth: self.depth,
            });
        }
        if outcome.is_unknown() {
            return Err(CertError::InvalidOutcome {
                party: depth,
                outcome: outcome.to_string(),
            });
        }
        let level = &mut self.levels[depth];
        if let Some(existing) = level.iter().position(|&o| o == outcome) {
            return Ok(existing);
        }
        level.push(outcome);
        Ok(level.len() - 1)
    }

    pub fn set_symmetry_generation(&mut self, generation: u64) -> CertResult<()> {
        if self.initialized {
            return Err(CertError::AlreadyInitialized);
        }
        self.symmetry_generation = generation;
        Ok(())
    }

    pub fn set_cache_depth(&mut self, cache_depth: usize) {
        self.cache_depth = cache_depth.min(self.depth);
    }

    /// Freeze the breadth sequence, compute the size tables and materialise
    /// every node down to `eager_depth`.
    pub fn finish_initialization(&mut self, eager_depth: usize) -> CertResult<()> {
        if self.initialized {
            return Err(CertError::AlreadyInitialized);
        }
        if let Some(empty) = self.levels.iter().position(|l| l.is_empty()) {
            return Err(CertError::EmptyLevel(empty));
        }

        let mut widths = Vec::with_capacity(self.depth + 1);
        widths.push(1u64);
        for level in &self.levels {
            let last = *widths.last().unwrap_or(&1);
            let next = last
                .checked_mul(level.len() as u64)
                .ok_or(CertError::TreeTooLarge)?;
            widths.push(next);
        }

        let mut suffix_leaves = vec![1u64; self.depth + 1];
        for k in (0..self.depth).rev() {
            suffix_leaves[k] = suffix_leaves[k + 1]
                .checked_mul(self.levels[k].len() as u64)
                .ok_or(CertError::TreeTooLarge)?;
        }

        let mut n_nodes_total = 0u64;
        for &w in &widths[1..] {
            n_nodes_total = n_nodes_total
                .checked_add(w)
                .ok_or(CertError::TreeTooLarge)?;
        }

        self.n_leaves = suffix_leaves[0];
        self.n_nodes_total = n_nodes_total;
        self.widths = widths;
        self.suffix_leaves = suffix_leaves;
        self.initialized = true;

        self.materialize_to(eager_depth.min(self.depth));

        log::debug!(
            "event tree initialized: depth {}, {} leaves, {} nodes, {} cached",
            self.depth,
            self.n_leaves,
            self.n_nodes_total,
            self.get_n_nodes_cached()
        );
        Ok(())
    }

    /// Materialise every node at depths `1..=depth`.
    pub fn materialize_to(&self, depth: usize) {
        if !self.initialized || depth == 0 {
            return;
        }
        let mut stack: Vec<&Node> = vec![&self.root];
        while let Some(node) = stack.pop() {
            if node.pos.depth + 1 > depth {
                continue;
            }
            stack.extend(self.expand(node).iter());
        }
    }

    // -----------------------------------------------------------------------
    // Analytic queries
    // -----------------------------------------------------------------------

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Number of parties, i.e. the depth of the leaves.
    pub fn get_depth(&self) -> usize {
        self.depth
    }

    pub fn symmetry_generation(&self) -> u64 {
        self.symmetry_generation
    }

    pub fn cache_depth(&self) -> usize {
        self.cache_depth
    }

    fn ensure_initialized(&self) -> CertResult<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(CertError::Uninitialized)
        }
    }

    fn check_pos(&self, pos: NodePos) -> CertResult<()> {
        self.ensure_initialized()?;
        if pos.depth > self.depth || pos.index >= self.widths[pos.depth] {
            return Err(CertError::InvalidNodePos {
                depth: pos.depth,
                index: pos.index,
            });
        }
        Ok(())
    }

    /// Number of children of every node at `depth`.
    pub fn get_breadth_at_depth(&self, depth: usize) -> CertResult<usize> {
        self.ensure_initialized()?;
        self.levels
            .get(depth)
            .map(|l| l.len())
            .ok_or(CertError::InvalidDepth {
                depth,
                tree_depth: self.depth,
            })
    }

    pub fn breadths(&self) -> CertResult<Vec<usize>> {
        self.ensure_initialized()?;
        Ok(self.levels.iter().map(|l| l.len()).collect())
    }

    /// Outcomes of the branches at `depth`, in child order.
    pub fn level_outcomes(&self, depth: usize) -> CertResult<&[Outcome]> {
        self.ensure_initialized()?;
        self.levels
            .get(depth)
            .map(|l| l.as_slice())
            .ok_or(CertError::InvalidDepth {
                depth,
                tree_depth: self.depth,
            })
    }

    pub fn get_n_leaves(&self) -> CertResult<u64> {
        self.ensure_initialized()?;
        Ok(self.n_leaves)
    }

    /// Every node of the tree except the root, materialised or not.
    pub fn get_n_nodes_total(&self) -> CertResult<u64> {
        self.ensure_initialized()?;
        Ok(self.n_nodes_total)
    }

    /// Number of nodes at `depth`.
    pub fn get_width_at_depth(&self, depth: usize) -> CertResult<u64> {
        self.ensure_initialized()?;
        self.widths
            .get(depth)
            .copied()
            .ok_or(CertError::InvalidDepth {
                depth,
                tree_depth: self.depth,
            })
    }

    /// Leaves reachable below `pos`; 1 for a leaf.
    pub fn count_leaves_from(&self, pos: NodePos) -> CertResult<u64> {
        self.check_pos(pos)?;
        Ok(self.suffix_leaves[pos.depth])
    }

    /// Indices of the leaves below `pos`, which are always contiguous.
    pub fn leaf_range(&self, pos: NodePos) -> CertResult<Range<u64>> {
        self.check_pos(pos)?;
        let n = self.suffix_leaves[pos.depth];
        let start = pos.index * n;
        Ok(start..start + n)
    }

    pub fn is_leaf(&self, pos: NodePos) -> bool {
        pos.depth == self.depth
    }

    /// Position of the node reached by following `path` from the root.
    pub fn pos_of(&self, path: &[usize]) -> CertResult<NodePos> {
        self.ensure_initialized()?;
        if path.len() > self.depth {
            return Err(CertError::InvalidDepth {
                depth: path.len(),
                tree_depth: self.depth,
            });
        }
        let mut index = 0u64;
        for (depth, &ordinal) in path.iter().enumerate() {
            let breadth = self.levels[depth].len();
            if ordinal >= breadth {
                return Err(CertError::InvalidNodePos {
                    depth: depth + 1,
                    index: ordinal as u64,
                });
            }
            index = index * breadth as u64 + ordinal as u64;
        }
        Ok(NodePos::new(path.len(), index))
    }

    /// Child ordinals leading from the root to `pos`.
    pub fn path_of(&self, pos: NodePos) -> CertResult<Path> {
        self.check_pos(pos)?;
        let mut path = vec![0usize; pos.depth];
        let mut index = pos.index;
        for depth in (0..pos.depth).rev() {
            let breadth = self.levels[depth].len() as u64;
            path[depth] = (index % breadth) as usize;
            index /= breadth;
        }
        Ok(path)
    }

    /// The partial event fixed by the path to `pos`; deeper parties are unknown.
    pub fn event_prefix(&self, pos: NodePos) -> CertResult<Event> {
        let path = self.path_of(pos)?;
        let mut event = vec![Outcome::Unknown; self.depth];
        for (party, &ordinal) in path.iter().enumerate() {
            event[party] = self.levels[party][ordinal];
        }
        Ok(event)
    }

    /// Positions of the root's children, in canonical order.
    pub fn root_children(&self) -> CertResult<Vec<NodePos>> {
        self.ensure_initialized()?;
        Ok((0..self.levels[0].len() as u64)
            .map(|i| NodePos::new(1, i))
            .collect())
    }

    /// Positions of the children of `pos`, in canonical order.
    pub fn children_of(&self, pos: NodePos) -> CertResult<Vec<NodePos>> {
        self.check_pos(pos)?;
        let mut children = Vec::new();
        self.add_children_to_queue(&mut children, pos);
        children.reverse();
        Ok(children)
    }

    /// Push the children of `pos` onto a depth-first stack so that popping
    /// visits them in canonical order. Leaves have no children.
    pub fn add_children_to_queue(&self, queue: &mut Vec<NodePos>, pos: NodePos) {
        let Some(level) = self.levels.get(pos.depth) else {
            return;
        };
        let breadth = level.len() as u64;
        let base = pos.index * breadth;
        queue.extend((0..breadth).rev().map(|k| NodePos::new(pos.depth + 1, base + k)));
    }

    // -----------------------------------------------------------------------
    // Materialisation
    // -----------------------------------------------------------------------

    pub fn root(&self) -> &Node {
        &self.root
    }

    fn expand<'a>(&'a self, node: &'a Node) -> &'a [Node] {
        node.children.get_or_init(|| {
            let Some(level) = self.levels.get(node.pos.depth) else {
                return Vec::new();
            };
            let base = node.pos.index * level.len() as u64;
            let children: Vec<Node> = level
                .iter()
                .enumerate()
                .map(|(k, &o)| Node::new(o, NodePos::new(node.pos.depth + 1, base + k as u64)))
                .collect();
            self.n_nodes_cached
                .fetch_add(children.len() as u64, Ordering::Relaxed);
            children
        })
    }

    /// The node at `pos`, materialising it and its ancestors on first access.
    pub fn get_node(&self, pos: NodePos) -> CertResult<&Node> {
        let path = self.path_of(pos)?;
        let mut node = &self.root;
        for (depth, &ordinal) in path.iter().enumerate() {
            node = self
                .expand(node)
                .get(ordinal)
                .ok_or(CertError::InvalidNodePos {
                    depth: depth + 1,
                    index: ordinal as u64,
                })?;
        }
        Ok(node)
    }

    /// The outcome carried by `pos`. Levels down to the cache depth go
    /// through the memoised nodes; deeper levels are computed directly.
    pub fn outcome_at(&self, pos: NodePos) -> CertResult<Outcome> {
        self.check_pos(pos)?;
        if pos.depth == 0 {
            return Ok(Outcome::Unknown);
        }
        if pos.depth <= self.cache_depth {
            return self.get_node(pos).map(|node| node.outcome);
        }
        let level = &self.levels[pos.depth - 1];
        Ok(level[(pos.index % level.len() as u64) as usize])
    }

    /// Materialised nodes, the root excluded.
    pub fn get_n_nodes_cached(&self) -> u64 {
        self.n_nodes_cached.load(Ordering::Relaxed)
    }

    /// Positions whose children are materialised, in depth-first order.
    pub fn expanded_positions(&self) -> Vec<NodePos> {
        let mut out = Vec::new();
        let mut stack: Vec<&Node> = vec![&self.root];
        while let Some(node) = stack.pop() {
            if let Some(children) = node.children() {
                out.push(node.pos);
                stack.extend(children.iter().rev());
            }
        }
        out
    }

    /// Rough estimate of the RAM held by the tree.
    pub fn memory_footprint(&self) -> u64 {
        let structure = std::mem::size_of::<EventTree>()
            + self.levels.iter().map(|l| l.len() * std::mem::size_of::<Outcome>()).sum::<usize>()
            + (self.widths.len() + self.suffix_leaves.len()) * std::mem::size_of::<u64>();
        structure as u64 + self.get_n_nodes_cached() * std::mem::size_of::<Node>() as u64
    }

    pub fn info(&self) -> CertResult<TreeInfo> {
        Ok(TreeInfo {
            depth: self.depth,
            breadths: self.breadths()?,
            n_leaves: self.get_n_leaves()?,
            n_nodes_total: self.get_n_nodes_total()?,
            n_nodes_cached: self.get_n_nodes_cached(),
            memory_bytes: self.memory_footprint(),
        })
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    pub fn to_snapshot(&self) -> CertResult<TreeSnapshot> {
        self.ensure_initialized()?;
        Ok(TreeSnapshot {
            version: SNAPSHOT_VERSION,
            levels: self.levels.clone(),
            symmetry_generation: self.symmetry_generation,
            cache_depth: self.cache_depth,
            expanded: self.expanded_positions(),
        })
    }

    pub fn from_snapshot(snapshot: &TreeSnapshot) -> CertResult<Self> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(CertError::InvalidValue(format!(
                "unsupported event tree snapshot version {}",
                snapshot.version
            )));
        }
        let mut tree = EventTree::new(snapshot.levels.len())?;
        for (depth, level) in snapshot.levels.iter().enumerate() {
            for &outcome in level {
                tree.insert_node(depth, outcome)?;
            }
        }
        tree.set_symmetry_generation(snapshot.symmetry_generation)?;
        tree.set_cache_depth(snapshot.cache_depth);
        tree.finish_initialization(0)?;
        for &pos in &snapshot.expanded {
            let node = tree.get_node(pos)?;
            tree.expand(node);
        }
        Ok(tree)
    }

    pub fn save(&self, path: &FsPath) -> CertResult<()> {
        let snapshot = self.to_snapshot()?;
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(writer, &snapshot)?;
        Ok(())
    }

    pub fn load(path: &FsPath) -> CertResult<Self> {
        let reader = BufReader::new(File::open(path)?);
        let snapshot: TreeSnapshot = serde_json::from_reader(reader)?;
        EventTree::from_snapshot(&snapshot)
    }
}

impl PartialEq for EventTree {
    fn eq(&self, other: &Self) -> bool {
        self.initialized
            && other.initialized
            && self.depth == other.depth
            && self.levels == other.levels
            && self.symmetry_generation == other.symmetry_generation
            && self.expanded_positions() == other.expanded_positions()
    }
}

impl fmt::Debug for EventTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventTree")
            .field("depth", &self.depth)
            .field("levels", &self.levels)
            .field("initialized", &self.initialized)
            .field("symmetry_generation", &self.symmetry_generation)
            .field("n_nodes_cached", &self.get_n_nodes_cached())
            .finish()
    }
}
