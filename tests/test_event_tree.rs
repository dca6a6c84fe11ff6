//! Tests for the virtual event tree.
//!
//! Covers the analytic size formulas, the lazy node cache (including
//! concurrent materialisation), initialisation errors and persistence.

use rayon::prelude::*;

use inflation_cert::error::CertError;
use inflation_cert::event::Outcome;
use inflation_cert::event_tree::{EventTree, NodePos, TreeIo};
use inflation_cert::symmetry::{ReducedOutcomes, SymmetryGroup};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn tree_with_breadths(breadths: &[u8], eager_depth: usize) -> EventTree {
    let mut tree = EventTree::new(breadths.len()).unwrap();
    for (depth, &b) in breadths.iter().enumerate() {
        for o in 0..b {
            tree.insert_node(depth, Outcome::Value(o)).unwrap();
        }
    }
    tree.finish_initialization(eager_depth).unwrap();
    tree
}

fn temp_file(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("infcert-{}-{}.json", name, std::process::id()))
}

const SHAPES: &[&[u8]] = &[&[2], &[2, 2], &[3, 1, 4], &[1, 5, 2, 3], &[4, 4, 4], &[2, 3, 2, 3, 2]];

// ---------------------------------------------------------------------------
// Analytic counting
// ---------------------------------------------------------------------------

#[test]
fn n_leaves_is_product_of_breadths() {
    for &shape in SHAPES {
        let tree = tree_with_breadths(shape, 0);
        let product: u64 = shape.iter().map(|&b| b as u64).product();
        assert_eq!(tree.get_n_leaves().unwrap(), product, "shape {:?}", shape);
    }
}

#[test]
fn n_nodes_total_sums_level_widths() {
    for &shape in SHAPES {
        let tree = tree_with_breadths(shape, 0);
        let mut width = 1u64;
        let mut total = 0u64;
        for &b in shape {
            width *= b as u64;
            total += width;
        }
        assert_eq!(tree.get_n_nodes_total().unwrap(), total, "shape {:?}", shape);
    }
}

#[test]
fn count_leaves_from_is_suffix_product() {
    for &shape in SHAPES {
        let tree = tree_with_breadths(shape, 0);
        for depth in 0..=shape.len() {
            let expected: u64 = shape[depth..].iter().map(|&b| b as u64).product();
            let width = tree.get_width_at_depth(depth).unwrap();
            for index in [0, width / 2, width - 1] {
                let pos = NodePos::new(depth, index);
                assert_eq!(tree.count_leaves_from(pos).unwrap(), expected);
            }
        }
    }
}

#[test]
fn count_leaves_does_not_depend_on_materialization() {
    let tree = tree_with_breadths(&[3, 2, 4], 0);
    let pos = NodePos::new(1, 2);
    let before = tree.count_leaves_from(pos).unwrap();
    tree.materialize_to(3);
    assert_eq!(tree.count_leaves_from(pos).unwrap(), before);
    assert_eq!(tree.get_n_nodes_cached(), tree.get_n_nodes_total().unwrap());
}

#[test]
fn children_leaf_ranges_tile_the_parent() {
    let tree = tree_with_breadths(&[2, 3, 2], 0);
    let parent = NodePos::new(1, 1);
    let whole = tree.leaf_range(parent).unwrap();
    let mut next = whole.start;
    for child in tree.children_of(parent).unwrap() {
        let range = tree.leaf_range(child).unwrap();
        assert_eq!(range.start, next);
        next = range.end;
    }
    assert_eq!(next, whole.end);
}

#[test]
fn event_prefix_follows_the_path() {
    let tree = tree_with_breadths(&[2, 3, 2], 0);
    let pos = tree.pos_of(&[1, 2]).unwrap();
    assert_eq!(
        tree.event_prefix(pos).unwrap(),
        vec![Outcome::Value(1), Outcome::Value(2), Outcome::Unknown]
    );
    assert_eq!(tree.outcome_at(pos).unwrap(), Outcome::Value(2));
}

#[test]
fn invalid_positions_are_rejected() {
    let tree = tree_with_breadths(&[2, 2], 0);
    assert!(matches!(
        tree.count_leaves_from(NodePos::new(1, 2)),
        Err(CertError::InvalidNodePos { .. })
    ));
    assert!(matches!(
        tree.count_leaves_from(NodePos::new(3, 0)),
        Err(CertError::InvalidNodePos { .. })
    ));
    assert!(tree.pos_of(&[0, 2]).is_err());
    assert!(matches!(
        tree.outcome_at(NodePos::new(5, 0)),
        Err(CertError::InvalidNodePos { depth: 5, index: 0 })
    ));
    assert!(matches!(
        tree.outcome_at(NodePos::new(2, 4)),
        Err(CertError::InvalidNodePos { .. })
    ));
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[test]
fn queries_fail_before_initialization() {
    let mut tree = EventTree::new(2).unwrap();
    tree.insert_node(0, Outcome::Value(0)).unwrap();
    tree.insert_node(1, Outcome::Value(0)).unwrap();

    assert!(matches!(tree.get_n_leaves(), Err(CertError::Uninitialized)));
    assert!(matches!(tree.get_n_nodes_total(), Err(CertError::Uninitialized)));
    assert!(matches!(tree.get_breadth_at_depth(0), Err(CertError::Uninitialized)));
    assert!(matches!(
        tree.count_leaves_from(NodePos::ROOT),
        Err(CertError::Uninitialized)
    ));
    assert!(matches!(tree.get_node(NodePos::ROOT), Err(CertError::Uninitialized)));
    assert!(matches!(
        tree.outcome_at(NodePos::new(1, 0)),
        Err(CertError::Uninitialized)
    ));
}

#[test]
fn structure_is_frozen_after_initialization() {
    let mut tree = tree_with_breadths(&[2, 2], 0);
    assert!(matches!(
        tree.insert_node(0, Outcome::Value(5)),
        Err(CertError::AlreadyInitialized)
    ));
    assert!(matches!(
        tree.finish_initialization(0),
        Err(CertError::AlreadyInitialized)
    ));
    assert_eq!(tree.get_breadth_at_depth(0).unwrap(), 2);
}

#[test]
fn empty_level_cannot_be_finished() {
    let mut tree = EventTree::new(2).unwrap();
    tree.insert_node(0, Outcome::Value(0)).unwrap();
    assert!(matches!(
        tree.finish_initialization(0),
        Err(CertError::EmptyLevel(1))
    ));
}

#[test]
fn zero_depth_is_rejected() {
    assert!(matches!(EventTree::new(0), Err(CertError::ZeroDepth)));
}

#[test]
fn huge_tree_reports_overflow() {
    let group = ReducedOutcomes::full(70, 2).unwrap();
    assert!(matches!(
        EventTree::from_symmetry(&group, 0, 0),
        Err(CertError::TreeTooLarge)
    ));
}

// ---------------------------------------------------------------------------
// Node cache
// ---------------------------------------------------------------------------

#[test]
fn eager_depth_materializes_shallow_levels() {
    let tree = tree_with_breadths(&[2, 2, 2], 2);
    assert_eq!(tree.get_n_nodes_cached(), 2 + 4);
    assert!(tree.root().is_expanded());
}

#[test]
fn get_node_memoizes() {
    let tree = tree_with_breadths(&[2, 3, 2], 0);
    let pos = NodePos::new(3, 7);
    let first = tree.get_node(pos).unwrap();
    let cached = tree.get_n_nodes_cached();
    assert_eq!(cached, 2 + 3 + 2);

    let second = tree.get_node(pos).unwrap();
    assert!(std::ptr::eq(first, second));
    assert_eq!(tree.get_n_nodes_cached(), cached);
    assert_eq!(first.pos(), pos);
    assert_eq!(first.outcome(), Outcome::Value(1));
}

#[test]
fn concurrent_materialization_yields_one_node() {
    let tree = tree_with_breadths(&[3, 3, 3, 3], 0);
    let positions: Vec<NodePos> = (0..81).map(|i| NodePos::new(4, i)).collect();

    let addresses: Vec<Vec<usize>> = (0..8)
        .into_par_iter()
        .map(|_| {
            positions
                .iter()
                .map(|&p| tree.get_node(p).unwrap() as *const _ as usize)
                .collect()
        })
        .collect();

    for other in &addresses[1..] {
        assert_eq!(other, &addresses[0]);
    }
    assert_eq!(tree.get_n_nodes_cached(), tree.get_n_nodes_total().unwrap());
}

// ---------------------------------------------------------------------------
// Symmetry and persistence
// ---------------------------------------------------------------------------

#[test]
fn relabelling_shrinks_first_level() {
    let group = ReducedOutcomes::relabelled(3, 3).unwrap();
    let tree = EventTree::from_symmetry(&group, 1, 3).unwrap();
    assert_eq!(tree.breadths().unwrap(), vec![1, 3, 3]);
    assert_eq!(tree.get_n_leaves().unwrap(), 9);
    assert_eq!(tree.symmetry_generation(), group.generation());
}

#[test]
fn saved_tree_loads_equal() {
    let group = ReducedOutcomes::full(3, 2).unwrap();
    let tree = EventTree::from_symmetry(&group, 1, 3).unwrap();
    tree.get_node(NodePos::new(3, 5)).unwrap();

    let path = temp_file("roundtrip");
    tree.save(&path).unwrap();
    let loaded = EventTree::load(&path).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(loaded, tree);
    assert_eq!(loaded.get_n_nodes_cached(), tree.get_n_nodes_cached());
    assert_eq!(loaded.cache_depth(), 3);
}

#[test]
fn load_or_build_writes_then_reads() {
    let group = ReducedOutcomes::relabelled(3, 2).unwrap();
    let path = temp_file("symtree");

    let written = EventTree::load_or_build(TreeIo::Write, Some(&path), &group, 1, 2).unwrap();
    let read = EventTree::load_or_build(TreeIo::Read, Some(&path), &group, 0, 0).unwrap();
    assert_eq!(read, written);

    group.invalidate();
    let stale = EventTree::load_or_build(TreeIo::Read, Some(&path), &group, 0, 0);
    std::fs::remove_file(&path).ok();
    assert!(matches!(stale, Err(CertError::SymmetriesChanged { .. })));
}

#[test]
fn read_mode_needs_a_path() {
    let group = ReducedOutcomes::full(2, 2).unwrap();
    assert!(EventTree::load_or_build(TreeIo::Read, None, &group, 0, 0).is_err());
}
