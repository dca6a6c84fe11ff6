//! Tests for the load-balancing tree splitter.

use inflation_cert::error::CertError;
use inflation_cert::event::Outcome;
use inflation_cert::event_tree::EventTree;
use inflation_cert::symmetry::{ReducedOutcomes, SymmetryGroup};
use inflation_cert::tree_splitter::{PathPartition, TreeSplitter};

fn tree_with_breadths(breadths: &[u8]) -> EventTree {
    let mut tree = EventTree::new(breadths.len()).unwrap();
    for (depth, &b) in breadths.iter().enumerate() {
        for o in 0..b {
            tree.insert_node(depth, Outcome::Value(o)).unwrap();
        }
    }
    tree.finish_initialization(0).unwrap();
    tree
}

/// Groups are disjoint, none is empty and together they cover every leaf.
fn assert_is_partition(tree: &EventTree, partition: &PathPartition) {
    let n_leaves = tree.get_n_leaves().unwrap();
    let mut ranges: Vec<_> = partition
        .leaf_ranges(tree)
        .unwrap()
        .into_iter()
        .flatten()
        .collect();
    ranges.sort_by_key(|r| r.start);

    let mut next = 0;
    for r in &ranges {
        assert_eq!(r.start, next, "gap or overlap at leaf {}", next);
        next = r.end;
    }
    assert_eq!(next, n_leaves);

    assert_eq!(partition.leaves_per_group().iter().sum::<u64>(), n_leaves);
    assert!(partition.leaves_per_group().iter().all(|&n| n > 0));
    for group in partition.groups() {
        for p in group {
            let pos = tree.pos_of(&p.path).unwrap();
            assert_eq!(p.n_leaves, tree.count_leaves_from(pos).unwrap());
        }
    }
}

// ---------------------------------------------------------------------------
// Partition property
// ---------------------------------------------------------------------------

#[test]
fn every_split_count_yields_a_partition() {
    let shapes: &[&[u8]] = &[&[7], &[2, 2, 2], &[3, 1, 4], &[5, 3, 2], &[2, 3, 2, 3], &[1, 1, 6]];
    for &shape in shapes {
        let tree = tree_with_breadths(shape);
        let n_leaves = tree.get_n_leaves().unwrap() as usize;
        for n in 1..=n_leaves.min(12) {
            let partition = TreeSplitter::get_path_partition(&tree, n).unwrap();
            assert_eq!(partition.len(), n, "shape {:?}, {} splits", shape, n);
            assert_is_partition(&tree, &partition);
        }
    }
}

#[test]
fn one_leaf_per_group_when_splits_equal_leaves() {
    let tree = tree_with_breadths(&[2, 3]);
    let partition = TreeSplitter::get_path_partition(&tree, 6).unwrap();
    assert_eq!(partition.leaves_per_group(), vec![1; 6]);
    assert!(partition.met_target());
    assert_is_partition(&tree, &partition);
}

#[test]
fn groups_follow_canonical_leaf_order() {
    let tree = tree_with_breadths(&[4, 4, 4]);
    let partition = TreeSplitter::get_path_partition(&tree, 3).unwrap();
    let ranges = partition.leaf_ranges(&tree).unwrap();
    for pair in ranges.windows(2) {
        let end = pair[0].last().unwrap().end;
        assert_eq!(pair[1].first().unwrap().start, end);
    }
}

// ---------------------------------------------------------------------------
// Quality
// ---------------------------------------------------------------------------

#[test]
fn balanced_tree_meets_quality_target() {
    let tree = tree_with_breadths(&[4, 4, 4]);
    let partition = TreeSplitter::get_path_partition(&tree, 3).unwrap();
    assert!(partition.met_target());
    assert!(partition.quality_factor() <= 1.1);
    assert_eq!(partition.leaves_per_group(), vec![21, 21, 22]);
}

#[test]
fn unreachable_target_returns_best_effort() {
    // 7 leaves in 3 groups: the best split is 2, 2, 3
    let tree = tree_with_breadths(&[7]);
    let partition = TreeSplitter::get_path_partition(&tree, 3).unwrap();
    assert!(!partition.met_target());
    assert_eq!(partition.leaves_per_group(), vec![2, 2, 3]);
    assert!((partition.quality_factor() - 1.5).abs() < 1e-12);
    assert_is_partition(&tree, &partition);
}

#[test]
fn looser_target_is_met() {
    let tree = tree_with_breadths(&[7]);
    let partition = TreeSplitter::new(&tree, 3)
        .with_quality_factor(2.0)
        .split()
        .unwrap();
    assert!(partition.met_target());
    assert_is_partition(&tree, &partition);
}

#[test]
fn unbounded_quality_still_fills_every_group() {
    let tree = tree_with_breadths(&[2, 2]);
    let partition = TreeSplitter::new(&tree, 2)
        .with_quality_factor(1e30)
        .split()
        .unwrap();
    assert_eq!(partition.leaves_per_group(), vec![2, 2]);
    assert_is_partition(&tree, &partition);

    let tree = tree_with_breadths(&[2, 2, 2]);
    for q in [1e30, f64::MAX, f64::INFINITY] {
        let partition = TreeSplitter::new(&tree, 4)
            .with_quality_factor(q)
            .split()
            .unwrap();
        assert!(partition.met_target(), "quality factor {}", q);
        assert_eq!(partition.len(), 4);
        assert_is_partition(&tree, &partition);
    }
}

#[test]
fn quality_below_one_is_rejected() {
    let tree = tree_with_breadths(&[4]);
    let res = TreeSplitter::new(&tree, 2).with_quality_factor(0.5).split();
    assert!(matches!(res, Err(CertError::InvalidValue(_))));
}

// ---------------------------------------------------------------------------
// Errors and metadata
// ---------------------------------------------------------------------------

#[test]
fn more_splits_than_leaves_is_rejected() {
    let tree = tree_with_breadths(&[2, 2]);
    assert!(matches!(
        TreeSplitter::get_path_partition(&tree, 5),
        Err(CertError::InvalidSplitCount {
            n_splits: 5,
            n_leaves: 4
        })
    ));
}

#[test]
fn uninitialized_tree_is_rejected() {
    let mut tree = EventTree::new(1).unwrap();
    tree.insert_node(0, Outcome::Value(0)).unwrap();
    assert!(matches!(
        TreeSplitter::get_path_partition(&tree, 1),
        Err(CertError::Uninitialized)
    ));
}

#[test]
fn partition_records_symmetry_generation() {
    let group = ReducedOutcomes::relabelled(4, 3).unwrap();
    group.invalidate();
    let tree = EventTree::from_symmetry(&group, 1, 2).unwrap();
    let partition = TreeSplitter::get_path_partition(&tree, 4).unwrap();
    assert_eq!(partition.symmetry_generation(), group.generation());
    assert_eq!(partition.n_leaves(), 27);
    assert_is_partition(&tree, &partition);
}
