//! Process partitioning: assign every node of the tree a contiguous range of ranks.

use crate::system::{
    tree::{NodeId, SystemTree},
    ProcRange,
};

/// Ranges assigned to every node, indexed by [`NodeId`], as seen from one rank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcAssignment {
    rank: usize,
    ranges: Vec<ProcRange>,
}

impl ProcAssignment {
    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn range(&self, id: NodeId) -> ProcRange {
        self.ranges[id.index()]
    }

    /// Whether `id` runs on this rank.
    pub fn is_local(&self, id: NodeId) -> bool {
        self.range(id).contains(self.rank)
    }
}

/// Split `range` into `k` contiguous pieces whose lengths differ by at most one.
///
/// The first `len % k` pieces get the extra rank. With fewer ranks than pieces the trailing pieces
/// are empty.
pub fn partition_range(range: ProcRange, k: usize) -> Vec<ProcRange> {
    if k == 0 {
        return Vec::new();
    }
    let base = range.len() / k;
    let extra = range.len() % k;

    let mut lo = range.lo;
    (0..k)
        .map(|i| {
            let len = base + usize::from(i < extra);
            let piece = ProcRange::new(lo, lo + len);
            lo += len;
            piece
        })
        .collect()
}

/// Ranges for the `k` children of a splittable node running on `range`.
///
/// With at least as many ranks as children this is [`partition_range`]. With fewer ranks every
/// child still gets a single rank, and the children are spread evenly over the ranks in order, so
/// no child is left without a place to run.
pub fn split_children(range: ProcRange, k: usize) -> Vec<ProcRange> {
    let len = range.len();
    if len == 0 || len >= k {
        return partition_range(range, k);
    }
    (0..k)
        .map(|i| {
            let rank = range.lo + i * len / k;
            ProcRange::new(rank, rank + 1)
        })
        .collect()
}

/// Recursively assign ranges starting from the root, which receives `range`.
///
/// Every visited node is annotated through [`crate::System::accept_process_range`].
pub fn setup_processors(tree: &mut SystemTree, range: ProcRange, rank: usize) -> ProcAssignment {
    let mut ranges = vec![ProcRange::default(); tree.len()];
    assign(tree, tree.root(), range, 0, &mut ranges);
    ProcAssignment { rank, ranges }
}

fn assign(
    tree: &mut SystemTree,
    id: NodeId,
    range: ProcRange,
    depth: usize,
    ranges: &mut [ProcRange],
) {
    log::trace!(
        "{:indent$}`{}` -> {range}",
        "",
        tree.node(id).pathname(),
        indent = depth * 2
    );
    tree.assign_proc_range(id, range);
    ranges[id.index()] = range;

    let children = tree.children(id).to_vec();
    if children.is_empty() {
        return;
    }

    if tree.node(id).system().is_splittable() {
        let pieces = split_children(range, children.len());
        for (child, piece) in children.into_iter().zip(pieces) {
            assign(tree, child, piece, depth + 1, ranges);
        }
    } else {
        for child in children {
            assign(tree, child, range, depth + 1, ranges);
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::system::builtin::{Component, Group};

    #[rstest]
    #[case(0, 1)]
    #[case(1, 1)]
    #[case(1, 3)]
    #[case(2, 2)]
    #[case(5, 2)]
    #[case(7, 3)]
    #[case(8, 8)]
    #[case(3, 7)]
    fn test_partition_covers_range(#[case] len: usize, #[case] k: usize) {
        let range = ProcRange::new(4, 4 + len);
        let pieces = partition_range(range, k);
        assert_eq!(pieces.len(), k);

        // contiguous, no gaps or overlaps
        assert_eq!(pieces[0].lo, range.lo);
        assert_eq!(pieces[k - 1].hi, range.hi);
        for pair in pieces.windows(2) {
            assert_eq!(pair[0].hi, pair[1].lo);
        }

        let lens: Vec<usize> = pieces.iter().map(ProcRange::len).collect();
        let min = *lens.iter().min().unwrap();
        let max = *lens.iter().max().unwrap();
        assert!(max - min <= 1, "{lens:?}");
        assert_eq!(lens.iter().sum::<usize>(), len);
    }

    #[test]
    fn test_partition_front_loads_remainder() {
        let pieces = partition_range(ProcRange::new(0, 5), 3);
        assert_eq!(
            pieces,
            vec![
                ProcRange::new(0, 2),
                ProcRange::new(2, 4),
                ProcRange::new(4, 5)
            ]
        );
        assert!(partition_range(ProcRange::new(0, 5), 0).is_empty());
    }

    #[test]
    fn test_serial_and_parallel_assignment() {
        let mut tree = SystemTree::new(Group::parallel());
        let root = tree.root();
        let a = tree.add_subsystem(root, "a", Group::serial()).unwrap();
        let b = tree.add_subsystem(root, "b", Component::new()).unwrap();
        let c = tree.add_subsystem(root, "c", Component::new()).unwrap();
        let a1 = tree.add_subsystem(a, "a1", Component::new()).unwrap();
        let a2 = tree.add_subsystem(a, "a2", Component::new()).unwrap();

        let procs = setup_processors(&mut tree, ProcRange::new(0, 4), 1);
        assert_eq!(procs.range(root), ProcRange::new(0, 4));
        assert_eq!(procs.range(a), ProcRange::new(0, 2));
        assert_eq!(procs.range(b), ProcRange::new(2, 3));
        assert_eq!(procs.range(c), ProcRange::new(3, 4));
        assert_eq!(procs.range(a1), ProcRange::new(0, 2));
        assert_eq!(procs.range(a2), ProcRange::new(0, 2));
        assert_eq!(tree.node(a2).proc_range(), ProcRange::new(0, 2));

        assert!(procs.is_local(a1));
        assert!(!procs.is_local(b));
    }

    #[rstest]
    #[case(1, &[0, 0, 0])]
    #[case(2, &[0, 0, 1])]
    #[case(3, &[0, 1, 2])]
    fn test_fewer_ranks_than_children(#[case] len: usize, #[case] expected: &[usize]) {
        let pieces = split_children(ProcRange::new(0, len), 3);
        let ranks: Vec<usize> = pieces.iter().map(|piece| piece.lo).collect();
        assert_eq!(ranks, expected);
        assert!(pieces.iter().all(|piece| piece.len() == 1));
    }

    #[test]
    fn test_degenerate_partition() {
        let mut tree = SystemTree::new(Group::parallel());
        let root = tree.root();
        let ids: Vec<_> = ["a", "b", "c"]
            .into_iter()
            .map(|name| tree.add_subsystem(root, name, Component::new()).unwrap())
            .collect();

        let procs = setup_processors(&mut tree, ProcRange::new(0, 2), 0);
        assert_eq!(procs.range(ids[0]), ProcRange::new(0, 1));
        assert_eq!(procs.range(ids[1]), ProcRange::new(0, 1));
        assert_eq!(procs.range(ids[2]), ProcRange::new(1, 2));
        assert!(procs.is_local(ids[1]));
        assert!(!procs.is_local(ids[2]));

        // a single rank runs every child
        let procs = setup_processors(&mut tree, ProcRange::new(0, 1), 0);
        assert!(ids.iter().all(|&id| procs.is_local(id)));
    }
}
