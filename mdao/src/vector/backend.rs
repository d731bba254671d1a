//! Buffer allocation strategies.

use std::sync::Arc;

use super::{Vector, VectorKind, VectorLayout};
use crate::system::ProcRange;

/// Everything a backend needs to allocate one buffer.
#[derive(Debug, Clone)]
pub struct AllocRequest<'a> {
    /// Vector set name, `None` for the default one
    pub vec_name: Option<&'a str>,
    pub kind: VectorKind,
    /// Ranks of the subtree the buffer is built for
    pub proc_range: ProcRange,
    /// The allocating rank
    pub rank: usize,
    pub layout: Arc<VectorLayout>,
}

/// Interface for allocating the buffers of a vector set.
pub trait VectorBackend: std::fmt::Debug {
    /// Short name for diagnostics
    fn name(&self) -> &'static str;

    fn allocate(&self, request: AllocRequest<'_>) -> Vector;
}

/// Plain local arrays. Every local variable is published in data movement, so replicated
/// variables contribute once per replica.
#[derive(Debug, Default, Clone, Copy)]
pub struct DenseBackend;

impl VectorBackend for DenseBackend {
    fn name(&self) -> &'static str {
        "dense"
    }

    fn allocate(&self, request: AllocRequest<'_>) -> Vector {
        Vector::new(request, None)
    }
}

/// Local segments of a distributed array. A variable held by several ranks is owned by the
/// lowest of them; only the owner publishes it.
#[derive(Debug, Default, Clone, Copy)]
pub struct SegmentedBackend;

impl VectorBackend for SegmentedBackend {
    fn name(&self) -> &'static str {
        "segmented"
    }

    fn allocate(&self, request: AllocRequest<'_>) -> Vector {
        let owned = request
            .layout
            .entries()
            .iter()
            .map(|entry| entry.proc_range.lo == request.rank)
            .collect();
        Vector::new(request, Some(owned))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembler::Assembler,
        comm::SerialGroup,
        setup::VariableMeta,
        system::{tree::SystemTree, PerRole, Role},
        Group,
    };

    /// Two outputs, the first held by ranks `[0, 2)` and the second by `[1, 2)`.
    fn layout() -> Arc<VectorLayout> {
        let tree = SystemTree::new(Group::serial());
        let meta = |name: &str, size, proc_range| VariableMeta {
            name: name.to_owned(),
            role: Role::Output,
            size,
            node: tree.root(),
            proc_range,
        };
        let metadata = PerRole::new(
            vec![],
            vec![
                meta("a.x", 2, ProcRange::new(0, 2)),
                meta("b.y", 3, ProcRange::new(1, 2)),
            ],
        );
        let indices = PerRole::new(vec![], vec![0, 1]);

        let mut assembler = Assembler::new(Arc::new(SerialGroup));
        assembler
            .setup_variables(&PerRole::new(0, 2), &metadata, &indices)
            .unwrap();
        let names = ["a.x".to_owned(), "b.y".to_owned()];
        Arc::new(VectorLayout::new(Role::Output, &names, &indices.output, &assembler).unwrap())
    }

    fn request(rank: usize, layout: Arc<VectorLayout>) -> AllocRequest<'static> {
        AllocRequest {
            vec_name: None,
            kind: VectorKind::Output,
            proc_range: ProcRange::new(0, 2),
            rank,
            layout,
        }
    }

    #[test]
    fn test_dense_publishes_everything() {
        let vector = DenseBackend.allocate(request(1, layout()));
        assert_eq!(vector.len(), 5);
        assert!(!vector.is_segmented());
        assert_eq!(vector.owned_segments().count(), 2);
        assert_eq!(vector.get("b.y"), Some(&[0.0, 0.0, 0.0][..]));
    }

    #[test]
    fn test_segmented_ownership() {
        let layout = layout();
        let rank0 = SegmentedBackend.allocate(request(0, layout.clone()));
        let rank1 = SegmentedBackend.allocate(request(1, layout));

        assert!(rank0.is_segmented());
        assert!(rank0.owns(0));
        assert!(!rank1.owns(0));
        assert!(rank1.owns(1));

        let published: Vec<_> = rank1
            .owned_segments()
            .map(|(entry, values)| (entry.name.as_str(), entry.global_offset, values.len()))
            .collect();
        assert_eq!(published, vec![("b.y", 2, 3)]);
    }
}
