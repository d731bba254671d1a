//! The assembler combines what every rank knows locally into the tree-wide schema.
//!
//! It is filled in three steps, each of which is a collective over the process group:
//!
//! 1. [`Assembler::setup_variables`]: sizes and owning process sets of every variable,
//! 2. [`Assembler::setup_connections`]: the merged, validated set of edges,
//! 3. [`Assembler::setup_input_indices`]: where each local input's source lives in the global
//!    output buffer.
//!
//! After the last step the assembler is frozen and only readable.

use std::{collections::HashMap, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{
    comm::{all_gather, ProcessGroup},
    setup::{ConnectionIndices, VariableMeta},
    system::{PerRole, ProcRange, Role},
    Error,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Empty,
    Variables,
    Connections,
    Frozen,
}

/// A contiguous span of the global flattened output buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpan {
    pub offset: usize,
    pub len: usize,
}

impl IndexSpan {
    pub fn range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.len
    }
}

/// One rank's knowledge of one of its variables.
#[derive(Debug, Serialize, Deserialize)]
struct Contribution {
    role: Role,
    index: usize,
    name: String,
    size: usize,
    proc_range: ProcRange,
}

#[derive(Debug)]
pub struct Assembler {
    comm: Arc<dyn ProcessGroup>,
    stage: Stage,
    variable_names: PerRole<Vec<String>>,
    variable_sizes: PerRole<Vec<usize>>,
    variable_set_indices: PerRole<Vec<usize>>,
    variable_sets: Vec<ProcRange>,
    global_offsets: PerRole<Vec<usize>>,
    connections: ConnectionIndices,
    input_global_index_map: Vec<Option<IndexSpan>>,
}

impl Assembler {
    pub fn new(comm: Arc<dyn ProcessGroup>) -> Self {
        Self {
            comm,
            stage: Stage::Empty,
            variable_names: PerRole::default(),
            variable_sizes: PerRole::default(),
            variable_set_indices: PerRole::default(),
            variable_sets: Vec::new(),
            global_offsets: PerRole::default(),
            connections: ConnectionIndices::default(),
            input_global_index_map: Vec::new(),
        }
    }

    fn enter(&mut self, expected: Stage, found: &'static str) -> Result<(), Error> {
        match self.stage {
            Stage::Frozen => Err(Error::Frozen),
            stage if stage == expected => Ok(()),
            stage => Err(Error::PhaseOrder {
                expected: match stage {
                    Stage::Empty => "setup_variables",
                    Stage::Variables => "setup_connections",
                    Stage::Connections | Stage::Frozen => "setup_input_indices",
                },
                found,
            }),
        }
    }

    /// Record the size and owning process set of every variable in the tree.
    ///
    /// # Arguments
    /// * `counts` - Number of variables per role across the whole tree.
    /// * `metadata` - This rank's variables.
    /// * `indices` - Global positions of this rank's variables, parallel to `metadata`.
    pub fn setup_variables(
        &mut self,
        counts: &PerRole<usize>,
        metadata: &PerRole<Vec<VariableMeta>>,
        indices: &PerRole<Vec<usize>>,
    ) -> Result<(), Error> {
        self.enter(Stage::Empty, "setup_variables")?;

        let local: Vec<Contribution> = Role::ALL
            .into_iter()
            .flat_map(|role| {
                metadata[role]
                    .iter()
                    .zip(&indices[role])
                    .map(move |(meta, &index)| Contribution {
                        role,
                        index,
                        name: meta.name.clone(),
                        size: meta.size,
                        proc_range: meta.proc_range,
                    })
            })
            .collect();

        let gathered = all_gather(self.comm.as_ref(), &local)?;

        let mut slots: PerRole<Vec<Option<(String, usize, ProcRange)>>> =
            counts.as_ref().map(|_, &count| vec![None; count]);
        for contribution in gathered.into_iter().flatten() {
            let slot = slots[contribution.role]
                .get_mut(contribution.index)
                .ok_or_else(|| {
                    Error::LayoutMismatch(format!(
                        "{} position {} is out of range",
                        contribution.role, contribution.index
                    ))
                })?;
            match slot {
                None => {
                    *slot = Some((contribution.name, contribution.size, contribution.proc_range))
                }
                Some((name, size, _)) if *size != contribution.size => {
                    return Err(Error::InconsistentSize {
                        name: name.clone(),
                        first: *size,
                        second: contribution.size,
                    });
                }
                Some(_) => {}
            }
        }

        let mut set_lookup: HashMap<ProcRange, usize> = HashMap::new();
        for role in Role::ALL {
            let mut names = Vec::with_capacity(slots[role].len());
            let mut sizes = Vec::with_capacity(slots[role].len());
            let mut sets = Vec::with_capacity(slots[role].len());

            for (index, slot) in slots[role].drain(..).enumerate() {
                let (name, size, proc_range) = slot.ok_or_else(|| {
                    Error::LayoutMismatch(format!("no rank contributed {role} position {index}"))
                })?;
                let set = *set_lookup.entry(proc_range).or_insert_with(|| {
                    self.variable_sets.push(proc_range);
                    self.variable_sets.len() - 1
                });
                names.push(name);
                sizes.push(size);
                sets.push(set);
            }

            self.global_offsets[role] = sizes
                .iter()
                .scan(0, |offset, &size| {
                    let start = *offset;
                    *offset += size;
                    Some(start)
                })
                .collect();
            self.variable_names[role] = names;
            self.variable_sizes[role] = sizes;
            self.variable_set_indices[role] = sets;
        }

        log::debug!(
            "assembled {} inputs ({} elements) and {} outputs ({} elements) in {} process sets",
            self.variable_sizes.input.len(),
            self.global_size(Role::Input),
            self.variable_sizes.output.len(),
            self.global_size(Role::Output),
            self.variable_sets.len(),
        );

        self.stage = Stage::Variables;
        Ok(())
    }

    /// Merge the connections resolved on every rank into one global set.
    ///
    /// The same edge declared on several ranks is kept once. An input fed by two different
    /// outputs, or an edge whose endpoint sizes are incompatible, is a configuration error.
    pub fn setup_connections(
        &mut self,
        connections: &ConnectionIndices,
        allprocs_names: &PerRole<Vec<String>>,
    ) -> Result<(), Error> {
        self.enter(Stage::Variables, "setup_connections")?;

        if allprocs_names.input.len() != self.variable_sizes.input.len()
            || allprocs_names.output.len() != self.variable_sizes.output.len()
        {
            return Err(Error::LayoutMismatch(
                "variable name lists do not match the assembled variable counts".to_owned(),
            ));
        }

        let name = |role: Role, idx: usize| -> String {
            allprocs_names[role]
                .get(idx)
                .cloned()
                .unwrap_or_else(|| format!("<{role} {idx}>"))
        };

        let gathered = all_gather(self.comm.as_ref(), connections)?;
        let mut merged = ConnectionIndices::default();
        for (input, edge) in gathered.iter().flat_map(ConnectionIndices::iter) {
            if let Err(first) = merged.insert(input, *edge) {
                return Err(Error::ConflictingSources {
                    target: name(Role::Input, input),
                    first: name(Role::Output, first),
                    second: name(Role::Output, edge.source),
                });
            }
        }

        for (input, edge) in merged.iter() {
            let (Some(&target_size), Some(&source_size)) = (
                self.variable_sizes.input.get(input),
                self.variable_sizes.output.get(edge.source),
            ) else {
                return Err(Error::LayoutMismatch(format!(
                    "edge {} -> {input} refers to an unknown position",
                    edge.source
                )));
            };

            let compatible =
                source_size == target_size || (edge.broadcast && source_size == 1);
            if !compatible {
                return Err(Error::SizeMismatch {
                    source_name: name(Role::Output, edge.source),
                    source_size,
                    target_name: name(Role::Input, input),
                    target_size,
                });
            }
            log::trace!(
                "edge `{}` -> `{}`",
                name(Role::Output, edge.source),
                name(Role::Input, input)
            );
        }

        log::debug!("assembled {} global connections", merged.len());
        self.connections = merged;
        self.stage = Stage::Connections;
        Ok(())
    }

    /// For every local input, locate its source's span in the global flattened output buffer,
    /// then freeze the assembler.
    ///
    /// Several inputs fed by the same output each get the full span of that output.
    pub fn setup_input_indices(
        &mut self,
        input_metadata: &[VariableMeta],
        input_indices: &[usize],
    ) -> Result<(), Error> {
        self.enter(Stage::Connections, "setup_input_indices")?;

        if input_metadata.len() != input_indices.len() {
            return Err(Error::LayoutMismatch(format!(
                "{} local inputs but {} indices",
                input_metadata.len(),
                input_indices.len()
            )));
        }

        self.input_global_index_map = input_metadata
            .iter()
            .zip(input_indices)
            .map(|(meta, &idx)| {
                let span = self.connections.source_of(idx).map(|edge| IndexSpan {
                    offset: self.global_offsets.output[edge.source],
                    len: self.variable_sizes.output[edge.source],
                });
                log::trace!("input `{}` reads {span:?}", meta.name);
                span
            })
            .collect();

        self.stage = Stage::Frozen;
        Ok(())
    }

    pub fn is_frozen(&self) -> bool {
        self.stage == Stage::Frozen
    }

    pub fn comm(&self) -> &dyn ProcessGroup {
        self.comm.as_ref()
    }

    /// Number of variables of `role` in the whole tree.
    pub fn variable_count(&self, role: Role) -> usize {
        self.variable_sizes[role].len()
    }

    /// Names of all variables of `role`, by global position.
    pub fn variable_names(&self, role: Role) -> &[String] {
        &self.variable_names[role]
    }

    /// Sizes of all variables of `role`, by global position.
    pub fn variable_sizes(&self, role: Role) -> &[usize] {
        &self.variable_sizes[role]
    }

    /// Index into [`Assembler::variable_sets`] of every variable of `role`.
    pub fn variable_set_indices(&self, role: Role) -> &[usize] {
        &self.variable_set_indices[role]
    }

    /// Distinct process ranges owning variables, in order of first appearance.
    pub fn variable_sets(&self) -> &[ProcRange] {
        &self.variable_sets
    }

    /// Offset of every variable of `role` in the global flattened buffer of that role.
    pub fn global_offsets(&self, role: Role) -> &[usize] {
        &self.global_offsets[role]
    }

    /// Length of the global flattened buffer of `role`.
    pub fn global_size(&self, role: Role) -> usize {
        self.variable_sizes[role].iter().sum()
    }

    pub fn connections(&self) -> &ConnectionIndices {
        &self.connections
    }

    /// Source span of each local input, `None` for unconnected inputs.
    pub fn input_global_index_map(&self) -> &[Option<IndexSpan>] {
        &self.input_global_index_map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        comm::SerialGroup,
        setup::Edge,
        system::tree::SystemTree,
        Group,
    };

    fn meta(tree: &SystemTree, name: &str, role: Role, size: usize) -> VariableMeta {
        VariableMeta {
            name: name.to_owned(),
            role,
            size,
            node: tree.root(),
            proc_range: ProcRange::new(0, 1),
        }
    }

    struct Fixture {
        metadata: PerRole<Vec<VariableMeta>>,
        indices: PerRole<Vec<usize>>,
        names: PerRole<Vec<String>>,
    }

    fn fixture() -> Fixture {
        let tree = SystemTree::new(Group::serial());
        let metadata = PerRole::new(
            vec![
                meta(&tree, "b.y", Role::Input, 3),
                meta(&tree, "b.v", Role::Input, 2),
                meta(&tree, "c.u", Role::Input, 3),
            ],
            vec![
                meta(&tree, "a.s", Role::Output, 1),
                meta(&tree, "a.x", Role::Output, 3),
            ],
        );
        let names: PerRole<Vec<String>> = metadata
            .as_ref()
            .map(|_, metas| metas.iter().map(|m| m.name.clone()).collect());
        Fixture {
            indices: PerRole::new(vec![0, 1, 2], vec![0, 1]),
            metadata,
            names,
        }
    }

    fn connections(edges: &[(usize, usize, bool)]) -> ConnectionIndices {
        let mut connections = ConnectionIndices::default();
        for &(input, source, broadcast) in edges {
            connections.insert(input, Edge { source, broadcast }).unwrap();
        }
        connections
    }

    fn assembler_with_variables(f: &Fixture) -> Assembler {
        let mut assembler = Assembler::new(Arc::new(SerialGroup));
        assembler
            .setup_variables(&PerRole::new(3, 2), &f.metadata, &f.indices)
            .unwrap();
        assembler
    }

    #[test_log::test]
    fn test_full_assembly() {
        let f = fixture();
        let mut assembler = assembler_with_variables(&f);
        assert_eq!(assembler.variable_sizes(Role::Input), &[3, 2, 3]);
        assert_eq!(assembler.global_offsets(Role::Output), &[0, 1]);
        assert_eq!(assembler.global_size(Role::Output), 4);
        assert_eq!(assembler.variable_sets(), &[ProcRange::new(0, 1)]);
        assert_eq!(assembler.variable_set_indices(Role::Output), &[0, 0]);

        // a.x feeds both b.y and c.u, a.s is broadcast into b.v
        let edges = connections(&[(0, 1, false), (1, 0, true), (2, 1, false)]);
        assembler.setup_connections(&edges, &f.names).unwrap();
        assert_eq!(assembler.connections().len(), 3);

        assembler
            .setup_input_indices(&f.metadata.input, &f.indices.input)
            .unwrap();
        assert!(assembler.is_frozen());
        assert_eq!(
            assembler.input_global_index_map(),
            &[
                Some(IndexSpan { offset: 1, len: 3 }),
                Some(IndexSpan { offset: 0, len: 1 }),
                Some(IndexSpan { offset: 1, len: 3 }),
            ]
        );
    }

    #[test]
    fn test_unconnected_input() {
        let f = fixture();
        let mut assembler = assembler_with_variables(&f);
        assembler
            .setup_connections(&connections(&[(0, 1, false)]), &f.names)
            .unwrap();
        assembler
            .setup_input_indices(&f.metadata.input, &f.indices.input)
            .unwrap();
        assert_eq!(assembler.input_global_index_map()[1], None);
    }

    #[test]
    fn test_size_mismatch() {
        let f = fixture();
        let mut assembler = assembler_with_variables(&f);
        let err = assembler
            .setup_connections(&connections(&[(1, 1, false)]), &f.names)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::SizeMismatch { source_name, source_size: 3, target_name, target_size: 2 }
                if source_name == "a.x" && target_name == "b.v"
        ));

        // broadcast only applies to size-1 sources
        let mut assembler = assembler_with_variables(&f);
        let err = assembler
            .setup_connections(&connections(&[(1, 1, true)]), &f.names)
            .unwrap_err();
        assert!(matches!(err, Error::SizeMismatch { .. }));
    }

    #[test]
    fn test_stage_order() {
        let f = fixture();
        let mut assembler = Assembler::new(Arc::new(SerialGroup));
        let err = assembler
            .setup_connections(&ConnectionIndices::default(), &f.names)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::PhaseOrder { expected: "setup_variables", found: "setup_connections" }
        ));

        let mut assembler = assembler_with_variables(&f);
        assembler
            .setup_connections(&ConnectionIndices::default(), &f.names)
            .unwrap();
        assembler
            .setup_input_indices(&f.metadata.input, &f.indices.input)
            .unwrap();
        let err = assembler
            .setup_variables(&PerRole::new(3, 2), &f.metadata, &f.indices)
            .unwrap_err();
        assert!(matches!(err, Error::Frozen));
    }

    #[test]
    fn test_missing_contribution() {
        let f = fixture();
        let mut assembler = Assembler::new(Arc::new(SerialGroup));
        let err = assembler
            .setup_variables(&PerRole::new(4, 2), &f.metadata, &f.indices)
            .unwrap_err();
        assert!(matches!(err, Error::LayoutMismatch(_)));
    }
}
