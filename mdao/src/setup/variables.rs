//! Variable discovery and index assignment.
//!
//! Every rank holds the whole system tree, so discovery reads the declarations of every node and
//! each rank arrives at the same ordered list of variables without talking to its peers. The order
//! is the pre-order position of the declaring node, then declaration order within the node, so it
//! does not depend on how many ranks took part. Only nodes resident on this rank contribute to the
//! local lists.

use std::collections::HashMap;

use itertools::Itertools;

use super::procs::ProcAssignment;
use crate::{
    system::{
        tree::{validate_name, NodeId, SystemTree},
        PerRole, ProcRange, Role,
    },
    Error,
};

/// A variable resident on this rank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableMeta {
    /// Absolute dotted name
    pub name: String,
    pub role: Role,
    pub size: usize,
    /// Declaring node
    pub node: NodeId,
    /// Ranks the declaring node runs on
    pub proc_range: ProcRange,
}

impl VariableMeta {
    /// Pathname of the declaring node.
    pub fn system(&self) -> &str {
        self.name
            .rsplit_once('.')
            .map_or("", |(system, _)| system)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredVariables {
    /// Names of every variable in the tree, per role, in discovery order.
    pub allprocs_names: PerRole<Vec<String>>,
    /// Names of the variables resident on this rank, per role, in discovery order.
    pub myproc_names: PerRole<Vec<String>>,
    /// Metadata parallel to `myproc_names`.
    pub myproc_metadata: PerRole<Vec<VariableMeta>>,
}

/// Walk the tree and build the tree-wide and per-rank variable lists.
pub fn setup_variables(
    tree: &SystemTree,
    procs: &ProcAssignment,
) -> Result<DiscoveredVariables, Error> {
    let mut allprocs_names: PerRole<Vec<String>> = PerRole::default();
    let mut myproc_metadata: PerRole<Vec<VariableMeta>> = PerRole::default();

    for id in tree.preorder() {
        let node = tree.node(id);
        let specs = node.system().declare_variables();
        if let Some(name) = specs.iter().map(|spec| &spec.name).duplicates().next() {
            return Err(Error::DuplicateVariable {
                name: name.clone(),
                system: node.pathname().to_owned(),
            });
        }
        let local = procs.is_local(id);

        for spec in specs {
            validate_name(&spec.name)?;
            let name = node.absolute_name(&spec.name);
            if spec.size == 0 {
                return Err(Error::EmptyVariable { name });
            }

            if local {
                log::trace!("discovered {} `{name}` (size {})", spec.role, spec.size);
                myproc_metadata[spec.role].push(VariableMeta {
                    name: name.clone(),
                    role: spec.role,
                    size: spec.size,
                    node: id,
                    proc_range: procs.range(id),
                });
            }
            allprocs_names[spec.role].push(name);
        }
    }

    let myproc_names: PerRole<Vec<String>> = myproc_metadata
        .as_ref()
        .map(|_, metadata| metadata.iter().map(|meta| meta.name.clone()).collect());

    log::debug!(
        "rank {}: {} of {} inputs and {} of {} outputs are local",
        procs.rank(),
        myproc_metadata.input.len(),
        allprocs_names.input.len(),
        myproc_metadata.output.len(),
        allprocs_names.output.len(),
    );

    Ok(DiscoveredVariables {
        allprocs_names,
        myproc_names,
        myproc_metadata,
    })
}

/// Positions of variables in their role's global namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableIndices {
    /// Number of variables per role across the whole tree
    pub allprocs_counts: PerRole<usize>,
    /// Global position of each local variable, parallel to `myproc_names`
    pub myproc_indices: PerRole<Vec<usize>>,
    offsets: PerRole<usize>,
    names: PerRole<Vec<String>>,
    positions: PerRole<HashMap<String, usize>>,
}

impl VariableIndices {
    /// Global position of the variable `name` with the given role.
    pub fn index_of(&self, role: Role, name: &str) -> Option<usize> {
        self.positions[role].get(name).copied()
    }

    /// Name of the variable at global position `idx`.
    pub fn name_of(&self, role: Role, idx: usize) -> Option<&str> {
        idx.checked_sub(self.offsets[role])
            .and_then(|i| self.names[role].get(i))
            .map(String::as_str)
    }

    /// Role and global position of `name`, whichever role it has.
    pub fn find(&self, name: &str) -> Option<(Role, usize)> {
        Role::ALL
            .into_iter()
            .find_map(|role| self.index_of(role, name).map(|idx| (role, idx)))
    }
}

/// Assign each discovered variable a position, starting each role's counter at `offsets`.
pub fn setup_variable_indices(
    vars: &DiscoveredVariables,
    offsets: PerRole<usize>,
) -> Result<VariableIndices, Error> {
    let positions = vars.allprocs_names.as_ref().map(|role, names| {
        names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), offsets[role] + i))
            .collect::<HashMap<_, _>>()
    });

    let mut myproc_indices: PerRole<Vec<usize>> = PerRole::default();
    for (role, metadata) in vars.myproc_metadata.iter() {
        for meta in metadata {
            let idx = positions[role]
                .get(&meta.name)
                .copied()
                .ok_or_else(|| Error::UnknownVariable {
                    name: meta.name.clone(),
                    system: meta.system().to_owned(),
                })?;
            myproc_indices[role].push(idx);
        }
    }

    Ok(VariableIndices {
        allprocs_counts: vars.allprocs_names.as_ref().map(|_, names| names.len()),
        myproc_indices,
        offsets,
        names: vars.allprocs_names.clone(),
        positions,
    })
}
