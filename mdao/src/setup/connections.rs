//! Connection resolution: turn name-based connect requests into position-based edges.

use std::collections::{btree_map::Entry, BTreeMap};

use serde::{Deserialize, Serialize};

use super::{procs::ProcAssignment, variables::VariableIndices};
use crate::{
    system::{tree::SystemTree, Role},
    Error,
};

/// The output feeding one input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// Global position of the source output
    pub source: usize,
    /// A size-1 source fills every element of the target
    pub broadcast: bool,
}

/// Resolved connections keyed by the global position of the target input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionIndices {
    edges: BTreeMap<usize, Edge>,
}

impl ConnectionIndices {
    pub fn source_of(&self, input: usize) -> Option<&Edge> {
        self.edges.get(&input)
    }

    /// `(input, edge)` pairs in input order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Edge)> + '_ {
        self.edges.iter().map(|(&input, edge)| (input, edge))
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Add an edge, keeping the first one if the same edge is seen again.
    ///
    /// # Returns
    /// The previously recorded source if `input` is already fed by a different output.
    pub(crate) fn insert(&mut self, input: usize, edge: Edge) -> Result<(), usize> {
        match self.edges.entry(input) {
            Entry::Vacant(entry) => {
                entry.insert(edge);
                Ok(())
            }
            Entry::Occupied(entry) if entry.get().source == edge.source => Ok(()),
            Entry::Occupied(entry) => Err(entry.get().source),
        }
    }
}

/// Resolve the connect requests of every resident node against the discovered variables.
///
/// Names in a request are relative to the node declaring it.
pub fn setup_connections(
    tree: &SystemTree,
    procs: &ProcAssignment,
    indices: &VariableIndices,
) -> Result<ConnectionIndices, Error> {
    let mut connections = ConnectionIndices::default();

    for id in tree.preorder() {
        if !procs.is_local(id) {
            continue;
        }
        let node = tree.node(id);

        for request in node.system().declare_connections() {
            let source = node.absolute_name(&request.source);
            let target = node.absolute_name(&request.target);

            let src = match indices.find(&source) {
                Some((Role::Output, idx)) => idx,
                Some((Role::Input, _)) => return Err(Error::SourceNotOutput(source)),
                None => {
                    return Err(Error::UnknownVariable {
                        name: source,
                        system: node.pathname().to_owned(),
                    })
                }
            };
            let tgt = match indices.find(&target) {
                Some((Role::Input, idx)) => idx,
                Some((Role::Output, _)) => return Err(Error::TargetNotInput(target)),
                None => {
                    return Err(Error::UnknownVariable {
                        name: target,
                        system: node.pathname().to_owned(),
                    })
                }
            };

            let edge = Edge {
                source: src,
                broadcast: request.broadcast,
            };
            if let Err(first) = connections.insert(tgt, edge) {
                return Err(Error::ConflictingSources {
                    target,
                    first: indices
                        .name_of(Role::Output, first)
                        .unwrap_or_default()
                        .to_owned(),
                    second: source,
                });
            }
            log::trace!("resolved `{source}` -> `{target}`");
        }
    }

    log::debug!(
        "rank {}: resolved {} connections",
        procs.rank(),
        connections.len()
    );
    Ok(connections)
}
