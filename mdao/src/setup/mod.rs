//! The tree-walk phases of setup.
//!
//! Each phase is a free function that takes the snapshots produced by the phases before it and
//! returns a new one:
//!
//! 1. [`procs::setup_processors`] assigns process ranges,
//! 2. [`variables::setup_variables`] discovers variables,
//! 3. [`variables::setup_variable_indices`] numbers them,
//! 4. [`connections::setup_connections`] resolves connect requests.
//!
//! None of them talk to other ranks. A configuration error may still be visible on only some ranks,
//! for example a bad connect request declared by a group that runs on one rank. [`SetupContext::build`]
//! therefore ends with a single all-gather of every rank's outcome, and all ranks fail with the
//! error of the lowest failing rank.
//!
//! [`SetupContext`] bundles the four snapshots for the assembler and vector construction.

pub mod connections;
pub mod procs;
pub mod variables;

use crate::{
    comm::{all_gather_as, ProcessGroup},
    system::{tree::SystemTree, PerRole, ProcRange},
    Error,
};

pub use connections::{ConnectionIndices, Edge};
pub use procs::ProcAssignment;
pub use variables::{DiscoveredVariables, VariableIndices, VariableMeta};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupContext {
    pub procs: ProcAssignment,
    pub variables: DiscoveredVariables,
    pub indices: VariableIndices,
    pub connections: ConnectionIndices,
}

impl SetupContext {
    /// Run the tree-walk phases over `tree` on the ranks of `comm`.
    pub fn build(tree: &mut SystemTree, comm: &dyn ProcessGroup) -> Result<Self, Error> {
        let procs = procs::setup_processors(tree, ProcRange::new(0, comm.size()), comm.rank());
        let local = Self::resolve(tree, &procs);

        let gathered: Result<Vec<Option<Error>>, _> = all_gather_as(comm, &local.as_ref().err());
        let outcomes = match gathered {
            Ok(outcomes) => outcomes,
            Err(err) => return Err(local.err().unwrap_or(Error::from(err))),
        };
        if let Some((rank, err)) = outcomes
            .into_iter()
            .enumerate()
            .find_map(|(rank, outcome)| outcome.map(|err| (rank, err)))
        {
            log::debug!("rank {}: setup failed on rank {rank}: {err}", comm.rank());
            return Err(err);
        }

        let (variables, indices, connections) = local?;
        Ok(Self {
            procs,
            variables,
            indices,
            connections,
        })
    }

    fn resolve(
        tree: &SystemTree,
        procs: &ProcAssignment,
    ) -> Result<(DiscoveredVariables, VariableIndices, ConnectionIndices), Error> {
        let variables = variables::setup_variables(tree, procs)?;
        let indices = variables::setup_variable_indices(&variables, PerRole::new(0, 0))?;
        let connections = connections::setup_connections(tree, procs, &indices)?;
        Ok((variables, indices, connections))
    }
}
