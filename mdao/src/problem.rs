//! The top-level container driving setup.

use std::{collections::BTreeMap, fmt::Display, sync::Arc};

use serde::Serialize;

use crate::{
    assembler::Assembler,
    comm::ProcessGroup,
    setup::SetupContext,
    system::{tree::SystemTree, ProcRange, Role},
    transfer::Transfer,
    vector::{
        backend::{AllocRequest, DenseBackend, VectorBackend},
        VectorKind, VectorLayout, VectorSet,
    },
    Error,
};

#[derive(Debug)]
struct SetupState {
    context: SetupContext,
    assembler: Assembler,
    vectors: BTreeMap<Option<String>, VectorSet>,
}

/// Owns the system tree, the process group and everything setup produces.
///
/// ```rust
/// use mdao::{Component, Group, Problem, SerialGroup, SystemTree, VectorKind};
///
/// let mut tree = SystemTree::new(Group::serial().connect("a.x", "b.y"));
/// tree.add_subsystem(tree.root(), "a", Component::new().add_output("x", 3))?;
/// tree.add_subsystem(tree.root(), "b", Component::new().add_input("y", 3))?;
///
/// let mut problem = Problem::new(tree, SerialGroup);
/// problem.setup()?;
/// assert_eq!(problem.vectors(None)?.get(VectorKind::Output).len(), 3);
/// # Ok::<(), mdao::Error>(())
/// ```
#[derive(Debug)]
pub struct Problem {
    tree: SystemTree,
    comm: Arc<dyn ProcessGroup>,
    backend: Box<dyn VectorBackend>,
    state: Option<SetupState>,
}

impl Problem {
    /// Create a problem over `tree` running on the ranks of `comm`, with dense vectors.
    pub fn new(tree: SystemTree, comm: impl ProcessGroup + 'static) -> Self {
        Self {
            tree,
            comm: Arc::new(comm),
            backend: Box::new(DenseBackend),
            state: None,
        }
    }

    /// Use `backend` for the default vector set.
    pub fn with_backend(mut self, backend: impl VectorBackend + 'static) -> Self {
        self.backend = Box::new(backend);
        self
    }

    pub fn tree(&self) -> &SystemTree {
        &self.tree
    }

    /// Mutable access to the tree. Any previous setup is discarded.
    pub fn tree_mut(&mut self) -> &mut SystemTree {
        self.state = None;
        &mut self.tree
    }

    pub fn comm(&self) -> &dyn ProcessGroup {
        self.comm.as_ref()
    }

    /// Run the whole setup pipeline and build the default vector set.
    ///
    /// Calling it again rebuilds everything from the current declarations. On error no schema and
    /// no vectors are retained.
    pub fn setup(&mut self) -> Result<&mut Self, Error> {
        self.state = None;
        let state = self.run_setup()?;
        self.state = Some(state);

        if let Err(err) = self.build_vectors(None, None) {
            self.state = None;
            return Err(err);
        }

        log::info!(
            "rank {}/{}: setup complete",
            self.comm.rank(),
            self.comm.size()
        );
        Ok(self)
    }

    fn run_setup(&mut self) -> Result<SetupState, Error> {
        let context = SetupContext::build(&mut self.tree, self.comm.as_ref())?;
        let variables = &context.variables;
        let indices = &context.indices;

        let mut assembler = Assembler::new(self.comm.clone());
        assembler.setup_variables(
            &indices.allprocs_counts,
            &variables.myproc_metadata,
            &indices.myproc_indices,
        )?;
        assembler.setup_connections(&context.connections, &variables.allprocs_names)?;
        assembler.setup_input_indices(
            &variables.myproc_metadata.input,
            &indices.myproc_indices.input,
        )?;

        Ok(SetupState {
            context,
            assembler,
            vectors: BTreeMap::new(),
        })
    }

    /// Build (or rebuild) the vector set `vec_name` with `backend` and hand it to the tree.
    pub fn setup_vector(
        &mut self,
        vec_name: Option<&str>,
        backend: &dyn VectorBackend,
    ) -> Result<(), Error> {
        self.build_vectors(vec_name, Some(backend))
    }

    fn build_vectors(
        &mut self,
        vec_name: Option<&str>,
        backend: Option<&dyn VectorBackend>,
    ) -> Result<(), Error> {
        let backend = backend.unwrap_or(self.backend.as_ref());
        let state = self.state.as_mut().ok_or(Error::NotSetUp)?;
        let rank = self.comm.rank();

        let variables = &state.context.variables;
        let indices = &state.context.indices;
        let layout = |role: Role| {
            VectorLayout::new(
                role,
                &variables.myproc_names[role],
                &indices.myproc_indices[role],
                &state.assembler,
            )
            .map(Arc::new)
        };
        let input_layout = layout(Role::Input)?;
        let output_layout = layout(Role::Output)?;

        let proc_range = state.context.procs.range(self.tree.root());
        let allocate = |kind: VectorKind| {
            let layout = match kind {
                VectorKind::Input => input_layout.clone(),
                VectorKind::Output | VectorKind::Residual => output_layout.clone(),
            };
            backend.allocate(AllocRequest {
                vec_name,
                kind,
                proc_range,
                rank,
                layout,
            })
        };
        let set = VectorSet {
            input: allocate(VectorKind::Input),
            output: allocate(VectorKind::Output),
            residual: allocate(VectorKind::Residual),
        };

        log::debug!(
            "rank {rank}: built {} vector {vec_name:?} with {} input and {} output elements",
            backend.name(),
            set.input.len(),
            set.output.len()
        );

        self.tree.hand_off_vectors(rank, vec_name, &set);
        state.vectors.insert(vec_name.map(str::to_owned), set);
        Ok(())
    }

    fn state(&self) -> Result<&SetupState, Error> {
        self.state.as_ref().ok_or(Error::NotSetUp)
    }

    pub fn is_setup(&self) -> bool {
        self.state.is_some()
    }

    pub fn context(&self) -> Result<&SetupContext, Error> {
        self.state().map(|state| &state.context)
    }

    pub fn assembler(&self) -> Result<&Assembler, Error> {
        self.state().map(|state| &state.assembler)
    }

    /// Names of the vector sets built so far, `None` being the default one.
    pub fn vector_names(&self) -> impl Iterator<Item = Option<&str>> + '_ {
        self.state
            .iter()
            .flat_map(|state| state.vectors.keys().map(|name| name.as_deref()))
    }

    pub fn vectors(&self, vec_name: Option<&str>) -> Result<&VectorSet, Error> {
        self.state()?
            .vectors
            .get(&vec_name.map(str::to_owned))
            .ok_or_else(|| Error::UnknownVector(vec_name.map(str::to_owned)))
    }

    pub fn vectors_mut(&mut self, vec_name: Option<&str>) -> Result<&mut VectorSet, Error> {
        self.state
            .as_mut()
            .ok_or(Error::NotSetUp)?
            .vectors
            .get_mut(&vec_name.map(str::to_owned))
            .ok_or_else(|| Error::UnknownVector(vec_name.map(str::to_owned)))
    }

    /// Copy output values into the inputs they are connected to, within the vector set
    /// `vec_name`. Collective over the process group.
    pub fn transfer(&mut self, vec_name: Option<&str>) -> Result<(), Error> {
        let state = self.state.as_mut().ok_or(Error::NotSetUp)?;
        let transfer = Transfer::from_assembler(&state.assembler)?;
        let set = state
            .vectors
            .get_mut(&vec_name.map(str::to_owned))
            .ok_or_else(|| Error::UnknownVector(vec_name.map(str::to_owned)))?;
        transfer.apply(self.comm.as_ref(), &set.output, &mut set.input)
    }

    /// The tree-wide schema in a printable form.
    pub fn summary(&self) -> Result<SetupSummary, Error> {
        let assembler = &self.state()?.assembler;

        let variables = Role::ALL
            .into_iter()
            .flat_map(|role| {
                assembler
                    .variable_names(role)
                    .iter()
                    .enumerate()
                    .map(move |(idx, name)| SummaryVariable {
                        name: name.clone(),
                        role,
                        size: assembler.variable_sizes(role)[idx],
                        global_offset: assembler.global_offsets(role)[idx],
                        proc_range: assembler.variable_sets()
                            [assembler.variable_set_indices(role)[idx]],
                    })
            })
            .collect();

        let connections = assembler
            .connections()
            .iter()
            .map(|(input, edge)| SummaryConnection {
                source: assembler.variable_names(Role::Output)[edge.source].clone(),
                target: assembler.variable_names(Role::Input)[input].clone(),
                broadcast: edge.broadcast,
            })
            .collect();

        Ok(SetupSummary {
            num_procs: self.comm.size(),
            variables,
            connections,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SummaryVariable {
    pub name: String,
    pub role: Role,
    pub size: usize,
    pub global_offset: usize,
    pub proc_range: ProcRange,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SummaryConnection {
    pub source: String,
    pub target: String,
    pub broadcast: bool,
}

/// Global variables and connections of a set-up problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SetupSummary {
    pub num_procs: usize,
    pub variables: Vec<SummaryVariable>,
    pub connections: Vec<SummaryConnection>,
}

impl SetupSummary {
    pub fn count(&self, role: Role) -> usize {
        self.variables.iter().filter(|var| var.role == role).count()
    }
}

impl Display for SetupSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let elements = |role: Role| -> usize {
            self.variables
                .iter()
                .filter(|var| var.role == role)
                .map(|var| var.size)
                .sum()
        };
        f.debug_struct("Setup Summary")
            .field("Processes", &self.num_procs)
            .field("Inputs", &self.count(Role::Input))
            .field("Input elements", &elements(Role::Input))
            .field("Outputs", &self.count(Role::Output))
            .field("Output elements", &elements(Role::Output))
            .field("Connections", &self.connections.len())
            .finish()
    }
}
