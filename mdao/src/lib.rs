//! The `mdao` crate builds the distributed data schema of a hierarchical multidisciplinary analysis
//! model: it partitions worker ranks across a tree of systems, discovers and numbers every variable,
//! resolves connections between outputs and inputs, and allocates the flat numeric buffers that
//! solvers read and write.
//!
//! ## Examples
//!
//! ### Setting up on a single process
//!
//! A parallel group with more children than ranks runs several children on the same rank:
//!
//! ```rust
//! use mdao::{Component, Group, Problem, Role, SerialGroup, SystemTree, VectorKind};
//!
//! let mut tree = SystemTree::new(Group::parallel().connect("a.x", "b.y"));
//! tree.add_subsystem(tree.root(), "a", Component::new().add_output("x", 3))?;
//! tree.add_subsystem(tree.root(), "b", Component::new().add_input("y", 3))?;
//!
//! let mut problem = Problem::new(tree, SerialGroup);
//! problem.setup()?;
//!
//! let assembler = problem.assembler()?;
//! assert_eq!(assembler.variable_count(Role::Output), 1);
//! assert_eq!(problem.vectors(None)?.get(VectorKind::Input).len(), 3);
//! # Ok::<(), mdao::Error>(())
//! ```
//!
//! ### Setting up on several ranks
//!
//! Every rank runs the same pipeline. Here the ranks are threads of one process:
//!
//! ```rust
//! use mdao::{comm::ThreadGroup, Component, Group, Problem, SystemTree};
//!
//! let lengths = ThreadGroup::run(2, |comm| {
//!     let mut tree = SystemTree::new(Group::parallel().connect("a.x", "b.y"));
//!     tree.add_subsystem(tree.root(), "a", Component::new().add_output("x", 3))?;
//!     tree.add_subsystem(tree.root(), "b", Component::new().add_input("y", 3))?;
//!
//!     let mut problem = Problem::new(tree, comm);
//!     problem.setup()?;
//!     let vectors = problem.vectors(None)?;
//!     Ok::<_, mdao::Error>((vectors.output.len(), vectors.input.len()))
//! });
//! assert_eq!(lengths.into_iter().collect::<Result<Vec<_>, _>>()?, vec![(3, 0), (0, 3)]);
//! # Ok::<(), mdao::Error>(())
//! ```
//! ## Feature flags
#![doc = document_features::document_features!()]
#![deny(clippy::all)]

pub mod assembler;
pub mod comm;
pub mod problem;
pub mod setup;
pub mod system;
pub mod transfer;
pub mod vector;

pub use assembler::Assembler;
pub use comm::{ProcessGroup, SerialGroup};
pub use problem::{Problem, SetupSummary};
pub use system::{
    builtin::{Component, Group},
    tree::{NodeId, SystemTree},
    ConnectRequest, PerRole, ProcRange, Role, System, VariableSpec,
};
pub use vector::{
    backend::{DenseBackend, SegmentedBackend, VectorBackend},
    Vector, VectorKind, VectorLayout, VectorSet,
};

/// Errors raised while building or using the schema.
///
/// Configuration errors are serializable so that a rank can share them with its peers during setup.
#[derive(Debug, thiserror::Error, serde::Serialize, serde::Deserialize)]
pub enum Error {
    #[error("Unknown variable `{name}` referenced by system `{system}`")]
    UnknownVariable { name: String, system: String },

    #[error("Connection source `{0}` is not an output")]
    SourceNotOutput(String),

    #[error("Connection target `{0}` is not an input")]
    TargetNotInput(String),

    #[error("Input `{target}` is connected to both `{first}` and `{second}`")]
    ConflictingSources {
        target: String,
        first: String,
        second: String,
    },

    #[error(
        "Size mismatch connecting `{source_name}` (size {source_size}) to `{target_name}` (size {target_size})"
    )]
    SizeMismatch {
        source_name: String,
        source_size: usize,
        target_name: String,
        target_size: usize,
    },

    #[error("Variable `{name}` declared twice by system `{system}`")]
    DuplicateVariable { name: String, system: String },

    #[error("Variable `{name}` must have a positive size")]
    EmptyVariable { name: String },

    #[error("Variable `{name}` declared with inconsistent sizes {first} and {second}")]
    InconsistentSize {
        name: String,
        first: usize,
        second: usize,
    },

    #[error("Subsystem `{name}` already exists in `{parent}`")]
    DuplicateSubsystem { name: String, parent: String },

    #[error("Invalid name: {0:?}")]
    InvalidName(String),

    #[error("Assembler phase `{found}` called out of order, expected `{expected}`")]
    #[serde(skip)]
    PhaseOrder {
        #[serde(skip)]
        expected: &'static str,
        #[serde(skip)]
        found: &'static str,
    },

    #[error("Assembler schema is frozen")]
    Frozen,

    #[error("Problem has not been set up")]
    NotSetUp,

    #[error("Unknown vector {0:?}")]
    UnknownVector(Option<String>),

    #[error("Vector layout does not match the assembled schema: {0}")]
    LayoutMismatch(String),

    #[error(transparent)]
    #[serde(skip)]
    Aggregation(#[from] comm::CommError),
}
