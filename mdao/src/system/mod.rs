//! Systems: the nodes of the hierarchical model, and the vocabulary they declare with.

use std::{fmt::Display, ops::Range};

use serde::{Deserialize, Serialize};

use crate::vector::VectorSet;

pub mod builtin;
pub mod tree;

/// Role of a variable in the data flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Role {
    Input,
    Output,
}

impl Role {
    pub const ALL: [Role; 2] = [Role::Input, Role::Output];
}

impl Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Input => write!(f, "input"),
            Role::Output => write!(f, "output"),
        }
    }
}

/// A pair of values, one per [`Role`].
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerRole<T> {
    pub input: T,
    pub output: T,
}

impl<T> PerRole<T> {
    pub fn new(input: T, output: T) -> Self {
        Self { input, output }
    }

    /// Build both entries from a function of the role.
    pub fn from_fn(mut f: impl FnMut(Role) -> T) -> Self {
        Self {
            input: f(Role::Input),
            output: f(Role::Output),
        }
    }

    pub fn map<U>(self, mut f: impl FnMut(Role, T) -> U) -> PerRole<U> {
        PerRole {
            input: f(Role::Input, self.input),
            output: f(Role::Output, self.output),
        }
    }

    pub fn as_ref(&self) -> PerRole<&T> {
        PerRole {
            input: &self.input,
            output: &self.output,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Role, &T)> {
        [(Role::Input, &self.input), (Role::Output, &self.output)].into_iter()
    }
}

impl<T> std::ops::Index<Role> for PerRole<T> {
    type Output = T;

    fn index(&self, role: Role) -> &T {
        match role {
            Role::Input => &self.input,
            Role::Output => &self.output,
        }
    }
}

impl<T> std::ops::IndexMut<Role> for PerRole<T> {
    fn index_mut(&mut self, role: Role) -> &mut T {
        match role {
            Role::Input => &mut self.input,
            Role::Output => &mut self.output,
        }
    }
}

/// A half-open range of process ranks `[lo, hi)`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProcRange {
    pub lo: usize,
    pub hi: usize,
}

impl ProcRange {
    pub fn new(lo: usize, hi: usize) -> Self {
        debug_assert!(lo <= hi, "inverted process range [{lo}, {hi})");
        Self { lo, hi }
    }

    pub fn len(&self) -> usize {
        self.hi - self.lo
    }

    pub fn is_empty(&self) -> bool {
        self.hi == self.lo
    }

    pub fn contains(&self, rank: usize) -> bool {
        (self.lo..self.hi).contains(&rank)
    }

    /// `true` if `other` lies entirely within `self`. An empty range at either boundary counts.
    pub fn encloses(&self, other: &ProcRange) -> bool {
        self.lo <= other.lo && other.hi <= self.hi
    }
}

impl From<Range<usize>> for ProcRange {
    fn from(range: Range<usize>) -> Self {
        Self::new(range.start, range.end)
    }
}

impl Display for ProcRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.lo, self.hi)
    }
}

/// A variable declared by a system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableSpec {
    /// Name relative to the declaring system
    pub name: String,
    pub role: Role,
    /// Number of scalar elements
    pub size: usize,
}

impl VariableSpec {
    pub fn input(name: impl Into<String>, size: usize) -> Self {
        Self {
            name: name.into(),
            role: Role::Input,
            size,
        }
    }

    pub fn output(name: impl Into<String>, size: usize) -> Self {
        Self {
            name: name.into(),
            role: Role::Output,
            size,
        }
    }
}

/// A request to feed an input from an output, by names relative to the declaring system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectRequest {
    pub source: String,
    pub target: String,
    /// Allow a size-1 source to fill a target of any size.
    #[serde(default)]
    pub broadcast: bool,
}

impl ConnectRequest {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            broadcast: false,
        }
    }

    pub fn broadcast(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            broadcast: true,
            ..Self::new(source, target)
        }
    }
}

/// The capability surface the setup pipeline queries on every node of the tree.
///
/// Children are owned by the [`tree::SystemTree`] arena, not by the system itself.
pub trait System {
    /// Variables owned by this system, in declaration order.
    fn declare_variables(&self) -> Vec<VariableSpec> {
        Vec::new()
    }

    /// Connections between variables of this system's subtree.
    fn declare_connections(&self) -> Vec<ConnectRequest> {
        Vec::new()
    }

    /// Whether the process range is split among children (`true`) or shared by all of them.
    fn is_splittable(&self) -> bool {
        false
    }

    /// Called once per setup with the range of ranks this system runs on.
    fn accept_process_range(&mut self, _range: ProcRange) {}

    /// Called with each completed vector set, so the system can bind views of its variables.
    fn accept_vector_set(&mut self, _vec_name: Option<&str>, _vectors: &VectorSet) {}
}
