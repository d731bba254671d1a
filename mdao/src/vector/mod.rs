//! Flat numeric buffers holding the values of the variables resident on one rank.

use std::{fmt::Display, sync::Arc};

use serde::Serialize;

use crate::{
    assembler::Assembler,
    system::{ProcRange, Role},
    Error,
};

pub mod backend;

pub use backend::{AllocRequest, DenseBackend, SegmentedBackend, VectorBackend};

/// Which buffer of a vector set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorKind {
    Input,
    Output,
    /// Same variables and layout as [`VectorKind::Output`]
    Residual,
}

impl VectorKind {
    pub const ALL: [VectorKind; 3] = [VectorKind::Input, VectorKind::Output, VectorKind::Residual];

    /// The variable role whose layout this buffer uses.
    pub fn role(&self) -> Role {
        match self {
            VectorKind::Input => Role::Input,
            VectorKind::Output | VectorKind::Residual => Role::Output,
        }
    }
}

impl Display for VectorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VectorKind::Input => write!(f, "input"),
            VectorKind::Output => write!(f, "output"),
            VectorKind::Residual => write!(f, "residual"),
        }
    }
}

/// Placement of one variable in a local buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutEntry {
    pub name: String,
    /// Offset in the local buffer
    pub offset: usize,
    pub len: usize,
    /// Offset in the global flattened buffer of the same role
    pub global_offset: usize,
    /// Ranks that hold this variable
    pub proc_range: ProcRange,
}

/// Local placement of every variable of one role, in declaration order, without padding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VectorLayout {
    role: Role,
    entries: Vec<LayoutEntry>,
    len: usize,
    global_len: usize,
}

impl VectorLayout {
    /// Lay out the local variables `names`, at global positions `indices`, using the sizes held
    /// by a frozen assembler.
    pub fn new(
        role: Role,
        names: &[String],
        indices: &[usize],
        assembler: &Assembler,
    ) -> Result<Self, Error> {
        if names.len() != indices.len() {
            return Err(Error::LayoutMismatch(format!(
                "{} {role} names but {} indices",
                names.len(),
                indices.len()
            )));
        }

        let sizes = assembler.variable_sizes(role);
        let global_offsets = assembler.global_offsets(role);
        let sets = assembler.variable_set_indices(role);

        let mut offset = 0;
        let mut entries = Vec::with_capacity(names.len());
        for (name, &idx) in names.iter().zip(indices) {
            let (Some(&len), Some(&global_offset), Some(&set)) =
                (sizes.get(idx), global_offsets.get(idx), sets.get(idx))
            else {
                return Err(Error::LayoutMismatch(format!(
                    "{role} `{name}` has no assembled position {idx}"
                )));
            };
            entries.push(LayoutEntry {
                name: name.clone(),
                offset,
                len,
                global_offset,
                proc_range: assembler.variable_sets()[set],
            });
            offset += len;
        }

        Ok(Self {
            role,
            entries,
            len: offset,
            global_len: assembler.global_size(role),
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn entries(&self) -> &[LayoutEntry] {
        &self.entries
    }

    pub fn entry(&self, name: &str) -> Option<&LayoutEntry> {
        self.entries.iter().find(|entry| entry.name == name)
    }

    /// Length of the local buffer.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Length of the global flattened buffer this layout is a part of.
    pub fn global_len(&self) -> usize {
        self.global_len
    }
}

#[derive(Debug, Clone)]
pub struct Vector {
    name: Option<String>,
    kind: VectorKind,
    proc_range: ProcRange,
    layout: Arc<VectorLayout>,
    data: Vec<f64>,
    /// Per-entry ownership for distributed-segment buffers
    owned: Option<Vec<bool>>,
}

impl Vector {
    /// Zero-initialised storage for `request`.
    ///
    /// `owned` marks, per layout entry, whether this rank is the one that publishes the entry in
    /// global data movement. `None` means every entry is published.
    pub fn new(request: AllocRequest<'_>, owned: Option<Vec<bool>>) -> Self {
        Self {
            name: request.vec_name.map(str::to_owned),
            kind: request.kind,
            proc_range: request.proc_range,
            data: vec![0.0; request.layout.len()],
            layout: request.layout,
            owned,
        }
    }

    /// Name of the vector set, `None` for the default one.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn kind(&self) -> VectorKind {
        self.kind
    }

    pub fn proc_range(&self) -> ProcRange {
        self.proc_range
    }

    pub fn layout(&self) -> &Arc<VectorLayout> {
        &self.layout
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }

    /// Values of the variable `name`.
    pub fn get(&self, name: &str) -> Option<&[f64]> {
        let entry = self.layout.entry(name)?;
        Some(&self.data[entry.offset..entry.offset + entry.len])
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut [f64]> {
        let entry = self.layout.entry(name)?;
        Some(&mut self.data[entry.offset..entry.offset + entry.len])
    }

    pub fn fill(&mut self, value: f64) {
        self.data.fill(value);
    }

    pub fn is_segmented(&self) -> bool {
        self.owned.is_some()
    }

    /// Whether this rank publishes the layout entry at `index`.
    pub fn owns(&self, index: usize) -> bool {
        match &self.owned {
            Some(owned) => owned.get(index).copied().unwrap_or(false),
            None => index < self.layout.entries().len(),
        }
    }

    /// Entries this rank publishes, with their values.
    pub fn owned_segments(&self) -> impl Iterator<Item = (&LayoutEntry, &[f64])> + '_ {
        self.layout
            .entries()
            .iter()
            .enumerate()
            .filter(|(i, _)| self.owns(*i))
            .map(|(_, entry)| (entry, &self.data[entry.offset..entry.offset + entry.len]))
    }
}

/// The input, output and residual buffers of one named vector.
#[derive(Debug, Clone)]
pub struct VectorSet {
    pub input: Vector,
    pub output: Vector,
    pub residual: Vector,
}

impl VectorSet {
    pub fn get(&self, kind: VectorKind) -> &Vector {
        match kind {
            VectorKind::Input => &self.input,
            VectorKind::Output => &self.output,
            VectorKind::Residual => &self.residual,
        }
    }

    pub fn get_mut(&mut self, kind: VectorKind) -> &mut Vector {
        match kind {
            VectorKind::Input => &mut self.input,
            VectorKind::Output => &mut self.output,
            VectorKind::Residual => &mut self.residual,
        }
    }
}
