//! Stock systems for assembling trees without writing a [`System`] by hand.

use super::{ConnectRequest, ProcRange, System, VariableSpec};

/// A container system. It declares no variables of its own, only connections between the
/// variables of its subtree.
#[derive(Debug, Default, Clone)]
pub struct Group {
    parallel: bool,
    connections: Vec<ConnectRequest>,
}

impl Group {
    /// All children share the group's full process range.
    pub fn serial() -> Self {
        Self::default()
    }

    /// The group's process range is split among its children.
    pub fn parallel() -> Self {
        Self {
            parallel: true,
            ..Default::default()
        }
    }

    /// Connect `source` (an output) to `target` (an input), names relative to this group.
    pub fn connect(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.connections.push(ConnectRequest::new(source, target));
        self
    }

    /// Like [`Group::connect`], but a size-1 source may fill a target of any size.
    pub fn connect_broadcast(
        mut self,
        source: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        self.connections
            .push(ConnectRequest::broadcast(source, target));
        self
    }

    pub fn with_connections(mut self, connections: impl IntoIterator<Item = ConnectRequest>) -> Self {
        self.connections.extend(connections);
        self
    }
}

impl System for Group {
    fn declare_connections(&self) -> Vec<ConnectRequest> {
        self.connections.clone()
    }

    fn is_splittable(&self) -> bool {
        self.parallel
    }
}

/// A leaf system owning a fixed list of variables.
#[derive(Debug, Default, Clone)]
pub struct Component {
    variables: Vec<VariableSpec>,
    proc_range: Option<ProcRange>,
}

impl Component {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_input(mut self, name: impl Into<String>, size: usize) -> Self {
        self.variables.push(VariableSpec::input(name, size));
        self
    }

    pub fn add_output(mut self, name: impl Into<String>, size: usize) -> Self {
        self.variables.push(VariableSpec::output(name, size));
        self
    }

    pub fn with_variables(mut self, variables: impl IntoIterator<Item = VariableSpec>) -> Self {
        self.variables.extend(variables);
        self
    }

    /// Range received during the last setup, if any.
    pub fn proc_range(&self) -> Option<ProcRange> {
        self.proc_range
    }
}

impl System for Component {
    fn declare_variables(&self) -> Vec<VariableSpec> {
        self.variables.clone()
    }

    fn accept_process_range(&mut self, range: ProcRange) {
        self.proc_range = Some(range);
    }
}
