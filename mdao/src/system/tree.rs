//! Arena storage for the system hierarchy.
//!
//! Nodes are addressed by [`NodeId`]. A parent owns the ordered list of its children's ids and a
//! child keeps the id of its parent for lookups; ownership of the records themselves stays with the
//! [`SystemTree`].

use super::{ProcRange, System};
use crate::{vector::VectorSet, Error};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(&self) -> usize {
        self.0
    }
}

pub struct SystemNode {
    name: String,
    pathname: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    proc_range: ProcRange,
    system: Box<dyn System>,
}

impl std::fmt::Debug for SystemNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemNode")
            .field("pathname", &self.pathname)
            .field("parent", &self.parent)
            .field("children", &self.children)
            .field("proc_range", &self.proc_range)
            .finish_non_exhaustive()
    }
}

impl SystemNode {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Dotted path from the root. The root's pathname is empty.
    pub fn pathname(&self) -> &str {
        &self.pathname
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Range assigned by the last process partitioning.
    pub fn proc_range(&self) -> ProcRange {
        self.proc_range
    }

    pub fn system(&self) -> &dyn System {
        self.system.as_ref()
    }

    /// Absolute name of a name given relative to this node.
    pub fn absolute_name(&self, relative: &str) -> String {
        if self.pathname.is_empty() {
            relative.to_owned()
        } else {
            format!("{}.{relative}", self.pathname)
        }
    }
}

#[derive(Debug)]
pub struct SystemTree {
    nodes: Vec<SystemNode>,
}

impl SystemTree {
    /// Create a tree holding only the root system.
    pub fn new(root: impl System + 'static) -> Self {
        Self {
            nodes: vec![SystemNode {
                name: String::new(),
                pathname: String::new(),
                parent: None,
                children: Vec::new(),
                proc_range: ProcRange::default(),
                system: Box::new(root),
            }],
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Append `system` as the last child of `parent`.
    pub fn add_subsystem(
        &mut self,
        parent: NodeId,
        name: &str,
        system: impl System + 'static,
    ) -> Result<NodeId, Error> {
        validate_name(name)?;

        let parent_node = &self.nodes[parent.0];
        if parent_node
            .children
            .iter()
            .any(|child| self.nodes[child.0].name == name)
        {
            return Err(Error::DuplicateSubsystem {
                name: name.to_owned(),
                parent: parent_node.pathname.clone(),
            });
        }

        let id = NodeId(self.nodes.len());
        let pathname = parent_node.absolute_name(name);
        self.nodes.push(SystemNode {
            name: name.to_owned(),
            pathname,
            parent: Some(parent),
            children: Vec::new(),
            proc_range: ProcRange::default(),
            system: Box::new(system),
        });
        self.nodes[parent.0].children.push(id);
        Ok(id)
    }

    pub fn node(&self, id: NodeId) -> &SystemNode {
        &self.nodes[id.0]
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    /// Look up a node by its dotted pathname.
    pub fn find(&self, pathname: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .position(|node| node.pathname == pathname)
            .map(NodeId)
    }

    /// All node ids in pre-order, children in declaration order.
    pub fn preorder(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root()];
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.nodes[id.0].children.iter().rev());
        }
        order
    }

    pub(crate) fn assign_proc_range(&mut self, id: NodeId, range: ProcRange) {
        let node = &mut self.nodes[id.0];
        node.proc_range = range;
        node.system.accept_process_range(range);
    }

    /// Give every node resident on `rank` the completed vector set, in pre-order.
    pub(crate) fn hand_off_vectors(&mut self, rank: usize, vec_name: Option<&str>, set: &VectorSet) {
        for id in self.preorder() {
            let node = &mut self.nodes[id.0];
            if node.proc_range.contains(rank) {
                node.system.accept_vector_set(vec_name, set);
            }
        }
    }
}

pub(crate) fn validate_name(name: &str) -> Result<(), Error> {
    if name.is_empty() || name.contains('.') || name.chars().any(char::is_whitespace) {
        return Err(Error::InvalidName(name.to_owned()));
    }
    Ok(())
}
