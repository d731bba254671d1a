//! JSON description of a system tree.

use std::path::Path;

use anyhow::Context;
use mdao::{ConnectRequest, NodeId, System, SystemTree, VariableSpec};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableDescription {
    pub name: String,
    pub size: usize,
}

/// One node of the model. The root's `name` is only used for display.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SystemDescription {
    pub name: String,
    /// Split the process range among the children instead of sharing it
    #[serde(default)]
    pub parallel: bool,
    #[serde(default)]
    pub inputs: Vec<VariableDescription>,
    #[serde(default)]
    pub outputs: Vec<VariableDescription>,
    /// Names are relative to this system
    #[serde(default)]
    pub connections: Vec<ConnectRequest>,
    #[serde(default)]
    pub children: Vec<SystemDescription>,
}

impl SystemDescription {
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Reading model file {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Parsing model file {}", path.display()))
    }

    /// Instantiate the described tree. Each rank builds its own copy.
    pub fn build_tree(&self) -> Result<SystemTree, mdao::Error> {
        let mut tree = SystemTree::new(DescribedSystem::from(self));
        let root = tree.root();
        self.add_children(&mut tree, root)?;
        Ok(tree)
    }

    fn add_children(&self, tree: &mut SystemTree, parent: NodeId) -> Result<(), mdao::Error> {
        for child in &self.children {
            let id = tree.add_subsystem(parent, &child.name, DescribedSystem::from(child))?;
            child.add_children(tree, id)?;
        }
        Ok(())
    }
}

/// A tree node built from a [`SystemDescription`], without its children.
#[derive(Debug)]
struct DescribedSystem {
    parallel: bool,
    variables: Vec<VariableSpec>,
    connections: Vec<ConnectRequest>,
}

impl From<&SystemDescription> for DescribedSystem {
    fn from(desc: &SystemDescription) -> Self {
        let inputs = desc
            .inputs
            .iter()
            .map(|var| VariableSpec::input(&var.name, var.size));
        let outputs = desc
            .outputs
            .iter()
            .map(|var| VariableSpec::output(&var.name, var.size));
        Self {
            parallel: desc.parallel,
            variables: inputs.chain(outputs).collect(),
            connections: desc.connections.clone(),
        }
    }
}

impl System for DescribedSystem {
    fn declare_variables(&self) -> Vec<VariableSpec> {
        self.variables.clone()
    }

    fn declare_connections(&self) -> Vec<ConnectRequest> {
        self.connections.clone()
    }

    fn is_splittable(&self) -> bool {
        self.parallel
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODEL: &str = r#"{
        "name": "model",
        "connections": [{ "source": "a.x", "target": "b.y" }],
        "children": [
            { "name": "a", "outputs": [{ "name": "x", "size": 3 }] },
            { "name": "b", "inputs": [{ "name": "y", "size": 3 }] }
        ]
    }"#;

    #[test]
    fn test_parse_and_build() {
        let desc: SystemDescription = serde_json::from_str(MODEL).unwrap();
        assert!(!desc.parallel);
        assert_eq!(desc.children.len(), 2);
        assert!(!desc.connections[0].broadcast);

        let tree = desc.build_tree().unwrap();
        assert_eq!(tree.len(), 3);
        let b = tree.find("b").unwrap();
        assert_eq!(tree.node(b).system().declare_variables().len(), 1);
        assert_eq!(
            tree.node(tree.root()).system().declare_connections(),
            vec![ConnectRequest::new("a.x", "b.y")]
        );
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let err = serde_json::from_str::<SystemDescription>(r#"{ "name": "m", "paralel": true }"#)
            .unwrap_err();
        assert!(err.to_string().contains("paralel"));
    }

    #[test]
    fn test_invalid_child_name() {
        let desc = SystemDescription {
            name: "root".to_owned(),
            children: vec![SystemDescription {
                name: "a.b".to_owned(),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(matches!(desc.build_tree(), Err(mdao::Error::InvalidName(_))));
    }
}
