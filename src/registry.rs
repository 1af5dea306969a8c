//! Node type registry.
//!
//! Boards are described by two type names in the configuration
//! (`gateway.open_node`, `gateway.control_node`). The registry maps each name
//! to a factory building the driver from the [`GatewayConfig`].

use crate::config::GatewayConfig;
use crate::control_node::{ControlNode, IotlabControlNode, NoControlNode};
use crate::error::{AppResult, GatewayError};
use crate::open_node::{NoOpenNode, OpenNode, SerialOpenNode};
use std::collections::HashMap;

type OpenNodeFactory =
    Box<dyn Fn(&GatewayConfig) -> AppResult<Box<dyn OpenNode>> + Send + Sync>;
type ControlNodeFactory =
    Box<dyn Fn(&GatewayConfig) -> AppResult<Box<dyn ControlNode>> + Send + Sync>;

/// Factories for open and control node drivers, by type name.
pub struct NodeRegistry {
    open_nodes: HashMap<String, OpenNodeFactory>,
    control_nodes: HashMap<String, ControlNodeFactory>,
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl NodeRegistry {
    /// Empty registry.
    pub fn empty() -> Self {
        Self {
            open_nodes: HashMap::new(),
            control_nodes: HashMap::new(),
        }
    }

    /// Registry with the drivers shipped in this crate.
    pub fn with_builtin() -> Self {
        let mut registry = Self::empty();

        registry.register_open_node("no", |config| {
            Ok(Box::new(NoOpenNode::new(config)?) as Box<dyn OpenNode>)
        });
        registry.register_open_node("serial", |config| {
            Ok(Box::new(SerialOpenNode::new(config)?) as Box<dyn OpenNode>)
        });

        registry.register_control_node("iotlab", |config| {
            Ok(Box::new(IotlabControlNode::new(config)) as Box<dyn ControlNode>)
        });
        registry.register_control_node("no", |config| {
            Ok(Box::new(NoControlNode::new(config)?) as Box<dyn ControlNode>)
        });

        registry
    }

    /// Add or replace an open node type.
    pub fn register_open_node<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&GatewayConfig) -> AppResult<Box<dyn OpenNode>> + Send + Sync + 'static,
    {
        self.open_nodes.insert(name.to_string(), Box::new(factory));
    }

    /// Add or replace a control node type.
    pub fn register_control_node<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&GatewayConfig) -> AppResult<Box<dyn ControlNode>> + Send + Sync + 'static,
    {
        self.control_nodes.insert(name.to_string(), Box::new(factory));
    }

    /// Registered open node type names, sorted.
    pub fn open_node_types(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.open_nodes.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Registered control node type names, sorted.
    pub fn control_node_types(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.control_nodes.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Build the open node named by `config.gateway.open_node`.
    pub fn create_open_node(&self, config: &GatewayConfig) -> AppResult<Box<dyn OpenNode>> {
        let name = &config.gateway.open_node;
        self.open_nodes
            .get(name)
            .ok_or_else(|| GatewayError::UnknownNodeType {
                kind: "open",
                name: name.clone(),
                known: self.open_node_types().join(", "),
            })
            .and_then(|factory| factory(config))
    }

    /// Build the control node named by `config.gateway.control_node`.
    pub fn create_control_node(&self, config: &GatewayConfig) -> AppResult<Box<dyn ControlNode>> {
        let name = &config.gateway.control_node;
        self.control_nodes
            .get(name)
            .ok_or_else(|| GatewayError::UnknownNodeType {
                kind: "control",
                name: name.clone(),
                known: self.control_node_types().join(", "),
            })
            .and_then(|factory| factory(config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_types() {
        let registry = NodeRegistry::with_builtin();
        assert_eq!(registry.open_node_types(), vec!["no", "serial"]);
        assert_eq!(registry.control_node_types(), vec!["iotlab", "no"]);

        let mut config = GatewayConfig::default();
        config.gateway.control_node = "no".to_string();
        let mut control_node = registry.create_control_node(&config).unwrap();
        assert_eq!(control_node.start(1, None), 0);
        assert!(registry.create_open_node(&config).is_ok());
    }

    #[test]
    fn unknown_type() {
        let registry = NodeRegistry::with_builtin();
        let mut config = GatewayConfig::default();
        config.gateway.open_node = "leonardo".to_string();

        let err = registry.create_open_node(&config).err().unwrap();
        assert_eq!(
            err.to_string(),
            "Unknown open node type 'leonardo', expected one of: no, serial"
        );

        config.gateway.open_node = "no".to_string();
        config.gateway.control_node = "fox".to_string();
        let err = registry.create_control_node(&config).err().unwrap();
        assert_eq!(
            err.to_string(),
            "Unknown control node type 'fox', expected one of: iotlab, no"
        );
    }

    #[test]
    fn custom_registration() {
        let mut registry = NodeRegistry::empty();
        registry.register_open_node("bench", |_| Ok(Box::new(NoOpenNode) as Box<dyn OpenNode>));

        let mut config = GatewayConfig::default();
        config.gateway.open_node = "bench".to_string();
        assert!(registry.create_open_node(&config).is_ok());
        assert!(registry.create_control_node(&config).is_err());
    }
}
