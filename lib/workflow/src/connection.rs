//! Connections between node ports.
//!
//! A connection links an output port of one node to an input port of
//! another node in the same workflow. On the wire and in storage each
//! endpoint is a single `"{node_id}:{port_name}"` string; parsing splits on
//! the first `:` so port names may themselves contain colons.

use crate::error::PortFormatError;
use crate::node::NodeId;
use operion_core::ConnectionId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A reference to a named port on a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PortRef {
    /// The node the port belongs to.
    pub node_id: NodeId,
    /// The port name on that node.
    pub port: String,
}

impl PortRef {
    /// Creates a port reference.
    #[must_use]
    pub fn new(node_id: NodeId, port: impl Into<String>) -> Self {
        Self {
            node_id,
            port: port.into(),
        }
    }

    /// Returns the `"{node_id}:{port_name}"` encoding.
    #[must_use]
    pub fn encode(&self) -> String {
        format!("{}:{}", self.node_id, self.port)
    }
}

impl fmt::Display for PortRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.node_id, self.port)
    }
}

impl FromStr for PortRef {
    type Err = PortFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (node_part, port) = s.split_once(':').ok_or_else(|| PortFormatError {
            value: s.to_string(),
            reason: "missing ':' separator".to_string(),
        })?;

        let node_id = NodeId::from_str(node_part).map_err(|e| PortFormatError {
            value: s.to_string(),
            reason: format!("invalid node id '{node_part}': {e}"),
        })?;

        Ok(Self {
            node_id,
            port: port.to_string(),
        })
    }
}

impl TryFrom<String> for PortRef {
    type Error = PortFormatError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PortRef> for String {
    fn from(port: PortRef) -> Self {
        port.encode()
    }
}

/// A connection from a source port to a target port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    /// Unique identifier for this connection.
    pub id: ConnectionId,
    /// The output port the data flows out of.
    pub source_port: PortRef,
    /// The input port the data flows into.
    pub target_port: PortRef,
}

impl Connection {
    /// Creates a new connection between two ports.
    #[must_use]
    pub fn new(source_port: PortRef, target_port: PortRef) -> Self {
        Self {
            id: ConnectionId::new(),
            source_port,
            target_port,
        }
    }

    /// Creates a connection using default port names (`output` -> `input`).
    #[must_use]
    pub fn with_default_ports(source_node: NodeId, target_node: NodeId) -> Self {
        Self::new(
            PortRef::new(source_node, "output"),
            PortRef::new(target_node, "input"),
        )
    }
}
