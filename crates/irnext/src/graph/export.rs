//! # Graph Documents
//!
//! JSON interchange for built symbols; the document is what an execution
//! engine loads to bind the declared operators.

use crate::errors::{IrNextError, Result};
use crate::graph::{Node, NodeId, Symbol, SymbolGraph};
use serde::{Deserialize, Serialize};

/// Serializable form of a [`Symbol`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDocument {
    /// Nodes in declaration order; inputs are node indices.
    pub nodes: Vec<Node>,

    /// Output node indices.
    pub heads: Vec<NodeId>,
}

impl From<&Symbol> for GraphDocument {
    fn from(symbol: &Symbol) -> Self {
        Self {
            nodes: symbol.graph.nodes().to_vec(),
            heads: vec![symbol.output],
        }
    }
}

impl TryFrom<GraphDocument> for Symbol {
    type Error = IrNextError;

    fn try_from(doc: GraphDocument) -> Result<Self> {
        let &[output] = doc.heads.as_slice() else {
            return Err(IrNextError::mismatch(format!(
                "expected exactly one head, found {}",
                doc.heads.len()
            )));
        };
        if output.index() >= doc.nodes.len() {
            return Err(IrNextError::mismatch(format!(
                "head {} is out of range for {} nodes",
                output.index(),
                doc.nodes.len()
            )));
        }
        Ok(Symbol::new(SymbolGraph::from_nodes(doc.nodes)?, output))
    }
}

impl Symbol {
    /// Pretty-printed JSON document.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&GraphDocument::from(self))?)
    }

    /// Parse a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        let doc: GraphDocument = serde_json::from_str(json)?;
        doc.try_into()
    }
}
