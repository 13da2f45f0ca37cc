//! # Symbolic Graph
//!
//! [`SymbolGraph`] is the declaration target for every builder in this crate.
//! Builders never execute anything; they append [`Node`]s describing
//! operators, and hand back [`NodeId`] handles to wire further nodes.
//!
//! * Nodes are append-only; insertion order is a topological order.
//! * A node is never changed after creation, except for advisory
//!   [`Node::hints`] which an execution engine may ignore.
//! * Anonymous operators receive deterministic per-graph names
//!   (``pooling0``, ``plus3``, ...), so equal configurations yield
//!   equal graphs.
//!
//! A built graph together with its head is a [`Symbol`].

pub mod export;
pub mod ops;
pub mod shape;

use crate::graph::ops::{
    ActivationKind, BatchNormOp, ConvolutionOp, DeformableConvolutionOp, Op, PoolingOp,
    Precision, SoftmaxOutputOp, VariableOp, VariableRole,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Hint key marking a node for recomputation instead of storage.
pub const MIRROR_STAGE_HINT: &str = "mirror_stage";

/// Hint key carrying a learning rate multiplier.
pub const LR_MULT_HINT: &str = "lr_mult";

/// Handle to a node of a [`SymbolGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(usize);

impl NodeId {
    /// Position of the node in its graph.
    pub fn index(&self) -> usize {
        self.0
    }
}

/// A declared operator and its wiring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Operator name; learnable parameters derive their names from it.
    pub name: String,

    /// The operator.
    pub op: Op,

    /// Input nodes, in operator argument order.
    pub inputs: Vec<NodeId>,

    /// Advisory engine hints.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub hints: BTreeMap<String, String>,
}

/// Append-only operator graph.
#[derive(Debug, Clone, Default)]
pub struct SymbolGraph {
    nodes: Vec<Node>,
    auto_names: BTreeMap<&'static str, usize>,
}

impl PartialEq for SymbolGraph {
    fn eq(
        &self,
        other: &Self,
    ) -> bool {
        self.nodes == other.nodes
    }
}

impl SymbolGraph {
    /// An empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a graph from a node list.
    ///
    /// Every input must refer to an earlier node. Auto-name counters resume
    /// past the highest ``{prefix}{n}`` already present.
    pub fn from_nodes(nodes: Vec<Node>) -> crate::errors::Result<Self> {
        let mut auto_names = BTreeMap::new();
        for (idx, node) in nodes.iter().enumerate() {
            if let Some(bad) = node.inputs.iter().find(|input| input.0 >= idx) {
                return Err(crate::errors::IrNextError::mismatch(format!(
                    "node[{idx}] '{}' reads node[{}], which is not an earlier node",
                    node.name, bad.0
                )));
            }

            let prefix = node.op.auto_name_prefix();
            if let Some(n) = node
                .name
                .strip_prefix(prefix)
                .and_then(|suffix| suffix.parse::<usize>().ok())
            {
                let counter = auto_names.entry(prefix).or_insert(0);
                *counter = (*counter).max(n + 1);
            }
        }
        Ok(Self { nodes, auto_names })
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if the graph is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All nodes, in declaration order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Look up a node.
    ///
    /// # Panics
    ///
    /// If `id` was not issued by this graph.
    pub fn node(
        &self,
        id: NodeId,
    ) -> &Node {
        &self.nodes[id.0]
    }

    /// Iterate over `(id, node)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(idx, node)| (NodeId(idx), node))
    }

    /// Find the most recent node with the given name.
    pub fn find(
        &self,
        name: &str,
    ) -> Option<NodeId> {
        self.nodes
            .iter()
            .rposition(|node| node.name == name)
            .map(NodeId)
    }

    /// Declare a named node.
    ///
    /// # Panics
    ///
    /// If any input was not issued by this graph.
    pub fn declare<S: Into<String>>(
        &mut self,
        name: S,
        op: Op,
        inputs: &[NodeId],
    ) -> NodeId {
        let id = NodeId(self.nodes.len());
        for input in inputs {
            assert!(
                input.0 < id.0,
                "input {input:?} does not belong to this graph ({} nodes)",
                id.0
            );
        }
        self.nodes.push(Node {
            name: name.into(),
            op,
            inputs: inputs.to_vec(),
            hints: BTreeMap::new(),
        });
        id
    }

    /// Declare a node under an auto-generated name.
    pub fn declare_anonymous(
        &mut self,
        op: Op,
        inputs: &[NodeId],
    ) -> NodeId {
        let prefix = op.auto_name_prefix();
        let counter = self.auto_names.entry(prefix).or_insert(0);
        let name = format!("{prefix}{counter}");
        *counter += 1;
        self.declare(name, op, inputs)
    }

    /// Attach an advisory hint to a node.
    pub fn set_hint<K: Into<String>, V: Into<String>>(
        &mut self,
        id: NodeId,
        key: K,
        value: V,
    ) {
        self.nodes[id.0].hints.insert(key.into(), value.into());
    }

    /// Declare a fed input variable.
    pub fn input<S: Into<String>>(
        &mut self,
        name: S,
    ) -> NodeId {
        self.declare(
            name,
            Op::Variable(VariableOp {
                role: VariableRole::Input,
                lr_mult: None,
            }),
            &[],
        )
    }

    /// Declare a fed label variable.
    pub fn label<S: Into<String>>(
        &mut self,
        name: S,
    ) -> NodeId {
        self.declare(
            name,
            Op::Variable(VariableOp {
                role: VariableRole::Label,
                lr_mult: None,
            }),
            &[],
        )
    }

    /// Declare an explicit learnable parameter.
    pub fn parameter<S: Into<String>>(
        &mut self,
        name: S,
        lr_mult: Option<f64>,
    ) -> NodeId {
        self.declare(
            name,
            Op::Variable(VariableOp {
                role: VariableRole::Parameter,
                lr_mult,
            }),
            &[],
        )
    }

    /// Declare a pass-through node.
    pub fn identity<S: Into<String>>(
        &mut self,
        name: S,
        data: NodeId,
    ) -> NodeId {
        self.declare(name, Op::Identity, &[data])
    }

    /// Declare an anonymous precision cast.
    pub fn cast(
        &mut self,
        data: NodeId,
        dtype: Precision,
    ) -> NodeId {
        self.declare_anonymous(Op::Cast { dtype }, &[data])
    }

    /// Declare a convolution with implicit parameters.
    pub fn convolution<S: Into<String>>(
        &mut self,
        name: S,
        data: NodeId,
        conv: ConvolutionOp,
    ) -> NodeId {
        self.declare(name, Op::Convolution(conv), &[data])
    }

    /// Declare a convolution with explicit weight and bias variables.
    pub fn convolution_with_params<S: Into<String>>(
        &mut self,
        name: S,
        data: NodeId,
        weight: NodeId,
        bias: Option<NodeId>,
        conv: ConvolutionOp,
    ) -> NodeId {
        let mut inputs = vec![data, weight];
        inputs.extend(bias);
        let conv = conv.with_bias(bias.is_some());
        self.declare(name, Op::Convolution(conv), &inputs)
    }

    /// Declare a deformable convolution reading `offset`.
    pub fn deformable_convolution<S: Into<String>>(
        &mut self,
        name: S,
        data: NodeId,
        offset: NodeId,
        deform: DeformableConvolutionOp,
    ) -> NodeId {
        self.declare(name, Op::DeformableConvolution(deform), &[data, offset])
    }

    /// Declare a transposed convolution.
    pub fn deconvolution<S: Into<String>>(
        &mut self,
        name: S,
        data: NodeId,
        conv: ConvolutionOp,
    ) -> NodeId {
        self.declare(name, Op::Deconvolution(conv), &[data])
    }

    /// Declare a batch normalization.
    pub fn batch_norm<S: Into<String>>(
        &mut self,
        name: S,
        data: NodeId,
        norm: BatchNormOp,
    ) -> NodeId {
        self.declare(name, Op::BatchNorm(norm), &[data])
    }

    /// Declare a relu activation.
    pub fn relu<S: Into<String>>(
        &mut self,
        name: S,
        data: NodeId,
    ) -> NodeId {
        self.declare(name, Op::Activation(ActivationKind::Relu), &[data])
    }

    /// Declare a pooling node; `name = None` auto-names it.
    pub fn pooling(
        &mut self,
        name: Option<&str>,
        data: NodeId,
        pool: PoolingOp,
    ) -> NodeId {
        match name {
            Some(name) => self.declare(name, Op::Pooling(pool), &[data]),
            None => self.declare_anonymous(Op::Pooling(pool), &[data]),
        }
    }

    /// Declare an anonymous channel concatenation.
    pub fn concat(
        &mut self,
        inputs: &[NodeId],
    ) -> NodeId {
        self.declare_anonymous(Op::Concat { dim: 1 }, inputs)
    }

    /// Declare an anonymous elementwise sum.
    pub fn add(
        &mut self,
        lhs: NodeId,
        rhs: NodeId,
    ) -> NodeId {
        self.declare_anonymous(Op::ElementwiseSum, &[lhs, rhs])
    }

    /// Declare an anonymous flatten.
    pub fn flatten(
        &mut self,
        data: NodeId,
    ) -> NodeId {
        self.declare_anonymous(Op::Flatten, &[data])
    }

    /// Declare a dense layer with bias.
    pub fn fully_connected<S: Into<String>>(
        &mut self,
        name: S,
        data: NodeId,
        num_hidden: usize,
    ) -> NodeId {
        self.declare(
            name,
            Op::FullyConnected {
                num_hidden,
                no_bias: false,
            },
            &[data],
        )
    }

    /// Declare a softmax loss; without a `label` an implicit
    /// ``{name}_label`` argument is expected.
    pub fn softmax_output<S: Into<String>>(
        &mut self,
        name: S,
        data: NodeId,
        label: Option<NodeId>,
        softmax: SoftmaxOutputOp,
    ) -> NodeId {
        let mut inputs = vec![data];
        inputs.extend(label);
        self.declare(name, Op::SoftmaxOutput(softmax), &inputs)
    }

    /// Declare a crop of `data` to the spatial extent of `like`.
    pub fn crop<S: Into<String>>(
        &mut self,
        name: S,
        data: NodeId,
        like: NodeId,
        offset: [usize; 2],
    ) -> NodeId {
        self.declare(name, Op::Crop { offset }, &[data, like])
    }

    /// Mark the nodes reachable from `heads`.
    pub fn reachable(
        &self,
        heads: &[NodeId],
    ) -> Vec<bool> {
        let mut mask = vec![false; self.nodes.len()];
        let mut stack: Vec<NodeId> = heads.to_vec();
        while let Some(id) = stack.pop() {
            if mask[id.0] {
                continue;
            }
            mask[id.0] = true;
            stack.extend(self.nodes[id.0].inputs.iter().copied());
        }
        mask
    }
}

/// A built graph and its output head.
#[derive(Debug, Clone, PartialEq)]
pub struct Symbol {
    /// The declared graph.
    pub graph: SymbolGraph,

    /// The output node.
    pub output: NodeId,
}

impl Symbol {
    /// Wrap a graph and head.
    pub fn new(
        graph: SymbolGraph,
        output: NodeId,
    ) -> Self {
        Self { graph, output }
    }

    /// The output node.
    pub fn output_node(&self) -> &Node {
        self.graph.node(self.output)
    }

    /// Nodes reachable from the output, in declaration order.
    pub fn reachable_nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        let mask = self.graph.reachable(&[self.output]);
        self.graph.iter().filter(move |(id, _)| mask[id.index()])
    }

    /// Arguments of the graph: fed variables and learnable parameters.
    pub fn list_arguments(&self) -> Vec<String> {
        let mut args = Vec::new();
        for (_, node) in self.reachable_nodes() {
            match &node.op {
                Op::Variable(_) => args.push(node.name.clone()),
                op => args.extend(op.implicit_arguments(&node.name, node.inputs.len())),
            }
        }
        args
    }

    /// Non-learned states (batch-norm running statistics).
    pub fn list_auxiliary_states(&self) -> Vec<String> {
        self.reachable_nodes()
            .flat_map(|(_, node)| node.op.auxiliary_states(&node.name))
            .collect()
    }

    /// Names of fed input and label variables.
    pub fn list_inputs(&self) -> Vec<String> {
        self.reachable_nodes()
            .filter_map(|(_, node)| match &node.op {
                Op::Variable(var) if var.role != VariableRole::Parameter => {
                    Some(node.name.clone())
                }
                _ => None,
            })
            .collect()
    }

    /// Learnable parameter names, explicit and implicit.
    ///
    /// Implicit ``{name}_label`` softmax arguments are fed, not learned,
    /// and are excluded.
    pub fn parameter_names(&self) -> Vec<String> {
        let mut params = Vec::new();
        for (_, node) in self.reachable_nodes() {
            match &node.op {
                Op::Variable(var) if var.role == VariableRole::Parameter => {
                    params.push(node.name.clone())
                }
                Op::Variable(_) | Op::SoftmaxOutput(_) => (),
                op => params.extend(op.implicit_arguments(&node.name, node.inputs.len())),
            }
        }
        params
    }

    /// Count reachable nodes by engine operator type.
    pub fn op_histogram(&self) -> BTreeMap<&'static str, usize> {
        let mut hist = BTreeMap::new();
        for (_, node) in self.reachable_nodes() {
            *hist.entry(node.op.type_name()).or_insert(0) += 1;
        }
        hist
    }
}
