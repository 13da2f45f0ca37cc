//! # Static Shape Inference
//!
//! Shapes are never stored on nodes; an execution engine resolves them
//! when it binds inputs. [`SymbolGraph::infer_shapes`] performs the same
//! resolution statically, so topologies can be checked before binding.

use crate::errors::{IrNextError, Result};
use crate::graph::ops::{ConvolutionOp, Op, PoolingOp, VariableRole};
use crate::graph::{Node, NodeId, Symbol, SymbolGraph};
use std::collections::BTreeMap;

/// A tensor shape; ``[batch, channels, height, width]`` for feature maps.
pub type Shape = Vec<usize>;

/// Output extent of a convolution along one spatial axis.
///
/// Height and width are resolved independently, each with its own
/// kernel, stride, padding and dilation.
///
/// ```text
/// out_size = floor( ((in_size + 2*padding - dilation*(kernel_size-1) - 1) / stride) + 1 )
/// ```
///
/// # Returns
///
/// An `Option<usize>` representing the output size; or `None` for <= 0,
/// or for a zero kernel, stride or dilation.
pub fn conv_output_size(
    input_size: usize,
    kernel_size: usize,
    stride: usize,
    padding: usize,
    dilation: usize,
) -> Option<usize> {
    if input_size == 0 || kernel_size == 0 || stride == 0 || dilation == 0 {
        return None;
    }

    let effective_size = input_size + 2 * padding;
    let pos = effective_size + stride;
    let kernel_width = 1 + dilation * (kernel_size - 1);

    if pos < kernel_width {
        return None;
    }
    let x = (pos - kernel_width) / stride;
    if x < 1 { None } else { Some(x) }
}

/// Predict the output size of a 1D transposed convolution.
///
/// ```text
/// out_size = (in_size - 1) * stride - 2*padding + kernel_size
/// ```
pub fn deconv_output_size(
    input_size: usize,
    kernel_size: usize,
    stride: usize,
    padding: usize,
) -> Option<usize> {
    if input_size == 0 || kernel_size == 0 || stride == 0 {
        return None;
    }
    ((input_size - 1) * stride + kernel_size)
        .checked_sub(2 * padding)
        .filter(|&x| x > 0)
}

/// Inferred shapes of a graph, indexed by [`NodeId`].
#[derive(Debug, Clone, PartialEq)]
pub struct ShapeMap {
    shapes: Vec<Option<Shape>>,
}

impl ShapeMap {
    /// The shape of a node; `None` for unreachable nodes and parameters.
    pub fn get(
        &self,
        id: NodeId,
    ) -> Option<&Shape> {
        self.shapes.get(id.index()).and_then(Option::as_ref)
    }
}

fn failure<S: Into<String>>(
    node: &Node,
    reason: S,
) -> IrNextError {
    IrNextError::ShapeInference {
        node: node.name.clone(),
        reason: reason.into(),
    }
}

fn input_shape<'a>(
    node: &Node,
    shapes: &'a [Option<Shape>],
    input: usize,
) -> Result<&'a Shape> {
    let id = node
        .inputs
        .get(input)
        .ok_or_else(|| failure(node, format!("missing input {input}")))?;
    shapes
        .get(id.index())
        .and_then(Option::as_ref)
        .ok_or_else(|| failure(node, format!("shape of input {input} is unknown")))
}

fn feature_map<'a>(
    node: &Node,
    shapes: &'a [Option<Shape>],
    input: usize,
) -> Result<&'a Shape> {
    let shape = input_shape(node, shapes, input)?;
    if shape.len() != 4 {
        return Err(failure(
            node,
            format!("expected a rank 4 input, found {shape:?}"),
        ));
    }
    Ok(shape)
}

fn spatial(
    node: &Node,
    input: &Shape,
    kernel: [usize; 2],
    stride: [usize; 2],
    pad: [usize; 2],
    dilate: [usize; 2],
) -> Result<[usize; 2]> {
    let mut out = [0; 2];
    for axis in 0..2 {
        out[axis] = conv_output_size(
            input[2 + axis],
            kernel[axis],
            stride[axis],
            pad[axis],
            dilate[axis],
        )
        .ok_or_else(|| {
            failure(
                node,
                format!(
                    "no legal output size for input {:?} with kernel {kernel:?}, stride {stride:?}, pad {pad:?}, dilate {dilate:?}",
                    &input[2..]
                ),
            )
        })?;
    }
    Ok(out)
}

fn check_groups(
    node: &Node,
    in_channels: usize,
    conv: &ConvolutionOp,
) -> Result<()> {
    if conv.num_group == 0
        || in_channels % conv.num_group != 0
        || conv.num_filter % conv.num_group != 0
    {
        return Err(failure(
            node,
            format!(
                "num_group {} must divide in channels {in_channels} and num_filter {}",
                conv.num_group, conv.num_filter
            ),
        ));
    }
    Ok(())
}

fn convolution_shape(
    node: &Node,
    input: &Shape,
    conv: &ConvolutionOp,
) -> Result<Shape> {
    check_groups(node, input[1], conv)?;
    let [h, w] = spatial(node, input, conv.kernel, conv.stride, conv.pad, conv.dilate)?;
    Ok(vec![input[0], conv.num_filter, h, w])
}

fn pooling_shape(
    node: &Node,
    input: &Shape,
    pool: &PoolingOp,
) -> Result<Shape> {
    if pool.global {
        return Ok(vec![input[0], input[1], 1, 1]);
    }
    let [h, w] = spatial(node, input, pool.kernel, pool.stride, pool.pad, [1, 1])?;
    Ok(vec![input[0], input[1], h, w])
}

fn node_shape(
    node: &Node,
    shapes: &[Option<Shape>],
    inputs: &BTreeMap<String, Shape>,
) -> Result<Option<Shape>> {
    let shape = match &node.op {
        Op::Variable(var) => {
            return match (var.role, inputs.get(&node.name)) {
                (_, Some(shape)) => Ok(Some(shape.clone())),
                (VariableRole::Input, None) => {
                    Err(failure(node, "no shape was given for this input"))
                }
                _ => Ok(None),
            };
        }
        Op::Identity | Op::Cast { .. } | Op::BatchNorm(_) | Op::Activation(_) => {
            feature_map(node, shapes, 0)?.clone()
        }
        Op::SoftmaxOutput(_) => input_shape(node, shapes, 0)?.clone(),
        Op::Convolution(conv) => convolution_shape(node, feature_map(node, shapes, 0)?, conv)?,
        Op::DeformableConvolution(deform) => {
            let out = convolution_shape(node, feature_map(node, shapes, 0)?, &deform.conv)?;
            let offset = feature_map(node, shapes, 1)?;
            let expected = vec![out[0], deform.offset_channels(), out[2], out[3]];
            if offset != &expected {
                return Err(failure(
                    node,
                    format!("offset field {offset:?} does not match {expected:?}"),
                ));
            }
            out
        }
        Op::Deconvolution(conv) => {
            let input = feature_map(node, shapes, 0)?;
            check_groups(node, input[1], conv)?;
            let mut out = vec![input[0], conv.num_filter, 0, 0];
            for axis in 0..2 {
                out[2 + axis] = deconv_output_size(
                    input[2 + axis],
                    conv.kernel[axis],
                    conv.stride[axis],
                    conv.pad[axis],
                )
                .ok_or_else(|| failure(node, "no legal deconvolution output size"))?;
            }
            out
        }
        Op::Pooling(pool) => pooling_shape(node, feature_map(node, shapes, 0)?, pool)?,
        Op::Concat { dim } => {
            let parts = (0..node.inputs.len())
                .map(|idx| feature_map(node, shapes, idx))
                .collect::<Result<Vec<_>>>()?;
            let first = parts
                .first()
                .ok_or_else(|| failure(node, "concat of nothing"))?;
            let mut out = (*first).clone();
            out[*dim] = 0;
            for part in &parts {
                let compatible = (0..4).all(|axis| axis == *dim || part[axis] == first[axis]);
                if !compatible {
                    return Err(failure(
                        node,
                        format!("cannot concat {part:?} with {first:?} on axis {dim}"),
                    ));
                }
                out[*dim] += part[*dim];
            }
            out
        }
        Op::ElementwiseSum => {
            let lhs = feature_map(node, shapes, 0)?;
            let rhs = feature_map(node, shapes, 1)?;
            if lhs != rhs {
                return Err(failure(node, format!("cannot sum {lhs:?} and {rhs:?}")));
            }
            lhs.clone()
        }
        Op::Flatten => {
            let input = feature_map(node, shapes, 0)?;
            vec![input[0], input[1..].iter().product()]
        }
        Op::FullyConnected { num_hidden, .. } => {
            let input = input_shape(node, shapes, 0)?;
            let batch = input
                .first()
                .ok_or_else(|| failure(node, "input 0 has no batch axis"))?;
            vec![*batch, *num_hidden]
        }
        Op::Crop { offset } => {
            let data = feature_map(node, shapes, 0)?;
            let like = feature_map(node, shapes, 1)?;
            for axis in 0..2 {
                if offset[axis] + like[2 + axis] > data[2 + axis] {
                    return Err(failure(
                        node,
                        format!(
                            "crop of {:?} at offset {offset:?} exceeds {:?}",
                            &like[2..],
                            &data[2..]
                        ),
                    ));
                }
            }
            vec![data[0], data[1], like[2], like[3]]
        }
    };
    Ok(Some(shape))
}

impl SymbolGraph {
    /// Infer the shape of every node reachable from `heads`.
    ///
    /// # Arguments
    ///
    /// - `heads`: the output nodes.
    /// - `inputs`: shapes of the fed variables, by name; every reachable
    ///   [`VariableRole::Input`] variable must be present.
    pub fn infer_shapes(
        &self,
        heads: &[NodeId],
        inputs: &BTreeMap<String, Shape>,
    ) -> Result<ShapeMap> {
        let mask = self.reachable(heads);
        let mut shapes: Vec<Option<Shape>> = Vec::with_capacity(self.len());
        for (id, node) in self.iter() {
            let shape = if mask[id.index()] {
                node_shape(node, &shapes, inputs)?
            } else {
                None
            };
            shapes.push(shape);
        }
        Ok(ShapeMap { shapes })
    }
}

impl Symbol {
    /// Infer shapes given the ``[batch, channels, height, width]`` of `data`.
    pub fn infer_shapes(
        &self,
        data: [usize; 4],
    ) -> Result<ShapeMap> {
        let inputs = BTreeMap::from([("data".to_string(), data.to_vec())]);
        self.graph.infer_shapes(&[self.output], &inputs)
    }

    /// The output shape given the ``[batch, channels, height, width]`` of `data`.
    pub fn output_shape(
        &self,
        data: [usize; 4],
    ) -> Result<Shape> {
        let shapes = self.infer_shapes(data)?;
        shapes.get(self.output).cloned().ok_or_else(|| {
            failure(self.output_node(), "output shape could not be resolved")
        })
    }
}
