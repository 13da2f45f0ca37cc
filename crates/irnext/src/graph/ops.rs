//! # Operator Descriptors
//!
//! Each [`Op`] is a declaration for the execution engine; attribute names
//! and defaults follow the engine's operator vocabulary.

use crate::errors::IrNextError;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Default batch-norm epsilon.
pub const BATCH_NORM_EPS: f64 = 2e-5;

/// Default convolution workspace hint (MB).
pub const DEFAULT_WORKSPACE: usize = 256;

/// Numeric precision of the graph input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    /// 32-bit float.
    #[default]
    Float32,

    /// 16-bit float.
    Float16,
}

impl Precision {
    /// The engine dtype name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Float32 => "float32",
            Self::Float16 => "float16",
        }
    }
}

impl Display for Precision {
    fn fmt(
        &self,
        f: &mut Formatter<'_>,
    ) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Precision {
    type Err = IrNextError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "float32" | "fp32" => Ok(Self::Float32),
            "float16" | "fp16" => Ok(Self::Float16),
            _ => Err(IrNextError::unrecognized("precision", s)),
        }
    }
}

/// What a [`Op::Variable`] stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableRole {
    /// Fed data.
    Input,

    /// Fed ground truth.
    Label,

    /// Learnable parameter.
    Parameter,
}

/// Free variable attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableOp {
    /// The variable role.
    pub role: VariableRole,

    /// Learning rate multiplier for parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lr_mult: Option<f64>,
}

/// Convolution / deconvolution attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvolutionOp {
    /// Output channels.
    pub num_filter: usize,

    /// Kernel size.
    pub kernel: [usize; 2],

    /// Stride.
    pub stride: [usize; 2],

    /// Zero padding on each side.
    pub pad: [usize; 2],

    /// Dilation.
    pub dilate: [usize; 2],

    /// Filter groups.
    pub num_group: usize,

    /// Omit the bias parameter.
    pub no_bias: bool,

    /// Engine workspace hint.
    pub workspace: usize,
}

impl ConvolutionOp {
    /// A square, unpadded, ungrouped, bias-free kernel at stride 1.
    pub fn new(
        num_filter: usize,
        kernel: usize,
    ) -> Self {
        Self {
            num_filter,
            kernel: [kernel, kernel],
            stride: [1, 1],
            pad: [0, 0],
            dilate: [1, 1],
            num_group: 1,
            no_bias: true,
            workspace: DEFAULT_WORKSPACE,
        }
    }

    /// Set the stride.
    pub fn with_stride(
        self,
        stride: [usize; 2],
    ) -> Self {
        Self { stride, ..self }
    }

    /// Set a square padding.
    pub fn with_pad(
        self,
        pad: usize,
    ) -> Self {
        Self {
            pad: [pad, pad],
            ..self
        }
    }

    /// Set a square dilation.
    pub fn with_dilate(
        self,
        dilate: usize,
    ) -> Self {
        Self {
            dilate: [dilate, dilate],
            ..self
        }
    }

    /// Set the filter groups.
    pub fn with_num_group(
        self,
        num_group: usize,
    ) -> Self {
        Self { num_group, ..self }
    }

    /// Enable or disable the bias.
    pub fn with_bias(
        self,
        bias: bool,
    ) -> Self {
        Self {
            no_bias: !bias,
            ..self
        }
    }

    /// Set the workspace hint.
    pub fn with_workspace(
        self,
        workspace: usize,
    ) -> Self {
        Self { workspace, ..self }
    }
}

/// Deformable convolution attributes.
///
/// The second input is the offset field,
/// ``[batch, 2 * kh * kw * num_deformable_group, out_h, out_w]``.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeformableConvolutionOp {
    /// The regular convolution attributes.
    pub conv: ConvolutionOp,

    /// Offset groups.
    pub num_deformable_group: usize,
}

impl DeformableConvolutionOp {
    /// Channels of the offset field this convolution consumes.
    pub fn offset_channels(&self) -> usize {
        2 * self.conv.kernel[0] * self.conv.kernel[1] * self.num_deformable_group
    }
}

/// Batch normalization attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchNormOp {
    /// Numerical stabilizer.
    pub eps: f64,

    /// Running statistics momentum.
    pub momentum: f64,

    /// Freeze gamma at 1.
    pub fix_gamma: bool,
}

impl BatchNormOp {
    /// Learnable-gamma batch norm with the given momentum.
    pub fn new(momentum: f64) -> Self {
        Self {
            eps: BATCH_NORM_EPS,
            momentum,
            fix_gamma: false,
        }
    }

    /// Set `fix_gamma`.
    pub fn with_fix_gamma(
        self,
        fix_gamma: bool,
    ) -> Self {
        Self { fix_gamma, ..self }
    }
}

/// Activation function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivationKind {
    /// Rectified linear unit.
    Relu,
}

/// Pooling reduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolKind {
    /// Max pooling.
    Max,

    /// Average pooling.
    Avg,
}

/// Pooling attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolingOp {
    /// Reduction.
    pub kind: PoolKind,

    /// Window size; ignored when `global`.
    pub kernel: [usize; 2],

    /// Window stride.
    pub stride: [usize; 2],

    /// Padding.
    pub pad: [usize; 2],

    /// Pool over the full spatial extent.
    pub global: bool,
}

/// Output normalization of [`Op::SoftmaxOutput`] gradients.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SoftmaxNormalization {
    /// No normalization.
    #[default]
    Null,

    /// Divide by batch size.
    Batch,

    /// Divide by the count of non-ignored labels.
    Valid,
}

/// Softmax-with-loss attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoftmaxOutputOp {
    /// Softmax over the channel axis of every spatial location.
    pub multi_output: bool,

    /// Label value excluded from the loss.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_label: Option<i64>,

    /// Gradient normalization.
    pub normalization: SoftmaxNormalization,
}

/// A declared operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "attrs")]
pub enum Op {
    /// Free variable.
    Variable(VariableOp),

    /// Pass-through.
    Identity,

    /// Precision cast.
    Cast {
        /// Target dtype.
        dtype: Precision,
    },

    /// Batch normalization.
    BatchNorm(BatchNormOp),

    /// 2d convolution.
    ///
    /// Inputs: ``[data]`` or ``[data, weight, bias?]``.
    Convolution(ConvolutionOp),

    /// Deformable 2d convolution.
    ///
    /// Inputs: ``[data, offset]``.
    DeformableConvolution(DeformableConvolutionOp),

    /// Transposed 2d convolution.
    Deconvolution(ConvolutionOp),

    /// Pointwise activation.
    Activation(ActivationKind),

    /// Spatial pooling.
    Pooling(PoolingOp),

    /// Concatenation along `dim`.
    Concat {
        /// Concatenation axis.
        dim: usize,
    },

    /// Elementwise sum of equally shaped inputs.
    ElementwiseSum,

    /// Collapse all trailing axes.
    Flatten,

    /// Dense layer.
    FullyConnected {
        /// Output features.
        num_hidden: usize,

        /// Omit the bias parameter.
        no_bias: bool,
    },

    /// Softmax with cross-entropy loss.
    ///
    /// Inputs: ``[data]`` or ``[data, label]``.
    SoftmaxOutput(SoftmaxOutputOp),

    /// Spatial crop of the first input to the extent of the second.
    Crop {
        /// ``[y, x]`` offset into the first input.
        offset: [usize; 2],
    },
}

impl Op {
    /// The engine operator type name.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Variable(_) => "null",
            Self::Identity => "identity",
            Self::Cast { .. } => "Cast",
            Self::BatchNorm(_) => "BatchNorm",
            Self::Convolution(_) => "Convolution",
            Self::DeformableConvolution(_) => "DeformableConvolution",
            Self::Deconvolution(_) => "Deconvolution",
            Self::Activation(_) => "Activation",
            Self::Pooling(_) => "Pooling",
            Self::Concat { .. } => "Concat",
            Self::ElementwiseSum => "elemwise_add",
            Self::Flatten => "Flatten",
            Self::FullyConnected { .. } => "FullyConnected",
            Self::SoftmaxOutput(_) => "SoftmaxOutput",
            Self::Crop { .. } => "Crop",
        }
    }

    /// Prefix for auto-generated names of anonymous nodes.
    pub fn auto_name_prefix(&self) -> &'static str {
        match self {
            Self::Variable(_) => "var",
            Self::Identity => "identity",
            Self::Cast { .. } => "cast",
            Self::BatchNorm(_) => "batchnorm",
            Self::Convolution(_) => "convolution",
            Self::DeformableConvolution(_) => "deformableconvolution",
            Self::Deconvolution(_) => "deconvolution",
            Self::Activation(_) => "activation",
            Self::Pooling(_) => "pooling",
            Self::Concat { .. } => "concat",
            Self::ElementwiseSum => "plus",
            Self::Flatten => "flatten",
            Self::FullyConnected { .. } => "fullyconnected",
            Self::SoftmaxOutput(_) => "softmaxoutput",
            Self::Crop { .. } => "crop",
        }
    }

    /// Learnable arguments created implicitly for a node named `name`.
    ///
    /// `explicit_inputs` is the node's input count; parameters supplied
    /// as explicit inputs are not duplicated.
    pub fn implicit_arguments(
        &self,
        name: &str,
        explicit_inputs: usize,
    ) -> Vec<String> {
        let weight_bias = |no_bias: bool| {
            let mut args = Vec::new();
            if explicit_inputs < 2 {
                args.push(format!("{name}_weight"));
            }
            if !no_bias && explicit_inputs < 3 {
                args.push(format!("{name}_bias"));
            }
            args
        };

        match self {
            Self::Convolution(conv) | Self::Deconvolution(conv) => weight_bias(conv.no_bias),
            Self::DeformableConvolution(deform) => {
                // The second input is the offset field, not a weight.
                let mut args = vec![format!("{name}_weight")];
                if !deform.conv.no_bias {
                    args.push(format!("{name}_bias"));
                }
                args
            }
            Self::FullyConnected { no_bias, .. } => weight_bias(*no_bias),
            Self::BatchNorm(_) => vec![format!("{name}_gamma"), format!("{name}_beta")],
            Self::SoftmaxOutput(_) if explicit_inputs < 2 => vec![format!("{name}_label")],
            _ => Vec::new(),
        }
    }

    /// Auxiliary (non-learned) states for a node named `name`.
    pub fn auxiliary_states(
        &self,
        name: &str,
    ) -> Vec<String> {
        match self {
            Self::BatchNorm(_) => vec![
                format!("{name}_moving_mean"),
                format!("{name}_moving_var"),
            ],
            _ => Vec::new(),
        }
    }
}
