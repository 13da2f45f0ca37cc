//! # DeepLab Segmentation Head
//!
//! Wraps a segmentation backbone with the DeepLab v1 scoring head:
//! ```text,ignore
//!   features -> fc6 (1x1, 1024) -> relu_fc6 -> score (1x1, classes)
//!            -> upsampling (grouped deconv, 32/16) -> croped_score
//!            -> softmax (per pixel, ignore 255)
//! ```
//!
//! The head's weights are explicit variables with fixed names, so that
//! [`DeepLabConfig::init_plan`] can address them:
//! ``fc6_weight``, ``fc6_bias``, ``score_weight``, ``score_bias``,
//! ``upsampling_weight``, and one ``res5?_branch2b_offset`` pair per
//! deformable unit.

use crate::errors::{IrNextError, Result as IrResult};
use crate::graph::ops::{ConvolutionOp, SoftmaxNormalization, SoftmaxOutputOp};
use crate::graph::{LR_MULT_HINT, NodeId, Symbol, SymbolGraph};
use crate::models::irnext::prefabs::IrNextConfig;
use crate::models::irnext::stage::{BackboneConfig, TaskMode};
use crate::models::irnext::stems::DATA_NAME;
use burn::config::Config;
use serde::{Deserialize, Serialize};

/// Name of the fed per-pixel label variable.
pub const LABEL_NAME: &str = "label";

/// Learning rate multiplier of the head weights.
pub const WEIGHT_LR_MULT: f64 = 1.0;

/// Learning rate multiplier of the head biases.
pub const BIAS_LR_MULT: f64 = 2.0;

/// Standard deviation of the head weight initializer.
pub const HEAD_INIT_STD: f64 = 0.01;

/// How a named parameter is initialized.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum WeightInit {
    /// All zeros.
    Zeros,

    /// Gaussian noise.
    Normal {
        /// Mean.
        mean: f64,

        /// Standard deviation.
        std: f64,
    },

    /// Fixed bilinear upsampling filter; see [`bilinear_weight`].
    Bilinear {
        /// ``[out, in, height, width]`` of the filled weight.
        shape: [usize; 4],
    },
}

impl WeightInit {
    /// The filled values of a deterministic non-zero initializer.
    ///
    /// ``None`` for zeros and for random initializers.
    pub fn fixed_values(&self) -> Option<Vec<f64>> {
        match self {
            Self::Bilinear { shape } => Some(bilinear_weight(*shape)),
            Self::Zeros | Self::Normal { .. } => None,
        }
    }
}

/// Fill a ``[out, in, height, width]`` weight with the bilinear filter.
///
/// Every ``[height, width]`` slice holds the same filter:
/// ```text
/// f = ceil(width / 2)
/// c = (2f - 1 - f % 2) / 2f
/// w[y, x] = (1 - |x / f - c|) * (1 - |y / f - c|)
/// ```
pub fn bilinear_weight(shape: [usize; 4]) -> Vec<f64> {
    let [_, _, height, width] = shape;
    if height == 0 || width == 0 {
        return Vec::new();
    }
    let f = (width as f64 / 2.0).ceil();
    let c = (2.0 * f - 1.0 - f % 2.0) / (2.0 * f);

    (0..shape.iter().product::<usize>())
        .map(|i| {
            let x = (i % width) as f64;
            let y = ((i / width) % height) as f64;
            (1.0 - (x / f - c).abs()) * (1.0 - (y / f - c).abs())
        })
        .collect()
}

/// A single square bilinear filter, row-major.
pub fn bilinear_kernel(kernel: usize) -> Vec<f64> {
    bilinear_weight([1, 1, kernel, kernel])
}

/// DeepLab segmentation model configuration.
#[derive(Config, Debug)]
pub struct DeepLabConfig {
    /// Segmentation classes.
    pub num_classes: usize,

    /// Backbone; always built as [`TaskMode::Seg`].
    pub backbone: IrNextConfig,

    /// Channels of ``fc6``.
    #[config(default = 1024)]
    pub fc6_channels: usize,

    /// Kernel of the upsampling deconvolution.
    #[config(default = 32)]
    pub upsample_kernel: usize,

    /// Stride of the upsampling deconvolution.
    #[config(default = 16)]
    pub upsample_stride: usize,

    /// Offset of the crop back to the input extent.
    #[config(default = "[8, 8]")]
    pub crop_offset: [usize; 2],

    /// Label value excluded from the loss.
    #[config(default = 255)]
    pub ignore_label: i64,

    /// Convolution workspace hint of the head.
    #[config(default = 4096)]
    pub workspace: usize,
}

impl DeepLabConfig {
    /// The resolved segmentation backbone.
    pub fn backbone_config(&self) -> IrResult<BackboneConfig> {
        self.backbone.clone().with_task(TaskMode::Seg).resolve()
    }

    /// Training symbol; reads ``data`` and ``label``.
    pub fn build_train_symbol(&self) -> IrResult<Symbol> {
        self.build_symbol(true)
    }

    /// Inference symbol; reads ``data`` only.
    pub fn build_test_symbol(&self) -> IrResult<Symbol> {
        self.build_symbol(false)
    }

    /// Build the training or inference symbol.
    pub fn build_symbol(
        &self,
        is_train: bool,
    ) -> IrResult<Symbol> {
        if self.num_classes == 0 {
            return Err(IrNextError::mismatch("segmentation needs at least one class"));
        }
        let backbone = self.backbone_config()?;
        backbone.validate()?;

        let mut graph = SymbolGraph::new();
        let data = graph.input(DATA_NAME);
        let label = is_train.then(|| graph.label(LABEL_NAME));

        let features = backbone.build_features(&mut graph, data)?;

        let fc6 = self.scoring_conv(&mut graph, "fc6", features, self.fc6_channels);
        let relu_fc6 = graph.relu("relu_fc6", fc6);
        let score = self.scoring_conv(&mut graph, "score", relu_fc6, self.num_classes);

        let upsampling = graph.deconvolution(
            "upsampling",
            score,
            ConvolutionOp::new(self.num_classes, self.upsample_kernel)
                .with_stride([self.upsample_stride, self.upsample_stride])
                .with_num_group(self.num_classes)
                .with_workspace(self.workspace),
        );
        graph.set_hint(upsampling, LR_MULT_HINT, "0.0");

        let croped_score = graph.crop("croped_score", upsampling, data, self.crop_offset);
        let softmax = graph.softmax_output(
            "softmax",
            croped_score,
            label,
            SoftmaxOutputOp {
                multi_output: true,
                ignore_label: Some(self.ignore_label),
                normalization: SoftmaxNormalization::Valid,
            },
        );

        tracing::info!(
            is_train,
            classes = self.num_classes,
            nodes = graph.len(),
            "built deeplab symbol"
        );
        Ok(Symbol::new(graph, softmax))
    }

    /// 1x1 convolution with explicit ``{name}_weight`` and ``{name}_bias``.
    fn scoring_conv(
        &self,
        graph: &mut SymbolGraph,
        name: &str,
        data: NodeId,
        num_filter: usize,
    ) -> NodeId {
        let bias = graph.parameter(format!("{name}_bias"), Some(BIAS_LR_MULT));
        let weight = graph.parameter(format!("{name}_weight"), Some(WEIGHT_LR_MULT));
        graph.convolution_with_params(
            name,
            data,
            weight,
            Some(bias),
            ConvolutionOp::new(num_filter, 1).with_workspace(self.workspace),
        )
    }

    /// Initializers of the parameters that are not loaded from a
    /// pretrained backbone.
    pub fn init_plan(&self) -> IrResult<Vec<(String, WeightInit)>> {
        let mut plan = Vec::new();
        for unit in self.backbone_config()?.unit_plan()? {
            if unit.deform > 0 {
                let offset = unit.offset_name();
                plan.push((format!("{offset}_weight"), WeightInit::Zeros));
                plan.push((format!("{offset}_bias"), WeightInit::Zeros));
            }
        }

        let normal = WeightInit::Normal {
            mean: 0.0,
            std: HEAD_INIT_STD,
        };
        plan.extend([
            ("fc6_weight".to_string(), normal),
            ("fc6_bias".to_string(), WeightInit::Zeros),
            ("score_weight".to_string(), normal),
            ("score_bias".to_string(), WeightInit::Zeros),
            (
                "upsampling_weight".to_string(),
                WeightInit::Bilinear {
                    shape: self.upsampling_weight_shape(),
                },
            ),
        ]);
        Ok(plan)
    }

    /// Shape of ``upsampling_weight``: ``[classes, 1, kernel, kernel]``.
    pub fn upsampling_weight_shape(&self) -> [usize; 4] {
        [self.num_classes, 1, self.upsample_kernel, self.upsample_kernel]
    }
}
