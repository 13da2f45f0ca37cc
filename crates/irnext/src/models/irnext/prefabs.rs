//! # Model Factory
//!
//! [`IrNextConfig`] is the small, user-facing configuration surface:
//! depth, width, and a handful of style switches. [`IrNextConfig::resolve`]
//! expands it into a fully specified [`BackboneConfig`] using fixed
//! depth tables; there is no interpolation between depths.
//!
//! Image-scale depths (nominal input above 32 pixels):
//!
//! | depth | units             |
//! |-------|-------------------|
//! | 18    | ``[2, 2, 2, 2]``  |
//! | 34    | ``[3, 4, 6, 3]``  |
//! | 38    | ``[3, 3, 3, 3]``  |
//! | 50    | ``[3, 4, 6, 3]``  |
//! | 80    | ``[3, 8, 12, 3]`` |
//! | 101   | ``[3, 4, 23, 3]`` |
//! | 152   | ``[3, 8, 36, 3]`` |
//! | 200   | ``[3, 24, 36, 3]``|
//! | 269   | ``[3, 30, 48, 8]``|
//!
//! Depths below 38 always use plain units.
//!
//! Small-image depths use three equal stages: ``(depth - 2) / 9`` units of
//! the requested style for ``depth >= 164``, or ``(depth - 2) / 6`` plain
//! units below that.

use crate::errors::{IrNextError, Result as IrResult};
use crate::graph::Symbol;
use crate::graph::ops::Precision;
use crate::models::irnext::dilation::DilationPattern;
use crate::models::irnext::stage::{BackboneConfig, TaskMode};
use crate::models::irnext::stems::StemKind;
use crate::models::irnext::unit::BottleneckMode;
use crate::prefab::{StaticPreFabConfig, StaticPreFabMap};
use burn::config::Config;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Depths with an image-scale preset.
pub const STANDARD_DEPTHS: [usize; 9] = [18, 34, 38, 50, 80, 101, 152, 200, 269];

/// Smallest image-scale depth built from the requested bottleneck style.
pub const MIN_BOTTLENECK_DEPTH: usize = 38;

/// Smallest small-image depth built from the requested bottleneck style.
pub const MIN_SMALL_IMAGE_BOTTLENECK_DEPTH: usize = 164;

/// Output stride of a segmentation backbone.
///
/// Serialized as ``"4x"``, ``"8x"`` or ``"16x"``; the empty string reads as the default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SegStrideMode {
    /// Output at 1/4 of the input.
    X4,

    /// Output at 1/8 of the input.
    X8,

    /// Output at 1/16 of the input.
    #[default]
    X16,
}

impl SegStrideMode {
    /// Per-stage strides.
    pub fn stride_plan(&self) -> [usize; 4] {
        match self {
            Self::X4 => [1, 1, 1, 1],
            Self::X8 => [1, 2, 1, 1],
            Self::X16 => [1, 2, 2, 1],
        }
    }

    /// Canonical name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::X4 => "4x",
            Self::X8 => "8x",
            Self::X16 => "16x",
        }
    }
}

impl Display for SegStrideMode {
    fn fmt(
        &self,
        f: &mut Formatter<'_>,
    ) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SegStrideMode {
    type Err = IrNextError;

    /// Parse a stride mode; the empty string is the default.
    fn from_str(s: &str) -> IrResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" => Ok(Self::default()),
            "4x" => Ok(Self::X4),
            "8x" => Ok(Self::X8),
            "16x" => Ok(Self::X16),
            _ => Err(IrNextError::unrecognized("seg stride mode", s)),
        }
    }
}

impl TryFrom<String> for SegStrideMode {
    type Error = IrNextError;

    fn try_from(name: String) -> IrResult<Self> {
        name.parse()
    }
}

impl From<SegStrideMode> for String {
    fn from(mode: SegStrideMode) -> Self {
        mode.name().to_string()
    }
}

/// Units per stage for an image-scale depth.
///
/// # Errors
///
/// [`IrNextError::UnrecognizedConfiguration`] if `num_layers` is not in
/// [`STANDARD_DEPTHS`].
pub fn standard_depth_units(num_layers: usize) -> IrResult<[usize; 4]> {
    let units = match num_layers {
        18 => [2, 2, 2, 2],
        34 => [3, 4, 6, 3],
        38 => [3, 3, 3, 3],
        50 => [3, 4, 6, 3],
        80 => [3, 8, 12, 3],
        101 => [3, 4, 23, 3],
        152 => [3, 8, 36, 3],
        200 => [3, 24, 36, 3],
        269 => [3, 30, 48, 8],
        _ => return Err(IrNextError::unrecognized("num_layers", num_layers)),
    };
    Ok(units)
}

/// Units per stage, and the effective unit style, for a small-image depth.
///
/// # Errors
///
/// [`IrNextError::UnrecognizedConfiguration`] if `num_layers` fits neither
/// the ``(n - 2) % 9`` nor the ``(n - 2) % 6`` rule.
pub fn small_image_units(
    num_layers: usize,
    requested: BottleneckMode,
) -> IrResult<(usize, BottleneckMode)> {
    let unrecognized = || IrNextError::unrecognized("num_layers", num_layers);
    let body = num_layers.checked_sub(2).ok_or_else(unrecognized)?;

    if body % 9 == 0 && num_layers >= MIN_SMALL_IMAGE_BOTTLENECK_DEPTH {
        Ok((body / 9, requested))
    } else if body % 6 == 0 && num_layers < MIN_SMALL_IMAGE_BOTTLENECK_DEPTH && body > 0 {
        Ok((body / 6, BottleneckMode::Plain))
    } else {
        Err(unrecognized())
    }
}

/// [`IrNextConfig::resolve`] as a free function.
pub fn resolve_preset(config: &IrNextConfig) -> IrResult<BackboneConfig> {
    config.resolve()
}

/// User-facing model configuration.
#[derive(Config, Debug)]
pub struct IrNextConfig {
    /// Classifier outputs.
    pub num_classes: usize,

    /// Nominal depth; selects the unit table.
    pub num_layers: usize,

    /// Width of the final stage.
    pub outfeature: usize,

    /// Requested unit style; shallow depths fall back to plain units.
    #[config(default = "BottleneckMode::ResNeXt")]
    pub bottleneck: BottleneckMode,

    /// Inner width divisor.
    #[config(default = "0.5")]
    pub expansion: f64,

    /// Groups of the 3x3 convolutions.
    #[config(default = 32)]
    pub num_group: usize,

    /// Final feature map size; the nominal input is ``32 * lastout``.
    #[config(default = 7)]
    pub lastout: usize,

    /// Per-stage dilation plan.
    #[config(default = "DilationPattern::Identity")]
    pub dilation_pattern: DilationPattern,

    /// Inception-ResNet pre-activation sum.
    #[config(default = false)]
    pub pre_activation: bool,

    /// Deformable offset groups of the final stage; `0` disables.
    #[config(default = 0)]
    pub deform: usize,

    /// Convolution workspace hint.
    #[config(default = 256)]
    pub workspace: usize,

    /// Task.
    #[config(default = "TaskMode::Cls")]
    pub task: TaskMode,

    /// Output stride of [`TaskMode::Seg`] backbones.
    #[config(default = "SegStrideMode::X16")]
    pub seg_stride_mode: SegStrideMode,

    /// Compute precision.
    #[config(default = "Precision::Float32")]
    pub precision: Precision,

    /// Batch-norm momentum.
    #[config(default = "0.9")]
    pub bn_mom: f64,

    /// Mark shortcuts for recomputation.
    #[config(default = false)]
    pub memonger: bool,
}

impl IrNextConfig {
    /// The stem for this configuration's nominal input resolution.
    pub fn stem_kind(&self) -> StemKind {
        StemKind::for_lastout(self.lastout)
    }

    /// Expand into a fully specified [`BackboneConfig`].
    ///
    /// # Errors
    ///
    /// [`IrNextError::UnrecognizedConfiguration`] for depths without a preset.
    pub fn resolve(&self) -> IrResult<BackboneConfig> {
        let of = self.outfeature;
        let (units, filter_list, bottleneck) = match self.stem_kind() {
            StemKind::SmallImage => {
                let (per_stage, bottleneck) = small_image_units(self.num_layers, self.bottleneck)?;
                (vec![per_stage; 3], vec![16, of / 4, of / 2, of], bottleneck)
            }
            StemKind::ImageNet => {
                let units = standard_depth_units(self.num_layers)?;
                let bottleneck = if self.num_layers >= MIN_BOTTLENECK_DEPTH {
                    self.bottleneck
                } else {
                    BottleneckMode::Plain
                };
                (
                    units.to_vec(),
                    vec![64, of / 8, of / 4, of / 2, of],
                    bottleneck,
                )
            }
        };

        tracing::debug!(
            num_layers = self.num_layers,
            ?units,
            ?filter_list,
            %bottleneck,
            "resolved depth preset"
        );

        Ok(BackboneConfig::new(
            units.clone(),
            units.len(),
            filter_list,
            self.num_classes,
        )
        .with_num_group(self.num_group)
        .with_bottleneck(bottleneck)
        .with_lastout(self.lastout)
        .with_expansion(self.expansion)
        .with_dilation_pattern(self.dilation_pattern)
        .with_pre_activation(self.pre_activation)
        .with_deform(self.deform)
        .with_task(self.task)
        .with_seg_stride_plan(self.seg_stride_mode.stride_plan().to_vec())
        .with_bn_mom(self.bn_mom)
        .with_workspace(self.workspace)
        .with_precision(self.precision)
        .with_memonger(self.memonger))
    }

    /// Resolve and build.
    pub fn build(&self) -> IrResult<Symbol> {
        self.resolve()?.build()
    }
}

/// Well-known [`IrNextConfig`]s.
pub static PREFAB_IRNEXT_MAP: StaticPreFabMap<IrNextConfig> = StaticPreFabMap {
    name: "irnext",
    description: "Well-known IrNext configs",

    items: &[
        &StaticPreFabConfig {
            name: "irnext50_32x4d_cls",
            description: "ResNeXt-50 (32x4d) ImageNet classifier",
            builder: || IrNextConfig::new(1000, 50, 2048).with_expansion(2.0),
        },
        &StaticPreFabConfig {
            name: "irnext101_cls",
            description: "IrNeXt-101 ImageNet classifier",
            builder: || IrNextConfig::new(1000, 101, 2048),
        },
        &StaticPreFabConfig {
            name: "irnext152_cls",
            description: "IrNeXt-152 ImageNet classifier",
            builder: || IrNextConfig::new(1000, 152, 2048),
        },
        &StaticPreFabConfig {
            name: "irnext101_deeplab_shuttle_seg",
            description: "IrNeXt-101 DeepLab backbone; 16x output, SHUTTLE dilation, deformable final stage",
            builder: || {
                IrNextConfig::new(21, 101, 2048)
                    .with_task(TaskMode::Seg)
                    .with_dilation_pattern(DilationPattern::Shuttle)
                    .with_deform(1)
            },
        },
        &StaticPreFabConfig {
            name: "irnext164_cifar",
            description: "IrNeXt-164 CIFAR-10 classifier; 32x32 inputs",
            builder: || {
                IrNextConfig::new(10, 164, 256)
                    .with_lastout(1)
                    .with_num_group(4)
            },
        },
    ],
};
