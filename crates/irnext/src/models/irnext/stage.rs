//! # Stage Assembler
//!
//! [`BackboneConfig`] chains the prelude, a stem, and `num_stages` stages
//! of residual units into a backbone body, then optionally attaches the
//! classification head.
//!
//! Stage `i` (1-based) is:
//! ```text,ignore
//!   stage{i}_unit1            dim_match=false, stride=stride_plan[i], dilation=dilation_plan[i]
//!   stage{i}_unit{2..=units}  dim_match=true,  stride=1,              dilation=dilation_plan[i]
//! ```
//!
//! Classification always uses the stride plan ``[1, 2, 2, 2]``;
//! segmentation uses the configured `seg_stride_plan` and returns the
//! raw feature node.

use crate::errors::{IrNextError, Result as IrResult};
use crate::graph::ops::{PoolKind, PoolingOp, Precision, SoftmaxOutputOp};
use crate::graph::{NodeId, Symbol, SymbolGraph};
use crate::models::irnext::dilation::DilationPattern;
use crate::models::irnext::stems::{DATA_NAME, StemConfig, StemKind, attach_prelude};
use crate::models::irnext::unit::{BottleneckMode, UnitConfig};
use burn::config::Config;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Classification stride plan.
pub const CLS_STRIDE_PLAN: [usize; 4] = [1, 2, 2, 2];

/// Stage count supported by the stride and dilation tables.
pub const MAX_STAGES: usize = 4;

/// What the backbone is built for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskMode {
    /// Whole-image classification; ends in a softmax loss.
    #[default]
    Cls,

    /// Dense prediction; returns the raw feature map.
    Seg,
}

impl TaskMode {
    /// Canonical name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Cls => "CLS",
            Self::Seg => "SEG",
        }
    }
}

impl Display for TaskMode {
    fn fmt(
        &self,
        f: &mut Formatter<'_>,
    ) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TaskMode {
    type Err = IrNextError;

    fn from_str(s: &str) -> IrResult<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CLS" => Ok(Self::Cls),
            "SEG" => Ok(Self::Seg),
            _ => Err(IrNextError::unrecognized("task mode", s)),
        }
    }
}

/// One resolved stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageSpec {
    /// Output channels of every unit.
    pub filters: usize,

    /// Number of units.
    pub units: usize,

    /// Stride of the first unit.
    pub stride: usize,

    /// Dilation of every unit.
    pub dilation: usize,
}

/// Name of the deformable offset branch of a final-stage unit.
///
/// Stage and unit indices are 0-based; stage 3, unit 0 is ``res5a``.
pub fn deform_offset_name(
    stage_idx: usize,
    unit_idx: usize,
) -> String {
    let letter = u8::try_from(unit_idx)
        .ok()
        .filter(|&idx| idx < 26)
        .map(|idx| char::from(b'a' + idx).to_string())
        .unwrap_or_else(|| unit_idx.to_string());
    format!("res{}{}_branch2b_offset", stage_idx + 2, letter)
}

/// [`BackboneConfig::build`] as a free function.
pub fn build_backbone(config: &BackboneConfig) -> IrResult<Symbol> {
    config.build()
}

/// Fully specified backbone configuration.
#[derive(Config, Debug)]
pub struct BackboneConfig {
    /// Units per stage.
    pub units: Vec<usize>,

    /// Number of stages.
    pub num_stages: usize,

    /// Stem width followed by the width of each stage.
    pub filter_list: Vec<usize>,

    /// Classifier outputs (CLS only).
    pub num_classes: usize,

    /// Groups of the 3x3 convolutions.
    #[config(default = 32)]
    pub num_group: usize,

    /// Unit style.
    #[config(default = "BottleneckMode::ResNeXt")]
    pub bottleneck: BottleneckMode,

    /// Final feature map size; the nominal input is ``32 * lastout``.
    #[config(default = 7)]
    pub lastout: usize,

    /// Inner width divisor.
    #[config(default = "0.5")]
    pub expansion: f64,

    /// Per-stage dilation plan.
    #[config(default = "DilationPattern::Identity")]
    pub dilation_pattern: DilationPattern,

    /// Inception-ResNet pre-activation sum.
    #[config(default = false)]
    pub pre_activation: bool,

    /// Deformable offset groups of the final stage; `0` disables.
    #[config(default = 0)]
    pub deform: usize,

    /// Task.
    #[config(default = "TaskMode::Cls")]
    pub task: TaskMode,

    /// Per-stage strides used by [`TaskMode::Seg`].
    #[config(default = "vec![1, 2, 2, 1]")]
    pub seg_stride_plan: Vec<usize>,

    /// Batch-norm momentum.
    #[config(default = "0.9")]
    pub bn_mom: f64,

    /// Convolution workspace hint.
    #[config(default = 256)]
    pub workspace: usize,

    /// Compute precision.
    #[config(default = "Precision::Float32")]
    pub precision: Precision,

    /// Mark shortcuts for recomputation.
    #[config(default = false)]
    pub memonger: bool,
}

impl BackboneConfig {
    /// Check that stage counts, unit counts and filter widths agree.
    ///
    /// # Errors
    ///
    /// - [`IrNextError::StructuralMismatch`] on disagreement.
    /// - [`IrNextError::UnimplementedFeature`] for [`BottleneckMode::DualPath`].
    pub fn validate(&self) -> IrResult<()> {
        if self.num_stages == 0 || self.num_stages > MAX_STAGES {
            return Err(IrNextError::mismatch(format!(
                "num_stages must be in 1..={MAX_STAGES}, found {}",
                self.num_stages
            )));
        }
        if self.units.len() != self.num_stages {
            return Err(IrNextError::mismatch(format!(
                "{} unit counts for {} stages",
                self.units.len(),
                self.num_stages
            )));
        }
        if self.filter_list.len() != self.num_stages + 1 {
            return Err(IrNextError::mismatch(format!(
                "filter_list has {} entries; {} stages need {}",
                self.filter_list.len(),
                self.num_stages,
                self.num_stages + 1
            )));
        }
        if let Some(stage) = self.units.iter().position(|&n| n == 0) {
            return Err(IrNextError::mismatch(format!(
                "stage {} has no units",
                stage + 1
            )));
        }
        if self.stride_plan().len() < self.num_stages {
            return Err(IrNextError::mismatch(format!(
                "stride plan {:?} is shorter than {} stages",
                self.stride_plan(),
                self.num_stages
            )));
        }
        if self.bottleneck == BottleneckMode::DualPath {
            return Err(IrNextError::UnimplementedFeature {
                feature: "dual path bottleneck".to_string(),
            });
        }
        Ok(())
    }

    /// The stem for this configuration's nominal input resolution.
    pub fn stem_kind(&self) -> StemKind {
        StemKind::for_lastout(self.lastout)
    }

    /// Per-stage strides for the configured task.
    pub fn stride_plan(&self) -> Vec<usize> {
        match self.task {
            TaskMode::Cls => CLS_STRIDE_PLAN.to_vec(),
            TaskMode::Seg => self.seg_stride_plan.clone(),
        }
    }

    /// Resolve the per-stage plan.
    pub fn stage_plan(&self) -> IrResult<Vec<StageSpec>> {
        self.validate()?;
        let strides = self.stride_plan();
        let dilations = self.dilation_pattern.dilations();
        Ok((0..self.num_stages)
            .map(|i| StageSpec {
                filters: self.filter_list[i + 1],
                units: self.units[i],
                stride: strides[i],
                dilation: dilations[i],
            })
            .collect())
    }

    /// Resolve every unit, in build order.
    pub fn unit_plan(&self) -> IrResult<Vec<UnitConfig>> {
        let plan = self.stage_plan()?;
        let last_stage = plan.len() - 1;

        let mut units = Vec::new();
        for (stage_idx, stage) in plan.iter().enumerate() {
            for unit_idx in 0..stage.units {
                let stride = if unit_idx == 0 { stage.stride } else { 1 };
                let mut unit = UnitConfig::new(
                    format!("stage{}_unit{}", stage_idx + 1, unit_idx + 1),
                    stage.filters,
                )
                .with_stride([stride, stride])
                .with_dim_match(unit_idx != 0)
                .with_bottleneck(self.bottleneck)
                .with_expansion(self.expansion)
                .with_num_group(self.num_group)
                .with_dilation(stage.dilation)
                .with_pre_activation(self.pre_activation)
                .with_bn_mom(self.bn_mom)
                .with_workspace(self.workspace)
                .with_memonger(self.memonger);

                if self.deform > 0 && stage_idx == last_stage {
                    unit = unit
                        .with_deform(self.deform)
                        .with_offset_name(Some(deform_offset_name(stage_idx, unit_idx)));
                }
                units.push(unit);
            }
        }
        Ok(units)
    }

    /// Declare the prelude, stem and stages, reading the `data` variable.
    ///
    /// # Returns
    ///
    /// The final stage's feature node.
    pub fn build_features(
        &self,
        graph: &mut SymbolGraph,
        data: NodeId,
    ) -> IrResult<NodeId> {
        let plan = self.stage_plan()?;
        let units = self.unit_plan()?;

        let body = attach_prelude(graph, data, self.precision, self.bn_mom);
        let mut body = StemConfig::new(self.filter_list[0])
            .with_kind(self.stem_kind())
            .with_bn_mom(self.bn_mom)
            .with_workspace(self.workspace)
            .build(graph, body);

        let mut units = units.iter();
        for (stage_idx, stage) in plan.iter().enumerate() {
            tracing::debug!(
                stage = stage_idx + 1,
                filters = stage.filters,
                units = stage.units,
                stride = stage.stride,
                dilation = stage.dilation,
                "building stage"
            );
            for unit in units.by_ref().take(stage.units) {
                body = unit.build(graph, body)?;
            }
        }
        Ok(body)
    }

    /// Declare the classification head on `body`.
    fn build_cls_head(
        &self,
        graph: &mut SymbolGraph,
        body: NodeId,
    ) -> NodeId {
        let pool = graph.pooling(
            Some("pool1"),
            body,
            PoolingOp {
                kind: PoolKind::Avg,
                kernel: [self.lastout, self.lastout],
                stride: [1, 1],
                pad: [0, 0],
                global: true,
            },
        );
        let flat = graph.flatten(pool);
        let mut fc = graph.fully_connected("fc1", flat, self.num_classes);
        if self.precision == Precision::Float16 {
            fc = graph.cast(fc, Precision::Float32);
        }
        graph.softmax_output("softmax", fc, None, SoftmaxOutputOp::default())
    }

    /// Build the backbone into a fresh graph.
    ///
    /// # Returns
    ///
    /// A [`Symbol`] ending in a softmax loss ([`TaskMode::Cls`]) or in the
    /// raw feature map ([`TaskMode::Seg`]).
    ///
    /// # Errors
    ///
    /// See [`BackboneConfig::validate`]; nothing is built on error.
    pub fn build(&self) -> IrResult<Symbol> {
        self.validate()?;

        let mut graph = SymbolGraph::new();
        let data = graph.input(DATA_NAME);
        let body = self.build_features(&mut graph, data)?;
        let output = match self.task {
            TaskMode::Cls => self.build_cls_head(&mut graph, body),
            TaskMode::Seg => body,
        };

        tracing::info!(
            task = %self.task,
            stages = self.num_stages,
            nodes = graph.len(),
            "built backbone"
        );
        Ok(Symbol::new(graph, output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ops::Op;
    use hamcrest::prelude::*;

    fn tiny_config() -> BackboneConfig {
        BackboneConfig::new(vec![2, 1, 2, 2], 4, vec![16, 32, 64, 128, 256], 10).with_num_group(4)
    }

    #[test]
    fn test_task_mode_parse() {
        assert_eq!("cls".parse::<TaskMode>().unwrap(), TaskMode::Cls);
        assert_eq!("SEG".parse::<TaskMode>().unwrap(), TaskMode::Seg);
        assert_eq!(" Seg ".parse::<TaskMode>().unwrap(), TaskMode::Seg);
        assert!(matches!(
            "DET".parse::<TaskMode>(),
            Err(IrNextError::UnrecognizedConfiguration { .. })
        ));
    }

    #[test]
    fn test_deform_offset_name() {
        assert_eq!(deform_offset_name(3, 0), "res5a_branch2b_offset");
        assert_eq!(deform_offset_name(3, 2), "res5c_branch2b_offset");
        assert_eq!(deform_offset_name(2, 1), "res4b_branch2b_offset");
        assert_eq!(deform_offset_name(3, 30), "res530_branch2b_offset");
    }

    #[test]
    fn test_cls_build() {
        let symbol = tiny_config().build().unwrap();

        let out = symbol.output_node();
        assert_eq!(out.name, "softmax");
        assert!(matches!(out.op, Op::SoftmaxOutput(_)));
        assert_eq!(
            symbol.output_shape([2, 3, 224, 224]).unwrap(),
            vec![2, 10]
        );

        let shapes = symbol.infer_shapes([2, 3, 224, 224]).unwrap();
        let pool1 = symbol.graph.find("pool1").unwrap();
        assert_eq!(shapes.get(pool1), Some(&vec![2, 256, 1, 1]));
        let last = symbol.graph.find("stage4_unit2_relu").unwrap();
        assert_eq!(shapes.get(last), Some(&vec![2, 256, 7, 7]));

        let args = symbol.list_arguments();
        assert_eq!(args.first().map(String::as_str), Some("data"));
        assert_eq!(args.last().map(String::as_str), Some("softmax_label"));
    }

    #[test]
    fn test_seg_build_is_raw() {
        let config = tiny_config().with_task(TaskMode::Seg);
        let symbol = config.build().unwrap();

        let out = symbol.output_node();
        assert_eq!(out.name, "stage4_unit2_relu");
        assert!(symbol.graph.find("pool1").is_none());
        assert!(symbol.graph.find("softmax").is_none());
        assert_eq!(
            symbol.output_shape([1, 3, 224, 224]).unwrap(),
            vec![1, 256, 14, 14]
        );
    }

    #[test]
    fn test_stage_plan() {
        let config = tiny_config()
            .with_task(TaskMode::Seg)
            .with_dilation_pattern(DilationPattern::Shuttle)
            .with_seg_stride_plan(vec![1, 2, 1, 1]);
        let plan = config.stage_plan().unwrap();

        assert_eq!(
            plan,
            vec![
                StageSpec {
                    filters: 32,
                    units: 2,
                    stride: 1,
                    dilation: 1
                },
                StageSpec {
                    filters: 64,
                    units: 1,
                    stride: 2,
                    dilation: 1
                },
                StageSpec {
                    filters: 128,
                    units: 2,
                    stride: 1,
                    dilation: 2
                },
                StageSpec {
                    filters: 256,
                    units: 2,
                    stride: 1,
                    dilation: 1
                },
            ]
        );

        let symbol = config.build().unwrap();
        assert_eq!(
            symbol.output_shape([1, 3, 224, 224]).unwrap(),
            vec![1, 256, 28, 28]
        );
    }

    #[test]
    fn test_unit_plan_dim_match() {
        let config = tiny_config();
        let units = config.unit_plan().unwrap();
        assert_that!(units.len(), equal_to(7));

        for (stage_idx, count) in config.units.iter().enumerate() {
            let prefix = format!("stage{}_", stage_idx + 1);
            let stage: Vec<&UnitConfig> =
                units.iter().filter(|u| u.name.starts_with(&prefix)).collect();
            assert_eq!(stage.len(), *count);
            assert!(!stage[0].dim_match);
            assert_eq!(stage[0].stride, [CLS_STRIDE_PLAN[stage_idx]; 2]);
            for unit in &stage[1..] {
                assert!(unit.dim_match);
                assert_eq!(unit.stride, [1, 1]);
            }
        }
    }

    #[test]
    fn test_structural_mismatch() {
        let bad_units = BackboneConfig::new(vec![2, 2, 2], 4, vec![16, 32, 64, 128, 256], 10);
        assert!(matches!(
            bad_units.build(),
            Err(IrNextError::StructuralMismatch { .. })
        ));

        let bad_filters = BackboneConfig::new(vec![2, 2, 2, 2], 4, vec![32, 64, 128, 256], 10);
        assert!(matches!(
            bad_filters.unit_plan(),
            Err(IrNextError::StructuralMismatch { .. })
        ));

        let empty_stage = BackboneConfig::new(vec![2, 0, 2, 2], 4, vec![16, 32, 64, 128, 256], 10);
        assert!(empty_stage.validate().is_err());

        let short_strides = tiny_config()
            .with_task(TaskMode::Seg)
            .with_seg_stride_plan(vec![1, 2]);
        assert!(short_strides.validate().is_err());

        let too_deep = BackboneConfig::new(vec![1; 5], 5, vec![8; 6], 10);
        assert!(too_deep.validate().is_err());
    }

    #[test]
    fn test_dual_path_fails_before_building() {
        let config = tiny_config().with_bottleneck(BottleneckMode::DualPath);
        assert!(matches!(
            build_backbone(&config),
            Err(IrNextError::UnimplementedFeature { .. })
        ));

        let mut graph = SymbolGraph::new();
        let data = graph.input(DATA_NAME);
        assert!(config.build_features(&mut graph, data).is_err());
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn test_deform_final_stage_only() {
        let config = tiny_config().with_task(TaskMode::Seg).with_deform(1);
        let symbol = config.build().unwrap();

        let deformable: Vec<&str> = symbol
            .graph
            .nodes()
            .iter()
            .filter(|n| matches!(n.op, Op::DeformableConvolution(_)))
            .map(|n| n.name.as_str())
            .collect();
        assert_eq!(deformable, vec!["stage4_unit1_conv2", "stage4_unit2_conv2"]);

        let params = symbol.parameter_names();
        for name in [
            "res5a_branch2b_offset_weight",
            "res5a_branch2b_offset_bias",
            "res5b_branch2b_offset_weight",
            "res5b_branch2b_offset_bias",
        ] {
            assert!(params.iter().any(|p| p == name), "{name}");
        }
        assert!(symbol.output_shape([1, 3, 224, 224]).is_ok());
    }

    #[test]
    fn test_float16_casts() {
        let symbol = tiny_config()
            .with_precision(Precision::Float16)
            .build()
            .unwrap();

        let cast0 = symbol.graph.find("cast0").unwrap();
        let cast1 = symbol.graph.find("cast1").unwrap();
        assert!(symbol.graph.find("id").is_none());
        assert!(matches!(
            symbol.graph.node(cast0).op,
            Op::Cast {
                dtype: Precision::Float16
            }
        ));
        assert!(matches!(
            symbol.graph.node(cast1).op,
            Op::Cast {
                dtype: Precision::Float32
            }
        ));
        assert_eq!(symbol.output_node().inputs[0], cast1);
    }

    #[test]
    fn test_small_image_backbone() {
        let config = BackboneConfig::new(vec![1, 1, 1], 3, vec![16, 16, 32, 64], 10)
            .with_bottleneck(BottleneckMode::Plain)
            .with_lastout(1);
        assert_eq!(config.stem_kind(), StemKind::SmallImage);

        let symbol = config.build().unwrap();
        assert!(symbol.graph.find("bn0").is_none());
        let shapes = symbol.infer_shapes([1, 3, 32, 32]).unwrap();
        let last = symbol.graph.find("stage3_unit1_relu").unwrap();
        assert_eq!(shapes.get(last), Some(&vec![1, 64, 8, 8]));
    }

    #[test]
    fn test_deterministic() {
        let config = tiny_config().with_bottleneck(BottleneckMode::InceptionResNet);
        let a = config.build().unwrap();
        let b = config.build().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_json().unwrap(), b.to_json().unwrap());
    }

    #[test]
    fn test_config_json() {
        let config = tiny_config()
            .with_task(TaskMode::Seg)
            .with_dilation_pattern(DilationPattern::Hourglass);
        let json = serde_json::to_string(&config).unwrap();
        let loaded: BackboneConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(loaded.units, config.units);
        assert_eq!(loaded.task, TaskMode::Seg);
        assert_eq!(loaded.dilation_pattern, DilationPattern::Hourglass);
        assert_eq!(
            loaded.build().unwrap(),
            config.build().unwrap()
        );
    }
}
