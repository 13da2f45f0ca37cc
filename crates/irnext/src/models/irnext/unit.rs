//! # Residual Units
//!
//! A unit is one residual block, declared into a [`SymbolGraph`] from an
//! input node. [`UnitConfig`] implements [`Config`], and provides
//! [`UnitConfig::build`] which dispatches on [`BottleneckMode`]:
//!
//! * [`BottleneckMode::Plain`]: ``conv3x3 - conv3x3``.
//! * [`BottleneckMode::ResNeXt`]: ``conv1x1 - grouped conv3x3 - conv1x1``.
//! * [`BottleneckMode::InceptionResNet`]:
//!   ``conv1x1 - [conv3x3 ; conv3x3 - conv3x3] - conv1x1``.
//! * [`BottleneckMode::DualPath`]: not implemented; always an error.
//!
//! Every operator is named ``{name}_{suffix}``; pretrained weights are
//! matched on these names, so suffixes must never change.
//!
//! Channel widths use truncating division,
//! ``int(num_filter / expansion)``; with the default expansion of `0.5`
//! the inner width is twice the output width.

use crate::errors::{IrNextError, Result as IrResult};
use crate::graph::ops::{BatchNormOp, ConvolutionOp, DeformableConvolutionOp};
use crate::graph::shape::conv_output_size;
use crate::graph::{MIRROR_STAGE_HINT, NodeId, SymbolGraph};
use burn::config::Config;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Block style of a residual unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BottleneckMode {
    /// Two 3x3 convolutions.
    Plain,

    /// 1x1 reduce, grouped 3x3, 1x1 expand.
    #[default]
    ResNeXt,

    /// Two-branch inception block with grouped 3x3 convolutions.
    InceptionResNet,

    /// Dual path (DenseNet + ResNeXt) block; unimplemented.
    DualPath,
}

impl BottleneckMode {
    /// Every mode, by numeric code.
    pub const ALL: [BottleneckMode; 4] = [
        Self::Plain,
        Self::ResNeXt,
        Self::InceptionResNet,
        Self::DualPath,
    ];

    /// Numeric code of the mode.
    pub fn code(&self) -> i64 {
        match self {
            Self::Plain => 0,
            Self::ResNeXt => 1,
            Self::InceptionResNet => 2,
            Self::DualPath => 3,
        }
    }

    /// Canonical name of the mode.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::ResNeXt => "resnext",
            Self::InceptionResNet => "inception_resnet",
            Self::DualPath => "dual_path",
        }
    }
}

impl TryFrom<i64> for BottleneckMode {
    type Error = IrNextError;

    fn try_from(code: i64) -> IrResult<Self> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.code() == code)
            .ok_or_else(|| IrNextError::unrecognized("bottleneck mode", code))
    }
}

impl FromStr for BottleneckMode {
    type Err = IrNextError;

    fn from_str(s: &str) -> IrResult<Self> {
        if let Ok(code) = s.trim().parse::<i64>() {
            return Self::try_from(code);
        }
        match s.trim().to_ascii_lowercase().as_str() {
            "plain" | "basic" => Ok(Self::Plain),
            "resnext" => Ok(Self::ResNeXt),
            "inception_resnet" | "irb" => Ok(Self::InceptionResNet),
            "dual_path" | "dpn" => Ok(Self::DualPath),
            _ => Err(IrNextError::unrecognized("bottleneck mode", s)),
        }
    }
}

impl Display for BottleneckMode {
    fn fmt(
        &self,
        f: &mut Formatter<'_>,
    ) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// [`UnitConfig::build`] as a free function.
pub fn build_unit(
    graph: &mut SymbolGraph,
    data: NodeId,
    config: &UnitConfig,
) -> IrResult<NodeId> {
    config.build(graph, data)
}

/// Residual unit configuration.
#[derive(Config, Debug)]
pub struct UnitConfig {
    /// Base name of the unit's operators, e.g. ``stage2_unit1``.
    pub name: String,

    /// Output channels.
    pub num_filter: usize,

    /// Stride of the strided 3x3 convolutions and the projection shortcut.
    #[config(default = "[1, 1]")]
    pub stride: [usize; 2],

    /// When set the input is the shortcut; otherwise a 1x1 projection is built.
    #[config(default = false)]
    pub dim_match: bool,

    /// Block style.
    #[config(default = "BottleneckMode::ResNeXt")]
    pub bottleneck: BottleneckMode,

    /// Inner width divisor; ``width = int(num_filter / expansion)``.
    #[config(default = "0.5")]
    pub expansion: f64,

    /// Groups of the 3x3 convolutions (plain units are ungrouped).
    #[config(default = 32)]
    pub num_group: usize,

    /// Dilation (and padding) of the 3x3 convolutions.
    #[config(default = 1)]
    pub dilation: usize,

    /// Inception-ResNet: sum the normalized, un-activated projection.
    #[config(default = false)]
    pub pre_activation: bool,

    /// Deformable offset groups of the primary 3x3 convolution; `0` disables.
    #[config(default = 0)]
    pub deform: usize,

    /// Name of the deformable offset branch; defaults to ``{name}_offset``.
    #[config(default = "None")]
    pub offset_name: Option<String>,

    /// Batch-norm momentum.
    #[config(default = "0.9")]
    pub bn_mom: f64,

    /// Convolution workspace hint.
    #[config(default = 256)]
    pub workspace: usize,

    /// Mark the shortcut for recomputation.
    #[config(default = false)]
    pub memonger: bool,
}

impl UnitConfig {
    /// Inner width of the bottleneck, ``int(num_filter / expansion)``.
    pub fn reduced_planes(&self) -> usize {
        (self.num_filter as f64 / self.expansion) as usize
    }

    /// Width of the inception second branch, ``int(num_filter / expansion / 2)``.
    pub fn half_planes(&self) -> usize {
        (self.num_filter as f64 / self.expansion / 2.0) as usize
    }

    /// Name of the deformable offset branch.
    pub fn offset_name(&self) -> String {
        self.offset_name
            .clone()
            .unwrap_or_else(|| format!("{}_offset", self.name))
    }

    /// Get the output resolution for a given input resolution.
    ///
    /// # Returns
    ///
    /// ``Some([out_height, out_width])``, or `None` if the input is too small.
    pub fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> Option<[usize; 2]> {
        let h = conv_output_size(
            input_resolution[0],
            3,
            self.stride[0],
            self.dilation,
            self.dilation,
        )?;
        let w = conv_output_size(
            input_resolution[1],
            3,
            self.stride[1],
            self.dilation,
            self.dilation,
        )?;
        Some([h, w])
    }

    /// Declare the unit into `graph`, reading `data`.
    ///
    /// # Returns
    ///
    /// The unit's final activation node.
    ///
    /// # Errors
    ///
    /// [`IrNextError::UnimplementedFeature`] for [`BottleneckMode::DualPath`];
    /// nothing is declared in that case.
    pub fn build(
        &self,
        graph: &mut SymbolGraph,
        data: NodeId,
    ) -> IrResult<NodeId> {
        tracing::debug!(unit = %self.name, mode = %self.bottleneck, "building unit");
        match self.bottleneck {
            BottleneckMode::Plain => Ok(self.build_plain(graph, data)),
            BottleneckMode::ResNeXt => Ok(self.build_resnext(graph, data)),
            BottleneckMode::InceptionResNet => Ok(self.build_inception_resnet(graph, data)),
            BottleneckMode::DualPath => Err(IrNextError::UnimplementedFeature {
                feature: format!("dual path bottleneck unit ({})", self.name),
            }),
        }
    }

    fn build_plain(
        &self,
        graph: &mut SymbolGraph,
        data: NodeId,
    ) -> NodeId {
        let conv1 = self.conv3x3(graph, "conv1", data, self.num_filter, self.stride, 1, true);
        let bn1 = self.bn(graph, "bn1", conv1);
        let act1 = self.relu(graph, "relu1", bn1);

        let conv2 = self.conv3x3(graph, "conv2", act1, self.num_filter, [1, 1], 1, false);
        let bn2 = self.bn(graph, "bn2", conv2);

        let shortcut = self.shortcut(graph, data);
        self.merge(graph, bn2, shortcut)
    }

    fn build_resnext(
        &self,
        graph: &mut SymbolGraph,
        data: NodeId,
    ) -> NodeId {
        let width = self.reduced_planes();

        let conv1 = self.conv1x1(graph, "conv1", data, width, [1, 1]);
        let bn1 = self.bn(graph, "bn1", conv1);
        let act1 = self.relu(graph, "relu1", bn1);

        let conv2 = self.conv3x3(
            graph,
            "conv2",
            act1,
            width,
            self.stride,
            self.num_group,
            true,
        );
        let bn2 = self.bn(graph, "bn2", conv2);
        let act2 = self.relu(graph, "relu2", bn2);

        let conv3 = self.conv1x1(graph, "conv3", act2, self.num_filter, [1, 1]);
        let bn3 = self.bn(graph, "bn3", conv3);

        let shortcut = self.shortcut(graph, data);
        self.merge(graph, bn3, shortcut)
    }

    fn build_inception_resnet(
        &self,
        graph: &mut SymbolGraph,
        data: NodeId,
    ) -> NodeId {
        let width = self.reduced_planes();
        let half = self.half_planes();

        // Branch A.
        let conv11 = self.conv1x1(graph, "conv11", data, width, [1, 1]);
        let bn11 = self.bn(graph, "bn11", conv11);
        let act11 = self.relu(graph, "relu11", bn11);
        let conv12 = self.conv3x3(
            graph,
            "conv12",
            act11,
            width,
            self.stride,
            self.num_group,
            true,
        );

        // Branch B; both branches stride at their first 3x3.
        let conv21 = self.conv1x1(graph, "conv21", data, half, [1, 1]);
        let bn21 = self.bn(graph, "bn21", conv21);
        let act21 = self.relu(graph, "relu21", bn21);
        let conv22 = self.conv3x3(
            graph,
            "conv22",
            act21,
            half,
            self.stride,
            self.num_group,
            false,
        );
        let bn22 = self.bn(graph, "bn22", conv22);
        let act22 = self.relu(graph, "relu22", bn22);
        let conv23 = self.conv3x3(graph, "conv23", act22, half, [1, 1], self.num_group, false);

        let cat = graph.concat(&[conv12, conv23]);
        let bn30 = self.bn(graph, "bn30", cat);
        let act30 = self.relu(graph, "relu30", bn30);

        let conv31 = self.conv1x1(graph, "conv31", act30, self.num_filter, [1, 1]);
        let bn31 = self.bn(graph, "bn31", conv31);
        let residual = if self.pre_activation {
            bn31
        } else {
            self.relu(graph, "relu31", bn31)
        };

        let shortcut = self.shortcut(graph, data);
        self.merge(graph, residual, shortcut)
    }

    fn node_name(
        &self,
        suffix: &str,
    ) -> String {
        format!("{}_{}", self.name, suffix)
    }

    fn bn(
        &self,
        graph: &mut SymbolGraph,
        suffix: &str,
        data: NodeId,
    ) -> NodeId {
        graph.batch_norm(self.node_name(suffix), data, BatchNormOp::new(self.bn_mom))
    }

    fn relu(
        &self,
        graph: &mut SymbolGraph,
        suffix: &str,
        data: NodeId,
    ) -> NodeId {
        graph.relu(self.node_name(suffix), data)
    }

    fn conv1x1(
        &self,
        graph: &mut SymbolGraph,
        suffix: &str,
        data: NodeId,
        num_filter: usize,
        stride: [usize; 2],
    ) -> NodeId {
        let conv = ConvolutionOp::new(num_filter, 1)
            .with_stride(stride)
            .with_workspace(self.workspace);
        graph.convolution(self.node_name(suffix), data, conv)
    }

    /// Dilated 3x3; `padding = dilation` keeps the resolution at stride 1.
    #[allow(clippy::too_many_arguments)]
    fn conv3x3(
        &self,
        graph: &mut SymbolGraph,
        suffix: &str,
        data: NodeId,
        num_filter: usize,
        stride: [usize; 2],
        num_group: usize,
        primary: bool,
    ) -> NodeId {
        let conv = ConvolutionOp::new(num_filter, 3)
            .with_stride(stride)
            .with_pad(self.dilation)
            .with_dilate(self.dilation)
            .with_num_group(num_group)
            .with_workspace(self.workspace);

        if !primary || self.deform == 0 {
            return graph.convolution(self.node_name(suffix), data, conv);
        }

        let deform = DeformableConvolutionOp {
            conv,
            num_deformable_group: self.deform,
        };
        let offset_conv = ConvolutionOp::new(deform.offset_channels(), 3)
            .with_stride(stride)
            .with_pad(self.dilation)
            .with_dilate(self.dilation)
            .with_bias(true)
            .with_workspace(self.workspace);
        let offset = graph.convolution(self.offset_name(), data, offset_conv);
        graph.deformable_convolution(self.node_name(suffix), data, offset, deform)
    }

    fn shortcut(
        &self,
        graph: &mut SymbolGraph,
        data: NodeId,
    ) -> NodeId {
        let shortcut = if self.dim_match {
            data
        } else {
            let sc = self.conv1x1(graph, "sc", data, self.num_filter, self.stride);
            self.bn(graph, "sc_bn", sc)
        };
        if self.memonger {
            graph.set_hint(shortcut, MIRROR_STAGE_HINT, "True");
        }
        shortcut
    }

    fn merge(
        &self,
        graph: &mut SymbolGraph,
        residual: NodeId,
        shortcut: NodeId,
    ) -> NodeId {
        let sum = graph.add(residual, shortcut);
        self.relu(graph, "relu", sum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Symbol;
    use crate::graph::ops::Op;
    use hamcrest::prelude::*;

    fn build_symbol(config: &UnitConfig) -> (Symbol, NodeId) {
        let mut graph = SymbolGraph::new();
        let data = graph.input("data");
        let out = config.build(&mut graph, data).unwrap();
        (Symbol::new(graph, out), data)
    }

    fn conv_of<'a>(
        symbol: &'a Symbol,
        name: &str,
    ) -> &'a ConvolutionOp {
        let id = symbol
            .graph
            .find(name)
            .unwrap_or_else(|| panic!("no node {name}"));
        match &symbol.graph.node(id).op {
            Op::Convolution(conv) => conv,
            Op::DeformableConvolution(deform) => &deform.conv,
            op => panic!("{name} is {op:?}"),
        }
    }

    fn names(symbol: &Symbol) -> Vec<String> {
        symbol
            .graph
            .nodes()
            .iter()
            .map(|n| n.name.clone())
            .collect()
    }

    #[test]
    fn test_bottleneck_mode_parse() {
        assert_eq!("0".parse::<BottleneckMode>().unwrap(), BottleneckMode::Plain);
        assert_eq!("1".parse::<BottleneckMode>().unwrap(), BottleneckMode::ResNeXt);
        assert_eq!(
            "2".parse::<BottleneckMode>().unwrap(),
            BottleneckMode::InceptionResNet
        );
        assert_eq!("3".parse::<BottleneckMode>().unwrap(), BottleneckMode::DualPath);
        assert_eq!(
            "ResNeXt".parse::<BottleneckMode>().unwrap(),
            BottleneckMode::ResNeXt
        );
        assert!(matches!(
            "4".parse::<BottleneckMode>(),
            Err(IrNextError::UnrecognizedConfiguration { .. })
        ));
        assert!(BottleneckMode::try_from(-1).is_err());
        for mode in BottleneckMode::ALL {
            assert_eq!(mode.name().parse::<BottleneckMode>().unwrap(), mode);
        }
    }

    #[test]
    fn test_channel_truncation() {
        let config = UnitConfig::new("u".to_string(), 256);
        assert_eq!(config.reduced_planes(), 512);
        assert_eq!(config.half_planes(), 256);

        let config = config.with_expansion(3.0);
        assert_eq!(config.reduced_planes(), 85);
        assert_eq!(config.half_planes(), 42);

        let config = UnitConfig::new("u".to_string(), 100).with_expansion(4.0);
        assert_eq!(config.reduced_planes(), 25);
        assert_eq!(config.half_planes(), 12);
    }

    #[test]
    fn test_output_resolution() {
        let config = UnitConfig::new("u".to_string(), 64);
        assert_eq!(config.output_resolution([56, 56]), Some([56, 56]));

        let config = config.with_stride([2, 2]);
        assert_eq!(config.output_resolution([56, 56]), Some([28, 28]));
        assert_eq!(config.output_resolution([7, 7]), Some([4, 4]));

        let config = UnitConfig::new("u".to_string(), 64).with_dilation(4);
        assert_eq!(config.output_resolution([28, 28]), Some([28, 28]));
    }

    #[test]
    fn test_resnext_identity_unit_preserves_shape() {
        let config = UnitConfig::new("stage1_unit2".to_string(), 64)
            .with_dim_match(true)
            .with_num_group(32);
        let (symbol, _) = build_symbol(&config);

        assert_eq!(
            symbol.output_shape([2, 64, 16, 16]).unwrap(),
            vec![2, 64, 16, 16]
        );
        assert_eq!(
            names(&symbol),
            vec![
                "data",
                "stage1_unit2_conv1",
                "stage1_unit2_bn1",
                "stage1_unit2_relu1",
                "stage1_unit2_conv2",
                "stage1_unit2_bn2",
                "stage1_unit2_relu2",
                "stage1_unit2_conv3",
                "stage1_unit2_bn3",
                "plus0",
                "stage1_unit2_relu",
            ]
        );

        let conv2 = conv_of(&symbol, "stage1_unit2_conv2");
        assert_eq!(conv2.num_filter, 128);
        assert_eq!(conv2.num_group, 32);
        assert_eq!(conv2.stride, [1, 1]);
        assert!(symbol.graph.find("stage1_unit2_sc").is_none());
    }

    #[test]
    fn test_resnext_dilated_keeps_resolution() {
        let config = UnitConfig::new("u".to_string(), 64)
            .with_dim_match(true)
            .with_dilation(2);
        let (symbol, _) = build_symbol(&config);

        let conv2 = conv_of(&symbol, "u_conv2");
        assert_eq!(conv2.pad, [2, 2]);
        assert_eq!(conv2.dilate, [2, 2]);
        assert_eq!(
            symbol.output_shape([1, 64, 14, 14]).unwrap(),
            vec![1, 64, 14, 14]
        );
    }

    #[test]
    fn test_plain_projection_shortcut() {
        let config = UnitConfig::new("stage2_unit1".to_string(), 128)
            .with_bottleneck(BottleneckMode::Plain)
            .with_stride([2, 2]);
        let (symbol, _) = build_symbol(&config);

        let sc = conv_of(&symbol, "stage2_unit1_sc");
        assert_eq!(sc.stride, [2, 2]);
        assert_eq!(sc.num_filter, 128);
        assert_eq!(sc.kernel, [1, 1]);
        assert!(symbol.graph.find("stage2_unit1_sc_bn").is_some());

        let conv1 = conv_of(&symbol, "stage2_unit1_conv1");
        assert_eq!(conv1.stride, [2, 2]);
        assert_eq!(conv1.num_group, 1);
        let conv2 = conv_of(&symbol, "stage2_unit1_conv2");
        assert_eq!(conv2.stride, [1, 1]);

        assert_eq!(
            symbol.output_shape([1, 64, 32, 32]).unwrap(),
            vec![1, 128, 16, 16]
        );
        assert!(symbol.graph.find("stage2_unit1_relu2").is_none());
    }

    #[test]
    fn test_inception_resnet_branches() {
        let config = UnitConfig::new("irb".to_string(), 64)
            .with_bottleneck(BottleneckMode::InceptionResNet)
            .with_stride([2, 2])
            .with_num_group(4);
        let (symbol, _) = build_symbol(&config);

        assert_eq!(conv_of(&symbol, "irb_conv11").num_filter, 128);
        assert_eq!(conv_of(&symbol, "irb_conv12").stride, [2, 2]);
        assert_eq!(conv_of(&symbol, "irb_conv21").num_filter, 64);
        assert_eq!(conv_of(&symbol, "irb_conv22").stride, [2, 2]);
        assert_eq!(conv_of(&symbol, "irb_conv23").stride, [1, 1]);
        assert_eq!(conv_of(&symbol, "irb_conv23").num_group, 4);

        let shapes = symbol.infer_shapes([1, 32, 16, 16]).unwrap();
        let cat = symbol.graph.find("concat0").unwrap();
        assert_eq!(shapes.get(cat), Some(&vec![1, 128 + 64, 8, 8]));
        assert_eq!(
            symbol.output_shape([1, 32, 16, 16]).unwrap(),
            vec![1, 64, 8, 8]
        );

        let relu31 = symbol.graph.find("irb_relu31").unwrap();
        let sum = symbol.graph.find("plus0").unwrap();
        assert_eq!(symbol.graph.node(sum).inputs[0], relu31);
    }

    #[test]
    fn test_inception_resnet_pre_activation() {
        let config = UnitConfig::new("irb".to_string(), 64)
            .with_bottleneck(BottleneckMode::InceptionResNet)
            .with_dim_match(true)
            .with_num_group(4)
            .with_pre_activation(true);
        let (symbol, data) = build_symbol(&config);

        let bn31 = symbol.graph.find("irb_bn31").unwrap();
        let sum = symbol.graph.find("plus0").unwrap();
        assert_eq!(symbol.graph.node(sum).inputs, vec![bn31, data]);
        assert!(symbol.graph.find("irb_relu31").is_none());
    }

    #[test]
    fn test_dual_path_is_unimplemented() {
        for dim_match in [false, true] {
            for stride in [[1, 1], [2, 2]] {
                let config = UnitConfig::new("dpn".to_string(), 64)
                    .with_bottleneck(BottleneckMode::DualPath)
                    .with_dim_match(dim_match)
                    .with_stride(stride);

                let mut graph = SymbolGraph::new();
                let data = graph.input("data");
                let result = build_unit(&mut graph, data, &config);

                assert!(matches!(
                    result,
                    Err(IrNextError::UnimplementedFeature { .. })
                ));
                assert_that!(graph.len(), equal_to(1));
            }
        }
    }

    #[test]
    fn test_deformable_primary_conv() {
        let config = UnitConfig::new("stage4_unit1".to_string(), 64)
            .with_stride([2, 2])
            .with_num_group(4)
            .with_deform(4)
            .with_offset_name(Some("res5a_branch2b_offset".to_string()));
        let (symbol, _) = build_symbol(&config);

        let offset = symbol.graph.find("res5a_branch2b_offset").unwrap();
        let conv2 = symbol.graph.find("stage4_unit1_conv2").unwrap();
        let node = symbol.graph.node(conv2);
        assert_eq!(node.inputs[1], offset);
        assert!(matches!(
            node.op,
            Op::DeformableConvolution(DeformableConvolutionOp {
                num_deformable_group: 4,
                ..
            })
        ));
        let offset_conv = conv_of(&symbol, "res5a_branch2b_offset");
        assert_eq!(offset_conv.num_filter, 72);
        assert_eq!(offset_conv.stride, [2, 2]);
        assert!(!offset_conv.no_bias);

        let params = symbol.parameter_names();
        for name in [
            "res5a_branch2b_offset_weight",
            "res5a_branch2b_offset_bias",
            "stage4_unit1_conv2_weight",
        ] {
            assert_that!(params.iter().any(|p| p == name), equal_to(true));
        }

        assert_eq!(
            symbol.output_shape([1, 32, 16, 16]).unwrap(),
            vec![1, 64, 8, 8]
        );
    }

    #[test]
    fn test_default_offset_name() {
        let config = UnitConfig::new("u".to_string(), 8)
            .with_bottleneck(BottleneckMode::Plain)
            .with_deform(1);
        assert_eq!(config.offset_name(), "u_offset");
        let (symbol, _) = build_symbol(&config);
        assert_eq!(conv_of(&symbol, "u_offset").num_filter, 18);
        assert!(matches!(
            symbol.graph.node(symbol.graph.find("u_conv1").unwrap()).op,
            Op::DeformableConvolution(_)
        ));
        assert!(matches!(
            symbol.graph.node(symbol.graph.find("u_conv2").unwrap()).op,
            Op::Convolution(_)
        ));
    }

    #[test]
    fn test_memonger_hint() {
        let config = UnitConfig::new("u".to_string(), 64)
            .with_memonger(true)
            .with_stride([2, 2]);
        let (symbol, _) = build_symbol(&config);

        let sc_bn = symbol.graph.find("u_sc_bn").unwrap();
        assert_eq!(
            symbol
                .graph
                .node(sc_bn)
                .hints
                .get(MIRROR_STAGE_HINT)
                .map(String::as_str),
            Some("True")
        );
    }

    #[test]
    fn test_workspace_passthrough() {
        let config = UnitConfig::new("u".to_string(), 64).with_workspace(1024);
        let (symbol, _) = build_symbol(&config);
        for name in ["u_conv1", "u_conv2", "u_conv3", "u_sc"] {
            assert_eq!(conv_of(&symbol, name).workspace, 1024, "{name}");
        }
    }

    #[test]
    fn test_deterministic() {
        let config = UnitConfig::new("u".to_string(), 64)
            .with_bottleneck(BottleneckMode::InceptionResNet)
            .with_num_group(8);
        let (a, _) = build_symbol(&config);
        let (b, _) = build_symbol(&config);
        assert_eq!(a, b);
    }
}
