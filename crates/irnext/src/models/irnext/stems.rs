//! # Input Prelude and Stems
//!
//! Every backbone starts with the same prelude:
//! ```text,ignore
//!   data -> id | cast(float16) -> bn_data (fix_gamma)
//! ```
//!
//! followed by one of two stems, chosen by the nominal input resolution
//! (``32 * lastout``):
//!
//! * [`StemKind::SmallImage`], for inputs of at most 32 pixels:
//!   a single ``conv0`` 3x3/1.
//! * [`StemKind::ImageNet`]: ``conv0`` 7x7/2, ``bn0``, ``relu0``, then a
//!   3x3/2 max pool.

use crate::graph::ops::{BatchNormOp, ConvolutionOp, PoolKind, PoolingOp, Precision};
use crate::graph::{NodeId, SymbolGraph};
use burn::config::Config;
use serde::{Deserialize, Serialize};

/// Largest nominal input resolution handled by the small-image stem.
pub const SMALL_IMAGE_MAX_RESOLUTION: usize = 32;

/// Name of the fed image variable.
pub const DATA_NAME: &str = "data";

/// Stem variant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StemKind {
    /// CIFAR-style; one stride-1 3x3 convolution.
    SmallImage,

    /// ImageNet-style; stride 4 overall.
    #[default]
    ImageNet,
}

impl StemKind {
    /// Select the stem for a nominal input resolution.
    pub fn for_resolution(resolution: usize) -> Self {
        if resolution <= SMALL_IMAGE_MAX_RESOLUTION {
            Self::SmallImage
        } else {
            Self::ImageNet
        }
    }

    /// Select the stem for a final feature map size; the nominal input
    /// resolution is ``32 * lastout``.
    pub fn for_lastout(lastout: usize) -> Self {
        Self::for_resolution(32 * lastout)
    }
}

/// Attach the normalizing prelude to an existing ``data`` variable.
pub fn attach_prelude(
    graph: &mut SymbolGraph,
    data: NodeId,
    precision: Precision,
    bn_mom: f64,
) -> NodeId {
    let body = match precision {
        Precision::Float32 => graph.identity("id", data),
        Precision::Float16 => graph.cast(data, Precision::Float16),
    };
    graph.batch_norm(
        "bn_data",
        body,
        BatchNormOp::new(bn_mom).with_fix_gamma(true),
    )
}

/// Stem configuration.
#[derive(Config, Debug)]
pub struct StemConfig {
    /// Output channels of ``conv0``.
    pub width: usize,

    /// Stem variant.
    #[config(default = "StemKind::ImageNet")]
    pub kind: StemKind,

    /// Batch-norm momentum.
    #[config(default = "0.9")]
    pub bn_mom: f64,

    /// Convolution workspace hint.
    #[config(default = 256)]
    pub workspace: usize,
}

impl StemConfig {
    /// Declare the stem, reading `data`.
    pub fn build(
        &self,
        graph: &mut SymbolGraph,
        data: NodeId,
    ) -> NodeId {
        match self.kind {
            StemKind::SmallImage => {
                let conv = ConvolutionOp::new(self.width, 3)
                    .with_pad(1)
                    .with_workspace(self.workspace);
                graph.convolution("conv0", data, conv)
            }
            StemKind::ImageNet => {
                let conv = ConvolutionOp::new(self.width, 7)
                    .with_stride([2, 2])
                    .with_pad(3)
                    .with_workspace(self.workspace);
                let body = graph.convolution("conv0", data, conv);
                let body = graph.batch_norm("bn0", body, BatchNormOp::new(self.bn_mom));
                let body = graph.relu("relu0", body);
                graph.pooling(
                    None,
                    body,
                    PoolingOp {
                        kind: PoolKind::Max,
                        kernel: [3, 3],
                        stride: [2, 2],
                        pad: [1, 1],
                        global: false,
                    },
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Symbol;
    use crate::graph::ops::Op;

    fn build_prelude(
        graph: &mut SymbolGraph,
        precision: Precision,
    ) -> (NodeId, NodeId) {
        let data = graph.input(DATA_NAME);
        let body = attach_prelude(graph, data, precision, 0.9);
        (data, body)
    }

    #[test]
    fn test_stem_selection() {
        assert_eq!(StemKind::for_lastout(1), StemKind::SmallImage);
        assert_eq!(StemKind::for_lastout(7), StemKind::ImageNet);
        assert_eq!(StemKind::for_resolution(32), StemKind::SmallImage);
        assert_eq!(StemKind::for_resolution(33), StemKind::ImageNet);
    }

    #[test]
    fn test_prelude_float32() {
        let mut graph = SymbolGraph::new();
        let (data, body) = build_prelude(&mut graph, Precision::Float32);

        assert_eq!(graph.node(data).name, "data");
        let names: Vec<&str> = graph.nodes().iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["data", "id", "bn_data"]);
        match &graph.node(body).op {
            Op::BatchNorm(bn) => {
                assert!(bn.fix_gamma);
                assert_eq!(bn.eps, 2e-5);
            }
            op => panic!("unexpected op {op:?}"),
        }
    }

    #[test]
    fn test_prelude_float16() {
        let mut graph = SymbolGraph::new();
        let (data, _) = build_prelude(&mut graph, Precision::Float16);

        let names: Vec<&str> = graph.nodes().iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["data", "cast0", "bn_data"]);
        let cast = graph.find("cast0").unwrap();
        assert_eq!(graph.node(cast).inputs, vec![data]);
        assert!(matches!(
            graph.node(cast).op,
            Op::Cast {
                dtype: Precision::Float16
            }
        ));
    }

    #[test]
    fn test_small_image_stem() {
        let mut graph = SymbolGraph::new();
        let (_, body) = build_prelude(&mut graph, Precision::Float32);
        let out = StemConfig::new(16)
            .with_kind(StemKind::SmallImage)
            .build(&mut graph, body);
        let symbol = Symbol::new(graph, out);

        assert_eq!(symbol.output_node().name, "conv0");
        assert_eq!(
            symbol.output_shape([1, 3, 32, 32]).unwrap(),
            vec![1, 16, 32, 32]
        );
    }

    #[test]
    fn test_imagenet_stem() {
        let mut graph = SymbolGraph::new();
        let (_, body) = build_prelude(&mut graph, Precision::Float32);
        let out = StemConfig::new(64).build(&mut graph, body);
        let symbol = Symbol::new(graph, out);

        let names: Vec<&str> = symbol
            .graph
            .nodes()
            .iter()
            .map(|n| n.name.as_str())
            .collect();
        assert_eq!(
            names,
            vec!["data", "id", "bn_data", "conv0", "bn0", "relu0", "pooling0"]
        );
        assert_eq!(
            symbol.output_shape([1, 3, 224, 224]).unwrap(),
            vec![1, 64, 56, 56]
        );
    }
}
