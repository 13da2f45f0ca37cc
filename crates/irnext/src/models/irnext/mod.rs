//! # `IrNext`
//!
//! ResNeXt and Inception-ResNet backbones with DeepLab-style dilation,
//! deformable final stages, and classification or segmentation heads.
//!
//! Layered leaves first:
//!
//! * [`unit`] - one residual unit.
//! * [`stage`] - prelude, stem, stages and the classification head.
//! * [`prefabs`] - depth tables and named presets.
//! * [`deeplab`] - the segmentation head.

pub mod deeplab;
pub mod dilation;
pub mod prefabs;
pub mod stage;
pub mod stems;
pub mod unit;

pub use deeplab::DeepLabConfig;
pub use dilation::DilationPattern;
pub use prefabs::{IrNextConfig, PREFAB_IRNEXT_MAP, SegStrideMode, resolve_preset};
pub use stage::{BackboneConfig, StageSpec, TaskMode, build_backbone};
pub use unit::{BottleneckMode, UnitConfig, build_unit};
