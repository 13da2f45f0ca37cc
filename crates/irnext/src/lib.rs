#![warn(missing_docs)]
//!# irnext - Symbolic `IrNext` Graphs
//!
//! Builders that declare ResNeXt / Inception-ResNet backbones into a
//! symbolic operator graph; nothing here executes a tensor.
//!
//! ## Notable Components
//!
//! * [`graph`] - the append-only operator graph.
//!   * [`graph::ops`] - operator descriptors.
//!   * [`graph::shape`] - static shape inference.
//!   * [`graph::export`] - JSON graph documents.
//! * [`models`] - complete model families.
//!   * [`models::irnext`] - `IrNext` backbones and the DeepLab head.
//! * [`prefab`] - named, well-known configurations.
//! * [`errors`] - the construction error taxonomy.

/// Test-only macro import.
#[cfg(test)]
#[allow(unused_imports)]
#[macro_use]
extern crate hamcrest;

pub mod errors;
pub mod graph;
pub mod models;
pub mod prefab;
