//! # Graph Construction Errors
//!
//! Every failure is fatal to the construction call that raised it;
//! no partial [`crate::graph::Symbol`] is ever returned.

use thiserror::Error;

/// Errors raised while resolving configurations or assembling graphs.
#[derive(Debug, Error)]
pub enum IrNextError {
    /// A configuration names a feature that has no implementation.
    #[error("unimplemented feature: {feature}")]
    UnimplementedFeature {
        /// The feature that was requested.
        feature: String,
    },

    /// A value falls outside a closed enumeration.
    #[error("unrecognized {field}: {value}")]
    UnrecognizedConfiguration {
        /// The configuration field.
        field: &'static str,

        /// The offending value.
        value: String,
    },

    /// Stage counts, filter lists and unit lists disagree.
    #[error("structural mismatch: {reason}")]
    StructuralMismatch {
        /// Description of the disagreement.
        reason: String,
    },

    /// Static shape inference failed at a node.
    #[error("shape inference failed at '{node}': {reason}")]
    ShapeInference {
        /// The node name.
        node: String,

        /// Description of the failure.
        reason: String,
    },

    /// Graph document (de)serialization failure.
    #[error("graph serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl IrNextError {
    /// Build an [`IrNextError::UnrecognizedConfiguration`].
    pub fn unrecognized<V: ToString>(
        field: &'static str,
        value: V,
    ) -> Self {
        Self::UnrecognizedConfiguration {
            field,
            value: value.to_string(),
        }
    }

    /// Build an [`IrNextError::StructuralMismatch`].
    pub fn mismatch<S: Into<String>>(reason: S) -> Self {
        Self::StructuralMismatch {
            reason: reason.into(),
        }
    }
}

/// Result alias for graph construction.
pub type Result<T> = std::result::Result<T, IrNextError>;
