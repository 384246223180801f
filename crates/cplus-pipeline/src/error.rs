//! Error types for stages and the processing engine.

use std::error::Error;
use std::fmt::Write as _;

use crate::state::AnalysisState;
use crate::types::{Crs, LayerPath, LayerType};

/// Errors raised by a [`ProcessingEngine`](crate::engine::ProcessingEngine)
/// primitive.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    /// No layer is registered under this path.
    #[error("layer not found: {0}")]
    LayerNotFound(LayerPath),

    /// The layer exists but is of the wrong kind.
    #[error("layer {path} is not a {expected} layer")]
    WrongLayerKind {
        /// The offending layer.
        path: LayerPath,
        /// What the operation needed.
        expected: LayerType,
    },

    /// An algebra expression names a layer stem that is not among the
    /// request's input layers.
    #[error("expression references unknown layer `{0}`")]
    UnresolvedReference(String),

    /// A raster grid could not be constructed.
    #[error("invalid raster grid: {0}")]
    InvalidGrid(String),

    /// The engine cannot perform the requested operation.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// An aggregation was called with no input layers.
    #[error("no input layers supplied to {0}")]
    NoInputs(&'static str),

    /// Statistics were requested for a band with no valid pixels.
    #[error("layer {0} has no valid pixels")]
    NoValidPixels(LayerPath),
}

/// Errors that end a pipeline stage, or that a lenient stage logs and
/// skips past.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    /// The analysis inputs are inconsistent (no activities, an activity
    /// without any source raster, ...).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A referenced layer is absent or not readable.
    #[error("missing layer {path}: {context}")]
    MissingLayer {
        /// The layer that could not be used.
        path: LayerPath,
        /// What the layer was needed for.
        context: String,
    },

    /// A mask layer does not contain polygons.
    #[error("mask layer {path} is not a polygon layer")]
    GeometryType {
        /// The offending mask layer.
        path: LayerPath,
    },

    /// Two layers that must share a CRS do not.
    #[error("CRS mismatch: expected {expected}, found {found}")]
    CrsMismatch {
        /// CRS of the layer being masked or the analysis extent.
        expected: Crs,
        /// CRS of the mask layer.
        found: Crs,
    },

    /// Two layers that must overlap do not.
    #[error("extents do not overlap: {0}")]
    ExtentDisjoint(String),

    /// An engine primitive failed.
    #[error("{operation} failed")]
    Engine {
        /// The primitive that was invoked.
        operation: &'static str,
        /// The engine's error.
        #[source]
        source: EngineError,
    },

    /// A numeric step is undefined for the input (e.g. a constant band
    /// during normalization).
    #[error("computation error: {0}")]
    Computation(String),

    /// The orchestrator attempted a transition its state machine forbids.
    #[error("illegal state transition {from:?} -> {to:?}")]
    InvalidTransition {
        /// State the pipeline was in.
        from: AnalysisState,
        /// State that was requested.
        to: AnalysisState,
    },

    /// The cancellation token was observed.
    #[error("processing has been cancelled by the user")]
    Cancelled,
}

impl StageError {
    /// Whether this is a masking precondition failure, which internal
    /// masking treats as a per-activity skip.
    #[must_use]
    pub const fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::MissingLayer { .. }
                | Self::GeometryType { .. }
                | Self::CrsMismatch { .. }
                | Self::ExtentDisjoint(_)
        )
    }

    /// Whether this error is a user cancellation rather than a failure.
    #[must_use]
    pub const fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Render an error followed by each of its sources, one per line.
#[must_use]
pub fn error_chain(err: &dyn Error) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let _ = write!(out, "\n  caused by: {cause}");
        source = cause.source();
    }
    out
}
