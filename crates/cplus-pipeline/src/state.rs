//! Orchestrator state machine.
//!
//! ```text
//! Pending → Aligning → [Snapping] → Weighting → BuildingActivities
//!   → [ExternalMasking] → InternalMasking → [Sieving] → [Normalizing]
//!   → Cleaning → Reducing → Succeeded
//! ```
//!
//! Bracketed states are entered only when their stage is enabled.
//! Every non-terminal state may also move to `Cancelled` or `Failed`.
//! Terminal states have no outgoing transitions: a new task must be
//! built to run again.

use serde::{Deserialize, Serialize};

use crate::error::StageError;

/// Where a scenario analysis task is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnalysisState {
    /// Constructed, not yet started.
    Pending,
    /// Snapping the area of interest to the reference pixel grid.
    Aligning,
    /// Resampling pathways and priority layers onto the reference grid.
    Snapping,
    /// Combining pathways with their priority weighting layers.
    Weighting,
    /// Summing pathways into activity rasters.
    BuildingActivities,
    /// Clipping activities with the scenario-wide masks.
    ExternalMasking,
    /// Clipping activities with their own masks.
    InternalMasking,
    /// Removing small patches.
    Sieving,
    /// Rescaling activities to a common range.
    Normalizing,
    /// Folding zero pixels into nodata.
    Cleaning,
    /// Ranking activities per pixel.
    Reducing,
    /// Finished with a result.
    Succeeded,
    /// Stopped by the cancellation token.
    Cancelled,
    /// Stopped by an error.
    Failed,
}

impl AnalysisState {
    /// Whether no further transitions are possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Cancelled | Self::Failed)
    }
}

/// States reachable from `from` in one step.
#[must_use]
pub fn allowed_transitions(from: AnalysisState) -> Vec<AnalysisState> {
    use AnalysisState::{
        Aligning, BuildingActivities, Cancelled, Cleaning, ExternalMasking, Failed,
        InternalMasking, Normalizing, Pending, Reducing, Sieving, Snapping, Succeeded, Weighting,
    };
    let mut next = match from {
        Pending => vec![Aligning],
        Aligning => vec![Snapping, Weighting],
        Snapping => vec![Weighting],
        Weighting => vec![BuildingActivities],
        BuildingActivities => vec![ExternalMasking, InternalMasking],
        ExternalMasking => vec![InternalMasking],
        InternalMasking => vec![Sieving, Normalizing, Cleaning],
        Sieving => vec![Normalizing, Cleaning],
        Normalizing => vec![Cleaning],
        Cleaning => vec![Reducing],
        Reducing => vec![Succeeded],
        Succeeded | Cancelled | Failed => return Vec::new(),
    };
    next.extend([Cancelled, Failed]);
    next
}

/// Check that `from -> to` is a legal transition.
///
/// # Errors
///
/// Returns [`StageError::InvalidTransition`] when it is not.
pub fn validate_transition(from: AnalysisState, to: AnalysisState) -> Result<(), StageError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(StageError::InvalidTransition { from, to })
    }
}
