//! Incremental pipeline: advance stage-by-stage, inspecting the activity
//! graph between stages.
//!
//! ```rust
//! # use cplus_pipeline::{AnalysisContext, Pipeline, StageError};
//! # use cplus_pipeline::memory::MemoryEngine;
//! # fn run(ctx: &mut AnalysisContext<MemoryEngine>) -> Result<(), StageError> {
//! let reduced = Pipeline::new(ctx.config())
//!     .align(ctx)?
//!     .snap(ctx)?
//!     .weight(ctx)?
//!     .build_activities(ctx)?
//!     .mask_external(ctx)?
//!     .mask_internal(ctx)?
//!     .sieve(ctx)?
//!     .clean(ctx)?
//!     .reduce(ctx)?;
//!
//! let result = reduced.into_result();
//! # Ok(())
//! # }
//! ```
//!
//! Each stage method consumes `self`, moves the orchestrator into the
//! matching [`AnalysisState`] and returns the next snapshot. Optional
//! stages (snapping, external masking, sieving, normalization) still
//! produce their snapshot when disabled; the graph passes through
//! untouched and the state machine skips the matching state.
//!
//! Every stage boundary polls the context's cancellation token.

use crate::activity;
use crate::aoi;
use crate::clean;
use crate::config::TaskConfig;
use crate::context::AnalysisContext;
use crate::engine::ProcessingEngine;
use crate::error::StageError;
use crate::graph::ActivityGraph;
use crate::highest;
use crate::mask;
use crate::normalize;
use crate::sieving;
use crate::snap;
use crate::state::AnalysisState;
use crate::types::{AnalysisExtent, ScenarioResult};
use crate::weight;

// ───────────────────────── Stage 0: Pending ──────────────────────────

/// Pipeline state before any processing has occurred.
///
/// Holds the activity graph built from the scenario's activities. Call
/// [`align`](Self::align) to advance.
#[must_use = "pipeline stages are consumed by advancing; call .align() to continue"]
#[derive(Debug)]
pub struct Pending {
    graph: ActivityGraph,
}

impl Pending {
    /// The activity graph as configured.
    #[must_use]
    pub const fn graph(&self) -> &ActivityGraph {
        &self.graph
    }

    /// Resolve the analysis extent and advance to [`Aligned`].
    ///
    /// # Errors
    ///
    /// [`StageError::Cancelled`] or [`StageError::InvalidTransition`].
    pub fn align<E: ProcessingEngine>(
        self,
        ctx: &mut AnalysisContext<E>,
    ) -> Result<Aligned, StageError> {
        ctx.enter(AnalysisState::Aligning)?;
        let extent = aoi::resolve_analysis_extent(ctx, &self.graph);
        Ok(Aligned {
            graph: self.graph,
            extent,
        })
    }
}

// ───────────────────────── Stage 1: Aligned ──────────────────────────

/// Pipeline state once the analysis extent is known.
#[must_use = "pipeline stages are consumed by advancing; call .snap() to continue"]
#[derive(Debug)]
pub struct Aligned {
    graph: ActivityGraph,
    extent: AnalysisExtent,
}

impl Aligned {
    /// The activity graph.
    #[must_use]
    pub const fn graph(&self) -> &ActivityGraph {
        &self.graph
    }

    /// The snapped analysis extent.
    #[must_use]
    pub const fn extent(&self) -> &AnalysisExtent {
        &self.extent
    }

    /// Snap pathways and priority layers onto the reference grid when
    /// snapping is enabled and the reference layer exists.
    ///
    /// # Errors
    ///
    /// Errors from [`snap::snap_layers`].
    pub fn snap<E: ProcessingEngine>(
        self,
        ctx: &mut AnalysisContext<E>,
    ) -> Result<Snapped, StageError> {
        ctx.check_cancelled()?;
        let Some(reference) = ctx.reference_layer() else {
            return Ok(Snapped {
                graph: self.graph,
                extent: self.extent,
                applied: false,
            });
        };
        ctx.enter(AnalysisState::Snapping)?;
        let graph = snap::snap_layers(ctx, self.graph, &reference, &self.extent)?;
        Ok(Snapped {
            graph,
            extent: self.extent,
            applied: true,
        })
    }
}

// ───────────────────────── Stage 2: Snapped ──────────────────────────

/// Pipeline state after the optional snapping stage.
#[must_use = "pipeline stages are consumed by advancing; call .weight() to continue"]
#[derive(Debug)]
pub struct Snapped {
    graph: ActivityGraph,
    extent: AnalysisExtent,
    applied: bool,
}

impl Snapped {
    /// The activity graph.
    #[must_use]
    pub const fn graph(&self) -> &ActivityGraph {
        &self.graph
    }

    /// Whether snapping ran.
    #[must_use]
    pub const fn applied(&self) -> bool {
        self.applied
    }

    /// Weight pathways with their priority layers.
    ///
    /// # Errors
    ///
    /// Errors from [`weight::weight_pathways`].
    pub fn weight<E: ProcessingEngine>(
        self,
        ctx: &mut AnalysisContext<E>,
    ) -> Result<Weighted, StageError> {
        ctx.enter(AnalysisState::Weighting)?;
        let weighting = weight::weight_pathways(ctx, self.graph, &self.extent)?;
        Ok(Weighted {
            graph: weighting.graph,
            extent: self.extent,
            activities_built: weighting.activities_built,
        })
    }
}

// ───────────────────────── Stage 3: Weighted ─────────────────────────

/// Pipeline state after weighting.
#[must_use = "pipeline stages are consumed by advancing; call .build_activities() to continue"]
#[derive(Debug)]
pub struct Weighted {
    graph: ActivityGraph,
    extent: AnalysisExtent,
    activities_built: bool,
}

impl Weighted {
    /// The activity graph.
    #[must_use]
    pub const fn graph(&self) -> &ActivityGraph {
        &self.graph
    }

    /// Whether weighting already built the activity rasters because no
    /// activity had pathways.
    #[must_use]
    pub const fn activities_built(&self) -> bool {
        self.activities_built
    }

    /// Sum each activity's sources into one raster, unless weighting
    /// already did.
    ///
    /// # Errors
    ///
    /// Errors from [`activity::build_activities`].
    pub fn build_activities<E: ProcessingEngine>(
        self,
        ctx: &mut AnalysisContext<E>,
    ) -> Result<ActivitiesBuilt, StageError> {
        ctx.enter(AnalysisState::BuildingActivities)?;
        let graph = if self.activities_built {
            self.graph
        } else {
            activity::build_activities(ctx, self.graph, &self.extent)?
        };
        Ok(ActivitiesBuilt {
            graph,
            extent: self.extent,
        })
    }
}

// ───────────────────── Stage 4: ActivitiesBuilt ──────────────────────

/// Pipeline state once every activity has a raster.
#[must_use = "pipeline stages are consumed by advancing; call .mask_external() to continue"]
#[derive(Debug)]
pub struct ActivitiesBuilt {
    graph: ActivityGraph,
    extent: AnalysisExtent,
}

impl ActivitiesBuilt {
    /// The activity graph.
    #[must_use]
    pub const fn graph(&self) -> &ActivityGraph {
        &self.graph
    }

    /// Clip every activity with the scenario-wide masks, if any are
    /// configured.
    ///
    /// # Errors
    ///
    /// Errors from [`mask::mask_external`].
    pub fn mask_external<E: ProcessingEngine>(
        self,
        ctx: &mut AnalysisContext<E>,
    ) -> Result<ExternallyMasked, StageError> {
        ctx.check_cancelled()?;
        let masks = ctx.config().masking_layers().to_vec();
        let names: Vec<String> = masks.iter().map(ToString::to_string).collect();
        ctx.log(format!("Masking layers: {names:?}"));
        if masks.is_empty() {
            return Ok(ExternallyMasked {
                graph: self.graph,
                extent: self.extent,
                applied: false,
            });
        }
        ctx.enter(AnalysisState::ExternalMasking)?;
        let graph = mask::mask_external(ctx, self.graph, &self.extent, &masks)?;
        Ok(ExternallyMasked {
            graph,
            extent: self.extent,
            applied: true,
        })
    }
}

// ──────────────────── Stage 5: ExternallyMasked ──────────────────────

/// Pipeline state after the optional scenario-wide masking.
#[must_use = "pipeline stages are consumed by advancing; call .mask_internal() to continue"]
#[derive(Debug)]
pub struct ExternallyMasked {
    graph: ActivityGraph,
    extent: AnalysisExtent,
    applied: bool,
}

impl ExternallyMasked {
    /// The activity graph.
    #[must_use]
    pub const fn graph(&self) -> &ActivityGraph {
        &self.graph
    }

    /// Whether scenario-wide masks were applied.
    #[must_use]
    pub const fn applied(&self) -> bool {
        self.applied
    }

    /// Clip each activity with its own masks.
    ///
    /// # Errors
    ///
    /// Errors from [`mask::mask_internal`].
    pub fn mask_internal<E: ProcessingEngine>(
        self,
        ctx: &mut AnalysisContext<E>,
    ) -> Result<InternallyMasked, StageError> {
        ctx.enter(AnalysisState::InternalMasking)?;
        let graph = mask::mask_internal(ctx, self.graph, &self.extent)?;
        Ok(InternallyMasked {
            graph,
            extent: self.extent,
        })
    }
}

// ──────────────────── Stage 6: InternallyMasked ──────────────────────

/// Pipeline state after per-activity masking.
#[must_use = "pipeline stages are consumed by advancing; call .sieve() to continue"]
#[derive(Debug)]
pub struct InternallyMasked {
    graph: ActivityGraph,
    extent: AnalysisExtent,
}

impl InternallyMasked {
    /// The activity graph.
    #[must_use]
    pub const fn graph(&self) -> &ActivityGraph {
        &self.graph
    }

    /// Remove small patches when the sieve is enabled.
    ///
    /// # Errors
    ///
    /// Errors from [`sieving::sieve_activities`].
    pub fn sieve<E: ProcessingEngine>(
        self,
        ctx: &mut AnalysisContext<E>,
    ) -> Result<Sieved, StageError> {
        ctx.check_cancelled()?;
        if !ctx.config().settings.sieve.enabled {
            return Ok(Sieved {
                graph: self.graph,
                extent: self.extent,
                applied: false,
                normalized: false,
            });
        }
        ctx.enter(AnalysisState::Sieving)?;
        let graph = sieving::sieve_activities(ctx, self.graph)?;
        Ok(Sieved {
            graph,
            extent: self.extent,
            applied: true,
            normalized: false,
        })
    }
}

// ───────────────────────── Stage 7: Sieved ───────────────────────────

/// Pipeline state after the optional sieve.
///
/// [`clean`](Self::clean) normalizes first when normalization is
/// enabled; [`normalize`](Self::normalize) can be called explicitly to
/// inspect the normalized graph before cleaning.
#[must_use = "pipeline stages are consumed by advancing; call .clean() to continue"]
#[derive(Debug)]
pub struct Sieved {
    graph: ActivityGraph,
    extent: AnalysisExtent,
    applied: bool,
    normalized: bool,
}

impl Sieved {
    /// The activity graph.
    #[must_use]
    pub const fn graph(&self) -> &ActivityGraph {
        &self.graph
    }

    /// Whether the sieve ran.
    #[must_use]
    pub const fn applied(&self) -> bool {
        self.applied
    }

    /// Whether the activities have been normalized.
    #[must_use]
    pub const fn normalized(&self) -> bool {
        self.normalized
    }

    /// Rescale every activity to its own range. Does nothing if already
    /// normalized.
    ///
    /// # Errors
    ///
    /// Errors from [`normalize::normalize_activities`].
    pub fn normalize<E: ProcessingEngine>(
        self,
        ctx: &mut AnalysisContext<E>,
    ) -> Result<Self, StageError> {
        if self.normalized {
            return Ok(self);
        }
        ctx.enter(AnalysisState::Normalizing)?;
        let graph = normalize::normalize_activities(ctx, self.graph, &self.extent)?;
        Ok(Self {
            graph,
            extent: self.extent,
            applied: self.applied,
            normalized: true,
        })
    }

    /// Fold zero cells into nodata, normalizing first when enabled.
    ///
    /// # Errors
    ///
    /// Errors from [`normalize::normalize_activities`] or
    /// [`clean::clean_activities`].
    pub fn clean<E: ProcessingEngine>(
        self,
        ctx: &mut AnalysisContext<E>,
    ) -> Result<Cleaned, StageError> {
        let this = if ctx.config().settings.normalize_activities {
            self.normalize(ctx)?
        } else {
            self
        };
        ctx.enter(AnalysisState::Cleaning)?;
        let graph = clean::clean_activities(ctx, this.graph, &this.extent)?;
        Ok(Cleaned {
            graph,
            normalized: this.normalized,
        })
    }
}

// ───────────────────────── Stage 8: Cleaned ──────────────────────────

/// Pipeline state once every activity has been cleaned.
#[must_use = "pipeline stages are consumed by advancing; call .reduce() to continue"]
#[derive(Debug)]
pub struct Cleaned {
    graph: ActivityGraph,
    normalized: bool,
}

impl Cleaned {
    /// The activity graph.
    #[must_use]
    pub const fn graph(&self) -> &ActivityGraph {
        &self.graph
    }

    /// Whether normalization ran before cleaning.
    #[must_use]
    pub const fn normalized(&self) -> bool {
        self.normalized
    }

    /// Rank activities per pixel and assemble the scenario result.
    ///
    /// # Errors
    ///
    /// Errors from [`highest::highest_position`].
    pub fn reduce<E: ProcessingEngine>(
        self,
        ctx: &mut AnalysisContext<E>,
    ) -> Result<Reduced, StageError> {
        ctx.enter(AnalysisState::Reducing)?;
        let (graph, result) = highest::highest_position(ctx, self.graph)?;
        Ok(Reduced { graph, result })
    }
}

// ───────────────────────── Stage 9: Reduced ──────────────────────────

/// Final pipeline state holding the scenario result.
#[derive(Debug)]
pub struct Reduced {
    graph: ActivityGraph,
    result: ScenarioResult,
}

impl Reduced {
    /// The activity graph with renumbered style pixel values.
    #[must_use]
    pub const fn graph(&self) -> &ActivityGraph {
        &self.graph
    }

    /// The scenario result.
    #[must_use]
    pub const fn result(&self) -> &ScenarioResult {
        &self.result
    }

    /// Consume the pipeline and return the scenario result.
    #[must_use]
    pub fn into_result(self) -> ScenarioResult {
        self.result
    }
}

// ───────────────────────── Dynamic API ───────────────────────────────

/// Number of pipeline stages ([`Pending`] through [`Reduced`]).
pub const STAGE_COUNT: usize = 10;

/// Trait implemented by every pipeline stage, enabling uniform iteration.
///
/// Both the typed API (individual stage structs) and the dynamic API
/// ([`Stage`] enum) are available. Each stage struct implements this
/// trait, and [`Stage`] delegates to whichever variant it holds.
///
/// # Loop pattern
///
/// ```rust
/// # use cplus_pipeline::{AnalysisContext, Pipeline, StageError};
/// # use cplus_pipeline::memory::MemoryEngine;
/// # use cplus_pipeline::pipeline::{Advance, Stage};
/// # fn run(ctx: &mut AnalysisContext<MemoryEngine>) -> Result<(), StageError> {
/// let mut stage: Stage = Pipeline::new(ctx.config()).into();
/// loop {
///     match stage.advance(ctx)? {
///         Advance::Next(next) => stage = next,
///         Advance::Complete(done) => { stage = done; break; }
///     }
/// }
/// let result = stage.complete(ctx)?;
/// # Ok(())
/// # }
/// ```
pub trait PipelineStage: Sized {
    /// Short name of this stage (e.g. `"snap"`, `"sieve"`).
    const NAME: &str;

    /// Zero-based index of this stage (`0` for Pending through `9` for
    /// Reduced).
    const INDEX: usize;

    /// The activity graph as of this stage.
    fn graph(&self) -> &ActivityGraph;

    /// Whether the work that produced this stage actually ran. Optional
    /// stages that were disabled return `false`.
    fn applied(&self) -> bool {
        true
    }

    /// Advance to the next stage.
    ///
    /// Returns `Ok(Some(stage))` on success, `Ok(None)` if already at
    /// the final stage, or `Err` if the stage fails.
    ///
    /// # Errors
    ///
    /// The [`StageError`] of the stage being entered.
    fn next<E: ProcessingEngine>(
        self,
        ctx: &mut AnalysisContext<E>,
    ) -> Result<Option<Stage>, StageError>;

    /// Run all remaining stages and return the scenario result.
    ///
    /// # Errors
    ///
    /// The first [`StageError`] raised by a remaining stage.
    fn complete<E: ProcessingEngine>(
        self,
        ctx: &mut AnalysisContext<E>,
    ) -> Result<ScenarioResult, StageError>;
}

impl PipelineStage for Pending {
    const NAME: &str = "pending";
    const INDEX: usize = 0;

    fn graph(&self) -> &ActivityGraph {
        &self.graph
    }

    fn next<E: ProcessingEngine>(
        self,
        ctx: &mut AnalysisContext<E>,
    ) -> Result<Option<Stage>, StageError> {
        Ok(Some(Stage::Aligned(self.align(ctx)?)))
    }

    fn complete<E: ProcessingEngine>(
        self,
        ctx: &mut AnalysisContext<E>,
    ) -> Result<ScenarioResult, StageError> {
        self.align(ctx)?.complete(ctx)
    }
}

impl PipelineStage for Aligned {
    const NAME: &str = "align";
    const INDEX: usize = 1;

    fn graph(&self) -> &ActivityGraph {
        &self.graph
    }

    fn next<E: ProcessingEngine>(
        self,
        ctx: &mut AnalysisContext<E>,
    ) -> Result<Option<Stage>, StageError> {
        Ok(Some(Stage::Snapped(self.snap(ctx)?)))
    }

    fn complete<E: ProcessingEngine>(
        self,
        ctx: &mut AnalysisContext<E>,
    ) -> Result<ScenarioResult, StageError> {
        self.snap(ctx)?.complete(ctx)
    }
}

impl PipelineStage for Snapped {
    const NAME: &str = "snap";
    const INDEX: usize = 2;

    fn graph(&self) -> &ActivityGraph {
        &self.graph
    }

    fn applied(&self) -> bool {
        self.applied
    }

    fn next<E: ProcessingEngine>(
        self,
        ctx: &mut AnalysisContext<E>,
    ) -> Result<Option<Stage>, StageError> {
        Ok(Some(Stage::Weighted(self.weight(ctx)?)))
    }

    fn complete<E: ProcessingEngine>(
        self,
        ctx: &mut AnalysisContext<E>,
    ) -> Result<ScenarioResult, StageError> {
        self.weight(ctx)?.complete(ctx)
    }
}

impl PipelineStage for Weighted {
    const NAME: &str = "weight";
    const INDEX: usize = 3;

    fn graph(&self) -> &ActivityGraph {
        &self.graph
    }

    fn next<E: ProcessingEngine>(
        self,
        ctx: &mut AnalysisContext<E>,
    ) -> Result<Option<Stage>, StageError> {
        Ok(Some(Stage::ActivitiesBuilt(self.build_activities(ctx)?)))
    }

    fn complete<E: ProcessingEngine>(
        self,
        ctx: &mut AnalysisContext<E>,
    ) -> Result<ScenarioResult, StageError> {
        self.build_activities(ctx)?.complete(ctx)
    }
}

impl PipelineStage for ActivitiesBuilt {
    const NAME: &str = "activities";
    const INDEX: usize = 4;

    fn graph(&self) -> &ActivityGraph {
        &self.graph
    }

    fn next<E: ProcessingEngine>(
        self,
        ctx: &mut AnalysisContext<E>,
    ) -> Result<Option<Stage>, StageError> {
        Ok(Some(Stage::ExternallyMasked(self.mask_external(ctx)?)))
    }

    fn complete<E: ProcessingEngine>(
        self,
        ctx: &mut AnalysisContext<E>,
    ) -> Result<ScenarioResult, StageError> {
        self.mask_external(ctx)?.complete(ctx)
    }
}

impl PipelineStage for ExternallyMasked {
    const NAME: &str = "external mask";
    const INDEX: usize = 5;

    fn graph(&self) -> &ActivityGraph {
        &self.graph
    }

    fn applied(&self) -> bool {
        self.applied
    }

    fn next<E: ProcessingEngine>(
        self,
        ctx: &mut AnalysisContext<E>,
    ) -> Result<Option<Stage>, StageError> {
        Ok(Some(Stage::InternallyMasked(self.mask_internal(ctx)?)))
    }

    fn complete<E: ProcessingEngine>(
        self,
        ctx: &mut AnalysisContext<E>,
    ) -> Result<ScenarioResult, StageError> {
        self.mask_internal(ctx)?.complete(ctx)
    }
}

impl PipelineStage for InternallyMasked {
    const NAME: &str = "internal mask";
    const INDEX: usize = 6;

    fn graph(&self) -> &ActivityGraph {
        &self.graph
    }

    fn next<E: ProcessingEngine>(
        self,
        ctx: &mut AnalysisContext<E>,
    ) -> Result<Option<Stage>, StageError> {
        Ok(Some(Stage::Sieved(self.sieve(ctx)?)))
    }

    fn complete<E: ProcessingEngine>(
        self,
        ctx: &mut AnalysisContext<E>,
    ) -> Result<ScenarioResult, StageError> {
        self.sieve(ctx)?.complete(ctx)
    }
}

impl PipelineStage for Sieved {
    const NAME: &str = "sieve";
    const INDEX: usize = 7;

    fn graph(&self) -> &ActivityGraph {
        &self.graph
    }

    fn applied(&self) -> bool {
        self.applied
    }

    fn next<E: ProcessingEngine>(
        self,
        ctx: &mut AnalysisContext<E>,
    ) -> Result<Option<Stage>, StageError> {
        Ok(Some(Stage::Cleaned(self.clean(ctx)?)))
    }

    fn complete<E: ProcessingEngine>(
        self,
        ctx: &mut AnalysisContext<E>,
    ) -> Result<ScenarioResult, StageError> {
        self.clean(ctx)?.complete(ctx)
    }
}

impl PipelineStage for Cleaned {
    const NAME: &str = "clean";
    const INDEX: usize = 8;

    fn graph(&self) -> &ActivityGraph {
        &self.graph
    }

    fn next<E: ProcessingEngine>(
        self,
        ctx: &mut AnalysisContext<E>,
    ) -> Result<Option<Stage>, StageError> {
        Ok(Some(Stage::Reduced(self.reduce(ctx)?)))
    }

    fn complete<E: ProcessingEngine>(
        self,
        ctx: &mut AnalysisContext<E>,
    ) -> Result<ScenarioResult, StageError> {
        self.reduce(ctx)?.complete(ctx)
    }
}

impl PipelineStage for Reduced {
    const NAME: &str = "highest position";
    const INDEX: usize = 9;

    fn graph(&self) -> &ActivityGraph {
        &self.graph
    }

    fn next<E: ProcessingEngine>(
        self,
        _ctx: &mut AnalysisContext<E>,
    ) -> Result<Option<Stage>, StageError> {
        Ok(None)
    }

    fn complete<E: ProcessingEngine>(
        self,
        _ctx: &mut AnalysisContext<E>,
    ) -> Result<ScenarioResult, StageError> {
        Ok(self.into_result())
    }
}

/// Enum wrapping all pipeline stages for uniform, loopable access.
#[must_use]
#[derive(Debug)]
pub enum Stage {
    /// See [`Pending`].
    Pending(Pending),
    /// See [`Aligned`].
    Aligned(Aligned),
    /// See [`Snapped`].
    Snapped(Snapped),
    /// See [`Weighted`].
    Weighted(Weighted),
    /// See [`ActivitiesBuilt`].
    ActivitiesBuilt(ActivitiesBuilt),
    /// See [`ExternallyMasked`].
    ExternallyMasked(ExternallyMasked),
    /// See [`InternallyMasked`].
    InternallyMasked(InternallyMasked),
    /// See [`Sieved`].
    Sieved(Sieved),
    /// See [`Cleaned`].
    Cleaned(Cleaned),
    /// See [`Reduced`].
    Reduced(Reduced),
}

/// Compile-time guard: if a [`Stage`] variant is added, this match becomes
/// non-exhaustive and the build fails, so [`STAGE_COUNT`] gets bumped.
#[allow(dead_code, clippy::match_same_arms)]
const fn _stage_count_guard(s: &Stage) {
    match s {
        Stage::Pending(_)
        | Stage::Aligned(_)
        | Stage::Snapped(_)
        | Stage::Weighted(_)
        | Stage::ActivitiesBuilt(_)
        | Stage::ExternallyMasked(_)
        | Stage::InternallyMasked(_)
        | Stage::Sieved(_)
        | Stage::Cleaned(_)
        | Stage::Reduced(_) => {}
    }
}

/// Result of [`Stage::advance`]: either the next stage or the
/// completed final stage returned unchanged.
#[must_use]
#[derive(Debug)]
pub enum Advance {
    /// The pipeline advanced to this next stage.
    Next(Stage),
    /// The pipeline was already at the final stage and is returned
    /// unchanged.
    Complete(Stage),
}

/// Delegate a method call to whichever `Stage` variant is active.
macro_rules! delegate {
    ($self:ident, $method:ident $(, $arg:expr)*) => {
        match $self {
            Self::Pending(s) => s.$method($($arg),*),
            Self::Aligned(s) => s.$method($($arg),*),
            Self::Snapped(s) => s.$method($($arg),*),
            Self::Weighted(s) => s.$method($($arg),*),
            Self::ActivitiesBuilt(s) => s.$method($($arg),*),
            Self::ExternallyMasked(s) => s.$method($($arg),*),
            Self::InternallyMasked(s) => s.$method($($arg),*),
            Self::Sieved(s) => s.$method($($arg),*),
            Self::Cleaned(s) => s.$method($($arg),*),
            Self::Reduced(s) => s.$method($($arg),*),
        }
    };
}

impl Stage {
    /// Short name of the current stage.
    #[must_use]
    pub fn name(&self) -> &'static str {
        delegate!(self, stage_name)
    }

    /// Zero-based index of the current stage.
    #[must_use]
    pub fn index(&self) -> usize {
        delegate!(self, stage_index)
    }

    /// The activity graph as of the current stage.
    #[must_use]
    pub fn graph(&self) -> &ActivityGraph {
        delegate!(self, graph)
    }

    /// Whether the work that produced the current stage ran.
    #[must_use]
    pub fn applied(&self) -> bool {
        delegate!(self, applied)
    }

    /// Whether the pipeline is at the final stage.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        matches!(self, Self::Reduced(_))
    }

    /// Advance to the next stage.
    ///
    /// Returns `Ok(Some(next_stage))` on success, `Ok(None)` if
    /// already complete (the `Reduced` value is consumed), or `Err` if
    /// the stage fails.
    ///
    /// # Errors
    ///
    /// The [`StageError`] of the stage being entered.
    pub fn next<E: ProcessingEngine>(
        self,
        ctx: &mut AnalysisContext<E>,
    ) -> Result<Option<Self>, StageError> {
        delegate!(self, next, ctx)
    }

    /// Advance to the next stage, returning `self` unchanged if
    /// already complete.
    ///
    /// # Errors
    ///
    /// The [`StageError`] of the stage being entered.
    pub fn advance<E: ProcessingEngine>(
        self,
        ctx: &mut AnalysisContext<E>,
    ) -> Result<Advance, StageError> {
        if self.is_complete() {
            return Ok(Advance::Complete(self));
        }
        // Non-complete stages always return Ok(Some(_)) from next().
        #[allow(clippy::unreachable)]
        let next = self
            .next(ctx)?
            .unwrap_or_else(|| unreachable!("non-complete stage returned None from next()"));
        Ok(Advance::Next(next))
    }

    /// Run all remaining stages to completion.
    ///
    /// # Errors
    ///
    /// The first [`StageError`] raised by a remaining stage.
    pub fn complete<E: ProcessingEngine>(
        self,
        ctx: &mut AnalysisContext<E>,
    ) -> Result<ScenarioResult, StageError> {
        delegate!(self, complete, ctx)
    }
}

// Associated constants are not callable through `self`, so the macro
// goes through this helper trait instead.
trait StageMetadata {
    fn stage_name(&self) -> &'static str;
    fn stage_index(&self) -> usize;
}

impl<T: PipelineStage> StageMetadata for T {
    fn stage_name(&self) -> &'static str {
        T::NAME
    }

    fn stage_index(&self) -> usize {
        T::INDEX
    }
}

impl From<Pending> for Stage {
    fn from(s: Pending) -> Self {
        Self::Pending(s)
    }
}

impl From<Aligned> for Stage {
    fn from(s: Aligned) -> Self {
        Self::Aligned(s)
    }
}

impl From<Snapped> for Stage {
    fn from(s: Snapped) -> Self {
        Self::Snapped(s)
    }
}

impl From<Weighted> for Stage {
    fn from(s: Weighted) -> Self {
        Self::Weighted(s)
    }
}

impl From<ActivitiesBuilt> for Stage {
    fn from(s: ActivitiesBuilt) -> Self {
        Self::ActivitiesBuilt(s)
    }
}

impl From<ExternallyMasked> for Stage {
    fn from(s: ExternallyMasked) -> Self {
        Self::ExternallyMasked(s)
    }
}

impl From<InternallyMasked> for Stage {
    fn from(s: InternallyMasked) -> Self {
        Self::InternallyMasked(s)
    }
}

impl From<Sieved> for Stage {
    fn from(s: Sieved) -> Self {
        Self::Sieved(s)
    }
}

impl From<Cleaned> for Stage {
    fn from(s: Cleaned) -> Self {
        Self::Cleaned(s)
    }
}

impl From<Reduced> for Stage {
    fn from(s: Reduced) -> Self {
        Self::Reduced(s)
    }
}

// ───────────────────── Pipeline entry point ──────────────────────────

/// Incremental scenario analysis pipeline.
///
/// Created via [`Pipeline::new`], which builds the activity graph
/// without doing any processing. Each stage method consumes the current
/// state and returns the next, making it a compile-time error to skip
/// stages or call them out of order.
pub struct Pipeline;

impl Pipeline {
    /// Build the activity graph for the scenario's activities.
    #[allow(clippy::new_ret_no_self)]
    pub fn new(config: &TaskConfig) -> Pending {
        Pending {
            graph: ActivityGraph::from_activities(config.analysis_activities()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::events::{CancellationToken, NullSink};
    use crate::memory::{GridSpec, MemoryEngine, Raster};
    use crate::types::{Activity, Crs, Extent, LayerPath, LayerType, NODATA, NcsPathway, Scenario};

    fn context(sieve: bool) -> AnalysisContext<MemoryEngine> {
        let extent = Extent::new(0.0, 4.0, 0.0, 4.0);
        let mut engine = MemoryEngine::new();
        let grid = GridSpec::new(&extent, 1.0, 1.0, Crs::new("EPSG:32633")).unwrap();
        engine.insert_raster("forest.tif", Raster::filled(grid, Some(NODATA), 2.0));

        let mut config = TaskConfig::new(Scenario {
            uuid: uuid::Uuid::new_v4(),
            name: "pipeline".to_owned(),
            description: String::new(),
            extent,
            activities: vec![Activity {
                uuid: uuid::Uuid::new_v4(),
                name: "Restore".to_owned(),
                description: String::new(),
                path: None,
                pathways: vec![NcsPathway {
                    uuid: uuid::Uuid::new_v4(),
                    name: "Forest".to_owned(),
                    description: String::new(),
                    path: LayerPath::from("forest.tif"),
                    priority_layers: Vec::new(),
                }],
                mask_paths: Vec::new(),
                style_pixel_value: 1,
                layer_type: LayerType::Raster,
            }],
        });
        config.settings.sieve.enabled = sieve;
        AnalysisContext::new(config, engine, Box::new(NullSink), CancellationToken::new())
    }

    #[test]
    fn typed_chain_reaches_result() {
        let mut ctx = context(false);
        let snapped = Pipeline::new(ctx.config())
            .align(&mut ctx)
            .unwrap()
            .snap(&mut ctx)
            .unwrap();
        assert!(!snapped.applied());
        let sieved = snapped
            .weight(&mut ctx)
            .unwrap()
            .build_activities(&mut ctx)
            .unwrap()
            .mask_external(&mut ctx)
            .unwrap()
            .mask_internal(&mut ctx)
            .unwrap()
            .sieve(&mut ctx)
            .unwrap();
        assert!(!sieved.applied());
        let reduced = sieved.clean(&mut ctx).unwrap().reduce(&mut ctx).unwrap();
        assert_eq!(ctx.state(), AnalysisState::Reducing);
        assert!(ctx.engine().layer_exists(&reduced.result().analysis_output));
    }

    #[test]
    fn stage_loop_visits_every_stage_in_order() {
        let mut ctx = context(true);
        let mut stage: Stage = Pipeline::new(ctx.config()).into();
        let mut indices = vec![stage.index()];
        loop {
            match stage.advance(&mut ctx).unwrap() {
                Advance::Next(next) => {
                    indices.push(next.index());
                    stage = next;
                }
                Advance::Complete(done) => {
                    stage = done;
                    break;
                }
            }
        }
        assert_eq!(indices, (0..STAGE_COUNT).collect::<Vec<_>>());
        assert_eq!(stage.name(), "highest position");
        let result = stage.complete(&mut ctx).unwrap();
        assert_eq!(result.scenario.activities[0].style_pixel_value, 1);
    }

    #[test]
    fn constant_activity_cannot_be_normalized() {
        let mut ctx = context(false);
        let sieved = Pipeline::new(ctx.config())
            .align(&mut ctx)
            .unwrap()
            .snap(&mut ctx)
            .unwrap()
            .weight(&mut ctx)
            .unwrap()
            .build_activities(&mut ctx)
            .unwrap()
            .mask_external(&mut ctx)
            .unwrap()
            .mask_internal(&mut ctx)
            .unwrap()
            .sieve(&mut ctx)
            .unwrap();
        // A constant activity cannot be normalized.
        assert!(matches!(
            sieved.normalize(&mut ctx),
            Err(StageError::Computation(_))
        ));
    }
}
