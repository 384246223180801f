//! cplus-pipeline: scenario analysis for land-use planning.
//!
//! Turns a scenario (activities built from restoration pathways, priority
//! weighting layers, masks and settings) into a single raster ranking,
//! per pixel, which activity scores highest:
//! align extent -> snap -> weight pathways -> build activities ->
//! mask -> sieve -> normalize -> clean -> highest position.
//!
//! The pipeline never touches pixels itself. Every raster and vector
//! operation goes through a [`ProcessingEngine`]; [`memory::MemoryEngine`]
//! is a complete in-memory implementation.

pub mod activity;
pub mod algebra;
pub mod align;
pub mod aoi;
pub mod clean;
pub mod config;
pub mod context;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod events;
pub mod graph;
pub mod highest;
pub mod mask;
pub mod memory;
pub mod naming;
pub mod normalize;
pub mod pipeline;
pub mod sieving;
pub mod snap;
pub mod state;
pub mod task;
pub mod types;
pub mod weight;

pub use config::{AnalysisSettings, ConfigError, OutputOptions, ResamplingMethod, TaskConfig};
pub use context::AnalysisContext;
pub use diagnostics::RunDiagnostics;
pub use engine::ProcessingEngine;
pub use error::{EngineError, StageError};
pub use events::{CancellationToken, EventSink, LogLevel, NullSink, PipelineEvent};
pub use graph::ActivityGraph;
pub use pipeline::{Pipeline, Stage};
pub use state::AnalysisState;
pub use task::{ScenarioAnalysisTask, TaskOutcome, TaskReport};
pub use types::{
    Activity, AnalysisExtent, Crs, Extent, LayerPath, NcsPathway, PriorityLayer,
    PriorityLayerGroup, Scenario, ScenarioResult,
};

/// Run a scenario analysis to completion on the calling thread.
///
/// Events go to `events`; pass [`NullSink`] to discard them. The engine
/// comes back in the report with every layer the run produced.
///
/// # Pipeline steps
///
/// 1. Snap the scenario extent onto the first pathway's pixel grid
/// 2. Optionally resample pathways and priority layers onto a reference
/// 3. Weight pathways with their priority layers
/// 4. Sum pathways into activity rasters
/// 5. Optionally clip with scenario-wide masks, then per-activity masks
/// 6. Optionally sieve out small patches
/// 7. Optionally normalize, then fold zeros into nodata
/// 8. Rank activities per pixel
pub fn run_scenario<E: ProcessingEngine>(
    config: TaskConfig,
    engine: E,
    events: impl EventSink + 'static,
) -> TaskReport<E> {
    ScenarioAnalysisTask::new(config, engine, events).run()
}
