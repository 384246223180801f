//! Highest position: the final per-pixel ranking of activities.
//!
//! Activities are ordered by their style pixel value (ties keep input
//! order) and renumbered `1..=N`; output pixel `k` means the `k`-th
//! activity scored highest there.

use chrono::Utc;

use crate::context::{AnalysisContext, params};
use crate::engine::{HighestPositionRequest, OutputTarget, ProcessingEngine};
use crate::error::StageError;
use crate::graph::{ActivityGraph, ActivityId};
use crate::naming::scenario_output_path;
use crate::types::{AnalysisExtent, Crs, DEFAULT_CRS, LayerPath, NODATA, Scenario, ScenarioResult};

/// Rank the activities and assemble the scenario result.
///
/// Each activity contributes its own raster, or its first pathway when
/// it has none. The ranking covers the unsnapped scenario extent in the
/// CRS of the first contributing layer.
///
/// # Errors
///
/// [`StageError::Configuration`] when no activity has a layer,
/// [`StageError::Engine`] or [`StageError::Cancelled`].
pub fn highest_position<E: ProcessingEngine>(
    ctx: &mut AnalysisContext<E>,
    graph: ActivityGraph,
) -> Result<(ActivityGraph, ScenarioResult), StageError> {
    ctx.check_cancelled()?;
    ctx.status("Calculating the highest position");
    run(ctx, graph).map_err(|err| {
        if !err.is_cancellation() {
            ctx.log(format!(
                "An error occurred when running task for scenario analysis, error message \"{err}\""
            ));
        }
        err
    })
}

fn run<E: ProcessingEngine>(
    ctx: &mut AnalysisContext<E>,
    mut graph: ActivityGraph,
) -> Result<(ActivityGraph, ScenarioResult), StageError> {
    let layers: Vec<(ActivityId, LayerPath)> = graph
        .activity_ids()
        .filter_map(|id| activity_layer(&graph, id).map(|path| (id, path)))
        .collect();
    let Some((_, first)) = layers.first() else {
        return Err(StageError::Configuration(
            "no activity has a layer to rank".to_owned(),
        ));
    };
    let first = first.clone();

    let crs = ctx
        .engine()
        .raster_info(&first)
        .map_or_else(|_| Crs::new(DEFAULT_CRS), |info| info.crs);
    let extent = AnalysisExtent::new(ctx.config().scenario.extent, crs);

    let mut order: Vec<ActivityId> = graph.activity_ids().collect();
    order.sort_by_key(|&id| graph.activity(id).style_pixel_value);
    for (rank, &id) in order.iter().enumerate() {
        graph.activity_mut(id).style_pixel_value = i64::try_from(rank + 1).unwrap_or(i64::MAX);
    }

    let inputs: Vec<LayerPath> = order
        .iter()
        .filter_map(|id| layers.iter().find(|(a, _)| a == id).map(|(_, p)| p.clone()))
        .collect();
    let stems: Vec<String> = inputs.iter().map(LayerPath::stem).collect();
    ctx.log(format!("Layers sources {stems:?}"));

    let settings = &ctx.config().settings;
    let output = if settings.outputs.highest_position {
        OutputTarget::File(scenario_output_path(
            &settings.base_dir,
            ctx.config().scenario.uuid,
        ))
    } else {
        OutputTarget::Temporary
    };
    let request = HighestPositionRequest {
        inputs,
        extent,
        ignore_nodata: true,
        output_nodata: NODATA,
        reference: ctx.reference_layer().unwrap_or(first),
        output,
    };
    ctx.log(format!(
        "Used parameters for highest position analysis {}",
        params(&request)
    ));
    ctx.check_cancelled()?;
    let analysis_output = ctx.invoke("highest position", |engine, fb| {
        engine.highest_position(&request, fb)
    })?;

    let config = ctx.config();
    let result = ScenarioResult {
        scenario: Scenario {
            activities: graph.to_activities(),
            ..config.scenario.clone()
        },
        scenario_directory: config.settings.base_dir.clone(),
        created_date: Utc::now(),
        analysis_output,
    };
    Ok((graph, result))
}

/// The activity's raster, else its first pathway's.
fn activity_layer(graph: &ActivityGraph, id: ActivityId) -> Option<LayerPath> {
    let activity = graph.activity(id);
    activity.path.clone().or_else(|| {
        activity
            .pathways
            .first()
            .map(|&pathway| graph.pathway(pathway).path.clone())
    })
}
