//! Normalization: rescale each activity to `0..=index` using its own
//! range, where `index` is the carbon coefficient plus the suitability
//! index.

use crate::algebra::normalization;
use crate::context::{AnalysisContext, params};
use crate::engine::{AlgebraRequest, ProcessingEngine};
use crate::error::StageError;
use crate::graph::ActivityGraph;
use crate::naming::NORMALIZED_ACTIVITIES_DIR;
use crate::types::{AnalysisExtent, LayerPath};

/// Normalize every activity raster.
///
/// # Errors
///
/// [`StageError::MissingLayer`] for an activity without a raster,
/// [`StageError::Computation`] for a constant band,
/// [`StageError::Engine`] or [`StageError::Cancelled`].
pub fn normalize_activities<E: ProcessingEngine>(
    ctx: &mut AnalysisContext<E>,
    graph: ActivityGraph,
    extent: &AnalysisExtent,
) -> Result<ActivityGraph, StageError> {
    ctx.check_cancelled()?;
    ctx.status("Normalization of the activities");
    run(ctx, graph, extent).map_err(|err| ctx.problem("normalizing activity layers", err))
}

fn run<E: ProcessingEngine>(
    ctx: &mut AnalysisContext<E>,
    mut graph: ActivityGraph,
    extent: &AnalysisExtent,
) -> Result<ActivityGraph, StageError> {
    let settings = &ctx.config().settings;
    let index = settings.carbon_coefficient + settings.pathway_suitability_index;
    let save = settings.outputs.landuse_normalized;

    for id in graph.activity_ids() {
        ctx.check_cancelled()?;
        let activity = graph.activity(id);
        let Some(input) = activity.path.clone() else {
            let message = format!(
                "Problem when running activities normalization, there is no map layer for the \
                 activity {}",
                activity.name
            );
            ctx.critical(message.clone());
            return Err(StageError::MissingLayer {
                path: LayerPath::default(),
                context: message,
            });
        };

        let stats = ctx
            .engine()
            .band_statistics(&input, 1)
            .map_err(|source| StageError::Engine {
                operation: "band statistics",
                source,
            })?;
        ctx.log(format!(
            "Found minimum {} and maximum {} for activity {}",
            stats.min, stats.max, activity.name
        ));
        if stats.max <= stats.min {
            return Err(StageError::Computation(format!(
                "activity {} has a constant value {}, its range cannot be normalized",
                activity.name, stats.min
            )));
        }

        let request = AlgebraRequest {
            expression: normalization(&input.stem(), stats.min, stats.max, index),
            layers: vec![input],
            extent: Some(extent.clone()),
            output: ctx.output_target(save, NORMALIZED_ACTIVITIES_DIR, &activity.name, ""),
        };
        ctx.log(format!(
            "Used parameters for normalization of the activities: {}",
            params(&request)
        ));
        ctx.check_cancelled()?;
        let path = ctx.invoke("raster algebra", |engine, fb| engine.raster_algebra(&request, fb))?;
        graph.activity_mut(id).path = Some(path);
    }
    Ok(graph)
}
