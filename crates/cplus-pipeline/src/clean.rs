//! Cleaning: rewrite each activity so zero-valued cells become nodata.

use crate::context::{AnalysisContext, params};
use crate::engine::{CellStatistic, CellStatisticsRequest, ProcessingEngine};
use crate::error::{StageError, error_chain};
use crate::graph::ActivityGraph;
use crate::types::{AnalysisExtent, CLEANED_NODATA, LayerPath};

/// Re-emit every activity with an output nodata of zero, nodata inputs
/// ignored.
///
/// # Errors
///
/// [`StageError::MissingLayer`] for an activity without a raster,
/// [`StageError::Engine`] or [`StageError::Cancelled`].
pub fn clean_activities<E: ProcessingEngine>(
    ctx: &mut AnalysisContext<E>,
    graph: ActivityGraph,
    extent: &AnalysisExtent,
) -> Result<ActivityGraph, StageError> {
    ctx.check_cancelled()?;
    ctx.status("Updating weighted activity values");
    run(ctx, graph, extent).map_err(|err| {
        let err = ctx.problem("cleaning activities", err);
        if !err.is_cancellation() {
            ctx.log(error_chain(&err));
        }
        err
    })
}

fn run<E: ProcessingEngine>(
    ctx: &mut AnalysisContext<E>,
    mut graph: ActivityGraph,
    extent: &AnalysisExtent,
) -> Result<ActivityGraph, StageError> {
    let save = ctx.config().settings.outputs.landuse_normalized;
    for id in graph.activity_ids() {
        ctx.check_cancelled()?;
        let activity = graph.activity(id);
        let Some(input) = activity.path.clone() else {
            let message = format!(
                "Problem when running activity updates, there is no map layer for the activity {}",
                activity.name
            );
            ctx.critical(message.clone());
            return Err(StageError::MissingLayer {
                path: LayerPath::default(),
                context: message,
            });
        };
        let reference = ctx.reference_layer().unwrap_or_else(|| input.clone());

        let request = CellStatisticsRequest {
            statistic: CellStatistic::Sum,
            inputs: vec![input],
            extent: extent.clone(),
            ignore_nodata: true,
            output_nodata: CLEANED_NODATA,
            reference,
            output: ctx.output_target(save, "", &activity.name, "_cleaned"),
        };
        ctx.log(format!(
            "Used parameters for updates on the weighted activities: {}",
            params(&request)
        ));
        ctx.check_cancelled()?;
        let path = ctx.invoke("cell statistics", |engine, fb| engine.cell_statistics(&request, fb))?;
        graph.activity_mut(id).path = Some(path);
    }
    Ok(graph)
}
