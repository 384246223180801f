//! Activity creation: sum an activity's own raster and its pathways.

use crate::context::{AnalysisContext, params};
use crate::engine::{CellStatistic, CellStatisticsRequest, ProcessingEngine};
use crate::error::StageError;
use crate::graph::ActivityGraph;
use crate::naming::ACTIVITIES_DIR;
use crate::snap::validate_activity_sources;
use crate::types::{AnalysisExtent, NODATA};

/// Build one raster per activity by summing its sources, nodata
/// ignored.
///
/// # Errors
///
/// [`StageError::Configuration`] for an activity without sources,
/// [`StageError::Engine`] or [`StageError::Cancelled`].
pub fn build_activities<E: ProcessingEngine>(
    ctx: &mut AnalysisContext<E>,
    graph: ActivityGraph,
    extent: &AnalysisExtent,
) -> Result<ActivityGraph, StageError> {
    ctx.check_cancelled()?;
    ctx.status("Creating activity layers from pathways");
    run(ctx, graph, extent).map_err(|err| ctx.problem("creating activity layers", err))
}

fn run<E: ProcessingEngine>(
    ctx: &mut AnalysisContext<E>,
    mut graph: ActivityGraph,
    extent: &AnalysisExtent,
) -> Result<ActivityGraph, StageError> {
    validate_activity_sources(ctx, &graph)?;
    let save = ctx.config().settings.outputs.landuse_project;

    for id in graph.activity_ids() {
        ctx.check_cancelled()?;
        let activity = graph.activity(id);
        let inputs: Vec<_> = activity
            .path
            .iter()
            .cloned()
            .chain(activity.pathways.iter().map(|&p| graph.pathway(p).path.clone()))
            .collect();
        let reference = ctx.template_layer(&inputs).ok_or_else(|| {
            StageError::Configuration(format!("activity {} has no layers", activity.name))
        })?;

        let request = CellStatisticsRequest {
            statistic: CellStatistic::Sum,
            inputs,
            extent: extent.clone(),
            ignore_nodata: true,
            output_nodata: NODATA,
            reference,
            output: ctx.output_target(save, ACTIVITIES_DIR, &activity.name, ""),
        };
        ctx.log(format!("Used parameters for activities generation: {}", params(&request)));

        let path = ctx.invoke("cell statistics", |engine, fb| engine.cell_statistics(&request, fb))?;
        graph.activity_mut(id).path = Some(path);
    }
    Ok(graph)
}
