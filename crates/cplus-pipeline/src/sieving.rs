//! Sieving: drop connected patches smaller than the threshold from each
//! activity.
//!
//! The activity is reduced to a binary presence mask, the mask is sieved,
//! and the surviving presence is multiplied back into the activity.
//! Pixels that end up non-positive become nodata.

use serde::Serialize;

use crate::algebra::{Expr, sieve_binary_mask, sieve_join, sieve_nodata_rewrite};
use crate::context::{AnalysisContext, params};
use crate::engine::{
    AlgebraRequest, CellStatistic, CellStatisticsRequest, Connectivity, OutputTarget,
    ProcessingEngine, SieveRequest,
};
use crate::error::StageError;
use crate::graph::ActivityGraph;
use crate::naming::SIEVED_DIR;
use crate::types::{AnalysisExtent, LayerPath, NODATA};

#[derive(Serialize)]
struct SieveParameters<'a> {
    input: &'a LayerPath,
    threshold: f64,
    output: &'a OutputTarget,
}

/// Sieve every activity raster.
///
/// # Errors
///
/// [`StageError::MissingLayer`] for an activity without a raster,
/// [`StageError::Engine`] or [`StageError::Cancelled`].
pub fn sieve_activities<E: ProcessingEngine>(
    ctx: &mut AnalysisContext<E>,
    graph: ActivityGraph,
) -> Result<ActivityGraph, StageError> {
    ctx.check_cancelled()?;
    ctx.status("Applying sieve function to the activities");
    run(ctx, graph).map_err(|err| ctx.problem("running sieve function on models layers", err))
}

fn run<E: ProcessingEngine>(
    ctx: &mut AnalysisContext<E>,
    mut graph: ActivityGraph,
) -> Result<ActivityGraph, StageError> {
    let threshold = ctx.config().settings.sieve.threshold;
    for id in graph.activity_ids() {
        ctx.check_cancelled()?;
        let activity = graph.activity(id);
        let Some(input) = activity.path.clone() else {
            let message = format!(
                "Problem when running sieve function on models, there is no map layer for the \
                 model {}",
                activity.name
            );
            ctx.critical(message.clone());
            return Err(StageError::MissingLayer {
                path: LayerPath::default(),
                context: message,
            });
        };
        let output = ctx.output_target(true, SIEVED_DIR, &activity.name, "");
        ctx.log(format!(
            "Used parameters for sieving: {}",
            params(&SieveParameters {
                input: &input,
                threshold,
                output: &output,
            })
        ));
        let path = sieve_layer(ctx, &input, threshold, output)?;
        graph.activity_mut(id).path = Some(path);
    }
    Ok(graph)
}

fn sieve_layer<E: ProcessingEngine>(
    ctx: &mut AnalysisContext<E>,
    input: &LayerPath,
    threshold: f64,
    output: OutputTarget,
) -> Result<LayerPath, StageError> {
    let binary = algebra(ctx, sieve_binary_mask(&input.stem()), vec![input.clone()])?;

    let request = SieveRequest {
        input: binary,
        threshold,
        connectivity: Connectivity::Eight,
        output: OutputTarget::Temporary,
    };
    ctx.check_cancelled()?;
    let sieved = ctx.invoke("sieve", |engine, fb| engine.sieve(&request, fb))?;

    let clean = algebra(ctx, sieve_binary_mask(&sieved.stem()), vec![sieved])?;
    let joined = algebra(
        ctx,
        sieve_join(&input.stem(), &clean.stem()),
        vec![input.clone(), clean],
    )?;
    let rewritten = algebra(ctx, sieve_nodata_rewrite(&joined.stem()), vec![joined])?;

    let info = ctx
        .engine()
        .raster_info(&rewritten)
        .map_err(|source| StageError::Engine {
            operation: "raster info",
            source,
        })?;
    let request = CellStatisticsRequest {
        statistic: CellStatistic::Sum,
        inputs: vec![rewritten.clone()],
        extent: AnalysisExtent::new(info.extent, info.crs),
        ignore_nodata: false,
        output_nodata: NODATA,
        reference: rewritten,
        output,
    };
    ctx.check_cancelled()?;
    ctx.invoke("cell statistics", |engine, fb| engine.cell_statistics(&request, fb))
}

fn algebra<E: ProcessingEngine>(
    ctx: &mut AnalysisContext<E>,
    expression: Expr,
    layers: Vec<LayerPath>,
) -> Result<LayerPath, StageError> {
    let request = AlgebraRequest {
        expression,
        layers,
        extent: None,
        output: OutputTarget::Temporary,
    };
    ctx.check_cancelled()?;
    ctx.invoke("raster algebra", |engine, fb| engine.raster_algebra(&request, fb))
}
