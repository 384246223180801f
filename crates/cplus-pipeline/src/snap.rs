//! Snapping: resample every pathway and the priority weighting layers it
//! references onto the reference raster's grid.
//!
//! A layer that fails to snap keeps its unsnapped path. Only invalid
//! activities and cancellation stop the stage.

use crate::context::{AnalysisContext, params};
use crate::engine::{AlignRequest, OutputTarget, ProcessingEngine, SetNodataRequest};
use crate::error::StageError;
use crate::graph::ActivityGraph;
use crate::naming::{SNAPPED_PATHWAYS_DIR, SNAPPED_PRIORITY_LAYERS_DIR, final_variant};
use crate::types::{AnalysisExtent, LayerPath, NODATA};

/// Fail with a critical log when an activity has neither pathways nor a
/// raster of its own.
///
/// # Errors
///
/// [`StageError::Configuration`] naming the first such activity.
pub fn validate_activity_sources<E: ProcessingEngine>(
    ctx: &AnalysisContext<E>,
    graph: &ActivityGraph,
) -> Result<(), StageError> {
    for id in graph.activity_ids() {
        let activity = graph.activity(id);
        if activity.pathways.is_empty() && activity.path.is_none() {
            let message = format!(
                "No defined activity pathways or an activity layer for the activity {}",
                activity.name
            );
            ctx.critical(message.clone());
            return Err(StageError::Configuration(message));
        }
    }
    Ok(())
}

/// Snap each distinct pathway, then each of its priority weighting
/// layers, onto `reference`.
///
/// Snapped pathway paths replace the originals. Snapped PWL paths are
/// recorded per pathway and preferred by weighting.
///
/// # Errors
///
/// [`StageError::Configuration`] for an activity without sources, or
/// [`StageError::Cancelled`].
pub fn snap_layers<E: ProcessingEngine>(
    ctx: &mut AnalysisContext<E>,
    mut graph: ActivityGraph,
    reference: &LayerPath,
    extent: &AnalysisExtent,
) -> Result<ActivityGraph, StageError> {
    ctx.status("Snapping the selected activity pathways, carbon layers and priority layers");
    validate_activity_sources(ctx, &graph)?;

    for id in graph.distinct_pathways() {
        ctx.check_cancelled()?;
        let pathway = graph.pathway(id).clone();
        ctx.log(format!("Snapping {} pathway layer", pathway.name));
        let snapped = snap_layer(ctx, &pathway.path, reference, extent, SNAPPED_PATHWAYS_DIR)?;
        graph.pathway_mut(id).path = snapped;

        ctx.log(format!(
            "Snapping {} priority weighting layers from pathway {} with layers",
            pathway.priority_layers.len(),
            pathway.name
        ));
        for pwl in &pathway.priority_layers {
            let Some(layer) = ctx.config().get_priority_layer(pwl.uuid) else {
                continue;
            };
            let Some(path) = layer.path.clone().filter(|p| !p.is_empty()) else {
                continue;
            };
            if !ctx.engine().layer_exists(&path) {
                continue;
            }
            let snapped = snap_layer(ctx, &path, reference, extent, SNAPPED_PRIORITY_LAYERS_DIR)?;
            graph
                .pathway_mut(id)
                .priority_layer_paths
                .insert(pwl.uuid, snapped);
        }
    }
    Ok(graph)
}

/// Align one raster and restore its nodata tag on a `_final` copy.
/// Returns `input` unchanged when alignment fails.
fn snap_layer<E: ProcessingEngine>(
    ctx: &mut AnalysisContext<E>,
    input: &LayerPath,
    reference: &LayerPath,
    extent: &AnalysisExtent,
    subdir: &str,
) -> Result<LayerPath, StageError> {
    let nodata = match ctx.engine().raster_info(input) {
        Ok(info) => info.nodata.unwrap_or(NODATA),
        Err(err) => {
            ctx.warn(format!("Problem snapping layer {input}, {err}"));
            return Ok(input.clone());
        }
    };

    let snapping = &ctx.config().settings.snapping;
    let request = AlignRequest {
        input: input.clone(),
        reference: reference.clone(),
        extent: extent.extent,
        crs: extent.crs.clone(),
        resampling_method: snapping.resampling_method,
        rescale_values: snapping.rescale_values,
        output: ctx.output_target(true, subdir, &input.stem(), ""),
    };
    ctx.log(format!("Used parameters for snapping: {}", params(&request)));

    let aligned = match ctx.invoke("align raster", |engine, fb| engine.align_raster(&request, fb)) {
        Ok(path) => path,
        Err(err) => {
            ctx.check_cancelled()?;
            ctx.warn(format!("Problem snapping layer {input}, {err}"));
            return Ok(input.clone());
        }
    };

    let request = SetNodataRequest {
        input: aligned.clone(),
        nodata,
        output: OutputTarget::File(final_variant(&aligned)),
    };
    match ctx.invoke("set nodata", |engine, fb| engine.set_nodata(&request, fb)) {
        Ok(path) => Ok(path),
        Err(err) => {
            ctx.warn(format!(
                "Problem replacing no data value of {aligned}, keeping the snapped layer, {err}"
            ));
            Ok(aligned)
        }
    }
}
