//! Masking: clip activities to the area outside exclusion polygons.
//!
//! A mask is turned into its usable form by taking the symmetric
//! difference with a polygon covering the analysis extent, which inside
//! the extent is everything the mask does not cover. Clipping to that
//! keeps unmasked cells and writes nodata elsewhere.
//!
//! External masking applies the scenario-wide masks to every activity and
//! treats any precondition failure as fatal. Internal masking applies each
//! activity's own masks and skips the activity instead.

use crate::context::{AnalysisContext, params};
use crate::engine::{ClipRequest, OutputTarget, ProcessingEngine};
use crate::error::StageError;
use crate::graph::{ActivityGraph, ActivityId};
use crate::naming::{FINAL_MASKED_ACTIVITIES_DIR, MASKED_ACTIVITIES_DIR, layer_output_path};
use crate::types::{AnalysisExtent, LayerPath, NODATA};

/// Clip every activity with the scenario-wide masks.
///
/// # Errors
///
/// Any precondition failure ([`StageError::is_precondition`]),
/// [`StageError::Engine`] or [`StageError::Cancelled`].
pub fn mask_external<E: ProcessingEngine>(
    ctx: &mut AnalysisContext<E>,
    graph: ActivityGraph,
    extent: &AnalysisExtent,
    masks: &[LayerPath],
) -> Result<ActivityGraph, StageError> {
    ctx.check_cancelled()?;
    ctx.status("Masking activities using the saved masked layers");
    run_external(ctx, graph, extent, masks).map_err(|err| ctx.problem("masking activities", err))
}

fn run_external<E: ProcessingEngine>(
    ctx: &mut AnalysisContext<E>,
    mut graph: ActivityGraph,
    extent: &AnalysisExtent,
    masks: &[LayerPath],
) -> Result<ActivityGraph, StageError> {
    let mask = load_mask(ctx, masks)?;
    let info = ctx
        .engine()
        .vector_info(&mask)
        .map_err(|_| invalid_layer(ctx, &mask))?;
    if !info.is_valid_polygon_layer() {
        ctx.warn(format!(
            "Skipping activities masking using layer {mask}, not a polygon layer."
        ));
        return Err(StageError::GeometryType { path: mask });
    }
    let usable = usable_mask(ctx, &mask, extent)?;

    for id in graph.activity_ids() {
        ctx.check_cancelled()?;
        let activity = graph.activity(id);
        let Some(input) = activity.path.clone() else {
            let message = format!(
                "Problem when masking activities, there is no map layer for the activity {}",
                activity.name
            );
            ctx.critical(message.clone());
            return Err(StageError::MissingLayer {
                path: LayerPath::default(),
                context: message,
            });
        };
        let base = &ctx.config().settings.base_dir;
        let request = ClipRequest {
            input,
            mask: usable.clone(),
            nodata: NODATA,
            extent: extent.clone(),
            output: OutputTarget::File(layer_output_path(
                base,
                MASKED_ACTIVITIES_DIR,
                &activity.name,
                "",
            )),
        };
        ctx.log(format!("Used parameters for masking the activities: {}", params(&request)));
        ctx.check_cancelled()?;
        let path = ctx.invoke("clip raster by mask", |engine, fb| engine.clip_by_mask(&request, fb))?;
        graph.activity_mut(id).path = Some(path);
    }
    Ok(graph)
}

/// Clip each activity with its own masks. Activities whose masks cannot
/// be applied keep their current raster.
///
/// # Errors
///
/// [`StageError::Engine`] when a vector or clip primitive fails after
/// its preconditions held, or [`StageError::Cancelled`].
pub fn mask_internal<E: ProcessingEngine>(
    ctx: &mut AnalysisContext<E>,
    mut graph: ActivityGraph,
    extent: &AnalysisExtent,
) -> Result<ActivityGraph, StageError> {
    ctx.check_cancelled()?;
    ctx.status("Masking activities using their respective mask layers.");

    for id in graph.activity_ids() {
        ctx.check_cancelled()?;
        let activity = graph.activity(id);
        if activity.mask_paths.is_empty() {
            ctx.log(format!(
                "Skipping activity masking No mask layer(s) for activity {}",
                activity.name
            ));
            continue;
        }
        match mask_activity(ctx, &graph, id, extent) {
            Ok(path) => graph.activity_mut(id).path = Some(path),
            Err(err) if err.is_precondition() => {
                tracing::debug!(activity = %graph.activity(id).name, %err, "activity mask skipped");
            }
            Err(err) => return Err(ctx.problem("masking activities layers", err)),
        }
    }
    Ok(graph)
}

fn mask_activity<E: ProcessingEngine>(
    ctx: &mut AnalysisContext<E>,
    graph: &ActivityGraph,
    id: ActivityId,
    extent: &AnalysisExtent,
) -> Result<LayerPath, StageError> {
    let activity = graph.activity(id);
    let mask = load_mask(ctx, &activity.mask_paths)?;
    let Ok(mask_info) = ctx.engine().vector_info(&mask) else {
        return Err(invalid_layer(ctx, &mask));
    };
    if !mask_info.is_valid_polygon_layer() {
        ctx.warn(format!(
            "Skipping activities masking using layer {mask}, not a polygon layer."
        ));
        return Err(StageError::GeometryType { path: mask });
    }

    let extent_layer = ctx.invoke("extent to layer", |engine, fb| {
        engine.extent_to_layer(extent, fb)
    })?;
    let extent_info = ctx
        .engine()
        .vector_info(&extent_layer)
        .map_err(|source| StageError::Engine {
            operation: "vector info",
            source,
        })?;
    if extent_info.crs != mask_info.crs {
        ctx.warn(format!(
            "Skipping masking, the mask layers crs ({}) do not match the scenario crs ({}).",
            mask_info.crs, extent_info.crs
        ));
        return Err(StageError::CrsMismatch {
            expected: extent_info.crs,
            found: mask_info.crs,
        });
    }
    if !mask_info
        .extent
        .is_some_and(|m| m.intersects(&extent.extent))
    {
        ctx.warn("Skipping masking, the mask layers extent and the scenario extent do not overlap.");
        return Err(StageError::ExtentDisjoint(format!(
            "mask {mask} and scenario extent {extent}"
        )));
    }

    let usable = ctx.invoke("symmetric difference", |engine, fb| {
        engine.symmetric_difference(&mask, &extent_layer, fb)
    })?;

    let Some(input) = activity.path.clone() else {
        let message = format!(
            "Problem when masking activity, there is no map layer for the activity {}",
            activity.name
        );
        ctx.critical(message.clone());
        return Err(StageError::MissingLayer {
            path: LayerPath::default(),
            context: message,
        });
    };
    let raster = ctx
        .engine()
        .raster_info(&input)
        .map_err(|_| StageError::MissingLayer {
            path: input.clone(),
            context: format!("activity {} layer is not readable", activity.name),
        })?;
    let usable_info = ctx
        .engine()
        .vector_info(&usable)
        .map_err(|source| StageError::Engine {
            operation: "vector info",
            source,
        })?;
    if raster.crs != usable_info.crs {
        ctx.warn("Skipping masking, activity layer and mask layer(s) have different CRS");
        return Err(StageError::CrsMismatch {
            expected: raster.crs,
            found: usable_info.crs,
        });
    }
    if !usable_info
        .extent
        .is_some_and(|m| m.intersects(&raster.extent))
    {
        ctx.warn(
            "Skipping masking, the extents of the activity layer and mask layers do not overlap.",
        );
        return Err(StageError::ExtentDisjoint(format!(
            "activity {input} and mask {mask}"
        )));
    }

    let base = &ctx.config().settings.base_dir;
    let request = ClipRequest {
        input,
        mask: usable,
        nodata: NODATA,
        extent: extent.clone(),
        output: OutputTarget::File(layer_output_path(
            base,
            FINAL_MASKED_ACTIVITIES_DIR,
            &activity.name,
            "",
        )),
    };
    ctx.log(format!(
        "Used parameters for masking the activity {}: {}",
        activity.name,
        params(&request)
    ));
    ctx.check_cancelled()?;
    ctx.invoke("clip raster by mask", |engine, fb| engine.clip_by_mask(&request, fb))
}

/// A single mask layer from `paths`, merging when there is more than one.
/// Unreadable layers are left out of the merge.
fn load_mask<E: ProcessingEngine>(
    ctx: &mut AnalysisContext<E>,
    paths: &[LayerPath],
) -> Result<LayerPath, StageError> {
    if let [single] = paths {
        return Ok(single.clone());
    }
    let valid: Vec<LayerPath> = paths
        .iter()
        .filter(|path| {
            let readable = ctx.engine().vector_info(path).is_ok();
            if !readable {
                ctx.warn(format!("Skipping invalid mask layer {path} from masking."));
            }
            readable
        })
        .cloned()
        .collect();
    match valid.as_slice() {
        [] => Err(StageError::MissingLayer {
            path: paths.first().cloned().unwrap_or_default(),
            context: "no valid mask layer to merge".to_owned(),
        }),
        [single] => Ok(single.clone()),
        _ => {
            ctx.log(format!("Used parameters for merging mask layers: {}", params(&valid)));
            ctx.invoke("merge vector layers", |engine, fb| engine.merge_vectors(&valid, fb))
        }
    }
}

/// The part of the extent the mask does not cover.
fn usable_mask<E: ProcessingEngine>(
    ctx: &mut AnalysisContext<E>,
    mask: &LayerPath,
    extent: &AnalysisExtent,
) -> Result<LayerPath, StageError> {
    let extent_layer = ctx.invoke("extent to layer", |engine, fb| {
        engine.extent_to_layer(extent, fb)
    })?;
    ctx.invoke("symmetric difference", |engine, fb| {
        engine.symmetric_difference(mask, &extent_layer, fb)
    })
}

fn invalid_layer<E: ProcessingEngine>(ctx: &AnalysisContext<E>, mask: &LayerPath) -> StageError {
    ctx.warn(format!(
        "Skipping activities masking using layer {mask}, not a valid layer."
    ));
    StageError::MissingLayer {
        path: mask.clone(),
        context: "not a valid vector layer".to_owned(),
    }
}
