//! Weighting: combine each pathway with its priority weighting layers.
//!
//! `weighted = si * pathway + Σ group value * pwl`, over every group with
//! a positive value. A pathway with nothing to add keeps its raster.

use crate::activity::build_activities;
use crate::algebra::weighted_sum;
use crate::context::{AnalysisContext, params};
use crate::engine::{AlgebraRequest, ProcessingEngine};
use crate::error::StageError;
use crate::graph::{ActivityGraph, PathwayId};
use crate::naming::WEIGHTED_PATHWAYS_DIR;
use crate::snap::validate_activity_sources;
use crate::types::{AnalysisExtent, LayerPath};

/// Result of the weighting stage.
#[derive(Debug)]
pub struct Weighting {
    /// Graph with weighted pathway paths.
    pub graph: ActivityGraph,
    /// Set when no activity had pathways, so weighting built the
    /// activity rasters straight from their own layers.
    pub activities_built: bool,
}

/// Weight every distinct pathway.
///
/// # Errors
///
/// [`StageError::Configuration`] when there are no activities or one has
/// no sources, [`StageError::Engine`] or [`StageError::Cancelled`].
pub fn weight_pathways<E: ProcessingEngine>(
    ctx: &mut AnalysisContext<E>,
    graph: ActivityGraph,
    extent: &AnalysisExtent,
) -> Result<Weighting, StageError> {
    ctx.status("Weighting of pathways");

    if graph.activity_count() == 0 {
        let message = "No defined activities for running pathways weighting.";
        ctx.critical(message);
        return Err(StageError::Configuration(message.to_owned()));
    }
    validate_activity_sources(ctx, &graph)?;

    if !graph.has_pathways() {
        ctx.log("No activity pathways to weight, creating activities from their layers");
        let graph = build_activities(ctx, graph, extent)?;
        return Ok(Weighting {
            graph,
            activities_built: true,
        });
    }

    run(ctx, graph, extent)
        .map(|graph| Weighting {
            graph,
            activities_built: false,
        })
        .map_err(|err| ctx.problem("weighting pathways", err))
}

fn run<E: ProcessingEngine>(
    ctx: &mut AnalysisContext<E>,
    mut graph: ActivityGraph,
    extent: &AnalysisExtent,
) -> Result<ActivityGraph, StageError> {
    for id in graph.distinct_pathways() {
        ctx.check_cancelled()?;
        let Some(request) = weighting_request(ctx, &graph, id, extent) else {
            continue;
        };
        ctx.log(format!(
            "Used parameters for calculating weighting pathways: {}",
            params(&request)
        ));
        ctx.check_cancelled()?;
        let path = ctx.invoke("raster algebra", |engine, fb| engine.raster_algebra(&request, fb))?;
        graph.pathway_mut(id).path = path;
    }
    Ok(graph)
}

/// The algebra call for one pathway, or `None` when neither the
/// suitability index nor any priority layer contributes.
fn weighting_request<E: ProcessingEngine>(
    ctx: &AnalysisContext<E>,
    graph: &ActivityGraph,
    id: PathwayId,
    extent: &AnalysisExtent,
) -> Option<AlgebraRequest> {
    let config = ctx.config();
    let pathway = graph.pathway(id);
    let suitability_index = config.settings.pathway_suitability_index;

    let stem = pathway.path.stem();
    let mut layers = vec![pathway.path.clone()];
    let mut terms: Vec<(f64, String)> = Vec::new();
    let mut run = suitability_index > 0.0;

    for reference in &pathway.priority_layers {
        if config.priority_layer_groups.is_empty() {
            ctx.log(
                "There are no defined priority layers in groups, skipping the inclusion of PWLs \
                 in pathways weighting.",
            );
            break;
        }
        let Some(layer) = config.get_priority_layer(reference.uuid) else {
            continue;
        };
        let pwl: Option<LayerPath> = pathway
            .priority_layer_paths
            .get(&reference.uuid)
            .cloned()
            .or_else(|| layer.path.clone());
        let Some(pwl) = pwl.filter(|p| !p.is_empty() && ctx.engine().layer_exists(p)) else {
            ctx.warn(format!(
                "Path {} for priority weighting layer {} doesn't exist, skipping the layer from \
                 the pathway {} weighting.",
                layer.path.as_ref().map_or_else(String::new, ToString::to_string),
                layer.name,
                pathway.name
            ));
            continue;
        };

        let pwl_stem = pwl.stem();
        for named in config.priority_layers_named(&reference.name) {
            for group in named.groups.iter().filter(|g| g.value > 0.0) {
                if !layers.contains(&pwl) {
                    layers.push(pwl.clone());
                }
                terms.push((group.value, pwl_stem.clone()));
                run = true;
            }
        }
    }

    if !run {
        return None;
    }
    let save = config.settings.outputs.landuse_weighted;
    Some(AlgebraRequest {
        expression: weighted_sum(&stem, suitability_index, &terms),
        layers,
        extent: Some(extent.clone()),
        output: ctx.output_target(save, WEIGHTED_PATHWAYS_DIR, &pathway.name, ""),
    })
}
