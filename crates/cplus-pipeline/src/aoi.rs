//! Area of interest: the extent every later stage covers.

use crate::align::align_extent;
use crate::context::AnalysisContext;
use crate::engine::ProcessingEngine;
use crate::graph::ActivityGraph;
use crate::types::{AnalysisExtent, Crs, DEFAULT_CRS};

/// The scenario extent, snapped onto the pixel grid of the first
/// pathway raster, or of the first activity raster when no activity has
/// a pathway.
///
/// The CRS is that raster's CRS, or `EPSG:4326` when there is no
/// readable layer. The scenario extent is read in that CRS as is.
/// Snapping failures are logged and the extent is used unsnapped.
pub fn resolve_analysis_extent<E: ProcessingEngine>(
    ctx: &AnalysisContext<E>,
    graph: &ActivityGraph,
) -> AnalysisExtent {
    let original = ctx.config().scenario.extent;
    let first = graph
        .distinct_pathways()
        .first()
        .map(|&id| graph.pathway(id).path.clone())
        .or_else(|| {
            graph
                .activity_ids()
                .find_map(|id| graph.activity(id).path.clone())
        });

    let info = first.as_ref().map(|path| (path, ctx.engine().raster_info(path)));
    let (crs, snapped) = match info {
        Some((_, Ok(info))) => {
            let snapped = align_extent(&info.extent, info.x_res, info.y_res, &original)
                .unwrap_or_else(|err| {
                    ctx.log(format!(
                        "Problem snapping area of interest extent, using the original extent, {err}"
                    ));
                    original
                });
            (info.crs, snapped)
        }
        Some((path, Err(err))) => {
            ctx.log(format!(
                "Problem snapping area of interest extent, using the original extent, \
                 layer {path} is unreadable: {err}"
            ));
            (Crs::new(DEFAULT_CRS), original)
        }
        None => (Crs::new(DEFAULT_CRS), original),
    };

    ctx.log(format!("Original area of interest extent: {}", original.to_wkt()));
    ctx.log(format!("Snapped area of interest extent {}", snapped.to_wkt()));
    AnalysisExtent::new(snapped, crs)
}
