//! Contract between the pipeline and the raster/vector processing
//! engine.
//!
//! The pipeline never touches pixels or geometries itself. Every
//! transformation is a call to one of the [`ProcessingEngine`]
//! primitives, described by a serializable request so stages can log
//! the exact parameters they used.
//!
//! Engine calls are synchronous and not preemptible: a cancellation
//! requested while a primitive runs is honoured once it returns.

use serde::{Deserialize, Serialize};

use crate::algebra::Expr;
use crate::config::ResamplingMethod;
use crate::error::EngineError;
use crate::events::Feedback;
use crate::types::{AnalysisExtent, Crs, Extent, LayerPath};

/// Grid and metadata of a raster layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterInfo {
    /// Bounding box.
    pub extent: Extent,
    /// Pixel width in map units.
    pub x_res: f64,
    /// Pixel height in map units.
    pub y_res: f64,
    /// Columns.
    pub width: usize,
    /// Rows.
    pub height: usize,
    /// Coordinate reference system.
    pub crs: Crs,
    /// Nodata tag of band 1, if any.
    pub nodata: Option<f64>,
}

/// Geometry class of a vector layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeometryKind {
    /// Polygons and multipolygons only.
    Polygon,
    /// Lines only.
    Line,
    /// Points only.
    Point,
    /// More than one class.
    Mixed,
    /// No features.
    Empty,
}

/// Metadata of a vector layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorInfo {
    /// Bounding box of all features, `None` when empty.
    pub extent: Option<Extent>,
    /// Coordinate reference system.
    pub crs: Crs,
    /// Geometry class.
    pub geometry: GeometryKind,
    /// Number of features.
    pub feature_count: usize,
}

impl VectorInfo {
    /// Whether the layer has features and they are all polygons.
    #[must_use]
    pub fn is_valid_polygon_layer(&self) -> bool {
        self.feature_count > 0 && self.geometry == GeometryKind::Polygon
    }
}

/// Summary statistics of one band, over valid pixels only.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandStatistics {
    /// Smallest value.
    pub min: f64,
    /// Largest value.
    pub max: f64,
    /// Mean value.
    pub mean: f64,
    /// Number of valid pixels.
    pub valid_count: usize,
}

/// Where a primitive writes its result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputTarget {
    /// A fresh engine-owned temporary layer.
    Temporary,
    /// A named layer.
    File(LayerPath),
}

/// Cell-wise reduction applied by [`ProcessingEngine::cell_statistics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellStatistic {
    /// Sum of the contributing pixels.
    Sum,
}

/// Pixel neighbourhood used to label connected regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Connectivity {
    /// Edge neighbours.
    Four,
    /// Edge and corner neighbours.
    Eight,
}

/// Resample a raster onto another raster's grid.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlignRequest {
    /// Layer to resample.
    pub input: LayerPath,
    /// Layer whose grid the output uses.
    pub reference: LayerPath,
    /// Area to cover, in the reference CRS.
    pub extent: Extent,
    /// Output CRS.
    pub crs: Crs,
    /// How source cells are combined.
    pub resampling_method: ResamplingMethod,
    /// Scale values by the ratio of target to source cell area.
    pub rescale_values: bool,
    /// Destination.
    pub output: OutputTarget,
}

/// Rewrite the nodata tag of a raster.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SetNodataRequest {
    /// Layer to rewrite.
    pub input: LayerPath,
    /// New nodata value.
    pub nodata: f64,
    /// Destination.
    pub output: OutputTarget,
}

/// Evaluate a raster algebra expression.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlgebraRequest {
    /// Expression, rendered in calculator syntax when logged.
    #[serde(serialize_with = "serialize_display")]
    pub expression: Expr,
    /// Layers the expression refers to, by stem.
    pub layers: Vec<LayerPath>,
    /// Area to evaluate over. Defaults to the first layer's extent.
    pub extent: Option<AnalysisExtent>,
    /// Destination.
    pub output: OutputTarget,
}

/// Cell-wise reduction over a raster stack.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellStatisticsRequest {
    /// Reduction.
    pub statistic: CellStatistic,
    /// Input stack.
    pub inputs: Vec<LayerPath>,
    /// Area to cover.
    pub extent: AnalysisExtent,
    /// Skip nodata inputs instead of propagating them.
    pub ignore_nodata: bool,
    /// Nodata value of the output.
    pub output_nodata: f64,
    /// Grid template.
    pub reference: LayerPath,
    /// Destination.
    pub output: OutputTarget,
}

/// Keep raster cells inside a polygon layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClipRequest {
    /// Raster to clip.
    pub input: LayerPath,
    /// Polygon layer.
    pub mask: LayerPath,
    /// Value of cells outside the mask.
    pub nodata: f64,
    /// Area to cover.
    pub extent: AnalysisExtent,
    /// Destination.
    pub output: OutputTarget,
}

/// Merge small connected regions into their neighbours.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SieveRequest {
    /// Raster to sieve.
    pub input: LayerPath,
    /// Minimum region size in pixels.
    pub threshold: f64,
    /// Region neighbourhood.
    pub connectivity: Connectivity,
    /// Destination.
    pub output: OutputTarget,
}

/// Per-pixel index of the largest layer in a stack.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HighestPositionRequest {
    /// Ordered stack. Earlier layers win ties.
    pub inputs: Vec<LayerPath>,
    /// Area to cover.
    pub extent: AnalysisExtent,
    /// Skip nodata inputs instead of propagating them.
    pub ignore_nodata: bool,
    /// Nodata value of the output.
    pub output_nodata: f64,
    /// Grid template.
    pub reference: LayerPath,
    /// Destination.
    pub output: OutputTarget,
}

fn serialize_display<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
where
    T: std::fmt::Display,
    S: serde::Serializer,
{
    serializer.collect_str(value)
}

/// Raster and vector primitives the pipeline is built from.
///
/// Queries take `&self`. Primitives take `&mut self` because they
/// create layers, and report progress through the [`Feedback`] they are
/// handed. Every primitive returns the path of the layer it produced.
pub trait ProcessingEngine {
    /// Whether a raster or vector layer exists at `path`.
    fn layer_exists(&self, path: &LayerPath) -> bool;

    /// Grid and metadata of a raster.
    ///
    /// # Errors
    ///
    /// [`EngineError::LayerNotFound`] or [`EngineError::WrongLayerKind`].
    fn raster_info(&self, path: &LayerPath) -> Result<RasterInfo, EngineError>;

    /// Metadata of a vector layer.
    ///
    /// # Errors
    ///
    /// [`EngineError::LayerNotFound`] or [`EngineError::WrongLayerKind`].
    fn vector_info(&self, path: &LayerPath) -> Result<VectorInfo, EngineError>;

    /// Statistics of a band over its valid pixels. Bands are 1-based.
    ///
    /// # Errors
    ///
    /// Fails when the raster is missing, the band does not exist, or no
    /// pixel is valid.
    fn band_statistics(&self, path: &LayerPath, band: usize)
    -> Result<BandStatistics, EngineError>;

    /// Resample a raster onto a reference grid.
    ///
    /// # Errors
    ///
    /// Fails when a layer is missing, the CRSs differ or the resampling
    /// method is not supported.
    fn align_raster(
        &mut self,
        request: &AlignRequest,
        feedback: &Feedback<'_>,
    ) -> Result<LayerPath, EngineError>;

    /// Rewrite a raster's nodata tag. Pixels carrying the old tag take
    /// the new value.
    ///
    /// # Errors
    ///
    /// Fails when the raster is missing.
    fn set_nodata(
        &mut self,
        request: &SetNodataRequest,
        feedback: &Feedback<'_>,
    ) -> Result<LayerPath, EngineError>;

    /// Evaluate an algebra expression.
    ///
    /// # Errors
    ///
    /// Fails when a referenced layer is missing or unlisted.
    fn raster_algebra(
        &mut self,
        request: &AlgebraRequest,
        feedback: &Feedback<'_>,
    ) -> Result<LayerPath, EngineError>;

    /// Cell-wise reduction over a stack.
    ///
    /// # Errors
    ///
    /// Fails when the stack is empty or a layer is missing.
    fn cell_statistics(
        &mut self,
        request: &CellStatisticsRequest,
        feedback: &Feedback<'_>,
    ) -> Result<LayerPath, EngineError>;

    /// Keep raster cells inside a polygon layer.
    ///
    /// # Errors
    ///
    /// Fails when a layer is missing or the CRSs differ.
    fn clip_by_mask(
        &mut self,
        request: &ClipRequest,
        feedback: &Feedback<'_>,
    ) -> Result<LayerPath, EngineError>;

    /// Merge vector layers into one.
    ///
    /// # Errors
    ///
    /// Fails when a layer is missing or the CRSs differ.
    fn merge_vectors(
        &mut self,
        inputs: &[LayerPath],
        feedback: &Feedback<'_>,
    ) -> Result<LayerPath, EngineError>;

    /// Polygons covered by exactly one of the two layers.
    ///
    /// # Errors
    ///
    /// Fails when a layer is missing or the CRSs differ.
    fn symmetric_difference(
        &mut self,
        input: &LayerPath,
        overlay: &LayerPath,
        feedback: &Feedback<'_>,
    ) -> Result<LayerPath, EngineError>;

    /// A single-polygon layer covering an extent.
    ///
    /// # Errors
    ///
    /// Fails when the extent is not finite.
    fn extent_to_layer(
        &mut self,
        extent: &AnalysisExtent,
        feedback: &Feedback<'_>,
    ) -> Result<LayerPath, EngineError>;

    /// Merge small connected regions into their largest neighbour.
    ///
    /// # Errors
    ///
    /// Fails when the raster is missing.
    fn sieve(
        &mut self,
        request: &SieveRequest,
        feedback: &Feedback<'_>,
    ) -> Result<LayerPath, EngineError>;

    /// Per-pixel 1-based index of the largest layer in a stack.
    ///
    /// # Errors
    ///
    /// Fails when the stack is empty or a layer is missing.
    fn highest_position(
        &mut self,
        request: &HighestPositionRequest,
        feedback: &Feedback<'_>,
    ) -> Result<LayerPath, EngineError>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::algebra::BandRef;

    #[test]
    fn algebra_request_logs_calculator_syntax() {
        let request = AlgebraRequest {
            expression: Expr::Constant(2.0) * Expr::band(BandRef::first("forest")),
            layers: vec![LayerPath::from("forest.tif")],
            extent: None,
            output: OutputTarget::Temporary,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["expression"], r#"(2*"forest@1")"#);
        assert_eq!(json["output"], "temporary");
    }

    #[test]
    fn polygon_layer_validity() {
        let info = VectorInfo {
            extent: None,
            crs: Crs::default(),
            geometry: GeometryKind::Polygon,
            feature_count: 0,
        };
        assert!(!info.is_valid_polygon_layer());
        let info = VectorInfo {
            feature_count: 3,
            ..info
        };
        assert!(info.is_valid_polygon_layer());
    }
}
