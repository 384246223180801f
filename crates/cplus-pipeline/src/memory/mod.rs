//! In-memory [`ProcessingEngine`].
//!
//! Layers live in hash maps keyed by [`LayerPath`]. Nothing is read
//! from or written to disk: a "file" output is a layer registered under
//! that path, and temporary outputs get a fresh `/vsimem/` path. The
//! whole store round-trips through [`Dataset`] for the binary.
//!
//! Output grids take the template layer's resolution and CRS over the
//! requested extent, sampling each input at the output cell centres.
//! Layers in a different CRS are rejected, since reprojection is not
//! implemented.

pub mod raster;
pub mod resample;
pub mod sieve;
pub mod vector;

use std::collections::{BTreeMap, HashMap};

use geo::Geometry;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::algebra::BandRef;
use crate::engine::{
    AlgebraRequest, AlignRequest, BandStatistics, CellStatistic, CellStatisticsRequest,
    ClipRequest, HighestPositionRequest, OutputTarget, ProcessingEngine, RasterInfo,
    SetNodataRequest, SieveRequest, VectorInfo,
};
use crate::error::EngineError;
use crate::events::Feedback;
use crate::types::{AnalysisExtent, Crs, LayerPath, LayerType, NODATA};

pub use raster::{GridSpec, Raster};
pub use vector::VectorLayer;

/// Serializable snapshot of every layer in a [`MemoryEngine`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    /// Raster layers.
    #[serde(default)]
    pub rasters: BTreeMap<LayerPath, Raster>,
    /// Vector layers.
    #[serde(default)]
    pub vectors: BTreeMap<LayerPath, VectorLayer>,
}

/// Deterministic engine over in-memory layers.
#[derive(Debug, Clone, Default)]
pub struct MemoryEngine {
    rasters: HashMap<LayerPath, Raster>,
    vectors: HashMap<LayerPath, VectorLayer>,
}

impl MemoryEngine {
    /// An engine with no layers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// An engine holding every layer of a dataset.
    #[must_use]
    pub fn from_dataset(dataset: Dataset) -> Self {
        Self {
            rasters: dataset.rasters.into_iter().collect(),
            vectors: dataset.vectors.into_iter().collect(),
        }
    }

    /// Snapshot of every layer, in path order.
    #[must_use]
    pub fn to_dataset(&self) -> Dataset {
        Dataset {
            rasters: self.rasters.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            vectors: self.vectors.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        }
    }

    /// Register a raster, replacing any layer at that path.
    pub fn insert_raster(&mut self, path: impl Into<LayerPath>, raster: Raster) {
        let path = path.into();
        self.vectors.remove(&path);
        self.rasters.insert(path, raster);
    }

    /// Register a vector layer, replacing any layer at that path.
    pub fn insert_vector(&mut self, path: impl Into<LayerPath>, layer: VectorLayer) {
        let path = path.into();
        self.rasters.remove(&path);
        self.vectors.insert(path, layer);
    }

    /// The raster at `path`, if any.
    #[must_use]
    pub fn raster(&self, path: &LayerPath) -> Option<&Raster> {
        self.rasters.get(path)
    }

    /// The vector layer at `path`, if any.
    #[must_use]
    pub fn vector(&self, path: &LayerPath) -> Option<&VectorLayer> {
        self.vectors.get(path)
    }

    /// Number of layers held.
    #[must_use]
    pub fn layer_count(&self) -> usize {
        self.rasters.len() + self.vectors.len()
    }

    fn get_raster(&self, path: &LayerPath) -> Result<&Raster, EngineError> {
        self.rasters.get(path).ok_or_else(|| self.missing(path, LayerType::Raster))
    }

    fn get_vector(&self, path: &LayerPath) -> Result<&VectorLayer, EngineError> {
        self.vectors.get(path).ok_or_else(|| self.missing(path, LayerType::Vector))
    }

    fn missing(&self, path: &LayerPath, expected: LayerType) -> EngineError {
        if self.layer_exists(path) {
            EngineError::WrongLayerKind {
                path: path.clone(),
                expected,
            }
        } else {
            EngineError::LayerNotFound(path.clone())
        }
    }

    fn output_path(target: &OutputTarget, extension: &str) -> LayerPath {
        match target {
            OutputTarget::File(path) => path.clone(),
            OutputTarget::Temporary => {
                LayerPath::new(format!("/vsimem/{}.{extension}", Uuid::new_v4().simple()))
            }
        }
    }

    fn store_raster(&mut self, target: &OutputTarget, raster: Raster) -> LayerPath {
        let path = Self::output_path(target, "tif");
        self.insert_raster(path.clone(), raster);
        path
    }

    fn store_vector(&mut self, layer: VectorLayer) -> LayerPath {
        let path = Self::output_path(&OutputTarget::Temporary, "geojson");
        self.insert_vector(path.clone(), layer);
        path
    }

    /// Output grid at `template`'s resolution over `extent`, after
    /// checking every input shares the extent's CRS.
    fn output_grid(
        &self,
        template: &LayerPath,
        extent: &AnalysisExtent,
        inputs: &[LayerPath],
    ) -> Result<GridSpec, EngineError> {
        let template = self.get_raster(template)?;
        let grid = template.grid();
        for path in inputs {
            check_crs(path, &self.get_raster(path)?.grid().crs, &extent.crs)?;
        }
        GridSpec::new(&extent.extent, grid.x_res, grid.y_res, extent.crs.clone())
    }

    fn stack(&self, inputs: &[LayerPath]) -> Result<Vec<&Raster>, EngineError> {
        inputs.iter().map(|p| self.get_raster(p)).collect()
    }
}

fn check_crs(path: &LayerPath, found: &Crs, expected: &Crs) -> Result<(), EngineError> {
    if found == expected {
        Ok(())
    } else {
        Err(EngineError::Unsupported(format!(
            "layer {path} is in {found}, expected {expected}; reprojection is not available"
        )))
    }
}

/// Pixel-wise raster builder that reports progress once per row.
fn build_raster<F>(grid: GridSpec, nodata: f64, feedback: &Feedback<'_>, mut pixel: F) -> Raster
where
    F: FnMut(f64, f64) -> Option<f64>,
{
    let cols = grid.cols;
    let rows = f64::from(grid.rows);
    let mut done = 0_u32;
    Raster::from_fn(grid, Some(nodata), |x, y| {
        let value = pixel(x, y);
        done += 1;
        if done % cols == 0 {
            feedback.set_progress(f64::from(done / cols) / rows * 100.0);
        }
        value
    })
}

impl ProcessingEngine for MemoryEngine {
    fn layer_exists(&self, path: &LayerPath) -> bool {
        self.rasters.contains_key(path) || self.vectors.contains_key(path)
    }

    fn raster_info(&self, path: &LayerPath) -> Result<RasterInfo, EngineError> {
        Ok(self.get_raster(path)?.info())
    }

    fn vector_info(&self, path: &LayerPath) -> Result<VectorInfo, EngineError> {
        Ok(self.get_vector(path)?.info())
    }

    fn band_statistics(
        &self,
        path: &LayerPath,
        band: usize,
    ) -> Result<BandStatistics, EngineError> {
        if band != 1 {
            return Err(EngineError::Unsupported(format!("band {band} of {path}")));
        }
        self.get_raster(path)?
            .statistics()
            .ok_or_else(|| EngineError::NoValidPixels(path.clone()))
    }

    fn align_raster(
        &mut self,
        request: &AlignRequest,
        feedback: &Feedback<'_>,
    ) -> Result<LayerPath, EngineError> {
        let input = self.get_raster(&request.input)?;
        let reference = self.get_raster(&request.reference)?;
        check_crs(&request.input, &input.grid().crs, &request.crs)?;
        let grid = GridSpec::new(
            &request.extent,
            reference.grid().x_res,
            reference.grid().y_res,
            request.crs.clone(),
        )?;
        // The output tag is always NODATA; callers restore the source tag
        // with `set_nodata`.
        let output = resample::resample(
            input,
            grid,
            request.resampling_method,
            request.rescale_values,
            NODATA,
        )?;
        feedback.set_progress(100.0);
        Ok(self.store_raster(&request.output, output))
    }

    fn set_nodata(
        &mut self,
        request: &SetNodataRequest,
        feedback: &Feedback<'_>,
    ) -> Result<LayerPath, EngineError> {
        let output = self.get_raster(&request.input)?.with_nodata(request.nodata);
        feedback.set_progress(100.0);
        Ok(self.store_raster(&request.output, output))
    }

    fn raster_algebra(
        &mut self,
        request: &AlgebraRequest,
        feedback: &Feedback<'_>,
    ) -> Result<LayerPath, EngineError> {
        let first = request.layers.first().ok_or(EngineError::NoInputs("raster algebra"))?;
        let template = self.get_raster(first)?;
        let extent = request.extent.clone().unwrap_or_else(|| {
            AnalysisExtent::new(template.grid().extent(), template.grid().crs.clone())
        });

        let mut by_stem: HashMap<String, &Raster> = HashMap::new();
        for path in &request.layers {
            let raster = self.get_raster(path)?;
            check_crs(path, &raster.grid().crs, &extent.crs)?;
            by_stem.insert(path.stem(), raster);
        }
        for band in request.expression.references() {
            if !by_stem.contains_key(&band.layer) {
                return Err(EngineError::UnresolvedReference(band.layer.clone()));
            }
            if band.band != 1 {
                return Err(EngineError::Unsupported(format!("band {} of {}", band.band, band.layer)));
            }
        }

        let grid = GridSpec::new(
            &extent.extent,
            template.grid().x_res,
            template.grid().y_res,
            extent.crs.clone(),
        )?;
        let output = build_raster(grid, NODATA, feedback, |x, y| {
            request
                .expression
                .evaluate(&|band: &BandRef| by_stem.get(&band.layer).and_then(|r| r.sample(x, y)))
        });
        Ok(self.store_raster(&request.output, output))
    }

    fn cell_statistics(
        &mut self,
        request: &CellStatisticsRequest,
        feedback: &Feedback<'_>,
    ) -> Result<LayerPath, EngineError> {
        if request.inputs.is_empty() {
            return Err(EngineError::NoInputs("cell statistics"));
        }
        let grid = self.output_grid(&request.reference, &request.extent, &request.inputs)?;
        let stack = self.stack(&request.inputs)?;
        let CellStatistic::Sum = request.statistic;
        let output = build_raster(grid, request.output_nodata, feedback, |x, y| {
            let mut sum = None;
            for raster in &stack {
                match raster.sample(x, y) {
                    Some(v) => sum = Some(sum.unwrap_or(0.0) + v),
                    None if !request.ignore_nodata => return None,
                    None => {}
                }
            }
            sum
        });
        Ok(self.store_raster(&request.output, output))
    }

    fn clip_by_mask(
        &mut self,
        request: &ClipRequest,
        feedback: &Feedback<'_>,
    ) -> Result<LayerPath, EngineError> {
        let input = self.get_raster(&request.input)?;
        let mask = self.get_vector(&request.mask)?;
        check_crs(&request.input, &input.grid().crs, &request.extent.crs)?;
        check_crs(&request.mask, &mask.crs, &request.extent.crs)?;
        let grid = GridSpec::new(
            &request.extent.extent,
            input.grid().x_res,
            input.grid().y_res,
            request.extent.crs.clone(),
        )?;
        let index = vector::PolygonIndex::new(mask);
        let output = build_raster(grid, request.nodata, feedback, |x, y| {
            if index.contains(x, y) {
                input.sample(x, y)
            } else {
                None
            }
        });
        Ok(self.store_raster(&request.output, output))
    }

    fn merge_vectors(
        &mut self,
        inputs: &[LayerPath],
        feedback: &Feedback<'_>,
    ) -> Result<LayerPath, EngineError> {
        let first = inputs.first().ok_or(EngineError::NoInputs("merge vectors"))?;
        let crs = self.get_vector(first)?.crs.clone();
        let mut features = Vec::new();
        for path in inputs {
            let layer = self.get_vector(path)?;
            check_crs(path, &layer.crs, &crs)?;
            features.extend(layer.features.iter().cloned());
        }
        feedback.set_progress(100.0);
        Ok(self.store_vector(VectorLayer::new(crs, features)))
    }

    fn symmetric_difference(
        &mut self,
        input: &LayerPath,
        overlay: &LayerPath,
        feedback: &Feedback<'_>,
    ) -> Result<LayerPath, EngineError> {
        let a = self.get_vector(input)?;
        let b = self.get_vector(overlay)?;
        check_crs(overlay, &b.crs, &a.crs)?;
        let difference = vector::symmetric_difference(a, b);
        let features = if difference.0.is_empty() {
            Vec::new()
        } else {
            vec![Geometry::MultiPolygon(difference)]
        };
        let layer = VectorLayer::new(a.crs.clone(), features);
        feedback.set_progress(100.0);
        Ok(self.store_vector(layer))
    }

    fn extent_to_layer(
        &mut self,
        extent: &AnalysisExtent,
        feedback: &Feedback<'_>,
    ) -> Result<LayerPath, EngineError> {
        if !extent.extent.is_valid() {
            return Err(EngineError::InvalidGrid(format!("extent {extent} is not valid")));
        }
        let layer = VectorLayer::new(
            extent.crs.clone(),
            vec![Geometry::Polygon(extent.extent.to_polygon())],
        );
        feedback.set_progress(100.0);
        Ok(self.store_vector(layer))
    }

    fn sieve(
        &mut self,
        request: &SieveRequest,
        feedback: &Feedback<'_>,
    ) -> Result<LayerPath, EngineError> {
        let input = self.get_raster(&request.input)?;
        let output = sieve::sieve(input, request.threshold, request.connectivity, feedback);
        Ok(self.store_raster(&request.output, output))
    }

    #[allow(clippy::cast_precision_loss)]
    fn highest_position(
        &mut self,
        request: &HighestPositionRequest,
        feedback: &Feedback<'_>,
    ) -> Result<LayerPath, EngineError> {
        if request.inputs.is_empty() {
            return Err(EngineError::NoInputs("highest position"));
        }
        let grid = self.output_grid(&request.reference, &request.extent, &request.inputs)?;
        let stack = self.stack(&request.inputs)?;
        let output = build_raster(grid, request.output_nodata, feedback, |x, y| {
            let mut best: Option<(usize, f64)> = None;
            for (position, raster) in stack.iter().enumerate() {
                match raster.sample(x, y) {
                    Some(v) if best.is_none_or(|(_, b)| v > b) => best = Some((position, v)),
                    Some(_) => {}
                    None if !request.ignore_nodata => return None,
                    None => {}
                }
            }
            best.map(|(position, _)| (position + 1) as f64)
        });
        Ok(self.store_raster(&request.output, output))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use geo::polygon;
    use proptest::prelude::*;

    use super::*;
    use crate::algebra;
    use crate::engine::{Connectivity, GeometryKind};
    use crate::events::{CancellationToken, NullSink};
    use crate::types::Extent;

    fn grid(cols: u32, rows: u32) -> GridSpec {
        let extent = Extent::new(0.0, f64::from(cols), 0.0, f64::from(rows));
        GridSpec::new(&extent, 1.0, 1.0, Crs::default()).unwrap()
    }

    fn aoi(cols: u32, rows: u32) -> AnalysisExtent {
        AnalysisExtent::new(
            Extent::new(0.0, f64::from(cols), 0.0, f64::from(rows)),
            Crs::default(),
        )
    }

    fn with_feedback<T>(f: impl FnOnce(&Feedback<'_>) -> T) -> T {
        let token = CancellationToken::new();
        let feedback = Feedback::new(&NullSink, &token);
        f(&feedback)
    }

    fn engine_with(layers: &[(&str, Vec<f64>)]) -> MemoryEngine {
        let mut engine = MemoryEngine::new();
        for (name, values) in layers {
            let cols = u32::try_from(values.len()).unwrap();
            let raster = Raster::from_values(grid(cols, 1), Some(NODATA), values.clone()).unwrap();
            engine.insert_raster(*name, raster);
        }
        engine
    }

    fn values(engine: &MemoryEngine, path: &LayerPath) -> Vec<Option<f64>> {
        engine.raster(path).unwrap().valid_values().collect()
    }

    #[test]
    fn sum_ignoring_nodata() {
        let mut engine = engine_with(&[
            ("a.tif", vec![1.0, NODATA, NODATA]),
            ("b.tif", vec![2.0, 5.0, NODATA]),
        ]);
        let inputs = vec![LayerPath::from("a.tif"), LayerPath::from("b.tif")];
        let request = CellStatisticsRequest {
            statistic: CellStatistic::Sum,
            inputs: inputs.clone(),
            extent: aoi(3, 1),
            ignore_nodata: true,
            output_nodata: NODATA,
            reference: inputs[0].clone(),
            output: OutputTarget::Temporary,
        };
        let out = with_feedback(|fb| engine.cell_statistics(&request, fb)).unwrap();
        assert_eq!(values(&engine, &out), vec![Some(3.0), Some(5.0), None]);

        let strict = CellStatisticsRequest {
            ignore_nodata: false,
            ..request
        };
        let out = with_feedback(|fb| engine.cell_statistics(&strict, fb)).unwrap();
        assert_eq!(values(&engine, &out), vec![Some(3.0), None, None]);
    }

    #[test]
    fn zero_output_nodata_folds_zeros() {
        let mut engine = engine_with(&[("a.tif", vec![0.0, 2.0, NODATA])]);
        let request = CellStatisticsRequest {
            statistic: CellStatistic::Sum,
            inputs: vec![LayerPath::from("a.tif")],
            extent: aoi(3, 1),
            ignore_nodata: true,
            output_nodata: 0.0,
            reference: LayerPath::from("a.tif"),
            output: OutputTarget::File(LayerPath::from("clean.tif")),
        };
        let out = with_feedback(|fb| engine.cell_statistics(&request, fb)).unwrap();
        assert_eq!(out, LayerPath::from("clean.tif"));
        assert_eq!(values(&engine, &out), vec![None, Some(2.0), None]);
    }

    #[test]
    fn highest_position_breaks_ties_by_stack_order() {
        let mut engine = engine_with(&[
            ("first.tif", vec![5.0, 3.0, 5.0, NODATA]),
            ("second.tif", vec![3.0, 5.0, 5.0, NODATA]),
        ]);
        let inputs = vec![LayerPath::from("first.tif"), LayerPath::from("second.tif")];
        let request = HighestPositionRequest {
            inputs: inputs.clone(),
            extent: aoi(4, 1),
            ignore_nodata: true,
            output_nodata: NODATA,
            reference: inputs[0].clone(),
            output: OutputTarget::Temporary,
        };
        let out = with_feedback(|fb| engine.highest_position(&request, fb)).unwrap();
        assert_eq!(values(&engine, &out), vec![Some(1.0), Some(2.0), Some(1.0), None]);
    }

    #[test]
    fn algebra_over_larger_extent_is_nodata_outside() {
        let mut engine = engine_with(&[("p.tif", vec![2.0, 2.0])]);
        let request = AlgebraRequest {
            expression: algebra::weighted_sum("p", 3.0, &[]),
            layers: vec![LayerPath::from("p.tif")],
            extent: Some(aoi(3, 1)),
            output: OutputTarget::Temporary,
        };
        let out = with_feedback(|fb| engine.raster_algebra(&request, fb)).unwrap();
        assert_eq!(values(&engine, &out), vec![Some(6.0), Some(6.0), None]);
    }

    #[test]
    fn algebra_rejects_unlisted_layer() {
        let mut engine = engine_with(&[("p.tif", vec![2.0])]);
        let request = AlgebraRequest {
            expression: algebra::sieve_join("p", "missing"),
            layers: vec![LayerPath::from("p.tif")],
            extent: None,
            output: OutputTarget::Temporary,
        };
        let err = with_feedback(|fb| engine.raster_algebra(&request, fb)).unwrap_err();
        assert_eq!(err, EngineError::UnresolvedReference("missing".to_owned()));
    }

    #[test]
    fn clip_keeps_cells_inside_mask() {
        let mut engine = engine_with(&[("a.tif", vec![1.0, 2.0, 3.0, 4.0])]);
        engine.insert_vector(
            "keep.geojson",
            VectorLayer::new(
                Crs::default(),
                vec![Geometry::Polygon(polygon![
                    (x: 0.0, y: 0.0), (x: 2.0, y: 0.0), (x: 2.0, y: 1.0), (x: 0.0, y: 1.0),
                ])],
            ),
        );
        let request = ClipRequest {
            input: LayerPath::from("a.tif"),
            mask: LayerPath::from("keep.geojson"),
            nodata: NODATA,
            extent: aoi(4, 1),
            output: OutputTarget::Temporary,
        };
        let out = with_feedback(|fb| engine.clip_by_mask(&request, fb)).unwrap();
        assert_eq!(values(&engine, &out), vec![Some(1.0), Some(2.0), None, None]);
    }

    #[test]
    fn crs_mismatch_is_unsupported() {
        let mut engine = engine_with(&[("a.tif", vec![1.0])]);
        let request = CellStatisticsRequest {
            statistic: CellStatistic::Sum,
            inputs: vec![LayerPath::from("a.tif")],
            extent: AnalysisExtent::new(Extent::new(0.0, 1.0, 0.0, 1.0), Crs::new("EPSG:32735")),
            ignore_nodata: true,
            output_nodata: NODATA,
            reference: LayerPath::from("a.tif"),
            output: OutputTarget::Temporary,
        };
        let err = with_feedback(|fb| engine.cell_statistics(&request, fb)).unwrap_err();
        assert!(matches!(err, EngineError::Unsupported(_)));
    }

    #[test]
    fn vector_pipeline_primitives() {
        let mut engine = MemoryEngine::new();
        let square = |x0: f64| {
            Geometry::Polygon(polygon![
                (x: x0, y: 0.0), (x: x0 + 1.0, y: 0.0), (x: x0 + 1.0, y: 1.0), (x: x0, y: 1.0),
            ])
        };
        engine.insert_vector("a.geojson", VectorLayer::new(Crs::default(), vec![square(0.0)]));
        engine.insert_vector("b.geojson", VectorLayer::new(Crs::default(), vec![square(2.0)]));
        let paths = [LayerPath::from("a.geojson"), LayerPath::from("b.geojson")];
        let merged = with_feedback(|fb| engine.merge_vectors(&paths, fb)).unwrap();
        assert_eq!(engine.vector_info(&merged).unwrap().feature_count, 2);

        let extent = with_feedback(|fb| engine.extent_to_layer(&aoi(4, 1), fb)).unwrap();
        let usable =
            with_feedback(|fb| engine.symmetric_difference(&extent, &merged, fb)).unwrap();
        let info = engine.vector_info(&usable).unwrap();
        assert_eq!(info.geometry, GeometryKind::Polygon);
        assert!(engine.raster_info(&usable).is_err());
    }

    #[test]
    fn sieve_and_nodata_rewrite() {
        let mut engine = engine_with(&[("a.tif", vec![1.0, 0.0, 0.0, 0.0])]);
        let request = SieveRequest {
            input: LayerPath::from("a.tif"),
            threshold: 2.0,
            connectivity: Connectivity::Eight,
            output: OutputTarget::Temporary,
        };
        let sieved = with_feedback(|fb| engine.sieve(&request, fb)).unwrap();
        assert_eq!(values(&engine, &sieved), vec![Some(0.0); 4]);

        let rewrite = SetNodataRequest {
            input: LayerPath::from("a.tif"),
            nodata: 0.0,
            output: OutputTarget::Temporary,
        };
        let out = with_feedback(|fb| engine.set_nodata(&rewrite, fb)).unwrap();
        assert_eq!(engine.raster_info(&out).unwrap().nodata, Some(0.0));
    }

    #[test]
    fn band_statistics_over_valid_pixels() {
        let engine = engine_with(&[("a.tif", vec![1.0, NODATA, 5.0])]);
        let stats = engine.band_statistics(&LayerPath::from("a.tif"), 1).unwrap();
        assert!((stats.min - 1.0).abs() < f64::EPSILON);
        assert!((stats.max - 5.0).abs() < f64::EPSILON);
        assert!(engine.band_statistics(&LayerPath::from("a.tif"), 2).is_err());
        let empty = engine_with(&[("e.tif", vec![NODATA])]);
        assert!(matches!(
            empty.band_statistics(&LayerPath::from("e.tif"), 1),
            Err(EngineError::NoValidPixels(_))
        ));
    }

    #[test]
    fn dataset_round_trip() {
        let engine = engine_with(&[("a.tif", vec![1.0, 2.0])]);
        let json = serde_json::to_string(&engine.to_dataset()).unwrap();
        let back = MemoryEngine::from_dataset(serde_json::from_str(&json).unwrap());
        assert_eq!(back.raster(&LayerPath::from("a.tif")), engine.raster(&LayerPath::from("a.tif")));
    }

    proptest! {
        #[test]
        fn sum_matches_valid_pixels(
            a in prop::collection::vec(prop::option::of(-50.0..50.0_f64), 6),
            b in prop::collection::vec(prop::option::of(-50.0..50.0_f64), 6),
        ) {
            let raw = |v: &[Option<f64>]| v.iter().map(|x| x.unwrap_or(NODATA)).collect::<Vec<_>>();
            let mut engine = engine_with(&[("a.tif", raw(&a)), ("b.tif", raw(&b))]);
            let inputs = vec![LayerPath::from("a.tif"), LayerPath::from("b.tif")];
            let request = CellStatisticsRequest {
                statistic: CellStatistic::Sum,
                inputs: inputs.clone(),
                extent: aoi(6, 1),
                ignore_nodata: true,
                output_nodata: NODATA,
                reference: inputs[0].clone(),
                output: OutputTarget::Temporary,
            };
            let out = with_feedback(|fb| engine.cell_statistics(&request, fb)).unwrap();
            let got = values(&engine, &out);
            for i in 0..6 {
                let expected = match (a[i], b[i]) {
                    (None, None) => None,
                    (x, y) => Some(x.unwrap_or(0.0) + y.unwrap_or(0.0)),
                };
                match (expected, got[i]) {
                    (None, None) => {}
                    (Some(e), Some(g)) => prop_assert!((e - g).abs() < 1e-9),
                    // A sum landing exactly on the sentinel reads back as nodata.
                    (Some(e), None) => prop_assert!((e - NODATA).abs() < 1e-9),
                    (None, Some(_)) => prop_assert!(false),
                }
            }
        }
    }
}
