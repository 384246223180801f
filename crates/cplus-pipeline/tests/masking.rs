//! Scenario-wide and per-activity masking.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{
    CRS, Recorder, activity, config, constant, pathway, polygon_layer, rasters_under,
    valid_values,
};
use cplus_pipeline::memory::{MemoryEngine, VectorLayer};
use cplus_pipeline::naming::{FINAL_MASKED_ACTIVITIES_DIR, MASKED_ACTIVITIES_DIR};
use cplus_pipeline::{
    AnalysisState, Crs, LayerPath, LogLevel, NullSink, PipelineEvent, StageError, TaskOutcome,
    run_scenario,
};
use geo::{Geometry, Point};

fn engine() -> MemoryEngine {
    let mut engine = MemoryEngine::new();
    engine.insert_raster("forest.tif", constant(2.0));
    engine
}

/// True for pixels in the left half of the grid.
fn left_half(i: usize) -> bool {
    i % 10 < 5
}

#[test]
fn activity_mask_removes_covered_cells() {
    let mut engine = engine();
    engine.insert_vector("left.geojson", polygon_layer(CRS, 0.0, 5.0, 0.0, 10.0));
    let mut restore = activity("Restore", vec![pathway("Forest", "forest.tif")], 1);
    restore.mask_paths.push(LayerPath::from("left.geojson"));

    let report = run_scenario(config(vec![restore]), engine, Recorder::default());
    let result = report.outcome.result().unwrap();

    let masked = rasters_under(&report.engine, FINAL_MASKED_ACTIVITIES_DIR);
    assert_eq!(masked.len(), 1);
    for (i, value) in valid_values(&report.engine, &masked[0]).iter().enumerate() {
        let expected = if left_half(i) { None } else { Some(2.0) };
        assert_eq!(*value, expected, "pixel {i}");
    }
    for (i, value) in valid_values(&report.engine, &result.analysis_output)
        .iter()
        .enumerate()
    {
        let expected = if left_half(i) { None } else { Some(1.0) };
        assert_eq!(*value, expected, "pixel {i}");
    }
}

#[test]
fn activity_mask_in_another_crs_is_skipped() {
    let mut engine = engine();
    engine.insert_vector(
        "left.geojson",
        polygon_layer("EPSG:3857", 0.0, 5.0, 0.0, 10.0),
    );
    let mut restore = activity("Restore", vec![pathway("Forest", "forest.tif")], 1);
    restore.mask_paths.push(LayerPath::from("left.geojson"));

    let recorder = Recorder::default();
    let report = run_scenario(config(vec![restore]), engine, recorder.clone());
    assert_eq!(report.state, AnalysisState::Succeeded);
    assert!(rasters_under(&report.engine, FINAL_MASKED_ACTIVITIES_DIR).is_empty());
    assert!(
        recorder
            .messages(LogLevel::Warning)
            .iter()
            .any(|m| m.contains("do not match the scenario crs"))
    );
    let result = report.outcome.result().unwrap();
    assert!(
        valid_values(&report.engine, &result.analysis_output)
            .iter()
            .all(|v| *v == Some(1.0))
    );
}

#[test]
fn disjoint_activity_mask_is_skipped() {
    let mut engine = engine();
    engine.insert_vector("far.geojson", polygon_layer(CRS, 50.0, 60.0, 50.0, 60.0));
    let mut restore = activity("Restore", vec![pathway("Forest", "forest.tif")], 1);
    restore.mask_paths.push(LayerPath::from("far.geojson"));

    let report = run_scenario(config(vec![restore]), engine, NullSink);
    assert_eq!(report.state, AnalysisState::Succeeded);
    assert!(rasters_under(&report.engine, FINAL_MASKED_ACTIVITIES_DIR).is_empty());
}

#[test]
fn unreadable_masks_are_left_out_of_the_merge() {
    let mut engine = engine();
    engine.insert_vector("left.geojson", polygon_layer(CRS, 0.0, 5.0, 0.0, 10.0));
    let mut restore = activity("Restore", vec![pathway("Forest", "forest.tif")], 1);
    restore.mask_paths.push(LayerPath::from("left.geojson"));
    restore.mask_paths.push(LayerPath::from("missing.geojson"));

    let recorder = Recorder::default();
    let report = run_scenario(config(vec![restore]), engine, recorder.clone());
    assert_eq!(report.state, AnalysisState::Succeeded);
    assert_eq!(
        rasters_under(&report.engine, FINAL_MASKED_ACTIVITIES_DIR).len(),
        1
    );
    assert!(
        recorder
            .messages(LogLevel::Warning)
            .iter()
            .any(|m| m.contains("missing.geojson"))
    );
}

#[test]
fn scenario_mask_clips_every_activity() {
    let mut engine = engine();
    engine.insert_raster("grass.tif", constant(1.0));
    engine.insert_vector("left.geojson", polygon_layer(CRS, 0.0, 5.0, 0.0, 10.0));
    let mut config = config(vec![
        activity("Restore", vec![pathway("Forest", "forest.tif")], 1),
        activity("Graze", vec![pathway("Grass", "grass.tif")], 2),
    ]);
    config.settings.mask_layers.push(LayerPath::from("left.geojson"));

    let recorder = Recorder::default();
    let report = run_scenario(config, engine, recorder.clone());
    assert_eq!(report.state, AnalysisState::Succeeded);
    assert!(
        recorder
            .events()
            .contains(&PipelineEvent::StateChanged(AnalysisState::ExternalMasking))
    );

    let masked = rasters_under(&report.engine, MASKED_ACTIVITIES_DIR);
    assert_eq!(masked.len(), 2);
    for path in &masked {
        let values = valid_values(&report.engine, path);
        assert!(values.iter().enumerate().all(|(i, v)| left_half(i) == v.is_none()));
    }
}

#[test]
fn scenario_mask_must_hold_polygons() {
    let mut engine = engine();
    engine.insert_vector(
        "wells.geojson",
        VectorLayer::new(Crs::new(CRS), vec![Geometry::Point(Point::new(1.0, 1.0))]),
    );
    let mut config = config(vec![activity(
        "Restore",
        vec![pathway("Forest", "forest.tif")],
        1,
    )]);
    config.settings.mask_layers.push(LayerPath::from("wells.geojson"));

    let recorder = Recorder::default();
    let report = run_scenario(config, engine, recorder.clone());
    assert_eq!(report.state, AnalysisState::Failed);
    assert!(matches!(
        report.outcome,
        TaskOutcome::Failed(StageError::GeometryType { .. })
    ));
    assert!(
        recorder
            .events()
            .contains(&PipelineEvent::Cancelled { with_error: true })
    );
}

#[test]
fn missing_scenario_mask_fails_the_run() {
    let mut config = config(vec![activity(
        "Restore",
        vec![pathway("Forest", "forest.tif")],
        1,
    )]);
    config.settings.mask_layers.push(LayerPath::from("missing.geojson"));

    let report = run_scenario(config, engine(), Recorder::default());
    assert!(matches!(
        report.outcome,
        TaskOutcome::Failed(StageError::MissingLayer { .. })
    ));
}
