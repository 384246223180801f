//! Optional stages (snapping, sieving, normalization) driven through
//! the typed pipeline and the task runner.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{activity, config, constant, pathway, raster, rasters_under, valid_values};
use cplus_pipeline::memory::{GridSpec, MemoryEngine, Raster};
use cplus_pipeline::naming::{
    NORMALIZED_ACTIVITIES_DIR, SIEVED_DIR, SNAPPED_PATHWAYS_DIR, SNAPPED_PRIORITY_LAYERS_DIR,
    WEIGHTED_PATHWAYS_DIR,
};
use cplus_pipeline::types::{NODATA, PriorityGroupValue, PriorityLayerRef};
use cplus_pipeline::{
    AnalysisContext, AnalysisState, CancellationToken, Crs, LayerPath, NullSink, Pipeline,
    PriorityLayer, PriorityLayerGroup, ResamplingMethod, TaskConfig, run_scenario,
};
use uuid::Uuid;

fn context(config: TaskConfig, engine: MemoryEngine) -> AnalysisContext<MemoryEngine> {
    AnalysisContext::new(config, engine, Box::new(NullSink), CancellationToken::new())
}

#[test]
fn snapping_resamples_pathways_and_priority_layers() {
    let mut engine = MemoryEngine::new();
    engine.insert_raster("forest.tif", constant(2.0));
    engine.insert_raster("species.tif", constant(1.5));
    let coarse = GridSpec::new(&common::extent(), 2.0, 2.0, Crs::new(common::CRS)).unwrap();
    engine.insert_raster("reference.tif", Raster::filled(coarse, Some(NODATA), 1.0));

    let pwl = PriorityLayer {
        uuid: Uuid::new_v4(),
        name: "Species".to_owned(),
        description: String::new(),
        path: Some(LayerPath::from("species.tif")),
        groups: vec![PriorityGroupValue {
            name: "Biodiversity".to_owned(),
            value: 2.0,
        }],
    };
    let mut forest = pathway("Forest", "forest.tif");
    forest.priority_layers.push(PriorityLayerRef {
        uuid: pwl.uuid,
        name: pwl.name.clone(),
    });
    let mut config = config(vec![activity("Restore", vec![forest], 1)]);
    config.priority_layers.push(pwl);
    config.priority_layer_groups.push(PriorityLayerGroup {
        uuid: None,
        name: "Biodiversity".to_owned(),
        value: 2.0,
    });
    config.settings.snapping.enabled = true;
    config.settings.snapping.reference_layer = Some(LayerPath::from("reference.tif"));
    config.settings.snapping.resampling_method = ResamplingMethod::Average;

    let report = run_scenario(config, engine, NullSink);
    assert_eq!(report.state, AnalysisState::Succeeded);
    assert!(report.diagnostics.stages[1].applied);

    let snapped = rasters_under(&report.engine, SNAPPED_PATHWAYS_DIR);
    let finals: Vec<&LayerPath> = snapped
        .iter()
        .filter(|p| p.stem().ends_with("_final"))
        .collect();
    assert_eq!(snapped.len(), 2);
    assert_eq!(finals.len(), 1);
    let final_raster = report.engine.raster(finals[0]).unwrap();
    assert!((final_raster.grid().x_res - 2.0).abs() < f64::EPSILON);
    assert_eq!(final_raster.grid().cols, 5);

    let snapped_pwls = rasters_under(&report.engine, SNAPPED_PRIORITY_LAYERS_DIR);
    assert_eq!(snapped_pwls.len(), 2);

    // Weighting read the snapped pathway and the snapped priority layer.
    let weighted = rasters_under(&report.engine, WEIGHTED_PATHWAYS_DIR);
    let weighted_raster = report.engine.raster(&weighted[0]).unwrap();
    assert_eq!(weighted_raster.grid().cols, 5);
    assert!(weighted_raster.valid_values().all(|v| v == Some(5.0)));
}

#[test]
fn sieve_drops_patches_below_threshold() {
    let mut engine = MemoryEngine::new();
    // A 3 x 3 patch in the top-left corner and one isolated pixel.
    engine.insert_raster(
        "forest.tif",
        raster(|col, row| match (col, row) {
            (0..3, 0..3) => 5.0,
            (8, 8) => 7.0,
            _ => 0.0,
        }),
    );
    let mut config = config(vec![activity(
        "Restore",
        vec![pathway("Forest", "forest.tif")],
        1,
    )]);
    config.settings.sieve.enabled = true;
    config.settings.sieve.threshold = 4.0;

    let report = run_scenario(config, engine, NullSink);
    let result = report.outcome.result().unwrap();

    let sieved = rasters_under(&report.engine, SIEVED_DIR);
    assert_eq!(sieved.len(), 1);
    let values = valid_values(&report.engine, &sieved[0]);
    let kept: Vec<usize> = values
        .iter()
        .enumerate()
        .filter_map(|(i, v)| v.map(|_| i))
        .collect();
    assert_eq!(kept, vec![0, 1, 2, 10, 11, 12, 20, 21, 22]);
    assert!(values.iter().flatten().all(|v| (*v - 5.0).abs() < f64::EPSILON));

    let ranking = valid_values(&report.engine, &result.analysis_output);
    assert_eq!(ranking.iter().flatten().count(), 9);
}

#[test]
fn typed_stages_expose_intermediate_layers() {
    let mut engine = MemoryEngine::new();
    engine.insert_raster("forest.tif", raster(|col, _| f64::from(col)));
    let mut config = config(vec![activity(
        "Restore",
        vec![pathway("Forest", "forest.tif")],
        1,
    )]);
    config.settings.normalize_activities = true;
    let mut ctx = context(config, engine);

    let built = Pipeline::new(ctx.config())
        .align(&mut ctx)
        .unwrap()
        .snap(&mut ctx)
        .unwrap()
        .weight(&mut ctx)
        .unwrap()
        .build_activities(&mut ctx)
        .unwrap();
    let id = built.graph().activity_ids().next().unwrap();
    let activity_path = built.graph().activity(id).path.clone().unwrap();
    assert!(activity_path.as_path().starts_with("/out/activities"));

    let sieved = built
        .mask_external(&mut ctx)
        .unwrap()
        .mask_internal(&mut ctx)
        .unwrap()
        .sieve(&mut ctx)
        .unwrap();
    assert!(!sieved.applied());

    let normalized = sieved.normalize(&mut ctx).unwrap();
    assert!(normalized.normalized());
    assert_eq!(ctx.state(), AnalysisState::Normalizing);
    let normalized_path = normalized.graph().activity(id).path.clone().unwrap();
    assert_eq!(
        rasters_under(ctx.engine(), NORMALIZED_ACTIVITIES_DIR),
        vec![normalized_path.clone()]
    );
    let stats = ctx.engine().raster(&normalized_path).unwrap().statistics().unwrap();
    assert!(stats.min.abs() < 1e-12);
    assert!((stats.max - 1.0).abs() < 1e-12);

    // Normalizing twice is a no-op, and clean does not normalize again.
    let again = normalized.normalize(&mut ctx).unwrap();
    assert_eq!(again.graph().activity(id).path.as_ref(), Some(&normalized_path));
    let cleaned = again.clean(&mut ctx).unwrap();
    assert!(cleaned.normalized());
    assert_eq!(rasters_under(ctx.engine(), NORMALIZED_ACTIVITIES_DIR).len(), 1);

    let reduced = cleaned.reduce(&mut ctx).unwrap();
    assert_eq!(ctx.state(), AnalysisState::Reducing);
    let ranking = valid_values(ctx.engine(), &reduced.result().analysis_output);
    // Column 0 normalized to zero and was cleaned away.
    for (i, value) in ranking.iter().enumerate() {
        let expected = if i % 10 == 0 { None } else { Some(1.0) };
        assert_eq!(*value, expected, "pixel {i}");
    }
}
