//! Shared fixtures for the integration tests: a 10 x 10 one-metre grid in
//! a projected CRS, and builders for scenarios over it.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::{Arc, Mutex};

use cplus_pipeline::memory::{GridSpec, MemoryEngine, Raster, VectorLayer};
use cplus_pipeline::types::{LayerType, NODATA};
use cplus_pipeline::{
    Activity, Crs, EventSink, Extent, LayerPath, LogLevel, NcsPathway, PipelineEvent, Scenario,
    TaskConfig,
};
use geo::{Geometry, Rect, coord};
use uuid::Uuid;

pub const CRS: &str = "EPSG:32633";
pub const SIZE: u32 = 10;
pub const BASE_DIR: &str = "/out";

pub fn extent() -> Extent {
    Extent::new(0.0, f64::from(SIZE), 0.0, f64::from(SIZE))
}

pub fn grid() -> GridSpec {
    GridSpec::new(&extent(), 1.0, 1.0, Crs::new(CRS)).unwrap()
}

/// A raster holding `value` everywhere.
pub fn constant(value: f64) -> Raster {
    Raster::filled(grid(), Some(NODATA), value)
}

/// A raster computed per `(col, row)`, row 0 at the top.
pub fn raster(mut pixel: impl FnMut(u32, u32) -> f64) -> Raster {
    let values = (0..SIZE)
        .flat_map(|row| (0..SIZE).map(move |col| (col, row)))
        .map(|(col, row)| pixel(col, row))
        .collect();
    Raster::from_values(grid(), Some(NODATA), values).unwrap()
}

pub fn pathway(name: &str, path: &str) -> NcsPathway {
    NcsPathway {
        uuid: Uuid::new_v4(),
        name: name.to_owned(),
        description: String::new(),
        path: LayerPath::from(path),
        priority_layers: Vec::new(),
    }
}

pub fn activity(name: &str, pathways: Vec<NcsPathway>, style_pixel_value: i64) -> Activity {
    Activity {
        uuid: Uuid::new_v4(),
        name: name.to_owned(),
        description: String::new(),
        path: None,
        pathways,
        mask_paths: Vec::new(),
        style_pixel_value,
        layer_type: LayerType::Raster,
    }
}

/// Default settings with named outputs under [`BASE_DIR`].
pub fn config(activities: Vec<Activity>) -> TaskConfig {
    let mut config = TaskConfig::new(Scenario {
        uuid: Uuid::new_v4(),
        name: "Integration".to_owned(),
        description: String::new(),
        extent: extent(),
        activities,
    });
    config.settings.base_dir = BASE_DIR.into();
    config
}

/// A one-feature polygon layer covering the given box.
pub fn polygon_layer(crs: &str, xmin: f64, xmax: f64, ymin: f64, ymax: f64) -> VectorLayer {
    let rect = Rect::new(coord! { x: xmin, y: ymin }, coord! { x: xmax, y: ymax });
    VectorLayer::new(Crs::new(crs), vec![Geometry::Polygon(rect.to_polygon())])
}

/// Rasters the engine holds under `dir` (relative to [`BASE_DIR`]).
pub fn rasters_under(engine: &MemoryEngine, dir: &str) -> Vec<LayerPath> {
    let prefix = std::path::Path::new(BASE_DIR).join(dir);
    engine
        .to_dataset()
        .rasters
        .into_keys()
        .filter(|path| path.as_path().parent() == Some(prefix.as_path()))
        .collect()
}

/// Valid pixel values of a raster in row-major order.
pub fn valid_values(engine: &MemoryEngine, path: &LayerPath) -> Vec<Option<f64>> {
    engine
        .raster(path)
        .unwrap_or_else(|| panic!("no raster at {path}"))
        .valid_values()
        .collect()
}

/// An event sink that keeps everything it receives.
#[derive(Clone, Default)]
pub struct Recorder(Arc<Mutex<Vec<PipelineEvent>>>);

impl Recorder {
    pub fn events(&self) -> Vec<PipelineEvent> {
        self.0.lock().unwrap().clone()
    }

    /// Log and info messages at `level`.
    pub fn messages(&self, level: LogLevel) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                PipelineEvent::Log {
                    message, level: l, ..
                }
                | PipelineEvent::Info { message, level: l } if l == level => Some(message),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for Recorder {
    fn emit(&self, event: PipelineEvent) {
        self.0.lock().unwrap().push(event);
    }
}
