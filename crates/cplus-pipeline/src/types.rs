//! Shared types for the cplus scenario analysis pipeline.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Nodata sentinel carried by every derived raster.
pub const NODATA: f64 = -9999.0;

/// Nodata sentinel of cleaned activity layers. Zero-valued pixels are
/// folded into the nodata class so they drop out of the ranking.
pub const CLEANED_NODATA: f64 = 0.0;

/// File name stem of the final highest-position raster.
pub const SCENARIO_OUTPUT_FILE_NAME: &str = "cplus_scenario_output";

/// Coordinate reference system used when no layer provides one.
pub const DEFAULT_CRS: &str = "EPSG:4326";

/// A coordinate reference system, identified by its authority id
/// (e.g. `EPSG:4326`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Crs(String);

impl Crs {
    /// Create a CRS from an authority id.
    #[must_use]
    pub fn new(authid: impl Into<String>) -> Self {
        Self(authid.into())
    }

    /// The authority id, e.g. `EPSG:32735`.
    #[must_use]
    pub fn authid(&self) -> &str {
        &self.0
    }
}

impl Default for Crs {
    fn default() -> Self {
        Self::new(DEFAULT_CRS)
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An axis-aligned bounding box in map units.
///
/// The bbox array order used by scenario files is
/// `[xmin, xmax, ymin, ymax]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extent {
    /// Left edge.
    pub xmin: f64,
    /// Right edge.
    pub xmax: f64,
    /// Bottom edge.
    pub ymin: f64,
    /// Top edge.
    pub ymax: f64,
}

impl Extent {
    /// Create an extent from its four edges.
    #[must_use]
    pub const fn new(xmin: f64, xmax: f64, ymin: f64, ymax: f64) -> Self {
        Self {
            xmin,
            xmax,
            ymin,
            ymax,
        }
    }

    /// Create an extent from a `[xmin, xmax, ymin, ymax]` bbox.
    #[must_use]
    pub const fn from_bbox(bbox: [f64; 4]) -> Self {
        Self::new(bbox[0], bbox[1], bbox[2], bbox[3])
    }

    /// The extent as a `[xmin, xmax, ymin, ymax]` bbox.
    #[must_use]
    pub const fn bbox(&self) -> [f64; 4] {
        [self.xmin, self.xmax, self.ymin, self.ymax]
    }

    /// Horizontal span.
    #[must_use]
    pub fn width(&self) -> f64 {
        self.xmax - self.xmin
    }

    /// Vertical span.
    #[must_use]
    pub fn height(&self) -> f64 {
        self.ymax - self.ymin
    }

    /// Whether all edges are finite and the extent is not inverted.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.bbox().iter().all(|v| v.is_finite()) && self.xmin <= self.xmax && self.ymin <= self.ymax
    }

    /// Whether the two extents overlap. Touching edges count as an
    /// intersection.
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        self.xmin.max(other.xmin) <= self.xmax.min(other.xmax)
            && self.ymin.max(other.ymin) <= self.ymax.min(other.ymax)
    }

    /// The extent as a `geo` rectangle.
    #[must_use]
    pub fn to_rect(&self) -> geo::Rect<f64> {
        geo::Rect::new(
            geo::coord! { x: self.xmin, y: self.ymin },
            geo::coord! { x: self.xmax, y: self.ymax },
        )
    }

    /// The extent as a closed `geo` polygon.
    #[must_use]
    pub fn to_polygon(&self) -> geo::Polygon<f64> {
        self.to_rect().to_polygon()
    }

    /// Well-known-text polygon, used in log messages.
    #[must_use]
    pub fn to_wkt(&self) -> String {
        let Self {
            xmin,
            xmax,
            ymin,
            ymax,
        } = self;
        format!(
            "POLYGON(({xmin} {ymin}, {xmax} {ymin}, {xmax} {ymax}, {xmin} {ymax}, {xmin} {ymin}))"
        )
    }
}

impl From<geo::Rect<f64>> for Extent {
    fn from(rect: geo::Rect<f64>) -> Self {
        Self::new(rect.min().x, rect.max().x, rect.min().y, rect.max().y)
    }
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.xmin, self.xmax, self.ymin, self.ymax)
    }
}

/// The area of interest together with the CRS its coordinates are in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisExtent {
    /// Bounding box.
    pub extent: Extent,
    /// CRS of the bounding box.
    pub crs: Crs,
}

impl AnalysisExtent {
    /// Pair an extent with its CRS.
    #[must_use]
    pub const fn new(extent: Extent, crs: Crs) -> Self {
        Self { extent, crs }
    }
}

impl fmt::Display for AnalysisExtent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.extent, self.crs)
    }
}

/// Location of a raster or vector layer known to the processing engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LayerPath(PathBuf);

impl LayerPath {
    /// Wrap a path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    /// The underlying path.
    #[must_use]
    pub fn as_path(&self) -> &Path {
        &self.0
    }

    /// Whether the path is the empty string.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.as_os_str().is_empty()
    }

    /// File stem, which is how raster algebra expressions refer to a
    /// layer (`"stem@1"`).
    #[must_use]
    pub fn stem(&self) -> String {
        self.0
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Layer kind derived from the file extension.
    #[must_use]
    pub fn layer_type(&self) -> LayerType {
        LayerType::from_path(&self.0)
    }
}

impl fmt::Display for LayerPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl From<&str> for LayerPath {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl From<PathBuf> for LayerPath {
    fn from(path: PathBuf) -> Self {
        Self(path)
    }
}

/// Kind of layer an activity or file refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerType {
    /// Gridded data (`.tif`, `.tiff`).
    #[default]
    Raster,
    /// Feature data (`.geojson`, `.zip`, `.shp`).
    Vector,
    /// Unrecognised extension.
    Undefined,
}

impl LayerType {
    /// Classify a file by its extension, case-insensitively.
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        match extension.as_str() {
            "tif" | "tiff" => Self::Raster,
            "geojson" | "zip" | "shp" => Self::Vector,
            _ => Self::Undefined,
        }
    }
}

impl fmt::Display for LayerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raster => f.write_str("raster"),
            Self::Vector => f.write_str("vector"),
            Self::Undefined => f.write_str("undefined"),
        }
    }
}

/// Reference from a pathway to a priority weighting layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityLayerRef {
    /// Identifier of the registered priority layer.
    pub uuid: Uuid,
    /// Display name, used to match coefficient groups.
    pub name: String,
}

/// A natural climate solution pathway raster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NcsPathway {
    /// Identity. Activities sharing a pathway share this id.
    pub uuid: Uuid,
    /// Display name.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Source raster.
    pub path: LayerPath,
    /// Priority weighting layers combined into this pathway.
    #[serde(default)]
    pub priority_layers: Vec<PriorityLayerRef>,
}

/// A candidate land-use practice, built from a direct raster and/or
/// one or more pathways.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    /// Identity.
    pub uuid: Uuid,
    /// Display name, also used for output file names.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Direct raster, if the activity is not derived purely from pathways.
    #[serde(default)]
    pub path: Option<LayerPath>,
    /// Contributing pathways.
    #[serde(default)]
    pub pathways: Vec<NcsPathway>,
    /// Per-activity exclusion masks (vector layers).
    #[serde(default)]
    pub mask_paths: Vec<LayerPath>,
    /// Ordering key for the final ranking.
    #[serde(default)]
    pub style_pixel_value: i64,
    /// Layer kind tag.
    #[serde(default)]
    pub layer_type: LayerType,
}

impl Activity {
    /// Whether the activity has something to build a raster from.
    #[must_use]
    pub fn has_source(&self) -> bool {
        self.path.as_ref().is_some_and(|p| !p.is_empty()) || !self.pathways.is_empty()
    }
}

/// A coefficient a priority layer carries for one named group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorityGroupValue {
    /// Group name.
    pub name: String,
    /// Coefficient. Only positive values contribute to weighting.
    pub value: f64,
}

/// A registered priority weighting layer (PWL).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorityLayer {
    /// Identity, referenced by [`PriorityLayerRef::uuid`].
    pub uuid: Uuid,
    /// Display name.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Resolved raster path.
    #[serde(default)]
    pub path: Option<LayerPath>,
    /// Coefficients per group.
    #[serde(default)]
    pub groups: Vec<PriorityGroupValue>,
}

/// A priority group and the coefficient chosen for it in this scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorityLayerGroup {
    /// Identity, if the group was registered with one.
    #[serde(default)]
    pub uuid: Option<Uuid>,
    /// Group name.
    pub name: String,
    /// Coefficient.
    #[serde(default)]
    pub value: f64,
}

/// The scenario being analysed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    /// Identity.
    pub uuid: Uuid,
    /// Display name.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Area of interest.
    pub extent: Extent,
    /// Activities taking part in the analysis.
    #[serde(default)]
    pub activities: Vec<Activity>,
}

/// Output of a successful analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioResult {
    /// The analysed scenario. Its activities carry their final layer
    /// paths and their renumbered `style_pixel_value`s.
    pub scenario: Scenario,
    /// Directory the named outputs were written under.
    pub scenario_directory: PathBuf,
    /// When the result was produced.
    pub created_date: DateTime<Utc>,
    /// The highest-position raster.
    pub analysis_output: LayerPath,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn extent_bbox_order_is_x_then_y() {
        let e = Extent::from_bbox([1.0, 2.0, 3.0, 4.0]);
        assert_eq!(e, Extent::new(1.0, 2.0, 3.0, 4.0));
        assert_eq!(e.bbox(), [1.0, 2.0, 3.0, 4.0]);
        assert!((e.width() - 1.0).abs() < f64::EPSILON);
        assert!((e.height() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn extent_validity() {
        assert!(Extent::new(0.0, 10.0, 0.0, 10.0).is_valid());
        assert!(!Extent::new(10.0, 0.0, 0.0, 10.0).is_valid());
        assert!(!Extent::new(0.0, f64::NAN, 0.0, 10.0).is_valid());
    }

    #[test]
    fn touching_extents_intersect() {
        let a = Extent::new(0.0, 10.0, 0.0, 10.0);
        let b = Extent::new(10.0, 20.0, 0.0, 10.0);
        let c = Extent::new(10.5, 20.0, 0.0, 10.0);
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
        assert!(!c.intersects(&a));
    }

    #[test]
    fn extent_wkt_is_closed_ring() {
        let wkt = Extent::new(0.0, 2.0, 1.0, 3.0).to_wkt();
        assert_eq!(wkt, "POLYGON((0 1, 2 1, 2 3, 0 3, 0 1))");
    }

    #[test]
    fn extent_geo_round_trip() {
        let e = Extent::new(-5.0, 5.0, 2.0, 8.0);
        assert_eq!(Extent::from(e.to_rect()), e);
    }

    #[test]
    fn analysis_extent_display() {
        let e = AnalysisExtent::new(Extent::new(0.0, 10.0, 0.0, 5.0), Crs::default());
        assert_eq!(e.to_string(), "0,10,0,5 [EPSG:4326]");
    }

    #[test]
    fn layer_path_stem_and_type() {
        let p = LayerPath::from("/data/pathways/Agro Forestry.TIF");
        assert_eq!(p.stem(), "Agro Forestry");
        assert_eq!(p.layer_type(), LayerType::Raster);
        assert_eq!(LayerPath::from("mask.geojson").layer_type(), LayerType::Vector);
        assert_eq!(LayerPath::from("mask.shp").layer_type(), LayerType::Vector);
        assert_eq!(LayerPath::from("notes.txt").layer_type(), LayerType::Undefined);
        assert!(LayerPath::from("").is_empty());
    }

    #[test]
    fn activity_without_pathways_or_path_has_no_source() {
        let json = r#"{"uuid":"8d4d4a1e-9a53-4a07-8d3b-2b9fa8e9d0a1","name":"Empty","path":""}"#;
        let activity: Activity = serde_json::from_str(json).unwrap();
        assert!(!activity.has_source());
        assert_eq!(activity.style_pixel_value, 0);
        assert_eq!(activity.layer_type, LayerType::Raster);
    }

    #[test]
    fn scenario_deserializes_with_defaults() {
        let json = r#"{
            "uuid": "2a6c2b1e-0c2f-4f43-9d53-51b3d4e4a001",
            "name": "Bushveld",
            "extent": {"xmin": 0.0, "xmax": 10.0, "ymin": 0.0, "ymax": 10.0}
        }"#;
        let scenario: Scenario = serde_json::from_str(json).unwrap();
        assert!(scenario.activities.is_empty());
        assert!(scenario.description.is_empty());
    }
}
