//! Task configuration: the scenario, its priority layers and the
//! numeric and boolean settings that drive the pipeline.
//!
//! A [`TaskConfig`] is built once before a run and only read while the
//! pipeline executes.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::types::{Activity, LayerPath, PriorityLayer, PriorityLayerGroup, Scenario};

/// Errors from [`TaskConfig::validate`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// The scenario carries no activities.
    #[error("scenario `{0}` has no activities")]
    NoActivities(String),

    /// The area of interest is not a finite, ordered box.
    #[error("invalid scenario extent {0}")]
    InvalidExtent(String),

    /// A numeric setting is out of range.
    #[error("invalid {name}: {value}")]
    InvalidSetting {
        /// Setting name.
        name: &'static str,
        /// Offending value.
        value: f64,
    },
}

/// Resampling method used when snapping layers to the reference grid.
///
/// The numeric codes accepted by [`TryFrom<u8>`] follow the order the
/// settings store uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResamplingMethod {
    /// Value of the nearest source cell.
    #[default]
    NearestNeighbour,
    /// Distance-weighted mean of the four nearest cells.
    Bilinear,
    /// Cubic convolution.
    Cubic,
    /// Cubic B-spline.
    CubicSpline,
    /// Windowed sinc.
    Lanczos,
    /// Mean of the covered cells.
    Average,
    /// Most frequent covered value.
    Mode,
    /// Maximum covered value.
    Max,
    /// Minimum covered value.
    Min,
    /// Median covered value.
    Median,
    /// First quartile of the covered values.
    FirstQuartile,
    /// Third quartile of the covered values.
    ThirdQuartile,
}

impl ResamplingMethod {
    /// All methods in numeric-code order.
    pub const ALL: [Self; 12] = [
        Self::NearestNeighbour,
        Self::Bilinear,
        Self::Cubic,
        Self::CubicSpline,
        Self::Lanczos,
        Self::Average,
        Self::Mode,
        Self::Max,
        Self::Min,
        Self::Median,
        Self::FirstQuartile,
        Self::ThirdQuartile,
    ];
}

impl TryFrom<u8> for ResamplingMethod {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Self::ALL.get(usize::from(code)).copied().ok_or(code)
    }
}

impl fmt::Display for ResamplingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NearestNeighbour => "nearest_neighbour",
            Self::Bilinear => "bilinear",
            Self::Cubic => "cubic",
            Self::CubicSpline => "cubic_spline",
            Self::Lanczos => "lanczos",
            Self::Average => "average",
            Self::Mode => "mode",
            Self::Max => "max",
            Self::Min => "min",
            Self::Median => "median",
            Self::FirstQuartile => "first_quartile",
            Self::ThirdQuartile => "third_quartile",
        };
        f.write_str(name)
    }
}

/// Snapping (resample onto the reference grid) settings.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapSettings {
    /// Whether the snap stage runs.
    pub enabled: bool,
    /// Raster whose grid every pathway and PWL is resampled onto.
    pub reference_layer: Option<LayerPath>,
    /// Scale values by the ratio of target to source cell area.
    pub rescale_values: bool,
    /// How source cells are combined.
    pub resampling_method: ResamplingMethod,
}

/// Sieve filter settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SieveSettings {
    /// Whether the sieve stage runs.
    pub enabled: bool,
    /// Minimum patch size in pixels.
    pub threshold: f64,
}

impl SieveSettings {
    /// Default minimum patch size.
    pub const DEFAULT_THRESHOLD: f64 = 10.0;
}

impl Default for SieveSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold: Self::DEFAULT_THRESHOLD,
        }
    }
}

/// Which intermediate layers are written to named files under the
/// scenario directory. A disabled toggle sends that stage's output to a
/// temporary engine layer instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[allow(clippy::struct_excessive_bools)]
pub struct OutputOptions {
    /// Keep carbon-weighted pathway layers.
    pub ncs_with_carbon: bool,
    /// Keep activity layers.
    pub landuse_project: bool,
    /// Keep normalized and cleaned activity layers.
    pub landuse_normalized: bool,
    /// Keep weighted pathway layers.
    pub landuse_weighted: bool,
    /// Keep the final highest-position raster.
    pub highest_position: bool,
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self {
            ncs_with_carbon: false,
            landuse_project: true,
            landuse_normalized: true,
            landuse_weighted: true,
            highest_position: true,
        }
    }
}

/// Numeric and boolean settings of one analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    /// Snap stage settings.
    pub snapping: SnapSettings,
    /// Multiplier of the pathway term in the weighting expression.
    pub pathway_suitability_index: f64,
    /// Added to the suitability index when normalizing.
    pub carbon_coefficient: f64,
    /// Sieve stage settings.
    pub sieve: SieveSettings,
    /// Scenario-wide exclusion masks. Deserializes from a list or a
    /// comma separated string.
    #[serde(deserialize_with = "deserialize_mask_layers")]
    pub mask_layers: Vec<LayerPath>,
    /// Output toggles.
    pub outputs: OutputOptions,
    /// Run the normalization step after sieving.
    pub normalize_activities: bool,
    /// Scenario directory that named outputs are written under.
    pub base_dir: PathBuf,
}

impl AnalysisSettings {
    /// Default pathway suitability index (no scaling term).
    pub const DEFAULT_SUITABILITY_INDEX: f64 = 0.0;
    /// Default carbon coefficient.
    pub const DEFAULT_CARBON_COEFFICIENT: f64 = 0.0;
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            snapping: SnapSettings::default(),
            pathway_suitability_index: Self::DEFAULT_SUITABILITY_INDEX,
            carbon_coefficient: Self::DEFAULT_CARBON_COEFFICIENT,
            sieve: SieveSettings::default(),
            mask_layers: Vec::new(),
            outputs: OutputOptions::default(),
            normalize_activities: false,
            base_dir: PathBuf::new(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MaskLayersRepr {
    List(Vec<String>),
    Joined(String),
}

fn deserialize_mask_layers<'de, D>(deserializer: D) -> Result<Vec<LayerPath>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = match MaskLayersRepr::deserialize(deserializer)? {
        MaskLayersRepr::List(list) => list,
        MaskLayersRepr::Joined(joined) => joined.split(',').map(str::to_owned).collect(),
    };
    Ok(parse_mask_list(raw))
}

/// Parse mask paths, dropping blank entries.
#[must_use]
pub fn parse_mask_list<I, S>(raw: I) -> Vec<LayerPath>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    raw.into_iter()
        .map(|s| s.as_ref().trim().to_owned())
        .filter(|s| !s.is_empty())
        .map(LayerPath::new)
        .collect()
}

/// Everything an analysis run reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    /// The scenario under analysis.
    pub scenario: Scenario,
    /// Registered priority weighting layers.
    #[serde(default)]
    pub priority_layers: Vec<PriorityLayer>,
    /// Coefficient groups chosen for this scenario.
    #[serde(default)]
    pub priority_layer_groups: Vec<PriorityLayerGroup>,
    /// Full activity catalogue, for lookup by id.
    #[serde(default)]
    pub all_activities: Vec<Activity>,
    /// Run settings.
    #[serde(default)]
    pub settings: AnalysisSettings,
}

impl TaskConfig {
    /// Configuration with default settings.
    #[must_use]
    pub fn new(scenario: Scenario) -> Self {
        Self {
            scenario,
            priority_layers: Vec::new(),
            priority_layer_groups: Vec::new(),
            all_activities: Vec::new(),
            settings: AnalysisSettings::default(),
        }
    }

    /// Activities taking part in this analysis.
    #[must_use]
    pub fn analysis_activities(&self) -> &[Activity] {
        &self.scenario.activities
    }

    /// Look up an activity in the full catalogue.
    #[must_use]
    pub fn get_activity(&self, uuid: Uuid) -> Option<&Activity> {
        self.all_activities.iter().find(|a| a.uuid == uuid)
    }

    /// Look up a registered priority layer.
    #[must_use]
    pub fn get_priority_layer(&self, uuid: Uuid) -> Option<&PriorityLayer> {
        self.priority_layers.iter().find(|l| l.uuid == uuid)
    }

    /// Every registered priority layer with this display name.
    pub fn priority_layers_named<'a>(
        &'a self,
        name: &'a str,
    ) -> impl Iterator<Item = &'a PriorityLayer> + 'a {
        self.priority_layers.iter().filter(move |l| l.name == name)
    }

    /// Scenario-wide exclusion masks.
    #[must_use]
    pub fn masking_layers(&self) -> &[LayerPath] {
        &self.settings.mask_layers
    }

    /// Check that the configuration can be run.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the scenario has no activities, its
    /// extent is not a finite ordered box, or a numeric setting is out
    /// of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scenario.activities.is_empty() {
            return Err(ConfigError::NoActivities(self.scenario.name.clone()));
        }
        if !self.scenario.extent.is_valid() {
            return Err(ConfigError::InvalidExtent(self.scenario.extent.to_string()));
        }
        let threshold = self.settings.sieve.threshold;
        if !threshold.is_finite() || threshold < 0.0 {
            return Err(ConfigError::InvalidSetting {
                name: "sieve threshold",
                value: threshold,
            });
        }
        for (name, value) in [
            ("pathway suitability index", self.settings.pathway_suitability_index),
            ("carbon coefficient", self.settings.carbon_coefficient),
        ] {
            if !value.is_finite() {
                return Err(ConfigError::InvalidSetting { name, value });
            }
        }
        Ok(())
    }
}
