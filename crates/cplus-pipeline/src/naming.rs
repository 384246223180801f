//! Output file naming under the scenario directory.

use std::path::Path;

use uuid::Uuid;

use crate::types::LayerPath;

/// Characters replaced with `_` in layer file names.
const UNSAFE_CHARS: &[char] = &[' ', '%', ':', '/', ',', '\\', '[', ']', '<', '>', '*', '?'];

/// Weighted pathway outputs.
pub const WEIGHTED_PATHWAYS_DIR: &str = "weighted_pathways";
/// Snapped pathway outputs.
pub const SNAPPED_PATHWAYS_DIR: &str = "pathways/snap_layers";
/// Snapped priority weighting layers.
pub const SNAPPED_PRIORITY_LAYERS_DIR: &str = "priority_layers/snap_layers";
/// Activity sums.
pub const ACTIVITIES_DIR: &str = "activities";
/// Activities clipped by the scenario-wide masks.
pub const MASKED_ACTIVITIES_DIR: &str = "masked_activities";
/// Activities clipped by their own masks.
pub const FINAL_MASKED_ACTIVITIES_DIR: &str = "final_masked_activities";
/// Sieved activities.
pub const SIEVED_DIR: &str = "sieved_ims";
/// Normalized activities.
pub const NORMALIZED_ACTIVITIES_DIR: &str = "normalized_activities";

/// Replace characters that are unsafe in file names.
#[must_use]
pub fn clean_filename(name: &str) -> String {
    name.chars()
        .map(|c| if UNSAFE_CHARS.contains(&c) { '_' } else { c })
        .collect()
}

/// Four random hex digits that keep repeated runs from overwriting
/// each other.
#[must_use]
pub fn short_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(4);
    id
}

/// `{base}/{subdir}/{clean name}_{4 hex}{suffix}.tif`. An empty
/// `subdir` places the file directly in `base`.
#[must_use]
pub fn layer_output_path(base: &Path, subdir: &str, name: &str, suffix: &str) -> LayerPath {
    let file = format!("{}_{}{suffix}.tif", clean_filename(name), short_id());
    let dir = if subdir.is_empty() {
        base.to_path_buf()
    } else {
        base.join(subdir)
    };
    LayerPath::new(dir.join(file))
}

/// Path of the final highest-position raster for a scenario.
#[must_use]
pub fn scenario_output_path(base: &Path, scenario: Uuid) -> LayerPath {
    let mut id = scenario.to_string();
    id.truncate(4);
    LayerPath::new(base.join(format!("{}_{id}.tif", crate::types::SCENARIO_OUTPUT_FILE_NAME)))
}

/// Same directory and stem with `_final` appended, for layers whose
/// nodata tag has been rewritten after resampling.
#[must_use]
pub fn final_variant(path: &LayerPath) -> LayerPath {
    let parent = path.as_path().parent().unwrap_or_else(|| Path::new(""));
    LayerPath::new(parent.join(format!("{}_final.tif", path.stem())))
}
