//! Arena of activities and the pathways they share.
//!
//! Pathways are interned by uuid when the graph is built, so a pathway
//! referenced by several activities is stored once and processed once.
//! Stages update a pathway through its [`PathwayId`] and every activity
//! holding that id sees the new path.

use std::collections::BTreeMap;

use uuid::Uuid;

use crate::types::{Activity, LayerPath, LayerType, NcsPathway, PriorityLayerRef};

/// Handle to a pathway in an [`ActivityGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathwayId(usize);

/// Handle to an activity in an [`ActivityGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActivityId(usize);

/// A pathway as the pipeline sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct PathwayRecord {
    /// Identity.
    pub uuid: Uuid,
    /// Display name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Current raster. Overwritten by snapping and weighting.
    pub path: LayerPath,
    /// Referenced priority weighting layers.
    pub priority_layers: Vec<PriorityLayerRef>,
    /// Snapped PWL rasters for this pathway, keyed by PWL uuid. Weighting
    /// prefers these over the registered path.
    pub priority_layer_paths: BTreeMap<Uuid, LayerPath>,
}

/// An activity as the pipeline sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityRecord {
    /// Identity.
    pub uuid: Uuid,
    /// Display name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Current raster. Overwritten by each stage from activity creation on.
    pub path: Option<LayerPath>,
    /// Contributing pathways.
    pub pathways: Vec<PathwayId>,
    /// Per-activity exclusion masks.
    pub mask_paths: Vec<LayerPath>,
    /// Ordering key for the final ranking.
    pub style_pixel_value: i64,
    /// Layer kind tag.
    pub layer_type: LayerType,
}

/// Activities and interned pathways.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActivityGraph {
    pathways: Vec<PathwayRecord>,
    activities: Vec<ActivityRecord>,
}

impl ActivityGraph {
    /// Build the graph, interning pathways by uuid. The first occurrence
    /// of a pathway wins; later copies with the same uuid share it.
    #[must_use]
    pub fn from_activities(activities: &[Activity]) -> Self {
        let mut graph = Self::default();
        let mut by_uuid: BTreeMap<Uuid, PathwayId> = BTreeMap::new();
        for activity in activities {
            let pathways = activity
                .pathways
                .iter()
                .map(|pathway| {
                    *by_uuid
                        .entry(pathway.uuid)
                        .or_insert_with(|| graph.push_pathway(pathway))
                })
                .collect();
            graph.activities.push(ActivityRecord {
                uuid: activity.uuid,
                name: activity.name.clone(),
                description: activity.description.clone(),
                path: activity.path.clone().filter(|p| !p.is_empty()),
                pathways,
                mask_paths: activity.mask_paths.clone(),
                style_pixel_value: activity.style_pixel_value,
                layer_type: activity.layer_type,
            });
        }
        graph
    }

    fn push_pathway(&mut self, pathway: &NcsPathway) -> PathwayId {
        let id = PathwayId(self.pathways.len());
        self.pathways.push(PathwayRecord {
            uuid: pathway.uuid,
            name: pathway.name.clone(),
            description: pathway.description.clone(),
            path: pathway.path.clone(),
            priority_layers: pathway.priority_layers.clone(),
            priority_layer_paths: BTreeMap::new(),
        });
        id
    }

    /// Number of activities.
    #[must_use]
    pub fn activity_count(&self) -> usize {
        self.activities.len()
    }

    /// Activity handles in input order.
    pub fn activity_ids(&self) -> impl Iterator<Item = ActivityId> + use<> {
        (0..self.activities.len()).map(ActivityId)
    }

    /// Pathways in first-reference order, each listed once.
    #[must_use]
    pub fn distinct_pathways(&self) -> Vec<PathwayId> {
        (0..self.pathways.len()).map(PathwayId).collect()
    }

    /// The activity behind a handle.
    #[must_use]
    pub fn activity(&self, id: ActivityId) -> &ActivityRecord {
        &self.activities[id.0]
    }

    /// Mutable access to an activity.
    pub fn activity_mut(&mut self, id: ActivityId) -> &mut ActivityRecord {
        &mut self.activities[id.0]
    }

    /// The pathway behind a handle.
    #[must_use]
    pub fn pathway(&self, id: PathwayId) -> &PathwayRecord {
        &self.pathways[id.0]
    }

    /// Mutable access to a pathway.
    pub fn pathway_mut(&mut self, id: PathwayId) -> &mut PathwayRecord {
        &mut self.pathways[id.0]
    }

    /// Activities that hold this pathway.
    #[must_use]
    pub fn sharing_activities(&self, id: PathwayId) -> Vec<ActivityId> {
        self.activity_ids()
            .filter(|a| self.activity(*a).pathways.contains(&id))
            .collect()
    }

    /// Whether any activity references at least one pathway.
    #[must_use]
    pub fn has_pathways(&self) -> bool {
        self.activities.iter().any(|a| !a.pathways.is_empty())
    }

    /// Plain activity values carrying the current paths.
    #[must_use]
    pub fn to_activities(&self) -> Vec<Activity> {
        self.activities
            .iter()
            .map(|record| Activity {
                uuid: record.uuid,
                name: record.name.clone(),
                description: record.description.clone(),
                path: record.path.clone(),
                pathways: record
                    .pathways
                    .iter()
                    .map(|id| {
                        let p = self.pathway(*id);
                        NcsPathway {
                            uuid: p.uuid,
                            name: p.name.clone(),
                            description: p.description.clone(),
                            path: p.path.clone(),
                            priority_layers: p.priority_layers.clone(),
                        }
                    })
                    .collect(),
                mask_paths: record.mask_paths.clone(),
                style_pixel_value: record.style_pixel_value,
                layer_type: record.layer_type,
            })
            .collect()
    }
}
