//! Vector layers and the polygon operations masking is built from.

use geo::{BooleanOps, BoundingRect, Geometry, GeometryCollection, Intersects, MultiPolygon, Point};
use rstar::primitives::{GeomWithData, Rectangle};
use rstar::{AABB, RTree};
use serde::{Deserialize, Serialize};

use crate::engine::{GeometryKind, VectorInfo};
use crate::types::{Crs, Extent};

/// Features of one vector layer, all in the same CRS.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorLayer {
    /// Coordinate reference system.
    #[serde(default)]
    pub crs: Crs,
    /// Feature geometries.
    #[serde(default)]
    pub features: Vec<Geometry<f64>>,
}

impl VectorLayer {
    /// Layer from its features.
    #[must_use]
    pub const fn new(crs: Crs, features: Vec<Geometry<f64>>) -> Self {
        Self { crs, features }
    }

    /// Bounding box of all features.
    #[must_use]
    pub fn extent(&self) -> Option<Extent> {
        GeometryCollection::from(self.features.clone())
            .bounding_rect()
            .map(Extent::from)
    }

    /// Geometry class of the features.
    #[must_use]
    pub fn geometry_kind(&self) -> GeometryKind {
        let mut kinds = self.features.iter().map(classify);
        let Some(first) = kinds.next() else {
            return GeometryKind::Empty;
        };
        if kinds.all(|k| k == first) {
            first
        } else {
            GeometryKind::Mixed
        }
    }

    /// Metadata as reported to the pipeline.
    #[must_use]
    pub fn info(&self) -> VectorInfo {
        VectorInfo {
            extent: self.extent(),
            crs: self.crs.clone(),
            geometry: self.geometry_kind(),
            feature_count: self.features.len(),
        }
    }

    /// Union of every polygonal feature.
    #[must_use]
    pub fn polygon_union(&self) -> MultiPolygon<f64> {
        self.features
            .iter()
            .filter_map(as_multi_polygon)
            .fold(MultiPolygon::new(Vec::new()), |acc, next| acc.union(&next))
    }
}

fn classify(geometry: &Geometry<f64>) -> GeometryKind {
    match geometry {
        Geometry::Polygon(_) | Geometry::MultiPolygon(_) | Geometry::Rect(_) | Geometry::Triangle(_) => {
            GeometryKind::Polygon
        }
        Geometry::Line(_) | Geometry::LineString(_) | Geometry::MultiLineString(_) => {
            GeometryKind::Line
        }
        Geometry::Point(_) | Geometry::MultiPoint(_) => GeometryKind::Point,
        Geometry::GeometryCollection(collection) => {
            let mut kinds = collection.iter().map(classify);
            match kinds.next() {
                None => GeometryKind::Empty,
                Some(first) if kinds.all(|k| k == first) => first,
                Some(_) => GeometryKind::Mixed,
            }
        }
    }
}

fn as_multi_polygon(geometry: &Geometry<f64>) -> Option<MultiPolygon<f64>> {
    match geometry {
        Geometry::Polygon(p) => Some(MultiPolygon::new(vec![p.clone()])),
        Geometry::MultiPolygon(mp) => Some(mp.clone()),
        Geometry::Rect(r) => Some(MultiPolygon::new(vec![r.to_polygon()])),
        Geometry::Triangle(t) => Some(MultiPolygon::new(vec![t.to_polygon()])),
        _ => None,
    }
}

/// Area covered by exactly one of the two layers.
#[must_use]
pub fn symmetric_difference(a: &VectorLayer, b: &VectorLayer) -> MultiPolygon<f64> {
    a.polygon_union().xor(&b.polygon_union())
}

type IndexedBox = GeomWithData<Rectangle<[f64; 2]>, usize>;

/// Point-in-polygon lookups against a layer, pre-filtered by an R-tree
/// of feature bounding boxes.
pub struct PolygonIndex<'a> {
    features: &'a [Geometry<f64>],
    tree: RTree<IndexedBox>,
}

impl<'a> PolygonIndex<'a> {
    /// Index the features of a layer.
    #[must_use]
    pub fn new(layer: &'a VectorLayer) -> Self {
        let boxes = layer
            .features
            .iter()
            .enumerate()
            .filter_map(|(i, g)| {
                let rect = g.bounding_rect()?;
                let corners = Rectangle::from_corners(
                    [rect.min().x, rect.min().y],
                    [rect.max().x, rect.max().y],
                );
                Some(GeomWithData::new(corners, i))
            })
            .collect();
        Self {
            features: &layer.features,
            tree: RTree::bulk_load(boxes),
        }
    }

    /// Whether the point touches any feature.
    #[must_use]
    pub fn contains(&self, x: f64, y: f64) -> bool {
        let point = Point::new(x, y);
        self.tree
            .locate_in_envelope_intersecting(&AABB::from_point([x, y]))
            .any(|candidate| self.features[candidate.data].intersects(&point))
    }
}

#[cfg(test)]
mod tests {
    use geo::{Area, polygon};

    use super::*;

    fn square(x0: f64, y0: f64, size: f64) -> Geometry<f64> {
        Geometry::Polygon(polygon![
            (x: x0, y: y0),
            (x: x0 + size, y: y0),
            (x: x0 + size, y: y0 + size),
            (x: x0, y: y0 + size),
        ])
    }

    #[test]
    fn geometry_kind_classification() {
        let polys = VectorLayer::new(Crs::default(), vec![square(0.0, 0.0, 1.0)]);
        assert_eq!(polys.geometry_kind(), GeometryKind::Polygon);
        let mixed = VectorLayer::new(
            Crs::default(),
            vec![square(0.0, 0.0, 1.0), Geometry::Point(Point::new(0.0, 0.0))],
        );
        assert_eq!(mixed.geometry_kind(), GeometryKind::Mixed);
        assert_eq!(VectorLayer::new(Crs::default(), Vec::new()).geometry_kind(), GeometryKind::Empty);
    }

    #[test]
    fn extent_spans_features() {
        let layer = VectorLayer::new(
            Crs::default(),
            vec![square(0.0, 0.0, 1.0), square(5.0, 2.0, 1.0)],
        );
        assert_eq!(layer.extent(), Some(Extent::new(0.0, 6.0, 0.0, 3.0)));
    }

    #[test]
    fn symmetric_difference_of_aoi_and_mask_excludes_mask() {
        let aoi = VectorLayer::new(Crs::default(), vec![square(0.0, 0.0, 10.0)]);
        let mask = VectorLayer::new(Crs::default(), vec![square(0.0, 0.0, 5.0)]);
        let usable = symmetric_difference(&aoi, &mask);
        assert!((usable.unsigned_area() - 75.0).abs() < 1e-9);
    }

    #[test]
    fn polygon_index_point_lookup() {
        let layer = VectorLayer::new(
            Crs::default(),
            vec![square(0.0, 0.0, 2.0), square(10.0, 10.0, 2.0)],
        );
        let index = PolygonIndex::new(&layer);
        assert!(index.contains(1.0, 1.0));
        assert!(index.contains(11.0, 11.5));
        assert!(!index.contains(5.0, 5.0));
    }
}
