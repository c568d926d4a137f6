//! Point-in-area lookup over a boundary collection.

use crate::types::{Area, BoundaryCollection};
use geo::{BoundingRect, Contains, Point};
use rstar::{RTree, RTreeObject, AABB};

// Bounding box of one area, pointing back into the boundary collection
struct AreaIndex {
    index: usize,
    aabb: AABB<[f64; 2]>,
}

impl RTreeObject for AreaIndex {
    type Envelope = AABB<[f64; 2]>;
    fn envelope(&self) -> Self::Envelope {
        self.aabb
    }
}

/// R-tree of area bounding boxes. Only valid for the collection it was built from.
pub struct AreaTree {
    tree: RTree<AreaIndex>,
}

impl AreaTree {
    pub fn build(areas: &BoundaryCollection) -> Self {
        let items = areas
            .areas
            .iter()
            .enumerate()
            .filter_map(|(index, area)| {
                area.geometry.bounding_rect().map(|rect| AreaIndex {
                    index,
                    aabb: AABB::from_corners(
                        [rect.min().x, rect.min().y],
                        [rect.max().x, rect.max().y],
                    ),
                })
            })
            .collect();
        Self {
            tree: RTree::bulk_load(items),
        }
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    /// First area whose geometry contains the point.
    pub fn locate<'a>(&self, areas: &'a BoundaryCollection, lon: f64, lat: f64) -> Option<&'a Area> {
        let point = Point::new(lon, lat);
        self.tree
            .locate_in_envelope_intersecting(&AABB::from_point([lon, lat]))
            .filter_map(|candidate| areas.areas.get(candidate.index))
            .find(|area| area.geometry.contains(&point))
    }
}
