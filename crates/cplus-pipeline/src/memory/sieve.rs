//! Connected-region sieve.
//!
//! 1. Pixels are grouped into regions of equal value with
//!    `imageproc`'s connected-component labelling. Nodata is background
//!    and never joins a region.
//! 2. A region adjacency graph is built over the labels.
//! 3. Regions are visited smallest first. A region still smaller than
//!    the threshold merges into its largest neighbour and takes that
//!    neighbour's value. Merges are tracked with a union-find so a
//!    region that absorbed others is measured by its combined size, and
//!    keeps merging while that size is under the threshold.

use std::collections::BTreeMap;

use image::{ImageBuffer, Luma};
use imageproc::region_labelling::{Connectivity as LabelConnectivity, connected_components};
use petgraph::graphmap::UnGraphMap;
use petgraph::unionfind::UnionFind;

use crate::engine::Connectivity;
use crate::events::Feedback;

use super::raster::Raster;

/// Sieve `raster`, merging regions smaller than `threshold` pixels.
#[allow(clippy::cast_precision_loss)]
pub fn sieve(
    raster: &Raster,
    threshold: f64,
    connectivity: Connectivity,
    feedback: &Feedback<'_>,
) -> Raster {
    let grid = raster.grid();
    let (cols, rows) = (grid.cols, grid.rows);

    // Class image: 0 is nodata, every distinct value gets its own id.
    let mut classes: BTreeMap<u64, u32> = BTreeMap::new();
    let class_image: ImageBuffer<Luma<u32>, Vec<u32>> = ImageBuffer::from_fn(cols, rows, |c, r| {
        let id = raster.value(c, r).map_or(0, |v| {
            let next = u32::try_from(classes.len() + 1).unwrap_or(u32::MAX);
            *classes.entry(v.to_bits()).or_insert(next)
        });
        Luma([id])
    });

    let conn = match connectivity {
        Connectivity::Four => LabelConnectivity::Four,
        Connectivity::Eight => LabelConnectivity::Eight,
    };
    let labels = connected_components(&class_image, conn, Luma([0_u32]));
    feedback.set_progress(30.0);

    let label_count = labels.pixels().map(|p| p.0[0]).max().unwrap_or(0) as usize + 1;
    let mut sizes = vec![0_usize; label_count];
    let mut values = vec![0.0_f64; label_count];
    let mut adjacency: UnGraphMap<u32, ()> = UnGraphMap::new();

    let mut offsets = vec![(1_i64, 0_i64), (0, 1)];
    if connectivity == Connectivity::Eight {
        offsets.extend([(1, 1), (-1, 1)]);
    }
    for r in 0..rows {
        for c in 0..cols {
            let label = labels.get_pixel(c, r).0[0];
            if label == 0 {
                continue;
            }
            sizes[label as usize] += 1;
            values[label as usize] = raster.get(c, r);
            adjacency.add_node(label);
            for &(dc, dr) in &offsets {
                let (nc, nr) = (i64::from(c) + dc, i64::from(r) + dr);
                let (Ok(nc), Ok(nr)) = (u32::try_from(nc), u32::try_from(nr)) else {
                    continue;
                };
                if nc >= cols || nr >= rows {
                    continue;
                }
                let other = labels.get_pixel(nc, nr).0[0];
                if other != 0 && other != label {
                    adjacency.add_edge(label, other, ());
                }
            }
        }
    }
    feedback.set_progress(60.0);

    let mut order: Vec<u32> = adjacency.nodes().collect();
    order.sort_by_key(|&l| (sizes[l as usize], l));

    let mut sets = UnionFind::<usize>::new(label_count);
    let mut members: Vec<Vec<u32>> = (0..label_count)
        .map(|l| vec![u32::try_from(l).unwrap_or(0)])
        .collect();
    let mut set_size = sizes.clone();
    let mut set_value = values.clone();

    for label in order {
        // A set that absorbed a smaller one keeps merging while it is
        // still under the threshold.
        let mut root = sets.find_mut(label as usize);
        while (set_size[root] as f64) < threshold {
            let target = members[root]
                .iter()
                .flat_map(|&m| adjacency.neighbors(m))
                .map(|n| sets.find(n as usize))
                .filter(|&n| n != root)
                .max_by_key(|&n| (set_size[n], std::cmp::Reverse(n)));
            let Some(target) = target else {
                break;
            };
            sets.union(root, target);
            let merged = sets.find_mut(root);
            let absorbed = if merged == root { target } else { root };
            let moved = std::mem::take(&mut members[absorbed]);
            members[merged].extend(moved);
            set_size[merged] = set_size[root] + set_size[target];
            set_value[merged] = set_value[target];
            root = merged;
        }
    }
    feedback.set_progress(90.0);

    let nodata = raster.nodata().unwrap_or(crate::types::NODATA);
    let values: Vec<f64> = labels
        .pixels()
        .map(|p| match p.0[0] {
            0 => nodata,
            label => set_value[sets.find(label as usize)],
        })
        .collect();
    feedback.set_progress(100.0);
    Raster::from_values(grid.clone(), Some(nodata), values)
        .unwrap_or_else(|_| Raster::filled(grid.clone(), Some(nodata), nodata))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::events::{CancellationToken, NullSink};
    use crate::memory::raster::GridSpec;
    use crate::types::{Crs, Extent, NODATA};

    fn raster(cols: u32, rows: u32, values: Vec<f64>) -> Raster {
        let extent = Extent::new(0.0, f64::from(cols), 0.0, f64::from(rows));
        let grid = GridSpec::new(&extent, 1.0, 1.0, Crs::default()).unwrap();
        Raster::from_values(grid, Some(NODATA), values).unwrap()
    }

    fn run(r: &Raster, threshold: f64) -> Vec<f64> {
        let token = CancellationToken::new();
        let feedback = Feedback::new(&NullSink, &token);
        sieve(r, threshold, Connectivity::Eight, &feedback)
            .values()
            .collect()
    }

    #[test]
    fn single_pixel_merges_into_background_region() {
        let mut values = vec![0.0; 25];
        values[12] = 1.0;
        let out = run(&raster(5, 5, values), 2.0);
        assert!(out.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn one_pixel_goes_and_three_pixels_stay_at_threshold_two() {
        // Background 0, a 3-pixel run of 1 on the top row and a lone 2
        // in the bottom corner.
        let mut values = vec![0.0; 25];
        values[0] = 1.0;
        values[1] = 1.0;
        values[2] = 1.0;
        values[24] = 2.0;
        let out = run(&raster(5, 5, values.clone()), 2.0);
        values[24] = 0.0;
        assert_eq!(out, values);
    }

    #[test]
    fn merged_region_under_threshold_keeps_merging() {
        // Ring of 1s (16 px) around a ring of 0s (8 px) around a single 1.
        // The centre joins the inner ring, which is still under 10 and so
        // joins the outer ring.
        let values: Vec<f64> = (0..25)
            .map(|i| {
                let (c, r) = (i % 5, i / 5);
                let edge = c == 0 || r == 0 || c == 4 || r == 4;
                if edge || i == 12 { 1.0 } else { 0.0 }
            })
            .collect();
        let out = run(&raster(5, 5, values), 10.0);
        assert_eq!(out, vec![1.0; 25]);
    }

    #[test]
    fn region_at_threshold_survives() {
        let mut values = vec![0.0; 25];
        values[6] = 1.0;
        values[7] = 1.0;
        values[8] = 1.0;
        let out = run(&raster(5, 5, values.clone()), 2.0);
        assert_eq!(out, values);
    }

    #[test]
    fn diagonal_pixels_connect_with_eight_neighbours() {
        let mut values = vec![0.0; 9];
        values[0] = 1.0;
        values[4] = 1.0;
        let out = run(&raster(3, 3, values.clone()), 2.0);
        assert_eq!(out, values);
    }

    #[test]
    fn isolated_region_without_neighbours_is_kept() {
        let values = vec![NODATA, 1.0, NODATA];
        let out = run(&raster(3, 1, values.clone()), 5.0);
        assert_eq!(out, values);
    }

    #[test]
    fn small_region_joins_largest_neighbour() {
        // Row: 2 2 2 | 7 | 3 3, threshold 2: the single 7 joins the 2s.
        let values = vec![2.0, 2.0, 2.0, 7.0, 3.0, 3.0];
        let out = run(&raster(6, 1, values), 2.0);
        assert_eq!(out, vec![2.0, 2.0, 2.0, 2.0, 3.0, 3.0]);
    }
}
