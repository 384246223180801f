//! Snap an extent onto a reference raster's pixel grid.

use crate::types::Extent;

/// Quotients this close to an integer are treated as that integer, so
/// an extent that is already on the grid is returned unchanged despite
/// floating point noise.
const GRID_TOLERANCE: f64 = 1e-9;

/// Errors from [`align_extent`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AlignError {
    /// Pixel sizes must be finite and positive.
    #[error("invalid pixel resolution {x_res} x {y_res}")]
    InvalidResolution {
        /// Pixel width.
        x_res: f64,
        /// Pixel height.
        y_res: f64,
    },

    /// An edge of the reference or target extent is not finite.
    #[error("extent has non-finite edges")]
    NonFiniteExtent,
}

fn snap_floor(q: f64) -> f64 {
    let nearest = q.round();
    if (q - nearest).abs() < GRID_TOLERANCE {
        nearest
    } else {
        q.floor()
    }
}

fn snap_ceil(q: f64) -> f64 {
    let nearest = q.round();
    if (q - nearest).abs() < GRID_TOLERANCE {
        nearest
    } else {
        q.ceil()
    }
}

/// Smallest extent on the reference grid that contains `target`.
///
/// Edges fall on whole multiples of the pixel size counted from the
/// reference's left, bottom and top edges.
///
/// # Errors
///
/// Returns [`AlignError`] when a resolution is zero, negative or not
/// finite, or when either extent has a non-finite edge.
pub fn align_extent(
    reference: &Extent,
    x_res: f64,
    y_res: f64,
    target: &Extent,
) -> Result<Extent, AlignError> {
    if !(x_res.is_finite() && y_res.is_finite() && x_res > 0.0 && y_res > 0.0) {
        return Err(AlignError::InvalidResolution { x_res, y_res });
    }
    if !reference.bbox().iter().chain(target.bbox().iter()).all(|v| v.is_finite()) {
        return Err(AlignError::NonFiniteExtent);
    }

    let left = reference.xmin + x_res * snap_floor((target.xmin - reference.xmin) / x_res);
    let right = reference.xmin + x_res * snap_ceil((target.xmax - reference.xmin) / x_res);
    let bottom = reference.ymin + y_res * snap_floor((target.ymin - reference.ymin) / y_res);
    let top = reference.ymax - y_res * snap_floor((reference.ymax - target.ymax) / y_res);

    Ok(Extent::new(left, right, bottom, top))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    const REFERENCE: Extent = Extent::new(0.0, 100.0, 0.0, 100.0);

    #[test]
    fn expands_to_pixel_edges() {
        let target = Extent::new(1.5, 8.2, 2.1, 9.9);
        let aligned = align_extent(&REFERENCE, 1.0, 1.0, &target).unwrap();
        assert_eq!(aligned, Extent::new(1.0, 9.0, 2.0, 10.0));
    }

    #[test]
    fn respects_reference_origin() {
        let reference = Extent::new(0.5, 100.5, 0.25, 100.25);
        let target = Extent::new(3.0, 7.0, 3.0, 7.0);
        let aligned = align_extent(&reference, 2.0, 2.0, &target).unwrap();
        assert_eq!(aligned, Extent::new(2.5, 8.5, 2.25, 8.25));
    }

    #[test]
    fn fractional_resolution_on_grid_is_stable() {
        let target = Extent::new(0.3, 0.9, 0.1, 0.7);
        let aligned = align_extent(&REFERENCE, 0.1, 0.1, &target).unwrap();
        assert!((aligned.xmin - 0.3).abs() < 1e-9);
        assert!((aligned.xmax - 0.9).abs() < 1e-9);
        assert!((aligned.ymin - 0.1).abs() < 1e-9);
    }

    #[test]
    fn rejects_zero_resolution() {
        let err = align_extent(&REFERENCE, 0.0, 1.0, &REFERENCE).unwrap_err();
        assert!(matches!(err, AlignError::InvalidResolution { .. }));
    }

    #[test]
    fn rejects_non_finite_target() {
        let target = Extent::new(f64::NAN, 1.0, 0.0, 1.0);
        assert_eq!(
            align_extent(&REFERENCE, 1.0, 1.0, &target),
            Err(AlignError::NonFiniteExtent)
        );
    }

    proptest! {
        #[test]
        fn alignment_is_idempotent(
            x0 in -500.0..500.0_f64,
            w in 0.0..300.0_f64,
            y0 in -500.0..500.0_f64,
            h in 0.0..300.0_f64,
            res in prop::sample::select(vec![0.25, 0.5, 1.0, 2.0, 30.0]),
        ) {
            let target = Extent::new(x0, x0 + w, y0, y0 + h);
            let once = align_extent(&REFERENCE, res, res, &target).unwrap();
            let twice = align_extent(&REFERENCE, res, res, &once).unwrap();
            prop_assert!((once.xmin - twice.xmin).abs() < 1e-6);
            prop_assert!((once.xmax - twice.xmax).abs() < 1e-6);
            prop_assert!((once.ymin - twice.ymin).abs() < 1e-6);
            prop_assert!((once.ymax - twice.ymax).abs() < 1e-6);
        }

        #[test]
        fn aligned_extent_contains_target(
            x0 in -500.0..500.0_f64,
            w in 0.0..300.0_f64,
            y0 in -500.0..500.0_f64,
            h in 0.0..300.0_f64,
        ) {
            let target = Extent::new(x0, x0 + w, y0, y0 + h);
            let aligned = align_extent(&REFERENCE, 3.0, 3.0, &target).unwrap();
            prop_assert!(aligned.xmin <= target.xmin + 1e-6);
            prop_assert!(aligned.xmax >= target.xmax - 1e-6);
            prop_assert!(aligned.ymin <= target.ymin + 1e-6);
            prop_assert!(aligned.ymax >= target.ymax - 1e-6);
        }
    }
}
