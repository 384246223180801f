//! Resampling a raster onto another grid.

use crate::config::ResamplingMethod;
use crate::error::EngineError;

use super::raster::{GridSpec, Raster};

/// Resample `source` onto `target`. Output pixels that receive no valid
/// source value are nodata under `nodata`.
///
/// # Errors
///
/// [`EngineError::Unsupported`] for the convolution kernels (cubic,
/// cubic spline, lanczos).
pub fn resample(
    source: &Raster,
    target: GridSpec,
    method: ResamplingMethod,
    rescale_values: bool,
    nodata: f64,
) -> Result<Raster, EngineError> {
    if matches!(
        method,
        ResamplingMethod::Cubic | ResamplingMethod::CubicSpline | ResamplingMethod::Lanczos
    ) {
        return Err(EngineError::Unsupported(format!("{method} resampling")));
    }
    let src = source.grid().clone();
    let scale = if rescale_values {
        (target.x_res * target.y_res) / (src.x_res * src.y_res)
    } else {
        1.0
    };
    let half_x = target.x_res / 2.0;
    let half_y = target.y_res / 2.0;

    let raster = Raster::from_fn(target, Some(nodata), |x, y| {
        let value = match method {
            ResamplingMethod::NearestNeighbour => source.sample(x, y),
            ResamplingMethod::Bilinear => bilinear(source, &src, x, y),
            _ => {
                let window = window_values(source, &src, x - half_x, x + half_x, y - half_y, y + half_y);
                if window.is_empty() {
                    source.sample(x, y)
                } else {
                    aggregate(method, window)
                }
            }
        };
        value.map(|v| v * scale)
    });
    Ok(raster)
}

/// Distance-weighted mean of the four cells around a point. Nodata
/// neighbours are left out and the remaining weights renormalised.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn bilinear(source: &Raster, grid: &GridSpec, x: f64, y: f64) -> Option<f64> {
    let u = (x - grid.xmin) / grid.x_res - 0.5;
    let v = (grid.ymax - y) / grid.y_res - 0.5;
    let (c0, r0) = (u.floor(), v.floor());
    let (fu, fv) = (u - c0, v - r0);

    let mut total = 0.0;
    let mut weight = 0.0;
    for (dc, dr, w) in [
        (0.0, 0.0, (1.0 - fu) * (1.0 - fv)),
        (1.0, 0.0, fu * (1.0 - fv)),
        (0.0, 1.0, (1.0 - fu) * fv),
        (1.0, 1.0, fu * fv),
    ] {
        let (col, row) = (c0 + dc, r0 + dr);
        if col < 0.0 || row < 0.0 || col >= f64::from(grid.cols) || row >= f64::from(grid.rows) {
            continue;
        }
        if let Some(value) = source.value(col as u32, row as u32) {
            total += value * w;
            weight += w;
        }
    }
    (weight > 0.0).then(|| total / weight)
}

/// Valid source values whose cell centres fall inside a box.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn window_values(
    source: &Raster,
    grid: &GridSpec,
    x0: f64,
    x1: f64,
    y0: f64,
    y1: f64,
) -> Vec<f64> {
    let first_col = ((x0 - grid.xmin) / grid.x_res - 0.5).ceil().max(0.0);
    let last_col = ((x1 - grid.xmin) / grid.x_res - 0.5)
        .floor()
        .min(f64::from(grid.cols) - 1.0);
    let first_row = ((grid.ymax - y1) / grid.y_res - 0.5).ceil().max(0.0);
    let last_row = ((grid.ymax - y0) / grid.y_res - 0.5)
        .floor()
        .min(f64::from(grid.rows) - 1.0);
    if first_col > last_col || first_row > last_row {
        return Vec::new();
    }
    let mut values = Vec::new();
    for row in first_row as u32..=last_row as u32 {
        for col in first_col as u32..=last_col as u32 {
            if let Some(v) = source.value(col, row) {
                values.push(v);
            }
        }
    }
    values
}

#[allow(clippy::cast_precision_loss)]
fn aggregate(method: ResamplingMethod, mut values: Vec<f64>) -> Option<f64> {
    values.sort_by(f64::total_cmp);
    let n = values.len();
    let (first, last) = (values.first().copied()?, values.last().copied()?);
    let result = match method {
        ResamplingMethod::Min => first,
        ResamplingMethod::Max => last,
        ResamplingMethod::Average => values.iter().sum::<f64>() / n as f64,
        ResamplingMethod::Median => quantile(&values, 0.5),
        ResamplingMethod::FirstQuartile => quantile(&values, 0.25),
        ResamplingMethod::ThirdQuartile => quantile(&values, 0.75),
        ResamplingMethod::Mode => mode(&values),
        ResamplingMethod::NearestNeighbour
        | ResamplingMethod::Bilinear
        | ResamplingMethod::Cubic
        | ResamplingMethod::CubicSpline
        | ResamplingMethod::Lanczos => return None,
    };
    Some(result)
}

/// Lower-nearest-rank quantile of sorted values.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let index = ((sorted.len() - 1) as f64 * q).floor() as usize;
    sorted[index]
}

/// Most frequent value of sorted values. The smallest wins ties.
#[allow(clippy::float_cmp)]
fn mode(sorted: &[f64]) -> f64 {
    let mut best = sorted[0];
    let mut best_run = 0;
    let mut run = 0;
    let mut current = sorted[0];
    for &v in sorted {
        if v == current {
            run += 1;
        } else {
            current = v;
            run = 1;
        }
        if run > best_run {
            best_run = run;
            best = current;
        }
    }
    best
}
