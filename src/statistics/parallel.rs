//! Parallel computation implementations for the spatial reductions
//!
//! Each time step of a (time, lat, lon) block is reduced independently, so
//! time steps are spread across the rayon pool.

use ndarray::{Array1, ArrayView3, Axis};
use rayon::prelude::*;

/// Unweighted mean over (lat, lon) for every time step.
///
/// Accumulates in f64 and skips non-finite cells; a time step with no
/// finite cell yields NaN.
pub fn parallel_spatial_mean(block: ArrayView3<'_, f32>) -> Array1<f32> {
    let means: Vec<f32> = block
        .axis_iter(Axis(0))
        .into_par_iter()
        .map(|grid| {
            let (sum, count) = grid
                .iter()
                .filter(|v| v.is_finite())
                .fold((0.0_f64, 0_u64), |(sum, count), &v| (sum + f64::from(v), count + 1));

            if count > 0 {
                #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
                {
                    (sum / count as f64) as f32
                }
            } else {
                f32::NAN
            }
        })
        .collect();

    Array1::from(means)
}

/// Values of one grid cell across the block's time steps.
pub fn point_series(block: ArrayView3<'_, f32>, lat: usize, lon: usize) -> Array1<f32> {
    block.slice(ndarray::s![.., lat, lon]).to_owned()
}
