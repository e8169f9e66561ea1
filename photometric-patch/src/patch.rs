use crate::{interpolate, Raster};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// Norm products below this are treated as a degenerate (textureless) comparison.
pub const DEGENERATE_NORM: f64 = 1e-6;

/// The number of samples in a square patch of the given radius.
pub const fn patch_dimension(radius: usize) -> usize {
    (2 * radius + 1) * (2 * radius + 1)
}

/// Iterates over the `(dx, dy)` offsets of a patch in sample order.
///
/// Samples are stored column-major: the outer loop walks the columns from `-radius`
/// to `radius` and the inner loop walks the rows. Everything that needs to line up
/// samples with their pixel location (such as Jacobians) must use this order.
pub fn patch_offsets(radius: usize) -> impl Iterator<Item = (f64, f64)> + Clone {
    let r = radius as i64;
    (-r..=r).flat_map(move |c| (-r..=r).map(move |row| (c as f64, row as f64)))
}

/// Fills `dst` with bilinearly interpolated samples around `center`.
///
/// `dst` must have [`patch_dimension`] entries.
pub fn interpolate_patch(
    dst: &mut [f64],
    raster: &Raster,
    radius: usize,
    center: [f64; 2],
    fill: f64,
    offset: f64,
) {
    debug_assert_eq!(dst.len(), patch_dimension(radius));
    let x = center[0] + offset;
    let y = center[1] + offset;
    for (sample, (dx, dy)) in dst.iter_mut().zip(patch_offsets(radius)) {
        *sample = interpolate(raster, x + dx, y + dy, fill, 0.0);
    }
}

/// Fills `dst` with the nearest pixels around `center`, clamping every location to the
/// raster bounds instead of interpolating.
pub fn copy_patch(dst: &mut [f64], raster: &Raster, radius: usize, center: [f64; 2]) {
    debug_assert_eq!(dst.len(), patch_dimension(radius));
    if raster.is_empty() {
        dst.iter_mut().for_each(|sample| *sample = 0.0);
        return;
    }
    let max_cols = raster.width() as i64 - 1;
    let max_rows = raster.height() as i64 - 1;
    let x = center[0].round() as i64;
    let y = center[1].round() as i64;
    for (sample, (dx, dy)) in dst.iter_mut().zip(patch_offsets(radius)) {
        let xs = (x + dx as i64).clamp(0, max_cols);
        let ys = (y + dy as i64).clamp(0, max_rows);
        *sample = raster.get(xs as usize, ys as usize) as f64;
    }
}

/// A square window of `(2R+1)²` samples with its mean removed, compared to other
/// patches by zero-mean normalized cross-correlation.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct ZnccPatch {
    radius: usize,
    data: Vec<f64>,
    norm: f64,
}

impl ZnccPatch {
    /// The score returned when either patch is degenerate or the patches are not comparable.
    ///
    /// Valid scores lie in `[-1, 1]`, so this is lower than any real correlation.
    pub const DEGENERATE_SCORE: f64 = -2.0;

    /// Creates an all zero (and therefore degenerate) patch.
    pub fn new(radius: usize) -> Self {
        Self {
            radius,
            data: vec![0.0; patch_dimension(radius)],
            norm: 0.0,
        }
    }

    /// Samples a patch with subpixel interpolation around `center`.
    pub fn from_image(raster: &Raster, radius: usize, center: [f64; 2]) -> Self {
        let mut patch = Self::new(radius);
        patch.set(raster, center);
        patch
    }

    /// Copies the nearest pixels around `center` into a patch.
    pub fn copied_from_image(raster: &Raster, radius: usize, center: [f64; 2]) -> Self {
        let mut patch = Self::new(radius);
        patch.copy(raster, center);
        patch
    }

    /// Resamples this patch with subpixel interpolation around `center`.
    ///
    /// Samples that fall outside the raster are `0`.
    pub fn set(&mut self, raster: &Raster, center: [f64; 2]) -> &Self {
        interpolate_patch(&mut self.data, raster, self.radius, center, 0.0, 0.0);
        self.normalize();
        self
    }

    /// Resamples this patch using clamped nearest pixel lookups around `center`.
    pub fn copy(&mut self, raster: &Raster, center: [f64; 2]) -> &Self {
        copy_patch(&mut self.data, raster, self.radius, center);
        self.normalize();
        self
    }

    fn normalize(&mut self) {
        let mean = self.data.iter().sum::<f64>() / self.data.len() as f64;
        self.data.iter_mut().for_each(|sample| *sample -= mean);
        self.norm = self.data.iter().map(|sample| sample * sample).sum::<f64>().sqrt();
    }

    /// Zero-mean normalized cross-correlation with `other`.
    ///
    /// Returns [`ZnccPatch::DEGENERATE_SCORE`] if the product of the norms is below
    /// [`DEGENERATE_NORM`] or if the patches have different radii.
    pub fn score(&self, other: &Self) -> f64 {
        let denominator = self.norm * other.norm;
        if self.radius != other.radius || denominator < DEGENERATE_NORM {
            return Self::DEGENERATE_SCORE;
        }
        let dot: f64 = self
            .data
            .iter()
            .zip(&other.data)
            .map(|(a, b)| a * b)
            .sum();
        dot / denominator
    }

    pub fn radius(&self) -> usize {
        self.radius
    }

    /// The mean-subtracted samples in column-major order (see [`patch_offsets`]).
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn norm(&self) -> f64 {
        self.norm
    }

    /// A patch is degenerate when it has (nearly) no variance.
    pub fn is_degenerate(&self) -> bool {
        self.norm < DEGENERATE_NORM
    }
}
