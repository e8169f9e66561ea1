use crate::Options;
use float_ord::FloatOrd;
use itertools::Itertools;
use log::*;
use nalgebra::Point2;
use photometric_patch::Raster;
use std::cmp::Reverse;

/// A pixel selected to become a new scene point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub pixel: Point2<i32>,
    pub depth: f64,
    /// Gradient magnitude at the pixel
    pub saliency: f64,
}

/// Checks if a depth sample can be lifted into a point.
pub fn is_valid_depth(depth: f64, options: &Options) -> bool {
    depth.is_finite() && depth >= options.min_valid_depth && depth <= options.max_valid_depth
}

/// Selects at most `budget` pixels of a new frame to spawn points from, highest saliency
/// first.
///
/// A pixel qualifies when its gradient magnitude reaches the minimum saliency, its depth is
/// valid, a patch plus the pixel its gradients need fits around it with a pixel to spare,
/// it is a local maximum of saliency, and it is not within the mask radius of any of the
/// `occupied` pixels (the projections of already tracked points).
pub fn select_candidates(
    image: &Raster,
    depth: &Raster,
    occupied: &[Point2<f64>],
    options: &Options,
    budget: usize,
) -> Vec<Candidate> {
    if budget == 0 || image.is_empty() {
        return vec![];
    }
    let (width, height) = image.dimensions();
    // The optimizer samples gradients one pixel past the patch, plus a pixel of slack.
    let border = options.patch_radius + 2;
    if width <= 2 * border || height <= 2 * border {
        return vec![];
    }
    let saliency = image.gradient_magnitude();
    let mask = occupancy_mask(width, height, occupied, options.mask_radius);

    let candidates = (border..height - border)
        .cartesian_product(border..width - border)
        .filter_map(|(y, x)| {
            let s = f64::from(saliency.get(x, y));
            if !(s >= options.min_saliency) || mask[y * width + x] {
                return None;
            }
            let d = f64::from(depth.get(x, y));
            if !is_valid_depth(d, options) {
                return None;
            }
            if !is_local_maximum(&saliency, x, y, options.non_max_suppression_radius) {
                return None;
            }
            Some(Candidate {
                pixel: Point2::new(x as i32, y as i32),
                depth: d,
                saliency: s,
            })
        })
        .sorted_by_key(|candidate| Reverse(FloatOrd(candidate.saliency)))
        .take(budget)
        .collect_vec();
    trace!(
        "selected {} spawn candidates with a budget of {}",
        candidates.len(),
        budget
    );
    candidates
}

/// Marks every pixel within `radius` (in both axes) of an occupied location.
fn occupancy_mask(
    width: usize,
    height: usize,
    occupied: &[Point2<f64>],
    radius: usize,
) -> Vec<bool> {
    let mut mask = vec![false; width * height];
    let r = radius as i64;
    for pixel in occupied {
        if !(pixel.x.is_finite() && pixel.y.is_finite()) {
            continue;
        }
        let cx = pixel.x.round() as i64;
        let cy = pixel.y.round() as i64;
        let ys = (cy - r).max(0)..=(cy + r).min(height as i64 - 1);
        for y in ys {
            let xs = (cx - r).max(0)..=(cx + r).min(width as i64 - 1);
            for x in xs {
                mask[y as usize * width + x as usize] = true;
            }
        }
    }
    mask
}

/// A pixel survives suppression if no neighbor is stronger. Equal neighbors earlier in
/// row-major order win the tie.
fn is_local_maximum(saliency: &Raster, x: usize, y: usize, radius: usize) -> bool {
    let value = saliency.get(x, y);
    let (width, height) = saliency.dimensions();
    let index = y * width + x;
    let ys = y.saturating_sub(radius)..=(y + radius).min(height - 1);
    for ny in ys {
        let xs = x.saturating_sub(radius)..=(x + radius).min(width - 1);
        for nx in xs {
            let other = saliency.get(nx, ny);
            let other_index = ny * width + nx;
            if other > value || (other == value && other_index < index) {
                return false;
            }
        }
    }
    true
}
