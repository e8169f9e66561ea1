//! # Photometric Patch
//!
//! Building blocks for direct (photometric) tracking: a single channel floating
//! point [`Raster`], a bilinear subpixel sampler with an explicit border policy,
//! and [`ZnccPatch`], a square window of samples that is compared to other
//! windows with zero-mean normalized cross-correlation (ZNCC).
//!
//! ZNCC is invariant to additive brightness changes and to linear contrast
//! changes between two images, which makes it suitable for checking if a point
//! sampled in one frame still looks the same when reprojected into another.
//!
//! ```
//! use photometric_patch::{Raster, ZnccPatch};
//!
//! let image = Raster::from_fn(32, 32, |x, y| ((x * 7 + y * 13) % 17) as f32);
//! let a = ZnccPatch::from_image(&image, 2, [10.0, 12.0]);
//! let b = ZnccPatch::from_image(&image, 2, [10.0, 12.0]);
//! assert!((a.score(&b) - 1.0).abs() < 1e-9);
//! ```

mod patch;
mod raster;
mod sample;

pub use patch::*;
pub use raster::*;
pub use sample::*;
