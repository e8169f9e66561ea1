use nalgebra::{Matrix2x3, Matrix3, Point2, Point3, Vector2};
use photometric_patch::Raster;

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// The dimensions every ingested image and depth map must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct ImageSize {
    pub width: usize,
    pub height: usize,
}

impl ImageSize {
    pub fn new(width: usize, height: usize) -> Self {
        Self { width, height }
    }

    /// Checks if the raster has exactly these dimensions.
    pub fn matches(&self, raster: &Raster) -> bool {
        raster.dimensions() == (self.width, self.height)
    }

    /// Checks if a square window of `radius` around `pixel` lies fully inside the image.
    ///
    /// The last valid pixel is included, so a window that ends exactly on it is accepted.
    pub fn contains_window(&self, pixel: Point2<f64>, radius: usize) -> bool {
        let r = radius as f64;
        pixel.x.is_finite()
            && pixel.y.is_finite()
            && pixel.x - r >= 0.0
            && pixel.y - r >= 0.0
            && pixel.x + r <= (self.width as f64 - 1.0)
            && pixel.y + r <= (self.height as f64 - 1.0)
    }
}

/// Pinhole camera intrinsics as per
/// [this Wikipedia page](https://en.wikipedia.org/wiki/Camera_resectioning#Intrinsic_parameters).
///
/// Pixel coordinates have their origin at the center of the top left pixel, x to the right
/// and y down. Camera coordinates have z pointing forwards.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct Calibration {
    pub focals: Vector2<f64>,
    pub principal_point: Point2<f64>,
    pub skew: f64,
}

impl Calibration {
    /// Creates intrinsics that would produce an identity intrinsic matrix.
    pub fn identity() -> Self {
        Self {
            focals: Vector2::new(1.0, 1.0),
            principal_point: Point2::new(0.0, 0.0),
            skew: 0.0,
        }
    }

    pub fn focals(self, focals: Vector2<f64>) -> Self {
        Self { focals, ..self }
    }

    pub fn focal(self, focal: f64) -> Self {
        Self {
            focals: Vector2::new(focal, focal),
            ..self
        }
    }

    pub fn principal_point(self, principal_point: Point2<f64>) -> Self {
        Self {
            principal_point,
            ..self
        }
    }

    pub fn skew(self, skew: f64) -> Self {
        Self { skew, ..self }
    }

    #[rustfmt::skip]
    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.focals.x,  self.skew,      self.principal_point.x,
            0.0,            self.focals.y,  self.principal_point.y,
            0.0,            0.0,            1.0,
        )
    }

    /// Projects a point in camera coordinates to pixel coordinates.
    ///
    /// Returns `None` for points on or behind the image plane.
    pub fn project(&self, point: &Point3<f64>) -> Option<Point2<f64>> {
        if !(point.z > 0.0) {
            return None;
        }
        let x = point.x / point.z;
        let y = point.y / point.z;
        Some(Point2::new(
            self.focals.x * x + self.skew * y + self.principal_point.x,
            self.focals.y * y + self.principal_point.y,
        ))
    }

    /// Projects a point and also returns the Jacobian of the pixel in respect to the point.
    pub fn project_jacobian(&self, point: &Point3<f64>) -> Option<(Point2<f64>, Matrix2x3<f64>)> {
        let pixel = self.project(point)?;
        let inv_z = 1.0 / point.z;
        let inv_z2 = inv_z * inv_z;
        let (fx, fy, s) = (self.focals.x, self.focals.y, self.skew);
        #[rustfmt::skip]
        let jacobian = Matrix2x3::new(
            fx * inv_z, s * inv_z,  -(fx * point.x + s * point.y) * inv_z2,
            0.0,        fy * inv_z, -fy * point.y * inv_z2,
        );
        Some((pixel, jacobian))
    }

    /// Lifts a pixel with a known depth (distance along the optical axis) into camera coordinates.
    pub fn unproject(&self, pixel: Point2<f64>, depth: f64) -> Point3<f64> {
        let centered = pixel - self.principal_point;
        let y = centered.y / self.focals.y;
        let x = (centered.x - self.skew * y) / self.focals.x;
        Point3::new(x * depth, y * depth, depth)
    }
}
