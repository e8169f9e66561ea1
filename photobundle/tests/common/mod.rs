#![allow(dead_code)]

use nalgebra::{IsometryMatrix3, Point2, Rotation3, Translation3, Vector3};
use photobundle::{Calibration, ImageSize, WorldToCamera};
use photometric_patch::Raster;

pub const WIDTH: usize = 64;
pub const HEIGHT: usize = 48;
/// The world plane `z = PLANE_DEPTH` everything is rendered from.
pub const PLANE_DEPTH: f64 = 2.0;

pub fn init() {
    let _ = pretty_env_logger::try_init_timed();
}

pub fn calibration() -> Calibration {
    Calibration::identity()
        .focal(50.0)
        .principal_point(Point2::new(31.5, 23.5))
}

pub fn image_size() -> ImageSize {
    ImageSize::new(WIDTH, HEIGHT)
}

/// A smooth texture painted on the world plane.
pub fn texture(u: f64, v: f64) -> f64 {
    0.5 + 0.2 * (7.0 * u).sin() * (5.0 * v).cos()
        + 0.15 * (11.0 * (u + v)).sin()
        + 0.1 * (9.0 * v - 4.0 * u).cos()
}

pub fn pose(translation: Vector3<f64>, rotation: Vector3<f64>) -> WorldToCamera {
    WorldToCamera(IsometryMatrix3::from_parts(
        Translation3::from(translation),
        Rotation3::from_scaled_axis(rotation),
    ))
}

/// Ray casts the textured plane, returning the image and the depth map.
///
/// Pixels that do not see the plane have an intensity of 0 and an infinite depth.
pub fn render(pose: WorldToCamera) -> (Raster, Raster) {
    let calibration = calibration();
    let camera_to_world = pose.camera_to_world();
    let center = camera_to_world.translation.vector;
    let hits: Vec<Option<(f64, f64)>> = (0..HEIGHT)
        .flat_map(|y| (0..WIDTH).map(move |x| (x, y)))
        .map(|(x, y)| {
            let ray = calibration.unproject(Point2::new(x as f64, y as f64), 1.0);
            let direction = camera_to_world.rotation * ray.coords;
            let distance = (PLANE_DEPTH - center.z) / direction.z;
            if !(distance > 0.0) {
                return None;
            }
            let world = center + direction * distance;
            Some((texture(world.x, world.y), distance))
        })
        .collect();
    let image = Raster::from_fn(WIDTH, HEIGHT, |x, y| {
        hits[y * WIDTH + x].map_or(0.0, |(intensity, _)| intensity as f32)
    });
    // The ray has unit depth in camera space, so the distance along it is the depth.
    let depth = Raster::from_fn(WIDTH, HEIGHT, |x, y| {
        hits[y * WIDTH + x].map_or(f32::INFINITY, |(_, depth)| depth as f32)
    });
    (image, depth)
}
