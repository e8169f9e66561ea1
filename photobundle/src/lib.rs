//! Sliding-window photometric bundle adjustment.
//!
//! [`PhotometricBundleAdjustment`] ingests posed images with depth maps one at a time. Each
//! new frame is correlated against the reference patches of the live scene points, new
//! points are spawned from salient pixels with valid depth, the window of recent frames is
//! advanced, and once enough frames and points are available the window poses and point
//! positions are refined jointly by minimizing the photometric error against the
//! reference patches.
//!
//! ```
//! use nalgebra::{Matrix4, Point2};
//! use photobundle::{Calibration, ImageSize, Options, PhotometricBundleAdjustment};
//! use photometric_patch::Raster;
//!
//! let calibration = Calibration::identity()
//!     .focal(40.0)
//!     .principal_point(Point2::new(15.5, 15.5));
//! let mut adjustment =
//!     PhotometricBundleAdjustment::new(calibration, ImageSize::new(32, 32), Options::default())
//!         .unwrap();
//! let image = Raster::from_fn(32, 32, |x, y| ((x * 7 + y * 3) % 13) as f32 / 12.0);
//! let depth = Raster::from_fn(32, 32, |_, _| 2.0);
//! let result = adjustment.add_frame(image, depth, &Matrix4::identity()).unwrap();
//! assert_eq!(result.frame_id, 0);
//! assert_eq!(result.spawned, result.points.len());
//! ```

mod camera;
mod error;
mod loss;
mod optimizer;
mod pose;
mod result;
mod scene_point;
mod settings;
mod solver;
mod spawn;
mod window;

pub use camera::*;
pub use error::*;
pub use loss::*;
pub use optimizer::*;
pub use pose::WorldToCamera;
pub use result::*;
pub use scene_point::*;
pub use settings::*;
pub use solver::*;
pub use spawn::{is_valid_depth, select_candidates, Candidate};
pub use window::*;

use float_ord::FloatOrd;
use itertools::Itertools;
use log::*;
use nalgebra::{Matrix4, Point2, Point3};
use photometric_patch::{gradient, Raster, ZnccPatch};
use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};

#[cfg(feature = "rayon")]
use rayon::prelude::*;

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// Reserved for a per-frame descriptor cache. It carries no data yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct DescriptorFrame;

/// The outcome of correlating one point against a new frame.
#[derive(Debug, Clone, Copy)]
enum Association {
    Hit { pixel: Point2<f64>, saliency: f64 },
    Miss,
}

/// A point about to be spawned from the newest frame.
struct Spawn {
    position: Point3<f64>,
    patch: ZnccPatch,
    pixel: Point2<i32>,
    saliency: f64,
}

/// The photometric bundle adjustment engine.
///
/// Frames must be ingested from a single thread, one at a time. Internally the
/// association and the residual evaluation run on rayon when the `rayon` feature is
/// enabled.
pub struct PhotometricBundleAdjustment<S = LevenbergMarquardtSolver> {
    /// The intrinsics shared by every frame
    calibration: Calibration,
    /// The size every image and depth map must have
    image_size: ImageSize,
    options: Options,
    /// Minimizes the refinement problems
    solver: S,
    /// The live points and the window of frames
    map: ScenePointMap,
    /// The id of the next ingested frame
    next_frame: FrameId,
}

impl PhotometricBundleAdjustment {
    /// Creates an engine that refines with Levenberg-Marquardt.
    pub fn new(
        calibration: Calibration,
        image_size: ImageSize,
        options: Options,
    ) -> Result<Self, Error> {
        Self::with_solver(
            calibration,
            image_size,
            options,
            LevenbergMarquardtSolver::default(),
        )
    }
}

impl<S> PhotometricBundleAdjustment<S>
where
    S: NonlinearSolver,
{
    /// Creates an engine that refines with the given solver.
    pub fn with_solver(
        calibration: Calibration,
        image_size: ImageSize,
        options: Options,
        solver: S,
    ) -> Result<Self, Error> {
        options.validate()?;
        Ok(Self {
            calibration,
            image_size,
            options,
            solver,
            map: ScenePointMap::new(options.window_size),
            next_frame: 0,
        })
    }

    pub fn calibration(&self) -> Calibration {
        self.calibration
    }

    pub fn image_size(&self) -> ImageSize {
        self.image_size
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn map(&self) -> &ScenePointMap {
        &self.map
    }

    pub fn solver(&self) -> &S {
        &self.solver
    }

    /// Ingests an image with its depth map and the world to camera pose as a homogeneous
    /// matrix.
    ///
    /// Fails without touching the map if the rasters do not have the configured size or
    /// the pose is not a rigid transform.
    pub fn add_frame(
        &mut self,
        image: Raster,
        depth: Raster,
        pose: &Matrix4<f64>,
    ) -> Result<AdjustmentResult, Error> {
        let pose = WorldToCamera::from_matrix(pose)?;
        self.add_frame_with_pose(image, depth, pose)
    }

    /// Ingests an image with its depth map and its world to camera pose.
    ///
    /// The last representable [`FrameId`] is never assigned. Once it is reached every call
    /// fails with [`Error::FrameIdsExhausted`].
    pub fn add_frame_with_pose(
        &mut self,
        image: Raster,
        depth: Raster,
        pose: WorldToCamera,
    ) -> Result<AdjustmentResult, Error> {
        let expected = (self.image_size.width, self.image_size.height);
        if !self.image_size.matches(&image) {
            return Err(Error::ImageSizeMismatch {
                expected,
                actual: image.dimensions(),
            });
        }
        if !self.image_size.matches(&depth) {
            return Err(Error::DepthSizeMismatch {
                expected,
                actual: depth.dimensions(),
            });
        }

        let frame_id = self.next_frame;
        self.next_frame = frame_id
            .checked_add(1)
            .ok_or(Error::FrameIdsExhausted)?;

        let (tracked, missed, dropped, occupied) = self.associate(frame_id, &image, pose);

        let evicted_frames = self.map.add_frame(Frame {
            id: frame_id,
            image,
            depth,
            pose,
        });
        let marginalized = self
            .map
            .marginalize_points()
            .into_iter()
            .map(|(key, point)| PointSnapshot::new(key, &point))
            .collect_vec();

        let spawned = self.spawn(frame_id, &occupied);

        let solver = self.refine();

        info!(
            "frame {}: tracked {}, missed {}, dropped {}, spawned {}, marginalized {}, live points {}",
            frame_id,
            tracked,
            missed,
            dropped,
            spawned,
            marginalized.len(),
            self.map.num_points()
        );
        if !evicted_frames.is_empty() {
            debug!("evicted frames {:?} from the window", evicted_frames);
        }

        Ok(AdjustmentResult {
            frame_id,
            poses: self.map.frames().map(|frame| (frame.id, frame.pose)).collect(),
            points: self
                .map
                .points()
                .map(|(key, point)| PointSnapshot::new(key, point))
                .collect(),
            marginalized,
            evicted_frames,
            tracked,
            missed,
            spawned,
            dropped,
            solver,
        })
    }

    /// Correlates every live point against the new frame and updates its visibility.
    ///
    /// Returns the tracked, missed and dropped counts together with the pixels of the
    /// tracked points in the new frame.
    fn associate(
        &mut self,
        frame_id: FrameId,
        image: &Raster,
        pose: WorldToCamera,
    ) -> (usize, usize, usize, Vec<Point2<f64>>) {
        let points = self.map.points().collect_vec();
        let (calibration, image_size, options) = (self.calibration, self.image_size, self.options);
        let correlate = |&(key, point): &(PointKey, &ScenePoint)| {
            (
                key,
                associate_point(point, image, pose, &calibration, image_size, &options),
            )
        };
        let outcomes: Vec<(PointKey, Association)> = {
            #[cfg(not(feature = "rayon"))]
            {
                points.iter().map(correlate).collect()
            }
            #[cfg(feature = "rayon")]
            {
                points.par_iter().map(correlate).collect()
            }
        };

        let (mut tracked, mut missed, mut dropped) = (0, 0, 0);
        let mut occupied = vec![];
        for (key, outcome) in outcomes {
            let point = match self.map.point_mut(key) {
                Some(point) => point,
                None => continue,
            };
            let remove = match outcome {
                Association::Hit { pixel, saliency } => {
                    point.record_hit(frame_id, saliency);
                    tracked += 1;
                    occupied.push(pixel);
                    saliency < self.options.min_retention_saliency
                }
                Association::Miss => {
                    missed += 1;
                    point.record_miss() > self.options.max_consecutive_misses
                }
            };
            if remove {
                trace!("dropping point {:?}", key);
                self.map.drop_point(key);
                dropped += 1;
            }
        }
        (tracked, missed, dropped, occupied)
    }

    /// Spawns points from the newest frame away from the tracked points.
    fn spawn(&mut self, frame_id: FrameId, occupied: &[Point2<f64>]) -> usize {
        let budget = self
            .options
            .max_points_per_frame
            .min(self.options.max_num_points.saturating_sub(self.map.num_points()));
        let spawns = match self.map.frame(frame_id) {
            Some(frame) => {
                let camera_to_world = frame.pose.camera_to_world();
                select_candidates(&frame.image, &frame.depth, occupied, &self.options, budget)
                    .into_iter()
                    .filter_map(|candidate| {
                        let pixel = candidate.pixel;
                        let center = [f64::from(pixel.x), f64::from(pixel.y)];
                        let patch =
                            ZnccPatch::from_image(&frame.image, self.options.patch_radius, center);
                        if patch.is_degenerate() {
                            return None;
                        }
                        let camera = self
                            .calibration
                            .unproject(Point2::new(center[0], center[1]), candidate.depth);
                        Some(Spawn {
                            position: camera_to_world * camera,
                            patch,
                            pixel,
                            saliency: candidate.saliency,
                        })
                    })
                    .collect_vec()
            }
            None => return 0,
        };

        let mut spawned = 0;
        for spawn in spawns {
            if let Some(key) = self
                .map
                .spawn_point(spawn.position, frame_id, spawn.patch, spawn.pixel)
            {
                if let Some(point) = self.map.point_mut(key) {
                    point.set_saliency(spawn.saliency);
                }
                spawned += 1;
            }
        }
        spawned
    }

    /// Jointly refines the window poses and the most salient points.
    fn refine(&mut self) -> Option<SolverReport> {
        for (_, point) in self.map.points_mut() {
            point.set_refined(false);
        }
        if self.map.num_frames() < self.options.min_frames_for_refinement {
            return None;
        }
        let eligible = self
            .map
            .points()
            .filter(|(_, point)| point.num_frames() >= self.options.min_observations)
            .sorted_by_key(|(_, point)| Reverse(FloatOrd(point.saliency())))
            .take(self.options.max_refinement_points)
            .collect_vec();
        if eligible.len() < self.options.min_points_for_refinement {
            trace!(
                "skipping refinement with {} eligible points",
                eligible.len()
            );
            return None;
        }
        // Only frames with observations take part. The oldest of them anchors the gauge.
        let participating: BTreeSet<FrameId> = eligible
            .iter()
            .flat_map(|(_, point)| point.visibility_list().iter().copied())
            .collect();
        let anchor = *participating.iter().next()?;
        let frames = participating
            .iter()
            .map(|&id| {
                self.map.frame(id).map(|frame| ProblemFrame {
                    id,
                    image: &frame.image,
                    pose: frame.pose,
                    fixed: id == anchor,
                })
            })
            .collect::<Option<Vec<_>>>()?;
        let frame_slots: HashMap<FrameId, usize> = frames
            .iter()
            .enumerate()
            .map(|(ix, frame)| (frame.id, ix))
            .collect();
        let observations = eligible
            .iter()
            .enumerate()
            .flat_map(|(point_ix, (_, point))| {
                point
                    .visibility_list()
                    .iter()
                    .map(move |id| (point_ix, *id))
            })
            .filter_map(|(point_ix, id)| {
                frame_slots.get(&id).map(|&frame| ProblemObservation {
                    point: point_ix,
                    frame,
                })
            })
            .collect_vec();
        let points = eligible
            .iter()
            .map(|(_, point)| ProblemPoint {
                position: point.position(),
                patch: point.patch(),
            })
            .collect_vec();
        let problem = PhotometricProblem::new(
            self.calibration,
            self.image_size,
            self.options.patch_radius,
            self.options.robust_loss,
            self.options.robust_loss_scale,
            frames,
            points,
            observations,
        );
        debug!(
            "refining {} points over {} observations anchored at frame {} with {} parameters and {} residuals",
            eligible.len(),
            problem.observations().len(),
            anchor,
            problem.num_parameters(),
            problem.num_residuals()
        );
        if problem.num_residuals() < problem.num_parameters() {
            debug!("refinement problem is underdetermined, skipping");
            return None;
        }

        let (problem, report) = self.solver.solve(problem, self.options.max_iterations);
        if !report.is_usable() {
            warn!(
                "refinement rejected ({}, {} of {} observations in view), keeping the previous estimates",
                report.termination, report.final_in_view, report.initial_in_view
            );
            return Some(report);
        }
        let poses = problem
            .poses()
            .filter(|&(id, _)| id != anchor)
            .collect_vec();
        let positions = eligible
            .iter()
            .map(|&(key, _)| key)
            .zip(problem.positions().iter().copied())
            .collect_vec();
        drop(problem);

        for (id, pose) in poses {
            if let Some(frame) = self.map.frame_mut(id) {
                frame.pose = pose;
            }
        }
        for (key, position) in positions {
            if let Some(point) = self.map.point_mut(key) {
                point.set_position(position);
                point.set_refined(true);
            }
        }
        Some(report)
    }
}

/// Correlates the reference patch of a point with the patch around its reprojection.
fn associate_point(
    point: &ScenePoint,
    image: &Raster,
    pose: WorldToCamera,
    calibration: &Calibration,
    image_size: ImageSize,
    options: &Options,
) -> Association {
    let pixel = match calibration.project(&pose.transform(&point.position())) {
        Some(pixel) => pixel,
        None => return Association::Miss,
    };
    if !image_size.contains_window(pixel, options.patch_radius) {
        return Association::Miss;
    }
    let patch = ZnccPatch::from_image(image, options.patch_radius, [pixel.x, pixel.y]);
    // Degenerate patches score below any threshold.
    if point.patch().score(&patch) < options.min_score {
        return Association::Miss;
    }
    let (gx, gy) = gradient::<f64>(image, pixel.x, pixel.y);
    Association::Hit {
        pixel,
        saliency: (gx * gx + gy * gy).sqrt(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> PhotometricBundleAdjustment {
        let calibration = Calibration::identity()
            .focal(20.0)
            .principal_point(Point2::new(7.5, 7.5));
        PhotometricBundleAdjustment::new(calibration, ImageSize::new(16, 16), Options::default())
            .unwrap()
    }

    fn frame() -> (Raster, Raster) {
        (
            Raster::from_fn(16, 16, |x, y| ((x * 5 + y * 3) % 7) as f32 / 6.0),
            Raster::from_fn(16, 16, |_, _| 2.0),
        )
    }

    #[test]
    fn frame_ids_count_up() {
        let mut adjustment = engine();
        for expected in 0..3 {
            let (image, depth) = frame();
            let result = adjustment
                .add_frame_with_pose(image, depth, WorldToCamera::identity())
                .unwrap();
            assert_eq!(result.frame_id, expected);
        }
    }

    #[test]
    fn exhausted_frame_ids_fail_without_touching_the_map() {
        let mut adjustment = engine();
        adjustment.next_frame = FrameId::MAX;
        let (image, depth) = frame();
        assert_eq!(
            adjustment.add_frame_with_pose(image, depth, WorldToCamera::identity()),
            Err(Error::FrameIdsExhausted)
        );
        assert_eq!(adjustment.map().num_frames(), 0);
        assert_eq!(adjustment.map().num_points(), 0);
        assert_eq!(adjustment.next_frame, FrameId::MAX);
    }
}
