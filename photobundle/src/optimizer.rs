use crate::{pose::left_jacobian, Calibration, FrameId, ImageSize, RobustLoss, WorldToCamera};
use levenberg_marquardt::LeastSquaresProblem;
use nalgebra::{
    dimension::{Dynamic, U1},
    DMatrix, DVector, Matrix3, Matrix3x6, OMatrix, Point3, RowVector2, VecStorage, Vector6, U3,
    U6,
};
use photometric_patch::{gradient, interpolate, patch_dimension, patch_offsets, Raster, ZnccPatch};

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// A window frame taking part in refinement.
#[derive(Debug, Clone, Copy)]
pub struct ProblemFrame<'a> {
    pub id: FrameId,
    pub image: &'a Raster,
    pub pose: WorldToCamera,
    /// Fixed frames anchor the gauge and are not optimized.
    pub fixed: bool,
}

/// A scene point taking part in refinement.
#[derive(Debug, Clone, Copy)]
pub struct ProblemPoint<'a> {
    pub position: Point3<f64>,
    pub patch: &'a ZnccPatch,
}

/// One point observed in one frame, by index into the problem's points and frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProblemObservation {
    pub point: usize,
    pub frame: usize,
}

/// The residuals and Jacobian blocks of one observation.
struct ObservationBlock {
    residuals: Vec<f64>,
    pose: Option<OMatrix<f64, Dynamic, U6>>,
    point: OMatrix<f64, Dynamic, U3>,
}

/// Joint photometric refinement of window poses and point positions.
///
/// Every observation contributes `(2R+1)²` residuals: the mean-subtracted intensities
/// sampled around the point's reprojection minus the point's reference patch. Free poses
/// are parameterized as left perturbations `Exp(v, ω) * T` of their initial value and
/// points by their world position, in that order.
#[derive(Clone)]
pub struct PhotometricProblem<'a> {
    calibration: Calibration,
    image_size: ImageSize,
    radius: usize,
    loss: RobustLoss,
    loss_scale: f64,
    frames: Vec<ProblemFrame<'a>>,
    /// Parameter slot of each frame, `None` for fixed frames
    slots: Vec<Option<usize>>,
    deltas: Vec<Vector6<f64>>,
    patches: Vec<&'a ZnccPatch>,
    positions: Vec<Point3<f64>>,
    observations: Vec<ProblemObservation>,
    residuals: DVector<f64>,
    jacobian: DMatrix<f64>,
    /// The number of observations that could be sampled at the current parameters
    in_view: usize,
}

impl<'a> PhotometricProblem<'a> {
    /// Creates the problem and evaluates it at the initial parameters.
    ///
    /// Observations referring to points or frames that do not exist are ignored.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        calibration: Calibration,
        image_size: ImageSize,
        radius: usize,
        loss: RobustLoss,
        loss_scale: f64,
        frames: Vec<ProblemFrame<'a>>,
        points: Vec<ProblemPoint<'a>>,
        observations: impl IntoIterator<Item = ProblemObservation>,
    ) -> Self {
        let mut free = 0;
        let slots = frames
            .iter()
            .map(|frame| {
                if frame.fixed {
                    None
                } else {
                    free += 1;
                    Some(free - 1)
                }
            })
            .collect();
        let observations = observations
            .into_iter()
            .filter(|o| o.point < points.len() && o.frame < frames.len())
            .collect();
        let (patches, positions) = points
            .into_iter()
            .map(|point| (point.patch, point.position))
            .unzip();
        let mut problem = Self {
            calibration,
            image_size,
            radius,
            loss,
            loss_scale,
            frames,
            slots,
            deltas: vec![Vector6::zeros(); free],
            patches,
            positions,
            observations,
            residuals: DVector::zeros(0),
            jacobian: DMatrix::zeros(0, 0),
            in_view: 0,
        };
        problem.evaluate();
        problem
    }

    pub fn num_parameters(&self) -> usize {
        6 * self.deltas.len() + 3 * self.positions.len()
    }

    pub fn num_residuals(&self) -> usize {
        self.observations.len() * patch_dimension(self.radius)
    }

    pub fn observations(&self) -> &[ProblemObservation] {
        &self.observations
    }

    /// The number of observations whose patch window lies inside their frame at the
    /// current parameters.
    pub fn observations_in_view(&self) -> usize {
        self.in_view
    }

    /// Half the squared norm of the robustified residuals.
    pub fn cost(&self) -> f64 {
        0.5 * self.residuals.norm_squared()
    }

    /// The current pose of every frame in the problem.
    pub fn poses(&self) -> impl Iterator<Item = (FrameId, WorldToCamera)> + '_ {
        self.frames
            .iter()
            .zip(&self.slots)
            .map(move |(frame, slot)| (frame.id, self.pose_of(frame, *slot)))
    }

    /// The current position of every point, in the order they were passed in.
    pub fn positions(&self) -> &[Point3<f64>] {
        &self.positions
    }

    fn pose_of(&self, frame: &ProblemFrame<'_>, slot: Option<usize>) -> WorldToCamera {
        match slot {
            Some(slot) => frame.pose.perturbed(&self.deltas[slot]),
            None => frame.pose,
        }
    }

    fn point_column(&self, point: usize) -> usize {
        6 * self.deltas.len() + 3 * point
    }

    fn evaluate(&mut self) {
        let dimension = patch_dimension(self.radius);
        let blocks: Vec<Option<ObservationBlock>> = {
            #[cfg(not(feature = "rayon"))]
            {
                self.observations
                    .iter()
                    .map(|&observation| self.observation_block(observation))
                    .collect()
            }
            #[cfg(feature = "rayon")]
            {
                self.observations
                    .par_iter()
                    .map(|&observation| self.observation_block(observation))
                    .collect()
            }
        };

        let mut residuals = DVector::zeros(self.num_residuals());
        let mut jacobian = DMatrix::zeros(self.num_residuals(), self.num_parameters());
        let mut in_view = 0;
        for (ix, (observation, block)) in self.observations.iter().zip(blocks).enumerate() {
            let row = ix * dimension;
            let block = match block {
                Some(block) => block,
                None => {
                    // Out of view observations pay a constant penalty without derivatives.
                    residuals
                        .rows_mut(row, dimension)
                        .copy_from_slice(&self.out_of_view_residuals(observation.point));
                    continue;
                }
            };
            in_view += 1;
            residuals
                .rows_mut(row, dimension)
                .copy_from_slice(&block.residuals);
            if let (Some(pose_block), Some(slot)) = (&block.pose, self.slots[observation.frame]) {
                jacobian
                    .slice_mut((row, 6 * slot), (dimension, 6))
                    .copy_from(pose_block);
            }
            jacobian
                .slice_mut((row, self.point_column(observation.point)), (dimension, 3))
                .copy_from(&block.point);
        }
        self.residuals = residuals;
        self.jacobian = jacobian;
        self.in_view = in_view;
    }

    /// The residuals of an observation that cannot be sampled.
    ///
    /// The frame is treated as the fill value everywhere, leaving the negated reference
    /// patch. Leaving the image therefore never lowers the cost below that of matching a
    /// flat image.
    fn out_of_view_residuals(&self, point: usize) -> Vec<f64> {
        let reference = self.patches[point].data();
        let squared_norm: f64 = reference.iter().map(|r| r * r).sum();
        let scale = self
            .loss
            .block_scale(squared_norm, reference.len(), self.loss_scale);
        reference.iter().map(|r| -r * scale).collect()
    }

    /// Computes the robustified residuals and Jacobian of one observation.
    ///
    /// Returns `None` when the point is behind the camera or its window (plus the one pixel
    /// the gradient needs) leaves the image. Such observations are out of view.
    fn observation_block(&self, observation: ProblemObservation) -> Option<ObservationBlock> {
        let frame = &self.frames[observation.frame];
        let slot = self.slots[observation.frame];
        let pose = self.pose_of(frame, slot);
        let world = self.positions[observation.point];
        let camera = pose.transform(&world);
        let (pixel, projection) = self.calibration.project_jacobian(&camera)?;
        if !self.image_size.contains_window(pixel, self.radius + 1) {
            return None;
        }

        let dimension = patch_dimension(self.radius);
        let mut samples = Vec::with_capacity(dimension);
        let mut gradients = Vec::with_capacity(dimension);
        for (dx, dy) in patch_offsets(self.radius) {
            let (x, y) = (pixel.x + dx, pixel.y + dy);
            samples.push(interpolate(frame.image, x, y, 0.0, 0.0));
            let (gx, gy) = gradient(frame.image, x, y);
            gradients.push(RowVector2::new(gx, gy));
        }
        let n = dimension as f64;
        let mean = samples.iter().sum::<f64>() / n;
        let mean_gradient = gradients.iter().sum::<RowVector2<f64>>() / n;

        let reference = self.patches[observation.point].data();
        let mut residuals: Vec<f64> = samples
            .iter()
            .zip(reference)
            .map(|(sample, reference)| sample - mean - reference)
            .collect();

        // Derivatives of the camera point in respect to the parameters.
        let rotation: Matrix3<f64> = *pose.isometry().rotation.matrix();
        let d_pose = slot.map(|slot| {
            let omega = self.deltas[slot].fixed_rows::<3>(3).into_owned();
            let translation = self.deltas[slot].fixed_rows::<3>(0).into_owned();
            let rotated = camera.coords - translation;
            let mut d = Matrix3x6::zeros();
            d.fixed_columns_mut::<3>(0).copy_from(&Matrix3::identity());
            d.fixed_columns_mut::<3>(3)
                .copy_from(&(-rotated.cross_matrix() * left_jacobian(&omega)));
            d
        });

        let mut pose_block = d_pose.map(|_| OMatrix::<f64, Dynamic, U6>::zeros(dimension));
        let mut point_block = OMatrix::<f64, Dynamic, U3>::zeros(dimension);
        for (k, g) in gradients.iter().enumerate() {
            let d_camera = (g - mean_gradient) * projection;
            point_block
                .row_mut(k)
                .copy_from(&(d_camera * rotation));
            if let (Some(block), Some(d)) = (pose_block.as_mut(), d_pose.as_ref()) {
                block.row_mut(k).copy_from(&(d_camera * d));
            }
        }

        let squared_norm: f64 = residuals.iter().map(|r| r * r).sum();
        let scale = self.loss.block_scale(squared_norm, dimension, self.loss_scale);
        if scale != 1.0 {
            residuals.iter_mut().for_each(|r| *r *= scale);
            point_block *= scale;
            if let Some(block) = pose_block.as_mut() {
                *block *= scale;
            }
        }

        Some(ObservationBlock {
            residuals,
            pose: pose_block,
            point: point_block,
        })
    }
}

impl<'a> LeastSquaresProblem<f64, Dynamic, Dynamic> for PhotometricProblem<'a> {
    type ResidualStorage = VecStorage<f64, Dynamic, U1>;
    type JacobianStorage = VecStorage<f64, Dynamic, Dynamic>;
    type ParameterStorage = VecStorage<f64, Dynamic, U1>;

    fn set_params(&mut self, params: &DVector<f64>) {
        for (ix, delta) in self.deltas.iter_mut().enumerate() {
            *delta = params.fixed_rows::<6>(6 * ix).into_owned();
        }
        let offset = 6 * self.deltas.len();
        for (ix, position) in self.positions.iter_mut().enumerate() {
            *position = Point3::from(params.fixed_rows::<3>(offset + 3 * ix).into_owned());
        }
        self.evaluate();
    }

    fn params(&self) -> DVector<f64> {
        DVector::from_iterator(
            self.num_parameters(),
            self.deltas
                .iter()
                .flat_map(|delta| delta.iter().copied())
                .chain(self.positions.iter().flat_map(|p| p.coords.iter().copied())),
        )
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        Some(self.residuals.clone())
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        Some(self.jacobian.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{IsometryMatrix3, Point2, Rotation3, Translation3};

    const SIZE: usize = 64;

    fn texture() -> Raster {
        Raster::from_fn(SIZE, SIZE, |x, y| {
            let (x, y) = (x as f32, y as f32);
            0.5 + 0.25 * (0.31 * x).sin() * (0.23 * y).cos() + 0.15 * (0.17 * (x + y)).sin()
        })
    }

    fn calibration() -> Calibration {
        Calibration::identity()
            .focal(60.0)
            .principal_point(Point2::new(31.5, 31.5))
    }

    fn moved_pose() -> WorldToCamera {
        WorldToCamera(IsometryMatrix3::from_parts(
            Translation3::new(0.02, -0.01, 0.03),
            Rotation3::from_euler_angles(0.01, -0.02, 0.015),
        ))
    }

    /// A point in front of the identity camera with a reference patch sampled where it
    /// projects into `image`.
    fn reference(image: &Raster, pixel: Point2<f64>) -> (Point3<f64>, ZnccPatch) {
        let position = calibration().unproject(pixel, 2.0);
        (position, ZnccPatch::from_image(image, 2, [pixel.x, pixel.y]))
    }

    fn problem<'a>(
        images: [&'a Raster; 2],
        poses: [WorldToCamera; 2],
        points: &'a [(Point3<f64>, ZnccPatch)],
        loss: RobustLoss,
    ) -> PhotometricProblem<'a> {
        let frames = vec![
            ProblemFrame {
                id: 0,
                image: images[0],
                pose: poses[0],
                fixed: true,
            },
            ProblemFrame {
                id: 1,
                image: images[1],
                pose: poses[1],
                fixed: false,
            },
        ];
        let problem_points = points
            .iter()
            .map(|(position, patch)| ProblemPoint {
                position: *position,
                patch,
            })
            .collect();
        let observations = (0..points.len())
            .flat_map(|point| (0..2).map(move |frame| ProblemObservation { point, frame }));
        PhotometricProblem::new(
            calibration(),
            ImageSize::new(SIZE, SIZE),
            2,
            loss,
            0.05,
            frames,
            problem_points,
            observations,
        )
    }

    #[test]
    fn layout() {
        let image = texture();
        let points = vec![
            reference(&image, Point2::new(20.0, 24.0)),
            reference(&image, Point2::new(40.0, 30.0)),
        ];
        let poses = [WorldToCamera::identity(); 2];
        let problem = problem([&image, &image], poses, &points, RobustLoss::Trivial);
        assert_eq!(problem.num_parameters(), 6 + 2 * 3);
        assert_eq!(problem.num_residuals(), 4 * 25);
        assert_eq!(problem.params().len(), problem.num_parameters());
        assert_eq!(problem.jacobian().unwrap().shape(), (100, 12));
    }

    #[test]
    fn consistent_scene_has_no_residual() {
        let image = texture();
        let points = vec![
            reference(&image, Point2::new(20.0, 24.0)),
            reference(&image, Point2::new(40.0, 30.0)),
        ];
        let poses = [WorldToCamera::identity(); 2];
        let problem = problem([&image, &image], poses, &points, RobustLoss::Huber);
        assert!(problem.cost() < 1e-12);
    }

    #[test]
    fn out_of_view_observations_pay_the_reference() {
        let image = texture();
        let points = vec![reference(&image, Point2::new(20.0, 24.0))];
        // The second camera looks the other way.
        let behind = WorldToCamera(IsometryMatrix3::from_parts(
            Translation3::identity(),
            Rotation3::from_euler_angles(0.0, std::f64::consts::PI, 0.0),
        ));
        let problem = problem(
            [&image, &image],
            [WorldToCamera::identity(), behind],
            &points,
            RobustLoss::Trivial,
        );
        let residuals = problem.residuals().unwrap();
        let jacobian = problem.jacobian().unwrap();
        assert_eq!(problem.observations_in_view(), 1);
        let reference = points[0].1.data();
        for (residual, reference) in residuals.rows(25, 25).iter().zip(reference) {
            assert_relative_eq!(*residual, -reference);
        }
        assert!(jacobian.rows(25, 25).iter().all(|&j| j == 0.0));
    }

    #[test]
    fn leaving_the_image_is_not_free() {
        let image = texture();
        let points = vec![reference(&image, Point2::new(30.0, 30.0))];
        let poses = [WorldToCamera::identity(); 2];
        let mut problem = problem([&image, &image], poses, &points, RobustLoss::Huber);
        assert_eq!(problem.observations_in_view(), 2);
        let aligned = problem.cost();
        assert!(aligned < 1e-12);

        // Push the point far to the side of both cameras.
        let mut params = problem.params();
        params[6] += 10.0;
        problem.set_params(&params);
        assert_eq!(problem.observations_in_view(), 0);
        assert!(problem.cost() > aligned);
        assert!(problem.cost() > 0.0);
        assert!(problem.jacobian().unwrap().iter().all(|&j| j == 0.0));
    }

    #[test]
    fn fixed_frames_have_no_pose_columns() {
        let image = texture();
        let points = vec![reference(&image, Point2::new(30.0, 30.0))];
        let poses = [WorldToCamera::identity(), moved_pose()];
        let problem = problem([&image, &image], poses, &points, RobustLoss::Trivial);
        // Frame 0 rows only have point derivatives.
        let jacobian = problem.jacobian().unwrap();
        assert!(jacobian.slice((0, 0), (25, 6)).iter().all(|&j| j == 0.0));
    }

    #[test]
    fn jacobian_matches_finite_differences() {
        // Low frequencies keep the central difference gradient close to the slope of the
        // bilinear interpolant.
        let image = Raster::from_fn(SIZE, SIZE, |x, y| {
            let (x, y) = (x as f32, y as f32);
            0.5 + 0.3 * (0.09 * x).sin() * (0.07 * y).cos() + 0.1 * (0.05 * (x - y)).sin()
        });
        let points = vec![
            reference(&image, Point2::new(26.3, 29.1)),
            reference(&image, Point2::new(35.7, 33.2)),
        ];
        let poses = [WorldToCamera::identity(), moved_pose()];
        let mut problem = problem([&image, &image], poses, &points, RobustLoss::Trivial);
        // Start away from zero so the left Jacobian is exercised.
        let mut params = problem.params();
        params[3] += 0.01;
        params[5] -= 0.02;
        problem.set_params(&params);

        let analytic = problem.jacobian().unwrap();
        let eps = 1e-6;
        for column in 0..problem.num_parameters() {
            let mut forward = params.clone();
            forward[column] += eps;
            let mut backward = params.clone();
            backward[column] -= eps;
            problem.set_params(&forward);
            let plus = problem.residuals().unwrap();
            problem.set_params(&backward);
            let minus = problem.residuals().unwrap();
            let numeric = (plus - minus) / (2.0 * eps);
            let analytic = analytic.column(column).into_owned();
            let cosine = analytic.dot(&numeric) / (analytic.norm() * numeric.norm());
            assert!(cosine > 0.98, "column {} has cosine {}", column, cosine);
            assert_relative_eq!(analytic.norm(), numeric.norm(), max_relative = 0.15);
        }
    }

    #[test]
    fn robust_loss_reduces_cost() {
        let image = texture();
        let shifted = Raster::from_fn(SIZE, SIZE, |x, y| image.get((x + 7) % SIZE, y));
        let points = vec![reference(&image, Point2::new(30.0, 30.0))];
        let poses = [WorldToCamera::identity(); 2];
        let trivial = problem([&image, &shifted], poses, &points, RobustLoss::Trivial);
        let huber = problem([&image, &shifted], poses, &points, RobustLoss::Huber);
        assert!(trivial.cost() > 0.0);
        assert!(huber.cost() < trivial.cost());
    }

    #[test]
    fn poses_follow_parameters() {
        let image = texture();
        let points = vec![reference(&image, Point2::new(30.0, 30.0))];
        let poses = [WorldToCamera::identity(); 2];
        let mut problem = problem([&image, &image], poses, &points, RobustLoss::Trivial);
        let mut params = problem.params();
        params[0] = 0.5;
        params[6] = 1.0;
        problem.set_params(&params);
        let poses: Vec<_> = problem.poses().collect();
        assert_eq!(poses[0], (0, WorldToCamera::identity()));
        assert_relative_eq!(poses[1].1.isometry().translation.vector.x, 0.5);
        assert_relative_eq!(problem.positions()[0].x, 1.0);
    }
}
