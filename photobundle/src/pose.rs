use crate::Error;
use derive_more::{AsMut, AsRef, From, Into};
use nalgebra::{
    IsometryMatrix3, Matrix3, Matrix4, Point3, Rotation3, Translation3, Vector3, Vector6,
};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// Tolerance used when checking that a matrix is a rigid transform.
const RIGID_TOLERANCE: f64 = 1e-6;

/// This contains a world pose, which is a pose of the world relative to the camera.
/// This maps world points into camera coordinates, changing an absolute position into
/// a vector relative to the camera.
#[derive(Debug, Clone, Copy, PartialEq, AsMut, AsRef, From, Into)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct WorldToCamera(pub IsometryMatrix3<f64>);

impl WorldToCamera {
    pub fn identity() -> Self {
        Self(IsometryMatrix3::identity())
    }

    /// Creates the pose from a homogeneous matrix, checking that it is a rigid transform.
    ///
    /// The rotation block must be orthonormal with a determinant of `+1`, the last row must be
    /// `[0, 0, 0, 1]`, and every entry must be finite.
    pub fn from_matrix(matrix: &Matrix4<f64>) -> Result<Self, Error> {
        if matrix.iter().any(|n| !n.is_finite()) {
            return Err(Error::NonRigidPose {
                reason: "matrix contains non-finite entries",
            });
        }
        let last_row = matrix.fixed_slice::<1, 4>(3, 0);
        if (last_row[0].abs() + last_row[1].abs() + last_row[2].abs()) > RIGID_TOLERANCE
            || (last_row[3] - 1.0).abs() > RIGID_TOLERANCE
        {
            return Err(Error::NonRigidPose {
                reason: "last row is not [0, 0, 0, 1]",
            });
        }
        let rotation: Matrix3<f64> = matrix.fixed_slice::<3, 3>(0, 0).into_owned();
        let orthogonality = rotation.transpose() * rotation - Matrix3::identity();
        if orthogonality.amax() > RIGID_TOLERANCE {
            return Err(Error::NonRigidPose {
                reason: "rotation block is not orthonormal",
            });
        }
        if (rotation.determinant() - 1.0).abs() > RIGID_TOLERANCE {
            return Err(Error::NonRigidPose {
                reason: "rotation block is a reflection",
            });
        }
        let translation = Translation3::from(matrix.fixed_slice::<3, 1>(0, 3).into_owned());
        Ok(Self(IsometryMatrix3::from_parts(
            translation,
            Rotation3::from_matrix_unchecked(rotation),
        )))
    }

    pub fn isometry(self) -> IsometryMatrix3<f64> {
        self.0
    }

    /// Retrieve the homogeneous matrix.
    pub fn homogeneous(self) -> Matrix4<f64> {
        self.0.to_homogeneous()
    }

    /// The pose of the camera in the world.
    pub fn camera_to_world(self) -> IsometryMatrix3<f64> {
        self.0.inverse()
    }

    /// Transforms a world point into camera coordinates.
    pub fn transform(self, point: &Point3<f64>) -> Point3<f64> {
        self.0 * point
    }

    /// Applies a left perturbation `Exp(delta) * self`.
    ///
    /// `delta` holds the translation before the scaled-axis rotation.
    #[must_use]
    pub fn perturbed(self, delta: &Vector6<f64>) -> Self {
        let rotation = Rotation3::from_scaled_axis(delta.fixed_rows::<3>(3).into_owned());
        let translation = Translation3::from(delta.fixed_rows::<3>(0).into_owned());
        Self(IsometryMatrix3::from_parts(translation, rotation) * self.0)
    }
}

/// The skew symmetric matrix such that `skew(v) * w == v.cross(&w)`.
pub(crate) fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    v.cross_matrix()
}

/// The left Jacobian of SO(3) at the scaled-axis rotation `omega`.
///
/// For a rotated point `y' = Exp(omega) y` the derivative in respect to `omega` is
/// `-skew(y') * left_jacobian(omega)`.
pub(crate) fn left_jacobian(omega: &Vector3<f64>) -> Matrix3<f64> {
    let theta2 = omega.norm_squared();
    let w = skew(omega);
    let w2 = w * w;
    if theta2 < 1e-10 {
        return Matrix3::identity() + w * 0.5 + w2 * (1.0 / 6.0);
    }
    let theta = theta2.sqrt();
    Matrix3::identity()
        + w * ((1.0 - theta.cos()) / theta2)
        + w2 * ((theta - theta.sin()) / (theta2 * theta))
}
