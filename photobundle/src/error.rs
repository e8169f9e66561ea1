use thiserror::Error;

/// Errors returned for malformed input or unusable options.
///
/// Correlation failures, misses and solver non-convergence are part of the normal
/// operation of the engine and are reported in the [`AdjustmentResult`](crate::AdjustmentResult)
/// instead.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("image is {actual:?} (width, height) but {expected:?} is required")]
    ImageSizeMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },
    #[error("depth map is {actual:?} (width, height) but {expected:?} is required")]
    DepthSizeMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },
    #[error("pose is not a rigid transform: {reason}")]
    NonRigidPose { reason: &'static str },
    #[error("every frame id has been assigned")]
    FrameIdsExhausted,
    #[error("invalid scene point: {reason}")]
    InvalidScenePoint { reason: &'static str },
    #[error("invalid option {field}: {reason}")]
    InvalidOptions {
        field: &'static str,
        reason: &'static str,
    },
}
