use crate::{Error, RobustLoss};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// The settings for the photometric bundle adjustment process.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Options {
    /// The number of most recent frames kept in the sliding window
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_window_size"))]
    pub window_size: usize,
    /// The radius of the square correlation patch
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_patch_radius"))]
    pub patch_radius: usize,
    /// The minimum ZNCC score for an observation to be accepted
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_min_score"))]
    pub min_score: f64,
    /// The number of consecutive misses a point tolerates before it is dropped
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_max_consecutive_misses")
    )]
    pub max_consecutive_misses: usize,
    /// The robust loss applied to each observation during refinement
    #[cfg_attr(feature = "serde-serialize", serde(default))]
    pub robust_loss: RobustLoss,
    /// The RMS intensity error at which the robust loss starts bounding an observation
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_robust_loss_scale")
    )]
    pub robust_loss_scale: f64,
    /// The iteration budget handed to the solver
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_max_iterations"))]
    pub max_iterations: usize,
    /// The minimum number of frames in the window before refinement runs
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_min_frames_for_refinement")
    )]
    pub min_frames_for_refinement: usize,
    /// The minimum number of eligible points before refinement runs
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_min_points_for_refinement")
    )]
    pub min_points_for_refinement: usize,
    /// The minimum number of observations a point needs to take part in refinement
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_min_observations")
    )]
    pub min_observations: usize,
    /// The maximum number of points (highest saliency first) put into one refinement problem
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_max_refinement_points")
    )]
    pub max_refinement_points: usize,
    /// Depths below this are treated as invalid
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_min_valid_depth"))]
    pub min_valid_depth: f64,
    /// Depths above this are treated as invalid
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_max_valid_depth"))]
    pub max_valid_depth: f64,
    /// The minimum gradient magnitude of a pixel for it to spawn a point
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_min_saliency"))]
    pub min_saliency: f64,
    /// Tracked points whose saliency falls below this are dropped (0 disables the check)
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_min_retention_saliency")
    )]
    pub min_retention_saliency: f64,
    /// The radius of the non-maximum suppression applied to spawn candidates
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_non_max_suppression_radius")
    )]
    pub non_max_suppression_radius: usize,
    /// The radius around each tracked point in which no new point is spawned
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_mask_radius"))]
    pub mask_radius: usize,
    /// The maximum number of live points in the map
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_max_num_points"))]
    pub max_num_points: usize,
    /// The maximum number of points spawned from a single frame
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_max_points_per_frame")
    )]
    pub max_points_per_frame: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            patch_radius: default_patch_radius(),
            min_score: default_min_score(),
            max_consecutive_misses: default_max_consecutive_misses(),
            robust_loss: RobustLoss::default(),
            robust_loss_scale: default_robust_loss_scale(),
            max_iterations: default_max_iterations(),
            min_frames_for_refinement: default_min_frames_for_refinement(),
            min_points_for_refinement: default_min_points_for_refinement(),
            min_observations: default_min_observations(),
            max_refinement_points: default_max_refinement_points(),
            min_valid_depth: default_min_valid_depth(),
            max_valid_depth: default_max_valid_depth(),
            min_saliency: default_min_saliency(),
            min_retention_saliency: default_min_retention_saliency(),
            non_max_suppression_radius: default_non_max_suppression_radius(),
            mask_radius: default_mask_radius(),
            max_num_points: default_max_num_points(),
            max_points_per_frame: default_max_points_per_frame(),
        }
    }
}

impl Options {
    /// Set the sliding window size.
    pub fn window_size(self, window_size: usize) -> Self {
        Self {
            window_size,
            ..self
        }
    }

    /// Set the patch radius.
    pub fn patch_radius(self, patch_radius: usize) -> Self {
        Self {
            patch_radius,
            ..self
        }
    }

    /// Set the minimum ZNCC score that confirms an observation.
    pub fn min_score(self, min_score: f64) -> Self {
        Self { min_score, ..self }
    }

    /// Set how many consecutive misses a point survives.
    pub fn max_consecutive_misses(self, max_consecutive_misses: usize) -> Self {
        Self {
            max_consecutive_misses,
            ..self
        }
    }

    /// Set the robust loss and its scale.
    pub fn robust_loss(self, robust_loss: RobustLoss, robust_loss_scale: f64) -> Self {
        Self {
            robust_loss,
            robust_loss_scale,
            ..self
        }
    }

    /// Set the iteration budget of the solver.
    pub fn max_iterations(self, max_iterations: usize) -> Self {
        Self {
            max_iterations,
            ..self
        }
    }

    /// Set the number of frames and eligible points needed before refinement runs.
    pub fn refinement_thresholds(self, min_frames: usize, min_points: usize) -> Self {
        Self {
            min_frames_for_refinement: min_frames,
            min_points_for_refinement: min_points,
            ..self
        }
    }

    /// Set the minimum observations a point needs to be refined.
    pub fn min_observations(self, min_observations: usize) -> Self {
        Self {
            min_observations,
            ..self
        }
    }

    /// Set how many points at most go into one refinement problem.
    pub fn max_refinement_points(self, max_refinement_points: usize) -> Self {
        Self {
            max_refinement_points,
            ..self
        }
    }

    /// Set the range of depths considered valid.
    pub fn valid_depth(self, min_valid_depth: f64, max_valid_depth: f64) -> Self {
        Self {
            min_valid_depth,
            max_valid_depth,
            ..self
        }
    }

    /// Set the minimum gradient magnitude needed to spawn a point.
    pub fn min_saliency(self, min_saliency: f64) -> Self {
        Self {
            min_saliency,
            ..self
        }
    }

    /// Set the saliency below which tracked points are dropped.
    pub fn min_retention_saliency(self, min_retention_saliency: f64) -> Self {
        Self {
            min_retention_saliency,
            ..self
        }
    }

    /// Set the suppression radius for spawn candidates and the radius masked around
    /// tracked points.
    pub fn spawn_radii(self, non_max_suppression_radius: usize, mask_radius: usize) -> Self {
        Self {
            non_max_suppression_radius,
            mask_radius,
            ..self
        }
    }

    /// Set the caps on live points and on points spawned per frame.
    pub fn point_limits(self, max_num_points: usize, max_points_per_frame: usize) -> Self {
        Self {
            max_num_points,
            max_points_per_frame,
            ..self
        }
    }

    /// Checks that the options can drive the engine.
    pub fn validate(&self) -> Result<(), Error> {
        let invalid = |field, reason| Err(Error::InvalidOptions { field, reason });
        if self.window_size == 0 {
            return invalid("window_size", "must be at least 1");
        }
        if self.patch_radius == 0 {
            return invalid("patch_radius", "must be at least 1");
        }
        if !(-1.0..=1.0).contains(&self.min_score) {
            return invalid("min_score", "must be within [-1, 1]");
        }
        if !(self.robust_loss_scale.is_finite() && self.robust_loss_scale > 0.0) {
            return invalid("robust_loss_scale", "must be finite and positive");
        }
        if self.max_iterations == 0 {
            return invalid("max_iterations", "must be at least 1");
        }
        if self.min_observations == 0 {
            return invalid("min_observations", "must be at least 1");
        }
        if self.max_refinement_points == 0 {
            return invalid("max_refinement_points", "must be at least 1");
        }
        if !(self.min_valid_depth.is_finite() && self.min_valid_depth > 0.0) {
            return invalid("min_valid_depth", "must be finite and positive");
        }
        if !(self.max_valid_depth > self.min_valid_depth) {
            return invalid("max_valid_depth", "must be greater than min_valid_depth");
        }
        if !self.min_saliency.is_finite() || !self.min_retention_saliency.is_finite() {
            return invalid("min_saliency", "saliency thresholds must be finite");
        }
        Ok(())
    }
}

fn default_window_size() -> usize {
    5
}

fn default_patch_radius() -> usize {
    2
}

fn default_min_score() -> f64 {
    0.75
}

fn default_max_consecutive_misses() -> usize {
    1
}

fn default_robust_loss_scale() -> f64 {
    0.05
}

fn default_max_iterations() -> usize {
    50
}

fn default_min_frames_for_refinement() -> usize {
    3
}

fn default_min_points_for_refinement() -> usize {
    8
}

fn default_min_observations() -> usize {
    2
}

fn default_max_refinement_points() -> usize {
    64
}

fn default_min_valid_depth() -> f64 {
    0.01
}

fn default_max_valid_depth() -> f64 {
    20.0
}

fn default_min_saliency() -> f64 {
    0.02
}

fn default_min_retention_saliency() -> f64 {
    0.0
}

fn default_non_max_suppression_radius() -> usize {
    1
}

fn default_mask_radius() -> usize {
    2
}

fn default_max_num_points() -> usize {
    4096
}

fn default_max_points_per_frame() -> usize {
    1024
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(Options::default().validate().is_ok());
    }

    #[test]
    fn rejects_unusable_values() {
        let check = |options: Options, expected: &str| match options.validate() {
            Err(Error::InvalidOptions { field, .. }) => assert_eq!(field, expected),
            other => panic!("expected {} to be rejected, got {:?}", expected, other),
        };
        check(Options::default().window_size(0), "window_size");
        check(Options::default().patch_radius(0), "patch_radius");
        check(Options::default().min_score(1.5), "min_score");
        check(
            Options::default().robust_loss(RobustLoss::Huber, 0.0),
            "robust_loss_scale",
        );
        check(Options::default().max_iterations(0), "max_iterations");
        check(Options::default().valid_depth(1.0, 0.5), "max_valid_depth");
        check(Options::default().valid_depth(f64::NAN, 0.5), "min_valid_depth");
    }

    #[cfg(feature = "serde-serialize")]
    #[test]
    fn missing_fields_use_defaults() {
        let options: Options =
            serde_json::from_str(r#"{ "window_size": 7, "robust_loss": "Cauchy" }"#).unwrap();
        assert_eq!(options.window_size, 7);
        assert_eq!(options.robust_loss, RobustLoss::Cauchy);
        assert_eq!(options.patch_radius, default_patch_radius());
        assert_eq!(options.max_iterations, default_max_iterations());
    }
}
