use crate::{FrameId, PointKey, ScenePoint, SolverReport, WorldToCamera};
use nalgebra::Point3;

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// The state of a scene point at the end of a call.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct PointSnapshot {
    pub key: PointKey,
    pub position: Point3<f64>,
    pub original_position: Point3<f64>,
    pub visibility: Vec<FrameId>,
    pub refined: bool,
    pub saliency: f64,
}

impl PointSnapshot {
    pub fn new(key: PointKey, point: &ScenePoint) -> Self {
        Self {
            key,
            position: point.position(),
            original_position: point.original_position(),
            visibility: point.visibility_list().to_vec(),
            refined: point.was_refined(),
            saliency: point.saliency(),
        }
    }
}

/// Everything one ingested frame changed.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct AdjustmentResult {
    /// The id given to the ingested frame
    pub frame_id: FrameId,
    /// The pose of every frame in the window after refinement, oldest first
    pub poses: Vec<(FrameId, WorldToCamera)>,
    /// Every live point
    pub points: Vec<PointSnapshot>,
    /// Points removed because their reference frame left the window, in their final state
    pub marginalized: Vec<PointSnapshot>,
    /// Frames that left the window
    pub evicted_frames: Vec<FrameId>,
    /// Points that correlated with the new frame
    pub tracked: usize,
    /// Points that failed to correlate with the new frame
    pub missed: usize,
    /// Points created from the new frame
    pub spawned: usize,
    /// Points dropped for missing too often or losing saliency
    pub dropped: usize,
    /// Present if a refinement pass ran
    pub solver: Option<SolverReport>,
}

impl AdjustmentResult {
    pub fn pose(&self, frame: FrameId) -> Option<WorldToCamera> {
        self.poses
            .iter()
            .find(|&&(id, _)| id == frame)
            .map(|&(_, pose)| pose)
    }

    pub fn point(&self, key: PointKey) -> Option<&PointSnapshot> {
        self.points.iter().find(|point| point.key == key)
    }

    /// Whether refinement ran and its values were written back.
    pub fn refined(&self) -> bool {
        self.solver
            .as_ref()
            .map_or(false, |report| report.is_usable())
    }
}
