#[cfg(feature = "serde-serialize")]
use crate::Error;
use nalgebra::{Point2, Point3};
use photometric_patch::ZnccPatch;

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// Identifies an ingested frame. Ids increase by one with every ingested frame.
pub type FrameId = u32;

/// A 3D location tracked over the frames of the sliding window.
///
/// The reference patch is sampled once in the reference frame (the first entry of the
/// visibility list) and every later observation is compared against it.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serde-serialize",
    derive(Serialize, Deserialize),
    serde(try_from = "ScenePointData")
)]
pub struct ScenePoint {
    position: Point3<f64>,
    original_position: Point3<f64>,
    visibility: Vec<FrameId>,
    patch: ZnccPatch,
    descriptor: Vec<f64>,
    saliency: f64,
    refined: bool,
    first_projection: Point2<i32>,
    misses: usize,
}

/// The serialized form of a [`ScenePoint`], checked before it becomes one.
#[cfg(feature = "serde-serialize")]
#[derive(Deserialize)]
struct ScenePointData {
    position: Point3<f64>,
    original_position: Point3<f64>,
    visibility: Vec<FrameId>,
    patch: ZnccPatch,
    descriptor: Vec<f64>,
    saliency: f64,
    refined: bool,
    first_projection: Point2<i32>,
    misses: usize,
}

#[cfg(feature = "serde-serialize")]
impl TryFrom<ScenePointData> for ScenePoint {
    type Error = Error;

    fn try_from(data: ScenePointData) -> Result<Self, Error> {
        if data.visibility.is_empty() {
            return Err(Error::InvalidScenePoint {
                reason: "visibility list is empty",
            });
        }
        if data.visibility.windows(2).any(|w| w[0] >= w[1]) {
            return Err(Error::InvalidScenePoint {
                reason: "visibility list is not strictly increasing",
            });
        }
        Ok(Self {
            position: data.position,
            original_position: data.original_position,
            visibility: data.visibility,
            patch: data.patch,
            descriptor: data.descriptor,
            saliency: data.saliency,
            refined: data.refined,
            first_projection: data.first_projection,
            misses: data.misses,
        })
    }
}

impl ScenePoint {
    pub fn new(
        position: Point3<f64>,
        reference_frame: FrameId,
        patch: ZnccPatch,
        first_projection: Point2<i32>,
    ) -> Self {
        Self {
            position,
            original_position: position,
            visibility: vec![reference_frame],
            patch,
            descriptor: vec![],
            saliency: 0.0,
            refined: false,
            first_projection,
            misses: 0,
        }
    }

    /// The current world position.
    pub fn position(&self) -> Point3<f64> {
        self.position
    }

    pub(crate) fn set_position(&mut self, position: Point3<f64>) {
        self.position = position;
    }

    /// The world position at creation. It is never changed.
    pub fn original_position(&self) -> Point3<f64> {
        self.original_position
    }

    pub fn has_frame(&self, frame: FrameId) -> bool {
        self.visibility.binary_search(&frame).is_ok()
    }

    /// Every frame the point was observed in, in increasing order.
    pub fn visibility_list(&self) -> &[FrameId] {
        &self.visibility
    }

    /// The frame the reference patch was sampled from.
    pub fn reference_frame(&self) -> FrameId {
        self.visibility[0]
    }

    /// The most recent frame the point was observed in.
    pub fn last_frame(&self) -> FrameId {
        self.visibility[self.visibility.len() - 1]
    }

    /// Records an observation in `frame`.
    ///
    /// Returns `false` and leaves the list untouched unless `frame` is newer than every
    /// recorded observation.
    pub fn add_frame(&mut self, frame: FrameId) -> bool {
        if frame <= self.last_frame() {
            return false;
        }
        self.visibility.push(frame);
        true
    }

    pub fn num_frames(&self) -> usize {
        self.visibility.len()
    }

    pub fn patch(&self) -> &ZnccPatch {
        &self.patch
    }

    pub fn descriptor(&self) -> &[f64] {
        &self.descriptor
    }

    pub fn descriptor_mut(&mut self) -> &mut Vec<f64> {
        &mut self.descriptor
    }

    pub fn saliency(&self) -> f64 {
        self.saliency
    }

    pub fn set_saliency(&mut self, saliency: f64) {
        self.saliency = saliency;
    }

    /// Whether the last refinement pass updated this point.
    pub fn was_refined(&self) -> bool {
        self.refined
    }

    pub(crate) fn set_refined(&mut self, refined: bool) {
        self.refined = refined;
    }

    /// The integer pixel in the reference frame the point was spawned from.
    pub fn first_projection(&self) -> Point2<i32> {
        self.first_projection
    }

    /// The number of frames in a row in which the point failed to correlate.
    pub fn consecutive_misses(&self) -> usize {
        self.misses
    }

    /// Counts a miss and returns the new count.
    pub(crate) fn record_miss(&mut self) -> usize {
        self.misses += 1;
        self.misses
    }

    pub(crate) fn record_hit(&mut self, frame: FrameId, saliency: f64) -> bool {
        if !self.add_frame(frame) {
            return false;
        }
        self.misses = 0;
        self.saliency = saliency;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point() -> ScenePoint {
        ScenePoint::new(
            Point3::new(0.0, 0.0, 2.0),
            3,
            ZnccPatch::new(2),
            Point2::new(10, 12),
        )
    }

    #[test]
    fn starts_in_reference_frame() {
        let point = point();
        assert_eq!(point.visibility_list(), &[3]);
        assert_eq!(point.reference_frame(), 3);
        assert_eq!(point.last_frame(), 3);
        assert_eq!(point.original_position(), point.position());
        assert!(!point.was_refined());
    }

    #[test]
    fn visibility_stays_strictly_increasing() {
        let mut point = point();
        assert!(point.add_frame(5));
        assert!(!point.add_frame(5));
        assert!(!point.add_frame(4));
        assert!(point.add_frame(6));
        assert_eq!(point.visibility_list(), &[3, 5, 6]);
        assert!(point.has_frame(5));
        assert!(!point.has_frame(4));
    }

    #[test]
    fn hit_resets_misses() {
        let mut point = point();
        assert_eq!(point.record_miss(), 1);
        assert_eq!(point.record_miss(), 2);
        assert!(point.record_hit(4, 0.3));
        assert_eq!(point.consecutive_misses(), 0);
        assert_eq!(point.saliency(), 0.3);
    }

    #[test]
    fn original_position_is_kept() {
        let mut point = point();
        point.set_position(Point3::new(1.0, 1.0, 1.0));
        assert_eq!(point.original_position(), Point3::new(0.0, 0.0, 2.0));
    }

    #[cfg(feature = "serde-serialize")]
    #[test]
    fn deserialization_checks_visibility() {
        let mut point = point();
        point.add_frame(4);
        let value = serde_json::to_value(&point).unwrap();
        let parsed: ScenePoint = serde_json::from_value(value.clone()).unwrap();
        assert_eq!(parsed, point);

        for visibility in [serde_json::json!([]), serde_json::json!([4, 3])] {
            let mut value = value.clone();
            value["visibility"] = visibility;
            assert!(serde_json::from_value::<ScenePoint>(value).is_err());
        }
    }
}
