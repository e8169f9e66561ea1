use crate::{FrameId, ScenePoint, WorldToCamera};
use log::*;
use nalgebra::{Point2, Point3};
use photometric_patch::{Raster, ZnccPatch};
use slotmap::{new_key_type, DenseSlotMap};
use std::collections::VecDeque;

new_key_type! {
    pub struct PointKey;
}

/// A posed image with its depth map.
#[derive(Debug, Clone)]
pub struct Frame {
    pub id: FrameId,
    /// Intensities in the unit range
    pub image: Raster,
    /// Depth along the optical axis, non-finite or out of range values are invalid
    pub depth: Raster,
    pub pose: WorldToCamera,
}

/// The live scene points together with the last `capacity` frames.
///
/// Frames are stored oldest first. Scene points refer to frames by id only. A point
/// whose reference frame has been evicted is pending marginalization until
/// [`ScenePointMap::marginalize_points`] removes it.
#[derive(Debug, Clone)]
pub struct ScenePointMap {
    capacity: usize,
    frames: VecDeque<Frame>,
    points: DenseSlotMap<PointKey, ScenePoint>,
}

impl ScenePointMap {
    /// Creates an empty map. A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            frames: VecDeque::with_capacity(capacity + 1),
            points: DenseSlotMap::with_key(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Inserts the newest frame and evicts the oldest frames beyond the capacity.
    ///
    /// Returns the ids of the evicted frames, oldest first.
    pub fn add_frame(&mut self, frame: Frame) -> Vec<FrameId> {
        debug_assert!(self.newest().map_or(true, |newest| newest.id < frame.id));
        self.frames.push_back(frame);
        let mut evicted = vec![];
        while self.frames.len() > self.capacity {
            if let Some(frame) = self.frames.pop_front() {
                trace!("evicting frame {} from the window", frame.id);
                evicted.push(frame.id);
            }
        }
        evicted
    }

    pub fn frame(&self, id: FrameId) -> Option<&Frame> {
        // Ids are increasing, so the frames are sorted.
        let ix = self.frames.binary_search_by_key(&id, |frame| frame.id).ok()?;
        self.frames.get(ix)
    }

    pub fn frame_mut(&mut self, id: FrameId) -> Option<&mut Frame> {
        let ix = self.frames.binary_search_by_key(&id, |frame| frame.id).ok()?;
        self.frames.get_mut(ix)
    }

    pub fn frames(&self) -> impl Iterator<Item = &Frame> + '_ {
        self.frames.iter()
    }

    pub fn frame_ids(&self) -> impl Iterator<Item = FrameId> + '_ {
        self.frames.iter().map(|frame| frame.id)
    }

    pub fn num_frames(&self) -> usize {
        self.frames.len()
    }

    pub fn oldest(&self) -> Option<&Frame> {
        self.frames.front()
    }

    pub fn newest(&self) -> Option<&Frame> {
        self.frames.back()
    }

    pub fn contains_frame(&self, id: FrameId) -> bool {
        self.frame(id).is_some()
    }

    pub fn points(&self) -> impl Iterator<Item = (PointKey, &ScenePoint)> + '_ {
        self.points.iter()
    }

    pub fn num_points(&self) -> usize {
        self.points.len()
    }

    pub fn point(&self, key: PointKey) -> Option<&ScenePoint> {
        self.points.get(key)
    }

    pub fn point_mut(&mut self, key: PointKey) -> Option<&mut ScenePoint> {
        self.points.get_mut(key)
    }

    pub(crate) fn points_mut(&mut self) -> impl Iterator<Item = (PointKey, &mut ScenePoint)> + '_ {
        self.points.iter_mut()
    }

    /// Every point with an observation in the given frame.
    pub fn points_visible_in(
        &self,
        frame: FrameId,
    ) -> impl Iterator<Item = (PointKey, &ScenePoint)> + '_ {
        self.points
            .iter()
            .filter(move |(_, point)| point.has_frame(frame))
    }

    /// Creates a point whose reference patch was sampled in `reference_frame`.
    ///
    /// Returns `None` if the reference frame is not in the window.
    pub fn spawn_point(
        &mut self,
        position: Point3<f64>,
        reference_frame: FrameId,
        patch: ZnccPatch,
        first_projection: Point2<i32>,
    ) -> Option<PointKey> {
        if !self.contains_frame(reference_frame) {
            return None;
        }
        Some(self.points.insert(ScenePoint::new(
            position,
            reference_frame,
            patch,
            first_projection,
        )))
    }

    pub fn drop_point(&mut self, key: PointKey) -> Option<ScenePoint> {
        self.points.remove(key)
    }

    /// Removes every point whose reference frame has left the window.
    ///
    /// Visibility lists are strictly increasing, so after this every remaining point only
    /// refers to frames inside the window.
    pub fn marginalize_points(&mut self) -> Vec<(PointKey, ScenePoint)> {
        let oldest = match self.oldest() {
            Some(frame) => frame.id,
            None => return self.points.drain().collect(),
        };
        let stale: Vec<PointKey> = self
            .points
            .iter()
            .filter(|(_, point)| point.reference_frame() < oldest)
            .map(|(key, _)| key)
            .collect();
        stale
            .into_iter()
            .filter_map(|key| self.points.remove(key).map(|point| (key, point)))
            .collect()
    }
}
