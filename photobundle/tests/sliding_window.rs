mod common;

use common::*;
use log::*;
use nalgebra::{Matrix4, Vector3};
use photobundle::{Error, Options, PhotometricBundleAdjustment, PointKey};
use photometric_patch::Raster;
use std::collections::HashSet;

fn options() -> Options {
    Options::default()
        .window_size(5)
        .max_refinement_points(12)
        .max_iterations(20)
        .point_limits(200, 40)
}

fn engine(options: Options) -> PhotometricBundleAdjustment {
    PhotometricBundleAdjustment::new(calibration(), image_size(), options).unwrap()
}

#[test]
fn window_holds_the_most_recent_frames() {
    init();
    let mut adjustment = engine(options());
    for frame in 0..9u32 {
        let pose = pose(
            Vector3::new(0.01 * frame as f64, -0.005 * frame as f64, 0.0),
            Vector3::new(0.0, 0.002 * frame as f64, 0.0),
        );
        let (image, depth) = render(pose);
        let result = adjustment.add_frame_with_pose(image, depth, pose).unwrap();
        assert_eq!(result.frame_id, frame);

        let window: Vec<u32> = result.poses.iter().map(|&(id, _)| id).collect();
        let expected: Vec<u32> = (frame.saturating_sub(4)..=frame).collect();
        assert_eq!(window, expected);
        assert_eq!(adjustment.map().frame_ids().collect::<Vec<_>>(), expected);
        if frame >= 5 {
            assert_eq!(result.evicted_frames, vec![frame - 5]);
        } else {
            assert!(result.evicted_frames.is_empty());
        }

        for point in &result.points {
            assert!(!point.visibility.is_empty());
            assert!(point.visibility.windows(2).all(|w| w[0] < w[1]));
            assert!(point.visibility.iter().all(|id| expected.contains(id)));
        }
        for point in &result.marginalized {
            assert!(!expected.contains(&point.visibility[0]));
        }
        info!(
            "frame {} has {} points, solver {:?}",
            frame,
            result.points.len(),
            result.solver
        );
    }
}

#[test]
fn static_scene_tracks_every_point() {
    init();
    let mut adjustment = engine(options().refinement_thresholds(100, 100));
    let pose = pose(Vector3::zeros(), Vector3::zeros());
    let (image, depth) = render(pose);
    let first = adjustment
        .add_frame_with_pose(image.clone(), depth.clone(), pose)
        .unwrap();
    assert!(first.spawned > 0);
    assert_eq!(first.tracked, 0);

    let second = adjustment.add_frame_with_pose(image, depth, pose).unwrap();
    assert_eq!(second.tracked, first.points.len());
    assert_eq!(second.missed, 0);
    for point in &first.points {
        let snapshot = second.point(point.key).unwrap();
        assert_eq!(snapshot.visibility, vec![0, 1]);
        assert_eq!(snapshot.position, point.position);
    }
}

#[test]
fn points_out_of_view_miss_and_drop() {
    init();
    let mut adjustment = engine(
        options()
            .max_consecutive_misses(1)
            .refinement_thresholds(100, 100),
    );
    let home = pose(Vector3::zeros(), Vector3::zeros());
    // Far enough along x that nothing seen from home reprojects into the image.
    let away = pose(Vector3::new(-3.0, 0.0, 0.0), Vector3::zeros());

    let (image, depth) = render(home);
    let first = adjustment.add_frame_with_pose(image, depth, home).unwrap();
    let keys: HashSet<PointKey> = first.points.iter().map(|point| point.key).collect();
    assert!(!keys.is_empty());

    let (image, depth) = render(away);
    let missed = adjustment.add_frame_with_pose(image, depth, away).unwrap();
    assert_eq!(missed.missed, keys.len());
    assert_eq!(missed.dropped, 0);
    for key in &keys {
        // The miss is not recorded as an observation.
        assert_eq!(missed.point(*key).unwrap().visibility, vec![0]);
        assert_eq!(
            adjustment.map().point(*key).unwrap().consecutive_misses(),
            1
        );
    }

    let (image, depth) = render(away);
    let dropped = adjustment.add_frame_with_pose(image, depth, away).unwrap();
    assert!(dropped.dropped >= keys.len());
    for key in &keys {
        assert!(dropped.point(*key).is_none());
        assert!(adjustment.map().point(*key).is_none());
    }

    let (image, depth) = render(home);
    let back = adjustment.add_frame_with_pose(image, depth, home).unwrap();
    for key in &keys {
        assert!(back.point(*key).is_none());
    }
}

#[test]
fn a_single_miss_is_tolerated() {
    init();
    let mut adjustment = engine(
        options()
            .max_consecutive_misses(1)
            .refinement_thresholds(100, 100),
    );
    let home = pose(Vector3::zeros(), Vector3::zeros());
    let away = pose(Vector3::new(-3.0, 0.0, 0.0), Vector3::zeros());

    let (image, depth) = render(home);
    let first = adjustment.add_frame_with_pose(image, depth, home).unwrap();
    let (image, depth) = render(away);
    adjustment.add_frame_with_pose(image, depth, away).unwrap();
    let (image, depth) = render(home);
    let back = adjustment.add_frame_with_pose(image, depth, home).unwrap();

    for point in &first.points {
        let snapshot = back.point(point.key).unwrap();
        assert_eq!(snapshot.visibility, vec![0, 2]);
        assert_eq!(
            adjustment.map().point(point.key).unwrap().consecutive_misses(),
            0
        );
    }
}

#[test]
fn malformed_input_leaves_the_map_untouched() {
    init();
    let mut adjustment = engine(options());
    let home = pose(Vector3::zeros(), Vector3::zeros());
    let (image, depth) = render(home);
    let first = adjustment
        .add_frame_with_pose(image.clone(), depth.clone(), home)
        .unwrap();
    let points = adjustment.map().num_points();

    let small = Raster::new(WIDTH - 1, HEIGHT);
    assert!(matches!(
        adjustment.add_frame_with_pose(small.clone(), depth.clone(), home),
        Err(Error::ImageSizeMismatch { .. })
    ));
    assert!(matches!(
        adjustment.add_frame_with_pose(image.clone(), small, home),
        Err(Error::DepthSizeMismatch { .. })
    ));
    let mut sheared = Matrix4::identity();
    sheared[(0, 1)] = 0.3;
    assert!(matches!(
        adjustment.add_frame(image.clone(), depth.clone(), &sheared),
        Err(Error::NonRigidPose { .. })
    ));

    assert_eq!(adjustment.map().num_frames(), 1);
    assert_eq!(adjustment.map().num_points(), points);
    for point in &first.points {
        assert_eq!(
            adjustment.map().point(point.key).unwrap().visibility_list(),
            &[0]
        );
    }
    // Failed calls do not consume frame ids.
    let next = adjustment
        .add_frame(image, depth, &home.homogeneous())
        .unwrap();
    assert_eq!(next.frame_id, 1);
}

#[test]
fn invalid_options_are_rejected() {
    assert!(matches!(
        PhotometricBundleAdjustment::new(calibration(), image_size(), options().window_size(0)),
        Err(Error::InvalidOptions {
            field: "window_size",
            ..
        })
    ));
}

#[test]
fn spawning_respects_the_point_cap() {
    init();
    let mut adjustment = engine(options().point_limits(10, 8).refinement_thresholds(100, 100));
    for frame in 0..4 {
        let pose = pose(Vector3::new(0.2 * frame as f64, 0.0, 0.0), Vector3::zeros());
        let (image, depth) = render(pose);
        let result = adjustment.add_frame_with_pose(image, depth, pose).unwrap();
        assert!(result.spawned <= 8);
        assert!(result.points.len() <= 10);
    }
}
