//! Integration tests for the scan path planner
//!
//! These tests check the structural guarantees of planned paths over a range of
//! geometries rather than individual coordinates.

use nearfield_scan::experiment::planner::{plan, Point3, ScanArea, ScanGeometry};

fn geometry(area: ScanArea, offset: Point3, radius: f64, travel: (f64, f64)) -> ScanGeometry {
    ScanGeometry {
        pass_height: 5.0,
        offset,
        area,
        measurement_radius: radius,
        travel_limits: travel,
    }
}

fn sample_geometries() -> Vec<ScanGeometry> {
    vec![
        geometry(ScanArea::new(30.0, 30.0, 6.0, 6.0), Point3::new(1.0, 56.0, 0.0), 3.0, (220.0, 220.0)),
        geometry(ScanArea::new(0.0, 0.0, 50.0, 20.0), Point3::new(0.0, 0.0, 0.0), 2.5, (220.0, 220.0)),
        // Actuator runs off the far Y edge for the upper rows
        geometry(ScanArea::new(10.0, 150.0, 40.0, 40.0), Point3::new(5.0, 50.0, 2.0), 4.0, (220.0, 220.0)),
        // Negative offset pushes the first columns below zero
        geometry(ScanArea::new(2.0, 2.0, 30.0, 30.0), Point3::new(-10.0, -10.0, 0.0), 3.0, (100.0, 100.0)),
        geometry(ScanArea::new(0.0, 0.0, 1.0, 1.0), Point3::new(0.0, 0.0, 0.0), 0.3, (0.8, 0.8)),
    ]
}

// =============================================================================
// Path structure
// =============================================================================

#[test]
fn test_probe_and_actuator_lists_stay_aligned() {
    for geometry in sample_geometries() {
        let path = plan(&geometry).unwrap();
        let probe = path.probe_path();
        let actuator = path.actuator_path();
        assert_eq!(probe.len(), actuator.len());
        assert_eq!(probe.len(), path.point_count());

        for (p, a) in probe.iter().zip(&actuator) {
            assert!((a.x - (p.x + geometry.offset.x)).abs() < 1e-9);
            assert!((a.y - (p.y + geometry.offset.y)).abs() < 1e-9);
            assert_eq!(a.z, p.z);
        }
    }
}

#[test]
fn test_every_point_within_travel() {
    for geometry in sample_geometries() {
        let (limit_x, limit_y) = geometry.travel_limits;
        let path = plan(&geometry).unwrap();
        for point in path.points() {
            for position in [point.probe_position, point.actuator_position] {
                assert!((0.0..=limit_x).contains(&position.x), "{:?}", position);
                assert!((0.0..=limit_y).contains(&position.y), "{:?}", position);
            }
        }
    }
}

#[test]
fn test_serpentine_alternates_direction() {
    let geometry = geometry(
        ScanArea::new(0.0, 0.0, 20.0, 20.0),
        Point3::new(0.0, 0.0, 0.0),
        4.0,
        (220.0, 220.0),
    );
    let path = plan(&geometry).unwrap();

    let mut columns: Vec<Vec<f64>> = Vec::new();
    let mut last_x = None;
    for p in path.probe_path() {
        if last_x != Some(p.x) {
            columns.push(Vec::new());
            last_x = Some(p.x);
        }
        if let Some(column) = columns.last_mut() {
            column.push(p.y);
        }
    }

    assert!(columns.len() > 2);
    for (i, column) in columns.iter().enumerate() {
        let ascending = column.windows(2).all(|w| w[0] < w[1]);
        let descending = column.windows(2).all(|w| w[0] > w[1]);
        if i % 2 == 0 {
            assert!(ascending, "column {} should ascend: {:?}", i, column);
        } else {
            assert!(descending, "column {} should descend: {:?}", i, column);
        }
    }
}

#[test]
fn test_bounding_box_is_closed() {
    let path = plan(&sample_geometries()[1]).unwrap();
    let outline = path.probe_bounding_box().unwrap();
    assert_eq!(outline[0], outline[4]);
    for point in path.probe_path() {
        assert!(point.x >= outline[0].0 && point.x <= outline[2].0);
        assert!(point.y >= outline[0].1 && point.y <= outline[2].1);
    }
}
