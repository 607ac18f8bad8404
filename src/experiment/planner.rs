//! Scan path planning.
//!
//! Turns a [`ScanGeometry`] into an ordered [`ScanPath`]: the list of positions the probe
//! must visit and, index-aligned with it, the positions the stage must be commanded to.
//!
//! # Pattern
//!
//! Sample coordinates are seeded at half the measurement radius and spaced by the radius
//! along each axis of the sample rectangle. Columns are visited in a serpentine
//! (boustrophedon) order so consecutive points are always neighbours:
//!
//! ```text
//!   y ^   ┌──┐  ┌──
//!     |   │  │  │
//!     |   │  │  │
//!     |   │  └──┘
//!     +-------------> x
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use nearfield_scan::experiment::planner::{plan, ScanArea, ScanGeometry, Point3};
//!
//! let geometry = ScanGeometry {
//!     pass_height: 5.0,
//!     offset: Point3::new(1.0, 56.0, 0.0),
//!     area: ScanArea::new(30.0, 30.0, 6.0, 6.0),
//!     measurement_radius: 3.0,
//!     travel_limits: (220.0, 220.0),
//! };
//!
//! let path = plan(&geometry)?;
//! assert_eq!(path.point_count(), 9);
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::error::{ScanError, ScanResult};

/// Seconds budgeted per sample point by the default scan-time heuristic.
pub const DEFAULT_SECONDS_PER_POINT: f64 = 4.0;

/// Fixed overhead (homing, boundary trace, return) of the default scan-time heuristic.
pub const DEFAULT_OVERHEAD_SECONDS: f64 = 60.0;

/// Upper bound on the raw sample grid (before the travel filter) accepted by the planner.
pub const MAX_SAMPLE_POINTS: usize = 1_000_000;

/// A position in stage coordinates (mm).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point3 {
    /// X (mm)
    pub x: f64,
    /// Y (mm)
    pub y: f64,
    /// Z (mm)
    pub z: f64,
}

impl Point3 {
    /// Point at `(x, y, z)`.
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    fn within(&self, limits: (f64, f64)) -> bool {
        (0.0..=limits.0).contains(&self.x) && (0.0..=limits.1).contains(&self.y)
    }
}

/// Rectangular sample area (mm).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScanArea {
    /// Origin X of the rectangle
    pub origin_x: f64,
    /// Origin Y of the rectangle
    pub origin_y: f64,
    /// Extent along X
    pub width: f64,
    /// Extent along Y
    pub height: f64,
}

impl ScanArea {
    /// Rectangle with origin `(origin_x, origin_y)` and size `width` x `height`.
    pub fn new(origin_x: f64, origin_y: f64, width: f64, height: f64) -> Self {
        Self {
            origin_x,
            origin_y,
            width,
            height,
        }
    }
}

/// Everything the planner needs to lay out a scan.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScanGeometry {
    /// Height at which the probe passes over the sample (mm)
    pub pass_height: f64,
    /// Displacement from the sensing element to the driven reference point (mm)
    pub offset: Point3,
    /// Area to be sampled
    pub area: ScanArea,
    /// Half-spacing seed and point-to-point spacing (mm)
    pub measurement_radius: f64,
    /// Stage travel in X and Y (mm)
    pub travel_limits: (f64, f64),
}

impl ScanGeometry {
    /// Reject geometries that cannot produce a sensible pattern.
    pub fn validate(&self) -> ScanResult<()> {
        let values = [
            ("pass_height", self.pass_height),
            ("offset.x", self.offset.x),
            ("offset.y", self.offset.y),
            ("offset.z", self.offset.z),
            ("area.origin_x", self.area.origin_x),
            ("area.origin_y", self.area.origin_y),
            ("area.width", self.area.width),
            ("area.height", self.area.height),
            ("measurement_radius", self.measurement_radius),
            ("travel_limits.x", self.travel_limits.0),
            ("travel_limits.y", self.travel_limits.1),
        ];
        if let Some((name, _)) = values.iter().find(|(_, v)| !v.is_finite()) {
            return Err(ScanError::InvalidGeometry(format!("{} must be finite", name)));
        }
        if self.measurement_radius <= 0.0 {
            return Err(ScanError::InvalidGeometry(format!(
                "measurement radius must be positive, got {}",
                self.measurement_radius
            )));
        }
        if self.area.width <= 0.0 || self.area.height <= 0.0 {
            return Err(ScanError::InvalidGeometry(format!(
                "sample area must have positive size, got {} x {}",
                self.area.width, self.area.height
            )));
        }
        if self.travel_limits.0 < 0.0 || self.travel_limits.1 < 0.0 {
            return Err(ScanError::InvalidGeometry(format!(
                "travel limits must be non-negative, got ({}, {})",
                self.travel_limits.0, self.travel_limits.1
            )));
        }

        let raw_points = self.raw_point_bound();
        if raw_points > MAX_SAMPLE_POINTS as f64 {
            return Err(ScanError::InvalidGeometry(format!(
                "{} x {} mm at radius {} gives about {:.0} sample points, limit is {}",
                self.area.width,
                self.area.height,
                self.measurement_radius,
                raw_points,
                MAX_SAMPLE_POINTS
            )));
        }
        Ok(())
    }

    /// Upper bound on the number of grid points before the travel filter.
    ///
    /// Each axis holds at most `ceil(extent / radius) + 1` coordinates.
    fn raw_point_bound(&self) -> f64 {
        let axis = |extent: f64| (extent / self.measurement_radius).ceil() + 1.0;
        axis(self.area.width) * axis(self.area.height)
    }
}

/// One stop of the scan: where the probe has to be and where the stage is sent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplePoint {
    /// Where the sensing element is
    pub probe_position: Point3,
    /// Where the stage is commanded to
    pub actuator_position: Point3,
}

/// Closed rectangle outline: four corners plus the first corner repeated.
pub type BoundingBox = [(f64, f64); 5];

/// Ordered sample points of one acquisition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanPath {
    geometry: ScanGeometry,
    points: Vec<SamplePoint>,
}

impl ScanPath {
    /// Geometry the path was planned from.
    pub fn geometry(&self) -> &ScanGeometry {
        &self.geometry
    }

    /// Sample points in visiting order.
    pub fn points(&self) -> &[SamplePoint] {
        &self.points
    }

    /// Number of sample points.
    pub fn point_count(&self) -> usize {
        self.points.len()
    }

    /// Whether the travel filter removed every point.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Probe positions in visiting order.
    pub fn probe_path(&self) -> Vec<Point3> {
        self.points.iter().map(|p| p.probe_position).collect()
    }

    /// Stage positions in visiting order.
    pub fn actuator_path(&self) -> Vec<Point3> {
        self.points.iter().map(|p| p.actuator_position).collect()
    }

    /// Outline of the probe positions, `None` for an empty path.
    pub fn probe_bounding_box(&self) -> Option<BoundingBox> {
        bounding_box(self.points.iter().map(|p| p.probe_position))
    }

    /// Outline of the stage positions, `None` for an empty path.
    pub fn actuator_bounding_box(&self) -> Option<BoundingBox> {
        bounding_box(self.points.iter().map(|p| p.actuator_position))
    }

    /// Rough acquisition time: 4 s per point plus 60 s.
    pub fn estimated_duration(&self) -> Duration {
        self.estimated_duration_with(DEFAULT_SECONDS_PER_POINT, DEFAULT_OVERHEAD_SECONDS)
    }

    /// Scan-time estimate with a custom per-point cost and fixed overhead.
    pub fn estimated_duration_with(&self, seconds_per_point: f64, overhead_seconds: f64) -> Duration {
        let secs = seconds_per_point * self.points.len() as f64 + overhead_seconds;
        Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::MAX)
    }
}

fn bounding_box(points: impl Iterator<Item = Point3>) -> Option<BoundingBox> {
    let (min_x, max_x, min_y, max_y) = points.fold(None, |acc, p| {
        let (min_x, max_x, min_y, max_y) = acc.unwrap_or((p.x, p.x, p.y, p.y));
        Some((min_x.min(p.x), max_x.max(p.x), min_y.min(p.y), max_y.max(p.y)))
    })?;

    Some([
        (min_x, min_y),
        (min_x, max_y),
        (max_x, max_y),
        (max_x, min_y),
        (min_x, min_y),
    ])
}

/// Half-open float stepping.
///
/// Pushes `start` when `include_start`, then keeps stepping while the value stays strictly
/// below `end`. With `include_end` the first value that failed the check is pushed as
/// well, so the sequence ends one step at or past `end`. Values accumulate by repeated
/// addition and drift accordingly.
pub fn step_range(start: f64, end: f64, step: f64, include_start: bool, include_end: bool) -> Vec<f64> {
    let mut values = Vec::new();
    let mut value = start;

    if include_start {
        values.push(value);
    }

    value += step;
    while value < end {
        values.push(value);
        value += step;
    }

    if include_end {
        values.push(value);
    }

    values
}

/// Coordinates of one axis of the sample rectangle, relative to its origin.
///
/// The last coordinate lands one step past `extent`; points that leave the stage travel
/// are removed later by the bounds filter.
pub fn axis_coordinates(extent: f64, radius: f64) -> Vec<f64> {
    step_range(radius / 2.0, extent, radius, true, true)
}

/// Plan the visiting sequence for `geometry`.
pub fn plan(geometry: &ScanGeometry) -> ScanResult<ScanPath> {
    geometry.validate()?;

    let xs = axis_coordinates(geometry.area.width, geometry.measurement_radius);
    let ys = axis_coordinates(geometry.area.height, geometry.measurement_radius);

    let z = geometry.pass_height + geometry.offset.z;
    let mut points = Vec::new();
    let mut dropped = 0usize;

    for (column, &x) in xs.iter().enumerate() {
        let forward = column % 2 == 0;
        let column_ys: Box<dyn Iterator<Item = &f64>> = if forward {
            Box::new(ys.iter())
        } else {
            Box::new(ys.iter().rev())
        };

        for &y in column_ys {
            let probe_position = Point3::new(x + geometry.area.origin_x, y + geometry.area.origin_y, z);
            let actuator_position = Point3::new(
                probe_position.x + geometry.offset.x,
                probe_position.y + geometry.offset.y,
                probe_position.z,
            );

            if probe_position.within(geometry.travel_limits)
                && actuator_position.within(geometry.travel_limits)
            {
                points.push(SamplePoint {
                    probe_position,
                    actuator_position,
                });
            } else {
                dropped += 1;
            }
        }
    }

    debug!(
        columns = xs.len(),
        rows = ys.len(),
        points = points.len(),
        dropped,
        "Planned scan path"
    );

    Ok(ScanPath {
        geometry: *geometry,
        points,
    })
}
