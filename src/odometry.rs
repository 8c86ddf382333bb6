//! Dead-reckoning from wheel encoder ticks

use std::f64::consts::PI;

use tracing::{debug, warn};

use crate::config::{RobotGeometry, RuntimeConfig};
use crate::hardware::EncoderReading;
use crate::kinematics::{from_encoder_delta, ticks_to_radians};

/// Planar pose; heading kept in (-pi, pi]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Pose2D {
    pub x: f64,
    pub y: f64,
    pub heading: f64,
}

/// Result of one integration step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OdometryStep {
    pub pose: Pose2D,
    /// Distance travelled this step (m)
    pub distance: f64,
    /// Heading change this step (rad)
    pub rotation: f64,
    /// Encoders were unreadable; pose was held
    pub degraded: bool,
}

/// Wrap an angle into (-pi, pi]
pub fn normalize_angle(angle: f64) -> f64 {
    let wrapped = (angle + PI).rem_euclid(2.0 * PI) - PI;
    if wrapped <= -PI { wrapped + 2.0 * PI } else { wrapped }
}

/// Midpoint integration of one body displacement
pub fn integrate(pose: Pose2D, distance: f64, rotation: f64) -> Pose2D {
    let mid = pose.heading + rotation / 2.0;
    Pose2D {
        x: pose.x + distance * mid.cos(),
        y: pose.y + distance * mid.sin(),
        heading: normalize_angle(pose.heading + rotation),
    }
}

/// Difference between two raw counter values, corrected for rollover of a
/// counter `bits` wide. Deltas larger than half the counter range are taken as
/// a wrap.
pub fn tick_delta(previous: i64, current: i64, bits: Option<u32>) -> i64 {
    let delta = current - previous;
    let Some(bits) = bits else {
        return delta;
    };

    let modulus = 1i64 << bits;
    let half = modulus / 2;
    let delta = delta.rem_euclid(modulus);
    if delta > half { delta - modulus } else { delta }
}

/// Largest tick delta the wheels can physically produce in one cycle, with a
/// 2x margin for timer jitter
pub fn max_plausible_ticks(geometry: &RobotGeometry, ticks_per_revolution: f64, period_s: f64) -> i64 {
    let max_rad = geometry.max_wheel_angular_velocity() * period_s;
    (2.0 * max_rad * ticks_per_revolution / (2.0 * PI)).ceil() as i64
}

/// Owns the pose estimate and the previous encoder reading
pub struct OdometryIntegrator {
    geometry: RobotGeometry,
    ticks_per_revolution: f64,
    counter_bits: Option<u32>,
    /// Largest tick delta the wheels can physically produce in one cycle
    max_plausible_ticks: i64,
    pose: Pose2D,
    previous: Option<EncoderReading>,
}

impl OdometryIntegrator {
    pub fn new(
        geometry: RobotGeometry,
        ticks_per_revolution: f64,
        counter_bits: Option<u32>,
        period_s: f64,
    ) -> Self {
        let max_plausible_ticks = max_plausible_ticks(&geometry, ticks_per_revolution, period_s);

        debug!(
            "Odometry initialized: ticks_per_rev={}, counter_bits={:?}, max_plausible_ticks={}",
            ticks_per_revolution, counter_bits, max_plausible_ticks
        );

        Self {
            geometry,
            ticks_per_revolution,
            counter_bits,
            max_plausible_ticks,
            pose: Pose2D::default(),
            previous: None,
        }
    }

    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self::new(
            config.geometry,
            config.ticks_per_revolution,
            config.encoder_counter_bits,
            config.period().as_secs_f64(),
        )
    }

    pub fn pose(&self) -> Pose2D {
        self.pose
    }

    /// Integrate a new encoder reading. `None` means the encoders could not be read.
    pub fn update(&mut self, reading: Option<EncoderReading>) -> OdometryStep {
        let Some(reading) = reading else {
            return self.hold(true);
        };

        let Some(previous) = self.previous.replace(reading) else {
            debug!(
                "Initial encoder reading: L={}, R={}",
                reading.left_ticks, reading.right_ticks
            );
            return self.hold(false);
        };

        let left = tick_delta(previous.left_ticks, reading.left_ticks, self.counter_bits);
        let right = tick_delta(previous.right_ticks, reading.right_ticks, self.counter_bits);

        if left.abs() > self.max_plausible_ticks || right.abs() > self.max_plausible_ticks {
            warn!(
                "Large encoder jump: dL={}, dR={} (limit {} per cycle)",
                left, right, self.max_plausible_ticks
            );
        }

        let (distance, rotation) = from_encoder_delta(
            ticks_to_radians(left, self.ticks_per_revolution),
            ticks_to_radians(right, self.ticks_per_revolution),
            &self.geometry,
        );
        self.pose = integrate(self.pose, distance, rotation);

        OdometryStep {
            pose: self.pose,
            distance,
            rotation,
            degraded: false,
        }
    }

    fn hold(&self, degraded: bool) -> OdometryStep {
        OdometryStep {
            pose: self.pose,
            distance: 0.0,
            rotation: 0.0,
            degraded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const TICKS_PER_REV: f64 = 1000.0;

    fn integrator(bits: Option<u32>) -> OdometryIntegrator {
        let geometry = RobotGeometry::new(0.021, 0.0552, 6.28).unwrap();
        OdometryIntegrator::new(geometry, TICKS_PER_REV, bits, 0.064)
    }

    fn reading(left: i64, right: i64) -> Option<EncoderReading> {
        Some(EncoderReading::new(left, right))
    }

    #[test]
    fn test_first_reading_keeps_initial_pose() {
        let mut odom = integrator(None);
        let step = odom.update(reading(500, -300));
        assert_eq!(step.pose, Pose2D::default());
        assert!(!step.degraded);
    }

    #[test]
    fn test_zero_delta_keeps_pose() {
        let mut odom = integrator(None);
        odom.update(reading(100, 100));
        odom.update(reading(150, 150));
        let before = odom.pose();
        let step = odom.update(reading(150, 150));
        assert_eq!(step.pose, before);
        assert_eq!(step.distance, 0.0);
    }

    #[test]
    fn test_straight_line() {
        let mut odom = integrator(None);
        odom.update(reading(0, 0));
        let step = odom.update(reading(100, 100));

        let expected = 0.021 * ticks_to_radians(100, TICKS_PER_REV);
        assert_abs_diff_eq!(step.distance, expected, epsilon = 1e-12);
        assert_abs_diff_eq!(step.pose.x, expected, epsilon = 1e-12);
        assert_abs_diff_eq!(step.pose.y, 0.0, epsilon = 1e-12);
        assert_eq!(step.pose.heading, 0.0);
    }

    #[test]
    fn test_straight_line_along_heading() {
        let start = Pose2D { x: 1.0, y: 2.0, heading: PI / 2.0 };
        let pose = integrate(start, 0.5, 0.0);
        assert_abs_diff_eq!(pose.x, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(pose.y, 2.5, epsilon = 1e-12);
        assert_eq!(pose.heading, PI / 2.0);
    }

    #[test]
    fn test_pure_rotation() {
        let mut odom = integrator(None);
        odom.update(reading(0, 0));
        let step = odom.update(reading(-50, 50));

        let wheel = ticks_to_radians(50, TICKS_PER_REV);
        let expected = 0.021 * 2.0 * wheel / 0.0552;
        assert_abs_diff_eq!(step.pose.x, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(step.pose.y, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(step.pose.heading, expected, epsilon = 1e-12);
    }

    #[test]
    fn test_unreadable_encoders_hold_pose() {
        let mut odom = integrator(None);
        odom.update(reading(0, 0));
        odom.update(reading(40, 60));
        let before = odom.pose();

        let step = odom.update(None);
        assert!(step.degraded);
        assert_eq!(step.pose, before);

        // Delta after the gap is measured against the last good reading
        let step = odom.update(reading(40, 60));
        assert_eq!(step.pose, before);
    }

    #[test]
    fn test_wraparound_forward() {
        let mut odom = integrator(Some(12));
        odom.update(reading(4090, 4090));
        let step = odom.update(reading(10, 10));
        let expected = 0.021 * ticks_to_radians(16, TICKS_PER_REV);
        assert_abs_diff_eq!(step.distance, expected, epsilon = 1e-12);
    }

    #[test]
    fn test_tick_delta_wraps_both_ways() {
        assert_eq!(tick_delta(4090, 10, Some(12)), 16);
        assert_eq!(tick_delta(10, 4090, Some(12)), -16);
        assert_eq!(tick_delta(100, 300, Some(12)), 200);
        assert_eq!(tick_delta(4090, 10, None), -4080);
    }

    #[test]
    fn test_heading_stays_normalized() {
        let mut pose = Pose2D::default();
        for _ in 0..100 {
            pose = integrate(pose, 0.0, 0.3);
            assert!(pose.heading > -PI && pose.heading <= PI);
        }
        assert_abs_diff_eq!(normalize_angle(30.0), 30.0 - 10.0 * PI, epsilon = 1e-9);
        assert_eq!(normalize_angle(-PI), PI);
        assert_eq!(normalize_angle(PI), PI);
    }
}
