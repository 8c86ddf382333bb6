// Differential-drive kinematics
// Converts body-frame velocities (linear, angular) to wheel angular velocities and
// wheel angular displacements back to body displacement.

use std::f64::consts::PI;

use crate::config::RobotGeometry;
use crate::messages::VelocityCommand;

/// Wheel angular velocity commands (rad/s)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WheelSetpoint {
    pub left: f64,
    pub right: f64,
}

impl WheelSetpoint {
    pub fn new(left: f64, right: f64) -> Self {
        Self { left, right }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    pub fn is_zero(&self) -> bool {
        self.left == 0.0 && self.right == 0.0
    }
}

/// Convert a body velocity command to wheel angular velocities
///
/// If either wheel would exceed the hardware limit, both wheels are scaled by the
/// same factor so the commanded turn radius is kept.
pub fn to_wheel_speeds(cmd: &VelocityCommand, geometry: &RobotGeometry) -> WheelSetpoint {
    let half_track = geometry.track_width() / 2.0;
    let radius = geometry.wheel_radius();

    let mut left = (cmd.linear - cmd.angular * half_track) / radius;
    let mut right = (cmd.linear + cmd.angular * half_track) / radius;

    let max = geometry.max_wheel_angular_velocity();
    let peak = left.abs().max(right.abs());
    if peak > max {
        let scale = max / peak;
        left *= scale;
        right *= scale;
    }

    // Guard against rounding pushing a saturated wheel just past the limit
    WheelSetpoint {
        left: left.clamp(-max, max),
        right: right.clamp(-max, max),
    }
}

/// Convert wheel angular displacements (rad) to body displacement
///
/// Returns `(distance, rotation)` in meters and radians.
pub fn from_encoder_delta(left: f64, right: f64, geometry: &RobotGeometry) -> (f64, f64) {
    let radius = geometry.wheel_radius();
    let distance = radius * (left + right) / 2.0;
    let rotation = radius * (right - left) / geometry.track_width();
    (distance, rotation)
}

/// Encoder ticks to wheel angle (rad)
pub fn ticks_to_radians(ticks: i64, ticks_per_revolution: f64) -> f64 {
    ticks as f64 * 2.0 * PI / ticks_per_revolution
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn geometry() -> RobotGeometry {
        RobotGeometry::new(0.021, 0.0552, 6.28).unwrap()
    }

    #[test]
    fn test_zero_velocity() {
        let wheels = to_wheel_speeds(&VelocityCommand::zero(), &geometry());
        assert!(wheels.is_zero());
    }

    #[test]
    fn test_forward_motion() {
        let wheels = to_wheel_speeds(&VelocityCommand::new(0.1, 0.0), &geometry());
        assert_abs_diff_eq!(wheels.left, 0.1 / 0.021, epsilon = 1e-9);
        assert_eq!(wheels.left, wheels.right);
    }

    #[test]
    fn test_rotation_only() {
        // Counter-clockwise turn: right wheel forward, left wheel backward
        let wheels = to_wheel_speeds(&VelocityCommand::new(0.0, 1.0), &geometry());
        assert!(wheels.left < 0.0 && wheels.right > 0.0);
        assert_abs_diff_eq!(wheels.left, -wheels.right, epsilon = 1e-12);
    }

    #[test]
    fn test_saturation_scales_both_wheels() {
        let geometry = geometry();
        let cmd = VelocityCommand::new(1.0, 5.0);

        let half_track = geometry.track_width() / 2.0;
        let raw_left = (1.0 - 5.0 * half_track) / geometry.wheel_radius();
        let raw_right = (1.0 + 5.0 * half_track) / geometry.wheel_radius();
        assert!(raw_right > geometry.max_wheel_angular_velocity());

        let wheels = to_wheel_speeds(&cmd, &geometry);
        assert_abs_diff_eq!(wheels.right, geometry.max_wheel_angular_velocity(), epsilon = 1e-9);
        // Ratio preserved, so the left wheel is not pinned to the limit as well
        assert_abs_diff_eq!(wheels.left / wheels.right, raw_left / raw_right, epsilon = 1e-9);
        assert!(wheels.left.abs() < geometry.max_wheel_angular_velocity());
    }

    #[test]
    fn test_saturation_in_reverse() {
        let geometry = geometry();
        let wheels = to_wheel_speeds(&VelocityCommand::new(-10.0, 0.0), &geometry);
        assert_abs_diff_eq!(wheels.left, -geometry.max_wheel_angular_velocity(), epsilon = 1e-9);
        assert_abs_diff_eq!(wheels.right, -geometry.max_wheel_angular_velocity(), epsilon = 1e-9);
    }

    #[test]
    fn test_round_trip_over_one_cycle() {
        let geometry = geometry();
        let dt = 0.064;

        for &(linear, angular) in &[(0.05, 0.0), (0.0, 2.0), (0.08, -1.5), (-0.03, 0.7)] {
            let wheels = to_wheel_speeds(&VelocityCommand::new(linear, angular), &geometry);
            let (distance, rotation) =
                from_encoder_delta(wheels.left * dt, wheels.right * dt, &geometry);
            assert_abs_diff_eq!(distance / dt, linear, epsilon = 1e-9);
            assert_abs_diff_eq!(rotation / dt, angular, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_ticks_to_radians() {
        assert_abs_diff_eq!(ticks_to_radians(4096, 4096.0), 2.0 * PI, epsilon = 1e-12);
        assert_abs_diff_eq!(ticks_to_radians(-1024, 4096.0), -PI / 2.0, epsilon = 1e-12);
    }
}
