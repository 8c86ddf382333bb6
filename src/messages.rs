// Define message types for the runtime

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

// Command from teleop/scripts -> runtime
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct VelocityCommand {
    pub linear: f64,  // m/s
    pub angular: f64, // rad/s
}

impl VelocityCommand {
    pub fn new(linear: f64, angular: f64) -> Self {
        Self { linear, angular }
    }

    /// Zero velocity, used as the safety stop
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn is_finite(&self) -> bool {
        self.linear.is_finite() && self.angular.is_finite()
    }
}

/// Wall-clock timestamp attached to every outbound message
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Stamp {
    pub sec: u64,
    pub nanosec: u32,
}

impl Stamp {
    pub fn now() -> Self {
        let epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            sec: epoch.as_secs(),
            nanosec: epoch.subsec_nanos(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl Quaternion {
    /// Rotation about the vertical axis only
    pub fn from_yaw(yaw: f64) -> Self {
        let half = yaw / 2.0;
        Self {
            x: 0.0,
            y: 0.0,
            z: half.sin(),
            w: half.cos(),
        }
    }
}

// Dead-reckoned pose published every cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Odometry {
    pub stamp: Stamp,
    pub frame_id: String,
    pub child_frame_id: String,
    pub x: f64,
    pub y: f64,
    pub heading: f64,
    pub orientation: Quaternion,
    pub linear_velocity: f64,  // m/s
    pub angular_velocity: f64, // rad/s
}

/// Pose of `child_frame_id` expressed in `frame_id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub stamp: Stamp,
    pub frame_id: String,
    pub child_frame_id: String,
    pub translation: [f64; 3],
    pub rotation: Quaternion,
}

impl Transform {
    /// Planar transform from a position and a yaw angle
    pub fn planar(stamp: Stamp, frame_id: &str, child_frame_id: &str, x: f64, y: f64, yaw: f64) -> Self {
        Self {
            stamp,
            frame_id: frame_id.to_string(),
            child_frame_id: child_frame_id.to_string(),
            translation: [x, y, 0.0],
            rotation: Quaternion::from_yaw(yaw),
        }
    }
}

impl Odometry {
    /// The odometry pose as an `odom -> base_footprint` transform
    pub fn transform(&self) -> Transform {
        Transform::planar(self.stamp, &self.frame_id, &self.child_frame_id, self.x, self.y, self.heading)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RadiationType {
    Infrared,
}

/// Single range sensor reading
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Range {
    pub stamp: Stamp,
    pub frame_id: String,
    pub radiation_type: RadiationType,
    pub field_of_view: f64, // rad
    pub min_range: f64,
    pub max_range: f64,
    pub range: f64,
}

/// Planar scan synthesized from the range sensors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaserScan {
    pub stamp: Stamp,
    pub frame_id: String,
    pub angle_min: f64,
    pub angle_max: f64,
    pub angle_increment: f64,
    pub scan_time: f64,
    pub range_min: f64,
    pub range_max: f64,
    pub ranges: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Imu {
    pub stamp: Stamp,
    pub frame_id: String,
    pub linear_acceleration: Option<[f64; 3]>, // m/s^2
    pub angular_velocity: Option<[f64; 3]>,    // rad/s
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatteryState {
    pub stamp: Stamp,
    pub voltage: f64,
    pub percentage: f64, // 0..100
}

/// Health status published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Ok,
    CmdStale,
    SensorDegraded,
    ShuttingDown,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_command_parses_from_json() {
        let cmd: VelocityCommand = serde_json::from_str(r#"{"linear":0.2,"angular":-1.5}"#).unwrap();
        assert_eq!(cmd, VelocityCommand::new(0.2, -1.5));
        assert!(cmd.is_finite());
        assert!(!VelocityCommand::new(f64::NAN, 0.0).is_finite());
    }

    #[test]
    fn test_quaternion_from_yaw() {
        let q = Quaternion::from_yaw(std::f64::consts::PI);
        assert_abs_diff_eq!(q.z, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(q.w, 0.0, epsilon = 1e-12);

        let q = Quaternion::from_yaw(0.0);
        assert_eq!(q.w, 1.0);
    }

    #[test]
    fn test_odometry_transform_follows_pose() {
        let odom = Odometry {
            stamp: Stamp::default(),
            frame_id: "odom".to_string(),
            child_frame_id: "base_footprint".to_string(),
            x: 1.5,
            y: -0.5,
            heading: std::f64::consts::FRAC_PI_2,
            orientation: Quaternion::from_yaw(std::f64::consts::FRAC_PI_2),
            linear_velocity: 0.0,
            angular_velocity: 0.0,
        };
        let tf = odom.transform();
        assert_eq!(tf.frame_id, "odom");
        assert_eq!(tf.child_frame_id, "base_footprint");
        assert_eq!(tf.translation, [1.5, -0.5, 0.0]);
        assert_eq!(tf.rotation, odom.orientation);
    }

    #[test]
    fn test_health_serializes_snake_case() {
        let json = serde_json::to_string(&RuntimeHealth::CmdStale).unwrap();
        assert_eq!(json, "\"cmd_stale\"");
    }
}
