// Timing, topics, robot geometry and hardware configuration
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

// Control loop period (64 ms ~ 15.6 Hz)
pub const PERIOD_MS: u64 = 64;

// Command timeout for watchdog
pub const CMD_TIMEOUT_MS: u64 = 250;

// Zenoh topics
pub const TOPIC_CMD_VEL: &str = "diffdrive/cmd/vel"; // commands
pub const TOPIC_ODOM: &str = "diffdrive/state/odom";
pub const TOPIC_RANGE_PREFIX: &str = "diffdrive/state/range"; // + "/<channel>"
pub const TOPIC_SCAN: &str = "diffdrive/state/scan";
pub const TOPIC_IMU: &str = "diffdrive/state/imu";
pub const TOPIC_BATTERY: &str = "diffdrive/state/battery";
pub const TOPIC_TF: &str = "diffdrive/state/tf"; // odom and scanner frames
pub const TOPIC_HEALTH: &str = "diffdrive/state/health"; // health status

// Base geometry
pub const WHEEL_RADIUS: f64 = 0.05; // meters
pub const TRACK_WIDTH: f64 = 0.25; // meters (distance between wheel contact points)
pub const MAX_WHEEL_ANGULAR_VELOCITY: f64 = 5.0; // rad/s

// Encoder calibration: the servos report a 12-bit position counter
pub const TICKS_PER_REVOLUTION: f64 = 4096.0;
pub const ENCODER_COUNTER_BITS: u32 = 12;

// Consecutive failures tolerated before a hardware fault is treated as fatal
pub const WRITE_RETRY_BUDGET: u32 = 5;
pub const READ_RETRY_BUDGET: u32 = 5;

// Serial port for the Feetech motor controller
pub const MOTOR_PORT: &str = "/dev/ttyUSB0";
pub const MOTOR_ID_LEFT: u8 = 1;
pub const MOTOR_ID_RIGHT: u8 = 2;

// Sensor scaling
pub const ACCEL_LSB_PER_G: f64 = 16384.0; // +-2 g range
pub const GYRO_LSB_PER_DPS: f64 = 131.0; // +-250 deg/s range
pub const BATTERY_VOLTS_PER_LSB: f64 = 0.1;
pub const BATTERY_EMPTY_VOLTS: f64 = 6.0;
pub const BATTERY_FULL_VOLTS: f64 = 8.4;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Physical constants of the base. Immutable once constructed.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(try_from = "GeometryParams")]
pub struct RobotGeometry {
    wheel_radius: f64,
    track_width: f64,
    max_wheel_angular_velocity: f64,
}

#[derive(Deserialize)]
struct GeometryParams {
    wheel_radius: f64,
    track_width: f64,
    max_wheel_angular_velocity: f64,
}

impl TryFrom<GeometryParams> for RobotGeometry {
    type Error = ConfigError;

    fn try_from(p: GeometryParams) -> Result<Self, Self::Error> {
        Self::new(p.wheel_radius, p.track_width, p.max_wheel_angular_velocity)
    }
}

impl RobotGeometry {
    /// Rejects non-positive or non-finite values.
    pub fn new(
        wheel_radius: f64,
        track_width: f64,
        max_wheel_angular_velocity: f64,
    ) -> Result<Self, ConfigError> {
        for (name, value) in [
            ("wheel_radius", wheel_radius),
            ("track_width", track_width),
            ("max_wheel_angular_velocity", max_wheel_angular_velocity),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::InvalidGeometry(format!(
                    "{} must be positive, got {}",
                    name, value
                )));
            }
        }

        Ok(Self {
            wheel_radius,
            track_width,
            max_wheel_angular_velocity,
        })
    }

    pub fn wheel_radius(&self) -> f64 {
        self.wheel_radius
    }

    pub fn track_width(&self) -> f64 {
        self.track_width
    }

    pub fn max_wheel_angular_velocity(&self) -> f64 {
        self.max_wheel_angular_velocity
    }
}

impl Default for RobotGeometry {
    fn default() -> Self {
        Self {
            wheel_radius: WHEEL_RADIUS,
            track_width: TRACK_WIDTH,
            max_wheel_angular_velocity: MAX_WHEEL_ANGULAR_VELOCITY,
        }
    }
}

/// Which sensor categories are sampled, and how raw values are scaled
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    pub proximity: bool,
    pub time_of_flight: bool,
    pub imu: bool,
    pub battery: bool,
    pub accel_lsb_per_g: f64,
    pub gyro_lsb_per_dps: f64,
    pub battery_volts_per_lsb: f64,
    pub battery_empty_volts: f64,
    pub battery_full_volts: f64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        // The servo base only exposes its supply voltage
        Self {
            proximity: false,
            time_of_flight: false,
            imu: false,
            battery: true,
            accel_lsb_per_g: ACCEL_LSB_PER_G,
            gyro_lsb_per_dps: GYRO_LSB_PER_DPS,
            battery_volts_per_lsb: BATTERY_VOLTS_PER_LSB,
            battery_empty_volts: BATTERY_EMPTY_VOLTS,
            battery_full_volts: BATTERY_FULL_VOLTS,
        }
    }
}

/// Serial bus settings for the Feetech base
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HardwareConfig {
    pub port: String,
    pub baudrate: u32,
    pub left_motor_id: u8,
    pub right_motor_id: u8,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            port: MOTOR_PORT.to_string(),
            baudrate: crate::hardware::feetech::DEFAULT_BAUDRATE,
            left_motor_id: MOTOR_ID_LEFT,
            right_motor_id: MOTOR_ID_RIGHT,
        }
    }
}

/// Everything the runtime needs, loadable from a JSON file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub period_ms: u64,
    pub cmd_timeout_ms: u64,
    pub geometry: RobotGeometry,
    pub ticks_per_revolution: f64,
    /// Width of the hardware encoder counter; `None` for unbounded counters
    pub encoder_counter_bits: Option<u32>,
    pub write_retry_budget: u32,
    pub read_retry_budget: u32,
    pub sensors: SensorConfig,
    pub hardware: HardwareConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            period_ms: PERIOD_MS,
            cmd_timeout_ms: CMD_TIMEOUT_MS,
            geometry: RobotGeometry::default(),
            ticks_per_revolution: TICKS_PER_REVOLUTION,
            encoder_counter_bits: Some(ENCODER_COUNTER_BITS),
            write_retry_budget: WRITE_RETRY_BUDGET,
            read_retry_budget: READ_RETRY_BUDGET,
            sensors: SensorConfig::default(),
            hardware: HardwareConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load from a JSON file; missing fields fall back to defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: RuntimeConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.period_ms == 0 {
            return Err(ConfigError::InvalidParameter {
                name: "period_ms",
                reason: "must be non-zero".to_string(),
            });
        }
        if !self.ticks_per_revolution.is_finite() || self.ticks_per_revolution <= 0.0 {
            return Err(ConfigError::InvalidParameter {
                name: "ticks_per_revolution",
                reason: format!("must be positive, got {}", self.ticks_per_revolution),
            });
        }
        if let Some(bits) = self.encoder_counter_bits {
            if bits == 0 || bits > 62 {
                return Err(ConfigError::InvalidParameter {
                    name: "encoder_counter_bits",
                    reason: format!("must be within 1..=62, got {}", bits),
                });
            }
            // Rollover is only distinguishable from motion below half the modulus
            let half = 1i64 << (bits - 1);
            let max_ticks = crate::odometry::max_plausible_ticks(
                &self.geometry,
                self.ticks_per_revolution,
                self.period().as_secs_f64(),
            );
            if max_ticks >= half {
                return Err(ConfigError::InvalidParameter {
                    name: "period_ms",
                    reason: format!(
                        "up to {} ticks per cycle cannot be told apart from a {}-bit counter rollover",
                        max_ticks, bits
                    ),
                });
            }
        }
        if self.sensors.battery_full_volts <= self.sensors.battery_empty_volts {
            return Err(ConfigError::InvalidParameter {
                name: "battery_full_volts",
                reason: "must exceed battery_empty_volts".to_string(),
            });
        }
        Ok(())
    }

    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }

    pub fn cmd_timeout(&self) -> Duration {
        Duration::from_millis(self.cmd_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geometry_rejects_non_positive() {
        assert!(RobotGeometry::new(0.0, 0.25, 5.0).is_err());
        assert!(RobotGeometry::new(0.05, -0.1, 5.0).is_err());
        assert!(RobotGeometry::new(0.05, 0.25, f64::NAN).is_err());
        assert!(RobotGeometry::new(0.05, 0.25, 5.0).is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{
            "period_ms": 32,
            "geometry": { "wheel_radius": 0.021, "track_width": 0.0552, "max_wheel_angular_velocity": 6.28 },
            "sensors": { "proximity": true }
        }"#;
        let config: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.period(), Duration::from_millis(32));
        assert_eq!(config.cmd_timeout_ms, CMD_TIMEOUT_MS);
        assert_eq!(config.geometry.wheel_radius(), 0.021);
        assert!(config.sensors.proximity);
        assert!(config.sensors.battery);
        assert_eq!(config.hardware.port, MOTOR_PORT);
    }

    #[test]
    fn test_json_with_bad_geometry_is_rejected() {
        let json = r#"{ "geometry": { "wheel_radius": 0.0, "track_width": 0.1, "max_wheel_angular_velocity": 1.0 } }"#;
        assert!(serde_json::from_str::<RuntimeConfig>(json).is_err());
    }

    #[test]
    fn test_validate_rejects_zero_period() {
        let config = RuntimeConfig {
            period_ms: 0,
            ..RuntimeConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidParameter { name: "period_ms", .. })
        ));
    }

    #[test]
    fn test_validate_rejects_period_that_aliases_rollover() {
        let config = RuntimeConfig {
            period_ms: 1000,
            ..RuntimeConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidParameter { name: "period_ms", .. })
        ));

        // Same period is fine with an unbounded counter
        let unbounded = RuntimeConfig {
            encoder_counter_bits: None,
            ..config
        };
        assert!(unbounded.validate().is_ok());
        assert!(RuntimeConfig::default().validate().is_ok());
    }
}
