// Hardware boundary for the differential-drive base
//
// Provides:
// - The `RobotHardware` capability set used by the control loop
// - Feetech STS serial protocol implementation
// - A Feetech wheel-mode backend implementing `RobotHardware`

mod driver;
pub mod feetech;
#[cfg(test)]
pub mod mock;

use std::fmt;

pub use driver::FeetechBase;
pub use feetech::{FeetechBus, FeetechError};

use crate::kinematics::WheelSetpoint;

/// Number of infrared proximity sensors around the body
pub const PROXIMITY_COUNT: u8 = 8;

/// Raw encoder counters, one per wheel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderReading {
    pub left_ticks: i64,
    pub right_ticks: i64,
}

impl EncoderReading {
    pub fn new(left_ticks: i64, right_ticks: i64) -> Self {
        Self {
            left_ticks,
            right_ticks,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];
}

/// Physical sensor channels a backend may expose
///
/// Raw units: proximity is IR intensity (0..4095), time-of-flight is
/// millimetres, IMU axes are ADC counts, battery is ADC counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorChannel {
    Proximity(u8),
    TimeOfFlight,
    Accelerometer(Axis),
    Gyroscope(Axis),
    BatteryVoltage,
}

impl fmt::Display for SensorChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorChannel::Proximity(i) => write!(f, "ps{}", i),
            SensorChannel::TimeOfFlight => write!(f, "tof"),
            SensorChannel::Accelerometer(axis) => write!(f, "accel_{:?}", axis),
            SensorChannel::Gyroscope(axis) => write!(f, "gyro_{:?}", axis),
            SensorChannel::BatteryVoltage => write!(f, "battery"),
        }
    }
}

/// Errors surfaced by a hardware backend
#[derive(Debug, thiserror::Error)]
pub enum HardwareError {
    #[error("Failed to write wheel setpoints: {0}")]
    Write(String),

    #[error("Failed to read encoders: {0}")]
    Read(String),

    #[error("Sensor channel {0} unavailable")]
    SensorUnavailable(SensorChannel),

    #[error("Hardware disconnected: {0}")]
    Disconnected(String),
}

impl HardwareError {
    /// Errors that cannot be recovered by retrying next cycle
    pub fn is_fatal(&self) -> bool {
        matches!(self, HardwareError::Disconnected(_))
    }
}

/// Capability set the control loop needs from the robot
///
/// Calls must return in bounded time; a backend that times out reports
/// `Write`/`Read` errors instead of blocking.
pub trait RobotHardware {
    fn write_wheel_setpoints(&mut self, setpoint: WheelSetpoint) -> Result<(), HardwareError>;

    fn read_encoders(&mut self) -> Result<EncoderReading, HardwareError>;

    fn read_sensor_channel(&mut self, channel: SensorChannel) -> Result<f64, HardwareError>;

    /// Give up the hardware (torque off, port closed). Called once at shutdown.
    fn release(&mut self) -> Result<(), HardwareError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_names() {
        assert_eq!(SensorChannel::Proximity(3).to_string(), "ps3");
        assert_eq!(SensorChannel::TimeOfFlight.to_string(), "tof");
        assert_eq!(SensorChannel::Gyroscope(Axis::Z).to_string(), "gyro_Z");
    }

    #[test]
    fn test_only_disconnect_is_fatal() {
        assert!(HardwareError::Disconnected("gone".into()).is_fatal());
        assert!(!HardwareError::Write("nak".into()).is_fatal());
        assert!(!HardwareError::SensorUnavailable(SensorChannel::TimeOfFlight).is_fatal());
    }
}
