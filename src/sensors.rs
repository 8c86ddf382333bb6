//! Sensor sampling and unit conversion
//!
//! Each enabled channel is read once per cycle. A channel that fails to read
//! is marked invalid in the frame; the rest of the frame is still published.
//! A fatal hardware error aborts the sample instead.

use std::f64::consts::PI;

use tracing::debug;

use crate::config::SensorConfig;
use crate::hardware::{Axis, HardwareError, PROXIMITY_COUNT, RobotHardware, SensorChannel};
use crate::messages::{BatteryState, Imu, LaserScan, RadiationType, Range, Stamp};

const STANDARD_GRAVITY: f64 = 9.80665;

/// Distance of the range sensors from the robot center (m)
pub const SENSOR_OFFSET: f64 = 0.035;

/// Full-scale IR intensity
const PROXIMITY_MAX_RAW: f64 = 4095.0;

/// Time-of-flight readings beyond this are out of range (m)
const TOF_MAX_RANGE: f64 = 2.0;

/// Cone apertures reported in range messages (rad)
pub const PROXIMITY_FIELD_OF_VIEW: f64 = 0.3;
pub const TOF_FIELD_OF_VIEW: f64 = 0.436; // 25 deg

/// IR calibration points: (distance m, intensity), intensity strictly decreasing
const INTENSITY_TABLE: [(f64, f64); 7] = [
    (0.0, 4095.0),
    (0.005, 2133.33),
    (0.01, 1465.73),
    (0.015, 601.46),
    (0.02, 383.84),
    (0.03, 234.93),
    (0.04, 158.03),
];

/// Frame of the synthesized scan, mounted at the robot center
pub const SCAN_FRAME: &str = "laser_scanner";

/// Scan layout: 24 bins of 15 deg plus a closing bin at 360 deg
const SCAN_BINS: usize = 25;
const SCAN_INCREMENT_DEG: f64 = 15.0;
const SCAN_LAYOUT: [(usize, SensorChannel); 10] = [
    (0, SensorChannel::TimeOfFlight),
    (1, SensorChannel::Proximity(7)),
    (3, SensorChannel::Proximity(6)),
    (6, SensorChannel::Proximity(5)),
    (10, SensorChannel::Proximity(4)),
    (14, SensorChannel::Proximity(3)),
    (18, SensorChannel::Proximity(2)),
    (21, SensorChannel::Proximity(1)),
    (23, SensorChannel::Proximity(0)),
    (24, SensorChannel::TimeOfFlight),
];

/// Convert an IR intensity to distance by interpolating the calibration table.
/// Intensities outside the table map to 0.
pub fn intensity_to_distance(intensity: f64) -> f64 {
    INTENSITY_TABLE
        .windows(2)
        .find(|w| w[0].1 >= intensity && w[1].1 < intensity)
        .map(|w| {
            let (near_d, near_i) = w[0];
            let (far_d, far_i) = w[1];
            (near_d - far_d) / (near_i - far_i) * (intensity - far_i) + far_d
        })
        .unwrap_or(0.0)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeReading {
    pub channel: SensorChannel,
    pub range: f64, // m
    pub valid: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImuReading {
    pub linear_acceleration: [f64; 3], // m/s^2
    pub accel_valid: bool,
    pub angular_velocity: [f64; 3], // rad/s
    pub gyro_valid: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatteryReading {
    pub voltage: f64,
    pub percentage: f64,
    pub valid: bool,
}

/// Snapshot of every enabled sensor at one instant. Disabled categories are `None`/empty.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorFrame {
    pub stamp: Stamp,
    pub ranges: Vec<RangeReading>,
    pub imu: Option<ImuReading>,
    pub battery: Option<BatteryReading>,
}

impl SensorFrame {
    /// Any enabled channel failed this cycle
    pub fn is_degraded(&self) -> bool {
        self.ranges.iter().any(|r| !r.valid)
            || self.imu.is_some_and(|imu| !imu.accel_valid || !imu.gyro_valid)
            || self.battery.is_some_and(|b| !b.valid)
    }

    pub fn range(&self, channel: SensorChannel) -> Option<&RangeReading> {
        self.ranges.iter().find(|r| r.channel == channel)
    }

    /// One message per valid range channel, keyed by channel name
    pub fn range_messages(&self) -> Vec<(String, Range)> {
        let proximity_min = intensity_to_distance(PROXIMITY_MAX_RAW - 8.2) + SENSOR_OFFSET;
        let proximity_max = INTENSITY_TABLE[INTENSITY_TABLE.len() - 1].0 + SENSOR_OFFSET;

        self.ranges
            .iter()
            .filter(|r| r.valid)
            .map(|r| {
                let (field_of_view, min_range, max_range) = match r.channel {
                    SensorChannel::TimeOfFlight => (TOF_FIELD_OF_VIEW, 0.0, TOF_MAX_RANGE),
                    _ => (PROXIMITY_FIELD_OF_VIEW, proximity_min, proximity_max),
                };
                let name = r.channel.to_string();
                let msg = Range {
                    stamp: self.stamp,
                    frame_id: name.clone(),
                    radiation_type: RadiationType::Infrared,
                    field_of_view,
                    min_range,
                    max_range,
                    range: r.range,
                };
                (name, msg)
            })
            .collect()
    }

    /// Present when at least one of accelerometer/gyroscope read cleanly
    pub fn imu_message(&self) -> Option<Imu> {
        let imu = self.imu?;
        if !imu.accel_valid && !imu.gyro_valid {
            return None;
        }
        Some(Imu {
            stamp: self.stamp,
            frame_id: "imu_link".to_string(),
            linear_acceleration: imu.accel_valid.then_some(imu.linear_acceleration),
            angular_velocity: imu.gyro_valid.then_some(imu.angular_velocity),
        })
    }

    pub fn battery_message(&self) -> Option<BatteryState> {
        self.battery.filter(|b| b.valid).map(|b| BatteryState {
            stamp: self.stamp,
            voltage: b.voltage,
            percentage: b.percentage,
        })
    }

    /// Planar scan built from the range sensors at their mounting angles.
    /// Bins without a sensor, or with an invalid reading, are 0.
    pub fn laser_scan(&self, scan_time: f64) -> Option<LaserScan> {
        if self.ranges.is_empty() {
            return None;
        }

        let mut ranges = vec![0.0; SCAN_BINS];
        for &(bin, channel) in &SCAN_LAYOUT {
            if let Some(r) = self.range(channel).filter(|r| r.valid && r.range != 0.0) {
                ranges[bin] = r.range + SENSOR_OFFSET;
            }
        }

        Some(LaserScan {
            stamp: self.stamp,
            frame_id: SCAN_FRAME.to_string(),
            angle_min: 0.0,
            angle_max: 2.0 * PI,
            angle_increment: SCAN_INCREMENT_DEG.to_radians(),
            scan_time,
            range_min: intensity_to_distance(PROXIMITY_MAX_RAW - 20.0) + SENSOR_OFFSET,
            range_max: 1.0 + SENSOR_OFFSET,
            ranges,
        })
    }
}

pub struct SensorSampler {
    config: SensorConfig,
}

impl SensorSampler {
    pub fn new(config: SensorConfig) -> Self {
        Self { config }
    }

    /// Read every enabled channel and build a frame. Only a fatal hardware
    /// error is returned; anything else invalidates the channel.
    pub fn sample<H: RobotHardware + ?Sized>(
        &self,
        hw: &mut H,
        stamp: Stamp,
    ) -> Result<SensorFrame, HardwareError> {
        let mut ranges = Vec::new();

        if self.config.proximity {
            for i in 0..PROXIMITY_COUNT {
                let channel = SensorChannel::Proximity(i);
                let reading = read(hw, channel)?.map(intensity_to_distance);
                ranges.push(range_reading(channel, reading));
            }
        }

        if self.config.time_of_flight {
            let channel = SensorChannel::TimeOfFlight;
            let reading = read(hw, channel)?
                .map(|mm| mm / 1000.0)
                .filter(|m| (0.0..=TOF_MAX_RANGE).contains(m));
            ranges.push(range_reading(channel, reading));
        }

        let imu = if self.config.imu {
            let accel_scale = STANDARD_GRAVITY / self.config.accel_lsb_per_g;
            let gyro_scale = (1.0 / self.config.gyro_lsb_per_dps).to_radians();
            let accel = read_axes(hw, SensorChannel::Accelerometer, accel_scale)?;
            let gyro = read_axes(hw, SensorChannel::Gyroscope, gyro_scale)?;
            Some(ImuReading {
                linear_acceleration: accel.unwrap_or_default(),
                accel_valid: accel.is_some(),
                angular_velocity: gyro.unwrap_or_default(),
                gyro_valid: gyro.is_some(),
            })
        } else {
            None
        };

        let battery = if self.config.battery {
            Some(match read(hw, SensorChannel::BatteryVoltage)? {
                Some(raw) => {
                    let voltage = raw * self.config.battery_volts_per_lsb;
                    BatteryReading {
                        voltage,
                        percentage: self.battery_percentage(voltage),
                        valid: true,
                    }
                }
                None => BatteryReading {
                    voltage: 0.0,
                    percentage: 0.0,
                    valid: false,
                },
            })
        } else {
            None
        };

        Ok(SensorFrame {
            stamp,
            ranges,
            imu,
            battery,
        })
    }

    fn battery_percentage(&self, voltage: f64) -> f64 {
        let empty = self.config.battery_empty_volts;
        let full = self.config.battery_full_volts;
        ((voltage - empty) / (full - empty) * 100.0).clamp(0.0, 100.0)
    }
}

fn read<H: RobotHardware + ?Sized>(
    hw: &mut H,
    channel: SensorChannel,
) -> Result<Option<f64>, HardwareError> {
    match hw.read_sensor_channel(channel) {
        Ok(raw) if raw.is_finite() => Ok(Some(raw)),
        Ok(raw) => {
            debug!("Sensor {} returned non-finite value {}", channel, raw);
            Ok(None)
        }
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            debug!("Sensor {} read failed: {}", channel, e);
            Ok(None)
        }
    }
}

/// All three axes, or `None` if any axis failed
fn read_axes<H: RobotHardware + ?Sized>(
    hw: &mut H,
    channel: fn(Axis) -> SensorChannel,
    scale: f64,
) -> Result<Option<[f64; 3]>, HardwareError> {
    let mut out = [0.0; 3];
    for (slot, axis) in out.iter_mut().zip(Axis::ALL) {
        match read(hw, channel(axis))? {
            Some(raw) => *slot = raw * scale,
            None => return Ok(None),
        }
    }
    Ok(Some(out))
}

fn range_reading(channel: SensorChannel, reading: Option<f64>) -> RangeReading {
    RangeReading {
        channel,
        range: reading.unwrap_or(0.0),
        valid: reading.is_some(),
    }
}
