// Differential base built from two Feetech servos in wheel (velocity) mode
//
// Wheel encoders are the servos' 12-bit present-position counters. The right
// servo is mounted mirrored, so its velocity and position are negated.

use std::f64::consts::PI;

use tracing::{debug, info, warn};

use super::feetech::{FeetechBus, FeetechError, OperatingMode, Register};
use super::{EncoderReading, HardwareError, RobotHardware, SensorChannel};
use crate::config::HardwareConfig;
use crate::kinematics::WheelSetpoint;

/// Servo resolution: 4096 steps per revolution
const STEPS_PER_REVOLUTION: f64 = 4096.0;
const STEPS_PER_RAD: f64 = STEPS_PER_REVOLUTION / (2.0 * PI);

/// Raw goal velocity limit (steps/s)
const MAX_RAW_VELOCITY: f64 = 3400.0;

pub struct FeetechBase {
    bus: FeetechBus,
    left_id: u8,
    right_id: u8,
    released: bool,
}

/// rad/s to raw steps/s, saturating at the servo limit
fn radps_to_raw(radps: f64) -> i16 {
    (radps * STEPS_PER_RAD)
        .round()
        .clamp(-MAX_RAW_VELOCITY, MAX_RAW_VELOCITY) as i16
}

/// Mirror a 12-bit position so both counters increase when driving forward
fn mirror_position(raw: u16) -> i64 {
    let modulus = STEPS_PER_REVOLUTION as i64;
    (modulus - raw as i64).rem_euclid(modulus)
}

fn classify(e: FeetechError, wrap: fn(String) -> HardwareError) -> HardwareError {
    if e.is_disconnect() {
        HardwareError::Disconnected(e.to_string())
    } else {
        wrap(e.to_string())
    }
}

impl FeetechBase {
    /// Open the bus and put both servos into velocity mode
    pub fn open(config: &HardwareConfig) -> Result<Self, FeetechError> {
        info!("Opening motor bus on {} @ {} baud", config.port, config.baudrate);
        let bus = FeetechBus::open(&config.port, config.baudrate)?;
        let mut base = Self {
            bus,
            left_id: config.left_motor_id,
            right_id: config.right_motor_id,
            released: false,
        };
        base.initialize()?;
        Ok(base)
    }

    fn ids(&self) -> [u8; 2] {
        [self.left_id, self.right_id]
    }

    /// Disables torque, sets velocity mode, and re-enables torque.
    fn initialize(&mut self) -> Result<(), FeetechError> {
        info!("Initializing motors {:?} for velocity control", self.ids());

        for id in self.ids() {
            match self.bus.ping(id)? {
                true => debug!("Motor {} responding", id),
                false => {
                    warn!("Motor {} not responding to ping", id);
                    return Err(FeetechError::Timeout { id });
                }
            }
        }

        // Torque must be off before changing operating mode
        for id in self.ids() {
            self.bus.disable_torque(id)?;
            self.bus.set_operating_mode(id, OperatingMode::Velocity)?;
            self.bus.enable_torque(id)?;
        }

        info!("Motors initialized successfully");
        Ok(())
    }

    fn stop(&mut self) -> Result<(), FeetechError> {
        self.bus.sync_write_i16(
            Register::GoalVelocity,
            &[(self.left_id, 0), (self.right_id, 0)],
        )
    }
}

impl RobotHardware for FeetechBase {
    fn write_wheel_setpoints(&mut self, setpoint: WheelSetpoint) -> Result<(), HardwareError> {
        let left = radps_to_raw(setpoint.left);
        let right = radps_to_raw(-setpoint.right);
        debug!("Setting wheel velocities: left={}, right={}", left, right);

        self.bus
            .sync_write_i16(
                Register::GoalVelocity,
                &[(self.left_id, left), (self.right_id, right)],
            )
            .map_err(|e| classify(e, HardwareError::Write))
    }

    fn read_encoders(&mut self) -> Result<EncoderReading, HardwareError> {
        let ids = self.ids();
        let positions = self
            .bus
            .sync_read_u16(Register::PresentPosition, &ids)
            .map_err(|e| classify(e, HardwareError::Read))?;

        match positions.as_slice() {
            [left, right] => Ok(EncoderReading::new(
                *left as i64 & 0x0FFF,
                mirror_position(*right & 0x0FFF),
            )),
            other => Err(HardwareError::Read(format!(
                "Expected 2 positions, got {}",
                other.len()
            ))),
        }
    }

    fn read_sensor_channel(&mut self, channel: SensorChannel) -> Result<f64, HardwareError> {
        match channel {
            // Both servos share the supply; either one reports the pack voltage
            SensorChannel::BatteryVoltage => self
                .bus
                .read_u8(self.left_id, Register::PresentVoltage)
                .map(f64::from)
                .map_err(|e| {
                    if e.is_disconnect() {
                        HardwareError::Disconnected(e.to_string())
                    } else {
                        debug!("Battery read failed: {}", e);
                        HardwareError::SensorUnavailable(channel)
                    }
                }),
            _ => Err(HardwareError::SensorUnavailable(channel)),
        }
    }

    fn release(&mut self) -> Result<(), HardwareError> {
        info!("Disabling torque on all motors");
        self.released = true;
        for id in self.ids() {
            self.bus
                .disable_torque(id)
                .map_err(|e| classify(e, HardwareError::Write))?;
        }
        Ok(())
    }
}

impl Drop for FeetechBase {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        // Try to stop motors when the base is dropped without a clean release
        if let Err(e) = self.stop() {
            warn!("Failed to stop motors on drop: {}", e);
        }
    }
}
