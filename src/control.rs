// Control loop: one sense-actuate-integrate cycle per tick, plus the
// Uninitialized -> Running -> ShuttingDown lifecycle around the hardware.

use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::config::{ConfigError, RobotGeometry, RuntimeConfig};
use crate::hardware::{HardwareError, RobotHardware};
use crate::kinematics::{WheelSetpoint, to_wheel_speeds};
use crate::messages::{Odometry, Quaternion, RuntimeHealth, Stamp, Transform, VelocityCommand};
use crate::odometry::OdometryIntegrator;
use crate::sensors::{SCAN_FRAME, SensorFrame, SensorSampler};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Uninitialized,
    Running,
    ShuttingDown,
}

/// Latest command together with when it arrived
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StampedCommand {
    pub command: VelocityCommand,
    pub received_at: Instant,
}

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("Control loop is not running (state: {0:?})")]
    NotRunning(LoopState),

    #[error("Fatal hardware fault: {0}")]
    Fatal(#[source] HardwareError),
}

/// Everything produced by one cycle, ready for publication
#[derive(Debug, Clone)]
pub struct CycleReport {
    /// Setpoint computed this cycle
    pub setpoint: WheelSetpoint,
    /// Whether the hardware accepted `setpoint`
    pub written: bool,
    pub odometry: Odometry,
    pub frame: SensorFrame,
    pub health: RuntimeHealth,
}

impl CycleReport {
    /// Frame tree for this cycle: the odometry pose, then the scanner mount
    pub fn transforms(&self) -> [Transform; 2] {
        let stamp = self.odometry.stamp;
        [
            self.odometry.transform(),
            Transform::planar(stamp, &self.odometry.child_frame_id, SCAN_FRAME, 0.0, 0.0, 0.0),
        ]
    }
}

pub struct ControlLoop<H: RobotHardware> {
    state: LoopState,
    hardware: Option<H>,
    geometry: RobotGeometry,
    period: Duration,
    cmd_timeout: Duration,
    write_retry_budget: u32,
    read_retry_budget: u32,
    odometry: OdometryIntegrator,
    sampler: SensorSampler,
    last_setpoint: WheelSetpoint,
    write_failures: u32,
    read_failures: u32,
    cmd_stale: bool,
}

impl<H: RobotHardware> ControlLoop<H> {
    pub fn new(config: &RuntimeConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            state: LoopState::Uninitialized,
            hardware: None,
            geometry: config.geometry,
            period: config.period(),
            cmd_timeout: config.cmd_timeout(),
            write_retry_budget: config.write_retry_budget,
            read_retry_budget: config.read_retry_budget,
            odometry: OdometryIntegrator::from_config(config),
            sampler: SensorSampler::new(config.sensors.clone()),
            last_setpoint: WheelSetpoint::zero(),
            write_failures: 0,
            read_failures: 0,
            cmd_stale: true, // Start stale until first cmd
        })
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Last setpoint the hardware accepted
    pub fn last_setpoint(&self) -> WheelSetpoint {
        self.last_setpoint
    }

    /// Take ownership of acquired hardware and begin running
    pub fn start(&mut self, hardware: H) {
        if self.state != LoopState::Uninitialized {
            warn!("Ignoring start in state {:?}", self.state);
            return;
        }
        self.hardware = Some(hardware);
        self.state = LoopState::Running;
        info!(
            "Control loop running: period {}ms, command timeout {}ms",
            self.period.as_millis(),
            self.cmd_timeout.as_millis()
        );
    }

    /// Command to act on this cycle; zero when missing or older than the timeout
    fn resolve_command(&mut self, latest: Option<StampedCommand>, now: Instant) -> VelocityCommand {
        match latest {
            Some(stamped) => {
                let age = now.saturating_duration_since(stamped.received_at);
                if age > self.cmd_timeout {
                    if !self.cmd_stale {
                        warn!("Command stale ({:?} old), stopping robot", age);
                    }
                    self.cmd_stale = true;
                    VelocityCommand::zero()
                } else {
                    if self.cmd_stale {
                        info!("Fresh command received, resuming");
                    }
                    self.cmd_stale = false;
                    stamped.command
                }
            }
            // No command ever received
            None => {
                self.cmd_stale = true;
                VelocityCommand::zero()
            }
        }
    }

    /// Run one cycle
    pub fn tick(
        &mut self,
        latest: Option<StampedCommand>,
        now: Instant,
    ) -> Result<CycleReport, ControlError> {
        if self.state != LoopState::Running {
            return Err(ControlError::NotRunning(self.state));
        }

        // 1. Command with watchdog
        let command = self.resolve_command(latest, now);

        // 2. Actuate
        let setpoint = to_wheel_speeds(&command, &self.geometry);
        let result = match self.hardware.as_mut() {
            Some(hw) => hw.write_wheel_setpoints(setpoint),
            None => return Err(ControlError::NotRunning(self.state)),
        };
        let written = match result {
            Ok(()) => {
                self.write_failures = 0;
                self.last_setpoint = setpoint;
                true
            }
            Err(e) if e.is_fatal() => return Err(self.fail(e)),
            Err(e) => {
                self.write_failures += 1;
                warn!(
                    "Wheel write failed ({}/{}): {}",
                    self.write_failures, self.write_retry_budget, e
                );
                if self.write_failures > self.write_retry_budget {
                    return Err(self.fail(e));
                }
                false
            }
        };

        // 3. Sense
        let read = match self.hardware.as_mut() {
            Some(hw) => hw.read_encoders(),
            None => return Err(ControlError::NotRunning(self.state)),
        };
        let encoders = match read {
            Ok(reading) => {
                self.read_failures = 0;
                Some(reading)
            }
            Err(e) if e.is_fatal() => return Err(self.fail(e)),
            Err(e) => {
                self.read_failures += 1;
                warn!(
                    "Encoder read failed ({}/{}): {}",
                    self.read_failures, self.read_retry_budget, e
                );
                if self.read_failures > self.read_retry_budget {
                    return Err(self.fail(e));
                }
                None
            }
        };
        let stamp = Stamp::now();
        let sampled = match self.hardware.as_mut() {
            Some(hw) => self.sampler.sample(hw, stamp),
            None => return Err(ControlError::NotRunning(self.state)),
        };
        let frame = match sampled {
            Ok(frame) => frame,
            Err(e) => return Err(self.fail(e)),
        };

        // 4. Integrate
        let step = self.odometry.update(encoders);
        let dt = self.period.as_secs_f64();
        let odometry = Odometry {
            stamp,
            frame_id: "odom".to_string(),
            child_frame_id: "base_footprint".to_string(),
            x: step.pose.x,
            y: step.pose.y,
            heading: step.pose.heading,
            orientation: Quaternion::from_yaw(step.pose.heading),
            linear_velocity: step.distance / dt,
            angular_velocity: step.rotation / dt,
        };

        // Hardware trouble outranks an idle robot
        let health = if !written || step.degraded || frame.is_degraded() {
            RuntimeHealth::SensorDegraded
        } else if self.cmd_stale {
            RuntimeHealth::CmdStale
        } else {
            RuntimeHealth::Ok
        };
        debug!(
            "Cycle: cmd=({:.3}, {:.3}) wheels=({:.3}, {:.3}) pose=({:.3}, {:.3}, {:.3})",
            command.linear,
            command.angular,
            setpoint.left,
            setpoint.right,
            step.pose.x,
            step.pose.y,
            step.pose.heading
        );

        // 5. Hand back for publication
        Ok(CycleReport {
            setpoint,
            written,
            odometry,
            frame,
            health,
        })
    }

    fn fail(&mut self, e: HardwareError) -> ControlError {
        error!("Fatal hardware fault: {}", e);
        self.shutdown();
        ControlError::Fatal(e)
    }

    /// Stop the wheels, release the hardware and enter ShuttingDown.
    /// Returns false if already shutting down.
    pub fn shutdown(&mut self) -> bool {
        if self.state == LoopState::ShuttingDown {
            return false;
        }
        info!("Shutting down control loop");

        if let Some(mut hw) = self.hardware.take() {
            if let Err(e) = hw.write_wheel_setpoints(WheelSetpoint::zero()) {
                warn!("Failed to stop wheels during shutdown: {}", e);
            } else {
                self.last_setpoint = WheelSetpoint::zero();
            }
            if let Err(e) = hw.release() {
                warn!("Failed to release hardware: {}", e);
            }
        }

        self.state = LoopState::ShuttingDown;
        true
    }
}
