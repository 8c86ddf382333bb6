//! Scriptable in-memory backend for tests

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use super::{EncoderReading, HardwareError, RobotHardware, SensorChannel};
use crate::kinematics::WheelSetpoint;

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Write(WheelSetpoint),
    ReadEncoders,
    Release,
}

/// Failure to inject on the next calls
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Fault {
    None,
    Transient,
    Disconnected,
}

pub struct MockHardware {
    pub log: Arc<Mutex<Vec<Event>>>,
    pub encoders: EncoderReading,
    pub sensors: HashMap<SensorChannel, f64>,
    pub failing_channels: HashSet<SensorChannel>,
    pub write_fault: Fault,
    pub read_fault: Fault,
    /// Applies to every sensor channel
    pub sensor_fault: Fault,
}

impl MockHardware {
    pub fn new() -> Self {
        Self {
            log: Arc::new(Mutex::new(Vec::new())),
            encoders: EncoderReading::new(0, 0),
            sensors: HashMap::new(),
            failing_channels: HashSet::new(),
            write_fault: Fault::None,
            read_fault: Fault::None,
            sensor_fault: Fault::None,
        }
    }

    pub fn with_sensor(mut self, channel: SensorChannel, raw: f64) -> Self {
        self.sensors.insert(channel, raw);
        self
    }

    pub fn events(log: &Arc<Mutex<Vec<Event>>>) -> Vec<Event> {
        log.lock().unwrap().clone()
    }

    fn record(&self, event: Event) {
        self.log.lock().unwrap().push(event);
    }
}

impl RobotHardware for MockHardware {
    fn write_wheel_setpoints(&mut self, setpoint: WheelSetpoint) -> Result<(), HardwareError> {
        match self.write_fault {
            Fault::Transient => Err(HardwareError::Write("nak".into())),
            Fault::Disconnected => Err(HardwareError::Disconnected("unplugged".into())),
            Fault::None => {
                self.record(Event::Write(setpoint));
                Ok(())
            }
        }
    }

    fn read_encoders(&mut self) -> Result<EncoderReading, HardwareError> {
        self.record(Event::ReadEncoders);
        match self.read_fault {
            Fault::Transient => Err(HardwareError::Read("timeout".into())),
            Fault::Disconnected => Err(HardwareError::Disconnected("unplugged".into())),
            Fault::None => Ok(self.encoders),
        }
    }

    fn read_sensor_channel(&mut self, channel: SensorChannel) -> Result<f64, HardwareError> {
        if self.sensor_fault == Fault::Disconnected {
            return Err(HardwareError::Disconnected("unplugged".into()));
        }
        if self.sensor_fault == Fault::Transient || self.failing_channels.contains(&channel) {
            return Err(HardwareError::SensorUnavailable(channel));
        }
        self.sensors
            .get(&channel)
            .copied()
            .ok_or(HardwareError::SensorUnavailable(channel))
    }

    fn release(&mut self) -> Result<(), HardwareError> {
        self.record(Event::Release);
        Ok(())
    }
}
