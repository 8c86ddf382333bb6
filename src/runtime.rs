// Zenoh wiring around the control loop
// Commands arrive on their own task and land in a single-slot mailbox; the
// periodic tick reads whatever is newest, runs one cycle and publishes.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;
use tokio::time::interval; // tokio is an async runtime for Rust
use tracing::{debug, error, info, warn};
use zenoh::Session;

use crate::config::{
    RuntimeConfig, TOPIC_BATTERY, TOPIC_CMD_VEL, TOPIC_HEALTH, TOPIC_IMU, TOPIC_ODOM,
    TOPIC_RANGE_PREFIX, TOPIC_SCAN, TOPIC_TF,
};
use crate::control::{ControlError, ControlLoop, CycleReport, StampedCommand};
use crate::hardware::FeetechBase;
use crate::messages::{RuntimeHealth, VelocityCommand};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Latest velocity command and its arrival time. Writers overwrite, readers
/// always see the newest value; nothing queues.
pub struct CommandMailbox {
    slot: watch::Sender<Option<StampedCommand>>,
}

impl CommandMailbox {
    pub fn new() -> Self {
        let (slot, _) = watch::channel(None);
        Self { slot }
    }

    pub fn post(&self, command: VelocityCommand) {
        self.post_at(command, Instant::now());
    }

    pub fn post_at(&self, command: VelocityCommand, received_at: Instant) {
        self.slot.send_replace(Some(StampedCommand {
            command,
            received_at,
        }));
    }

    pub fn latest(&self) -> Option<StampedCommand> {
        *self.slot.borrow()
    }
}

impl Default for CommandMailbox {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a command payload; non-finite velocities are rejected
pub fn parse_command(payload: &[u8]) -> Result<VelocityCommand, String> {
    let cmd: VelocityCommand = serde_json::from_slice(payload).map_err(|e| e.to_string())?;
    if !cmd.is_finite() {
        return Err(format!("non-finite velocity {:?}", cmd));
    }
    Ok(cmd)
}

async fn put_json<T: serde::Serialize>(session: &Session, topic: &str, msg: &T) {
    let payload = match serde_json::to_string(msg) {
        Ok(json) => json,
        Err(e) => {
            warn!("Failed to serialize message for {}: {}", topic, e);
            return;
        }
    };
    if let Err(e) = session.put(topic, payload).await {
        warn!("Failed to publish on {}: {}", topic, e);
    }
}

async fn publish(session: &Session, report: &CycleReport, scan_time: f64) {
    put_json(session, TOPIC_ODOM, &report.odometry).await;
    put_json(session, TOPIC_TF, &report.transforms()).await;

    for (name, range) in report.frame.range_messages() {
        let topic = format!("{}/{}", TOPIC_RANGE_PREFIX, name);
        put_json(session, &topic, &range).await;
    }
    if let Some(scan) = report.frame.laser_scan(scan_time) {
        put_json(session, TOPIC_SCAN, &scan).await;
    }
    if let Some(imu) = report.frame.imu_message() {
        put_json(session, TOPIC_IMU, &imu).await;
    }
    if let Some(battery) = report.frame.battery_message() {
        put_json(session, TOPIC_BATTERY, &battery).await;
    }

    put_json(session, TOPIC_HEALTH, &report.health).await;
}

pub async fn run(config: RuntimeConfig) -> Result<(), BoxError> {
    let mut control: ControlLoop<FeetechBase> = ControlLoop::new(&config)?;

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let subscriber = session.declare_subscriber(TOPIC_CMD_VEL).await?;
    let mailbox = Arc::new(CommandMailbox::new());

    let inbox = mailbox.clone();
    tokio::spawn(async move {
        while let Ok(sample) = subscriber.recv_async().await {
            let payload = sample.payload().to_bytes();
            match parse_command(&payload) {
                Ok(cmd) => {
                    debug!("Received command: {:?}", cmd);
                    inbox.post(cmd);
                }
                Err(e) => warn!("Failed to parse command: {}", e),
            }
        }
        info!("Command subscriber closed");
    });

    // Hardware acquisition moves the loop to Running
    let hardware = FeetechBase::open(&config.hardware)?;
    control.start(hardware);

    let period = config.period();
    let mut tick = interval(period);

    info!(
        "Runtime started: {}ms period, {}ms watchdog timeout",
        period.as_millis(),
        config.cmd_timeout().as_millis()
    );
    info!("Subscribed to: {}", TOPIC_CMD_VEL);
    info!("Publishing to: {}, {}, ...", TOPIC_ODOM, TOPIC_HEALTH);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = &mut shutdown => {
                info!("Shutdown requested");
                control.shutdown();
                put_json(&session, TOPIC_HEALTH, &RuntimeHealth::ShuttingDown).await;
                return Ok(());
            }
        }

        match control.tick(mailbox.latest(), Instant::now()) {
            Ok(report) => publish(&session, &report, period.as_secs_f64()).await,
            Err(e @ ControlError::Fatal(_)) => {
                error!("Control loop stopped: {}", e);
                put_json(&session, TOPIC_HEALTH, &RuntimeHealth::ShuttingDown).await;
                return Err(e.into());
            }
            Err(e) => return Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_mailbox_keeps_latest_only() {
        let mailbox = CommandMailbox::new();
        assert!(mailbox.latest().is_none());

        let t0 = Instant::now();
        mailbox.post_at(VelocityCommand::new(0.1, 0.0), t0);
        mailbox.post_at(VelocityCommand::new(0.2, 0.5), t0 + Duration::from_millis(10));

        let latest = mailbox.latest().unwrap();
        assert_eq!(latest.command, VelocityCommand::new(0.2, 0.5));
        assert_eq!(latest.received_at, t0 + Duration::from_millis(10));
    }

    #[test]
    fn test_mailbox_shared_across_threads() {
        let mailbox = Arc::new(CommandMailbox::new());
        let writer = mailbox.clone();
        std::thread::spawn(move || writer.post(VelocityCommand::new(0.3, -0.3)))
            .join()
            .unwrap();
        assert_eq!(
            mailbox.latest().map(|s| s.command),
            Some(VelocityCommand::new(0.3, -0.3))
        );
    }

    #[test]
    fn test_parse_command() {
        assert_eq!(
            parse_command(br#"{"linear":0.1,"angular":0.0}"#).unwrap(),
            VelocityCommand::new(0.1, 0.0)
        );
        assert!(parse_command(b"not json").is_err());
        assert!(parse_command(br#"{"linear":0.1}"#).is_err());
    }
}
