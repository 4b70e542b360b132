// Fixed-rate control loop with watchdog
// If teleop stops sending commands the base is brought to a stop while the
// torso holds its last target.

use std::time::Instant;
use tokio::time::interval;
use tracing::{info, warn};
use zenoh::pubsub::Publisher;

use crate::base::{
    BodyTwist, CyclicBus, DriveError, LinkWait, OdometryReading, OmniBase, ServiceBus,
};
use crate::config::{
    BaseConfig, CMD_TIMEOUT, TOPIC_CMD_BASE, TOPIC_DRIVES, TOPIC_HEALTH, TOPIC_ODOMETRY,
    loop_period,
};
use crate::messages::{BaseCommand, DrivesMessage, OdometryMessage, RuntimeHealth};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Command actually sent to the base this tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickCommand {
    pub twist: BodyTwist,
    pub torso_position: f64,
}

pub struct Runtime {
    latest_cmd: Option<BaseCommand>,
    cmd_received_at: Instant,
    torso_target: f64,
    health: RuntimeHealth,
    // Warning latches, independent of the per-tick health
    stale_reported: bool,
    bus_faulted: bool,
}

impl Runtime {
    /// `torso_position` is held until a command asks for another height
    pub fn new(torso_position: f64) -> Self {
        Self {
            latest_cmd: None,
            cmd_received_at: Instant::now(),
            torso_target: torso_position,
            health: RuntimeHealth::CmdStale, // Start stale until first cmd
            stale_reported: false,
            bus_faulted: false,
        }
    }

    pub fn health(&self) -> RuntimeHealth {
        self.health
    }

    /// Process incoming command. Invalid commands are dropped and do not
    /// feed the watchdog.
    pub fn on_command(&mut self, cmd: BaseCommand, now: Instant) {
        if let Err(e) = cmd.check() {
            warn!("Ignoring command {:?}: {}", &cmd, e);
            return;
        }
        info!("Received command: {:?}", &cmd);
        if let Some(torso) = cmd.torso_pos {
            self.torso_target = torso;
        }
        self.latest_cmd = Some(cmd);
        self.cmd_received_at = now;
    }

    /// Compute this tick's command based on watchdog state
    pub fn compute_command(&mut self, now: Instant) -> TickCommand {
        let cmd_age = now.saturating_duration_since(self.cmd_received_at);

        let twist = match self.latest_cmd {
            Some(ref cmd) if cmd_age <= CMD_TIMEOUT => {
                self.health = RuntimeHealth::Ok;
                self.stale_reported = false;
                BodyTwist::from(cmd)
            }
            Some(_) => {
                // Watchdog triggered - stop the base
                if !self.stale_reported {
                    warn!("Command stale ({:?} old), stopping base", cmd_age);
                    self.stale_reported = true;
                }
                self.health = RuntimeHealth::CmdStale;
                BodyTwist::zero()
            }
            None => {
                // No command ever received
                self.health = RuntimeHealth::CmdStale;
                BodyTwist::zero()
            }
        };

        TickCommand {
            twist,
            torso_position: self.torso_target,
        }
    }

    /// Bus failure during this tick. Returns true when the fault is newly
    /// logged; a run of faulted ticks is logged once.
    pub fn on_bus_fault(&mut self, err: &DriveError) -> bool {
        self.health = RuntimeHealth::BusFault;
        if self.bus_faulted {
            return false;
        }
        warn!("Bus fault: {}", err);
        self.bus_faulted = true;
        true
    }

    /// Drive and odometry succeeded this tick
    pub fn on_bus_ok(&mut self) {
        if self.bus_faulted {
            info!("Bus exchange recovered");
            self.bus_faulted = false;
        }
    }
}

pub async fn run<B>(bus: B, config: &BaseConfig, loop_hz: u64) -> Result<(), BoxError>
where
    B: CyclicBus + ServiceBus,
{
    let mut base = OmniBase::new(bus, config)?;
    tokio::task::block_in_place(|| base.initialize(LinkWait::default()))?;

    // First read records the odometry baseline and the torso height to hold
    let start = base.odometry()?;

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let subscriber = session.declare_subscriber(TOPIC_CMD_BASE).await?;
    let pub_odometry = session.declare_publisher(TOPIC_ODOMETRY).await?;
    let pub_drives = session.declare_publisher(TOPIC_DRIVES).await?;
    let pub_health = session.declare_publisher(TOPIC_HEALTH).await?;

    let mut runtime = Runtime::new(start.torso_position);
    let mut tick = interval(loop_period(loop_hz));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    info!(
        "Runtime started: {}Hz loop, {}ms watchdog timeout",
        loop_hz,
        CMD_TIMEOUT.as_millis()
    );
    info!("Subscribed to: {}", TOPIC_CMD_BASE);
    info!(
        "Publishing to: {}, {}, {}",
        TOPIC_ODOMETRY, TOPIC_DRIVES, TOPIC_HEALTH
    );

    let result: Result<(), BoxError> = loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Ctrl-C received");
                break Ok(());
            }
            _ = tick.tick() => {}
        }

        // 1. Drain all pending commands (non-blocking), keep latest
        while let Ok(Some(sample)) = subscriber.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<BaseCommand>(&payload) {
                Ok(cmd) => runtime.on_command(cmd, Instant::now()),
                Err(e) => warn!("Failed to parse command: {}", e),
            }
        }

        // 2. Compute command (includes watchdog logic) and drive
        let command = runtime.compute_command(Instant::now());
        let reading = base
            .drive(&command.twist, command.torso_position)
            .and_then(|_| base.odometry());
        match reading {
            Ok(_) => runtime.on_bus_ok(),
            Err(ref e) => {
                runtime.on_bus_fault(e);
            }
        }

        // 3. Publish state
        let published = publish_state(
            &runtime,
            &base,
            reading,
            &pub_odometry,
            &pub_drives,
            &pub_health,
        )
        .await;
        if let Err(e) = published {
            break Err(e);
        }
    };

    with_shutdown(result, base.shutdown())
}

/// Combine the loop outcome with the shutdown outcome, keeping the loop's
/// error when both failed
fn with_shutdown(
    result: Result<(), BoxError>,
    shutdown: Result<(), DriveError>,
) -> Result<(), BoxError> {
    match (result, shutdown) {
        (Ok(()), shutdown) => shutdown.map_err(Into::into),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(shutdown_err)) => {
            warn!("Shutdown failed after runtime error: {}", shutdown_err);
            Err(e)
        }
    }
}

async fn publish_state<B: CyclicBus + ServiceBus>(
    runtime: &Runtime,
    base: &OmniBase<B>,
    reading: Result<OdometryReading, DriveError>,
    pub_odometry: &Publisher<'_>,
    pub_drives: &Publisher<'_>,
    pub_health: &Publisher<'_>,
) -> Result<(), BoxError> {
    if let Ok(reading) = reading {
        let odometry_json = serde_json::to_string(&OdometryMessage::from(&reading))?;
        pub_odometry.put(odometry_json).await?;
    }

    let drives = DrivesMessage {
        status: base.status(),
        comm: base.comm_status(),
    };
    pub_drives.put(serde_json::to_string(&drives)?).await?;

    // Health last, so subscribers see it after the state it describes
    let health_json = serde_json::to_string(&runtime.health())?;
    pub_health.put(health_json).await?;
    Ok(())
}
