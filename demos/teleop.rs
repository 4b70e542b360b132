// Keyboard teleop: WASD move, Z/X rotate, T/G torso, R/F speed, Q quit
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use std::time::{Duration, Instant};
use tracing::{info, warn};
use zenoh::handlers::FifoChannelHandler;
use zenoh::sample::Sample;

use omni_base_runtime::config::{
    TOPIC_CMD_BASE, TOPIC_ODOMETRY, TORSO_MAX_POSITION, TORSO_MIN_POSITION,
};
use omni_base_runtime::messages::{BaseCommand, OdometryMessage};

const SPEEDS: [f64; 3] = [0.05, 0.15, 0.3]; // m/s
const THETA_SPEEDS: [f64; 3] = [15.0, 45.0, 90.0]; // deg/s
const TORSO_STEP: f64 = 0.01; // m per key press
const INPUT_TIMEOUT: Duration = Duration::from_millis(100); // velocities reset after this long idle

/// Key-driven command state
#[derive(Debug)]
struct Teleop {
    speed_idx: usize,
    x_vel: f64,
    y_vel: f64,
    theta_deg: f64,
    last_movement_input: Instant,
    /// Torso target, once the operator has moved it
    torso_target: Option<f64>,
    /// Latest torso height reported by the runtime
    measured_torso: Option<f64>,
}

impl Teleop {
    fn new(now: Instant) -> Self {
        Self {
            speed_idx: 0,
            x_vel: 0.0,
            y_vel: 0.0,
            theta_deg: 0.0,
            last_movement_input: now,
            torso_target: None,
            measured_torso: None,
        }
    }

    fn on_odometry(&mut self, msg: &OdometryMessage) {
        self.measured_torso = Some(msg.torso_pos);
    }

    /// Apply one key press. Returns false when the operator quits.
    fn handle_key(&mut self, code: KeyCode, now: Instant) -> bool {
        let speed = SPEEDS[self.speed_idx];
        let theta = THETA_SPEEDS[self.speed_idx];
        match code {
            KeyCode::Char('w') => self.set_motion(now, Some(speed), None, None),
            KeyCode::Char('s') => self.set_motion(now, Some(-speed), None, None),
            KeyCode::Char('a') => self.set_motion(now, None, Some(speed), None),
            KeyCode::Char('d') => self.set_motion(now, None, Some(-speed), None),
            KeyCode::Char('z') => self.set_motion(now, None, None, Some(theta)),
            KeyCode::Char('x') => self.set_motion(now, None, None, Some(-theta)),
            KeyCode::Char('t') => self.jog_torso(TORSO_STEP),
            KeyCode::Char('g') => self.jog_torso(-TORSO_STEP),
            KeyCode::Char('r') => {
                self.speed_idx = (self.speed_idx + 1).min(2);
                print_speed(self.speed_idx);
            }
            KeyCode::Char('f') => {
                self.speed_idx = self.speed_idx.saturating_sub(1);
                print_speed(self.speed_idx);
            }
            KeyCode::Char('q') | KeyCode::Esc => return false,
            _ => {}
        }
        true
    }

    fn set_motion(&mut self, now: Instant, x: Option<f64>, y: Option<f64>, theta: Option<f64>) {
        self.x_vel = x.unwrap_or(self.x_vel);
        self.y_vel = y.unwrap_or(self.y_vel);
        self.theta_deg = theta.unwrap_or(self.theta_deg);
        self.last_movement_input = now;
    }

    /// Step the torso target from the last target, or from the measured
    /// height on the first press
    fn jog_torso(&mut self, step: f64) {
        let Some(current) = self.torso_target.or(self.measured_torso) else {
            warn!("No odometry from the runtime yet, torso key ignored");
            return;
        };
        let next = (current + step).clamp(TORSO_MIN_POSITION, TORSO_MAX_POSITION);
        info!("Torso target: {:.2} m", next);
        self.torso_target = Some(next);
    }

    /// Command to publish now; velocities expire, the torso target persists
    fn command(&mut self, now: Instant) -> BaseCommand {
        if now.saturating_duration_since(self.last_movement_input) > INPUT_TIMEOUT {
            self.x_vel = 0.0;
            self.y_vel = 0.0;
            self.theta_deg = 0.0;
        }
        BaseCommand {
            x_vel: self.x_vel,
            y_vel: self.y_vel,
            theta_vel: self.theta_deg.to_radians(),
            torso_pos: self.torso_target,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let publisher = session.declare_publisher(TOPIC_CMD_BASE).await?;
    let odometry = session.declare_subscriber(TOPIC_ODOMETRY).await?;

    info!("Controls: WASD=move, Z/X=rotate, T/G=torso up/down, R/F=speed, Q=quit");
    info!("Speed: LOW");

    enable_raw_mode()?;
    let result = run_teleop(&publisher, &odometry).await;
    disable_raw_mode()?;

    result
}

async fn run_teleop(
    publisher: &zenoh::pubsub::Publisher<'_>,
    odometry: &zenoh::pubsub::Subscriber<FifoChannelHandler<Sample>>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut teleop = Teleop::new(Instant::now());

    loop {
        // Poll for key with 20ms timeout (50Hz effective rate)
        if event::poll(Duration::from_millis(20))? {
            if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                let pressed = kind == KeyEventKind::Press || kind == KeyEventKind::Repeat;
                if pressed && !teleop.handle_key(code, Instant::now()) {
                    break;
                }
            }
        }

        // Keep the measured torso height current
        while let Ok(Some(sample)) = odometry.try_recv() {
            let payload = sample.payload().to_bytes();
            if let Ok(msg) = serde_json::from_slice::<OdometryMessage>(&payload) {
                teleop.on_odometry(&msg);
            }
        }

        // Always publish at ~50Hz
        let cmd = teleop.command(Instant::now());
        publisher.put(serde_json::to_string(&cmd)?).await?;
    }

    Ok(())
}

fn print_speed(idx: usize) {
    let label = ["LOW", "MED", "HIGH"][idx];
    info!("Speed: {}", label);
}
