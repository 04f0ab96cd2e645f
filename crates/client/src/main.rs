mod motion;

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver};
use std::time::{Duration, Instant};

use clap::Parser;

use motion::OrbitMotion;
use posync::net::{DEFAULT_MAX_ATTEMPTS, SessionError};
use posync::{NetworkSession, SessionConfig, SessionEvent, SharedPose};

const FRAME_INTERVAL: Duration = Duration::from_millis(16);
const REPORT_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Parser)]
#[command(name = "client")]
#[command(about = "Headless position-sync client")]
struct Args {
    #[arg(
        short,
        long,
        default_value = "127.0.0.1:8080",
        help = "Server address to request a port from"
    )]
    server: SocketAddr,

    #[arg(
        long,
        default_value = "0.0.0.0",
        help = "Local address to bind sockets to"
    )]
    bind: IpAddr,

    #[arg(
        short,
        long,
        default_value_t = posync::DEFAULT_TICK_RATE,
        help = "Position updates per second"
    )]
    tick_rate: u32,

    #[arg(long, default_value_t = 5, help = "Seconds between port requests")]
    retry_secs: u64,

    #[arg(
        long,
        default_value_t = DEFAULT_MAX_ATTEMPTS,
        help = "Port requests before giving up (0 retries forever)"
    )]
    max_attempts: u32,

    #[arg(long, default_value_t = 5.0, help = "Radius of the synthetic orbit")]
    radius: f32,

    #[arg(long, help = "Also send a movement intent once per second")]
    send_moves: bool,

    #[arg(long, help = "Exit after this many seconds")]
    duration: Option<u64>,
}

impl Args {
    fn session_config(&self) -> SessionConfig {
        SessionConfig {
            server_addr: self.server,
            bind_ip: self.bind,
            tick_rate: self.tick_rate,
            handshake_retry_interval: Duration::from_secs(self.retry_secs),
            max_handshake_attempts: (self.max_attempts > 0).then_some(self.max_attempts),
            ..Default::default()
        }
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let motion = OrbitMotion {
        radius: args.radius,
        ..Default::default()
    };

    let pose = Arc::new(SharedPose::new(motion.pose_at(Duration::ZERO)));
    let (tx, events) = mpsc::channel();
    let session = NetworkSession::start(args.session_config(), pose.clone(), Arc::new(tx))?;

    run(&args, &session, &pose, &motion, &events);

    session.shutdown();
    log_stats(&session);
    Ok(())
}

fn run(
    args: &Args,
    session: &NetworkSession,
    pose: &SharedPose,
    motion: &OrbitMotion,
    events: &Receiver<SessionEvent>,
) {
    let start = Instant::now();
    let deadline = args.duration.map(|secs| start + Duration::from_secs(secs));
    let mut last_report = start;

    loop {
        let now = Instant::now();
        if deadline.is_some_and(|deadline| now >= deadline) {
            log::info!("Run time elapsed");
            return;
        }

        let elapsed = now - start;
        pose.publish(motion.pose_at(elapsed));

        while let Ok(event) = events.try_recv() {
            if !handle_event(event) {
                return;
            }
        }

        if now - last_report >= REPORT_INTERVAL {
            last_report = now;
            report(session);

            if args.send_moves {
                match session.send_move(motion.direction_at(elapsed), 1.0) {
                    Ok(()) | Err(SessionError::NotReady) => {}
                    Err(e) => log::warn!("Failed to send move: {}", e),
                }
            }
        }

        std::thread::sleep(FRAME_INTERVAL);
    }
}

/// Returns `false` when the client should stop.
fn handle_event(event: SessionEvent) -> bool {
    match event {
        SessionEvent::Ready { user_id, port } => {
            log::info!("Connected as user {} (listening on port {})", user_id, port);
        }
        SessionEvent::RemotePlayerJoined { user_id } => {
            log::info!("Player {} appeared", user_id);
        }
        SessionEvent::RemotePose { user_id, pose } => {
            log::debug!(
                "Player {} at ({:.2}, {:.2}, {:.2}) facing {:.2}",
                user_id,
                pose.position.x,
                pose.position.y,
                pose.position.z,
                pose.rotation_y
            );
        }
        SessionEvent::RttSample {
            latest_ms,
            average_ms,
        } => {
            log::trace!("RTT {:.2}ms (avg {:.2}ms)", latest_ms, average_ms);
        }
        SessionEvent::HandshakeTimedOut { attempts } => {
            log::error!(
                "Server did not answer {} port requests, giving up",
                attempts
            );
            return false;
        }
    }
    true
}

fn report(session: &NetworkSession) {
    let Some(user_id) = session.user_id() else {
        log::info!("Waiting for assignment ({:?})", session.state());
        return;
    };

    let stats = session.stats();
    log::info!(
        "User {} | RTT {:.2}ms avg {:.2}ms | {} remote players | sent {} recv {}",
        user_id,
        stats.rtt_ms,
        stats.rtt_avg_ms,
        session.remote_players().len(),
        stats.packets_sent,
        stats.packets_received
    );
}

fn log_stats(session: &NetworkSession) {
    let stats = session.stats();
    log::info!(
        "Session totals: sent {} packets ({} bytes), received {} packets ({} bytes)",
        stats.packets_sent,
        stats.bytes_sent,
        stats.packets_received,
        stats.bytes_received
    );
    if stats.malformed_frames + stats.unknown_commands + stats.send_failures > 0 {
        log::warn!(
            "{} malformed frames, {} unknown commands, {} send failures",
            stats.malformed_frames,
            stats.unknown_commands,
            stats.send_failures
        );
    }
}
