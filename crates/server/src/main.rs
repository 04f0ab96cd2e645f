mod clients;
mod config;
mod error;
mod events;
mod ports;
mod server;

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use anyhow::Result;
use clap::Parser;

use config::ServerConfig;
use events::ServerEvent;
use server::GameServer;

#[derive(Parser)]
#[command(name = "posync-server")]
#[command(about = "Position-sync relay server")]
struct Args {
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: IpAddr,

    #[arg(short, long, default_value_t = posync::DEFAULT_SERVER_PORT)]
    port: u16,

    #[arg(
        long,
        default_value_t = 9000,
        help = "First port handed out to clients"
    )]
    min_port: u16,

    #[arg(long, default_value_t = 9100, help = "Last port handed out to clients")]
    max_port: u16,

    #[arg(long, default_value_t = 30, help = "Seconds between inactivity sweeps")]
    cleanup_secs: u64,

    #[arg(
        long,
        default_value_t = 60,
        help = "Seconds of silence before a client is dropped"
    )]
    timeout_secs: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    anyhow::ensure!(
        args.min_port <= args.max_port,
        "empty port range {}-{}",
        args.min_port,
        args.max_port
    );

    let config = ServerConfig {
        min_port: args.min_port,
        max_port: args.max_port,
        cleanup_interval: Duration::from_secs(args.cleanup_secs),
        inactivity_timeout: Duration::from_secs(args.timeout_secs),
        ..Default::default()
    };

    let mut server = GameServer::new(SocketAddr::new(args.bind, args.port), config)?;
    log::info!(
        "Server listening on {} (client ports {}-{})",
        server.local_addr(),
        args.min_port,
        args.max_port
    );

    server.run(log_event);

    log::info!(
        "Server shutting down: {} clients, {} free ports, {} packets in, {} out",
        server.client_count(),
        server.available_ports(),
        server.stats().packets_received,
        server.stats().packets_sent
    );
    Ok(())
}

fn log_event(event: ServerEvent) {
    match event {
        ServerEvent::ClientRegistered {
            user_id,
            addr,
            listen_port,
        } => {
            log::info!(
                "Client {} joined from {} (port {})",
                user_id,
                addr,
                listen_port
            );
        }
        ServerEvent::RegistrationFailed { addr, reason } => {
            log::warn!("Rejected {}: {}", addr, reason);
        }
        ServerEvent::ClientTimedOut { user_id } => {
            log::info!("Client {} timed out", user_id);
        }
        ServerEvent::Error { message } => {
            log::error!("{}", message);
        }
    }
}
