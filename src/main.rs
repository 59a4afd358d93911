use std::{
    fs::OpenOptions,
    path::{
        Path,
        PathBuf,
    },
    sync::Arc,
};

use clap::Parser;
use color_eyre::eyre::Error;
use tokio::{
    io::{
        AsyncBufReadExt,
        BufReader,
    },
    net::TcpListener,
};
use tokio_util::sync::CancellationToken;
use tq_gateway::{
    geocode,
    server::{
        Gateway,
        GatewayConfig,
        Status,
    },
    util::checksum::{
        KNOWN_RPG_CHECKSUMS,
        rpg_checksum,
    },
};
use tracing_subscriber::{
    filter::LevelFilter,
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[tokio::main]
async fn main() -> Result<(), Error> {
    let _ = dotenvy::dotenv();
    color_eyre::install()?;

    let args = Args::parse();
    init_tracing(&args.log_path)?;

    let config = GatewayConfig {
        uplink_host: args.uplink_host.clone(),
        uplink_port: args.uplink_port,
        geocoding_enabled: args.geocoding_enabled,
        geocoding_url: args.geocoding_url.clone(),
        csv_path: args.csv_path.clone(),
        audit_path: args.audit_path.clone(),
        udp_log_path: args.udp_log_path.clone(),
        nmea_log_path: args.nmea_log_path.clone(),
    };
    let gateway = Arc::new(Gateway::new(&config).await?);

    // a failed bind is fatal; everything after this point keeps running
    let listener = TcpListener::bind((args.listen_host.as_str(), args.listen_port)).await?;

    tracing::info!(
        listen = %format!("{}:{}", args.listen_host, args.listen_port),
        uplink = %gateway.uplink_target(),
        "gateway started"
    );
    println!(
        "🚀 tq gateway listening on {}:{}",
        args.listen_host, args.listen_port
    );
    println!("📡 rpg uplink to {}", gateway.uplink_target());

    let shutdown = CancellationToken::new();
    let serve_task = tokio::spawn({
        let gateway = Arc::clone(&gateway);
        let shutdown = shutdown.clone();
        async move {
            gateway.serve(listener, shutdown).await;
        }
    });

    if args.daemon {
        tokio::signal::ctrl_c().await?;
        println!("\n🛑 interrupted, shutting down");
    }
    else {
        command_loop(&gateway).await?;
    }

    shutdown.cancel();
    serve_task.await?;

    tracing::info!("gateway stopped");
    println!("👋 gateway stopped");
    Ok(())
}

#[derive(Debug, Parser)]
#[command(about = "TQ → RPG telemetry ingestion gateway")]
struct Args {
    /// Interface to accept tracker connections on.
    #[clap(long, env = "TQ_LISTEN_HOST", default_value = "0.0.0.0")]
    listen_host: String,

    #[clap(long, env = "TQ_LISTEN_PORT", default_value_t = 5003)]
    listen_port: u16,

    /// Downstream RPG collector.
    #[clap(long, env = "TQ_UPLINK_HOST", default_value = "179.43.115.190")]
    uplink_host: String,

    #[clap(long, env = "TQ_UPLINK_PORT", default_value_t = 7007)]
    uplink_port: u16,

    /// Reverse-geocode accepted fixes into the operational log.
    #[clap(
        long,
        env = "TQ_GEOCODING_ENABLED",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    geocoding_enabled: bool,

    #[clap(long, env = "TQ_GEOCODING_URL", default_value = geocode::DEFAULT_ENDPOINT)]
    geocoding_url: String,

    /// CSV log of accepted fixes.
    #[clap(long, env = "TQ_CSV_PATH", default_value = "positions_log.csv")]
    csv_path: PathBuf,

    /// Audit trail of RPG uplink decisions.
    #[clap(long, env = "TQ_AUDIT_PATH", default_value = "rpg_messages.log")]
    audit_path: PathBuf,

    /// Operational log (duplicates stderr).
    #[clap(long, env = "TQ_LOG_PATH", default_value = "tq_gateway.log")]
    log_path: PathBuf,

    #[clap(long, env = "TQ_UDP_LOG_PATH", default_value = "udp_sends.log")]
    udp_log_path: PathBuf,

    #[clap(long, env = "TQ_NMEA_LOG_PATH", default_value = "nmea_filtered.log")]
    nmea_log_path: PathBuf,

    /// Run headless: no interactive prompt, stop on ctrl-c.
    #[clap(long)]
    daemon: bool,
}

fn init_tracing(log_path: &Path) -> Result<(), Error> {
    let file = OpenOptions::new().create(true).append(true).open(log_path)?;

    tracing_subscriber::registry()
        .with(LevelFilter::INFO)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Arc::new(file)),
        )
        .init();

    Ok(())
}

const COMMAND_HELP: &str = "\
commands:
  status    - server state and counters
  clients   - connected clients
  terminal  - current device id
  geocoding - toggle address lookups
  checksum  - rpg checksum self-test
  quit      - stop the gateway";

async fn command_loop(gateway: &Gateway) -> Result<(), Error> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        println!("\n{COMMAND_HELP}");

        let Some(line) = lines.next_line().await? else {
            // stdin closed; keep serving until ctrl-c like daemon mode
            tokio::signal::ctrl_c().await?;
            break;
        };

        match line.trim().to_lowercase().as_str() {
            "" => {}
            "quit" => break,
            "status" => print_status(&gateway.status().await),
            "clients" => print_clients(&gateway.status().await),
            "terminal" => print_terminal(gateway),
            "geocoding" => {
                let enabled = gateway.geocoder().toggle();
                if enabled {
                    println!("🗺️  geocoding enabled: new fixes will carry addresses in the log");
                }
                else {
                    println!("🗺️  geocoding disabled");
                }
            }
            "checksum" => run_checksum_self_test(),
            other => println!("❌ unknown command: {other}"),
        }
    }

    Ok(())
}

fn print_status(status: &Status) {
    println!("\n📊 gateway status");
    match status.current_device_id {
        Some(device_id) => println!("   current device: {device_id}"),
        None => println!("   current device: none"),
    }
    println!("   connected clients: {}", status.connected_clients.len());
    println!("   frames received: {}", status.total);
    println!("   fixes accepted: {}", status.accepted);
    println!("   fixes filtered: {}", status.filtered);
    let geocoding = if status.geocoding_enabled {
        "✅ enabled"
    }
    else {
        "❌ disabled"
    };
    println!(
        "   🗺️  geocoding: {geocoding} (cache: {} addresses)",
        status.geocoding_cache_size
    );
}

fn print_clients(status: &Status) {
    if status.connected_clients.is_empty() {
        println!("\n📭 no connected clients");
    }
    else {
        println!(
            "\n🔗 connected clients ({}):",
            status.connected_clients.len()
        );
        for client in &status.connected_clients {
            println!("   - {client}");
        }
    }
}

fn print_terminal(gateway: &Gateway) {
    match gateway.current_device_id() {
        Some(device_id) => {
            println!("\n🆔 current device id");
            println!("   long form: {device_id}");
            println!("   rpg id: {}", device_id.short());
        }
        None => {
            println!("\n⚠️  no device id yet, waiting for a registration or position frame");
        }
    }
}

fn run_checksum_self_test() {
    println!("\n🧮 rpg checksum self-test");
    for (frame, expected) in KNOWN_RPG_CHECKSUMS {
        let computed = rpg_checksum(frame).unwrap_or_default();
        let verdict = if computed == *expected { "ok" } else { "MISMATCH" };
        println!("   {frame}{expected}< -> {computed} {verdict}");
    }
}
