//! Pegel Alert Service - Main Entry Point
//!
//! Polls the HLNUG water level feed, logs every configured station, stores
//! the measurements in PostgreSQL and mails threshold alerts.
//!
//! Usage:
//!   pegel_service                          # Mode from the config file
//!   pegel_service --once                   # Run a single cycle and exit
//!   pegel_service --daemon --endpoint 8080 # Loop forever, serve /status
//!   pegel_service --config other.toml      # Use another config file
//!   pegel_service --memory                 # Dry run without a database
//!
//! Environment:
//!   DATABASE_URL - PostgreSQL connection string (if not set in the config)
//!   RUST_LOG     - tracing filter, overrides the config's debug flag

use chrono::Utc;
use pegel_service::config::{self, DEFAULT_CONFIG_PATH, RunMode};
use pegel_service::daemon::Daemon;
use pegel_service::endpoint::{self, StatusBoard};
use pegel_service::logging;
use std::env;
use std::path::PathBuf;
use std::process;

struct Args {
    config_path: PathBuf,
    mode: Option<RunMode>,
    use_memory: bool,
    endpoint_port: Option<u16>,
}

fn usage(program: &str) -> String {
    format!(
        "Usage: {} [--config PATH] [--once | --daemon] [--memory] [--endpoint PORT]",
        program
    )
}

fn parse_args(args: &[String]) -> Result<Args, String> {
    let program = args.first().map(String::as_str).unwrap_or("pegel_service");
    let mut parsed = Args {
        config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
        mode: None,
        use_memory: false,
        endpoint_port: None,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                let path = args.get(i + 1).ok_or("--config requires a path")?;
                parsed.config_path = PathBuf::from(path);
                i += 2;
            }
            "--endpoint" => {
                let port = args
                    .get(i + 1)
                    .and_then(|p| p.parse().ok())
                    .ok_or("--endpoint requires a port number")?;
                parsed.endpoint_port = Some(port);
                i += 2;
            }
            "--once" => {
                parsed.mode = Some(RunMode::Once);
                i += 1;
            }
            "--daemon" => {
                parsed.mode = Some(RunMode::Daemon);
                i += 1;
            }
            "--memory" => {
                parsed.use_memory = true;
                i += 1;
            }
            "--help" | "-h" => {
                println!("{}", usage(program));
                process::exit(0);
            }
            other => return Err(format!("Unknown argument: {}\n{}", other, usage(program))),
        }
    }

    Ok(parsed)
}

fn main() {
    let args: Vec<String> = env::args().collect();
    let args = match parse_args(&args) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    let settings = match config::load_config(&args.config_path) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("❌ Configuration error: {}", e);
            process::exit(1);
        }
    };
    logging::init_logging(settings.runtime.debug);

    println!("🌊 Pegel Alert Service");
    println!("======================\n");

    let mut daemon = match Daemon::initialize(&settings, args.use_memory) {
        Ok(daemon) => daemon,
        Err(e) => {
            eprintln!("\n❌ Initialization failed: {}\n", e);
            process::exit(1);
        }
    };
    println!(
        "✓ {} stations configured, policy: {}\n",
        daemon.stations().len(),
        daemon.policy_name()
    );

    if let Some(port) = args.endpoint_port {
        let board = StatusBoard::new(daemon.policy_name(), daemon.stations());
        match endpoint::spawn_endpoint_server(port, board.clone()) {
            Ok(_) => {
                println!("🚀 Endpoint running on http://0.0.0.0:{}\n", port);
                daemon = daemon.with_status_board(board);
            }
            Err(e) => {
                eprintln!("❌ Failed to start HTTP endpoint: {}", e);
                eprintln!("   Continuing without HTTP endpoint\n");
            }
        }
    }

    match args.mode.unwrap_or(settings.runtime.mode) {
        RunMode::Once => {
            let report = daemon.run_cycle(Utc::now());
            process::exit(if report.is_success() { 0 } else { 1 });
        }
        RunMode::Daemon => {
            println!(
                "🔄 Polling every {} s, press Ctrl+C to stop\n",
                settings.runtime.poll_interval.as_secs()
            );
            daemon.run()
        }
    }
}
