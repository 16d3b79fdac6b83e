use busd::config::{DEFAULT_BIND, DEFAULT_PORT};
use busd::{AdminServer, Bus, BusServer, WebhookSender};
use clap::parser::ValueSource;
use clap::{Arg, ArgAction, Command, value_parser};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() {
    let matches = Command::new("busd")
        .version(env!("CARGO_PKG_VERSION"))
        .about("A message bus for OpenKore-compatible clients")
        .arg(
            Arg::new("port")
                .help("Port to bind the bus listener to")
                .short('p')
                .long("port")
                .value_parser(value_parser!(u16))
                .default_value("8082"),
        )
        .arg(
            Arg::new("bind")
                .help("Address to bind both listeners to")
                .short('b')
                .long("bind")
                .default_value(DEFAULT_BIND),
        )
        .arg(
            Arg::new("api_port")
                .help("Port for the admin API (default: bus port + 1000)")
                .long("api-port")
                .value_parser(value_parser!(u16)),
        )
        .arg(
            Arg::new("config")
                .help("Path to the TOML config file")
                .short('c')
                .long("config")
                .value_parser(value_parser!(PathBuf))
                .default_value("config.toml"),
        )
        .arg(
            Arg::new("quiet")
                .help("Suppress status messages")
                .short('q')
                .long("quiet")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let quiet = matches.get_flag("quiet");
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(if quiet { "warn" } else { "info" })
            }),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "busd starting");

    let config_path = matches
        .get_one::<PathBuf>("config")
        .expect("config has a default");
    let config = match busd::config::load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("FATAL: failed to load config: {e}");
            std::process::exit(1);
        }
    };

    // Command line beats config file beats built-in default.
    let from_cli = |name: &str| matches.value_source(name) == Some(ValueSource::CommandLine);
    let port = if from_cli("port") {
        *matches.get_one::<u16>("port").expect("port has a default")
    } else {
        config.port.unwrap_or(DEFAULT_PORT)
    };
    let bind = if from_cli("bind") {
        matches
            .get_one::<String>("bind")
            .expect("bind has a default")
            .clone()
    } else {
        config.bind.clone().unwrap_or_else(|| DEFAULT_BIND.to_owned())
    };
    let api_port = matches
        .get_one::<u16>("api_port")
        .copied()
        .or(config.api_port)
        .unwrap_or(port + 1000);

    let webhook = config.discord_webhook.clone().map(|url| {
        info!("discord webhook divert enabled");
        WebhookSender::spawn(url)
    });

    let bus = Arc::new(Bus::new(webhook));
    let server = match BusServer::start(Arc::clone(&bus), &format!("{bind}:{port}")).await {
        Ok(server) => server,
        Err(e) => {
            eprintln!("FATAL: failed to bind bus listener on {bind}:{port}: {e}");
            std::process::exit(1);
        }
    };
    let admin = match AdminServer::start(Arc::clone(&bus), &format!("{bind}:{api_port}")).await {
        Ok(admin) => admin,
        Err(e) => {
            eprintln!("FATAL: failed to bind admin API on {bind}:{api_port}: {e}");
            std::process::exit(1);
        }
    };

    info!(
        bus = %server.local_addr(),
        admin = %admin.local_addr(),
        "bus server started"
    );

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                eprintln!("FATAL: failed to listen for shutdown signal: {e}");
                std::process::exit(1);
            }
            info!("shutting down");
        }
        () = server.stopped() => {
            info!("bus listener stopped, shutting down");
        }
    }
    admin.shutdown();
    server.shutdown();
    // Give read loops a moment to observe the signal and run their
    // disconnect paths before the process exits.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
}
