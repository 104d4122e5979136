use clap::{App, Arg};
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use voltnode::clock::MonotonicClock;
use voltnode::config::NodeConfig;
use voltnode::link::{associate, HostLink};
use voltnode::sim::{DropoutSchedule, IdlePins, SimulatedProbe};
use voltnode::transport::TcpTransport;
use voltnode::Node;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("voltnode")
        .version("0.1.0")
        .author("Field Systems Engineering Team")
        .about("⚡ Modbus-TCP voltage/temperature node")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("JSON configuration file")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("bind")
                .short("b")
                .long("bind")
                .value_name("ADDRESS")
                .help("Listen address (overrides config)")
                .takes_value(true)
                .validator(|v| {
                    v.parse::<IpAddr>()
                        .map(|_| ())
                        .map_err(|_| "Bind address must be an IP address".into())
                }),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("Modbus TCP port (overrides config)")
                .takes_value(true)
                .validator(|v| {
                    v.parse::<u16>()
                        .map(|_| ())
                        .map_err(|_| "Port must be between 0 and 65535".into())
                }),
        )
        .arg(
            Arg::with_name("ssid")
                .long("ssid")
                .value_name("SSID")
                .help("Network name handed to the link")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("probe-dropout")
                .long("probe-dropout")
                .help("Simulate a probe that drops out for 5 of every 30 conversions"),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Enable debug output"),
        )
        .get_matches();

    let default_level = if matches.is_present("verbose") { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let mut config = match matches.value_of("config") {
        Some(path) => NodeConfig::load(Path::new(path))?,
        None => NodeConfig::default(),
    };
    if let Some(bind) = matches.value_of("bind") {
        config.network.bind_address = bind.parse()?;
    }
    if let Some(port) = matches.value_of("port") {
        config.network.port = port.parse()?;
    }
    if let Some(ssid) = matches.value_of("ssid") {
        config.network.credentials.ssid = ssid.to_string();
    }
    config.validate()?;

    println!("⚡ Voltage/Temperature Modbus Node");
    println!("==================================");

    // Blocks until the listen address is available
    let mut link = HostLink::new(config.network.socket_addr());
    let association = associate(
        &mut link,
        &config.network.credentials,
        &config.network.retry_policy(),
        std::thread::sleep,
    )?;
    info!("Node address: {}", association.session.local_addr()?);

    let mut probe = SimulatedProbe::new(config.initial.temperature);
    if matches.is_present("probe-dropout") {
        probe = probe.with_dropout(DropoutSchedule {
            period: 30,
            start: 10,
            length: 5,
        });
    }

    // One thread, one loop: connection tasks and the cycle driver interleave cooperatively
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let transport = TcpTransport::from_std(association.session, config.transport.into())?;
        let mut node = Node::new(&config, transport, probe, IdlePins, MonotonicClock::new())?;

        println!("📡 Ready for Modbus clients on port {}", config.network.port);

        let shutdown = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
        };
        let cycles = node
            .run_until(Duration::from_millis(config.timing.cycle_period_ms), shutdown)
            .await?;

        info!(
            cycles,
            stats = ?node.stats(),
            transport = ?node.transport().stats(),
            "node stopped"
        );
        Ok::<(), Box<dyn std::error::Error>>(())
    })?;

    println!("🛑 Voltage/Temperature Modbus Node stopped");
    Ok(())
}
