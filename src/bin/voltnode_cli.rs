use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use colored::*;
use std::time::Duration;
use voltnode::arbiter::{HARD_MAX, HARD_MIN};
use voltnode::client::{ClientError, ModbusClient};
use voltnode::registers::RegisterPair;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: &str = "502";
const DEFAULT_UNIT: &str = "1";
const DEFAULT_VOLTAGE_REGISTER: &str = "0";
const DEFAULT_TEMPERATURE_REGISTER: &str = "4";

/// Where the node publishes its two floats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RegisterMap {
    voltage: RegisterPair,
    temperature: RegisterPair,
}

impl RegisterMap {
    fn from_matches(matches: &ArgMatches<'_>) -> Result<Self, std::num::ParseIntError> {
        let voltage = matches
            .value_of("voltage-register")
            .unwrap_or(DEFAULT_VOLTAGE_REGISTER)
            .parse::<u16>()?;
        let temperature = matches
            .value_of("temperature-register")
            .unwrap_or(DEFAULT_TEMPERATURE_REGISTER)
            .parse::<u16>()?;
        Ok(Self {
            voltage: RegisterPair(voltage),
            temperature: RegisterPair(temperature),
        })
    }
}

fn validate_pair_address(v: String) -> Result<(), String> {
    match v.parse::<u16>() {
        Ok(address) if address < u16::MAX => Ok(()),
        _ => Err("Register pair address must be 0-65534".into()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Table,
    Json,
    Compact,
}

impl OutputFormat {
    fn parse(value: &str) -> Self {
        match value {
            "json" => OutputFormat::Json,
            "compact" => OutputFormat::Compact,
            _ => OutputFormat::Table,
        }
    }
}

fn build_cli() -> App<'static, 'static> {
    App::new("voltnode-cli")
        .version("0.1.0")
        .author("Field Systems Engineering Team")
        .about("⚡ Operator console for the voltage/temperature Modbus node")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("host")
                .short("h")
                .long("host")
                .value_name("HOST")
                .help("Node host address")
                .takes_value(true)
                .default_value(DEFAULT_HOST)
                .global(true),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("Node Modbus TCP port")
                .takes_value(true)
                .default_value(DEFAULT_PORT)
                .global(true),
        )
        .arg(
            Arg::with_name("unit")
                .short("u")
                .long("unit")
                .value_name("UNIT")
                .help("Modbus unit identifier")
                .takes_value(true)
                .default_value(DEFAULT_UNIT)
                .global(true),
        )
        .arg(
            Arg::with_name("format")
                .short("f")
                .long("format")
                .value_name("FORMAT")
                .help("Output format")
                .takes_value(true)
                .possible_values(&["json", "table", "compact"])
                .default_value("table")
                .global(true),
        )
        .arg(
            Arg::with_name("voltage-register")
                .long("voltage-register")
                .value_name("ADDRESS")
                .help("Address of the voltage register pair (0-based)")
                .takes_value(true)
                .default_value(DEFAULT_VOLTAGE_REGISTER)
                .validator(validate_pair_address)
                .global(true),
        )
        .arg(
            Arg::with_name("temperature-register")
                .long("temperature-register")
                .value_name("ADDRESS")
                .help("Address of the temperature register pair (0-based)")
                .takes_value(true)
                .default_value(DEFAULT_TEMPERATURE_REGISTER)
                .validator(validate_pair_address)
                .global(true),
        )
        .subcommand(
            SubCommand::with_name("status")
                .about("📊 Read voltage and temperature")
                .long_about("Reads holding registers 40001-40002 (voltage) and 40005-40006 (temperature) and decodes them as big-endian word-order floats"),
        )
        .subcommand(
            SubCommand::with_name("set-voltage")
                .about("🔧 Write a new voltage setpoint")
                .long_about("Writes both voltage registers in one Write Multiple Registers request. The node clamps the value into its safety envelope on the next cycle.")
                .arg(
                    Arg::with_name("volts")
                        .help("Voltage in volts")
                        .required(true)
                        .validator(|v| match v.parse::<f32>() {
                            Ok(volts) if volts.is_finite() => Ok(()),
                            _ => Err("Voltage must be a finite number".into()),
                        }),
                ),
        )
        .subcommand(
            SubCommand::with_name("read")
                .about("🔎 Read raw holding registers")
                .arg(
                    Arg::with_name("address")
                        .help("Start address (0-based)")
                        .required(true)
                        .validator(|v| v.parse::<u16>().map(|_| ()).map_err(|_| "Address must be 0-65535".into())),
                )
                .arg(
                    Arg::with_name("count")
                        .help("Number of registers (1-125)")
                        .default_value("1")
                        .validator(|v| match v.parse::<u16>() {
                            Ok(count) if (1..=125).contains(&count) => Ok(()),
                            _ => Err("Count must be between 1 and 125".into()),
                        }),
                ),
        )
        .subcommand(
            SubCommand::with_name("write")
                .about("✏️  Write one raw holding register")
                .arg(
                    Arg::with_name("address")
                        .help("Register address (0-based)")
                        .required(true)
                        .validator(|v| v.parse::<u16>().map(|_| ()).map_err(|_| "Address must be 0-65535".into())),
                )
                .arg(
                    Arg::with_name("value")
                        .help("Register value (decimal or 0x-prefixed hex)")
                        .required(true)
                        .validator(|v| parse_word(&v).map(|_| ()).ok_or_else(|| "Value must be a 16-bit number".into())),
                ),
        )
        .subcommand(
            SubCommand::with_name("watch")
                .about("📈 Poll voltage and temperature continuously")
                .arg(
                    Arg::with_name("interval")
                        .short("i")
                        .long("interval")
                        .value_name("MS")
                        .help("Poll interval in milliseconds")
                        .takes_value(true)
                        .default_value("1000")
                        .validator(|v| match v.parse::<u64>() {
                            Ok(ms) if ms > 0 => Ok(()),
                            _ => Err("Interval must be a positive number".into()),
                        }),
                ),
        )
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = build_cli().get_matches();

    let host = matches.value_of("host").unwrap_or(DEFAULT_HOST);
    let port = matches.value_of("port").unwrap_or(DEFAULT_PORT).parse::<u16>()?;
    let registers = RegisterMap::from_matches(&matches)?;
    let unit = matches.value_of("unit").unwrap_or(DEFAULT_UNIT).parse::<u8>()?;
    let format = OutputFormat::parse(matches.value_of("format").unwrap_or("table"));

    let mut client = match ModbusClient::connect((host, port), unit).await {
        Ok(client) => client,
        Err(e) => {
            eprintln!("{} Failed to connect to node at {}:{}", "❌".red(), host.bright_white(), port);
            return Err(e.into());
        }
    };

    match matches.subcommand() {
        ("status", _) => handle_status(&mut client, registers, format).await?,
        ("set-voltage", Some(sub_matches)) => {
            handle_set_voltage(&mut client, registers, sub_matches, format).await?
        }
        ("read", Some(sub_matches)) => handle_read(&mut client, sub_matches, format).await?,
        ("write", Some(sub_matches)) => handle_write(&mut client, sub_matches, format).await?,
        ("watch", Some(sub_matches)) => handle_watch(&mut client, registers, sub_matches, format).await?,
        _ => {
            println!("{}", "No command specified. Use --help for usage information.".yellow());
        }
    }

    Ok(())
}

async fn read_values(client: &mut ModbusClient, registers: RegisterMap) -> Result<(f32, f32), ClientError> {
    let voltage = client.read_f32(registers.voltage).await?;
    let temperature = client.read_f32(registers.temperature).await?;
    Ok((voltage, temperature))
}

fn print_values(voltage: f32, temperature: f32, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({ "voltage": voltage, "temperature": temperature })
            );
        }
        OutputFormat::Compact => {
            println!("V={:.2} T={:.2}", voltage, temperature);
        }
        OutputFormat::Table => {
            let voltage_str = format!("{:>7.2} V", voltage);
            let voltage_str = if voltage <= HARD_MIN || voltage >= HARD_MAX {
                voltage_str.yellow()
            } else {
                voltage_str.green()
            };
            println!("{} {}", "⚡ Voltage:    ".bright_white(), voltage_str);
            println!("{} {}", "🌡️  Temperature:".bright_white(), format!("{:>7.2} °C", temperature).bright_cyan());
        }
    }
}

async fn handle_status(
    client: &mut ModbusClient,
    registers: RegisterMap,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let (voltage, temperature) = read_values(client, registers).await?;
    if format == OutputFormat::Table {
        println!("{}", "📊 Node Status".bright_blue().bold());
    }
    print_values(voltage, temperature, format);
    Ok(())
}

async fn handle_set_voltage(
    client: &mut ModbusClient,
    registers: RegisterMap,
    matches: &ArgMatches<'_>,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let volts = matches.value_of("volts").unwrap_or_default().parse::<f32>()?;
    client.write_f32(registers.voltage, volts).await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::json!({ "voltage": volts, "status": "written" })),
        OutputFormat::Compact => println!("OK"),
        OutputFormat::Table => {
            println!("{} {} set to {}", "✅".green(), "Voltage".bright_white(), format!("{:.2} V", volts).bright_cyan());
            if !(HARD_MIN..=HARD_MAX).contains(&volts) {
                println!(
                    "{} value is outside {:.1}-{:.1} V and will be clamped by the node",
                    "⚠️ ".yellow(),
                    HARD_MIN,
                    HARD_MAX
                );
            }
        }
    }
    Ok(())
}

async fn handle_read(
    client: &mut ModbusClient,
    matches: &ArgMatches<'_>,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let address = matches.value_of("address").unwrap_or_default().parse::<u16>()?;
    let count = matches.value_of("count").unwrap_or("1").parse::<u16>()?;
    let words = client.read_holding_registers(address, count).await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::json!({ "address": address, "values": words })),
        OutputFormat::Compact => {
            let rendered: Vec<String> = words.iter().map(|w| format!("0x{:04X}", w)).collect();
            println!("{}", rendered.join(" "));
        }
        OutputFormat::Table => {
            for (offset, word) in words.iter().enumerate() {
                let register = u32::from(address) + offset as u32;
                println!(
                    "{} {:>5}  {}  {:>5}",
                    format!("4{:04}", register + 1).dimmed(),
                    register,
                    format!("0x{:04X}", word).bright_cyan(),
                    word
                );
            }
        }
    }
    Ok(())
}

async fn handle_write(
    client: &mut ModbusClient,
    matches: &ArgMatches<'_>,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let address = matches.value_of("address").unwrap_or_default().parse::<u16>()?;
    let value = parse_word(matches.value_of("value").unwrap_or_default()).ok_or("invalid register value")?;
    client.write_single_register(address, value).await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::json!({ "address": address, "value": value })),
        OutputFormat::Compact => println!("OK"),
        OutputFormat::Table => println!(
            "{} Register {} set to {}",
            "✅".green(),
            address.to_string().bright_white(),
            format!("0x{:04X}", value).bright_cyan()
        ),
    }
    Ok(())
}

async fn handle_watch(
    client: &mut ModbusClient,
    registers: RegisterMap,
    matches: &ArgMatches<'_>,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let interval_ms = matches.value_of("interval").unwrap_or("1000").parse::<u64>()?;
    if format == OutputFormat::Table {
        println!("{}", "📈 Watching node values (Press Ctrl+C to stop)...".bright_blue().bold());
    }

    let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = interval.tick() => {
                let (voltage, temperature) = read_values(client, registers).await?;
                print_values(voltage, temperature, format);
            }
        }
    }
    Ok(())
}

fn parse_word(text: &str) -> Option<u16> {
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16).ok(),
        None => text.parse::<u16>().ok(),
    }
}
