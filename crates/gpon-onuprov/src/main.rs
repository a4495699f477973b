//! onuprov - GPON ONU provisioning tool
//!
//! Entry point for the `onuprov` command line.

use std::fs::File;
use std::io::{self, BufWriter};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info};

use gpon_onuprov::{
    validate, JsonLinesSink, MigrationJob, MigrationScheduler, OnuIdentity, OnuSerial,
    OnuprovConfig, OutcomeSink, PonPort, PppoeCredentials, ProvisioningJob, ProvisioningMode,
    Provisioner, WifiCredentials, DEFAULT_CONFIG_PATH,
};

/// GPON ONU provisioning and migration
#[derive(Parser, Debug)]
#[command(name = "onuprov")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short, long, env = "ONUPROV_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// OLT name from the configuration
    #[arg(short, long, env = "ONUPROV_OLT")]
    olt: String,

    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List ONUs waiting for provisioning
    Unauthorized,
    /// Provision one ONU
    Provision(ProvisionArgs),
    /// Remove a provisioned ONU
    Deauthorize { serial: String },
    /// Show position, optics and model of an ONU
    Inspect { serial: String },
    /// Reboot a Nokia ONT
    Reboot { serial: String },
    /// Set SSID and passphrase on a Nokia router ONT
    Wifi {
        serial: String,
        #[arg(long)]
        ssid: String,
        #[arg(long, env = "ONUPROV_WIFI_PASSWORD")]
        password: String,
    },
    /// Enable WAN web access on a Nokia router ONT
    RemoteAccess {
        serial: String,
        #[arg(long, env = "ONUPROV_REMOTE_PASSWORD")]
        password: String,
    },
    /// List every ONU on a PON with optics
    ListPon {
        #[arg(long)]
        slot: u8,
        #[arg(long)]
        pon: u8,
    },
    /// Show models with a known provisioning path
    Models,
    /// Migrate a batch of unauthorized ONUs
    Migrate {
        /// JSON array of migration jobs
        #[arg(long)]
        jobs: PathBuf,
        /// Write outcomes as JSON lines to this file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct ProvisionArgs {
    serial: String,
    #[arg(long)]
    slot: u8,
    #[arg(long)]
    pon: u8,
    /// Subscriber name
    #[arg(long, default_value = "")]
    name: String,
    /// VLAN; defaults to the configured VLAN for the port
    #[arg(long)]
    vlan: Option<u16>,
    /// bridge or router
    #[arg(long, default_value = "bridge")]
    mode: ProvisioningMode,
    /// Skip model detection
    #[arg(long)]
    model: Option<String>,
    /// Fixed position instead of the lowest free one
    #[arg(long)]
    position: Option<u16>,
    #[arg(long)]
    pppoe_user: Option<String>,
    #[arg(long, env = "ONUPROV_PPPOE_PASSWORD")]
    pppoe_password: Option<String>,
    #[arg(long)]
    ssid: Option<String>,
    #[arg(long, env = "ONUPROV_WIFI_PASSWORD")]
    wifi_password: Option<String>,
}

/// Initializes tracing with RUST_LOG, falling back to `default_level`
fn init_logging(default_level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_writer(io::stderr))
        .init();
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("Failed to encode result")?;
    println!("{}", text);
    Ok(())
}

fn build_job(args: ProvisionArgs, config: &OnuprovConfig) -> Result<ProvisioningJob> {
    let serial = OnuSerial::parse(&args.serial)?;
    let port = PonPort::new(args.slot, args.pon);
    let vlan = match args.vlan {
        Some(vlan) => validate::vlan(vlan)?,
        None => config
            .vlan_table()
            .lookup(port)
            .with_context(|| format!("No VLAN configured for port {}; pass --vlan", port))?,
    };
    let onu = OnuIdentity::new(serial, &args.name);

    let mut job = match args.mode {
        ProvisioningMode::Bridge => ProvisioningJob::bridge(onu, port, vlan),
        ProvisioningMode::Router => {
            let pppoe = match (args.pppoe_user, args.pppoe_password) {
                (Some(user), Some(password)) => Some(PppoeCredentials { user, password }),
                _ => None,
            };
            let wifi = match (args.ssid, args.wifi_password) {
                (Some(ssid), Some(password)) => Some(WifiCredentials::new(&ssid, &password)?),
                _ => None,
            };
            ProvisioningJob::router(onu, port, vlan, pppoe, wifi)
        }
    };
    if let Some(model) = args.model {
        job = job.with_model(model);
    }
    if let Some(position) = args.position {
        job = job.at_position(position);
    }
    Ok(job)
}

async fn run(cli: Cli) -> Result<()> {
    let config = OnuprovConfig::load_or_default(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    config.validate().context("Invalid configuration")?;

    let olt = config.olt(&cli.olt)?;
    let connector = olt.connector(&config.timing)?;
    let provisioner = Provisioner::from_config(connector, &config)?;
    info!(olt = %olt.name, host = %olt.host, "Using OLT");

    match cli.command {
        Command::Unauthorized => {
            let inventory = provisioner.list_unauthorized().await?;
            let rows: Vec<_> = inventory
                .iter()
                .map(|(serial, port)| serde_json::json!({ "serial": serial, "slot": port.slot, "pon": port.pon }))
                .collect();
            print_json(&rows)?;
        }
        Command::Provision(args) => {
            let job = build_job(args, &config)?;
            let report = provisioner.provision(&job).await;
            print_json(&serde_json::json!({
                "serial": report.serial,
                "state": report.state,
                "address": report.address,
                "model": report.model,
                "path": report.path,
                "error": report.reason(),
            }))?;
            report.into_result()?;
        }
        Command::Deauthorize { serial } => {
            let address = provisioner.deauthorize(&OnuSerial::parse(&serial)?).await?;
            print_json(&address)?;
        }
        Command::Inspect { serial } => {
            let inspection = provisioner.inspect(&OnuSerial::parse(&serial)?).await?;
            print_json(&inspection)?;
        }
        Command::Reboot { serial } => {
            let address = provisioner.reboot(&OnuSerial::parse(&serial)?).await?;
            print_json(&address)?;
        }
        Command::Wifi {
            serial,
            ssid,
            password,
        } => {
            let wifi = WifiCredentials::new(&ssid, &password)?;
            let address = provisioner
                .configure_wifi(&OnuSerial::parse(&serial)?, &wifi)
                .await?;
            print_json(&address)?;
        }
        Command::RemoteAccess { serial, password } => {
            let state = provisioner
                .grant_remote_access(&OnuSerial::parse(&serial)?, &password)
                .await?;
            print_json(&state)?;
        }
        Command::ListPon { slot, pon } => {
            let records = provisioner.list_pon(PonPort::new(slot, pon)).await?;
            print_json(&records)?;
        }
        Command::Models => {
            print_json(&provisioner.compatible_models())?;
        }
        Command::Migrate { jobs, output } => {
            let text = std::fs::read_to_string(&jobs)
                .with_context(|| format!("Failed to read {}", jobs.display()))?;
            let jobs: Vec<MigrationJob> = serde_json::from_str(&text)
                .with_context(|| format!("Failed to parse {}", jobs.display()))?;

            let mut sink: Box<dyn OutcomeSink> = match &output {
                Some(path) => Box::new(JsonLinesSink::new(BufWriter::new(
                    File::create(path)
                        .with_context(|| format!("Failed to create {}", path.display()))?,
                ))),
                None => Box::new(JsonLinesSink::new(io::stdout())),
            };
            let scheduler = MigrationScheduler::new(&provisioner, config.vlan_table());
            let report = scheduler.run(&jobs, sink.as_mut()).await?;
            info!(
                migrated = report.counts.migrated,
                error = report.counts.error,
                not_found = report.counts.not_found,
                cycles = report.cycles,
                "Migration summary"
            );
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(if cli.verbose { "debug" } else { "info" });

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
