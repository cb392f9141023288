//! `hotplugctl`: inspect and watch devices, mount and eject media

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use hotplug_core::config::{Config, ConfigBuilder};
use hotplug_core::error::{Error as CoreError, Result as CoreResult};
use hotplug_core::logging;
use hotplug_core::types::Udi;
use hotplug_core::utils::with_timeout;
use hotplug_udev::views::{OpticalDrive, StorageAccess};
use hotplug_udev::{CapabilityKind, DeviceManager, DeviceNotification, DeviceSummary};

/// Device manager front end
#[derive(Debug, Parser)]
#[command(name = "hotplugctl", version)]
#[command(about = "Inspect, watch and mount hotplug devices", long_about = None)]
struct Cli {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(short, long, env = "HOTPLUG_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter, overriding the configured one
    #[arg(long)]
    log_level: Option<String>,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List every device of interest
    List,
    /// List devices by capability and/or parent
    Query {
        /// Capability kind, e.g. `storage-volume` or `battery`
        #[arg(long)]
        kind: Option<CapabilityKind>,
        /// Parent identifier
        #[arg(long)]
        parent: Option<String>,
    },
    /// Describe one device and its capability views
    Details {
        /// Device identifier
        udi: String,
    },
    /// Dump the raw property bag of a device
    Properties {
        /// Device identifier
        udi: String,
    },
    /// Print device notifications as they happen
    Watch {
        /// Stop after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Mount a storage volume
    Mount {
        /// Device identifier
        udi: String,
    },
    /// Unmount a storage volume
    Unmount {
        /// Device identifier
        udi: String,
    },
    /// Eject the disc of an optical drive
    Eject {
        /// Device identifier
        udi: String,
    },
    /// Print the effective configuration
    Config,
}

#[derive(Debug, Serialize)]
struct DeviceDetails {
    #[serde(flatten)]
    summary: DeviceSummary,
    interfaces: BTreeMap<CapabilityKind, BTreeMap<&'static str, String>>,
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut builder = ConfigBuilder::new().with_default_environment();
    if let Some(path) = &cli.config {
        builder = builder.with_config_file(path);
    }
    let mut config = builder.build().context("loading configuration")?;
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    Ok(config)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_udis(udis: &[Udi], json: bool) -> Result<()> {
    if json {
        return print_json(&udis);
    }
    for udi in udis {
        println!("{}", udi);
    }
    Ok(())
}

fn details(manager: &DeviceManager, udi: &Udi) -> Result<DeviceDetails> {
    let device = manager.device(udi)?;
    let interfaces = device
        .capabilities()
        .into_iter()
        .filter_map(|kind| device.interface(kind))
        .map(|view| (view.kind(), view.describe().into_iter().collect()))
        .collect();
    Ok(DeviceDetails {
        summary: device.summary(),
        interfaces,
    })
}

fn print_details(details: &DeviceDetails) {
    let s = &details.summary;
    println!("{}", s.udi);
    if let Some(parent) = &s.parent_udi {
        println!("  parent:      {}", parent);
    }
    println!("  vendor:      {}", s.vendor);
    println!("  product:     {}", s.product);
    println!("  description: {}", s.description);
    println!("  icon:        {}", s.icon);
    for (kind, fields) in &details.interfaces {
        println!("  [{}]", kind);
        for (name, value) in fields {
            println!("    {}: {}", name, value);
        }
    }
}

fn print_notification(notification: &DeviceNotification, json: bool) -> CoreResult<()> {
    if json {
        println!("{}", serde_json::to_string(notification)?);
    } else {
        println!("{:?}", notification);
    }
    Ok(())
}

async fn watch(manager: DeviceManager, timeout: Option<u64>, json: bool) -> Result<()> {
    let manager = Arc::new(manager);
    let mut notifications = manager.subscribe();
    let Some(task) = manager.spawn() else {
        bail!("cannot listen for device events; the uevent socket could not be opened");
    };

    let printer = async {
        loop {
            match notifications.recv().await {
                Ok(notification) => print_notification(&notification, json)?,
                Err(RecvError::Lagged(missed)) => warn!(missed, "notifications dropped"),
                Err(RecvError::Closed) => return CoreResult::Ok(()),
            }
        }
    };

    let result = match timeout {
        Some(secs) => match with_timeout(Duration::from_secs(secs), printer).await {
            Err(CoreError::Timeout(_)) => {
                debug!(secs, "watch timed out");
                Ok(())
            }
            other => other,
        },
        None => printer.await,
    };
    task.abort();
    Ok(result?)
}

async fn run(cli: Cli, config: Config) -> Result<()> {
    if let Commands::Config = cli.command {
        print!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    let manager = DeviceManager::new(&config);
    let json = cli.json;
    match cli.command {
        Commands::List => {
            let mut udis = manager.all_devices();
            udis.sort();
            if json {
                let summaries = udis
                    .iter()
                    .map(|udi| manager.device(udi).map(|d| d.summary()))
                    .collect::<Result<Vec<_>, _>>()?;
                return print_json(&summaries);
            }
            for udi in udis {
                let device = manager.device(&udi)?;
                println!("{}  {}", udi, device.description());
            }
        }
        Commands::Query { kind, parent } => {
            let parent = parent.map(Udi::from);
            let mut udis = manager.devices_from_query(parent.as_ref(), kind);
            udis.sort();
            print_udis(&udis, json)?;
        }
        Commands::Details { udi } => {
            let details = details(&manager, &Udi::from(udi))?;
            if json {
                return print_json(&details);
            }
            print_details(&details);
        }
        Commands::Properties { udi } => {
            let device = manager.device(&Udi::from(udi.as_str()))?;
            let record = device
                .record()
                .ok_or_else(|| anyhow!("{} has no properties", udi))?;
            if json {
                return print_json(record.properties());
            }
            for (key, value) in record.properties() {
                println!("{}={}", key, value);
            }
        }
        Commands::Watch { timeout } => watch(manager, timeout, json).await?,
        Commands::Mount { udi } => {
            let access = storage_access(&manager, &udi)?;
            access.setup().await?;
            println!("{}", access.file_path());
        }
        Commands::Unmount { udi } => {
            storage_access(&manager, &udi)?.teardown().await?;
        }
        Commands::Eject { udi } => {
            let drive = manager
                .device(&Udi::from(udi.as_str()))?
                .as_interface::<OpticalDrive>()
                .ok_or_else(|| anyhow!("{} is not an optical drive", udi))?;
            drive.eject().await?;
        }
        Commands::Config => {}
    }
    Ok(())
}

fn storage_access(manager: &DeviceManager, udi: &str) -> Result<StorageAccess> {
    manager
        .device(&Udi::from(udi))?
        .as_interface::<StorageAccess>()
        .ok_or_else(|| anyhow!("{} is not a mountable volume", udi))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    logging::init_from_config(&config.logging)?;
    run(cli, config).await
}
