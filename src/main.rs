mod cli;

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::cli::{Cli, Commands, DeviceCommands, UserCommands};
use longseason_core::address::split_batch;
use longseason_core::matcher::hash_address;
use longseason_core::{
    open_store, parse_address, Config, PresenceEngine, PresenceStore, Registry, TickReport,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("longseason=info,longseason_core=info,warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    // Handle ConfigSample without loading config
    if let Commands::ConfigSample { output } = &cli.command {
        let path = output
            .clone()
            .unwrap_or_else(|| std::path::PathBuf::from("./longseason.sample.yaml"));
        Config::sample().save(&path)?;
        println!("Sample configuration written to {}", path.display());
        return Ok(());
    }

    let config = Config::load(cli.config_path.as_deref())?;
    let store = open_store(&config.storage)?;

    match cli.command {
        Commands::ConfigSample { .. } => {
            // Already handled
        }
        Commands::User { command } => handle_user(store.as_ref(), command).await?,
        Commands::Device { command } => handle_device(&config, store.as_ref(), command).await?,
        Commands::Status { json } => {
            let counters = store.status_counters().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&counters)?);
            } else {
                match counters.updated_at {
                    Some(at) => println!("Last update: {}", at.to_rfc3339()),
                    None => println!("Last update: never"),
                }
                println!("Online users: {}", counters.online_users);
                println!("Unknown devices: {}", counters.unknown_devices);
            }
        }
        Commands::Run { once } => handle_run(&config, store, once).await?,
    }

    Ok(())
}

async fn handle_user(store: &dyn Registry, command: UserCommands) -> anyhow::Result<()> {
    match command {
        UserCommands::Add { nickname } => {
            let user = store.add_user(&nickname).await?;
            println!("{}", user.id);
        }
        UserCommands::Remove { id } => {
            store.remove_user(&id).await?;
            println!("Removed user {}", id);
        }
        UserCommands::List { json } => {
            let users = store.all_users().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&users)?);
            } else if users.is_empty() {
                println!("No users registered");
            } else {
                for user in users {
                    let state = if user.online { "online" } else { "offline" };
                    println!("  {}  {:<20} {}", user.id, user.nickname, state);
                }
            }
        }
    }
    Ok(())
}

async fn handle_device(
    config: &Config,
    store: &dyn Registry,
    command: DeviceCommands,
) -> anyhow::Result<()> {
    match command {
        DeviceCommands::Add {
            user_id,
            tag,
            address,
        } => {
            let address = parse_address(&address)?;
            let hashing = config.hashing.clone();
            let hashed = tokio::task::spawn_blocking(move || hash_address(&address, &hashing))
                .await
                .context("hashing task failed")??;
            let device = store.add_device(&user_id, &tag, &hashed).await?;
            println!("{}", device.id);
        }
        DeviceCommands::Remove { id } => {
            store.remove_device(&id).await?;
            println!("Removed device {}", id);
        }
        DeviceCommands::List { user_id } => {
            let devices = store.devices_of(&user_id).await?;
            if devices.is_empty() {
                println!("No devices registered for {}", user_id);
            } else {
                for device in devices {
                    println!("  {}  {}", device.id, device.tag);
                }
            }
        }
    }
    Ok(())
}

async fn handle_run(config: &Config, store: Arc<dyn Registry>, once: bool) -> anyhow::Result<()> {
    let engine = PresenceEngine::new(config.presence.clone(), store);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    if once {
        while let Some(line) = lines.next_line().await? {
            engine.report_addresses(split_batch(&line)).await?;
        }
        let report = engine.reconcile_now().await?;
        print_report(&report);
        engine.shutdown().await?;
        return Ok(());
    }

    let handle = engine.start();
    info!(
        refresh_secs = config.presence.refresh_secs,
        address_ttl_secs = config.presence.address_ttl_secs,
        "reading address batches from stdin"
    );

    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => {
                    engine.report_addresses(split_batch(&line)).await?;
                }
                None => {
                    info!("stdin closed");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }
    }

    handle.shutdown().await?;
    info!("shut down cleanly");
    Ok(())
}

fn print_report(report: &TickReport) {
    println!(
        "{} online of {} addresses seen, {} devices checked, {} unknown",
        report.counters.online_users,
        report.addresses,
        report.devices,
        report.counters.unknown_devices
    );
}
