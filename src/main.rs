//! mtca-monitor entry point: CLI dispatch and async runtime.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser};
use tracing::{debug, info, warn};

use mtca_monitor::app::cli::{parse_bus, Args};
use mtca_monitor::app::logging::{init_tracing, level_filter, set_level};
use mtca_monitor::channel::executor::ToolCommand;
use mtca_monitor::channel::{IpmiTransport, IpmitoolShell};
use mtca_monitor::config::persistence::{default_config_path, load_config, save_config};
use mtca_monitor::config::types::MonitorConfig;
use mtca_monitor::hardware::{Crate, CrateSnapshot};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if !args.has_action() {
        eprintln!("ERROR: No command specified.");
        eprintln!();
        Args::command().print_help()?;
        std::process::exit(1);
    }

    // Priority: 1. --log-level flag, 2. config file, 3. RUST_LOG, 4. default (info)
    let cli_filter = match args.log_level.as_deref() {
        Some(level) => match level_filter(level) {
            Some(filter) => Some(filter),
            None => {
                eprintln!("Invalid log level '{}'. Using INFO. Valid levels: TRACE, DEBUG, INFO, WARN, ERROR", level);
                Some("info")
            }
        },
        None => None,
    };
    let initial = cli_filter
        .map(str::to_string)
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| "info".to_string());
    init_tracing(&initial);

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => default_config_path()?,
    };
    let mut config = load_config(Some(&config_path)).await?;

    if cli_filter.is_none() {
        if let Some(filter) = config.logging.level.as_deref().and_then(level_filter) {
            set_level(filter);
        }
    }

    apply_overrides(&mut config, &args);

    if args.write_config {
        save_config(&config, &config_path).await?;
        return Ok(());
    }

    info!("mtca-monitor v{} starting", env!("CARGO_PKG_VERSION"));

    let mut tool = ToolCommand::resolve(config.ipmitool.path.as_deref());
    tool.interface = config.ipmitool.interface.clone();
    tool.auth_type = config.crate_settings.auth_type.clone();
    let shell = Arc::new(IpmitoolShell::new(tool, config.shell_settings()));

    match shell.tool_version().await {
        Ok(version) => {
            info!("Using {}", version.trim());
            if args.tool_version {
                println!("{}", version.trim());
                return Ok(());
            }
        }
        Err(e) => {
            warn!("Could not query ipmitool version: {}", e);
            if args.tool_version {
                bail!("ipmitool not usable: {}", e);
            }
        }
    }

    let channel: Arc<dyn IpmiTransport> = shell;
    let mtca = Crate::new(channel, config.hot_swap.clone(), config.timing.timings());
    if let Some(host) = &config.crate_settings.host {
        mtca.set_host(host);
    }
    if let Some(user) = &config.crate_settings.user {
        mtca.set_user(user);
    }
    if let Some(password) = &config.crate_settings.password {
        mtca.set_password(password);
    }

    let result = run(&args, &config, &mtca).await;
    mtca.shutdown().await;
    info!("mtca-monitor shutdown complete");
    result
}

fn apply_overrides(config: &mut MonitorConfig, args: &Args) {
    if let Some(host) = &args.host {
        config.crate_settings.host = Some(host.clone());
    }
    if let Some(user) = &args.user {
        config.crate_settings.user = Some(user.clone());
    }
    if let Some(password) = &args.password {
        config.crate_settings.password = Some(password.clone());
    }
}

async fn run(args: &Args, config: &MonitorConfig, mtca: &Crate) -> Result<()> {
    if args.reset_crate {
        mtca.reset().await.context("Crate reset failed")?;
        mtca.read_all_sensors().await;
        return print_snapshot(&mtca.snapshot().await, args.json);
    }

    if !mtca.populate_module_list().await {
        bail!("Crate host, user and password must be set (config file or --host/--user/--password)");
    }

    if let Some(target) = &args.reset_module {
        let [bus, slot] = target.as_slice() else {
            bail!("--reset-module takes BUS and SLOT");
        };
        let bus_id = parse_bus(bus).with_context(|| format!("Unknown bus '{}'", bus))?;
        let slot_id: i32 = slot.parse().with_context(|| format!("Invalid slot '{}'", slot))?;
        if !mtca.reset_module(bus_id, slot_id).await {
            bail!("No module at bus {} slot {}", bus_id, slot_id);
        }
        return Ok(());
    }

    if args.firmware {
        mtca.read_controller_uptime().await;
        return print_firmware(&mtca.snapshot().await, args.json);
    }

    if args.watch {
        return watch(args, config, mtca).await;
    }

    mtca.read_all_sensors().await;
    mtca.read_controller_uptime().await;
    print_snapshot(&mtca.snapshot().await, args.json)
}

async fn watch(args: &Args, config: &MonitorConfig, mtca: &Crate) -> Result<()> {
    let mut events = mtca.subscribe();
    let event_log = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            debug!("Crate event: {:?}", event);
        }
    });

    let mut ticker = tokio::time::interval(config.timing.poll_interval());
    info!("Watching crate every {:?} (Ctrl+C to exit)", config.timing.poll_interval());

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                mtca.read_all_sensors().await;
                mtca.read_controller_uptime().await;
                print_snapshot(&mtca.snapshot().await, args.json)?;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received (Ctrl+C)");
                break;
            }
        }
    }

    event_log.abort();
    Ok(())
}

fn print_snapshot(snapshot: &CrateSnapshot, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(snapshot)?);
        return Ok(());
    }

    println!(
        "Crate {} ({} modules{})",
        snapshot.host.as_deref().unwrap_or("<unset>"),
        snapshot.modules.len(),
        if snapshot.resetting { ", resetting" } else { "" }
    );
    for module in &snapshot.modules {
        println!(
            "  {:>3}.{:<2} {:<20} {:<6} {}",
            module.bus,
            module.slot,
            module.name,
            if module.comms_ok { "ok" } else { "ERROR" },
            module.alarm_level
        );
        for sensor in &module.sensors {
            let limits = sensor.published_limits();
            let range = if limits.active {
                format!("[{} {} {} {}]", limits.lolo, limits.low, limits.high, limits.hihi)
            } else {
                String::new()
            };
            println!(
                "      {:<10} {:>10.3} {:<4}{} {}",
                sensor.canonical_id,
                sensor.value,
                sensor.unit,
                if sensor.valid { "" } else { " (stale)" },
                range
            );
        }
    }
    Ok(())
}

fn print_firmware(snapshot: &CrateSnapshot, json: bool) -> Result<()> {
    if json {
        let value = serde_json::json!({
            "firmware": snapshot.firmware,
            "uptime_days": snapshot.uptime_days,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    for (mch, info) in &snapshot.firmware {
        println!("MCH{}: {} ({})", mch, info.version, info.date);
    }
    match snapshot.uptime_days {
        Some(days) => println!("Uptime: {:.2} days", days),
        None => println!("Uptime: unknown"),
    }
    Ok(())
}
