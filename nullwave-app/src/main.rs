//! Nullwave headless host.
//!
//! Loads settings, opens the default (or preferred) devices through cpal
//! and runs the cancellation engine until Ctrl-C.

mod settings;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use nullwave_core::{
    audio::{config::Direction, device::list_devices},
    CancellationEngine, CpalBackend, TcpExporter, TelemetrySink,
};
use tracing::{info, warn};

use settings::{default_settings_path, load_settings, save_settings, SETTINGS_ENV};

/// How often running counters are logged.
const DIAGNOSTICS_INTERVAL: Duration = Duration::from_secs(10);

struct Args {
    settings_path: PathBuf,
    list_devices: bool,
    write_defaults: bool,
}

fn parse_args() -> Result<Args, String> {
    let mut settings_path: Option<PathBuf> = None;
    let mut list_devices = false;
    let mut write_defaults = false;

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--settings" => {
                let Some(v) = it.next() else {
                    return Err("missing value for --settings".into());
                };
                settings_path = Some(PathBuf::from(v));
            }
            "--list-devices" => list_devices = true,
            "--write-settings" => write_defaults = true,
            "--help" | "-h" => {
                println!(
                    "Usage: nullwave [--settings <file.json>] [--list-devices] [--write-settings]\n\
                     \n\
                     The settings path may also be given through {SETTINGS_ENV}.\n\
                     Logging is controlled by RUST_LOG (default: nullwave=info)."
                );
                std::process::exit(0);
            }
            other => return Err(format!("unknown argument: {other}")),
        }
    }

    let settings_path = settings_path
        .or_else(|| std::env::var_os(SETTINGS_ENV).map(PathBuf::from))
        .unwrap_or_else(default_settings_path);
    Ok(Args {
        settings_path,
        list_devices,
        write_defaults,
    })
}

fn print_devices() {
    for direction in [Direction::Input, Direction::Output] {
        println!("{direction:?} devices:");
        for device in list_devices(direction) {
            let marker = if device.is_default { " (default)" } else { "" };
            println!("  {}{marker}", device.name);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("nullwave=info")),
        )
        .init();

    let args = parse_args().map_err(anyhow::Error::msg)?;
    if args.list_devices {
        print_devices();
        return Ok(());
    }

    let settings = load_settings(&args.settings_path);
    info!(settings_path = ?args.settings_path, "settings loaded");
    if args.write_defaults {
        save_settings(&args.settings_path, &settings)
            .with_context(|| format!("writing {}", args.settings_path.display()))?;
        info!("settings written");
        return Ok(());
    }

    let mut engine = CancellationEngine::new(Arc::new(CpalBackend::new()), settings.engine_config());
    let exporter = if settings.telemetry_enabled {
        let exporter = Arc::new(
            TcpExporter::bind_loopback(settings.telemetry_port)
                .context("starting telemetry exporter")?,
        );
        engine = engine.with_telemetry(Arc::clone(&exporter) as Arc<dyn TelemetrySink>);
        Some(exporter)
    } else {
        None
    };
    let engine = Arc::new(engine);

    // ── Status forwarding ─────────────────────────────────────────────────
    let mut status_rx = engine.subscribe_status();
    tokio::spawn(async move {
        while let Ok(event) = status_rx.recv().await {
            match event.detail {
                Some(detail) => info!(status = ?event.status, "{detail}"),
                None => info!(status = ?event.status, "engine status changed"),
            }
        }
    });

    {
        let engine = Arc::clone(&engine);
        let start_paused = settings.start_paused;
        tokio::task::spawn_blocking(move || -> nullwave_core::Result<()> {
            engine.start()?;
            if !start_paused {
                engine.resume()?;
            }
            Ok(())
        })
        .await
        .context("engine start task failed")?
        .context("starting cancellation engine")?;
    }
    info!(
        buffer_bytes = engine.buffer_bytes().unwrap_or_default(),
        "nullwave running — press Ctrl-C to stop"
    );

    let mut diagnostics = tokio::time::interval(DIAGNOSTICS_INTERVAL);
    diagnostics.tick().await;
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!("failed to listen for Ctrl-C: {e}");
                }
                break;
            }
            _ = diagnostics.tick() => {
                let snap = engine.diagnostics_snapshot();
                info!(
                    captured = snap.blocks_captured,
                    played = snap.blocks_played,
                    dropped = snap.blocks_dropped,
                    silence = snap.silence_gaps,
                    write_errors = snap.write_errors,
                    "pipeline counters"
                );
            }
        }
    }

    info!("shutting down");
    let teardown_engine = Arc::clone(&engine);
    tokio::task::spawn_blocking(move || teardown_engine.teardown())
        .await
        .context("engine teardown task failed")?;
    if let Some(exporter) = exporter {
        exporter.stop();
    }
    Ok(())
}
