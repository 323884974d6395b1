use anyhow::{anyhow, Context, Result};
use clap::ArgMatches;
use flume::RecvTimeoutError;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    thread,
    time::Duration,
};

use super::config::{BenchConfig, DEFAULT_CONFIG_FILE};
use crate::{
    api::{
        archive::JsonlArchive,
        outcome::TestStatus,
        sequencer::Sequencer,
        session::{FinalizedSession, SessionAggregator},
    },
    core::{
        bus::{Bus, CoreToUi, UiToCore},
        persistence,
    },
    protocol::{tty, SerialConfig, SerialTransport},
};

/// Dispatch the parsed command line. Returns whether the board passed;
/// listing ports always counts as success.
pub fn run(matches: &ArgMatches) -> Result<bool> {
    persistence::set_no_cache(matches.get_flag("no-config-cache"));

    if matches.get_flag("list-ports") {
        list_ports(matches.get_flag("json"))?;
        return Ok(true);
    }
    run_session(matches)
}

pub fn list_ports(json: bool) -> Result<()> {
    let ports = tty::available_ports_sorted();
    if json {
        println!("{}", serde_json::to_string_pretty(&ports)?);
        return Ok(());
    }

    if ports.is_empty() {
        eprintln!("No serial ports found");
    }
    for port in &ports {
        match (&port.usb, &port.product) {
            (Some(ids), Some(product)) => println!(
                "{}  (vid:{:04x} pid:{:04x}, {product})",
                port.name, ids.vid, ids.pid
            ),
            (Some(ids), None) => {
                println!("{}  (vid:{:04x} pid:{:04x})", port.name, ids.vid, ids.pid)
            }
            _ => println!("{}", port.name),
        }
    }
    Ok(())
}

/// Load `--config`, or the default file when present, or built-in defaults.
pub fn load_config(explicit: Option<&PathBuf>) -> Result<BenchConfig> {
    match explicit {
        Some(path) => BenchConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => {
            let default = Path::new(DEFAULT_CONFIG_FILE);
            if default.exists() {
                log::info!("Using {DEFAULT_CONFIG_FILE}");
                BenchConfig::from_file(default)
                    .with_context(|| format!("Failed to load config {DEFAULT_CONFIG_FILE}"))
            } else {
                Ok(BenchConfig::default())
            }
        }
    }
}

/// `--port`, then the config file, then the last used port.
pub fn resolve_port(explicit: Option<&String>, config: &BenchConfig) -> Result<String> {
    if let Some(port) = explicit.or(config.port.as_ref()) {
        return Ok(port.clone());
    }
    match persistence::load_last_port() {
        Ok(Some(port)) => {
            log::info!("Using last port {port}");
            Ok(port)
        }
        Ok(None) => Err(anyhow!(
            "No serial port given; pass --port (see --list-ports)"
        )),
        Err(err) => Err(err.context("No serial port given and the last one could not be read")),
    }
}

/// Run one board through the bench on a worker thread, rendering events as
/// they arrive.
pub fn run_session(matches: &ArgMatches) -> Result<bool> {
    let json = matches.get_flag("json");
    let config = load_config(matches.get_one::<PathBuf>("config"))?;
    let port = resolve_port(matches.get_one::<String>("port"), &config)?;
    let baud_rate = matches
        .get_one::<u32>("baud-rate")
        .copied()
        .unwrap_or(config.baud_rate);
    let serial_number = matches
        .get_one::<String>("serial-number")
        .cloned()
        .unwrap_or_default();
    let operator = matches
        .get_one::<String>("operator")
        .cloned()
        .unwrap_or_else(whoami::username);
    let archive_path = matches
        .get_one::<PathBuf>("archive")
        .cloned()
        .unwrap_or_else(|| config.archive.clone());

    let serial_config = SerialConfig {
        baud: baud_rate,
        timeout: config.timings.line_timeout(),
        ..SerialConfig::default()
    };
    let transport = match SerialTransport::open(&port, &serial_config) {
        Ok(transport) => transport,
        Err(err) => {
            // The board never got tested, but the attempt is still recorded.
            let mut aggregator =
                SessionAggregator::new(Box::new(JsonlArchive::new(archive_path)));
            aggregator.start(&serial_number, &operator);
            aggregator.mark_aborted(format!("{err:#}"));
            if let Some(done) = aggregator.finalize() {
                render(&CoreToUi::Finished(Box::new(done)), json)?;
            }
            return Err(err);
        }
    };
    if let Err(err) = persistence::save_last_port(&port) {
        log::warn!("Failed to remember port {port}: {err:#}");
    }

    let (bus, hook) = Bus::pair();
    let stop_tx = bus.ui_tx.clone();
    ctrlc::set_handler(move || {
        if stop_tx.send(UiToCore::Stop).is_err() {
            log::debug!("Worker already gone, ignoring Ctrl-C");
        }
    })
    .context("Failed to install Ctrl-C handler")?;

    let worker = thread::Builder::new()
        .name("powerqa-worker".into())
        .spawn(move || -> Result<FinalizedSession> {
            let mut sequencer = Sequencer::builder(Box::new(transport))
                .with_calibration(config.calibration)
                .with_timings(config.timings)
                .with_tuning(config.sweep)
                .with_archive(Box::new(JsonlArchive::new(archive_path)))
                .add_hook(Arc::new(hook))
                .build();
            sequencer.run(&serial_number, &operator)
        })
        .context("Failed to spawn worker thread")?;

    loop {
        match bus.core_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(event) => render(&event, json)?,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    let done = worker
        .join()
        .map_err(|_| anyhow!("Worker thread panicked"))??;
    Ok(done.session.verdict == TestStatus::Ok)
}

fn render(event: &CoreToUi, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }

    match event {
        CoreToUi::Progress(entry) => println!("{entry}"),
        CoreToUi::StageStarted { stage } => println!("\n== {stage} =="),
        CoreToUi::CheckFinished { field, outcome } => println!(
            "  {:<24} {:<3} {}",
            field.to_string(),
            if outcome.passed { "OK" } else { "NG" },
            outcome.message
        ),
        CoreToUi::SweepFinished { stage, outcome } => {
            let show = |value: Option<f64>| match value {
                Some(v) => format!("{v:.3}"),
                None => "-".to_string(),
            };
            println!(
                "  {stage}: load alarm {}% @ {} V, rail 5V {}% @ {} V, rail 15V {}% @ {} V",
                show(outcome.duty_at_load_alarm),
                show(outcome.battery_at_load_alarm),
                show(outcome.duty_at_rail_5v_collapse),
                show(outcome.battery_at_rail_5v_collapse),
                show(outcome.duty_at_rail_15v_collapse),
                show(outcome.battery_at_rail_15v_collapse),
            );
        }
        CoreToUi::Fault { reason } => eprintln!("FAULT: {reason}"),
        CoreToUi::Finished(done) => print_summary(done),
    }
    Ok(())
}

fn print_summary(done: &FinalizedSession) {
    let session = &done.session;
    println!("\nSession {}", session.id);
    println!(
        "Board {:?}, operator {}, started {}",
        session.serial_number,
        session.operator,
        session.started_at.format("%Y-%m-%d %H:%M:%S")
    );
    for (field, status) in &session.results {
        println!("  {:<24} {status}", field.to_string());
    }
    if let Some(reason) = &session.aborted {
        println!("Aborted: {reason}");
    }
    let pending = session
        .results
        .values()
        .filter(|s| **s == TestStatus::Pending)
        .count();
    if pending > 0 {
        println!("Not run: {pending}");
    }
    println!(
        "Verdict: {}{}",
        session.verdict,
        if done.archived { "" } else { " (not archived)" }
    );
}
