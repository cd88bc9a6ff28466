//! Fretbot player - streams songs to the servo controller
//!
//! ## Usage
//!
//! ```text
//! fretbot-player [--config <path>] [--simulate] play <song>
//! fretbot-player [--config <path>] [--simulate] stop
//! fretbot-player [--config <path>] list
//! fretbot-player [--config <path>] inspect <song>
//! fretbot-player [--config <path>] commands
//! ```
//!
//! `--simulate` replaces the serial port with an in-process controller
//! model. Set RUST_LOG=debug to see every packet and controller line.

mod config;
mod control;
mod library;
mod playback;

use anyhow::{bail, Context, Result};
use config::PlayerConfig;
use control::{Conductor, ProgressState, StartOutcome, Status, StopOutcome};
use fretbot_core::{Arrangement, Calibration, CommandCatalog};
use fretbot_link::{Connector, SerialConnector, SimClock, SimulatedController, SimulatorOptions};
use library::SongLibrary;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

enum Action {
    Play(String),
    Stop,
    List,
    Inspect(String),
    Commands,
}

struct Args {
    config_path: Option<PathBuf>,
    simulate: bool,
    action: Action,
}

fn usage() -> &'static str {
    "usage: fretbot-player [--config <path>] [--simulate] <play <song> | stop | list | inspect <song> | commands>"
}

fn parse_args(args: &[String]) -> Result<Args> {
    let mut config_path = None;
    let mut simulate = false;
    let mut positional = Vec::new();

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                let path = iter.next().context("--config needs a path")?;
                config_path = Some(PathBuf::from(path));
            }
            "--simulate" => simulate = true,
            "-h" | "--help" => bail!(usage()),
            other if other.starts_with("--") => bail!("unknown flag {}\n{}", other, usage()),
            other => positional.push(other.to_string()),
        }
    }

    let action = match positional.as_slice() {
        [cmd, song] if cmd == "play" => Action::Play(song.clone()),
        [cmd, song] if cmd == "inspect" => Action::Inspect(song.clone()),
        [cmd] if cmd == "stop" => Action::Stop,
        [cmd] if cmd == "list" => Action::List,
        [cmd] if cmd == "commands" => Action::Commands,
        _ => bail!(usage()),
    };

    Ok(Args {
        config_path,
        simulate,
        action,
    })
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let args = parse_args(&args)?;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let config_path = args.config_path.unwrap_or_else(config::default_config_path);
    let config = fretbot_core::config::load_config::<PlayerConfig>(&config_path).validated();
    log::info!("fretbot-player starting (config {:?})", config_path);

    let library = SongLibrary::new(&config.paths.songs_dir);

    match args.action {
        Action::List => {
            let names = library.list();
            if names.is_empty() {
                eprintln!("no songs in {:?}", library.dir());
            }
            for name in names {
                println!("{}", name);
            }
            Ok(())
        }
        Action::Inspect(name) => {
            let calibration = load_calibration(&config)?;
            inspect(&library, &calibration, &config, &name)
        }
        Action::Commands => {
            let calibration = load_calibration(&config)?;
            let catalog = CommandCatalog::from_calibration(&calibration);
            for name in catalog.names() {
                println!("{}", name);
            }
            Ok(())
        }
        Action::Stop => {
            let calibration = load_calibration(&config)?;
            let conductor = Conductor::new(
                connector(&config, args.simulate),
                &calibration,
                library,
                config.timing,
            );
            match conductor.stop() {
                StopOutcome::Stopping { song } => println!("stopping {}", song),
                StopOutcome::Idle => println!("idle"),
            }
            Ok(())
        }
        Action::Play(name) => {
            if !library.contains(&name) {
                bail!("no such song: {} (in {:?})", name, library.dir());
            }
            let calibration = load_calibration(&config)?;
            let conductor = Conductor::new(
                connector(&config, args.simulate),
                &calibration,
                library,
                config.timing,
            );
            play(&conductor, &name)
        }
    }
}

fn load_calibration(config: &PlayerConfig) -> Result<Calibration> {
    Calibration::load(&config.paths.calibration)
        .with_context(|| format!("Failed to load calibration {:?}", config.paths.calibration))
}

fn connector(config: &PlayerConfig, simulate: bool) -> Arc<dyn Connector> {
    let connector: Arc<dyn Connector> = if simulate {
        Arc::new(SimulatedController::new(SimulatorOptions {
            clock: SimClock::Realtime,
            debug_lines: true,
            ..Default::default()
        }))
    } else {
        Arc::new(SerialConnector::new(config.serial.settings()))
    };
    log::info!("Controller: {}", connector.describe());
    connector
}

fn play(conductor: &Conductor, name: &str) -> Result<()> {
    let reports = conductor.reports();
    match conductor.start(name)? {
        StartOutcome::Started { song } => println!("playing {}", song),
        StartOutcome::AlreadyPlaying { song } => bail!("busy: {} is playing", song),
        StartOutcome::NotFound => bail!("no such song: {}", name),
    }

    loop {
        match reports.recv_timeout(PROGRESS_INTERVAL) {
            Ok(report) => {
                let outcome = report
                    .result
                    .with_context(|| format!("Playback of {} failed", report.song))?;
                println!("{}: {:?}", report.song, outcome);
                return Ok(());
            }
            Err(crossbeam::channel::RecvTimeoutError::Timeout) => {
                let progress = conductor.progress();
                if let (Status::Playing { phase, .. }, ProgressState::Playing) =
                    (conductor.status(), progress.state)
                {
                    println!("{:?} {:>5.1}%", phase, progress.fraction * 100.0);
                }
            }
            Err(crossbeam::channel::RecvTimeoutError::Disconnected) => {
                bail!("playback worker went away")
            }
        }
    }
}

fn inspect(library: &SongLibrary, calibration: &Calibration, config: &PlayerConfig, name: &str) -> Result<()> {
    let song = library
        .load(name)?
        .with_context(|| format!("no such song: {}", name))?;
    let catalog = CommandCatalog::from_calibration(calibration);
    let timing = &config.timing;
    let arrangement = Arrangement::new(&song, &catalog, timing.timing())?;

    println!("{} @ {} bpm, {} events", name, arrangement.timing.bpm, arrangement.events.len());
    for resolved in &arrangement.events {
        let params = if resolved.event.params.is_empty() {
            String::new()
        } else {
            serde_json::to_string(&resolved.event.params)?
        };
        println!(
            "{:>8} ms  beat {:>7.2}  {:<10} {}",
            resolved.relative_ms, resolved.event.beat, resolved.event.command, params
        );
    }
    println!(
        "estimated duration: {} ms",
        arrangement.estimate_duration_ms(timing.sync_delay_ms, timing.end_slack_ms)
    );
    Ok(())
}
