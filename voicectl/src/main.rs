//! voicectl command-line host.
//!
//! Loads the settings file, builds a `VoiceController` from it and feeds it
//! from the microphone or a WAV file. Log output goes to stderr; with
//! `--json-events` every controller event is also printed to stdout as one
//! JSON object per line.

mod actions;
mod settings;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use settings::{default_settings_path, load_settings, save_settings, Settings};
use voicectl_core::{
    audio::list_input_devices, wake::EnergyWakeEngine, AudioSource, CommandArgs,
    ControllerHooks, CpalSource, HttpCloudEngine, NoiseFloor, VoiceController, VoiceError,
    WakeWordEngine, WavSource,
};

/// voicectl - wake-word gated voice commands
#[derive(Parser)]
#[command(name = "voicectl", version, about)]
struct Cli {
    /// Settings file (defaults to the user data directory)
    #[arg(short, long, env = "VOICECTL_CONFIG")]
    config: Option<PathBuf>,

    /// Print controller events to stdout as JSON lines
    #[arg(long)]
    json_events: bool,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Listen on the microphone until Ctrl-C
    Listen {
        /// Input device name (overrides the settings file)
        #[arg(short, long)]
        device: Option<String>,
    },
    /// Run the pipeline over a WAV file
    Replay {
        path: PathBuf,
        /// Pace the file at real time instead of as fast as possible
        #[arg(long)]
        realtime: bool,
    },
    /// Match text against the configured commands without any audio
    Dispatch {
        #[arg(required = true, num_args = 1..)]
        utterance: Vec<String>,
    },
    /// List audio input devices
    Devices,
    /// Write a default settings file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let fallback = match cli.verbose {
        0 => "voicectl=info,voicectl_core=info",
        1 => "voicectl=debug,voicectl_core=debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let settings_path = cli.config.clone().unwrap_or_else(default_settings_path);

    if let Command::Init { force } = cli.command {
        if settings_path.exists() && !force {
            bail!(
                "{} already exists (use --force to overwrite)",
                settings_path.display()
            );
        }
        save_settings(&settings_path, &Settings::default())
            .with_context(|| format!("writing {}", settings_path.display()))?;
        println!("wrote {}", settings_path.display());
        return Ok(());
    }
    if let Command::Devices = cli.command {
        print_devices();
        return Ok(());
    }

    let settings = load_settings(&settings_path)?;
    info!(
        settings_path = %settings_path.display(),
        wake_word = %settings.wake_word,
        sample_rate = settings.sample_rate,
        commands = settings.commands.len(),
        clock = ?settings.clock,
        "settings loaded"
    );
    let controller = Arc::new(build_controller(&settings)?);
    if cli.json_events {
        forward_events_as_json(&controller);
    }

    match cli.command {
        Command::Listen { device } => {
            warn_without_api_key(&settings);
            let device = device.or_else(|| settings.preferred_input_device.clone());
            let (rate, frame) = (settings.sample_rate, settings.frame_size());
            controller.start(move || {
                let source = CpalSource::open(device.as_deref(), rate, frame)?;
                info!(device = source.device_name(), "microphone opened");
                Ok(Box::new(source) as Box<dyn AudioSource>)
            })?;
            run_until_done(controller).await
        }
        Command::Replay { path, realtime } => {
            warn_without_api_key(&settings);
            let source = WavSource::open(&path, settings.sample_rate, settings.frame_size())
                .with_context(|| format!("opening {}", path.display()))?
                .with_realtime(realtime);
            controller.start(move || Ok(Box::new(source) as Box<dyn AudioSource>))?;
            run_until_done(controller).await
        }
        Command::Dispatch { utterance } => {
            let text = utterance.join(" ");
            let report = controller.dispatch(&text);
            for name in &report.handled {
                println!("handled: {name}");
            }
            if let Some(unknown) = &report.unknown {
                println!("unknown: {unknown}");
            }
            if let Some((name, message)) = &report.failed {
                bail!("command '{name}' failed: {message}");
            }
            Ok(())
        }
        Command::Devices | Command::Init { .. } => Ok(()),
    }
}

fn build_controller(settings: &Settings) -> anyhow::Result<VoiceController> {
    let floor = NoiseFloor::new();
    let wake_config = settings.wake_config(&floor);
    let wake_factory = move || -> voicectl_core::Result<Box<dyn WakeWordEngine>> {
        Ok(Box::new(EnergyWakeEngine::new(wake_config.clone())))
    };
    let cloud = HttpCloudEngine::new(settings.cloud_config(&floor));

    let mut controller =
        VoiceController::new(settings.controller_config(&floor), wake_factory, cloud)
            .with_hooks(Arc::new(LogHooks));
    let registry = controller.registry_mut()?;
    registry.set_strip_punctuation(settings.strip_punctuation);
    registry.set_transliterate(settings.transliterate);
    for (word, alternatives) in &settings.synonyms {
        controller.add_synonyms(word, alternatives)?;
    }
    for spec in &settings.commands {
        controller
            .add_command(&spec.pattern, actions::handler_for(&spec.pattern, &spec.action))
            .with_context(|| format!("registering command '{}'", spec.pattern))?;
    }
    Ok(controller)
}

/// Waits for the pipeline to end on its own or stops it on Ctrl-C.
async fn run_until_done(controller: Arc<VoiceController>) -> anyhow::Result<()> {
    let mut joined = {
        let controller = Arc::clone(&controller);
        tokio::task::spawn_blocking(move || controller.join())
    };
    tokio::select! {
        res = &mut joined => res.context("join task failed")??,
        signal = tokio::signal::ctrl_c() => {
            signal.context("listening for Ctrl-C")?;
            info!("interrupt received, stopping");
            if let Err(e) = controller.stop() {
                debug!(error = %e, "stop after the pipeline already ended");
            }
            joined.await.context("join task failed")??;
        }
    }
    if let Some(diag) = controller.diagnostics() {
        info!(
            frames = diag.frames_routed,
            detections = diag.detections,
            sessions = diag.sessions,
            spliced_samples = diag.spliced_samples,
            "pipeline finished"
        );
    }
    Ok(())
}

fn forward_events_as_json(controller: &VoiceController) {
    let mut events = controller.subscribe_events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(e) => warn!("serialize event: {e}"),
                },
                Err(RecvError::Lagged(n)) => warn!("event receiver lagged by {n} events"),
                Err(RecvError::Closed) => break,
            }
        }
    });
}

fn warn_without_api_key(settings: &Settings) {
    if settings.api_key.is_none() {
        warn!(
            "no cloud API key configured (set apiKey or {}); recognition will fail",
            settings::API_KEY_ENV
        );
    }
}

fn print_devices() {
    let devices = list_input_devices();
    if devices.is_empty() {
        println!("no input devices found");
        return;
    }
    for device in devices {
        let mut tags = Vec::new();
        if device.is_default {
            tags.push("default");
        }
        if device.is_recommended {
            tags.push("recommended");
        }
        if device.is_loopback {
            tags.push("loopback");
        }
        if tags.is_empty() {
            println!("{}", device.name);
        } else {
            println!("{} ({})", device.name, tags.join(", "));
        }
    }
}

/// Mirrors controller lifecycle points into the log.
struct LogHooks;

impl ControllerHooks for LogHooks {
    fn on_ready(&self) {
        info!("listening for the wake word");
    }

    fn on_triggered(&self) {
        info!("wake word heard, recording command");
    }

    fn on_begin_command(&self, name: &str, args: &CommandArgs) {
        debug!(command = name, args = %args, "command started");
    }

    fn on_finish_command(&self, name: &str, _args: &CommandArgs) {
        debug!(command = name, "command finished");
    }

    fn on_unknown_command(&self, text: &str) {
        info!(text, "no command matches");
    }

    fn on_error(&self, error: &VoiceError) {
        warn!(error = %error, "controller error");
    }
}
