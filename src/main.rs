//! Aircrew - multimodal quadcopter teleoperation
//!
//! Entry point: parses the CLI, loads configuration, connects to the vehicle
//! and spawns the control tasks. The vehicle link is simulated; a real
//! transport plugs in behind the same trait.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::LevelFilter;

use aircrew::vision::{SimulatedGestureClassifier, SimulatedHandTracker, SimulatedPcCamera};
use aircrew::{
    vocabulary, CameraSource, Cockpit, Command, FrameSource, GestureRig, PilotConfig,
    SimulatedVehicle, SpeechCapture, SpeechToText, VehicleTransport, VisionModel,
};

#[derive(Parser)]
#[command(name = "aircrew", version, about = "Fly a quadcopter by gesture, voice, or vision query")]
struct Cli {
    /// Path to a TOML config file; built-in defaults apply when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Cmd>,
}

#[derive(Subcommand)]
enum Cmd {
    /// Connect to the vehicle and start the control loop (the default)
    Fly {
        /// Start on the vehicle camera instead of the PC webcam
        #[arg(long)]
        vehicle_camera: bool,
    },
    /// Print the effective configuration as TOML
    Config,
    /// List the canonical commands and the phrases that map to them
    Commands,
    /// List audio input devices usable for the voice listener
    #[cfg(feature = "audio")]
    Devices,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref())?;

    env_logger::Builder::from_default_env()
        .filter_level(LevelFilter::Info)
        .init();

    match cli.command.unwrap_or(Cmd::Fly {
        vehicle_camera: false,
    }) {
        Cmd::Fly { vehicle_camera } => {
            if vehicle_camera {
                config.initial_camera = CameraSource::Vehicle;
            }
            fly(config).await
        }
        Cmd::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Cmd::Commands => {
            print_commands();
            Ok(())
        }
        #[cfg(feature = "audio")]
        Cmd::Devices => {
            let devices = aircrew::voice::list_input_devices();
            if devices.is_empty() {
                println!("no audio input devices found");
            }
            for name in devices {
                println!("{name}");
            }
            Ok(())
        }
    }
}

async fn fly(config: PilotConfig) -> Result<()> {
    log::info!("aircrew starting up");
    let transport: Arc<dyn VehicleTransport> = Arc::new(SimulatedVehicle::new());

    let (pc_source, rig) = vision_parts(&config);
    let gesture_available = rig.is_some();
    let mut cockpit =
        Cockpit::connect(transport, &config, config.initial_camera, gesture_available).await?;

    let stop = cockpit.shutdown_handle();
    ctrlc::set_handler(move || {
        log::info!("ctrl-c received, shutting down");
        stop.signal();
    })
    .context("installing the ctrl-c handler")?;

    cockpit.spawn_watchdog(&config);
    cockpit.spawn_arbiter(vision_model(&config), &config);
    match speech_parts(&config) {
        Ok((capture, stt)) => cockpit.spawn_voice(capture, stt, &config),
        Err(err) => log::warn!("voice input disabled: {err:#}"),
    }
    cockpit.spawn_pipeline(pc_source, rig);
    cockpit.spawn_console();

    cockpit.wait_for_shutdown().await;
    cockpit.shutdown().await;
    log::info!("goodbye");
    Ok(())
}

fn load_config(path: Option<&std::path::Path>) -> Result<PilotConfig> {
    let config = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))?
        }
        None => PilotConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

fn print_commands() {
    for command in Command::ALL {
        println!("{:<16} {}", command.name(), vocabulary::variants(command).join(", "));
    }
}

/// PC-side frame source plus the gesture rig that watches it.
fn vision_parts(config: &PilotConfig) -> (Box<dyn FrameSource>, Option<GestureRig>) {
    let rig = GestureRig::new(
        Box::new(SimulatedHandTracker::new()),
        Box::new(SimulatedGestureClassifier::new(320, 240)),
        config,
    );
    (pc_camera(config), Some(rig))
}

#[cfg(feature = "camera")]
fn pc_camera(config: &PilotConfig) -> Box<dyn FrameSource> {
    use aircrew::vision::WebcamSource;
    match WebcamSource::open(config.camera_index) {
        Ok(webcam) => Box::new(webcam),
        Err(err) => {
            log::warn!(
                "webcam {} unavailable ({err}), using the simulated camera",
                config.camera_index
            );
            Box::new(SimulatedPcCamera::new())
        }
    }
}

#[cfg(not(feature = "camera"))]
fn pc_camera(_config: &PilotConfig) -> Box<dyn FrameSource> {
    Box::new(SimulatedPcCamera::new())
}

#[cfg(feature = "vision-model")]
fn vision_model(config: &PilotConfig) -> Arc<dyn VisionModel> {
    use aircrew::vlm::OllamaVision;
    log::info!(
        "vision queries go to {} ({})",
        config.vision_endpoint,
        config.vision_model
    );
    Arc::new(OllamaVision::new(&config.vision_endpoint, &config.vision_model))
}

#[cfg(not(feature = "vision-model"))]
fn vision_model(_config: &PilotConfig) -> Arc<dyn VisionModel> {
    use aircrew::SimulatedVision;
    log::info!("built without the vision-model feature, query answers are simulated");
    Arc::new(SimulatedVision)
}

#[cfg(feature = "audio")]
fn speech_parts(config: &PilotConfig) -> Result<(Box<dyn SpeechCapture>, Box<dyn SpeechToText>)> {
    use aircrew::voice::{list_input_devices, CpalCapture, WhisperStt};
    let devices = list_input_devices();
    if devices.is_empty() {
        log::warn!("no audio input devices found");
    } else {
        log::info!("audio input devices: {}", devices.join(", "));
    }
    let stt = WhisperStt::new(std::path::Path::new(&config.speech_model_path))?;
    let capture = CpalCapture::new(config.audio_device.clone());
    Ok((Box::new(capture), Box::new(stt)))
}

#[cfg(not(feature = "audio"))]
fn speech_parts(_config: &PilotConfig) -> Result<(Box<dyn SpeechCapture>, Box<dyn SpeechToText>)> {
    anyhow::bail!("built without the audio feature")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_config_path_uses_defaults() {
        let config = load_config(None).unwrap();
        assert_eq!(config.queue_capacity, 5);
        assert_eq!(config.vision_model, "llava");
    }

    #[test]
    fn config_file_overrides_survive_a_round_trip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "move_distance_cm = 50\nvision_model = \"bakllava\"").unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.move_distance_cm, 50);
        assert_eq!(config.vision_model, "bakllava");
        // Everything else keeps its default.
        assert_eq!(config.rotate_angle_deg, 45);

        let rendered = toml::to_string_pretty(&config).unwrap();
        let reparsed: PilotConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(reparsed.move_distance_cm, 50);
    }

    #[test]
    fn invalid_thresholds_are_rejected_at_load() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "low_battery_percent = 5\ncritical_battery_percent = 10").unwrap();
        assert!(load_config(Some(file.path())).is_err());
    }
}
