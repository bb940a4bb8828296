//! Core data types for the teleoperation pipeline

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// A canonical vehicle command. The closed set every modality resolves into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Takeoff,
    Land,
    Hover,
    MoveForward,
    MoveBackward,
    MoveLeft,
    MoveRight,
    MoveUp,
    MoveDown,
    RotateLeft,
    RotateRight,
    FlipForward,
    FlipBackward,
    FlipLeft,
    FlipRight,
}

impl Command {
    /// All commands in vocabulary declaration order.
    pub const ALL: [Command; 15] = [
        Command::Takeoff,
        Command::Land,
        Command::MoveForward,
        Command::MoveBackward,
        Command::RotateLeft,
        Command::RotateRight,
        Command::MoveLeft,
        Command::MoveRight,
        Command::MoveUp,
        Command::MoveDown,
        Command::Hover,
        Command::FlipForward,
        Command::FlipBackward,
        Command::FlipLeft,
        Command::FlipRight,
    ];

    /// Canonical lowercase name, as shown to the operator.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Takeoff => "takeoff",
            Command::Land => "land",
            Command::Hover => "hover",
            Command::MoveForward => "move forward",
            Command::MoveBackward => "move backward",
            Command::MoveLeft => "move left",
            Command::MoveRight => "move right",
            Command::MoveUp => "move up",
            Command::MoveDown => "move down",
            Command::RotateLeft => "rotate left",
            Command::RotateRight => "rotate right",
            Command::FlipForward => "flip forward",
            Command::FlipBackward => "flip backward",
            Command::FlipLeft => "flip left",
            Command::FlipRight => "flip right",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The input modality currently allowed to reach the command pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modality {
    Idle,
    Gesture,
    Voice,
    VisionQuery,
}

impl Modality {
    pub fn label(&self) -> &'static str {
        match self {
            Modality::Idle => "idle",
            Modality::Gesture => "gesture",
            Modality::Voice => "voice",
            Modality::VisionQuery => "vision-query",
        }
    }

    /// Parses an operator-facing mode name. Accepts a couple of spoken-style
    /// aliases ("audio" for voice, "vlm" for vision queries).
    pub fn from_label(label: &str) -> Option<Modality> {
        match label.trim().to_lowercase().as_str() {
            "idle" => Some(Modality::Idle),
            "gesture" => Some(Modality::Gesture),
            "voice" | "audio" => Some(Modality::Voice),
            "vision" | "vision-query" | "vlm" => Some(Modality::VisionQuery),
            _ => None,
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Whether the vehicle is on the ground or in the air.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightState {
    Grounded,
    Airborne,
}

impl FlightState {
    pub fn is_airborne(self) -> bool {
        self == FlightState::Airborne
    }
}

impl fmt::Display for FlightState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FlightState::Grounded => "grounded",
            FlightState::Airborne => "airborne",
        })
    }
}

/// Raw text produced by a listener, waiting in the command queue.
#[derive(Debug, Clone)]
pub struct RawUtterance {
    /// Transcript or free-text query.
    pub text: String,
    /// Which listener produced it.
    pub modality: Modality,
    /// When the listener captured it.
    pub captured_at: Instant,
}

impl RawUtterance {
    pub fn new(text: impl Into<String>, modality: Modality) -> Self {
        Self {
            text: text.into(),
            modality,
            captured_at: Instant::now(),
        }
    }
}

/// Which camera feed drives the frame pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraSource {
    Pc,
    Vehicle,
}

impl CameraSource {
    pub fn label(&self) -> &'static str {
        match self {
            CameraSource::Pc => "pc",
            CameraSource::Vehicle => "vehicle",
        }
    }

    pub fn from_label(label: &str) -> Option<CameraSource> {
        match label.trim().to_lowercase().as_str() {
            "pc" | "webcam" => Some(CameraSource::Pc),
            "vehicle" | "drone" => Some(CameraSource::Vehicle),
            _ => None,
        }
    }
}

impl fmt::Display for CameraSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A captured camera frame. Never mutated after capture; conditioning steps
/// (mirroring, color correction) produce new frames.
#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    /// Row-major RGB8 pixel data.
    pub pixels: Vec<u8>,
    /// Which camera produced the frame.
    pub source: CameraSource,
    pub captured_at: Instant,
}

impl Frame {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>, source: CameraSource) -> Self {
        Self {
            width,
            height,
            pixels,
            source,
            captured_at: Instant::now(),
        }
    }
}

/// Runtime configuration, loadable from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PilotConfig {
    /// PC camera device index
    pub camera_index: i32,
    /// Camera feed active at startup
    pub initial_camera: CameraSource,
    /// Path to speech-model weights (ggml format)
    pub speech_model_path: String,
    /// Audio input device name; None selects the system default
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_device: Option<String>,
    /// Maximum seconds of audio captured per voice phrase
    pub phrase_limit_secs: u64,
    /// Bounded command queue capacity
    pub queue_capacity: usize,
    /// Vision-model HTTP endpoint
    pub vision_endpoint: String,
    /// Vision-model name
    pub vision_model: String,
    /// Seconds to wait for a vision-model response
    pub vision_timeout_secs: u64,
    /// Minimum seconds between vision-model round trips
    pub vision_cooldown_secs: u64,
    /// Seconds between watchdog ticks (2-5)
    pub watchdog_interval_secs: u64,
    /// Battery percentage that triggers automatic landing
    pub low_battery_percent: u8,
    /// Battery percentage that triggers emergency landing
    pub critical_battery_percent: u8,
    /// Consecutive identical classifications required to accept a gesture
    pub gesture_streak: u32,
    /// Classifier confidence a gesture frame must exceed
    pub gesture_confidence: f32,
    /// Milliseconds to pause after an accepted gesture
    pub gesture_delay_ms: u64,
    /// Distance in centimeters for linear moves
    pub move_distance_cm: u32,
    /// Degrees for rotation commands
    pub rotate_angle_deg: u32,
}

impl Default for PilotConfig {
    fn default() -> Self {
        Self {
            camera_index: 0,
            initial_camera: CameraSource::Pc,
            speech_model_path: "models/ggml-base.en.bin".to_string(),
            audio_device: None,
            phrase_limit_secs: 4,
            queue_capacity: 5,
            vision_endpoint: "http://localhost:11434".to_string(),
            vision_model: "llava".to_string(),
            vision_timeout_secs: 120,
            vision_cooldown_secs: 3,
            watchdog_interval_secs: 2,
            low_battery_percent: 15,
            critical_battery_percent: 10,
            gesture_streak: 5,
            gesture_confidence: 0.9,
            gesture_delay_ms: 500,
            move_distance_cm: 30,
            rotate_angle_deg: 45,
        }
    }
}

impl PilotConfig {
    /// Rejects configurations the safety model cannot support.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(2..=5).contains(&self.watchdog_interval_secs) {
            anyhow::bail!(
                "watchdog_interval_secs must be between 2 and 5, got {}",
                self.watchdog_interval_secs
            );
        }
        if self.critical_battery_percent >= self.low_battery_percent {
            anyhow::bail!(
                "critical_battery_percent ({}) must be below low_battery_percent ({})",
                self.critical_battery_percent,
                self.low_battery_percent
            );
        }
        if self.low_battery_percent > 100 {
            anyhow::bail!("low_battery_percent must be a percentage, got {}", self.low_battery_percent);
        }
        if self.queue_capacity == 0 {
            anyhow::bail!("queue_capacity must be at least 1");
        }
        if self.gesture_streak == 0 {
            anyhow::bail!("gesture_streak must be at least 1");
        }
        if !(0.0..1.0).contains(&self.gesture_confidence) {
            anyhow::bail!(
                "gesture_confidence must be in [0, 1), got {}",
                self.gesture_confidence
            );
        }
        if self.phrase_limit_secs == 0 {
            anyhow::bail!("phrase_limit_secs must be at least 1");
        }
        Ok(())
    }

    pub fn phrase_limit(&self) -> Duration {
        Duration::from_secs(self.phrase_limit_secs)
    }

    pub fn vision_timeout(&self) -> Duration {
        Duration::from_secs(self.vision_timeout_secs)
    }

    pub fn vision_cooldown(&self) -> Duration {
        Duration::from_secs(self.vision_cooldown_secs)
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_secs(self.watchdog_interval_secs)
    }

    pub fn gesture_delay(&self) -> Duration {
        Duration::from_millis(self.gesture_delay_ms)
    }
}
