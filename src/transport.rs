//! Vehicle transport abstraction
//!
//! The command link to the quadcopter, reduced to the primitives the rest of
//! the system needs. The simulated implementation stands in for a real
//! wireless link so the whole pipeline can run on a desk.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;

use crate::types::{CameraSource, Frame};

/// Failure of the underlying command link.
#[derive(Debug, Error)]
pub enum VehicleError {
    #[error("vehicle link not connected")]
    NotConnected,
    #[error("vehicle command failed: {0}")]
    Command(String),
    #[error("vehicle command timed out")]
    Timeout,
}

/// Direction for fixed-distance linear moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveDirection {
    Forward,
    Back,
    Left,
    Right,
    Up,
    Down,
}

/// Direction for fixed-angle rotations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnDirection {
    Clockwise,
    CounterClockwise,
}

/// Direction for flips.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlipDirection {
    Forward,
    Back,
    Left,
    Right,
}

/// The opaque command link to the vehicle. None of these calls are assumed
/// idempotent; every one may fail.
#[async_trait]
pub trait VehicleTransport: Send + Sync {
    /// Establish the command session.
    async fn connect(&self) -> Result<(), VehicleError>;
    async fn takeoff(&self) -> Result<(), VehicleError>;
    async fn land(&self) -> Result<(), VehicleError>;
    /// Linear move by a fixed distance in centimeters.
    async fn move_by(&self, direction: MoveDirection, distance_cm: u32) -> Result<(), VehicleError>;
    /// Rotate in place by a fixed angle in degrees.
    async fn rotate(&self, direction: TurnDirection, degrees: u32) -> Result<(), VehicleError>;
    async fn flip(&self, direction: FlipDirection) -> Result<(), VehicleError>;
    /// Continuous velocity setpoint; all zeros holds position.
    async fn set_velocity(
        &self,
        left_right: i8,
        forward_back: i8,
        up_down: i8,
        yaw: i8,
    ) -> Result<(), VehicleError>;
    /// Battery charge in percent. Doubles as the connection ping.
    async fn battery(&self) -> Result<u8, VehicleError>;
    /// Latest frame from the onboard camera, if the stream is up.
    async fn video_frame(&self) -> Result<Option<Frame>, VehicleError>;
    async fn start_video_stream(&self) -> Result<(), VehicleError>;
    async fn stop_video_stream(&self) -> Result<(), VehicleError>;
    /// Tear down the command session.
    async fn end_session(&self) -> Result<(), VehicleError>;
}

/// In-process vehicle used for dry runs and tests. Tracks enough physical
/// state (airborne, battery, stream) to behave plausibly over a session.
pub struct SimulatedVehicle {
    connected: AtomicBool,
    streaming: AtomicBool,
    airborne: AtomicBool,
    battery: Mutex<f32>,
    frame_counter: AtomicU32,
}

impl SimulatedVehicle {
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            streaming: AtomicBool::new(false),
            airborne: AtomicBool::new(false),
            battery: Mutex::new(100.0),
            frame_counter: AtomicU32::new(0),
        }
    }

    fn ensure_connected(&self) -> Result<(), VehicleError> {
        if self.connected.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(VehicleError::NotConnected)
        }
    }

    async fn command_latency(&self) {
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    fn synthesize_frame(&self) -> Frame {
        let n = self.frame_counter.fetch_add(1, Ordering::Relaxed);
        let (width, height) = (320u32, 240u32);
        let mut pixels = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            for x in 0..width {
                // Drifting gradient with a little sensor noise.
                let base = ((x + n * 3) % 256) as u8;
                let noise = fastrand::u8(0..16);
                pixels.push(base.saturating_add(noise));
                pixels.push(((y % 256) as u8).saturating_add(noise / 2));
                pixels.push((255 - base).saturating_sub(noise));
            }
        }
        Frame::new(width, height, pixels, CameraSource::Vehicle)
    }
}

impl Default for SimulatedVehicle {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VehicleTransport for SimulatedVehicle {
    async fn connect(&self) -> Result<(), VehicleError> {
        tokio::time::sleep(Duration::from_millis(100)).await;
        self.connected.store(true, Ordering::Relaxed);
        log::info!("simulated vehicle link established");
        Ok(())
    }

    async fn takeoff(&self) -> Result<(), VehicleError> {
        self.ensure_connected()?;
        if self.airborne.load(Ordering::Relaxed) {
            return Err(VehicleError::Command("already airborne".to_string()));
        }
        tokio::time::sleep(Duration::from_millis(300)).await;
        self.airborne.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn land(&self) -> Result<(), VehicleError> {
        self.ensure_connected()?;
        if !self.airborne.load(Ordering::Relaxed) {
            return Err(VehicleError::Command("not airborne".to_string()));
        }
        tokio::time::sleep(Duration::from_millis(300)).await;
        self.airborne.store(false, Ordering::Relaxed);
        Ok(())
    }

    async fn move_by(&self, _direction: MoveDirection, _distance_cm: u32) -> Result<(), VehicleError> {
        self.ensure_connected()?;
        if !self.airborne.load(Ordering::Relaxed) {
            return Err(VehicleError::Command("not airborne".to_string()));
        }
        self.command_latency().await;
        Ok(())
    }

    async fn rotate(&self, _direction: TurnDirection, _degrees: u32) -> Result<(), VehicleError> {
        self.ensure_connected()?;
        if !self.airborne.load(Ordering::Relaxed) {
            return Err(VehicleError::Command("not airborne".to_string()));
        }
        self.command_latency().await;
        Ok(())
    }

    async fn flip(&self, _direction: FlipDirection) -> Result<(), VehicleError> {
        self.ensure_connected()?;
        if !self.airborne.load(Ordering::Relaxed) {
            return Err(VehicleError::Command("not airborne".to_string()));
        }
        self.command_latency().await;
        Ok(())
    }

    async fn set_velocity(
        &self,
        _left_right: i8,
        _forward_back: i8,
        _up_down: i8,
        _yaw: i8,
    ) -> Result<(), VehicleError> {
        self.ensure_connected()?;
        Ok(())
    }

    async fn battery(&self) -> Result<u8, VehicleError> {
        self.ensure_connected()?;
        let mut battery = self.battery.lock();
        let drain = if self.airborne.load(Ordering::Relaxed) {
            0.2 + fastrand::f32() * 0.2
        } else {
            0.02
        };
        *battery = (*battery - drain).max(0.0);
        Ok(*battery as u8)
    }

    async fn video_frame(&self) -> Result<Option<Frame>, VehicleError> {
        self.ensure_connected()?;
        if !self.streaming.load(Ordering::Relaxed) {
            return Err(VehicleError::Command("video stream inactive".to_string()));
        }
        Ok(Some(self.synthesize_frame()))
    }

    async fn start_video_stream(&self) -> Result<(), VehicleError> {
        self.ensure_connected()?;
        self.streaming.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn stop_video_stream(&self) -> Result<(), VehicleError> {
        self.ensure_connected()?;
        self.streaming.store(false, Ordering::Relaxed);
        Ok(())
    }

    async fn end_session(&self) -> Result<(), VehicleError> {
        self.streaming.store(false, Ordering::Relaxed);
        self.connected.store(false, Ordering::Relaxed);
        log::info!("simulated vehicle link closed");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Recording transport shared by the sink, watchdog, and pipeline tests.

    use super::*;
    use std::collections::VecDeque;

    pub(crate) struct RecordingVehicle {
        pub calls: Mutex<Vec<String>>,
        /// Scripted battery reads; the last value repeats once drained.
        pub batteries: Mutex<VecDeque<u8>>,
        /// When set, the next flight command fails once.
        pub fail_next: AtomicBool,
        /// When set, battery reads fail.
        pub fail_battery: AtomicBool,
        /// When set, `video_frame` reports no frame.
        pub no_frames: AtomicBool,
    }

    impl RecordingVehicle {
        pub fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                batteries: Mutex::new(VecDeque::new()),
                fail_next: AtomicBool::new(false),
                fail_battery: AtomicBool::new(false),
                no_frames: AtomicBool::new(false),
            }
        }

        pub fn with_batteries(readings: &[u8]) -> Self {
            let vehicle = Self::new();
            vehicle.batteries.lock().extend(readings.iter().copied());
            vehicle
        }

        pub fn recorded(&self) -> Vec<String> {
            self.calls.lock().clone()
        }

        pub fn count_of(&self, prefix: &str) -> usize {
            self.calls
                .lock()
                .iter()
                .filter(|call| call.starts_with(prefix))
                .count()
        }

        fn record(&self, call: String) -> Result<(), VehicleError> {
            self.calls.lock().push(call);
            if self.fail_next.swap(false, Ordering::Relaxed) {
                return Err(VehicleError::Command("injected failure".to_string()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl VehicleTransport for RecordingVehicle {
        async fn connect(&self) -> Result<(), VehicleError> {
            self.record("connect".to_string())
        }

        async fn takeoff(&self) -> Result<(), VehicleError> {
            self.record("takeoff".to_string())
        }

        async fn land(&self) -> Result<(), VehicleError> {
            self.record("land".to_string())
        }

        async fn move_by(
            &self,
            direction: MoveDirection,
            distance_cm: u32,
        ) -> Result<(), VehicleError> {
            self.record(format!("move {direction:?} {distance_cm}"))
        }

        async fn rotate(&self, direction: TurnDirection, degrees: u32) -> Result<(), VehicleError> {
            self.record(format!("rotate {direction:?} {degrees}"))
        }

        async fn flip(&self, direction: FlipDirection) -> Result<(), VehicleError> {
            self.record(format!("flip {direction:?}"))
        }

        async fn set_velocity(
            &self,
            left_right: i8,
            forward_back: i8,
            up_down: i8,
            yaw: i8,
        ) -> Result<(), VehicleError> {
            self.record(format!("set_velocity {left_right} {forward_back} {up_down} {yaw}"))
        }

        async fn battery(&self) -> Result<u8, VehicleError> {
            self.calls.lock().push("battery".to_string());
            if self.fail_battery.load(Ordering::Relaxed) {
                return Err(VehicleError::Timeout);
            }
            let mut batteries = self.batteries.lock();
            let level = if batteries.len() > 1 {
                batteries.pop_front().unwrap_or(80)
            } else {
                batteries.front().copied().unwrap_or(80)
            };
            Ok(level)
        }

        async fn video_frame(&self) -> Result<Option<Frame>, VehicleError> {
            self.calls.lock().push("video_frame".to_string());
            if self.no_frames.load(Ordering::Relaxed) {
                return Ok(None);
            }
            let pixels = vec![128u8; 8 * 8 * 3];
            Ok(Some(Frame::new(8, 8, pixels, CameraSource::Vehicle)))
        }

        async fn start_video_stream(&self) -> Result<(), VehicleError> {
            self.record("start_video".to_string())
        }

        async fn stop_video_stream(&self) -> Result<(), VehicleError> {
            self.record("stop_video".to_string())
        }

        async fn end_session(&self) -> Result<(), VehicleError> {
            self.record("end_session".to_string())
        }
    }
}
