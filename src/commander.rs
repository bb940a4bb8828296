//! Vehicle command sink
//!
//! The single serialization point for everything that touches the vehicle.
//! Owns the ground/air state machine; every other component routes through
//! here so the guard logic cannot be bypassed.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Mutex;

use crate::transport::{
    FlipDirection, MoveDirection, TurnDirection, VehicleError, VehicleTransport,
};
use crate::types::{Command, FlightState, Frame, PilotConfig};

/// Result of asking the sink to execute one command.
#[derive(Debug)]
pub enum ExecuteOutcome {
    /// The vehicle accepted the command.
    Executed,
    /// A flight-state guard stopped the command before any vehicle call.
    Rejected(&'static str),
    /// The transport call failed.
    Failed(VehicleError),
}

impl ExecuteOutcome {
    pub fn is_executed(&self) -> bool {
        matches!(self, ExecuteOutcome::Executed)
    }
}

/// The command sink. Sole writer of [`FlightState`] and sole caller of
/// vehicle primitives.
pub struct VehicleCommander {
    transport: Arc<dyn VehicleTransport>,
    flight: RwLock<FlightState>,
    /// Held across guard check, dispatch, and state transition, so concurrent
    /// `execute` calls cannot both pass the same guard.
    gate: Mutex<()>,
    move_distance_cm: u32,
    rotate_angle_deg: u32,
}

impl VehicleCommander {
    pub fn new(transport: Arc<dyn VehicleTransport>, config: &PilotConfig) -> Self {
        Self {
            transport,
            flight: RwLock::new(FlightState::Grounded),
            gate: Mutex::new(()),
            move_distance_cm: config.move_distance_cm,
            rotate_angle_deg: config.rotate_angle_deg,
        }
    }

    pub fn flight_state(&self) -> FlightState {
        *self.flight.read()
    }

    /// Establishes the command session. Failure here is the one fatal path.
    pub async fn connect(&self) -> Result<(), VehicleError> {
        self.transport.connect().await
    }

    /// Runs one command through the guards and, if allowed, the transport.
    /// Transport failures trigger a best-effort stabilizing hover; nothing in
    /// here panics or propagates.
    pub async fn execute(&self, command: Command) -> ExecuteOutcome {
        // Commands run one at a time; a second caller waits here and sees the
        // flight state the first one left behind.
        let _gate = self.gate.lock().await;
        let state = self.flight_state();
        if let Some(reason) = guard_reason(command, state) {
            log::info!("rejected {command}: {reason}");
            return ExecuteOutcome::Rejected(reason);
        }

        match self.dispatch(command).await {
            Ok(()) => {
                match command {
                    Command::Takeoff => *self.flight.write() = FlightState::Airborne,
                    Command::Land => *self.flight.write() = FlightState::Grounded,
                    _ => {}
                }
                log::info!("executed {command}");
                ExecuteOutcome::Executed
            }
            Err(err) => {
                log::error!("{command} failed: {err}");
                if self.flight_state().is_airborne() {
                    self.stabilize().await;
                }
                ExecuteOutcome::Failed(err)
            }
        }
    }

    /// Best-effort zero-velocity setpoint. Used to cancel residual motion on
    /// mode switches, after accepted gestures, as the grounded keep-alive
    /// heartbeat, and after transport failures. Its own failure is only
    /// logged.
    pub async fn stabilize(&self) {
        if let Err(err) = self.transport.set_velocity(0, 0, 0, 0).await {
            log::warn!("stabilizing hover failed: {err}");
        }
    }

    pub async fn battery(&self) -> Result<u8, VehicleError> {
        self.transport.battery().await
    }

    pub async fn video_frame(&self) -> Result<Option<Frame>, VehicleError> {
        self.transport.video_frame().await
    }

    pub async fn start_video(&self) -> Result<(), VehicleError> {
        log::info!("starting vehicle video stream");
        self.transport.start_video_stream().await
    }

    pub async fn stop_video(&self) -> Result<(), VehicleError> {
        log::info!("stopping vehicle video stream");
        self.transport.stop_video_stream().await
    }

    pub async fn end_session(&self) -> Result<(), VehicleError> {
        self.transport.end_session().await
    }

    async fn dispatch(&self, command: Command) -> Result<(), VehicleError> {
        let distance = self.move_distance_cm;
        let angle = self.rotate_angle_deg;
        match command {
            Command::Takeoff => self.transport.takeoff().await,
            Command::Land => self.transport.land().await,
            Command::Hover => self.transport.set_velocity(0, 0, 0, 0).await,
            Command::MoveForward => self.transport.move_by(MoveDirection::Forward, distance).await,
            Command::MoveBackward => self.transport.move_by(MoveDirection::Back, distance).await,
            Command::MoveLeft => self.transport.move_by(MoveDirection::Left, distance).await,
            Command::MoveRight => self.transport.move_by(MoveDirection::Right, distance).await,
            Command::MoveUp => self.transport.move_by(MoveDirection::Up, distance).await,
            Command::MoveDown => self.transport.move_by(MoveDirection::Down, distance).await,
            Command::RotateLeft => {
                self.transport.rotate(TurnDirection::CounterClockwise, angle).await
            }
            Command::RotateRight => self.transport.rotate(TurnDirection::Clockwise, angle).await,
            Command::FlipForward => self.transport.flip(FlipDirection::Forward).await,
            Command::FlipBackward => self.transport.flip(FlipDirection::Back).await,
            Command::FlipLeft => self.transport.flip(FlipDirection::Left).await,
            Command::FlipRight => self.transport.flip(FlipDirection::Right).await,
        }
    }
}

/// Why a command is not allowed in the given flight state, if it isn't.
fn guard_reason(command: Command, state: FlightState) -> Option<&'static str> {
    match command {
        Command::Takeoff if state.is_airborne() => Some("already flying"),
        Command::Takeoff => None,
        Command::Land if !state.is_airborne() => Some("already landed"),
        Command::Land => None,
        _ if !state.is_airborne() => Some("cannot execute while landed"),
        _ => None,
    }
}
