//! # Aircrew - multimodal quadcopter teleoperation
//!
//! A front-end that flies a small quadcopter from whichever input channel the
//! operator selects: hand gestures picked out of a camera feed, spoken
//! commands, or free-text questions answered by a vision-language model. All
//! three funnel into one arbitration loop and one command sink, so exactly one
//! modality can move the vehicle at a time and every command passes the same
//! flight-state guards.

pub mod arbiter;
pub mod commander;
pub mod console;
pub mod mode;
pub mod queue;
pub mod transport;
pub mod types;
pub mod vision;
pub mod vlm;
pub mod vocabulary;
pub mod voice;
pub mod watchdog;

pub use arbiter::Arbiter;
pub use commander::{ExecuteOutcome, VehicleCommander};
pub use console::Console;
pub use mode::ModeSwitch;
pub use queue::{CommandQueue, FrameRelay};
pub use transport::{SimulatedVehicle, VehicleError, VehicleTransport};
pub use types::*;
pub use vision::{CameraSwitch, FramePipeline, FrameSource, GestureRig};
pub use vlm::{SimulatedVision, VisionModel};
pub use voice::{SpeechCapture, SpeechToText, VoiceListener};
pub use watchdog::Watchdog;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::vision::VehicleCameraSource;

/// Cooperative stop signal shared by every task.
#[derive(Clone)]
pub struct Shutdown {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn signal(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_signaled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Completes once `signal` has been called. A signal raised between the
    /// flag check and the sleep still wakes this up.
    pub async fn wait(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_signaled() {
            return;
        }
        notified.await;
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// The assembled control system: one sink, one mode machine, one queue, one
/// relay, and the tasks that drive them.
pub struct Cockpit {
    commander: Arc<VehicleCommander>,
    modes: Arc<ModeSwitch>,
    cameras: Arc<CameraSwitch>,
    queue: Arc<CommandQueue>,
    relay: Arc<FrameRelay>,
    shutdown: Shutdown,
    tasks: Vec<JoinHandle<()>>,
}

impl Cockpit {
    /// Connects to the vehicle and builds the shared plumbing. A failed
    /// connection is the only fatal startup error.
    pub async fn connect(
        transport: Arc<dyn VehicleTransport>,
        config: &PilotConfig,
        initial_camera: CameraSource,
        gesture_available: bool,
    ) -> anyhow::Result<Self> {
        let commander = Arc::new(VehicleCommander::new(transport, config));
        commander
            .connect()
            .await
            .context("connecting to the vehicle")?;
        match commander.battery().await {
            Ok(level) => log::info!("connected, battery at {level}%"),
            Err(err) => log::warn!("connected, battery unknown: {err}"),
        }

        Ok(Self {
            modes: ModeSwitch::new(Arc::clone(&commander), gesture_available),
            cameras: CameraSwitch::new(initial_camera),
            queue: Arc::new(CommandQueue::new(config.queue_capacity)),
            relay: Arc::new(FrameRelay::new()),
            commander,
            shutdown: Shutdown::new(),
            tasks: Vec::new(),
        })
    }

    pub fn commander(&self) -> Arc<VehicleCommander> {
        Arc::clone(&self.commander)
    }

    pub fn modes(&self) -> Arc<ModeSwitch> {
        Arc::clone(&self.modes)
    }

    pub fn cameras(&self) -> Arc<CameraSwitch> {
        Arc::clone(&self.cameras)
    }

    pub fn queue(&self) -> Arc<CommandQueue> {
        Arc::clone(&self.queue)
    }

    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    pub fn spawn_watchdog(&mut self, config: &PilotConfig) {
        let watchdog = Watchdog::new(
            Arc::clone(&self.commander),
            config,
            self.shutdown.clone(),
        );
        self.tasks.push(tokio::spawn(watchdog.run()));
    }

    pub fn spawn_arbiter(&mut self, vision: Arc<dyn VisionModel>, config: &PilotConfig) {
        let arbiter = Arbiter::new(
            Arc::clone(&self.queue),
            Arc::clone(&self.relay),
            Arc::clone(&self.commander),
            Arc::clone(&self.modes),
            vision,
            config,
            self.shutdown.clone(),
        );
        self.tasks.push(tokio::spawn(arbiter.run()));
    }

    pub fn spawn_voice(
        &mut self,
        capture: Box<dyn SpeechCapture>,
        stt: Box<dyn SpeechToText>,
        config: &PilotConfig,
    ) {
        let listener = VoiceListener::new(
            capture,
            stt,
            Arc::clone(&self.queue),
            self.modes.subscribe(),
            self.shutdown.clone(),
            config.phrase_limit(),
        );
        self.tasks.push(tokio::spawn(listener.run()));
    }

    /// The pipeline always gets the vehicle feed as its fallback source; only
    /// the PC-side source is pluggable.
    pub fn spawn_pipeline(&mut self, pc_source: Box<dyn FrameSource>, rig: Option<GestureRig>) {
        let vehicle_source = Box::new(VehicleCameraSource::new(Arc::clone(&self.commander)));
        let pipeline = FramePipeline::new(
            Arc::clone(&self.commander),
            Arc::clone(&self.relay),
            Arc::clone(&self.cameras),
            self.modes.subscribe(),
            pc_source,
            vehicle_source,
            rig,
            self.shutdown.clone(),
        );
        self.tasks.push(tokio::spawn(pipeline.run()));
    }

    pub fn spawn_console(&mut self) {
        let console = Console::new(
            Arc::clone(&self.commander),
            Arc::clone(&self.modes),
            Arc::clone(&self.cameras),
            Arc::clone(&self.queue),
            self.shutdown.clone(),
        );
        self.tasks.push(tokio::spawn(console.run()));
    }

    pub async fn wait_for_shutdown(&self) {
        self.shutdown.wait().await;
    }

    /// Stops every task, lands the vehicle if it is still airborne, and closes
    /// the session. Failures here are logged and swallowed.
    pub async fn shutdown(mut self) {
        self.shutdown.signal();
        for task in self.tasks.drain(..) {
            if let Err(err) = task.await {
                log::warn!("task did not exit cleanly: {err}");
            }
        }
        if self.commander.flight_state().is_airborne() {
            log::info!("still airborne, landing before exit");
            self.commander.execute(Command::Land).await;
        }
        if let Err(err) = self.commander.stop_video().await {
            log::debug!("stopping video stream on exit: {err}");
        }
        if let Err(err) = self.commander.end_session().await {
            log::debug!("ending vehicle session: {err}");
        }
        log::info!("cockpit shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::RecordingVehicle;
    use std::time::Duration;

    #[tokio::test]
    async fn shutdown_wakes_every_waiter() {
        let shutdown = Shutdown::new();
        let waiter = shutdown.clone();
        let handle = tokio::spawn(async move { waiter.wait().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        shutdown.signal();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(shutdown.is_signaled());
    }

    #[tokio::test]
    async fn shutdown_lands_an_airborne_vehicle() {
        let vehicle = Arc::new(RecordingVehicle::new());
        let config = PilotConfig::default();
        let cockpit = Cockpit::connect(
            Arc::clone(&vehicle) as Arc<dyn VehicleTransport>,
            &config,
            CameraSource::Pc,
            true,
        )
        .await
        .unwrap();

        let commander = cockpit.commander();
        commander.execute(Command::Takeoff).await;
        assert!(commander.flight_state().is_airborne());

        cockpit.shutdown().await;
        assert_eq!(vehicle.count_of("land"), 1);
        assert!(!commander.flight_state().is_airborne());
        assert_eq!(vehicle.count_of("stop_video"), 1);
        assert_eq!(vehicle.count_of("end_session"), 1);
    }

    #[tokio::test]
    async fn shutdown_leaves_a_grounded_vehicle_alone() {
        let vehicle = Arc::new(RecordingVehicle::new());
        let config = PilotConfig::default();
        let cockpit = Cockpit::connect(
            Arc::clone(&vehicle) as Arc<dyn VehicleTransport>,
            &config,
            CameraSource::Pc,
            true,
        )
        .await
        .unwrap();

        cockpit.shutdown().await;
        assert_eq!(vehicle.count_of("land"), 0);
        assert_eq!(vehicle.count_of("end_session"), 1);
    }

    #[tokio::test]
    async fn waiting_after_the_signal_returns_immediately() {
        let shutdown = Shutdown::new();
        shutdown.signal();
        tokio::time::timeout(Duration::from_millis(50), shutdown.wait())
            .await
            .unwrap();
    }
}
