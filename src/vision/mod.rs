//! Vision pathway - camera sources, frame conditioning, gesture path
//!
//! One task owns frame capture end to end: it reads the active source,
//! conditions each frame, shares it through the frame relay, and drives the
//! gesture path while gesture mode is active.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;

use crate::commander::VehicleCommander;
use crate::queue::FrameRelay;
use crate::types::{CameraSource, Frame, Modality};
use crate::Shutdown;

pub mod camera;
pub mod gesture;

pub use camera::{SimulatedPcCamera, VehicleCameraSource};
#[cfg(feature = "camera")]
pub use camera::WebcamSource;
pub use gesture::{
    gesture_command, DebounceFilter, GestureClassifier, GestureRig, HandTracker,
    SimulatedGestureClassifier, SimulatedHandTracker,
};

/// Nominal pacing for the capture loop.
const FRAME_PACE: Duration = Duration::from_millis(33);
const READ_RETRY: Duration = Duration::from_millis(250);

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("camera unavailable: {0}")]
    Unavailable(String),
    #[error("frame read failed: {0}")]
    Read(String),
}

/// A camera. Reads are fallible and must not block indefinitely.
#[async_trait]
pub trait FrameSource: Send + Sync {
    fn source(&self) -> CameraSource;
    async fn read_frame(&mut self) -> Result<Frame, CaptureError>;
}

/// Mirrors a frame horizontally. PC webcam frames are mirrored so hand
/// movements on screen match the operator's own.
pub fn mirror_horizontal(frame: &Frame) -> Frame {
    let row_bytes = frame.width as usize * 3;
    let mut pixels = Vec::with_capacity(frame.pixels.len());
    for row in frame.pixels.chunks_exact(row_bytes) {
        for px in row.chunks_exact(3).rev() {
            pixels.extend_from_slice(px);
        }
    }
    Frame {
        width: frame.width,
        height: frame.height,
        pixels,
        source: frame.source,
        captured_at: frame.captured_at,
    }
}

/// Swaps red and blue. The vehicle encoder emits BGR ordering, so its frames
/// get corrected into a new frame; the captured one is never touched.
pub fn color_correct(frame: &Frame) -> Frame {
    let mut pixels = Vec::with_capacity(frame.pixels.len());
    for px in frame.pixels.chunks_exact(3) {
        pixels.push(px[2]);
        pixels.push(px[1]);
        pixels.push(px[0]);
    }
    Frame {
        width: frame.width,
        height: frame.height,
        pixels,
        source: frame.source,
        captured_at: frame.captured_at,
    }
}

/// Authoritative camera selection, published to the pipeline over a watch
/// channel. The pipeline itself selects the vehicle feed when the PC camera
/// fails.
pub struct CameraSwitch {
    tx: watch::Sender<CameraSource>,
}

impl CameraSwitch {
    pub fn new(initial: CameraSource) -> Arc<Self> {
        let (tx, _rx) = watch::channel(initial);
        Arc::new(Self { tx })
    }

    pub fn current(&self) -> CameraSource {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<CameraSource> {
        self.tx.subscribe()
    }

    pub fn select(&self, source: CameraSource) {
        let previous = *self.tx.borrow();
        if previous != source {
            self.tx.send_replace(source);
            log::info!("camera source set to {source}");
        }
    }
}

/// The capture loop task.
pub struct FramePipeline {
    commander: Arc<VehicleCommander>,
    relay: Arc<FrameRelay>,
    cameras: Arc<CameraSwitch>,
    camera_rx: watch::Receiver<CameraSource>,
    modes: watch::Receiver<Modality>,
    pc_source: Box<dyn FrameSource>,
    vehicle_source: Box<dyn FrameSource>,
    rig: Option<GestureRig>,
    shutdown: Shutdown,
}

impl FramePipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        commander: Arc<VehicleCommander>,
        relay: Arc<FrameRelay>,
        cameras: Arc<CameraSwitch>,
        modes: watch::Receiver<Modality>,
        pc_source: Box<dyn FrameSource>,
        vehicle_source: Box<dyn FrameSource>,
        rig: Option<GestureRig>,
        shutdown: Shutdown,
    ) -> Self {
        let camera_rx = cameras.subscribe();
        Self {
            commander,
            relay,
            cameras,
            camera_rx,
            modes,
            pc_source,
            vehicle_source,
            rig,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        log::info!("frame pipeline up");
        let mut active = *self.camera_rx.borrow_and_update();
        if active == CameraSource::Vehicle {
            if let Err(err) = self.commander.start_video().await {
                log::warn!("could not start vehicle video: {err}");
            }
        }

        while !self.shutdown.is_signaled() {
            let wanted = *self.camera_rx.borrow_and_update();
            if wanted != active {
                self.switch_stream(active, wanted).await;
                active = wanted;
            }

            let source = match active {
                CameraSource::Pc => &mut self.pc_source,
                CameraSource::Vehicle => &mut self.vehicle_source,
            };
            match source.read_frame().await {
                Ok(frame) => {
                    let conditioned = match active {
                        CameraSource::Pc => mirror_horizontal(&frame),
                        CameraSource::Vehicle => color_correct(&frame),
                    };
                    if *self.modes.borrow_and_update() == Modality::Gesture {
                        self.run_gesture_path(&conditioned).await;
                    }
                    self.relay.put(conditioned);
                    tokio::time::sleep(FRAME_PACE).await;
                }
                Err(err) if active == CameraSource::Pc => {
                    log::warn!("pc camera failed: {err}; falling back to the vehicle camera");
                    self.cameras.select(CameraSource::Vehicle);
                }
                Err(err) => {
                    log::debug!("vehicle frame unavailable: {err}");
                    tokio::time::sleep(READ_RETRY).await;
                }
            }
        }
        log::info!("frame pipeline down");
    }

    async fn run_gesture_path(&mut self, frame: &Frame) {
        let Some(rig) = self.rig.as_mut() else {
            return;
        };
        let Some(label) = rig.observe_frame(frame) else {
            return;
        };
        match gesture_command(&label, self.commander.flight_state()) {
            Some(command) => {
                self.commander.execute(command).await;
                self.commander.stabilize().await;
            }
            None => log::debug!("gesture {label} ignored while grounded"),
        }
    }

    async fn switch_stream(&self, from: CameraSource, to: CameraSource) {
        log::info!("camera {from} -> {to}");
        match to {
            CameraSource::Vehicle => {
                if let Err(err) = self.commander.start_video().await {
                    log::warn!("could not start vehicle video: {err}");
                }
            }
            CameraSource::Pc => {
                if let Err(err) = self.commander.stop_video().await {
                    log::warn!("could not stop vehicle video: {err}");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::RecordingVehicle;
    use crate::transport::VehicleTransport;
    use crate::types::PilotConfig;

    struct FixedSource {
        tag: CameraSource,
        frame: Frame,
    }

    #[async_trait]
    impl FrameSource for FixedSource {
        fn source(&self) -> CameraSource {
            self.tag
        }

        async fn read_frame(&mut self) -> Result<Frame, CaptureError> {
            Ok(self.frame.clone())
        }
    }

    struct BrokenSource {
        tag: CameraSource,
    }

    #[async_trait]
    impl FrameSource for BrokenSource {
        fn source(&self) -> CameraSource {
            self.tag
        }

        async fn read_frame(&mut self) -> Result<Frame, CaptureError> {
            Err(CaptureError::Read("lens cap on".to_string()))
        }
    }

    struct AlwaysHand;

    impl HandTracker for AlwaysHand {
        fn detect(&mut self, _frame: &Frame) -> Option<Vec<(f32, f32)>> {
            Some(vec![(10.0, 10.0); 21])
        }
    }

    struct ConstLabel(&'static str);

    impl GestureClassifier for ConstLabel {
        fn classify(&mut self, _landmarks: &[(f32, f32)]) -> (String, f32) {
            (self.0.to_string(), 0.97)
        }
    }

    fn rig_with(label: &'static str) -> GestureRig {
        GestureRig::new(
            Box::new(AlwaysHand),
            Box::new(ConstLabel(label)),
            &PilotConfig::default(),
        )
    }

    fn test_frame() -> Frame {
        Frame::new(
            2,
            1,
            vec![1, 2, 3, 4, 5, 6],
            CameraSource::Pc,
        )
    }

    #[test]
    fn mirroring_reverses_each_row() {
        let mirrored = mirror_horizontal(&test_frame());
        assert_eq!(mirrored.pixels, vec![4, 5, 6, 1, 2, 3]);
        assert_eq!(mirrored.source, CameraSource::Pc);
    }

    #[test]
    fn color_correction_swaps_red_and_blue() {
        let corrected = color_correct(&test_frame());
        assert_eq!(corrected.pixels, vec![3, 2, 1, 6, 5, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn gesture_mode_takes_off_from_a_steady_gesture() {
        let vehicle = Arc::new(RecordingVehicle::new());
        let commander = Arc::new(VehicleCommander::new(
            Arc::clone(&vehicle) as Arc<dyn VehicleTransport>,
            &PilotConfig::default(),
        ));
        let relay = Arc::new(FrameRelay::new());
        let cameras = CameraSwitch::new(CameraSource::Pc);
        let (_mode_tx, mode_rx) = watch::channel(Modality::Gesture);
        let shutdown = Shutdown::new();

        let pipeline = FramePipeline::new(
            Arc::clone(&commander),
            Arc::clone(&relay),
            Arc::clone(&cameras),
            mode_rx,
            Box::new(FixedSource {
                tag: CameraSource::Pc,
                frame: test_frame(),
            }),
            Box::new(BrokenSource {
                tag: CameraSource::Vehicle,
            }),
            Some(rig_with("forward")),
            shutdown.clone(),
        );
        let handle = tokio::spawn(pipeline.run());

        tokio::time::sleep(Duration::from_secs(1)).await;
        shutdown.signal();
        handle.await.unwrap();

        let calls = vehicle.recorded();
        let takeoff = calls.iter().position(|c| c == "takeoff").expect("takeoff");
        // The accepted gesture is followed by a stabilizing hover.
        assert_eq!(calls.get(takeoff + 1).map(String::as_str), Some("set_velocity 0 0 0 0"));

        let relayed = relay.try_take().expect("relay holds the latest frame");
        assert_eq!(relayed.pixels, vec![4, 5, 6, 1, 2, 3], "pc frames are mirrored");
    }

    #[tokio::test(start_paused = true)]
    async fn pc_failure_falls_back_to_the_vehicle_camera() {
        let vehicle = Arc::new(RecordingVehicle::new());
        let commander = Arc::new(VehicleCommander::new(
            Arc::clone(&vehicle) as Arc<dyn VehicleTransport>,
            &PilotConfig::default(),
        ));
        let relay = Arc::new(FrameRelay::new());
        let cameras = CameraSwitch::new(CameraSource::Pc);
        let (_mode_tx, mode_rx) = watch::channel(Modality::Idle);
        let shutdown = Shutdown::new();

        let pipeline = FramePipeline::new(
            Arc::clone(&commander),
            Arc::clone(&relay),
            Arc::clone(&cameras),
            mode_rx,
            Box::new(BrokenSource {
                tag: CameraSource::Pc,
            }),
            Box::new(VehicleCameraSource::new(Arc::clone(&commander))),
            None,
            shutdown.clone(),
        );
        let handle = tokio::spawn(pipeline.run());

        tokio::time::sleep(Duration::from_secs(1)).await;
        shutdown.signal();
        handle.await.unwrap();

        assert_eq!(cameras.current(), CameraSource::Vehicle);
        assert_eq!(vehicle.count_of("start_video"), 1);
        let relayed = relay.try_take().expect("vehicle frames reach the relay");
        assert_eq!(relayed.source, CameraSource::Vehicle);
    }
}
