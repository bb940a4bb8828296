//! Camera frame sources
//!
//! A `FrameSource` yields conditioned-ready RGB frames. The PC webcam needs
//! the `camera` feature (opencv); the vehicle camera rides the transport's
//! video stream; the simulated source is always available.

use std::sync::Arc;

use async_trait::async_trait;

use crate::commander::VehicleCommander;
use crate::types::{CameraSource, Frame};
use crate::vision::{CaptureError, FrameSource};

#[cfg(feature = "camera")]
use opencv::{core, prelude::*, videoio};

/// PC webcam over opencv. Frames arrive BGR and are flipped to RGB here.
#[cfg(feature = "camera")]
pub struct WebcamSource {
    capture: videoio::VideoCapture,
}

#[cfg(feature = "camera")]
impl WebcamSource {
    pub fn open(index: i32) -> Result<Self, CaptureError> {
        let capture = videoio::VideoCapture::new(index, videoio::CAP_ANY)
            .map_err(|e| CaptureError::Unavailable(e.to_string()))?;
        let opened = capture
            .is_opened()
            .map_err(|e| CaptureError::Unavailable(e.to_string()))?;
        if !opened {
            return Err(CaptureError::Unavailable(format!(
                "camera index {index} did not open"
            )));
        }
        log::info!("pc camera opened at index {index}");
        Ok(Self { capture })
    }
}

#[cfg(feature = "camera")]
#[async_trait]
impl FrameSource for WebcamSource {
    fn source(&self) -> CameraSource {
        CameraSource::Pc
    }

    async fn read_frame(&mut self) -> Result<Frame, CaptureError> {
        let mut mat = core::Mat::default();
        let ok = self
            .capture
            .read(&mut mat)
            .map_err(|e| CaptureError::Read(e.to_string()))?;
        if !ok || mat.empty() {
            return Err(CaptureError::Read("camera returned no frame".to_string()));
        }
        let width = mat.cols() as u32;
        let height = mat.rows() as u32;
        let data = mat
            .data_bytes()
            .map_err(|e| CaptureError::Read(e.to_string()))?;
        let mut pixels = Vec::with_capacity(data.len());
        for px in data.chunks_exact(3) {
            pixels.push(px[2]);
            pixels.push(px[1]);
            pixels.push(px[0]);
        }
        Ok(Frame::new(width, height, pixels, CameraSource::Pc))
    }
}

/// The vehicle's onboard camera, read through the command sink so the stream
/// stays behind the single transport owner.
pub struct VehicleCameraSource {
    commander: Arc<VehicleCommander>,
}

impl VehicleCameraSource {
    pub fn new(commander: Arc<VehicleCommander>) -> Self {
        Self { commander }
    }
}

#[async_trait]
impl FrameSource for VehicleCameraSource {
    fn source(&self) -> CameraSource {
        CameraSource::Vehicle
    }

    async fn read_frame(&mut self) -> Result<Frame, CaptureError> {
        match self.commander.video_frame().await {
            Ok(Some(frame)) => Ok(frame),
            Ok(None) => Err(CaptureError::Read(
                "vehicle stream has no frame yet".to_string(),
            )),
            Err(err) => Err(CaptureError::Read(err.to_string())),
        }
    }
}

/// Stand-in webcam producing drifting vertical bars with sensor noise.
pub struct SimulatedPcCamera {
    counter: u32,
}

impl SimulatedPcCamera {
    pub fn new() -> Self {
        log::info!("using simulated pc camera");
        Self { counter: 0 }
    }
}

impl Default for SimulatedPcCamera {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FrameSource for SimulatedPcCamera {
    fn source(&self) -> CameraSource {
        CameraSource::Pc
    }

    async fn read_frame(&mut self) -> Result<Frame, CaptureError> {
        let n = self.counter;
        self.counter = self.counter.wrapping_add(1);
        let (width, height) = (320u32, 240u32);
        let mut pixels = Vec::with_capacity((width * height * 3) as usize);
        for _y in 0..height {
            for x in 0..width {
                let bar = if (x / 40 + n / 30) % 2 == 0 { 200u8 } else { 40u8 };
                let noise = fastrand::u8(0..12);
                pixels.push(bar.saturating_add(noise));
                pixels.push(bar.saturating_sub(noise));
                pixels.push(bar / 2);
            }
        }
        Ok(Frame::new(width, height, pixels, CameraSource::Pc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::SimulatedVehicle;
    use crate::transport::VehicleTransport;
    use crate::types::PilotConfig;

    #[tokio::test]
    async fn simulated_camera_yields_pc_frames() {
        let mut camera = SimulatedPcCamera::new();
        let frame = camera.read_frame().await.unwrap();
        assert_eq!(frame.source, CameraSource::Pc);
        assert_eq!(frame.pixels.len(), (frame.width * frame.height * 3) as usize);
    }

    #[tokio::test]
    async fn vehicle_source_requires_the_stream() {
        let vehicle = Arc::new(SimulatedVehicle::new());
        let commander = Arc::new(VehicleCommander::new(
            Arc::clone(&vehicle) as Arc<dyn VehicleTransport>,
            &PilotConfig::default(),
        ));
        commander.connect().await.unwrap();

        let mut source = VehicleCameraSource::new(Arc::clone(&commander));
        assert!(source.read_frame().await.is_err());

        commander.start_video().await.unwrap();
        let frame = source.read_frame().await.unwrap();
        assert_eq!(frame.source, CameraSource::Vehicle);
    }
}
