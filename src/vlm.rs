//! Vision-language model client
//!
//! Answers free-text questions about the latest camera frame. The real
//! backend speaks the Ollama chat API; without the `vision-model` feature a
//! simulated client stands in.

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use thiserror::Error;

use crate::types::{FlightState, Frame};
use crate::vocabulary::{self, Recognition};

#[derive(Debug, Error)]
pub enum VisionError {
    #[error("vision model timed out")]
    Timeout,
    #[error("vision model failed: {0}")]
    Service(String),
}

/// The vision-query capability: one prompt, one frame, one text answer.
#[async_trait]
pub trait VisionModel: Send + Sync {
    async fn query(
        &self,
        prompt: &str,
        frame: &Frame,
        timeout: Duration,
    ) -> Result<String, VisionError>;
}

/// Encodes a frame as base64 JPEG for the chat payload.
pub fn frame_jpeg_base64(frame: &Frame) -> Result<String, VisionError> {
    let mut jpeg = Vec::new();
    let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, 85);
    encoder
        .encode(&frame.pixels, frame.width, frame.height, image::ColorType::Rgb8)
        .map_err(|e| VisionError::Service(format!("jpeg encoding failed: {e}")))?;
    Ok(general_purpose::STANDARD.encode(&jpeg))
}

/// Reads a flight command out of model prose, reusing the voice phrase table.
/// Substring matching over free text can misfire on incidental words, so the
/// caller treats the result as advisory and logs what it acted on.
pub fn extract_flight_command(reply: &str, flight: FlightState) -> Recognition {
    vocabulary::recognize(reply, flight)
}

/// Stand-in model for dry runs. Echoes the prompt inside a canned scene
/// description, which also exercises the command-extraction path.
pub struct SimulatedVision;

#[async_trait]
impl VisionModel for SimulatedVision {
    async fn query(
        &self,
        prompt: &str,
        frame: &Frame,
        _timeout: Duration,
    ) -> Result<String, VisionError> {
        tokio::time::sleep(Duration::from_millis(150)).await;
        log::info!("simulated vision model answering");
        Ok(format!(
            "Simulated view from the {} camera, {}x{} pixels. You asked: {}",
            frame.source, frame.width, frame.height, prompt
        ))
    }
}

/// Ollama-compatible chat client.
#[cfg(feature = "vision-model")]
pub struct OllamaVision {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

#[cfg(feature = "vision-model")]
impl OllamaVision {
    pub fn new(endpoint: &str, model: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }
}

#[cfg(feature = "vision-model")]
fn map_reqwest(e: reqwest::Error) -> VisionError {
    if e.is_timeout() {
        VisionError::Timeout
    } else {
        VisionError::Service(e.to_string())
    }
}

#[cfg(feature = "vision-model")]
#[async_trait]
impl VisionModel for OllamaVision {
    async fn query(
        &self,
        prompt: &str,
        frame: &Frame,
        timeout: Duration,
    ) -> Result<String, VisionError> {
        #[derive(serde::Serialize)]
        struct Msg {
            role: &'static str,
            content: String,
            images: Vec<String>,
        }

        #[derive(serde::Serialize)]
        struct Req {
            model: String,
            stream: bool,
            messages: Vec<Msg>,
        }

        #[derive(serde::Deserialize)]
        struct Resp {
            message: RespMsg,
        }

        #[derive(serde::Deserialize)]
        struct RespMsg {
            content: String,
        }

        let req = Req {
            model: self.model.clone(),
            stream: false,
            messages: vec![Msg {
                role: "user",
                content: prompt.to_string(),
                images: vec![frame_jpeg_base64(frame)?],
            }],
        };

        let url = format!("{}/api/chat", self.endpoint);
        log::debug!("vision query to {url} ({} model)", self.model);
        let body = self
            .client
            .post(url)
            .timeout(timeout)
            .json(&req)
            .send()
            .await
            .map_err(map_reqwest)?
            .error_for_status()
            .map_err(map_reqwest)?
            .text()
            .await
            .map_err(map_reqwest)?;

        let resp: Resp = serde_json::from_str(&body)
            .map_err(|e| VisionError::Service(format!("malformed model response: {e}")))?;
        Ok(resp.message.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CameraSource, Command};

    fn frame() -> Frame {
        Frame::new(16, 16, vec![200u8; 16 * 16 * 3], CameraSource::Vehicle)
    }

    #[test]
    fn frames_encode_as_jpeg() {
        let encoded = frame_jpeg_base64(&frame()).unwrap();
        // Base64 of the JPEG magic bytes.
        assert!(encoded.starts_with("/9j/"));
    }

    #[test]
    fn extraction_reuses_the_voice_vocabulary() {
        let airborne = FlightState::Airborne;
        assert_eq!(
            extract_flight_command("Yes, it looks safe. You should land now.", airborne),
            Recognition::Command(Command::Land)
        );
        assert_eq!(
            extract_flight_command("The scene shows a red chair and a window.", airborne),
            Recognition::Unknown
        );
        assert_eq!(
            extract_flight_command("Please land.", FlightState::Grounded),
            Recognition::AlreadyLanded
        );
    }

    #[tokio::test]
    async fn simulated_model_echoes_the_prompt() {
        let model = SimulatedVision;
        let answer = model
            .query("what is on the desk?", &frame(), Duration::from_secs(1))
            .await
            .unwrap();
        assert!(answer.contains("what is on the desk?"));
        assert!(answer.contains("16x16"));
    }
}
