//! Arbitration loop - the single consumer of queued utterances
//!
//! Drains the command queue and interprets each item under the modality that
//! is active at dequeue time. Voice items go straight through the vocabulary;
//! vision queries add a cooldown gate and a model round trip whose answer is
//! scanned for a flight command.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::commander::VehicleCommander;
use crate::mode::ModeSwitch;
use crate::queue::{CommandQueue, FrameRelay};
use crate::types::{Modality, PilotConfig, RawUtterance};
use crate::vlm::{extract_flight_command, VisionModel};
use crate::vocabulary::{self, Recognition};
use crate::Shutdown;

/// Bounds responsiveness to shutdown between items.
const DEQUEUE_TIMEOUT: Duration = Duration::from_secs(1);

pub struct Arbiter {
    queue: Arc<CommandQueue>,
    relay: Arc<FrameRelay>,
    commander: Arc<VehicleCommander>,
    modes: Arc<ModeSwitch>,
    vision: Arc<dyn VisionModel>,
    cooldown: Duration,
    vision_timeout: Duration,
    shutdown: Shutdown,
    /// When the last vision query was dispatched to the model.
    last_dispatch: Option<Instant>,
}

impl Arbiter {
    pub fn new(
        queue: Arc<CommandQueue>,
        relay: Arc<FrameRelay>,
        commander: Arc<VehicleCommander>,
        modes: Arc<ModeSwitch>,
        vision: Arc<dyn VisionModel>,
        config: &PilotConfig,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            queue,
            relay,
            commander,
            modes,
            vision,
            cooldown: config.vision_cooldown(),
            vision_timeout: config.vision_timeout(),
            shutdown,
            last_dispatch: None,
        }
    }

    pub async fn run(mut self) {
        log::info!("command processor up");
        while !self.shutdown.is_signaled() {
            let Some(item) = self.queue.dequeue(DEQUEUE_TIMEOUT).await else {
                continue;
            };
            self.process(item).await;
        }
        log::info!("command processor down");
    }

    async fn process(&mut self, item: RawUtterance) {
        log::debug!(
            "dequeued {:?} after {:?}",
            item.text,
            item.captured_at.elapsed()
        );
        // The modality active now decides the interpretation, even if the
        // item was enqueued under a previous mode.
        match self.modes.current() {
            Modality::Voice => self.dispatch_text(&item.text).await,
            Modality::VisionQuery => self.run_vision_query(&item.text).await,
            other => log::info!("discarding {:?} while in {other} mode", item.text),
        }
    }

    async fn dispatch_text(&self, text: &str) {
        match vocabulary::recognize(text, self.commander.flight_state()) {
            Recognition::Command(command) => {
                self.commander.execute(command).await;
            }
            Recognition::Unknown => log::info!("no command recognized in {text:?}"),
            Recognition::AlreadyLanded => log::info!("ignoring {text:?}: already landed"),
            Recognition::AlreadyFlying => log::info!("ignoring {text:?}: already flying"),
        }
    }

    async fn run_vision_query(&mut self, prompt: &str) {
        if let Some(last) = self.last_dispatch {
            let elapsed = last.elapsed();
            if elapsed < self.cooldown {
                log::info!(
                    "vision query skipped, cooling down for another {:?}",
                    self.cooldown - elapsed
                );
                return;
            }
        }
        let Some(frame) = self.relay.try_take() else {
            // The cooldown stays untouched so the next query is not penalized.
            log::warn!("vision query dropped, no camera frame available");
            return;
        };

        self.last_dispatch = Some(Instant::now());
        match self.vision.query(prompt, &frame, self.vision_timeout).await {
            Ok(answer) => {
                log::info!("vision answer: {answer}");
                self.modes.post_answer(answer.clone());
                match extract_flight_command(&answer, self.commander.flight_state()) {
                    Recognition::Command(command) => {
                        log::info!("vision answer suggests {command}");
                        self.commander.execute(command).await;
                    }
                    Recognition::Unknown => {
                        log::debug!("no flight command in the answer");
                    }
                    Recognition::AlreadyLanded => {
                        log::info!("vision answer suggests landing, already landed");
                    }
                    Recognition::AlreadyFlying => {
                        log::info!("vision answer suggests takeoff, already flying");
                    }
                }
            }
            Err(err) => log::warn!("vision query failed: {err}"),
        }
    }
}
