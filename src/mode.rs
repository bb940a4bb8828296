//! Active-modality state machine
//!
//! One input modality is live at a time. Changes are published over a watch
//! channel so listener tasks wake on the switch instead of sleep-polling for
//! their turn.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::commander::VehicleCommander;
use crate::types::Modality;

pub struct ModeSwitch {
    tx: watch::Sender<Modality>,
    commander: Arc<VehicleCommander>,
    gesture_available: bool,
    /// Latest vision-model answer, shown by the console. Cleared when the
    /// operator leaves vision-query mode.
    vision_answer: Mutex<Option<String>>,
}

impl ModeSwitch {
    pub fn new(commander: Arc<VehicleCommander>, gesture_available: bool) -> Arc<Self> {
        let (tx, _rx) = watch::channel(Modality::Idle);
        Arc::new(Self {
            tx,
            commander,
            gesture_available,
            vision_answer: Mutex::new(None),
        })
    }

    pub fn current(&self) -> Modality {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Modality> {
        self.tx.subscribe()
    }

    /// Switches the active modality. Selecting the current mode is a no-op.
    /// Every real transition cancels residual motion with a zero-velocity
    /// setpoint.
    pub async fn select(&self, target: Modality) -> Result<(), &'static str> {
        let previous = self.current();
        if target == previous {
            log::debug!("mode already {target}");
            return Ok(());
        }
        if target == Modality::Gesture && !self.gesture_available {
            log::warn!("gesture recognition unavailable, staying in {previous}");
            return Err("gesture recognition unavailable");
        }
        if previous == Modality::VisionQuery {
            self.vision_answer.lock().take();
        }
        self.tx.send_replace(target);
        log::info!("mode {previous} -> {target}");
        self.commander.stabilize().await;
        Ok(())
    }

    /// Records a vision-model answer for the console to display.
    pub fn post_answer(&self, text: String) {
        self.vision_answer.lock().replace(text);
    }

    pub fn last_answer(&self) -> Option<String> {
        self.vision_answer.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::RecordingVehicle;
    use crate::transport::VehicleTransport;
    use crate::types::PilotConfig;

    fn rig(gesture_available: bool) -> (Arc<RecordingVehicle>, Arc<ModeSwitch>) {
        let vehicle = Arc::new(RecordingVehicle::new());
        let commander = Arc::new(VehicleCommander::new(
            Arc::clone(&vehicle) as Arc<dyn VehicleTransport>,
            &PilotConfig::default(),
        ));
        let modes = ModeSwitch::new(commander, gesture_available);
        (vehicle, modes)
    }

    #[tokio::test]
    async fn starts_idle_and_publishes_switches() {
        let (_vehicle, modes) = rig(true);
        assert_eq!(modes.current(), Modality::Idle);

        let mut rx = modes.subscribe();
        modes.select(Modality::Voice).await.unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), Modality::Voice);
    }

    #[tokio::test]
    async fn transitions_cancel_residual_motion() {
        let (vehicle, modes) = rig(true);
        modes.select(Modality::Voice).await.unwrap();
        assert_eq!(vehicle.count_of("set_velocity"), 1);

        // Re-selecting the active mode is not a transition.
        modes.select(Modality::Voice).await.unwrap();
        assert_eq!(vehicle.count_of("set_velocity"), 1);
    }

    #[tokio::test]
    async fn gesture_mode_needs_the_classifier() {
        let (vehicle, modes) = rig(false);
        assert!(modes.select(Modality::Gesture).await.is_err());
        assert_eq!(modes.current(), Modality::Idle);
        assert!(vehicle.recorded().is_empty());

        let (_vehicle, modes) = rig(true);
        modes.select(Modality::Gesture).await.unwrap();
        assert_eq!(modes.current(), Modality::Gesture);
    }

    #[tokio::test]
    async fn leaving_vision_query_clears_the_answer() {
        let (_vehicle, modes) = rig(true);
        modes.select(Modality::VisionQuery).await.unwrap();
        modes.post_answer("a desk with a keyboard".to_string());
        assert!(modes.last_answer().is_some());

        modes.select(Modality::Idle).await.unwrap();
        assert_eq!(modes.last_answer(), None);
    }

    #[tokio::test]
    async fn answer_survives_unrelated_switches() {
        let (_vehicle, modes) = rig(true);
        modes.select(Modality::VisionQuery).await.unwrap();
        modes.post_answer("two chairs".to_string());
        modes.select(Modality::VisionQuery).await.unwrap();
        assert_eq!(modes.last_answer().as_deref(), Some("two chairs"));
    }
}
