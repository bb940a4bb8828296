//! Gesture recognition path - hand tracking, classification, debounce
//!
//! The tracker and classifier are external capabilities behind trait seams;
//! what lives here is the debounce filter that turns jittery per-frame labels
//! into at most one accepted gesture per streak, and the fixed label-to-command
//! table.

use std::time::Duration;

use tokio::time::Instant;

use crate::types::{Command, FlightState, Frame, PilotConfig};

/// Hand landmark extraction. Returns pixel-space points for one detected
/// hand, or `None` when no hand is in the frame.
pub trait HandTracker: Send + Sync {
    fn detect(&mut self, frame: &Frame) -> Option<Vec<(f32, f32)>>;
}

/// Landmark-to-label classification with a confidence in `[0, 1]`.
pub trait GestureClassifier: Send + Sync {
    fn classify(&mut self, landmarks: &[(f32, f32)]) -> (String, f32);
}

/// Maps an accepted gesture label to a vehicle command. Distinct from the
/// voice vocabulary. While grounded only `forward` is honored, and it means
/// takeoff rather than a forward move.
pub fn gesture_command(label: &str, state: FlightState) -> Option<Command> {
    if !state.is_airborne() {
        return match label {
            "forward" => Some(Command::Takeoff),
            _ => None,
        };
    }
    match label {
        "forward" => Some(Command::MoveForward),
        "backward" => Some(Command::MoveBackward),
        "left" => Some(Command::MoveLeft),
        "right" => Some(Command::MoveRight),
        "up" => Some(Command::MoveUp),
        "down" => Some(Command::MoveDown),
        "flip" => Some(Command::FlipForward),
        "land" => Some(Command::Land),
        _ => None,
    }
}

/// Requires a run of identical confident classifications before accepting a
/// gesture, then holds off further accepts for a short delay.
pub struct DebounceFilter {
    streak: u32,
    confidence_floor: f32,
    delay: Duration,
    label: Option<String>,
    run: u32,
    last_accept: Option<Instant>,
}

impl DebounceFilter {
    pub fn new(config: &PilotConfig) -> Self {
        Self {
            streak: config.gesture_streak,
            confidence_floor: config.gesture_confidence,
            delay: config.gesture_delay(),
            label: None,
            run: 0,
            last_accept: None,
        }
    }

    /// Feeds one frame's classification. `None` means no hand was detected,
    /// which clears the run. A low-confidence detection is ignored without
    /// clearing it. Returns the label when a gesture is accepted.
    pub fn observe(&mut self, detection: Option<(&str, f32)>) -> Option<String> {
        let (label, confidence) = match detection {
            None => {
                self.label = None;
                self.run = 0;
                return None;
            }
            Some(detection) => detection,
        };
        if confidence <= self.confidence_floor {
            return None;
        }

        if self.label.as_deref() == Some(label) {
            self.run += 1;
        } else {
            self.label = Some(label.to_string());
            self.run = 1;
        }

        if self.run < self.streak {
            return None;
        }
        if let Some(last) = self.last_accept {
            if last.elapsed() < self.delay {
                return None;
            }
        }
        self.run = 0;
        self.last_accept = Some(Instant::now());
        self.label.clone()
    }
}

/// The assembled gesture path: tracker, classifier, debounce.
pub struct GestureRig {
    tracker: Box<dyn HandTracker>,
    classifier: Box<dyn GestureClassifier>,
    filter: DebounceFilter,
}

impl GestureRig {
    pub fn new(
        tracker: Box<dyn HandTracker>,
        classifier: Box<dyn GestureClassifier>,
        config: &PilotConfig,
    ) -> Self {
        Self {
            tracker,
            classifier,
            filter: DebounceFilter::new(config),
        }
    }

    /// Runs one frame through the whole path. Returns an accepted gesture
    /// label, if this frame completed a streak.
    pub fn observe_frame(&mut self, frame: &Frame) -> Option<String> {
        match self.tracker.detect(frame) {
            None => self.filter.observe(None),
            Some(landmarks) => {
                let (label, confidence) = self.classifier.classify(&landmarks);
                let accepted = self.filter.observe(Some((&label, confidence)));
                if accepted.is_some() {
                    log::info!("gesture accepted: {label} ({confidence:.2})");
                }
                accepted
            }
        }
    }
}

/// Synthesizes a hand that appears in bursts and drifts across the frame, so
/// dry runs exercise the debounce exactly like a live tracker would.
pub struct SimulatedHandTracker {
    frame_index: u32,
}

impl SimulatedHandTracker {
    pub fn new() -> Self {
        Self { frame_index: 0 }
    }
}

impl Default for SimulatedHandTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HandTracker for SimulatedHandTracker {
    fn detect(&mut self, frame: &Frame) -> Option<Vec<(f32, f32)>> {
        let n = self.frame_index;
        self.frame_index = self.frame_index.wrapping_add(1);
        // Hand visible for two bursts out of every three.
        if (n / 60) % 3 == 2 {
            return None;
        }
        let width = frame.width as f32;
        let height = frame.height as f32;
        let cx = width * (0.2 + 0.6 * (((n / 180) % 3) as f32 / 2.0));
        let cy = height * (0.2 + 0.6 * (((n / 540) % 3) as f32 / 2.0));
        let landmarks = (0..21)
            .map(|_| {
                let dx = (fastrand::f32() - 0.5) * width * 0.1;
                let dy = (fastrand::f32() - 0.5) * height * 0.1;
                (cx + dx, cy + dy)
            })
            .collect();
        Some(landmarks)
    }
}

/// Labels the simulated hand by where its centroid sits in the frame.
pub struct SimulatedGestureClassifier {
    frame_size: (f32, f32),
}

impl SimulatedGestureClassifier {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            frame_size: (width as f32, height as f32),
        }
    }
}

impl GestureClassifier for SimulatedGestureClassifier {
    fn classify(&mut self, landmarks: &[(f32, f32)]) -> (String, f32) {
        if landmarks.is_empty() {
            return (String::new(), 0.0);
        }
        let n = landmarks.len() as f32;
        let cx = landmarks.iter().map(|(x, _)| x).sum::<f32>() / n;
        let cy = landmarks.iter().map(|(_, y)| y).sum::<f32>() / n;
        let (width, height) = self.frame_size;
        let column = ((cx / width * 3.0) as usize).min(2);
        let row = ((cy / height * 3.0) as usize).min(2);
        const GRID: [[&str; 3]; 3] = [
            ["up", "forward", "flip"],
            ["left", "forward", "right"],
            ["down", "backward", "land"],
        ];
        (GRID[row][column].to_string(), 0.97)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> DebounceFilter {
        DebounceFilter::new(&PilotConfig::default())
    }

    #[test]
    fn streak_of_five_accepts_once() {
        let mut filter = filter();
        for _ in 0..4 {
            assert_eq!(filter.observe(Some(("up", 0.95))), None);
        }
        assert_eq!(filter.observe(Some(("up", 0.95))).as_deref(), Some("up"));
    }

    #[test]
    fn label_change_restarts_the_run() {
        let mut filter = filter();
        for _ in 0..4 {
            assert_eq!(filter.observe(Some(("up", 0.95))), None);
        }
        assert_eq!(filter.observe(Some(("down", 0.95))), None);
        for _ in 0..3 {
            assert_eq!(filter.observe(Some(("down", 0.95))), None);
        }
        assert_eq!(filter.observe(Some(("down", 0.95))).as_deref(), Some("down"));
    }

    #[test]
    fn lost_hand_restarts_the_run() {
        let mut filter = filter();
        for _ in 0..4 {
            filter.observe(Some(("up", 0.95)));
        }
        assert_eq!(filter.observe(None), None);
        for _ in 0..4 {
            assert_eq!(filter.observe(Some(("up", 0.95))), None);
        }
        assert_eq!(filter.observe(Some(("up", 0.95))).as_deref(), Some("up"));
    }

    #[test]
    fn low_confidence_is_skipped_without_restarting() {
        let mut filter = filter();
        for _ in 0..4 {
            filter.observe(Some(("up", 0.95)));
        }
        // A shaky frame neither counts nor clears the run.
        assert_eq!(filter.observe(Some(("up", 0.5))), None);
        assert_eq!(filter.observe(Some(("down", 0.5))), None);
        assert_eq!(filter.observe(Some(("up", 0.95))).as_deref(), Some("up"));
    }

    #[test]
    fn confidence_floor_is_exclusive() {
        let mut filter = filter();
        for _ in 0..5 {
            assert_eq!(filter.observe(Some(("up", 0.9))), None);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn accept_delay_holds_off_the_next_gesture() {
        let mut filter = filter();
        for _ in 0..5 {
            filter.observe(Some(("up", 0.95)));
        }
        // Streak is complete again but the half-second delay has not elapsed.
        tokio::time::advance(Duration::from_millis(100)).await;
        for _ in 0..5 {
            assert_eq!(filter.observe(Some(("up", 0.95))), None);
        }
        tokio::time::advance(Duration::from_millis(500)).await;
        assert_eq!(filter.observe(Some(("up", 0.95))).as_deref(), Some("up"));
    }

    #[test]
    fn grounded_table_only_honors_forward() {
        assert_eq!(
            gesture_command("forward", FlightState::Grounded),
            Some(Command::Takeoff)
        );
        for label in ["backward", "left", "right", "up", "down", "flip", "land"] {
            assert_eq!(gesture_command(label, FlightState::Grounded), None);
        }
    }

    #[test]
    fn airborne_table_matches_labels() {
        let airborne = FlightState::Airborne;
        assert_eq!(gesture_command("forward", airborne), Some(Command::MoveForward));
        assert_eq!(gesture_command("backward", airborne), Some(Command::MoveBackward));
        assert_eq!(gesture_command("left", airborne), Some(Command::MoveLeft));
        assert_eq!(gesture_command("right", airborne), Some(Command::MoveRight));
        assert_eq!(gesture_command("up", airborne), Some(Command::MoveUp));
        assert_eq!(gesture_command("down", airborne), Some(Command::MoveDown));
        assert_eq!(gesture_command("flip", airborne), Some(Command::FlipForward));
        assert_eq!(gesture_command("land", airborne), Some(Command::Land));
        assert_eq!(gesture_command("peace", airborne), None);
    }

    #[test]
    fn simulated_pair_produces_steady_labels() {
        let mut tracker = SimulatedHandTracker::new();
        let mut classifier = SimulatedGestureClassifier::new(320, 240);
        let frame = Frame::new(
            320,
            240,
            vec![0u8; 320 * 240 * 3],
            crate::types::CameraSource::Pc,
        );
        let mut labels = Vec::new();
        for _ in 0..50 {
            if let Some(landmarks) = tracker.detect(&frame) {
                let (label, confidence) = classifier.classify(&landmarks);
                assert!(confidence > 0.9);
                labels.push(label);
            }
        }
        assert!(!labels.is_empty());
        // The centroid drifts slowly, so runs are long enough to debounce.
        let first = &labels[0];
        assert!(labels.iter().filter(|l| *l == first).count() >= 5);
    }

    #[test]
    fn rig_accepts_through_the_full_path() {
        let config = PilotConfig::default();
        let mut rig = GestureRig::new(
            Box::new(SimulatedHandTracker::new()),
            Box::new(SimulatedGestureClassifier::new(320, 240)),
            &config,
        );
        let frame = Frame::new(
            320,
            240,
            vec![0u8; 320 * 240 * 3],
            crate::types::CameraSource::Pc,
        );
        let mut accepted = 0;
        for _ in 0..40 {
            if rig.observe_frame(&frame).is_some() {
                accepted += 1;
            }
        }
        assert!(accepted >= 1);
    }
}
