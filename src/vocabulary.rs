//! Free-text command vocabulary and the phrase normalizer
//!
//! One table maps every canonical command to its accepted phrase variants.
//! Both the voice path and the vision-model response path resolve text through
//! `recognize`, so this module is the single source of truth for what counts
//! as a flight command.

use crate::types::{Command, FlightState};

/// Accepted phrases per command, in fixed declaration order. Matching walks
/// this table top to bottom, so earlier entries win ties.
pub const VOCABULARY: &[(Command, &[&str])] = &[
    (
        Command::Takeoff,
        &["takeoff", "take off", "start", "begin flight", "arise", "launch", "start flying"],
    ),
    (
        Command::Land,
        &["land", "stop", "descend fully", "ground", "land now"],
    ),
    (
        Command::MoveForward,
        &["move forward", "go forward", "fly forward", "forward", "ahead", "straight"],
    ),
    (
        Command::MoveBackward,
        &["move backward", "go back", "fly backward", "backward", "reverse", "back"],
    ),
    (Command::RotateLeft, &["turn left", "rotate left", "spin left"]),
    (Command::RotateRight, &["turn right", "rotate right", "spin right"]),
    (
        Command::MoveLeft,
        &["move left", "go left", "fly left", "strafe left", "left"],
    ),
    (
        Command::MoveRight,
        &["move right", "go right", "fly right", "strafe right", "right"],
    ),
    (
        Command::MoveUp,
        &["move up", "ascend", "fly up", "go up", "up", "rise", "higher"],
    ),
    (
        Command::MoveDown,
        &["move down", "descend", "fly down", "go down", "down", "lower"],
    ),
    (
        Command::Hover,
        &["hover", "stay", "hold position", "stop moving", "pause", "freeze", "hold", "wait"],
    ),
    (
        Command::FlipForward,
        &["flip forward", "do a front flip", "front flip", "forward flip"],
    ),
    (
        Command::FlipBackward,
        &["flip backward", "do a back flip", "back flip", "backward flip"],
    ),
    (Command::FlipLeft, &["flip left", "do a left flip", "left flip"]),
    (Command::FlipRight, &["flip right", "do a right flip", "right flip"]),
];

/// Result of resolving raw text against the vocabulary and flight state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recognition {
    /// Text resolved to a command that is worth sending.
    Command(Command),
    /// No vocabulary entry matched.
    Unknown,
    /// Matched `Land` while already on the ground.
    AlreadyLanded,
    /// Matched `Takeoff` while already in the air.
    AlreadyFlying,
}

/// Resolves free text to a command. Lowercases and trims, tries exact variant
/// matches before substring matches, and applies the takeoff/land state
/// overrides. Reads `flight` but never mutates anything.
pub fn recognize(text: &str, flight: FlightState) -> Recognition {
    let text = text.trim().to_lowercase();
    if text.is_empty() {
        return Recognition::Unknown;
    }

    let matched = exact_match(&text).or_else(|| substring_match(&text));
    match matched {
        Some(Command::Land) if !flight.is_airborne() => Recognition::AlreadyLanded,
        Some(Command::Takeoff) if flight.is_airborne() => Recognition::AlreadyFlying,
        Some(command) => Recognition::Command(command),
        None => Recognition::Unknown,
    }
}

/// The phrase variants accepted for one command.
pub fn variants(command: Command) -> &'static [&'static str] {
    VOCABULARY
        .iter()
        .find(|(candidate, _)| *candidate == command)
        .map(|(_, phrases)| *phrases)
        .unwrap_or(&[])
}

fn exact_match(text: &str) -> Option<Command> {
    VOCABULARY
        .iter()
        .find(|(_, phrases)| phrases.iter().any(|phrase| *phrase == text))
        .map(|(command, _)| *command)
}

fn substring_match(text: &str) -> Option<Command> {
    VOCABULARY
        .iter()
        .find(|(_, phrases)| phrases.iter().any(|phrase| text.contains(phrase)))
        .map(|(command, _)| *command)
}
