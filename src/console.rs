//! Operator console - line-oriented control surface on stdin
//!
//! One command per line: mode and camera switching, direct vehicle commands,
//! vision queries, status, quit. While in vision-query mode any line that is
//! not a console command is submitted as a query.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::commander::{ExecuteOutcome, VehicleCommander};
use crate::mode::ModeSwitch;
use crate::queue::CommandQueue;
use crate::types::{CameraSource, Command, Modality, RawUtterance};
use crate::vision::CameraSwitch;
use crate::Shutdown;

pub struct Console {
    commander: Arc<VehicleCommander>,
    modes: Arc<ModeSwitch>,
    cameras: Arc<CameraSwitch>,
    queue: Arc<CommandQueue>,
    shutdown: Shutdown,
}

impl Console {
    pub fn new(
        commander: Arc<VehicleCommander>,
        modes: Arc<ModeSwitch>,
        cameras: Arc<CameraSwitch>,
        queue: Arc<CommandQueue>,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            commander,
            modes,
            cameras,
            queue,
            shutdown,
        }
    }

    pub async fn run(self) {
        println!("console ready, type 'help' for commands");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            tokio::select! {
                _ = self.shutdown.wait() => break,
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if !self.handle_line(line.trim()).await {
                            break;
                        }
                    }
                    Ok(None) => {
                        log::info!("stdin closed, shutting down");
                        self.shutdown.signal();
                        break;
                    }
                    Err(err) => {
                        log::warn!("console read failed: {err}");
                        break;
                    }
                },
            }
        }
        log::info!("console down");
    }

    /// Returns false when the console should exit.
    async fn handle_line(&self, line: &str) -> bool {
        if line.is_empty() {
            return true;
        }
        let (verb, rest) = match line.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (line, ""),
        };
        match verb {
            "mode" => self.switch_mode(rest).await,
            "camera" => self.switch_camera(rest),
            "cmd" => self.direct_command(rest).await,
            "ask" => self.submit_query(rest),
            "status" => self.print_status().await,
            "help" => print_usage(),
            "quit" | "exit" => {
                println!("shutting down");
                self.shutdown.signal();
                return false;
            }
            _ if self.modes.current() == Modality::VisionQuery => self.submit_query(line),
            _ => println!("unrecognized input, type 'help' for commands"),
        }
        true
    }

    async fn switch_mode(&self, label: &str) {
        let Some(target) = Modality::from_label(label) else {
            println!("modes: idle, gesture, voice, vision");
            return;
        };
        match self.modes.select(target).await {
            Ok(()) => println!("mode: {}", self.modes.current()),
            Err(reason) => println!("cannot switch: {reason}"),
        }
    }

    fn switch_camera(&self, label: &str) {
        let Some(source) = CameraSource::from_label(label) else {
            println!("cameras: pc, vehicle");
            return;
        };
        self.cameras.select(source);
        println!("camera: {}", self.cameras.current());
    }

    async fn direct_command(&self, name: &str) {
        let name = name.to_lowercase();
        let Some(command) = Command::ALL.into_iter().find(|c| c.name() == name) else {
            println!("commands: {}", command_list());
            return;
        };
        match self.commander.execute(command).await {
            ExecuteOutcome::Executed => println!("ok: {command}"),
            ExecuteOutcome::Rejected(reason) => println!("rejected: {reason}"),
            ExecuteOutcome::Failed(err) => println!("failed: {err}"),
        }
    }

    fn submit_query(&self, prompt: &str) {
        if prompt.is_empty() {
            println!("usage: ask <question about the current view>");
            return;
        }
        self.queue
            .enqueue(RawUtterance::new(prompt, Modality::VisionQuery));
        println!("queued: {prompt:?}");
    }

    async fn print_status(&self) {
        let battery = match self.commander.battery().await {
            Ok(level) => format!("{level}%"),
            Err(err) => format!("unavailable ({err})"),
        };
        println!(
            "mode {} | {} | battery {} | camera {}",
            self.modes.current(),
            self.commander.flight_state(),
            battery,
            self.cameras.current()
        );
        if let Some(answer) = self.modes.last_answer() {
            println!("last answer: {answer}");
        }
    }
}

fn command_list() -> String {
    Command::ALL
        .iter()
        .map(|c| c.name())
        .collect::<Vec<_>>()
        .join(", ")
}

fn print_usage() {
    println!("  mode <idle|gesture|voice|vision>   select the active input modality");
    println!("  camera <pc|vehicle>                select the frame source");
    println!("  cmd <command>                      execute one vehicle command directly");
    println!("  ask <question>                     query the vision model about the view");
    println!("  status                             show mode, flight state, battery, camera");
    println!("  quit                               exit and land if needed");
}
