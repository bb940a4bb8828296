//! Keep-alive and battery watchdog
//!
//! Ticks for the lifetime of the process. Every tick reads the battery level,
//! which doubles as the connection ping, and enforces the landing thresholds:
//! an airborne vehicle is landed automatically in the low band and immediately
//! in the critical band. A grounded vehicle gets a zero-velocity heartbeat so
//! the link does not idle out.

use std::sync::Arc;
use std::time::Duration;

use crate::commander::VehicleCommander;
use crate::types::{Command, PilotConfig};
use crate::Shutdown;

pub struct Watchdog {
    commander: Arc<VehicleCommander>,
    interval: Duration,
    low_level: u8,
    critical_level: u8,
    shutdown: Shutdown,
    /// Set after the one-time warning for the current stay in the low band.
    low_warned: bool,
}

impl Watchdog {
    pub fn new(commander: Arc<VehicleCommander>, config: &PilotConfig, shutdown: Shutdown) -> Self {
        Self {
            commander,
            interval: config.watchdog_interval(),
            low_level: config.low_battery_percent,
            critical_level: config.critical_battery_percent,
            shutdown,
            low_warned: false,
        }
    }

    pub async fn run(mut self) {
        log::info!("watchdog up, ticking every {:?}", self.interval);
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = self.shutdown.wait() => break,
                _ = ticker.tick() => self.tick().await,
            }
        }
        log::info!("watchdog down");
    }

    async fn tick(&mut self) {
        let level = match self.commander.battery().await {
            Ok(level) => level,
            Err(err) => {
                log::warn!("battery check failed: {err}");
                return;
            }
        };
        log::debug!("battery at {level}%");

        if level > self.low_level {
            self.low_warned = false;
        } else if !self.low_warned {
            log::warn!("battery entering the low band at {level}%");
            self.low_warned = true;
        }

        if self.commander.flight_state().is_airborne() {
            if level <= self.critical_level {
                log::error!("battery critical at {level}%, emergency landing");
                self.commander.execute(Command::Land).await;
            } else if level <= self.low_level {
                log::warn!("battery low at {level}%, landing automatically");
                self.commander.execute(Command::Land).await;
            }
        } else {
            self.commander.stabilize().await;
        }
    }
}
