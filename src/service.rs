//! Collaborator-facing facade: the commands and status a front end (CLI,
//! settings form, poller) needs, on top of the rotation engine.

use std::sync::Mutex;

use chrono::NaiveDateTime;
use config_model::NextSwitch;
use tracing::{debug, info, warn};

use crate::config::Configuration;
use crate::error::Error;
use crate::events::OperationState;
use crate::rotation::{RotationEngine, lock};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceStatus {
    pub state: OperationState,
    /// Outcome of the last operation, or the idle state text.
    pub message: String,
    pub next_switch: String,
    pub viewed: usize,
}

pub struct RotationService {
    engine: RotationEngine,
    config: Mutex<Configuration>,
    last_tick: Mutex<NaiveDateTime>,
    next_switch: Mutex<NextSwitch>,
}

impl RotationService {
    /// Open the engine's records from `config.state_dir`.
    pub fn new(config: Configuration, now: NaiveDateTime) -> Self {
        let engine = RotationEngine::open(&config.state_dir, config.engine_options());
        Self::with_engine(config, engine, now)
    }

    pub fn with_engine(config: Configuration, engine: RotationEngine, now: NaiveDateTime) -> Self {
        let next = config.schedule.next_after(now);
        Self {
            engine,
            config: Mutex::new(config),
            last_tick: Mutex::new(now),
            next_switch: Mutex::new(next),
        }
    }

    pub fn engine(&self) -> &RotationEngine {
        &self.engine
    }

    pub fn config(&self) -> Configuration {
        lock(&self.config).clone()
    }

    pub fn switch_now(&self) -> Result<(), Error> {
        let request = lock(&self.config).switch_request();
        self.engine.switch_now(request)
    }

    pub fn clear_gallery(&self) -> Result<(), Error> {
        let request = lock(&self.config).clear_request();
        self.engine.clear_gallery(request)
    }

    pub fn reset_history(&self) -> Result<(), Error> {
        self.engine.reset_history()
    }

    /// Replace the active settings and recompute the next-switch display.
    ///
    /// The stores stay where the engine opened them; a new `state-dir`
    /// applies on the next start.
    pub fn update_settings(&self, config: Configuration, now: NaiveDateTime) -> anyhow::Result<()> {
        let config = config.validated()?;
        *lock(&self.config) = config;
        self.refresh_next_switch(now);
        info!("settings updated");
        Ok(())
    }

    /// Poller entry point. Starts a switch when a scheduled time falls in
    /// `(previous tick, now]` and refreshes the next-switch display.
    /// Returns whether a switch was started.
    pub fn tick(&self, now: NaiveDateTime) -> bool {
        let previous = std::mem::replace(&mut *lock(&self.last_tick), now);
        let schedule = lock(&self.config).schedule.clone();
        let due = schedule
            .times_on(now.date())
            .into_iter()
            .find(|at| *at > previous && *at <= now);

        let mut started = false;
        if let Some(at) = due {
            if self.engine.is_busy() {
                debug!(at = %at.format("%H:%M"), "scheduled switch skipped; rotation running");
            } else {
                info!(at = %at.format("%H:%M"), "scheduled switch");
                match self.switch_now() {
                    Ok(()) => started = true,
                    Err(err) => warn!("scheduled switch not started: {err}"),
                }
            }
        }
        self.refresh_next_switch(now);
        started
    }

    pub fn next_switch(&self) -> NextSwitch {
        *lock(&self.next_switch)
    }

    pub fn status(&self) -> ServiceStatus {
        let engine = self.engine.status();
        let message = match (&engine.state, &engine.last_outcome) {
            (OperationState::Working, _) | (_, None) => engine.state.to_string(),
            (OperationState::Idle, Some(outcome)) => outcome.to_string(),
        };
        ServiceStatus {
            state: engine.state,
            message,
            next_switch: self.next_switch().to_string(),
            viewed: engine.viewed,
        }
    }

    pub fn shutdown(&self) {
        let grace = lock(&self.config).shutdown_grace;
        self.engine.shutdown(grace);
    }

    fn refresh_next_switch(&self, now: NaiveDateTime) {
        let next = lock(&self.config).schedule.next_after(now);
        *lock(&self.next_switch) = next;
    }
}
