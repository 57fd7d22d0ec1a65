//! 30-day batch replay against the oracle.
//!
//! One compute request per day, oldest first, each awaited before the next is
//! issued. Progress lives in an explicit state machine:
//!
//! ```text
//! Idle -> Running { step 0..29 } -> Done | Failed
//! ```
//!
//! Only one run may be in flight. A second `begin` while running is refused.

use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::oracle::OracleBackend;

pub const SIMULATION_DAYS: u32 = 30;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SimulationState {
    Idle,
    Running {
        asset_id: String,
        step: u32,
        date: NaiveDate,
    },
    Done {
        asset_id: String,
        completed: u32,
    },
    Failed {
        asset_id: String,
        completed: u32,
        failed_on: NaiveDate,
        reason: String,
    },
}

impl SimulationState {
    pub fn is_running(&self) -> bool {
        matches!(self, SimulationState::Running { .. })
    }
}

/// `today - 29 ..= today`, oldest first.
pub fn simulation_dates(today: NaiveDate) -> Vec<NaiveDate> {
    (0..SIMULATION_DAYS)
        .rev()
        .map(|offset| today - Duration::days(offset as i64))
        .collect()
}

/// Outcome of the replay loop, before the terminal refreshes.
#[derive(Debug)]
pub enum ReplayOutcome {
    Completed {
        days: u32,
    },
    Aborted {
        completed: u32,
        failed_on: NaiveDate,
        error: anyhow::Error,
    },
}

#[derive(Debug, Clone)]
pub struct BatchSimulation {
    state: Arc<Mutex<SimulationState>>,
}

impl Default for BatchSimulation {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchSimulation {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimulationState::Idle)),
        }
    }

    pub fn state(&self) -> SimulationState {
        self.state.lock().clone()
    }

    pub fn is_busy(&self) -> bool {
        self.state.lock().is_running()
    }

    /// Claim the orchestrator. `None` if a run is already in flight.
    pub fn begin(&self, asset_id: &str, today: NaiveDate) -> Option<SimulationRun> {
        let mut state = self.state.lock();
        if state.is_running() {
            return None;
        }

        let dates = simulation_dates(today);
        *state = SimulationState::Running {
            asset_id: asset_id.to_string(),
            step: 0,
            date: dates[0],
        };

        Some(SimulationRun {
            state: self.state.clone(),
            asset_id: asset_id.to_string(),
            dates,
            finished: false,
        })
    }
}

/// Exclusive claim on the orchestrator for one run.
///
/// Dropping an unfinished run (e.g. the driving future was cancelled) moves
/// the state to `Failed` so the busy flag cannot stick.
pub struct SimulationRun {
    state: Arc<Mutex<SimulationState>>,
    asset_id: String,
    dates: Vec<NaiveDate>,
    finished: bool,
}

impl SimulationRun {
    pub fn asset_id(&self) -> &str {
        &self.asset_id
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    /// Issue the per-day requests strictly in sequence. Stops at the first
    /// failure; days already computed stay committed server-side.
    pub async fn replay(&mut self, backend: &dyn OracleBackend) -> ReplayOutcome {
        info!(asset_id = %self.asset_id, days = self.dates.len(), "▶️ Batch simulation started");

        for (step, date) in self.dates.iter().copied().enumerate() {
            let step = step as u32;
            *self.state.lock() = SimulationState::Running {
                asset_id: self.asset_id.clone(),
                step,
                date,
            };

            match backend.compute_day(&self.asset_id, date, None).await {
                Ok(result) => {
                    debug!(
                        asset_id = %self.asset_id,
                        step,
                        %date,
                        verdict = %result.verdict,
                        "simulated day"
                    );
                }
                Err(error) => {
                    warn!(asset_id = %self.asset_id, step, %date, error = %error, "Batch simulation step failed");
                    return ReplayOutcome::Aborted {
                        completed: step,
                        failed_on: date,
                        error,
                    };
                }
            }
        }

        ReplayOutcome::Completed {
            days: self.dates.len() as u32,
        }
    }

    /// Record the terminal state and release the orchestrator.
    pub fn finish(mut self, outcome: &ReplayOutcome) -> SimulationState {
        let terminal = match outcome {
            ReplayOutcome::Completed { days } => SimulationState::Done {
                asset_id: self.asset_id.clone(),
                completed: *days,
            },
            ReplayOutcome::Aborted {
                completed,
                failed_on,
                error,
            } => SimulationState::Failed {
                asset_id: self.asset_id.clone(),
                completed: *completed,
                failed_on: *failed_on,
                reason: format!("{:#}", error),
            },
        };

        *self.state.lock() = terminal.clone();
        self.finished = true;
        info!(asset_id = %self.asset_id, state = ?terminal, "Batch simulation finished");
        terminal
    }
}

impl Drop for SimulationRun {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let mut state = self.state.lock();
        let (completed, failed_on) = match &*state {
            SimulationState::Running { step, date, .. } => (*step, *date),
            _ => return,
        };
        *state = SimulationState::Failed {
            asset_id: self.asset_id.clone(),
            completed,
            failed_on,
            reason: "simulation cancelled".to_string(),
        };
    }
}
