//! Elapsed-time tracker for a live cardio session.
//!
//! The timer never counts ticks. Elapsed time is always
//! `accumulated + (now - run_started_at)` while running, so a process that is
//! suspended for any length of time reports the right value as soon as it is
//! observed again. Only timestamps and status are persisted.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::clock::Clock;
use crate::models::{CardioKind, CardioLogRequest};
use crate::storage::{Persisted, StateStorage};

/// Storage key for the persisted timer
const TIMER_KEY: &str = "cardio_timer";
const TIMER_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerStatus {
    #[default]
    Idle,
    Running,
    Paused,
    Finished,
}

/// The persisted slice of the timer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TimerSnapshot {
    status: TimerStatus,
    activity_kind: Option<CardioKind>,
    owner_id: Option<i64>,
    run_started_at: Option<DateTime<Utc>>,
    accumulated_seconds: f64,
    started_at: Option<DateTime<Utc>>,
}

impl TimerSnapshot {
    /// Repair states that break `run_started_at.is_some() == (status == Running)`.
    fn normalized(mut self) -> Self {
        match (self.status, self.run_started_at) {
            (TimerStatus::Running, None) => {
                debug!("Persisted timer was running without a start time, treating as paused");
                self.status = TimerStatus::Paused;
            }
            (TimerStatus::Running, Some(_)) => {}
            (_, Some(_)) => self.run_started_at = None,
            (_, None) => {}
        }
        if !self.accumulated_seconds.is_finite() || self.accumulated_seconds < 0.0 {
            self.accumulated_seconds = 0.0;
        }
        self
    }
}

pub struct SessionTimer {
    clock: Arc<dyn Clock>,
    state: TimerSnapshot,
    distance_km: Option<f64>,
    calories: Option<u32>,
    notes: Option<String>,
    display_seconds: u64,
    persisted: Option<Persisted<TimerSnapshot>>,
}

impl SessionTimer {
    /// A timer that lives in memory only.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: TimerSnapshot::default(),
            distance_km: None,
            calories: None,
            notes: None,
            display_seconds: 0,
            persisted: None,
        }
    }

    /// A timer hydrated from, and written back to, durable storage.
    pub fn with_storage(clock: Arc<dyn Clock>, storage: Arc<dyn StateStorage>) -> Self {
        let mut timer = Self::new(clock);
        timer.persisted = Some(Persisted::new(storage, TIMER_KEY, TIMER_VERSION));
        timer.restore_session();
        timer
    }

    fn persist(&self) {
        let Some(ref persisted) = self.persisted else {
            return;
        };
        if self.state.status == TimerStatus::Idle {
            if let Err(e) = persisted.remove() {
                debug!(error = %e, "Failed to remove persisted timer");
            }
        } else {
            persisted.write_or_log(&self.state);
        }
    }

    fn run_span_seconds(&self, now: DateTime<Utc>) -> f64 {
        match self.state.run_started_at {
            // Clamped: a wall clock moved backwards must not shrink elapsed time
            Some(started) => (now - started).num_milliseconds().max(0) as f64 / 1000.0,
            None => 0.0,
        }
    }

    // ===== Transitions =====

    /// Start a new session, discarding whatever was there before.
    pub fn start(&mut self, activity_kind: CardioKind, owner_id: i64) {
        let now = self.clock.now();
        self.state = TimerSnapshot {
            status: TimerStatus::Running,
            activity_kind: Some(activity_kind),
            owner_id: Some(owner_id),
            run_started_at: Some(now),
            accumulated_seconds: 0.0,
            started_at: Some(now),
        };
        self.distance_km = None;
        self.calories = None;
        self.notes = None;
        self.display_seconds = 0;
        info!(kind = %activity_kind, owner_id, "Cardio session started");
        self.persist();
    }

    pub fn pause(&mut self) {
        if self.state.status != TimerStatus::Running {
            return;
        }
        let now = self.clock.now();
        self.state.accumulated_seconds += self.run_span_seconds(now);
        self.state.status = TimerStatus::Paused;
        self.state.run_started_at = None;
        self.update_elapsed();
        self.persist();
    }

    pub fn resume(&mut self) {
        if self.state.status != TimerStatus::Paused {
            return;
        }
        self.state.status = TimerStatus::Running;
        self.state.run_started_at = Some(self.clock.now());
        self.persist();
    }

    /// Finish the session. `accumulated_seconds` is the duration to submit.
    pub fn stop(&mut self) {
        if self.state.status == TimerStatus::Idle {
            return;
        }
        if self.state.status == TimerStatus::Running {
            let now = self.clock.now();
            self.state.accumulated_seconds += self.run_span_seconds(now);
        }
        self.state.status = TimerStatus::Finished;
        self.state.run_started_at = None;
        self.update_elapsed();
        info!(seconds = self.state.accumulated_seconds, "Cardio session stopped");
        self.persist();
    }

    /// Back to the idle initial state.
    pub fn reset(&mut self) {
        self.state = TimerSnapshot::default();
        self.distance_km = None;
        self.calories = None;
        self.notes = None;
        self.display_seconds = 0;
        self.persist();
    }

    /// Reload the persisted state after the process resumes and recompute the
    /// elapsed time from its timestamps. Unreadable state resets to idle.
    pub fn restore_session(&mut self) {
        if let Some(ref persisted) = self.persisted {
            self.state = persisted.hydrate().unwrap_or_default().normalized();
        } else {
            self.state = std::mem::take(&mut self.state).normalized();
        }
        let elapsed = self.update_elapsed();
        debug!(status = ?self.state.status, elapsed, "Timer session restored");
    }

    /// Recompute the display value. Called on every UI refresh tick.
    pub fn update_elapsed(&mut self) -> u64 {
        self.display_seconds = self.elapsed_seconds().floor() as u64;
        self.display_seconds
    }

    // ===== Accessors =====

    pub fn status(&self) -> TimerStatus {
        self.state.status
    }

    pub fn is_running(&self) -> bool {
        self.state.status == TimerStatus::Running
    }

    /// Elapsed time right now, computed from timestamps.
    pub fn elapsed_seconds(&self) -> f64 {
        self.state.accumulated_seconds + self.run_span_seconds(self.clock.now())
    }

    /// The value computed by the last `update_elapsed`.
    pub fn display_seconds(&self) -> u64 {
        self.display_seconds
    }

    pub fn accumulated_seconds(&self) -> f64 {
        self.state.accumulated_seconds
    }

    pub fn activity_kind(&self) -> Option<CardioKind> {
        self.state.activity_kind
    }

    pub fn owner_id(&self) -> Option<i64> {
        self.state.owner_id
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.state.started_at
    }

    pub fn run_started_at(&self) -> Option<DateTime<Utc>> {
        self.state.run_started_at
    }

    // ===== Scratch fields =====

    pub fn set_distance_km(&mut self, distance_km: Option<f64>) {
        self.distance_km = distance_km;
    }

    pub fn set_calories(&mut self, calories: Option<u32>) {
        self.calories = calories;
    }

    pub fn set_notes(&mut self, notes: Option<String>) {
        self.notes = notes.filter(|n| !n.trim().is_empty());
    }

    /// The log to submit for a finished session.
    pub fn submission(&self) -> Option<CardioLogRequest> {
        if self.state.status != TimerStatus::Finished {
            return None;
        }
        Some(CardioLogRequest {
            student_id: self.state.owner_id?,
            kind: self.state.activity_kind?,
            started_at: self.state.started_at?,
            duration_seconds: self.state.accumulated_seconds.round() as u64,
            distance_km: self.distance_km,
            calories: self.calories,
            notes: self.notes.clone(),
        })
    }
}
