//! In-memory `CoachApi` for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;

use crate::api::{ApiError, CoachApi};
use crate::models::{
    CardioLogRequest, DashboardSummary, Exercise, FeeRecord, Macrocycle, Microcycle, MuscleGroup,
    StudentSummary, WeightEntry, WorkoutSession,
};

#[derive(Default)]
pub(crate) struct StubApi {
    pub macrocycles: Mutex<Vec<Macrocycle>>,
    pub exercises: Mutex<Vec<Exercise>>,
    pub fail: AtomicBool,
    pub unauthorized: AtomicBool,
    pub submitted: Mutex<Vec<CardioLogRequest>>,
    /// When set, routine fetches wait for a notification before answering.
    pub hold: Mutex<Option<Arc<tokio::sync::Notify>>>,
    calls: Mutex<HashMap<&'static str, usize>>,
}

impl StubApi {
    pub fn with_macrocycles(macrocycles: Vec<Macrocycle>) -> Self {
        Self {
            macrocycles: Mutex::new(macrocycles),
            ..Self::default()
        }
    }

    pub fn calls(&self, endpoint: &str) -> usize {
        self.calls.lock().unwrap().get(endpoint).copied().unwrap_or(0)
    }

    fn record(&self, endpoint: &'static str) -> Result<()> {
        *self.calls.lock().unwrap().entry(endpoint).or_insert(0) += 1;
        if self.unauthorized.load(Ordering::SeqCst) {
            return Err(ApiError::Unauthorized.into());
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("connection reset"));
        }
        Ok(())
    }
}

#[async_trait]
impl CoachApi for StubApi {
    async fn fetch_macrocycles(&self, _student_id: i64) -> Result<Vec<Macrocycle>> {
        self.record("macrocycles")?;
        let hold = self.hold.lock().unwrap().clone();
        if let Some(hold) = hold {
            hold.notified().await;
        }
        Ok(self.macrocycles.lock().unwrap().clone())
    }

    async fn fetch_history(&self, student_id: i64) -> Result<Vec<WorkoutSession>> {
        self.record("history")?;
        Ok(vec![session(1, student_id)])
    }

    async fn fetch_full_history(&self, student_id: i64) -> Result<Vec<WorkoutSession>> {
        self.record("full_history")?;
        Ok(vec![session(1, student_id), session(2, student_id)])
    }

    async fn fetch_dashboard(&self, student_id: i64) -> Result<DashboardSummary> {
        self.record("dashboard")?;
        Ok(DashboardSummary {
            student_id,
            workouts_this_week: 3,
            ..DashboardSummary::default()
        })
    }

    async fn fetch_fees(&self, _student_id: i64) -> Result<Vec<FeeRecord>> {
        self.record("fees")?;
        Ok(Vec::new())
    }

    async fn fetch_weight_history(&self, _student_id: i64) -> Result<Vec<WeightEntry>> {
        self.record("weight")?;
        Ok(Vec::new())
    }

    async fn fetch_microcycle(&self, microcycle_id: i64) -> Result<Microcycle> {
        self.record("microcycle")?;
        Ok(Microcycle {
            id: microcycle_id,
            name: format!("Week {}", microcycle_id),
            days: Vec::new(),
        })
    }

    async fn fetch_students_summary(&self) -> Result<Vec<StudentSummary>> {
        self.record("students_summary")?;
        Ok(Vec::new())
    }

    async fn fetch_exercise_catalog(&self) -> Result<Vec<Exercise>> {
        self.record("exercises")?;
        Ok(self.exercises.lock().unwrap().clone())
    }

    async fn fetch_muscle_groups(&self) -> Result<Vec<MuscleGroup>> {
        self.record("muscle_groups")?;
        Ok(vec![MuscleGroup {
            id: 1,
            name: "Legs".to_string(),
        }])
    }

    async fn submit_cardio_log(&self, log: &CardioLogRequest) -> Result<WorkoutSession> {
        self.record("cardio")?;
        self.submitted.lock().unwrap().push(log.clone());
        Ok(WorkoutSession {
            id: 500,
            student_id: log.student_id,
            performed_at: log.started_at,
            day_name: Some(log.kind.to_string()),
            duration_seconds: Some(log.duration_seconds),
            notes: log.notes.clone(),
        })
    }
}

fn session(id: i64, student_id: i64) -> WorkoutSession {
    WorkoutSession {
        id,
        student_id,
        performed_at: chrono::Utc::now(),
        day_name: None,
        duration_seconds: None,
        notes: None,
    }
}
