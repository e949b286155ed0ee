//! REST API access for the coaching backend.
//!
//! `CoachApi` is the seam the caches depend on; `ApiClient` implements it over
//! HTTP with bearer-token authentication. Tests substitute their own
//! implementations.

pub mod client;
pub mod error;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{
    CardioLogRequest, DashboardSummary, Exercise, FeeRecord, Macrocycle, Microcycle, MuscleGroup,
    StudentSummary, WeightEntry, WorkoutSession,
};

pub use client::ApiClient;
pub use error::{is_unauthorized, ApiError};

#[async_trait]
pub trait CoachApi: Send + Sync {
    /// Install or drop the bearer token used by later requests.
    fn set_auth_token(&self, _token: Option<&str>) {}

    async fn fetch_macrocycles(&self, student_id: i64) -> Result<Vec<Macrocycle>>;

    /// Most recent workouts only
    async fn fetch_history(&self, student_id: i64) -> Result<Vec<WorkoutSession>>;

    async fn fetch_full_history(&self, student_id: i64) -> Result<Vec<WorkoutSession>>;

    async fn fetch_dashboard(&self, student_id: i64) -> Result<DashboardSummary>;

    async fn fetch_fees(&self, student_id: i64) -> Result<Vec<FeeRecord>>;

    async fn fetch_weight_history(&self, student_id: i64) -> Result<Vec<WeightEntry>>;

    async fn fetch_microcycle(&self, microcycle_id: i64) -> Result<Microcycle>;

    async fn fetch_students_summary(&self) -> Result<Vec<StudentSummary>>;

    async fn fetch_exercise_catalog(&self) -> Result<Vec<Exercise>>;

    async fn fetch_muscle_groups(&self) -> Result<Vec<MuscleGroup>>;

    async fn submit_cardio_log(&self, log: &CardioLogRequest) -> Result<WorkoutSession>;
}
