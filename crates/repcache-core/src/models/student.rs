//! Per-student records shown on the coach and student dashboards.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// One logged workout in a student's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkoutSession {
    pub id: i64,
    pub student_id: i64,
    pub performed_at: DateTime<Utc>,
    #[serde(default)]
    pub day_name: Option<String>,
    #[serde(default)]
    pub duration_seconds: Option<u64>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeeStatus {
    Pending,
    Paid,
    Overdue,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeRecord {
    pub id: i64,
    pub student_id: i64,
    /// Amount in minor currency units.
    pub amount_cents: i64,
    pub due_date: NaiveDate,
    pub status: FeeStatus,
    #[serde(default)]
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightEntry {
    pub id: i64,
    pub recorded_on: NaiveDate,
    pub weight_kg: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSummary {
    pub student_id: i64,
    #[serde(default)]
    pub workouts_this_week: u32,
    #[serde(default)]
    pub workouts_this_month: u32,
    #[serde(default)]
    pub last_workout_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub current_weight_kg: Option<f64>,
    #[serde(default)]
    pub pending_fees: u32,
}

/// Row of the coach's student list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentSummary {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub active_routine: Option<String>,
    #[serde(default)]
    pub last_workout_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub has_overdue_fees: bool,
}
