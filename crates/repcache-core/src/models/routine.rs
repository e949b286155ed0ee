//! Training-plan models.
//!
//! A `Macrocycle` is a student's whole plan. It is split into `Mesocycle`s
//! (cycles), each of which contains ordered `Microcycle`s (sub-cycles, usually
//! a week) made of dated `TrainingDay`s.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleStatus {
    Draft,
    Published,
    Active,
    Completed,
    Archived,
    #[serde(other)]
    Unknown,
}

impl CycleStatus {
    /// Whether a cycle in this status is in effect for the student.
    pub fn is_current(&self) -> bool {
        matches!(self, CycleStatus::Active | CycleStatus::Published)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Macrocycle {
    pub id: i64,
    pub name: String,
    pub student_id: i64,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub mesocycles: Vec<Mesocycle>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mesocycle {
    pub id: i64,
    pub name: String,
    pub status: CycleStatus,
    #[serde(default)]
    pub objective: Option<String>,
    #[serde(default)]
    pub microcycles: Vec<Microcycle>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Microcycle {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub days: Vec<TrainingDay>,
}

impl Microcycle {
    pub fn day(&self, day_id: i64) -> Option<&TrainingDay> {
        self.days.iter().find(|d| d.id == day_id)
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.days.iter().filter_map(|d| d.date)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingDay {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub exercises: Vec<PlannedExercise>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedExercise {
    pub exercise_id: i64,
    pub name: String,
    #[serde(default)]
    pub sets: Option<u32>,
    #[serde(default)]
    pub reps: Option<String>,
    #[serde(default)]
    pub rest_seconds: Option<u32>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_macrocycle_response() {
        let json = r#"{"id": 9, "name": "Off-season", "studentId": 42, "mesocycles": [{"id": 3, "name": "Base", "status": "active", "microcycles": [{"id": 11, "name": "Week 1", "days": [{"id": 100, "name": "Push", "date": "2026-10-12", "exercises": [{"exerciseId": 5, "name": "Bench press", "sets": 4, "reps": "8-10"}]}]}]}]}"#;
        let macro_cycle: Macrocycle = serde_json::from_str(json).unwrap();
        assert_eq!(macro_cycle.student_id, 42);
        let meso = &macro_cycle.mesocycles[0];
        assert_eq!(meso.status, CycleStatus::Active);
        let day = meso.microcycles[0].day(100).unwrap();
        assert_eq!(day.date, NaiveDate::from_ymd_opt(2026, 10, 12));
        assert_eq!(day.exercises[0].reps.as_deref(), Some("8-10"));
    }

    #[test]
    fn test_unknown_status_does_not_fail_parsing() {
        let status: CycleStatus = serde_json::from_str("\"paused\"").unwrap();
        assert_eq!(status, CycleStatus::Unknown);
        assert!(!status.is_current());
        assert!(CycleStatus::Published.is_current());
    }
}
