//! Data models for coaching entities.
//!
//! Each cached entity has its own concrete type so the cache layer stays
//! generic over the value instead of holding untyped JSON:
//!
//! - Routine types: `Macrocycle`, `Mesocycle`, `Microcycle`, `TrainingDay`
//! - Student records: `WorkoutSession`, `FeeRecord`, `WeightEntry`, `DashboardSummary`
//! - Catalog types: `Exercise`, `MuscleGroup`
//! - Cardio logging: `CardioKind`, `CardioLogRequest`

pub mod cardio;
pub mod exercise;
pub mod routine;
pub mod student;

pub use cardio::{CardioKind, CardioLogRequest};
pub use exercise::{Exercise, MuscleGroup};
pub use routine::{CycleStatus, Macrocycle, Mesocycle, Microcycle, PlannedExercise, TrainingDay};
pub use student::{DashboardSummary, FeeRecord, FeeStatus, StudentSummary, WeightEntry, WorkoutSession};
