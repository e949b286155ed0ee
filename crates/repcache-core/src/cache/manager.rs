use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::entry::CachedData;
use super::resource::ResourceCache;
use super::store::EntityCache;
use crate::clock::Clock;
use crate::models::{
    DashboardSummary, Exercise, FeeRecord, Microcycle, MuscleGroup, StudentSummary, WeightEntry,
    WorkoutSession,
};
use crate::storage::{Persisted, StateStorage};

// TTLs follow how often each entity changes upstream.
const HISTORY_TTL_MINUTES: i64 = 5;
const FULL_HISTORY_TTL_MINUTES: i64 = 10;
const DASHBOARD_TTL_MINUTES: i64 = 5;
const FEES_TTL_MINUTES: i64 = 5;
const WEIGHT_TTL_MINUTES: i64 = 5;
const MICROCYCLE_TTL_MINUTES: i64 = 5;
const STUDENTS_SUMMARY_TTL_MINUTES: i64 = 5;
const EXERCISE_CATALOG_TTL_MINUTES: i64 = 30;
const MUSCLE_GROUPS_TTL_MINUTES: i64 = 60;

/// Storage key for the persisted cache slice
const PERSISTED_CACHES_KEY: &str = "caches";
const PERSISTED_CACHES_VERSION: u32 = 1;

/// The subset of stores that survives a reload. Per-student dashboard, fees
/// and weight stay memory-only: they are keyed by whichever student is being
/// viewed and are cheap to refetch.
#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedCaches {
    #[serde(default)]
    history: HashMap<i64, CachedData<Vec<WorkoutSession>>>,
    #[serde(default)]
    students_summary: Option<CachedData<Vec<StudentSummary>>>,
    #[serde(default)]
    exercise_catalog: Option<CachedData<Vec<Exercise>>>,
    #[serde(default)]
    muscle_groups: Option<CachedData<Vec<MuscleGroup>>>,
}

/// Owner of every entity cache in the client.
pub struct CacheManager {
    clock: Arc<dyn Clock>,
    history: EntityCache<i64, Vec<WorkoutSession>>,
    full_history: EntityCache<i64, Vec<WorkoutSession>>,
    dashboard: EntityCache<i64, DashboardSummary>,
    fees: EntityCache<i64, Vec<FeeRecord>>,
    weight: EntityCache<i64, Vec<WeightEntry>>,
    microcycles: EntityCache<i64, Microcycle>,
    students_summary: ResourceCache<Vec<StudentSummary>>,
    exercise_catalog: ResourceCache<Vec<Exercise>>,
    muscle_groups: ResourceCache<Vec<MuscleGroup>>,
    persisted: Option<Persisted<PersistedCaches>>,
    persisted_revision: AtomicU64,
}

impl CacheManager {
    /// Memory-only manager.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            history: EntityCache::new("history", Duration::minutes(HISTORY_TTL_MINUTES), clock.clone()),
            full_history: EntityCache::new(
                "full_history",
                Duration::minutes(FULL_HISTORY_TTL_MINUTES),
                clock.clone(),
            ),
            dashboard: EntityCache::new("dashboard", Duration::minutes(DASHBOARD_TTL_MINUTES), clock.clone()),
            fees: EntityCache::new("fees", Duration::minutes(FEES_TTL_MINUTES), clock.clone()),
            weight: EntityCache::new("weight", Duration::minutes(WEIGHT_TTL_MINUTES), clock.clone()),
            microcycles: EntityCache::new(
                "microcycles",
                Duration::minutes(MICROCYCLE_TTL_MINUTES),
                clock.clone(),
            ),
            students_summary: ResourceCache::new(
                "students_summary",
                Duration::minutes(STUDENTS_SUMMARY_TTL_MINUTES),
                clock.clone(),
            ),
            exercise_catalog: ResourceCache::new(
                "exercise_catalog",
                Duration::minutes(EXERCISE_CATALOG_TTL_MINUTES),
                clock.clone(),
            ),
            muscle_groups: ResourceCache::new(
                "muscle_groups",
                Duration::minutes(MUSCLE_GROUPS_TTL_MINUTES),
                clock.clone(),
            ),
            clock,
            persisted: None,
            persisted_revision: AtomicU64::new(0),
        }
    }

    /// Manager whose designated stores are hydrated from, and written back to,
    /// durable storage.
    pub fn with_storage(clock: Arc<dyn Clock>, storage: Arc<dyn StateStorage>) -> Self {
        let mut manager = Self::new(clock);
        let persisted: Persisted<PersistedCaches> =
            Persisted::new(storage, PERSISTED_CACHES_KEY, PERSISTED_CACHES_VERSION);
        if let Some(state) = persisted.hydrate() {
            debug!(
                history = state.history.len(),
                catalog = state.exercise_catalog.is_some(),
                "Hydrated persisted caches"
            );
            manager.history.hydrate(state.history);
            manager.students_summary.hydrate(state.students_summary);
            manager.exercise_catalog.hydrate(state.exercise_catalog);
            manager.muscle_groups.hydrate(state.muscle_groups);
        }
        manager
            .persisted_revision
            .store(manager.current_persisted_revision(), Ordering::SeqCst);
        manager.persisted = Some(persisted);
        manager
    }

    fn current_persisted_revision(&self) -> u64 {
        self.history.revision()
            + self.students_summary.revision()
            + self.exercise_catalog.revision()
            + self.muscle_groups.revision()
    }

    /// Write the persisted slice if any persisted store changed since the last
    /// write. Storage failures are logged, never surfaced.
    pub fn sync_persisted(&self) {
        let Some(ref persisted) = self.persisted else {
            return;
        };
        let revision = self.current_persisted_revision();
        if self.persisted_revision.swap(revision, Ordering::SeqCst) == revision {
            return;
        }
        let state = PersistedCaches {
            history: self.history.snapshot(),
            students_summary: self.students_summary.snapshot(),
            exercise_catalog: self.exercise_catalog.snapshot(),
            muscle_groups: self.muscle_groups.snapshot(),
        };
        persisted.write_or_log(&state);
    }

    // ===== Workout History =====

    pub fn history(&self) -> &EntityCache<i64, Vec<WorkoutSession>> {
        &self.history
    }

    pub fn get_history(&self, student_id: i64) -> Option<Vec<WorkoutSession>> {
        let value = self.history.get(&student_id);
        self.sync_persisted();
        value
    }

    pub fn set_history(&self, student_id: i64, sessions: Vec<WorkoutSession>) {
        self.history.set(student_id, sessions);
        self.sync_persisted();
    }

    pub fn invalidate_history(&self, student_id: i64) {
        self.history.invalidate(&student_id);
        self.sync_persisted();
    }

    // ===== Full History =====

    pub fn full_history(&self) -> &EntityCache<i64, Vec<WorkoutSession>> {
        &self.full_history
    }

    pub fn get_full_history(&self, student_id: i64) -> Option<Vec<WorkoutSession>> {
        self.full_history.get(&student_id)
    }

    pub fn set_full_history(&self, student_id: i64, sessions: Vec<WorkoutSession>) {
        self.full_history.set(student_id, sessions);
    }

    pub fn invalidate_full_history(&self, student_id: i64) {
        self.full_history.invalidate(&student_id);
    }

    // ===== Dashboard Summary =====

    pub fn dashboard(&self) -> &EntityCache<i64, DashboardSummary> {
        &self.dashboard
    }

    pub fn get_dashboard(&self, student_id: i64) -> Option<DashboardSummary> {
        self.dashboard.get(&student_id)
    }

    pub fn set_dashboard(&self, student_id: i64, summary: DashboardSummary) {
        self.dashboard.set(student_id, summary);
    }

    pub fn invalidate_dashboard(&self, student_id: i64) {
        self.dashboard.invalidate(&student_id);
    }

    // ===== Fees =====

    pub fn fees(&self) -> &EntityCache<i64, Vec<FeeRecord>> {
        &self.fees
    }

    pub fn get_fees(&self, student_id: i64) -> Option<Vec<FeeRecord>> {
        self.fees.get(&student_id)
    }

    pub fn set_fees(&self, student_id: i64, fees: Vec<FeeRecord>) {
        self.fees.set(student_id, fees);
    }

    pub fn invalidate_fees(&self, student_id: i64) {
        self.fees.invalidate(&student_id);
    }

    // ===== Weight History =====

    pub fn weight(&self) -> &EntityCache<i64, Vec<WeightEntry>> {
        &self.weight
    }

    pub fn get_weight_history(&self, student_id: i64) -> Option<Vec<WeightEntry>> {
        self.weight.get(&student_id)
    }

    pub fn set_weight_history(&self, student_id: i64, entries: Vec<WeightEntry>) {
        self.weight.set(student_id, entries);
    }

    pub fn invalidate_weight_history(&self, student_id: i64) {
        self.weight.invalidate(&student_id);
    }

    // ===== Microcycles =====

    pub fn microcycles(&self) -> &EntityCache<i64, Microcycle> {
        &self.microcycles
    }

    pub fn get_microcycle(&self, microcycle_id: i64) -> Option<Microcycle> {
        self.microcycles.get(&microcycle_id)
    }

    pub fn set_microcycle(&self, microcycle_id: i64, microcycle: Microcycle) {
        self.microcycles.set(microcycle_id, microcycle);
    }

    pub fn invalidate_microcycle(&self, microcycle_id: i64) {
        self.microcycles.invalidate(&microcycle_id);
    }

    // ===== Students Summary (coach side) =====

    pub fn students_summary(&self) -> &ResourceCache<Vec<StudentSummary>> {
        &self.students_summary
    }

    pub fn get_students_summary(&self) -> Option<Vec<StudentSummary>> {
        let value = self.students_summary.get();
        self.sync_persisted();
        value
    }

    pub fn set_students_summary(&self, students: Vec<StudentSummary>) {
        self.students_summary.set(students);
        self.sync_persisted();
    }

    pub fn invalidate_students_summary(&self) {
        self.students_summary.invalidate();
        self.sync_persisted();
    }

    // ===== Exercise Catalog =====

    pub fn exercise_catalog(&self) -> &ResourceCache<Vec<Exercise>> {
        &self.exercise_catalog
    }

    pub fn get_exercise_catalog(&self) -> Option<Vec<Exercise>> {
        let value = self.exercise_catalog.get();
        self.sync_persisted();
        value
    }

    pub fn set_exercise_catalog(&self, exercises: Vec<Exercise>) {
        self.exercise_catalog.set(exercises);
        self.sync_persisted();
    }

    pub fn invalidate_exercise_catalog(&self) {
        self.exercise_catalog.invalidate();
        self.sync_persisted();
    }

    // ===== Muscle Groups =====

    pub fn muscle_groups(&self) -> &ResourceCache<Vec<MuscleGroup>> {
        &self.muscle_groups
    }

    pub fn get_muscle_groups(&self) -> Option<Vec<MuscleGroup>> {
        let value = self.muscle_groups.get();
        self.sync_persisted();
        value
    }

    pub fn set_muscle_groups(&self, groups: Vec<MuscleGroup>) {
        self.muscle_groups.set(groups);
        self.sync_persisted();
    }

    pub fn invalidate_muscle_groups(&self) {
        self.muscle_groups.invalidate();
        self.sync_persisted();
    }

    // ===== Bulk Invalidation =====

    /// Drop everything cached about one student.
    pub fn invalidate_student(&self, student_id: i64) {
        self.history.invalidate(&student_id);
        self.full_history.invalidate(&student_id);
        self.dashboard.invalidate(&student_id);
        self.fees.invalidate(&student_id);
        self.weight.invalidate(&student_id);
        self.sync_persisted();
    }

    /// Drop all per-identity data. The exercise catalog and muscle groups are
    /// shared reference data and stay cached.
    pub fn invalidate_all(&self) {
        self.history.invalidate_all();
        self.full_history.invalidate_all();
        self.dashboard.invalidate_all();
        self.fees.invalidate_all();
        self.weight.invalidate_all();
        self.microcycles.invalidate_all();
        self.students_summary.invalidate();
        self.sync_persisted();
    }

    /// Logout: clear every store and the persisted slice.
    pub fn clear_all(&self) {
        self.invalidate_all();
        self.exercise_catalog.invalidate();
        self.muscle_groups.invalidate();
        if let Some(ref persisted) = self.persisted {
            if let Err(e) = persisted.remove() {
                warn!(error = %e, "Failed to remove persisted caches");
            }
            self.persisted_revision
                .store(self.current_persisted_revision(), Ordering::SeqCst);
        }
    }

    // ===== Cache Age Information =====

    pub fn cache_ages(&self) -> CacheAges {
        let now = self.clock.now();
        CacheAges {
            students_summary: self.students_summary.get_entry().map(|c| c.age_display(now)),
            exercise_catalog: self.exercise_catalog.get_entry().map(|c| c.age_display(now)),
            muscle_groups: self.muscle_groups.get_entry().map(|c| c.age_display(now)),
        }
    }
}

#[derive(Debug, Default)]
pub struct CacheAges {
    pub students_summary: Option<String>,
    pub exercise_catalog: Option<String>,
    pub muscle_groups: Option<String>,
}

impl CacheAges {
    pub fn catalog_age(&self) -> String {
        self.exercise_catalog
            .clone()
            .unwrap_or_else(|| "never".to_string())
    }

    pub fn students_age(&self) -> String {
        self.students_summary
            .clone()
            .unwrap_or_else(|| "never".to_string())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};

    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::MemoryStorage;

    fn session(id: i64, student_id: i64) -> WorkoutSession {
        WorkoutSession {
            id,
            student_id,
            performed_at: Utc::now(),
            day_name: Some("Legs".to_string()),
            duration_seconds: Some(3600),
            notes: None,
        }
    }

    fn fee(student_id: i64) -> FeeRecord {
        FeeRecord {
            id: 1,
            student_id,
            amount_cents: 5000,
            due_date: NaiveDate::from_ymd_opt(2026, 11, 1).unwrap(),
            status: crate::models::FeeStatus::Pending,
            paid_at: None,
        }
    }

    #[test]
    fn test_ttls_differ_per_store() {
        let manager = CacheManager::new(Arc::new(ManualClock::default()));
        assert_eq!(manager.history().ttl(), Duration::minutes(5));
        assert_eq!(manager.full_history().ttl(), Duration::minutes(10));
        assert_eq!(manager.exercise_catalog().ttl(), Duration::minutes(30));
        assert_eq!(manager.muscle_groups().ttl(), Duration::minutes(60));
    }

    #[test]
    fn test_designated_stores_survive_reload() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let storage: Arc<dyn StateStorage> = Arc::new(MemoryStorage::new());

        let manager = CacheManager::with_storage(clock.clone(), storage.clone());
        manager.set_history(42, vec![session(1, 42)]);
        manager.set_fees(42, vec![fee(42)]);
        manager.set_muscle_groups(vec![MuscleGroup {
            id: 1,
            name: "Back".to_string(),
        }]);

        let reloaded = CacheManager::with_storage(clock, storage);
        assert_eq!(reloaded.get_history(42).map(|h| h.len()), Some(1));
        assert!(reloaded.get_muscle_groups().is_some());
        // Fees are memory-only
        assert_eq!(reloaded.get_fees(42), None);
    }

    #[test]
    fn test_reload_keeps_ttl_from_original_write() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let storage: Arc<dyn StateStorage> = Arc::new(MemoryStorage::new());

        CacheManager::with_storage(clock.clone(), storage.clone()).set_history(1, vec![session(1, 1)]);
        clock.advance(Duration::minutes(6));

        let reloaded = CacheManager::with_storage(clock, storage);
        assert_eq!(reloaded.get_history(1), None);
    }

    #[test]
    fn test_corrupted_persisted_caches_start_empty() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set(PERSISTED_CACHES_KEY, "][").unwrap();
        let manager = CacheManager::with_storage(Arc::new(ManualClock::default()), storage);
        assert_eq!(manager.get_exercise_catalog(), None);
        assert!(manager.history().is_empty());
    }

    #[test]
    fn test_invalidate_student_only_touches_that_student() {
        let manager = CacheManager::new(Arc::new(ManualClock::default()));
        manager.set_history(1, vec![session(1, 1)]);
        manager.set_history(2, vec![session(2, 2)]);
        manager.set_fees(1, vec![fee(1)]);

        manager.invalidate_student(1);
        assert_eq!(manager.get_history(1), None);
        assert_eq!(manager.get_fees(1), None);
        assert!(manager.get_history(2).is_some());
    }

    #[test]
    fn test_invalidate_all_keeps_reference_data() {
        let manager = CacheManager::new(Arc::new(ManualClock::default()));
        manager.set_history(1, vec![session(1, 1)]);
        manager.set_exercise_catalog(vec![]);

        manager.invalidate_all();
        assert_eq!(manager.get_history(1), None);
        assert!(manager.get_exercise_catalog().is_some());
    }

    #[test]
    fn test_clear_all_removes_persisted_slice() {
        let clock = Arc::new(ManualClock::default());
        let storage: Arc<dyn StateStorage> = Arc::new(MemoryStorage::new());
        let manager = CacheManager::with_storage(clock.clone(), storage.clone());
        manager.set_exercise_catalog(vec![]);
        assert!(storage.get(PERSISTED_CACHES_KEY).is_some());

        manager.clear_all();
        assert!(storage.get(PERSISTED_CACHES_KEY).is_none());
        assert_eq!(manager.get_exercise_catalog(), None);
    }

    #[test]
    fn test_cache_ages() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let manager = CacheManager::new(clock.clone());
        assert_eq!(manager.cache_ages().catalog_age(), "never");

        manager.set_exercise_catalog(vec![]);
        clock.advance(Duration::minutes(12));
        assert_eq!(manager.cache_ages().catalog_age(), "12m ago");
        assert_eq!(manager.cache_ages().students_age(), "never");
    }
}
