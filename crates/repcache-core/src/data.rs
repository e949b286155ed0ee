//! Fetch-through reads for every cached entity.
//!
//! Each read serves a fresh cache entry when there is one and otherwise calls
//! the API and stores the result. A failed fetch never touches the cache.
//! `refresh_*` variants always hit the API.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::api::CoachApi;
use crate::cache::CacheManager;
use crate::models::{
    DashboardSummary, Exercise, FeeRecord, Microcycle, MuscleGroup, StudentSummary, WeightEntry,
    WorkoutSession,
};

#[derive(Clone)]
pub struct DataService {
    api: Arc<dyn CoachApi>,
    caches: Arc<CacheManager>,
}

impl DataService {
    pub fn new(api: Arc<dyn CoachApi>, caches: Arc<CacheManager>) -> Self {
        Self { api, caches }
    }

    pub fn caches(&self) -> &CacheManager {
        &self.caches
    }

    /// Result passthrough that flushes the persisted slice after a successful fetch.
    fn persisted<T>(&self, result: Result<T>) -> Result<T> {
        if result.is_ok() {
            self.caches.sync_persisted();
        }
        result
    }

    pub async fn history(&self, student_id: i64) -> Result<Vec<WorkoutSession>> {
        let result = self
            .caches
            .history()
            .get_or_fetch(student_id, || self.api.fetch_history(student_id))
            .await
            .context("Failed to load workout history");
        self.persisted(result)
    }

    pub async fn refresh_history(&self, student_id: i64) -> Result<Vec<WorkoutSession>> {
        let result = self
            .caches
            .history()
            .fetch_into(student_id, || self.api.fetch_history(student_id))
            .await
            .context("Failed to load workout history");
        self.persisted(result)
    }

    pub async fn full_history(&self, student_id: i64) -> Result<Vec<WorkoutSession>> {
        self.caches
            .full_history()
            .get_or_fetch(student_id, || self.api.fetch_full_history(student_id))
            .await
            .context("Failed to load full workout history")
    }

    pub async fn refresh_full_history(&self, student_id: i64) -> Result<Vec<WorkoutSession>> {
        self.caches
            .full_history()
            .fetch_into(student_id, || self.api.fetch_full_history(student_id))
            .await
            .context("Failed to load full workout history")
    }

    pub async fn dashboard(&self, student_id: i64) -> Result<DashboardSummary> {
        self.caches
            .dashboard()
            .get_or_fetch(student_id, || self.api.fetch_dashboard(student_id))
            .await
            .context("Failed to load dashboard")
    }

    pub async fn refresh_dashboard(&self, student_id: i64) -> Result<DashboardSummary> {
        self.caches
            .dashboard()
            .fetch_into(student_id, || self.api.fetch_dashboard(student_id))
            .await
            .context("Failed to load dashboard")
    }

    pub async fn fees(&self, student_id: i64) -> Result<Vec<FeeRecord>> {
        self.caches
            .fees()
            .get_or_fetch(student_id, || self.api.fetch_fees(student_id))
            .await
            .context("Failed to load fees")
    }

    pub async fn refresh_fees(&self, student_id: i64) -> Result<Vec<FeeRecord>> {
        self.caches
            .fees()
            .fetch_into(student_id, || self.api.fetch_fees(student_id))
            .await
            .context("Failed to load fees")
    }

    pub async fn weight_history(&self, student_id: i64) -> Result<Vec<WeightEntry>> {
        self.caches
            .weight()
            .get_or_fetch(student_id, || self.api.fetch_weight_history(student_id))
            .await
            .context("Failed to load weight history")
    }

    pub async fn refresh_weight_history(&self, student_id: i64) -> Result<Vec<WeightEntry>> {
        self.caches
            .weight()
            .fetch_into(student_id, || self.api.fetch_weight_history(student_id))
            .await
            .context("Failed to load weight history")
    }

    pub async fn microcycle(&self, microcycle_id: i64) -> Result<Microcycle> {
        self.caches
            .microcycles()
            .get_or_fetch(microcycle_id, || self.api.fetch_microcycle(microcycle_id))
            .await
            .with_context(|| format!("Failed to load microcycle {}", microcycle_id))
    }

    pub async fn refresh_microcycle(&self, microcycle_id: i64) -> Result<Microcycle> {
        self.caches
            .microcycles()
            .fetch_into(microcycle_id, || self.api.fetch_microcycle(microcycle_id))
            .await
            .with_context(|| format!("Failed to load microcycle {}", microcycle_id))
    }

    pub async fn students_summary(&self) -> Result<Vec<StudentSummary>> {
        let result = self
            .caches
            .students_summary()
            .get_or_fetch(|| self.api.fetch_students_summary())
            .await
            .context("Failed to load students");
        self.persisted(result)
    }

    pub async fn refresh_students_summary(&self) -> Result<Vec<StudentSummary>> {
        let result = self
            .caches
            .students_summary()
            .refresh(|| self.api.fetch_students_summary())
            .await
            .context("Failed to load students");
        self.persisted(result)
    }

    pub async fn exercise_catalog(&self) -> Result<Vec<Exercise>> {
        let result = self
            .caches
            .exercise_catalog()
            .get_or_fetch(|| self.api.fetch_exercise_catalog())
            .await
            .context("Failed to load exercise catalog");
        self.persisted(result)
    }

    pub async fn refresh_exercise_catalog(&self) -> Result<Vec<Exercise>> {
        let result = self
            .caches
            .exercise_catalog()
            .refresh(|| self.api.fetch_exercise_catalog())
            .await
            .context("Failed to load exercise catalog");
        self.persisted(result)
    }

    pub async fn muscle_groups(&self) -> Result<Vec<MuscleGroup>> {
        let result = self
            .caches
            .muscle_groups()
            .get_or_fetch(|| self.api.fetch_muscle_groups())
            .await
            .context("Failed to load muscle groups");
        self.persisted(result)
    }

    pub async fn refresh_muscle_groups(&self) -> Result<Vec<MuscleGroup>> {
        let result = self
            .caches
            .muscle_groups()
            .refresh(|| self.api.fetch_muscle_groups())
            .await
            .context("Failed to load muscle groups");
        self.persisted(result)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use chrono::{Duration, TimeZone, Utc};

    use super::*;
    use crate::clock::ManualClock;
    use crate::models::Exercise;
    use crate::storage::{MemoryStorage, StateStorage};
    use crate::test_support::StubApi;

    fn setup() -> (Arc<StubApi>, Arc<ManualClock>, Arc<MemoryStorage>, DataService) {
        let api = Arc::new(StubApi::default());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 10, 17, 9, 0, 0).unwrap(),
        ));
        let storage = Arc::new(MemoryStorage::new());
        let caches = Arc::new(CacheManager::with_storage(clock.clone(), storage.clone()));
        (api.clone(), clock, storage, DataService::new(api, caches))
    }

    #[tokio::test]
    async fn test_dashboard_fetch_through() {
        let (api, clock, _storage, data) = setup();
        assert_eq!(data.dashboard(7).await.unwrap().workouts_this_week, 3);
        data.dashboard(7).await.unwrap();
        assert_eq!(api.calls("dashboard"), 1);

        clock.advance(Duration::minutes(5));
        data.dashboard(7).await.unwrap();
        assert_eq!(api.calls("dashboard"), 2);

        data.refresh_dashboard(7).await.unwrap();
        assert_eq!(api.calls("dashboard"), 3);
    }

    #[tokio::test]
    async fn test_catalog_ttl_is_thirty_minutes() {
        let (api, clock, _storage, data) = setup();
        api.exercises.lock().unwrap().push(Exercise {
            id: 1,
            name: "Squat".to_string(),
            muscle_group_id: Some(1),
            equipment: None,
            video_url: None,
        });

        data.exercise_catalog().await.unwrap();
        clock.advance(Duration::minutes(29));
        assert_eq!(data.exercise_catalog().await.unwrap().len(), 1);
        assert_eq!(api.calls("exercises"), 1);

        clock.advance(Duration::minutes(2));
        data.exercise_catalog().await.unwrap();
        assert_eq!(api.calls("exercises"), 2);
    }

    #[tokio::test]
    async fn test_failure_leaves_cache_untouched() {
        let (api, clock, _storage, data) = setup();
        data.fees(7).await.unwrap();
        api.fail.store(true, Ordering::SeqCst);

        // Still fresh, served from cache
        assert!(data.fees(7).await.is_ok());

        clock.advance(Duration::minutes(6));
        assert!(data.fees(7).await.is_err());
        assert!(data.caches().get_fees(7).is_none());

        api.fail.store(false, Ordering::SeqCst);
        assert!(data.fees(7).await.is_ok());
    }

    #[tokio::test]
    async fn test_persisted_slice_written_after_fetch() {
        let (_api, clock, storage, data) = setup();
        data.muscle_groups().await.unwrap();
        data.history(7).await.unwrap();

        let storage: Arc<dyn StateStorage> = storage;
        let restored = CacheManager::with_storage(clock, storage);
        assert_eq!(restored.get_muscle_groups().map(|g| g.len()), Some(1));
        assert!(restored.get_history(7).is_some());
    }
}
