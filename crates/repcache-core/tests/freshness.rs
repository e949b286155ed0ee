//! End-to-end freshness scenarios across the routine cache, the push channel,
//! the entity stores and the session timer.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use futures::channel::mpsc as fmpsc;
use futures::StreamExt;

use repcache_core::api::CoachApi;
use repcache_core::auth::{Role, SessionData};
use repcache_core::models::{
    CardioLogRequest, CycleStatus, DashboardSummary, Exercise, FeeRecord, Macrocycle, Mesocycle,
    Microcycle, MuscleGroup, StudentSummary, TrainingDay, WeightEntry, WorkoutSession,
};
use repcache_core::realtime::{
    EventStream, InvalidationEvent, InvalidationKind, NotificationChannel, PushTransport,
};
use repcache_core::{
    CacheManager, EntityCache, ManualClock, MemoryStorage, ReconnectPolicy, RoutineCache,
    SessionTimer, StateStorage, TimerStatus,
};

fn now() -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(2026, 10, 17)
        .unwrap()
        .and_hms_opt(8, 30, 0)
        .unwrap()
        .and_utc()
}

/// Serves a fixed macrocycle list and counts routine fetches.
struct RoutineApi {
    macrocycles: Vec<Macrocycle>,
    fetches: AtomicUsize,
}

impl RoutineApi {
    fn new(macrocycles: Vec<Macrocycle>) -> Arc<Self> {
        Arc::new(Self {
            macrocycles,
            fetches: AtomicUsize::new(0),
        })
    }

    fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CoachApi for RoutineApi {
    async fn fetch_macrocycles(&self, _student_id: i64) -> Result<Vec<Macrocycle>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.macrocycles.clone())
    }
    async fn fetch_history(&self, _: i64) -> Result<Vec<WorkoutSession>> {
        bail!("not served")
    }
    async fn fetch_full_history(&self, _: i64) -> Result<Vec<WorkoutSession>> {
        bail!("not served")
    }
    async fn fetch_dashboard(&self, _: i64) -> Result<DashboardSummary> {
        bail!("not served")
    }
    async fn fetch_fees(&self, _: i64) -> Result<Vec<FeeRecord>> {
        bail!("not served")
    }
    async fn fetch_weight_history(&self, _: i64) -> Result<Vec<WeightEntry>> {
        bail!("not served")
    }
    async fn fetch_microcycle(&self, _: i64) -> Result<Microcycle> {
        bail!("not served")
    }
    async fn fetch_students_summary(&self) -> Result<Vec<StudentSummary>> {
        bail!("not served")
    }
    async fn fetch_exercise_catalog(&self) -> Result<Vec<Exercise>> {
        bail!("not served")
    }
    async fn fetch_muscle_groups(&self) -> Result<Vec<MuscleGroup>> {
        bail!("not served")
    }
    async fn submit_cardio_log(&self, _: &CardioLogRequest) -> Result<WorkoutSession> {
        bail!("not served")
    }
}

/// Hands out one pre-built event stream.
struct OneShotTransport {
    stream: Mutex<Option<EventStream>>,
}

#[async_trait]
impl PushTransport for OneShotTransport {
    async fn connect(&self, _token: &str) -> Result<EventStream> {
        match self.stream.lock().unwrap().take() {
            Some(stream) => Ok(stream),
            None => bail!("no more connections"),
        }
    }
}

fn micro(id: i64, offsets: &[i64]) -> Microcycle {
    Microcycle {
        id,
        name: format!("Week {}", id),
        days: offsets
            .iter()
            .enumerate()
            .map(|(i, offset)| TrainingDay {
                id: id * 100 + i as i64,
                name: format!("Day {}", i + 1),
                date: Some(now().date_naive() + Duration::days(*offset)),
                exercises: vec![],
            })
            .collect(),
    }
}

fn plan(micros: Vec<Microcycle>) -> Macrocycle {
    Macrocycle {
        id: 5,
        name: "Off-season".to_string(),
        student_id: 42,
        start_date: None,
        end_date: None,
        mesocycles: vec![
            Mesocycle {
                id: 1,
                name: "Base".to_string(),
                status: CycleStatus::Completed,
                objective: None,
                microcycles: vec![micro(9, &[-60])],
            },
            Mesocycle {
                id: 2,
                name: "Build".to_string(),
                status: CycleStatus::Active,
                objective: Some("Strength".to_string()),
                microcycles: micros,
            },
        ],
    }
}

fn routine_cache(api: Arc<RoutineApi>) -> (Arc<ManualClock>, Arc<RoutineCache>) {
    let clock = Arc::new(ManualClock::new(now()));
    let storage: Arc<dyn StateStorage> = Arc::new(MemoryStorage::new());
    let cache = Arc::new(RoutineCache::new(api, clock.clone(), storage));
    (clock, cache)
}

#[tokio::test]
async fn routine_defaults_to_the_recent_sub_cycle() {
    let api = RoutineApi::new(vec![plan(vec![
        micro(0, &[-14, -12, -10]),
        micro(1, &[-5, -3]),
        micro(2, &[10, 12]),
    ])]);
    let (_clock, cache) = routine_cache(api);

    let view = cache.load_routine(42, false).await.unwrap();
    assert_eq!(view.active_cycle.as_ref().map(|c| c.id), Some(2));
    assert_eq!(view.selected_micro_index, 1);
    assert_eq!(view.current_micro().map(|m| m.id), Some(1));
}

#[tokio::test]
async fn cache_hit_suppresses_fetch() {
    let api = RoutineApi::new(vec![plan(vec![micro(0, &[0])])]);
    let (clock, cache) = routine_cache(api.clone());

    cache.load_routine(42, false).await.unwrap();
    clock.advance(Duration::minutes(4));
    cache.load_routine(42, false).await.unwrap();
    assert_eq!(api.fetches(), 1);
}

#[tokio::test]
async fn push_update_for_another_entity_forces_refetch() {
    let api = RoutineApi::new(vec![plan(vec![micro(0, &[0])])]);
    let (clock, cache) = routine_cache(api.clone());
    let caches = Arc::new(CacheManager::new(clock.clone()));

    cache.load_routine(42, false).await.unwrap();
    assert!(cache.is_fresh());

    let (tx, rx) = fmpsc::unbounded();
    let transport = Arc::new(OneShotTransport {
        stream: Mutex::new(Some(rx.boxed())),
    });
    let (channel, mut notices) = NotificationChannel::new(
        transport,
        ReconnectPolicy {
            max_attempts: 0,
            delay_ms: 10,
        },
        cache.clone(),
        caches,
    );
    let session = SessionData {
        token: "jwt".to_string(),
        user_id: 42,
        display_name: "Ana".to_string(),
        role: Role::Student,
        created_at: now(),
    };
    assert!(channel.connect(Some(&session)).await);

    let mut event = InvalidationEvent::new(InvalidationKind::EntityUpdated);
    event.entity_id = Some(777);
    tx.unbounded_send(Ok(event)).unwrap();

    let notice = tokio::time::timeout(StdDuration::from_secs(1), notices.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(notice.entity_id, Some(777));
    assert!(cache.fetched_at().is_none());
    // The view itself is kept for display while stale
    assert!(cache.view().has_routine());

    cache.load_routine(42, false).await.unwrap();
    assert_eq!(api.fetches(), 2);
    channel.disconnect().await;
}

#[tokio::test]
async fn empty_routine_is_cached_for_its_ttl() {
    let api = RoutineApi::new(Vec::new());
    let (clock, cache) = routine_cache(api.clone());

    let view = cache.load_routine(42, false).await.unwrap();
    assert!(!view.has_routine());

    clock.advance(Duration::minutes(1));
    cache.load_routine(42, false).await.unwrap();
    assert_eq!(api.fetches(), 1);

    clock.advance(Duration::minutes(5));
    cache.load_routine(42, false).await.unwrap();
    assert_eq!(api.fetches(), 2);
}

#[test]
fn entity_store_expires_on_read() {
    let clock = Arc::new(ManualClock::new(now()));
    let store: EntityCache<i64, Vec<FeeRecord>> =
        EntityCache::new("fees", Duration::minutes(5), clock.clone());

    store.set(7, Vec::new());
    assert_eq!(store.get(&7), Some(Vec::new()));

    clock.advance(Duration::minutes(5));
    assert!(store.contains_raw(&7));
    assert_eq!(store.get(&7), None);
    assert!(!store.contains_raw(&7));

    store.set(7, Vec::new());
    store.invalidate(&7);
    assert_eq!(store.get(&7), None);
}

#[test]
fn running_timer_restores_from_timestamps() {
    let clock = Arc::new(ManualClock::new(now()));
    let storage: Arc<dyn StateStorage> = Arc::new(MemoryStorage::new());
    let run_started_at = now() - Duration::seconds(300);
    storage
        .set(
            "cardio_timer",
            &format!(
                r#"{{"version":1,"state":{{"status":"running","activityKind":"running","ownerId":42,"runStartedAt":"{}","accumulatedSeconds":120.0,"startedAt":"{}"}}}}"#,
                run_started_at.to_rfc3339(),
                (run_started_at - Duration::seconds(200)).to_rfc3339()
            ),
        )
        .unwrap();

    let mut timer = SessionTimer::with_storage(clock, storage);
    assert_eq!(timer.status(), TimerStatus::Running);
    assert!((timer.elapsed_seconds() - 420.0).abs() < 1.0);
    assert_eq!(timer.update_elapsed(), 420);
}
