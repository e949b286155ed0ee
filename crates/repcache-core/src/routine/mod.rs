//! Cache of the resolved routine view for one student.
//!
//! Unlike the entity stores, this cache holds a derived result: the first
//! macrocycle, its active cycle, and which microcycle is selected for today.
//! The date resolution only runs when the view is refetched.

pub mod resolver;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::api::CoachApi;
use crate::clock::Clock;
use crate::models::{Macrocycle, Mesocycle, Microcycle, TrainingDay};
use crate::storage::{Persisted, StateStorage};

pub use resolver::{default_micro_index, find_active_cycle, initial_micro_index, is_relevant};

const ROUTINE_TTL_MINUTES: i64 = 5;

const SELECTION_VERSION: u32 = 1;

fn selection_key(student_id: i64) -> String {
    format!("routine.selected_micro.{}", student_id)
}

/// Resolved routine for one student.
///
/// `selected_micro_index` always points into `active_cycle.microcycles`; a
/// cycle without microcycles is treated as no active cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoutineView {
    pub macrocycle: Option<Macrocycle>,
    pub active_cycle: Option<Mesocycle>,
    pub selected_micro_index: usize,
    pub owner_student_id: Option<i64>,
    pub fetched_at: Option<DateTime<Utc>>,
}

impl RoutineView {
    pub fn current_micro(&self) -> Option<&Microcycle> {
        self.active_cycle
            .as_ref()
            .and_then(|cycle| cycle.microcycles.get(self.selected_micro_index))
    }

    pub fn day_by_id(&self, day_id: i64) -> Option<&TrainingDay> {
        self.active_cycle
            .as_ref()?
            .microcycles
            .iter()
            .find_map(|micro| micro.day(day_id))
    }

    pub fn has_routine(&self) -> bool {
        self.macrocycle.is_some()
    }
}

struct RoutineState {
    view: RoutineView,
    latest_fetch: u64,
}

pub struct RoutineCache {
    api: Arc<dyn CoachApi>,
    clock: Arc<dyn Clock>,
    storage: Arc<dyn StateStorage>,
    ttl: Duration,
    state: Mutex<RoutineState>,
}

impl RoutineCache {
    pub fn new(api: Arc<dyn CoachApi>, clock: Arc<dyn Clock>, storage: Arc<dyn StateStorage>) -> Self {
        Self {
            api,
            clock,
            storage,
            ttl: Duration::minutes(ROUTINE_TTL_MINUTES),
            state: Mutex::new(RoutineState {
                view: RoutineView::default(),
                latest_fetch: 0,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, RoutineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn selection(&self, student_id: i64) -> Persisted<usize> {
        Persisted::new(self.storage.clone(), selection_key(student_id), SELECTION_VERSION)
    }

    fn is_fresh_for(&self, view: &RoutineView, student_id: i64) -> bool {
        view.owner_student_id == Some(student_id)
            && view
                .fetched_at
                .is_some_and(|fetched_at| self.clock.now() - fetched_at < self.ttl)
    }

    /// Whether the cached view is within its TTL.
    pub fn is_fresh(&self) -> bool {
        let state = self.state();
        match state.view.owner_student_id {
            Some(owner) => self.is_fresh_for(&state.view, owner),
            None => false,
        }
    }

    /// Return the routine view for `student_id`, fetching and resolving it
    /// unless a fresh view for the same student is cached.
    ///
    /// A fetch failure is returned as-is and leaves the cached view untouched.
    /// If a newer load or an invalidation happened while this fetch was in
    /// flight, the result is returned to the caller but not cached.
    pub async fn load_routine(&self, student_id: i64, force_refresh: bool) -> Result<RoutineView> {
        let ticket = {
            let mut state = self.state();
            if !force_refresh && self.is_fresh_for(&state.view, student_id) {
                debug!(student_id, "Routine cache hit");
                return Ok(state.view.clone());
            }
            state.latest_fetch += 1;
            state.latest_fetch
        };

        debug!(student_id, force_refresh, "Fetching routine");
        let macrocycles = self
            .api
            .fetch_macrocycles(student_id)
            .await
            .with_context(|| format!("Failed to fetch routine for student {}", student_id))?;

        let view = self.resolve(student_id, macrocycles);

        let mut state = self.state();
        if state.latest_fetch != ticket {
            debug!(student_id, ticket, "Discarding superseded routine fetch");
            return Ok(view);
        }
        state.view = view.clone();
        Ok(view)
    }

    fn resolve(&self, student_id: i64, macrocycles: Vec<Macrocycle>) -> RoutineView {
        let now = self.clock.now();
        let Some(macrocycle) = macrocycles.into_iter().next() else {
            debug!(student_id, "No routine assigned");
            return RoutineView {
                owner_student_id: Some(student_id),
                fetched_at: Some(now),
                ..RoutineView::default()
            };
        };

        let active_cycle = find_active_cycle(&macrocycle)
            .filter(|cycle| !cycle.microcycles.is_empty())
            .cloned();

        let selected_micro_index = match active_cycle {
            Some(ref cycle) => {
                let selection = self.selection(student_id);
                let remembered = selection.hydrate();
                let index = initial_micro_index(&cycle.microcycles, self.clock.today(), remembered);
                if remembered != Some(index) {
                    selection.write_or_log(&index);
                }
                index
            }
            None => 0,
        };

        info!(
            student_id,
            macrocycle = macrocycle.id,
            active_cycle = ?active_cycle.as_ref().map(|c| c.id),
            selected_micro_index,
            "Routine resolved"
        );

        RoutineView {
            macrocycle: Some(macrocycle),
            active_cycle,
            selected_micro_index,
            owner_student_id: Some(student_id),
            fetched_at: Some(now),
        }
    }

    /// Mark the view stale without discarding it, so the UI keeps showing the
    /// current routine while the next `load_routine` refetches.
    pub fn invalidate_cache(&self) {
        let mut state = self.state();
        state.view.fetched_at = None;
        state.latest_fetch += 1;
        debug!(owner = ?state.view.owner_student_id, "Routine cache invalidated");
    }

    /// Select a microcycle of the active cycle and remember the choice.
    pub fn select_micro(&self, index: usize) -> bool {
        let mut state = self.state();
        let in_bounds = state
            .view
            .active_cycle
            .as_ref()
            .is_some_and(|cycle| index < cycle.microcycles.len());
        let Some(owner) = state.view.owner_student_id.filter(|_| in_bounds) else {
            return false;
        };
        state.view.selected_micro_index = index;
        self.selection(owner).write_or_log(&index);
        true
    }

    pub fn view(&self) -> RoutineView {
        self.state().view.clone()
    }

    pub fn fetched_at(&self) -> Option<DateTime<Utc>> {
        self.state().view.fetched_at
    }

    pub fn current_micro(&self) -> Option<Microcycle> {
        self.state().view.current_micro().cloned()
    }

    pub fn day_by_id(&self, day_id: i64) -> Option<TrainingDay> {
        self.state().view.day_by_id(day_id).cloned()
    }

    /// Logout: forget the view entirely.
    pub fn clear(&self) {
        let mut state = self.state();
        state.view = RoutineView::default();
        state.latest_fetch += 1;
    }
}
