//! Wiring of the freshness layer for one running client.
//!
//! `AppContext` owns the storage, API client, caches, routine cache, session
//! timer and push channel, and sequences login, resume and logout across
//! them.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{anyhow, bail, Result};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::api::{is_unauthorized, ApiClient, CoachApi};
use crate::auth::{Role, Session, SessionData};
use crate::cache::CacheManager;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::data::DataService;
use crate::models::{
    DashboardSummary, Exercise, FeeRecord, Microcycle, MuscleGroup, StudentSummary, WeightEntry,
    WorkoutSession,
};
use crate::realtime::{NotificationChannel, Notice, PushTransport, WsTransport};
use crate::routine::{RoutineCache, RoutineView};
use crate::storage::{FileStorage, StateStorage};
use crate::timer::SessionTimer;

pub struct AppContext {
    api: Arc<dyn CoachApi>,
    caches: Arc<CacheManager>,
    data: DataService,
    routine: Arc<RoutineCache>,
    timer: Mutex<SessionTimer>,
    channel: NotificationChannel,
    notices: Mutex<Option<mpsc::Receiver<Notice>>>,
    session: Mutex<Session>,
}

impl AppContext {
    /// Production wiring: file storage under the configured data directory,
    /// HTTP API and WebSocket push.
    pub fn new(config: &Config) -> Result<Self> {
        let storage: Arc<dyn StateStorage> = Arc::new(FileStorage::new(config.data_dir()?)?);
        let api: Arc<dyn CoachApi> = Arc::new(ApiClient::new(
            &config.api_base_url,
            config.request_timeout_secs,
        )?);
        let transport: Arc<dyn PushTransport> = Arc::new(WsTransport::new(&config.push_url));
        Ok(Self::from_parts(config, api, transport, Arc::new(SystemClock), storage))
    }

    pub fn from_parts(
        config: &Config,
        api: Arc<dyn CoachApi>,
        transport: Arc<dyn PushTransport>,
        clock: Arc<dyn Clock>,
        storage: Arc<dyn StateStorage>,
    ) -> Self {
        let caches = Arc::new(CacheManager::with_storage(clock.clone(), storage.clone()));
        let routine = Arc::new(RoutineCache::new(api.clone(), clock.clone(), storage.clone()));
        let (channel, notices) =
            NotificationChannel::new(transport, config.reconnect, routine.clone(), caches.clone());
        Self {
            data: DataService::new(api.clone(), caches.clone()),
            timer: Mutex::new(SessionTimer::with_storage(clock, storage.clone())),
            session: Mutex::new(Session::new(storage)),
            notices: Mutex::new(Some(notices)),
            api,
            caches,
            routine,
            channel,
        }
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn timer(&self) -> MutexGuard<'_, SessionTimer> {
        self.timer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn caches(&self) -> &CacheManager {
        &self.caches
    }

    pub fn routine(&self) -> &RoutineCache {
        &self.routine
    }

    pub fn channel(&self) -> &NotificationChannel {
        &self.channel
    }

    /// Receiver for push notices. Only the first caller gets it.
    pub fn take_notices(&self) -> Option<mpsc::Receiver<Notice>> {
        self.notices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn session_data(&self) -> Option<SessionData> {
        self.session().data.clone()
    }

    /// Restore the persisted session and timer without opening the push
    /// channel. Returns whether a session was found.
    pub fn restore(&self) -> bool {
        let data = {
            let mut session = self.session();
            session.load();
            session.data.clone().filter(SessionData::is_authenticated)
        };
        self.timer().restore_session();

        let Some(data) = data else {
            return false;
        };
        self.api.set_auth_token(Some(&data.token));
        info!(user_id = data.user_id, role = %data.role, "Session restored");
        true
    }

    /// App start or return to foreground: `restore`, then open the push
    /// channel for a logged-in student.
    pub async fn resume(&self) -> bool {
        if !self.restore() {
            return false;
        }
        let data = self.session_data();
        self.channel.connect(data.as_ref()).await;
        true
    }

    /// Store `data` as the current session and bring the push channel in
    /// line with it. Switching users first closes the old user's channel and
    /// drops everything cached for them.
    pub async fn login(&self, data: SessionData) -> Result<()> {
        let previous = self.session().user_id();
        if previous.is_some_and(|id| id != data.user_id) {
            info!(previous = ?previous, "Different user, dropping cached data");
            self.channel.disconnect().await;
            self.caches.clear_all();
            self.routine.clear();
            self.timer().reset();
        }

        self.api.set_auth_token(Some(&data.token));
        {
            let mut session = self.session();
            session.update(data.clone());
            session.save()?;
        }
        self.channel.connect(Some(&data)).await;
        info!(user_id = data.user_id, role = %data.role, "Logged in");
        Ok(())
    }

    /// Close the push channel before any state is dropped, then clear every
    /// cache, the timer and the persisted session.
    pub async fn logout(&self) -> Result<()> {
        self.channel.disconnect().await;
        self.caches.clear_all();
        self.routine.clear();
        self.timer().reset();
        self.api.set_auth_token(None);
        self.session().clear()?;
        info!("Logged out");
        Ok(())
    }

    /// The student whose data to show: `explicit` for a coach, the logged-in
    /// user for a student.
    pub fn student_id(&self, explicit: Option<i64>) -> Result<i64> {
        let session = self.session();
        let data = session
            .data
            .as_ref()
            .ok_or_else(|| anyhow!("Not logged in"))?;
        match (data.role, explicit) {
            (_, Some(id)) => Ok(id),
            (Role::Student, None) => Ok(data.user_id),
            (Role::Coach, None) => bail!("A coach must name the student"),
        }
    }

    /// A rejected token ends the session.
    async fn checked<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(ref err) = result {
            if is_unauthorized(err) {
                warn!("Session token rejected, logging out");
                if let Err(e) = self.logout().await {
                    warn!(error = %e, "Logout after rejected token failed");
                }
            }
        }
        result
    }

    pub async fn history(&self, student_id: i64, force_refresh: bool) -> Result<Vec<WorkoutSession>> {
        let result = if force_refresh {
            self.data.refresh_history(student_id).await
        } else {
            self.data.history(student_id).await
        };
        self.checked(result).await
    }

    pub async fn full_history(
        &self,
        student_id: i64,
        force_refresh: bool,
    ) -> Result<Vec<WorkoutSession>> {
        let result = if force_refresh {
            self.data.refresh_full_history(student_id).await
        } else {
            self.data.full_history(student_id).await
        };
        self.checked(result).await
    }

    pub async fn dashboard(&self, student_id: i64, force_refresh: bool) -> Result<DashboardSummary> {
        let result = if force_refresh {
            self.data.refresh_dashboard(student_id).await
        } else {
            self.data.dashboard(student_id).await
        };
        self.checked(result).await
    }

    pub async fn fees(&self, student_id: i64, force_refresh: bool) -> Result<Vec<FeeRecord>> {
        let result = if force_refresh {
            self.data.refresh_fees(student_id).await
        } else {
            self.data.fees(student_id).await
        };
        self.checked(result).await
    }

    pub async fn weight_history(
        &self,
        student_id: i64,
        force_refresh: bool,
    ) -> Result<Vec<WeightEntry>> {
        let result = if force_refresh {
            self.data.refresh_weight_history(student_id).await
        } else {
            self.data.weight_history(student_id).await
        };
        self.checked(result).await
    }

    pub async fn microcycle(&self, microcycle_id: i64, force_refresh: bool) -> Result<Microcycle> {
        let result = if force_refresh {
            self.data.refresh_microcycle(microcycle_id).await
        } else {
            self.data.microcycle(microcycle_id).await
        };
        self.checked(result).await
    }

    /// Coach overview of every student.
    pub async fn students_summary(&self, force_refresh: bool) -> Result<Vec<StudentSummary>> {
        let result = if force_refresh {
            self.data.refresh_students_summary().await
        } else {
            self.data.students_summary().await
        };
        self.checked(result).await
    }

    pub async fn exercise_catalog(&self, force_refresh: bool) -> Result<Vec<Exercise>> {
        let result = if force_refresh {
            self.data.refresh_exercise_catalog().await
        } else {
            self.data.exercise_catalog().await
        };
        self.checked(result).await
    }

    pub async fn muscle_groups(&self, force_refresh: bool) -> Result<Vec<MuscleGroup>> {
        let result = if force_refresh {
            self.data.refresh_muscle_groups().await
        } else {
            self.data.muscle_groups().await
        };
        self.checked(result).await
    }

    pub async fn load_routine(&self, student_id: i64, force_refresh: bool) -> Result<RoutineView> {
        let result = self.routine.load_routine(student_id, force_refresh).await;
        self.checked(result).await
    }

    /// Submit the finished timer session. On success the timer is reset and
    /// the owner's cached history and dashboard are dropped; on failure the
    /// timer keeps its finished state so the submit can be retried.
    pub async fn submit_cardio(&self) -> Result<WorkoutSession> {
        let Some(log) = self.timer().submission() else {
            bail!("No finished cardio session to submit");
        };
        let result = self.api.submit_cardio_log(&log).await;
        let session = self.checked(result).await?;

        self.timer().reset();
        self.caches.invalidate_student(log.student_id);
        info!(
            student_id = log.student_id,
            duration_seconds = log.duration_seconds,
            "Cardio session submitted"
        );
        Ok(session)
    }
}
