//! Lifecycle of the push connection.
//!
//! At most one listener task runs per channel. The task reconnects with a
//! fixed delay up to `ReconnectPolicy::max_attempts` consecutive failures;
//! a successful connect resets the count.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::events::{InvalidationEvent, InvalidationKind, Notice};
use super::transport::PushTransport;
use crate::auth::SessionData;
use crate::cache::CacheManager;
use crate::config::ReconnectPolicy;
use crate::routine::RoutineCache;

/// Pending notices beyond this are dropped.
const NOTICE_BUFFER_SIZE: usize = 32;

/// Applies one event to the local caches.
#[derive(Clone)]
struct EventHandler {
    routine: Arc<RoutineCache>,
    caches: Arc<CacheManager>,
    notices: mpsc::Sender<Notice>,
}

impl EventHandler {
    fn handle(&self, event: InvalidationEvent) {
        info!(
            event = event.kind.event_name(),
            entity_id = ?event.entity_id,
            "Push invalidation received"
        );
        self.routine.invalidate_cache();
        match event.kind {
            InvalidationKind::CacheInvalidate => self.caches.invalidate_all(),
            InvalidationKind::EntityActivated | InvalidationKind::EntityUpdated => {
                self.caches.microcycles().invalidate_all();
            }
        }
        if let Some(notice) = event.notice() {
            if let Err(err) = self.notices.try_send(notice) {
                debug!(error = %err, "Notice not delivered");
            }
        }
    }
}

/// One listener task, bound to the identity it authenticated as.
struct Worker {
    user_id: i64,
    token: String,
    connected: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Worker {
    fn is_live(&self) -> bool {
        !self.handle.is_finished()
    }

    fn serves(&self, session: &SessionData) -> bool {
        self.user_id == session.user_id && self.token == session.token
    }
}

pub struct NotificationChannel {
    transport: Arc<dyn PushTransport>,
    policy: ReconnectPolicy,
    handler: EventHandler,
    worker: Mutex<Option<Worker>>,
}

impl NotificationChannel {
    /// Returns the channel and the receiving end of its notices.
    pub fn new(
        transport: Arc<dyn PushTransport>,
        policy: ReconnectPolicy,
        routine: Arc<RoutineCache>,
        caches: Arc<CacheManager>,
    ) -> (Self, mpsc::Receiver<Notice>) {
        let (notices, receiver) = mpsc::channel(NOTICE_BUFFER_SIZE);
        let channel = Self {
            transport,
            policy,
            handler: EventHandler {
                routine,
                caches,
                notices,
            },
            worker: Mutex::new(None),
        };
        (channel, receiver)
    }

    fn worker(&self) -> MutexGuard<'_, Option<Worker>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bring the channel in line with `session`.
    ///
    /// Only authenticated students get a connection. A listener already
    /// running for the same user and token is kept; one running for any other
    /// identity is closed first, as is any listener when `session` does not
    /// qualify. Returns whether a listener is running afterwards.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn connect(&self, session: Option<&SessionData>) -> bool {
        let Some(session) = session.filter(|s| s.is_authenticated()) else {
            debug!("No authenticated session, push channel stays closed");
            self.disconnect().await;
            return false;
        };
        if !session.role.receives_assignments() {
            debug!(role = %session.role, "Role receives no push invalidations");
            self.disconnect().await;
            return false;
        }

        let current = self.worker().as_ref().map(|w| (w.is_live(), w.serves(session)));
        match current {
            Some((true, true)) => return true,
            Some((true, false)) => {
                info!(user_id = session.user_id, "Identity changed, reconnecting push channel");
                self.disconnect().await;
            }
            _ => {}
        }

        let connected = Arc::new(AtomicBool::new(false));
        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(listen(
            self.transport.clone(),
            session.token.clone(),
            self.policy,
            self.handler.clone(),
            connected.clone(),
            shutdown_rx,
        ));
        let replaced = self.worker().replace(Worker {
            user_id: session.user_id,
            token: session.token.clone(),
            connected,
            shutdown,
            handle,
        });
        // Dropping a worker's shutdown sender stops its task
        drop(replaced);
        info!(user_id = session.user_id, "Push channel started");
        true
    }

    /// Stop the listener and wait until the transport is closed.
    pub async fn disconnect(&self) {
        let worker = self.worker().take();
        if let Some(worker) = worker {
            let _ = worker.shutdown.send(true);
            if let Err(err) = worker.handle.await {
                warn!(error = %err, "Push listener ended abnormally");
            }
            worker.connected.store(false, Ordering::SeqCst);
            info!(user_id = worker.user_id, "Push channel stopped");
        }
    }

    /// True while a transport connection is open.
    pub fn is_connected(&self) -> bool {
        self.worker()
            .as_ref()
            .is_some_and(|w| w.connected.load(Ordering::SeqCst))
    }

    /// True while the listener task is alive, including between reconnects.
    pub fn is_active(&self) -> bool {
        self.worker().as_ref().is_some_and(Worker::is_live)
    }

    /// The user whose token the running listener holds.
    pub fn connected_user(&self) -> Option<i64> {
        self.worker()
            .as_ref()
            .filter(|w| w.is_live())
            .map(|w| w.user_id)
    }
}

async fn listen(
    transport: Arc<dyn PushTransport>,
    token: String,
    policy: ReconnectPolicy,
    handler: EventHandler,
    connected: Arc<AtomicBool>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut failures: u32 = 0;
    loop {
        let attempt = tokio::select! {
            _ = shutdown.changed() => break,
            result = transport.connect(&token) => result,
        };

        match attempt {
            Ok(mut events) => {
                failures = 0;
                connected.store(true, Ordering::SeqCst);
                info!("Push channel connected");
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => {
                            drop(events);
                            connected.store(false, Ordering::SeqCst);
                            return;
                        }
                        next = events.next() => match next {
                            Some(Ok(event)) => handler.handle(event),
                            Some(Err(err)) => {
                                warn!(error = %err, "Push connection lost");
                                break;
                            }
                            None => {
                                warn!("Push connection closed by server");
                                break;
                            }
                        }
                    }
                }
                connected.store(false, Ordering::SeqCst);
            }
            Err(err) => {
                warn!(error = %err, attempt = failures + 1, "Push connect failed");
            }
        }

        failures += 1;
        if failures > policy.max_attempts {
            error!(attempts = failures, "Push channel giving up after repeated failures");
            break;
        }
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(policy.delay()) => {}
        }
    }
    connected.store(false, Ordering::SeqCst);
}
