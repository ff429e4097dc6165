//! Live SCORM sessions, one per embedded frame
//!
//! Opening a session goes through the unlock check, so a gated item never
//! gets a runtime. Sessions are addressed by an opaque id handed to the
//! frame's API shim. Frames that vanish without closing are flushed and
//! dropped by a periodic sweep.

use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::cmi::ScormVersion;
use super::session::{CommitData, RuntimeStore, ScormSession, SessionState};
use super::wire;
use crate::config::Config;
use crate::db::models::{current_timestamp, NewRuntimeState, RuntimeState};
use crate::db::{courses, runtime_state, ProgressDb};
use crate::error::LearningError;
use crate::services::unlock_service::AccessDecision;
use crate::services::{LearningEvent, ProgressService, Services};

/// Runtime persistence backed by the progress database
pub struct ServiceRuntimeStore {
    db: Arc<ProgressDb>,
    progress: Arc<ProgressService>,
}

impl ServiceRuntimeStore {
    pub fn new(db: Arc<ProgressDb>, progress: Arc<ProgressService>) -> Self {
        Self { db, progress }
    }
}

impl RuntimeStore for ServiceRuntimeStore {
    fn load(&self, user_id: &str, content_item_id: &str) -> Result<Option<RuntimeState>, LearningError> {
        self.db
            .with_conn(|conn| runtime_state::get_state(conn, user_id, content_item_id))
    }

    fn commit(&self, data: &CommitData) -> Result<(), LearningError> {
        let now = current_timestamp();
        let state = NewRuntimeState {
            user_id: &data.user_id,
            content_item_id: &data.content_item_id,
            lesson_status: data.lesson_status.as_str(),
            lesson_location: &data.lesson_location,
            suspend_data: &data.suspend_data,
            total_seconds: data.total_seconds,
            session_count: data.session_count,
            updated_at: &now,
        };
        self.db.with_conn(|conn| runtime_state::upsert_state(conn, &state))?;

        self.progress.record_signal(
            &data.user_id,
            &data.content_item_id,
            data.total_seconds,
            data.completed,
        )?;
        Ok(())
    }
}

/// What a frame needs to start its runtime
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub user_id: String,
    pub content_item_id: String,
    pub version: ScormVersion,
    pub launch_href: String,
    pub storage_locator: String,
}

#[derive(Debug, Clone)]
pub enum OpenOutcome {
    Opened(SessionInfo),
    Denied(AccessDecision),
}

/// Wire return of one API call
#[derive(Debug, Clone, Serialize)]
pub struct CallReply {
    pub result: String,
    pub last_error: u16,
}

/// A session plus the time of its last runtime call
struct SessionSlot {
    session: ScormSession,
    last_active: Instant,
}

impl SessionSlot {
    fn expired(&self, now: Instant, idle_timeout: Duration, terminated_linger: Duration) -> bool {
        let idle = now.saturating_duration_since(self.last_active);
        match self.session.state() {
            SessionState::Terminated => idle >= terminated_linger,
            _ => idle >= idle_timeout,
        }
    }
}

pub struct SessionRegistry {
    services: Arc<Services>,
    store: Arc<ServiceRuntimeStore>,
    sessions: DashMap<String, Arc<Mutex<SessionSlot>>>,
}

impl SessionRegistry {
    pub fn new(services: Arc<Services>) -> Self {
        let store = Arc::new(ServiceRuntimeStore::new(
            services.db.clone(),
            services.progress.clone(),
        ));
        Self {
            services,
            store,
            sessions: DashMap::new(),
        }
    }

    /// Open a runtime session for a learner on a SCORM item
    pub fn open(
        &self,
        user_id: &str,
        content_item_id: &str,
        learner_name: Option<&str>,
    ) -> Result<OpenOutcome, LearningError> {
        if user_id.is_empty() {
            return Err(LearningError::InvalidInput("user_id is required".into()));
        }

        let item = self
            .services
            .db
            .with_conn(|conn| courses::require_item(conn, content_item_id))?;
        if !item.is_scorm() {
            return Err(LearningError::InvalidInput(format!(
                "content item {} is not a SCORM package",
                content_item_id
            )));
        }

        let decision = self.services.unlock.can_access(user_id, content_item_id)?;
        if !decision.allowed {
            debug!(user_id = %user_id, content_item_id = %content_item_id, "SCORM session denied");
            return Ok(OpenOutcome::Denied(decision));
        }

        let package = self.services.packages.get(content_item_id)?.ok_or_else(|| {
            LearningError::NotFound(format!("No package uploaded for {}", content_item_id))
        })?;
        let version = ScormVersion::from_runtime_version(&package.runtime_version);

        let mut session = ScormSession::new(version, user_id, content_item_id, self.store.clone());
        if let Some(name) = learner_name {
            session = session.with_learner_name(name);
        }

        let session_id = Uuid::new_v4().to_string();
        let slot = SessionSlot {
            session,
            last_active: Instant::now(),
        };
        self.sessions
            .insert(session_id.clone(), Arc::new(Mutex::new(slot)));

        info!(
            session_id = %session_id,
            user_id = %user_id,
            content_item_id = %content_item_id,
            "SCORM session opened"
        );
        self.services.events.emit(LearningEvent::ScormSessionOpened {
            session_id: session_id.clone(),
            user_id: user_id.to_string(),
            content_item_id: content_item_id.to_string(),
        });

        Ok(OpenOutcome::Opened(SessionInfo {
            session_id,
            user_id: user_id.to_string(),
            content_item_id: content_item_id.to_string(),
            version,
            launch_href: package.launch_href,
            storage_locator: package.storage_locator,
        }))
    }

    /// Run one wire call; None when the session id is unknown
    pub fn call(&self, session_id: &str, method: &str, args: &[String]) -> Option<CallReply> {
        let slot = self.sessions.get(session_id)?.value().clone();
        let mut slot = lock(&slot);
        slot.last_active = Instant::now();
        let result = wire::dispatch(&mut slot.session, method, args);
        Some(CallReply {
            result,
            last_error: slot.session.last_error_code(),
        })
    }

    /// Drop a session, flushing it first if the frame never finished.
    /// Returns false for an unknown id.
    pub fn close(&self, session_id: &str) -> bool {
        let Some((_, slot)) = self.sessions.remove(session_id) else {
            return false;
        };
        self.retire(session_id, &slot);
        true
    }

    /// Flush and drop sessions nobody has called for `idle_timeout`, and
    /// finished sessions after `terminated_linger`. Sessions busy in a call
    /// are skipped. Returns how many were dropped.
    pub fn sweep(&self, idle_timeout: Duration, terminated_linger: Duration) -> usize {
        let now = Instant::now();
        let candidates: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| {
                try_lock(entry.value())
                    .map(|slot| slot.expired(now, idle_timeout, terminated_linger))
                    .unwrap_or(false)
            })
            .map(|entry| entry.key().clone())
            .collect();

        let mut dropped = 0;
        for session_id in candidates {
            // A call may have landed since the scan
            let removed = self.sessions.remove_if(&session_id, |_, slot| {
                try_lock(slot)
                    .map(|slot| slot.expired(now, idle_timeout, terminated_linger))
                    .unwrap_or(false)
            });
            if let Some((_, slot)) = removed {
                debug!(session_id = %session_id, "Dropping inactive SCORM session");
                self.retire(&session_id, &slot);
                dropped += 1;
            }
        }
        dropped
    }

    fn retire(&self, session_id: &str, slot: &Mutex<SessionSlot>) {
        let mut slot = lock(slot);
        if slot.session.state() == SessionState::Initialized {
            if let Err(e) = slot.session.terminate() {
                warn!(session_id = %session_id, error = %e, "Closing session failed to flush");
            }
        }

        self.services.events.emit(LearningEvent::ScormSessionClosed {
            session_id: session_id.to_string(),
        });
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

// A panic inside one call must not wedge the frame's later calls
fn lock(slot: &Mutex<SessionSlot>) -> MutexGuard<'_, SessionSlot> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn try_lock(slot: &Mutex<SessionSlot>) -> Option<MutexGuard<'_, SessionSlot>> {
    match slot.try_lock() {
        Ok(guard) => Some(guard),
        Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
        Err(TryLockError::WouldBlock) => None,
    }
}

/// Sweep the registry on the configured interval until the runtime stops
pub fn spawn_sweeper(registry: Arc<SessionRegistry>, config: &Config) -> JoinHandle<()> {
    let every = config.scorm_sweep_interval();
    let idle_timeout = config.scorm_idle_timeout();
    let terminated_linger = config.scorm_terminated_linger();

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let registry = registry.clone();
            // Flushing commits to the store, which blocks
            let swept = tokio::task::spawn_blocking(move || {
                registry.sweep(idle_timeout, terminated_linger)
            })
            .await;
            match swept {
                Ok(0) => {}
                Ok(dropped) => info!(dropped, "Swept inactive SCORM sessions"),
                Err(e) => warn!(error = %e, "SCORM session sweep failed"),
            }
        }
    })
}
