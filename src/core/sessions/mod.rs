//! Bounded collection of chat sessions with an active pointer and
//! debounced durable persistence.

mod debounce;
pub mod persist;
pub mod session;

use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

pub use persist::{FileSessionRepository, PersistError, SessionRepository};
pub use session::{derive_title, ChatSession, SessionId};

use crate::core::config::Settings;
use crate::core::constants::{DEFAULT_PERSIST_DEBOUNCE, DEFAULT_SESSION_CAPACITY};
use crate::core::jobs::JobId;
use crate::core::message::Message;
use crate::utils::sync::lock;
use debounce::{PersistScheduler, SessionSlot};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    UnknownSession(SessionId),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::UnknownSession(id) => write!(f, "Unknown chat session: {id}"),
        }
    }
}

impl Error for StoreError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLimits {
    pub capacity: usize,
    pub debounce: Duration,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_SESSION_CAPACITY,
            debounce: DEFAULT_PERSIST_DEBOUNCE,
        }
    }
}

impl From<&Settings> for SessionLimits {
    fn from(settings: &Settings) -> Self {
        Self {
            capacity: settings.session_capacity,
            debounce: settings.persist_debounce,
        }
    }
}

/// Sidebar row for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub id: SessionId,
    pub title: String,
    pub message_count: usize,
    pub last_updated_at: DateTime<Utc>,
    pub linked_job_id: Option<JobId>,
}

#[derive(Default)]
struct StoreInner {
    slots: HashMap<SessionId, Arc<SessionSlot>>,
    active: Option<SessionId>,
}

/// Lock order is always the map, then a session. Never the reverse.
pub struct ChatSessionStore {
    inner: Mutex<StoreInner>,
    scheduler: PersistScheduler,
    capacity: usize,
    sequence: AtomicU64,
}

impl ChatSessionStore {
    pub fn new(repository: Arc<dyn SessionRepository>, limits: SessionLimits) -> Self {
        Self {
            inner: Mutex::new(StoreInner::default()),
            scheduler: PersistScheduler::new(repository, limits.debounce),
            capacity: limits.capacity.max(1),
            sequence: AtomicU64::new(0),
        }
    }

    /// Load persisted sessions, keeping the most recent `capacity` of them.
    /// Nothing is active afterwards.
    pub fn open(repository: Arc<dyn SessionRepository>, limits: SessionLimits) -> Self {
        let store = Self::new(repository, limits);
        let mut sessions = match store.scheduler.repository().load_all() {
            Ok(sessions) => sessions,
            Err(err) => {
                warn!(error = %err, "could not load chat sessions");
                Vec::new()
            }
        };

        sessions.sort_by(|a, b| b.last_updated_at.cmp(&a.last_updated_at));
        let overflow = if sessions.len() > store.capacity {
            sessions.split_off(store.capacity)
        } else {
            Vec::new()
        };
        for stale in overflow {
            info!(session = %stale.id, "dropping session beyond capacity");
            if let Err(err) = store.scheduler.repository().delete(&stale.id) {
                warn!(session = %stale.id, error = %err, "could not delete session");
            }
        }

        {
            let mut inner = lock(&store.inner);
            // Oldest first so sequence numbers follow recency.
            for session in sessions.into_iter().rev() {
                let slot = SessionSlot::new(session, store.next_sequence(), false);
                let id = lock(&slot.session).id.clone();
                inner.slots.insert(id, Arc::new(slot));
            }
            debug!(sessions = inner.slots.len(), "chat sessions loaded");
        }
        store
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn slot(&self, id: &SessionId) -> Result<Arc<SessionSlot>, StoreError> {
        lock(&self.inner)
            .slots
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::UnknownSession(id.clone()))
    }

    fn active_slot(&self) -> Option<Arc<SessionSlot>> {
        let inner = lock(&self.inner);
        inner
            .active
            .as_ref()
            .and_then(|id| inner.slots.get(id))
            .cloned()
    }

    fn flush_active(&self) {
        if let Some(slot) = self.active_slot() {
            self.scheduler.flush(&slot);
        }
    }

    /// Start an empty session and make it current.
    pub fn create(&self) -> SessionId {
        self.insert_new(None)
    }

    fn insert_new(&self, linked_job: Option<&str>) -> SessionId {
        self.flush_active();

        let id = SessionId::generate();
        let mut session = ChatSession::new(id.clone());
        session.linked_job_id = linked_job.map(str::to_string);
        let slot = Arc::new(SessionSlot::new(session, self.next_sequence(), true));

        let evicted = {
            let mut inner = lock(&self.inner);
            inner.slots.insert(id.clone(), Arc::clone(&slot));
            inner.active = Some(id.clone());
            self.evict_over_capacity(&mut inner, &id)
        };
        for (victim_id, victim) in evicted {
            if let Err(err) = self.scheduler.discard(&victim_id, &victim) {
                warn!(session = %victim_id, error = %err, "could not delete evicted session");
            }
        }

        self.scheduler.schedule(&slot);
        info!(session = %id, job = ?linked_job, "chat session created");
        id
    }

    fn evict_over_capacity(
        &self,
        inner: &mut StoreInner,
        keep: &SessionId,
    ) -> Vec<(SessionId, Arc<SessionSlot>)> {
        let mut evicted = Vec::new();
        while inner.slots.len() > self.capacity {
            let victim = inner
                .slots
                .iter()
                .filter(|(id, _)| *id != keep)
                .map(|(id, slot)| {
                    let updated = lock(&slot.session).last_updated_at;
                    (updated, slot.sequence.load(Ordering::Acquire), id.clone())
                })
                .min();
            let Some((_, _, victim_id)) = victim else {
                break;
            };
            if let Some(slot) = inner.slots.remove(&victim_id) {
                if inner.active.as_ref() == Some(&victim_id) {
                    inner.active = None;
                }
                info!(session = %victim_id, "evicting least recently updated session");
                evicted.push((victim_id, slot));
            }
        }
        evicted
    }

    /// Make `id` current, writing the outgoing session first.
    pub fn switch_to(&self, id: &SessionId) -> Result<(), StoreError> {
        self.slot(id)?;
        if self.active().as_ref() == Some(id) {
            return Ok(());
        }
        self.flush_active();

        let mut inner = lock(&self.inner);
        // The session may have been evicted while flushing.
        if !inner.slots.contains_key(id) {
            return Err(StoreError::UnknownSession(id.clone()));
        }
        inner.active = Some(id.clone());
        debug!(session = %id, "switched chat session");
        Ok(())
    }

    /// Switch to the session already linked to `job_id`, or create one.
    pub fn bind_to_job(&self, job_id: &str) -> SessionId {
        let existing = {
            let inner = lock(&self.inner);
            inner
                .slots
                .values()
                .filter_map(|slot| {
                    let session = lock(&slot.session);
                    (session.linked_job_id.as_deref() == Some(job_id)).then(|| {
                        (
                            session.last_updated_at,
                            slot.sequence.load(Ordering::Acquire),
                            session.id.clone(),
                        )
                    })
                })
                .max()
                .map(|(_, _, id)| id)
        };

        if let Some(id) = existing {
            if self.switch_to(&id).is_ok() {
                return id;
            }
        }
        self.insert_new(Some(job_id))
    }

    pub fn append(&self, id: &SessionId, message: Message) -> Result<(), StoreError> {
        let slot = self.slot(id)?;
        slot.mutate(self.next_sequence(), |session| session.push(message));
        self.scheduler.schedule(&slot);
        Ok(())
    }

    /// Append only while `id` is still the active session. Returns whether it was appended.
    pub fn append_if_active(&self, id: &SessionId, message: Message) -> Result<bool, StoreError> {
        let slot = {
            let inner = lock(&self.inner);
            let slot = inner
                .slots
                .get(id)
                .cloned()
                .ok_or_else(|| StoreError::UnknownSession(id.clone()))?;
            if inner.active.as_ref() != Some(id) {
                return Ok(false);
            }
            // Appended under the map lock so a concurrent switch cannot slip in between.
            slot.mutate(self.next_sequence(), |session| session.push(message));
            slot
        };
        self.scheduler.schedule(&slot);
        Ok(true)
    }

    pub fn link_job(&self, id: &SessionId, job_id: &str) -> Result<(), StoreError> {
        let slot = self.slot(id)?;
        slot.mutate(self.next_sequence(), |session| session.link_job(job_id));
        self.scheduler.schedule(&slot);
        Ok(())
    }

    pub fn active(&self) -> Option<SessionId> {
        lock(&self.inner).active.clone()
    }

    pub fn is_active(&self, id: &SessionId) -> bool {
        lock(&self.inner).active.as_ref() == Some(id)
    }

    pub fn session(&self, id: &SessionId) -> Option<ChatSession> {
        self.slot(id).ok().map(|slot| slot.snapshot())
    }

    pub fn active_session(&self) -> Option<ChatSession> {
        self.active_slot().map(|slot| slot.snapshot())
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        lock(&self.inner).slots.contains_key(id)
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Newest first.
    pub fn summaries(&self) -> Vec<SessionSummary> {
        let mut rows: Vec<(u64, SessionSummary)> = {
            let inner = lock(&self.inner);
            inner
                .slots
                .values()
                .map(|slot| {
                    let session = lock(&slot.session);
                    (
                        slot.sequence.load(Ordering::Acquire),
                        SessionSummary {
                            id: session.id.clone(),
                            title: session.display_title().to_string(),
                            message_count: session.message_count,
                            last_updated_at: session.last_updated_at,
                            linked_job_id: session.linked_job_id.clone(),
                        },
                    )
                })
                .collect()
        };
        rows.sort_by(|(seq_a, a), (seq_b, b)| {
            b.last_updated_at
                .cmp(&a.last_updated_at)
                .then(seq_b.cmp(seq_a))
        });
        rows.into_iter().map(|(_, summary)| summary).collect()
    }

    /// Cancel the session's pending write and persist it now.
    pub fn flush(&self, id: &SessionId) -> Result<(), StoreError> {
        let slot = self.slot(id)?;
        self.scheduler.flush(&slot);
        Ok(())
    }

    pub fn flush_all(&self) {
        let slots: Vec<Arc<SessionSlot>> = lock(&self.inner).slots.values().cloned().collect();
        for slot in slots {
            self.scheduler.flush(&slot);
        }
    }

    /// Flush the active session and leave no session active.
    pub fn clear_active(&self) {
        self.flush_active();
        lock(&self.inner).active = None;
    }
}
