//! Per-session write coalescing.
//!
//! Every session slot owns at most one pending timer. A mutation replaces
//! the timer; only a timer that survives its full quiet window writes.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::persist::{PersistError, SessionRepository};
use super::session::{ChatSession, SessionId};
use crate::core::constants::PERSIST_MAX_ATTEMPTS;
use crate::utils::sync::lock;

pub(super) struct SessionSlot {
    pub(super) session: Mutex<ChatSession>,
    /// Store-wide mutation sequence of the last change, for eviction ties.
    pub(super) sequence: AtomicU64,
    dirty: AtomicBool,
    /// Serializes snapshot-and-write so a flush waits for an in-progress timer write.
    write_lock: Mutex<()>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl SessionSlot {
    pub(super) fn new(session: ChatSession, sequence: u64, dirty: bool) -> Self {
        Self {
            session: Mutex::new(session),
            sequence: AtomicU64::new(sequence),
            dirty: AtomicBool::new(dirty),
            write_lock: Mutex::new(()),
            timer: Mutex::new(None),
        }
    }

    /// Apply `change` under the session lock and mark the slot dirty.
    pub(super) fn mutate<R>(&self, sequence: u64, change: impl FnOnce(&mut ChatSession) -> R) -> R {
        let mut session = lock(&self.session);
        let result = change(&mut session);
        self.dirty.store(true, Ordering::Release);
        self.sequence.store(sequence, Ordering::Release);
        result
    }

    pub(super) fn snapshot(&self) -> ChatSession {
        lock(&self.session).clone()
    }

    fn has_pending_timer(&self) -> bool {
        lock(&self.timer)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

/// Writes the slot if it changed since the last successful write.
fn write_if_dirty(
    repository: &dyn SessionRepository,
    slot: &SessionSlot,
) -> Result<bool, PersistError> {
    let _writing = lock(&slot.write_lock);
    let snapshot = {
        let session = lock(&slot.session);
        if !slot.dirty.swap(false, Ordering::AcqRel) {
            return Ok(false);
        }
        session.clone()
    };
    match repository.save(&snapshot) {
        Ok(()) => Ok(true),
        Err(err) => {
            slot.dirty.store(true, Ordering::Release);
            Err(err)
        }
    }
}

#[derive(Clone)]
pub(super) struct PersistScheduler {
    repository: Arc<dyn SessionRepository>,
    window: Duration,
}

impl PersistScheduler {
    pub(super) fn new(repository: Arc<dyn SessionRepository>, window: Duration) -> Self {
        Self { repository, window }
    }

    pub(super) fn repository(&self) -> &dyn SessionRepository {
        self.repository.as_ref()
    }

    /// (Re)start the slot's quiet window.
    pub(super) fn schedule(&self, slot: &Arc<SessionSlot>) {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                // Outside a runtime there is nothing to drive a timer.
                self.write_now(slot);
                return;
            }
        };

        let repository = Arc::clone(&self.repository);
        let window = self.window;
        let target = Arc::clone(slot);
        let task = runtime.spawn(async move {
            for attempt in 1..=PERSIST_MAX_ATTEMPTS {
                tokio::time::sleep(window).await;
                match write_if_dirty(repository.as_ref(), &target) {
                    Ok(_) => return,
                    Err(err) => {
                        let id = target.snapshot().id;
                        warn!(session = %id, attempt, error = %err, "session write failed");
                    }
                }
            }
            let id = target.snapshot().id;
            warn!(session = %id, "giving up on session write until its next change");
        });

        if let Some(previous) = lock(&slot.timer).replace(task) {
            previous.abort();
        }
    }

    /// Drop the slot's pending timer without writing.
    pub(super) fn cancel(&self, slot: &SessionSlot) {
        if let Some(previous) = lock(&slot.timer).take() {
            previous.abort();
        }
    }

    /// Cancel the slot's timer and remove it from storage.
    ///
    /// Holding the write lock makes a timer write already in progress land
    /// before the delete, and the cleared dirty flag stops any later one.
    pub(super) fn discard(&self, id: &SessionId, slot: &SessionSlot) -> Result<(), PersistError> {
        self.cancel(slot);
        let _writing = lock(&slot.write_lock);
        slot.dirty.store(false, Ordering::Release);
        self.repository.delete(id)
    }

    /// Cancel the pending timer and write immediately.
    pub(super) fn flush(&self, slot: &Arc<SessionSlot>) {
        self.cancel(slot);
        self.write_now(slot);
    }

    fn write_now(&self, slot: &Arc<SessionSlot>) {
        match write_if_dirty(self.repository.as_ref(), slot) {
            Ok(true) => debug!(session = %lock(&slot.session).id, "session flushed"),
            Ok(false) => {}
            Err(err) => {
                warn!(error = %err, "session flush failed; retrying later");
                if tokio::runtime::Handle::try_current().is_ok() && !slot.has_pending_timer() {
                    self.schedule(slot);
                }
            }
        }
    }
}
