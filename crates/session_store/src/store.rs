use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, MutexGuard};

use chat_protocol::{
    now_millis, CancelSignal, ChatMessage, ErrorKind, MessageId, MessageIdGenerator, Role,
};

use crate::error::SessionStoreError;
use crate::metadata::SessionMetadata;

/// Receives an immutable transcript snapshot after every mutation.
///
/// Called while the session's write lock is held, so snapshots for one key
/// arrive in mutation order. Implementations must not call back into the
/// store for the same key.
pub trait SnapshotSink: Send + Sync {
    fn publish(&self, session_key: &str, transcript: &[ChatMessage]);
}

/// UI affordance flags for one session. At most one is set at a time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStatus {
    pub streaming: bool,
    pub loading_history: bool,
    pub resetting: bool,
}

impl SessionStatus {
    /// The activity currently holding the session, if any.
    #[must_use]
    pub fn activity(&self) -> Option<SessionActivity> {
        if self.streaming {
            Some(SessionActivity::Streaming)
        } else if self.loading_history {
            Some(SessionActivity::LoadingHistory)
        } else if self.resetting {
            Some(SessionActivity::Resetting)
        } else {
            None
        }
    }

    fn set(&mut self, activity: SessionActivity, on: bool) {
        match activity {
            SessionActivity::Streaming => self.streaming = on,
            SessionActivity::LoadingHistory => self.loading_history = on,
            SessionActivity::Resetting => self.resetting = on,
        }
    }
}

/// Work that needs a session to itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionActivity {
    Streaming,
    LoadingHistory,
    Resetting,
}

/// Dismissible session-level error shown next to the transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionError {
    pub kind: ErrorKind,
    pub message: String,
    pub at: u64,
}

#[derive(Debug, Default)]
struct SessionSlot {
    transcript: Vec<ChatMessage>,
    status: SessionStatus,
    error: Option<SessionError>,
    /// Raised when the stream holding this slot must stop.
    cancel: Option<CancelSignal>,
    /// Set once the slot leaves the registry.
    removed: bool,
}

#[derive(Debug, Default)]
struct Registry {
    order: Vec<String>,
    active: Option<String>,
    slots: HashMap<String, Arc<Mutex<SessionSlot>>>,
}

/// Exclusive hold on one session slot, returned by the `begin_*` methods.
///
/// Writes go to the slot that was claimed, never to a slot created later
/// under the same key. Once the session is removed every write fails with
/// [`SessionStoreError::SessionRemoved`]. Dropping the claim clears its
/// status flag.
pub struct SessionClaim {
    session_key: String,
    activity: SessionActivity,
    slot: Arc<Mutex<SessionSlot>>,
    sink: Option<Arc<dyn SnapshotSink>>,
}

impl SessionClaim {
    #[must_use]
    pub fn session_key(&self) -> &str {
        &self.session_key
    }

    #[must_use]
    pub fn activity(&self) -> SessionActivity {
        self.activity
    }

    /// False once the claimed session has been removed.
    #[must_use]
    pub fn is_live(&self) -> bool {
        !lock_unpoisoned(&self.slot).removed
    }

    pub fn append_or_replace(&self, message: ChatMessage) -> Result<(), SessionStoreError> {
        let mut slot = self.live_slot()?;
        upsert(&mut slot.transcript, message);
        publish(self.sink.as_ref(), &self.session_key, &slot);
        Ok(())
    }

    pub fn replace_transcript(&self, messages: Vec<ChatMessage>) -> Result<(), SessionStoreError> {
        let mut slot = self.live_slot()?;
        slot.transcript = sorted(messages);
        publish(self.sink.as_ref(), &self.session_key, &slot);
        Ok(())
    }

    /// Clears the transcript and error of the claimed session.
    pub fn clear(&self) -> Result<(), SessionStoreError> {
        let mut slot = self.live_slot()?;
        slot.transcript.clear();
        slot.error = None;
        publish(self.sink.as_ref(), &self.session_key, &slot);
        Ok(())
    }

    pub fn record_error(
        &self,
        kind: ErrorKind,
        message: impl Into<String>,
    ) -> Result<(), SessionStoreError> {
        let mut slot = self.live_slot()?;
        slot.error = Some(SessionError {
            kind,
            message: message.into(),
            at: now_millis(),
        });
        Ok(())
    }

    fn live_slot(&self) -> Result<MutexGuard<'_, SessionSlot>, SessionStoreError> {
        let slot = lock_unpoisoned(&self.slot);
        if slot.removed {
            return Err(SessionStoreError::SessionRemoved(self.session_key.clone()));
        }
        Ok(slot)
    }
}

impl Drop for SessionClaim {
    fn drop(&mut self) {
        let mut slot = lock_unpoisoned(&self.slot);
        slot.status.set(self.activity, false);
        if self.activity == SessionActivity::Streaming {
            slot.cancel = None;
        }
    }
}

pub struct SessionStore {
    ids: MessageIdGenerator,
    registry: Mutex<Registry>,
    sink: Option<Arc<dyn SnapshotSink>>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            ids: MessageIdGenerator::new(),
            registry: Mutex::new(Registry::default()),
            sink: None,
        }
    }

    /// Creates a store holding `keys`, with the first key active.
    pub fn with_sessions<I, S>(keys: I) -> Result<Self, SessionStoreError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let store = Self::new();
        let mut first = None;
        for key in keys {
            store.create_session(key.as_ref())?;
            first.get_or_insert_with(|| key.as_ref().trim().to_owned());
        }
        if let Some(first) = first {
            store.switch_active(&first)?;
        }
        Ok(store)
    }

    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn SnapshotSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Issues the next client message id, in creation order.
    pub fn next_message_id(&self) -> MessageId {
        self.ids.next_id(now_millis())
    }

    /// Inserts an empty session and makes it active.
    ///
    /// Returns `Ok(false)` without touching anything when the key exists.
    pub fn create_session(&self, session_key: &str) -> Result<bool, SessionStoreError> {
        let session_key = session_key.trim();
        if session_key.is_empty() {
            return Err(SessionStoreError::EmptySessionKey);
        }

        let mut registry = lock_unpoisoned(&self.registry);
        if registry.slots.contains_key(session_key) {
            return Ok(false);
        }

        registry.order.push(session_key.to_owned());
        registry
            .slots
            .insert(session_key.to_owned(), Arc::new(Mutex::new(SessionSlot::default())));
        registry.active = Some(session_key.to_owned());
        tracing::debug!(session_key, "created session");
        Ok(true)
    }

    pub fn switch_active(&self, session_key: &str) -> Result<(), SessionStoreError> {
        let mut registry = lock_unpoisoned(&self.registry);
        if !registry.slots.contains_key(session_key) {
            return Err(SessionStoreError::unknown(session_key));
        }
        registry.active = Some(session_key.to_owned());
        Ok(())
    }

    #[must_use]
    pub fn active_key(&self) -> Option<String> {
        lock_unpoisoned(&self.registry).active.clone()
    }

    /// Session keys in creation order.
    #[must_use]
    pub fn session_keys(&self) -> Vec<String> {
        lock_unpoisoned(&self.registry).order.clone()
    }

    #[must_use]
    pub fn contains(&self, session_key: &str) -> bool {
        lock_unpoisoned(&self.registry)
            .slots
            .contains_key(session_key)
    }

    /// Clears the transcript and error of `session_key`; the key stays.
    pub fn reset_session(&self, session_key: &str) -> Result<(), SessionStoreError> {
        let slot = self.slot(session_key)?;
        let mut slot = lock_unpoisoned(&slot);
        slot.transcript.clear();
        slot.error = None;
        self.publish(session_key, &slot);
        Ok(())
    }

    /// Removes `session_key`. The last remaining session cannot be removed;
    /// removing the active session promotes the first remaining one.
    ///
    /// A stream still holding the session is cancelled, and no claim on the
    /// removed slot can write again, even if the key is created anew.
    pub fn remove_session(&self, session_key: &str) -> Result<(), SessionStoreError> {
        let mut registry = lock_unpoisoned(&self.registry);
        if !registry.slots.contains_key(session_key) {
            return Err(SessionStoreError::unknown(session_key));
        }
        if registry.slots.len() == 1 {
            return Err(SessionStoreError::LastSession(session_key.to_owned()));
        }

        if let Some(slot) = registry.slots.remove(session_key) {
            let mut slot = lock_unpoisoned(&slot);
            slot.removed = true;
            if let Some(cancel) = slot.cancel.take() {
                cancel.store(true, Ordering::Release);
                tracing::debug!(session_key, "cancelled stream of removed session");
            }
        }
        registry.order.retain(|key| key != session_key);
        if registry.active.as_deref() == Some(session_key) {
            registry.active = registry.order.first().cloned();
        }
        tracing::debug!(session_key, active = ?registry.active, "removed session");
        Ok(())
    }

    /// Replaces the message with the same id, or inserts it in id order.
    pub fn append_or_replace(
        &self,
        session_key: &str,
        message: ChatMessage,
    ) -> Result<(), SessionStoreError> {
        let slot = self.slot(session_key)?;
        let mut slot = lock_unpoisoned(&slot);
        upsert(&mut slot.transcript, message);
        self.publish(session_key, &slot);
        Ok(())
    }

    /// Swaps in a whole transcript, e.g. one seeded from backend history.
    pub fn replace_transcript(
        &self,
        session_key: &str,
        messages: Vec<ChatMessage>,
    ) -> Result<(), SessionStoreError> {
        let slot = self.slot(session_key)?;
        let mut slot = lock_unpoisoned(&slot);
        slot.transcript = sorted(messages);
        self.publish(session_key, &slot);
        Ok(())
    }

    /// Read-only snapshot of the transcript, in id order.
    pub fn transcript(&self, session_key: &str) -> Result<Vec<ChatMessage>, SessionStoreError> {
        let slot = self.slot(session_key)?;
        let slot = lock_unpoisoned(&slot);
        Ok(slot.transcript.clone())
    }

    pub fn message(
        &self,
        session_key: &str,
        id: MessageId,
    ) -> Result<Option<ChatMessage>, SessionStoreError> {
        let slot = self.slot(session_key)?;
        let slot = lock_unpoisoned(&slot);
        Ok(slot
            .transcript
            .iter()
            .find(|message| message.id == id)
            .cloned())
    }

    pub fn metadata(&self, session_key: &str) -> Result<SessionMetadata, SessionStoreError> {
        let slot = self.slot(session_key)?;
        let slot = lock_unpoisoned(&slot);
        Ok(SessionMetadata::from_transcript(session_key, &slot.transcript))
    }

    /// Metadata for every session, in creation order.
    #[must_use]
    pub fn all_metadata(&self) -> Vec<SessionMetadata> {
        let entries: Vec<(String, Arc<Mutex<SessionSlot>>)> = {
            let registry = lock_unpoisoned(&self.registry);
            registry
                .order
                .iter()
                .filter_map(|key| {
                    registry
                        .slots
                        .get(key)
                        .map(|slot| (key.clone(), Arc::clone(slot)))
                })
                .collect()
        };

        entries
            .iter()
            .map(|(key, slot)| {
                let slot = lock_unpoisoned(slot);
                SessionMetadata::from_transcript(key, &slot.transcript)
            })
            .collect()
    }

    pub fn status(&self, session_key: &str) -> Result<SessionStatus, SessionStoreError> {
        let slot = self.slot(session_key)?;
        let status = lock_unpoisoned(&slot).status;
        Ok(status)
    }

    /// Claims `session_key` for a stream whose cancel flag is `cancel`.
    ///
    /// Fails with [`SessionStoreError::Busy`] while any other activity holds
    /// the session. The check and the claim happen under one lock.
    pub fn begin_stream(
        &self,
        session_key: &str,
        cancel: CancelSignal,
    ) -> Result<SessionClaim, SessionStoreError> {
        self.begin(session_key, SessionActivity::Streaming, Some(cancel))
    }

    pub fn begin_history_load(&self, session_key: &str) -> Result<SessionClaim, SessionStoreError> {
        self.begin(session_key, SessionActivity::LoadingHistory, None)
    }

    pub fn begin_reset(&self, session_key: &str) -> Result<SessionClaim, SessionStoreError> {
        self.begin(session_key, SessionActivity::Resetting, None)
    }

    /// Raises the cancel flag of the stream holding `session_key`.
    ///
    /// Returns false when no stream holds it.
    pub fn cancel_stream(&self, session_key: &str) -> bool {
        let Ok(slot) = self.slot(session_key) else {
            return false;
        };
        let slot = lock_unpoisoned(&slot);
        match &slot.cancel {
            Some(cancel) => {
                cancel.store(true, Ordering::Release);
                true
            }
            None => false,
        }
    }

    pub fn record_error(
        &self,
        session_key: &str,
        kind: ErrorKind,
        message: impl Into<String>,
    ) -> Result<(), SessionStoreError> {
        let slot = self.slot(session_key)?;
        lock_unpoisoned(&slot).error = Some(SessionError {
            kind,
            message: message.into(),
            at: now_millis(),
        });
        Ok(())
    }

    pub fn last_error(&self, session_key: &str) -> Result<Option<SessionError>, SessionStoreError> {
        let slot = self.slot(session_key)?;
        let error = lock_unpoisoned(&slot).error.clone();
        Ok(error)
    }

    /// Clears and returns the session-level error.
    pub fn dismiss_error(
        &self,
        session_key: &str,
    ) -> Result<Option<SessionError>, SessionStoreError> {
        let slot = self.slot(session_key)?;
        let error = lock_unpoisoned(&slot).error.take();
        Ok(error)
    }

    /// Ids of assistant messages whose backend conversation id differs from
    /// the previous assistant message that carried one.
    pub fn backend_context_changes(
        &self,
        session_key: &str,
    ) -> Result<Vec<MessageId>, SessionStoreError> {
        let slot = self.slot(session_key)?;
        let slot = lock_unpoisoned(&slot);

        let mut previous: Option<&str> = None;
        let mut changes = Vec::new();
        for message in slot
            .transcript
            .iter()
            .filter(|message| message.role == Role::Assistant)
        {
            let Some(session_id) = message.session_id.as_deref() else {
                continue;
            };
            if previous.is_some_and(|previous| previous != session_id) {
                changes.push(message.id);
            }
            previous = Some(session_id);
        }

        Ok(changes)
    }

    fn begin(
        &self,
        session_key: &str,
        activity: SessionActivity,
        cancel: Option<CancelSignal>,
    ) -> Result<SessionClaim, SessionStoreError> {
        let slot = self.slot(session_key)?;
        {
            let mut guard = lock_unpoisoned(&slot);
            if guard.removed {
                return Err(SessionStoreError::unknown(session_key));
            }
            if let Some(current) = guard.status.activity() {
                return Err(SessionStoreError::Busy {
                    session_key: session_key.to_owned(),
                    activity: current,
                });
            }
            guard.status.set(activity, true);
            guard.cancel = cancel;
        }

        Ok(SessionClaim {
            session_key: session_key.to_owned(),
            activity,
            slot,
            sink: self.sink.clone(),
        })
    }

    fn slot(&self, session_key: &str) -> Result<Arc<Mutex<SessionSlot>>, SessionStoreError> {
        lock_unpoisoned(&self.registry)
            .slots
            .get(session_key)
            .cloned()
            .ok_or_else(|| SessionStoreError::unknown(session_key))
    }

    fn publish(&self, session_key: &str, slot: &SessionSlot) {
        publish(self.sink.as_ref(), session_key, slot);
    }
}

fn publish(sink: Option<&Arc<dyn SnapshotSink>>, session_key: &str, slot: &SessionSlot) {
    if let Some(sink) = sink {
        sink.publish(session_key, &slot.transcript);
    }
}

fn sorted(mut messages: Vec<ChatMessage>) -> Vec<ChatMessage> {
    messages.sort_by_key(|message| message.id);
    messages
}

fn upsert(transcript: &mut Vec<ChatMessage>, message: ChatMessage) {
    if let Some(existing) = transcript
        .iter_mut()
        .find(|existing| existing.id == message.id)
    {
        *existing = message;
        return;
    }

    let at = transcript.partition_point(|existing| existing.id < message.id);
    transcript.insert(at, message);
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
