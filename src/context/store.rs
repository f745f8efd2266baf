use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use redis::AsyncCommands;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

use super::types::{ConversationTurn, MeetingContext, SessionContext};
use crate::broker::RedisBroker;

/// Persisted session context expires a day after last activity
pub const SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);
/// Meeting context is longer-lived
pub const MEETING_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

fn session_key(session_uid: &str) -> String {
    format!("session_context:{}", session_uid)
}

fn meeting_key(meeting_id: &str) -> String {
    format!("meeting_context:{}", meeting_id)
}

/// Keyed, TTL-bound persistence behind the context store
#[async_trait::async_trait]
pub trait ContextPersistence: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<String>>;
    async fn store(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
}

#[async_trait::async_trait]
impl ContextPersistence for RedisBroker {
    async fn load(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection();
        let value: Option<String> = conn
            .get(key)
            .await
            .with_context(|| format!("Failed to load '{}'", key))?;
        Ok(value)
    }

    async fn store(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.connection();
        let _: () = conn
            .set_ex(key, value, ttl.as_secs())
            .await
            .with_context(|| format!("Failed to store '{}'", key))?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut conn = self.connection();
        let _: usize = conn
            .del(key)
            .await
            .with_context(|| format!("Failed to remove '{}'", key))?;
        Ok(())
    }
}

/// In-memory persistence for tests and local runs without Redis
#[derive(Default)]
pub struct MemoryPersistence {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ContextPersistence for MemoryPersistence {
    async fn load(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.lock().await.get(key).cloned())
    }

    async fn store(&self, key: &str, value: &str, _ttl: Duration) -> Result<()> {
        self.values
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.values.lock().await.remove(key);
        Ok(())
    }
}

/// Session and meeting context cache over keyed persistence.
///
/// One message per session is in flight at a time, so the cache has a
/// single writer per session in practice; reads from the ops surface see
/// the same maps through the locks.
pub struct ContextStore {
    persistence: std::sync::Arc<dyn ContextPersistence>,
    sessions: RwLock<HashMap<String, SessionContext>>,
    meetings: RwLock<HashMap<String, MeetingContext>>,
}

impl ContextStore {
    pub fn new(persistence: std::sync::Arc<dyn ContextPersistence>) -> Self {
        Self {
            persistence,
            sessions: RwLock::new(HashMap::new()),
            meetings: RwLock::new(HashMap::new()),
        }
    }

    /// Get-or-create the session context, loading through the cache.
    /// Persistence failures degrade to a fresh context rather than failing
    /// the message.
    pub async fn session(&self, session_uid: &str, meeting_id: &str) -> SessionContext {
        if let Some(existing) = self.sessions.read().await.get(session_uid) {
            return existing.clone();
        }

        let loaded = match self.persistence.load(&session_key(session_uid)).await {
            Ok(Some(json)) => match serde_json::from_str::<SessionContext>(&json) {
                Ok(context) => Some(context),
                Err(e) => {
                    warn!("Discarding undecodable session context for {}: {}", session_uid, e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                error!("Error loading session context for {}: {}", session_uid, e);
                None
            }
        };

        let context = loaded.unwrap_or_else(|| SessionContext::new(session_uid, meeting_id));
        self.sessions
            .write()
            .await
            .insert(session_uid.to_string(), context.clone());
        context
    }

    /// Record a completed exchange: append the turn (bounded history),
    /// update the cache, and persist. Persistence failure is logged, not
    /// propagated; the cache stays authoritative for this process.
    pub async fn add_turn(
        &self,
        session_uid: &str,
        meeting_id: &str,
        question: &str,
        response: &str,
        context: &str,
    ) {
        let mut session = self.session(session_uid, meeting_id).await;
        session.push_turn(ConversationTurn {
            timestamp: Utc::now(),
            question: question.to_string(),
            response: response.to_string(),
            session_uid: session_uid.to_string(),
            meeting_id: meeting_id.to_string(),
            context: context.to_string(),
        });

        self.sessions
            .write()
            .await
            .insert(session_uid.to_string(), session.clone());

        match serde_json::to_string(&session) {
            Ok(json) => {
                if let Err(e) = self
                    .persistence
                    .store(&session_key(session_uid), &json, SESSION_TTL)
                    .await
                {
                    error!("Error saving session context for {}: {}", session_uid, e);
                }
            }
            Err(e) => error!("Error serializing session context for {}: {}", session_uid, e),
        }
    }

    /// Read-through lookup of meeting metadata
    pub async fn meeting(&self, meeting_id: &str) -> Option<MeetingContext> {
        if let Some(existing) = self.meetings.read().await.get(meeting_id) {
            return Some(existing.clone());
        }

        match self.persistence.load(&meeting_key(meeting_id)).await {
            Ok(Some(json)) => match serde_json::from_str::<MeetingContext>(&json) {
                Ok(context) => {
                    self.meetings
                        .write()
                        .await
                        .insert(meeting_id.to_string(), context.clone());
                    Some(context)
                }
                Err(e) => {
                    warn!("Discarding undecodable meeting context for {}: {}", meeting_id, e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                error!("Error loading meeting context for {}: {}", meeting_id, e);
                None
            }
        }
    }

    /// Write meeting metadata (the external metadata source's path in)
    pub async fn put_meeting(&self, context: MeetingContext) -> Result<()> {
        let json = serde_json::to_string(&context).context("Failed to serialize meeting context")?;
        self.persistence
            .store(&meeting_key(&context.meeting_id), &json, MEETING_TTL)
            .await?;
        self.meetings
            .write()
            .await
            .insert(context.meeting_id.clone(), context);
        Ok(())
    }

    /// Build the enriched prompt for the language stage: personality, the
    /// last few turns, meeting metadata, then the current question.
    pub async fn build_prompt(
        &self,
        personality: &str,
        session_uid: &str,
        meeting_id: &str,
        question: &str,
    ) -> String {
        let mut parts: Vec<String> = vec![personality.to_string()];

        let session = self.session(session_uid, meeting_id).await;
        if !session.conversation_history.is_empty() {
            parts.push("\nRecent conversation history:".to_string());
            let recent = session
                .conversation_history
                .iter()
                .rev()
                .take(3)
                .collect::<Vec<_>>();
            for turn in recent.into_iter().rev() {
                parts.push(format!("Q: {}", turn.question));
                parts.push(format!("A: {}", turn.response));
            }
        }

        if let Some(meeting) = self.meeting(meeting_id).await {
            parts.push("\nMeeting context:".to_string());
            if let Some(topic) = &meeting.topic {
                parts.push(format!("Topic: {}", topic));
            }
            if !meeting.participants.is_empty() {
                parts.push(format!("Participants: {}", meeting.participants.join(", ")));
            }
            if !meeting.agenda_items.is_empty() {
                parts.push(format!("Agenda: {}", meeting.agenda_items.join(", ")));
            }
            if !meeting.key_points.is_empty() {
                parts.push(format!(
                    "Key points discussed: {}",
                    meeting.key_points.join(", ")
                ));
            }
        }

        parts.push(format!("\nCurrent question: {}", question));
        parts.push("\nProvide a helpful, concise response:".to_string());
        parts.join("\n")
    }

    /// Drop sessions idle past the session TTL from the cache and the
    /// persisted copy. Returns how many were evicted.
    pub async fn evict_expired(&self) -> usize {
        let cutoff = Utc::now()
            - ChronoDuration::seconds(SESSION_TTL.as_secs() as i64);

        let expired: Vec<String> = {
            let sessions = self.sessions.read().await;
            sessions
                .iter()
                .filter(|(_, context)| context.last_activity < cutoff)
                .map(|(uid, _)| uid.clone())
                .collect()
        };

        if expired.is_empty() {
            return 0;
        }

        {
            let mut sessions = self.sessions.write().await;
            for uid in &expired {
                sessions.remove(uid);
            }
        }
        for uid in &expired {
            if let Err(e) = self.persistence.remove(&session_key(uid)).await {
                error!("Error removing expired session context {}: {}", uid, e);
            }
        }

        info!("Cleaned up {} old session contexts", expired.len());
        expired.len()
    }

    /// Periodic eviction sweep, shut down cooperatively
    pub async fn run_eviction(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!("Context eviction task started (every {:?})", interval);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            if *shutdown.borrow() {
                break;
            }
            let evicted = self.evict_expired().await;
            debug!("Eviction sweep removed {} sessions", evicted);
        }
        info!("Context eviction task stopped");
    }
}
