use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Conversation history is bounded to this many most-recent turns
pub const MAX_HISTORY_TURNS: usize = 10;

/// One question/answer exchange within a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub timestamp: DateTime<Utc>,
    pub question: String,
    pub response: String,
    pub session_uid: String,
    pub meeting_id: String,
    #[serde(default)]
    pub context: String,
}

/// Per-session state owned by the context store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionContext {
    pub session_uid: String,
    pub meeting_id: String,
    #[serde(default)]
    pub conversation_history: Vec<ConversationTurn>,
    #[serde(default)]
    pub user_preferences: HashMap<String, serde_json::Value>,
    pub last_activity: DateTime<Utc>,
}

impl SessionContext {
    pub fn new(session_uid: impl Into<String>, meeting_id: impl Into<String>) -> Self {
        Self {
            session_uid: session_uid.into(),
            meeting_id: meeting_id.into(),
            conversation_history: Vec::new(),
            user_preferences: HashMap::new(),
            last_activity: Utc::now(),
        }
    }

    /// Append a turn, stamping activity and keeping only the most recent
    /// `MAX_HISTORY_TURNS`.
    pub fn push_turn(&mut self, turn: ConversationTurn) {
        self.last_activity = turn.timestamp;
        self.conversation_history.push(turn);
        if self.conversation_history.len() > MAX_HISTORY_TURNS {
            let excess = self.conversation_history.len() - MAX_HISTORY_TURNS;
            self.conversation_history.drain(..excess);
        }
    }
}

/// Meeting metadata, written by an external collaborator and read-only
/// from the pipeline's perspective.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeetingContext {
    pub meeting_id: String,
    #[serde(default)]
    pub participants: Vec<String>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub agenda_items: Vec<String>,
    #[serde(default)]
    pub key_points: Vec<String>,
    #[serde(default)]
    pub action_items: Vec<String>,
}
