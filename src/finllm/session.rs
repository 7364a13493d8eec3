//! Conversation state: chat sessions and the registry that owns them.
//!
//! A [`ChatSession`] holds one conversation's turn list behind its own
//! guard; the [`SessionRegistry`] hands sessions out atomically, minting a
//! UUID for callers that do not bring an id. Turns are only ever appended
//! whole — a user entry and the assistant entry together — so readers never
//! observe a half-written turn.

use log::{info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::finllm::client_wrapper::{Message, Role};

/// One conversation, identified by a stable id.
pub struct ChatSession {
    id: String,
    history: Mutex<Vec<Message>>,
}

impl ChatSession {
    fn new(id: String) -> Self {
        Self {
            id,
            history: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Copy of the turn list taken under the session guard. The copy is
    /// detached: later appends do not show up in it.
    pub fn snapshot_history(&self) -> Vec<Message> {
        self.history.lock().unwrap().clone()
    }

    /// Record one completed turn: the user entry and the assistant entry are
    /// pushed under a single guard acquisition, so concurrent appends can
    /// interleave turns but never split one.
    pub fn append_turn(&self, user_text: &str, assistant_text: &str) {
        let mut history = self.history.lock().unwrap();
        history.push(Message {
            role: Role::User,
            content: user_text.to_string(),
        });
        history.push(Message {
            role: Role::Assistant,
            content: assistant_text.to_string(),
        });
    }

    /// Number of completed turns.
    pub fn turn_count(&self) -> usize {
        self.history.lock().unwrap().len() / 2
    }

    /// Drop the conversation history, keeping the session alive.
    pub fn clear(&self) {
        self.history.lock().unwrap().clear();
    }
}

/// Owns every live session and hands them out atomically.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<ChatSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the session for `session_id`, creating it if absent. Passing
    /// `None` mints a fresh UUID, so two `None` calls always produce two
    /// distinct sessions. Lookup and insertion happen under one guard
    /// acquisition.
    pub fn get_or_create(&self, session_id: Option<&str>) -> Arc<ChatSession> {
        let mut sessions = self.sessions.lock().unwrap();
        let id = match session_id {
            Some(id) => id.to_string(),
            None => Uuid::new_v4().to_string(),
        };
        Arc::clone(
            sessions
                .entry(id.clone())
                .or_insert_with(|| {
                    info!("created chat session {}", id);
                    Arc::new(ChatSession::new(id.clone()))
                }),
        )
    }

    /// Look a session up without creating it.
    pub fn get(&self, session_id: &str) -> Option<Arc<ChatSession>> {
        self.sessions.lock().unwrap().get(session_id).map(Arc::clone)
    }

    /// Remove a session entirely. Returns `false` when the id is unknown.
    pub fn clear_session(&self, session_id: &str) -> bool {
        let removed = self.sessions.lock().unwrap().remove(session_id);
        match removed {
            Some(_) => {
                info!("chat history cleared for session {}", session_id);
                true
            }
            None => {
                warn!("session {} not found, nothing to clear", session_id);
                false
            }
        }
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids of every live session, in no particular order.
    pub fn session_ids(&self) -> Vec<String> {
        self.sessions.lock().unwrap().keys().cloned().collect()
    }
}
