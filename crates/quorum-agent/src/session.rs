use std::collections::HashMap;

use parking_lot::Mutex;

use quorum_core::types::{Message, Role, SessionId};

/// Per-session conversation history kept for the interactive front end.
pub struct SessionManager {
    sessions: Mutex<HashMap<SessionId, SessionInfo>>,
}

#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub session_id: SessionId,
    pub history: Vec<Message>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub last_active: chrono::DateTime<chrono::Utc>,
}

impl SessionInfo {
    fn new(session_id: SessionId) -> Self {
        let now = chrono::Utc::now();
        Self {
            session_id,
            history: Vec::new(),
            started_at: now,
            last_active: now,
        }
    }
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Ensure a session exists and mark it active.
    pub fn get_or_create(&self, session_id: &SessionId) -> SessionId {
        let mut sessions = self.sessions.lock();
        let info = sessions
            .entry(session_id.clone())
            .or_insert_with(|| SessionInfo::new(session_id.clone()));
        info.last_active = chrono::Utc::now();
        info.session_id.clone()
    }

    pub fn add_user_message(&self, session_id: &SessionId, text: impl Into<String>) {
        self.push(session_id, Message::user(text));
    }

    pub fn add_system_response(&self, session_id: &SessionId, text: impl Into<String>) {
        self.push(session_id, Message::assistant(text));
    }

    fn push(&self, session_id: &SessionId, message: Message) {
        let mut sessions = self.sessions.lock();
        let info = sessions
            .entry(session_id.clone())
            .or_insert_with(|| SessionInfo::new(session_id.clone()));
        info.history.push(message);
        info.last_active = chrono::Utc::now();
    }

    /// Snapshot of a session's history, empty if unknown.
    pub fn history(&self, session_id: &SessionId) -> Vec<Message> {
        self.sessions
            .lock()
            .get(session_id)
            .map(|info| info.history.clone())
            .unwrap_or_default()
    }

    /// Drop a session's history. Returns whether it existed.
    pub fn clear(&self, session_id: &SessionId) -> bool {
        self.sessions.lock().remove(session_id).is_some()
    }

    /// One line describing the session, for the CLI.
    pub fn summary(&self, session_id: &SessionId) -> String {
        match self.sessions.lock().get(session_id) {
            Some(info) => {
                let user_turns = info
                    .history
                    .iter()
                    .filter(|m| m.role() == Role::User)
                    .count();
                format!(
                    "Session {}: {} messages ({} from user), started {}, last active {}",
                    info.session_id,
                    info.history.len(),
                    user_turns,
                    info.started_at.format("%Y-%m-%d %H:%M:%S"),
                    info.last_active.format("%Y-%m-%d %H:%M:%S"),
                )
            }
            None => format!("Session {}: no history", session_id),
        }
    }

    /// List active session ids.
    pub fn list(&self) -> Vec<SessionId> {
        self.sessions.lock().keys().cloned().collect()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}
