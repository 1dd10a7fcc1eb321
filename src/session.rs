use crate::auth;
use crate::protocol::{Role, TranscriptEntry};

/// Prefix for backend session keys. A caller-scoped key is this prefix plus
/// the normalized caller number; before authorization the raw call id is
/// used instead.
const SESSION_KEY_PREFIX: &str = "voice:";

/// How many transcript entries are kept per call. Older entries are
/// silently dropped — a sliding window, not a log.
pub const TRANSCRIPT_WINDOW: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    /// Connection open, no call details seen yet.
    Pending,
    /// Caller passed the allowlist (or the line is open).
    Authorized,
    /// Caller denied. Terminal — no further turns are processed.
    Rejected,
}

/// Per-connection call state. One per live WebSocket; discarded on
/// disconnect. Durable conversation state lives in the session registry,
/// addressed by `session_key`.
#[derive(Debug)]
pub struct CallSession {
    pub call_id: String,
    pub caller_number: Option<String>,
    pub state: CallState,
    transcript: Vec<TranscriptEntry>,
    session_key: String,
}

impl CallSession {
    pub fn new(call_id: impl Into<String>) -> Self {
        let call_id = call_id.into();
        let session_key = format!("{SESSION_KEY_PREFIX}{call_id}");
        Self {
            call_id,
            caller_number: None,
            state: CallState::Pending,
            transcript: Vec::new(),
            session_key,
        }
    }

    pub fn session_key(&self) -> &str {
        &self.session_key
    }

    pub fn authorized(&self) -> bool {
        self.state == CallState::Authorized
    }

    /// Mark the caller authorized and rewrite the session key from the
    /// call-scoped form to the caller-scoped form, so reconnects by the
    /// same number land in the same backend conversation.
    pub fn authorize(&mut self, caller_number: &str) {
        let normalized = auth::normalize(caller_number);
        self.session_key = format!("{SESSION_KEY_PREFIX}{normalized}");
        self.caller_number = Some(caller_number.to_string());
        self.state = CallState::Authorized;
    }

    /// Authorize a call with no caller number (anonymous, open line).
    /// The session key stays call-scoped since there is no durable identity.
    pub fn authorize_anonymous(&mut self) {
        self.state = CallState::Authorized;
    }

    pub fn reject(&mut self, caller_number: &str) {
        self.caller_number = Some(caller_number.to_string());
        self.state = CallState::Rejected;
    }

    /// Replace the window with the tail of the event's transcript.
    pub fn update_transcript(&mut self, entries: &[TranscriptEntry]) {
        let start = entries.len().saturating_sub(TRANSCRIPT_WINDOW);
        self.transcript = entries[start..].to_vec();
    }

    pub fn transcript(&self) -> &[TranscriptEntry] {
        &self.transcript
    }

    /// Recent context for the backend's system prompt: the window minus the
    /// current (final user) turn, which travels as the prompt itself.
    pub fn context_window(&self) -> &[TranscriptEntry] {
        match self.transcript.last() {
            Some(entry) if entry.role == Role::User => {
                &self.transcript[..self.transcript.len() - 1]
            }
            _ => &self.transcript,
        }
    }
}
