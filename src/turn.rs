use std::time::Duration;

use crate::auth;
use crate::backend::AgentBackend;
use crate::protocol::{CallDetails, InboundEvent, OutboundFrame, Role, TranscriptEntry};
use crate::session::{CallSession, CallState};

/// Spoken while a caller tries to talk before call details arrive on a
/// guarded line.
pub const HOLD_TEXT: &str = "One moment, please.";

/// Spoken when a turn arrives with no user content in it.
pub const EMPTY_INPUT_TEXT: &str = "Sorry, I didn't catch that. Could you say that again?";

/// Spoken to callers not on the allowlist, then the call ends.
pub const REJECT_TEXT: &str =
    "Sorry, this number isn't authorized to use this line. Goodbye.";

/// If the agent says any of these, the bridge hangs up after playback.
const FAREWELL_PHRASES: &[&str] = &["goodbye", "talk to you later", "bye for now", "have a good"];

/// The protocol state machine: one inbound event in, at most one outbound
/// frame out. Every branch that can answer without the backend does, since
/// the telephony round trip dominates the latency budget.
pub struct TurnTranslator {
    greeting: String,
    allowlist: Vec<String>,
    response_timeout: Duration,
}

impl TurnTranslator {
    pub fn new(greeting: String, allowlist: Vec<String>, response_timeout: Duration) -> Self {
        Self {
            greeting,
            allowlist,
            response_timeout,
        }
    }

    pub async fn handle(
        &self,
        session: &mut CallSession,
        event: InboundEvent,
        backend: &dyn AgentBackend,
    ) -> Option<OutboundFrame> {
        match event {
            InboundEvent::PingPong { timestamp } => Some(OutboundFrame::PingPong { timestamp }),
            InboundEvent::CallDetails { call } => self.handle_call_details(session, &call),
            InboundEvent::ResponseRequired {
                response_id,
                transcript,
            }
            | InboundEvent::ReminderRequired {
                response_id,
                transcript,
            } => {
                self.produce_response(session, response_id, transcript, backend)
                    .await
            }
            InboundEvent::Informational => None,
        }
    }

    fn handle_call_details(
        &self,
        session: &mut CallSession,
        call: &CallDetails,
    ) -> Option<OutboundFrame> {
        match call.relevant_number() {
            Some(number) if auth::is_allowed(number, &self.allowlist) => {
                session.authorize(number);
                tracing::info!(
                    call_id = %session.call_id,
                    session_key = %session.session_key(),
                    "Caller authorized"
                );
                Some(OutboundFrame::response(0, self.greeting.clone(), false))
            }
            Some(number) => {
                session.reject(number);
                tracing::warn!(
                    call_id = %session.call_id,
                    caller = %auth::normalize(number),
                    "Caller rejected"
                );
                Some(OutboundFrame::response(0, REJECT_TEXT, true))
            }
            None if self.allowlist.is_empty() => {
                // Anonymous call on an open line. No durable identity, so
                // the session key stays call-scoped.
                session.authorize_anonymous();
                tracing::info!(call_id = %session.call_id, "Anonymous call admitted");
                Some(OutboundFrame::response(0, self.greeting.clone(), false))
            }
            None => {
                session.reject("");
                tracing::warn!(call_id = %session.call_id, "No caller number on guarded line");
                Some(OutboundFrame::response(0, REJECT_TEXT, true))
            }
        }
    }

    async fn produce_response(
        &self,
        session: &mut CallSession,
        response_id: u64,
        transcript: Vec<TranscriptEntry>,
        backend: &dyn AgentBackend,
    ) -> Option<OutboundFrame> {
        match session.state {
            // Already told the caller to hang up; nothing more to say.
            CallState::Rejected => return None,
            CallState::Pending if !self.allowlist.is_empty() => {
                return Some(OutboundFrame::response(response_id, HOLD_TEXT, false));
            }
            _ => {}
        }

        let Some(last_user) = transcript
            .iter()
            .rev()
            .find(|e| e.role == Role::User)
            .cloned()
        else {
            return Some(OutboundFrame::response(response_id, EMPTY_INPUT_TEXT, false));
        };

        session.update_transcript(&transcript);
        let system_context = format_context(session.context_window());

        let reply = backend
            .send(
                session.session_key(),
                &last_user.content,
                &system_context,
                self.response_timeout,
            )
            .await;

        let end_call = reply.is_success() && wants_hangup(&reply.text);
        if end_call {
            tracing::info!(call_id = %session.call_id, "Agent said farewell, ending call");
        }
        Some(OutboundFrame::response(response_id, reply.text, end_call))
    }
}

fn wants_hangup(reply: &str) -> bool {
    let lower = reply.to_lowercase();
    FAREWELL_PHRASES.iter().any(|p| lower.contains(p))
}

/// Render the recent window as a contextual preamble so the backend keeps
/// short-term conversational continuity even if its own session memory
/// diverges from this call.
fn format_context(window: &[TranscriptEntry]) -> String {
    if window.is_empty() {
        return String::new();
    }
    let mut out = String::from("Recent conversation on this call:\n");
    for entry in window {
        let speaker = match entry.role {
            Role::User => "Caller",
            Role::Agent => "You",
        };
        out.push_str(speaker);
        out.push_str(": ");
        out.push_str(&entry.content);
        out.push('\n');
    }
    out
}
