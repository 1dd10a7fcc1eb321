mod gateway;
mod pending;

pub use gateway::{GatewayClient, GatewayError, FAILURE_TEXT, TIMEOUT_TEXT};

use std::time::Duration;

use async_trait::async_trait;

/// Outcome of one backend generation request. Always carries a speakable
/// string — the caller-facing flow never sees an error it can't say out
/// loud.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendReply {
    pub text: String,
    pub aborted: bool,
    pub error: bool,
}

impl BackendReply {
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            aborted: false,
            error: false,
        }
    }

    pub fn aborted(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            aborted: true,
            error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            aborted: false,
            error: true,
        }
    }

    pub fn is_success(&self) -> bool {
        !self.aborted && !self.error
    }
}

/// The narrow backend capability the turn handler depends on: one prompt
/// in, one reply out, within a budget. Implementations own their transport.
#[async_trait]
pub trait AgentBackend: Send + Sync {
    async fn send(
        &self,
        session_key: &str,
        message: &str,
        system_context: &str,
        timeout: Duration,
    ) -> BackendReply;
}
