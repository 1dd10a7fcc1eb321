use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::pending::{PendingTable, RunEnd};
use super::{AgentBackend, BackendReply};
use crate::config::GatewayConfig;
use crate::registry::SessionRegistry;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Spoken when a run misses its response budget.
pub const TIMEOUT_TEXT: &str = "Sorry, that took too long to process. Please try again.";

/// Spoken when the gateway errors and left us nothing usable to say.
pub const FAILURE_TEXT: &str =
    "Sorry, something went wrong on my end. Could you try that again?";

/// Prepended to every request's system prompt. The backend serves text
/// channels too; this pulls it back into a voice register.
const VOICE_DIRECTIVE: &str = "You are on a live phone call. Keep replies short and \
conversational — one or two spoken sentences. No markdown, no lists, no code. \
Use your tools freely, but narrate results in plain speech.";

struct Conn {
    write: SplitSink<WsStream, Message>,
    alive: Arc<AtomicBool>,
}

/// WebSocket client for the agent gateway.
///
/// Owns one connection to the backend, shared by every call and independent
/// of any telephony connection. Requests are correlated to their streamed
/// replies through the pending table; the reply to `send` is always a
/// speakable string, whatever the gateway did.
pub struct GatewayClient {
    url: String,
    token: Option<String>,
    model: Option<(String, String)>,
    registry: SessionRegistry,
    pending: Arc<PendingTable>,
    conn: Mutex<Option<Conn>>,
}

impl GatewayClient {
    pub fn new(config: &GatewayConfig, model: Option<&str>, registry: SessionRegistry) -> Self {
        Self {
            url: config.url.clone(),
            token: config.token.clone(),
            model: model.and_then(model_override),
            registry,
            pending: Arc::new(PendingTable::new()),
            conn: Mutex::new(None),
        }
    }

    /// Establish the gateway connection if it is not already up.
    ///
    /// Called once at startup (failure there is fatal to the bridge) and
    /// again before each request, which makes reconnects transparent.
    pub async fn connect(&self) -> Result<(), GatewayError> {
        let mut conn = self.conn.lock().await;
        if let Some(ref c) = *conn {
            if c.alive.load(Ordering::Relaxed) {
                return Ok(());
            }
        }

        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| GatewayError::Connect(e.to_string()))?;
        if let Some(ref token) = self.token {
            let value = format!("Bearer {token}")
                .parse()
                .map_err(|_| GatewayError::Connect("invalid gateway token".to_string()))?;
            request.headers_mut().insert("authorization", value);
        }

        let (stream, _) = connect_async(request)
            .await
            .map_err(|e| GatewayError::Connect(e.to_string()))?;
        tracing::info!(url = %self.url, "Gateway connected");

        let (write, read) = stream.split();
        let alive = Arc::new(AtomicBool::new(true));
        tokio::spawn(read_loop(read, Arc::clone(&self.pending), Arc::clone(&alive)));
        *conn = Some(Conn { write, alive });
        Ok(())
    }

    async fn write_frame(&self, frame: Value) -> Result<(), GatewayError> {
        let mut conn = self.conn.lock().await;
        let Some(c) = conn.as_mut() else {
            return Err(GatewayError::Connect("not connected".to_string()));
        };
        if let Err(e) = c.write.send(Message::Text(frame.to_string().into())).await {
            c.alive.store(false, Ordering::Relaxed);
            return Err(GatewayError::Send(e.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl AgentBackend for GatewayClient {
    async fn send(
        &self,
        session_key: &str,
        message: &str,
        system_context: &str,
        timeout: Duration,
    ) -> BackendReply {
        if let Err(e) = self.connect().await {
            tracing::warn!(session_key, "Gateway unreachable: {e}");
            return BackendReply::error(FAILURE_TEXT);
        }

        let backend_session_id = self.registry.resolve(session_key).await;
        let request_id = uuid::Uuid::new_v4().to_string();
        let rx = self.pending.register(&request_id);

        let system_prompt = if system_context.is_empty() {
            VOICE_DIRECTIVE.to_string()
        } else {
            format!("{VOICE_DIRECTIVE}\n\n{system_context}")
        };
        let mut params = json!({
            "session_id": backend_session_id,
            "session_key": session_key,
            "message": message,
            "system_prompt": system_prompt,
            "timeout_ms": timeout.as_millis() as u64,
        });
        if let Some((ref provider, ref model)) = self.model {
            params["provider"] = json!(provider);
            params["model"] = json!(model);
        }
        let frame = json!({
            "type": "req",
            "id": request_id,
            "method": "agent.request",
            "params": params,
        });

        if let Err(e) = self.write_frame(frame).await {
            tracing::warn!(session_key, "Gateway request failed: {e}");
            self.pending.discard(&request_id);
            return BackendReply::error(FAILURE_TEXT);
        }

        tracing::debug!(session_key, request_id = %request_id, "Awaiting gateway run");

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => {
                let text_or = |fallback: &str| {
                    if result.text.trim().is_empty() {
                        fallback.to_string()
                    } else {
                        result.text.clone()
                    }
                };
                match result.end {
                    RunEnd::Completed => BackendReply::ok(text_or(FAILURE_TEXT)),
                    RunEnd::Errored => BackendReply::error(text_or(FAILURE_TEXT)),
                    RunEnd::Aborted => BackendReply::aborted(text_or(TIMEOUT_TEXT)),
                }
            }
            // Entry discarded without resolution (connection torn down).
            Ok(Err(_)) => BackendReply::error(FAILURE_TEXT),
            Err(_) => {
                tracing::warn!(session_key, request_id = %request_id, "Gateway run timed out");
                self.pending.discard(&request_id);
                BackendReply::aborted(TIMEOUT_TEXT)
            }
        }
    }
}

async fn read_loop(
    mut read: SplitStream<WsStream>,
    pending: Arc<PendingTable>,
    alive: Arc<AtomicBool>,
) {
    while let Some(msg) = read.next().await {
        match msg {
            Ok(Message::Text(text)) => route_frame(&pending, text.as_str()),
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("Gateway read error: {e}");
                break;
            }
        }
    }
    tracing::info!("Gateway disconnected");
    alive.store(false, Ordering::Relaxed);
    pending.fail_all();
}

fn route_frame(pending: &PendingTable, raw: &str) {
    let frame: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!("Unparseable gateway frame: {e}");
            return;
        }
    };

    match frame.get("type").and_then(Value::as_str) {
        Some("res") => {
            let Some(request_id) = frame.get("id").and_then(Value::as_str) else {
                return;
            };
            if frame.get("error").is_some() {
                tracing::warn!(request_id, "Gateway rejected request");
                pending.complete_request(request_id, RunEnd::Errored);
                return;
            }
            if let Some(run_id) = frame
                .pointer("/payload/run_id")
                .and_then(Value::as_str)
            {
                pending.bind_run(request_id, run_id);
            }
        }
        Some("event") if frame.get("event").and_then(Value::as_str) == Some("agent") => {
            let data = &frame["data"];
            let Some(run_id) = data.get("run_id").and_then(Value::as_str) else {
                return;
            };
            match data.get("stream").and_then(Value::as_str) {
                Some("assistant") => {
                    let text = data.get("text").and_then(Value::as_str).unwrap_or_default();
                    pending.snapshot(run_id, text);
                }
                Some("lifecycle") => {
                    let end = match data.get("phase").and_then(Value::as_str) {
                        Some("end") => RunEnd::Completed,
                        Some("error") => RunEnd::Errored,
                        Some("aborted") => RunEnd::Aborted,
                        other => {
                            tracing::debug!(run_id, phase = ?other, "Ignoring lifecycle phase");
                            return;
                        }
                    };
                    pending.complete(run_id, end);
                }
                _ => {}
            }
        }
        _ => {}
    }
}

/// Parse a `provider/model` override. Anything without both halves falls
/// back to the gateway's defaults by omitting the fields entirely.
fn model_override(raw: &str) -> Option<(String, String)> {
    let (provider, model) = raw.split_once('/')?;
    if provider.is_empty() || model.is_empty() {
        return None;
    }
    Some((provider.to_string(), model.to_string()))
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Failed to connect to gateway: {0}")]
    Connect(String),
    #[error("Failed to send to gateway: {0}")]
    Send(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn model_override_requires_both_halves() {
        assert_eq!(
            model_override("anthropic/claude-sonnet"),
            Some(("anthropic".to_string(), "claude-sonnet".to_string()))
        );
        assert_eq!(model_override("claude-sonnet"), None);
        assert_eq!(model_override("/model"), None);
        assert_eq!(model_override("provider/"), None);
    }

    fn client_for(url: String) -> GatewayClient {
        GatewayClient::new(
            &GatewayConfig { url, token: None },
            None,
            SessionRegistry::ephemeral(),
        )
    }

    /// Accept one connection and hand each inbound request frame to `reply`,
    /// which returns the frames to send back.
    async fn fake_gateway(
        listener: TcpListener,
        reply: impl Fn(&Value) -> Vec<Value> + Send + 'static,
    ) {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Text(text) = msg {
                let frame: Value = serde_json::from_str(text.as_str()).unwrap();
                for out in reply(&frame) {
                    ws.send(Message::Text(out.to_string().into())).await.unwrap();
                }
            }
        }
    }

    #[tokio::test]
    async fn resolves_with_final_snapshot() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(fake_gateway(listener, |frame| {
            let id = frame["id"].as_str().unwrap();
            assert_eq!(frame["params"]["message"], "what time is it");
            assert!(frame["params"]["system_prompt"]
                .as_str()
                .unwrap()
                .contains("phone call"));
            vec![
                json!({"type": "res", "id": id, "payload": {"run_id": "run-1"}}),
                json!({"type": "event", "event": "agent",
                       "data": {"run_id": "run-1", "stream": "assistant", "text": "It's"}}),
                json!({"type": "event", "event": "agent",
                       "data": {"run_id": "run-1", "stream": "assistant", "text": "It's three o'clock."}}),
                json!({"type": "event", "event": "agent",
                       "data": {"run_id": "run-1", "stream": "lifecycle", "phase": "end"}}),
            ]
        }));

        let client = client_for(format!("ws://{addr}"));
        let reply = client
            .send("voice:+15551234567", "what time is it", "", Duration::from_secs(5))
            .await;
        assert!(reply.is_success());
        assert_eq!(reply.text, "It's three o'clock.");
    }

    #[tokio::test]
    async fn times_out_with_fallback_phrase() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Ack the request but never finish the run.
        tokio::spawn(fake_gateway(listener, |frame| {
            vec![json!({"type": "res", "id": frame["id"], "payload": {"run_id": "run-1"}})]
        }));

        let client = client_for(format!("ws://{addr}"));
        let started = tokio::time::Instant::now();
        let reply = client
            .send("voice:c1", "hello", "", Duration::from_millis(200))
            .await;
        assert!(reply.aborted);
        assert_eq!(reply.text, TIMEOUT_TEXT);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn error_lifecycle_keeps_partial_text() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(fake_gateway(listener, |frame| {
            vec![
                json!({"type": "res", "id": frame["id"], "payload": {"run_id": "run-9"}}),
                json!({"type": "event", "event": "agent",
                       "data": {"run_id": "run-9", "stream": "assistant", "text": "Let me check"}}),
                json!({"type": "event", "event": "agent",
                       "data": {"run_id": "run-9", "stream": "lifecycle", "phase": "error"}}),
            ]
        }));

        let client = client_for(format!("ws://{addr}"));
        let reply = client
            .send("voice:c1", "hello", "", Duration::from_secs(5))
            .await;
        assert!(reply.error);
        assert_eq!(reply.text, "Let me check");
    }

    #[tokio::test]
    async fn error_with_no_text_uses_fixed_fallback() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(fake_gateway(listener, |frame| {
            vec![json!({"type": "res", "id": frame["id"], "error": {"message": "nope"}})]
        }));

        let client = client_for(format!("ws://{addr}"));
        let reply = client
            .send("voice:c1", "hello", "", Duration::from_secs(5))
            .await;
        assert!(reply.error);
        assert_eq!(reply.text, FAILURE_TEXT);
    }

    #[tokio::test]
    async fn connect_fails_when_gateway_is_down() {
        // Grab a port, then close it so nothing is listening there.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = client_for(format!("ws://{addr}"));
        assert!(matches!(
            client.connect().await,
            Err(GatewayError::Connect(_))
        ));
    }
}
