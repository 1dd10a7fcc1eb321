use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// Durable handle into the backend's conversation store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionHandle {
    pub backend_session_id: String,
    pub updated_at: DateTime<Utc>,
}

/// Registry of backend conversation sessions, keyed by session key.
///
/// A never-seen key gets a freshly minted backend session id; known keys
/// reuse theirs so the backend resumes prior memory for that caller. The
/// key→id map is persisted to a JSON file so sessions survive bridge
/// restarts; the in-memory `CallSession` objects do not.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<Mutex<HashMap<String, SessionHandle>>>,
    path: Option<PathBuf>,
}

impl SessionRegistry {
    /// In-memory only, for tests and disabled persistence.
    pub fn ephemeral() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            path: None,
        }
    }

    /// Load the registry from `path`, tolerating a missing or corrupt file.
    pub fn load(path: PathBuf) -> Self {
        let map = match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(map) => map,
                Err(e) => {
                    tracing::warn!(path = %path.display(), "Corrupt session store, starting empty: {e}");
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                tracing::warn!(path = %path.display(), "Failed to read session store, starting empty: {e}");
                HashMap::new()
            }
        };

        tracing::info!(path = %path.display(), sessions = map.len(), "Session store loaded");

        Self {
            inner: Arc::new(Mutex::new(map)),
            path: Some(path),
        }
    }

    /// Resolve a session key to its backend session id, minting one for a
    /// never-seen key. Touches `updated_at` either way.
    pub async fn resolve(&self, session_key: &str) -> String {
        let mut map = self.inner.lock().await;
        let handle = map
            .entry(session_key.to_string())
            .and_modify(|h| h.updated_at = Utc::now())
            .or_insert_with(|| {
                let id = uuid::Uuid::new_v4().to_string();
                tracing::info!(session_key, backend_session_id = %id, "New backend session");
                SessionHandle {
                    backend_session_id: id,
                    updated_at: Utc::now(),
                }
            });
        let id = handle.backend_session_id.clone();
        self.persist(&map);
        id
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    fn persist(&self, map: &HashMap<String, SessionHandle>) {
        let Some(ref path) = self.path else {
            return;
        };
        let json = match serde_json::to_string_pretty(map) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!("Failed to serialize session store: {e}");
                return;
            }
        };
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Err(e) = std::fs::write(path, json) {
            tracing::error!(path = %path.display(), "Failed to write session store: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mints_once_and_reuses() {
        let registry = SessionRegistry::ephemeral();
        let first = registry.resolve("voice:+15551234567").await;
        let second = registry.resolve("voice:+15551234567").await;
        assert_eq!(first, second);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn distinct_keys_get_distinct_sessions() {
        let registry = SessionRegistry::ephemeral();
        let a = registry.resolve("voice:+15551234567").await;
        let b = registry.resolve("voice:+15559999999").await;
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn survives_reload_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");

        let first = {
            let registry = SessionRegistry::load(path.clone());
            registry.resolve("voice:+15551234567").await
        };

        let registry = SessionRegistry::load(path);
        assert_eq!(registry.resolve("voice:+15551234567").await, first);
    }

    #[tokio::test]
    async fn corrupt_store_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");
        std::fs::write(&path, "not json{{").unwrap();

        let registry = SessionRegistry::load(path);
        assert_eq!(registry.len().await, 0);
    }
}
