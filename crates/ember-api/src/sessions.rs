use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use uuid::Uuid;

/// How long an issued token stays valid.
const SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Identity attached to a request once its session token resolves.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub account_id: Uuid,
    pub username: String,
    pub token: String,
}

struct Session {
    account_id: Uuid,
    username: String,
    issued_at: Instant,
}

/// In-memory session cache: opaque token -> account. Tokens carry no claims,
/// so revoking one is just removing its entry.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<RwLock<HashMap<String, Session>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn create(&self, account_id: Uuid, username: &str) -> String {
        let token = Uuid::new_v4().to_string();
        self.inner.write().await.insert(
            token.clone(),
            Session {
                account_id,
                username: username.to_string(),
                issued_at: Instant::now(),
            },
        );
        token
    }

    pub async fn resolve(&self, token: &str) -> Option<CurrentUser> {
        {
            let sessions = self.inner.read().await;
            let session = sessions.get(token)?;
            if session.issued_at.elapsed() < SESSION_TTL {
                return Some(CurrentUser {
                    account_id: session.account_id,
                    username: session.username.clone(),
                    token: token.to_string(),
                });
            }
        }

        // expired; drop the entry
        self.inner.write().await.remove(token);
        None
    }

    pub async fn revoke(&self, token: &str) -> bool {
        self.inner.write().await.remove(token).is_some()
    }
}
