//! Anonymous identity that survives restarts.
//!
//! The grant handed out by the store is written to a small JSON file. On the
//! next start it is validated against the store before being reused; a grant
//! the store no longer accepts is replaced by a fresh anonymous sign-in.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use onemore_types::models::{AuthGrant, UserId};
use onemore_types::{RemoteStore, StoreError};

use crate::error::{ClientError, ClientResult};

pub struct Authenticator {
    store: Arc<dyn RemoteStore>,
    state_path: Option<PathBuf>,
    current: Mutex<Option<AuthGrant>>,
}

impl Authenticator {
    pub fn new(store: Arc<dyn RemoteStore>, state_path: Option<PathBuf>) -> Self {
        Self {
            store,
            state_path,
            current: Mutex::new(None),
        }
    }

    /// The signed-in user, signing in anonymously first if needed.
    pub async fn ensure_authenticated(&self) -> ClientResult<UserId> {
        let mut current = self.current.lock().await;
        if let Some(grant) = current.as_ref() {
            return Ok(grant.user_id);
        }

        if let Some(grant) = self.load_state().await? {
            match self.store.get_user(&grant.access_token).await {
                Ok(user_id) if user_id == grant.user_id => {
                    debug!(%user_id, "Reusing persisted identity");
                    *current = Some(grant);
                    return Ok(user_id);
                }
                Ok(other) => {
                    warn!(stored = %grant.user_id, resolved = %other, "Persisted identity mismatch, signing in again");
                }
                Err(StoreError::Unauthenticated(reason)) => {
                    warn!("Persisted identity rejected ({}), signing in again", reason);
                }
                Err(e) => {
                    error!("Could not validate persisted identity: {}", e);
                    return Err(ClientError::Auth(e.to_string()));
                }
            }
        }

        let grant = self.store.sign_in_anonymously().await.map_err(|e| {
            error!("Anonymous sign-in failed: {}", e);
            ClientError::Auth(e.to_string())
        })?;
        self.save_state(&grant).await?;

        info!(user_id = %grant.user_id, "Signed in anonymously");
        let user_id = grant.user_id;
        *current = Some(grant);
        Ok(user_id)
    }

    /// Forget the cached grant so the next call re-reads the state file.
    pub async fn reset(&self) {
        *self.current.lock().await = None;
    }

    async fn load_state(&self) -> ClientResult<Option<AuthGrant>> {
        let Some(path) = &self.state_path else {
            return Ok(None);
        };

        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str(&raw) {
            Ok(grant) => Ok(Some(grant)),
            Err(e) => {
                warn!(path = %path.display(), "Ignoring unreadable auth state: {}", e);
                Ok(None)
            }
        }
    }

    async fn save_state(&self, grant: &AuthGrant) -> ClientResult<()> {
        let Some(path) = &self.state_path else {
            return Ok(());
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(grant)?;
        tokio::fs::write(path, json).await?;
        debug!(path = %path.display(), "Auth state saved");
        Ok(())
    }
}
