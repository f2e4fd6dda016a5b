#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use onemore_api::LocalBackend;
use onemore_client::{ClientConfig, Repo};
use onemore_types::events::{ChangeStream, FeedFilter};
use onemore_types::models::{
    AuthGrant, DrinkEvent, DrinkType, DrinkTypePatch, NewDrinkEvent, NewDrinkType,
    NewParticipant, NewSession, Participant, ParticipantPatch, Session, UserId,
};
use onemore_types::{RemoteStore, StoreError, StoreResult};

pub const SECRET: &str = "test-secret";

/// Wraps the local backend and lets a test fail or hold back writes.
pub struct FaultyStore {
    pub backend: Arc<LocalBackend>,
    fail_events: AtomicBool,
    fail_participants: AtomicBool,
    /// Participant insert commits, but the caller is told it was a duplicate.
    duplicate_after_insert: AtomicBool,
    gate: Arc<Mutex<()>>,
}

impl FaultyStore {
    pub fn new(backend: Arc<LocalBackend>) -> Self {
        Self {
            backend,
            fail_events: AtomicBool::new(false),
            fail_participants: AtomicBool::new(false),
            duplicate_after_insert: AtomicBool::new(false),
            gate: Arc::new(Mutex::new(())),
        }
    }

    pub fn fail_events(&self, fail: bool) {
        self.fail_events.store(fail, Ordering::SeqCst);
    }

    pub fn fail_participants(&self, fail: bool) {
        self.fail_participants.store(fail, Ordering::SeqCst);
    }

    pub fn duplicate_after_insert(&self, on: bool) {
        self.duplicate_after_insert.store(on, Ordering::SeqCst);
    }

    /// Event and participant writes wait until the guard is dropped.
    pub async fn hold_writes(&self) -> OwnedMutexGuard<()> {
        self.gate.clone().lock_owned().await
    }
}

#[async_trait]
impl RemoteStore for FaultyStore {
    async fn sign_in_anonymously(&self) -> StoreResult<AuthGrant> {
        self.backend.sign_in_anonymously().await
    }

    async fn get_user(&self, access_token: &str) -> StoreResult<UserId> {
        self.backend.get_user(access_token).await
    }

    async fn insert_session(&self, new: NewSession) -> StoreResult<Session> {
        self.backend.insert_session(new).await
    }

    async fn get_session(&self, id: Uuid) -> StoreResult<Option<Session>> {
        self.backend.get_session(id).await
    }

    async fn find_session_by_invite_code(&self, code: &str) -> StoreResult<Option<Session>> {
        self.backend.find_session_by_invite_code(code).await
    }

    async fn list_sessions(&self, user: UserId) -> StoreResult<Vec<Session>> {
        self.backend.list_sessions(user).await
    }

    async fn delete_session(&self, actor: UserId, id: Uuid) -> StoreResult<()> {
        self.backend.delete_session(actor, id).await
    }

    async fn insert_participants(&self, rows: Vec<NewParticipant>) -> StoreResult<Vec<Participant>> {
        let _gate = self.gate.lock().await;
        if self.fail_participants.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("injected participant failure".into()));
        }
        let inserted = self.backend.insert_participants(rows).await?;
        if self.duplicate_after_insert.load(Ordering::SeqCst) {
            return Err(StoreError::UniqueViolation("participants_session_id_display_name_key".into()));
        }
        Ok(inserted)
    }

    async fn list_participants(&self, session_id: Uuid) -> StoreResult<Vec<Participant>> {
        self.backend.list_participants(session_id).await
    }

    async fn update_participant(
        &self,
        actor: UserId,
        session_id: Uuid,
        id: Uuid,
        patch: ParticipantPatch,
    ) -> StoreResult<()> {
        self.backend.update_participant(actor, session_id, id, patch).await
    }

    async fn delete_participant(&self, actor: UserId, session_id: Uuid, id: Uuid) -> StoreResult<()> {
        self.backend.delete_participant(actor, session_id, id).await
    }

    async fn claim_participant(&self, user: UserId, id: Uuid) -> StoreResult<Vec<Participant>> {
        self.backend.claim_participant(user, id).await
    }

    async fn insert_drink_types(&self, actor: UserId, rows: Vec<NewDrinkType>) -> StoreResult<Vec<DrinkType>> {
        self.backend.insert_drink_types(actor, rows).await
    }

    async fn list_drink_types(&self, session_id: Uuid) -> StoreResult<Vec<DrinkType>> {
        self.backend.list_drink_types(session_id).await
    }

    async fn update_drink_type(
        &self,
        actor: UserId,
        session_id: Uuid,
        id: Uuid,
        patch: DrinkTypePatch,
    ) -> StoreResult<()> {
        self.backend.update_drink_type(actor, session_id, id, patch).await
    }

    async fn delete_drink_type(&self, actor: UserId, session_id: Uuid, id: Uuid) -> StoreResult<()> {
        self.backend.delete_drink_type(actor, session_id, id).await
    }

    async fn insert_drink_event(&self, new: NewDrinkEvent) -> StoreResult<DrinkEvent> {
        let _gate = self.gate.lock().await;
        if self.fail_events.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("injected event failure".into()));
        }
        self.backend.insert_drink_event(new).await
    }

    async fn list_drink_events(&self, session_id: Uuid) -> StoreResult<Vec<DrinkEvent>> {
        self.backend.list_drink_events(session_id).await
    }

    async fn subscribe(&self, filter: FeedFilter) -> StoreResult<ChangeStream> {
        self.backend.subscribe(filter).await
    }
}

pub fn stores() -> (Arc<LocalBackend>, Arc<FaultyStore>) {
    let backend = Arc::new(LocalBackend::in_memory(SECRET).unwrap());
    let store = Arc::new(FaultyStore::new(backend.clone()));
    (backend, store)
}

/// A repo with its own in-memory identity, i.e. a separate user.
pub fn repo(store: Arc<dyn RemoteStore>) -> Repo {
    Repo::new(store, ClientConfig::ephemeral())
}

/// Poll `check` for up to two seconds.
pub async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    eventually_within(Duration::from_secs(2), check).await
}

pub async fn eventually_within<F: Fn() -> bool>(limit: Duration, check: F) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub async fn within<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(2), future)
        .await
        .expect("timed out")
}
