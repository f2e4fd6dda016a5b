//! The remote data store the client core talks to.
//!
//! Any backend that offers row CRUD, a conditional claim update, per-table
//! change notifications and anonymous identity issuance can sit behind this
//! trait. The workspace ships a SQLite-backed implementation in
//! `onemore-api`.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::events::{ChangeStream, FeedFilter};
use crate::models::{
    AuthGrant, DrinkEvent, DrinkType, DrinkTypePatch, NewDrinkEvent, NewDrinkType,
    NewParticipant, NewSession, Participant, ParticipantPatch, Session, UserId,
};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("authentication failed: {0}")]
    Unauthenticated(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("not allowed: {0}")]
    Forbidden(String),

    #[error("duplicate key value violates unique constraint: {0}")]
    UniqueViolation(String),

    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, Self::UniqueViolation(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait RemoteStore: Send + Sync {
    // -- Auth --

    /// Issue a fresh anonymous identity.
    async fn sign_in_anonymously(&self) -> StoreResult<AuthGrant>;

    /// Resolve a bearer token to its user. Invalid or expired tokens fail
    /// with `Unauthenticated`.
    async fn get_user(&self, access_token: &str) -> StoreResult<UserId>;

    // -- Sessions --

    async fn insert_session(&self, new: NewSession) -> StoreResult<Session>;

    async fn get_session(&self, id: Uuid) -> StoreResult<Option<Session>>;

    async fn find_session_by_invite_code(&self, code: &str) -> StoreResult<Option<Session>>;

    /// Sessions the user owns or has claimed a slot in, newest first.
    async fn list_sessions(&self, user: UserId) -> StoreResult<Vec<Session>>;

    /// Owner only. Cascades to every row of the session.
    async fn delete_session(&self, actor: UserId, id: Uuid) -> StoreResult<()>;

    // -- Participants --

    async fn insert_participants(&self, rows: Vec<NewParticipant>) -> StoreResult<Vec<Participant>>;

    /// Ordered by creation time.
    async fn list_participants(&self, session_id: Uuid) -> StoreResult<Vec<Participant>>;

    async fn update_participant(
        &self,
        actor: UserId,
        session_id: Uuid,
        id: Uuid,
        patch: ParticipantPatch,
    ) -> StoreResult<()>;

    async fn delete_participant(&self, actor: UserId, session_id: Uuid, id: Uuid) -> StoreResult<()>;

    /// Set `claimed_by_user_id` only if it is currently unset. Returns the
    /// rows actually changed: one on success, none if someone got there first.
    async fn claim_participant(&self, user: UserId, id: Uuid) -> StoreResult<Vec<Participant>>;

    // -- Drink types --

    async fn insert_drink_types(
        &self,
        actor: UserId,
        rows: Vec<NewDrinkType>,
    ) -> StoreResult<Vec<DrinkType>>;

    /// Ordered by `sort_order`.
    async fn list_drink_types(&self, session_id: Uuid) -> StoreResult<Vec<DrinkType>>;

    async fn update_drink_type(
        &self,
        actor: UserId,
        session_id: Uuid,
        id: Uuid,
        patch: DrinkTypePatch,
    ) -> StoreResult<()>;

    async fn delete_drink_type(&self, actor: UserId, session_id: Uuid, id: Uuid) -> StoreResult<()>;

    // -- Drink events --

    async fn insert_drink_event(&self, new: NewDrinkEvent) -> StoreResult<DrinkEvent>;

    /// Newest first.
    async fn list_drink_events(&self, session_id: Uuid) -> StoreResult<Vec<DrinkEvent>>;

    // -- Realtime --

    async fn subscribe(&self, filter: FeedFilter) -> StoreResult<ChangeStream>;
}
