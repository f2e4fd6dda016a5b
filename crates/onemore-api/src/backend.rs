use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use onemore_db::models::{
    DrinkEventRow, DrinkTypeRow, DrinkTypeUpdate, ParticipantRow, ParticipantUpdate, SessionRow,
    UserRow,
};
use onemore_db::{Database, is_unique_violation, now_timestamp};
use onemore_gateway::Dispatcher;
use onemore_types::events::{ChangeEvent, ChangeStream, FeedFilter, Record};
use onemore_types::models::{
    AuthGrant, DrinkEvent, DrinkType, DrinkTypePatch, NewDrinkEvent, NewDrinkType,
    NewParticipant, NewSession, Participant, ParticipantPatch, Session, UserId,
};
use onemore_types::store::{RemoteStore, StoreError, StoreResult};

use crate::auth;
use crate::config::BackendConfig;
use crate::convert;

/// `RemoteStore` over a local SQLite database. Every successful write is
/// published on the dispatcher after it commits.
///
/// Mutations other than inserts follow the owner rule: only the session
/// owner may change or delete rows, except that the user who claimed a
/// participant may edit that participant.
pub struct LocalBackend {
    db: Arc<Database>,
    dispatcher: Dispatcher,
    jwt_secret: String,
}

impl LocalBackend {
    pub fn new(db: Database, jwt_secret: impl Into<String>) -> Self {
        Self {
            db: Arc::new(db),
            dispatcher: Dispatcher::new(),
            jwt_secret: jwt_secret.into(),
        }
    }

    pub fn open(config: &BackendConfig) -> anyhow::Result<Self> {
        let db = Database::open(&config.db_path)?;
        Ok(Self::new(db, config.jwt_secret.clone()))
    }

    pub fn in_memory(jwt_secret: &str) -> anyhow::Result<Self> {
        Ok(Self::new(Database::open_in_memory()?, jwt_secret))
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Run a blocking DB call off the async runtime.
    async fn run<F, T>(&self, op: &'static str, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                StoreError::Backend(e.to_string())
            })?
            .map_err(|e| db_error(op, e))
    }

    async fn owned_session(&self, actor: UserId, session_id: Uuid) -> StoreResult<Session> {
        let session = self
            .get_session(session_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("session {}", session_id)))?;

        if session.owner_user_id != actor {
            warn!(%actor, %session_id, "Rejected mutation by non-owner");
            return Err(StoreError::Forbidden(
                "only the session owner can change this".into(),
            ));
        }
        Ok(session)
    }

    async fn get_participant(&self, id: Uuid) -> StoreResult<Option<Participant>> {
        let id = id.to_string();
        self.run("get_participant", move |db| {
            db.get_participant(&id)?.map(convert::participant).transpose()
        })
        .await
    }
}

fn db_error(op: &str, err: anyhow::Error) -> StoreError {
    if is_unique_violation(&err) {
        warn!(op, "Unique constraint violated: {:#}", err);
        StoreError::UniqueViolation(format!("{:#}", err))
    } else {
        error!(op, "Database error: {:#}", err);
        StoreError::Backend(format!("{:#}", err))
    }
}

#[async_trait]
impl RemoteStore for LocalBackend {
    // -- Auth --

    async fn sign_in_anonymously(&self) -> StoreResult<AuthGrant> {
        let user_id = Uuid::new_v4();
        let row = UserRow {
            id: user_id.to_string(),
            created_at: now_timestamp(),
        };
        self.run("sign_in_anonymously", move |db| db.create_user(&row))
            .await?;

        let access_token = auth::issue_token(&self.jwt_secret, user_id).map_err(|e| {
            error!("Token issue failed: {}", e);
            StoreError::Unauthenticated(e.to_string())
        })?;

        info!(%user_id, "Issued anonymous identity");
        Ok(AuthGrant {
            user_id,
            access_token,
        })
    }

    async fn get_user(&self, access_token: &str) -> StoreResult<UserId> {
        let claims = auth::verify_token(&self.jwt_secret, access_token).map_err(|e| {
            debug!("Token rejected: {}", e);
            StoreError::Unauthenticated(format!("invalid token: {}", e))
        })?;

        let id = claims.sub.to_string();
        let exists = self.run("get_user", move |db| db.user_exists(&id)).await?;
        if !exists {
            return Err(StoreError::Unauthenticated(format!(
                "unknown user {}",
                claims.sub
            )));
        }
        Ok(claims.sub)
    }

    // -- Sessions --

    async fn insert_session(&self, new: NewSession) -> StoreResult<Session> {
        let row = SessionRow {
            id: Uuid::new_v4().to_string(),
            owner_user_id: new.owner_user_id.to_string(),
            name: new.name,
            invite_code: new.invite_code,
            created_at: now_timestamp(),
        };
        let session = self
            .run("insert_session", move |db| {
                db.insert_session(&row)?;
                convert::session(row)
            })
            .await?;

        info!(session_id = %session.id, owner = %session.owner_user_id, "Session created");
        self.dispatcher
            .broadcast(ChangeEvent::insert(Record::Session(session.clone())));
        Ok(session)
    }

    async fn get_session(&self, id: Uuid) -> StoreResult<Option<Session>> {
        let id = id.to_string();
        self.run("get_session", move |db| {
            db.get_session(&id)?.map(convert::session).transpose()
        })
        .await
    }

    async fn find_session_by_invite_code(&self, code: &str) -> StoreResult<Option<Session>> {
        let code = code.to_string();
        self.run("find_session_by_invite_code", move |db| {
            db.get_session_by_invite_code(&code)?
                .map(convert::session)
                .transpose()
        })
        .await
    }

    async fn list_sessions(&self, user: UserId) -> StoreResult<Vec<Session>> {
        let user = user.to_string();
        self.run("list_sessions", move |db| {
            convert::all(db.list_sessions_for_user(&user)?, convert::session)
        })
        .await
    }

    async fn delete_session(&self, actor: UserId, id: Uuid) -> StoreResult<()> {
        let session = self.owned_session(actor, id).await?;
        let sid = id.to_string();
        self.run("delete_session", move |db| db.delete_session(&sid))
            .await?;

        info!(session_id = %id, "Session deleted");
        self.dispatcher
            .broadcast(ChangeEvent::delete(Record::Session(session)));
        Ok(())
    }

    // -- Participants --

    async fn insert_participants(
        &self,
        rows: Vec<NewParticipant>,
    ) -> StoreResult<Vec<Participant>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let rows: Vec<ParticipantRow> = rows
            .into_iter()
            .map(|p| ParticipantRow {
                id: Uuid::new_v4().to_string(),
                session_id: p.session_id.to_string(),
                display_name: p.display_name,
                claimed_by_user_id: p.claimed_by_user_id.map(|u| u.to_string()),
                color_index: p.color_index.map(i64::from),
                created_at: now_timestamp(),
            })
            .collect();

        let inserted = self
            .run("insert_participants", move |db| {
                db.insert_participants(&rows)?;
                convert::all(rows, convert::participant)
            })
            .await?;

        for p in &inserted {
            debug!(participant_id = %p.id, session_id = %p.session_id, "Participant inserted");
            self.dispatcher
                .broadcast(ChangeEvent::insert(Record::Participant(p.clone())));
        }
        Ok(inserted)
    }

    async fn list_participants(&self, session_id: Uuid) -> StoreResult<Vec<Participant>> {
        let sid = session_id.to_string();
        self.run("list_participants", move |db| {
            convert::all(db.list_participants(&sid)?, convert::participant)
        })
        .await
    }

    async fn update_participant(
        &self,
        actor: UserId,
        session_id: Uuid,
        id: Uuid,
        patch: ParticipantPatch,
    ) -> StoreResult<()> {
        let session = self
            .get_session(session_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("session {}", session_id)))?;
        let participant = self
            .get_participant(id)
            .await?
            .filter(|p| p.session_id == session_id)
            .ok_or_else(|| StoreError::NotFound(format!("participant {}", id)))?;

        let allowed =
            session.owner_user_id == actor || participant.claimed_by_user_id == Some(actor);
        if !allowed {
            warn!(%actor, participant_id = %id, "Rejected participant update");
            return Err(StoreError::Forbidden(
                "only the owner or the claiming user can edit this participant".into(),
            ));
        }
        if patch.is_empty() {
            return Ok(());
        }

        let (sid, pid) = (session_id.to_string(), id.to_string());
        let updated = self
            .run("update_participant", move |db| {
                let update = ParticipantUpdate {
                    display_name: patch.display_name.as_deref(),
                    color_index: patch.color_index.map(i64::from),
                };
                db.update_participant(&sid, &pid, &update)?
                    .map(convert::participant)
                    .transpose()
            })
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("participant {}", id)))?;

        self.dispatcher
            .broadcast(ChangeEvent::update(Record::Participant(updated)));
        Ok(())
    }

    async fn delete_participant(&self, actor: UserId, session_id: Uuid, id: Uuid) -> StoreResult<()> {
        self.owned_session(actor, session_id).await?;

        let (sid, pid) = (session_id.to_string(), id.to_string());
        let deleted = self
            .run("delete_participant", move |db| {
                db.delete_participant(&sid, &pid)?
                    .map(convert::participant)
                    .transpose()
            })
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("participant {}", id)))?;

        info!(participant_id = %id, %session_id, "Participant removed");
        self.dispatcher
            .broadcast(ChangeEvent::delete(Record::Participant(deleted)));
        Ok(())
    }

    async fn claim_participant(&self, user: UserId, id: Uuid) -> StoreResult<Vec<Participant>> {
        let (pid, uid) = (id.to_string(), user.to_string());
        let claimed = self
            .run("claim_participant", move |db| {
                db.claim_participant(&pid, &uid)?
                    .map(convert::participant)
                    .transpose()
            })
            .await?;

        match claimed {
            Some(p) => {
                info!(participant_id = %id, %user, "Participant claimed");
                self.dispatcher
                    .broadcast(ChangeEvent::update(Record::Participant(p.clone())));
                Ok(vec![p])
            }
            None => {
                info!(participant_id = %id, %user, "Claim matched no unclaimed row");
                Ok(Vec::new())
            }
        }
    }

    // -- Drink types --

    async fn insert_drink_types(
        &self,
        actor: UserId,
        rows: Vec<NewDrinkType>,
    ) -> StoreResult<Vec<DrinkType>> {
        let sessions: BTreeSet<Uuid> = rows.iter().map(|r| r.session_id).collect();
        for session_id in sessions {
            self.owned_session(actor, session_id).await?;
        }
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let rows: Vec<DrinkTypeRow> = rows
            .into_iter()
            .map(|d| DrinkTypeRow {
                id: Uuid::new_v4().to_string(),
                session_id: d.session_id.to_string(),
                name: d.name,
                category: d.category.as_str().to_string(),
                price_cents: d.price_cents,
                emoji: d.emoji,
                sort_order: i64::from(d.sort_order),
                created_at: now_timestamp(),
            })
            .collect();

        let inserted = self
            .run("insert_drink_types", move |db| {
                db.insert_drink_types(&rows)?;
                convert::all(rows, convert::drink_type)
            })
            .await?;

        for d in &inserted {
            self.dispatcher
                .broadcast(ChangeEvent::insert(Record::DrinkType(d.clone())));
        }
        Ok(inserted)
    }

    async fn list_drink_types(&self, session_id: Uuid) -> StoreResult<Vec<DrinkType>> {
        let sid = session_id.to_string();
        self.run("list_drink_types", move |db| {
            convert::all(db.list_drink_types(&sid)?, convert::drink_type)
        })
        .await
    }

    async fn update_drink_type(
        &self,
        actor: UserId,
        session_id: Uuid,
        id: Uuid,
        patch: DrinkTypePatch,
    ) -> StoreResult<()> {
        self.owned_session(actor, session_id).await?;
        if patch.is_empty() {
            return Ok(());
        }

        let (sid, did) = (session_id.to_string(), id.to_string());
        let updated = self
            .run("update_drink_type", move |db| {
                let update = DrinkTypeUpdate {
                    name: patch.name.as_deref(),
                    category: patch.category.map(|c| c.as_str()),
                    price_cents: patch.price_cents,
                    emoji: patch.emoji.as_deref(),
                    sort_order: patch.sort_order.map(i64::from),
                };
                db.update_drink_type(&sid, &did, &update)?
                    .map(convert::drink_type)
                    .transpose()
            })
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("drink type {}", id)))?;

        self.dispatcher
            .broadcast(ChangeEvent::update(Record::DrinkType(updated)));
        Ok(())
    }

    async fn delete_drink_type(&self, actor: UserId, session_id: Uuid, id: Uuid) -> StoreResult<()> {
        self.owned_session(actor, session_id).await?;

        let (sid, did) = (session_id.to_string(), id.to_string());
        let deleted = self
            .run("delete_drink_type", move |db| {
                db.delete_drink_type(&sid, &did)?
                    .map(convert::drink_type)
                    .transpose()
            })
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("drink type {}", id)))?;

        self.dispatcher
            .broadcast(ChangeEvent::delete(Record::DrinkType(deleted)));
        Ok(())
    }

    // -- Drink events --

    async fn insert_drink_event(&self, new: NewDrinkEvent) -> StoreResult<DrinkEvent> {
        let row = DrinkEventRow {
            id: Uuid::new_v4().to_string(),
            session_id: new.session_id.to_string(),
            actor_user_id: new.actor_user_id.to_string(),
            target_participant_id: new.target_participant_id.to_string(),
            drink_type_id: new.drink_type_id.to_string(),
            delta: new.delta.value(),
            created_at: now_timestamp(),
        };

        let event = self
            .run("insert_drink_event", move |db| {
                let participant_ok = db
                    .get_participant(&row.target_participant_id)?
                    .is_some_and(|p| p.session_id == row.session_id);
                let drink_type_ok = db
                    .get_drink_type(&row.drink_type_id)?
                    .is_some_and(|d| d.session_id == row.session_id);
                if !participant_ok || !drink_type_ok {
                    return Ok(None);
                }
                db.insert_drink_event(&row)?;
                convert::drink_event(row).map(Some)
            })
            .await?
            .ok_or_else(|| StoreError::NotFound("participant or drink type".into()))?;

        debug!(
            event_id = %event.id,
            participant_id = %event.target_participant_id,
            delta = event.delta.value(),
            "Drink event recorded"
        );
        self.dispatcher
            .broadcast(ChangeEvent::insert(Record::DrinkEvent(event.clone())));
        Ok(event)
    }

    async fn list_drink_events(&self, session_id: Uuid) -> StoreResult<Vec<DrinkEvent>> {
        let sid = session_id.to_string();
        self.run("list_drink_events", move |db| {
            convert::all(db.list_drink_events(&sid)?, convert::drink_event)
        })
        .await
    }

    // -- Realtime --

    async fn subscribe(&self, filter: FeedFilter) -> StoreResult<ChangeStream> {
        Ok(self.dispatcher.subscribe(filter))
    }
}
