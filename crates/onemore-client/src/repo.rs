//! Session operations against the remote store. Every call authenticates
//! first; the store enforces the owner rules.

use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use onemore_types::invite;
use onemore_types::models::{
    Delta, DrinkCategory, DrinkEvent, DrinkType, DrinkTypePatch, NewDrinkEvent, NewDrinkType,
    NewParticipant, NewSession, Participant, ParticipantPatch, Session, UserId,
};
use onemore_types::RemoteStore;

use crate::auth::Authenticator;
use crate::balances;
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::view::SessionView;

/// Drink types every new session starts with: name, category, price, emoji.
pub const DEFAULT_DRINK_TYPES: [(&str, DrinkCategory, i64, &str); 3] = [
    ("Cerveza", DrinkCategory::Beer, 300, "🍺"),
    ("Refresco", DrinkCategory::Soft, 250, "🥤"),
    ("Copa", DrinkCategory::Cocktail, 800, "🍸"),
];

/// Everything a session screen needs in one load.
#[derive(Debug, Clone)]
pub struct SessionData {
    pub session: Session,
    /// By creation time.
    pub participants: Vec<Participant>,
    /// By sort order.
    pub drink_types: Vec<DrinkType>,
    /// Newest first.
    pub events: Vec<DrinkEvent>,
    pub invite_code: String,
    pub is_owner: bool,
    pub session_name: String,
    pub current_participant_id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

pub struct Repo {
    store: Arc<dyn RemoteStore>,
    auth: Authenticator,
    config: ClientConfig,
}

impl Repo {
    pub fn new(store: Arc<dyn RemoteStore>, config: ClientConfig) -> Self {
        let auth = Authenticator::new(store.clone(), config.auth_state_path.clone());
        Self { store, auth, config }
    }

    pub fn store(&self) -> &Arc<dyn RemoteStore> {
        &self.store
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub async fn ensure_authenticated(&self) -> ClientResult<UserId> {
        self.auth.ensure_authenticated().await
    }

    // -- Sessions --

    /// Create a session with the given participants (colored by position)
    /// and the default drink types.
    pub async fn create_session<S: AsRef<str>>(&self, name: &str, participant_names: &[S]) -> ClientResult<Session> {
        let user = self.ensure_authenticated().await?;
        let name = name.trim();
        if name.is_empty() {
            return Err(ClientError::InvalidName);
        }
        let names: Vec<&str> = participant_names.iter().map(|n| n.as_ref().trim()).collect();
        if names.iter().any(|n| n.is_empty()) {
            return Err(ClientError::InvalidName);
        }

        let session = self
            .store
            .insert_session(NewSession {
                owner_user_id: user,
                name: name.to_string(),
                invite_code: invite::generate_invite_code(),
            })
            .await?;

        let participants = names
            .iter()
            .enumerate()
            .map(|(i, n)| NewParticipant {
                session_id: session.id,
                display_name: n.to_string(),
                claimed_by_user_id: None,
                color_index: Some(i as u32),
            })
            .collect();
        self.store.insert_participants(participants).await?;

        let drink_types = DEFAULT_DRINK_TYPES
            .iter()
            .enumerate()
            .map(|(i, (name, category, price_cents, emoji))| NewDrinkType {
                session_id: session.id,
                name: name.to_string(),
                category: *category,
                price_cents: *price_cents,
                emoji: emoji.to_string(),
                sort_order: i as i32,
            })
            .collect();
        self.store.insert_drink_types(user, drink_types).await?;

        info!(session_id = %session.id, invite_code = %session.invite_code, participants = names.len(), "Session created");
        Ok(session)
    }

    pub async fn load_session_data(&self, session_id: Uuid) -> ClientResult<SessionData> {
        let user = self.ensure_authenticated().await?;
        let store = self.store.as_ref();

        let (session, participants, drink_types, events) = tokio::try_join!(
            store.get_session(session_id),
            store.list_participants(session_id),
            store.list_drink_types(session_id),
            store.list_drink_events(session_id),
        )?;
        let session = session.ok_or_else(|| ClientError::SessionNotFound(session_id.to_string()))?;

        let current_participant_id = participants
            .iter()
            .find(|p| p.claimed_by_user_id == Some(user))
            .map(|p| p.id);

        Ok(SessionData {
            invite_code: session.invite_code.clone(),
            is_owner: session.owner_user_id == user,
            session_name: session.name.clone(),
            current_participant_id,
            session,
            participants,
            drink_types,
            events,
        })
    }

    pub async fn find_session_by_invite_code(&self, code: &str) -> ClientResult<Option<Session>> {
        self.ensure_authenticated().await?;
        let code = code.trim().to_uppercase();
        Ok(self.store.find_session_by_invite_code(&code).await?)
    }

    /// Look the session up by invite code and add a slot named `name`.
    pub async fn join_session(&self, code: &str, name: &str) -> ClientResult<(Session, Participant)> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ClientError::InvalidName);
        }

        let session = self
            .find_session_by_invite_code(code)
            .await?
            .ok_or_else(|| ClientError::SessionNotFound(code.trim().to_string()))?;
        let participant = self.add_participant_slot(session.id, name, None).await?;

        info!(session_id = %session.id, participant_id = %participant.id, "Joined session");
        Ok((session, participant))
    }

    /// Sessions the current user owns or has claimed a slot in, newest first.
    pub async fn list_sessions(&self) -> ClientResult<Vec<Session>> {
        let user = self.ensure_authenticated().await?;
        Ok(self.store.list_sessions(user).await?)
    }

    pub async fn delete_session(&self, session_id: Uuid) -> ClientResult<()> {
        let user = self.ensure_authenticated().await?;
        let session = self
            .store
            .get_session(session_id)
            .await?
            .ok_or_else(|| ClientError::SessionNotFound(session_id.to_string()))?;
        if session.owner_user_id != user {
            return Err(ClientError::NotOwner);
        }

        self.store.delete_session(user, session_id).await?;
        info!(%session_id, "Session deleted");
        Ok(())
    }

    /// Open a live view of the session.
    pub async fn open_view(&self, session_id: Uuid) -> ClientResult<SessionView> {
        let user = self.ensure_authenticated().await?;
        SessionView::open(self.store.clone(), user, session_id, &self.config).await
    }

    pub fn invite_link(&self, code: &str) -> String {
        invite::invite_link(code, self.config.invite_link_domain.as_deref())
    }

    // -- Drink events --

    pub async fn add_drink_event(
        &self,
        session_id: Uuid,
        participant_id: Uuid,
        drink_type_id: Uuid,
        delta: Delta,
    ) -> ClientResult<DrinkEvent> {
        let user = self.ensure_authenticated().await?;
        let event = self
            .store
            .insert_drink_event(NewDrinkEvent {
                session_id,
                actor_user_id: user,
                target_participant_id: participant_id,
                drink_type_id,
                delta,
            })
            .await?;
        Ok(event)
    }

    // -- Drink types --

    pub async fn add_drink_type(&self, new: NewDrinkType) -> ClientResult<DrinkType> {
        let user = self.ensure_authenticated().await?;
        let mut inserted = self.store.insert_drink_types(user, vec![new]).await?;
        inserted
            .pop()
            .ok_or_else(|| ClientError::Store(onemore_types::StoreError::Backend("insert returned no row".into())))
    }

    pub async fn update_drink_type(&self, session_id: Uuid, drink_type_id: Uuid, patch: DrinkTypePatch) -> ClientResult<()> {
        let user = self.ensure_authenticated().await?;
        self.store.update_drink_type(user, session_id, drink_type_id, patch).await?;
        Ok(())
    }

    pub async fn delete_drink_type(&self, session_id: Uuid, drink_type_id: Uuid) -> ClientResult<()> {
        let user = self.ensure_authenticated().await?;
        self.store.delete_drink_type(user, session_id, drink_type_id).await?;
        Ok(())
    }

    /// Swap `sort_order` with the neighbor in `direction`. Nothing happens at
    /// either end or if the drink type is not in the session.
    pub async fn reorder_drink_type(&self, session_id: Uuid, drink_type_id: Uuid, direction: Direction) -> ClientResult<()> {
        let user = self.ensure_authenticated().await?;
        let sorted = self.store.list_drink_types(session_id).await?;

        let Some(index) = sorted.iter().position(|d| d.id == drink_type_id) else {
            debug!(%drink_type_id, "Reorder of unknown drink type ignored");
            return Ok(());
        };
        let neighbor = match direction {
            Direction::Up => index.checked_sub(1),
            Direction::Down => Some(index + 1).filter(|&i| i < sorted.len()),
        };
        let Some(neighbor) = neighbor else {
            return Ok(());
        };

        let (current, target) = (&sorted[index], &sorted[neighbor]);
        let sort_order = |order: i32| DrinkTypePatch {
            sort_order: Some(order),
            ..Default::default()
        };
        self.store
            .update_drink_type(user, session_id, current.id, sort_order(target.sort_order))
            .await?;
        self.store
            .update_drink_type(user, session_id, target.id, sort_order(current.sort_order))
            .await?;
        Ok(())
    }

    /// Save edited prices, given as typed text per drink type. Prices that
    /// did not change are not written. Returns how many were written.
    pub async fn save_prices(&self, session_id: Uuid, edits: &[(Uuid, String)]) -> ClientResult<usize> {
        let user = self.ensure_authenticated().await?;
        let drink_types = self.store.list_drink_types(session_id).await?;

        let mut written = 0;
        for (drink_type_id, text) in edits {
            let Some(drink_type) = drink_types.iter().find(|d| d.id == *drink_type_id) else {
                warn!(%drink_type_id, "Price edit for unknown drink type skipped");
                continue;
            };
            if let Some(patch) = balances::price_patch(drink_type, text) {
                self.store
                    .update_drink_type(user, session_id, drink_type.id, patch)
                    .await?;
                written += 1;
            }
        }
        Ok(written)
    }

    // -- Participants --

    pub async fn add_participant_slot(&self, session_id: Uuid, name: &str, color_index: Option<u32>) -> ClientResult<Participant> {
        self.ensure_authenticated().await?;
        let mut inserted = self
            .store
            .insert_participants(vec![NewParticipant {
                session_id,
                display_name: name.to_string(),
                claimed_by_user_id: None,
                color_index,
            }])
            .await?;
        inserted
            .pop()
            .ok_or_else(|| ClientError::Store(onemore_types::StoreError::Backend("insert returned no row".into())))
    }

    pub async fn remove_participant_slot(&self, session_id: Uuid, participant_id: Uuid) -> ClientResult<()> {
        let user = self.ensure_authenticated().await?;
        self.store.delete_participant(user, session_id, participant_id).await?;
        Ok(())
    }

    pub async fn update_participant(&self, session_id: Uuid, participant_id: Uuid, patch: ParticipantPatch) -> ClientResult<()> {
        let user = self.ensure_authenticated().await?;
        self.store
            .update_participant(user, session_id, participant_id, patch)
            .await?;
        Ok(())
    }

    /// Claim a slot for the current user. Only one user ever gets it.
    pub async fn claim_participant(&self, participant_id: Uuid) -> ClientResult<Participant> {
        let user = self.ensure_authenticated().await?;
        let mut changed = self.store.claim_participant(user, participant_id).await?;
        match changed.pop() {
            Some(p) => {
                debug!(%participant_id, %user, "Claim granted");
                Ok(p)
            }
            None => {
                debug!(%participant_id, "Participant was already claimed");
                Err(ClientError::AlreadyClaimed)
            }
        }
    }
}
