//! Live, optimistic view of one session.
//!
//! Local changes show up immediately as tentative rows and are written in the
//! background. Confirmed rows arrive on the change feed and replace them. One
//! engine task per view handles the feed, reloads and the activity sweep in
//! order, so a reload never races a feed merge. Background writes are not
//! cancelled by closing the view; `settle` waits for them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use onemore_types::events::{ChangeKind, ChangeStream, FeedFilter, FeedItem, Record, Table};
use onemore_types::models::{
    Delta, DrinkEvent, DrinkType, NewDrinkEvent, NewParticipant, Participant, Session, UserId,
};
use onemore_types::{RemoteStore, StoreResult, palette};

use crate::activity::{Activity, ActivityMarkers};
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::names;
use crate::reconcile::{
    self, ColorTable, LocalEvent, LocalParticipant, Merge, RowKey, TentativeId, WriteStatus,
};

/// Non-fatal things the user should hear about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// A drink event could not be written and was taken back out.
    WriteRolledBack {
        tentative: TentativeId,
        participant_id: Uuid,
        reason: String,
    },
    /// A new participant could not be written and was removed.
    ParticipantRolledBack {
        tentative: TentativeId,
        display_name: String,
        reason: String,
    },
    ReloadFailed(String),
    /// The owner deleted the session. The view has stopped.
    SessionDeleted,
}

/// One participant card as it should be rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantCard {
    pub key: RowKey,
    pub display_name: String,
    pub claimed_by_user_id: Option<UserId>,
    pub color_index: u32,
    pub color: &'static str,
    pub text_color: &'static str,
    /// Drinks across all drink types.
    pub total: i64,
    /// Still tentative.
    pub pending: bool,
    pub activity: Option<Activity>,
}

#[derive(Debug, Clone)]
pub struct ViewSnapshot {
    pub session: Option<Session>,
    pub is_owner: bool,
    /// The participant the current user claimed, if any.
    pub current_participant_id: Option<Uuid>,
    pub participants: Vec<ParticipantCard>,
    pub drink_types: Vec<DrinkType>,
    pub events: Vec<LocalEvent>,
}

#[derive(Debug, Default)]
struct TallyState {
    session: Option<Session>,
    participants: Vec<LocalParticipant>,
    drink_types: Vec<DrinkType>,
    events: Vec<LocalEvent>,
    colors: ColorTable,
    activity: ActivityMarkers,
}

impl TallyState {
    fn is_owner(&self, user: UserId) -> bool {
        self.session.as_ref().is_some_and(|s| s.owner_user_id == user)
    }

    fn claimed_by(&self, user: UserId) -> Option<Uuid> {
        self.participants
            .iter()
            .find(|p| p.claimed_by_user_id == Some(user))
            .and_then(|p| p.key.remote())
    }

    fn resolve_participant(&self, key: RowKey) -> ClientResult<Uuid> {
        let participant = self
            .participants
            .iter()
            .find(|p| p.key == key)
            .ok_or_else(|| ClientError::UnknownParticipant(key.to_string()))?;

        match participant.key {
            RowKey::Remote(id) => Ok(id),
            RowKey::Tentative(id) => Err(ClientError::ParticipantPending(id.to_string())),
        }
    }

    fn resolve_drink_type(&self, requested: Option<Uuid>) -> ClientResult<Uuid> {
        match (requested, self.drink_types.as_slice()) {
            (_, []) => Err(ClientError::NoDrinkTypes),
            (Some(id), types) => types
                .iter()
                .find(|d| d.id == id)
                .map(|d| d.id)
                .ok_or(ClientError::UnknownDrinkType(id)),
            (None, [only]) => Ok(only.id),
            (None, _) => Err(ClientError::DrinkTypeRequired),
        }
    }

    fn card(&self, position: usize, p: &LocalParticipant) -> ParticipantCard {
        let color_index = self
            .colors
            .get(&p.key)
            .or(p.color_index)
            .unwrap_or(position as u32);
        let color = palette::color_for(color_index);
        let (total, activity) = match p.key {
            RowKey::Remote(id) => (reconcile::count(&self.events, id, None), self.activity.get(&id)),
            RowKey::Tentative(_) => (0, None),
        };

        ParticipantCard {
            key: p.key,
            display_name: p.display_name.clone(),
            claimed_by_user_id: p.claimed_by_user_id,
            color_index,
            color,
            text_color: palette::text_color_for(color),
            total,
            pending: p.status != WriteStatus::Confirmed,
            activity,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Timings {
    event_window: Duration,
    participant_window: Duration,
    activity_ttl: Duration,
    sweep_interval: Duration,
}

impl From<&ClientConfig> for Timings {
    fn from(config: &ClientConfig) -> Self {
        Self {
            event_window: config.event_match_window,
            participant_window: config.participant_match_window,
            activity_ttl: config.activity_ttl,
            sweep_interval: config.sweep_interval,
        }
    }
}

/// A reload request; the outcome goes back on the channel.
type ReloadRequest = oneshot::Sender<ClientResult<()>>;

struct Feeds {
    session: ChangeStream,
    participants: ChangeStream,
    drink_types: ChangeStream,
    events: ChangeStream,
}

impl Feeds {
    async fn subscribe(store: &dyn RemoteStore, session_id: Uuid) -> StoreResult<Self> {
        Ok(Self {
            session: store.subscribe(FeedFilter::session(Table::Sessions, session_id)).await?,
            participants: store.subscribe(FeedFilter::session(Table::Participants, session_id)).await?,
            drink_types: store.subscribe(FeedFilter::session(Table::DrinkTypes, session_id)).await?,
            events: store.subscribe(FeedFilter::session(Table::DrinkEvents, session_id)).await?,
        })
    }
}

enum FeedAction {
    Nothing,
    Reload,
    SessionDeleted,
}

struct ViewInner {
    store: Arc<dyn RemoteStore>,
    session_id: Uuid,
    user_id: UserId,
    timings: Timings,
    state: Mutex<TallyState>,
    notices: mpsc::UnboundedSender<Notice>,
    reloads: mpsc::UnboundedSender<ReloadRequest>,
    cancel: CancellationToken,
    writes: TaskTracker,
    next_tentative: AtomicU64,
    /// Bumped each time a drink event write finishes.
    write_generation: AtomicU64,
}

impl ViewInner {
    fn lock(&self) -> MutexGuard<'_, TallyState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_tentative_id(&self) -> TentativeId {
        TentativeId(self.next_tentative.fetch_add(1, Ordering::Relaxed))
    }

    fn notify(&self, notice: Notice) {
        let _ = self.notices.send(notice);
    }

    async fn run(self: Arc<Self>, mut feeds: Feeds, mut reloads: mpsc::UnboundedReceiver<ReloadRequest>) {
        let mut sweep = tokio::time::interval(self.timings.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut reload_due = false;

        loop {
            let action = tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break,

                Some(reply) = reloads.recv() => {
                    reload_due = false;
                    let _ = reply.send(self.reload().await);
                    FeedAction::Nothing
                }

                Some(item) = feeds.session.next() => self.on_feed_item(item),
                Some(item) = feeds.participants.next() => self.on_feed_item(item),
                Some(item) = feeds.drink_types.next() => self.on_feed_item(item),
                Some(item) = feeds.events.next() => self.on_feed_item(item),

                // Runs once the feeds are drained, so a burst of changes
                // costs one reload.
                _ = std::future::ready(()), if reload_due => {
                    reload_due = false;
                    let result = self.reload().await;
                    self.report_reload(result);
                    FeedAction::Nothing
                }

                _ = sweep.tick() => {
                    let removed = self.lock().activity.sweep(Instant::now(), self.timings.activity_ttl);
                    if removed > 0 {
                        trace!(removed, "Swept activity markers");
                    }
                    FeedAction::Nothing
                }
            };

            match action {
                FeedAction::Nothing => {}
                FeedAction::Reload => reload_due = true,
                FeedAction::SessionDeleted => {
                    info!(session_id = %self.session_id, "Session was deleted");
                    self.notify(Notice::SessionDeleted);
                    self.cancel.cancel();
                    break;
                }
            }
        }

        debug!(session_id = %self.session_id, "Session view engine stopped");
    }

    fn on_feed_item(&self, item: FeedItem) -> FeedAction {
        let change = match item {
            FeedItem::Change(change) => change,
            FeedItem::Lagged(missed) => {
                warn!(session_id = %self.session_id, missed, "Change feed lagged, reloading");
                return FeedAction::Reload;
            }
        };

        match (change.kind, change.record) {
            (ChangeKind::Insert, Record::DrinkEvent(event)) => {
                self.merge_event(&event);
                FeedAction::Nothing
            }
            (ChangeKind::Delete, Record::Session(_)) => FeedAction::SessionDeleted,
            (ChangeKind::Delete, Record::Participant(p)) => {
                self.lock().activity.forget(&p.id);
                FeedAction::Reload
            }
            (kind, record) => {
                trace!(table = record.table().as_str(), ?kind, "Change requires reload");
                FeedAction::Reload
            }
        }
    }

    fn merge_event(&self, event: &DrinkEvent) {
        let mut state = self.lock();
        match reconcile::merge_confirmed_event(&mut state.events, event, self.timings.event_window) {
            Merge::Replaced(tentative) => {
                debug!(%tentative, event_id = %event.id, "Drink event confirmed");
            }
            Merge::Appended => {
                state.activity.record(event.target_participant_id, Instant::now());
                debug!(event_id = %event.id, participant_id = %event.target_participant_id, "Drink event from elsewhere");
            }
            Merge::AlreadyPresent => {}
        }
    }

    /// Fetch everything and reconcile local state against it.
    async fn reload(&self) -> ClientResult<()> {
        let id = self.session_id;
        let store = self.store.as_ref();
        let loaded_at = self.write_generation.load(Ordering::SeqCst);
        let (session, participants, drink_types, events) = tokio::try_join!(
            store.get_session(id),
            store.list_participants(id),
            store.list_drink_types(id),
            store.list_drink_events(id),
        )?;
        let session = session.ok_or_else(|| ClientError::SessionNotFound(id.to_string()))?;

        let mut guard = self.lock();
        let state = &mut *guard;
        state.participants = reconcile::reconcile_participants(
            &state.participants,
            &participants,
            &mut state.colors,
            self.timings.participant_window,
        );
        state.events =
            reconcile::reconcile_events(&state.events, &events, loaded_at, self.timings.event_window);
        state.drink_types = drink_types;
        state.session = Some(session);

        debug!(
            session_id = %id,
            participants = state.participants.len(),
            drink_types = state.drink_types.len(),
            events = state.events.len(),
            "Session reloaded"
        );
        Ok(())
    }

    fn report_reload(&self, result: ClientResult<()>) {
        if let Err(e) = result {
            warn!(session_id = %self.session_id, "Reload failed: {}", e);
            self.notify(Notice::ReloadFailed(e.to_string()));
        }
    }

    /// Ask the engine for a reload and wait until it has been applied.
    async fn request_reload(&self) -> ClientResult<()> {
        let (reply, outcome) = oneshot::channel();
        self.reloads.send(reply).map_err(|_| ClientError::Closed)?;
        outcome.await.map_err(|_| ClientError::Closed)?
    }

    fn finish_event_write(&self, local: &LocalEvent, tentative: TentativeId, result: StoreResult<DrinkEvent>) {
        match result {
            Ok(event) => {
                let generation = self.write_generation.fetch_add(1, Ordering::SeqCst) + 1;
                if reconcile::mark_event_written(&mut self.lock().events, tentative, generation) {
                    trace!(%tentative, event_id = %event.id, "Drink event written");
                }
            }
            Err(e) => {
                let removed =
                    reconcile::roll_back_event(&mut self.lock().events, local, self.timings.event_window);
                warn!(%tentative, rolled_back = removed.is_some(), "Drink event write failed: {}", e);
                self.notify(Notice::WriteRolledBack {
                    tentative,
                    participant_id: local.target_participant_id,
                    reason: e.to_string(),
                });
            }
        }
    }

    async fn finish_participant_write(
        &self,
        tentative: TentativeId,
        display_name: String,
        result: StoreResult<Vec<Participant>>,
    ) {
        match result {
            Ok(_) => self.mark_participant_written(tentative),
            Err(e) if e.is_unique_violation() => {
                info!(%tentative, name = %display_name, "Participant already exists, resyncing");
                self.mark_participant_written(tentative);
            }
            Err(e) => {
                {
                    let mut state = self.lock();
                    let key = RowKey::Tentative(tentative);
                    state.participants.retain(|p| p.key != key);
                    state.colors.remove(&key);
                }
                warn!(%tentative, name = %display_name, "Participant write failed: {}", e);
                self.notify(Notice::ParticipantRolledBack {
                    tentative,
                    display_name,
                    reason: e.to_string(),
                });
                return;
            }
        }

        match self.request_reload().await {
            Ok(()) | Err(ClientError::Closed) => {}
            Err(e) => {
                warn!(session_id = %self.session_id, "Reload after participant insert failed: {}", e);
                self.notify(Notice::ReloadFailed(e.to_string()));
            }
        }
    }

    fn mark_participant_written(&self, tentative: TentativeId) {
        let key = RowKey::Tentative(tentative);
        if let Some(p) = self.lock().participants.iter_mut().find(|p| p.key == key) {
            p.status = WriteStatus::Written;
        }
    }
}

/// Handle to a live session. Dropping it (or `close`) stops the change feed
/// subscriptions and timers.
pub struct SessionView {
    inner: Arc<ViewInner>,
    notices: tokio::sync::Mutex<mpsc::UnboundedReceiver<Notice>>,
}

impl SessionView {
    /// Subscribe to the session's changes, load it, and start the engine.
    pub async fn open(
        store: Arc<dyn RemoteStore>,
        user_id: UserId,
        session_id: Uuid,
        config: &ClientConfig,
    ) -> ClientResult<Self> {
        // Subscribe before loading so nothing falls between the two
        let feeds = Feeds::subscribe(store.as_ref(), session_id).await?;

        let (notice_tx, notice_rx) = mpsc::unbounded_channel();
        let (reload_tx, reload_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(ViewInner {
            store,
            session_id,
            user_id,
            timings: Timings::from(config),
            state: Mutex::new(TallyState::default()),
            notices: notice_tx,
            reloads: reload_tx,
            cancel: CancellationToken::new(),
            writes: TaskTracker::new(),
            next_tentative: AtomicU64::new(1),
            write_generation: AtomicU64::new(0),
        });

        inner.reload().await?;
        tokio::spawn(inner.clone().run(feeds, reload_rx));

        info!(%session_id, %user_id, "Session view opened");
        Ok(Self {
            inner,
            notices: tokio::sync::Mutex::new(notice_rx),
        })
    }

    pub fn session_id(&self) -> Uuid {
        self.inner.session_id
    }

    pub fn user_id(&self) -> UserId {
        self.inner.user_id
    }

    fn ensure_open(&self) -> ClientResult<()> {
        if self.inner.cancel.is_cancelled() {
            return Err(ClientError::Closed);
        }
        Ok(())
    }

    pub fn increment(&self, participant: impl Into<RowKey>, drink_type: Option<Uuid>) -> ClientResult<TentativeId> {
        self.add_drink(participant, drink_type, Delta::Increment)
    }

    pub fn decrement(&self, participant: impl Into<RowKey>, drink_type: Option<Uuid>) -> ClientResult<TentativeId> {
        self.add_drink(participant, drink_type, Delta::Decrement)
    }

    /// Count a drink now and write it in the background.
    ///
    /// Without a drink type the session's only drink type is used. The owner
    /// may count for anyone; a user who claimed a participant only for that
    /// participant.
    pub fn add_drink(
        &self,
        participant: impl Into<RowKey>,
        drink_type: Option<Uuid>,
        delta: Delta,
    ) -> ClientResult<TentativeId> {
        self.ensure_open()?;
        let inner = &self.inner;

        let (tentative, local) = {
            let mut state = inner.lock();
            let participant_id = state.resolve_participant(participant.into())?;
            let counts_for_other = state
                .claimed_by(inner.user_id)
                .is_some_and(|mine| mine != participant_id);
            if counts_for_other && !state.is_owner(inner.user_id) {
                return Err(ClientError::NotPermitted);
            }
            let drink_type_id = state.resolve_drink_type(drink_type)?;

            let tentative = inner.next_tentative_id();
            let local = LocalEvent::tentative(tentative, participant_id, drink_type_id, delta, Utc::now());
            state.events.push(local.clone());
            (tentative, local)
        };

        debug!(%tentative, participant_id = %local.target_participant_id, delta = delta.value(), "Drink counted locally");

        let new = NewDrinkEvent {
            session_id: inner.session_id,
            actor_user_id: inner.user_id,
            target_participant_id: local.target_participant_id,
            drink_type_id: local.drink_type_id,
            delta,
        };
        let task = inner.clone();
        inner.writes.spawn(async move {
            let result = task.store.insert_drink_event(new).await;
            task.finish_event_write(&local, tentative, result);
        });

        Ok(tentative)
    }

    /// Add a participant now (owner only) and write it in the background.
    /// Without a name the next free name from the pool is used.
    pub fn add_participant(&self, name: Option<&str>) -> ClientResult<TentativeId> {
        self.ensure_open()?;
        let inner = &self.inner;

        let (tentative, display_name, color) = {
            let mut state = inner.lock();
            if !state.is_owner(inner.user_id) {
                return Err(ClientError::NotOwner);
            }

            let display_name = match name.map(str::trim) {
                Some("") => return Err(ClientError::InvalidName),
                Some(name) => name.to_string(),
                None => {
                    let existing: Vec<&str> =
                        state.participants.iter().map(|p| p.display_name.as_str()).collect();
                    names::next_name(&existing)
                }
            };

            let created_at = Utc::now();
            let color = reconcile::tentative_color(&state.participants, created_at);
            let tentative = inner.next_tentative_id();
            state.colors.set(RowKey::Tentative(tentative), color);
            state
                .participants
                .push(LocalParticipant::tentative(tentative, display_name.clone(), color, created_at));
            (tentative, display_name, color)
        };

        debug!(%tentative, name = %display_name, color, "Participant added locally");

        let new = NewParticipant {
            session_id: inner.session_id,
            display_name: display_name.clone(),
            claimed_by_user_id: None,
            color_index: Some(color),
        };
        let task = inner.clone();
        inner.writes.spawn(async move {
            let result = task.store.insert_participants(vec![new]).await;
            task.finish_participant_write(tentative, display_name, result).await;
        });

        Ok(tentative)
    }

    /// Force an authoritative reload and wait for it to be applied.
    pub async fn reload(&self) -> ClientResult<()> {
        self.ensure_open()?;
        self.inner.request_reload().await
    }

    /// Wait until every background write started so far has finished,
    /// including the reloads they trigger.
    pub async fn settle(&self) {
        let writes = &self.inner.writes;
        writes.close();
        writes.wait().await;
        writes.reopen();
    }

    pub fn pending_writes(&self) -> usize {
        self.inner.writes.len()
    }

    pub fn snapshot(&self) -> ViewSnapshot {
        let state = self.inner.lock();
        let user = self.inner.user_id;

        ViewSnapshot {
            session: state.session.clone(),
            is_owner: state.is_owner(user),
            current_participant_id: state.claimed_by(user),
            participants: state
                .participants
                .iter()
                .enumerate()
                .map(|(i, p)| state.card(i, p))
                .collect(),
            drink_types: state.drink_types.clone(),
            events: state.events.clone(),
        }
    }

    /// Displayed count for a participant, optionally for one drink type.
    pub fn count(&self, participant: impl Into<RowKey>, drink_type: Option<Uuid>) -> i64 {
        match participant.into() {
            RowKey::Remote(id) => reconcile::count(&self.inner.lock().events, id, drink_type),
            RowKey::Tentative(_) => 0,
        }
    }

    pub fn color_of(&self, participant: impl Into<RowKey>) -> Option<u32> {
        self.inner.lock().colors.get(&participant.into())
    }

    pub fn participants(&self) -> Vec<LocalParticipant> {
        self.inner.lock().participants.clone()
    }

    pub fn events(&self) -> Vec<LocalEvent> {
        self.inner.lock().events.clone()
    }

    pub fn drink_types(&self) -> Vec<DrinkType> {
        self.inner.lock().drink_types.clone()
    }

    pub fn activity(&self, participant_id: Uuid) -> Option<Activity> {
        self.inner.lock().activity.get(&participant_id)
    }

    /// Next notice, waiting until one arrives.
    pub async fn next_notice(&self) -> Option<Notice> {
        self.notices.lock().await.recv().await
    }

    /// Next notice if one is already queued.
    pub fn try_notice(&self) -> Option<Notice> {
        self.notices.try_lock().ok()?.try_recv().ok()
    }

    /// Stop the feed subscriptions and timers. Background writes already
    /// started still complete.
    pub fn close(&self) {
        if !self.inner.cancel.is_cancelled() {
            debug!(session_id = %self.inner.session_id, "Closing session view");
            self.inner.cancel.cancel();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }
}

impl Drop for SessionView {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}
