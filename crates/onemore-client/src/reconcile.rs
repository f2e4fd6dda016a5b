//! Pure reconciliation of optimistic local rows against confirmed rows.
//!
//! Nothing here touches the network or a clock: the live view owns the
//! state and calls these functions while holding its lock.
//!
//! Tentative rows carry locally generated ids and never reach the store.
//! They are matched to confirmed rows heuristically: drink events by
//! (participant, drink type, delta) within a time window, participants by
//! display name within a wider one. Tentative events with the same
//! (participant, drink type, delta) are treated as interchangeable.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use onemore_types::models::{Delta, DrinkEvent, Participant, UserId};

/// Locally generated id of a row that only exists on this device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TentativeId(pub u64);

impl fmt::Display for TentativeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "temp-{}", self.0)
    }
}

/// Identity of a row in local state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowKey {
    Remote(Uuid),
    Tentative(TentativeId),
}

impl RowKey {
    pub fn remote(&self) -> Option<Uuid> {
        match self {
            Self::Remote(id) => Some(*id),
            Self::Tentative(_) => None,
        }
    }

    pub fn is_tentative(&self) -> bool {
        matches!(self, Self::Tentative(_))
    }
}

impl From<Uuid> for RowKey {
    fn from(id: Uuid) -> Self {
        Self::Remote(id)
    }
}

impl From<TentativeId> for RowKey {
    fn from(id: TentativeId) -> Self {
        Self::Tentative(id)
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote(id) => write!(f, "{}", id),
            Self::Tentative(id) => write!(f, "{}", id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    /// Tentative, background write not finished.
    InFlight,
    /// Tentative, background write succeeded; waiting for the confirmed row.
    Written,
    /// The row came from the store.
    Confirmed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalEvent {
    pub key: RowKey,
    pub target_participant_id: Uuid,
    pub drink_type_id: Uuid,
    pub delta: Delta,
    pub created_at: DateTime<Utc>,
    pub status: WriteStatus,
    /// Write generation at which the background write finished.
    pub written_in: Option<u64>,
}

impl LocalEvent {
    pub fn tentative(
        id: TentativeId,
        target_participant_id: Uuid,
        drink_type_id: Uuid,
        delta: Delta,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            key: RowKey::Tentative(id),
            target_participant_id,
            drink_type_id,
            delta,
            created_at,
            status: WriteStatus::InFlight,
            written_in: None,
        }
    }

    pub fn confirmed(event: &DrinkEvent) -> Self {
        Self {
            key: RowKey::Remote(event.id),
            target_participant_id: event.target_participant_id,
            drink_type_id: event.drink_type_id,
            delta: event.delta,
            created_at: event.created_at,
            status: WriteStatus::Confirmed,
            written_in: None,
        }
    }

    fn same_signature(&self, other: &LocalEvent, window: Duration) -> bool {
        self.target_participant_id == other.target_participant_id
            && self.drink_type_id == other.drink_type_id
            && self.delta == other.delta
            && gap(self.created_at, other.created_at) < window
    }

    /// Whether `event` may be the confirmed row of this tentative event.
    fn matches(&self, event: &DrinkEvent, window: Duration) -> bool {
        self.key.is_tentative()
            && self.target_participant_id == event.target_participant_id
            && self.drink_type_id == event.drink_type_id
            && self.delta == event.delta
            && gap(self.created_at, event.created_at) < window
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalParticipant {
    pub key: RowKey,
    pub display_name: String,
    pub claimed_by_user_id: Option<UserId>,
    pub color_index: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub status: WriteStatus,
}

impl LocalParticipant {
    pub fn tentative(
        id: TentativeId,
        display_name: String,
        color_index: u32,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            key: RowKey::Tentative(id),
            display_name,
            claimed_by_user_id: None,
            color_index: Some(color_index),
            created_at,
            status: WriteStatus::InFlight,
        }
    }

    pub fn confirmed(p: &Participant) -> Self {
        Self {
            key: RowKey::Remote(p.id),
            display_name: p.display_name.clone(),
            claimed_by_user_id: p.claimed_by_user_id,
            color_index: p.color_index,
            created_at: p.created_at,
            status: WriteStatus::Confirmed,
        }
    }
}

/// Stable palette index per participant, tentative or confirmed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColorTable {
    colors: HashMap<RowKey, u32>,
}

impl ColorTable {
    pub fn get(&self, key: &RowKey) -> Option<u32> {
        self.colors.get(key).copied()
    }

    pub fn set(&mut self, key: RowKey, color: u32) {
        self.colors.insert(key, color);
    }

    pub fn remove(&mut self, key: &RowKey) -> Option<u32> {
        self.colors.remove(key)
    }

    pub fn contains(&self, key: &RowKey) -> bool {
        self.colors.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    fn retain(&mut self, live: &HashSet<RowKey>) {
        self.colors.retain(|key, _| live.contains(key));
    }
}

/// Outcome of merging one confirmed drink event from the change feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Merge {
    /// The event confirmed a pending local event, which it replaced.
    Replaced(TentativeId),
    /// Nothing local matched: someone else's event, or a late confirmation.
    Appended,
    /// Already known by id.
    AlreadyPresent,
}

pub fn merge_confirmed_event(events: &mut Vec<LocalEvent>, incoming: &DrinkEvent, window: Duration) -> Merge {
    let key = RowKey::Remote(incoming.id);
    if events.iter().any(|e| e.key == key) {
        return Merge::AlreadyPresent;
    }

    let slot = events.iter().position(|e| e.matches(incoming, window));
    match slot.map(|i| (i, events[i].key)) {
        Some((i, RowKey::Tentative(id))) => {
            events[i] = LocalEvent::confirmed(incoming);
            Merge::Replaced(id)
        }
        _ => {
            events.push(LocalEvent::confirmed(incoming));
            Merge::Appended
        }
    }
}

/// Mark a tentative event's write as finished in write generation
/// `generation`. Returns false if it is no longer pending (already replaced
/// by its confirmed row).
pub fn mark_event_written(events: &mut [LocalEvent], id: TentativeId, generation: u64) -> bool {
    let key = RowKey::Tentative(id);
    match events.iter_mut().find(|e| e.key == key) {
        Some(e) => {
            e.status = WriteStatus::Written;
            e.written_in = Some(generation);
            true
        }
        None => false,
    }
}

/// Undo a tentative event whose write failed.
///
/// If the event itself is gone, a confirmed row with its signature took its
/// place while the row's own tentative event is still pending; that one is
/// removed instead so no ghost remains.
pub fn roll_back_event(events: &mut Vec<LocalEvent>, failed: &LocalEvent, window: Duration) -> Option<LocalEvent> {
    let position = events
        .iter()
        .position(|e| e.key == failed.key)
        .or_else(|| {
            events
                .iter()
                .position(|e| e.key.is_tentative() && e.same_signature(failed, window))
        })?;
    Some(events.remove(position))
}

/// Rebuild the event list from a fresh load whose reads started at write
/// generation `loaded_at`.
///
/// Tentative events whose write finished by `loaded_at` are dropped; their
/// confirmed row is in the load. The others survive unless a row that was
/// not known before matches them; a write that finished during the load
/// waits for its row on the feed.
pub fn reconcile_events(
    current: &[LocalEvent],
    loaded: &[DrinkEvent],
    loaded_at: u64,
    window: Duration,
) -> Vec<LocalEvent> {
    let known: HashSet<Uuid> = current.iter().filter_map(|e| e.key.remote()).collect();
    let mut unclaimed: Vec<&DrinkEvent> = loaded.iter().filter(|e| !known.contains(&e.id)).collect();

    let mut claim = |e: &LocalEvent| match unclaimed.iter().position(|l| e.matches(l, window)) {
        Some(i) => {
            unclaimed.remove(i);
            true
        }
        None => false,
    };

    let in_load = |e: &LocalEvent| e.written_in.is_some_and(|g| g <= loaded_at);

    // Finished writes claim their rows first so an in-flight twin is not
    // mistaken for them.
    for e in current.iter().filter(|e| in_load(e)) {
        claim(e);
    }

    let mut next: Vec<LocalEvent> = loaded.iter().map(LocalEvent::confirmed).collect();
    for e in current.iter().filter(|e| e.key.is_tentative() && !in_load(e)) {
        if !claim(e) {
            next.push(e.clone());
        }
    }
    next
}

/// Rebuild the participant list from a fresh load and settle colors.
///
/// Each tentative participant is mapped to the closest loaded participant
/// with the same name created within `window`, preferring one that has no
/// color yet. A mapped tentative hands its color to the loaded id. Colors
/// then come from, in order: the stored color index, a handed-over color, an
/// existing entry, the position by creation time.
pub fn reconcile_participants(
    current: &[LocalParticipant],
    loaded: &[Participant],
    colors: &mut ColorTable,
    window: Duration,
) -> Vec<LocalParticipant> {
    let mut mapping: Vec<(TentativeId, Uuid)> = Vec::new();
    let mut taken: HashSet<Uuid> = HashSet::new();

    for local in current {
        let RowKey::Tentative(tentative) = local.key else {
            continue;
        };

        let mut candidates: Vec<&Participant> = loaded
            .iter()
            .filter(|p| {
                p.display_name == local.display_name
                    && !taken.contains(&p.id)
                    && gap(p.created_at, local.created_at) <= window
            })
            .collect();
        candidates.sort_by_key(|p| gap(p.created_at, local.created_at));

        let best = candidates
            .iter()
            .find(|p| !colors.contains(&RowKey::Remote(p.id)))
            .or(candidates.first());
        if let Some(p) = best {
            taken.insert(p.id);
            mapping.push((tentative, p.id));
        }
    }

    let mut handed_over: HashSet<Uuid> = HashSet::new();
    for (tentative, real) in &mapping {
        if let Some(color) = colors.remove(&RowKey::Tentative(*tentative)) {
            colors.set(RowKey::Remote(*real), color);
            handed_over.insert(*real);
        }
    }

    let mut by_creation: Vec<&Participant> = loaded.iter().collect();
    by_creation.sort_by_key(|p| p.created_at);
    for (position, p) in by_creation.iter().enumerate() {
        let key = RowKey::Remote(p.id);
        match p.color_index {
            Some(color) => colors.set(key, color),
            None if handed_over.contains(&p.id) || colors.contains(&key) => {}
            None => colors.set(key, position as u32),
        }
    }

    let mapped: HashSet<TentativeId> = mapping.iter().map(|(t, _)| *t).collect();
    let mut next: Vec<LocalParticipant> = loaded.iter().map(LocalParticipant::confirmed).collect();
    for local in current {
        let keep = match local.key {
            RowKey::Tentative(id) => !mapped.contains(&id) && local.status == WriteStatus::InFlight,
            RowKey::Remote(_) => false,
        };
        if keep {
            next.push(local.clone());
        }
    }

    let live: HashSet<RowKey> = next.iter().map(|p| p.key).collect();
    colors.retain(&live);
    next
}

/// Color for a participant created at `created_at`: its position among the
/// existing participants ordered by creation time.
pub fn tentative_color(participants: &[LocalParticipant], created_at: DateTime<Utc>) -> u32 {
    participants.iter().filter(|p| p.created_at <= created_at).count() as u32
}

/// Sum of deltas for a participant, optionally narrowed to one drink type.
pub fn count(events: &[LocalEvent], participant_id: Uuid, drink_type_id: Option<Uuid>) -> i64 {
    events
        .iter()
        .filter(|e| e.target_participant_id == participant_id)
        .filter(|e| drink_type_id.is_none_or(|d| e.drink_type_id == d))
        .map(|e| e.delta.value())
        .sum()
}

fn gap(a: DateTime<Utc>, b: DateTime<Utc>) -> Duration {
    let (later, earlier) = if a >= b { (a, b) } else { (b, a) };
    (later - earlier).to_std().unwrap_or(Duration::MAX)
}
