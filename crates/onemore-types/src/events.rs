use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::models::{DrinkEvent, DrinkType, Participant, Session};

/// Tables that publish change notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Sessions,
    Participants,
    DrinkTypes,
    DrinkEvents,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sessions => "sessions",
            Self::Participants => "participants",
            Self::DrinkTypes => "drink_types",
            Self::DrinkEvents => "drink_events",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// The row carried by a change. For deletes this is the old row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "table", content = "row", rename_all = "snake_case")]
pub enum Record {
    Session(Session),
    Participant(Participant),
    DrinkType(DrinkType),
    DrinkEvent(DrinkEvent),
}

impl Record {
    pub fn table(&self) -> Table {
        match self {
            Self::Session(_) => Table::Sessions,
            Self::Participant(_) => Table::Participants,
            Self::DrinkType(_) => Table::DrinkTypes,
            Self::DrinkEvent(_) => Table::DrinkEvents,
        }
    }

    /// Session the row belongs to. For sessions this is their own id.
    pub fn session_id(&self) -> Uuid {
        match self {
            Self::Session(s) => s.id,
            Self::Participant(p) => p.session_id,
            Self::DrinkType(d) => d.session_id,
            Self::DrinkEvent(e) => e.session_id,
        }
    }
}

/// A single insert/update/delete notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub record: Record,
}

impl ChangeEvent {
    pub fn insert(record: Record) -> Self {
        Self { kind: ChangeKind::Insert, record }
    }

    pub fn update(record: Record) -> Self {
        Self { kind: ChangeKind::Update, record }
    }

    pub fn delete(record: Record) -> Self {
        Self { kind: ChangeKind::Delete, record }
    }

    pub fn table(&self) -> Table {
        self.record.table()
    }

    pub fn session_id(&self) -> Uuid {
        self.record.session_id()
    }
}

/// Which notifications a subscriber wants: one table, optionally narrowed
/// to a single session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedFilter {
    pub table: Table,
    pub session_id: Option<Uuid>,
}

impl FeedFilter {
    pub fn table(table: Table) -> Self {
        Self { table, session_id: None }
    }

    pub fn session(table: Table, session_id: Uuid) -> Self {
        Self { table, session_id: Some(session_id) }
    }

    pub fn matches(&self, event: &ChangeEvent) -> bool {
        if event.table() != self.table {
            return false;
        }
        match self.session_id {
            Some(id) => event.session_id() == id,
            None => true,
        }
    }

    /// Channel name in the `<table>:<session>` form used in logs.
    pub fn channel_name(&self) -> String {
        match self.session_id {
            Some(id) => format!("{}:{}", self.table.as_str(), id),
            None => self.table.as_str().to_string(),
        }
    }
}

/// What a subscriber receives. `Lagged` means notifications were dropped
/// and local state can no longer be trusted without a reload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedItem {
    Change(ChangeEvent),
    Lagged(u64),
}

/// Receiving half of a subscription. Dropping it ends the subscription.
#[derive(Debug)]
pub struct ChangeStream {
    rx: mpsc::Receiver<FeedItem>,
}

impl ChangeStream {
    pub fn new(rx: mpsc::Receiver<FeedItem>) -> Self {
        Self { rx }
    }

    /// Next notification, or `None` once the feed has shut down.
    pub async fn next(&mut self) -> Option<FeedItem> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Delta, DrinkEvent};
    use chrono::Utc;

    fn event_in(session_id: Uuid) -> ChangeEvent {
        ChangeEvent::insert(Record::DrinkEvent(DrinkEvent {
            id: Uuid::new_v4(),
            session_id,
            actor_user_id: Uuid::new_v4(),
            target_participant_id: Uuid::new_v4(),
            drink_type_id: Uuid::new_v4(),
            delta: Delta::Increment,
            created_at: Utc::now(),
        }))
    }

    #[test]
    fn filter_narrows_by_table_and_session() {
        let session = Uuid::new_v4();
        let event = event_in(session);

        assert!(FeedFilter::table(Table::DrinkEvents).matches(&event));
        assert!(FeedFilter::session(Table::DrinkEvents, session).matches(&event));
        assert!(!FeedFilter::session(Table::DrinkEvents, Uuid::new_v4()).matches(&event));
        assert!(!FeedFilter::session(Table::Participants, session).matches(&event));
    }

    #[test]
    fn channel_name_includes_session() {
        let session = Uuid::nil();
        assert_eq!(
            FeedFilter::session(Table::DrinkTypes, session).channel_name(),
            format!("drink_types:{}", session)
        );
        assert_eq!(FeedFilter::table(Table::Sessions).channel_name(), "sessions");
    }

    #[test]
    fn change_event_json_shape() {
        let event = event_in(Uuid::nil());
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "INSERT");
        assert_eq!(json["record"]["table"], "drink_event");
        assert_eq!(json["record"]["row"]["delta"], 1);
    }
}
