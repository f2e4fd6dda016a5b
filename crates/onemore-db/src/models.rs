//! Row types that map directly to SQLite rows. Ids and timestamps stay as
//! text here; conversion to domain models happens in the backend crate.

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct SessionRow {
    pub id: String,
    pub owner_user_id: String,
    pub name: String,
    pub invite_code: String,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct ParticipantRow {
    pub id: String,
    pub session_id: String,
    pub display_name: String,
    pub claimed_by_user_id: Option<String>,
    pub color_index: Option<i64>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct DrinkTypeRow {
    pub id: String,
    pub session_id: String,
    pub name: String,
    pub category: String,
    pub price_cents: i64,
    pub emoji: String,
    pub sort_order: i64,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct DrinkEventRow {
    pub id: String,
    pub session_id: String,
    pub actor_user_id: String,
    pub target_participant_id: String,
    pub drink_type_id: String,
    pub delta: i64,
    pub created_at: String,
}

/// Optional-field update for a participant. `None` leaves the column alone.
#[derive(Debug, Clone, Default)]
pub struct ParticipantUpdate<'a> {
    pub display_name: Option<&'a str>,
    pub color_index: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct DrinkTypeUpdate<'a> {
    pub name: Option<&'a str>,
    pub category: Option<&'a str>,
    pub price_cents: Option<i64>,
    pub emoji: Option<&'a str>,
    pub sort_order: Option<i64>,
}
