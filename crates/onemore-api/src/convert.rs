//! Row <-> domain conversions. Rows keep ids and timestamps as text; a row
//! that fails to parse is reported as corrupt instead of being patched up.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use onemore_db::models::{DrinkEventRow, DrinkTypeRow, ParticipantRow, SessionRow};
use onemore_types::models::{DrinkEvent, DrinkType, Delta, Participant, Session};

fn parse_id(field: &str, value: &str) -> Result<Uuid> {
    value
        .parse()
        .with_context(|| format!("corrupt {} '{}'", field, value))
}

fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .with_context(|| format!("corrupt created_at '{}'", value))
}

pub fn session(row: SessionRow) -> Result<Session> {
    Ok(Session {
        id: parse_id("session id", &row.id)?,
        owner_user_id: parse_id("owner_user_id", &row.owner_user_id)?,
        name: row.name,
        invite_code: row.invite_code,
        created_at: parse_time(&row.created_at)?,
    })
}

pub fn participant(row: ParticipantRow) -> Result<Participant> {
    Ok(Participant {
        id: parse_id("participant id", &row.id)?,
        session_id: parse_id("session_id", &row.session_id)?,
        display_name: row.display_name,
        claimed_by_user_id: row
            .claimed_by_user_id
            .as_deref()
            .map(|v| parse_id("claimed_by_user_id", v))
            .transpose()?,
        color_index: row
            .color_index
            .map(|c| u32::try_from(c).with_context(|| format!("corrupt color_index {}", c)))
            .transpose()?,
        created_at: parse_time(&row.created_at)?,
    })
}

pub fn drink_type(row: DrinkTypeRow) -> Result<DrinkType> {
    Ok(DrinkType {
        id: parse_id("drink type id", &row.id)?,
        session_id: parse_id("session_id", &row.session_id)?,
        category: row.category.parse().map_err(anyhow::Error::msg)?,
        name: row.name,
        price_cents: row.price_cents,
        emoji: row.emoji,
        sort_order: i32::try_from(row.sort_order)
            .with_context(|| format!("corrupt sort_order {}", row.sort_order))?,
        created_at: parse_time(&row.created_at)?,
    })
}

pub fn drink_event(row: DrinkEventRow) -> Result<DrinkEvent> {
    Ok(DrinkEvent {
        id: parse_id("drink event id", &row.id)?,
        session_id: parse_id("session_id", &row.session_id)?,
        actor_user_id: parse_id("actor_user_id", &row.actor_user_id)?,
        target_participant_id: parse_id("target_participant_id", &row.target_participant_id)?,
        drink_type_id: parse_id("drink_type_id", &row.drink_type_id)?,
        delta: Delta::try_from(row.delta).map_err(anyhow::Error::msg)?,
        created_at: parse_time(&row.created_at)?,
    })
}

pub fn all<R, T>(rows: Vec<R>, f: fn(R) -> Result<T>) -> Result<Vec<T>> {
    rows.into_iter().map(f).collect()
}
