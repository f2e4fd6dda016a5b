use crate::Database;
use crate::models::{
    DrinkEventRow, DrinkTypeRow, DrinkTypeUpdate, ParticipantRow, ParticipantUpdate, SessionRow,
    UserRow,
};
use anyhow::Result;
use rusqlite::{Connection, Row, params};

const SESSION_COLUMNS: &str = "id, owner_user_id, name, invite_code, created_at";
const PARTICIPANT_COLUMNS: &str =
    "id, session_id, display_name, claimed_by_user_id, color_index, created_at";
const DRINK_TYPE_COLUMNS: &str =
    "id, session_id, name, category, price_cents, emoji, sort_order, created_at";
const DRINK_EVENT_COLUMNS: &str =
    "id, session_id, actor_user_id, target_participant_id, drink_type_id, delta, created_at";

impl Database {
    // -- Users --

    pub fn create_user(&self, user: &UserRow) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (id, created_at) VALUES (?1, ?2)",
                (&user.id, &user.created_at),
            )?;
            Ok(())
        })
    }

    pub fn user_exists(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found = conn
                .query_row("SELECT 1 FROM users WHERE id = ?1", [id], |_| Ok(()))
                .optional()?;
            Ok(found.is_some())
        })
    }

    // -- Sessions --

    pub fn insert_session(&self, session: &SessionRow) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO sessions (id, owner_user_id, name, invite_code, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    session.id,
                    session.owner_user_id,
                    session.name,
                    session.invite_code,
                    session.created_at
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_session(&self, id: &str) -> Result<Option<SessionRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM sessions WHERE id = ?1", SESSION_COLUMNS);
            conn.query_row(&sql, [id], session_from_row).optional()
        })
    }

    /// Codes are not unique; the oldest session wins.
    pub fn get_session_by_invite_code(&self, code: &str) -> Result<Option<SessionRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM sessions WHERE invite_code = ?1 ORDER BY created_at, rowid LIMIT 1",
                SESSION_COLUMNS
            );
            conn.query_row(&sql, [code], session_from_row).optional()
        })
    }

    /// Sessions owned by the user or with a slot claimed by them, newest first.
    pub fn list_sessions_for_user(&self, user_id: &str) -> Result<Vec<SessionRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT s.id, s.owner_user_id, s.name, s.invite_code, s.created_at
                 FROM sessions s
                 WHERE s.owner_user_id = ?1
                    OR EXISTS (
                        SELECT 1 FROM participants p
                        WHERE p.session_id = s.id AND p.claimed_by_user_id = ?1
                    )
                 ORDER BY s.created_at DESC, s.rowid DESC",
            )?;
            let rows = stmt
                .query_map([user_id], session_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Returns the number of rows removed (0 or 1). Child rows cascade.
    pub fn delete_session(&self, id: &str) -> Result<usize> {
        self.with_conn_mut(|conn| Ok(conn.execute("DELETE FROM sessions WHERE id = ?1", [id])?))
    }

    // -- Participants --

    /// All-or-nothing batch insert.
    pub fn insert_participants(&self, rows: &[ParticipantRow]) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO participants
                        (id, session_id, display_name, claimed_by_user_id, color_index, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )?;
                for row in rows {
                    stmt.execute(params![
                        row.id,
                        row.session_id,
                        row.display_name,
                        row.claimed_by_user_id,
                        row.color_index,
                        row.created_at
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_participant(&self, id: &str) -> Result<Option<ParticipantRow>> {
        self.with_conn(|conn| query_participant(conn, id))
    }

    pub fn list_participants(&self, session_id: &str) -> Result<Vec<ParticipantRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM participants WHERE session_id = ?1 ORDER BY created_at, rowid",
                PARTICIPANT_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([session_id], participant_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Returns the updated row, or `None` if no participant matched.
    pub fn update_participant(
        &self,
        session_id: &str,
        id: &str,
        update: &ParticipantUpdate<'_>,
    ) -> Result<Option<ParticipantRow>> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE participants
                 SET display_name = COALESCE(?3, display_name),
                     color_index = COALESCE(?4, color_index)
                 WHERE id = ?1 AND session_id = ?2",
                params![id, session_id, update.display_name, update.color_index],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            query_participant(conn, id)
        })
    }

    /// Returns the deleted row, if any. Its drink events cascade.
    pub fn delete_participant(&self, session_id: &str, id: &str) -> Result<Option<ParticipantRow>> {
        self.with_conn_mut(|conn| {
            let existing = query_participant(conn, id)?.filter(|p| p.session_id == session_id);
            if existing.is_some() {
                conn.execute(
                    "DELETE FROM participants WHERE id = ?1 AND session_id = ?2",
                    [id, session_id],
                )?;
            }
            Ok(existing)
        })
    }

    /// Conditional claim: only succeeds while `claimed_by_user_id` is NULL.
    /// Returns the claimed row, or `None` when the slot was already taken or
    /// does not exist.
    pub fn claim_participant(&self, id: &str, user_id: &str) -> Result<Option<ParticipantRow>> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE participants SET claimed_by_user_id = ?2
                 WHERE id = ?1 AND claimed_by_user_id IS NULL",
                [id, user_id],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            query_participant(conn, id)
        })
    }

    // -- Drink types --

    pub fn insert_drink_types(&self, rows: &[DrinkTypeRow]) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO drink_types
                        (id, session_id, name, category, price_cents, emoji, sort_order, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                )?;
                for row in rows {
                    stmt.execute(params![
                        row.id,
                        row.session_id,
                        row.name,
                        row.category,
                        row.price_cents,
                        row.emoji,
                        row.sort_order,
                        row.created_at
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_drink_type(&self, id: &str) -> Result<Option<DrinkTypeRow>> {
        self.with_conn(|conn| query_drink_type(conn, id))
    }

    pub fn list_drink_types(&self, session_id: &str) -> Result<Vec<DrinkTypeRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM drink_types WHERE session_id = ?1 ORDER BY sort_order, created_at, rowid",
                DRINK_TYPE_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([session_id], drink_type_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn update_drink_type(
        &self,
        session_id: &str,
        id: &str,
        update: &DrinkTypeUpdate<'_>,
    ) -> Result<Option<DrinkTypeRow>> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE drink_types
                 SET name = COALESCE(?3, name),
                     category = COALESCE(?4, category),
                     price_cents = COALESCE(?5, price_cents),
                     emoji = COALESCE(?6, emoji),
                     sort_order = COALESCE(?7, sort_order)
                 WHERE id = ?1 AND session_id = ?2",
                params![
                    id,
                    session_id,
                    update.name,
                    update.category,
                    update.price_cents,
                    update.emoji,
                    update.sort_order
                ],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            query_drink_type(conn, id)
        })
    }

    pub fn delete_drink_type(&self, session_id: &str, id: &str) -> Result<Option<DrinkTypeRow>> {
        self.with_conn_mut(|conn| {
            let existing = query_drink_type(conn, id)?.filter(|d| d.session_id == session_id);
            if existing.is_some() {
                conn.execute(
                    "DELETE FROM drink_types WHERE id = ?1 AND session_id = ?2",
                    [id, session_id],
                )?;
            }
            Ok(existing)
        })
    }

    // -- Drink events --

    pub fn insert_drink_event(&self, row: &DrinkEventRow) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO drink_events
                    (id, session_id, actor_user_id, target_participant_id, drink_type_id, delta, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    row.id,
                    row.session_id,
                    row.actor_user_id,
                    row.target_participant_id,
                    row.drink_type_id,
                    row.delta,
                    row.created_at
                ],
            )?;
            Ok(())
        })
    }

    /// Newest first.
    pub fn list_drink_events(&self, session_id: &str) -> Result<Vec<DrinkEventRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM drink_events WHERE session_id = ?1 ORDER BY created_at DESC, rowid DESC",
                DRINK_EVENT_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([session_id], drink_event_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn query_participant(conn: &Connection, id: &str) -> Result<Option<ParticipantRow>> {
    let sql = format!("SELECT {} FROM participants WHERE id = ?1", PARTICIPANT_COLUMNS);
    conn.query_row(&sql, [id], participant_from_row).optional()
}

fn query_drink_type(conn: &Connection, id: &str) -> Result<Option<DrinkTypeRow>> {
    let sql = format!("SELECT {} FROM drink_types WHERE id = ?1", DRINK_TYPE_COLUMNS);
    conn.query_row(&sql, [id], drink_type_from_row).optional()
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<SessionRow> {
    Ok(SessionRow {
        id: row.get(0)?,
        owner_user_id: row.get(1)?,
        name: row.get(2)?,
        invite_code: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn participant_from_row(row: &Row<'_>) -> rusqlite::Result<ParticipantRow> {
    Ok(ParticipantRow {
        id: row.get(0)?,
        session_id: row.get(1)?,
        display_name: row.get(2)?,
        claimed_by_user_id: row.get(3)?,
        color_index: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn drink_type_from_row(row: &Row<'_>) -> rusqlite::Result<DrinkTypeRow> {
    Ok(DrinkTypeRow {
        id: row.get(0)?,
        session_id: row.get(1)?,
        name: row.get(2)?,
        category: row.get(3)?,
        price_cents: row.get(4)?,
        emoji: row.get(5)?,
        sort_order: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn drink_event_from_row(row: &Row<'_>) -> rusqlite::Result<DrinkEventRow> {
    Ok(DrinkEventRow {
        id: row.get(0)?,
        session_id: row.get(1)?,
        actor_user_id: row.get(2)?,
        target_participant_id: row.get(3)?,
        drink_type_id: row.get(4)?,
        delta: row.get(5)?,
        created_at: row.get(6)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
