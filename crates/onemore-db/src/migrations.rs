use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub const LATEST_VERSION: i64 = 1;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id          TEXT PRIMARY KEY,
                created_at  TEXT NOT NULL
            );

            CREATE TABLE sessions (
                id              TEXT PRIMARY KEY,
                owner_user_id   TEXT NOT NULL REFERENCES users(id),
                name            TEXT NOT NULL,
                invite_code     TEXT NOT NULL,
                created_at      TEXT NOT NULL
            );

            CREATE INDEX idx_sessions_invite_code ON sessions(invite_code);

            CREATE TABLE participants (
                id                  TEXT PRIMARY KEY,
                session_id          TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
                display_name        TEXT NOT NULL,
                claimed_by_user_id  TEXT REFERENCES users(id),
                color_index         INTEGER,
                created_at          TEXT NOT NULL,
                UNIQUE(session_id, display_name)
            );

            CREATE INDEX idx_participants_session ON participants(session_id, created_at);

            CREATE TABLE drink_types (
                id          TEXT PRIMARY KEY,
                session_id  TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
                name        TEXT NOT NULL,
                category    TEXT NOT NULL CHECK (category IN ('beer', 'soft', 'cocktail')),
                price_cents INTEGER NOT NULL DEFAULT 0,
                emoji       TEXT NOT NULL,
                sort_order  INTEGER NOT NULL DEFAULT 0,
                created_at  TEXT NOT NULL
            );

            CREATE INDEX idx_drink_types_session ON drink_types(session_id, sort_order);

            CREATE TABLE drink_events (
                id                      TEXT PRIMARY KEY,
                session_id              TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
                actor_user_id           TEXT NOT NULL,
                target_participant_id   TEXT NOT NULL REFERENCES participants(id) ON DELETE CASCADE,
                drink_type_id           TEXT NOT NULL REFERENCES drink_types(id) ON DELETE CASCADE,
                delta                   INTEGER NOT NULL CHECK (delta IN (-1, 1)),
                created_at              TEXT NOT NULL
            );

            CREATE INDEX idx_drink_events_session ON drink_events(session_id, created_at);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
