use std::path::PathBuf;

use tracing::warn;

pub const DEV_JWT_SECRET: &str = "dev-secret-change-me";

#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub db_path: PathBuf,
    pub jwt_secret: String,
}

impl BackendConfig {
    /// Read `ONEMORE_DB_PATH` and `ONEMORE_JWT_SECRET`, falling back to
    /// development defaults. Call `dotenvy::dotenv()` first to pick up `.env`.
    pub fn from_env() -> Self {
        let db_path = std::env::var("ONEMORE_DB_PATH").unwrap_or_else(|_| "onemore.db".into());
        let jwt_secret = std::env::var("ONEMORE_JWT_SECRET").unwrap_or_else(|_| {
            warn!("ONEMORE_JWT_SECRET is unset; using the development secret");
            DEV_JWT_SECRET.into()
        });

        Self {
            db_path: PathBuf::from(db_path),
            jwt_secret,
        }
    }
}
