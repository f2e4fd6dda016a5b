use std::path::PathBuf;
use std::time::Duration;

use tracing::debug;

pub const DEFAULT_AUTH_STATE_PATH: &str = ".onemore-auth.json";

/// Client-side settings plus the timing constants of the live session view.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Where the anonymous identity is persisted. `None` keeps it in memory.
    pub auth_state_path: Option<PathBuf>,

    /// Web domain used for invite links; the app scheme is used without one.
    pub invite_link_domain: Option<String>,

    /// A confirmed drink event replaces a tentative one only if their
    /// timestamps are closer than this.
    pub event_match_window: Duration,

    /// Largest timestamp distance at which a tentative participant is
    /// considered the same as a loaded one with the same name.
    pub participant_match_window: Duration,

    /// How long a "recent activity" marker stays visible.
    pub activity_ttl: Duration,

    pub sweep_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            auth_state_path: Some(PathBuf::from(DEFAULT_AUTH_STATE_PATH)),
            invite_link_domain: None,
            event_match_window: Duration::from_secs(5),
            participant_match_window: Duration::from_secs(30),
            activity_ttl: Duration::from_secs(2),
            sweep_interval: Duration::from_millis(500),
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by `ONEMORE_AUTH_STATE` and
    /// `ONEMORE_INVITE_LINK_DOMAIN`.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("ONEMORE_AUTH_STATE") {
            config.auth_state_path = Some(PathBuf::from(path));
        }
        config.invite_link_domain = std::env::var("ONEMORE_INVITE_LINK_DOMAIN")
            .ok()
            .filter(|d| !d.trim().is_empty());

        debug!(
            auth_state = ?config.auth_state_path,
            invite_link_domain = ?config.invite_link_domain,
            "Client config loaded"
        );
        config
    }

    /// In-memory identity, default timings. Used by tests and throwaway tools.
    pub fn ephemeral() -> Self {
        Self {
            auth_state_path: None,
            ..Self::default()
        }
    }
}
