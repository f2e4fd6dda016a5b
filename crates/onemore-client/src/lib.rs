//! Client side of a shared drink tally: anonymous identity, session
//! operations, and a live session view that shows local changes before the
//! store confirms them.

pub mod activity;
pub mod auth;
pub mod balances;
pub mod config;
pub mod error;
pub mod names;
pub mod reconcile;
pub mod repo;
pub mod view;

pub use auth::Authenticator;
pub use config::ClientConfig;
pub use error::{ClientError, ClientResult};
pub use reconcile::{LocalEvent, LocalParticipant, RowKey, TentativeId, WriteStatus};
pub use repo::{Direction, Repo, SessionData};
pub use view::{Notice, ParticipantCard, SessionView, ViewSnapshot};
