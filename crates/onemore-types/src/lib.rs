pub mod events;
pub mod invite;
pub mod models;
pub mod palette;
pub mod store;

pub use events::{ChangeEvent, ChangeKind, ChangeStream, FeedFilter, FeedItem, Record, Table};
pub use models::*;
pub use store::{RemoteStore, StoreError, StoreResult};
