//! Data models: governance snapshots fetched from the backend and the
//! message registry rows persisted in sqlite.

pub mod governance;
pub mod message_registry;

pub use self::governance::*;
pub use self::message_registry::*;
