//! Session store: the access/refresh token pair and where it is kept.

mod store;
pub mod token;

pub use store::{Session, SessionStore, SqliteTokens};
