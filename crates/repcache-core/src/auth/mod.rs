//! Session management.
//!
//! The login flow itself lives outside this crate; `Session` only keeps the
//! resulting token, user id and role, persisted through `StateStorage`.

pub mod session;

pub use session::{Role, Session, SessionData};
