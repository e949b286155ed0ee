//! Server push invalidation.
//!
//! A student's client keeps one connection open while logged in. Every
//! routine event drops the cached routine so the next read refetches;
//! `cache-invalidate` additionally drops the per-student entity caches.

pub mod channel;
pub mod events;
pub mod transport;

pub use channel::NotificationChannel;
pub use events::{InvalidationEvent, InvalidationKind, Notice};
pub use transport::{EventStream, PushTransport, WsTransport};
