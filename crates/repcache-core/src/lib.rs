//! repcache - client-side state freshness for a fitness-coaching app.
//!
//! Server data is cached with per-entity TTLs, the resolved routine view is
//! cached separately, a push channel invalidates stale data, and a session
//! timer survives restarts by deriving elapsed time from timestamps.

pub mod api;
pub mod auth;
pub mod cache;
pub mod clock;
pub mod config;
pub mod context;
pub mod data;
pub mod models;
pub mod realtime;
pub mod routine;
pub mod storage;
pub mod timer;
pub mod utils;

#[cfg(test)]
mod test_support;

pub use cache::{CacheManager, CachedData, EntityCache, ResourceCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, ReconnectPolicy};
pub use context::AppContext;
pub use routine::{RoutineCache, RoutineView};
pub use storage::{FileStorage, MemoryStorage, StateStorage};
pub use timer::{SessionTimer, TimerStatus};
