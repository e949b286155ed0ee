//! Time-bounded caches between the UI and the coaching API.
//!
//! - `CachedData`: a value stamped with its write time (the TTL cell)
//! - `EntityCache`: a keyed store of cells with a fixed TTL and expire-on-read
//! - `ResourceCache`: an `EntityCache` with a single implicit key
//! - `CacheManager`: owns one store per entity kind, and persists the
//!   designated subset (history, students summary, catalog, muscle groups)

pub mod entry;
pub mod manager;
pub mod resource;
pub mod store;

pub use entry::CachedData;
pub use manager::{CacheAges, CacheManager};
pub use resource::ResourceCache;
pub use store::{EntityCache, FetchTicket};
