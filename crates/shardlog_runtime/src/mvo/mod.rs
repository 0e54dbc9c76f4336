//! The multi-version object cache.
//!
//! Operations and the structures they touch:
//! - mutations (`put`, `prefix_evict`) update the snapshot cache and the
//!   version index under the object's lock;
//! - lookups (`get`, `floor_entry`) consult the index when needed, then
//!   query the snapshot cache for the real object.
//!
//! Size and time based eviction happens inside the snapshot cache. Its
//! listener only queues the evicted identifier; [`MvoCacheEviction`] turns
//! the queue into prefix evictions on a dedicated thread.

mod cache;
mod entry;
mod eviction;
mod sync;

pub use cache::MvoCache;
pub use eviction::MvoCacheEviction;
pub use sync::MvoCacheSync;
