//! SQLite-backed persistence
//!
//! One database file holds articles, information units, and the entity
//! graph; telemetry keeps its own index next to its JSONL shards. All
//! stores share the [`Database`] handle, which serializes access to the
//! connection — SQLite does the ACID work, the mutex keeps statements from
//! interleaving mid-transaction.

mod articles;
mod db;
mod entities;
mod information;
mod telemetry;

pub use articles::{ArticleStore, StoredArticle};
pub use db::Database;
pub use entities::{EntityNetwork, EntityStore, HotEntity, TimelineEntry};
pub use information::InformationStore;
pub use telemetry::{TelemetryIndexRow, TelemetryQuery, TelemetryStore};
