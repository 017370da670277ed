pub mod cache;
pub mod sqlite;

pub use cache::{ArtifactCache, SourceFingerprint};
pub use sqlite::SqliteStorage;
