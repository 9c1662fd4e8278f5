pub mod memory;
#[cfg(feature = "pgvector")]
pub mod pgvector;
pub mod sqlite;

pub use memory::InMemoryChunkStore;
#[cfg(feature = "pgvector")]
pub use pgvector::PgVectorChunkStore;
pub use sqlite::SqliteChunkStore;
