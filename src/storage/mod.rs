pub mod sqlite;

use anyhow::Result;

/// Durable store for serialized index fragments plus the content hash the
/// engine uses to decide cached-index validity.
///
/// Implementations must treat the store as disposable: the engine already
/// degrades to a from-scratch rebuild on any miss, and callers catch and log
/// errors rather than surfacing them.
pub trait IndexCache: Send + Sync {
    /// The content hash committed with the last persisted index, if any.
    fn load_hash(&self) -> Result<Option<String>>;

    fn store_hash(&self, hash: &str) -> Result<()>;

    /// All persisted chunks, keyed by the engine-defined chunk key.
    fn load_chunks(&self) -> Result<Vec<(String, String)>>;

    /// Replace the chunk set. Implementations clear stale chunks first so a
    /// shrunken export never leaves orphans behind.
    fn store_chunks(&self, chunks: &[(String, String)]) -> Result<()>;

    /// Drop all chunks and the stored hash.
    fn clear(&self) -> Result<()>;
}
