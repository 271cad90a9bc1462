//! Storage layer
//!
//! The lifecycle operations never touch persistence directly; they talk to a
//! [`DocumentStore`]. A store offers per-document atomic writes guarded by
//! revisions, tombstoned deletes and two ordered prefix scans (primary id
//! and human id).
//!
//! ## Implementations
//!
//! - [`MemoryStore`]: in-process, for tests and embedding
//! - [`SqliteStore`]: persistent, one row per document

use async_trait::async_trait;

use crate::document::{DocBody, Document, Revision};

pub mod error;
pub mod memory;
pub mod schema;
pub mod sqlite;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use schema::{init_schema, needs_init, SCHEMA_VERSION};
pub use sqlite::SqliteStore;

/// One entry of the human-id index
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct HumanIdEntry {
    pub human_id: String,
    pub id: String,
}

/// Exclusive upper bound of the range holding every string that starts
/// with `prefix`, in code point (UTF-8 byte) order.
///
/// This is the prefix with its last incrementable character bumped to the
/// next scalar value. `None` means the range is unbounded above, which is
/// the case for an empty prefix.
pub fn prefix_upper_bound(prefix: &str) -> Option<String> {
    let mut chars: Vec<char> = prefix.chars().collect();
    while let Some(last) = chars.pop() {
        if let Some(next) = next_char(last) {
            chars.push(next);
            return Some(chars.into_iter().collect());
        }
    }
    None
}

fn next_char(c: char) -> Option<char> {
    match c {
        '\u{D7FF}' => Some('\u{E000}'),
        c => char::from_u32(u32::from(c) + 1),
    }
}

/// Document store abstraction
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Read a live document.
    ///
    /// Fails with [`StoreError::NotFound`], whose `deleted` flag tells a
    /// tombstone apart from an id that was never written.
    async fn get(&self, id: &str) -> StoreResult<Document>;

    /// Write a document body.
    ///
    /// With `expected: None` this is a create: it fails with
    /// [`StoreError::Conflict`] when a live document holds the id (a
    /// tombstoned id may be reused). With `Some(rev)` it replaces the live
    /// document only if its revision is still `rev`.
    async fn put(
        &self,
        id: &str,
        expected: Option<&Revision>,
        body: &DocBody,
    ) -> StoreResult<Revision>;

    /// Tombstone a live document whose revision is `rev`; returns the
    /// tombstone's revision.
    async fn delete(&self, id: &str, rev: &Revision) -> StoreResult<Revision>;

    /// Live ids starting with `prefix`, ascending.
    async fn scan_ids(&self, prefix: &str) -> StoreResult<Vec<String>>;

    /// Human-id index entries whose human id starts with `prefix`,
    /// ascending by human id then id.
    async fn scan_human_ids(&self, prefix: &str) -> StoreResult<Vec<HumanIdEntry>>;
}
