//! In-memory document store
//!
//! Keeps documents and the human-id index in ordered maps behind one lock.
//! Nothing is persisted.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use super::{prefix_upper_bound, DocumentStore, HumanIdEntry, StoreError, StoreResult};
use crate::document::{DocBody, Document, Revision};

struct Slot {
    rev: Revision,
    /// `None` once deleted
    body: Option<DocBody>,
}

#[derive(Default)]
struct Inner {
    docs: BTreeMap<String, Slot>,
    /// (human id, id)
    human_ids: BTreeSet<(String, String)>,
}

/// Document store held entirely in memory
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live documents
    pub fn len(&self) -> usize {
        self.read()
            .map(|inner| inner.docs.values().filter(|s| s.body.is_some()).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}

impl Inner {
    fn unindex(&mut self, id: &str) {
        if let Some(human_id) = self
            .docs
            .get(id)
            .and_then(|slot| slot.body.as_ref())
            .and_then(|body| body.human_id())
        {
            self.human_ids.remove(&(human_id.to_string(), id.to_string()));
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, id: &str) -> StoreResult<Document> {
        let inner = self.read()?;
        match inner.docs.get(id) {
            Some(Slot {
                rev,
                body: Some(body),
            }) => Ok(Document {
                id: id.to_string(),
                rev: rev.clone(),
                body: body.clone(),
            }),
            Some(_) => Err(StoreError::NotFound {
                id: id.to_string(),
                deleted: true,
            }),
            None => Err(StoreError::NotFound {
                id: id.to_string(),
                deleted: false,
            }),
        }
    }

    async fn put(
        &self,
        id: &str,
        expected: Option<&Revision>,
        body: &DocBody,
    ) -> StoreResult<Revision> {
        let mut inner = self.write()?;
        let conflict = || StoreError::Conflict { id: id.to_string() };

        let rev = match (inner.docs.get(id), expected) {
            (None, None) => Revision::with_generation(1),
            (Some(slot), None) if slot.body.is_none() => slot.rev.next(),
            (Some(slot), Some(rev)) if slot.body.is_some() && &slot.rev == rev => slot.rev.next(),
            _ => return Err(conflict()),
        };

        inner.unindex(id);
        if let Some(human_id) = body.human_id() {
            inner
                .human_ids
                .insert((human_id.to_string(), id.to_string()));
        }
        inner.docs.insert(
            id.to_string(),
            Slot {
                rev: rev.clone(),
                body: Some(body.clone()),
            },
        );
        Ok(rev)
    }

    async fn delete(&self, id: &str, rev: &Revision) -> StoreResult<Revision> {
        let mut inner = self.write()?;
        let next = match inner.docs.get(id) {
            Some(slot) if slot.body.is_some() && &slot.rev == rev => slot.rev.next(),
            Some(slot) if slot.body.is_some() => {
                return Err(StoreError::Conflict { id: id.to_string() })
            }
            slot => {
                return Err(StoreError::NotFound {
                    id: id.to_string(),
                    deleted: slot.is_some(),
                })
            }
        };

        inner.unindex(id);
        inner.docs.insert(
            id.to_string(),
            Slot {
                rev: next.clone(),
                body: None,
            },
        );
        Ok(next)
    }

    async fn scan_ids(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let inner = self.read()?;
        let upper = prefix_upper_bound(prefix);
        let end = match &upper {
            Some(upper) => Bound::Excluded(upper.as_str()),
            None => Bound::Unbounded,
        };
        Ok(inner
            .docs
            .range::<str, _>((Bound::Included(prefix), end))
            .filter(|(_, slot)| slot.body.is_some())
            .map(|(id, _)| id.clone())
            .collect())
    }

    async fn scan_human_ids(&self, prefix: &str) -> StoreResult<Vec<HumanIdEntry>> {
        let inner = self.read()?;
        let lower = (prefix.to_string(), String::new());
        let end = match prefix_upper_bound(prefix) {
            Some(upper) => Bound::Excluded((upper, String::new())),
            None => Bound::Unbounded,
        };
        Ok(inner
            .human_ids
            .range((Bound::Included(lower), end))
            .map(|(human_id, id)| HumanIdEntry {
                human_id: human_id.clone(),
                id: id.clone(),
            })
            .collect())
    }
}
