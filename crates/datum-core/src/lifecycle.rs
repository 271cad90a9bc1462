//! Document lifecycle operations
//!
//! [`DocumentService`] is the only component that writes to the store. It
//! creates documents ([`add`](DocumentService::add)), mutates or moves them
//! ([`update`](DocumentService::update),
//! [`overwrite`](DocumentService::overwrite)) and tombstones them
//! ([`delete`](DocumentService::delete)).
//!
//! ## Writes
//!
//! Every write is a single conditional store call: a create for new ids, a
//! compare-and-swap on the current revision otherwise. A rejected write is
//! reported, never retried.
//!
//! A write whose result equals the stored content (ignoring `modifyTime`)
//! is skipped and the stored document is returned with its revision.
//!
//! ## Moves
//!
//! When the id recomputed from a document's data differs from its current
//! id, the document moves: it is created at the new id, then the old id is
//! deleted. The pair is not atomic. If the delete fails, both ids exist.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::future::join_all;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::document::{DocBody, Document, Meta, Object, Payload, Revision, Tombstone};
use crate::error::{Error, Result};
use crate::identity::{assemble_id, IdTemplate, Stamps, DEFAULT_DELIMITER};
use crate::merge::{combine, MergeStrategy};
use crate::quick_id::{self, OnAmbiguous, QuickIdQuery};
use crate::storage::{DocumentStore, StoreError};

const HUMAN_ID_ALPHABET: &[u8; 32] = b"abcdefghijklmnopqrstuvwxyz234567";
const HUMAN_ID_LEN: usize = 10;

/// Notified with the ids of every document a write touched.
///
/// Lets a front end remember "the last thing I edited" without the service
/// holding that state. A batch operation reports all of its ids in one call.
pub trait TouchObserver: Send + Sync {
    fn touched(&self, ids: &[String]);
}

/// Collects the ids touched while a batch runs
#[derive(Default)]
struct BatchTouches(Mutex<Vec<String>>);

impl BatchTouches {
    fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl TouchObserver for BatchTouches {
    fn touched(&self, ids: &[String]) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(ids);
    }
}

/// How [`DocumentService::add`] reacts when the id is already taken
#[derive(Debug, Clone)]
pub enum ConflictStrategy {
    /// Merge the new data into the existing document
    Merge(MergeStrategy),
    /// Replace the existing body
    Overwrite,
    /// Delete the existing document
    Delete,
}

/// Result of [`DocumentService::add`]
#[derive(Debug, Clone, PartialEq)]
pub enum AddOutcome {
    /// A new document was stored
    Created(Document),
    /// The same content was already stored; nothing was written
    Unchanged(Document),
    /// The existing document was updated by the conflict strategy
    Updated(Document),
    /// The existing document was deleted by the conflict strategy
    Deleted(Tombstone),
}

impl AddOutcome {
    pub fn id(&self) -> &str {
        match self {
            AddOutcome::Created(doc) | AddOutcome::Unchanged(doc) | AddOutcome::Updated(doc) => {
                &doc.id
            }
            AddOutcome::Deleted(tombstone) => &tombstone.id,
        }
    }

    /// The resulting live document, if any
    pub fn document(&self) -> Option<&Document> {
        match self {
            AddOutcome::Created(doc) | AddOutcome::Unchanged(doc) | AddOutcome::Updated(doc) => {
                Some(doc)
            }
            AddOutcome::Deleted(_) => None,
        }
    }
}

/// Per-id result of a batch operation
#[derive(Debug)]
pub struct BatchItem<T> {
    /// Resolved id, or the unresolved reference when resolution failed
    pub id: String,
    pub result: Result<T>,
}

/// Which operation a store failure belongs to
#[derive(Debug, Clone, Copy)]
enum Op {
    Update,
    Overwrite,
    Delete,
}

impl Op {
    fn missing(self, id: &str) -> Error {
        let id = id.to_string();
        match self {
            Op::Update => Error::NoDocToUpdate(id),
            Op::Overwrite => Error::NoDocToOverwrite(id),
            Op::Delete => Error::NoDocToDelete(id),
        }
    }

    fn rejected(self, id: &str, reason: String) -> Error {
        let id = id.to_string();
        match self {
            Op::Update => Error::UpdateDoc { id, reason },
            Op::Overwrite => Error::OverwriteDoc { id, reason },
            Op::Delete => Error::Store(StoreError::Conflict { id }),
        }
    }

    fn store_error(self, id: &str, error: StoreError) -> Error {
        match error {
            StoreError::NotFound { .. } => self.missing(id),
            StoreError::Conflict { .. } => {
                self.rejected(id, "document changed concurrently".to_string())
            }
            other => other.into(),
        }
    }

    /// Fail unless `expected` is absent or matches the current revision
    fn check_rev(self, current: &Document, expected: Option<&Revision>) -> Result<()> {
        match expected {
            Some(rev) if rev != &current.rev => Err(self.rejected(
                &current.id,
                format!("revision {} does not match current {}", rev, current.rev),
            )),
            _ => Ok(()),
        }
    }
}

/// Lifecycle operations over a document store
pub struct DocumentService<S: ?Sized> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    delimiter: String,
    on_ambiguous: OnAmbiguous,
    observer: Option<Arc<dyn TouchObserver>>,
}

impl<S: DocumentStore + ?Sized> DocumentService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock::new()),
            delimiter: DEFAULT_DELIMITER.to_string(),
            on_ambiguous: OnAmbiguous::default(),
            observer: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Delimiter used by [`id_template`](Self::id_template)
    pub fn with_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = delimiter.into();
        self
    }

    /// Ambiguity policy used when batch operations resolve QuickIds
    pub fn with_on_ambiguous(mut self, on_ambiguous: OnAmbiguous) -> Self {
        self.on_ambiguous = on_ambiguous;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn TouchObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Join template parts with the configured delimiter
    pub fn id_template<I, P>(&self, parts: I) -> Option<IdTemplate>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<str>,
    {
        IdTemplate::from_parts(parts, &self.delimiter)
    }

    /// Read one live document
    pub async fn get(&self, id: &str) -> Result<Document> {
        self.store.get(id).await.map_err(|e| match e {
            StoreError::NotFound { id, deleted } => Error::NotFound { id, deleted },
            other => other.into(),
        })
    }

    /// Resolve a QuickId query with the configured ambiguity policy
    pub async fn resolve(&self, query: &QuickIdQuery) -> Result<Vec<String>> {
        quick_id::resolve(&*self.store, query, self.on_ambiguous).await
    }

    /// Store a new document.
    ///
    /// Structured bodies are stamped with `createTime` and `modifyTime`,
    /// and get a `humanId` and `random` unless the caller supplied them. A
    /// caller revision is ignored.
    ///
    /// When the id is taken and `on_conflict` is `None`, an existing
    /// document with the same content is returned as
    /// [`AddOutcome::Unchanged`]; different content fails with
    /// [`Error::DocExists`]. With a conflict strategy the strategy always
    /// runs, even for identical content.
    pub async fn add(
        &self,
        payload: Payload,
        on_conflict: Option<ConflictStrategy>,
    ) -> Result<AddOutcome> {
        let Payload {
            id: explicit_id,
            id_template,
            mut body,
            ..
        } = payload;
        let supplied = body.meta().cloned();
        let now = self.clock.now_stamp();

        if let Some(meta) = body.meta_mut() {
            meta.create_time = Some(now.clone());
            meta.modify_time = Some(now.clone());
            if meta.human_id.is_none() {
                meta.human_id = Some(generate_human_id());
            }
            if meta.random.is_none() {
                meta.random = Some(random_unit());
            }
        }

        let assembled = assemble_id(
            explicit_id.as_deref(),
            id_template.as_ref(),
            body.data(),
            Stamps {
                create_time: Some(now.as_str()),
                modify_time: Some(now.as_str()),
            },
        )?;
        if !assembled.unresolved_optional.is_empty() {
            debug!(
                id = %assembled.id,
                fields = ?assembled.unresolved_optional,
                "Optional id fields were empty"
            );
        }
        if let Some(meta) = body.meta_mut() {
            meta.id_structure = assembled.id_structure;
        }
        let id = assembled.id;

        match self.store.put(&id, None, &body).await {
            Ok(rev) => {
                info!(id = %id, "Created document");
                self.touch(std::slice::from_ref(&id));
                Ok(AddOutcome::Created(Document { id, rev, body }))
            }
            Err(StoreError::Conflict { .. }) => {
                let existing = match self.store.get(&id).await {
                    Ok(doc) => doc,
                    Err(source) => return Err(Error::AddDoc { id, source }),
                };
                self.add_conflict(existing, id_template, body, supplied, on_conflict)
                    .await
            }
            Err(source) => Err(Error::AddDoc { id, source }),
        }
    }

    async fn add_conflict(
        &self,
        existing: Document,
        id_template: Option<IdTemplate>,
        body: DocBody,
        supplied: Option<Meta>,
        on_conflict: Option<ConflictStrategy>,
    ) -> Result<AddOutcome> {
        match on_conflict {
            None if same_attempt(&body, supplied.as_ref(), &existing.body) => {
                debug!(id = %existing.id, "Add matches stored document");
                Ok(AddOutcome::Unchanged(existing))
            }
            None => Err(Error::DocExists {
                id: existing.id.clone(),
                attempted: Box::new(body),
                existing: Box::new(existing),
            }),
            Some(ConflictStrategy::Merge(strategy)) => {
                debug!(id = %existing.id, %strategy, "Add conflict: merging");
                self.update_existing(existing, None, body.data(), &strategy)
                    .await
                    .map(AddOutcome::Updated)
            }
            Some(ConflictStrategy::Overwrite) => {
                debug!(id = %existing.id, "Add conflict: overwriting");
                self.overwrite_existing(existing, None, id_template.as_ref(), body)
                    .await
                    .map(AddOutcome::Updated)
            }
            Some(ConflictStrategy::Delete) => {
                debug!(id = %existing.id, "Add conflict: deleting");
                self.delete_existing(existing).await.map(AddOutcome::Deleted)
            }
        }
    }

    /// Merge `payload` into the document at `id`.
    ///
    /// For structured documents only `data` is merged and the stored `meta`
    /// is kept apart from a fresh `modifyTime`. The id is recomputed from
    /// the stored `idStructure`; a literal payload id that differs from
    /// `id` takes precedence.
    pub async fn update(
        &self,
        id: &str,
        payload: &Payload,
        strategy: &MergeStrategy,
    ) -> Result<Document> {
        let current = self.load(id, Op::Update).await?;
        Op::Update.check_rev(&current, payload.rev.as_ref())?;
        self.update_existing(current, payload.id.as_deref(), payload.body.data(), strategy)
            .await
    }

    /// Replace the body of the document at `id`.
    ///
    /// Only `createTime` carries over, and only when both the old and the
    /// new body are structured.
    pub async fn overwrite(&self, id: &str, payload: Payload) -> Result<Document> {
        let current = self.load(id, Op::Overwrite).await?;
        Op::Overwrite.check_rev(&current, payload.rev.as_ref())?;
        let Payload {
            id: explicit_id,
            id_template,
            body,
            ..
        } = payload;
        self.overwrite_existing(current, explicit_id.as_deref(), id_template.as_ref(), body)
            .await
    }

    /// Tombstone the document at `id`
    pub async fn delete(&self, id: &str) -> Result<Tombstone> {
        let current = self.load(id, Op::Delete).await?;
        self.delete_existing(current).await
    }

    /// Read every document a QuickId query resolves to
    pub async fn get_many(&self, query: &QuickIdQuery) -> Vec<BatchItem<Document>> {
        self.for_each_resolved(query, |id: String| async move { self.get(&id).await })
            .await
    }

    /// Update every document a QuickId query resolves to
    pub async fn update_many(
        &self,
        query: &QuickIdQuery,
        payload: &Payload,
        strategy: &MergeStrategy,
    ) -> Vec<BatchItem<Document>> {
        let (batch, touches) = self.batch_scope();
        let scoped = &batch;
        let items = scoped
            .for_each_resolved(query, |id: String| async move {
                scoped.update(&id, payload, strategy).await
            })
            .await;
        self.touch(&touches.take());
        items
    }

    /// Overwrite every document a QuickId query resolves to
    pub async fn overwrite_many(
        &self,
        query: &QuickIdQuery,
        payload: &Payload,
    ) -> Vec<BatchItem<Document>> {
        let (batch, touches) = self.batch_scope();
        let scoped = &batch;
        let items = scoped
            .for_each_resolved(query, |id: String| async move {
                scoped.overwrite(&id, payload.clone()).await
            })
            .await;
        self.touch(&touches.take());
        items
    }

    /// Delete every document a QuickId query resolves to
    pub async fn delete_many(&self, query: &QuickIdQuery) -> Vec<BatchItem<Tombstone>> {
        let (batch, touches) = self.batch_scope();
        let scoped = &batch;
        let items = scoped
            .for_each_resolved(query, |id: String| async move { scoped.delete(&id).await })
            .await;
        self.touch(&touches.take());
        items
    }

    /// A copy of this service whose writes report to a collector instead of
    /// the observer
    fn batch_scope(&self) -> (Self, Arc<BatchTouches>) {
        let touches = Arc::new(BatchTouches::default());
        let scoped = Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            delimiter: self.delimiter.clone(),
            on_ambiguous: self.on_ambiguous,
            observer: Some(touches.clone() as Arc<dyn TouchObserver>),
        };
        (scoped, touches)
    }

    /// Run `op` concurrently for every resolved id.
    ///
    /// A reference that fails to resolve becomes a failed item in its place.
    async fn for_each_resolved<T, F, Fut>(&self, query: &QuickIdQuery, op: F) -> Vec<BatchItem<T>>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let resolved = quick_id::resolve_each(&*self.store, query, self.on_ambiguous).await;

        let mut slots = Vec::new();
        for (reference, result) in query.items().iter().zip(resolved) {
            match result {
                Ok(ids) => slots.extend(ids.into_iter().map(Ok)),
                Err(e) => slots.push(Err((reference.clone(), e))),
            }
        }

        let pending = slots
            .iter()
            .filter_map(|slot| slot.as_ref().ok().cloned())
            .map(|id| {
                let fut = op(id.clone());
                async move {
                    BatchItem {
                        id,
                        result: fut.await,
                    }
                }
            });
        let mut done = join_all(pending).await.into_iter();

        slots
            .into_iter()
            .filter_map(|slot| match slot {
                Ok(_) => done.next(),
                Err((id, e)) => Some(BatchItem { id, result: Err(e) }),
            })
            .collect()
    }

    async fn load(&self, id: &str, op: Op) -> Result<Document> {
        self.store
            .get(id)
            .await
            .map_err(|e| op.store_error(id, e))
    }

    async fn update_existing(
        &self,
        current: Document,
        explicit_id: Option<&str>,
        changes: &Object,
        strategy: &MergeStrategy,
    ) -> Result<Document> {
        let now = self.clock.now_stamp();
        let mut body = match &current.body {
            DocBody::Structured { data, meta } => {
                let mut meta = meta.clone();
                meta.modify_time = Some(now.clone());
                DocBody::Structured {
                    data: combine(data, changes, strategy)?,
                    meta,
                }
            }
            DocBody::Flat(object) => DocBody::Flat(combine(object, changes, strategy)?),
        };

        let new_id = recompute_id(&current, explicit_id, None, &mut body, &now)?;
        self.commit(current, new_id, body, Op::Update).await
    }

    async fn overwrite_existing(
        &self,
        current: Document,
        explicit_id: Option<&str>,
        id_template: Option<&IdTemplate>,
        mut body: DocBody,
    ) -> Result<Document> {
        let now = self.clock.now_stamp();
        if let (Some(meta), Some(old)) = (body.meta_mut(), current.body.meta()) {
            meta.create_time = old.create_time.clone();
        }
        if let Some(meta) = body.meta_mut() {
            meta.modify_time = Some(now.clone());
        }

        let new_id = recompute_id(&current, explicit_id, id_template, &mut body, &now)?;
        self.commit(current, new_id, body, Op::Overwrite).await
    }

    async fn delete_existing(&self, current: Document) -> Result<Tombstone> {
        let rev = self
            .store
            .delete(&current.id, &current.rev)
            .await
            .map_err(|e| Op::Delete.store_error(&current.id, e))?;
        info!(id = %current.id, "Deleted document");
        self.touch(std::slice::from_ref(&current.id));
        Ok(Tombstone::new(current.id, rev))
    }

    /// Persist `body` at `new_id`, moving the document if the id changed
    async fn commit(
        &self,
        current: Document,
        new_id: String,
        body: DocBody,
        op: Op,
    ) -> Result<Document> {
        if new_id == current.id {
            if body.same_content(&current.body) {
                debug!(id = %current.id, "Content unchanged, skipping write");
                return Ok(current);
            }
            let rev = self
                .store
                .put(&current.id, Some(&current.rev), &body)
                .await
                .map_err(|e| op.store_error(&current.id, e))?;
            info!(id = %current.id, rev = %rev, "Updated document");
            self.touch(std::slice::from_ref(&current.id));
            return Ok(Document {
                id: current.id,
                rev,
                body,
            });
        }

        let rev = match self.store.put(&new_id, None, &body).await {
            Ok(rev) => rev,
            Err(StoreError::Conflict { .. }) => {
                let existing = self.store.get(&new_id).await?;
                return Err(Error::DocExists {
                    id: new_id,
                    attempted: Box::new(body),
                    existing: Box::new(existing),
                });
            }
            Err(e) => return Err(e.into()),
        };

        if let Err(e) = self.store.delete(&current.id, &current.rev).await {
            warn!(
                from = %current.id,
                to = %new_id,
                error = %e,
                "Created moved document but could not delete the old id"
            );
            return Err(op.store_error(&current.id, e));
        }

        info!(from = %current.id, to = %new_id, "Moved document");
        self.touch(std::slice::from_ref(&new_id));
        Ok(Document {
            id: new_id,
            rev,
            body,
        })
    }

    fn touch(&self, ids: &[String]) {
        if ids.is_empty() {
            return;
        }
        if let Some(observer) = &self.observer {
            observer.touched(ids);
        }
    }
}

/// Work out the id a rewritten body belongs at.
///
/// A literal id different from the current one wins and clears
/// `idStructure`. Otherwise the id is recomputed from the given template,
/// the body's `idStructure` or the current document's, in that order. With
/// none of those the id stays put.
fn recompute_id(
    current: &Document,
    explicit_id: Option<&str>,
    id_template: Option<&IdTemplate>,
    body: &mut DocBody,
    now: &str,
) -> Result<String> {
    if let Some(id) = explicit_id.filter(|id| *id != current.id) {
        let assembled = assemble_id(Some(id), None, body.data(), Stamps::default())?;
        if let Some(meta) = body.meta_mut() {
            meta.id_structure = None;
        }
        return Ok(assembled.id);
    }

    let stored = |body: &DocBody| {
        body.meta()
            .and_then(|meta| meta.id_structure.clone())
            .map(IdTemplate::new)
    };
    let template = id_template
        .cloned()
        .or_else(|| stored(body))
        .or_else(|| stored(&current.body));
    let Some(template) = template else {
        return Ok(current.id.clone());
    };

    let create_time = body.meta().and_then(|meta| meta.create_time.clone());
    let assembled = assemble_id(
        None,
        Some(&template),
        body.data(),
        Stamps {
            create_time: create_time.as_deref(),
            modify_time: Some(now),
        },
    )?;
    if let Some(meta) = body.meta_mut() {
        meta.id_structure = assembled.id_structure;
    }
    Ok(assembled.id)
}

/// Whether a refused add would have stored what is already there.
///
/// Timestamps never count. `humanId` and `random` only count when the
/// caller supplied them.
fn same_attempt(attempted: &DocBody, supplied: Option<&Meta>, existing: &DocBody) -> bool {
    match (attempted, existing) {
        (DocBody::Flat(a), DocBody::Flat(b)) => a == b,
        (
            DocBody::Structured { data: da, meta: ma },
            DocBody::Structured { data: db, meta: mb },
        ) => {
            let normalize = |meta: &Meta| Meta {
                create_time: None,
                modify_time: None,
                human_id: supplied
                    .and_then(|s| s.human_id.as_ref())
                    .and(meta.human_id.clone()),
                random: supplied.and_then(|s| s.random).and(meta.random),
                ..meta.clone()
            };
            da == db && normalize(ma) == normalize(mb)
        }
        _ => false,
    }
}

/// Short random alias: lowercase base-32 characters from a v4 uuid
fn generate_human_id() -> String {
    let mut bits = Uuid::new_v4().as_u128();
    (0..HUMAN_ID_LEN)
        .map(|_| {
            let c = HUMAN_ID_ALPHABET[(bits & 0x1f) as usize] as char;
            bits >>= 5;
            c
        })
        .collect()
}

/// Uniform float in `[0, 1)` from the random low bits of a v4 uuid
fn random_unit() -> f64 {
    const MANTISSA: u32 = 53;
    let bits = Uuid::new_v4().as_u128() as u64 & ((1u64 << MANTISSA) - 1);
    bits as f64 / (1u64 << MANTISSA) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::merge::NamedStrategy;
    use crate::storage::MemoryStore;
    use serde_json::{json, Value};
    use std::sync::Mutex;

    fn obj(value: Value) -> Object {
        value.as_object().cloned().unwrap()
    }

    fn service() -> (DocumentService<MemoryStore>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let service = DocumentService::new(Arc::new(MemoryStore::new())).with_clock(clock.clone());
        (service, clock)
    }

    fn word(data: Value) -> Payload {
        Payload::structured(obj(data)).with_id_template(IdTemplate::new("%type%_%id%"))
    }

    async fn created(service: &DocumentService<MemoryStore>, payload: Payload) -> Document {
        match service.add(payload, None).await.unwrap() {
            AddOutcome::Created(doc) => doc,
            other => panic!("expected a new document, got {other:?}"),
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Vec<String>>>);

    impl TouchObserver for Recorder {
        fn touched(&self, ids: &[String]) {
            self.0.lock().unwrap().push(ids.to_vec());
        }
    }

    #[test]
    fn test_generated_human_id_shape() {
        let hid = generate_human_id();
        assert_eq!(hid.len(), HUMAN_ID_LEN);
        assert!(hid.bytes().all(|b| HUMAN_ID_ALPHABET.contains(&b)));
        assert_ne!(generate_human_id(), hid);
    }

    #[test]
    fn test_random_unit_range() {
        for _ in 0..100 {
            let r = random_unit();
            assert!((0.0..1.0).contains(&r));
        }
    }

    #[tokio::test]
    async fn test_add_stamps_structured_documents() {
        let (service, _clock) = service();
        let doc = created(&service, word(json!({"type": "word", "id": "de"}))).await;

        assert_eq!(doc.id, "word_de");
        let meta = doc.body.meta().unwrap();
        assert_eq!(meta.create_time.as_deref(), Some("2023-11-14T22:13:20.000Z"));
        assert_eq!(meta.create_time, meta.modify_time);
        assert_eq!(meta.id_structure.as_deref(), Some("%type%_%id%"));
        assert_eq!(meta.human_id.as_ref().map(String::len), Some(HUMAN_ID_LEN));
        assert!(meta.random.is_some());
    }

    #[tokio::test]
    async fn test_add_literal_id_and_flat_body() {
        let (service, _clock) = service();
        let doc = created(
            &service,
            Payload::flat(obj(json!({"k": 1}))).with_id("plain"),
        )
        .await;

        assert_eq!(doc.id, "plain");
        assert!(doc.body.meta().is_none());

        let err = service
            .add(Payload::flat(obj(json!({"k": 1}))), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Id(_)));
    }

    #[tokio::test]
    async fn test_add_is_idempotent() {
        let (service, clock) = service();
        let payload = word(json!({"type": "word", "id": "de"}));

        let first = created(&service, payload.clone()).await;
        clock.advance(1000);

        match service.add(payload, None).await.unwrap() {
            AddOutcome::Unchanged(doc) => assert_eq!(doc, first),
            other => panic!("expected unchanged, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_add_collision_reports_existing() {
        let (service, _clock) = service();
        created(&service, word(json!({"type": "word", "id": "de", "v": 1}))).await;

        let err = service
            .add(word(json!({"type": "word", "id": "de", "v": 2})), None)
            .await
            .unwrap_err();
        match err {
            Error::DocExists {
                id,
                attempted,
                existing,
            } => {
                assert_eq!(id, "word_de");
                assert_eq!(attempted.data().get("v"), Some(&json!(2)));
                assert_eq!(existing.body.data().get("v"), Some(&json!(1)));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_add_conflict_strategies() {
        let (service, clock) = service();
        let original = created(&service, word(json!({"type": "w", "id": "x", "tags": ["a"]}))).await;
        clock.advance(10);

        let merged = service
            .add(
                word(json!({"type": "w", "id": "x", "tags": ["b"]})),
                Some(ConflictStrategy::Merge(NamedStrategy::Merge.into())),
            )
            .await
            .unwrap();
        let AddOutcome::Updated(merged) = merged else {
            panic!("expected update");
        };
        assert_eq!(merged.body.data().get("tags"), Some(&json!(["a", "b"])));
        assert_eq!(
            merged.body.meta().unwrap().create_time,
            original.body.meta().unwrap().create_time
        );

        clock.advance(10);
        let replaced = service
            .add(
                word(json!({"type": "w", "id": "x"})),
                Some(ConflictStrategy::Overwrite),
            )
            .await
            .unwrap();
        assert!(replaced.document().unwrap().body.data().get("tags").is_none());

        let deleted = service
            .add(
                word(json!({"type": "w", "id": "x"})),
                Some(ConflictStrategy::Delete),
            )
            .await
            .unwrap();
        assert!(matches!(deleted, AddOutcome::Deleted(ref t) if t.id == "w_x" && t.deleted));
        assert!(matches!(
            service.get("w_x").await,
            Err(Error::NotFound { deleted: true, .. })
        ));
    }

    #[tokio::test]
    async fn test_custom_strategy_sees_identical_writes() {
        let (service, _clock) = service();
        let payload = word(json!({"type": "w", "id": "x"}));
        created(&service, payload.clone()).await;

        let calls = Arc::new(Mutex::new(0));
        let counter = calls.clone();
        let strategy = MergeStrategy::custom(move |a, _b| {
            *counter.lock().unwrap() += 1;
            Ok(a.clone())
        });

        let outcome = service
            .add(payload, Some(ConflictStrategy::Merge(strategy)))
            .await
            .unwrap();
        assert!(matches!(outcome, AddOutcome::Updated(_)));
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_update_keeps_meta_and_skips_noop() {
        let (service, clock) = service();
        let doc = created(&service, word(json!({"type": "w", "id": "x", "n": 1}))).await;

        clock.advance(5);
        let same = service
            .update(
                "w_x",
                &Payload::structured(obj(json!({"n": 1}))),
                &MergeStrategy::default(),
            )
            .await
            .unwrap();
        assert_eq!(same.rev, doc.rev);

        clock.advance(5);
        let mut payload = Payload::structured(obj(json!({"n": 2})));
        payload.body.meta_mut().unwrap().human_id = Some("ignored".into());
        let updated = service
            .update("w_x", &payload, &NamedStrategy::PreferNew.into())
            .await
            .unwrap();

        assert_ne!(updated.rev, doc.rev);
        assert_eq!(updated.body.data().get("n"), Some(&json!(2)));
        let (old, new) = (doc.body.meta().unwrap(), updated.body.meta().unwrap());
        assert_eq!(new.create_time, old.create_time);
        assert_eq!(new.human_id, old.human_id);
        assert!(new.modify_time > old.modify_time);
    }

    #[tokio::test]
    async fn test_update_moves_when_id_fields_change() {
        let (service, _clock) = service();
        created(&service, word(json!({"type": "w", "id": "x"}))).await;

        let moved = service
            .update(
                "w_x",
                &Payload::structured(obj(json!({"id": "y"}))),
                &NamedStrategy::PreferNew.into(),
            )
            .await
            .unwrap();

        assert_eq!(moved.id, "w_y");
        assert!(matches!(
            service.get("w_x").await,
            Err(Error::NotFound { deleted: true, .. })
        ));
        assert_eq!(service.get("w_y").await.unwrap(), moved);
    }

    #[tokio::test]
    async fn test_update_move_collision_leaves_original() {
        let (service, _clock) = service();
        let original = created(&service, word(json!({"type": "w", "id": "x"}))).await;
        created(&service, word(json!({"type": "w", "id": "y"}))).await;

        let err = service
            .update(
                "w_x",
                &Payload::structured(obj(json!({"id": "y"}))),
                &NamedStrategy::PreferNew.into(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::DocExists { ref id, .. } if id == "w_y"));
        assert_eq!(service.get("w_x").await.unwrap(), original);
    }

    #[tokio::test]
    async fn test_update_literal_id_wins() {
        let (service, _clock) = service();
        created(&service, word(json!({"type": "w", "id": "x"}))).await;

        let moved = service
            .update(
                "w_x",
                &Payload::structured(obj(json!({"id": "z"}))).with_id("literal"),
                &NamedStrategy::PreferNew.into(),
            )
            .await
            .unwrap();

        assert_eq!(moved.id, "literal");
        assert!(moved.body.meta().unwrap().id_structure.is_none());
    }

    #[tokio::test]
    async fn test_revision_preconditions() {
        let (service, _clock) = service();
        created(&service, word(json!({"type": "w", "id": "x"}))).await;
        let stale = Revision::from("1-stale");

        let err = service
            .update(
                "w_x",
                &Payload::structured(obj(json!({"n": 1}))).with_rev(stale.clone()),
                &MergeStrategy::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UpdateDoc { .. }));

        let err = service
            .overwrite(
                "w_x",
                Payload::structured(obj(json!({"n": 1}))).with_rev(stale),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::OverwriteDoc { .. }));
    }

    #[tokio::test]
    async fn test_missing_documents() {
        let (service, _clock) = service();
        let payload = Payload::structured(Object::new());

        assert!(matches!(
            service.update("nope", &payload, &MergeStrategy::default()).await,
            Err(Error::NoDocToUpdate(_))
        ));
        assert!(matches!(
            service.overwrite("nope", payload).await,
            Err(Error::NoDocToOverwrite(_))
        ));
        assert!(matches!(
            service.delete("nope").await,
            Err(Error::NoDocToDelete(_))
        ));
        assert!(matches!(
            service.get("nope").await,
            Err(Error::NotFound { deleted: false, .. })
        ));
    }

    #[tokio::test]
    async fn test_overwrite_preserves_only_create_time() {
        let (service, clock) = service();
        let doc = created(&service, word(json!({"type": "w", "id": "x", "n": 1}))).await;
        clock.advance(100);

        let replaced = service
            .overwrite(
                "w_x",
                Payload::structured(obj(json!({"type": "w", "id": "x", "m": 2}))),
            )
            .await
            .unwrap();

        assert_eq!(replaced.id, "w_x");
        assert_eq!(replaced.body.data(), &obj(json!({"type": "w", "id": "x", "m": 2})));
        let (old, new) = (doc.body.meta().unwrap(), replaced.body.meta().unwrap());
        assert_eq!(new.create_time, old.create_time);
        assert!(new.human_id.is_none());
        assert_eq!(new.id_structure.as_deref(), Some("%type%_%id%"));
    }

    #[tokio::test]
    async fn test_delete_returns_tombstone() {
        let (service, _clock) = service();
        let doc = created(&service, word(json!({"type": "w", "id": "x"}))).await;

        let tombstone = service.delete("w_x").await.unwrap();
        assert_eq!(tombstone.id, "w_x");
        assert!(tombstone.deleted);
        assert_eq!(tombstone.rev.generation(), doc.rev.generation() + 1);
    }

    #[tokio::test]
    async fn test_observer_sees_writes() {
        let recorder = Arc::new(Recorder::default());
        let (service, _clock) = service();
        let service = service.with_observer(recorder.clone());

        created(&service, word(json!({"type": "w", "id": "x"}))).await;
        service.delete("w_x").await.unwrap();

        let seen = recorder.0.lock().unwrap().clone();
        assert_eq!(seen, vec![vec!["w_x".to_string()], vec!["w_x".to_string()]]);
    }

    #[tokio::test]
    async fn test_batch_reports_per_item() {
        let (service, _clock) = service();
        created(&service, word(json!({"type": "w", "id": "a"}))).await;
        created(&service, word(json!({"type": "w", "id": "b"}))).await;

        let items = service
            .update_many(
                &QuickIdQuery::parse("w_a,missing,w_b"),
                &Payload::structured(obj(json!({"seen": true}))),
                &MergeStrategy::default(),
            )
            .await;

        let ids: Vec<_> = items.iter().map(|item| item.id.as_str()).collect();
        assert_eq!(ids, vec!["w_a", "missing", "w_b"]);
        assert!(items[0].result.is_ok());
        assert!(matches!(items[1].result, Err(Error::NoQuickIdMatch(_))));
        assert!(items[2].result.is_ok());

        let deleted = service.delete_many(&QuickIdQuery::parse("w_a,w_b")).await;
        assert!(deleted.iter().all(|item| item.result.is_ok()));
        assert!(service
            .get_many(&QuickIdQuery::parse("w_a"))
            .await
            .iter()
            .all(|item| item.result.is_err()));
    }

    #[tokio::test]
    async fn test_batch_notifies_once_with_every_touched_id() {
        let recorder = Arc::new(Recorder::default());
        let (service, _clock) = service();
        let service = service.with_observer(recorder.clone());
        for id in ["a", "b", "c"] {
            created(&service, word(json!({"type": "w", "id": id}))).await;
        }
        recorder.0.lock().unwrap().clear();

        let items = service
            .update_many(
                &QuickIdQuery::parse("w_a,w_b,w_c"),
                &Payload::structured(obj(json!({"n": 1}))),
                &MergeStrategy::default(),
            )
            .await;
        assert!(items.iter().all(|item| item.result.is_ok()));

        let seen = recorder.0.lock().unwrap().clone();
        assert_eq!(seen.len(), 1);
        let mut ids = seen[0].clone();
        ids.sort();
        assert_eq!(ids, vec!["w_a", "w_b", "w_c"]);

        // unchanged documents are not reported, and an all-noop batch is silent
        service
            .update_many(
                &QuickIdQuery::parse("w_a,w_b"),
                &Payload::structured(obj(json!({"n": 1}))),
                &MergeStrategy::default(),
            )
            .await;
        assert_eq!(recorder.0.lock().unwrap().len(), 1);

        service.delete_many(&QuickIdQuery::parse("w_a,w_c")).await;
        let seen = recorder.0.lock().unwrap().clone();
        assert_eq!(seen.len(), 2);
        let mut ids = seen[1].clone();
        ids.sort();
        assert_eq!(ids, vec!["w_a", "w_c"]);
    }

    #[test]
    fn test_id_template_uses_delimiter() {
        let service = DocumentService::new(Arc::new(MemoryStore::new())).with_delimiter("-");
        let template = service.id_template(["%type%", "%id%"]).unwrap();
        assert_eq!(template.as_str(), "%type%-%id%");
        assert!(service.id_template(Vec::<String>::new()).is_none());
    }
}
