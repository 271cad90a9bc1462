//! Datum Core Library
//!
//! Document control for datum, a personal data-tracking tool: turning
//! partially structured JSON payloads into uniquely identified, versioned
//! documents, and changing or removing them later by approximate reference.
//!
//! # Architecture
//!
//! - **Identity**: derives document ids from templates over document data
//! - **Merge**: combines two objects under a named or custom strategy
//! - **Lifecycle**: add / update / overwrite / delete against a store
//! - **QuickId**: resolves short, possibly ambiguous references to ids
//!
//! The store is a trait; [`SqliteStore`] persists to disk and
//! [`MemoryStore`] keeps everything in memory.
//!
//! # Quick Start
//!
//! ```text
//! let store = Arc::new(SqliteStore::open(&config.sqlite_path())?);
//! let service = DocumentService::new(store);
//!
//! let payload = Payload::structured(data)
//!     .with_id_template(IdTemplate::new("%type%_%lang%"));
//! let outcome = service.add(payload, None).await?;
//!
//! let ids = service.resolve(&QuickIdQuery::parse("word_d")).await?;
//! ```
//!
//! # Modules
//!
//! - `lifecycle`: document operations (main entry point)
//! - `document`: document shapes, revisions and payloads
//! - `identity`: id templates and assembly
//! - `merge`: merge strategies
//! - `quick_id`: QuickId parsing and resolution
//! - `storage`: store trait and implementations
//! - `clock`: timestamp source
//! - `config`: application configuration

pub mod clock;
pub mod config;
pub mod document;
pub mod error;
pub mod identity;
pub mod lifecycle;
pub mod merge;
pub mod quick_id;
pub mod storage;

pub use clock::{Clock, SystemClock};
pub use config::Config;
pub use document::{DocBody, Document, DocumentError, Meta, Object, Payload, Revision, Tombstone};
pub use error::{AmbiguousCandidate, Error, Result};
pub use identity::{assemble_id, AssembledId, IdError, IdTemplate, Stamps};
pub use lifecycle::{AddOutcome, BatchItem, ConflictStrategy, DocumentService, TouchObserver};
pub use merge::{combine, merge_values, MergeError, MergeStrategy, NamedStrategy, RekeyError};
pub use quick_id::{OnAmbiguous, QuickIdQuery};
pub use storage::{DocumentStore, MemoryStore, SqliteStore, StoreError};
