//! Document shapes
//!
//! A persisted body is either *structured* (`{ data, meta }`, where `meta`
//! carries lifecycle fields) or *flat* (an arbitrary object with no
//! lifecycle metadata). The shape is decided once, when a JSON value enters
//! the crate, and carried as [`DocBody`] from then on.

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::identity::IdTemplate;

/// A plain JSON object
pub type Object = Map<String, Value>;

/// Errors raised when a JSON value cannot be turned into a document
#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("Document must be a JSON object, got {0}")]
    NotAnObject(&'static str),

    #[error("Field '{field}' must be {expected}")]
    InvalidType {
        field: &'static str,
        expected: &'static str,
    },

    #[error("Structured document has unexpected top-level key '{0}'")]
    UnexpectedKey(String),

    #[error("Invalid metadata: {0}")]
    InvalidMeta(#[from] serde_json::Error),
}

/// Keys with special meaning at the top level of a document
mod keys {
    pub const ID: &str = "_id";
    pub const REV: &str = "_rev";
    pub const DELETED: &str = "_deleted";
    pub const DATA: &str = "data";
    pub const META: &str = "meta";
}

/// Opaque store-assigned revision token, shaped `<generation>-<hex>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(String);

impl Revision {
    /// A fresh revision for the given generation
    pub fn with_generation(generation: u64) -> Self {
        Self(format!("{}-{}", generation, Uuid::new_v4().simple()))
    }

    /// The revision that follows this one
    pub fn next(&self) -> Self {
        Self::with_generation(self.generation() + 1)
    }

    /// Generation number; unparseable revisions count as generation 0
    pub fn generation(&self) -> u64 {
        self.0
            .split_once('-')
            .and_then(|(n, _)| n.parse().ok())
            .unwrap_or(0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Revision {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Revision {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl std::fmt::Display for Revision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// System fields of a structured document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Meta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modify_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub human_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_structure: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub random: Option<f64>,
    /// Fields owned by other collaborators, kept as-is
    #[serde(flatten)]
    pub extra: Object,
}

/// Document body
#[derive(Debug, Clone, PartialEq)]
pub enum DocBody {
    /// Arbitrary object without lifecycle metadata
    Flat(Object),
    /// User data plus system metadata
    Structured { data: Object, meta: Meta },
}

impl DocBody {
    /// A structured body with empty metadata
    pub fn structured(data: Object) -> Self {
        DocBody::Structured {
            data,
            meta: Meta::default(),
        }
    }

    /// Classify a JSON object.
    ///
    /// `_id`, `_rev` and `_deleted` must already have been removed.
    pub fn from_object(mut object: Object) -> Result<Self, DocumentError> {
        if !(object.contains_key(keys::DATA) && object.contains_key(keys::META)) {
            return Ok(DocBody::Flat(object));
        }

        let data = match object.remove(keys::DATA) {
            Some(Value::Object(data)) => data,
            _ => {
                return Err(DocumentError::InvalidType {
                    field: keys::DATA,
                    expected: "an object",
                })
            }
        };
        let meta = match object.remove(keys::META) {
            Some(meta @ Value::Object(_)) => serde_json::from_value(meta)?,
            _ => {
                return Err(DocumentError::InvalidType {
                    field: keys::META,
                    expected: "an object",
                })
            }
        };
        if let Some(key) = object.keys().next() {
            return Err(DocumentError::UnexpectedKey(key.clone()));
        }

        Ok(DocBody::Structured { data, meta })
    }

    /// Classify a JSON value
    pub fn from_value(value: Value) -> Result<Self, DocumentError> {
        match value {
            Value::Object(object) => Self::from_object(object),
            other => Err(DocumentError::NotAnObject(json_kind(&other))),
        }
    }

    /// Serialize back to a JSON object
    pub fn to_object(&self) -> Object {
        match self {
            DocBody::Flat(object) => object.clone(),
            DocBody::Structured { data, meta } => {
                let mut object = Object::new();
                object.insert(keys::DATA.to_string(), Value::Object(data.clone()));
                object.insert(
                    keys::META.to_string(),
                    serde_json::to_value(meta).unwrap_or_else(|_| Value::Object(Object::new())),
                );
                object
            }
        }
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.to_object())
    }

    pub fn is_structured(&self) -> bool {
        matches!(self, DocBody::Structured { .. })
    }

    /// User fields: `data` for structured bodies, everything for flat ones
    pub fn data(&self) -> &Object {
        match self {
            DocBody::Flat(object) => object,
            DocBody::Structured { data, .. } => data,
        }
    }

    pub fn meta(&self) -> Option<&Meta> {
        match self {
            DocBody::Flat(_) => None,
            DocBody::Structured { meta, .. } => Some(meta),
        }
    }

    pub fn meta_mut(&mut self) -> Option<&mut Meta> {
        match self {
            DocBody::Flat(_) => None,
            DocBody::Structured { meta, .. } => Some(meta),
        }
    }

    pub fn human_id(&self) -> Option<&str> {
        self.meta().and_then(|m| m.human_id.as_deref())
    }

    /// Compare bodies the way writes do: `modifyTime` is refreshed by every
    /// write and does not count as content.
    pub fn same_content(&self, other: &DocBody) -> bool {
        match (self, other) {
            (DocBody::Flat(a), DocBody::Flat(b)) => a == b,
            (
                DocBody::Structured { data: da, meta: ma },
                DocBody::Structured { data: db, meta: mb },
            ) => {
                da == db
                    && Meta {
                        modify_time: None,
                        ..ma.clone()
                    } == Meta {
                        modify_time: None,
                        ..mb.clone()
                    }
            }
            _ => false,
        }
    }
}

/// A live document as read from the store
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub rev: Revision,
    pub body: DocBody,
}

impl Document {
    /// JSON form with `_id` and `_rev` at the top level
    pub fn to_value(&self) -> Value {
        let mut object = Object::new();
        object.insert(keys::ID.to_string(), Value::String(self.id.clone()));
        object.insert(keys::REV.to_string(), Value::String(self.rev.to_string()));
        object.extend(self.body.to_object());
        Value::Object(object)
    }

    pub fn human_id(&self) -> Option<&str> {
        self.body.human_id()
    }
}

impl Serialize for Document {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

/// What a delete leaves behind
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tombstone {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev")]
    pub rev: Revision,
    #[serde(rename = "_deleted")]
    pub deleted: bool,
}

impl Tombstone {
    pub fn new(id: impl Into<String>, rev: Revision) -> Self {
        Self {
            id: id.into(),
            rev,
            deleted: true,
        }
    }
}

/// Caller input for lifecycle operations
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    /// Literal id, if the caller supplied one
    pub id: Option<String>,
    /// Revision precondition
    pub rev: Option<Revision>,
    /// Template to compute the id from when no literal id is given
    pub id_template: Option<IdTemplate>,
    pub body: DocBody,
}

impl Payload {
    /// A structured payload carrying only user data
    pub fn structured(data: Object) -> Self {
        Self::from_body(DocBody::structured(data))
    }

    /// A data-only payload
    pub fn flat(object: Object) -> Self {
        Self::from_body(DocBody::Flat(object))
    }

    pub fn from_body(body: DocBody) -> Self {
        Self {
            id: None,
            rev: None,
            id_template: None,
            body,
        }
    }

    /// Parse a JSON payload.
    ///
    /// `_id` and `_rev` are lifted out of the body. For structured payloads
    /// `meta.idStructure` becomes the id template.
    pub fn from_value(value: Value) -> Result<Self, DocumentError> {
        let mut object = match value {
            Value::Object(object) => object,
            other => return Err(DocumentError::NotAnObject(json_kind(&other))),
        };

        let id = take_string(&mut object, keys::ID)?;
        let rev = take_string(&mut object, keys::REV)?.map(Revision::from);
        object.remove(keys::DELETED);

        let mut body = DocBody::from_object(object)?;
        let id_template = body
            .meta_mut()
            .and_then(|meta| meta.id_structure.take())
            .map(IdTemplate::new);

        Ok(Self {
            id,
            rev,
            id_template,
            body,
        })
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_rev(mut self, rev: Revision) -> Self {
        self.rev = Some(rev);
        self
    }

    pub fn with_id_template(mut self, template: IdTemplate) -> Self {
        self.id_template = Some(template);
        self
    }
}

fn take_string(object: &mut Object, key: &'static str) -> Result<Option<String>, DocumentError> {
    match object.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(DocumentError::InvalidType {
            field: key,
            expected: "a string",
        }),
    }
}

/// Short name of a JSON value's kind, for error messages
pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
