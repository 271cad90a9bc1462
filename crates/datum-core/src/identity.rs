//! Document id assembly
//!
//! A document id is either supplied literally or computed from an id
//! template such as `%type%_%?lang%`. Placeholders name fields in the
//! document's data:
//!
//! - `%field%` is required; a missing field is an [`IdError`].
//! - `%?field%` is optional; a missing field contributes an empty string.
//!
//! Field names may be dot paths into nested objects (`%source.name%`). The
//! virtual fields `createTime` and `modifyTime` fall back to the timestamps
//! about to be stamped onto the document when the data has no such field.
//!
//! The template string is persisted as `meta.idStructure` only when the id
//! actually depends on data, so a later update can recompute it.

use serde_json::Value;
use thiserror::Error;

use crate::document::Object;

/// Delimiter used to join template parts when none is configured.
pub const DEFAULT_DELIMITER: &str = "_";

/// Errors that can occur while assembling an id
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("Missing required id field '{field}' (template '{template}')")]
    MissingField { field: String, template: String },

    #[error("Assembled id is empty (template '{template}')")]
    EmptyId { template: String },

    #[error("Explicit id must not be empty")]
    EmptyExplicitId,

    #[error("Payload has no explicit id and no id template")]
    NoIdSource,
}

/// An id template: literal text with `%field%` / `%?field%` placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdTemplate {
    structure: String,
}

impl IdTemplate {
    /// Wrap an already-joined template string (as stored in `meta.idStructure`)
    pub fn new(structure: impl Into<String>) -> Self {
        Self {
            structure: structure.into(),
        }
    }

    /// Join template parts with a delimiter.
    ///
    /// Returns `None` when there are no parts at all.
    pub fn from_parts<I, P>(parts: I, delimiter: &str) -> Option<Self>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<str>,
    {
        let parts: Vec<String> = parts
            .into_iter()
            .map(|p| p.as_ref().to_string())
            .collect();
        if parts.is_empty() {
            return None;
        }
        Some(Self::new(parts.join(delimiter)))
    }

    /// The template string
    pub fn as_str(&self) -> &str {
        &self.structure
    }

    /// Whether any placeholder references document data
    pub fn depends_on_data(&self) -> bool {
        segments(&self.structure)
            .iter()
            .any(|s| matches!(s, Segment::Field { .. }))
    }
}

impl std::fmt::Display for IdTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.structure)
    }
}

/// Timestamps about to be written, available to `createTime`/`modifyTime`
/// placeholders.
#[derive(Debug, Clone, Copy, Default)]
pub struct Stamps<'a> {
    pub create_time: Option<&'a str>,
    pub modify_time: Option<&'a str>,
}

/// Result of id assembly
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledId {
    /// The document id
    pub id: String,
    /// Template to persist as `meta.idStructure`, if the id was computed
    pub id_structure: Option<String>,
    /// Optional placeholders that resolved to an empty string
    pub unresolved_optional: Vec<String>,
}

/// Derive a document id.
///
/// A literal `explicit_id` always wins. Otherwise the template is expanded
/// against `data`.
pub fn assemble_id(
    explicit_id: Option<&str>,
    template: Option<&IdTemplate>,
    data: &Object,
    stamps: Stamps<'_>,
) -> Result<AssembledId, IdError> {
    if let Some(id) = explicit_id {
        if id.is_empty() {
            return Err(IdError::EmptyExplicitId);
        }
        return Ok(AssembledId {
            id: id.to_string(),
            id_structure: None,
            unresolved_optional: Vec::new(),
        });
    }

    let template = template.ok_or(IdError::NoIdSource)?;
    let mut id = String::new();
    let mut unresolved_optional = Vec::new();
    let mut computed = false;

    for segment in segments(template.as_str()) {
        match segment {
            Segment::Literal(text) => id.push_str(text),
            Segment::Field { name, optional } => {
                computed = true;
                match resolve_field(data, name, stamps) {
                    Some(value) => id.push_str(&value),
                    None if optional => unresolved_optional.push(name.to_string()),
                    None => {
                        return Err(IdError::MissingField {
                            field: name.to_string(),
                            template: template.to_string(),
                        })
                    }
                }
            }
        }
    }

    if id.is_empty() {
        return Err(IdError::EmptyId {
            template: template.to_string(),
        });
    }

    Ok(AssembledId {
        id,
        id_structure: computed.then(|| template.to_string()),
        unresolved_optional,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Segment<'a> {
    Literal(&'a str),
    Field { name: &'a str, optional: bool },
}

fn segments(structure: &str) -> Vec<Segment<'_>> {
    let mut out = Vec::new();
    let mut rest = structure;

    while let Some(open) = rest.find('%') {
        if open > 0 {
            out.push(Segment::Literal(&rest[..open]));
        }
        let after = &rest[open + 1..];
        let Some(close) = after.find('%') else {
            // unterminated placeholder is plain text
            out.push(Segment::Literal(&rest[open..]));
            return out;
        };
        let inner = &after[..close];
        match inner.strip_prefix('?') {
            _ if inner.is_empty() => out.push(Segment::Literal("%")),
            Some(name) => out.push(Segment::Field {
                name,
                optional: true,
            }),
            None => out.push(Segment::Field {
                name: inner,
                optional: false,
            }),
        }
        rest = &after[close + 1..];
    }

    if !rest.is_empty() {
        out.push(Segment::Literal(rest));
    }
    out
}

fn resolve_field(data: &Object, name: &str, stamps: Stamps<'_>) -> Option<String> {
    if let Some(value) = lookup(data, name).and_then(render_value) {
        return Some(value);
    }
    match name {
        "createTime" => stamps.create_time.map(str::to_string),
        "modifyTime" => stamps.modify_time.map(str::to_string),
        _ => None,
    }
}

fn lookup<'a>(data: &'a Object, name: &str) -> Option<&'a Value> {
    if let Some(value) = data.get(name) {
        return Some(value);
    }
    let mut parts = name.split('.');
    let mut current = data.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

fn render_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(_) | Value::Number(_) => Some(value.to_string()),
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(render_value)
                .collect::<Vec<_>>()
                .join(","),
        ),
        Value::Object(_) => Some(value.to_string()),
    }
}
