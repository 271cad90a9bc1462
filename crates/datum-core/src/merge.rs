//! Merging plain objects
//!
//! Two objects `a` (old) and `b` (new) are combined key by key. Each named
//! strategy is a [`Disposition`]: whether to keep keys present only in `a`,
//! only in `b`, in both with equal values, and what to do when both sides
//! disagree. Keys whose values are objects on both sides are always merged
//! recursively with the same disposition.
//!
//! Two strategies fall outside the table: [`MergeStrategy::Rekey`], which
//! renames the keys of `a` using string values found in `b`, and
//! [`MergeStrategy::Custom`], an arbitrary function.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::document::{json_kind, Object};

/// Errors raised while merging
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MergeError {
    #[error("Cannot combine {left} with {right}: objects only merge with missing values")]
    IncompatibleValues {
        left: &'static str,
        right: &'static str,
    },

    #[error("Unknown merge strategy '{0}'")]
    UnknownStrategy(String),

    #[error(transparent)]
    Rekey(#[from] RekeyError),

    #[error("Custom merge failed: {0}")]
    Custom(String),
}

/// Errors raised by the rekey strategy
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RekeyError {
    #[error("Rekey value at '{path}' must be a string, got {found}")]
    NonString { path: String, found: &'static str },

    #[error("Rekey mapping at '{path}' is an object but the data there is not")]
    ExpectedObject { path: String },

    #[error("Rekey maps more than one key onto '{path}'")]
    Collision { path: String },
}

/// How to combine two unequal array-or-scalar values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArrayPolicy {
    /// A then B, duplicates removed
    Merge,
    /// A then B
    Append,
    /// B then A
    Prepend,
    /// Merge, then sorted
    MergeSort,
    /// Append, then sorted
    AppendSort,
}

impl ArrayPolicy {
    fn unique(self) -> bool {
        matches!(self, ArrayPolicy::Merge | ArrayPolicy::MergeSort)
    }

    fn sort(self) -> bool {
        matches!(self, ArrayPolicy::MergeSort | ArrayPolicy::AppendSort)
    }

    fn b_first(self) -> bool {
        matches!(self, ArrayPolicy::Prepend)
    }
}

/// What to do with a key present in both objects with unequal values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Conflict {
    TakeA,
    TakeB,
    Drop,
    Combine(ArrayPolicy),
}

/// Field-disposition flags of a named strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Disposition {
    pub just_a: bool,
    pub just_b: bool,
    pub same: bool,
    pub conflict: Conflict,
}

/// The built-in strategy catalogue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamedStrategy {
    PreferNew,
    PreferOld,
    Update,
    UseOld,
    UseNew,
    RemoveConflicting,
    Xor,
    Intersect,
    Merge,
    Append,
    Prepend,
    MergeSort,
    AppendSort,
}

impl NamedStrategy {
    pub const ALL: [NamedStrategy; 13] = [
        NamedStrategy::PreferNew,
        NamedStrategy::PreferOld,
        NamedStrategy::Update,
        NamedStrategy::UseOld,
        NamedStrategy::UseNew,
        NamedStrategy::RemoveConflicting,
        NamedStrategy::Xor,
        NamedStrategy::Intersect,
        NamedStrategy::Merge,
        NamedStrategy::Append,
        NamedStrategy::Prepend,
        NamedStrategy::MergeSort,
        NamedStrategy::AppendSort,
    ];

    pub fn name(self) -> &'static str {
        match self {
            NamedStrategy::PreferNew => "preferNew",
            NamedStrategy::PreferOld => "preferOld",
            NamedStrategy::Update => "update",
            NamedStrategy::UseOld => "useOld",
            NamedStrategy::UseNew => "useNew",
            NamedStrategy::RemoveConflicting => "removeConflicting",
            NamedStrategy::Xor => "xor",
            NamedStrategy::Intersect => "intersect",
            NamedStrategy::Merge => "merge",
            NamedStrategy::Append => "append",
            NamedStrategy::Prepend => "prepend",
            NamedStrategy::MergeSort => "mergeSort",
            NamedStrategy::AppendSort => "appendSort",
        }
    }

    pub fn disposition(self) -> Disposition {
        let (just_a, just_b, same, conflict) = match self {
            NamedStrategy::PreferNew => (true, true, true, Conflict::TakeB),
            NamedStrategy::PreferOld => (true, true, true, Conflict::TakeA),
            NamedStrategy::Update => (true, false, true, Conflict::TakeB),
            NamedStrategy::UseOld => (true, false, true, Conflict::TakeA),
            NamedStrategy::UseNew => (false, true, true, Conflict::TakeB),
            NamedStrategy::RemoveConflicting => (true, true, true, Conflict::Drop),
            NamedStrategy::Xor => (true, true, false, Conflict::Drop),
            NamedStrategy::Intersect => (false, false, true, Conflict::Drop),
            NamedStrategy::Merge => (true, true, true, Conflict::Combine(ArrayPolicy::Merge)),
            NamedStrategy::Append => (true, true, true, Conflict::Combine(ArrayPolicy::Append)),
            NamedStrategy::Prepend => (true, true, true, Conflict::Combine(ArrayPolicy::Prepend)),
            NamedStrategy::MergeSort => {
                (true, true, true, Conflict::Combine(ArrayPolicy::MergeSort))
            }
            NamedStrategy::AppendSort => {
                (true, true, true, Conflict::Combine(ArrayPolicy::AppendSort))
            }
        };
        Disposition {
            just_a,
            just_b,
            same,
            conflict,
        }
    }
}

impl FromStr for NamedStrategy {
    type Err = MergeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NamedStrategy::ALL
            .into_iter()
            .find(|strategy| strategy.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| MergeError::UnknownStrategy(s.to_string()))
    }
}

impl fmt::Display for NamedStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Signature of a caller-supplied merge function
pub type CustomMerge = dyn Fn(&Object, &Object) -> Result<Object, MergeError> + Send + Sync;

/// A merge strategy
#[derive(Clone)]
pub enum MergeStrategy {
    Named(NamedStrategy),
    /// Rename keys of `a` to the string values at the same path in `b`
    Rekey,
    Custom(Arc<CustomMerge>),
}

impl MergeStrategy {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&Object, &Object) -> Result<Object, MergeError> + Send + Sync + 'static,
    {
        MergeStrategy::Custom(Arc::new(f))
    }
}

impl Default for MergeStrategy {
    fn default() -> Self {
        MergeStrategy::Named(NamedStrategy::Merge)
    }
}

impl From<NamedStrategy> for MergeStrategy {
    fn from(strategy: NamedStrategy) -> Self {
        MergeStrategy::Named(strategy)
    }
}

impl FromStr for MergeStrategy {
    type Err = MergeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("rekey") {
            return Ok(MergeStrategy::Rekey);
        }
        s.parse().map(MergeStrategy::Named)
    }
}

impl fmt::Debug for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeStrategy::Named(strategy) => f.debug_tuple("Named").field(strategy).finish(),
            MergeStrategy::Rekey => f.write_str("Rekey"),
            MergeStrategy::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeStrategy::Named(strategy) => fmt::Display::fmt(strategy, f),
            MergeStrategy::Rekey => f.write_str("rekey"),
            MergeStrategy::Custom(_) => f.write_str("custom"),
        }
    }
}

/// Combine `a` and `b` with the given strategy.
///
/// Inputs are never modified.
pub fn combine(a: &Object, b: &Object, strategy: &MergeStrategy) -> Result<Object, MergeError> {
    match strategy {
        MergeStrategy::Named(named) => combine_with(a, b, named.disposition()),
        MergeStrategy::Rekey => Ok(rekey(a, b, "")?),
        MergeStrategy::Custom(f) => f(a, b),
    }
}

/// Combine `a` and `b` with an explicit disposition
pub fn combine_with(a: &Object, b: &Object, disposition: Disposition) -> Result<Object, MergeError> {
    let mut out = Object::new();

    for (key, a_value) in a {
        let Some(b_value) = b.get(key) else {
            if disposition.just_a {
                out.insert(key.clone(), a_value.clone());
            }
            continue;
        };

        if let (Value::Object(a_inner), Value::Object(b_inner)) = (a_value, b_value) {
            out.insert(
                key.clone(),
                Value::Object(combine_with(a_inner, b_inner, disposition)?),
            );
            continue;
        }

        if a_value == b_value {
            if disposition.same {
                out.insert(key.clone(), a_value.clone());
            }
            continue;
        }

        let resolved = match disposition.conflict {
            Conflict::TakeA => Some(a_value.clone()),
            Conflict::TakeB => Some(b_value.clone()),
            Conflict::Drop => None,
            Conflict::Combine(policy) => {
                let (first, second) = if policy.b_first() {
                    (b_value, a_value)
                } else {
                    (a_value, b_value)
                };
                merge_values(Some(first), Some(second), policy.unique(), policy.sort())?
            }
        };
        if let Some(value) = resolved {
            out.insert(key.clone(), value);
        }
    }

    if disposition.just_b {
        for (key, b_value) in b {
            if !a.contains_key(key) {
                out.insert(key.clone(), b_value.clone());
            }
        }
    }

    Ok(out)
}

/// Combine two values into a list.
///
/// A missing side yields the other side unchanged. Scalars are wrapped into
/// one-element lists and the lists concatenated `a` first. Objects can only
/// be combined with a missing value.
pub fn merge_values(
    a: Option<&Value>,
    b: Option<&Value>,
    unique: bool,
    sort: bool,
) -> Result<Option<Value>, MergeError> {
    let (a, b) = match (a, b) {
        (None, other) | (other, None) => return Ok(other.cloned()),
        (Some(a), Some(b)) => (a, b),
    };
    if a.is_object() || b.is_object() {
        return Err(MergeError::IncompatibleValues {
            left: json_kind(a),
            right: json_kind(b),
        });
    }

    let mut items = Vec::new();
    for value in [a, b] {
        match value {
            Value::Array(list) => items.extend(list.iter().cloned()),
            scalar => items.push(scalar.clone()),
        }
    }

    if unique {
        let mut seen: Vec<Value> = Vec::with_capacity(items.len());
        for item in items {
            if !seen.contains(&item) {
                seen.push(item);
            }
        }
        items = seen;
    }
    if sort {
        items.sort_by(compare_values);
    }

    Ok(Some(Value::Array(items)))
}

/// Total order over JSON values: null, booleans, numbers, strings, arrays,
/// objects; each compared naturally within its kind.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(value: &Value) -> u8 {
        match value {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }

    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.total_cmp(&y)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => x
            .iter()
            .zip(y)
            .map(|(x, y)| compare_values(x, y))
            .find(|o| o.is_ne())
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        (Value::Object(_), Value::Object(_)) => a.to_string().cmp(&b.to_string()),
        _ => rank(a).cmp(&rank(b)),
    }
}

fn rekey(a: &Object, mapping: &Object, path: &str) -> Result<Object, RekeyError> {
    let join = |key: &str| {
        if path.is_empty() {
            key.to_string()
        } else {
            format!("{path}.{key}")
        }
    };

    for (key, target) in mapping {
        check_mapping(target, &join(key))?;
    }

    let mut out = Object::new();
    for (key, value) in a {
        let (new_key, new_value) = match mapping.get(key) {
            None => (key.clone(), value.clone()),
            Some(Value::String(renamed)) => (renamed.clone(), value.clone()),
            Some(Value::Object(inner)) => match value {
                Value::Object(nested) => (key.clone(), Value::Object(rekey(nested, inner, &join(key))?)),
                _ => return Err(RekeyError::ExpectedObject { path: join(key) }),
            },
            Some(other) => {
                return Err(RekeyError::NonString {
                    path: join(key),
                    found: json_kind(other),
                })
            }
        };
        if out.insert(new_key.clone(), new_value).is_some() {
            return Err(RekeyError::Collision {
                path: join(&new_key),
            });
        }
    }
    Ok(out)
}

fn check_mapping(target: &Value, path: &str) -> Result<(), RekeyError> {
    match target {
        Value::String(_) => Ok(()),
        Value::Object(inner) => inner
            .iter()
            .try_for_each(|(key, value)| check_mapping(value, &format!("{path}.{key}"))),
        other => Err(RekeyError::NonString {
            path: path.to_string(),
            found: json_kind(other),
        }),
    }
}
