//! QuickId resolution
//!
//! Turns a short, possibly ambiguous, user-typed reference into canonical
//! document ids. A query may hold several comma-separated references
//! (`a,b`), with `\,` standing for a literal comma.
//!
//! Each reference is resolved independently, in three tiers:
//!
//! 1. exact id match
//! 2. human-id prefix match
//! 3. primary-id prefix match
//!
//! The first tier with any match decides the result. More than one match
//! in a tier is handled by the [`OnAmbiguous`] policy.

use std::fmt;
use std::str::FromStr;

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::error::{AmbiguousCandidate, Error, Result};
use crate::storage::{DocumentStore, StoreError};

/// What to do when a reference matches more than one document
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnAmbiguous {
    /// Fail with [`Error::AmbiguousQuickId`]
    #[default]
    Fail,
    /// Take the lexicographically lowest id
    First,
    /// Take the lexicographically highest id
    Last,
    /// Take every match
    All,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown ambiguity policy '{0}' (expected fail, first, last or all)")]
pub struct ParseOnAmbiguousError(String);

impl FromStr for OnAmbiguous {
    type Err = ParseOnAmbiguousError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail" => Ok(OnAmbiguous::Fail),
            "first" => Ok(OnAmbiguous::First),
            "last" => Ok(OnAmbiguous::Last),
            "all" => Ok(OnAmbiguous::All),
            _ => Err(ParseOnAmbiguousError(s.to_string())),
        }
    }
}

impl fmt::Display for OnAmbiguous {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OnAmbiguous::Fail => "fail",
            OnAmbiguous::First => "first",
            OnAmbiguous::Last => "last",
            OnAmbiguous::All => "all",
        })
    }
}

/// A parsed QuickId query: one or more references
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuickIdQuery {
    items: Vec<String>,
}

impl QuickIdQuery {
    /// Parse a query string.
    ///
    /// Without an unescaped comma the whole string is one reference. With
    /// one, the string is split on unescaped commas, each element trimmed
    /// and empty elements dropped, so `"abc,"` is a one-element list.
    pub fn parse(input: &str) -> Self {
        let mut items = Vec::new();
        let mut current = String::new();
        let mut is_list = false;
        let mut chars = input.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '\\' if chars.peek() == Some(&',') => {
                    current.push(',');
                    chars.next();
                }
                ',' => {
                    is_list = true;
                    items.push(std::mem::take(&mut current));
                }
                c => current.push(c),
            }
        }
        items.push(current);

        if !is_list {
            return Self { items };
        }

        Self {
            items: items
                .into_iter()
                .map(|item| item.trim().to_string())
                .filter(|item| !item.is_empty())
                .collect(),
        }
    }

    /// A query made of already separated references
    pub fn from_items<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            items: items.into_iter().map(Into::into).collect(),
        }
    }

    pub fn items(&self) -> &[String] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl From<&str> for QuickIdQuery {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}

/// Resolve every reference of `query` concurrently.
///
/// Results come back in input order, one per reference.
pub async fn resolve_each<S>(
    store: &S,
    query: &QuickIdQuery,
    on_ambiguous: OnAmbiguous,
) -> Vec<Result<Vec<String>>>
where
    S: DocumentStore + ?Sized,
{
    join_all(
        query
            .items()
            .iter()
            .map(|item| resolve_one(store, item, on_ambiguous)),
    )
    .await
}

/// Resolve `query` into a flat list of ids.
///
/// Fails with the first error in input order.
pub async fn resolve<S>(
    store: &S,
    query: &QuickIdQuery,
    on_ambiguous: OnAmbiguous,
) -> Result<Vec<String>>
where
    S: DocumentStore + ?Sized,
{
    if query.is_empty() {
        return Err(Error::NoQuickIdMatch(String::new()));
    }

    let mut ids = Vec::new();
    for result in resolve_each(store, query, on_ambiguous).await {
        ids.extend(result?);
    }
    Ok(ids)
}

/// Resolve a single reference
pub async fn resolve_one<S>(store: &S, query: &str, on_ambiguous: OnAmbiguous) -> Result<Vec<String>>
where
    S: DocumentStore + ?Sized,
{
    if query.is_empty() {
        return Err(Error::NoQuickIdMatch(String::new()));
    }

    match store.get(query).await {
        Ok(doc) => {
            debug!(query, "QuickId matched an id exactly");
            return Ok(vec![doc.id]);
        }
        Err(StoreError::NotFound { .. }) => {}
        Err(e) => return Err(e.into()),
    }

    let entries = store.scan_human_ids(query).await?;
    if !entries.is_empty() {
        debug!(query, matches = entries.len(), "QuickId matched human ids");
        let keyed = entries.into_iter().map(|e| (e.human_id, e.id)).collect();
        return pick(query, keyed, on_ambiguous);
    }

    let ids = store.scan_ids(query).await?;
    if !ids.is_empty() {
        debug!(query, matches = ids.len(), "QuickId matched id prefixes");
        let keyed = ids.into_iter().map(|id| (id.clone(), id)).collect();
        return pick(query, keyed, on_ambiguous);
    }

    Err(Error::NoQuickIdMatch(query.to_string()))
}

/// Apply the ambiguity policy to `(key, id)` matches
fn pick(
    query: &str,
    mut matches: Vec<(String, String)>,
    on_ambiguous: OnAmbiguous,
) -> Result<Vec<String>> {
    if matches.len() == 1 {
        return Ok(matches.into_iter().map(|(_, id)| id).collect());
    }

    let mut ids: Vec<String> = matches.iter().map(|(_, id)| id.clone()).collect();
    ids.sort();
    ids.dedup();

    match on_ambiguous {
        OnAmbiguous::First => Ok(ids.into_iter().take(1).collect()),
        OnAmbiguous::Last => Ok(ids.pop().into_iter().collect()),
        OnAmbiguous::All => Ok(ids),
        OnAmbiguous::Fail => {
            matches.sort();
            let keys: Vec<&str> = matches.iter().map(|(key, _)| key.as_str()).collect();
            let candidates = minimal_prefixes(&keys)
                .into_iter()
                .zip(matches.iter())
                .map(|(prefix, (_, id))| AmbiguousCandidate {
                    prefix,
                    id: id.clone(),
                })
                .collect();
            Err(Error::AmbiguousQuickId {
                query: query.to_string(),
                candidates,
            })
        }
    }
}

/// For each key of a sorted list, the shortest prefix no other key shares.
///
/// Keys that are a prefix of (or equal to) another key are returned whole.
pub fn minimal_prefixes(sorted: &[&str]) -> Vec<String> {
    sorted
        .iter()
        .enumerate()
        .map(|(i, key)| {
            let before = i.checked_sub(1).map(|j| common_prefix_len(key, sorted[j]));
            let after = sorted.get(i + 1).map(|next| common_prefix_len(key, next));
            let shared = before.into_iter().chain(after).max().unwrap_or(0);
            key.chars().take(shared + 1).collect()
        })
        .collect()
}

fn common_prefix_len(a: &str, b: &str) -> usize {
    a.chars().zip(b.chars()).take_while(|(x, y)| x == y).count()
}
