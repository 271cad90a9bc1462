//! Last touched documents
//!
//! Remembers the ids written by the most recent command in
//! `last_touched.json` inside the data directory, so `datum last` can show
//! them and `@last` can stand in for them in a query.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use datum_core::TouchObserver;

/// Query shorthand for the last touched ids
pub const LAST_ALIAS: &str = "@last";

#[derive(Debug, Default, Serialize, Deserialize)]
struct Record {
    ids: Vec<String>,
}

/// File-backed record of the last touched ids
pub struct LastTouched {
    path: PathBuf,
}

impl LastTouched {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Ids from the last write; empty if nothing was recorded yet
    pub fn load(&self) -> Result<Vec<String>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {:?}", self.path))?;
        let record: Record = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {:?}", self.path))?;
        Ok(record.ids)
    }

    fn save(&self, ids: &[String]) -> Result<()> {
        let record = Record { ids: ids.to_vec() };
        let content = serde_json::to_string_pretty(&record)?;
        std::fs::write(&self.path, content)
            .with_context(|| format!("Failed to write {:?}", self.path))
    }

    /// Replace every `@last` element of a raw query with the recorded ids
    pub fn expand(&self, query: &str) -> Result<String> {
        let items = split_unescaped(query);
        if !items.iter().any(|item| item.trim() == LAST_ALIAS) {
            return Ok(query.to_string());
        }

        let ids = self.load()?;
        if ids.is_empty() {
            bail!("No documents have been touched yet");
        }
        let escaped = ids
            .iter()
            .map(|id| id.replace(',', "\\,"))
            .collect::<Vec<_>>()
            .join(",");

        let expanded: Vec<&str> = items
            .into_iter()
            .map(|item| {
                if item.trim() == LAST_ALIAS {
                    escaped.as_str()
                } else {
                    item
                }
            })
            .collect();
        // trailing comma keeps a single id in list form
        Ok(format!("{},", expanded.join(",")))
    }
}

/// Split a raw query on commas not escaped as `\,`, keeping escapes intact
fn split_unescaped(query: &str) -> Vec<&str> {
    let mut items = Vec::new();
    let mut start = 0;
    let mut prev = None;
    for (i, c) in query.char_indices() {
        if c == ',' && prev != Some('\\') {
            items.push(&query[start..i]);
            start = i + 1;
        }
        prev = Some(c);
    }
    items.push(&query[start..]);
    items
}

impl TouchObserver for LastTouched {
    fn touched(&self, ids: &[String]) {
        if let Err(e) = self.save(ids) {
            warn!("Could not record last touched ids: {:#}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use datum_core::{
        DocumentService, MemoryStore, MergeStrategy, NamedStrategy, Payload, QuickIdQuery,
    };
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_records_latest_write() {
        let temp_dir = TempDir::new().unwrap();
        let last = LastTouched::new(temp_dir.path().join("last_touched.json"));
        assert!(last.load().unwrap().is_empty());

        last.touched(&["a".to_string()]);
        last.touched(&["b".to_string(), "c".to_string()]);
        assert_eq!(last.load().unwrap(), vec!["b", "c"]);
    }

    #[test]
    fn test_expand_alias() {
        let temp_dir = TempDir::new().unwrap();
        let last = LastTouched::new(temp_dir.path().join("last_touched.json"));

        assert_eq!(last.expand("abc").unwrap(), "abc");
        assert_eq!(last.expand("a\\,@last").unwrap(), "a\\,@last");
        assert!(last.expand(LAST_ALIAS).is_err());

        last.touched(&["x,y".to_string(), "z".to_string()]);
        let expanded = last.expand(LAST_ALIAS).unwrap();
        assert_eq!(QuickIdQuery::parse(&expanded).items(), ["x,y", "z"]);
    }

    #[test]
    fn test_expand_alias_inside_list() {
        let temp_dir = TempDir::new().unwrap();
        let last = LastTouched::new(temp_dir.path().join("last_touched.json"));
        last.touched(&["x".to_string(), "y".to_string()]);

        let expanded = last.expand("@last,a").unwrap();
        assert_eq!(QuickIdQuery::parse(&expanded).items(), ["x", "y", "a"]);

        let expanded = last.expand("b\\,c, @last ").unwrap();
        assert_eq!(QuickIdQuery::parse(&expanded).items(), ["b,c", "x", "y"]);
    }

    #[tokio::test]
    async fn test_batch_update_records_every_id() {
        let temp_dir = TempDir::new().unwrap();
        let last = Arc::new(LastTouched::new(temp_dir.path().join("last_touched.json")));
        let service =
            DocumentService::new(Arc::new(MemoryStore::new())).with_observer(last.clone());

        for id in ["a", "b", "c"] {
            let payload = Payload::flat(json!({"k": 0}).as_object().cloned().unwrap()).with_id(id);
            service.add(payload, None).await.unwrap();
        }
        assert_eq!(last.load().unwrap(), vec!["c"]);

        let items = service
            .update_many(
                &QuickIdQuery::parse("a,b,c"),
                &Payload::flat(json!({"k": 1}).as_object().cloned().unwrap()),
                &MergeStrategy::from(NamedStrategy::PreferNew),
            )
            .await;
        assert!(items.iter().all(|item| item.result.is_ok()));

        let mut recorded = last.load().unwrap();
        recorded.sort();
        assert_eq!(recorded, vec!["a", "b", "c"]);
    }
}
