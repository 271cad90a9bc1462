//! Document command handlers

use anyhow::{bail, Context, Result};
use serde_json::{json, Value};

use datum_core::{
    ConflictStrategy, DocumentService, MergeStrategy, Object, Payload, QuickIdQuery, SqliteStore,
};

use crate::editor::{confirm, edit_text};
use crate::last_touched::LastTouched;
use crate::output::Output;

pub type Service = DocumentService<SqliteStore>;

/// Arguments of `datum add`
pub struct AddArgs {
    pub payload: String,
    pub id: Option<String>,
    pub id_parts: Vec<String>,
    pub flat: bool,
    pub on_conflict: Option<String>,
}

/// Parse a JSON payload argument.
///
/// An object that is not already `{data, meta}` becomes the `data` of a
/// structured payload, unless `flat` is set. `_id` and `_rev` stay at the
/// top level either way.
pub fn parse_payload(text: &str, flat: bool) -> Result<Payload> {
    let value: Value = serde_json::from_str(text).context("Payload is not valid JSON")?;
    let Value::Object(mut object) = value else {
        bail!("Payload must be a JSON object");
    };

    if !flat && !(object.contains_key("data") && object.contains_key("meta")) {
        let mut wrapped = Object::new();
        for key in ["_id", "_rev"] {
            if let Some(v) = object.remove(key) {
                wrapped.insert(key.to_string(), v);
            }
        }
        wrapped.insert("data".to_string(), Value::Object(object));
        wrapped.insert("meta".to_string(), json!({}));
        object = wrapped;
    }

    Payload::from_value(Value::Object(object)).context("Invalid payload")
}

/// Parse `--on-conflict`: `overwrite`, `delete` or a merge strategy name
pub fn parse_conflict_strategy(name: &str) -> Result<ConflictStrategy> {
    match name.to_ascii_lowercase().as_str() {
        "overwrite" => Ok(ConflictStrategy::Overwrite),
        "delete" => Ok(ConflictStrategy::Delete),
        _ => name
            .parse::<MergeStrategy>()
            .map(ConflictStrategy::Merge)
            .with_context(|| format!("Invalid conflict strategy: {}", name)),
    }
}

/// Add a document
pub async fn add(service: &Service, args: AddArgs, output: &Output) -> Result<()> {
    let mut payload = parse_payload(&args.payload, args.flat)?;
    if let Some(id) = args.id {
        payload = payload.with_id(id);
    }
    if let Some(template) = service.id_template(&args.id_parts) {
        payload = payload.with_id_template(template);
    }
    let on_conflict = args
        .on_conflict
        .as_deref()
        .map(parse_conflict_strategy)
        .transpose()?;

    let outcome = service.add(payload, on_conflict).await?;
    output.print_add(&outcome);
    Ok(())
}

/// Show documents
pub async fn get(service: &Service, query: QuickIdQuery, output: &Output) -> Result<()> {
    let items = service.get_many(&query).await;
    let failures = output.print_batch(&items, |out, doc| out.print_document(doc));
    finish(failures, items.len())
}

/// Merge a payload into documents
pub async fn update(
    service: &Service,
    query: QuickIdQuery,
    payload: String,
    strategy: String,
    flat: bool,
    output: &Output,
) -> Result<()> {
    let payload = parse_payload(&payload, flat)?;
    let strategy: MergeStrategy = strategy
        .parse()
        .with_context(|| format!("Invalid merge strategy: {}", strategy))?;

    let items = service.update_many(&query, &payload, &strategy).await;
    let failures = output.print_batch(&items, |out, doc| out.print_document(doc));
    finish(failures, items.len())
}

/// Replace the body of documents
pub async fn overwrite(
    service: &Service,
    query: QuickIdQuery,
    payload: String,
    flat: bool,
    output: &Output,
) -> Result<()> {
    let payload = parse_payload(&payload, flat)?;
    let items = service.overwrite_many(&query, &payload).await;
    let failures = output.print_batch(&items, |out, doc| out.print_document(doc));
    finish(failures, items.len())
}

/// Edit one document in $EDITOR
pub async fn edit(service: &Service, query: QuickIdQuery, output: &Output) -> Result<()> {
    let ids = service.resolve(&query).await?;
    let [id] = ids.as_slice() else {
        bail!("Edit needs exactly one document, '{}' matched {}", query.items().join(","), ids.len());
    };

    let doc = service.get(id).await?;
    let original = serde_json::to_string_pretty(&doc.to_value())?;
    let edited = edit_text(&original)?;

    if edited.trim() == original.trim() {
        output.message("No changes.");
        return Ok(());
    }

    let value: Value = serde_json::from_str(&edited).context("Edited document is not valid JSON")?;
    let payload = Payload::from_value(value).context("Edited document is invalid")?;
    let updated = service.overwrite(id, payload).await?;

    output.success(&format!("Saved {}", updated.id));
    output.print_document(&updated);
    Ok(())
}

/// Delete documents
pub async fn delete(
    service: &Service,
    query: QuickIdQuery,
    yes: bool,
    output: &Output,
) -> Result<()> {
    let query = if output.should_prompt() && !yes {
        let ids = service.resolve(&query).await?;
        println!("Delete {} document(s):", ids.len());
        for id in &ids {
            println!("  {}", id);
        }
        if !confirm("Are you sure?")? {
            println!("Cancelled.");
            return Ok(());
        }
        QuickIdQuery::from_items(ids)
    } else {
        query
    };

    let items = service.delete_many(&query).await;
    let failures = output.print_batch(&items, |out, tombstone| out.print_tombstone(tombstone));
    finish(failures, items.len())
}

/// Print the ids a query resolves to
pub async fn resolve(service: &Service, query: QuickIdQuery, output: &Output) -> Result<()> {
    let ids = service.resolve(&query).await?;
    output.print_ids(&ids);
    Ok(())
}

/// Print the ids written by the last command
pub fn last(last: &LastTouched, output: &Output) -> Result<()> {
    let ids = last.load()?;
    output.print_ids(&ids);
    Ok(())
}

fn finish(failures: usize, total: usize) -> Result<()> {
    if failures > 0 {
        bail!("{} of {} document(s) failed", failures, total);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use datum_core::NamedStrategy;

    #[test]
    fn test_parse_payload_wraps_plain_objects() {
        let payload = parse_payload(r#"{"_id": "x", "type": "word"}"#, false).unwrap();
        assert_eq!(payload.id.as_deref(), Some("x"));
        assert!(payload.body.is_structured());
        assert_eq!(payload.body.data().get("type"), Some(&json!("word")));
        assert!(payload.body.data().get("_id").is_none());
    }

    #[test]
    fn test_parse_payload_flat_and_structured() {
        let flat = parse_payload(r#"{"type": "word"}"#, true).unwrap();
        assert!(!flat.body.is_structured());

        let structured = parse_payload(
            r#"{"data": {"a": 1}, "meta": {"idStructure": "%a%"}}"#,
            false,
        )
        .unwrap();
        assert!(structured.body.is_structured());
        assert_eq!(structured.id_template.unwrap().as_str(), "%a%");

        assert!(parse_payload("[1]", false).is_err());
        assert!(parse_payload("{", false).is_err());
    }

    #[test]
    fn test_parse_conflict_strategy() {
        assert!(matches!(
            parse_conflict_strategy("overwrite").unwrap(),
            ConflictStrategy::Overwrite
        ));
        assert!(matches!(
            parse_conflict_strategy("Delete").unwrap(),
            ConflictStrategy::Delete
        ));
        assert!(matches!(
            parse_conflict_strategy("appendSort").unwrap(),
            ConflictStrategy::Merge(MergeStrategy::Named(NamedStrategy::AppendSort))
        ));
        assert!(parse_conflict_strategy("shrug").is_err());
    }

    #[test]
    fn test_finish_reports_failures() {
        assert!(finish(0, 3).is_ok());
        assert!(finish(1, 3).is_err());
    }
}
