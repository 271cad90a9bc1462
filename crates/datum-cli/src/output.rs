//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use serde::Serialize;
use serde_json::{json, Value};

use datum_core::{AddOutcome, BatchItem, Document, Tombstone};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Check if output is in quiet mode
    pub fn is_quiet(&self) -> bool {
        matches!(self.format, OutputFormat::Quiet)
    }

    /// Check if output is JSON
    pub fn is_json(&self) -> bool {
        matches!(self.format, OutputFormat::Json)
    }

    /// Print a single document
    pub fn print_document(&self, doc: &Document) {
        match self.format {
            OutputFormat::Human => {
                println!("ID:        {}", doc.id);
                println!("Revision:  {}", doc.rev);
                if let Some(meta) = doc.body.meta() {
                    if let Some(ref human_id) = meta.human_id {
                        println!("Human ID:  {}", human_id);
                    }
                    if let Some(ref created) = meta.create_time {
                        println!("Created:   {}", created);
                    }
                    if let Some(ref modified) = meta.modify_time {
                        println!("Modified:  {}", modified);
                    }
                    if let Some(ref structure) = meta.id_structure {
                        println!("Id from:   {}", structure);
                    }
                }
                println!();
                println!("{}", pretty(&Value::Object(doc.body.data().clone())));
            }
            OutputFormat::Json => print_json(doc),
            OutputFormat::Quiet => println!("{}", doc.id),
        }
    }

    /// Print a tombstone left by a delete
    pub fn print_tombstone(&self, tombstone: &Tombstone) {
        match self.format {
            OutputFormat::Human => {
                println!("✓ Deleted {} (revision {})", tombstone.id, tombstone.rev)
            }
            OutputFormat::Json => print_json(tombstone),
            OutputFormat::Quiet => println!("{}", tombstone.id),
        }
    }

    /// Print the result of an add
    pub fn print_add(&self, outcome: &AddOutcome) {
        if self.format == OutputFormat::Human {
            match outcome {
                AddOutcome::Created(doc) => println!("✓ Created {}", doc.id),
                AddOutcome::Unchanged(doc) => println!("Already stored: {}", doc.id),
                AddOutcome::Updated(doc) => println!("✓ Updated existing {}", doc.id),
                AddOutcome::Deleted(_) => {}
            }
        }

        match outcome {
            AddOutcome::Created(doc) | AddOutcome::Unchanged(doc) | AddOutcome::Updated(doc) => {
                if self.format == OutputFormat::Human {
                    println!();
                }
                self.print_document(doc)
            }
            AddOutcome::Deleted(tombstone) => self.print_tombstone(tombstone),
        }
    }

    /// Print a list of ids
    pub fn print_ids(&self, ids: &[String]) {
        match self.format {
            OutputFormat::Human => {
                if ids.is_empty() {
                    println!("No documents.");
                    return;
                }
                for id in ids {
                    println!("{}", id);
                }
            }
            OutputFormat::Json => print_json(&ids),
            OutputFormat::Quiet => {
                for id in ids {
                    println!("{}", id);
                }
            }
        }
    }

    /// Print per-item batch results; returns the number of failures
    pub fn print_batch<T, F>(&self, items: &[BatchItem<T>], print_item: F) -> usize
    where
        T: Serialize,
        F: Fn(&Self, &T),
    {
        let failures = items.iter().filter(|item| item.result.is_err()).count();

        match self.format {
            OutputFormat::Json => {
                let rows: Vec<Value> = items
                    .iter()
                    .map(|item| match &item.result {
                        Ok(value) => json!({"id": item.id, "ok": value}),
                        Err(e) => json!({"id": item.id, "error": e.to_string()}),
                    })
                    .collect();
                print_json(&rows);
            }
            OutputFormat::Human | OutputFormat::Quiet => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 && self.format == OutputFormat::Human {
                        println!("────────────────────────────────────────");
                    }
                    match &item.result {
                        Ok(value) => print_item(self, value),
                        Err(e) => eprintln!("✗ {}: {}", truncate(&item.id, 40), e),
                    }
                }
            }
        }

        failures
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!("{}", json!({"status": "success", "message": message}));
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Check if we should prompt for confirmation
    pub fn should_prompt(&self) -> bool {
        self.format == OutputFormat::Human
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("Failed to encode output: {}", e),
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// Truncate a string to max characters, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
