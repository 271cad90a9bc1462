//! Interactive editing support
//!
//! `datum edit` hands a document's JSON to the user's editor; `datum delete`
//! asks before tombstoning.

use std::env;
use std::io::{self, Write};
use std::path::Path;
use std::process::Command;

use anyhow::{bail, Context, Result};

const FALLBACK_EDITORS: [&str; 2] = ["vi", "nano"];

/// Round-trip `content` through the user's editor and return the result
pub fn edit_text(content: &str) -> Result<String> {
    let editor = find_editor()?;
    let mut words = editor.split_whitespace();
    let Some(program) = words.next() else {
        bail!("Editor command is empty");
    };

    let mut file = tempfile::Builder::new()
        .prefix("datum-")
        .suffix(".json")
        .tempfile()
        .context("Failed to create temp file for editing")?;
    file.write_all(content.as_bytes())?;
    file.flush()?;

    let status = Command::new(program)
        .args(words)
        .arg(file.path())
        .status()
        .with_context(|| format!("Failed to run editor '{}'", editor))?;
    if !status.success() {
        bail!("Editor '{}' exited with {}", editor, status);
    }

    std::fs::read_to_string(file.path()).context("Failed to read edited document")
}

/// $VISUAL, then $EDITOR, then the first fallback editor on PATH
fn find_editor() -> Result<String> {
    let configured = ["VISUAL", "EDITOR"]
        .into_iter()
        .filter_map(|var| env::var(var).ok())
        .find(|value| !value.trim().is_empty());
    if let Some(editor) = configured {
        return Ok(editor);
    }

    let path = env::var_os("PATH").unwrap_or_default();
    FALLBACK_EDITORS
        .into_iter()
        .find(|name| on_path(name, &path))
        .map(str::to_string)
        .context("No editor found, set $EDITOR (e.g. export EDITOR=nano)")
}

fn on_path(name: &str, path: &std::ffi::OsStr) -> bool {
    env::split_paths(path).any(|dir| Path::new(&dir).join(name).is_file())
}

/// Ask a yes/no question on stdin; without a TTY the answer is no
pub fn confirm(prompt: &str) -> Result<bool> {
    if !atty::is(atty::Stream::Stdin) {
        return Ok(false);
    }

    print!("{} [y/N] ", prompt);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(is_yes(&input))
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_is_yes() {
        assert!(is_yes("y\n"));
        assert!(is_yes(" YES "));
        assert!(!is_yes(""));
        assert!(!is_yes("no"));
    }

    #[test]
    fn test_on_path() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("vi"), "").unwrap();
        let path = env::join_paths([temp_dir.path()]).unwrap();

        assert!(on_path("vi", &path));
        assert!(!on_path("nano", &path));
    }
}
