//! Config command handlers

use anyhow::{Context, Result};

use datum_core::Config;

use crate::output::{Output, OutputFormat};

/// Show current configuration
pub fn show(output: &Output) -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "data_dir": config.data_dir,
                    "id_delimiter": config.id_delimiter,
                    "on_ambiguous": config.on_ambiguous,
                    "database": config.sqlite_path(),
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", config.data_dir.display());
        }
        OutputFormat::Human => {
            println!("Configuration:");
            println!("  data_dir:     {}", config.data_dir.display());
            println!("  id_delimiter: {}", config.id_delimiter);
            println!("  on_ambiguous: {}", config.on_ambiguous);
            println!();
            println!("Config file: {}", Config::config_file_path().display());
            println!("Database:    {}", config.sqlite_path().display());
        }
    }

    Ok(())
}

/// Set a configuration value
pub fn set(key: String, value: String, output: &Output) -> Result<()> {
    let mut config = Config::load().context("Failed to load configuration")?;
    config.set(&key, &value)?;
    config.save().context("Failed to save configuration")?;

    output.success(&format!("Set {} = {}", key, value));

    Ok(())
}
