//! `tflow print_settings`.

use anyhow::{Context, Result};

use tflow::artifacts::format_settings;
use tflow::options::ResolvedOptions;

pub fn print_settings(options: &ResolvedOptions, json: bool) -> Result<()> {
    if json {
        let text = serde_json::to_string_pretty(options.as_map())
            .context("Failed to serialize settings")?;
        println!("{}", text);
    } else {
        print!("{}", format_settings(options));
    }
    Ok(())
}
