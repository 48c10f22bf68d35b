use std::io::{self, Write};

use clap::ValueEnum;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Tab separated columns
    #[default]
    Text,
    /// Raw JSON:API resources
    Json,
}

/// Prints `items` as JSON, or one tab separated row per item.
pub fn print_list<T, F>(format: OutputFormat, items: &[T], empty: &str, row: F) -> anyhow::Result<()>
where
    T: Serialize,
    F: Fn(&T) -> Vec<String>,
{
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match format {
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut out, items)?;
            writeln!(out)?;
        }
        OutputFormat::Text if items.is_empty() => writeln!(out, "{}", empty)?,
        OutputFormat::Text => {
            for item in items {
                writeln!(out, "{}", row(item).join("\t"))?;
            }
        }
    }
    Ok(())
}

pub fn print_one<T: Serialize>(format: OutputFormat, item: &T, text: impl FnOnce(&T) -> String) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(item)?),
        OutputFormat::Text => println!("{}", text(item)),
    }
    Ok(())
}
