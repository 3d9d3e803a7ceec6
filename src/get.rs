//! Substance record retrieval and submission.
//!
//! `chemreg get` prints a record section by section, or as the flat field
//! view with `--flat`. `chemreg save` submits a record read from a JSON file;
//! the file's sectioned structure is sent as-is, never a flattened copy.

use anyhow::{Context, Result};
use std::path::Path;

use crate::error::ApiError;
use crate::record::{flatten, format_value, owning_section, SubstanceRecord, EMPTY_MARK};
use crate::session::AppContext;

/// CLI entry point: fetch a record and print it to stdout.
pub async fn run_get(ctx: &AppContext, id: i64, flat: bool, json: bool) -> Result<()> {
    let record = ctx.client().element(id).await?;

    if json {
        if flat {
            let view = flatten(&record);
            println!("{}", serde_json::to_string_pretty(&view.values)?);
        } else {
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        return Ok(());
    }

    println!("--- Substance ---");
    if let Some(id) = record.id {
        println!("id:           {}", id);
    }
    println!("name:         {}", record.primary_name_ru);
    println!(
        "cas_number:   {}",
        record.cas_number.as_deref().unwrap_or(EMPTY_MARK)
    );
    if let Some(status) = record.status {
        println!("status:       {}", status.label());
    }
    if let Some(updated) = record.updated_at {
        println!("updated_at:   {}", updated.format("%Y-%m-%d %H:%M"));
    }

    if flat {
        print_flat(&record);
    } else {
        print_sections(&record);
    }
    Ok(())
}

fn print_sections(record: &SubstanceRecord) {
    for (section, fields) in record.sections() {
        println!();
        println!("[{}]", section);
        for (field, value) in fields {
            println!("  {:<32} {}", field, format_value(value));
        }
    }
}

fn print_flat(record: &SubstanceRecord) {
    let view = flatten(record);
    println!();
    for (field, value) in &view.values {
        println!("{:<34} {}", field, format_value(value));
    }
    for c in &view.collisions {
        let owner = owning_section(&c.field)
            .map(|s| s.as_str())
            .unwrap_or("undeclared");
        eprintln!(
            "Warning: field '{}' from {} shadowed by {} (declared owner: {})",
            c.field,
            c.shadowed.as_deref().unwrap_or("top level"),
            c.winner,
            owner
        );
    }
}

/// Read a record from a JSON file.
pub fn read_record(path: &Path) -> Result<SubstanceRecord> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read record file: {}", path.display()))?;
    let record: SubstanceRecord = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse record file: {}", path.display()))?;
    Ok(record)
}

/// CLI entry point: create (no id) or update (with id) a record from a file.
pub async fn run_save(ctx: &AppContext, path: &Path, id: Option<i64>) -> Result<()> {
    let record = read_record(path)?;
    let id = id.or(record.id);

    let saved = match id {
        Some(id) => ctx.client().update_element(id, &record).await,
        None => ctx.client().create_element(&record).await,
    };

    match saved {
        Ok(saved) => {
            println!(
                "Saved element {} ({})",
                saved.id.map(|i| i.to_string()).unwrap_or_else(|| "?".into()),
                saved.primary_name_ru
            );
            Ok(())
        }
        Err(ApiError::Validation(fields)) => {
            for (field, messages) in fields.fields() {
                eprintln!("  {}: {}", field, messages.join(", "));
            }
            anyhow::bail!("record rejected: {} field(s) invalid", fields.len())
        }
        Err(e) => Err(e.into()),
    }
}
