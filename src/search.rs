//! Registry search from the command line.
//!
//! `chemreg search` drives the same [`QueryComposer`] and [`SearchSession`] a
//! long-running view would: the text and filters are applied to the
//! composer, the session fetches rows and facet counts, and the first
//! settled result for the final query is printed as a table whose columns
//! come from `GET /registry/config/`.

use anyhow::{bail, Result};
use std::sync::Arc;

use crate::models::{FacetGroup, FilterValue, RegistryColumn};
use crate::query::{QueryComposer, SearchResults, SearchSession, SearchSettings};
use crate::record::{flatten, EMPTY_MARK};
use crate::session::AppContext;

/// Widest a table cell may get before it is cut.
const MAX_CELL: usize = 40;

/// Run a search and wait for its settled result.
pub async fn search(
    ctx: &AppContext,
    text: Option<&str>,
    filters: &[(String, String)],
) -> Result<SearchResults> {
    let composer = QueryComposer::new(SearchSettings::from(&ctx.config.search));
    for (key, value) in filters {
        composer.set_filter(key, Some(FilterValue::parse(value)));
    }
    if let Some(text) = text {
        composer.set_text(text);
        composer.flush_text();
    }
    let wanted = composer.row_query();

    let session = SearchSession::start(Arc::new(ctx.client().clone()), &composer);
    let mut rx = session.subscribe();
    let settled = rx
        .wait_for(|r| !r.loading && r.query == wanted)
        .await
        .map(|r| (*r).clone());
    session.dispose();
    composer.dispose();

    match settled {
        Ok(results) => Ok(results),
        Err(_) => bail!("search stopped before results arrived"),
    }
}

/// CLI entry point: search and print to stdout.
pub async fn run_search(
    ctx: &AppContext,
    text: Option<&str>,
    filters: &[(String, String)],
    json: bool,
) -> Result<()> {
    let results = search(ctx, text, filters).await?;
    if let Some(err) = &results.error {
        bail!("{}", err);
    }

    if json {
        let out = serde_json::json!({
            "count": results.total,
            "results": results.rows,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if results.rows.is_empty() {
        println!("No results.");
        return Ok(());
    }

    let columns = match ctx.columns().await {
        Ok(cols) if !cols.is_empty() => cols,
        Ok(_) => fallback_columns(),
        Err(e) => {
            eprintln!("Warning: column config unavailable ({}), using defaults", e);
            fallback_columns()
        }
    };

    let table: Vec<Vec<String>> = results
        .rows
        .iter()
        .map(|record| {
            let flat = flatten(record);
            columns.iter().map(|c| flat.display(&c.field)).collect()
        })
        .collect();
    print_table(&columns, &table);

    println!();
    println!(
        "{} of {} substances",
        results.rows.len(),
        results.total
    );
    if let Some(err) = &results.facets_error {
        eprintln!("Warning: facet counts unavailable: {}", err);
    }
    Ok(())
}

fn fallback_columns() -> Vec<RegistryColumn> {
    [
        ("primary_name_ru", "Name"),
        ("cas_number", "CAS"),
        ("status", "Status"),
    ]
    .into_iter()
    .map(|(field, header)| RegistryColumn {
        field: field.to_string(),
        header_name: header.to_string(),
        min_width: 150,
    })
    .collect()
}

fn print_table(columns: &[RegistryColumn], rows: &[Vec<String>]) {
    let widths: Vec<usize> = columns
        .iter()
        .enumerate()
        .map(|(i, c)| {
            rows.iter()
                .map(|r| r[i].chars().count())
                .chain(std::iter::once(c.header_name.chars().count()))
                .max()
                .unwrap_or(0)
                .min(MAX_CELL)
        })
        .collect();

    let header: Vec<String> = columns
        .iter()
        .zip(&widths)
        .map(|(c, w)| pad(&c.header_name.to_uppercase(), *w))
        .collect();
    println!("{}", header.join("  ").trim_end());
    println!("{}", "-".repeat(widths.iter().sum::<usize>() + 2 * widths.len().saturating_sub(1)));

    for row in rows {
        let cells: Vec<String> = row.iter().zip(&widths).map(|(v, w)| pad(v, *w)).collect();
        println!("{}", cells.join("  ").trim_end());
    }
}

/// Pad or cut `value` to exactly `width` characters.
fn pad(value: &str, width: usize) -> String {
    let count = value.chars().count();
    if count > width {
        let mut cut: String = value.chars().take(width.saturating_sub(1)).collect();
        cut.push('…');
        cut
    } else {
        format!("{}{}", value, " ".repeat(width - count))
    }
}

/// CLI entry point for `chemreg facets`.
pub async fn run_facets(ctx: &AppContext, text: Option<&str>, json: bool) -> Result<()> {
    let composer = QueryComposer::new(SearchSettings::from(&ctx.config.search));
    if let Some(text) = text {
        composer.set_text(text);
        composer.flush_text();
    }
    let groups = ctx.client().facets(&composer.facet_query()).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&facets_json(&groups))?);
        return Ok(());
    }
    if groups.is_empty() {
        println!("No facets.");
        return Ok(());
    }
    for group in &groups {
        println!("{} ({})", group.title, group.key);
        for option in &group.options {
            println!(
                "  {:<32} {:>6}   --filter {}={}",
                option.label,
                option.count,
                group.key,
                option.value.canonical()
            );
        }
        println!();
    }
    Ok(())
}

fn facets_json(groups: &[FacetGroup]) -> serde_json::Value {
    serde_json::Value::Array(
        groups
            .iter()
            .map(|g| {
                serde_json::json!({
                    "key": g.key,
                    "title": g.title,
                    "options": g.options.iter().map(|o| serde_json::json!({
                        "value": o.value.canonical(),
                        "label": o.label,
                        "count": o.count,
                    })).collect::<Vec<_>>(),
                })
            })
            .collect(),
    )
}

/// CLI entry point for `chemreg suggest`.
pub async fn run_suggest(ctx: &AppContext, text: &str) -> Result<()> {
    let items = ctx.client().suggest(text).await?;
    if items.is_empty() {
        println!("No suggestions.");
        return Ok(());
    }
    for item in &items {
        println!(
            "{:>6}  {}  {}",
            item.id,
            item.primary_name_ru,
            item.cas_number.as_deref().unwrap_or(EMPTY_MARK)
        );
    }
    Ok(())
}

/// CLI entry point for `chemreg columns`.
pub async fn run_columns(ctx: &AppContext) -> Result<()> {
    for col in ctx.columns().await? {
        println!("{:<32} {:<32} {:>5}", col.field, col.header_name, col.min_width);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pad_cuts_long_values() {
        assert_eq!(pad("abc", 5), "abc  ");
        assert_eq!(pad("abcdef", 4), "abc…");
        assert_eq!(pad("Ацетон", 6), "Ацетон");
    }

    #[test]
    fn fallback_leads_with_name() {
        assert_eq!(fallback_columns()[0].field, "primary_name_ru");
    }
}
