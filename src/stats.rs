//! Registry statistics overview.
//!
//! Summarizes `GET /registry/stats/`: how many substances are registered and
//! how they spread over the sanitary hazard classes. Used by `chemreg stats`.

use anyhow::Result;
use serde::Serialize;

use crate::models::RegistryStats;
use crate::progress::format_number;
use crate::session::AppContext;

/// One line of the hazard breakdown.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HazardRow {
    pub class: String,
    pub label: &'static str,
    pub count: u64,
    pub percent: f64,
}

/// Hazard classes 1 to 4 plus NC (not classified).
pub fn hazard_label(class: Option<&str>) -> &'static str {
    match class.map(str::trim) {
        Some("1") => "Extremely hazardous",
        Some("2") => "Highly hazardous",
        Some("3") => "Moderately hazardous",
        Some("4") => "Low hazard",
        Some("NC") => "Not classified",
        _ => "Unspecified",
    }
}

/// Rows in class order, with share of the total. Shares are 0 when the
/// registry is empty.
pub fn hazard_rows(stats: &RegistryStats) -> Vec<HazardRow> {
    let mut rows: Vec<HazardRow> = stats
        .hazard_distribution
        .iter()
        .map(|h| HazardRow {
            class: h.sanpin_class.clone().unwrap_or_else(|| "-".to_string()),
            label: hazard_label(h.sanpin_class.as_deref()),
            count: h.count,
            percent: if stats.total_elements > 0 {
                h.count as f64 * 100.0 / stats.total_elements as f64
            } else {
                0.0
            },
        })
        .collect();
    rows.sort_by_key(|r| class_rank(&r.class));
    rows
}

fn class_rank(class: &str) -> u8 {
    match class {
        "1" => 0,
        "2" => 1,
        "3" => 2,
        "4" => 3,
        "NC" => 4,
        _ => 5,
    }
}

/// Run the stats command: fetch and print a summary.
pub async fn run_stats(ctx: &AppContext, json: bool) -> Result<()> {
    let stats = ctx.stats().await?;
    let rows = hazard_rows(&stats);

    if json {
        let out = serde_json::json!({
            "total_elements": stats.total_elements,
            "hazard_distribution": rows,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("Chemical Registry Stats");
    println!("=======================");
    println!();
    println!("  Substances:  {}", format_number(stats.total_elements));

    if !rows.is_empty() {
        println!();
        println!("  By hazard class:");
        println!("  {:<6} {:<22} {:>8} {:>7}", "CLASS", "", "COUNT", "SHARE");
        println!("  {}", "-".repeat(46));
        for r in &rows {
            println!(
                "  {:<6} {:<22} {:>8} {:>6.1}%",
                r.class,
                r.label,
                format_number(r.count),
                r.percent
            );
        }
    }

    println!();
    Ok(())
}
