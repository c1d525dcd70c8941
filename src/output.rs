use crate::error::Result;
use crate::types::RankingRow;
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use tabled::{settings::Style, Table, Tabled};
use tracing::info;

/// `ranking-simplificado-<name>.csv`, falling back to `desafio` for unnamed challenges.
pub fn ranking_csv_file_name(challenge_name: &str) -> String {
    let name = challenge_name.trim();
    format!(
        "ranking-simplificado-{}.csv",
        if name.is_empty() { "desafio" } else { name }
    )
}

/// Simplified ranking export: `Prefixo;Agência` then budgeted, realized and
/// attainment columns per product, numbers with two decimals.
pub fn write_ranking_csv<W: Write>(writer: W, rows: &[RankingRow], products: &[String]) -> Result<()> {
    let mut wtr = csv::WriterBuilder::new().delimiter(b';').from_writer(writer);

    let mut header = vec!["Prefixo".to_string(), "Agência".to_string()];
    for p in products {
        header.push(format!("Orçado {}", p));
        header.push(format!("Realizado {}", p));
        header.push(format!("% Atingimento {}", p));
    }
    wtr.write_record(&header)?;

    for row in rows {
        let mut record = vec![row.branch_prefix.clone(), row.display_name.clone()];
        for p in products {
            let pick = |m: &std::collections::BTreeMap<String, f64>| m.get(p).copied().unwrap_or(0.0);
            record.push(format!("{:.2}", pick(&row.budgeted_by_product)));
            record.push(format!("{:.2}", pick(&row.realized_by_product)));
            record.push(format!("{:.2}%", pick(&row.attainment_by_product)));
        }
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_ranking_csv_file(path: impl AsRef<Path>, rows: &[RankingRow], products: &[String]) -> Result<()> {
    let path = path.as_ref();
    let file = std::fs::File::create(path)?;
    write_ranking_csv(file, rows, products)?;
    info!("Ranking exported to {}", path.display());
    Ok(())
}

pub fn write_json<T: Serialize>(path: impl AsRef<Path>, value: &T) -> Result<()> {
    let s = serde_json::to_string_pretty(value)?;
    std::fs::write(path, s)?;
    Ok(())
}

/// Markdown table of the first `max_rows` rows, or `(no rows)`.
pub fn render_table<T>(rows: &[T], max_rows: usize) -> String
where
    T: Tabled + Clone,
{
    let slice: Vec<T> = rows.iter().take(max_rows).cloned().collect();
    if slice.is_empty() {
        return "(no rows)".to_string();
    }
    Table::new(slice).with(Style::markdown()).to_string()
}

pub fn preview_table_rows<T>(rows: &[T], max_rows: usize)
where
    T: Tabled + Clone,
{
    println!("{}\n", render_table(rows, max_rows));
}
