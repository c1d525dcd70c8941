// Pasted-spreadsheet ingestion: text → rows → detected columns → records.
//
// Nothing in here fails. Blank text gives no rows, unknown headers stay
// unmapped and short rows are dropped, so the caller can always show the
// user what was understood and let them fix the mapping.
use crate::types::{
    effective_budget, BudgetByPortfolioEntry, BudgetByTypeEntry, MasterPortfolioRecord,
    NetworkAssignment, RealizedEntry,
};
use crate::util::parse_numeric_value;
use csv::ReaderBuilder;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

/// Target fields a pasted column can be mapped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    BranchPrefix,
    BranchName,
    PortfolioId,
    PortfolioType,
    Budget,
    Realized,
    Amount,
    Network,
    Product,
}

pub const MASTER_FIELDS: [Field; 4] = [
    Field::BranchPrefix,
    Field::BranchName,
    Field::PortfolioId,
    Field::PortfolioType,
];

pub const NETWORK_FIELDS: [Field; 3] = [Field::BranchPrefix, Field::BranchName, Field::Network];

pub const BUDGET_BY_TYPE_FIELDS: [Field; 3] = [Field::PortfolioType, Field::Product, Field::Amount];

pub const BUDGET_BY_PORTFOLIO_FIELDS: [Field; 6] = [
    Field::BranchPrefix,
    Field::BranchName,
    Field::PortfolioId,
    Field::PortfolioType,
    Field::Budget,
    Field::Realized,
];

pub const REALIZED_BY_PRODUCT_FIELDS: [Field; 2] = [Field::BranchPrefix, Field::Amount];

pub const REALIZED_BY_PORTFOLIO_FIELDS: [Field; 3] =
    [Field::BranchPrefix, Field::PortfolioId, Field::Amount];

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

impl Field {
    pub fn label(&self) -> &'static str {
        match self {
            Field::BranchPrefix => "Prefixo",
            Field::BranchName => "Agência",
            Field::PortfolioId => "Carteira",
            Field::PortfolioType => "TipoCarteira",
            Field::Budget => "Orçado",
            Field::Realized => "Realizado",
            Field::Amount => "Valor",
            Field::Network => "Rede",
            Field::Product => "Produto",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Field::Budget | Field::Realized | Field::Amount)
    }

    /// Look up a field by its label, ignoring case (`"tipocarteira"` works).
    pub fn from_label(label: &str) -> Option<Field> {
        let wanted = label.trim().to_lowercase();
        ALL_FIELDS
            .iter()
            .copied()
            .find(|f| f.label().to_lowercase() == wanted)
    }

    /// Whether a header cell names this field.
    ///
    /// `Carteira` and `TipoCarteira` overlap: the id rule rejects any header
    /// mentioning "tipo" so "Tipo de Carteira" only lands on the type field.
    pub fn matches_header(&self, header: &str) -> bool {
        let h = header.trim().to_lowercase();
        match self {
            Field::BranchPrefix => contains_any(&h, &["prefixo", "prefix"]),
            Field::BranchName => contains_any(
                &h,
                &["agência", "agencia", "dependência", "dependencia", "nome"],
            ),
            Field::PortfolioId => h.contains("carteira") && !h.contains("tipo"),
            Field::PortfolioType => h.contains("tipo") && h.contains("carteira"),
            Field::Budget => contains_any(&h, &["orçado", "orcado", "conexão", "conexao"]),
            Field::Realized => h.contains("realizado"),
            Field::Amount => h.contains("valor"),
            Field::Network => h.contains("rede"),
            Field::Product => h.contains("produto"),
        }
    }
}

const ALL_FIELDS: [Field; 9] = [
    Field::BranchPrefix,
    Field::BranchName,
    Field::PortfolioId,
    Field::PortfolioType,
    Field::Budget,
    Field::Realized,
    Field::Amount,
    Field::Network,
    Field::Product,
];

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.label())
    }
}

/// Split pasted spreadsheet text on newlines and tabs.
///
/// No quoting: a tab inside a cell is a column break.
pub fn parse_tab_delimited(text: &str) -> Vec<Vec<String>> {
    parse_delimited(text, b'\t')
}

pub fn parse_delimited(text: &str, delimiter: u8) -> Vec<Vec<String>> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    // Whitespace-only lines around the paste are dropped; trailing tabs of
    // real rows are empty cells and stay.
    let lines: Vec<&str> = text.lines().collect();
    let first = lines.iter().position(|l| !l.trim().is_empty()).unwrap_or(0);
    let last = lines.iter().rposition(|l| !l.trim().is_empty()).unwrap_or(0);
    let body = lines[first..=last].join("\n");
    let mut rdr = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .quoting(false)
        .from_reader(body.as_bytes());

    let mut rows = Vec::new();
    for (idx, result) in rdr.records().enumerate() {
        match result {
            Ok(record) => rows.push(record.iter().map(|c| c.to_string()).collect()),
            Err(e) => warn!(line = idx + 1, "skipping unreadable line: {}", e),
        }
    }
    rows
}

/// Delimiter of the first non-blank line: tab, then `;`, then `,`.
pub fn sniff_delimiter(text: &str) -> u8 {
    let first = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    [b'\t', b';', b',']
        .into_iter()
        .find(|d| first.contains(char::from(*d)))
        .unwrap_or(b'\t')
}

/// Header row plus data rows of one paste.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sheet {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Sheet {
    pub fn parse(text: &str) -> Self {
        Self::from_rows(parse_tab_delimited(text))
    }

    /// Contents of a saved sheet: like [`Sheet::parse`] but a header line
    /// without tabs is split on `;` or `,` instead.
    pub fn parse_file_text(text: &str) -> Self {
        Self::from_rows(parse_delimited(text, sniff_delimiter(text)))
    }

    pub fn from_rows(rows: Vec<Vec<String>>) -> Self {
        let mut iter = rows.into_iter();
        match iter.next() {
            Some(header) => Sheet {
                header,
                rows: iter.collect(),
            },
            None => Sheet::default(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.header.is_empty() && self.rows.is_empty()
    }

    pub fn detect(&self, targets: &[Field]) -> ColumnMapping {
        detect_columns(&self.header, targets)
    }

    pub fn map(&self, mapping: &ColumnMapping, targets: &[Field]) -> Vec<MappedRecord> {
        map_rows(&self.rows, mapping, targets)
    }
}

/// Field → column index. Absent means "not mapped, treat as empty".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMapping {
    columns: BTreeMap<Field, usize>,
}

impl ColumnMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: Field) -> Option<usize> {
        self.columns.get(&field).copied()
    }

    /// User override; `None` clears the field.
    pub fn set(&mut self, field: Field, column: Option<usize>) {
        match column {
            Some(idx) => {
                self.columns.insert(field, idx);
            }
            None => {
                self.columns.remove(&field);
            }
        }
    }

    pub fn with(mut self, field: Field, column: usize) -> Self {
        self.set(field, Some(column));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Field, usize)> + '_ {
        self.columns.iter().map(|(f, i)| (*f, *i))
    }

    /// Targets still waiting for a column; the caller has to surface these.
    pub fn unmapped(&self, targets: &[Field]) -> Vec<Field> {
        targets
            .iter()
            .copied()
            .filter(|f| !self.columns.contains_key(f))
            .collect()
    }

    /// Cell for `field` in `row`, or `""` when unmapped or the row is short.
    pub fn cell<'a>(&self, row: &'a [String], field: Field) -> &'a str {
        self.get(field)
            .and_then(|idx| row.get(idx))
            .map(|s| s.trim())
            .unwrap_or("")
    }

    /// Apply a `Label=index` override (`Label=` or `Label=-` clears it).
    /// Returns the field that changed, or `None` when the line is not understood.
    pub fn apply_override(&mut self, line: &str) -> Option<Field> {
        let (label, column) = line.split_once('=')?;
        let field = Field::from_label(label)?;
        let column = column.trim();
        if column.is_empty() || column == "-" {
            self.set(field, None);
        } else {
            self.set(field, Some(column.parse().ok()?));
        }
        Some(field)
    }
}

/// Guess a column for every target: the first header cell matching the
/// field's synonyms wins, unmatched fields stay unmapped.
pub fn detect_columns(header: &[String], targets: &[Field]) -> ColumnMapping {
    let mut mapping = ColumnMapping::new();
    for field in targets {
        if let Some(idx) = header.iter().position(|h| field.matches_header(h)) {
            mapping.set(*field, Some(idx));
        }
    }
    let missing = mapping.unmapped(targets);
    if !missing.is_empty() {
        debug!(?missing, "columns not detected");
    }
    mapping
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappedRecord {
    /// Position among the data rows (header excluded).
    pub row_index: usize,
    text: BTreeMap<Field, String>,
    numbers: BTreeMap<Field, f64>,
}

impl MappedRecord {
    pub fn text(&self, field: Field) -> &str {
        self.text.get(&field).map(String::as_str).unwrap_or("")
    }

    pub fn amount(&self, field: Field) -> f64 {
        self.numbers.get(&field).copied().unwrap_or(0.0)
    }
}

/// Fields that identify a row. Rows where all of them are empty are dropped.
fn identity_fields(targets: &[Field]) -> Vec<Field> {
    let keys: Vec<Field> = targets
        .iter()
        .copied()
        .filter(|f| matches!(f, Field::BranchPrefix | Field::PortfolioId))
        .collect();
    if keys.is_empty() {
        // Per-type budgets carry neither a prefix nor a portfolio.
        targets
            .iter()
            .copied()
            .filter(|f| *f == Field::PortfolioType)
            .collect()
    } else {
        keys
    }
}

/// Apply a confirmed mapping to data rows (header already removed).
pub fn map_rows(rows: &[Vec<String>], mapping: &ColumnMapping, targets: &[Field]) -> Vec<MappedRecord> {
    let keys = identity_fields(targets);
    let mut out = Vec::new();
    let mut dropped = 0usize;

    for (row_index, row) in rows.iter().enumerate() {
        if row.len() < 2 {
            dropped += 1;
            continue;
        }
        let mut record = MappedRecord {
            row_index,
            ..Default::default()
        };
        for field in targets {
            let value = mapping.cell(row, *field);
            if field.is_numeric() {
                record.numbers.insert(*field, parse_numeric_value(value));
            }
            record.text.insert(*field, value.to_string());
        }
        if !keys.is_empty() && keys.iter().all(|k| record.text(*k).is_empty()) {
            dropped += 1;
            continue;
        }
        out.push(record);
    }

    if dropped > 0 {
        debug!(dropped, kept = out.len(), "dropped incomplete rows");
    }
    out
}

pub fn master_records(records: &[MappedRecord]) -> Vec<MasterPortfolioRecord> {
    records
        .iter()
        .map(|r| MasterPortfolioRecord {
            branch_prefix: r.text(Field::BranchPrefix).to_string(),
            branch_name: r.text(Field::BranchName).to_string(),
            portfolio_id: r.text(Field::PortfolioId).to_string(),
            portfolio_type: r.text(Field::PortfolioType).to_string(),
        })
        .collect()
}

pub fn network_assignments(records: &[MappedRecord]) -> Vec<NetworkAssignment> {
    records
        .iter()
        .map(|r| NetworkAssignment {
            branch_prefix: r.text(Field::BranchPrefix).to_string(),
            branch_name: r.text(Field::BranchName).to_string(),
            network: r.text(Field::Network).to_string(),
        })
        .collect()
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

/// Per-type budgets. A `Produto` column wins over `product` when filled.
pub fn budget_by_type_entries(records: &[MappedRecord], product: Option<&str>) -> Vec<BudgetByTypeEntry> {
    records
        .iter()
        .map(|r| BudgetByTypeEntry {
            portfolio_type: r.text(Field::PortfolioType).to_string(),
            product: non_empty(r.text(Field::Product)).or_else(|| product.map(str::to_string)),
            amount: r.amount(Field::Amount),
        })
        .collect()
}

/// Per-portfolio budgets with the effective figure precomputed.
///
/// Rows without a portfolio id cannot be joined against the master base
/// and are skipped.
pub fn budget_by_portfolio_entries(
    records: &[MappedRecord],
    product: Option<&str>,
    target_percent: f64,
) -> Vec<BudgetByPortfolioEntry> {
    records
        .iter()
        .filter(|r| !r.text(Field::BranchPrefix).is_empty() && !r.text(Field::PortfolioId).is_empty())
        .map(|r| {
            let gross = r.amount(Field::Budget);
            let realized = r.amount(Field::Realized);
            BudgetByPortfolioEntry {
                branch_prefix: r.text(Field::BranchPrefix).to_string(),
                branch_name: r.text(Field::BranchName).to_string(),
                portfolio_id: r.text(Field::PortfolioId).to_string(),
                portfolio_type: r.text(Field::PortfolioType).to_string(),
                product: product.map(str::to_string),
                gross_budget: gross,
                realized,
                target_percent,
                effective_budget: Some(effective_budget(gross, target_percent, realized)),
            }
        })
        .collect()
}

pub fn realized_entries(
    records: &[MappedRecord],
    product: Option<&str>,
    day: Option<u32>,
) -> Vec<RealizedEntry> {
    records
        .iter()
        .filter(|r| !r.text(Field::BranchPrefix).is_empty())
        .map(|r| RealizedEntry {
            branch_prefix: r.text(Field::BranchPrefix).to_string(),
            product: non_empty(r.text(Field::Product)).or_else(|| product.map(str::to_string)),
            portfolio_id: non_empty(r.text(Field::PortfolioId)),
            amount: r.amount(Field::Amount),
            day,
        })
        .collect()
}
