use crate::util::{deserialize_amount, deserialize_optional_amount};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tabled::Tabled;

/// Group used for branches with no network assignment.
pub const NO_NETWORK: &str = "Sem Rede";

/// Highest target percent accepted for a portfolio budget.
pub const MAX_TARGET_PERCENT: f64 = 200.0;

/// One portfolio of the regional master base.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterPortfolioRecord {
    pub branch_prefix: String,
    #[serde(default)]
    pub branch_name: String,
    #[serde(default)]
    pub portfolio_id: String,
    #[serde(default)]
    pub portfolio_type: String,
}

/// Budget defined once per portfolio type (optionally per product) and
/// multiplied by the number of portfolios of that type a branch holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetByTypeEntry {
    pub portfolio_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    #[serde(default, deserialize_with = "deserialize_amount")]
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetByPortfolioEntry {
    pub branch_prefix: String,
    #[serde(default)]
    pub branch_name: String,
    pub portfolio_id: String,
    #[serde(default)]
    pub portfolio_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    #[serde(default, deserialize_with = "deserialize_amount")]
    pub gross_budget: f64,
    #[serde(default, deserialize_with = "deserialize_amount")]
    pub realized: f64,
    #[serde(default = "default_target_percent", deserialize_with = "deserialize_amount")]
    pub target_percent: f64,
    #[serde(default, deserialize_with = "deserialize_optional_amount")]
    pub effective_budget: Option<f64>,
}

fn default_target_percent() -> f64 {
    100.0
}

/// `max(0, gross × target% / 100 − realized)`.
pub fn effective_budget(gross_budget: f64, target_percent: f64, realized: f64) -> f64 {
    let value = gross_budget * target_percent / 100.0 - realized;
    if value.is_finite() {
        value.max(0.0)
    } else {
        0.0
    }
}

impl BudgetByPortfolioEntry {
    /// Stored effective figure, or the formula when it was never computed.
    pub fn effective(&self) -> f64 {
        match self.effective_budget {
            Some(v) => v.max(0.0),
            None => effective_budget(self.gross_budget, self.target_percent, self.realized),
        }
    }

    /// Change the target (clamped to 0..=200) and recompute the effective budget.
    pub fn set_target_percent(&mut self, target_percent: f64) {
        let target = if target_percent.is_finite() {
            target_percent.clamp(0.0, MAX_TARGET_PERCENT)
        } else {
            default_target_percent()
        };
        self.target_percent = target;
        self.effective_budget = Some(effective_budget(self.gross_budget, target, self.realized));
    }
}

/// Realized sales for a branch, keyed by product or by portfolio.
///
/// `day == None` marks undated/legacy totals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealizedEntry {
    pub branch_prefix: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub portfolio_id: Option<String>,
    #[serde(default, deserialize_with = "deserialize_amount")]
    pub amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day: Option<u32>,
}

impl RealizedEntry {
    pub fn within(&self, up_to_day: Option<u32>) -> bool {
        match (self.day, up_to_day) {
            (None, _) | (_, None) => true,
            (Some(day), Some(limit)) => day <= limit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkAssignment {
    pub branch_prefix: String,
    #[serde(default)]
    pub branch_name: String,
    pub network: String,
}

/// Derived ranking line; recomputed on demand, never stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankingRow {
    pub position: usize,
    pub network_position: usize,
    pub branch_prefix: String,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub portfolio_id: Option<String>,
    pub network_group: String,
    pub budgeted: f64,
    pub budgeted_by_product: BTreeMap<String, f64>,
    pub realized_by_product: BTreeMap<String, f64>,
    pub attainment_by_product: BTreeMap<String, f64>,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NetworkGroup {
    pub network: String,
    pub rows: Vec<RankingRow>,
}

/// Console/CSV rendering of a ranking line.
#[derive(Debug, Serialize, Tabled, Clone)]
pub struct RankingTableRow {
    #[serde(rename = "Posição")]
    #[tabled(rename = "Posição")]
    pub position: usize,
    #[serde(rename = "Rede")]
    #[tabled(rename = "Rede")]
    pub network: String,
    #[serde(rename = "Prefixo")]
    #[tabled(rename = "Prefixo")]
    pub branch_prefix: String,
    #[serde(rename = "Dependência")]
    #[tabled(rename = "Dependência")]
    pub display_name: String,
    #[serde(rename = "Orçado")]
    #[tabled(rename = "Orçado")]
    pub budgeted: String,
    #[serde(rename = "Realizado")]
    #[tabled(rename = "Realizado")]
    pub realized: String,
    #[serde(rename = "Score")]
    #[tabled(rename = "Score")]
    pub score: String,
}

#[derive(Debug, Serialize, Tabled, Clone, PartialEq)]
pub struct TypePotentialRow {
    #[serde(rename = "TipoCarteira")]
    #[tabled(rename = "TipoCarteira")]
    pub portfolio_type: String,
    #[serde(rename = "QtdCarteiras")]
    #[tabled(rename = "QtdCarteiras")]
    pub portfolio_count: usize,
    #[tabled(skip)]
    #[serde(rename = "OrcamentoBase")]
    pub base_amount: f64,
    #[tabled(skip)]
    #[serde(rename = "Potencial")]
    pub potential: f64,
    #[serde(skip)]
    #[tabled(rename = "Potencial")]
    pub potential_display: String,
}

/// Per-branch effective budget per product (portfolio budget screen).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchBudgetSummary {
    pub branch_prefix: String,
    pub branch_name: String,
    pub effective_by_product: BTreeMap<String, f64>,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccumulatedRealized {
    pub branch_prefix: String,
    pub product: String,
    pub amount: f64,
}

#[derive(Debug, Serialize)]
pub struct RankingSummary {
    pub challenge: String,
    pub generated_at: String,
    pub up_to_day: Option<u32>,
    pub total_units: usize,
    pub total_networks: usize,
    pub total_budgeted: f64,
    pub total_realized: f64,
    pub avg_score: f64,
}
