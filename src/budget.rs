// Budget aggregation over the two budgeting mechanisms.
//
// A branch can be budgeted per portfolio type (one amount per type, scaled by
// how many portfolios of that type it holds) or per concrete portfolio (gross
// × target% − realized). `resolve_source` decides which one applies; the two
// are never mixed for the same unit in one call.
use crate::types::{
    BranchBudgetSummary, BudgetByPortfolioEntry, BudgetByTypeEntry, MasterPortfolioRecord,
    TypePotentialRow,
};
use crate::util::format_currency;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Caller preference for the budget base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BudgetBase {
    /// Use per-portfolio budgets whenever the unit has any.
    #[default]
    Portfolio,
    /// Use per-type budgets unless none exist at all.
    Type,
}

/// Which source produced a figure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetSource {
    Portfolio,
    Type,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BudgetFigure {
    pub amount: f64,
    pub source: BudgetSource,
}

impl BudgetFigure {
    fn zero() -> Self {
        BudgetFigure {
            amount: 0.0,
            source: BudgetSource::None,
        }
    }
}

/// Source priority:
/// 1. portfolio budgets, if the caller asked for them or no type budgets
///    exist, and the unit has portfolio budgets;
/// 2. otherwise type budgets, if any exist;
/// 3. otherwise nothing.
pub fn resolve_source(base: BudgetBase, has_type_data: bool, has_portfolio_data: bool) -> BudgetSource {
    let wants_portfolio = base == BudgetBase::Portfolio || !has_type_data;
    if wants_portfolio && has_portfolio_data {
        BudgetSource::Portfolio
    } else if has_type_data {
        BudgetSource::Type
    } else {
        BudgetSource::None
    }
}

/// Entries without a product apply to every product; a `None` request sums all products.
fn applies_to(entry_product: Option<&str>, wanted: Option<&str>) -> bool {
    match (entry_product, wanted) {
        (_, None) | (None, Some(_)) => true,
        (Some(have), Some(want)) => have == want,
    }
}

/// Read-only view over everything a budget can be computed from.
#[derive(Debug, Clone, Copy)]
pub struct BudgetSources<'a> {
    pub master: &'a [MasterPortfolioRecord],
    pub by_type: &'a [BudgetByTypeEntry],
    pub by_portfolio: &'a [BudgetByPortfolioEntry],
}

impl<'a> BudgetSources<'a> {
    pub fn new(
        master: &'a [MasterPortfolioRecord],
        by_type: &'a [BudgetByTypeEntry],
        by_portfolio: &'a [BudgetByPortfolioEntry],
    ) -> Self {
        BudgetSources {
            master,
            by_type,
            by_portfolio,
        }
    }

    fn has_type_data(&self, product: Option<&str>) -> bool {
        self.by_type
            .iter()
            .any(|b| applies_to(b.product.as_deref(), product))
    }

    fn type_amount(&self, portfolio_type: &str, product: Option<&str>) -> f64 {
        self.by_type
            .iter()
            .filter(|b| b.portfolio_type == portfolio_type && applies_to(b.product.as_deref(), product))
            .map(|b| b.amount)
            .sum()
    }

    fn portfolio_entries<'s>(
        &'s self,
        branch_prefix: &'s str,
        portfolio_id: Option<&'s str>,
        product: Option<&'s str>,
    ) -> impl Iterator<Item = &'a BudgetByPortfolioEntry> + 's {
        self.by_portfolio.iter().filter(move |b| {
            b.branch_prefix == branch_prefix
                && portfolio_id.map_or(true, |id| b.portfolio_id == id)
                && applies_to(b.product.as_deref(), product)
        })
    }

    /// Budgeted figure for a branch, optionally for one product.
    pub fn budget_for_branch(&self, branch_prefix: &str, product: Option<&str>, base: BudgetBase) -> BudgetFigure {
        if branch_prefix.is_empty() {
            return BudgetFigure::zero();
        }
        let has_portfolio = self.portfolio_entries(branch_prefix, None, product).next().is_some();
        let source = resolve_source(base, self.has_type_data(product), has_portfolio);

        let amount: f64 = match source {
            BudgetSource::Portfolio => self
                .portfolio_entries(branch_prefix, None, product)
                .map(BudgetByPortfolioEntry::effective)
                .sum(),
            BudgetSource::Type => {
                // Ordered so the float sum is the same on every run.
                let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
                for p in self.master.iter().filter(|p| p.branch_prefix == branch_prefix) {
                    if !p.portfolio_type.is_empty() {
                        *counts.entry(p.portfolio_type.as_str()).or_default() += 1;
                    }
                }
                counts
                    .into_iter()
                    .map(|(kind, count)| self.type_amount(kind, product) * count as f64)
                    .sum()
            }
            BudgetSource::None => 0.0,
        };
        debug!(branch = branch_prefix, ?product, ?source, amount, "branch budget");
        BudgetFigure { amount, source }
    }

    /// Budgeted figure for a single portfolio of the master base.
    pub fn budget_for_portfolio(
        &self,
        portfolio: &MasterPortfolioRecord,
        product: Option<&str>,
        base: BudgetBase,
    ) -> BudgetFigure {
        let prefix = portfolio.branch_prefix.as_str();
        let id = Some(portfolio.portfolio_id.as_str());
        let has_portfolio = self.portfolio_entries(prefix, id, product).next().is_some();
        let source = resolve_source(base, self.has_type_data(product), has_portfolio);

        let amount: f64 = match source {
            BudgetSource::Portfolio => self
                .portfolio_entries(prefix, id, product)
                .map(BudgetByPortfolioEntry::effective)
                .sum(),
            BudgetSource::Type if !portfolio.portfolio_type.is_empty() => {
                self.type_amount(&portfolio.portfolio_type, product)
            }
            _ => 0.0,
        };
        BudgetFigure { amount, source }
    }
}

/// Potential per portfolio type: portfolios of the type × its base budget.
pub fn potential_by_type(
    master: &[MasterPortfolioRecord],
    by_type: &[BudgetByTypeEntry],
) -> Vec<TypePotentialRow> {
    let mut order: Vec<&str> = Vec::new();
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for p in master.iter().filter(|p| !p.portfolio_type.is_empty()) {
        let count = counts.entry(p.portfolio_type.as_str()).or_insert_with(|| {
            order.push(p.portfolio_type.as_str());
            0
        });
        *count += 1;
    }

    order
        .into_iter()
        .map(|kind| {
            let portfolio_count = counts.get(kind).copied().unwrap_or(0);
            let base_amount: f64 = by_type
                .iter()
                .filter(|b| b.portfolio_type == kind)
                .map(|b| b.amount)
                .sum();
            let potential = base_amount * portfolio_count as f64;
            TypePotentialRow {
                portfolio_type: kind.to_string(),
                portfolio_count,
                base_amount,
                potential,
                potential_display: format_currency(potential),
            }
        })
        .collect()
}

pub fn total_potential(rows: &[TypePotentialRow]) -> f64 {
    rows.iter().map(|r| r.potential).sum()
}

/// Label used for portfolio budgets saved without a product.
pub const ALL_PRODUCTS: &str = "Total";

/// Effective budget per branch and product, sorted by prefix.
pub fn effective_budget_by_branch(
    by_portfolio: &[BudgetByPortfolioEntry],
    products: &[String],
) -> Vec<BranchBudgetSummary> {
    let mut grouped: BTreeMap<&str, BranchBudgetSummary> = BTreeMap::new();
    for entry in by_portfolio {
        let summary = grouped
            .entry(entry.branch_prefix.as_str())
            .or_insert_with(|| BranchBudgetSummary {
                branch_prefix: entry.branch_prefix.clone(),
                branch_name: entry.branch_name.clone(),
                effective_by_product: products.iter().map(|p| (p.clone(), 0.0)).collect(),
                total: 0.0,
            });
        let product = entry.product.as_deref().unwrap_or(ALL_PRODUCTS);
        let effective = entry.effective();
        *summary
            .effective_by_product
            .entry(product.to_string())
            .or_insert(0.0) += effective;
        summary.total += effective;
    }
    grouped.into_values().collect()
}

/// Effective budget per portfolio type (`"Sem Tipo"` for untyped rows).
pub fn effective_budget_by_type(by_portfolio: &[BudgetByPortfolioEntry]) -> BTreeMap<String, f64> {
    let mut totals = BTreeMap::new();
    for entry in by_portfolio {
        let kind = if entry.portfolio_type.is_empty() {
            "Sem Tipo"
        } else {
            entry.portfolio_type.as_str()
        };
        *totals.entry(kind.to_string()).or_insert(0.0) += entry.effective();
    }
    totals
}
