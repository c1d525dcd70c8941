use crate::budget::{BudgetBase, BudgetSources};
use crate::config::ChallengeConfig;
use crate::types::{
    AccumulatedRealized, NetworkAssignment, NetworkGroup, RankingRow, RankingSummary,
    RankingTableRow, RealizedEntry, NO_NETWORK,
};
use crate::util::{average, format_currency, format_percentage};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

/// Product column used when ranking individual portfolios.
pub const PORTFOLIO_TOTAL: &str = "Total";

/// `realized / budgeted × 100`, or 0 when nothing was budgeted.
pub fn calculate_attainment(realized: f64, budgeted: f64) -> f64 {
    if budgeted == 0.0 || !budgeted.is_finite() {
        return 0.0;
    }
    let pct = realized / budgeted * 100.0;
    if pct.is_finite() {
        pct
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttainmentStatus {
    Excellent,
    Warning,
    Danger,
}

impl AttainmentStatus {
    pub fn from_percent(pct: f64) -> Self {
        if pct >= 90.0 {
            AttainmentStatus::Excellent
        } else if pct >= 60.0 {
            AttainmentStatus::Warning
        } else {
            AttainmentStatus::Danger
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RankingUnit {
    #[default]
    Branch,
    Portfolio,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RankingOptions {
    pub unit: RankingUnit,
    pub base: BudgetBase,
    /// Only dated entries up to this day count; undated entries always do.
    pub up_to_day: Option<u32>,
}

/// Read-only snapshot of everything a ranking is computed from.
#[derive(Debug, Clone, Copy)]
pub struct RankingInput<'a> {
    pub config: &'a ChallengeConfig,
    pub budgets: BudgetSources<'a>,
    pub realized_by_product: &'a [RealizedEntry],
    pub realized_by_portfolio: &'a [RealizedEntry],
    pub networks: &'a [NetworkAssignment],
}

/// Realized total for a branch across `products`.
pub fn realized_for(entries: &[RealizedEntry], branch_prefix: &str, products: &[&str], up_to_day: Option<u32>) -> f64 {
    entries
        .iter()
        .filter(|r| r.branch_prefix == branch_prefix && r.within(up_to_day))
        .filter(|r| {
            r.product
                .as_deref()
                .map_or(false, |p| products.contains(&p))
        })
        .map(|r| r.amount)
        .sum()
}

pub fn realized_for_portfolio(
    entries: &[RealizedEntry],
    branch_prefix: &str,
    portfolio_id: &str,
    up_to_day: Option<u32>,
) -> f64 {
    entries
        .iter()
        .filter(|r| {
            r.branch_prefix == branch_prefix
                && r.portfolio_id.as_deref() == Some(portfolio_id)
                && r.within(up_to_day)
        })
        .map(|r| r.amount)
        .sum()
}

/// Network of a branch; the first assignment for the prefix wins.
pub fn network_for<'a>(networks: &'a [NetworkAssignment], branch_prefix: &str) -> &'a str {
    networks
        .iter()
        .find(|n| n.branch_prefix == branch_prefix)
        .map(|n| n.network.trim())
        .filter(|n| !n.is_empty())
        .unwrap_or(NO_NETWORK)
}

fn branch_rows(input: &RankingInput, options: &RankingOptions) -> Vec<RankingRow> {
    let products = input.config.ranking_products();
    let mut seen = HashSet::new();
    let mut rows = Vec::new();

    for record in input.budgets.master {
        let prefix = record.branch_prefix.as_str();
        if prefix.is_empty() || !seen.insert(prefix) {
            continue;
        }
        let display_name = input
            .budgets
            .master
            .iter()
            .find(|r| r.branch_prefix == prefix && !r.branch_name.is_empty())
            .map(|r| r.branch_name.clone())
            .unwrap_or_else(|| prefix.to_string());

        let mut budgeted_by_product = BTreeMap::new();
        let mut realized_by_product = BTreeMap::new();
        let mut attainment_by_product = BTreeMap::new();
        let mut attainments = Vec::with_capacity(products.len());

        for product in &products {
            let budget_product = input.config.budget_product(product);
            let product_budget = input
                .budgets
                .budget_for_branch(prefix, Some(budget_product), options.base)
                .amount;
            let realized = realized_for(
                input.realized_by_product,
                prefix,
                &input.config.constituents(product),
                options.up_to_day,
            );
            let attainment = calculate_attainment(realized, product_budget);
            attainments.push(attainment);
            budgeted_by_product.insert(product.clone(), product_budget);
            realized_by_product.insert(product.clone(), realized);
            attainment_by_product.insert(product.clone(), attainment);
        }

        // Only ranked products count towards the row total.
        let budgeted: f64 = budgeted_by_product.values().sum();
        rows.push(RankingRow {
            position: 0,
            network_position: 0,
            branch_prefix: prefix.to_string(),
            display_name,
            portfolio_id: None,
            network_group: network_for(input.networks, prefix).to_string(),
            budgeted,
            budgeted_by_product,
            realized_by_product,
            attainment_by_product,
            score: average(&attainments),
        });
    }
    rows
}

fn portfolio_rows(input: &RankingInput, options: &RankingOptions) -> Vec<RankingRow> {
    input
        .budgets
        .master
        .iter()
        .filter(|r| !r.branch_prefix.is_empty())
        .map(|record| {
            let budgeted = input
                .budgets
                .budget_for_portfolio(record, None, options.base)
                .amount;
            let realized = realized_for_portfolio(
                input.realized_by_portfolio,
                &record.branch_prefix,
                &record.portfolio_id,
                options.up_to_day,
            );
            let attainment = calculate_attainment(realized, budgeted);
            let total = PORTFOLIO_TOTAL.to_string();
            RankingRow {
                position: 0,
                network_position: 0,
                branch_prefix: record.branch_prefix.clone(),
                display_name: if record.branch_name.is_empty() {
                    record.branch_prefix.clone()
                } else {
                    record.branch_name.clone()
                },
                portfolio_id: Some(record.portfolio_id.clone()),
                network_group: network_for(input.networks, &record.branch_prefix).to_string(),
                budgeted,
                budgeted_by_product: BTreeMap::from([(total.clone(), budgeted)]),
                realized_by_product: BTreeMap::from([(total.clone(), realized)]),
                attainment_by_product: BTreeMap::from([(total, attainment)]),
                score: attainment,
            }
        })
        .collect()
}

/// Rank branches (or portfolios) by the mean attainment over the tracked
/// products, best first. Ties keep master-data order.
pub fn calculate_ranking(input: &RankingInput, options: &RankingOptions) -> Vec<RankingRow> {
    let mut rows = match options.unit {
        RankingUnit::Branch => branch_rows(input, options),
        RankingUnit::Portfolio => portfolio_rows(input, options),
    };

    // `sort_by` is stable.
    rows.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

    let mut per_network: HashMap<String, usize> = HashMap::new();
    for (idx, row) in rows.iter_mut().enumerate() {
        row.position = idx + 1;
        let counter = per_network.entry(row.network_group.clone()).or_insert(0);
        *counter += 1;
        row.network_position = *counter;
    }
    debug!(units = rows.len(), unit = ?options.unit, "ranking calculated");
    rows
}

/// Split ranked rows by network, networks in order of their best unit.
pub fn group_by_network(rows: &[RankingRow]) -> Vec<NetworkGroup> {
    let mut groups: Vec<NetworkGroup> = Vec::new();
    for row in rows {
        match groups.iter_mut().find(|g| g.network == row.network_group) {
            Some(group) => group.rows.push(row.clone()),
            None => groups.push(NetworkGroup {
                network: row.network_group.clone(),
                rows: vec![row.clone()],
            }),
        }
    }
    groups
}

/// Running realized total per (product, branch) up to a day.
pub fn accumulated_realized(
    entries: &[RealizedEntry],
    products: &[String],
    up_to_day: Option<u32>,
) -> Vec<AccumulatedRealized> {
    let mut out = Vec::new();
    for product in products {
        let mut by_prefix: BTreeMap<&str, f64> = BTreeMap::new();
        for r in entries
            .iter()
            .filter(|r| r.product.as_deref() == Some(product.as_str()) && r.within(up_to_day))
        {
            *by_prefix.entry(r.branch_prefix.as_str()).or_insert(0.0) += r.amount;
        }
        out.extend(by_prefix.into_iter().map(|(prefix, amount)| AccumulatedRealized {
            branch_prefix: prefix.to_string(),
            product: product.clone(),
            amount,
        }));
    }
    out
}

pub fn to_table_rows(rows: &[RankingRow]) -> Vec<RankingTableRow> {
    rows.iter()
        .map(|r| RankingTableRow {
            position: r.position,
            network: r.network_group.clone(),
            branch_prefix: match &r.portfolio_id {
                Some(id) => format!("{} / {}", r.branch_prefix, id),
                None => r.branch_prefix.clone(),
            },
            display_name: r.display_name.clone(),
            budgeted: format_currency(r.budgeted),
            realized: format_currency(r.realized_by_product.values().sum()),
            score: format_percentage(r.score),
        })
        .collect()
}

pub fn build_summary(config: &ChallengeConfig, rows: &[RankingRow], up_to_day: Option<u32>) -> RankingSummary {
    let networks: HashSet<&str> = rows.iter().map(|r| r.network_group.as_str()).collect();
    let scores: Vec<f64> = rows.iter().map(|r| r.score).collect();
    RankingSummary {
        challenge: config.name.clone(),
        generated_at: chrono::Local::now().format("%d/%m/%Y %H:%M:%S").to_string(),
        up_to_day,
        total_units: rows.len(),
        total_networks: networks.len(),
        total_budgeted: rows.iter().map(|r| r.budgeted).sum(),
        total_realized: rows
            .iter()
            .flat_map(|r| r.realized_by_product.values())
            .sum(),
        avg_score: average(&scores),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BudgetByPortfolioEntry, BudgetByTypeEntry, MasterPortfolioRecord};
    use pretty_assertions::assert_eq;

    fn portfolio(prefix: &str, name: &str, id: &str, kind: &str) -> MasterPortfolioRecord {
        MasterPortfolioRecord {
            branch_prefix: prefix.to_string(),
            branch_name: name.to_string(),
            portfolio_id: id.to_string(),
            portfolio_type: kind.to_string(),
        }
    }

    fn type_budget(kind: &str, product: Option<&str>, amount: f64) -> BudgetByTypeEntry {
        BudgetByTypeEntry {
            portfolio_type: kind.to_string(),
            product: product.map(str::to_string),
            amount,
        }
    }

    fn sale(prefix: &str, product: &str, amount: f64, day: Option<u32>) -> RealizedEntry {
        RealizedEntry {
            branch_prefix: prefix.to_string(),
            product: Some(product.to_string()),
            portfolio_id: None,
            amount,
            day,
        }
    }

    fn network(prefix: &str, name: &str) -> NetworkAssignment {
        NetworkAssignment {
            branch_prefix: prefix.to_string(),
            branch_name: String::new(),
            network: name.to_string(),
        }
    }

    fn config(products: &[&str]) -> ChallengeConfig {
        ChallengeConfig {
            name: "Desafio Teste".to_string(),
            products: products.iter().map(|p| p.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn attainment_never_divides_by_zero() {
        assert_eq!(calculate_attainment(123.0, 0.0), 0.0);
        assert_eq!(calculate_attainment(0.0, 0.0), 0.0);
        assert_eq!(calculate_attainment(50.0, 100.0), 50.0);
        assert_eq!(calculate_attainment(150.0, 100.0), 150.0);
    }

    #[test]
    fn status_bands() {
        assert_eq!(AttainmentStatus::from_percent(95.0), AttainmentStatus::Excellent);
        assert_eq!(AttainmentStatus::from_percent(60.0), AttainmentStatus::Warning);
        assert_eq!(AttainmentStatus::from_percent(59.99), AttainmentStatus::Danger);
    }

    #[test]
    fn ranks_best_first_and_groups_by_network() {
        let master = vec![
            portfolio("0002", "Norte", "C2", "PF"),
            portfolio("0001", "Centro", "C1", "PF"),
        ];
        let by_type = vec![type_budget("PF", None, 100.0)];
        let realized = vec![sale("0001", "Prestamista", 80.0, None), sale("0002", "Prestamista", 60.0, None)];
        let networks = vec![network("0001", "Rede Leste")];
        let cfg = config(&["Prestamista"]);
        let input = RankingInput {
            config: &cfg,
            budgets: BudgetSources::new(&master, &by_type, &[]),
            realized_by_product: &realized,
            realized_by_portfolio: &[],
            networks: &networks,
        };

        let rows = calculate_ranking(&input, &RankingOptions::default());
        let order: Vec<&str> = rows.iter().map(|r| r.branch_prefix.as_str()).collect();
        assert_eq!(order, vec!["0001", "0002"]);
        assert_eq!(rows[0].score, 80.0);
        assert_eq!(rows[1].score, 60.0);
        assert_eq!(rows[0].position, 1);
        assert_eq!(rows[1].position, 2);

        let groups = group_by_network(&rows);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].network, "Rede Leste");
        assert_eq!(groups[1].network, NO_NETWORK);
        assert_eq!(groups[1].rows[0].branch_prefix, "0002");
        assert_eq!(groups[1].rows[0].network_position, 1);
    }

    #[test]
    fn score_is_mean_over_products_and_ties_keep_order() {
        let master = vec![
            portfolio("0001", "A", "C1", "PF"),
            portfolio("0002", "B", "C2", "PF"),
            portfolio("0003", "C", "C3", "PF"),
        ];
        let by_type = vec![
            type_budget("PF", Some("Vida"), 100.0),
            type_budget("PF", Some("Prestamista"), 200.0),
        ];
        let realized = vec![
            sale("0001", "Vida", 50.0, None),
            sale("0001", "Prestamista", 100.0, None),
            sale("0002", "Vida", 100.0, None),
            sale("0003", "Prestamista", 100.0, None),
            sale("0003", "Vida", 50.0, None),
        ];
        let cfg = config(&["Prestamista", "Vida"]);
        let input = RankingInput {
            config: &cfg,
            budgets: BudgetSources::new(&master, &by_type, &[]),
            realized_by_product: &realized,
            realized_by_portfolio: &[],
            networks: &[],
        };
        let rows = calculate_ranking(&input, &RankingOptions::default());
        // 0001: (50 + 50) / 2, 0002: (0 + 100) / 2, 0003: (50 + 50) / 2
        assert!(rows.iter().all(|r| r.score == 50.0));
        let order: Vec<&str> = rows.iter().map(|r| r.branch_prefix.as_str()).collect();
        assert_eq!(order, vec!["0001", "0002", "0003"]);
        assert_eq!(rows[0].budgeted, 300.0);
        assert_eq!(rows[0].budgeted_by_product["Prestamista"], 200.0);
    }

    #[test]
    fn row_budget_covers_only_ranked_products() {
        let master = vec![portfolio("0001", "Centro", "C1", "PF")];
        let by_type = vec![
            type_budget("PF", Some("Vida"), 400.0),
            type_budget("PF", Some("Vidinha"), 100.0),
            type_budget("PF", Some("Consórcio"), 50.0),
        ];
        let cfg = config(&["Vida"]);
        let input = RankingInput {
            config: &cfg,
            budgets: BudgetSources::new(&master, &by_type, &[]),
            realized_by_product: &[],
            realized_by_portfolio: &[],
            networks: &[],
        };
        let rows = calculate_ranking(&input, &RankingOptions::default());
        assert_eq!(rows[0].budgeted, 400.0);
        assert_eq!(rows[0].budgeted, rows[0].budgeted_by_product.values().sum::<f64>());
    }

    #[test]
    fn vida_total_sums_vida_and_vidinha() {
        let master = vec![portfolio("0001", "Centro", "C1", "PF")];
        let by_type = vec![type_budget("PF", Some("Vida"), 400.0)];
        let realized = vec![
            sale("0001", "Vida", 100.0, Some(1)),
            sale("0001", "Vidinha", 100.0, Some(2)),
            sale("0001", "Vida", 1000.0, Some(9)),
        ];
        let cfg = config(&["Vida"]);
        let input = RankingInput {
            config: &cfg,
            budgets: BudgetSources::new(&master, &by_type, &[]),
            realized_by_product: &realized,
            realized_by_portfolio: &[],
            networks: &[],
        };
        let options = RankingOptions {
            up_to_day: Some(5),
            ..Default::default()
        };
        let rows = calculate_ranking(&input, &options);
        assert_eq!(rows[0].realized_by_product["Vida Total"], 200.0);
        assert_eq!(rows[0].budgeted_by_product["Vida Total"], 400.0);
        assert_eq!(rows[0].attainment_by_product["Vida Total"], 50.0);
    }

    #[test]
    fn undated_entries_combine_with_dated_ones() {
        let realized = vec![
            sale("0001", "Vida", 10.0, None),
            sale("0001", "Vida", 20.0, Some(1)),
            sale("0001", "Vida", 40.0, Some(3)),
            sale("0002", "Vida", 80.0, Some(1)),
        ];
        assert_eq!(realized_for(&realized, "0001", &["Vida"], Some(2)), 30.0);
        assert_eq!(realized_for(&realized, "0001", &["Vida"], None), 70.0);
        assert_eq!(realized_for(&realized, "0001", &["Prestamista"], None), 0.0);
    }

    #[test]
    fn ranks_individual_portfolios() {
        let master = vec![
            portfolio("0001", "Centro", "C1", "PF"),
            portfolio("0001", "Centro", "C2", "PJ"),
        ];
        let by_portfolio = vec![BudgetByPortfolioEntry {
            branch_prefix: "0001".to_string(),
            branch_name: "Centro".to_string(),
            portfolio_id: "C2".to_string(),
            portfolio_type: "PJ".to_string(),
            product: None,
            gross_budget: 1000.0,
            realized: 0.0,
            target_percent: 50.0,
            effective_budget: None,
        }];
        let realized = vec![RealizedEntry {
            branch_prefix: "0001".to_string(),
            product: None,
            portfolio_id: Some("C2".to_string()),
            amount: 250.0,
            day: Some(2),
        }];
        let cfg = config(&["Vida"]);
        let input = RankingInput {
            config: &cfg,
            budgets: BudgetSources::new(&master, &[], &by_portfolio),
            realized_by_product: &[],
            realized_by_portfolio: &realized,
            networks: &[],
        };
        let options = RankingOptions {
            unit: RankingUnit::Portfolio,
            ..Default::default()
        };
        let rows = calculate_ranking(&input, &options);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].portfolio_id.as_deref(), Some("C2"));
        assert_eq!(rows[0].score, 50.0);
        assert_eq!(rows[1].budgeted, 0.0);
        assert_eq!(rows[1].score, 0.0);
    }

    #[test]
    fn inputs_are_left_untouched() {
        let master = vec![portfolio("0001", "", "C1", "PF")];
        let by_type = vec![type_budget("PF", None, 100.0)];
        let realized = vec![sale("0001", "Vida", 30.0, None)];
        let cfg = config(&["Vida"]);
        let before = (master.clone(), by_type.clone(), realized.clone());
        let input = RankingInput {
            config: &cfg,
            budgets: BudgetSources::new(&master, &by_type, &[]),
            realized_by_product: &realized,
            realized_by_portfolio: &[],
            networks: &[],
        };
        let first = calculate_ranking(&input, &RankingOptions::default());
        let second = calculate_ranking(&input, &RankingOptions::default());
        assert_eq!(first, second);
        assert_eq!(first[0].display_name, "0001");
        assert_eq!(before, (master, by_type, realized));
    }

    #[test]
    fn accumulates_per_product_and_branch() {
        let realized = vec![
            sale("0002", "Vida", 5.0, Some(1)),
            sale("0001", "Vida", 10.0, Some(1)),
            sale("0001", "Vida", 15.0, Some(2)),
            sale("0001", "Vidinha", 1.0, Some(3)),
        ];
        let acc = accumulated_realized(&realized, &["Vida".to_string(), "Vidinha".to_string()], Some(2));
        assert_eq!(
            acc,
            vec![
                AccumulatedRealized {
                    branch_prefix: "0001".to_string(),
                    product: "Vida".to_string(),
                    amount: 25.0
                },
                AccumulatedRealized {
                    branch_prefix: "0002".to_string(),
                    product: "Vida".to_string(),
                    amount: 5.0
                },
            ]
        );
    }

    #[test]
    fn summary_and_table_rows() {
        let master = vec![portfolio("0001", "Centro", "C1", "PF")];
        let by_type = vec![type_budget("PF", None, 1000.0)];
        let realized = vec![sale("0001", "Vida", 500.0, None)];
        let cfg = config(&["Vida"]);
        let input = RankingInput {
            config: &cfg,
            budgets: BudgetSources::new(&master, &by_type, &[]),
            realized_by_product: &realized,
            realized_by_portfolio: &[],
            networks: &[],
        };
        let rows = calculate_ranking(&input, &RankingOptions::default());
        let summary = build_summary(&cfg, &rows, Some(3));
        assert_eq!(summary.total_units, 1);
        assert_eq!(summary.total_networks, 1);
        assert_eq!(summary.total_budgeted, 1000.0);
        assert_eq!(summary.total_realized, 500.0);
        assert_eq!(summary.avg_score, 50.0);

        let table = to_table_rows(&rows);
        assert_eq!(table[0].budgeted, "R$ 1.000,00");
        assert_eq!(table[0].realized, "R$ 500,00");
        assert_eq!(table[0].score, "50,00%");
        assert_eq!(table[0].network, NO_NETWORK);
    }
}
