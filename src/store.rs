//! Key-value persistence for challenge data.
//!
//! Only this module knows the key names and the JSON layout. Everything else
//! gets typed records from [`Repository`] and hands typed records back.

use crate::config::ChallengeConfig;
use crate::error::{DesafioError, Result};
use crate::reports::RankingInput;
use crate::budget::BudgetSources;
use crate::types::{
    BudgetByPortfolioEntry, BudgetByTypeEntry, MasterPortfolioRecord, NetworkAssignment,
    RealizedEntry,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// String-keyed store whose values are JSON texts.
pub trait Store {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: String) -> Result<()>;
    fn remove(&mut self, key: &str) -> Result<()>;
    fn keys(&self) -> Vec<String>;
}

#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    values: BTreeMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: String) -> Result<()> {
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.values.remove(key);
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        self.values.keys().cloned().collect()
    }
}

/// One JSON document on disk, rewritten after every change.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    values: BTreeMap<String, String>,
}

impl FileStore {
    /// Open (or start) the store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut values = BTreeMap::new();
        if path.exists() {
            let text = std::fs::read_to_string(&path)?;
            if !text.trim().is_empty() {
                let doc: Map<String, Value> = serde_json::from_str(&text)?;
                for (key, value) in doc {
                    values.insert(key, value.to_string());
                }
            }
            info!("Opened store {} ({} keys)", path.display(), values.len());
        }
        Ok(FileStore { path, values })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> Result<()> {
        let mut doc = Map::new();
        for (key, raw) in &self.values {
            let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone()));
            doc.insert(key.clone(), value);
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(&Value::Object(doc))?)?;
        Ok(())
    }
}

impl Store for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: String) -> Result<()> {
        self.values.insert(key.to_string(), value);
        self.flush()
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        if self.values.remove(key).is_some() {
            self.flush()?;
        }
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        self.values.keys().cloned().collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKey {
    Challenge,
    MasterPortfolios,
    BudgetsByType,
    BudgetsByPortfolio,
    Networks,
    RealizedByProduct,
    RealizedByPortfolio,
}

impl StoreKey {
    pub const ALL: [StoreKey; 7] = [
        StoreKey::Challenge,
        StoreKey::MasterPortfolios,
        StoreKey::BudgetsByType,
        StoreKey::BudgetsByPortfolio,
        StoreKey::Networks,
        StoreKey::RealizedByProduct,
        StoreKey::RealizedByPortfolio,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKey::Challenge => "challenge_config",
            StoreKey::MasterPortfolios => "carteiras_master",
            StoreKey::BudgetsByType => "orcados_por_tipo",
            StoreKey::BudgetsByPortfolio => "orcados_por_carteira",
            StoreKey::Networks => "redes",
            StoreKey::RealizedByProduct => "realizados_tipo",
            StoreKey::RealizedByPortfolio => "realizados_carteira",
        }
    }
}

/// Keep everything outside the bucket, then append the new bucket contents.
pub fn replace_bucket<T, F>(existing: &[T], incoming: Vec<T>, in_bucket: F) -> Vec<T>
where
    T: Clone,
    F: Fn(&T) -> bool,
{
    existing
        .iter()
        .filter(|e| !in_bucket(e))
        .cloned()
        .chain(incoming)
        .collect()
}

/// Replace the `(day, product)` bucket; `product == None` replaces the whole day.
pub fn resave_realized(
    existing: &[RealizedEntry],
    incoming: Vec<RealizedEntry>,
    day: Option<u32>,
    product: Option<&str>,
) -> Vec<RealizedEntry> {
    replace_bucket(existing, incoming, |e| {
        e.day == day && product.map_or(true, |p| e.product.as_deref() == Some(p))
    })
}

/// Product buckets a budget save replaces: the requested one plus every
/// product carried by the incoming rows (a `Produto` column wins per row).
fn product_buckets<'a>(
    incoming: impl Iterator<Item = &'a Option<String>>,
    requested: Option<&str>,
) -> Vec<Option<String>> {
    let mut buckets = vec![requested.map(str::to_string)];
    for product in incoming {
        if !buckets.contains(product) {
            buckets.push(product.clone());
        }
    }
    buckets
}

fn no_data() -> DesafioError {
    DesafioError::Validation("no data to save".to_string())
}

/// Owned copy of all pipeline inputs.
#[derive(Debug, Clone, Default)]
pub struct StoreSnapshot {
    pub challenge: ChallengeConfig,
    pub master: Vec<MasterPortfolioRecord>,
    pub by_type: Vec<BudgetByTypeEntry>,
    pub by_portfolio: Vec<BudgetByPortfolioEntry>,
    pub networks: Vec<NetworkAssignment>,
    pub realized_by_product: Vec<RealizedEntry>,
    pub realized_by_portfolio: Vec<RealizedEntry>,
}

impl StoreSnapshot {
    pub fn budgets(&self) -> BudgetSources<'_> {
        BudgetSources::new(&self.master, &self.by_type, &self.by_portfolio)
    }

    pub fn ranking_input(&self) -> RankingInput<'_> {
        RankingInput {
            config: &self.challenge,
            budgets: self.budgets(),
            realized_by_product: &self.realized_by_product,
            realized_by_portfolio: &self.realized_by_portfolio,
            networks: &self.networks,
        }
    }
}

/// Typed access to a [`Store`].
#[derive(Debug)]
pub struct Repository<S: Store> {
    store: S,
}

impl<S: Store> Repository<S> {
    pub fn new(store: S) -> Self {
        Repository { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_inner(self) -> S {
        self.store
    }

    /// Unreadable values fall back to the default, like a fresh install.
    fn read<T: DeserializeOwned + Default>(&self, key: StoreKey) -> T {
        match self.store.get(key.as_str()) {
            Some(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!(key = key.as_str(), "ignoring unreadable stored value: {}", e);
                T::default()
            }),
            None => T::default(),
        }
    }

    fn write<T: Serialize + ?Sized>(&mut self, key: StoreKey, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.store.set(key.as_str(), raw)
    }

    pub fn challenge(&self) -> ChallengeConfig {
        self.read(StoreKey::Challenge)
    }

    pub fn save_challenge(&mut self, config: &ChallengeConfig) -> Result<()> {
        config.validate()?;
        self.write(StoreKey::Challenge, config)?;
        info!(products = config.products.len(), days = config.days, "challenge saved");
        Ok(())
    }

    pub fn master_portfolios(&self) -> Vec<MasterPortfolioRecord> {
        self.read(StoreKey::MasterPortfolios)
    }

    /// Replace the whole master base.
    pub fn save_master_portfolios(&mut self, records: &[MasterPortfolioRecord]) -> Result<usize> {
        if records.is_empty() {
            return Err(no_data());
        }
        self.write(StoreKey::MasterPortfolios, records)?;
        info!("{} portfolios saved", records.len());
        Ok(records.len())
    }

    pub fn networks(&self) -> Vec<NetworkAssignment> {
        self.read(StoreKey::Networks)
    }

    pub fn save_networks(&mut self, networks: &[NetworkAssignment]) -> Result<usize> {
        if networks.is_empty() {
            return Err(no_data());
        }
        self.write(StoreKey::Networks, networks)?;
        info!("{} network assignments saved", networks.len());
        Ok(networks.len())
    }

    pub fn budgets_by_type(&self) -> Vec<BudgetByTypeEntry> {
        self.read(StoreKey::BudgetsByType)
    }

    /// Replace the type budgets of one product (`None`: product-less budgets).
    pub fn save_budgets_by_type(&mut self, entries: Vec<BudgetByTypeEntry>, product: Option<&str>) -> Result<usize> {
        if entries.is_empty() {
            return Err(no_data());
        }
        let count = entries.len();
        let buckets = product_buckets(entries.iter().map(|e| &e.product), product);
        let merged = replace_bucket(&self.budgets_by_type(), entries, |e| buckets.contains(&e.product));
        self.write(StoreKey::BudgetsByType, &merged)?;
        info!(?product, count, "type budgets saved");
        Ok(count)
    }

    pub fn budgets_by_portfolio(&self) -> Vec<BudgetByPortfolioEntry> {
        self.read(StoreKey::BudgetsByPortfolio)
    }

    pub fn save_budgets_by_portfolio(
        &mut self,
        entries: Vec<BudgetByPortfolioEntry>,
        product: Option<&str>,
    ) -> Result<usize> {
        if entries.is_empty() {
            return Err(no_data());
        }
        let count = entries.len();
        let buckets = product_buckets(entries.iter().map(|e| &e.product), product);
        let merged = replace_bucket(&self.budgets_by_portfolio(), entries, |e| buckets.contains(&e.product));
        self.write(StoreKey::BudgetsByPortfolio, &merged)?;
        info!(?product, count, "portfolio budgets saved");
        Ok(count)
    }

    /// Apply a new target percent to the stored portfolio budgets of a
    /// product (all of them when `None`), recomputing the effective figures.
    pub fn set_target_percent(&mut self, product: Option<&str>, target_percent: f64) -> Result<usize> {
        let mut entries = self.budgets_by_portfolio();
        let mut changed = 0usize;
        for entry in entries
            .iter_mut()
            .filter(|e| product.map_or(true, |p| e.product.as_deref() == Some(p)))
        {
            entry.set_target_percent(target_percent);
            changed += 1;
        }
        if changed > 0 {
            self.write(StoreKey::BudgetsByPortfolio, &entries)?;
        }
        Ok(changed)
    }

    pub fn realized_by_product(&self) -> Vec<RealizedEntry> {
        self.read(StoreKey::RealizedByProduct)
    }

    /// Save one product's realized figures for a day (`None`: undated totals),
    /// replacing whatever that day held for the product.
    pub fn save_realized_by_product(
        &mut self,
        entries: Vec<RealizedEntry>,
        product: &str,
        day: Option<u32>,
    ) -> Result<usize> {
        if entries.is_empty() {
            return Err(no_data());
        }
        let count = entries.len();
        let merged = resave_realized(&self.realized_by_product(), entries, day, Some(product));
        self.write(StoreKey::RealizedByProduct, &merged)?;
        info!(product, ?day, count, "realized by product saved");
        Ok(count)
    }

    pub fn realized_by_portfolio(&self) -> Vec<RealizedEntry> {
        self.read(StoreKey::RealizedByPortfolio)
    }

    pub fn save_realized_by_portfolio(&mut self, entries: Vec<RealizedEntry>, day: Option<u32>) -> Result<usize> {
        if entries.is_empty() {
            return Err(no_data());
        }
        let count = entries.len();
        let merged = resave_realized(&self.realized_by_portfolio(), entries, day, None);
        self.write(StoreKey::RealizedByPortfolio, &merged)?;
        info!(?day, count, "realized by portfolio saved");
        Ok(count)
    }

    pub fn clear(&mut self, key: StoreKey) -> Result<()> {
        self.store.remove(key.as_str())
    }

    pub fn reset_all(&mut self) -> Result<()> {
        for key in StoreKey::ALL {
            self.store.remove(key.as_str())?;
        }
        warn!("all challenge data removed");
        Ok(())
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            challenge: self.challenge(),
            master: self.master_portfolios(),
            by_type: self.budgets_by_type(),
            by_portfolio: self.budgets_by_portfolio(),
            networks: self.networks(),
            realized_by_product: self.realized_by_product(),
            realized_by_portfolio: self.realized_by_portfolio(),
        }
    }

    /// Every known key with a value, as one pretty JSON object.
    pub fn export_backup(&self) -> Result<String> {
        let mut doc = Map::new();
        for key in StoreKey::ALL {
            if let Some(raw) = self.store.get(key.as_str()) {
                let value = serde_json::from_str(&raw).unwrap_or(Value::String(raw));
                doc.insert(key.as_str().to_string(), value);
            }
        }
        Ok(serde_json::to_string_pretty(&Value::Object(doc))?)
    }

    /// Write back every key of a backup document. Returns how many keys were restored.
    pub fn import_backup(&mut self, text: &str) -> Result<usize> {
        let doc: Value = serde_json::from_str(text)
            .map_err(|e| DesafioError::Backup(format!("invalid JSON file: {}", e)))?;
        let Value::Object(entries) = doc else {
            return Err(DesafioError::Backup("backup must be a JSON object".to_string()));
        };
        let count = entries.len();
        for (key, value) in entries {
            self.store.set(&key, value.to_string())?;
        }
        info!("{} keys restored from backup", count);
        Ok(count)
    }
}

/// `backup-desafios-2024-05-31.json`
pub fn backup_file_name(date: chrono::NaiveDate) -> String {
    format!("backup-desafios-{}.json", date.format("%Y-%m-%d"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn sale(prefix: &str, product: &str, amount: f64, day: Option<u32>) -> RealizedEntry {
        RealizedEntry {
            branch_prefix: prefix.to_string(),
            product: Some(product.to_string()),
            portfolio_id: None,
            amount,
            day,
        }
    }

    fn master() -> Vec<MasterPortfolioRecord> {
        vec![MasterPortfolioRecord {
            branch_prefix: "0001".to_string(),
            branch_name: "Centro".to_string(),
            portfolio_id: "C1".to_string(),
            portfolio_type: "PF".to_string(),
        }]
    }

    #[test]
    fn resaving_a_day_replaces_only_that_day() {
        let mut repo = Repository::new(MemoryStore::new());
        repo.save_realized_by_product(vec![sale("0001", "Vida", 10.0, Some(2))], "Vida", Some(2))
            .unwrap();
        repo.save_realized_by_product(
            vec![sale("0001", "Vida", 30.0, Some(3)), sale("0002", "Vida", 5.0, Some(3))],
            "Vida",
            Some(3),
        )
        .unwrap();
        repo.save_realized_by_product(vec![sale("0001", "Prestamista", 7.0, Some(3))], "Prestamista", Some(3))
            .unwrap();
        repo.save_realized_by_product(vec![sale("0001", "Vida", 99.0, Some(3))], "Vida", Some(3))
            .unwrap();

        let stored = repo.realized_by_product();
        let day3_vida: Vec<f64> = stored
            .iter()
            .filter(|r| r.day == Some(3) && r.product.as_deref() == Some("Vida"))
            .map(|r| r.amount)
            .collect();
        assert_eq!(day3_vida, vec![99.0]);
        assert!(stored.iter().any(|r| r.day == Some(2) && r.amount == 10.0));
        assert!(stored.iter().any(|r| r.product.as_deref() == Some("Prestamista")));
        assert_eq!(stored.len(), 3);
    }

    #[test]
    fn whole_day_replacement() {
        let existing = vec![
            sale("0001", "Vida", 1.0, Some(1)),
            sale("0001", "Prestamista", 2.0, Some(1)),
            sale("0001", "Vida", 3.0, None),
        ];
        let merged = resave_realized(&existing, vec![sale("0001", "Vida", 9.0, Some(1))], Some(1), None);
        assert_eq!(merged, vec![sale("0001", "Vida", 3.0, None), sale("0001", "Vida", 9.0, Some(1))]);
    }

    #[test]
    fn empty_saves_are_rejected() {
        let mut repo = Repository::new(MemoryStore::new());
        let err = repo.save_master_portfolios(&[]).unwrap_err();
        assert!(err.to_string().contains("no data to save"));
        assert!(repo.save_realized_by_portfolio(Vec::new(), Some(1)).is_err());
        assert!(repo.save_challenge(&ChallengeConfig::default()).is_err());
    }

    #[test]
    fn target_percent_recomputes_effective_budget() {
        let mut repo = Repository::new(MemoryStore::new());
        let entry = BudgetByPortfolioEntry {
            branch_prefix: "0001".to_string(),
            branch_name: "Centro".to_string(),
            portfolio_id: "C1".to_string(),
            portfolio_type: "PF".to_string(),
            product: Some("Vida".to_string()),
            gross_budget: 1000.0,
            realized: 300.0,
            target_percent: 100.0,
            effective_budget: Some(700.0),
        };
        repo.save_budgets_by_portfolio(vec![entry], Some("Vida")).unwrap();
        assert_eq!(repo.set_target_percent(Some("Vida"), 20.0).unwrap(), 1);
        assert_eq!(repo.budgets_by_portfolio()[0].effective_budget, Some(0.0));
        assert_eq!(repo.set_target_percent(Some("Prestamista"), 20.0).unwrap(), 0);
        repo.set_target_percent(None, 150.0).unwrap();
        assert_eq!(repo.budgets_by_portfolio()[0].effective(), 1200.0);
    }

    #[test]
    fn type_budgets_replace_per_product() {
        let mut repo = Repository::new(MemoryStore::new());
        let budget = |kind: &str, product: &str, amount: f64| BudgetByTypeEntry {
            portfolio_type: kind.to_string(),
            product: Some(product.to_string()),
            amount,
        };
        repo.save_budgets_by_type(vec![budget("PF", "Vida", 1.0)], Some("Vida")).unwrap();
        repo.save_budgets_by_type(vec![budget("PF", "Prestamista", 2.0)], Some("Prestamista"))
            .unwrap();
        repo.save_budgets_by_type(vec![budget("PJ", "Vida", 3.0)], Some("Vida")).unwrap();
        let stored = repo.budgets_by_type();
        assert_eq!(stored, vec![budget("PF", "Prestamista", 2.0), budget("PJ", "Vida", 3.0)]);
    }

    #[test]
    fn resaving_a_sheet_with_a_product_column_replaces_it() {
        use crate::loader::{budget_by_type_entries, Sheet, BUDGET_BY_TYPE_FIELDS};

        let sheet = Sheet::parse("Tipo de Carteira\tProduto\tValor\nPF\tVida\t1000\nPF\tPrestamista\t500");
        let mapping = sheet.detect(&BUDGET_BY_TYPE_FIELDS);
        let mut repo = Repository::new(MemoryStore::new());
        for _ in 0..2 {
            let entries = budget_by_type_entries(&sheet.map(&mapping, &BUDGET_BY_TYPE_FIELDS), None);
            repo.save_budgets_by_type(entries, None).unwrap();
        }
        let stored = repo.budgets_by_type();
        assert_eq!(stored.len(), 2);
        let vida: f64 = stored
            .iter()
            .filter(|e| e.product.as_deref() == Some("Vida"))
            .map(|e| e.amount)
            .sum();
        assert_eq!(vida, 1000.0);
    }

    #[test]
    fn unreadable_values_fall_back_to_empty() {
        let mut store = MemoryStore::new();
        store.set(StoreKey::MasterPortfolios.as_str(), "{not json".to_string()).unwrap();
        let repo = Repository::new(store);
        assert!(repo.master_portfolios().is_empty());
        assert_eq!(repo.challenge().days, 30);
    }

    #[test]
    fn backup_round_trip() {
        let mut repo = Repository::new(MemoryStore::new());
        repo.save_master_portfolios(&master()).unwrap();
        let mut cfg = ChallengeConfig::default();
        cfg.add_product("Vida");
        repo.save_challenge(&cfg).unwrap();
        let backup = repo.export_backup().unwrap();

        let mut restored = Repository::new(MemoryStore::new());
        assert_eq!(restored.import_backup(&backup).unwrap(), 2);
        assert_eq!(restored.master_portfolios(), master());
        assert_eq!(restored.challenge(), cfg);

        assert!(restored.import_backup("[1, 2]").is_err());
        assert!(restored.import_backup("nope").is_err());
    }

    #[test]
    fn reset_removes_every_key() {
        let mut repo = Repository::new(MemoryStore::new());
        repo.save_master_portfolios(&master()).unwrap();
        repo.save_networks(&[NetworkAssignment {
            branch_prefix: "0001".to_string(),
            branch_name: String::new(),
            network: "Rede 1".to_string(),
        }])
        .unwrap();
        repo.clear(StoreKey::Networks).unwrap();
        assert!(repo.networks().is_empty());
        repo.reset_all().unwrap();
        assert!(repo.store().keys().is_empty());
    }

    #[test]
    fn file_store_persists_between_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        {
            let mut repo = Repository::new(FileStore::open(&path).unwrap());
            repo.save_master_portfolios(&master()).unwrap();
        }
        let repo = Repository::new(FileStore::open(&path).unwrap());
        assert_eq!(repo.master_portfolios(), master());
        assert_eq!(repo.store().path(), path.as_path());

        let on_disk: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk["carteiras_master"][0]["branchPrefix"], "0001");
    }

    #[test]
    fn backup_file_name_uses_date() {
        let date = NaiveDate::from_ymd_opt(2024, 5, 31).unwrap();
        assert_eq!(backup_file_name(date), "backup-desafios-2024-05-31.json");
    }
}
