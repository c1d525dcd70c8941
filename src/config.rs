// Application settings and the challenge definition.
use crate::error::{DesafioError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Overrides `AppSettings::store_path`.
pub const STORE_ENV: &str = "DESAFIO_STORE";

pub const DEFAULT_SETTINGS_FILE: &str = "desafio_settings.json";

/// Products offered when setting up a challenge.
pub const PRODUCT_OPTIONS: [&str; 6] = [
    "Seguridade Total",
    "Vida",
    "Prestamista",
    "Patrimônio",
    "Capitalização",
    "Previdência",
];

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct AppSettings {
    pub store_path: String,
    pub output_dir: String,
    pub preview_rows: usize,
}

impl Default for AppSettings {
    fn default() -> Self {
        AppSettings {
            store_path: "desafio_store.json".to_string(),
            output_dir: ".".to_string(),
            preview_rows: 10,
        }
    }
}

impl AppSettings {
    /// Read settings from a JSON file; a missing file means defaults.
    /// `DESAFIO_STORE` wins over the file's `store_path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let settings = if path.exists() {
            let text = std::fs::read_to_string(path)?;
            let parsed: AppSettings = serde_json::from_str(&text)?;
            info!("Loaded settings from {}", path.display());
            parsed
        } else {
            debug!("No settings file at {}, using defaults", path.display());
            AppSettings::default()
        };
        Ok(settings.with_store_override(std::env::var(STORE_ENV).ok()))
    }

    fn with_store_override(mut self, store_path: Option<String>) -> Self {
        if let Some(p) = store_path.filter(|p| !p.trim().is_empty()) {
            self.store_path = p;
        }
        self
    }

    pub fn output_path(&self, file_name: &str) -> PathBuf {
        Path::new(&self.output_dir).join(file_name)
    }
}

/// A pseudo-product ranked as the sum of its constituents' realized figures
/// while its budget is looked up under a single underlying product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedProduct {
    pub name: String,
    pub replaces: String,
    pub budget_product: String,
    pub constituents: Vec<String>,
}

impl Default for MergedProduct {
    fn default() -> Self {
        MergedProduct {
            name: "Vida Total".to_string(),
            replaces: "Vida".to_string(),
            budget_product: "Vida".to_string(),
            constituents: vec!["Vida".to_string(), "Vidinha".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChallengeConfig {
    pub name: String,
    pub super_regional: String,
    pub products: Vec<String>,
    pub days: u32,
    pub merged_product: MergedProduct,
}

impl Default for ChallengeConfig {
    fn default() -> Self {
        ChallengeConfig {
            name: String::new(),
            super_regional: String::new(),
            products: Vec::new(),
            days: 30,
            merged_product: MergedProduct::default(),
        }
    }
}

impl ChallengeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.products.is_empty() {
            return Err(DesafioError::Validation(
                "select at least one product".to_string(),
            ));
        }
        if self.days < 1 {
            return Err(DesafioError::Validation(
                "number of days must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn toggle_product(&mut self, product: &str) {
        if let Some(pos) = self.products.iter().position(|p| p == product) {
            self.products.remove(pos);
        } else {
            self.add_product(product);
        }
    }

    /// Add a custom product; blanks and duplicates are ignored.
    pub fn add_product(&mut self, product: &str) -> bool {
        let product = product.trim();
        if product.is_empty() || self.products.iter().any(|p| p == product) {
            return false;
        }
        self.products.push(product.to_string());
        true
    }

    /// Columns of the ranking: configured products with the merged
    /// pseudo-product standing in for the product it replaces.
    pub fn ranking_products(&self) -> Vec<String> {
        self.products
            .iter()
            .map(|p| {
                if *p == self.merged_product.replaces {
                    self.merged_product.name.clone()
                } else {
                    p.clone()
                }
            })
            .collect()
    }

    /// Products realized figures are entered for: every configured product
    /// plus the merge constituents that are not configured themselves
    /// (`Vidinha` right after `Vida`).
    pub fn input_products(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for p in &self.products {
            out.push(p.clone());
            if *p == self.merged_product.replaces {
                for c in &self.merged_product.constituents {
                    if !self.products.contains(c) && !out.contains(c) {
                        out.push(c.clone());
                    }
                }
            }
        }
        out
    }

    /// Product name budgets are stored under.
    pub fn budget_product<'a>(&'a self, product: &'a str) -> &'a str {
        if product == self.merged_product.name {
            &self.merged_product.budget_product
        } else {
            product
        }
    }

    /// Products whose realized figures add up to `product`.
    pub fn constituents<'a>(&'a self, product: &'a str) -> Vec<&'a str> {
        if product == self.merged_product.name {
            self.merged_product
                .constituents
                .iter()
                .map(String::as_str)
                .collect()
        } else {
            vec![product]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn challenge(products: &[&str]) -> ChallengeConfig {
        ChallengeConfig {
            products: products.iter().map(|p| p.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn validation_messages() {
        let empty = ChallengeConfig::default();
        assert!(empty.validate().unwrap_err().to_string().contains("at least one product"));

        let mut zero_days = challenge(&["Vida"]);
        zero_days.days = 0;
        assert!(zero_days.validate().is_err());

        assert!(challenge(&["Vida"]).validate().is_ok());
    }

    #[test]
    fn product_toggling() {
        let mut cfg = challenge(&["Vida"]);
        cfg.toggle_product("Prestamista");
        cfg.toggle_product("Vida");
        assert_eq!(cfg.products, vec!["Prestamista".to_string()]);
        assert!(!cfg.add_product("  "));
        assert!(!cfg.add_product("Prestamista"));
        assert!(cfg.add_product(" Consórcio "));
        assert_eq!(cfg.products.last().map(String::as_str), Some("Consórcio"));
    }

    #[test]
    fn merged_product_replaces_vida() {
        let cfg = challenge(&["Prestamista", "Vida", "Previdência"]);
        assert_eq!(cfg.ranking_products(), vec!["Prestamista", "Vida Total", "Previdência"]);
        assert_eq!(cfg.input_products(), vec!["Prestamista", "Vida", "Vidinha", "Previdência"]);
        assert_eq!(cfg.budget_product("Vida Total"), "Vida");
        assert_eq!(cfg.budget_product("Prestamista"), "Prestamista");
        assert_eq!(cfg.constituents("Vida Total"), vec!["Vida", "Vidinha"]);
        assert_eq!(cfg.constituents("Previdência"), vec!["Previdência"]);
    }

    #[test]
    fn challenge_round_trips_through_json_with_defaults() {
        let cfg: ChallengeConfig = serde_json::from_str(r#"{"products":["Vida"]}"#).unwrap();
        assert_eq!(cfg.days, 30);
        assert_eq!(cfg.merged_product, MergedProduct::default());
    }

    #[test]
    fn settings_default_when_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let settings = AppSettings::load(dir.path().join("absent.json")).unwrap();
        assert_eq!(settings.preview_rows, 10);
        assert_eq!(settings.output_path("r.csv"), Path::new(".").join("r.csv"));
    }

    #[test]
    fn settings_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"output_dir": "out", "preview_rows": 3}}"#).unwrap();
        let settings = AppSettings::load(file.path()).unwrap();
        assert_eq!(settings.output_dir, "out");
        assert_eq!(settings.preview_rows, 3);
    }

    #[test]
    fn store_override() {
        let settings = AppSettings::default().with_store_override(Some("other.json".to_string()));
        assert_eq!(settings.store_path, "other.json");
        let untouched = AppSettings::default().with_store_override(Some("  ".to_string()));
        assert_eq!(untouched.store_path, "desafio_store.json");
    }
}
