//! Sales challenge ("desafio") pipeline: pasted spreadsheet text is parsed,
//! mapped onto fields, joined with the master portfolio base into budgets and
//! finally ranked per branch or portfolio, grouped by network.

pub mod budget;
pub mod config;
pub mod error;
pub mod loader;
pub mod output;
pub mod reports;
pub mod store;
pub mod types;
pub mod util;

pub use error::{DesafioError, Result};
