// Entry point and interactive menu.
//
// Each option reads what it needs from the store, runs the pipeline and
// writes back. Nothing survives between choices except the store file.
use desafio_report::budget::{
    effective_budget_by_branch, effective_budget_by_type, potential_by_type, total_potential, BudgetBase,
};
use desafio_report::config::{AppSettings, DEFAULT_SETTINGS_FILE, PRODUCT_OPTIONS};
use desafio_report::loader::{
    self, ColumnMapping, Field, MappedRecord, Sheet, BUDGET_BY_PORTFOLIO_FIELDS,
    BUDGET_BY_TYPE_FIELDS, MASTER_FIELDS, NETWORK_FIELDS, REALIZED_BY_PORTFOLIO_FIELDS,
    REALIZED_BY_PRODUCT_FIELDS,
};
use desafio_report::output;
use desafio_report::reports::{self, AttainmentStatus, RankingOptions, RankingUnit};
use desafio_report::store::{backup_file_name, FileStore, Repository};
use desafio_report::util;
use desafio_report::{DesafioError, Result};
use std::io::{self, BufRead, Write};
use tracing::error;
use tracing_subscriber::EnvFilter;

type Repo = Repository<FileStore>;

/// One trimmed line, or `None` once input is exhausted.
fn read_line_from<R: BufRead>(reader: &mut R) -> Option<String> {
    let mut buf = String::new();
    match reader.read_line(&mut buf) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(buf.trim().to_string()),
    }
}

/// Closed stdin ends the program; every write already reached the store.
fn prompt(label: &str) -> String {
    print!("{}: ", label);
    let _ = io::stdout().flush();
    match read_line_from(&mut io::stdin().lock()) {
        Some(line) => line,
        None => {
            println!("\nExiting the program.");
            std::process::exit(0);
        }
    }
}

fn read_choice() -> String {
    prompt("Enter choice")
}

fn prompt_yes_no(question: &str) -> bool {
    loop {
        match prompt(&format!("{} (Y/N)", question)).to_uppercase().as_str() {
            "Y" => return true,
            "N" => return false,
            _ => println!("Invalid choice. Please enter Y or N."),
        }
    }
}

/// Blank means "no day" (undated figures, or no cut-off).
fn prompt_day(label: &str, max_day: u32) -> Option<u32> {
    loop {
        let raw = prompt(label);
        if raw.is_empty() {
            return None;
        }
        match raw.parse::<u32>() {
            Ok(day) if (1..=max_day).contains(&day) => return Some(day),
            _ => println!("Enter a day between 1 and {}, or leave blank.", max_day),
        }
    }
}

fn prompt_optional(label: &str) -> Option<String> {
    let raw = prompt(label);
    if raw.is_empty() {
        None
    } else {
        Some(raw)
    }
}

fn read_sheet() -> Option<Sheet> {
    let path = prompt("File with the pasted table (tab, ';' or ',' separated)");
    match std::fs::read_to_string(&path) {
        Ok(text) => {
            let sheet = Sheet::parse_file_text(&text);
            if sheet.is_empty() {
                println!("Error: {} is empty.\n", path);
                return None;
            }
            Some(sheet)
        }
        Err(e) => {
            eprintln!("Failed to read {}: {}\n", path, e);
            None
        }
    }
}

fn print_mapping(sheet: &Sheet, mapping: &ColumnMapping, targets: &[Field]) {
    for field in targets {
        match mapping.get(*field) {
            Some(idx) => println!(
                "  {:<13} <- [{}] {}",
                field,
                idx,
                sheet.header.get(idx).map(String::as_str).unwrap_or("?")
            ),
            None => println!("  {:<13} <- (not mapped)", field),
        }
    }
}

/// Show the detected columns and let the user fix them before mapping.
fn confirm_mapping(sheet: &Sheet, targets: &[Field]) -> ColumnMapping {
    let mut mapping = sheet.detect(targets);
    println!("\nColumns: {}", sheet.header.join(" | "));
    loop {
        print_mapping(sheet, &mapping, targets);
        let missing = mapping.unmapped(targets);
        if !missing.is_empty() {
            let names: Vec<&str> = missing.iter().map(|f| f.label()).collect();
            println!("Warning: no column for {}", names.join(", "));
        }
        let line = prompt("Override (Field=index, Field=- to clear, blank to accept)");
        if line.is_empty() {
            return mapping;
        }
        if mapping.apply_override(&line).is_none() {
            println!("Could not understand '{}'.", line);
        }
    }
}

/// Read a sheet, confirm its mapping and hand the records to `save`.
fn import<F>(repo: &mut Repo, title: &str, targets: &[Field], save: F)
where
    F: FnOnce(&mut Repo, &[MappedRecord]) -> Result<usize>,
{
    println!("\n{}", title);
    let Some(sheet) = read_sheet() else {
        return;
    };
    let mapping = confirm_mapping(&sheet, targets);
    let records = sheet.map(&mapping, targets);
    println!(
        "{} of {} rows recognized.",
        util::format_int(records.len()),
        util::format_int(sheet.rows.len())
    );
    match save(repo, &records) {
        Ok(count) => println!("Saved {} entries.\n", util::format_int(count)),
        Err(e) => {
            error!("{}", e);
            println!("Error: {}\n", e);
        }
    }
}

fn handle_configure(repo: &mut Repo) {
    let mut config = repo.challenge();
    println!("\nChallenge setup (blank keeps the current value)");
    if let Some(name) = prompt_optional(&format!("Name [{}]", config.name)) {
        config.name = name;
    }
    if let Some(sr) = prompt_optional(&format!("Super regional [{}]", config.super_regional)) {
        config.super_regional = sr;
    }
    loop {
        for (i, p) in PRODUCT_OPTIONS.iter().enumerate() {
            let mark = if config.products.iter().any(|c| c == p) { "x" } else { " " };
            println!("  [{}] {} {}", mark, i + 1, p);
        }
        for custom in config.products.iter().filter(|c| !PRODUCT_OPTIONS.contains(&c.as_str())) {
            println!("  [x] - {}", custom);
        }
        let raw = prompt("Toggle a product by number, +Name adds one, blank to finish");
        if raw.is_empty() {
            break;
        }
        if let Some(custom) = raw.strip_prefix('+') {
            if !config.add_product(custom) {
                println!("'{}' is blank or already selected.", custom.trim());
            }
        } else if let Some(p) = raw
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| PRODUCT_OPTIONS.get(i))
        {
            config.toggle_product(p);
        } else {
            config.toggle_product(raw.trim());
        }
    }
    if let Some(days) = prompt_optional(&format!("Days [{}]", config.days)) {
        match days.parse() {
            Ok(d) => config.days = d,
            Err(_) => println!("'{}' is not a number, keeping {}.", days, config.days),
        }
    }
    match repo.save_challenge(&config) {
        Ok(()) => println!("Challenge saved.\n"),
        Err(e) => println!("Error: {}\n", e),
    }
}

fn pick_product(products: &[String]) -> Option<String> {
    for (i, p) in products.iter().enumerate() {
        println!("  [{}] {}", i + 1, p);
    }
    let raw = prompt("Product");
    raw.parse::<usize>()
        .ok()
        .and_then(|n| n.checked_sub(1))
        .and_then(|i| products.get(i).cloned())
        .or_else(|| products.iter().find(|p| p.eq_ignore_ascii_case(&raw)).cloned())
}

fn handle_realized_by_product(repo: &mut Repo) {
    let config = repo.challenge();
    let products = config.input_products();
    if products.is_empty() {
        println!("Error: configure the challenge products first (option 1).\n");
        return;
    }
    let Some(product) = pick_product(&products) else {
        println!("Invalid product.\n");
        return;
    };
    let day = prompt_day("Day (blank for an undated total)", config.days);
    import(repo, "Realized by product", &REALIZED_BY_PRODUCT_FIELDS, |repo, records| {
        let entries = loader::realized_entries(records, Some(product.as_str()), day);
        repo.save_realized_by_product(entries, &product, day)
    });

    let accumulated = reports::accumulated_realized(&repo.realized_by_product(), &[product], day);
    for a in &accumulated {
        println!("  {} {}: {}", a.branch_prefix, a.product, util::format_currency(a.amount));
    }
    println!();
}

fn handle_realized_by_portfolio(repo: &mut Repo) {
    let days = repo.challenge().days;
    let day = prompt_day("Day (blank for an undated total)", days);
    import(repo, "Realized by portfolio", &REALIZED_BY_PORTFOLIO_FIELDS, |repo, records| {
        repo.save_realized_by_portfolio(loader::realized_entries(records, None, day), day)
    });
}

fn handle_budget_by_type(repo: &mut Repo) {
    let product = prompt_optional("Product (blank: applies to all products)");
    import(repo, "Budget by portfolio type", &BUDGET_BY_TYPE_FIELDS, |repo, records| {
        let entries = loader::budget_by_type_entries(records, product.as_deref());
        repo.save_budgets_by_type(entries, product.as_deref())
    });
}

fn handle_budget_by_portfolio(repo: &mut Repo) {
    let product = prompt_optional("Product (blank: applies to all products)");
    let target = prompt_optional("Target % [100]")
        .map(|t| util::parse_numeric_value(&t))
        .unwrap_or(100.0);
    import(repo, "Budget by portfolio", &BUDGET_BY_PORTFOLIO_FIELDS, |repo, records| {
        let entries = loader::budget_by_portfolio_entries(records, product.as_deref(), target);
        repo.save_budgets_by_portfolio(entries, product.as_deref())
    });
}

fn handle_target_percent(repo: &mut Repo) {
    let product = prompt_optional("Product (blank: every portfolio budget)");
    let target = util::parse_numeric_value(&prompt("New target %"));
    match repo.set_target_percent(product.as_deref(), target) {
        Ok(0) => println!("No portfolio budgets to update.\n"),
        Ok(n) => println!("Updated {} portfolio budgets.\n", util::format_int(n)),
        Err(e) => println!("Error: {}\n", e),
    }
}

fn handle_budget_overview(repo: &Repo, settings: &AppSettings) {
    let snapshot = repo.snapshot();
    let potential = potential_by_type(&snapshot.master, &snapshot.by_type);
    println!("\nPotential by portfolio type\n");
    output::preview_table_rows(&potential, settings.preview_rows);
    println!("Total potential: {}\n", util::format_currency(total_potential(&potential)));

    println!("Effective budget by portfolio type");
    for (kind, amount) in effective_budget_by_type(&snapshot.by_portfolio) {
        println!("  {}: {}", kind, util::format_currency(amount));
    }

    let products: Vec<String> = snapshot.challenge.products.clone();
    let by_branch = effective_budget_by_branch(&snapshot.by_portfolio, &products);
    if by_branch.is_empty() {
        println!("(no portfolio budgets saved)\n");
        return;
    }
    println!("Effective budget by branch\n");
    for b in by_branch.iter().take(settings.preview_rows) {
        let parts: Vec<String> = b
            .effective_by_product
            .iter()
            .map(|(p, v)| format!("{} {}", p, util::format_currency(*v)))
            .collect();
        println!(
            "  {} {}: {} (total {})",
            b.branch_prefix,
            b.branch_name,
            parts.join(", "),
            util::format_currency(b.total)
        );
    }
    println!();
}

fn handle_ranking(repo: &Repo, settings: &AppSettings) {
    let snapshot = repo.snapshot();
    if snapshot.challenge.products.is_empty() {
        println!("Error: configure the challenge products first (option 1).\n");
        return;
    }
    let unit = if prompt_yes_no("Rank individual portfolios instead of branches?") {
        RankingUnit::Portfolio
    } else {
        RankingUnit::Branch
    };
    let base = if prompt_yes_no("Prefer per-type budgets?") {
        BudgetBase::Type
    } else {
        BudgetBase::Portfolio
    };
    let up_to_day = prompt_day("Up to day (blank for all)", snapshot.challenge.days);
    let options = RankingOptions { unit, base, up_to_day };

    let rows = reports::calculate_ranking(&snapshot.ranking_input(), &options);
    if rows.is_empty() {
        println!("Nothing to rank yet. Load the master base first.\n");
        return;
    }

    for group in reports::group_by_network(&rows) {
        let count = |status: AttainmentStatus| {
            group
                .rows
                .iter()
                .filter(|r| AttainmentStatus::from_percent(r.score) == status)
                .count()
        };
        println!(
            "\n{} ({} units: {} on target, {} close, {} behind)\n",
            group.network,
            group.rows.len(),
            count(AttainmentStatus::Excellent),
            count(AttainmentStatus::Warning),
            count(AttainmentStatus::Danger)
        );
        output::preview_table_rows(&reports::to_table_rows(&group.rows), settings.preview_rows);
    }

    let products = match unit {
        RankingUnit::Branch => snapshot.challenge.ranking_products(),
        RankingUnit::Portfolio => vec![reports::PORTFOLIO_TOTAL.to_string()],
    };
    let csv_path = settings.output_path(&output::ranking_csv_file_name(&snapshot.challenge.name));
    if let Err(e) = output::write_ranking_csv_file(&csv_path, &rows, &products) {
        eprintln!("Write error: {}", e);
    } else {
        println!("(Full ranking exported to {})", csv_path.display());
    }

    let summary = reports::build_summary(&snapshot.challenge, &rows, up_to_day);
    let summary_path = settings.output_path("ranking_summary.json");
    if let Err(e) = output::write_json(&summary_path, &summary) {
        eprintln!("Write error: {}", e);
    }
    println!("Summary ({}):", summary_path.display());
    println!(
        "{{\"units\": {}, \"networks\": {}, \"budgeted\": \"{}\", \"realized\": \"{}\", \"avg_score\": \"{}\"}}\n",
        summary.total_units,
        summary.total_networks,
        util::format_currency(summary.total_budgeted),
        util::format_currency(summary.total_realized),
        util::format_percentage(summary.avg_score)
    );
}

fn handle_backup_export(repo: &Repo, settings: &AppSettings) {
    let path = settings.output_path(&backup_file_name(chrono::Local::now().date_naive()));
    let result = repo
        .export_backup()
        .and_then(|doc| std::fs::write(&path, doc).map_err(DesafioError::from));
    match result {
        Ok(()) => println!("Backup written to {}\n", path.display()),
        Err(e) => eprintln!("Backup failed: {}\n", e),
    }
}

fn handle_backup_import(repo: &mut Repo) {
    let path = prompt("Backup file");
    let result = std::fs::read_to_string(&path)
        .map_err(DesafioError::from)
        .and_then(|text| repo.import_backup(&text));
    match result {
        Ok(n) => println!("Restored {} keys from {}.\n", n, path),
        Err(e) => eprintln!("Error importing backup: {}\n", e),
    }
}

fn handle_reset(repo: &mut Repo) {
    if !prompt_yes_no("Delete ALL challenge data?") {
        return;
    }
    match repo.reset_all() {
        Ok(()) => println!("All data removed.\n"),
        Err(e) => eprintln!("Reset failed: {}\n", e),
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = match AppSettings::load(DEFAULT_SETTINGS_FILE) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to load {}: {}", DEFAULT_SETTINGS_FILE, e);
            std::process::exit(1);
        }
    };
    let mut repo = match FileStore::open(&settings.store_path) {
        Ok(store) => Repository::new(store),
        Err(e) => {
            eprintln!("Failed to open store {}: {}", settings.store_path, e);
            std::process::exit(1);
        }
    };

    loop {
        println!("Desafio: {}", repo.challenge().name);
        println!("[1] Configure challenge");
        println!("[2] Load master portfolios");
        println!("[3] Load networks");
        println!("[4] Load budget by portfolio type");
        println!("[5] Load budget by portfolio");
        println!("[6] Change target %");
        println!("[7] Load realized by product");
        println!("[8] Load realized by portfolio");
        println!("[9] Budget overview");
        println!("[10] Generate ranking");
        println!("[11] Export backup");
        println!("[12] Import backup");
        println!("[13] Reset all data");
        println!("[0] Exit\n");
        match read_choice().as_str() {
            "1" => handle_configure(&mut repo),
            "2" => import(&mut repo, "Master portfolios", &MASTER_FIELDS, |repo, records| {
                repo.save_master_portfolios(&loader::master_records(records))
            }),
            "3" => import(&mut repo, "Networks", &NETWORK_FIELDS, |repo, records| {
                repo.save_networks(&loader::network_assignments(records))
            }),
            "4" => handle_budget_by_type(&mut repo),
            "5" => handle_budget_by_portfolio(&mut repo),
            "6" => handle_target_percent(&mut repo),
            "7" => handle_realized_by_product(&mut repo),
            "8" => handle_realized_by_portfolio(&mut repo),
            "9" => handle_budget_overview(&repo, &settings),
            "10" => {
                handle_ranking(&repo, &settings);
                if !prompt_yes_no("Back to the menu?") {
                    println!("Exiting the program.");
                    break;
                }
            }
            "11" => handle_backup_export(&repo, &settings),
            "12" => handle_backup_import(&mut repo),
            "13" => handle_reset(&mut repo),
            "0" => {
                println!("Exiting the program.");
                break;
            }
            _ => println!("Invalid choice. Please enter a number from the menu.\n"),
        }
    }
}
