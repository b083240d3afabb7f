use anyhow::{bail, Result};
use rusqlite::Connection;
use std::env;
use std::path::Path;

use ecometrics::{run_checks, run_pipeline, setup_database, DEFAULT_DB_PATH};

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    match args.get(1).map(String::as_str) {
        Some("run") => {
            if args.len() < 4 {
                print_usage();
                bail!("'run' needs a sales CSV and an ESG CSV");
            }
            let db_path = args.get(4).map(String::as_str).unwrap_or(DEFAULT_DB_PATH);
            cmd_run(Path::new(&args[2]), Path::new(&args[3]), Path::new(db_path))
        }
        Some("check") => {
            let db_path = args.get(2).map(String::as_str).unwrap_or(DEFAULT_DB_PATH);
            cmd_check(Path::new(db_path))
        }
        _ => {
            print_usage();
            Ok(())
        }
    }
}

fn print_usage() {
    println!("EcoMetrics Analytics Pipeline v{}", ecometrics::VERSION);
    println!();
    println!("Usage:");
    println!("  ecometrics run <sales.csv> <esg.csv> [database]");
    println!("  ecometrics check [database]");
    println!();
    println!("Default database: {}", DEFAULT_DB_PATH);
}

fn cmd_run(sales_path: &Path, esg_path: &Path, db_path: &Path) -> Result<()> {
    println!("🌱 EcoMetrics Pipeline Run");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let mut conn = Connection::open(db_path)?;
    let summary = run_pipeline(sales_path, esg_path, &mut conn)?;

    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Run {} complete", summary.run_id);
    println!(
        "  Sales:   {} loaded, {} staged, {} rejected",
        summary.sales_loaded, summary.sales_staged, summary.sales_rejected
    );
    println!(
        "  ESG:     {} loaded, {} staged, {} rejected",
        summary.esg_loaded, summary.esg_staged, summary.esg_rejected
    );
    println!(
        "  Facts:   {} financial, {} ESG, {} mart rows",
        summary.finance_fact_rows, summary.esg_fact_rows, summary.mart_rows
    );

    // Validation runs against what was just materialized
    let report = run_checks(&conn)?;
    println!("  Checks:  {}", report.summary());
    if !report.all_passed() {
        for result in report.results.iter().filter(|r| !r.passed) {
            eprintln!("  ✗ {}: {}", result.name, result.message);
        }
        bail!("validation failed after run");
    }

    Ok(())
}

fn cmd_check(db_path: &Path) -> Result<()> {
    if !db_path.exists() {
        bail!(
            "Database not found: {}. Run the pipeline first.",
            db_path.display()
        );
    }

    let conn = Connection::open(db_path)?;
    setup_database(&conn)?;

    let report = run_checks(&conn)?;
    for result in &report.results {
        if result.passed {
            println!("✓ {}", result.name);
        } else {
            println!("✗ {} ({})", result.name, result.message);
        }
    }
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("{}", report.summary());

    if !report.all_passed() {
        std::process::exit(1);
    }
    Ok(())
}
