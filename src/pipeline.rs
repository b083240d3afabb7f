// Pipeline Orchestration - one end-to-end run
// Load both feeds, stage, aggregate, enrich, then rebuild every output table
// in a single transaction and append the run to the audit trail. Schema
// violations abort before any table is touched.

use crate::aggregate::{aggregate_esg_monthly, aggregate_finance_monthly, build_mart_summary};
use crate::db::{
    all_table_checksums, rebuild_tables, record_run, setup_database, PipelineTables, RunRecord,
};
use crate::ingest::{load_esg_csv, load_sales_csv};
use crate::staging::{stage_batches, stage_sales};
use crate::trend::{enrich_esg, enrich_finance};
use anyhow::Result;
use chrono::Utc;
use rusqlite::Connection;
use std::path::Path;
use uuid::Uuid;

/// What a completed run produced, for the CLI report.
#[derive(Debug)]
pub struct RunSummary {
    pub run_id: String,
    pub sales_loaded: usize,
    pub sales_staged: usize,
    pub sales_rejected: usize,
    pub esg_loaded: usize,
    pub esg_staged: usize,
    pub esg_rejected: usize,
    pub finance_fact_rows: usize,
    pub esg_fact_rows: usize,
    pub mart_rows: usize,
}

pub fn run_pipeline(
    sales_path: &Path,
    esg_path: &Path,
    conn: &mut Connection,
) -> Result<RunSummary> {
    let started_at = Utc::now();

    setup_database(conn)?;

    let sales = load_sales_csv(sales_path)?;
    let batches = load_esg_csv(esg_path)?;
    println!(
        "✓ Loaded {} sales transactions, {} production batches",
        sales.len(),
        batches.len()
    );

    let sales_outcome = stage_sales(&sales);
    let esg_outcome = stage_batches(&batches);
    println!(
        "✓ Staged {} sales ({} rejected), {} batches ({} rejected)",
        sales_outcome.staged.len(),
        sales_outcome.rejected.len(),
        esg_outcome.staged.len(),
        esg_outcome.rejected.len()
    );

    let finance_facts = enrich_finance(aggregate_finance_monthly(&sales_outcome.staged));
    let esg_facts = enrich_esg(aggregate_esg_monthly(&esg_outcome.staged));
    println!(
        "✓ Built {} financial and {} ESG monthly fact rows",
        finance_facts.len(),
        esg_facts.len()
    );

    let mut rejected = sales_outcome.rejected;
    rejected.extend(esg_outcome.rejected);
    let rejected_count = rejected.len();

    let mart_rows = build_mart_summary(&esg_facts, &finance_facts, rejected_count);

    let summary = RunSummary {
        run_id: Uuid::new_v4().to_string(),
        sales_loaded: sales.len(),
        sales_staged: sales_outcome.staged.len(),
        sales_rejected: sales.len() - sales_outcome.staged.len(),
        esg_loaded: batches.len(),
        esg_staged: esg_outcome.staged.len(),
        esg_rejected: batches.len() - esg_outcome.staged.len(),
        finance_fact_rows: finance_facts.len(),
        esg_fact_rows: esg_facts.len(),
        mart_rows: mart_rows.len(),
    };

    let tables = PipelineTables {
        staged_sales: sales_outcome.staged,
        staged_batches: esg_outcome.staged,
        rejected,
        finance_facts,
        esg_facts,
        mart_rows,
    };
    rebuild_tables(conn, &tables)?;
    println!("✓ Rebuilt output tables");

    let run = RunRecord {
        run_id: summary.run_id.clone(),
        started_at,
        finished_at: Utc::now(),
        sales_loaded: summary.sales_loaded,
        sales_staged: summary.sales_staged,
        sales_rejected: summary.sales_rejected,
        esg_loaded: summary.esg_loaded,
        esg_staged: summary.esg_staged,
        esg_rejected: summary.esg_rejected,
        table_checksums: all_table_checksums(conn)?,
    };
    record_run(conn, &run)?;
    println!("✓ Recorded run {}", run.run_id);

    Ok(summary)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::row_count;
    use crate::ingest::{ESG_REQUIRED_COLUMNS, SALES_REQUIRED_COLUMNS};
    use std::io::Write;

    fn write_temp_csv(name: &str, contents: &str) -> std::path::PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("ecometrics_{}_{}.csv", name, Uuid::new_v4()));
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    fn sales_csv() -> String {
        format!(
            "{}\n{}\n{}\n",
            SALES_REQUIRED_COLUMNS.join(","),
            "TXN_1,2023-01-15,CUST_1,ORD_1,Paper Packaging,PAPER_101,Europe,Retail,\
             Standard Supply Inc,1000,4.50,2.50,4500.00,2500.00,800.00,1200.00,Paid,EUR,300.0,800.0",
            // rejected: non-positive units
            "TXN_2,2023-01-16,CUST_2,ORD_2,Paper Packaging,PAPER_101,Europe,Retail,\
             Standard Supply Inc,0,4.50,2.50,4500.00,2500.00,800.00,1200.00,Paid,EUR,300.0,800.0"
        )
    }

    fn esg_csv() -> String {
        format!(
            "{}\n{}\n",
            ESG_REQUIRED_COLUMNS.join(","),
            "BATCH_1,2023-01-10,Paper Packaging,Plant A,1000,500.0,1800.0,800.0,560.0,240.0,\
             65.0,35.0,45.0,78.0,12.0,0.92,0.96,3.0,42.0,OP_1,EQ_1"
        )
    }

    #[test]
    fn test_full_run_end_to_end() {
        let sales_path = write_temp_csv("sales", &sales_csv());
        let esg_path = write_temp_csv("esg", &esg_csv());
        let mut conn = Connection::open_in_memory().unwrap();

        let summary = run_pipeline(&sales_path, &esg_path, &mut conn).unwrap();

        assert_eq!(summary.sales_loaded, 2);
        assert_eq!(summary.sales_staged, 1);
        assert_eq!(summary.sales_rejected, 1);
        assert_eq!(summary.esg_staged, 1);
        assert_eq!(summary.finance_fact_rows, 1);
        assert_eq!(summary.esg_fact_rows, 1);

        assert_eq!(row_count(&conn, "stg_sales_data").unwrap(), 1);
        assert_eq!(row_count(&conn, "rejected_records").unwrap(), 1);
        assert_eq!(row_count(&conn, "pipeline_runs").unwrap(), 1);

        std::fs::remove_file(sales_path).ok();
        std::fs::remove_file(esg_path).ok();
    }

    #[test]
    fn test_rerun_replaces_tables_and_appends_audit() {
        let sales_path = write_temp_csv("sales", &sales_csv());
        let esg_path = write_temp_csv("esg", &esg_csv());
        let mut conn = Connection::open_in_memory().unwrap();

        run_pipeline(&sales_path, &esg_path, &mut conn).unwrap();
        run_pipeline(&sales_path, &esg_path, &mut conn).unwrap();

        assert_eq!(row_count(&conn, "stg_sales_data").unwrap(), 1);
        assert_eq!(row_count(&conn, "fact_esg_monthly").unwrap(), 1);
        // audit trail is append-only
        assert_eq!(row_count(&conn, "pipeline_runs").unwrap(), 2);

        std::fs::remove_file(sales_path).ok();
        std::fs::remove_file(esg_path).ok();
    }

    #[test]
    fn test_schema_violation_writes_nothing() {
        let bad_sales = write_temp_csv("sales", "transaction_id,date\nTXN_1,2023-01-15\n");
        let esg_path = write_temp_csv("esg", &esg_csv());
        let mut conn = Connection::open_in_memory().unwrap();

        assert!(run_pipeline(&bad_sales, &esg_path, &mut conn).is_err());
        assert_eq!(row_count(&conn, "stg_sales_data").unwrap(), 0);
        assert_eq!(row_count(&conn, "pipeline_runs").unwrap(), 0);

        std::fs::remove_file(bad_sales).ok();
        std::fs::remove_file(esg_path).ok();
    }
}
