// EcoMetrics Analytics Pipeline - Core Library
// CSV feeds -> staged tables -> monthly fact tables -> executive summary mart,
// all materialized in an embedded SQLite database.

pub mod aggregate;
pub mod checks;
pub mod classify;
pub mod db;
pub mod ingest;
pub mod pipeline;
pub mod staging;
pub mod trend;

// Re-export commonly used types
pub use aggregate::{
    aggregate_esg_monthly, aggregate_finance_monthly, build_mart_summary, EsgMonthly,
    FinanceMonthly, MartRow,
};
pub use checks::{run_checks, CheckReport, CheckResult};
pub use classify::{Direction, ThresholdClassifier};
pub use db::{
    all_table_checksums, rebuild_tables, record_run, row_count, setup_database, table_checksum,
    PipelineTables, RunRecord, DEFAULT_DB_PATH, OUTPUT_TABLES,
};
pub use ingest::{load_esg_csv, load_sales_csv, ProductionBatch, SalesTransaction};
pub use pipeline::{run_pipeline, RunSummary};
pub use staging::{
    stage_batches, stage_sales, QualityFailure, RejectedRecord, StagedBatch, StagedSale,
    StagingOutcome,
};
pub use trend::{enrich_esg, enrich_finance, EsgFact, FinanceFact};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
