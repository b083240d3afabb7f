// SQLite persistence - the embedded analytical store
// Output tables are rebuilt wholesale inside one transaction per run; the
// reporting layer reads them by name and relies on the column contract.

use crate::aggregate::MartRow;
use crate::staging::{RejectedRecord, StagedBatch, StagedSale};
use crate::trend::{EsgFact, FinanceFact};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Default database file name.
pub const DEFAULT_DB_PATH: &str = "ecometrics.db";

/// Output tables, in rebuild order. `pipeline_runs` is append-only and not
/// part of the wholesale rebuild.
pub const OUTPUT_TABLES: &[&str] = &[
    "stg_sales_data",
    "stg_esg_data",
    "rejected_records",
    "fact_financial_monthly",
    "fact_esg_monthly",
    "mart_esg_summary",
];

// ============================================================================
// SCHEMA
// ============================================================================

pub fn setup_database(conn: &Connection) -> Result<()> {
    // WAL for crash recovery; single writer per run by contract
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS stg_sales_data (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            transaction_id TEXT NOT NULL,
            date TEXT NOT NULL,
            month_start TEXT NOT NULL,
            year INTEGER NOT NULL,
            month INTEGER NOT NULL,
            quarter INTEGER NOT NULL,
            day_of_week TEXT NOT NULL,
            product_line TEXT NOT NULL,
            region TEXT NOT NULL,
            customer_segment TEXT NOT NULL,
            supplier TEXT NOT NULL,
            units_sold INTEGER NOT NULL,
            unit_price REAL NOT NULL,
            unit_cost REAL NOT NULL,
            revenue REAL NOT NULL,
            cost_of_goods REAL NOT NULL,
            operating_cost REAL NOT NULL,
            profit_margin REAL NOT NULL,
            currency TEXT NOT NULL,
            weight_kg REAL NOT NULL,
            volume_liters REAL NOT NULL,
            effective_unit_price REAL,
            gross_margin_pct REAL,
            revenue_per_kg REAL,
            margin_tier TEXT NOT NULL,
            order_scale TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS stg_esg_data (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            batch_id TEXT NOT NULL,
            date TEXT NOT NULL,
            month_start TEXT NOT NULL,
            year INTEGER NOT NULL,
            month INTEGER NOT NULL,
            quarter INTEGER NOT NULL,
            day_of_week TEXT NOT NULL,
            product_line TEXT NOT NULL,
            facility TEXT NOT NULL,
            batch_size INTEGER NOT NULL,
            emissions_kg_co2 REAL NOT NULL,
            energy_consumption_kwh REAL NOT NULL,
            water_usage_liters REAL NOT NULL,
            water_recycled_liters REAL NOT NULL,
            water_fresh_liters REAL NOT NULL,
            recycled_material_pct REAL NOT NULL,
            virgin_material_pct REAL NOT NULL,
            waste_generated_kg REAL NOT NULL,
            recycling_rate_pct REAL NOT NULL,
            production_hours REAL NOT NULL,
            efficiency_rating REAL NOT NULL,
            quality_score REAL NOT NULL,
            defect_rate_pct REAL NOT NULL,
            renewable_energy_pct REAL NOT NULL,
            emissions_per_unit REAL,
            energy_per_unit REAL,
            water_per_unit REAL,
            waste_per_unit REAL,
            material_profile TEXT NOT NULL,
            efficiency_band TEXT NOT NULL,
            batch_scale TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS rejected_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_id TEXT NOT NULL,
            domain TEXT NOT NULL,
            reason_code TEXT NOT NULL,
            detail TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS fact_financial_monthly (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            month TEXT NOT NULL,
            product_line TEXT NOT NULL,
            region TEXT NOT NULL,
            customer_segment TEXT NOT NULL,
            total_units_sold INTEGER NOT NULL,
            total_revenue REAL NOT NULL,
            total_cost_of_goods REAL NOT NULL,
            total_operating_cost REAL NOT NULL,
            total_profit REAL NOT NULL,
            total_weight_kg REAL NOT NULL,
            total_volume_liters REAL NOT NULL,
            transaction_count INTEGER NOT NULL,
            high_margin_transactions INTEGER NOT NULL,
            large_orders INTEGER NOT NULL,
            high_margin_rate_pct REAL,
            overall_margin_pct REAL,
            revenue_per_unit REAL,
            margin_tier TEXT NOT NULL,
            revenue_lag1 REAL,
            revenue_lag12 REAL,
            revenue_ma3 REAL,
            revenue_mom_change_pct REAL,
            revenue_yoy_change_pct REAL,
            revenue_trend TEXT,
            margin_pct_lag1 REAL,
            margin_pct_ma3 REAL,
            margin_trend TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS fact_esg_monthly (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            month TEXT NOT NULL,
            product_line TEXT NOT NULL,
            facility TEXT NOT NULL,
            total_units_produced INTEGER NOT NULL,
            total_emissions_kg_co2 REAL NOT NULL,
            total_energy_kwh REAL NOT NULL,
            total_water_liters REAL NOT NULL,
            total_waste_kg REAL NOT NULL,
            total_production_hours REAL NOT NULL,
            avg_recycled_material_pct REAL NOT NULL,
            avg_virgin_material_pct REAL NOT NULL,
            avg_recycling_rate_pct REAL NOT NULL,
            avg_efficiency_rating REAL NOT NULL,
            avg_quality_score REAL NOT NULL,
            avg_defect_rate_pct REAL NOT NULL,
            avg_renewable_energy_pct REAL NOT NULL,
            batch_count INTEGER NOT NULL,
            high_efficiency_batches INTEGER NOT NULL,
            high_recycled_batches INTEGER NOT NULL,
            large_batches INTEGER NOT NULL,
            high_efficiency_rate_pct REAL,
            high_recycled_rate_pct REAL,
            overall_emissions_per_unit REAL,
            overall_energy_per_unit REAL,
            overall_waste_per_unit REAL,
            performance_tier TEXT NOT NULL,
            emissions_per_unit_lag1 REAL,
            emissions_per_unit_lag12 REAL,
            emissions_per_unit_ma3 REAL,
            emissions_mom_change_pct REAL,
            emissions_yoy_change_pct REAL,
            emissions_trend TEXT,
            energy_per_unit_lag1 REAL,
            energy_per_unit_ma3 REAL,
            energy_trend TEXT,
            recycled_pct_lag1 REAL,
            recycled_pct_lag12 REAL,
            recycled_pct_ma3 REAL,
            recycled_yoy_change_pct REAL,
            recycled_trend TEXT,
            recycling_rate_lag1 REAL,
            recycling_rate_ma3 REAL,
            recycling_rate_trend TEXT,
            emissions_benchmark TEXT,
            recycling_benchmark TEXT NOT NULL,
            emissions_score REAL,
            energy_score REAL,
            materials_score REAL NOT NULL,
            waste_score REAL,
            sustainability_score REAL,
            risk_tier TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS mart_esg_summary (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            metric TEXT NOT NULL,
            value REAL NOT NULL,
            unit TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS pipeline_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT UNIQUE NOT NULL,
            started_at TEXT NOT NULL,
            finished_at TEXT NOT NULL,
            sales_loaded INTEGER NOT NULL,
            sales_staged INTEGER NOT NULL,
            sales_rejected INTEGER NOT NULL,
            esg_loaded INTEGER NOT NULL,
            esg_staged INTEGER NOT NULL,
            esg_rejected INTEGER NOT NULL,
            summary TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_stg_sales_month ON stg_sales_data(month_start)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_stg_esg_month ON stg_esg_data(month_start)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_fact_esg_month ON fact_esg_monthly(month, product_line, facility)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_fact_fin_month ON fact_financial_monthly(month, product_line)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// INSERTS
// ============================================================================

fn insert_staged_sales(conn: &Connection, rows: &[StagedSale]) -> Result<usize> {
    let mut stmt = conn.prepare(
        "INSERT INTO stg_sales_data (
            transaction_id, date, month_start, year, month, quarter, day_of_week,
            product_line, region, customer_segment, supplier,
            units_sold, unit_price, unit_cost, revenue, cost_of_goods,
            operating_cost, profit_margin, currency, weight_kg, volume_liters,
            effective_unit_price, gross_margin_pct, revenue_per_kg,
            margin_tier, order_scale
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                  ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26)",
    )?;

    for row in rows {
        stmt.execute(params![
            row.transaction_id,
            row.date.to_string(),
            row.month_start.to_string(),
            row.year,
            row.month,
            row.quarter,
            row.day_of_week,
            row.product_line,
            row.region,
            row.customer_segment,
            row.supplier,
            row.units_sold,
            row.unit_price,
            row.unit_cost,
            row.revenue,
            row.cost_of_goods,
            row.operating_cost,
            row.profit_margin,
            row.currency,
            row.weight_kg,
            row.volume_liters,
            row.effective_unit_price,
            row.gross_margin_pct,
            row.revenue_per_kg,
            row.margin_tier,
            row.order_scale,
        ])?;
    }

    Ok(rows.len())
}

fn insert_staged_batches(conn: &Connection, rows: &[StagedBatch]) -> Result<usize> {
    let mut stmt = conn.prepare(
        "INSERT INTO stg_esg_data (
            batch_id, date, month_start, year, month, quarter, day_of_week,
            product_line, facility, batch_size,
            emissions_kg_co2, energy_consumption_kwh, water_usage_liters,
            water_recycled_liters, water_fresh_liters,
            recycled_material_pct, virgin_material_pct, waste_generated_kg,
            recycling_rate_pct, production_hours, efficiency_rating,
            quality_score, defect_rate_pct, renewable_energy_pct,
            emissions_per_unit, energy_per_unit, water_per_unit, waste_per_unit,
            material_profile, efficiency_band, batch_scale
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                  ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26,
                  ?27, ?28, ?29, ?30, ?31)",
    )?;

    for row in rows {
        stmt.execute(params![
            row.batch_id,
            row.date.to_string(),
            row.month_start.to_string(),
            row.year,
            row.month,
            row.quarter,
            row.day_of_week,
            row.product_line,
            row.facility,
            row.batch_size,
            row.emissions_kg_co2,
            row.energy_consumption_kwh,
            row.water_usage_liters,
            row.water_recycled_liters,
            row.water_fresh_liters,
            row.recycled_material_pct,
            row.virgin_material_pct,
            row.waste_generated_kg,
            row.recycling_rate_pct,
            row.production_hours,
            row.efficiency_rating,
            row.quality_score,
            row.defect_rate_pct,
            row.renewable_energy_pct,
            row.emissions_per_unit,
            row.energy_per_unit,
            row.water_per_unit,
            row.waste_per_unit,
            row.material_profile,
            row.efficiency_band,
            row.batch_scale,
        ])?;
    }

    Ok(rows.len())
}

fn insert_rejected(conn: &Connection, rows: &[RejectedRecord]) -> Result<usize> {
    let mut stmt = conn.prepare(
        "INSERT INTO rejected_records (source_id, domain, reason_code, detail)
         VALUES (?1, ?2, ?3, ?4)",
    )?;

    for row in rows {
        let detail = serde_json::to_string(&row.failures)?;
        stmt.execute(params![row.source_id, row.domain, row.reason_code(), detail])?;
    }

    Ok(rows.len())
}

fn insert_finance_facts(conn: &Connection, rows: &[FinanceFact]) -> Result<usize> {
    let mut stmt = conn.prepare(
        "INSERT INTO fact_financial_monthly (
            month, product_line, region, customer_segment,
            total_units_sold, total_revenue, total_cost_of_goods,
            total_operating_cost, total_profit, total_weight_kg,
            total_volume_liters, transaction_count, high_margin_transactions,
            large_orders, high_margin_rate_pct, overall_margin_pct,
            revenue_per_unit, margin_tier,
            revenue_lag1, revenue_lag12, revenue_ma3,
            revenue_mom_change_pct, revenue_yoy_change_pct, revenue_trend,
            margin_pct_lag1, margin_pct_ma3, margin_trend
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                  ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27)",
    )?;

    for fact in rows {
        let m = &fact.monthly;
        stmt.execute(params![
            m.month_start.to_string(),
            m.product_line,
            m.region,
            m.customer_segment,
            m.total_units_sold,
            m.total_revenue,
            m.total_cost_of_goods,
            m.total_operating_cost,
            m.total_profit,
            m.total_weight_kg,
            m.total_volume_liters,
            m.transaction_count,
            m.high_margin_transactions,
            m.large_orders,
            m.high_margin_rate_pct,
            m.overall_margin_pct,
            m.revenue_per_unit,
            m.margin_tier,
            fact.revenue_lag1,
            fact.revenue_lag12,
            fact.revenue_ma3,
            fact.revenue_mom_change_pct,
            fact.revenue_yoy_change_pct,
            fact.revenue_trend,
            fact.margin_pct_lag1,
            fact.margin_pct_ma3,
            fact.margin_trend,
        ])?;
    }

    Ok(rows.len())
}

fn insert_esg_facts(conn: &Connection, rows: &[EsgFact]) -> Result<usize> {
    let mut stmt = conn.prepare(
        "INSERT INTO fact_esg_monthly (
            month, product_line, facility,
            total_units_produced, total_emissions_kg_co2, total_energy_kwh,
            total_water_liters, total_waste_kg, total_production_hours,
            avg_recycled_material_pct, avg_virgin_material_pct,
            avg_recycling_rate_pct, avg_efficiency_rating, avg_quality_score,
            avg_defect_rate_pct, avg_renewable_energy_pct,
            batch_count, high_efficiency_batches, high_recycled_batches,
            large_batches, high_efficiency_rate_pct, high_recycled_rate_pct,
            overall_emissions_per_unit, overall_energy_per_unit,
            overall_waste_per_unit, performance_tier,
            emissions_per_unit_lag1, emissions_per_unit_lag12,
            emissions_per_unit_ma3, emissions_mom_change_pct,
            emissions_yoy_change_pct, emissions_trend,
            energy_per_unit_lag1, energy_per_unit_ma3, energy_trend,
            recycled_pct_lag1, recycled_pct_lag12, recycled_pct_ma3,
            recycled_yoy_change_pct, recycled_trend,
            recycling_rate_lag1, recycling_rate_ma3, recycling_rate_trend,
            emissions_benchmark, recycling_benchmark,
            emissions_score, energy_score, materials_score, waste_score,
            sustainability_score, risk_tier
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                  ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26,
                  ?27, ?28, ?29, ?30, ?31, ?32, ?33, ?34, ?35, ?36, ?37, ?38,
                  ?39, ?40, ?41, ?42, ?43, ?44, ?45, ?46, ?47, ?48, ?49, ?50, ?51)",
    )?;

    for fact in rows {
        let m = &fact.monthly;
        stmt.execute(params![
            m.month_start.to_string(),
            m.product_line,
            m.facility,
            m.total_units_produced,
            m.total_emissions_kg_co2,
            m.total_energy_kwh,
            m.total_water_liters,
            m.total_waste_kg,
            m.total_production_hours,
            m.avg_recycled_material_pct,
            m.avg_virgin_material_pct,
            m.avg_recycling_rate_pct,
            m.avg_efficiency_rating,
            m.avg_quality_score,
            m.avg_defect_rate_pct,
            m.avg_renewable_energy_pct,
            m.batch_count,
            m.high_efficiency_batches,
            m.high_recycled_batches,
            m.large_batches,
            m.high_efficiency_rate_pct,
            m.high_recycled_rate_pct,
            m.overall_emissions_per_unit,
            m.overall_energy_per_unit,
            m.overall_waste_per_unit,
            m.performance_tier,
            fact.emissions_per_unit_lag1,
            fact.emissions_per_unit_lag12,
            fact.emissions_per_unit_ma3,
            fact.emissions_mom_change_pct,
            fact.emissions_yoy_change_pct,
            fact.emissions_trend,
            fact.energy_per_unit_lag1,
            fact.energy_per_unit_ma3,
            fact.energy_trend,
            fact.recycled_pct_lag1,
            fact.recycled_pct_lag12,
            fact.recycled_pct_ma3,
            fact.recycled_yoy_change_pct,
            fact.recycled_trend,
            fact.recycling_rate_lag1,
            fact.recycling_rate_ma3,
            fact.recycling_rate_trend,
            fact.emissions_benchmark,
            fact.recycling_benchmark,
            fact.emissions_score,
            fact.energy_score,
            fact.materials_score,
            fact.waste_score,
            fact.sustainability_score,
            fact.risk_tier,
        ])?;
    }

    Ok(rows.len())
}

fn insert_mart_rows(conn: &Connection, rows: &[MartRow]) -> Result<usize> {
    let mut stmt =
        conn.prepare("INSERT INTO mart_esg_summary (metric, value, unit) VALUES (?1, ?2, ?3)")?;

    for row in rows {
        stmt.execute(params![row.metric, row.value, row.unit])?;
    }

    Ok(rows.len())
}

// ============================================================================
// WHOLESALE REBUILD
// ============================================================================

/// Everything one run materializes.
#[derive(Debug)]
pub struct PipelineTables {
    pub staged_sales: Vec<StagedSale>,
    pub staged_batches: Vec<StagedBatch>,
    pub rejected: Vec<RejectedRecord>,
    pub finance_facts: Vec<FinanceFact>,
    pub esg_facts: Vec<EsgFact>,
    pub mart_rows: Vec<MartRow>,
}

/// Replace every output table with this run's rows, atomically. Either the
/// full rebuild commits or the previous tables survive untouched.
pub fn rebuild_tables(conn: &mut Connection, tables: &PipelineTables) -> Result<()> {
    let tx = conn.transaction()?;

    for table in OUTPUT_TABLES {
        tx.execute(&format!("DELETE FROM {}", table), [])
            .with_context(|| format!("Failed to clear {}", table))?;
    }

    insert_staged_sales(&tx, &tables.staged_sales)?;
    insert_staged_batches(&tx, &tables.staged_batches)?;
    insert_rejected(&tx, &tables.rejected)?;
    insert_finance_facts(&tx, &tables.finance_facts)?;
    insert_esg_facts(&tx, &tables.esg_facts)?;
    insert_mart_rows(&tx, &tables.mart_rows)?;

    tx.commit().context("Failed to commit table rebuild")?;
    Ok(())
}

// ============================================================================
// RUN AUDIT TRAIL
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub sales_loaded: usize,
    pub sales_staged: usize,
    pub sales_rejected: usize,
    pub esg_loaded: usize,
    pub esg_staged: usize,
    pub esg_rejected: usize,
    /// Per-table content checksums, keyed by table name.
    pub table_checksums: std::collections::BTreeMap<String, String>,
}

pub fn record_run(conn: &Connection, run: &RunRecord) -> Result<()> {
    let summary = serde_json::to_string(&run.table_checksums)?;

    conn.execute(
        "INSERT INTO pipeline_runs (
            run_id, started_at, finished_at,
            sales_loaded, sales_staged, sales_rejected,
            esg_loaded, esg_staged, esg_rejected, summary
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            run.run_id,
            run.started_at.to_rfc3339(),
            run.finished_at.to_rfc3339(),
            run.sales_loaded as i64,
            run.sales_staged as i64,
            run.sales_rejected as i64,
            run.esg_loaded as i64,
            run.esg_staged as i64,
            run.esg_rejected as i64,
            summary,
        ],
    )?;

    Ok(())
}

// ============================================================================
// CHECKSUMS & COUNTS
// ============================================================================

/// Content hash of a table, independent of the autoincrement id column.
/// Two runs over identical input must produce identical checksums.
pub fn table_checksum(conn: &Connection, table: &str) -> Result<String> {
    let mut stmt = conn.prepare(&format!("SELECT * FROM {} ORDER BY rowid", table))?;
    let column_count = stmt.column_count();
    let id_column = stmt.column_names().iter().position(|c| *c == "id");

    let mut hasher = Sha256::new();
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        for i in 0..column_count {
            if Some(i) == id_column {
                continue;
            }
            let value: rusqlite::types::Value = row.get(i)?;
            match value {
                rusqlite::types::Value::Null => hasher.update(b"\x00"),
                rusqlite::types::Value::Integer(v) => hasher.update(v.to_le_bytes()),
                rusqlite::types::Value::Real(v) => hasher.update(v.to_le_bytes()),
                rusqlite::types::Value::Text(v) => hasher.update(v.as_bytes()),
                rusqlite::types::Value::Blob(v) => hasher.update(&v),
            }
            hasher.update(b"\x1f");
        }
        hasher.update(b"\n");
    }

    Ok(format!("{:x}", hasher.finalize()))
}

pub fn all_table_checksums(
    conn: &Connection,
) -> Result<std::collections::BTreeMap<String, String>> {
    let mut checksums = std::collections::BTreeMap::new();
    for table in OUTPUT_TABLES {
        checksums.insert(table.to_string(), table_checksum(conn, table)?);
    }
    Ok(checksums)
}

pub fn row_count(conn: &Connection, table: &str) -> Result<i64> {
    let count: i64 =
        conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
    Ok(count)
}

// ============================================================================
// TESTS
// ============================================================================
