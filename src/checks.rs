// Post-Run Validation Suite - assertions over the materialized tables
// Each check counts violating rows with a single SQL predicate; zero rows
// means pass. Run after a pipeline run, or on demand against an existing
// database.

use anyhow::Result;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

// ============================================================================
// CHECK RESULTS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    pub failing_rows: i64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckReport {
    pub results: Vec<CheckResult>,
    pub passed_count: usize,
    pub failed_count: usize,
}

impl CheckReport {
    pub fn all_passed(&self) -> bool {
        self.failed_count == 0
    }

    pub fn summary(&self) -> String {
        format!(
            "{} of {} checks passed",
            self.passed_count,
            self.results.len()
        )
    }
}

// ============================================================================
// CHECK DEFINITIONS
// ============================================================================

/// Name, violation predicate (rows matching it are failures), and the
/// human-readable description of what a failure means.
const CHECKS: &[(&str, &str, &str)] = &[
    (
        "staged_percentages_in_range",
        "SELECT COUNT(*) FROM stg_esg_data
         WHERE recycled_material_pct NOT BETWEEN 0 AND 100
            OR virgin_material_pct NOT BETWEEN 0 AND 100
            OR recycling_rate_pct NOT BETWEEN 0 AND 100
            OR defect_rate_pct NOT BETWEEN 0 AND 100
            OR renewable_energy_pct NOT BETWEEN 0 AND 100",
        "staged percentage column outside [0, 100]",
    ),
    (
        "staged_ratings_in_range",
        "SELECT COUNT(*) FROM stg_esg_data
         WHERE efficiency_rating NOT BETWEEN 0 AND 1
            OR quality_score NOT BETWEEN 0 AND 1",
        "staged rating column outside [0, 1]",
    ),
    (
        "material_percentages_sum_to_100",
        "SELECT COUNT(*) FROM stg_esg_data
         WHERE ABS(recycled_material_pct + virgin_material_pct - 100.0) > 1.0",
        "recycled + virgin material percentages drift from 100",
    ),
    (
        "water_balance_holds",
        "SELECT COUNT(*) FROM stg_esg_data
         WHERE water_usage_liters > 0
           AND ABS(water_recycled_liters + water_fresh_liters - water_usage_liters)
               / water_usage_liters > 0.01",
        "recycled + fresh water does not reconcile with total usage",
    ),
    (
        "esg_subcounts_bounded",
        "SELECT COUNT(*) FROM fact_esg_monthly
         WHERE high_efficiency_batches > batch_count
            OR high_recycled_batches > batch_count
            OR large_batches > batch_count",
        "category batch count exceeds the group's batch count",
    ),
    (
        "finance_subcounts_bounded",
        "SELECT COUNT(*) FROM fact_financial_monthly
         WHERE high_margin_transactions > transaction_count
            OR large_orders > transaction_count",
        "category transaction count exceeds the group's transaction count",
    ),
    (
        "emissions_per_unit_is_ratio_of_sums",
        "SELECT COUNT(*) FROM fact_esg_monthly
         WHERE total_units_produced > 0
           AND overall_emissions_per_unit IS NOT NULL
           AND ABS(overall_emissions_per_unit
                   - total_emissions_kg_co2 / total_units_produced)
               / (total_emissions_kg_co2 / total_units_produced) > 0.0001",
        "stored per-unit emissions disagrees with recomputed ratio of sums",
    ),
    (
        "margin_is_ratio_of_sums",
        "SELECT COUNT(*) FROM fact_financial_monthly
         WHERE total_revenue > 0
           AND overall_margin_pct IS NOT NULL
           AND ABS(overall_margin_pct - total_profit * 100.0 / total_revenue) > 0.0001",
        "stored margin disagrees with recomputed profit / revenue",
    ),
    (
        "trend_labels_valid",
        "SELECT COUNT(*) FROM fact_esg_monthly
         WHERE (emissions_trend IS NOT NULL
                AND emissions_trend NOT IN ('Improving', 'Declining', 'Stable'))
            OR (energy_trend IS NOT NULL
                AND energy_trend NOT IN ('Improving', 'Declining', 'Stable'))
            OR (recycled_trend IS NOT NULL
                AND recycled_trend NOT IN ('Improving', 'Declining', 'Stable'))
            OR (recycling_rate_trend IS NOT NULL
                AND recycling_rate_trend NOT IN ('Improving', 'Declining', 'Stable'))",
        "trend column holds a label outside the allowed vocabulary",
    ),
    (
        "emissions_trend_recomputable",
        "SELECT COUNT(*) FROM fact_esg_monthly
         WHERE emissions_trend IS NOT NULL
           AND overall_emissions_per_unit IS NOT NULL
           AND emissions_per_unit_lag1 IS NOT NULL
           AND emissions_per_unit_lag1 != 0
           AND emissions_trend != CASE
               WHEN (emissions_per_unit_lag1 - overall_emissions_per_unit)
                    * 100.0 / ABS(emissions_per_unit_lag1) > 5.0
                   THEN 'Improving'
               WHEN (emissions_per_unit_lag1 - overall_emissions_per_unit)
                    * 100.0 / ABS(emissions_per_unit_lag1) < -5.0
                   THEN 'Declining'
               ELSE 'Stable'
           END",
        "stored emissions trend disagrees with recomputation from lag",
    ),
    (
        "benchmark_labels_valid",
        "SELECT COUNT(*) FROM fact_esg_monthly
         WHERE (emissions_benchmark IS NOT NULL
                AND emissions_benchmark NOT IN
                    ('Industry Leader', 'Above Average', 'Average', 'Below Average'))
            OR recycling_benchmark NOT IN
                ('Industry Leader', 'Above Average', 'Average', 'Below Average')",
        "benchmark column holds a label outside the allowed vocabulary",
    ),
    (
        "scores_in_range",
        "SELECT COUNT(*) FROM fact_esg_monthly
         WHERE (emissions_score IS NOT NULL AND emissions_score NOT BETWEEN 0 AND 100)
            OR (energy_score IS NOT NULL AND energy_score NOT BETWEEN 0 AND 100)
            OR materials_score NOT BETWEEN 0 AND 100
            OR (waste_score IS NOT NULL AND waste_score NOT BETWEEN 0 AND 100)
            OR (sustainability_score IS NOT NULL
                AND sustainability_score NOT BETWEEN 0 AND 100)",
        "a score column falls outside [0, 100]",
    ),
    (
        "occurrence_rates_in_range",
        "SELECT COUNT(*) FROM fact_esg_monthly
         WHERE (high_efficiency_rate_pct IS NOT NULL
                AND high_efficiency_rate_pct NOT BETWEEN 0 AND 100)
            OR (high_recycled_rate_pct IS NOT NULL
                AND high_recycled_rate_pct NOT BETWEEN 0 AND 100)",
        "an occurrence rate falls outside [0, 100]",
    ),
    (
        "risk_tier_valid",
        "SELECT COUNT(*) FROM fact_esg_monthly
         WHERE risk_tier NOT IN ('High', 'Medium', 'Low')",
        "risk tier outside the allowed vocabulary",
    ),
];

// ============================================================================
// RUNNER
// ============================================================================

pub fn run_checks(conn: &Connection) -> Result<CheckReport> {
    let mut results = Vec::with_capacity(CHECKS.len());

    for (name, query, description) in CHECKS {
        let failing_rows: i64 = conn.query_row(query, [], |row| row.get(0))?;
        let passed = failing_rows == 0;
        results.push(CheckResult {
            name: name.to_string(),
            passed,
            failing_rows,
            message: if passed {
                "ok".to_string()
            } else {
                format!("{} rows: {}", failing_rows, description)
            },
        });
    }

    let passed_count = results.iter().filter(|r| r.passed).count();
    let failed_count = results.len() - passed_count;

    Ok(CheckReport {
        results,
        passed_count,
        failed_count,
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{aggregate_esg_monthly, aggregate_finance_monthly, build_mart_summary};
    use crate::db::{rebuild_tables, setup_database, PipelineTables};
    use crate::staging::{stage_batches, stage_sales};
    use crate::trend::{enrich_esg, enrich_finance};

    fn populated_db() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let sales_outcome = stage_sales(&[crate::staging::fixtures::valid_sale()]);
        let esg_outcome = stage_batches(&[crate::staging::fixtures::valid_batch()]);

        let finance_facts = enrich_finance(aggregate_finance_monthly(&sales_outcome.staged));
        let esg_facts = enrich_esg(aggregate_esg_monthly(&esg_outcome.staged));
        let mart_rows = build_mart_summary(&esg_facts, &finance_facts, 0);

        let tables = PipelineTables {
            staged_sales: sales_outcome.staged,
            staged_batches: esg_outcome.staged,
            rejected: Vec::new(),
            finance_facts,
            esg_facts,
            mart_rows,
        };
        rebuild_tables(&mut conn, &tables).unwrap();
        conn
    }

    #[test]
    fn test_clean_pipeline_output_passes_all_checks() {
        let conn = populated_db();
        let report = run_checks(&conn).unwrap();
        assert!(report.all_passed(), "failures: {:?}", report.results);
        assert_eq!(report.failed_count, 0);
    }

    #[test]
    fn test_corrupted_subcount_fails_bounded_check() {
        let conn = populated_db();
        conn.execute(
            "UPDATE fact_esg_monthly SET high_efficiency_batches = batch_count + 5",
            [],
        )
        .unwrap();

        let report = run_checks(&conn).unwrap();
        let check = report
            .results
            .iter()
            .find(|r| r.name == "esg_subcounts_bounded")
            .unwrap();
        assert!(!check.passed);
        assert_eq!(check.failing_rows, 1);
    }

    #[test]
    fn test_corrupted_ratio_fails_consistency_check() {
        let conn = populated_db();
        conn.execute(
            "UPDATE fact_esg_monthly SET overall_emissions_per_unit = overall_emissions_per_unit * 2",
            [],
        )
        .unwrap();

        let report = run_checks(&conn).unwrap();
        let check = report
            .results
            .iter()
            .find(|r| r.name == "emissions_per_unit_is_ratio_of_sums")
            .unwrap();
        assert!(!check.passed);
    }

    #[test]
    fn test_flipped_trend_label_fails_recompute() {
        let conn = populated_db();
        // Fabricate a lag that implies Improving, then store the wrong label
        conn.execute(
            "UPDATE fact_esg_monthly
             SET emissions_per_unit_lag1 = overall_emissions_per_unit * 2,
                 emissions_trend = 'Declining'",
            [],
        )
        .unwrap();

        let report = run_checks(&conn).unwrap();
        let check = report
            .results
            .iter()
            .find(|r| r.name == "emissions_trend_recomputable")
            .unwrap();
        assert!(!check.passed);
    }

    #[test]
    fn test_unknown_trend_label_fails() {
        let conn = populated_db();
        conn.execute("UPDATE fact_esg_monthly SET emissions_trend = 'Sideways'", [])
            .unwrap();

        let report = run_checks(&conn).unwrap();
        let check = report
            .results
            .iter()
            .find(|r| r.name == "trend_labels_valid")
            .unwrap();
        assert!(!check.passed);
    }

    #[test]
    fn test_empty_database_passes() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        let report = run_checks(&conn).unwrap();
        assert!(report.all_passed());
    }
}
