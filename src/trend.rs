// Trend & Scoring Transform - the final enrichment pass
// Partitions the monthly grain by its non-time dimensions, sorts each
// partition chronologically, then runs one linear scan computing lag values
// (calendar-month lookup), trailing moving averages (bounded buffer), trend
// labels, benchmarks, the composite sustainability score, and the risk tier.

use crate::aggregate::{EsgMonthly, FinanceMonthly};
use crate::classify::{
    classify_trend, emissions_benchmark, recycling_benchmark, relative_change_pct, Direction,
};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Relative change beyond this many percent flips a metric out of "Stable".
pub const TREND_THRESHOLD_PCT: f64 = 5.0;

// ============================================================================
// SUSTAINABILITY SCORE - auditable constant table
// ============================================================================

/// Component weights; must sum to 100 (checked in tests).
pub const EMISSIONS_WEIGHT: f64 = 40.0;
pub const ENERGY_WEIGHT: f64 = 30.0;
pub const MATERIALS_WEIGHT: f64 = 20.0;
pub const WASTE_WEIGHT: f64 = 10.0;

/// Step table for emissions per unit (kg CO2/unit, lower is better).
const EMISSIONS_STEPS: &[(f64, f64)] = &[(0.5, 100.0), (0.8, 80.0), (1.0, 60.0), (1.5, 40.0)];
/// Step table for energy per unit (kWh/unit).
const ENERGY_STEPS: &[(f64, f64)] = &[(2.0, 100.0), (3.0, 80.0), (4.0, 60.0), (5.0, 40.0)];
/// Step table for waste per unit (kg/unit).
const WASTE_STEPS: &[(f64, f64)] = &[(0.02, 100.0), (0.05, 80.0), (0.10, 60.0), (0.15, 40.0)];

const FLOOR_SCORE: f64 = 20.0;

/// Step function over lower-is-better cutoffs; first cutoff at or above the
/// value wins, values past the last cutoff get the floor score.
fn step_score(value: f64, steps: &[(f64, f64)]) -> f64 {
    for (cutoff, score) in steps {
        if value <= *cutoff {
            return *score;
        }
    }
    FLOOR_SCORE
}

// ============================================================================
// FACT ROWS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EsgFact {
    #[serde(flatten)]
    pub monthly: EsgMonthly,

    // emissions per unit
    pub emissions_per_unit_lag1: Option<f64>,
    pub emissions_per_unit_lag12: Option<f64>,
    pub emissions_per_unit_ma3: Option<f64>,
    pub emissions_mom_change_pct: Option<f64>,
    pub emissions_yoy_change_pct: Option<f64>,
    pub emissions_trend: Option<String>,

    // energy per unit
    pub energy_per_unit_lag1: Option<f64>,
    pub energy_per_unit_ma3: Option<f64>,
    pub energy_trend: Option<String>,

    // recycled material %
    pub recycled_pct_lag1: Option<f64>,
    pub recycled_pct_lag12: Option<f64>,
    pub recycled_pct_ma3: Option<f64>,
    pub recycled_yoy_change_pct: Option<f64>,
    pub recycled_trend: Option<String>,

    // recycling rate %
    pub recycling_rate_lag1: Option<f64>,
    pub recycling_rate_ma3: Option<f64>,
    pub recycling_rate_trend: Option<String>,

    // benchmarks
    pub emissions_benchmark: Option<String>,
    pub recycling_benchmark: String,

    // composite score
    pub emissions_score: Option<f64>,
    pub energy_score: Option<f64>,
    pub materials_score: f64,
    pub waste_score: Option<f64>,
    pub sustainability_score: Option<f64>,

    pub risk_tier: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinanceFact {
    #[serde(flatten)]
    pub monthly: FinanceMonthly,

    pub revenue_lag1: Option<f64>,
    pub revenue_lag12: Option<f64>,
    pub revenue_ma3: Option<f64>,
    pub revenue_mom_change_pct: Option<f64>,
    pub revenue_yoy_change_pct: Option<f64>,
    pub revenue_trend: Option<String>,

    pub margin_pct_lag1: Option<f64>,
    pub margin_pct_ma3: Option<f64>,
    pub margin_trend: Option<String>,
}

// ============================================================================
// WINDOW MACHINERY
// ============================================================================

/// Months since year 0; adjacent calendar months differ by exactly 1.
fn month_index(date: NaiveDate) -> i32 {
    date.year() * 12 + date.month0() as i32
}

/// Per-partition window state for one metric: calendar lag lookup plus a
/// bounded trailing buffer for the moving average.
struct MetricWindow {
    seen: HashMap<i32, f64>,
    trailing: Vec<f64>,
}

impl MetricWindow {
    fn new() -> Self {
        MetricWindow {
            seen: HashMap::new(),
            trailing: Vec::new(),
        }
    }

    /// Value exactly `months_back` calendar months before `idx`, if that
    /// period existed in this partition and carried a value.
    fn lag(&self, idx: i32, months_back: i32) -> Option<f64> {
        self.seen.get(&(idx - months_back)).copied()
    }

    /// Push the current value and return the trailing average over the
    /// current row and up to 2 preceding partition rows. Fewer available rows
    /// at partition start average over what exists; a row whose metric is
    /// absent contributes nothing.
    fn advance(&mut self, idx: i32, value: Option<f64>) -> Option<f64> {
        if let Some(v) = value {
            self.seen.insert(idx, v);
            self.trailing.push(v);
        } else {
            // keep window alignment: an absent value still consumes a slot
            self.trailing.push(f64::NAN);
        }
        if self.trailing.len() > 3 {
            self.trailing.remove(0);
        }

        let present: Vec<f64> = self
            .trailing
            .iter()
            .copied()
            .filter(|v| !v.is_nan())
            .collect();
        if present.is_empty() {
            None
        } else {
            Some(present.iter().sum::<f64>() / present.len() as f64)
        }
    }
}

// ============================================================================
// ESG ENRICHMENT
// ============================================================================

fn esg_risk_tier(row: &EsgMonthly) -> &'static str {
    // High predicates first; any one triggering escalates the tier
    let high = row
        .overall_emissions_per_unit
        .map(|v| v > 1.5)
        .unwrap_or(false)
        || row.avg_recycled_material_pct < 30.0
        || row.avg_recycling_rate_pct < 50.0;
    if high {
        return "High";
    }

    let medium = row
        .overall_emissions_per_unit
        .map(|v| v > 1.0)
        .unwrap_or(false)
        || row.avg_recycled_material_pct < 50.0
        || row.avg_defect_rate_pct > 4.0;
    if medium {
        return "Medium";
    }

    "Low"
}

fn score_esg(row: &EsgMonthly) -> (Option<f64>, Option<f64>, f64, Option<f64>, Option<f64>) {
    let emissions_score = row.overall_emissions_per_unit.map(|v| step_score(v, EMISSIONS_STEPS));
    let energy_score = row.overall_energy_per_unit.map(|v| step_score(v, ENERGY_STEPS));
    let materials_score = row.avg_recycled_material_pct.clamp(0.0, 100.0);
    let waste_score = row.overall_waste_per_unit.map(|v| step_score(v, WASTE_STEPS));

    // Composite only when every weighted component is known
    let sustainability_score = match (emissions_score, energy_score, waste_score) {
        (Some(e), Some(en), Some(w)) => Some(
            (e * EMISSIONS_WEIGHT
                + en * ENERGY_WEIGHT
                + materials_score * MATERIALS_WEIGHT
                + w * WASTE_WEIGHT)
                / 100.0,
        ),
        _ => None,
    };

    (
        emissions_score,
        energy_score,
        materials_score,
        waste_score,
        sustainability_score,
    )
}

pub fn enrich_esg(monthly: Vec<EsgMonthly>) -> Vec<EsgFact> {
    let emissions_bench = emissions_benchmark();
    let recycling_bench = recycling_benchmark();

    // Partition by the non-time dimension keys
    let mut partitions: BTreeMap<(String, String), Vec<EsgMonthly>> = BTreeMap::new();
    for row in monthly {
        partitions
            .entry((row.product_line.clone(), row.facility.clone()))
            .or_default()
            .push(row);
    }

    let mut facts = Vec::new();
    for (_, mut rows) in partitions {
        // Stable chronological order is a precondition of every windowed value
        rows.sort_by_key(|r| r.month_start);

        let mut emissions_w = MetricWindow::new();
        let mut energy_w = MetricWindow::new();
        let mut recycled_w = MetricWindow::new();
        let mut recycling_rate_w = MetricWindow::new();

        for row in rows {
            let idx = month_index(row.month_start);

            let emissions_per_unit_lag1 = emissions_w.lag(idx, 1);
            let emissions_per_unit_lag12 = emissions_w.lag(idx, 12);
            let energy_per_unit_lag1 = energy_w.lag(idx, 1);
            let recycled_pct_lag1 = recycled_w.lag(idx, 1);
            let recycled_pct_lag12 = recycled_w.lag(idx, 12);
            let recycling_rate_lag1 = recycling_rate_w.lag(idx, 1);

            let emissions_per_unit_ma3 = emissions_w.advance(idx, row.overall_emissions_per_unit);
            let energy_per_unit_ma3 = energy_w.advance(idx, row.overall_energy_per_unit);
            let recycled_pct_ma3 = recycled_w.advance(idx, Some(row.avg_recycled_material_pct));
            let recycling_rate_ma3 =
                recycling_rate_w.advance(idx, Some(row.avg_recycling_rate_pct));

            let emissions_trend = row.overall_emissions_per_unit.and_then(|v| {
                classify_trend(
                    v,
                    emissions_per_unit_lag1,
                    Direction::LowerIsBetter,
                    TREND_THRESHOLD_PCT,
                )
            });
            let energy_trend = row.overall_energy_per_unit.and_then(|v| {
                classify_trend(
                    v,
                    energy_per_unit_lag1,
                    Direction::LowerIsBetter,
                    TREND_THRESHOLD_PCT,
                )
            });
            let recycled_trend = classify_trend(
                row.avg_recycled_material_pct,
                recycled_pct_lag1,
                Direction::HigherIsBetter,
                TREND_THRESHOLD_PCT,
            );
            let recycling_rate_trend = classify_trend(
                row.avg_recycling_rate_pct,
                recycling_rate_lag1,
                Direction::HigherIsBetter,
                TREND_THRESHOLD_PCT,
            );

            let emissions_mom_change_pct = row
                .overall_emissions_per_unit
                .and_then(|v| relative_change_pct(v, emissions_per_unit_lag1));
            let emissions_yoy_change_pct = row
                .overall_emissions_per_unit
                .and_then(|v| relative_change_pct(v, emissions_per_unit_lag12));
            let recycled_yoy_change_pct =
                relative_change_pct(row.avg_recycled_material_pct, recycled_pct_lag12);

            let (emissions_score, energy_score, materials_score, waste_score, sustainability_score) =
                score_esg(&row);

            facts.push(EsgFact {
                emissions_per_unit_lag1,
                emissions_per_unit_lag12,
                emissions_per_unit_ma3,
                emissions_mom_change_pct,
                emissions_yoy_change_pct,
                emissions_trend: emissions_trend.map(str::to_string),
                energy_per_unit_lag1,
                energy_per_unit_ma3,
                energy_trend: energy_trend.map(str::to_string),
                recycled_pct_lag1,
                recycled_pct_lag12,
                recycled_pct_ma3,
                recycled_yoy_change_pct,
                recycled_trend: recycled_trend.map(str::to_string),
                recycling_rate_lag1,
                recycling_rate_ma3,
                recycling_rate_trend: recycling_rate_trend.map(str::to_string),
                emissions_benchmark: row
                    .overall_emissions_per_unit
                    .map(|v| emissions_bench.classify(v).to_string()),
                recycling_benchmark: recycling_bench
                    .classify(row.avg_recycled_material_pct)
                    .to_string(),
                emissions_score,
                energy_score,
                materials_score,
                waste_score,
                sustainability_score,
                risk_tier: esg_risk_tier(&row).to_string(),
                monthly: row,
            });
        }
    }

    facts
}

// ============================================================================
// FINANCE ENRICHMENT
// ============================================================================

pub fn enrich_finance(monthly: Vec<FinanceMonthly>) -> Vec<FinanceFact> {
    let mut partitions: BTreeMap<(String, String, String), Vec<FinanceMonthly>> = BTreeMap::new();
    for row in monthly {
        partitions
            .entry((
                row.product_line.clone(),
                row.region.clone(),
                row.customer_segment.clone(),
            ))
            .or_default()
            .push(row);
    }

    let mut facts = Vec::new();
    for (_, mut rows) in partitions {
        rows.sort_by_key(|r| r.month_start);

        let mut revenue_w = MetricWindow::new();
        let mut margin_w = MetricWindow::new();

        for row in rows {
            let idx = month_index(row.month_start);

            let revenue_lag1 = revenue_w.lag(idx, 1);
            let revenue_lag12 = revenue_w.lag(idx, 12);
            let margin_pct_lag1 = margin_w.lag(idx, 1);

            let revenue_ma3 = revenue_w.advance(idx, Some(row.total_revenue));
            let margin_pct_ma3 = margin_w.advance(idx, row.overall_margin_pct);

            let revenue_trend = classify_trend(
                row.total_revenue,
                revenue_lag1,
                Direction::HigherIsBetter,
                TREND_THRESHOLD_PCT,
            );
            let margin_trend = row.overall_margin_pct.and_then(|v| {
                classify_trend(
                    v,
                    margin_pct_lag1,
                    Direction::HigherIsBetter,
                    TREND_THRESHOLD_PCT,
                )
            });

            facts.push(FinanceFact {
                revenue_lag1,
                revenue_lag12,
                revenue_ma3,
                revenue_mom_change_pct: relative_change_pct(row.total_revenue, revenue_lag1),
                revenue_yoy_change_pct: relative_change_pct(row.total_revenue, revenue_lag12),
                revenue_trend: revenue_trend.map(str::to_string),
                margin_pct_lag1,
                margin_pct_ma3,
                margin_trend: margin_trend.map(str::to_string),
                monthly: row,
            });
        }
    }

    facts
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn esg_row(year: i32, month: u32, emissions_per_unit: f64) -> EsgMonthly {
        EsgMonthly {
            month_start: NaiveDate::from_ymd_opt(year, month, 1).unwrap(),
            product_line: "Paper Packaging".to_string(),
            facility: "Plant A".to_string(),
            total_units_produced: 1000,
            total_emissions_kg_co2: emissions_per_unit * 1000.0,
            total_energy_kwh: 1800.0,
            total_water_liters: 800.0,
            total_waste_kg: 30.0,
            total_production_hours: 100.0,
            avg_recycled_material_pct: 60.0,
            avg_virgin_material_pct: 40.0,
            avg_recycling_rate_pct: 80.0,
            avg_efficiency_rating: 0.92,
            avg_quality_score: 0.97,
            avg_defect_rate_pct: 3.0,
            avg_renewable_energy_pct: 40.0,
            batch_count: 10,
            high_efficiency_batches: 4,
            high_recycled_batches: 2,
            large_batches: 1,
            high_efficiency_rate_pct: Some(40.0),
            high_recycled_rate_pct: Some(20.0),
            overall_emissions_per_unit: Some(emissions_per_unit),
            overall_energy_per_unit: Some(1.8),
            overall_waste_per_unit: Some(0.03),
            performance_tier: "Good".to_string(),
        }
    }

    #[test]
    fn test_weights_sum_to_100() {
        assert_eq!(
            EMISSIONS_WEIGHT + ENERGY_WEIGHT + MATERIALS_WEIGHT + WASTE_WEIGHT,
            100.0
        );
    }

    #[test]
    fn test_first_partition_row_has_absent_lag_and_own_value_ma() {
        let facts = enrich_esg(vec![esg_row(2023, 1, 1.0)]);
        assert_eq!(facts.len(), 1);

        let fact = &facts[0];
        assert_eq!(fact.emissions_per_unit_lag1, None);
        assert_eq!(fact.emissions_per_unit_lag12, None);
        assert_eq!(fact.emissions_trend, None);
        // moving average over the single available row equals its own value
        assert_eq!(fact.emissions_per_unit_ma3, Some(1.0));
    }

    #[test]
    fn test_ten_percent_emissions_reduction_is_improving() {
        // 1.00 then 0.90: a 10% reduction, lower is better, beyond 5%
        let facts = enrich_esg(vec![esg_row(2023, 1, 1.00), esg_row(2023, 2, 0.90)]);

        let feb = &facts[1];
        assert_eq!(feb.emissions_per_unit_lag1, Some(1.00));
        assert_eq!(feb.emissions_trend.as_deref(), Some("Improving"));
        assert!((feb.emissions_mom_change_pct.unwrap() + 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_emissions_increase_is_declining() {
        let facts = enrich_esg(vec![esg_row(2023, 1, 1.00), esg_row(2023, 2, 1.20)]);
        assert_eq!(facts[1].emissions_trend.as_deref(), Some("Declining"));
    }

    #[test]
    fn test_small_change_is_stable() {
        let facts = enrich_esg(vec![esg_row(2023, 1, 1.00), esg_row(2023, 2, 1.02)]);
        assert_eq!(facts[1].emissions_trend.as_deref(), Some("Stable"));
    }

    #[test]
    fn test_moving_average_trailing_window_of_three() {
        let facts = enrich_esg(vec![
            esg_row(2023, 1, 1.0),
            esg_row(2023, 2, 2.0),
            esg_row(2023, 3, 3.0),
            esg_row(2023, 4, 4.0),
        ]);

        assert_eq!(facts[0].emissions_per_unit_ma3, Some(1.0));
        assert_eq!(facts[1].emissions_per_unit_ma3, Some(1.5));
        assert_eq!(facts[2].emissions_per_unit_ma3, Some(2.0));
        // window slides: (2 + 3 + 4) / 3
        assert_eq!(facts[3].emissions_per_unit_ma3, Some(3.0));
    }

    #[test]
    fn test_gap_month_yields_no_lag() {
        // January then March: no February row, lag-1 must be absent
        let facts = enrich_esg(vec![esg_row(2023, 1, 1.0), esg_row(2023, 3, 0.9)]);

        let march = &facts[1];
        assert_eq!(march.emissions_per_unit_lag1, None);
        assert_eq!(march.emissions_trend, None);
    }

    #[test]
    fn test_lag12_year_over_year() {
        let mut rows: Vec<EsgMonthly> = (1..=12).map(|m| esg_row(2023, m, 1.0)).collect();
        rows.push(esg_row(2024, 1, 0.8));

        let facts = enrich_esg(rows);
        let jan_2024 = facts.last().unwrap();
        assert_eq!(jan_2024.emissions_per_unit_lag12, Some(1.0));
        assert!((jan_2024.emissions_yoy_change_pct.unwrap() + 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_partitions_do_not_leak() {
        let mut other = esg_row(2023, 2, 0.5);
        other.facility = "Plant B".to_string();

        let facts = enrich_esg(vec![esg_row(2023, 1, 1.0), other]);

        // Plant B's February row must not see Plant A's January value
        let plant_b = facts
            .iter()
            .find(|f| f.monthly.facility == "Plant B")
            .unwrap();
        assert_eq!(plant_b.emissions_per_unit_lag1, None);
    }

    #[test]
    fn test_step_scores() {
        assert_eq!(step_score(0.4, EMISSIONS_STEPS), 100.0);
        assert_eq!(step_score(0.5, EMISSIONS_STEPS), 100.0);
        assert_eq!(step_score(0.9, EMISSIONS_STEPS), 60.0);
        assert_eq!(step_score(2.0, EMISSIONS_STEPS), FLOOR_SCORE);
    }

    #[test]
    fn test_sustainability_score_weighted_sum() {
        let row = esg_row(2023, 1, 0.4); // emissions 100
        let (e, en, m, w, total) = score_esg(&row);

        assert_eq!(e, Some(100.0));
        assert_eq!(en, Some(100.0)); // 1.8 kWh/unit <= 2.0
        assert_eq!(m, 60.0); // recycled pct passes through
        assert_eq!(w, Some(80.0)); // 0.03 kg/unit <= 0.05

        let expected = (100.0 * 40.0 + 100.0 * 30.0 + 60.0 * 20.0 + 80.0 * 10.0) / 100.0;
        assert_eq!(total, Some(expected));
        assert!(total.unwrap() >= 0.0 && total.unwrap() <= 100.0);
    }

    #[test]
    fn test_risk_tier_priority_order() {
        // High beats Medium even when both trigger
        let mut row = esg_row(2023, 1, 1.6);
        row.avg_defect_rate_pct = 5.0;
        assert_eq!(esg_risk_tier(&row), "High");

        let medium = esg_row(2023, 1, 1.2);
        assert_eq!(esg_risk_tier(&medium), "Medium");

        let low = esg_row(2023, 1, 0.6);
        assert_eq!(esg_risk_tier(&low), "Low");

        // Low recycled content alone escalates to High
        let mut recycled = esg_row(2023, 1, 0.6);
        recycled.avg_recycled_material_pct = 25.0;
        assert_eq!(esg_risk_tier(&recycled), "High");
    }

    #[test]
    fn test_benchmark_labels_on_fact() {
        let facts = enrich_esg(vec![esg_row(2023, 1, 0.4)]);
        assert_eq!(
            facts[0].emissions_benchmark.as_deref(),
            Some("Industry Leader")
        );
        assert_eq!(facts[0].recycling_benchmark, "Above Average"); // 60%
    }

    #[test]
    fn test_finance_revenue_trend() {
        fn fin_row(month: u32, revenue: f64) -> FinanceMonthly {
            FinanceMonthly {
                month_start: NaiveDate::from_ymd_opt(2023, month, 1).unwrap(),
                product_line: "Paper Packaging".to_string(),
                region: "Europe".to_string(),
                customer_segment: "Retail".to_string(),
                total_units_sold: 1000,
                total_revenue: revenue,
                total_cost_of_goods: revenue * 0.6,
                total_operating_cost: revenue * 0.15,
                total_profit: revenue * 0.25,
                total_weight_kg: 300.0,
                total_volume_liters: 800.0,
                transaction_count: 10,
                high_margin_transactions: 2,
                large_orders: 1,
                high_margin_rate_pct: Some(20.0),
                overall_margin_pct: Some(25.0),
                revenue_per_unit: Some(revenue / 1000.0),
                margin_tier: "Standard Margin".to_string(),
            }
        }

        let facts = enrich_finance(vec![fin_row(1, 10_000.0), fin_row(2, 11_000.0)]);
        let feb = &facts[1];
        assert_eq!(feb.revenue_lag1, Some(10_000.0));
        assert_eq!(feb.revenue_trend.as_deref(), Some("Improving"));
        assert_eq!(feb.margin_trend.as_deref(), Some("Stable"));
        assert!((feb.revenue_mom_change_pct.unwrap() - 10.0).abs() < 1e-9);
    }
}
