// Monthly Aggregation Transform - staged rows to (month x dimensions) grain
// Grouping is exact equality on the truncated month and each dimension.
// Derived per-unit metrics are recomputed from aggregate sums, never averaged
// from per-row ratios (ratio-of-sums and average-of-ratios are not
// interchangeable).

use crate::classify::{Direction, ThresholdClassifier};
use crate::staging::{round2, safe_ratio, StagedBatch, StagedSale};
use crate::trend::{EsgFact, FinanceFact};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// OUTPUT ROWS
// ============================================================================

/// One ESG row per (month, product line, facility).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EsgMonthly {
    pub month_start: NaiveDate,
    pub product_line: String,
    pub facility: String,
    // sums
    pub total_units_produced: i64,
    pub total_emissions_kg_co2: f64,
    pub total_energy_kwh: f64,
    pub total_water_liters: f64,
    pub total_waste_kg: f64,
    pub total_production_hours: f64,
    // averages of already-normalized rates
    pub avg_recycled_material_pct: f64,
    pub avg_virgin_material_pct: f64,
    pub avg_recycling_rate_pct: f64,
    pub avg_efficiency_rating: f64,
    pub avg_quality_score: f64,
    pub avg_defect_rate_pct: f64,
    pub avg_renewable_energy_pct: f64,
    // counts
    pub batch_count: i64,
    pub high_efficiency_batches: i64,
    pub high_recycled_batches: i64,
    pub large_batches: i64,
    // occurrence rates (count * 100 / batch_count, 2 dp)
    pub high_efficiency_rate_pct: Option<f64>,
    pub high_recycled_rate_pct: Option<f64>,
    // ratio-of-sums
    pub overall_emissions_per_unit: Option<f64>,
    pub overall_energy_per_unit: Option<f64>,
    pub overall_waste_per_unit: Option<f64>,
    pub performance_tier: String,
}

/// One finance row per (month, product line, region, customer segment).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinanceMonthly {
    pub month_start: NaiveDate,
    pub product_line: String,
    pub region: String,
    pub customer_segment: String,
    pub total_units_sold: i64,
    pub total_revenue: f64,
    pub total_cost_of_goods: f64,
    pub total_operating_cost: f64,
    pub total_profit: f64,
    pub total_weight_kg: f64,
    pub total_volume_liters: f64,
    pub transaction_count: i64,
    pub high_margin_transactions: i64,
    pub large_orders: i64,
    pub high_margin_rate_pct: Option<f64>,
    pub overall_margin_pct: Option<f64>,
    pub revenue_per_unit: Option<f64>,
    pub margin_tier: String,
}

// ============================================================================
// TIER CLASSIFIERS (aggregate-level, same pattern as staging buckets)
// ============================================================================

fn performance_tier_classifier() -> ThresholdClassifier {
    ThresholdClassifier::new(
        Direction::LowerIsBetter,
        vec![(0.5, "Excellent"), (0.9, "Good"), (1.3, "Fair")],
        "Poor",
    )
}

fn margin_tier_classifier() -> ThresholdClassifier {
    ThresholdClassifier::new(
        Direction::HigherIsBetter,
        vec![(40.0, "High Margin"), (20.0, "Standard Margin")],
        "Low Margin",
    )
}

// ============================================================================
// ESG AGGREGATION
// ============================================================================

#[derive(Debug, Default)]
struct EsgAccumulator {
    units: i64,
    emissions: f64,
    energy: f64,
    water: f64,
    waste: f64,
    production_hours: f64,
    recycled_pct_sum: f64,
    virgin_pct_sum: f64,
    recycling_rate_sum: f64,
    efficiency_sum: f64,
    quality_sum: f64,
    defect_rate_sum: f64,
    renewable_pct_sum: f64,
    batch_count: i64,
    high_efficiency: i64,
    high_recycled: i64,
    large_batches: i64,
}

impl EsgAccumulator {
    fn add(&mut self, row: &StagedBatch) {
        self.units += row.batch_size;
        self.emissions += row.emissions_kg_co2;
        self.energy += row.energy_consumption_kwh;
        self.water += row.water_usage_liters;
        self.waste += row.waste_generated_kg;
        self.production_hours += row.production_hours;
        self.recycled_pct_sum += row.recycled_material_pct;
        self.virgin_pct_sum += row.virgin_material_pct;
        self.recycling_rate_sum += row.recycling_rate_pct;
        self.efficiency_sum += row.efficiency_rating;
        self.quality_sum += row.quality_score;
        self.defect_rate_sum += row.defect_rate_pct;
        self.renewable_pct_sum += row.renewable_energy_pct;
        self.batch_count += 1;
        if row.efficiency_band == "High Efficiency" {
            self.high_efficiency += 1;
        }
        if row.material_profile == "High Recycled" {
            self.high_recycled += 1;
        }
        if row.batch_scale == "Large Batch" {
            self.large_batches += 1;
        }
    }
}

/// Occurrence rate as a percentage of the group's rows, 2 dp. The group can
/// never be empty by construction, but the division stays guarded.
fn occurrence_rate(count: i64, total: i64) -> Option<f64> {
    safe_ratio(count as f64 * 100.0, total as f64).map(round2)
}

pub fn aggregate_esg_monthly(staged: &[StagedBatch]) -> Vec<EsgMonthly> {
    let tier = performance_tier_classifier();

    let mut groups: BTreeMap<(NaiveDate, String, String), EsgAccumulator> = BTreeMap::new();
    for row in staged {
        groups
            .entry((row.month_start, row.product_line.clone(), row.facility.clone()))
            .or_default()
            .add(row);
    }

    groups
        .into_iter()
        .map(|((month_start, product_line, facility), acc)| {
            let n = acc.batch_count as f64;
            let overall_emissions_per_unit = safe_ratio(acc.emissions, acc.units as f64);
            let performance_tier = overall_emissions_per_unit
                .map(|v| tier.classify(v))
                .unwrap_or("Unknown")
                .to_string();

            EsgMonthly {
                month_start,
                product_line,
                facility,
                total_units_produced: acc.units,
                total_emissions_kg_co2: acc.emissions,
                total_energy_kwh: acc.energy,
                total_water_liters: acc.water,
                total_waste_kg: acc.waste,
                total_production_hours: acc.production_hours,
                avg_recycled_material_pct: acc.recycled_pct_sum / n,
                avg_virgin_material_pct: acc.virgin_pct_sum / n,
                avg_recycling_rate_pct: acc.recycling_rate_sum / n,
                avg_efficiency_rating: acc.efficiency_sum / n,
                avg_quality_score: acc.quality_sum / n,
                avg_defect_rate_pct: acc.defect_rate_sum / n,
                avg_renewable_energy_pct: acc.renewable_pct_sum / n,
                batch_count: acc.batch_count,
                high_efficiency_batches: acc.high_efficiency,
                high_recycled_batches: acc.high_recycled,
                large_batches: acc.large_batches,
                high_efficiency_rate_pct: occurrence_rate(acc.high_efficiency, acc.batch_count),
                high_recycled_rate_pct: occurrence_rate(acc.high_recycled, acc.batch_count),
                overall_emissions_per_unit,
                overall_energy_per_unit: safe_ratio(acc.energy, acc.units as f64),
                overall_waste_per_unit: safe_ratio(acc.waste, acc.units as f64),
                performance_tier,
            }
        })
        .collect()
}

// ============================================================================
// FINANCE AGGREGATION
// ============================================================================

#[derive(Debug, Default)]
struct FinanceAccumulator {
    units: i64,
    revenue: f64,
    cost_of_goods: f64,
    operating_cost: f64,
    profit: f64,
    weight: f64,
    volume: f64,
    transaction_count: i64,
    high_margin: i64,
    large_orders: i64,
}

impl FinanceAccumulator {
    fn add(&mut self, row: &StagedSale) {
        self.units += row.units_sold;
        self.revenue += row.revenue;
        self.cost_of_goods += row.cost_of_goods;
        self.operating_cost += row.operating_cost;
        self.profit += row.profit_margin;
        self.weight += row.weight_kg;
        self.volume += row.volume_liters;
        self.transaction_count += 1;
        if row.margin_tier == "High Margin" {
            self.high_margin += 1;
        }
        if row.order_scale == "Large Order" {
            self.large_orders += 1;
        }
    }
}

pub fn aggregate_finance_monthly(staged: &[StagedSale]) -> Vec<FinanceMonthly> {
    let tier = margin_tier_classifier();

    let mut groups: BTreeMap<(NaiveDate, String, String, String), FinanceAccumulator> =
        BTreeMap::new();
    for row in staged {
        groups
            .entry((
                row.month_start,
                row.product_line.clone(),
                row.region.clone(),
                row.customer_segment.clone(),
            ))
            .or_default()
            .add(row);
    }

    groups
        .into_iter()
        .map(|((month_start, product_line, region, customer_segment), acc)| {
            // margin from summed profit and revenue, not averaged row margins
            let overall_margin_pct = safe_ratio(acc.profit * 100.0, acc.revenue);
            let margin_tier = overall_margin_pct
                .map(|v| tier.classify(v))
                .unwrap_or("Unknown")
                .to_string();

            FinanceMonthly {
                month_start,
                product_line,
                region,
                customer_segment,
                total_units_sold: acc.units,
                total_revenue: acc.revenue,
                total_cost_of_goods: acc.cost_of_goods,
                total_operating_cost: acc.operating_cost,
                total_profit: acc.profit,
                total_weight_kg: acc.weight,
                total_volume_liters: acc.volume,
                transaction_count: acc.transaction_count,
                high_margin_transactions: acc.high_margin,
                large_orders: acc.large_orders,
                high_margin_rate_pct: occurrence_rate(acc.high_margin, acc.transaction_count),
                overall_margin_pct,
                revenue_per_unit: safe_ratio(acc.revenue, acc.units as f64),
                margin_tier,
            }
        })
        .collect()
}

// ============================================================================
// EXECUTIVE SUMMARY MART
// ============================================================================

/// One KPI row in the company-wide summary mart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MartRow {
    pub metric: String,
    pub value: f64,
    pub unit: String,
}

fn mart_row(metric: &str, value: f64, unit: &str) -> MartRow {
    MartRow {
        metric: metric.to_string(),
        value,
        unit: unit.to_string(),
    }
}

/// Collapse the fact tables into company-level KPI rows for the dashboard's
/// headline cards. Per-unit figures are recomputed from company-wide sums.
pub fn build_mart_summary(
    esg_facts: &[EsgFact],
    finance_facts: &[FinanceFact],
    rejected_count: usize,
) -> Vec<MartRow> {
    let total_units: i64 = esg_facts.iter().map(|f| f.monthly.total_units_produced).sum();
    let total_emissions: f64 = esg_facts.iter().map(|f| f.monthly.total_emissions_kg_co2).sum();
    let total_energy: f64 = esg_facts.iter().map(|f| f.monthly.total_energy_kwh).sum();
    let total_water: f64 = esg_facts.iter().map(|f| f.monthly.total_water_liters).sum();
    let total_waste: f64 = esg_facts.iter().map(|f| f.monthly.total_waste_kg).sum();

    let total_revenue: f64 = finance_facts.iter().map(|f| f.monthly.total_revenue).sum();
    let total_profit: f64 = finance_facts.iter().map(|f| f.monthly.total_profit).sum();

    let scores: Vec<f64> = esg_facts
        .iter()
        .filter_map(|f| f.sustainability_score)
        .collect();
    let high_risk_rows = esg_facts.iter().filter(|f| f.risk_tier == "High").count();

    let mut rows = vec![
        mart_row("total_units_produced", total_units as f64, "units"),
        mart_row("total_emissions", total_emissions, "kg CO2"),
        mart_row("total_energy", total_energy, "kWh"),
        mart_row("total_water_usage", total_water, "liters"),
        mart_row("total_waste", total_waste, "kg"),
        mart_row("total_revenue", total_revenue, "USD"),
        mart_row("total_profit", total_profit, "USD"),
        mart_row("esg_fact_rows", esg_facts.len() as f64, "rows"),
        mart_row("financial_fact_rows", finance_facts.len() as f64, "rows"),
        mart_row("high_risk_fact_rows", high_risk_rows as f64, "rows"),
        mart_row("rejected_records", rejected_count as f64, "rows"),
    ];

    if let Some(v) = safe_ratio(total_emissions, total_units as f64) {
        rows.push(mart_row("overall_emissions_per_unit", v, "kg CO2/unit"));
    }
    if let Some(v) = safe_ratio(total_energy, total_units as f64) {
        rows.push(mart_row("overall_energy_per_unit", v, "kWh/unit"));
    }
    if let Some(v) = safe_ratio(total_profit * 100.0, total_revenue) {
        rows.push(mart_row("overall_margin", v, "%"));
    }
    if !scores.is_empty() {
        let avg = scores.iter().sum::<f64>() / scores.len() as f64;
        rows.push(mart_row("avg_sustainability_score", avg, "score"));
    }

    rows
}

// ============================================================================
// TESTS
// ============================================================================
