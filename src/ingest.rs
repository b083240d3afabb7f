// CSV Ingestion - raw transaction feeds
// Two fixed input schemas: sales transactions and ESG production batches.
// A missing required header is fatal before any output table is touched.

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::Path;

// ============================================================================
// RAW RECORD TYPES
// ============================================================================

/// One sales transaction, as exported by the ERP feed.
/// Read-only to the pipeline; every derived field lives on the staged record.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SalesTransaction {
    pub transaction_id: String,
    pub date: NaiveDate,
    pub customer_id: String,
    pub order_id: String,
    pub product_line: String,
    pub sku: String,
    pub region: String,
    pub customer_segment: String,
    pub supplier: String,
    pub units_sold: i64,
    pub unit_price: f64,
    pub unit_cost: f64,
    pub revenue: f64,
    pub cost_of_goods: f64,
    pub operating_cost: f64,
    pub profit_margin: f64,
    pub payment_status: String,
    pub currency: String,
    pub weight_kg: f64,
    pub volume_liters: f64,
}

/// One production batch from the plant-floor ESG feed.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProductionBatch {
    pub batch_id: String,
    pub date: NaiveDate,
    pub product_line: String,
    pub facility: String,
    pub batch_size: i64,
    pub emissions_kg_co2: f64,
    pub energy_consumption_kwh: f64,
    pub water_usage_liters: f64,
    pub water_recycled_liters: f64,
    pub water_fresh_liters: f64,
    pub recycled_material_pct: f64,
    pub virgin_material_pct: f64,
    pub waste_generated_kg: f64,
    pub recycling_rate_pct: f64,
    pub production_hours: f64,
    pub efficiency_rating: f64,
    pub quality_score: f64,
    pub defect_rate_pct: f64,
    pub renewable_energy_pct: f64,
    pub operator_id: String,
    pub equipment_id: String,
}

// ============================================================================
// REQUIRED HEADERS
// ============================================================================

pub const SALES_REQUIRED_COLUMNS: &[&str] = &[
    "transaction_id",
    "date",
    "customer_id",
    "order_id",
    "product_line",
    "sku",
    "region",
    "customer_segment",
    "supplier",
    "units_sold",
    "unit_price",
    "unit_cost",
    "revenue",
    "cost_of_goods",
    "operating_cost",
    "profit_margin",
    "payment_status",
    "currency",
    "weight_kg",
    "volume_liters",
];

pub const ESG_REQUIRED_COLUMNS: &[&str] = &[
    "batch_id",
    "date",
    "product_line",
    "facility",
    "batch_size",
    "emissions_kg_co2",
    "energy_consumption_kwh",
    "water_usage_liters",
    "water_recycled_liters",
    "water_fresh_liters",
    "recycled_material_pct",
    "virgin_material_pct",
    "waste_generated_kg",
    "recycling_rate_pct",
    "production_hours",
    "efficiency_rating",
    "quality_score",
    "defect_rate_pct",
    "renewable_energy_pct",
    "operator_id",
    "equipment_id",
];

/// Verify every required column is present. Extra columns are allowed and
/// ignored; a missing one aborts the run before any table is written.
fn validate_headers(headers: &csv::StringRecord, required: &[&str], domain: &str) -> Result<()> {
    let present: Vec<&str> = headers.iter().collect();
    let missing: Vec<&str> = required
        .iter()
        .filter(|col| !present.contains(col))
        .copied()
        .collect();

    if !missing.is_empty() {
        bail!(
            "{} input schema violation: missing required columns: {}",
            domain,
            missing.join(", ")
        );
    }

    Ok(())
}

// ============================================================================
// LOADERS
// ============================================================================

pub fn load_sales_csv(path: &Path) -> Result<Vec<SalesTransaction>> {
    let mut rdr = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open sales CSV: {}", path.display()))?;

    let headers = rdr.headers().context("Failed to read sales CSV headers")?;
    validate_headers(headers, SALES_REQUIRED_COLUMNS, "sales")?;

    let mut transactions = Vec::new();
    for (i, result) in rdr.deserialize().enumerate() {
        // Row 1 is the header line
        let tx: SalesTransaction = result
            .with_context(|| format!("Failed to parse sales row {} (schema violation)", i + 2))?;
        transactions.push(tx);
    }

    Ok(transactions)
}

pub fn load_esg_csv(path: &Path) -> Result<Vec<ProductionBatch>> {
    let mut rdr = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open ESG CSV: {}", path.display()))?;

    let headers = rdr.headers().context("Failed to read ESG CSV headers")?;
    validate_headers(headers, ESG_REQUIRED_COLUMNS, "ESG")?;

    let mut batches = Vec::new();
    for (i, result) in rdr.deserialize().enumerate() {
        let batch: ProductionBatch = result
            .with_context(|| format!("Failed to parse ESG row {} (schema violation)", i + 2))?;
        batches.push(batch);
    }

    Ok(batches)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sales_header() -> String {
        SALES_REQUIRED_COLUMNS.join(",")
    }

    fn sales_row() -> &'static str {
        "TXN_20230115_1001,2023-01-15,CUST_1234,ORD_20230115_1001,Paper Packaging,PAPER_101,\
         Europe,Retail,Standard Supply Inc,1000,4.50,2.50,4500.00,2500.00,800.00,1200.00,\
         Paid,EUR,300.0,800.0"
    }

    fn write_temp_csv(contents: &str) -> std::path::PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("ecometrics_test_{}.csv", uuid::Uuid::new_v4()));
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_load_sales_csv_valid() {
        let csv = format!("{}\n{}\n", sales_header(), sales_row());
        let path = write_temp_csv(&csv);

        let transactions = load_sales_csv(&path).unwrap();
        assert_eq!(transactions.len(), 1);
        assert_eq!(transactions[0].product_line, "Paper Packaging");
        assert_eq!(transactions[0].units_sold, 1000);
        assert_eq!(
            transactions[0].date,
            NaiveDate::from_ymd_opt(2023, 1, 15).unwrap()
        );

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_missing_column_is_fatal() {
        // Drop the revenue column entirely
        let header = SALES_REQUIRED_COLUMNS
            .iter()
            .filter(|c| **c != "revenue")
            .copied()
            .collect::<Vec<_>>()
            .join(",");
        let csv = format!("{}\n", header);
        let path = write_temp_csv(&csv);

        let err = load_sales_csv(&path).unwrap_err();
        assert!(err.to_string().contains("revenue"));

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_unparseable_row_is_fatal() {
        let bad_row = sales_row().replace("1000", "not_a_number");
        let csv = format!("{}\n{}\n", sales_header(), bad_row);
        let path = write_temp_csv(&csv);

        assert!(load_sales_csv(&path).is_err());

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_esg_header_validation() {
        let header = ESG_REQUIRED_COLUMNS
            .iter()
            .filter(|c| **c != "recycled_material_pct")
            .copied()
            .collect::<Vec<_>>()
            .join(",");
        let path = write_temp_csv(&format!("{}\n", header));

        let err = load_esg_csv(&path).unwrap_err();
        assert!(err.to_string().contains("recycled_material_pct"));

        std::fs::remove_file(path).ok();
    }
}
