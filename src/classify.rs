// Threshold Classification - Rules as Data
// One ordered classifier for every bucketing/tiering decision in the pipeline

// ============================================================================
// DIRECTION
// ============================================================================

/// Which way a metric improves. Encoded per metric, never inferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// e.g. emissions per unit, defect rate
    LowerIsBetter,
    /// e.g. recycled material %, revenue
    HigherIsBetter,
}

// ============================================================================
// ORDERED THRESHOLD CLASSIFIER
// ============================================================================

/// An ordered list of (cutoff, label) rules evaluated top-down.
/// First matching cutoff wins; `fallback` applies when none match.
///
/// For `HigherIsBetter` a rule matches when `value >= cutoff`, so rules must
/// be listed highest cutoff first. For `LowerIsBetter` a rule matches when
/// `value <= cutoff`, listed lowest cutoff first.
pub struct ThresholdClassifier {
    direction: Direction,
    rules: Vec<(f64, &'static str)>,
    fallback: &'static str,
}

impl ThresholdClassifier {
    pub fn new(
        direction: Direction,
        rules: Vec<(f64, &'static str)>,
        fallback: &'static str,
    ) -> Self {
        ThresholdClassifier {
            direction,
            rules,
            fallback,
        }
    }

    /// Classify a value; first matching rule wins.
    pub fn classify(&self, value: f64) -> &'static str {
        for (cutoff, label) in &self.rules {
            let matched = match self.direction {
                Direction::HigherIsBetter => value >= *cutoff,
                Direction::LowerIsBetter => value <= *cutoff,
            };
            if matched {
                return label;
            }
        }
        self.fallback
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

// ============================================================================
// TREND CLASSIFICATION
// ============================================================================

/// Relative month-over-month trend labels.
pub const TREND_IMPROVING: &str = "Improving";
pub const TREND_DECLINING: &str = "Declining";
pub const TREND_STABLE: &str = "Stable";

/// Classify current vs prior value against a relative threshold.
///
/// A change beyond `threshold_pct` percent in the favorable direction is
/// "Improving"; beyond it in the unfavorable direction is "Declining";
/// anything else is "Stable". Returns None when there is no prior value to
/// compare against (or the prior value is zero, which makes relative change
/// undefined).
pub fn classify_trend(
    current: f64,
    prior: Option<f64>,
    direction: Direction,
    threshold_pct: f64,
) -> Option<&'static str> {
    let prior = prior?;
    if prior == 0.0 {
        return None;
    }

    let change_pct = (current - prior) / prior.abs() * 100.0;

    // Positive change is an improvement only for HigherIsBetter metrics
    let favorable_change = match direction {
        Direction::HigherIsBetter => change_pct,
        Direction::LowerIsBetter => -change_pct,
    };

    if favorable_change > threshold_pct {
        Some(TREND_IMPROVING)
    } else if favorable_change < -threshold_pct {
        Some(TREND_DECLINING)
    } else {
        Some(TREND_STABLE)
    }
}

/// Relative change in percent, None when the prior value is absent or zero.
pub fn relative_change_pct(current: f64, prior: Option<f64>) -> Option<f64> {
    let prior = prior?;
    if prior == 0.0 {
        return None;
    }
    Some((current - prior) / prior.abs() * 100.0)
}

// ============================================================================
// BENCHMARK CUTOFF TABLES
// ============================================================================

pub const BENCHMARK_LEADER: &str = "Industry Leader";
pub const BENCHMARK_ABOVE: &str = "Above Average";
pub const BENCHMARK_AVERAGE: &str = "Average";
pub const BENCHMARK_BELOW: &str = "Below Average";

/// Emissions per unit benchmark (kg CO2 per unit, lower is better).
pub fn emissions_benchmark() -> ThresholdClassifier {
    ThresholdClassifier::new(
        Direction::LowerIsBetter,
        vec![
            (0.5, BENCHMARK_LEADER),
            (0.8, BENCHMARK_ABOVE),
            (1.2, BENCHMARK_AVERAGE),
        ],
        BENCHMARK_BELOW,
    )
}

/// Recycled material content benchmark (%, higher is better).
pub fn recycling_benchmark() -> ThresholdClassifier {
    ThresholdClassifier::new(
        Direction::HigherIsBetter,
        vec![
            (80.0, BENCHMARK_LEADER),
            (60.0, BENCHMARK_ABOVE),
            (40.0, BENCHMARK_AVERAGE),
        ],
        BENCHMARK_BELOW,
    )
}

// ============================================================================
// TESTS
// ============================================================================
