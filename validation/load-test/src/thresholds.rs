//! Pass/fail conditions evaluated against the metrics at the end of a run.
//!
//! Expressions use the `<aggregation><op><value>` form, e.g. `rate<0.01`
//! or `p(95)<500`. Latency values are milliseconds.

use crate::error::{HarnessError, HarnessResult};
use crate::metrics::{MetricsRegistry, HTTP_REQS, HTTP_REQ_FAILED, ITERATIONS};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Statistic a threshold is evaluated on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Aggregation {
    Rate,
    Count,
    Avg,
    Min,
    Max,
    Med,
    Percentile(f64),
}

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Comparison {
    fn holds(self, actual: f64, limit: f64) -> bool {
        match self {
            Comparison::Lt => actual < limit,
            Comparison::Le => actual <= limit,
            Comparison::Gt => actual > limit,
            Comparison::Ge => actual >= limit,
            Comparison::Eq => actual == limit,
            Comparison::Ne => actual != limit,
        }
    }
}

/// One parsed condition on a metric.
#[derive(Debug, Clone, PartialEq)]
pub struct Threshold {
    pub expression: String,
    pub aggregation: Aggregation,
    pub comparison: Comparison,
    pub limit: f64,
}

impl Threshold {
    /// Parse an expression such as `p(95)<500`.
    pub fn parse(metric: &str, expression: &str) -> HarnessResult<Self> {
        let invalid = |message: &str| HarnessError::InvalidThreshold {
            metric: metric.to_string(),
            expression: expression.to_string(),
            message: message.to_string(),
        };

        let compact: String = expression.chars().filter(|c| !c.is_whitespace()).collect();
        let op_start = compact
            .find(|c| matches!(c, '<' | '>' | '=' | '!'))
            .ok_or_else(|| invalid("missing comparison operator"))?;
        let (agg, rest) = compact.split_at(op_start);

        let (comparison, value) = [
            ("<=", Comparison::Le),
            (">=", Comparison::Ge),
            ("==", Comparison::Eq),
            ("!=", Comparison::Ne),
            ("<", Comparison::Lt),
            (">", Comparison::Gt),
        ]
        .iter()
        .find_map(|(op, cmp)| rest.strip_prefix(op).map(|v| (*cmp, v)))
        .ok_or_else(|| invalid("unknown comparison operator"))?;

        let limit: f64 = value
            .parse()
            .map_err(|_| invalid("threshold value is not a number"))?;

        let aggregation = match agg {
            "rate" => Aggregation::Rate,
            "count" => Aggregation::Count,
            "avg" => Aggregation::Avg,
            "min" => Aggregation::Min,
            "max" => Aggregation::Max,
            "med" => Aggregation::Med,
            p if p.starts_with("p(") && p.ends_with(')') => {
                let pct: f64 = p[2..p.len() - 1]
                    .parse()
                    .map_err(|_| invalid("percentile is not a number"))?;
                if !(0.0..=100.0).contains(&pct) {
                    return Err(invalid("percentile must be within 0..=100"));
                }
                Aggregation::Percentile(pct)
            }
            _ => return Err(invalid("unknown aggregation")),
        };

        Ok(Self {
            expression: expression.to_string(),
            aggregation,
            comparison,
            limit,
        })
    }

    /// Compute the aggregated value this threshold compares against.
    fn actual(&self, metric: &str, registry: &MetricsRegistry) -> Result<f64, String> {
        match self.aggregation {
            Aggregation::Rate => {
                let (numerator, denominator) = match metric {
                    HTTP_REQ_FAILED => (
                        registry.counter(HTTP_REQ_FAILED),
                        registry.counter(HTTP_REQS),
                    ),
                    _ => (registry.counter(metric), registry.counter(ITERATIONS)),
                };
                let numerator = numerator.ok_or("metric was never recorded")?;
                let denominator = denominator.unwrap_or(0);
                Ok(if denominator == 0 {
                    0.0
                } else {
                    numerator as f64 / denominator as f64
                })
            }
            Aggregation::Count => registry
                .counter(metric)
                .or_else(|| registry.with_distribution(metric, |h| h.len()))
                .map(|c| c as f64)
                .ok_or_else(|| "metric was never recorded".to_string()),
            agg => registry
                .with_distribution(metric, |h| {
                    if h.is_empty() {
                        return None;
                    }
                    let micros = match agg {
                        Aggregation::Avg => h.mean(),
                        Aggregation::Min => h.min() as f64,
                        Aggregation::Max => h.max() as f64,
                        Aggregation::Med => h.value_at_percentile(50.0) as f64,
                        Aggregation::Percentile(p) => h.value_at_percentile(p) as f64,
                        Aggregation::Rate | Aggregation::Count => unreachable!(),
                    };
                    Some(micros / 1000.0)
                })
                .ok_or_else(|| format!("'{}' is not a latency metric", metric))?
                .ok_or_else(|| "no samples recorded".to_string()),
        }
    }
}

/// Result of evaluating one threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdOutcome {
    pub metric: String,
    pub expression: String,
    pub actual: Option<f64>,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl fmt::Display for ThresholdOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = if self.passed { "✓" } else { "✗" };
        match (&self.actual, &self.reason) {
            (Some(actual), _) => write!(
                f,
                "{} {} {} (actual {:.4})",
                mark, self.metric, self.expression, actual
            ),
            (None, Some(reason)) => write!(
                f,
                "{} {} {} ({})",
                mark, self.metric, self.expression, reason
            ),
            (None, None) => write!(f, "{} {} {}", mark, self.metric, self.expression),
        }
    }
}

/// Metric name to conditions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThresholdSet {
    thresholds: BTreeMap<String, Vec<Threshold>>,
}

impl ThresholdSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a map of raw expressions.
    pub fn from_expressions(raw: &BTreeMap<String, Vec<String>>) -> HarnessResult<Self> {
        let mut set = Self::new();
        for (metric, expressions) in raw {
            for expression in expressions {
                set.add(metric, expression)?;
            }
        }
        Ok(set)
    }

    /// Add one condition to a metric.
    pub fn add(&mut self, metric: &str, expression: &str) -> HarnessResult<()> {
        let threshold = Threshold::parse(metric, expression)?;
        self.thresholds
            .entry(metric.to_string())
            .or_default()
            .push(threshold);
        Ok(())
    }

    /// Parse `metric:expression` as given on the command line.
    pub fn add_spec(&mut self, spec: &str) -> HarnessResult<()> {
        let (metric, expression) = spec.split_once(':').ok_or_else(|| HarnessError::InvalidThreshold {
            metric: String::new(),
            expression: spec.to_string(),
            message: "expected <metric>:<expression>".to_string(),
        })?;
        self.add(metric.trim(), expression.trim())
    }

    pub fn is_empty(&self) -> bool {
        self.thresholds.is_empty()
    }

    pub fn len(&self) -> usize {
        self.thresholds.values().map(Vec::len).sum()
    }

    /// Evaluate every condition against the registry.
    pub fn evaluate(&self, registry: &MetricsRegistry) -> Vec<ThresholdOutcome> {
        self.thresholds
            .iter()
            .flat_map(|(metric, thresholds)| {
                thresholds.iter().map(move |t| match t.actual(metric, registry) {
                    Ok(actual) => ThresholdOutcome {
                        metric: metric.clone(),
                        expression: t.expression.clone(),
                        actual: Some(actual),
                        passed: t.comparison.holds(actual, t.limit),
                        reason: None,
                    },
                    Err(reason) => ThresholdOutcome {
                        metric: metric.clone(),
                        expression: t.expression.clone(),
                        actual: None,
                        passed: false,
                        reason: Some(reason),
                    },
                })
            })
            .collect()
    }
}
