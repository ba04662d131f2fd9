//! Data processing executor: ordered filter/map/sort steps over JSON rows.
//!
//! A step that fails to parse or evaluate is logged and skipped; the rows
//! pass to the next step unchanged.

use std::cmp::Ordering;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::expr::{EvalError, Expr, Scope, is_truthy, sort_order, type_name};
use super::{Executor, parse_payload};
use crate::error::{ExecutionError, StepError};
use crate::process::ProcessKind;

#[derive(Debug, Deserialize)]
struct DataProcessingPayload {
    #[serde(default)]
    data: Vec<Value>,
    /// Kept raw so one malformed step does not reject the whole payload.
    #[serde(default)]
    steps: Vec<Value>,
}

/// One pipeline step.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Step {
    /// Keep rows where `predicate` is truthy.
    Filter { predicate: Expr },
    /// Replace each row with `expr`, or merge an object result into the row.
    Map {
        expr: Expr,
        #[serde(default)]
        merge: bool,
    },
    /// Sort by a per-row `key`, or by a pairwise `compare` returning a number.
    Sort {
        #[serde(default)]
        key: Option<Expr>,
        #[serde(default)]
        compare: Option<Expr>,
        #[serde(default)]
        descending: bool,
    },
}

impl Step {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Filter { .. } => "filter",
            Self::Map { .. } => "map",
            Self::Sort { .. } => "sort",
        }
    }

    /// Parse the step at `index` of a pipeline.
    pub fn parse(index: usize, raw: &Value) -> Result<Self, StepError> {
        let step: Step = serde_json::from_value(raw.clone()).map_err(|e| StepError::Parse {
            index,
            reason: e.to_string(),
        })?;
        if let Step::Sort { key, compare, .. } = &step
            && key.is_some() == compare.is_some()
        {
            return Err(StepError::Parse {
                index,
                reason: "sort needs exactly one of `key` or `compare`".into(),
            });
        }
        Ok(step)
    }

    /// Apply the step, returning new rows. `rows` is left untouched on failure.
    pub fn apply(&self, index: usize, rows: &[Value]) -> Result<Vec<Value>, StepError> {
        let failed = |reason: String| StepError::Eval {
            index,
            step: self.name(),
            reason,
        };

        match self {
            Self::Filter { predicate } => {
                let mut kept = Vec::with_capacity(rows.len());
                for row in rows {
                    let verdict = predicate
                        .eval(Scope::Row(row))
                        .map_err(|e| failed(e.to_string()))?;
                    if is_truthy(&verdict) {
                        kept.push(row.clone());
                    }
                }
                Ok(kept)
            }
            Self::Map { expr, merge } => rows
                .iter()
                .map(|row| {
                    let mapped = expr.eval(Scope::Row(row)).map_err(|e| failed(e.to_string()))?;
                    if !*merge {
                        return Ok(mapped);
                    }
                    match (row, mapped) {
                        (Value::Object(base), Value::Object(extra)) => {
                            let mut merged = base.clone();
                            merged.extend(extra);
                            Ok(Value::Object(merged))
                        }
                        (base, extra) => Err(failed(format!(
                            "merge needs object rows and results, got {} and {}",
                            type_name(base),
                            type_name(&extra)
                        ))),
                    }
                })
                .collect(),
            Self::Sort {
                key: Some(key),
                descending,
                ..
            } => {
                let mut keyed = Vec::with_capacity(rows.len());
                for row in rows {
                    let k = key.eval(Scope::Row(row)).map_err(|e| failed(e.to_string()))?;
                    keyed.push((k, row.clone()));
                }
                keyed.sort_by(|(a, _), (b, _)| {
                    let ord = sort_order(a, b);
                    if *descending { ord.reverse() } else { ord }
                });
                Ok(keyed.into_iter().map(|(_, row)| row).collect())
            }
            Self::Sort {
                compare: Some(compare),
                descending,
                ..
            } => sort_with_comparator(rows, compare, *descending).map_err(failed),
            Self::Sort { .. } => Err(failed("sort needs `key` or `compare`".into())),
        }
    }
}

fn sort_with_comparator(
    rows: &[Value],
    compare: &Expr,
    descending: bool,
) -> Result<Vec<Value>, String> {
    let compare_pair = |a: &Value, b: &Value| -> Result<Ordering, EvalError> {
        let ord = match compare.eval(Scope::Pair { a, b })? {
            Value::Number(n) => n
                .as_f64()
                .and_then(|f| f.partial_cmp(&0.0))
                .unwrap_or(Ordering::Equal),
            other => {
                return Err(EvalError::TypeMismatch {
                    op: "compare",
                    left: type_name(&other),
                    right: "number",
                });
            }
        };
        Ok(if descending { ord.reverse() } else { ord })
    };

    let sorted = merge_sort(rows.to_vec(), &compare_pair).map_err(|e| e.to_string())?;

    // Neighbours must agree in both directions.
    for pair in sorted.windows(2) {
        let forward = compare_pair(&pair[0], &pair[1]).map_err(|e| e.to_string())?;
        let backward = compare_pair(&pair[1], &pair[0]).map_err(|e| e.to_string())?;
        if forward == Ordering::Greater || forward != backward.reverse() {
            return Err("comparator is not a consistent ordering".into());
        }
    }
    Ok(sorted)
}

/// Stable merge sort over a fallible comparator. Any comparator, consistent
/// or not, yields some permutation of `rows`.
fn merge_sort<F>(mut rows: Vec<Value>, compare: &F) -> Result<Vec<Value>, EvalError>
where
    F: Fn(&Value, &Value) -> Result<Ordering, EvalError>,
{
    if rows.len() <= 1 {
        return Ok(rows);
    }
    let right = rows.split_off(rows.len() / 2);
    let left = merge_sort(rows, compare)?;
    let right = merge_sort(right, compare)?;

    let mut merged = Vec::with_capacity(left.len() + right.len());
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();
    while let (Some(l), Some(r)) = (left.peek(), right.peek()) {
        if compare(r, l)? == Ordering::Less {
            merged.extend(right.next());
        } else {
            merged.extend(left.next());
        }
    }
    merged.extend(left);
    merged.extend(right);
    Ok(merged)
}

/// Run `steps` over `rows`, skipping steps that fail.
pub fn run_pipeline(process_id: &str, mut rows: Vec<Value>, steps: &[Value]) -> Vec<Value> {
    for (index, raw) in steps.iter().enumerate() {
        let outcome = Step::parse(index, raw).and_then(|step| step.apply(index, &rows));
        match outcome {
            Ok(next) => rows = next,
            Err(e) => {
                tracing::warn!(process_id = %process_id, "Skipping data-processing step: {e}");
            }
        }
    }
    rows
}

/// Applies the configured pipeline to the payload's rows each tick.
pub struct DataProcessingExecutor;

#[async_trait]
impl Executor for DataProcessingExecutor {
    fn kind(&self) -> ProcessKind {
        ProcessKind::DataProcessing
    }

    async fn execute(&self, process_id: &str, payload: &Value) -> Result<Value, ExecutionError> {
        let payload: DataProcessingPayload = parse_payload(self.kind(), payload)?;
        let rows = run_pipeline(process_id, payload.data, &payload.steps);
        Ok(Value::Array(rows))
    }
}
