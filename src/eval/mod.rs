//! Dual-mode plan evaluation.
//!
//! [`batch`] executes a plan node-at-a-time over full series; [`incremental`]
//! advances a session one event at a time. Both share the kernel library,
//! the operator semantics, and the alignment rules in this module, which is
//! what the parity contract rests on.

pub mod align;
pub mod batch;
pub mod incremental;

use crate::kernels::{Emit, Sample};
use crate::plan::{OutputField, PlanNode};
use crate::types::{BinaryOp, Reducer, UnaryOp};
use serde::{Deserialize, Serialize};

/// One node's output timeline: parallel columns over shared timestamps.
/// Serializes for API consumers; unavailable values render as JSON nulls.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Frame {
    pub timestamps: Vec<i64>,
    pub columns: Vec<Column>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Column {
    pub name: String,
    pub boolean: bool,
    pub values: Vec<f64>,
    pub available: Vec<bool>,
}

impl Frame {
    pub fn for_node(node: &PlanNode) -> Self {
        Self::with_schema(&node.output_schema)
    }

    pub fn with_schema(schema: &[OutputField]) -> Self {
        Self {
            timestamps: Vec::new(),
            columns: schema
                .iter()
                .map(|field| Column {
                    name: field.name.clone(),
                    boolean: field.boolean,
                    values: Vec::new(),
                    available: Vec::new(),
                })
                .collect(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn push_emit(&mut self, timestamp: i64, emit: &Emit) {
        debug_assert_eq!(emit.len(), self.columns.len(), "emit width matches schema");
        self.timestamps.push(timestamp);
        for (idx, column) in self.columns.iter_mut().enumerate() {
            let sample = emit.get(idx);
            column.values.push(sample.value);
            column.available.push(sample.available);
        }
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|column| column.name == name)
    }

    /// Row at `idx` as samples in column order.
    pub fn row(&self, idx: usize) -> Vec<Sample> {
        self.columns
            .iter()
            .map(|column| Sample {
                value: column.values[idx],
                available: column.available[idx],
            })
            .collect()
    }

    /// Index of the row at exactly `ts`, if present.
    pub fn index_of(&self, ts: i64) -> Option<usize> {
        self.timestamps.binary_search(&ts).ok()
    }

    /// Drop rows with timestamps greater than `cutoff`.
    pub fn truncate_after(&mut self, cutoff: i64) {
        let keep = self.timestamps.partition_point(|ts| *ts <= cutoff);
        self.timestamps.truncate(keep);
        for column in &mut self.columns {
            column.values.truncate(keep);
            column.available.truncate(keep);
        }
    }
}

/// Per-node warmup lifecycle. Unavailability never downgrades the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarmupStatus {
    Cold,
    Warming,
    Ready,
}

impl WarmupStatus {
    pub fn on_input(self) -> Self {
        match self {
            Self::Cold => Self::Warming,
            other => other,
        }
    }

    pub fn on_output(self, available: bool) -> Self {
        match (self, available) {
            (Self::Ready, _) => Self::Ready,
            (_, true) => Self::Ready,
            (state, false) => state,
        }
    }
}

/// Elementwise operator semantics shared by both evaluators. Division by
/// zero and non-finite results collapse to an unavailable sample at this
/// boundary.
pub(crate) fn apply_binary(op: BinaryOp, lhs: Sample, rhs: Sample) -> Sample {
    if !lhs.is_usable() || !rhs.is_usable() {
        return Sample::missing();
    }
    let (a, b) = (lhs.value, rhs.value);
    let value = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => {
            if b == 0.0 {
                return Sample::missing();
            }
            a / b
        }
        BinaryOp::Rem => {
            if b == 0.0 {
                return Sample::missing();
            }
            a % b
        }
        BinaryOp::Eq => bool_value(a == b),
        BinaryOp::Ne => bool_value(a != b),
        BinaryOp::Lt => bool_value(a < b),
        BinaryOp::Le => bool_value(a <= b),
        BinaryOp::Gt => bool_value(a > b),
        BinaryOp::Ge => bool_value(a >= b),
        BinaryOp::And => bool_value(a != 0.0 && b != 0.0),
        BinaryOp::Or => bool_value(a != 0.0 || b != 0.0),
    };
    if value.is_finite() {
        Sample::present(value)
    } else {
        Sample::missing()
    }
}

pub(crate) fn apply_unary(op: UnaryOp, child: Sample) -> Sample {
    if !child.is_usable() {
        return Sample::missing();
    }
    let value = match op {
        UnaryOp::Neg => -child.value,
        UnaryOp::Not => bool_value(child.value == 0.0),
    };
    if value.is_finite() {
        Sample::present(value)
    } else {
        Sample::missing()
    }
}

#[inline]
fn bool_value(v: bool) -> f64 {
    if v {
        1.0
    } else {
        0.0
    }
}

/// Accumulator for one collection bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct BucketAcc {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
}

impl BucketAcc {
    pub fn push(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        self.sum += value;
    }

    /// Sum and count of an empty bucket are zero and available; order
    /// statistics of nothing are unavailable.
    pub fn finalize(&self, reducer: Reducer) -> Sample {
        match reducer {
            Reducer::Sum => Sample::present(self.sum),
            Reducer::Count => Sample::present(self.count as f64),
            Reducer::Mean => {
                if self.count == 0 {
                    Sample::missing()
                } else {
                    Sample::present(self.sum / self.count as f64)
                }
            }
            Reducer::Min => {
                if self.count == 0 {
                    Sample::missing()
                } else {
                    Sample::present(self.min)
                }
            }
            Reducer::Max => {
                if self.count == 0 {
                    Sample::missing()
                } else {
                    Sample::present(self.max)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warmup_never_downgrades() {
        let state = WarmupStatus::Cold.on_input();
        assert_eq!(state, WarmupStatus::Warming);
        let state = state.on_output(true);
        assert_eq!(state, WarmupStatus::Ready);
        assert_eq!(state.on_output(false), WarmupStatus::Ready);
    }

    #[test]
    fn division_by_zero_is_unavailable() {
        let out = apply_binary(
            BinaryOp::Div,
            Sample::present(1.0),
            Sample::present(0.0),
        );
        assert!(!out.available);
        assert!(out.value.is_nan());
    }

    #[test]
    fn comparisons_produce_boolean_samples() {
        let out = apply_binary(BinaryOp::Gt, Sample::present(2.0), Sample::present(1.0));
        assert_eq!(out.value, 1.0);
        assert!(out.available);
        let out = apply_binary(BinaryOp::And, Sample::present(1.0), Sample::present(0.0));
        assert_eq!(out.value, 0.0);
    }

    #[test]
    fn empty_bucket_semantics() {
        let acc = BucketAcc::default();
        assert_eq!(acc.finalize(Reducer::Sum), Sample::present(0.0));
        assert_eq!(acc.finalize(Reducer::Count), Sample::present(0.0));
        assert!(!acc.finalize(Reducer::Mean).available);
        assert!(!acc.finalize(Reducer::Max).available);
    }

    #[test]
    fn frame_truncates_after_cutoff() {
        let mut frame = Frame::with_schema(&[OutputField {
            name: "value".to_string(),
            boolean: false,
        }]);
        for ts in [1, 2, 3, 4] {
            frame.push_emit(ts, &Emit::single(ts as f64, true));
        }
        frame.truncate_after(2);
        assert_eq!(frame.timestamps, vec![1, 2]);
        assert_eq!(frame.columns[0].values.len(), 2);
    }
}
