//! Differencing and per-bar transformational kernels.

use crate::kernels::ring::SampleRing;
use crate::kernels::{Emit, KernelState, Update, WarmupHint, WarmupPolicy};
use serde::{Deserialize, Serialize};

/// `x[t] - x[t-k]`. Unavailable until both endpoints are usable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diff {
    lag: usize,
    ring: SampleRing,
}

impl Diff {
    pub fn new(lag: usize) -> Self {
        Self {
            lag,
            ring: SampleRing::new(lag + 1),
        }
    }
}

impl KernelState for Diff {
    fn step(&mut self, update: &Update) -> Emit {
        self.ring.push(update.inputs[0]);
        let cur = self.ring.get_lag(0);
        let old = self.ring.get_lag(self.lag);
        match (cur, old) {
            (Some(cur), Some(old)) if cur.is_usable() && old.is_usable() => {
                Emit::single(cur.value - old.value, true)
            }
            _ => Emit::unavailable(1),
        }
    }

    fn warmup_hint(&self) -> WarmupHint {
        WarmupHint {
            policy: WarmupPolicy::Window,
            length: self.lag + 1,
        }
    }
}

/// Rate of change in percent: `(x[t] / x[t-n] - 1) * 100`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Roc {
    lag: usize,
    ring: SampleRing,
}

impl Roc {
    pub fn new(lag: usize) -> Self {
        Self {
            lag,
            ring: SampleRing::new(lag + 1),
        }
    }

    /// Shared with composites chaining rate-of-change stages.
    pub fn update(&mut self, sample: crate::kernels::Sample) -> crate::kernels::Sample {
        self.ring.push(sample);
        let cur = self.ring.get_lag(0);
        let old = self.ring.get_lag(self.lag);
        match (cur, old) {
            (Some(cur), Some(old))
                if cur.is_usable() && old.is_usable() && old.value != 0.0 =>
            {
                crate::kernels::Sample::present((cur.value / old.value - 1.0) * 100.0)
            }
            _ => crate::kernels::Sample::missing(),
        }
    }
}

impl KernelState for Roc {
    fn step(&mut self, update: &Update) -> Emit {
        let out = self.update(update.inputs[0]);
        Emit::single(out.value, out.available)
    }

    fn warmup_hint(&self) -> WarmupHint {
        WarmupHint {
            policy: WarmupPolicy::Window,
            length: self.lag + 1,
        }
    }
}

/// `x[t-k]`; `k = 0` is the identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shift {
    lag: usize,
    ring: SampleRing,
}

impl Shift {
    pub fn new(lag: usize) -> Self {
        Self {
            lag,
            ring: SampleRing::new(lag + 1),
        }
    }
}

impl KernelState for Shift {
    fn step(&mut self, update: &Update) -> Emit {
        self.ring.push(update.inputs[0]);
        match self.ring.get_lag(self.lag) {
            Some(sample) if sample.is_usable() => Emit::single(sample.value, true),
            _ => Emit::unavailable(1),
        }
    }

    fn warmup_hint(&self) -> WarmupHint {
        WarmupHint {
            policy: WarmupPolicy::Window,
            length: self.lag + 1,
        }
    }
}

/// Wilder's true range. Inputs: `[high, low, close]`. The first usable bar
/// emits `high - low`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrueRange {
    prev_close: Option<f64>,
}

impl TrueRange {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared with the composites that smooth the raw range.
    pub fn update(&mut self, high: f64, low: f64, close: f64) -> f64 {
        let range = match self.prev_close {
            None => high - low,
            Some(prev) => (high - low)
                .max((high - prev).abs())
                .max((low - prev).abs()),
        };
        self.prev_close = Some(close);
        range
    }
}

impl KernelState for TrueRange {
    fn step(&mut self, update: &Update) -> Emit {
        let [high, low, close] = [update.inputs[0], update.inputs[1], update.inputs[2]];
        if !high.is_usable() || !low.is_usable() || !close.is_usable() {
            return Emit::unavailable(1);
        }
        let range = self.update(high.value, low.value, close.value);
        Emit::single(range, true)
    }

    fn warmup_hint(&self) -> WarmupHint {
        WarmupHint {
            policy: WarmupPolicy::None,
            length: 1,
        }
    }
}

/// Keeps values above zero, clamping the rest to zero. The gains half of a
/// gain/loss split.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PositiveValues;

impl KernelState for PositiveValues {
    fn step(&mut self, update: &Update) -> Emit {
        let sample = update.inputs[0];
        if !sample.is_usable() {
            return Emit::unavailable(1);
        }
        Emit::single(sample.value.max(0.0), true)
    }

    fn warmup_hint(&self) -> WarmupHint {
        WarmupHint {
            policy: WarmupPolicy::None,
            length: 1,
        }
    }
}

/// Keeps the magnitude of values below zero, clamping the rest to zero.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NegativeValues;

impl KernelState for NegativeValues {
    fn step(&mut self, update: &Update) -> Emit {
        let sample = update.inputs[0];
        if !sample.is_usable() {
            return Emit::unavailable(1);
        }
        Emit::single((-sample.value).max(0.0), true)
    }

    fn warmup_hint(&self) -> WarmupHint {
        WarmupHint {
            policy: WarmupPolicy::None,
            length: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::testing::{drive, drive_rows};

    #[test]
    fn diff_and_shift_line_up_lags() {
        let out = drive(&mut Diff::new(2), &[1.0, 4.0, 9.0, 16.0]);
        assert!(!out[1].1);
        assert_eq!(out[2], (8.0, true));
        assert_eq!(out[3], (12.0, true));

        let out = drive(&mut Shift::new(1), &[1.0, 2.0, 3.0]);
        assert!(!out[0].1);
        assert_eq!(out[1], (1.0, true));
        assert_eq!(out[2], (2.0, true));
    }

    #[test]
    fn shift_zero_is_identity() {
        let out = drive(&mut Shift::new(0), &[5.0, 6.0]);
        assert_eq!(out[0], (5.0, true));
        assert_eq!(out[1], (6.0, true));
    }

    #[test]
    fn roc_guards_division_by_zero() {
        let out = drive(&mut Roc::new(1), &[0.0, 5.0, 10.0]);
        assert!(!out[1].1, "base of zero has no percentage change");
        assert_eq!(out[2], (100.0, true));
    }

    #[test]
    fn true_range_spans_gaps() {
        let rows = [vec![12.0, 10.0, 11.0], vec![15.0, 14.0, 14.5]];
        let out = drive_rows(&mut TrueRange::new(), &rows);
        assert_eq!(out[0][0], (2.0, true));
        // Gap up: |15 - 11| beats the bar range.
        assert_eq!(out[1][0], (4.0, true));
    }

    #[test]
    fn gain_loss_split_clamps() {
        let out = drive(&mut PositiveValues, &[2.0, -3.0]);
        assert_eq!(out[0], (2.0, true));
        assert_eq!(out[1], (0.0, true));
        let out = drive(&mut NegativeValues, &[2.0, -3.0]);
        assert_eq!(out[0], (0.0, true));
        assert_eq!(out[1], (3.0, true));
    }
}
