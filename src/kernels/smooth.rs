//! Recursive and finite-window smoothers.

use crate::kernels::{Emit, KernelState, Sample, Update, WarmupHint, WarmupPolicy};
use serde::{Deserialize, Serialize};

/// Exponential smoother. `alpha = 2 / (period + 1)` for the classic EMA,
/// `alpha = 1 / period` for Wilder's RMA.
///
/// Emits from the first usable input but reports `available` only after
/// `period` usable samples. An unusable input suspends the update: state is
/// unchanged and the tick's output is unavailable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ema {
    period: usize,
    alpha: f64,
    value: Option<f64>,
    seen: u64,
}

impl Ema {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            alpha: 2.0 / (period as f64 + 1.0),
            value: None,
            seen: 0,
        }
    }

    pub fn wilder(period: usize) -> Self {
        Self {
            period,
            alpha: 1.0 / period as f64,
            value: None,
            seen: 0,
        }
    }

    /// Feed one pre-extracted sample; shared with composites that chain
    /// smoothers over derived values.
    pub fn update(&mut self, sample: Sample) -> Sample {
        if !sample.is_usable() {
            return Sample {
                value: self.value.unwrap_or(f64::NAN),
                available: false,
            };
        }
        let next = match self.value {
            None => sample.value,
            Some(prev) => self.alpha * sample.value + (1.0 - self.alpha) * prev,
        };
        self.value = Some(next);
        self.seen += 1;
        Sample {
            value: next,
            available: self.seen >= self.period as u64,
        }
    }

    pub fn last(&self) -> Option<f64> {
        self.value
    }
}

impl KernelState for Ema {
    fn step(&mut self, update: &Update) -> Emit {
        let out = self.update(update.inputs[0]);
        Emit::single(out.value, out.available)
    }

    fn warmup_hint(&self) -> WarmupHint {
        WarmupHint {
            policy: WarmupPolicy::Recursive,
            length: self.period,
        }
    }
}

/// Linear-weighted moving average over the last `period` usable samples
/// (weight `period` on the newest).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wma {
    period: usize,
    // Usable samples only; missing inputs are skipped, shrinking nothing.
    values: Vec<f64>,
}

impl Wma {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            values: Vec::with_capacity(period),
        }
    }

    pub fn update(&mut self, sample: Sample) -> Sample {
        if sample.is_usable() {
            if self.values.len() == self.period {
                self.values.remove(0);
            }
            self.values.push(sample.value);
        }
        if self.values.len() < self.period {
            return Sample::missing();
        }
        let mut weighted = 0.0;
        let mut weight_sum = 0.0;
        for (idx, value) in self.values.iter().enumerate() {
            let weight = (idx + 1) as f64;
            weighted += weight * value;
            weight_sum += weight;
        }
        Sample {
            value: weighted / weight_sum,
            available: true,
        }
    }
}

impl KernelState for Wma {
    fn step(&mut self, update: &Update) -> Emit {
        let out = self.update(update.inputs[0]);
        Emit::single(out.value, out.available)
    }

    fn warmup_hint(&self) -> WarmupHint {
        WarmupHint {
            policy: WarmupPolicy::Window,
            length: self.period,
        }
    }
}

/// Hull moving average: `wma(2*wma(n/2) - wma(n), sqrt(n))`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hma {
    period: usize,
    half: Wma,
    full: Wma,
    post: Wma,
}

impl Hma {
    pub fn new(period: usize) -> Self {
        let sqrt_len = (period as f64).sqrt().round().max(1.0) as usize;
        Self {
            period,
            half: Wma::new((period / 2).max(1)),
            full: Wma::new(period),
            post: Wma::new(sqrt_len),
        }
    }
}

impl KernelState for Hma {
    fn step(&mut self, update: &Update) -> Emit {
        let sample = update.inputs[0];
        let half = self.half.update(sample);
        let full = self.full.update(sample);
        let raw = if half.available && full.available {
            Sample::present(2.0 * half.value - full.value)
        } else {
            Sample::missing()
        };
        let out = self.post.update(raw);
        Emit::single(out.value, out.available)
    }

    fn warmup_hint(&self) -> WarmupHint {
        let sqrt_len = (self.period as f64).sqrt().round().max(1.0) as usize;
        WarmupHint {
            policy: WarmupPolicy::Window,
            length: self.period + sqrt_len - 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::testing::{drive, drive_samples};

    #[test]
    fn ema_recursion_matches_reference() {
        let mut ema = Ema::new(3);
        let out = drive(&mut ema, &[1.0, 2.0, 3.0, 4.0]);
        // alpha = 0.5: 1, 1.5, 2.25, 3.125
        let expected = [1.0, 1.5, 2.25, 3.125];
        for (idx, ((value, _), exp)) in out.iter().zip(expected.iter()).enumerate() {
            assert!((value - exp).abs() < 1e-12, "index {idx}");
        }
        assert!(!out[0].1);
        assert!(!out[1].1);
        assert!(out[2].1, "available after period usable samples");
    }

    #[test]
    fn ema_suspends_on_missing_input() {
        let samples = vec![
            Sample::present(10.0),
            Sample::missing(),
            Sample::present(20.0),
        ];
        // Wilder alpha 1/2 keeps the arithmetic easy to eyeball.
        let mut rma = Ema::wilder(2);
        let out = drive_samples(&mut rma, &samples);
        assert!(!out[1].1);
        // The missing tick must not advance the recursion: 10 then 15.
        assert!((out[2].0 - 15.0).abs() < 1e-12);
        assert!(out[2].1);
    }

    #[test]
    fn wilder_rma_uses_one_over_period() {
        let mut rma = Ema::wilder(4);
        let out = drive(&mut rma, &[4.0, 8.0]);
        // 4, then 4 + (8-4)/4 = 5
        assert!((out[1].0 - 5.0).abs() < 1e-12);
    }

    #[test]
    fn wma_weights_recent_samples_heavier() {
        let mut wma = Wma::new(3);
        let out = drive(&mut wma, &[1.0, 2.0, 3.0]);
        assert!(!out[1].1);
        assert!(out[2].1);
        // (1*1 + 2*2 + 3*3) / 6
        assert!((out[2].0 - 14.0 / 6.0).abs() < 1e-12);
    }

    #[test]
    fn hma_becomes_available_after_composed_warmup() {
        let mut hma = Hma::new(4);
        let values: Vec<f64> = (1..=10).map(|v| v as f64).collect();
        let out = drive(&mut hma, &values);
        let hint = hma.warmup_hint();
        assert_eq!(hint.length, 5);
        assert!(!out[3].1);
        assert!(out[4].1);
        // On a linear ramp the HMA tracks the input closely; sanity bound.
        assert!(out[9].0 > 9.0);
    }
}
