//! Volatility bands and ranges.

use crate::kernels::ring::window_extremes;
use crate::kernels::ring::SampleRing;
use crate::kernels::rolling::{ReduceView, RollingReduce};
use crate::kernels::smooth::Ema;
use crate::kernels::transform::TrueRange;
use crate::kernels::{Emit, KernelState, Sample, Update, WarmupHint, WarmupPolicy};
use serde::{Deserialize, Serialize};

/// Average true range (Wilder smoothing). Inputs: `[high, low, close]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Atr {
    period: usize,
    true_range: TrueRange,
    smooth: Ema,
}

impl Atr {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            true_range: TrueRange::new(),
            smooth: Ema::wilder(period),
        }
    }

    /// Shared with Keltner-style composites.
    pub fn update(&mut self, high: Sample, low: Sample, close: Sample) -> Sample {
        if !high.is_usable() || !low.is_usable() || !close.is_usable() {
            return Sample::missing();
        }
        let range = self.true_range.update(high.value, low.value, close.value);
        self.smooth.update(Sample::present(range))
    }
}

impl KernelState for Atr {
    fn step(&mut self, update: &Update) -> Emit {
        let out = self.update(update.inputs[0], update.inputs[1], update.inputs[2]);
        Emit::single(out.value, out.available)
    }

    fn warmup_hint(&self) -> WarmupHint {
        WarmupHint {
            policy: WarmupPolicy::Recursive,
            length: self.period,
        }
    }
}

/// Bollinger bands. Input: `[close]`.
/// Outputs: `{upper, middle, lower}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BBands {
    multiplier: f64,
    mean: RollingReduce,
    std: RollingReduce,
    period: usize,
}

impl BBands {
    pub fn new(period: usize, multiplier: f64) -> Self {
        Self {
            multiplier,
            mean: RollingReduce::new(ReduceView::Mean, period),
            std: RollingReduce::new(ReduceView::Std, period),
            period,
        }
    }
}

impl KernelState for BBands {
    fn step(&mut self, update: &Update) -> Emit {
        let close = update.inputs[0];
        let mean = self.mean.update(close);
        let std = self.std.update(close);
        if !mean.available || !std.available {
            return Emit::all_unavailable(3);
        }
        let spread = self.multiplier * std.value;
        Emit::triple(
            Sample::present(mean.value + spread),
            Sample::present(mean.value),
            Sample::present(mean.value - spread),
        )
    }

    fn warmup_hint(&self) -> WarmupHint {
        WarmupHint {
            policy: WarmupPolicy::Window,
            length: self.period,
        }
    }
}

/// Donchian channel. Inputs: `[high, low]`.
/// Outputs: `{upper, middle, lower}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Donchian {
    period: usize,
    highs: SampleRing,
    lows: SampleRing,
    seen: u64,
}

impl Donchian {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            highs: SampleRing::new(period),
            lows: SampleRing::new(period),
            seen: 0,
        }
    }
}

impl KernelState for Donchian {
    fn step(&mut self, update: &Update) -> Emit {
        let [high, low] = [update.inputs[0], update.inputs[1]];
        let usable = high.is_usable() && low.is_usable();
        self.highs.push(Sample {
            value: high.value,
            available: usable,
        });
        self.lows.push(Sample {
            value: low.value,
            available: usable,
        });
        if usable {
            self.seen += 1;
        }
        if self.seen < self.period as u64 {
            return Emit::all_unavailable(3);
        }
        let (Some(h), Some(l)) = (
            window_extremes(&self.highs, self.period),
            window_extremes(&self.lows, self.period),
        ) else {
            return Emit::all_unavailable(3);
        };
        Emit::triple(
            Sample::present(h.max),
            Sample::present((h.max + l.min) / 2.0),
            Sample::present(l.min),
        )
    }

    fn warmup_hint(&self) -> WarmupHint {
        WarmupHint {
            policy: WarmupPolicy::Window,
            length: self.period,
        }
    }
}

/// Keltner channel: EMA midline with ATR envelopes.
/// Inputs: `[high, low, close]`. Outputs: `{upper, middle, lower}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Keltner {
    multiplier: f64,
    midline: Ema,
    atr: Atr,
    period: usize,
}

impl Keltner {
    pub fn new(period: usize, atr_period: usize, multiplier: f64) -> Self {
        Self {
            multiplier,
            midline: Ema::new(period),
            atr: Atr::new(atr_period),
            period,
        }
    }
}

impl KernelState for Keltner {
    fn step(&mut self, update: &Update) -> Emit {
        let [high, low, close] = [update.inputs[0], update.inputs[1], update.inputs[2]];
        let mid = self.midline.update(close);
        let atr = self.atr.update(high, low, close);
        if !mid.available || !atr.available {
            return Emit::all_unavailable(3);
        }
        let spread = self.multiplier * atr.value;
        Emit::triple(
            Sample::present(mid.value + spread),
            Sample::present(mid.value),
            Sample::present(mid.value - spread),
        )
    }

    fn warmup_hint(&self) -> WarmupHint {
        WarmupHint {
            policy: WarmupPolicy::Recursive,
            length: self.period,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::testing::drive_rows;

    #[test]
    fn atr_of_constant_range_converges_to_range() {
        let rows: Vec<Vec<f64>> = (0..20).map(|_| vec![12.0, 10.0, 11.0]).collect();
        let out = drive_rows(&mut Atr::new(4), &rows);
        assert!(!out[2][0].1);
        assert!(out[3][0].1);
        let last = out.last().unwrap()[0];
        assert!((last.0 - 2.0).abs() < 1e-9);
    }

    #[test]
    fn bbands_collapse_on_constant_input() {
        let rows: Vec<Vec<f64>> = (0..6).map(|_| vec![50.0]).collect();
        let out = drive_rows(&mut BBands::new(4, 2.0), &rows);
        assert!(!out[2][0].1);
        let last = out.last().unwrap();
        assert_eq!(last[0].0, 50.0);
        assert_eq!(last[1].0, 50.0);
        assert_eq!(last[2].0, 50.0);
    }

    #[test]
    fn donchian_tracks_window_extremes() {
        let rows = vec![
            vec![10.0, 5.0],
            vec![12.0, 6.0],
            vec![11.0, 4.0],
            vec![9.0, 7.0],
        ];
        let out = drive_rows(&mut Donchian::new(3), &rows);
        assert!(out[2][0].1);
        assert_eq!(out[2][0].0, 12.0);
        assert_eq!(out[2][2].0, 4.0);
        assert_eq!(out[3][0].0, 12.0);
        assert_eq!(out[3][2].0, 4.0);
    }

    #[test]
    fn keltner_brackets_the_midline() {
        let rows: Vec<Vec<f64>> = (0..30).map(|_| vec![12.0, 10.0, 11.0]).collect();
        let out = drive_rows(&mut Keltner::new(5, 5, 1.5), &rows);
        let last = out.last().unwrap();
        assert!(last[0].1);
        assert!((last[1].0 - 11.0).abs() < 1e-9);
        assert!((last[0].0 - (11.0 + 3.0)).abs() < 1e-6);
        assert!((last[2].0 - (11.0 - 3.0)).abs() < 1e-6);
    }
}
