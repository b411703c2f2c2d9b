//! Momentum oscillators.

use crate::kernels::ring::{window_extremes, SampleRing};
use crate::kernels::rolling::{ReduceView, RollingReduce};
use crate::kernels::transform::{Roc, TrueRange};
use crate::kernels::smooth::Wma;
use crate::kernels::{Emit, KernelState, Sample, Update, WarmupHint, WarmupPolicy};
use serde::{Deserialize, Serialize};

/// Wilder's relative strength index. Input: `[close]`.
///
/// Seeds the averages with a simple mean of the first `period` changes, then
/// switches to Wilder smoothing. A flat seed window (no gains, no losses)
/// leaves RSI undefined and the output unavailable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rsi {
    period: usize,
    prev: Option<f64>,
    phase: RsiPhase,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum RsiPhase {
    Seeding {
        gains: f64,
        losses: f64,
        count: usize,
    },
    Smoothing {
        avg_gain: f64,
        avg_loss: f64,
    },
}

impl Rsi {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            prev: None,
            phase: RsiPhase::Seeding {
                gains: 0.0,
                losses: 0.0,
                count: 0,
            },
        }
    }

    fn value(avg_gain: f64, avg_loss: f64) -> Option<f64> {
        if avg_gain == 0.0 && avg_loss == 0.0 {
            return None;
        }
        if avg_loss == 0.0 {
            return Some(100.0);
        }
        let rs = avg_gain / avg_loss;
        Some(100.0 - 100.0 / (1.0 + rs))
    }
}

impl KernelState for Rsi {
    fn step(&mut self, update: &Update) -> Emit {
        let close = update.inputs[0];
        if !close.is_usable() {
            return Emit::unavailable(1);
        }
        let Some(prev) = self.prev.replace(close.value) else {
            return Emit::unavailable(1);
        };
        let change = close.value - prev;
        let gain = change.max(0.0);
        let loss = (-change).max(0.0);

        match &mut self.phase {
            RsiPhase::Seeding {
                gains,
                losses,
                count,
            } => {
                *gains += gain;
                *losses += loss;
                *count += 1;
                if *count < self.period {
                    return Emit::unavailable(1);
                }
                let avg_gain = *gains / self.period as f64;
                let avg_loss = *losses / self.period as f64;
                self.phase = RsiPhase::Smoothing { avg_gain, avg_loss };
                match Self::value(avg_gain, avg_loss) {
                    Some(value) => Emit::single(value, true),
                    None => Emit::unavailable(1),
                }
            }
            RsiPhase::Smoothing { avg_gain, avg_loss } => {
                let n = self.period as f64;
                *avg_gain = (*avg_gain * (n - 1.0) + gain) / n;
                *avg_loss = (*avg_loss * (n - 1.0) + loss) / n;
                match Self::value(*avg_gain, *avg_loss) {
                    Some(value) => Emit::single(value, true),
                    None => Emit::unavailable(1),
                }
            }
        }
    }

    fn warmup_hint(&self) -> WarmupHint {
        WarmupHint {
            policy: WarmupPolicy::Recursive,
            length: self.period + 1,
        }
    }
}

/// Chande momentum oscillator: `100 * (su - sd) / (su + sd)` over `period`
/// changes. Input: `[close]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cmo {
    period: usize,
    prev: Option<f64>,
    up_sum: RollingReduce,
    down_sum: RollingReduce,
}

impl Cmo {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            prev: None,
            up_sum: RollingReduce::new(ReduceView::Sum, period),
            down_sum: RollingReduce::new(ReduceView::Sum, period),
        }
    }
}

impl KernelState for Cmo {
    fn step(&mut self, update: &Update) -> Emit {
        let close = update.inputs[0];
        if !close.is_usable() {
            return Emit::unavailable(1);
        }
        let Some(prev) = self.prev.replace(close.value) else {
            return Emit::unavailable(1);
        };
        let change = close.value - prev;
        let su = self.up_sum.update(Sample::present(change.max(0.0)));
        let sd = self.down_sum.update(Sample::present((-change).max(0.0)));
        if !su.available || !sd.available {
            return Emit::unavailable(1);
        }
        let denom = su.value + sd.value;
        if denom == 0.0 {
            return Emit::unavailable(1);
        }
        Emit::single(100.0 * (su.value - sd.value) / denom, true)
    }

    fn warmup_hint(&self) -> WarmupHint {
        WarmupHint {
            policy: WarmupPolicy::Window,
            length: self.period + 1,
        }
    }
}

/// Fast/slow stochastic oscillator. Inputs: `[high, low, close]`.
/// Outputs: `{k, d}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stochastic {
    k_period: usize,
    highs: SampleRing,
    lows: SampleRing,
    smooth_k: RollingReduce,
    smooth_d: RollingReduce,
}

impl Stochastic {
    pub fn new(k_period: usize, d_period: usize, smooth: usize) -> Self {
        Self {
            k_period,
            highs: SampleRing::new(k_period),
            lows: SampleRing::new(k_period),
            smooth_k: RollingReduce::new(ReduceView::Mean, smooth),
            smooth_d: RollingReduce::new(ReduceView::Mean, d_period),
        }
    }
}

impl KernelState for Stochastic {
    fn step(&mut self, update: &Update) -> Emit {
        let [high, low, close] = [update.inputs[0], update.inputs[1], update.inputs[2]];
        let usable = high.is_usable() && low.is_usable() && close.is_usable();
        self.highs.push(Sample {
            value: high.value,
            available: usable,
        });
        self.lows.push(Sample {
            value: low.value,
            available: usable,
        });

        let raw = if usable && self.highs.len() >= self.k_period {
            match (
                window_extremes(&self.highs, self.k_period),
                window_extremes(&self.lows, self.k_period),
            ) {
                (Some(h), Some(l)) if h.max > l.min => {
                    Sample::present(100.0 * (close.value - l.min) / (h.max - l.min))
                }
                _ => Sample::missing(),
            }
        } else {
            Sample::missing()
        };

        let k = self.smooth_k.update(raw);
        let d = self.smooth_d.update(k);
        Emit::pair(k, d)
    }

    fn warmup_hint(&self) -> WarmupHint {
        WarmupHint {
            policy: WarmupPolicy::Window,
            length: self.k_period + 2,
        }
    }
}

/// Williams %R. Inputs: `[high, low, close]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WilliamsR {
    period: usize,
    highs: SampleRing,
    lows: SampleRing,
    seen: u64,
}

impl WilliamsR {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            highs: SampleRing::new(period),
            lows: SampleRing::new(period),
            seen: 0,
        }
    }
}

impl KernelState for WilliamsR {
    fn step(&mut self, update: &Update) -> Emit {
        let [high, low, close] = [update.inputs[0], update.inputs[1], update.inputs[2]];
        let usable = high.is_usable() && low.is_usable() && close.is_usable();
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
        if self.seen < self.period as u64 || !usable {
            return Emit::unavailable(1);
        }
        let (Some(h), Some(l)) = (
            window_extremes(&self.highs, self.period),
            window_extremes(&self.lows, self.period),
        ) else {
            return Emit::unavailable(1);
        };
        if h.max <= l.min {
            return Emit::unavailable(1);
        }
        Emit::single(-100.0 * (h.max - close.value) / (h.max - l.min), true)
    }

    fn warmup_hint(&self) -> WarmupHint {
        WarmupHint {
            policy: WarmupPolicy::Window,
            length: self.period,
        }
    }
}

/// Commodity channel index. Inputs: `[high, low, close]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cci {
    period: usize,
    typical: SampleRing,
    seen: u64,
}

impl Cci {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            typical: SampleRing::new(period),
            seen: 0,
        }
    }
}

impl KernelState for Cci {
    fn step(&mut self, update: &Update) -> Emit {
        let [high, low, close] = [update.inputs[0], update.inputs[1], update.inputs[2]];
        let usable = high.is_usable() && low.is_usable() && close.is_usable();
        let tp = (high.value + low.value + close.value) / 3.0;
        self.typical.push(Sample {
            value: tp,
            available: usable,
        });
        if usable {
            self.seen += 1;
        }
        if self.seen < self.period as u64 || !usable {
            return Emit::unavailable(1);
        }

        let moments = super::ring::window_moments(&self.typical, self.period);
        if moments.count == 0 {
            return Emit::unavailable(1);
        }
        let mean = moments.mean();
        let mut deviation = 0.0;
        for sample in self.typical.recent(self.period) {
            if sample.is_usable() {
                deviation += (sample.value - mean).abs();
            }
        }
        deviation /= moments.count as f64;
        if deviation == 0.0 {
            return Emit::unavailable(1);
        }
        Emit::single((tp - mean) / (0.015 * deviation), true)
    }

    fn warmup_hint(&self) -> WarmupHint {
        WarmupHint {
            policy: WarmupPolicy::Window,
            length: self.period,
        }
    }
}

/// Money flow index. Inputs: `[high, low, close, volume]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mfi {
    period: usize,
    prev_typical: Option<f64>,
    positive: RollingReduce,
    negative: RollingReduce,
}

impl Mfi {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            prev_typical: None,
            positive: RollingReduce::new(ReduceView::Sum, period),
            negative: RollingReduce::new(ReduceView::Sum, period),
        }
    }
}

impl KernelState for Mfi {
    fn step(&mut self, update: &Update) -> Emit {
        let [high, low, close, volume] = [
            update.inputs[0],
            update.inputs[1],
            update.inputs[2],
            update.inputs[3],
        ];
        if !high.is_usable() || !low.is_usable() || !close.is_usable() || !volume.is_usable() {
            return Emit::unavailable(1);
        }
        let tp = (high.value + low.value + close.value) / 3.0;
        let Some(prev) = self.prev_typical.replace(tp) else {
            return Emit::unavailable(1);
        };
        let flow = tp * volume.value;
        let (pos, neg) = if tp > prev {
            (flow, 0.0)
        } else if tp < prev {
            (0.0, flow)
        } else {
            (0.0, 0.0)
        };
        let pos_sum = self.positive.update(Sample::present(pos));
        let neg_sum = self.negative.update(Sample::present(neg));
        if !pos_sum.available || !neg_sum.available {
            return Emit::unavailable(1);
        }
        if pos_sum.value == 0.0 && neg_sum.value == 0.0 {
            return Emit::unavailable(1);
        }
        if neg_sum.value == 0.0 {
            return Emit::single(100.0, true);
        }
        let ratio = pos_sum.value / neg_sum.value;
        Emit::single(100.0 - 100.0 / (1.0 + ratio), true)
    }

    fn warmup_hint(&self) -> WarmupHint {
        WarmupHint {
            policy: WarmupPolicy::Window,
            length: self.period + 1,
        }
    }
}

/// Awesome oscillator: median-price SMA spread. Inputs: `[high, low]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ao {
    fast: RollingReduce,
    slow: RollingReduce,
    slow_period: usize,
}

impl Ao {
    pub fn new(fast_period: usize, slow_period: usize) -> Self {
        Self {
            fast: RollingReduce::new(ReduceView::Mean, fast_period),
            slow: RollingReduce::new(ReduceView::Mean, slow_period),
            slow_period,
        }
    }
}

impl KernelState for Ao {
    fn step(&mut self, update: &Update) -> Emit {
        let [high, low] = [update.inputs[0], update.inputs[1]];
        let usable = high.is_usable() && low.is_usable();
        let median = Sample {
            value: (high.value + low.value) / 2.0,
            available: usable,
        };
        let fast = self.fast.update(median);
        let slow = self.slow.update(median);
        if !fast.available || !slow.available {
            return Emit::unavailable(1);
        }
        Emit::single(fast.value - slow.value, true)
    }

    fn warmup_hint(&self) -> WarmupHint {
        WarmupHint {
            policy: WarmupPolicy::Window,
            length: self.slow_period,
        }
    }
}

/// Coppock curve: `wma(roc(n_long) + roc(n_short), wma_period)`.
/// Input: `[close]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Coppock {
    long_roc: Roc,
    short_roc: Roc,
    smoothing: Wma,
    roc_long_period: usize,
    wma_period: usize,
}

impl Coppock {
    pub fn new(wma_period: usize, roc_long: usize, roc_short: usize) -> Self {
        Self {
            long_roc: Roc::new(roc_long),
            short_roc: Roc::new(roc_short),
            smoothing: Wma::new(wma_period),
            roc_long_period: roc_long,
            wma_period,
        }
    }
}

impl KernelState for Coppock {
    fn step(&mut self, update: &Update) -> Emit {
        let close = update.inputs[0];
        let long = self.long_roc.update(close);
        let short = self.short_roc.update(close);
        let combined = if long.available && short.available {
            Sample::present(long.value + short.value)
        } else {
            Sample::missing()
        };
        let out = self.smoothing.update(combined);
        Emit::single(out.value, out.available)
    }

    fn warmup_hint(&self) -> WarmupHint {
        WarmupHint {
            policy: WarmupPolicy::Window,
            length: self.roc_long_period + self.wma_period,
        }
    }
}

/// Vortex indicator. Inputs: `[high, low, close]`. Outputs: `{plus, minus}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vortex {
    period: usize,
    prev_high: Option<f64>,
    prev_low: Option<f64>,
    true_range: TrueRange,
    vm_plus: RollingReduce,
    vm_minus: RollingReduce,
    tr_sum: RollingReduce,
}

impl Vortex {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            prev_high: None,
            prev_low: None,
            true_range: TrueRange::new(),
            vm_plus: RollingReduce::new(ReduceView::Sum, period),
            vm_minus: RollingReduce::new(ReduceView::Sum, period),
            tr_sum: RollingReduce::new(ReduceView::Sum, period),
        }
    }
}

impl KernelState for Vortex {
    fn step(&mut self, update: &Update) -> Emit {
        let [high, low, close] = [update.inputs[0], update.inputs[1], update.inputs[2]];
        if !high.is_usable() || !low.is_usable() || !close.is_usable() {
            return Emit::all_unavailable(2);
        }
        let range = self.true_range.update(high.value, low.value, close.value);
        let prev_high = self.prev_high.replace(high.value);
        let prev_low = self.prev_low.replace(low.value);
        let (Some(ph), Some(pl)) = (prev_high, prev_low) else {
            return Emit::all_unavailable(2);
        };

        let plus = self.vm_plus.update(Sample::present((high.value - pl).abs()));
        let minus = self.vm_minus.update(Sample::present((low.value - ph).abs()));
        let tr = self.tr_sum.update(Sample::present(range));
        if !plus.available || !minus.available || !tr.available || tr.value == 0.0 {
            return Emit::all_unavailable(2);
        }
        Emit::pair(
            Sample::present(plus.value / tr.value),
            Sample::present(minus.value / tr.value),
        )
    }

    fn warmup_hint(&self) -> WarmupHint {
        WarmupHint {
            policy: WarmupPolicy::Window,
            length: self.period + 1,
        }
    }
}
