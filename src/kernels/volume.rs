//! Volume-flow composites. OBV and VWAP live with the cumulative kernels.

use crate::kernels::rolling::{ReduceView, RollingReduce};
use crate::kernels::smooth::Ema;
use crate::kernels::{Emit, KernelState, Sample, Update, WarmupHint, WarmupPolicy};
use serde::{Deserialize, Serialize};

/// Chaikin money flow. Inputs: `[high, low, close, volume]`.
///
/// Bars with `high == low` contribute zero flow, the conventional reading
/// of an undefined multiplier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cmf {
    period: usize,
    flow_sum: RollingReduce,
    volume_sum: RollingReduce,
}

impl Cmf {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            flow_sum: RollingReduce::new(ReduceView::Sum, period),
            volume_sum: RollingReduce::new(ReduceView::Sum, period),
        }
    }
}

impl KernelState for Cmf {
    fn step(&mut self, update: &Update) -> Emit {
        let [high, low, close, volume] = [
            update.inputs[0],
            update.inputs[1],
            update.inputs[2],
            update.inputs[3],
        ];
        let usable =
            high.is_usable() && low.is_usable() && close.is_usable() && volume.is_usable();
        if !usable {
            self.flow_sum.update(Sample::missing());
            self.volume_sum.update(Sample::missing());
            return Emit::unavailable(1);
        }
        let range = high.value - low.value;
        let multiplier = if range > 0.0 {
            ((close.value - low.value) - (high.value - close.value)) / range
        } else {
            0.0
        };
        let flow = self.flow_sum.update(Sample::present(multiplier * volume.value));
        let vol = self.volume_sum.update(Sample::present(volume.value));
        if !flow.available || !vol.available || vol.value == 0.0 {
            return Emit::unavailable(1);
        }
        Emit::single(flow.value / vol.value, true)
    }

    fn warmup_hint(&self) -> WarmupHint {
        WarmupHint {
            policy: WarmupPolicy::Window,
            length: self.period,
        }
    }
}

/// Klinger volume oscillator. Inputs: `[high, low, close, volume]`.
/// Outputs: `{kvo, signal}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Klinger {
    fast: Ema,
    slow: Ema,
    signal: Ema,
    slow_period: usize,
    signal_period: usize,
    prev_hlc: Option<f64>,
    prev_trend: i8,
    prev_dm: f64,
    cumulative: f64,
}

impl Klinger {
    pub fn new(fast: usize, slow: usize, signal: usize) -> Self {
        Self {
            fast: Ema::new(fast),
            slow: Ema::new(slow),
            signal: Ema::new(signal),
            slow_period: slow,
            signal_period: signal,
            prev_hlc: None,
            prev_trend: 0,
            prev_dm: 0.0,
            cumulative: 0.0,
        }
    }
}

impl KernelState for Klinger {
    fn step(&mut self, update: &Update) -> Emit {
        let [high, low, close, volume] = [
            update.inputs[0],
            update.inputs[1],
            update.inputs[2],
            update.inputs[3],
        ];
        if !high.is_usable() || !low.is_usable() || !close.is_usable() || !volume.is_usable() {
            return Emit::all_unavailable(2);
        }
        let hlc = high.value + low.value + close.value;
        let dm = high.value - low.value;
        let Some(prev_hlc) = self.prev_hlc.replace(hlc) else {
            self.prev_dm = dm;
            return Emit::all_unavailable(2);
        };
        let trend: i8 = if hlc > prev_hlc { 1 } else { -1 };
        if trend == self.prev_trend {
            self.cumulative += dm;
        } else {
            self.cumulative = self.prev_dm + dm;
        }
        self.prev_trend = trend;
        self.prev_dm = dm;

        let force = if self.cumulative != 0.0 {
            volume.value * ((2.0 * (dm / self.cumulative - 1.0)).abs()) * trend as f64 * 100.0
        } else {
            0.0
        };
        let fast = self.fast.update(Sample::present(force));
        let slow = self.slow.update(Sample::present(force));
        let kvo = if fast.available && slow.available {
            Sample::present(fast.value - slow.value)
        } else {
            Sample::missing()
        };
        let signal = self.signal.update(kvo);
        Emit::pair(kvo, signal)
    }

    fn warmup_hint(&self) -> WarmupHint {
        WarmupHint {
            policy: WarmupPolicy::Recursive,
            length: self.slow_period + self.signal_period,
        }
    }
}
