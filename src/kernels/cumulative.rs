//! Cumulative kernels: running sums and volume-anchored averages.

use crate::kernels::ring::SampleRing;
use crate::kernels::{Emit, KernelState, Update, WarmupHint, WarmupPolicy};
use serde::{Deserialize, Serialize};

const NANOS_PER_DAY: i64 = 86_400 * 1_000_000_000;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CumSum {
    total: f64,
    seen: bool,
}

impl CumSum {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KernelState for CumSum {
    fn step(&mut self, update: &Update) -> Emit {
        let sample = update.inputs[0];
        if sample.is_usable() {
            self.total += sample.value;
            self.seen = true;
        }
        Emit::single(self.total, self.seen)
    }

    fn warmup_hint(&self) -> WarmupHint {
        WarmupHint {
            policy: WarmupPolicy::Cumulative,
            length: 1,
        }
    }
}

/// On-balance volume. Inputs: `[close, volume]`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Obv {
    prev_close: Option<f64>,
    total: f64,
}

impl Obv {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KernelState for Obv {
    fn step(&mut self, update: &Update) -> Emit {
        let close = update.inputs[0];
        let volume = update.inputs[1];
        if !close.is_usable() || !volume.is_usable() {
            return Emit::single(self.total, false);
        }
        match self.prev_close {
            None => {
                self.prev_close = Some(close.value);
                Emit::single(self.total, true)
            }
            Some(prev) => {
                if close.value > prev {
                    self.total += volume.value;
                } else if close.value < prev {
                    self.total -= volume.value;
                }
                self.prev_close = Some(close.value);
                Emit::single(self.total, true)
            }
        }
    }

    fn warmup_hint(&self) -> WarmupHint {
        WarmupHint {
            policy: WarmupPolicy::Cumulative,
            length: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VwapAnchor {
    Rolling,
    Session,
}

/// Volume-weighted average of typical price. Inputs:
/// `[high, low, close, volume]`.
///
/// Rolling mode averages over the last `window` bars; session mode anchors
/// at the UTC day boundary and resets the accumulators there.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vwap {
    anchor: VwapAnchor,
    window: usize,
    pv_ring: SampleRing,
    vol_ring: SampleRing,
    session_day: Option<i64>,
    cum_pv: f64,
    cum_vol: f64,
    seen: u64,
}

impl Vwap {
    pub fn new(anchor: VwapAnchor, window: usize) -> Self {
        Self {
            anchor,
            window,
            pv_ring: SampleRing::new(window),
            vol_ring: SampleRing::new(window),
            session_day: None,
            cum_pv: 0.0,
            cum_vol: 0.0,
            seen: 0,
        }
    }
}

impl KernelState for Vwap {
    fn step(&mut self, update: &Update) -> Emit {
        let [high, low, close, volume] = [
            update.inputs[0],
            update.inputs[1],
            update.inputs[2],
            update.inputs[3],
        ];
        let usable =
            high.is_usable() && low.is_usable() && close.is_usable() && volume.is_usable();
        let typical = (high.value + low.value + close.value) / 3.0;

        match self.anchor {
            VwapAnchor::Rolling => {
                self.pv_ring.push(crate::kernels::Sample {
                    value: typical * volume.value,
                    available: usable,
                });
                self.vol_ring.push(crate::kernels::Sample {
                    value: volume.value,
                    available: usable,
                });
                if usable {
                    self.seen += 1;
                }
                if self.seen < self.window as u64 {
                    return Emit::unavailable(1);
                }
                let pv = super::ring::window_moments(&self.pv_ring, self.window);
                let vol = super::ring::window_moments(&self.vol_ring, self.window);
                if vol.count == 0 || vol.sum <= 0.0 {
                    return Emit::unavailable(1);
                }
                Emit::single(pv.sum / vol.sum, true)
            }
            VwapAnchor::Session => {
                let day = update.timestamp.div_euclid(NANOS_PER_DAY);
                if self.session_day != Some(day) {
                    self.session_day = Some(day);
                    self.cum_pv = 0.0;
                    self.cum_vol = 0.0;
                }
                if !usable {
                    return Emit::unavailable(1);
                }
                self.cum_pv += typical * volume.value;
                self.cum_vol += volume.value;
                if self.cum_vol <= 0.0 {
                    return Emit::unavailable(1);
                }
                Emit::single(self.cum_pv / self.cum_vol, true)
            }
        }
    }

    fn warmup_hint(&self) -> WarmupHint {
        match self.anchor {
            VwapAnchor::Rolling => WarmupHint {
                policy: WarmupPolicy::Window,
                length: self.window,
            },
            VwapAnchor::Session => WarmupHint {
                policy: WarmupPolicy::Cumulative,
                length: 1,
            },
        }
    }
}
