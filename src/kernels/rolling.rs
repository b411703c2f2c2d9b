//! Rolling window reducers over a single input series.

use crate::kernels::ring::{window_extremes, window_moments, SampleRing};
use crate::kernels::{Emit, KernelState, Update, WarmupHint, WarmupPolicy};
use serde::{Deserialize, Serialize};

/// Which reduction a [`RollingReduce`] instance computes. One state layout
/// serves the whole family, mirroring how the moment views share a rolling
/// profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReduceView {
    Sum,
    Mean,
    Std,
    Min,
    Max,
    ArgMax,
    ArgMin,
    Median,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollingReduce {
    view: ReduceView,
    window: usize,
    ring: SampleRing,
    /// Cumulative count of usable inputs; availability flips at the window-th.
    seen: u64,
}

impl RollingReduce {
    pub fn new(view: ReduceView, window: usize) -> Self {
        Self {
            view,
            window,
            ring: SampleRing::new(window),
            seen: 0,
        }
    }

    /// Feed one sample; shared with composites that embed a rolling window.
    pub fn update(&mut self, sample: crate::kernels::Sample) -> crate::kernels::Sample {
        self.ring.push(sample);
        if sample.is_usable() {
            self.seen += 1;
        }
        if self.seen < self.window as u64 {
            return crate::kernels::Sample::missing();
        }
        match self.reduce() {
            Some(value) if value.is_finite() => crate::kernels::Sample::present(value),
            _ => crate::kernels::Sample::missing(),
        }
    }

    fn reduce(&self) -> Option<f64> {
        match self.view {
            ReduceView::Sum | ReduceView::Mean | ReduceView::Std => {
                let moments = window_moments(&self.ring, self.window);
                if moments.count == 0 {
                    return None;
                }
                match self.view {
                    ReduceView::Sum => Some(moments.sum),
                    ReduceView::Mean => Some(moments.mean()),
                    ReduceView::Std => {
                        if moments.count < 2 {
                            None
                        } else {
                            Some(moments.std())
                        }
                    }
                    _ => unreachable!("moment views handled above"),
                }
            }
            ReduceView::Min | ReduceView::Max | ReduceView::ArgMax | ReduceView::ArgMin => {
                let ext = window_extremes(&self.ring, self.window)?;
                Some(match self.view {
                    ReduceView::Min => ext.min,
                    ReduceView::Max => ext.max,
                    ReduceView::ArgMax => ext.max_lag as f64,
                    ReduceView::ArgMin => ext.min_lag as f64,
                    _ => unreachable!("extreme views handled above"),
                })
            }
            ReduceView::Median => {
                let mut values: Vec<f64> = self
                    .ring
                    .recent(self.window)
                    .filter(|s| s.is_usable())
                    .map(|s| s.value)
                    .collect();
                if values.is_empty() {
                    return None;
                }
                values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
                let mid = values.len() / 2;
                if values.len() % 2 == 1 {
                    Some(values[mid])
                } else {
                    Some((values[mid - 1] + values[mid]) * 0.5)
                }
            }
        }
    }
}

impl KernelState for RollingReduce {
    fn step(&mut self, update: &Update) -> Emit {
        let out = self.update(update.inputs[0]);
        Emit::single(out.value, out.available)
    }

    fn warmup_hint(&self) -> WarmupHint {
        WarmupHint {
            policy: WarmupPolicy::Window,
            length: self.window,
        }
    }
}
