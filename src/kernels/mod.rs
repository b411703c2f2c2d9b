//! Stateful indicator primitives under one step protocol.
//!
//! Extension path:
//! 1) implement the state machine in the matching family module,
//! 2) add a [`KernelId`] variant and wire it in [`build_kernel`],
//! 3) register the indicator metadata in the catalog,
//! 4) cover it in the batch/incremental parity suite.

use crate::error::{CompileError, EvalError};
use crate::types::{ParamValue, TypedParams};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub mod cumulative;
pub mod events;
pub mod momentum;
pub mod ring;
pub mod rolling;
pub mod smooth;
pub mod transform;
pub mod trend;
pub mod volatility;
pub mod volume;

/// Most outputs any kernel emits (ichimoku's five plus headroom).
pub const MAX_OUTPUTS: usize = 6;

/// One input value with its availability flag.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub value: f64,
    pub available: bool,
}

impl Sample {
    pub const fn present(value: f64) -> Self {
        Self {
            value,
            available: true,
        }
    }

    pub const fn missing() -> Self {
        Self {
            value: f64::NAN,
            available: false,
        }
    }

    /// Available and finite. NaN or infinite inputs propagate as missing.
    #[inline]
    pub fn is_usable(self) -> bool {
        self.available && self.value.is_finite()
    }
}

/// One tick delivered to a kernel: aligned input samples at one timestamp.
#[derive(Debug, Clone, Copy)]
pub struct Update<'a> {
    pub timestamp: i64,
    pub inputs: &'a [Sample],
}

/// Fixed-width output record; multi-output kernels fill the catalog-declared
/// number of slots in catalog order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Emit {
    values: [f64; MAX_OUTPUTS],
    available: [bool; MAX_OUTPUTS],
    len: u8,
}

impl Emit {
    pub fn unavailable(len: usize) -> Self {
        debug_assert!(len <= MAX_OUTPUTS);
        Self {
            values: [f64::NAN; MAX_OUTPUTS],
            available: [false; MAX_OUTPUTS],
            len: len as u8,
        }
    }

    pub fn all_unavailable(len: usize) -> Self {
        Self::unavailable(len)
    }

    pub fn single(value: f64, available: bool) -> Self {
        let mut emit = Self::unavailable(1);
        emit.set(0, Sample { value, available });
        emit
    }

    pub fn boolean(fired: bool) -> Self {
        Self::single(if fired { 1.0 } else { 0.0 }, true)
    }

    pub fn pair(first: Sample, second: Sample) -> Self {
        let mut emit = Self::unavailable(2);
        emit.set(0, first);
        emit.set(1, second);
        emit
    }

    pub fn triple(first: Sample, second: Sample, third: Sample) -> Self {
        let mut emit = Self::unavailable(3);
        emit.set(0, first);
        emit.set(1, second);
        emit.set(2, third);
        emit
    }

    pub fn from_samples(samples: &[Sample]) -> Self {
        debug_assert!(samples.len() <= MAX_OUTPUTS);
        let mut emit = Self::unavailable(samples.len());
        for (idx, sample) in samples.iter().enumerate() {
            emit.set(idx, *sample);
        }
        emit
    }

    #[inline]
    fn set(&mut self, idx: usize, sample: Sample) {
        // An unavailable slot always reads as the NaN placeholder.
        if sample.is_usable() {
            self.values[idx] = sample.value;
            self.available[idx] = true;
        } else {
            self.values[idx] = f64::NAN;
            self.available[idx] = false;
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn get(&self, idx: usize) -> Sample {
        debug_assert!(idx < self.len());
        Sample {
            value: self.values[idx],
            available: self.available[idx],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarmupPolicy {
    /// Needs a full window of usable samples.
    Window,
    /// Emits early but converges; availability gated on a sample count.
    Recursive,
    /// Running accumulation; available from the first usable sample.
    Cumulative,
    /// No warmup at all.
    None,
}

/// What the planner needs to size lookback without running the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarmupHint {
    pub policy: WarmupPolicy,
    pub length: usize,
}

impl WarmupHint {
    /// Bars of history before the current one this kernel needs.
    pub fn lookback_bars(&self) -> usize {
        self.length.saturating_sub(1)
    }
}

/// The state-machine half of a kernel; the serde bounds give every
/// implementation snapshot/restore for free through [`Kernel`].
pub trait KernelState: std::fmt::Debug {
    fn step(&mut self, update: &Update) -> Emit;
    fn warmup_hint(&self) -> WarmupHint;
}

/// Object-safe kernel handle used by the evaluators.
pub trait Kernel: std::fmt::Debug + Send {
    fn step(&mut self, update: &Update) -> Emit;
    fn warmup_hint(&self) -> WarmupHint;
    fn snapshot(&self) -> Result<Vec<u8>, EvalError>;
    fn restore(&mut self, bytes: &[u8]) -> Result<(), EvalError>;
}

impl<T> Kernel for T
where
    T: KernelState + Serialize + DeserializeOwned + Send,
{
    fn step(&mut self, update: &Update) -> Emit {
        KernelState::step(self, update)
    }

    fn warmup_hint(&self) -> WarmupHint {
        KernelState::warmup_hint(self)
    }

    fn snapshot(&self) -> Result<Vec<u8>, EvalError> {
        serde_json::to_vec(self)
            .map_err(|err| EvalError::internal(format!("kernel snapshot failed: {err}")))
    }

    fn restore(&mut self, bytes: &[u8]) -> Result<(), EvalError> {
        *self = serde_json::from_slice(bytes)
            .map_err(|err| EvalError::internal(format!("kernel restore failed: {err}")))?;
        Ok(())
    }
}

/// Runtime binding resolved by the catalog and persisted into plans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KernelId {
    RollingSum,
    RollingMean,
    RollingStd,
    RollingMin,
    RollingMax,
    RollingArgMax,
    RollingArgMin,
    RollingMedian,
    Ema,
    Rma,
    Wma,
    Hma,
    CumSum,
    Obv,
    Vwap,
    Diff,
    Roc,
    Shift,
    TrueRange,
    PositiveValues,
    NegativeValues,
    CrossUp,
    CrossDown,
    Rising,
    Falling,
    RisingPct,
    FallingPct,
    InChannel,
    Enter,
    Exit,
    Rsi,
    Cmo,
    Stochastic,
    WilliamsR,
    Cci,
    Mfi,
    Ao,
    Coppock,
    Vortex,
    Macd,
    Adx,
    Ichimoku,
    Supertrend,
    Psar,
    ElderRay,
    Fisher,
    SwingPoints,
    FibLevels,
    Atr,
    BBands,
    Donchian,
    Keltner,
    Cmf,
    Klinger,
}

/// Construct cold state for a binding from coerced params.
pub fn build_kernel(id: KernelId, params: &TypedParams) -> Result<Box<dyn Kernel>, CompileError> {
    use rolling::{ReduceView, RollingReduce};
    let kernel: Box<dyn Kernel> = match id {
        KernelId::RollingSum => Box::new(RollingReduce::new(ReduceView::Sum, period(params)?)),
        KernelId::RollingMean => Box::new(RollingReduce::new(ReduceView::Mean, period(params)?)),
        KernelId::RollingStd => Box::new(RollingReduce::new(ReduceView::Std, period(params)?)),
        KernelId::RollingMin => Box::new(RollingReduce::new(ReduceView::Min, period(params)?)),
        KernelId::RollingMax => Box::new(RollingReduce::new(ReduceView::Max, period(params)?)),
        KernelId::RollingArgMax => {
            Box::new(RollingReduce::new(ReduceView::ArgMax, period(params)?))
        }
        KernelId::RollingArgMin => {
            Box::new(RollingReduce::new(ReduceView::ArgMin, period(params)?))
        }
        KernelId::RollingMedian => {
            Box::new(RollingReduce::new(ReduceView::Median, period(params)?))
        }
        KernelId::Ema => Box::new(smooth::Ema::new(period(params)?)),
        KernelId::Rma => Box::new(smooth::Ema::wilder(period(params)?)),
        KernelId::Wma => Box::new(smooth::Wma::new(period(params)?)),
        KernelId::Hma => Box::new(smooth::Hma::new(period(params)?)),
        KernelId::CumSum => Box::new(cumulative::CumSum::new()),
        KernelId::Obv => Box::new(cumulative::Obv::new()),
        KernelId::Vwap => {
            let anchor = match text(params, "anchor")?.as_str() {
                "session" => cumulative::VwapAnchor::Session,
                _ => cumulative::VwapAnchor::Rolling,
            };
            Box::new(cumulative::Vwap::new(anchor, period(params)?))
        }
        KernelId::Diff => Box::new(transform::Diff::new(int(params, "bars")?)),
        KernelId::Roc => Box::new(transform::Roc::new(period(params)?)),
        KernelId::Shift => Box::new(transform::Shift::new(int(params, "bars")?)),
        KernelId::TrueRange => Box::new(transform::TrueRange::new()),
        KernelId::PositiveValues => Box::new(transform::PositiveValues),
        KernelId::NegativeValues => Box::new(transform::NegativeValues),
        KernelId::CrossUp => Box::new(events::Cross::new(events::CrossDirection::Up)),
        KernelId::CrossDown => Box::new(events::Cross::new(events::CrossDirection::Down)),
        KernelId::Rising => Box::new(events::TrendRun::new(
            events::TrendDirection::Rising,
            int(params, "bars")?,
        )),
        KernelId::Falling => Box::new(events::TrendRun::new(
            events::TrendDirection::Falling,
            int(params, "bars")?,
        )),
        KernelId::RisingPct => Box::new(events::TrendRunPct::new(
            events::TrendDirection::Rising,
            int(params, "bars")?,
            float(params, "pct")?,
        )),
        KernelId::FallingPct => Box::new(events::TrendRunPct::new(
            events::TrendDirection::Falling,
            int(params, "bars")?,
            float(params, "pct")?,
        )),
        KernelId::InChannel => Box::new(events::Channel::new(events::ChannelEvent::Within)),
        KernelId::Enter => Box::new(events::Channel::new(events::ChannelEvent::Enter)),
        KernelId::Exit => Box::new(events::Channel::new(events::ChannelEvent::Exit)),
        KernelId::Rsi => Box::new(momentum::Rsi::new(period(params)?)),
        KernelId::Cmo => Box::new(momentum::Cmo::new(period(params)?)),
        KernelId::Stochastic => Box::new(momentum::Stochastic::new(
            int(params, "k")?,
            int(params, "d")?,
            int(params, "smooth")?,
        )),
        KernelId::WilliamsR => Box::new(momentum::WilliamsR::new(period(params)?)),
        KernelId::Cci => Box::new(momentum::Cci::new(period(params)?)),
        KernelId::Mfi => Box::new(momentum::Mfi::new(period(params)?)),
        KernelId::Ao => Box::new(momentum::Ao::new(int(params, "fast")?, int(params, "slow")?)),
        KernelId::Coppock => Box::new(momentum::Coppock::new(
            int(params, "wma")?,
            int(params, "long")?,
            int(params, "short")?,
        )),
        KernelId::Vortex => Box::new(momentum::Vortex::new(period(params)?)),
        KernelId::Macd => Box::new(trend::Macd::new(
            int(params, "fast")?,
            int(params, "slow")?,
            int(params, "signal")?,
        )),
        KernelId::Adx => Box::new(trend::Adx::new(period(params)?)),
        KernelId::Ichimoku => Box::new(trend::Ichimoku::new(
            int(params, "tenkan")?,
            int(params, "kijun")?,
            int(params, "senkou")?,
        )),
        KernelId::Supertrend => Box::new(trend::Supertrend::new(
            period(params)?,
            float(params, "mult")?,
        )),
        KernelId::Psar => Box::new(trend::Psar::new(
            float(params, "af_start")?,
            float(params, "af_step")?,
            float(params, "af_max")?,
        )),
        KernelId::ElderRay => Box::new(trend::ElderRay::new(period(params)?)),
        KernelId::Fisher => Box::new(trend::Fisher::new(period(params)?)),
        KernelId::SwingPoints => Box::new(trend::SwingPoints::new(
            int(params, "left")?,
            int(params, "right")?,
        )),
        KernelId::FibLevels => Box::new(trend::FibLevels::new()),
        KernelId::Atr => Box::new(volatility::Atr::new(period(params)?)),
        KernelId::BBands => Box::new(volatility::BBands::new(
            period(params)?,
            float(params, "mult")?,
        )),
        KernelId::Donchian => Box::new(volatility::Donchian::new(period(params)?)),
        KernelId::Keltner => Box::new(volatility::Keltner::new(
            period(params)?,
            int(params, "atr_period")?,
            float(params, "mult")?,
        )),
        KernelId::Cmf => Box::new(volume::Cmf::new(period(params)?)),
        KernelId::Klinger => Box::new(volume::Klinger::new(
            int(params, "fast")?,
            int(params, "slow")?,
            int(params, "signal")?,
        )),
    };
    Ok(kernel)
}

/// Warmup hint for a binding; construction is allocation-light, so this is
/// what "without running the kernel" costs.
pub fn binding_warmup_hint(
    id: KernelId,
    params: &TypedParams,
) -> Result<WarmupHint, CompileError> {
    Ok(build_kernel(id, params)?.warmup_hint())
}

fn int(params: &TypedParams, name: &str) -> Result<usize, CompileError> {
    let value = params
        .get(name)
        .and_then(ParamValue::as_int)
        .ok_or_else(|| missing(name))?;
    usize::try_from(value).map_err(|_| CompileError::InvalidParameter {
        name: name.to_string(),
        reason: format!("must be a non-negative integer, got {value}"),
        span: None,
    })
}

fn period(params: &TypedParams) -> Result<usize, CompileError> {
    let value = int(params, "period")?;
    if value == 0 {
        return Err(CompileError::InvalidParameter {
            name: "period".to_string(),
            reason: "must be at least 1".to_string(),
            span: None,
        });
    }
    Ok(value)
}

fn float(params: &TypedParams, name: &str) -> Result<f64, CompileError> {
    params
        .get(name)
        .and_then(ParamValue::as_float)
        .ok_or_else(|| missing(name))
}

fn text(params: &TypedParams, name: &str) -> Result<String, CompileError> {
    params
        .get(name)
        .and_then(|v| v.as_text().map(str::to_string))
        .ok_or_else(|| missing(name))
}

fn missing(name: &str) -> CompileError {
    CompileError::InvalidParameter {
        name: name.to_string(),
        reason: "missing after coercion".to_string(),
        span: None,
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::{KernelState, Sample, Update};

    /// Drive a single-input kernel over plain values, second-spaced.
    pub fn drive<K: KernelState>(kernel: &mut K, values: &[f64]) -> Vec<(f64, bool)> {
        let samples: Vec<Sample> = values.iter().map(|v| Sample::present(*v)).collect();
        drive_samples(kernel, &samples)
    }

    pub fn drive_samples<K: KernelState>(kernel: &mut K, samples: &[Sample]) -> Vec<(f64, bool)> {
        samples
            .iter()
            .enumerate()
            .map(|(idx, sample)| {
                let emit = kernel.step(&Update {
                    timestamp: idx as i64 * 1_000_000_000,
                    inputs: std::slice::from_ref(sample),
                });
                let out = emit.get(0);
                (out.value, out.available)
            })
            .collect()
    }

    /// Drive a multi-input kernel over rows of input values.
    pub fn drive_rows<K: KernelState>(kernel: &mut K, rows: &[Vec<f64>]) -> Vec<Vec<(f64, bool)>> {
        rows.iter()
            .enumerate()
            .map(|(idx, row)| {
                let samples: Vec<Sample> = row.iter().map(|v| Sample::present(*v)).collect();
                let emit = kernel.step(&Update {
                    timestamp: idx as i64 * 1_000_000_000,
                    inputs: &samples,
                });
                (0..emit.len())
                    .map(|slot| {
                        let out = emit.get(slot);
                        (out.value, out.available)
                    })
                    .collect()
            })
            .collect()
    }

    #[test]
    fn emit_slots_normalize_unusable_samples() {
        let emit = super::Emit::pair(
            Sample::present(1.5),
            Sample {
                value: f64::INFINITY,
                available: true,
            },
        );
        assert!(emit.get(0).available);
        assert!(!emit.get(1).available, "non-finite collapses to unavailable");
        assert!(emit.get(1).value.is_nan());
    }
}
