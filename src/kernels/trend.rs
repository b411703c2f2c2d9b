//! Trend-following composites and swing structure.

use crate::kernels::ring::{window_extremes, SampleRing};
use crate::kernels::smooth::Ema;
use crate::kernels::transform::TrueRange;
use crate::kernels::{Emit, KernelState, Sample, Update, WarmupHint, WarmupPolicy};
use serde::{Deserialize, Serialize};

/// MACD line, signal line, and histogram. Input: `[close]`.
/// Outputs: `{macd, signal, histogram}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Macd {
    fast: Ema,
    slow: Ema,
    signal: Ema,
    slow_period: usize,
    signal_period: usize,
}

impl Macd {
    pub fn new(fast: usize, slow: usize, signal: usize) -> Self {
        Self {
            fast: Ema::new(fast),
            slow: Ema::new(slow),
            signal: Ema::new(signal),
            slow_period: slow,
            signal_period: signal,
        }
    }
}

impl KernelState for Macd {
    fn step(&mut self, update: &Update) -> Emit {
        let close = update.inputs[0];
        let fast = self.fast.update(close);
        let slow = self.slow.update(close);
        let line = if fast.available && slow.available {
            Sample::present(fast.value - slow.value)
        } else {
            Sample::missing()
        };
        // The signal EMA only ever sees available MACD values, so its own
        // warmup counts from the MACD line's first availability.
        let signal = self.signal.update(line);
        let histogram = if line.available && signal.available {
            Sample::present(line.value - signal.value)
        } else {
            Sample::missing()
        };
        Emit::triple(line, signal, histogram)
    }

    fn warmup_hint(&self) -> WarmupHint {
        WarmupHint {
            policy: WarmupPolicy::Recursive,
            length: self.slow_period + self.signal_period - 1,
        }
    }
}

/// Wilder's directional movement system. Inputs: `[high, low, close]`.
/// Outputs: `{adx, plus_di, minus_di}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Adx {
    period: usize,
    prev_high: Option<f64>,
    prev_low: Option<f64>,
    true_range: TrueRange,
    tr_smooth: Ema,
    plus_smooth: Ema,
    minus_smooth: Ema,
    dx_smooth: Ema,
}

impl Adx {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            prev_high: None,
            prev_low: None,
            true_range: TrueRange::new(),
            tr_smooth: Ema::wilder(period),
            plus_smooth: Ema::wilder(period),
            minus_smooth: Ema::wilder(period),
            dx_smooth: Ema::wilder(period),
        }
    }
}

impl KernelState for Adx {
    fn step(&mut self, update: &Update) -> Emit {
        let [high, low, close] = [update.inputs[0], update.inputs[1], update.inputs[2]];
        if !high.is_usable() || !low.is_usable() || !close.is_usable() {
            return Emit::all_unavailable(3);
        }
        let range = self.true_range.update(high.value, low.value, close.value);
        let prev_high = self.prev_high.replace(high.value);
        let prev_low = self.prev_low.replace(low.value);
        let (Some(ph), Some(pl)) = (prev_high, prev_low) else {
            return Emit::all_unavailable(3);
        };

        let up_move = high.value - ph;
        let down_move = pl - low.value;
        let plus_dm = if up_move > down_move && up_move > 0.0 {
            up_move
        } else {
            0.0
        };
        let minus_dm = if down_move > up_move && down_move > 0.0 {
            down_move
        } else {
            0.0
        };

        let tr = self.tr_smooth.update(Sample::present(range));
        let plus = self.plus_smooth.update(Sample::present(plus_dm));
        let minus = self.minus_smooth.update(Sample::present(minus_dm));
        if !tr.available || !plus.available || !minus.available || tr.value == 0.0 {
            return Emit::all_unavailable(3);
        }

        let plus_di = 100.0 * plus.value / tr.value;
        let minus_di = 100.0 * minus.value / tr.value;
        let di_sum = plus_di + minus_di;
        if di_sum == 0.0 {
            return Emit::triple(
                Sample::missing(),
                Sample::present(plus_di),
                Sample::present(minus_di),
            );
        }
        let dx = 100.0 * (plus_di - minus_di).abs() / di_sum;
        let adx = self.dx_smooth.update(Sample::present(dx));
        Emit::triple(
            Sample {
                value: adx.value,
                available: adx.available,
            },
            Sample::present(plus_di),
            Sample::present(minus_di),
        )
    }

    fn warmup_hint(&self) -> WarmupHint {
        WarmupHint {
            policy: WarmupPolicy::Recursive,
            length: 2 * self.period,
        }
    }
}

/// Ichimoku cloud. Inputs: `[high, low, close]`.
/// Outputs: `{tenkan, kijun, senkou_a, senkou_b, chikou}`.
///
/// Values are emitted on the bar that produced them; chart displacement of
/// the spans is a presentation concern recorded in the render hints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ichimoku {
    tenkan_period: usize,
    kijun_period: usize,
    senkou_period: usize,
    highs: SampleRing,
    lows: SampleRing,
    seen: u64,
}

impl Ichimoku {
    pub fn new(tenkan: usize, kijun: usize, senkou: usize) -> Self {
        let cap = tenkan.max(kijun).max(senkou);
        Self {
            tenkan_period: tenkan,
            kijun_period: kijun,
            senkou_period: senkou,
            highs: SampleRing::new(cap),
            lows: SampleRing::new(cap),
            seen: 0,
        }
    }

    fn midline(&self, period: usize) -> Sample {
        if self.seen < period as u64 {
            return Sample::missing();
        }
        match (
            window_extremes(&self.highs, period),
            window_extremes(&self.lows, period),
        ) {
            (Some(h), Some(l)) => Sample::present((h.max + l.min) / 2.0),
            _ => Sample::missing(),
        }
    }
}

impl KernelState for Ichimoku {
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

        let tenkan = self.midline(self.tenkan_period);
        let kijun = self.midline(self.kijun_period);
        let senkou_a = if tenkan.available && kijun.available {
            Sample::present((tenkan.value + kijun.value) / 2.0)
        } else {
            Sample::missing()
        };
        let senkou_b = self.midline(self.senkou_period);
        let chikou = if usable {
            Sample::present(close.value)
        } else {
            Sample::missing()
        };
        Emit::from_samples(&[tenkan, kijun, senkou_a, senkou_b, chikou])
    }

    fn warmup_hint(&self) -> WarmupHint {
        WarmupHint {
            policy: WarmupPolicy::Window,
            length: self.senkou_period,
        }
    }
}

/// Supertrend band-flip system. Inputs: `[high, low, close]`.
/// Outputs: `{line, direction}` with direction +1 (long) or -1 (short).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Supertrend {
    period: usize,
    multiplier: f64,
    true_range: TrueRange,
    atr: Ema,
    prev_upper: f64,
    prev_lower: f64,
    prev_close: f64,
    direction: i8,
    started: bool,
}

impl Supertrend {
    pub fn new(period: usize, multiplier: f64) -> Self {
        Self {
            period,
            multiplier,
            true_range: TrueRange::new(),
            atr: Ema::wilder(period),
            prev_upper: f64::NAN,
            prev_lower: f64::NAN,
            prev_close: f64::NAN,
            direction: 1,
            started: false,
        }
    }
}

impl KernelState for Supertrend {
    fn step(&mut self, update: &Update) -> Emit {
        let [high, low, close] = [update.inputs[0], update.inputs[1], update.inputs[2]];
        if !high.is_usable() || !low.is_usable() || !close.is_usable() {
            return Emit::all_unavailable(2);
        }
        let range = self.true_range.update(high.value, low.value, close.value);
        let atr = self.atr.update(Sample::present(range));
        if !atr.available {
            self.prev_close = close.value;
            return Emit::all_unavailable(2);
        }

        let mid = (high.value + low.value) / 2.0;
        let basic_upper = mid + self.multiplier * atr.value;
        let basic_lower = mid - self.multiplier * atr.value;

        let (upper, lower) = if self.started {
            let upper = if basic_upper < self.prev_upper || self.prev_close > self.prev_upper {
                basic_upper
            } else {
                self.prev_upper
            };
            let lower = if basic_lower > self.prev_lower || self.prev_close < self.prev_lower {
                basic_lower
            } else {
                self.prev_lower
            };
            (upper, lower)
        } else {
            (basic_upper, basic_lower)
        };

        if self.started {
            if self.direction > 0 && close.value < lower {
                self.direction = -1;
            } else if self.direction < 0 && close.value > upper {
                self.direction = 1;
            }
        }

        self.prev_upper = upper;
        self.prev_lower = lower;
        self.prev_close = close.value;
        self.started = true;

        let line = if self.direction > 0 { lower } else { upper };
        Emit::pair(
            Sample::present(line),
            Sample::present(self.direction as f64),
        )
    }

    fn warmup_hint(&self) -> WarmupHint {
        WarmupHint {
            policy: WarmupPolicy::Recursive,
            length: self.period + 1,
        }
    }
}

/// Parabolic stop-and-reverse. Inputs: `[high, low]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Psar {
    af_start: f64,
    af_step: f64,
    af_max: f64,
    state: Option<PsarState>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PsarState {
    is_long: bool,
    sar: f64,
    extreme: f64,
    af: f64,
    prev_high: f64,
    prev_low: f64,
}

impl Psar {
    pub fn new(af_start: f64, af_step: f64, af_max: f64) -> Self {
        Self {
            af_start,
            af_step,
            af_max,
            state: None,
        }
    }
}

impl KernelState for Psar {
    fn step(&mut self, update: &Update) -> Emit {
        let [high, low] = [update.inputs[0], update.inputs[1]];
        if !high.is_usable() || !low.is_usable() {
            return Emit::unavailable(1);
        }
        let Some(state) = &mut self.state else {
            self.state = Some(PsarState {
                is_long: true,
                sar: low.value,
                extreme: high.value,
                af: self.af_start,
                prev_high: high.value,
                prev_low: low.value,
            });
            return Emit::unavailable(1);
        };

        let mut sar = state.sar + state.af * (state.extreme - state.sar);
        if state.is_long {
            sar = sar.min(state.prev_low).min(low.value);
            if low.value < sar {
                // Flip short: SAR restarts at the prior extreme.
                state.is_long = false;
                sar = state.extreme;
                state.extreme = low.value;
                state.af = self.af_start;
            } else if high.value > state.extreme {
                state.extreme = high.value;
                state.af = (state.af + self.af_step).min(self.af_max);
            }
        } else {
            sar = sar.max(state.prev_high).max(high.value);
            if high.value > sar {
                state.is_long = true;
                sar = state.extreme;
                state.extreme = high.value;
                state.af = self.af_start;
            } else if low.value < state.extreme {
                state.extreme = low.value;
                state.af = (state.af + self.af_step).min(self.af_max);
            }
        }
        state.sar = sar;
        state.prev_high = high.value;
        state.prev_low = low.value;
        Emit::single(sar, true)
    }

    fn warmup_hint(&self) -> WarmupHint {
        WarmupHint {
            policy: WarmupPolicy::Recursive,
            length: 2,
        }
    }
}

/// Elder-ray bull/bear power. Inputs: `[high, low, close]`.
/// Outputs: `{bull_power, bear_power}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElderRay {
    ema: Ema,
}

impl ElderRay {
    pub fn new(period: usize) -> Self {
        Self {
            ema: Ema::new(period),
        }
    }
}

impl KernelState for ElderRay {
    fn step(&mut self, update: &Update) -> Emit {
        let [high, low, close] = [update.inputs[0], update.inputs[1], update.inputs[2]];
        if !high.is_usable() || !low.is_usable() || !close.is_usable() {
            return Emit::all_unavailable(2);
        }
        let baseline = self.ema.update(close);
        if !baseline.available {
            return Emit::all_unavailable(2);
        }
        Emit::pair(
            Sample::present(high.value - baseline.value),
            Sample::present(low.value - baseline.value),
        )
    }

    fn warmup_hint(&self) -> WarmupHint {
        self.ema.warmup_hint()
    }
}

/// Ehlers' Fisher transform of the price position within its min/max range.
/// Inputs: `[high, low]`. Outputs: `{fisher, trigger}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fisher {
    period: usize,
    median: SampleRing,
    seen: u64,
    value: f64,
    fisher: f64,
    primed: bool,
}

impl Fisher {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            median: SampleRing::new(period),
            seen: 0,
            value: 0.0,
            fisher: 0.0,
            primed: false,
        }
    }
}

impl KernelState for Fisher {
    fn step(&mut self, update: &Update) -> Emit {
        let [high, low] = [update.inputs[0], update.inputs[1]];
        let usable = high.is_usable() && low.is_usable();
        let mid = (high.value + low.value) / 2.0;
        self.median.push(Sample {
            value: mid,
            available: usable,
        });
        if usable {
            self.seen += 1;
        }
        if !usable || self.seen < self.period as u64 {
            return Emit::all_unavailable(2);
        }
        let Some(ext) = window_extremes(&self.median, self.period) else {
            return Emit::all_unavailable(2);
        };
        if ext.max <= ext.min {
            return Emit::all_unavailable(2);
        }

        let position = (mid - ext.min) / (ext.max - ext.min) - 0.5;
        self.value = (0.66 * position + 0.67 * self.value).clamp(-0.999, 0.999);
        let prev_fisher = self.fisher;
        self.fisher = 0.5 * ((1.0 + self.value) / (1.0 - self.value)).ln() + 0.5 * prev_fisher;
        let trigger = if self.primed {
            Sample::present(prev_fisher)
        } else {
            Sample::missing()
        };
        self.primed = true;
        Emit::pair(Sample::present(self.fisher), trigger)
    }

    fn warmup_hint(&self) -> WarmupHint {
        WarmupHint {
            policy: WarmupPolicy::Window,
            length: self.period + 1,
        }
    }
}

/// Confirmed swing highs/lows: a pivot at lag `right` that is the strict
/// extreme of its `left + 1 + right` window. Inputs: `[high, low]`.
/// Outputs: `{high_level, low_level}` carrying the latest confirmed prices.
///
/// A swing low is only confirmed after the first confirmed swing high, so a
/// level pair always describes one leg.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwingPoints {
    left: usize,
    right: usize,
    highs: SampleRing,
    lows: SampleRing,
    last_high: Option<f64>,
    last_low: Option<f64>,
}

impl SwingPoints {
    pub fn new(left: usize, right: usize) -> Self {
        let cap = left + right + 1;
        Self {
            left,
            right,
            highs: SampleRing::new(cap),
            lows: SampleRing::new(cap),
            last_high: None,
            last_low: None,
        }
    }

    fn confirm(&mut self) {
        let window = self.left + self.right + 1;
        if self.highs.len() < window {
            return;
        }
        let center_high = self.highs.get_lag(self.right);
        let center_low = self.lows.get_lag(self.right);
        let (Some(center_high), Some(center_low)) = (center_high, center_low) else {
            return;
        };

        let mut high_is_peak = center_high.is_usable();
        let mut low_is_trough = center_low.is_usable();
        for lag in 0..window {
            if lag == self.right {
                continue;
            }
            let (Some(h), Some(l)) = (self.highs.get_lag(lag), self.lows.get_lag(lag)) else {
                return;
            };
            if !h.is_usable() || !l.is_usable() {
                high_is_peak = false;
                low_is_trough = false;
                break;
            }
            high_is_peak &= center_high.value > h.value;
            low_is_trough &= center_low.value < l.value;
        }

        if high_is_peak {
            self.last_high = Some(center_high.value);
        }
        if low_is_trough && self.last_high.is_some() {
            self.last_low = Some(center_low.value);
        }
    }
}

impl KernelState for SwingPoints {
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
        self.confirm();
        let high_level = match self.last_high {
            Some(value) => Sample::present(value),
            None => Sample::missing(),
        };
        let low_level = match self.last_low {
            Some(value) => Sample::present(value),
            None => Sample::missing(),
        };
        Emit::pair(high_level, low_level)
    }

    fn warmup_hint(&self) -> WarmupHint {
        WarmupHint {
            policy: WarmupPolicy::Window,
            length: self.left + self.right + 1,
        }
    }
}

/// Retracement levels of the leg between the latest confirmed swing pair.
/// Inputs: `[high_level, low_level]` (normally wired from `swing_points`
/// by the catalog's sub-DAG expansion).
/// Outputs: `{level_236, level_382, level_500, level_618, level_786}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FibLevels;

impl FibLevels {
    pub const RATIOS: [f64; 5] = [0.236, 0.382, 0.5, 0.618, 0.786];

    pub fn new() -> Self {
        Self
    }
}

impl KernelState for FibLevels {
    fn step(&mut self, update: &Update) -> Emit {
        let [high, low] = [update.inputs[0], update.inputs[1]];
        if !high.is_usable() || !low.is_usable() || high.value <= low.value {
            return Emit::all_unavailable(Self::RATIOS.len());
        }
        let span = high.value - low.value;
        let samples: Vec<Sample> = Self::RATIOS
            .iter()
            .map(|ratio| Sample::present(high.value - span * ratio))
            .collect();
        Emit::from_samples(&samples)
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
    fn macd_ramp_matches_component_emas() {
        let closes: Vec<f64> = (1..=30).map(|v| v as f64).collect();
        let mut reference_fast = Ema::new(12);
        let mut reference_slow = Ema::new(26);
        let mut macd = Macd::new(12, 26, 9);
        let mut line_at_25 = None;
        for (idx, close) in closes.iter().enumerate() {
            let emit = KernelState::step(
                &mut macd,
                &Update {
                    timestamp: idx as i64,
                    inputs: &[Sample::present(*close)],
                },
            );
            let fast = reference_fast.update(Sample::present(*close));
            let slow = reference_slow.update(Sample::present(*close));
            if idx == 25 {
                assert!(emit.get(0).available);
                line_at_25 = Some((emit.get(0).value, fast.value - slow.value));
            }
            // 30 bars is short of slow+signal warmup: histogram never fires.
            assert!(!emit.get(2).available);
        }
        let (macd_value, expected) = line_at_25.expect("index 25 reached");
        assert!((macd_value - expected).abs() < 1e-12);
    }

    #[test]
    fn macd_histogram_becomes_available_at_composed_warmup() {
        let closes: Vec<f64> = (1..=40).map(|v| v as f64).collect();
        let out = drive(&mut Macd::new(12, 26, 9), &closes);
        // slow 26 + signal 9 - 1 => index 33.
        assert!(!out[32].1);
        assert!(out[33].1);
    }

    #[test]
    fn adx_trending_market_reads_high() {
        let rows: Vec<Vec<f64>> = (0..40)
            .map(|i| {
                let base = 100.0 + i as f64;
                vec![base + 1.0, base - 1.0, base + 0.5]
            })
            .collect();
        let out = drive_rows(&mut Adx::new(5), &rows);
        let last = out.last().unwrap();
        assert!(last[0].1);
        assert!(last[0].0 > 50.0, "steady uptrend has strong ADX");
        assert!(last[1].0 > last[2].0, "+DI should dominate");
    }

    #[test]
    fn ichimoku_outputs_fill_in_by_period() {
        let rows: Vec<Vec<f64>> = (0..60)
            .map(|i| {
                let base = 10.0 + (i as f64) * 0.1;
                vec![base + 0.5, base - 0.5, base]
            })
            .collect();
        let out = drive_rows(&mut Ichimoku::new(9, 26, 52), &rows);
        assert!(out[8][0].1, "tenkan after 9 bars");
        assert!(!out[8][1].1, "kijun needs 26");
        assert!(out[25][1].1);
        assert!(out[25][2].1, "senkou_a needs tenkan and kijun");
        assert!(!out[50][3].1);
        assert!(out[51][3].1, "senkou_b needs 52");
        assert!(out[0][4].1, "chikou is just close");
    }

    #[test]
    fn supertrend_flips_direction_on_reversal() {
        let mut rows: Vec<Vec<f64>> = (0..12)
            .map(|i| {
                let base = 100.0 + i as f64;
                vec![base + 1.0, base - 1.0, base]
            })
            .collect();
        for i in 0..12 {
            let base = 111.0 - 3.0 * i as f64;
            rows.push(vec![base + 1.0, base - 1.0, base]);
        }
        let out = drive_rows(&mut Supertrend::new(4, 2.0), &rows);
        let up_phase = &out[8];
        assert!(up_phase[0].1);
        assert_eq!(up_phase[1].0, 1.0);
        let down_phase = out.last().unwrap();
        assert_eq!(down_phase[1].0, -1.0);
    }

    #[test]
    fn psar_stays_below_rising_lows() {
        let rows: Vec<Vec<f64>> = (0..10)
            .map(|i| {
                let base = 100.0 + 2.0 * i as f64;
                vec![base + 1.0, base - 1.0]
            })
            .collect();
        let out = drive_rows(&mut Psar::new(0.02, 0.02, 0.2), &rows);
        assert!(!out[0][0].1);
        for (idx, row) in out.iter().enumerate().skip(1) {
            assert!(row[0].1);
            let low = 100.0 + 2.0 * idx as f64 - 1.0;
            assert!(row[0].0 <= low, "SAR must trail the lows");
        }
    }

    #[test]
    fn elder_ray_measures_distance_from_ema() {
        let rows: Vec<Vec<f64>> = (0..8)
            .map(|_| vec![11.0, 9.0, 10.0])
            .collect();
        let out = drive_rows(&mut ElderRay::new(3), &rows);
        let last = out.last().unwrap();
        assert!(last[0].1);
        assert!((last[0].0 - 1.0).abs() < 1e-9, "bull power = high - ema");
        assert!((last[1].0 + 1.0).abs() < 1e-9, "bear power = low - ema");
    }

    #[test]
    fn fisher_is_bounded_and_lags_its_trigger() {
        let rows: Vec<Vec<f64>> = (0..20)
            .map(|i| {
                let base = 100.0 + (i as f64 * 0.7).sin() * 5.0;
                vec![base + 1.0, base - 1.0]
            })
            .collect();
        let out = drive_rows(&mut Fisher::new(5), &rows);
        assert!(!out[4][1].1, "trigger lags fisher by one tick");
        assert!(out[5][0].1 && out[5][1].1);
        assert!((out[5][1].0 - out[4][0].0).abs() < 1e-12);
    }

    #[test]
    fn swing_points_confirm_with_lag() {
        // Peak at index 3 (height 20), trough at index 7 (depth 5).
        let highs = [10.0, 11.0, 12.0, 20.0, 12.0, 11.0, 9.0, 7.0, 9.0, 10.0];
        let lows = [9.0, 10.0, 11.0, 19.0, 11.0, 10.0, 8.0, 5.0, 8.0, 9.0];
        let rows: Vec<Vec<f64>> = highs
            .iter()
            .zip(lows.iter())
            .map(|(h, l)| vec![*h, *l])
            .collect();
        let out = drive_rows(&mut SwingPoints::new(2, 2), &rows);
        assert!(!out[4][0].1, "peak not confirmed until right bars pass");
        assert!(out[5][0].1);
        assert_eq!(out[5][0].0, 20.0);
        assert!(!out[8][1].1);
        assert!(out[9][1].1);
        assert_eq!(out[9][1].0, 5.0);
    }

    #[test]
    fn fib_levels_interpolate_the_leg() {
        let mut fib = FibLevels::new();
        let emit = KernelState::step(
            &mut fib,
            &Update {
                timestamp: 0,
                inputs: &[Sample::present(20.0), Sample::present(10.0)],
            },
        );
        assert!(emit.get(2).available);
        assert!((emit.get(2).value - 15.0).abs() < 1e-12, "50% of the leg");
        assert!((emit.get(0).value - (20.0 - 2.36)).abs() < 1e-12);
    }
}
