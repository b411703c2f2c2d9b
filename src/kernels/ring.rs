use crate::kernels::Sample;
use serde::{Deserialize, Serialize};

/// Fixed-capacity ring of input samples, newest last.
///
/// Lag 0 is the most recent sample. Unavailable samples occupy slots so lag
/// arithmetic stays aligned with the input timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleRing {
    values: Vec<f64>,
    available: Vec<bool>,
    cap: usize,
    len: usize,
    write: usize,
}

impl SampleRing {
    pub fn new(cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            values: vec![f64::NAN; cap],
            available: vec![false; cap],
            cap,
            len: 0,
            write: 0,
        }
    }

    #[inline]
    pub fn push(&mut self, sample: Sample) {
        self.values[self.write] = sample.value;
        self.available[self.write] = sample.available;
        self.write += 1;
        if self.write == self.cap {
            self.write = 0;
        }
        if self.len < self.cap {
            self.len += 1;
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len == self.cap
    }

    #[inline]
    pub fn get_lag(&self, lag: usize) -> Option<Sample> {
        if lag >= self.len {
            return None;
        }
        let last = if self.write == 0 {
            self.cap - 1
        } else {
            self.write - 1
        };
        let idx = if last >= lag {
            last - lag
        } else {
            self.cap + last - lag
        };
        Some(Sample {
            value: self.values[idx],
            available: self.available[idx],
        })
    }

    /// Samples at lags `0..window`, newest first, stopping at ring length.
    pub fn recent(&self, window: usize) -> impl Iterator<Item = Sample> + '_ {
        (0..window.min(self.len)).map(|lag| self.get_lag(lag).expect("lag bounded by len"))
    }
}

/// Accumulated first/second moments over the usable samples of a window.
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowMoments {
    pub count: usize,
    pub sum: f64,
    pub sum_sq: f64,
}

impl WindowMoments {
    pub fn mean(&self) -> f64 {
        self.sum / self.count as f64
    }

    /// Sample standard deviation; 0.0 for a constant window.
    pub fn std(&self) -> f64 {
        if self.count <= 1 {
            return f64::NAN;
        }
        let n = self.count as f64;
        let m2 = self.sum_sq - (self.sum * self.sum) / n;
        (m2 / (n - 1.0)).max(0.0).sqrt()
    }
}

/// Moments over usable samples among the `window` most recent inputs.
pub fn window_moments(ring: &SampleRing, window: usize) -> WindowMoments {
    let mut moments = WindowMoments::default();
    for sample in ring.recent(window) {
        if sample.is_usable() {
            moments.count += 1;
            moments.sum += sample.value;
            moments.sum_sq += sample.value * sample.value;
        }
    }
    moments
}

/// Min/max (with their lags) over usable samples among the `window` most
/// recent inputs. Returns `None` when no sample is usable.
pub fn window_extremes(ring: &SampleRing, window: usize) -> Option<WindowExtremes> {
    let mut out: Option<WindowExtremes> = None;
    for (lag, sample) in ring.recent(window).enumerate() {
        if !sample.is_usable() {
            continue;
        }
        let entry = out.get_or_insert(WindowExtremes {
            min: sample.value,
            min_lag: lag,
            max: sample.value,
            max_lag: lag,
        });
        if sample.value < entry.min {
            entry.min = sample.value;
            entry.min_lag = lag;
        }
        if sample.value > entry.max {
            entry.max = sample.value;
            entry.max_lag = lag;
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowExtremes {
    pub min: f64,
    pub min_lag: usize,
    pub max: f64,
    pub max_lag: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_values(ring: &mut SampleRing, values: &[f64]) {
        for &value in values {
            ring.push(Sample::present(value));
        }
    }

    #[test]
    fn get_lag_wraps_around() {
        let mut ring = SampleRing::new(3);
        push_values(&mut ring, &[10.0, 20.0, 30.0, 40.0]);
        assert_eq!(ring.get_lag(0).unwrap().value, 40.0);
        assert_eq!(ring.get_lag(1).unwrap().value, 30.0);
        assert_eq!(ring.get_lag(2).unwrap().value, 20.0);
        assert!(ring.get_lag(3).is_none());
    }

    #[test]
    fn moments_skip_unavailable_samples() {
        let mut ring = SampleRing::new(4);
        ring.push(Sample::present(1.0));
        ring.push(Sample::missing());
        ring.push(Sample::present(3.0));
        ring.push(Sample::present(5.0));
        let moments = window_moments(&ring, 4);
        assert_eq!(moments.count, 3);
        assert_eq!(moments.sum, 9.0);
        assert!((moments.mean() - 3.0).abs() < 1e-12);
    }

    #[test]
    fn extremes_report_lags() {
        let mut ring = SampleRing::new(5);
        push_values(&mut ring, &[2.0, 9.0, 4.0, 1.0, 5.0]);
        let ext = window_extremes(&ring, 5).unwrap();
        assert_eq!(ext.max, 9.0);
        assert_eq!(ext.max_lag, 3);
        assert_eq!(ext.min, 1.0);
        assert_eq!(ext.min_lag, 1);
    }

    #[test]
    fn constant_window_std_is_zero() {
        let mut ring = SampleRing::new(3);
        push_values(&mut ring, &[7.0, 7.0, 7.0]);
        let moments = window_moments(&ring, 3);
        assert_eq!(moments.std(), 0.0);
    }
}
