//! Boolean event kernels: crossings, trend runs, channel transitions.
//!
//! All emit 0.0/1.0 with boolean output schemas. Cross-style events need two
//! consecutive usable ticks on every operand; a missing tick breaks the run
//! and availability restarts one tick later.

use crate::kernels::ring::SampleRing;
use crate::kernels::{Emit, KernelState, Update, WarmupHint, WarmupPolicy};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossDirection {
    Up,
    Down,
}

/// `crossup(a, b)`: a closes above b after having been at or below it.
/// Inputs: `[a, b]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cross {
    direction: CrossDirection,
    prev: Option<(f64, f64)>,
}

impl Cross {
    pub fn new(direction: CrossDirection) -> Self {
        Self {
            direction,
            prev: None,
        }
    }
}

impl KernelState for Cross {
    fn step(&mut self, update: &Update) -> Emit {
        let a = update.inputs[0];
        let b = update.inputs[1];
        if !a.is_usable() || !b.is_usable() {
            self.prev = None;
            return Emit::unavailable(1);
        }
        let out = match self.prev {
            None => None,
            Some((pa, pb)) => Some(match self.direction {
                CrossDirection::Up => a.value > b.value && pa <= pb,
                CrossDirection::Down => a.value < b.value && pa >= pb,
            }),
        };
        self.prev = Some((a.value, b.value));
        match out {
            Some(fired) => Emit::boolean(fired),
            None => Emit::unavailable(1),
        }
    }

    fn warmup_hint(&self) -> WarmupHint {
        WarmupHint {
            policy: WarmupPolicy::Window,
            length: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Rising,
    Falling,
}

/// Strict monotone run over the last `bars` deltas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendRun {
    direction: TrendDirection,
    bars: usize,
    ring: SampleRing,
}

impl TrendRun {
    pub fn new(direction: TrendDirection, bars: usize) -> Self {
        Self {
            direction,
            bars,
            ring: SampleRing::new(bars + 1),
        }
    }
}

impl KernelState for TrendRun {
    fn step(&mut self, update: &Update) -> Emit {
        self.ring.push(update.inputs[0]);
        if self.ring.len() < self.bars + 1 {
            return Emit::unavailable(1);
        }
        let mut fired = true;
        for lag in 0..self.bars {
            let (Some(newer), Some(older)) = (self.ring.get_lag(lag), self.ring.get_lag(lag + 1))
            else {
                return Emit::unavailable(1);
            };
            if !newer.is_usable() || !older.is_usable() {
                return Emit::unavailable(1);
            }
            fired &= match self.direction {
                TrendDirection::Rising => newer.value > older.value,
                TrendDirection::Falling => newer.value < older.value,
            };
        }
        Emit::boolean(fired)
    }

    fn warmup_hint(&self) -> WarmupHint {
        WarmupHint {
            policy: WarmupPolicy::Window,
            length: self.bars + 1,
        }
    }
}

/// Percentage-threshold variant: fires when the move over `bars` bars
/// reaches `pct` (a fraction, 0.05 = 5%) in the configured direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendRunPct {
    direction: TrendDirection,
    bars: usize,
    pct: f64,
    ring: SampleRing,
}

impl TrendRunPct {
    pub fn new(direction: TrendDirection, bars: usize, pct: f64) -> Self {
        Self {
            direction,
            bars,
            pct,
            ring: SampleRing::new(bars + 1),
        }
    }
}

impl KernelState for TrendRunPct {
    fn step(&mut self, update: &Update) -> Emit {
        self.ring.push(update.inputs[0]);
        let (Some(cur), Some(base)) = (self.ring.get_lag(0), self.ring.get_lag(self.bars)) else {
            return Emit::unavailable(1);
        };
        if !cur.is_usable() || !base.is_usable() || base.value == 0.0 {
            return Emit::unavailable(1);
        }
        let change = (cur.value - base.value) / base.value;
        let fired = match self.direction {
            TrendDirection::Rising => change >= self.pct,
            TrendDirection::Falling => change <= -self.pct,
        };
        Emit::boolean(fired)
    }

    fn warmup_hint(&self) -> WarmupHint {
        WarmupHint {
            policy: WarmupPolicy::Window,
            length: self.bars + 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelEvent {
    /// Inside the band right now.
    Within,
    /// Crossed from outside to inside on this tick.
    Enter,
    /// Crossed from inside to outside on this tick.
    Exit,
}

/// Channel membership and transition events. Inputs: `[x, lower, upper]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    event: ChannelEvent,
    prev_inside: Option<bool>,
}

impl Channel {
    pub fn new(event: ChannelEvent) -> Self {
        Self {
            event,
            prev_inside: None,
        }
    }
}

impl KernelState for Channel {
    fn step(&mut self, update: &Update) -> Emit {
        let [x, lower, upper] = [update.inputs[0], update.inputs[1], update.inputs[2]];
        if !x.is_usable() || !lower.is_usable() || !upper.is_usable() {
            self.prev_inside = None;
            return Emit::unavailable(1);
        }
        let inside = x.value >= lower.value && x.value <= upper.value;
        let out = match self.event {
            ChannelEvent::Within => Some(inside),
            ChannelEvent::Enter => self.prev_inside.map(|prev| !prev && inside),
            ChannelEvent::Exit => self.prev_inside.map(|prev| prev && !inside),
        };
        self.prev_inside = Some(inside);
        match out {
            Some(fired) => Emit::boolean(fired),
            None => Emit::unavailable(1),
        }
    }

    fn warmup_hint(&self) -> WarmupHint {
        let length = match self.event {
            ChannelEvent::Within => 1,
            ChannelEvent::Enter | ChannelEvent::Exit => 2,
        };
        WarmupHint {
            policy: WarmupPolicy::Window,
            length,
        }
    }
}
