//! Shared fixtures for the integration suites.

#![allow(dead_code)]

use signal_engine::{
    compile_text, evaluate_batch, events_from_dataset, plan_with, Dataset, EvaluatorSession,
    Frame, Plan, PlanOptions, SeriesKey, Series, SourceKind, Timeframe,
};

pub const SECOND: i64 = 1_000_000_000;

pub fn tf(raw: &str) -> Timeframe {
    Timeframe::parse(raw, None).unwrap()
}

/// Deterministic synthetic candles: trending with seasonal wobble, volume
/// drifting upward.
pub fn synthetic_candles(symbol: &str, timeframe: &str, bars: usize) -> Dataset {
    let timeframe = tf(timeframe);
    let step = timeframe.nanos();
    let mut dataset = Dataset::new();
    let timestamps: Vec<i64> = (0..bars as i64).map(|i| i * step).collect();

    let mut open = Vec::with_capacity(bars);
    let mut high = Vec::with_capacity(bars);
    let mut low = Vec::with_capacity(bars);
    let mut close = Vec::with_capacity(bars);
    let mut volume = Vec::with_capacity(bars);
    for i in 0..bars {
        let t = i as f64;
        let o = 100.0 + t * 0.2 + (t * 0.21).sin() * 2.2;
        let c = o + 0.35 + (t * 0.13).cos() * 1.4;
        high.push(o.max(c) + 0.8 + (t * 0.07).sin().abs());
        low.push(o.min(c) - 0.9 - (t * 0.11).cos().abs());
        open.push(o);
        close.push(c);
        volume.push(1_000.0 + 40.0 * t + (t * 0.17).sin() * 120.0);
    }

    let key = SeriesKey::candles(symbol, timeframe);
    for (field, values) in [
        ("open", open),
        ("high", high),
        ("low", low),
        ("close", close),
        ("volume", volume),
    ] {
        dataset.insert_series(
            key.clone(),
            Series::from_values(
                timestamps.clone(),
                values,
                symbol,
                timeframe,
                SourceKind::Ohlcv,
                field,
            ),
        );
    }
    dataset
}

pub fn compile(source: &str, dataset: &Dataset) -> Plan {
    compile_with(source, dataset, PlanOptions::default())
}

pub fn compile_with(source: &str, dataset: &Dataset, options: PlanOptions) -> Plan {
    let typed = compile_text(source).expect("expression should compile");
    plan_with(&typed, &dataset.schema(), options).expect("expression should plan")
}

pub fn batch_output(plan: &Plan, dataset: &Dataset) -> Frame {
    let result = evaluate_batch(plan, dataset).expect("batch evaluation should succeed");
    result
        .output(plan)
        .expect("plan output frame should exist")
        .clone()
}

pub fn incremental_output(plan: &Plan, dataset: &Dataset) -> Frame {
    let session =
        EvaluatorSession::initialize(plan, dataset).expect("session should initialize");
    session
        .output_frame()
        .expect("session output frame should exist")
        .clone()
}

/// Replay a dataset through a fresh session one event at a time.
pub fn stepped_output(plan: &Plan, dataset: &Dataset) -> Frame {
    let mut session = EvaluatorSession::initialize(plan, &Dataset::new())
        .expect("cold session should initialize");
    for event in events_from_dataset(dataset) {
        session.step(&event).expect("step should apply");
    }
    session.output_frame().expect("output frame").clone()
}

pub fn assert_frames_match(label: &str, batch: &Frame, incremental: &Frame) {
    assert_eq!(
        batch.timestamps, incremental.timestamps,
        "{label}: timelines diverge"
    );
    assert_eq!(
        batch.columns.len(),
        incremental.columns.len(),
        "{label}: column count diverges"
    );
    for (batch_col, inc_col) in batch.columns.iter().zip(incremental.columns.iter()) {
        assert_eq!(
            batch_col.available, inc_col.available,
            "{label}/{}: availability masks diverge",
            batch_col.name
        );
        for (idx, (lhs, rhs)) in batch_col
            .values
            .iter()
            .zip(inc_col.values.iter())
            .enumerate()
        {
            if !batch_col.available[idx] {
                continue;
            }
            assert!(
                close_enough(*lhs, *rhs),
                "{label}/{}[{idx}]: {lhs} vs {rhs}",
                batch_col.name
            );
        }
    }
}

pub fn close_enough(lhs: f64, rhs: f64) -> bool {
    if lhs == rhs {
        return true;
    }
    let scale = lhs.abs().max(rhs.abs()).max(1.0);
    (lhs - rhs).abs() <= 1e-9 * scale
}
