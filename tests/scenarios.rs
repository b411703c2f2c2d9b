//! End-to-end scenarios with literal inputs and hand-checked expectations.

mod common;

use common::*;
use signal_engine::{
    compile_text, evaluate_batch, plan_with, Collection, Dataset, EvaluatorSession, Event,
    PlanOptions, SeriesKey, Series, SnapshotEnvelope, SourceKind,
};

fn closes_dataset(values: &[f64]) -> Dataset {
    let mut dataset = Dataset::new();
    let timestamps: Vec<i64> = (0..values.len() as i64).map(|i| i * SECOND).collect();
    dataset.insert_series(
        SeriesKey::candles("BTC", tf("1s")),
        Series::from_values(
            timestamps,
            values.to_vec(),
            "BTC",
            tf("1s"),
            SourceKind::Ohlcv,
            "close",
        ),
    );
    dataset
}

#[test]
fn sma_parity_on_second_spaced_closes() {
    let dataset = closes_dataset(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
    let plan = compile("sma(close, period=3)", &dataset);

    let expected_values = [f64::NAN, f64::NAN, 2.0, 3.0, 4.0, 5.0, 6.0];
    let expected_mask = [false, false, true, true, true, true, true];
    for frame in [
        batch_output(&plan, &dataset),
        incremental_output(&plan, &dataset),
    ] {
        let column = &frame.columns[0];
        assert_eq!(column.available, expected_mask);
        for (idx, expected) in expected_values.iter().enumerate() {
            if expected_mask[idx] {
                assert!((column.values[idx] - expected).abs() < 1e-12, "index {idx}");
            }
        }
    }
}

#[test]
fn rsi_warmup_and_alternating_value() {
    let closes: Vec<f64> = (0..15)
        .map(|i| if i % 2 == 0 { 100.0 } else { 101.0 })
        .collect();
    let dataset = closes_dataset(&closes);
    let plan = compile("rsi(close, period=14)", &dataset);
    let frame = batch_output(&plan, &dataset);
    let column = &frame.columns[0];
    assert!(column.available[..14].iter().all(|a| !a));
    assert!(column.available[14]);
    assert!((column.values[14] - 50.0).abs() < 1e-9);
    assert_frames_match("rsi warmup", &frame, &incremental_output(&plan, &dataset));
}

#[test]
fn macd_composite_on_linear_ramp() {
    let closes: Vec<f64> = (1..=30).map(|v| v as f64).collect();
    let dataset = closes_dataset(&closes);
    let plan = compile("macd(close, fast=12, slow=26, signal=9)", &dataset);
    let frame = batch_output(&plan, &dataset);

    let macd = frame.column("macd").unwrap();
    let histogram = frame.column("histogram").unwrap();
    assert!(!macd.available[24]);
    assert!(macd.available[25], "macd line fires once the slow EMA fills");
    assert!(
        histogram.available.iter().all(|a| !a),
        "30 bars cannot fill slow + signal warmup (index 33)"
    );

    // macd[25] must equal ema12[25] - ema26[25] computed independently.
    let ema12 = batch_output(&compile("ema(close, 12)", &dataset), &dataset);
    let ema26 = batch_output(&compile("ema(close, 26)", &dataset), &dataset);
    let expected = ema12.columns[0].values[25] - ema26.columns[0].values[25];
    assert!((macd.values[25] - expected).abs() < 1e-12);

    assert_frames_match("macd ramp", &frame, &incremental_output(&plan, &dataset));
}

#[test]
fn crossup_event_fires_once() {
    let mut dataset = Dataset::new();
    let timestamps: Vec<i64> = (0..5).map(|i| i * SECOND).collect();
    let key = SeriesKey::candles("BTC", tf("1s"));
    dataset.insert_series(
        key.clone(),
        Series::from_values(
            timestamps.clone(),
            vec![1.0, 2.0, 3.0, 4.0, 5.0],
            "BTC",
            tf("1s"),
            SourceKind::Ohlcv,
            "fast",
        ),
    );
    dataset.insert_series(
        key,
        Series::from_values(
            timestamps,
            vec![5.0, 4.0, 3.0, 2.0, 1.0],
            "BTC",
            tf("1s"),
            SourceKind::Ohlcv,
            "slow",
        ),
    );
    let plan = compile("crossup(fast, slow)", &dataset);
    let frame = batch_output(&plan, &dataset);
    let column = &frame.columns[0];
    assert_eq!(column.available, vec![false, true, true, true, true]);
    assert_eq!(column.values[1..], [0.0, 0.0, 1.0, 0.0]);
    assert_frames_match("crossup", &frame, &incremental_output(&plan, &dataset));
}

#[test]
fn incremental_replay_over_snapshot_matches_batch() {
    let closes: Vec<f64> = (0..50)
        .map(|i| 100.0 + (i as f64 * 0.37).sin() * 8.0 + i as f64 * 0.1)
        .collect();
    let full = closes_dataset(&closes);
    let first_twenty = closes_dataset(&closes[..20]);
    let plan = compile("ema(close, 6) - sma(close, 9)", &full);

    // Feed 20 bars, snapshot, restore into a fresh session, feed the rest.
    let warm = EvaluatorSession::initialize(&plan, &first_twenty).unwrap();
    let snapshot_bytes = warm.snapshot().to_bytes();
    drop(warm);

    let mut resumed = EvaluatorSession::initialize(&plan, &Dataset::new()).unwrap();
    resumed
        .restore(&SnapshotEnvelope::from_bytes(&snapshot_bytes).unwrap())
        .unwrap();
    let key = SeriesKey::candles("BTC", tf("1s"));
    for (offset, close) in closes[20..].iter().enumerate() {
        let ts = (20 + offset) as i64 * SECOND;
        resumed
            .step(&Event::bar(ts, key.clone(), &[("close", *close)]))
            .unwrap();
    }

    let batch = batch_output(&plan, &full);
    let resumed_frame = resumed.output_frame().unwrap();
    assert_eq!(resumed_frame.len(), 30, "restored session emits the suffix");
    for (suffix_idx, ts) in resumed_frame.timestamps.iter().enumerate() {
        let batch_idx = 20 + suffix_idx;
        assert_eq!(batch.timestamps[batch_idx], *ts);
        assert_eq!(
            batch.columns[0].available[batch_idx],
            resumed_frame.columns[0].available[suffix_idx]
        );
        if batch.columns[0].available[batch_idx] {
            assert!(close_enough(
                batch.columns[0].values[batch_idx],
                resumed_frame.columns[0].values[suffix_idx]
            ));
        }
    }
}

#[test]
fn session_replay_amends_history_from_nearest_snapshot() {
    let closes: Vec<f64> = (0..50).map(|i| 100.0 + i as f64).collect();
    let dataset = closes_dataset(&closes);
    let plan = compile("sma(close, 4)", &dataset);
    let mut session = EvaluatorSession::with_options(
        &plan,
        &dataset,
        signal_engine::SessionOptions {
            snapshot_every: Some(8),
        },
    )
    .unwrap();
    let before = session.output_frame().unwrap().clone();

    // Re-apply the tail unchanged; replay must reproduce the same outputs.
    let tail: Vec<Event> = signal_engine::events_from_dataset(&dataset)
        .into_iter()
        .skip(40)
        .collect();
    session.replay(&tail).unwrap();
    let after = session.output_frame().unwrap().clone();
    assert_eq!(before.timestamps, after.timestamps);
    assert_eq!(before.columns[0].values.len(), after.columns[0].values.len());
    for (idx, available) in before.columns[0].available.iter().enumerate() {
        assert_eq!(available, &after.columns[0].available[idx]);
        if *available {
            assert!(close_enough(
                before.columns[0].values[idx],
                after.columns[0].values[idx]
            ));
        }
    }
}

#[test]
fn trades_filter_aggregate_feeds_sma() {
    let mut dataset = synthetic_candles("BTC", "1s", 10);
    let mut trades = Collection::new("BTC", SourceKind::Trades);
    // Three trades per second; one whale trade per even-numbered second.
    for bar in 0..10i64 {
        for k in 0..3i64 {
            let ts = bar * SECOND + k * (SECOND / 4);
            let amount = if bar % 2 == 0 && k == 0 {
                2_000_000.0
            } else {
                500.0 + k as f64
            };
            trades.push_row(ts, &[("price", 100.0 + bar as f64), ("amount", amount)]);
        }
    }
    dataset.insert_collection(trades);

    let source = "sma(BTC.trades.filter(amount > 1_000_000).sum(amount), period=5)";
    let plan = compile(source, &dataset);
    let requirement = plan
        .requirements()
        .into_iter()
        .find(|req| req.source == SourceKind::Trades)
        .expect("trades requirement");
    assert_eq!(requirement.field, "amount");
    assert_eq!(requirement.min_bars, 5);

    let batch = batch_output(&plan, &dataset);
    let incremental = incremental_output(&plan, &dataset);
    assert_frames_match("trades sma", &batch, &incremental);

    // Buckets close only once the next second starts: 9 closed buckets,
    // the sma needs 5 of them.
    let column = &batch.columns[0];
    assert_eq!(batch.len(), 9);
    assert!(column.available[4]);
    // Whale sums alternate 2e6 / 0; any 5-bucket window holds either two or
    // three whale buckets.
    let expected = |idx: usize| {
        let whales = (0..=idx)
            .rev()
            .take(5)
            .filter(|bucket| bucket % 2 == 0)
            .count() as f64;
        whales * 2_000_000.0 / 5.0
    };
    for idx in 4..batch.len() {
        assert!(
            (column.values[idx] - expected(idx)).abs() < 1e-6,
            "bucket {idx}: {} vs {}",
            column.values[idx],
            expected(idx)
        );
    }
}

#[test]
fn all_constant_input_edge_cases() {
    let dataset = closes_dataset(&[42.0; 12]);
    let std_plan = compile("std(close, 5)", &dataset);
    let frame = batch_output(&std_plan, &dataset);
    assert!(frame.columns[0].available[4..].iter().all(|a| *a));
    assert!(frame.columns[0].values[4..].iter().all(|v| *v == 0.0));

    let rsi_plan = compile("rsi(close, 5)", &dataset);
    let frame = batch_output(&rsi_plan, &dataset);
    assert!(
        frame.columns[0].available.iter().all(|a| !a),
        "flat input leaves RSI undefined"
    );
    assert_frames_match(
        "flat rsi",
        &frame,
        &incremental_output(&rsi_plan, &dataset),
    );
}

#[test]
fn validate_and_preview_pipeline() {
    let dataset = synthetic_candles("BTC", "1s", 60);
    let typed = compile_text("bbands(close, 20, 2.0)").unwrap();
    let report = signal_engine::validate(&typed, Some(&dataset.schema()));
    assert!(report.valid, "{:?}", report.errors);

    let plan = plan_with(&typed, &dataset.schema(), PlanOptions::default()).unwrap();
    let result = evaluate_batch(&plan, &dataset).unwrap();
    let frame = result.output(&plan).unwrap();
    assert_eq!(frame.columns.len(), 3);
    let upper = frame.column("upper").unwrap();
    let lower = frame.column("lower").unwrap();
    let middle = frame.column("middle").unwrap();
    for idx in 19..frame.len() {
        assert!(upper.values[idx] >= middle.values[idx]);
        assert!(middle.values[idx] >= lower.values[idx]);
    }
}
