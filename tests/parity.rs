//! Batch vs incremental parity across the indicator surface.
//!
//! For every expression the batch result and the event-stepped result must
//! agree elementwise: same timestamps, same availability masks, values
//! within the declared tolerance.

mod common;

use common::*;
use signal_engine::ir::Node;
use signal_engine::types::{BinaryOp, ShiftDelta};
use signal_engine::{
    compile_text, evaluate_batch, plan_with, AlignmentPolicy, Dataset, EvaluatorSession,
    PlanOptions, SeriesKey, Series, SourceKind,
};

const EXPRESSIONS: &[&str] = &[
    // Rolling reducers.
    "sum(close, 5)",
    "sma(close, 5)",
    "std(close, 6)",
    "min(close, 7)",
    "max(close, 7)",
    "argmax(close, 6)",
    "argmin(close, 6)",
    "median(close, 5)",
    // Smoothers.
    "ema(close, 5)",
    "rma(close, 5)",
    "wma(close, 5)",
    "hma(close, 9)",
    // Cumulative and transforms.
    "cumsum(close)",
    "obv()",
    "vwap(7)",
    "vwap(7, anchor=\"session\")",
    "diff(close, 3)",
    "roc(close, 4)",
    "shift(close, 2)",
    "true_range()",
    "positive_values(diff(close, 1))",
    "negative_values(diff(close, 1))",
    // Events.
    "crossup(sma(close, 3), sma(close, 8))",
    "crossdown(ema(close, 4), sma(close, 6))",
    "rising(close, 2)",
    "falling(close, 2)",
    "rising_pct(close, bars=3, pct=0.01)",
    "in_channel(close, bbands(close, 8).lower, bbands(close, 8).upper)",
    "enter(close, bbands(close, 8).lower, bbands(close, 8).upper)",
    "exit(close, bbands(close, 8).lower, bbands(close, 8).upper)",
    // Momentum composites.
    "rsi(close, 14)",
    "cmo(close, 10)",
    "stochastic(5, 3, 2)",
    "williams_r(7)",
    "cci(9)",
    "mfi(8)",
    "ao(3, 8)",
    "coppock(5, 7, 4)",
    "vortex(7)",
    // Trend composites.
    "macd(close, 5, 10, 4)",
    "macd(close, 5, 10, 4).histogram",
    "adx(6)",
    "ichimoku(4, 8, 16)",
    "supertrend(5, 2.5)",
    "psar()",
    "elder_ray(6)",
    "fisher(6)",
    "swing_points(2, 2)",
    "fib_retracement(2, 2)",
    // Volatility and volume.
    "atr(7)",
    "bbands(close, 8, 2.0)",
    "donchian(9)",
    "keltner(8, 5, 1.5)",
    "cmf(9)",
    "klinger(5, 8, 4)",
    // Operator combinations.
    "sma(close, 3) - sma(close, 9)",
    "(close - sma(close, 5)) / std(close, 5)",
    "rsi(close, 7) > 60 & close > sma(close, 5)",
    "~(close > sma(close, 5)) | falling(close, 1)",
    "close % 7 + -volume / 1000",
];

#[test]
fn batch_and_initialized_session_agree() {
    let dataset = synthetic_candles("BTC", "1s", 90);
    for source in EXPRESSIONS {
        let plan = compile(source, &dataset);
        let batch = batch_output(&plan, &dataset);
        let incremental = incremental_output(&plan, &dataset);
        assert_frames_match(source, &batch, &incremental);
    }
}

#[test]
fn batch_and_event_stepped_session_agree() {
    let dataset = synthetic_candles("BTC", "1s", 70);
    for source in EXPRESSIONS {
        let plan = compile(source, &dataset);
        let batch = batch_output(&plan, &dataset);
        let stepped = stepped_output(&plan, &dataset);
        assert_frames_match(source, &batch, &stepped);
    }
}

#[test]
fn history_shorter_than_lookback_stays_unavailable_in_both_modes() {
    let dataset = synthetic_candles("BTC", "1s", 8);
    let plan = compile("sma(close, 50)", &dataset);
    let batch = batch_output(&plan, &dataset);
    let incremental = incremental_output(&plan, &dataset);
    assert_frames_match("short history", &batch, &incremental);
    assert!(batch.columns[0].available.iter().all(|a| !a));
    assert_eq!(batch.len(), 8);
}

#[test]
fn exactly_warmup_length_flips_available_on_last_bar() {
    let dataset = synthetic_candles("BTC", "1s", 10);
    let plan = compile("sma(close, 10)", &dataset);
    for frame in [
        batch_output(&plan, &dataset),
        incremental_output(&plan, &dataset),
    ] {
        let available = &frame.columns[0].available;
        assert!(available[..9].iter().all(|a| !a));
        assert!(available[9], "availability flips at index lookback");
    }
}

#[test]
fn cross_timeframe_inner_join_parity() {
    let mut dataset = synthetic_candles("BTC", "1s", 60);
    // A coarser close series on 5-second bars.
    let coarse_tf = tf("5s");
    let timestamps: Vec<i64> = (0..12).map(|i| i * coarse_tf.nanos()).collect();
    let values: Vec<f64> = (0..12).map(|i| 100.0 + i as f64).collect();
    dataset.insert_series(
        SeriesKey::candles("BTC", coarse_tf),
        Series::from_values(
            timestamps,
            values,
            "BTC",
            coarse_tf,
            SourceKind::Ohlcv,
            "close",
        ),
    );

    let fine_ref = Node::new(signal_engine::ir::Expr::SourceRef {
        symbol: Some("BTC".to_string()),
        exchange: None,
        timeframe: Some(tf("1s")),
        source: SourceKind::Ohlcv,
        field: Some("close".to_string()),
    });
    let coarse_ref = Node::new(signal_engine::ir::Expr::SourceRef {
        symbol: Some("BTC".to_string()),
        exchange: None,
        timeframe: Some(coarse_tf),
        source: SourceKind::Ohlcv,
        field: Some("close".to_string()),
    });
    let ir = Node::binary(BinaryOp::Sub, fine_ref.clone(), coarse_ref.clone());
    let typed = signal_engine::compile_ir(&ir).unwrap();

    for policy in [AlignmentPolicy::Inner, AlignmentPolicy::Ffill] {
        let plan = plan_with(&typed, &dataset.schema(), PlanOptions { alignment: policy })
            .expect("cross-timeframe plan");
        let batch = batch_output(&plan, &dataset);
        let incremental = incremental_output(&plan, &dataset);
        assert_frames_match(&format!("cross-timeframe {policy:?}"), &batch, &incremental);
        match policy {
            AlignmentPolicy::Inner => {
                // Only the coarse timestamps survive the intersection.
                assert_eq!(batch.len(), 12);
            }
            AlignmentPolicy::Ffill => {
                assert_eq!(batch.len(), 60, "fine timeline drives the union");
            }
        }
    }

    // A time-shifted coarse operand keeps parity too.
    let shifted = Node::binary(
        BinaryOp::Sub,
        fine_ref,
        Node::shift(coarse_ref, ShiftDelta::Bars(1)),
    );
    let typed = signal_engine::compile_ir(&shifted).unwrap();
    let plan = plan_with(
        &typed,
        &dataset.schema(),
        PlanOptions {
            alignment: AlignmentPolicy::Inner,
        },
    )
    .unwrap();
    assert_frames_match(
        "shifted cross-timeframe",
        &batch_output(&plan, &dataset),
        &incremental_output(&plan, &dataset),
    );
}

#[test]
fn split_delivery_of_same_timestamp_matches_merged_delivery() {
    // Two series groups updated at the same timestamps, delivered as
    // separate events per leaf; ties are resolved by leaf id.
    let dataset = synthetic_candles("BTC", "1s", 30);
    let plan = compile("obv()", &dataset);
    let batch = batch_output(&plan, &dataset);

    let mut session = EvaluatorSession::initialize(&plan, &Dataset::new()).unwrap();
    for event in signal_engine::events_from_dataset(&dataset) {
        // Deliver each field of each update as its own event at that ts.
        for update in &event.updates {
            let signal_engine::LeafUpdate::Bar { key, fields } = update else {
                continue;
            };
            // One event per field would break the per-leaf monotonicity rule
            // for bars, so split by field into one bar update each... which
            // is the same leaf. Deliver the whole bar, then assert a second
            // same-ts bar for the same leaf is rejected.
            let fields: Vec<(&str, f64)> = fields
                .iter()
                .map(|(name, value)| (name.as_str(), *value))
                .collect();
            session
                .step(&signal_engine::Event::bar(
                    event.timestamp,
                    key.clone(),
                    &fields,
                ))
                .unwrap();
            let err = session
                .step(&signal_engine::Event::bar(
                    event.timestamp,
                    key.clone(),
                    &[("close", 1.0)],
                ))
                .unwrap_err();
            assert_eq!(err.kind(), "OrderingViolation");
        }
    }
    assert_frames_match(
        "split delivery",
        &batch,
        session.output_frame().unwrap(),
    );
}

#[test]
fn evaluate_batch_is_repeatable() {
    let dataset = synthetic_candles("BTC", "1s", 50);
    let typed = compile_text("macd(close, 5, 10, 4)").unwrap();
    let plan = plan_with(&typed, &dataset.schema(), PlanOptions::default()).unwrap();
    let first = evaluate_batch(&plan, &dataset).unwrap();
    let second = evaluate_batch(&plan, &dataset).unwrap();
    assert_eq!(first.output(&plan), second.output(&plan));
}
