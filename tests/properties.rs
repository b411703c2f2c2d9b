//! Property-based invariants over randomly generated inputs.

mod common;

use common::*;
use proptest::prelude::*;
use signal_engine::{
    compile_text, plan_with, Dataset, Node, PlanOptions, SeriesKey, Series, SourceKind,
};

fn arb_price_series(min_len: usize, max_len: usize) -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(1.0..1_000.0_f64, min_len..=max_len)
}

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

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// `normalize(normalize(e)) == normalize(e)` for generated call shapes.
    #[test]
    fn prop_normalize_idempotent(period in 1i64..60, offset in 0i64..5) {
        let source = format!(
            "sma(close, {period}) - ema(close, {p2}) > {offset}",
            p2 = period + offset + 1
        );
        let once = compile_text(&source).unwrap();
        let again = signal_engine::compile_ir(&once).unwrap();
        prop_assert_eq!(once, again);
    }

    /// IR JSON round-trips for generated parameterizations.
    #[test]
    fn prop_ir_round_trip(period in 1i64..200, mult in 0.5f64..5.0) {
        let source = format!("bbands(close, {period}, {mult:.3})");
        let node = compile_text(&source).unwrap();
        let back = Node::from_json(&node.to_canonical_json()).unwrap();
        prop_assert_eq!(node, back);
    }

    /// Rolling mean over a full window equals the arithmetic mean of the
    /// last N inputs.
    #[test]
    fn prop_rolling_mean_matches_window_average(
        data in arb_price_series(10, 60),
        period in 1usize..8,
    ) {
        let dataset = closes_dataset(&data);
        let plan = compile(&format!("sma(close, {period})"), &dataset);
        let frame = batch_output(&plan, &dataset);
        let column = &frame.columns[0];
        for idx in 0..data.len() {
            if idx + 1 < period {
                prop_assert!(!column.available[idx]);
                continue;
            }
            prop_assert!(column.available[idx]);
            let window = &data[idx + 1 - period..=idx];
            let mean = window.iter().sum::<f64>() / period as f64;
            prop_assert!((column.values[idx] - mean).abs() < 1e-9 * mean.abs().max(1.0));
        }
    }

    /// Batch and incremental agree on generated histories for a mixed
    /// expression.
    #[test]
    fn prop_batch_incremental_parity(data in arb_price_series(5, 80), period in 2usize..10) {
        let dataset = closes_dataset(&data);
        let plan = compile(
            &format!("ema(close, {period}) - sma(close, {period})"),
            &dataset,
        );
        let batch = batch_output(&plan, &dataset);
        let incremental = incremental_output(&plan, &dataset);
        prop_assert_eq!(&batch.timestamps, &incremental.timestamps);
        for (bcol, icol) in batch.columns.iter().zip(incremental.columns.iter()) {
            prop_assert_eq!(&bcol.available, &icol.available);
            for (idx, available) in bcol.available.iter().enumerate() {
                if *available {
                    prop_assert!(close_enough(bcol.values[idx], icol.values[idx]));
                }
            }
        }
    }

    /// Boolean outputs are never marked available before the node is ready,
    /// and plans stay deterministic per input.
    #[test]
    fn prop_bool_series_mask_honest(data in arb_price_series(6, 40), period in 2usize..6) {
        let dataset = closes_dataset(&data);
        let source = format!("close > sma(close, {period})");
        let plan = compile(&source, &dataset);
        let replan = plan_with(
            &compile_text(&source).unwrap(),
            &dataset.schema(),
            PlanOptions::default(),
        )
        .unwrap();
        prop_assert_eq!(plan.to_canonical_json(), replan.to_canonical_json());

        let frame = batch_output(&plan, &dataset);
        let column = &frame.columns[0];
        prop_assert!(column.boolean);
        for (idx, available) in column.available.iter().enumerate() {
            if idx + 1 < period {
                prop_assert!(!available, "index {idx} precedes warmup");
            }
            if *available {
                prop_assert!(column.values[idx] == 0.0 || column.values[idx] == 1.0);
            }
        }
    }
}
