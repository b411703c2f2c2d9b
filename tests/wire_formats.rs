//! Wire-format determinism and round-trip guarantees.

mod common;

use common::*;
use signal_engine::{compile_text, plan_with, Catalog, EvaluatorSession, Node, PlanOptions};

#[test]
fn ir_json_round_trips_exactly() {
    for source in [
        "sma(close, 20)",
        "crossup(sma(close, 20), sma(close, 50))",
        "macd(close, 12, 26, 9).histogram > 0 & rsi(close, 14) < 70",
        "BTC.trades.filter(amount > 1_000_000 & price > 0).sum(amount)",
        "-close / 2 + shift(close, 3)",
    ] {
        let node = compile_text(source).expect("compile should succeed");
        let json = node.to_canonical_json();
        let back = Node::from_json(&json).expect("round trip should parse");
        assert_eq!(node, back, "{source}");
        assert_eq!(json, back.to_canonical_json(), "{source}: unstable bytes");
    }
}

#[test]
fn plan_serialization_is_byte_identical_across_runs() {
    let dataset = synthetic_candles("BTC", "1s", 64);
    for source in [
        "sma(close, 20)",
        "crossup(sma(close, 20), sma(close, 50))",
        "sma(BTC.trades.filter(amount > 5).sum(amount), 5)",
    ] {
        // Trades expressions need the collection present in the schema.
        let mut dataset = dataset.clone();
        let mut trades = signal_engine::Collection::new("BTC", signal_engine::SourceKind::Trades);
        trades.push_row(0, &[("price", 1.0), ("amount", 10.0)]);
        dataset.insert_collection(trades);
        let schema = dataset.schema();

        let typed = compile_text(source).unwrap();
        let first = plan_with(&typed, &schema, PlanOptions::default()).unwrap();
        let second = plan_with(&typed, &schema, PlanOptions::default()).unwrap();
        assert_eq!(
            first.to_canonical_json(),
            second.to_canonical_json(),
            "{source}"
        );
        let parsed = signal_engine::Plan::from_json(&first.to_canonical_json()).unwrap();
        assert_eq!(first, parsed, "{source}: plan JSON round trip");
    }
}

#[test]
fn plan_wire_shape_carries_required_keys() {
    let dataset = synthetic_candles("BTC", "1s", 64);
    let typed = compile_text("sma(close, 5)").unwrap();
    let plan = plan_with(&typed, &dataset.schema(), PlanOptions::default()).unwrap();
    let value: serde_json::Value = serde_json::from_str(&plan.to_canonical_json()).unwrap();

    assert_eq!(value["schema_version"], 1);
    let nodes = value["nodes"].as_array().unwrap();
    assert!(!nodes.is_empty());
    for node in nodes {
        assert!(node["node_id"].is_string());
        assert!(node["ir_hash"].is_string());
        assert!(node["parents"].is_array());
        assert!(node["kind"].is_string());
        assert!(node["lookback"].is_number());
        assert!(node["alignment"]["policy"].is_string());
        assert!(node["alignment"]["timeframe"].is_string());
    }
    let source = nodes
        .iter()
        .find(|node| node["kind"] == "Source")
        .expect("plan has a source node");
    assert_eq!(source["requirement"]["field"], "close");
    assert_eq!(source["requirement"]["min_bars"], 5);
}

#[test]
fn catalog_export_is_deterministic_and_complete() {
    let first = Catalog::export_json();
    let second = Catalog::export_json();
    assert_eq!(first, second);

    let records: Vec<serde_json::Value> = serde_json::from_str(&first).unwrap();
    assert_eq!(records.len(), Catalog::list().len());
    let ids: Vec<&str> = records
        .iter()
        .map(|record| record["id"].as_str().unwrap())
        .collect();
    let mut sorted = ids.clone();
    sorted.sort_unstable();
    assert_eq!(ids, sorted, "export preserves stable id order");

    let macd = records.iter().find(|r| r["id"] == "macd").unwrap();
    assert_eq!(macd["outputs"].as_array().unwrap().len(), 3);
    assert_eq!(macd["semantics"]["warmup_policy"], "recursive");
    assert!(macd["semantics"]["tolerance_ulps"].is_number());
}

#[test]
fn snapshot_envelope_wire_shape() {
    let dataset = synthetic_candles("BTC", "1s", 16);
    let plan = compile("ema(close, 4)", &dataset);
    let session = EvaluatorSession::initialize(&plan, &dataset).unwrap();
    let envelope = session.snapshot();
    let value: serde_json::Value = serde_json::from_slice(&envelope.to_bytes()).unwrap();

    assert_eq!(value["schema_version"], 1);
    assert!(value["session_epoch"].is_number());
    let states = value["states"].as_array().unwrap();
    assert_eq!(states.len(), plan.nodes.len());
    for state in states {
        assert!(state["node_id"].is_string());
        assert!(state["warmup_status"].is_string());
        let payload = state["payload_b64"].as_str().unwrap();
        assert!(!payload.is_empty(), "payload is opaque base64");
    }
}
