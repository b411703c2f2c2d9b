//! Vectorized batch evaluation: one node at a time in topological order,
//! kernels driven in a tight loop over fully aligned inputs.

use crate::dataset::{Dataset, SeriesKey};
use crate::error::{EngineError, EvalError};
use crate::eval::align::{align, ParentFeed};
use crate::eval::{apply_binary, apply_unary, BucketAcc, Frame};
use crate::kernels::{build_kernel, transform, Emit, Kernel, Update};
use crate::plan::{Plan, PlanNode, PlanNodeKind, RowPredicate};
use crate::series::Collection;
use crate::types::Reducer;
use std::collections::HashMap;
use tracing::warn;

#[derive(Debug, Default)]
pub struct BatchResult {
    frames: HashMap<String, Frame>,
    pub warnings: Vec<String>,
}

impl BatchResult {
    pub fn frame(&self, node_id: &str) -> Option<&Frame> {
        self.frames.get(node_id)
    }

    pub fn output(&self, plan: &Plan) -> Option<&Frame> {
        plan.outputs.first().and_then(|id| self.frames.get(id))
    }
}

/// Memo of node outputs keyed by `(node_id, dataset version epoch)` so a
/// shared subexpression runs once across evaluations of the same data.
#[derive(Debug, Default)]
pub struct BatchCache {
    entries: HashMap<(String, u64), Frame>,
}

impl BatchCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub fn evaluate_batch(plan: &Plan, dataset: &Dataset) -> Result<BatchResult, EngineError> {
    let mut cache = BatchCache::new();
    evaluate_batch_cached(plan, dataset, &mut cache)
}

pub fn evaluate_batch_cached(
    plan: &Plan,
    dataset: &Dataset,
    cache: &mut BatchCache,
) -> Result<BatchResult, EngineError> {
    let epoch = dataset.version_epoch();
    let horizon = event_horizon(dataset);
    let mut result = BatchResult::default();

    for node in &plan.nodes {
        let cache_key = (node.node_id.clone(), epoch);
        if let Some(frame) = cache.entries.get(&cache_key) {
            result.frames.insert(node.node_id.clone(), frame.clone());
            continue;
        }
        let frame = evaluate_node(plan, node, dataset, horizon, &result.frames, &mut result.warnings)?;
        cache.entries.insert(cache_key, frame.clone());
        result.frames.insert(node.node_id.clone(), frame);
    }
    Ok(result)
}

/// Latest timestamp observed anywhere in the dataset; closes collection
/// buckets exactly as event arrival does in streaming mode.
fn event_horizon(dataset: &Dataset) -> i64 {
    let mut horizon = i64::MIN;
    for (_, fields) in dataset.select(None, None, None) {
        for series in fields.values() {
            if let Some(ts) = series.last_timestamp() {
                horizon = horizon.max(ts);
            }
        }
    }
    let schema = dataset.schema();
    for key in schema.collections.keys() {
        if let Some(collection) = dataset.collection(&key.symbol, key.source) {
            if let Some(ts) = collection.last_timestamp() {
                horizon = horizon.max(ts);
            }
        }
    }
    horizon
}

fn evaluate_node(
    plan: &Plan,
    node: &PlanNode,
    dataset: &Dataset,
    horizon: i64,
    frames: &HashMap<String, Frame>,
    warnings: &mut Vec<String>,
) -> Result<Frame, EngineError> {
    match &node.kind {
        PlanNodeKind::Source { requirement } => {
            let key = SeriesKey::new(
                requirement.symbol.clone(),
                requirement.timeframe,
                requirement.source,
            );
            let mut frame = Frame::for_node(node);
            match dataset.series(&key, &requirement.field) {
                Some(series) => {
                    for idx in 0..series.len() {
                        let value = series.values()[idx];
                        let available = series.availability()[idx] && value.is_finite();
                        frame.push_emit(series.timestamps()[idx], &Emit::single(value, available));
                    }
                }
                None => {
                    warn!(
                        symbol = requirement.symbol,
                        field = requirement.field,
                        "series missing from dataset; emitting empty output"
                    );
                    warnings.push(format!(
                        "missing data: {}/{}/{}/{}",
                        requirement.symbol,
                        requirement.timeframe,
                        requirement.source,
                        requirement.field
                    ));
                }
            }
            Ok(frame)
        }
        PlanNodeKind::Constant { .. } => Ok(Frame::for_node(node)),
        PlanNodeKind::CollectionReduce {
            symbol,
            source,
            field,
            reducer,
            predicate,
            ..
        } => {
            let mut frame = Frame::for_node(node);
            match dataset.collection(symbol, *source) {
                Some(collection) => reduce_collection(
                    collection,
                    field,
                    *reducer,
                    predicate.as_ref(),
                    node.alignment.timeframe.nanos(),
                    horizon,
                    &mut frame,
                ),
                None => {
                    warnings.push(format!("missing data: {symbol}/{source}/{field}"));
                }
            }
            Ok(frame)
        }
        PlanNodeKind::Kernel { binding, .. } => {
            let kernel = build_kernel(binding.id, &binding.params)?;
            run_kernel(plan, node, kernel, frames)
        }
        PlanNodeKind::Shift { bars } => {
            let kernel: Box<dyn Kernel> = Box::new(transform::Shift::new(*bars as usize));
            run_kernel(plan, node, kernel, frames)
        }
        PlanNodeKind::Operator { op } => {
            let rows = aligned_inputs(plan, node, frames)?;
            let mut frame = Frame::for_node(node);
            for (ts, row) in rows.timestamps.iter().zip(rows.rows.iter()) {
                let out = apply_binary(*op, row[0], row[1]);
                frame.push_emit(*ts, &Emit::single(out.value, out.available));
            }
            Ok(frame)
        }
        PlanNodeKind::UnaryOperator { op } => {
            let rows = aligned_inputs(plan, node, frames)?;
            let mut frame = Frame::for_node(node);
            for (ts, row) in rows.timestamps.iter().zip(rows.rows.iter()) {
                let out = apply_unary(*op, row[0]);
                frame.push_emit(*ts, &Emit::single(out.value, out.available));
            }
            Ok(frame)
        }
        PlanNodeKind::Member { index, .. } => {
            let parent = parent_frame(node, frames, 0)?;
            let mut frame = Frame::for_node(node);
            for idx in 0..parent.len() {
                let sample = parent.row(idx)[*index];
                frame.push_emit(
                    parent.timestamps[idx],
                    &Emit::single(sample.value, sample.available),
                );
            }
            Ok(frame)
        }
    }
}

fn run_kernel(
    plan: &Plan,
    node: &PlanNode,
    mut kernel: Box<dyn Kernel>,
    frames: &HashMap<String, Frame>,
) -> Result<Frame, EngineError> {
    let rows = aligned_inputs(plan, node, frames)?;
    let mut frame = Frame::for_node(node);
    for (ts, row) in rows.timestamps.iter().zip(rows.rows.iter()) {
        let emit = kernel.step(&Update {
            timestamp: *ts,
            inputs: row,
        });
        frame.push_emit(*ts, &emit);
    }
    Ok(frame)
}

fn aligned_inputs(
    plan: &Plan,
    node: &PlanNode,
    frames: &HashMap<String, Frame>,
) -> Result<crate::eval::align::AlignedRows, EngineError> {
    let mut feeds = Vec::with_capacity(node.parents.len());
    for parent_id in &node.parents {
        let parent = plan
            .node(parent_id)
            .ok_or_else(|| EvalError::internal(format!("unknown parent `{parent_id}`")))?;
        if let PlanNodeKind::Constant { value, .. } = parent.kind {
            feeds.push(ParentFeed::Constant { value });
        } else {
            let frame = frames
                .get(parent_id)
                .ok_or_else(|| EvalError::internal("parents evaluate before children"))?;
            feeds.push(ParentFeed::Frame(frame));
        }
    }
    Ok(align(&feeds, node.alignment.policy))
}

fn parent_frame<'a>(
    node: &PlanNode,
    frames: &'a HashMap<String, Frame>,
    slot: usize,
) -> Result<&'a Frame, EngineError> {
    let parent_id = node
        .parents
        .get(slot)
        .ok_or_else(|| EvalError::internal("node is missing a parent"))?;
    frames
        .get(parent_id)
        .ok_or_else(|| EvalError::internal("parents evaluate before children").into())
}

/// Bucketed reduction over a tick collection: epoch-aligned buckets of the
/// reference timeframe, emitted once closed by the event horizon.
fn reduce_collection(
    collection: &Collection,
    field: &str,
    reducer: Reducer,
    predicate: Option<&RowPredicate>,
    bucket_nanos: i64,
    horizon: i64,
    frame: &mut Frame,
) {
    if collection.is_empty() || bucket_nanos <= 0 {
        return;
    }
    let timestamps = collection.timestamps();
    let first_bucket = timestamps[0].div_euclid(bucket_nanos);
    // Bucket b is closed once some event reaches (b + 1) * width.
    let last_closed = (horizon - bucket_nanos).div_euclid(bucket_nanos);
    if last_closed < first_bucket {
        return;
    }

    let mut cursor = 0usize;
    for bucket in first_bucket..=last_closed {
        let end = (bucket + 1) * bucket_nanos;
        let mut acc = BucketAcc::default();
        while cursor < timestamps.len() && timestamps[cursor] < end {
            let row_idx = cursor;
            cursor += 1;
            let lookup = |name: &str| collection.column(name).map(|col| col[row_idx]);
            if let Some(predicate) = predicate {
                if !predicate.matches(&lookup) {
                    continue;
                }
            }
            if let Some(value) = lookup(field) {
                acc.push(value);
            }
        }
        let sample = acc.finalize(reducer);
        frame.push_emit(bucket * bucket_nanos, &Emit::single(sample.value, sample.available));
    }
}
