//! Incremental evaluation: an owned session advanced one event at a time.
//!
//! Events append bars or ticks to leaf series; dirty nodes re-evaluate in
//! topological order under the same alignment and operator semantics as the
//! batch path. Sessions snapshot their full state between events and replay
//! from the nearest snapshot to amend history.

use crate::dataset::{Dataset, SeriesKey};
use crate::error::{EngineError, EvalError};
use crate::eval::{apply_binary, apply_unary, BucketAcc, Frame, WarmupStatus};
use crate::kernels::{build_kernel, transform, Emit, Kernel, Sample, Update};
use crate::plan::{AlignmentPolicy, Plan, PlanNodeKind, RowPredicate};
use crate::types::{BinaryOp, Reducer, SourceKind, UnaryOp};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

/// One append delivered to `step`: all leaf updates sharing a timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub timestamp: i64,
    pub updates: Vec<LeafUpdate>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LeafUpdate {
    Bar {
        key: SeriesKey,
        fields: Vec<(String, f64)>,
    },
    Tick {
        symbol: String,
        source: SourceKind,
        fields: Vec<(String, f64)>,
    },
}

impl Event {
    pub fn bar(timestamp: i64, key: SeriesKey, fields: &[(&str, f64)]) -> Self {
        Self {
            timestamp,
            updates: vec![LeafUpdate::Bar {
                key,
                fields: fields
                    .iter()
                    .map(|(name, value)| ((*name).to_string(), *value))
                    .collect(),
            }],
        }
    }

    pub fn tick(
        timestamp: i64,
        symbol: impl Into<String>,
        source: SourceKind,
        fields: &[(&str, f64)],
    ) -> Self {
        Self {
            timestamp,
            updates: vec![LeafUpdate::Tick {
                symbol: symbol.into(),
                source,
                fields: fields
                    .iter()
                    .map(|(name, value)| ((*name).to_string(), *value))
                    .collect(),
            }],
        }
    }
}

fn leaf_id(update: &LeafUpdate) -> String {
    match update {
        LeafUpdate::Bar { key, .. } => {
            format!("{}:{}:{}", key.symbol, key.timeframe, key.source)
        }
        LeafUpdate::Tick { symbol, source, .. } => format!("{symbol}:{source}"),
    }
}

/// Chronological event stream for a dataset; ties across leaves are merged
/// into one event with bar updates ordered by key and ticks after bars.
pub fn events_from_dataset(dataset: &Dataset) -> Vec<Event> {
    let mut bars: BTreeMap<(i64, SeriesKey), Vec<(String, f64)>> = BTreeMap::new();
    for (key, fields) in dataset.select(None, None, None) {
        for (field, series) in fields {
            for idx in 0..series.len() {
                let value = if series.availability()[idx] {
                    series.values()[idx]
                } else {
                    f64::NAN
                };
                bars.entry((series.timestamps()[idx], key.clone()))
                    .or_default()
                    .push((field.clone(), value));
            }
        }
    }

    let mut by_ts: BTreeMap<i64, Vec<LeafUpdate>> = BTreeMap::new();
    for ((ts, key), fields) in bars {
        by_ts
            .entry(ts)
            .or_default()
            .push(LeafUpdate::Bar { key, fields });
    }

    let schema = dataset.schema();
    for key in schema.collections.keys() {
        let Some(collection) = dataset.collection(&key.symbol, key.source) else {
            continue;
        };
        let names: Vec<&str> = collection.field_names().collect();
        for idx in 0..collection.len() {
            let fields: Vec<(String, f64)> = names
                .iter()
                .filter_map(|name| {
                    collection
                        .column(name)
                        .map(|col| ((*name).to_string(), col[idx]))
                })
                .collect();
            by_ts
                .entry(collection.timestamps()[idx])
                .or_default()
                .push(LeafUpdate::Tick {
                    symbol: key.symbol.clone(),
                    source: key.source,
                    fields,
                });
        }
    }

    by_ts
        .into_iter()
        .map(|(timestamp, updates)| Event { timestamp, updates })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Applied { rows: usize },
    Cancelled,
}

/// Cooperative cancellation flag checked between nodes.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Auto-snapshot cadence in events; `None` keeps only the initial one.
    pub snapshot_every: Option<u64>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            snapshot_every: Some(64),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ReduceBuckets {
    width_nanos: i64,
    current_bucket: Option<i64>,
    acc: BucketAcc,
}

#[derive(Debug)]
enum NodeRuntime {
    Source,
    /// Collection marker sources emit nothing themselves.
    InertSource,
    Constant {
        value: f64,
    },
    Kernel {
        kernel: Box<dyn Kernel>,
    },
    Operator {
        op: BinaryOp,
    },
    Unary {
        op: UnaryOp,
    },
    Member {
        index: usize,
    },
    Reduce {
        field: String,
        reducer: Reducer,
        predicate: Option<RowPredicate>,
        buckets: ReduceBuckets,
    },
}

#[derive(Debug)]
struct NodeSlot {
    runtime: NodeRuntime,
    parent_idx: Vec<usize>,
    parent_constant: Vec<Option<f64>>,
    warmup: WarmupStatus,
    parent_latest: Vec<Emit>,
    parent_has: Vec<bool>,
    parent_latest_ts: Vec<i64>,
    last_emit_ts: i64,
    fresh: Vec<(i64, Emit)>,
    frame: Frame,
}

impl NodeSlot {
    fn emit_row(&mut self, ts: i64, emit: Emit) {
        let available = (0..emit.len()).any(|idx| emit.get(idx).available);
        self.warmup = self.warmup.on_output(available);
        self.fresh.push((ts, emit));
        self.frame.push_emit(ts, &emit);
        self.last_emit_ts = ts;
    }
}

/// Wire form of one node's state inside a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStateSnapshot {
    pub node_id: String,
    pub warmup_status: WarmupStatus,
    pub payload_b64: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEnvelope {
    pub schema_version: u32,
    pub session_epoch: u64,
    /// Latest event timestamp covered by this snapshot.
    pub as_of_ts: i64,
    pub leaf_clocks: BTreeMap<String, i64>,
    pub states: Vec<NodeStateSnapshot>,
}

impl SnapshotEnvelope {
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("snapshot envelope serialization is infallible")
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EvalError> {
        serde_json::from_slice(bytes)
            .map_err(|err| EvalError::internal(format!("invalid snapshot envelope: {err}")))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SlotPayload {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    kernel: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    buckets: Option<ReduceBuckets>,
    parent_latest: Vec<Emit>,
    parent_has: Vec<bool>,
    parent_latest_ts: Vec<i64>,
    last_emit_ts: i64,
}

pub struct EvaluatorSession {
    plan: Plan,
    options: SessionOptions,
    slots: Vec<NodeSlot>,
    source_routes: HashMap<(String, u64, SourceKind, String), Vec<usize>>,
    reduce_routes: HashMap<(String, SourceKind), Vec<usize>>,
    leaf_clocks: BTreeMap<String, i64>,
    session_epoch: u64,
    snapshots: Vec<SnapshotEnvelope>,
    events_since_snapshot: u64,
    cancel: Option<CancelToken>,
}

impl std::fmt::Debug for EvaluatorSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvaluatorSession")
            .field("nodes", &self.slots.len())
            .field("session_epoch", &self.session_epoch)
            .finish()
    }
}

impl EvaluatorSession {
    /// Build a cold session and drive warmup by replaying `history`
    /// chronologically through every node.
    pub fn initialize(plan: &Plan, history: &Dataset) -> Result<Self, EngineError> {
        Self::with_options(plan, history, SessionOptions::default())
    }

    pub fn with_options(
        plan: &Plan,
        history: &Dataset,
        options: SessionOptions,
    ) -> Result<Self, EngineError> {
        let mut session = Self::build(plan.clone(), options)?;
        session.snapshots.push(session.snapshot());
        for event in events_from_dataset(history) {
            session.step(&event)?;
        }
        debug!(
            events = session.session_epoch,
            nodes = session.slots.len(),
            "session initialized"
        );
        Ok(session)
    }

    fn build(plan: Plan, options: SessionOptions) -> Result<Self, EngineError> {
        let mut slots = Vec::with_capacity(plan.nodes.len());
        let mut source_routes: HashMap<(String, u64, SourceKind, String), Vec<usize>> =
            HashMap::new();
        let mut reduce_routes: HashMap<(String, SourceKind), Vec<usize>> = HashMap::new();

        for (idx, node) in plan.nodes.iter().enumerate() {
            let runtime = match &node.kind {
                PlanNodeKind::Source { requirement } => {
                    if requirement.field.is_empty() {
                        NodeRuntime::InertSource
                    } else {
                        source_routes
                            .entry((
                                requirement.symbol.clone(),
                                requirement.timeframe.secs(),
                                requirement.source,
                                requirement.field.clone(),
                            ))
                            .or_default()
                            .push(idx);
                        NodeRuntime::Source
                    }
                }
                PlanNodeKind::Constant { value, .. } => NodeRuntime::Constant { value: *value },
                PlanNodeKind::Kernel { binding, .. } => NodeRuntime::Kernel {
                    kernel: build_kernel(binding.id, &binding.params)?,
                },
                PlanNodeKind::Shift { bars } => NodeRuntime::Kernel {
                    kernel: Box::new(transform::Shift::new(*bars as usize)),
                },
                PlanNodeKind::Operator { op } => NodeRuntime::Operator { op: *op },
                PlanNodeKind::UnaryOperator { op } => NodeRuntime::Unary { op: *op },
                PlanNodeKind::Member { index, .. } => NodeRuntime::Member { index: *index },
                PlanNodeKind::CollectionReduce {
                    symbol,
                    source,
                    field,
                    reducer,
                    predicate,
                    ..
                } => {
                    reduce_routes
                        .entry((symbol.clone(), *source))
                        .or_default()
                        .push(idx);
                    NodeRuntime::Reduce {
                        field: field.clone(),
                        reducer: *reducer,
                        predicate: predicate.clone(),
                        buckets: ReduceBuckets {
                            width_nanos: node.alignment.timeframe.nanos(),
                            current_bucket: None,
                            acc: BucketAcc::default(),
                        },
                    }
                }
            };

            let parent_idx: Vec<usize> = node
                .parents
                .iter()
                .map(|id| {
                    plan.node_index(id)
                        .ok_or_else(|| EvalError::internal(format!("unknown parent `{id}`")))
                })
                .collect::<Result<_, _>>()?;
            let parent_constant: Vec<Option<f64>> = parent_idx
                .iter()
                .map(|pidx| match plan.nodes[*pidx].kind {
                    PlanNodeKind::Constant { value, .. } => Some(value),
                    _ => None,
                })
                .collect();
            let parent_count = parent_idx.len();
            let parent_latest: Vec<Emit> = parent_constant
                .iter()
                .map(|constant| match constant {
                    Some(value) => Emit::single(*value, true),
                    None => Emit::unavailable(1),
                })
                .collect();
            let parent_has: Vec<bool> = parent_constant.iter().map(Option::is_some).collect();

            slots.push(NodeSlot {
                runtime,
                parent_idx,
                parent_constant,
                warmup: WarmupStatus::Cold,
                parent_latest,
                parent_has,
                parent_latest_ts: vec![i64::MIN; parent_count],
                last_emit_ts: i64::MIN,
                fresh: Vec::new(),
                frame: Frame::for_node(node),
            });
        }

        Ok(Self {
            plan,
            options,
            slots,
            source_routes,
            reduce_routes,
            leaf_clocks: BTreeMap::new(),
            session_epoch: 0,
            snapshots: Vec::new(),
            events_since_snapshot: 0,
            cancel: None,
        })
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    pub fn session_epoch(&self) -> u64 {
        self.session_epoch
    }

    /// Cooperative cancellation handle; checked between nodes during `step`.
    pub fn cancel_token(&mut self) -> CancelToken {
        self.cancel.get_or_insert_with(CancelToken::default).clone()
    }

    pub fn frame(&self, node_id: &str) -> Option<&Frame> {
        self.plan
            .node_index(node_id)
            .map(|idx| &self.slots[idx].frame)
    }

    pub fn output_frame(&self) -> Option<&Frame> {
        self.plan.outputs.first().and_then(|id| self.frame(id))
    }

    pub fn warmup_status(&self, node_id: &str) -> Option<WarmupStatus> {
        self.plan
            .node_index(node_id)
            .map(|idx| self.slots[idx].warmup)
    }

    /// Apply one event. A failed step leaves the session unchanged.
    pub fn step(&mut self, event: &Event) -> Result<StepOutcome, EngineError> {
        if let Some(token) = &self.cancel {
            if token.is_cancelled() {
                return Ok(StepOutcome::Cancelled);
            }
        }
        for update in &event.updates {
            let leaf = leaf_id(update);
            if let Some(last) = self.leaf_clocks.get(&leaf) {
                let in_order = match update {
                    LeafUpdate::Bar { .. } => event.timestamp > *last,
                    LeafUpdate::Tick { .. } => event.timestamp >= *last,
                };
                if !in_order {
                    return Err(EvalError::OrderingViolation {
                        leaf,
                        last_ts: *last,
                        incoming_ts: event.timestamp,
                    }
                    .into());
                }
            }
        }
        // A live cancel token means mid-step aborts must roll back.
        let rollback = self.cancel.as_ref().map(|_| self.snapshot());

        for slot in &mut self.slots {
            slot.fresh.clear();
        }

        for idx in 0..self.slots.len() {
            self.flush_reduce(idx, event.timestamp);
        }

        for update in &event.updates {
            match update {
                LeafUpdate::Bar { key, fields } => {
                    for (field, value) in fields {
                        let route = (
                            key.symbol.clone(),
                            key.timeframe.secs(),
                            key.source,
                            field.clone(),
                        );
                        let Some(routes) = self.source_routes.get(&route) else {
                            continue;
                        };
                        for &idx in routes {
                            let slot = &mut self.slots[idx];
                            let available = value.is_finite();
                            slot.warmup = slot.warmup.on_input();
                            slot.emit_row(event.timestamp, Emit::single(*value, available));
                        }
                    }
                }
                LeafUpdate::Tick {
                    symbol,
                    source,
                    fields,
                } => {
                    let Some(routes) = self
                        .reduce_routes
                        .get(&(symbol.clone(), *source))
                        .cloned()
                    else {
                        continue;
                    };
                    for idx in routes {
                        self.apply_tick(idx, event.timestamp, fields);
                    }
                }
            }
            self.leaf_clocks.insert(leaf_id(update), event.timestamp);
        }

        for idx in 0..self.slots.len() {
            if let Some(token) = &self.cancel {
                if token.is_cancelled() {
                    if let Some(envelope) = &rollback {
                        self.restore(envelope)?;
                    }
                    return Ok(StepOutcome::Cancelled);
                }
            }
            match self.slots[idx].runtime {
                NodeRuntime::Source
                | NodeRuntime::InertSource
                | NodeRuntime::Constant { .. }
                | NodeRuntime::Reduce { .. } => continue,
                _ => {}
            }
            self.evaluate_slot(idx);
        }

        self.session_epoch += 1;
        self.events_since_snapshot += 1;
        if let Some(every) = self.options.snapshot_every {
            if self.events_since_snapshot >= every {
                let envelope = self.snapshot();
                self.snapshots.push(envelope);
                self.events_since_snapshot = 0;
            }
        }
        let rows = self.slots.iter().map(|slot| slot.fresh.len()).sum();
        Ok(StepOutcome::Applied { rows })
    }

    fn flush_reduce(&mut self, idx: usize, now_ts: i64) {
        let NodeRuntime::Reduce {
            reducer, buckets, ..
        } = &mut self.slots[idx].runtime
        else {
            return;
        };
        let width = buckets.width_nanos;
        let reducer = *reducer;
        let mut closed: Vec<(i64, Sample)> = Vec::new();
        if width > 0 {
            while let Some(current) = buckets.current_bucket {
                if (current + 1) * width > now_ts {
                    break;
                }
                closed.push((current * width, buckets.acc.finalize(reducer)));
                buckets.acc = BucketAcc::default();
                buckets.current_bucket = Some(current + 1);
            }
        }
        for (ts, sample) in closed {
            self.slots[idx].emit_row(ts, Emit::single(sample.value, sample.available));
        }
    }

    fn apply_tick(&mut self, idx: usize, ts: i64, fields: &[(String, f64)]) {
        let slot = &mut self.slots[idx];
        let NodeRuntime::Reduce {
            field,
            predicate,
            buckets,
            ..
        } = &mut slot.runtime
        else {
            return;
        };
        if buckets.width_nanos <= 0 {
            return;
        }
        if buckets.current_bucket.is_none() {
            buckets.current_bucket = Some(ts.div_euclid(buckets.width_nanos));
        }
        slot.warmup = slot.warmup.on_input();

        let lookup = |name: &str| {
            fields
                .iter()
                .find(|(field_name, _)| field_name == name)
                .map(|(_, value)| *value)
        };
        if let Some(predicate) = predicate {
            if !predicate.matches(&lookup) {
                return;
            }
        }
        if let Some(value) = lookup(field) {
            buckets.acc.push(value);
        }
    }

    fn evaluate_slot(&mut self, idx: usize) {
        // Collect parent rows emitted this tick, grouped by timestamp.
        let mut by_ts: BTreeMap<i64, Vec<(usize, Emit)>> = BTreeMap::new();
        for (pos, &pidx) in self.slots[idx].parent_idx.iter().enumerate() {
            for (ts, emit) in &self.slots[pidx].fresh {
                by_ts.entry(*ts).or_default().push((pos, *emit));
            }
        }
        if by_ts.is_empty() {
            return;
        }
        let policy = self.plan.nodes[idx].alignment.policy;
        let parent_idx = self.slots[idx].parent_idx.clone();
        let parent_constant = self.slots[idx].parent_constant.clone();

        for (ts, rows) in by_ts {
            let slot = &mut self.slots[idx];
            slot.warmup = slot.warmup.on_input();
            for (pos, emit) in rows {
                slot.parent_latest[pos] = emit;
                slot.parent_has[pos] = true;
                slot.parent_latest_ts[pos] = ts;
            }
            if slot.last_emit_ts >= ts {
                continue;
            }

            // Inner joins must also match rows a sibling emitted in an
            // earlier event (a late-closing bucket joining a finer
            // timeline), so fall back to the parent's accumulated frame
            // when its newest row has already moved past `ts`.
            let mut inputs: Vec<Sample> = Vec::with_capacity(parent_idx.len());
            let mut joined = true;
            for (pos, constant) in parent_constant.iter().enumerate() {
                if let Some(value) = constant {
                    inputs.push(Sample::present(*value));
                    continue;
                }
                let slot = &self.slots[idx];
                match policy {
                    AlignmentPolicy::Inner => {
                        if slot.parent_latest_ts[pos] == ts {
                            inputs.push(slot.parent_latest[pos].get(0));
                        } else if let Some(row) =
                            self.slots[parent_idx[pos]].frame.index_of(ts)
                        {
                            inputs.push(self.slots[parent_idx[pos]].frame.row(row)[0]);
                        } else {
                            joined = false;
                            break;
                        }
                    }
                    AlignmentPolicy::Ffill => {
                        if slot.parent_has[pos] && slot.parent_latest_ts[pos] <= ts {
                            inputs.push(slot.parent_latest[pos].get(0));
                        } else if slot.parent_has[pos] {
                            // Latest moved past ts inside this step; read
                            // the frame for the newest row at or before ts.
                            let frame = &self.slots[parent_idx[pos]].frame;
                            let upto = frame.timestamps.partition_point(|t| *t <= ts);
                            if upto == 0 {
                                inputs.push(Sample::missing());
                            } else {
                                inputs.push(frame.row(upto - 1)[0]);
                            }
                        } else {
                            inputs.push(Sample::missing());
                        }
                    }
                }
            }
            if !joined {
                continue;
            }
            // Member projections need the full multi-column parent row, not
            // just column zero.
            let member_sample = match &self.slots[idx].runtime {
                NodeRuntime::Member { index } => {
                    let slot = &self.slots[idx];
                    let parent_frame = &self.slots[parent_idx[0]].frame;
                    Some(if slot.parent_latest_ts[0] == ts {
                        slot.parent_latest[0].get(*index)
                    } else if let Some(row) = parent_frame.index_of(ts) {
                        parent_frame.row(row)[*index]
                    } else {
                        let upto = parent_frame.timestamps.partition_point(|t| *t <= ts);
                        if upto == 0 || !slot.parent_has[0] {
                            Sample::missing()
                        } else {
                            parent_frame.row(upto - 1)[*index]
                        }
                    })
                }
                _ => None,
            };
            let slot = &mut self.slots[idx];

            let emit = match &mut slot.runtime {
                NodeRuntime::Kernel { kernel } => kernel.step(&Update {
                    timestamp: ts,
                    inputs: &inputs,
                }),
                NodeRuntime::Operator { op } => {
                    let out = apply_binary(*op, inputs[0], inputs[1]);
                    Emit::single(out.value, out.available)
                }
                NodeRuntime::Unary { op } => {
                    let out = apply_unary(*op, inputs[0]);
                    Emit::single(out.value, out.available)
                }
                NodeRuntime::Member { .. } => {
                    let sample = member_sample.expect("member sample resolved above");
                    Emit::single(sample.value, sample.available)
                }
                NodeRuntime::Source
                | NodeRuntime::InertSource
                | NodeRuntime::Constant { .. }
                | NodeRuntime::Reduce { .. } => unreachable!("handled before evaluation"),
            };
            slot.emit_row(ts, emit);
        }
    }

    /// Capture every node's state plus the session clocks.
    pub fn snapshot(&self) -> SnapshotEnvelope {
        let states = self
            .plan
            .nodes
            .iter()
            .zip(self.slots.iter())
            .map(|(node, slot)| {
                let kernel = match &slot.runtime {
                    NodeRuntime::Kernel { kernel } => {
                        let bytes = kernel
                            .snapshot()
                            .expect("kernel states serialize infallibly");
                        Some(
                            serde_json::from_slice(&bytes)
                                .expect("kernel snapshots are valid JSON"),
                        )
                    }
                    _ => None,
                };
                let buckets = match &slot.runtime {
                    NodeRuntime::Reduce { buckets, .. } => Some(buckets.clone()),
                    _ => None,
                };
                let payload = SlotPayload {
                    kernel,
                    buckets,
                    parent_latest: slot.parent_latest.clone(),
                    parent_has: slot.parent_has.clone(),
                    parent_latest_ts: slot.parent_latest_ts.clone(),
                    last_emit_ts: slot.last_emit_ts,
                };
                NodeStateSnapshot {
                    node_id: node.node_id.clone(),
                    warmup_status: slot.warmup,
                    payload_b64: BASE64.encode(
                        serde_json::to_vec(&payload).expect("payload serialization is infallible"),
                    ),
                }
            })
            .collect();
        SnapshotEnvelope {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            session_epoch: self.session_epoch,
            as_of_ts: self
                .leaf_clocks
                .values()
                .copied()
                .max()
                .unwrap_or(i64::MIN),
            leaf_clocks: self.leaf_clocks.clone(),
            states,
        }
    }

    /// Restore every node state from a snapshot taken against the same plan.
    pub fn restore(&mut self, envelope: &SnapshotEnvelope) -> Result<(), EvalError> {
        if envelope.schema_version != SNAPSHOT_SCHEMA_VERSION {
            return Err(EvalError::SnapshotMismatch {
                expected_schema: SNAPSHOT_SCHEMA_VERSION,
                got_schema: envelope.schema_version,
            });
        }
        for state in &envelope.states {
            let Some(idx) = self.plan.node_index(&state.node_id) else {
                return Err(EvalError::internal(format!(
                    "snapshot references unknown node `{}`",
                    state.node_id
                )));
            };
            let bytes = BASE64
                .decode(&state.payload_b64)
                .map_err(|err| EvalError::internal(format!("invalid snapshot payload: {err}")))?;
            let payload: SlotPayload = serde_json::from_slice(&bytes)
                .map_err(|err| EvalError::internal(format!("invalid snapshot payload: {err}")))?;

            let slot = &mut self.slots[idx];
            if payload.parent_latest.len() != slot.parent_idx.len() {
                return Err(EvalError::internal(
                    "snapshot parent arity does not match plan",
                ));
            }
            match &mut slot.runtime {
                NodeRuntime::Kernel { kernel } => {
                    let Some(kernel_state) = &payload.kernel else {
                        return Err(EvalError::internal("snapshot is missing kernel state"));
                    };
                    let bytes = serde_json::to_vec(kernel_state)
                        .map_err(|err| EvalError::internal(err.to_string()))?;
                    kernel.restore(&bytes)?;
                }
                NodeRuntime::Reduce { buckets, .. } => {
                    let Some(saved) = payload.buckets.clone() else {
                        return Err(EvalError::internal("snapshot is missing bucket state"));
                    };
                    *buckets = saved;
                }
                _ => {}
            }
            slot.warmup = state.warmup_status;
            slot.parent_latest = payload.parent_latest;
            slot.parent_has = payload.parent_has;
            slot.parent_latest_ts = payload.parent_latest_ts;
            slot.last_emit_ts = payload.last_emit_ts;
            slot.fresh.clear();
            slot.frame.truncate_after(envelope.as_of_ts);
        }
        self.leaf_clocks = envelope.leaf_clocks.clone();
        self.session_epoch = envelope.session_epoch;
        self.events_since_snapshot = 0;
        Ok(())
    }

    /// Amend history: restore the nearest snapshot before the first event
    /// and step forward across the range.
    pub fn replay(&mut self, events: &[Event]) -> Result<(), EngineError> {
        let Some(first) = events.first() else {
            return Ok(());
        };
        let anchor = self
            .snapshots
            .iter()
            .rev()
            .find(|envelope| envelope.as_of_ts < first.timestamp)
            .or_else(|| self.snapshots.first())
            .cloned()
            .ok_or_else(|| EvalError::internal("session has no snapshots to replay from"))?;
        self.restore(&anchor)?;
        let anchor_ts = anchor.as_of_ts;
        self.snapshots.retain(|envelope| envelope.as_of_ts <= anchor_ts);
        for event in events {
            self.step(event)?;
        }
        Ok(())
    }
}
