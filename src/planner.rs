//! Plan derivation: data requirements, lookback, alignment, and the
//! topologically ordered execution DAG.

use crate::catalog::{Binding, Catalog};
use crate::dataset::DatasetSchema;
use crate::error::{CompileError, EngineError, EvalError, PlanError};
use crate::ir::{Expr, Fnv64, Node};
use crate::kernels::binding_warmup_hint;
use crate::plan::{
    Alignment, AlignmentPolicy, CapabilityManifest, DataRequirement, KernelBinding, NodeId,
    OutputField, Plan, PlanNode, PlanNodeKind, RowPredicate,
};
use crate::types::{BinaryOp, Reducer, ShiftDelta, SourceKind, Timeframe, UnaryOp};
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanOptions {
    /// Join policy for cross-timeframe operands.
    pub alignment: AlignmentPolicy,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self {
            alignment: AlignmentPolicy::Inner,
        }
    }
}

pub fn plan(ir: &Node, schema: &DatasetSchema) -> Result<Plan, EngineError> {
    plan_with(ir, schema, PlanOptions::default())
}

/// Derive a plan from normalized, typechecked IR. Deterministic: the same
/// IR and schema produce byte-identical plan serializations.
pub fn plan_with(
    ir: &Node,
    schema: &DatasetSchema,
    options: PlanOptions,
) -> Result<Plan, EngineError> {
    let mut builder = Builder {
        schema,
        options,
        nodes: Vec::new(),
        info: Vec::new(),
        by_signature: HashMap::new(),
        manifest: CapabilityManifest::default(),
    };
    let root = builder.build(ir)?;
    if builder.info[root].is_collection {
        return Err(PlanError::AlignmentError {
            left: ir.describe(),
            right: "bar timeline".to_string(),
            reason: "a raw collection must be aggregated before evaluation".to_string(),
        }
        .into());
    }
    builder.check_for_cycles()?;
    builder.fill_min_bars(root);

    let outputs = vec![builder.nodes[root].node_id.clone()];
    let plan = Plan::new(builder.nodes, outputs, builder.manifest);
    debug!(
        nodes = plan.nodes.len(),
        lookback = plan.lookback(),
        "plan derived"
    );
    Ok(plan)
}

struct NodeInfo {
    own_lookback: usize,
    symbols: BTreeSet<String>,
    implicit_symbol: bool,
    is_collection: bool,
}

struct Builder<'a> {
    schema: &'a DatasetSchema,
    options: PlanOptions,
    nodes: Vec<PlanNode>,
    info: Vec<NodeInfo>,
    by_signature: HashMap<u64, usize>,
    manifest: CapabilityManifest,
}

impl<'a> Builder<'a> {
    fn build(&mut self, node: &Node) -> Result<usize, EngineError> {
        match &node.expr {
            Expr::Literal { value, .. } => {
                let boolean = matches!(value, crate::ir::LiteralValue::Bool(_));
                self.push(
                    node,
                    PlanNodeKind::Constant {
                        value: value.as_f64(),
                        boolean,
                    },
                    Vec::new(),
                    0,
                    self.fallback_timeframe(),
                    NodeInfo {
                        own_lookback: 0,
                        symbols: BTreeSet::new(),
                        implicit_symbol: false,
                        is_collection: false,
                    },
                    single_output(boolean),
                )
            }
            Expr::SourceRef {
                symbol,
                exchange,
                timeframe,
                source,
                field,
            } => self.build_source(node, symbol, exchange, *timeframe, *source, field),
            Expr::Call {
                indicator,
                params,
                inputs,
                ..
            } => {
                let meta =
                    Catalog::find(indicator).ok_or_else(|| CompileError::UnknownIndicator {
                        name: indicator.clone(),
                        span: node.span,
                    })?;
                let kernel_id = match meta.binding {
                    Binding::Kernel(id) => id,
                    Binding::SubDag(_) => {
                        return Err(EvalError::internal(format!(
                            "composite `{indicator}` reached the planner unexpanded"
                        ))
                        .into())
                    }
                };
                let parents = inputs
                    .iter()
                    .map(|input| self.build(input))
                    .collect::<Result<Vec<_>, _>>()?;
                self.check_symbol_compatibility(node, &parents)?;
                let own_lookback = binding_warmup_hint(kernel_id, params)
                    .map_err(EngineError::from)?
                    .lookback_bars();
                let timeframe = self.joined_timeframe(&parents);
                self.manifest.indicators.insert(meta.id.to_string());

                let outputs = meta
                    .outputs
                    .iter()
                    .map(|out| OutputField {
                        name: out.name.to_string(),
                        boolean: out.kind.is_boolean(),
                    })
                    .collect();
                let info = self.merged_info(&parents, own_lookback);
                self.push(
                    node,
                    PlanNodeKind::Kernel {
                        indicator: meta.id.to_string(),
                        binding: KernelBinding {
                            id: kernel_id,
                            params: params.clone(),
                        },
                    },
                    parents,
                    own_lookback,
                    timeframe,
                    info,
                    outputs,
                )
            }
            Expr::BinaryOp { op, lhs, rhs } => {
                let parents = vec![self.build(lhs)?, self.build(rhs)?];
                self.check_symbol_compatibility(node, &parents)?;
                let timeframe = self.joined_timeframe(&parents);
                self.manifest.operators.insert(op.as_str().to_string());
                let boolean = op.is_comparison() || op.is_logical();
                let info = self.merged_info(&parents, 0);
                self.push(
                    node,
                    PlanNodeKind::Operator { op: *op },
                    parents,
                    0,
                    timeframe,
                    info,
                    single_output(boolean),
                )
            }
            Expr::UnaryOp { op, child } => {
                let parents = vec![self.build(child)?];
                let timeframe = self.joined_timeframe(&parents);
                self.manifest.operators.insert(
                    match op {
                        UnaryOp::Neg => "neg",
                        UnaryOp::Not => "not",
                    }
                    .to_string(),
                );
                let boolean = matches!(op, UnaryOp::Not);
                let info = self.merged_info(&parents, 0);
                self.push(
                    node,
                    PlanNodeKind::UnaryOperator { op: *op },
                    parents,
                    0,
                    timeframe,
                    info,
                    single_output(boolean),
                )
            }
            Expr::TimeShift { child, delta } => {
                let parents = vec![self.build(child)?];
                let timeframe = self.joined_timeframe(&parents);
                let bars = self.shift_bars(node, *delta, timeframe)?;
                let boolean = self.nodes[parents[0]].is_boolean();
                let info = self.merged_info(&parents, bars as usize);
                self.push(
                    node,
                    PlanNodeKind::Shift { bars },
                    parents,
                    bars as usize,
                    timeframe,
                    info,
                    single_output(boolean),
                )
            }
            Expr::Filter { .. } => Err(PlanError::AlignmentError {
                left: node.describe(),
                right: "bar timeline".to_string(),
                reason: "a filtered collection must be aggregated before evaluation".to_string(),
            }
            .into()),
            Expr::Aggregate {
                collection,
                field,
                reducer,
            } => self.build_aggregate(node, collection, field, *reducer),
            Expr::MemberAccess { child, name } => {
                let parents = vec![self.build(child)?];
                let parent = &self.nodes[parents[0]];
                let Some(index) = parent
                    .output_schema
                    .iter()
                    .position(|out| out.name == *name)
                else {
                    return Err(CompileError::TypeMismatch {
                        node: node.describe(),
                        expected: "a declared output name".to_string(),
                        actual: format!("`{name}`"),
                        span: node.span,
                    }
                    .into());
                };
                let boolean = parent.output_schema[index].boolean;
                let timeframe = parent.alignment.timeframe;
                let name = name.clone();
                let info = self.merged_info(&parents, 0);
                self.push(
                    node,
                    PlanNodeKind::Member { name, index },
                    parents,
                    0,
                    timeframe,
                    info,
                    single_output(boolean),
                )
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn build_source(
        &mut self,
        node: &Node,
        symbol: &Option<String>,
        exchange: &Option<String>,
        timeframe: Option<Timeframe>,
        source: SourceKind,
        field: &Option<String>,
    ) -> Result<usize, EngineError> {
        let (resolved_symbol, implicit) = self.resolve_symbol(node, symbol)?;

        if !source.is_candle() {
            if field.is_some() {
                return Err(PlanError::AlignmentError {
                    left: node.describe(),
                    right: "bar timeline".to_string(),
                    reason: "tick columns must be reduced with filter/aggregate".to_string(),
                }
                .into());
            }
            // Bare collection: a marker node consumed by CollectionReduce.
            let info = NodeInfo {
                own_lookback: 0,
                symbols: BTreeSet::from([resolved_symbol.clone()]),
                implicit_symbol: implicit,
                is_collection: true,
            };
            let timeframe = self.reference_timeframe(&resolved_symbol)?;
            self.manifest.sources.insert(source.as_str().to_string());
            return self.push(
                node,
                PlanNodeKind::Source {
                    requirement: DataRequirement {
                        symbol: resolved_symbol,
                        exchange: exchange.clone(),
                        timeframe,
                        source,
                        field: String::new(),
                        min_bars: 0,
                    },
                },
                Vec::new(),
                0,
                timeframe,
                info,
                single_output(false),
            );
        }

        let field = field.clone().unwrap_or_else(|| "close".to_string());
        let timeframe = match timeframe {
            Some(tf) => tf,
            None => self.reference_timeframe(&resolved_symbol)?,
        };
        self.manifest.sources.insert(source.as_str().to_string());
        self.manifest.fields.insert(field.clone());
        let info = NodeInfo {
            own_lookback: 0,
            symbols: BTreeSet::from([resolved_symbol.clone()]),
            implicit_symbol: implicit,
            is_collection: false,
        };
        self.push(
            node,
            PlanNodeKind::Source {
                requirement: DataRequirement {
                    symbol: resolved_symbol,
                    exchange: exchange.clone(),
                    timeframe,
                    source,
                    field,
                    min_bars: 0,
                },
            },
            Vec::new(),
            0,
            timeframe,
            info,
            single_output(false),
        )
    }

    fn build_aggregate(
        &mut self,
        node: &Node,
        collection: &Node,
        field: &str,
        reducer: Reducer,
    ) -> Result<usize, EngineError> {
        // Fuse Filter chains into one reduction node.
        let mut predicates: Vec<RowPredicate> = Vec::new();
        let mut base = collection;
        loop {
            match &base.expr {
                Expr::Filter {
                    collection: inner,
                    predicate,
                } => {
                    predicates.push(compile_predicate(predicate)?);
                    base = inner;
                }
                Expr::SourceRef { .. } => break,
                _ => {
                    return Err(PlanError::AlignmentError {
                        left: base.describe(),
                        right: node.describe(),
                        reason: "aggregate expects a (filtered) collection reference".to_string(),
                    }
                    .into())
                }
            }
        }
        let Expr::SourceRef {
            symbol, source, ..
        } = &base.expr
        else {
            unreachable!("loop breaks only on SourceRef");
        };
        let (resolved_symbol, implicit) = self.resolve_symbol(base, symbol)?;
        let timeframe = self.reference_timeframe(&resolved_symbol)?;

        // Filters apply innermost first; conjoin in application order.
        let predicate = predicates.into_iter().rev().reduce(|lhs, rhs| {
            RowPredicate::Logic {
                logic: BinaryOp::And,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            }
        });

        self.manifest.sources.insert(source.as_str().to_string());
        self.manifest.fields.insert(field.to_string());
        self.manifest
            .operators
            .insert(format!("aggregate:{}", reducer.as_str()));

        let info = NodeInfo {
            own_lookback: 0,
            symbols: BTreeSet::from([resolved_symbol.clone()]),
            implicit_symbol: implicit,
            is_collection: false,
        };
        self.push(
            node,
            PlanNodeKind::CollectionReduce {
                symbol: resolved_symbol,
                source: *source,
                field: field.to_string(),
                reducer,
                predicate,
                min_bars: 0,
            },
            Vec::new(),
            0,
            timeframe,
            info,
            single_output(false),
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn push(
        &mut self,
        ir_node: &Node,
        kind: PlanNodeKind,
        parents: Vec<usize>,
        own_lookback: usize,
        timeframe: Timeframe,
        info: NodeInfo,
        output_schema: Vec<OutputField>,
    ) -> Result<usize, EngineError> {
        let parent_ids: Vec<NodeId> = parents
            .iter()
            .map(|idx| self.nodes[*idx].node_id.clone())
            .collect();
        let signature = signature_hash(&kind, &parent_ids);
        if let Some(existing) = self.by_signature.get(&signature) {
            return Ok(*existing);
        }

        let lookback = own_lookback
            + parents
                .iter()
                .map(|idx| self.nodes[*idx].lookback)
                .max()
                .unwrap_or(0);
        let node = PlanNode {
            node_id: format!("{signature:016x}"),
            ir_hash: format!("{:016x}", ir_node.structural_hash()),
            parents: parent_ids,
            kind,
            output_schema,
            lookback,
            alignment: Alignment {
                policy: self.options.alignment,
                timeframe,
            },
        };
        let idx = self.nodes.len();
        self.nodes.push(node);
        self.info.push(info);
        self.by_signature.insert(signature, idx);
        Ok(idx)
    }

    fn resolve_symbol(
        &self,
        node: &Node,
        symbol: &Option<String>,
    ) -> Result<(String, bool), EngineError> {
        if let Some(symbol) = symbol {
            return Ok((symbol.clone(), false));
        }
        match self.schema.sole_symbol() {
            Some(symbol) => Ok((symbol.to_string(), true)),
            None => Err(PlanError::AlignmentError {
                left: node.describe(),
                right: "dataset".to_string(),
                reason: "symbol is ambiguous; qualify the reference".to_string(),
            }
            .into()),
        }
    }

    fn reference_timeframe(&self, symbol: &str) -> Result<Timeframe, EngineError> {
        self.schema
            .finest_candle_timeframe(symbol)
            .ok_or_else(|| {
                PlanError::MissingData {
                    symbol: symbol.to_string(),
                    timeframe: "any".to_string(),
                    source_name: SourceKind::Ohlcv.as_str().to_string(),
                    field: "close".to_string(),
                    have_bars: 0,
                    need_bars: 1,
                }
                .into()
            })
    }

    fn fallback_timeframe(&self) -> Timeframe {
        self.schema
            .series
            .keys()
            .filter(|entry| entry.source.is_candle())
            .map(|entry| entry.timeframe)
            .min()
            .unwrap_or(Timeframe::from_secs(60))
    }

    /// Output timeline of a join: the finest timeframe among the inputs.
    fn joined_timeframe(&self, parents: &[usize]) -> Timeframe {
        parents
            .iter()
            .map(|idx| self.nodes[*idx].alignment.timeframe)
            .min()
            .unwrap_or_else(|| self.fallback_timeframe())
    }

    fn merged_info(&self, parents: &[usize], own_lookback: usize) -> NodeInfo {
        let mut symbols = BTreeSet::new();
        let mut implicit_symbol = false;
        for idx in parents {
            symbols.extend(self.info[*idx].symbols.iter().cloned());
            implicit_symbol |= self.info[*idx].implicit_symbol;
        }
        NodeInfo {
            own_lookback,
            symbols,
            implicit_symbol,
            is_collection: false,
        }
    }

    fn check_symbol_compatibility(
        &self,
        node: &Node,
        parents: &[usize],
    ) -> Result<(), EngineError> {
        let mut symbols = BTreeSet::new();
        let mut implicit = false;
        for idx in parents {
            symbols.extend(self.info[*idx].symbols.iter().cloned());
            implicit |= self.info[*idx].implicit_symbol;
        }
        if symbols.len() > 1 && implicit {
            let mut names = symbols.into_iter();
            return Err(PlanError::AlignmentError {
                left: names.next().unwrap_or_default(),
                right: names.next().unwrap_or_default(),
                reason: format!(
                    "operands of {} mix symbols without explicit selectors",
                    node.describe()
                ),
            }
            .into());
        }
        Ok(())
    }

    fn shift_bars(
        &self,
        node: &Node,
        delta: ShiftDelta,
        timeframe: Timeframe,
    ) -> Result<i64, EngineError> {
        let bars = match delta {
            ShiftDelta::Bars(bars) => bars,
            ShiftDelta::Nanos(nanos) => {
                let per_bar = timeframe.nanos();
                if per_bar == 0 || nanos % per_bar != 0 {
                    return Err(PlanError::AlignmentError {
                        left: node.describe(),
                        right: timeframe.to_string(),
                        reason: format!("shift of {nanos}ns is not a whole number of bars"),
                    }
                    .into());
                }
                nanos / per_bar
            }
        };
        if bars < 0 {
            return Err(PlanError::AlignmentError {
                left: node.describe(),
                right: timeframe.to_string(),
                reason: "shift into the future is not allowed".to_string(),
            }
            .into());
        }
        Ok(bars)
    }

    fn check_for_cycles(&self) -> Result<(), EngineError> {
        let mut graph: DiGraph<usize, ()> = DiGraph::new();
        let indices: Vec<_> = (0..self.nodes.len())
            .map(|idx| graph.add_node(idx))
            .collect();
        for (idx, node) in self.nodes.iter().enumerate() {
            for parent in &node.parents {
                let parent_idx = self
                    .nodes
                    .iter()
                    .position(|n| n.node_id == *parent)
                    .expect("parents reference built nodes");
                graph.add_edge(indices[parent_idx], indices[idx], ());
            }
        }
        toposort(&graph, None).map_err(|cycle| {
            let offender = self.nodes[graph[cycle.node_id()]].node_id.clone();
            EngineError::from(PlanError::CycleError {
                cycle: vec![offender],
            })
        })?;
        Ok(())
    }

    /// Reverse-topological demand pass: how many bars each leaf must supply
    /// so the dependent subgraph can emit its first available output.
    fn fill_min_bars(&mut self, root: usize) {
        let mut demand = vec![0usize; self.nodes.len()];
        demand[root] = 0;
        let id_to_idx: HashMap<String, usize> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(idx, node)| (node.node_id.clone(), idx))
            .collect();
        for idx in (0..self.nodes.len()).rev() {
            let inherited = demand[idx] + self.info[idx].own_lookback;
            for parent in self.nodes[idx].parents.clone() {
                let parent_idx = id_to_idx[&parent];
                demand[parent_idx] = demand[parent_idx].max(inherited);
            }
        }
        for (idx, node) in self.nodes.iter_mut().enumerate() {
            let bars = demand[idx] + 1;
            match &mut node.kind {
                PlanNodeKind::Source { requirement } => requirement.min_bars = bars,
                PlanNodeKind::CollectionReduce { min_bars, .. } => *min_bars = bars,
                _ => {}
            }
        }
    }
}

fn single_output(boolean: bool) -> Vec<OutputField> {
    vec![OutputField {
        name: "value".to_string(),
        boolean,
    }]
}

fn signature_hash(kind: &PlanNodeKind, parents: &[NodeId]) -> u64 {
    let mut hasher = Fnv64::new();
    let payload = serde_json::to_value(kind)
        .expect("plan node kinds serialize infallibly")
        .to_string();
    hasher.write_str(&payload);
    hasher.write_u64(parents.len() as u64);
    for parent in parents {
        hasher.write_str(parent);
    }
    hasher.finish()
}

/// Compile a normalized, typechecked filter predicate into the restricted
/// row form: comparisons and logic over collection columns and constants.
fn compile_predicate(node: &Node) -> Result<RowPredicate, EngineError> {
    match &node.expr {
        Expr::Literal { value, .. } => Ok(RowPredicate::Const {
            value: value.as_f64(),
        }),
        Expr::SourceRef { field, .. } => {
            let Some(field) = field else {
                return Err(predicate_error(node, "a column reference needs a field"));
            };
            Ok(RowPredicate::Column {
                name: field.clone(),
            })
        }
        Expr::BinaryOp { op, lhs, rhs } => {
            let lhs = Box::new(compile_predicate(lhs)?);
            let rhs = Box::new(compile_predicate(rhs)?);
            if op.is_comparison() {
                Ok(RowPredicate::Compare { cmp: *op, lhs, rhs })
            } else if op.is_logical() {
                Ok(RowPredicate::Logic {
                    logic: *op,
                    lhs,
                    rhs,
                })
            } else {
                Err(predicate_error(
                    node,
                    "arithmetic inside filter predicates is not supported",
                ))
            }
        }
        Expr::UnaryOp {
            op: UnaryOp::Not,
            child,
        } => Ok(RowPredicate::Not {
            child: Box::new(compile_predicate(child)?),
        }),
        _ => Err(predicate_error(
            node,
            "filter predicates are comparisons over collection columns",
        )),
    }
}

fn predicate_error(node: &Node, reason: &str) -> EngineError {
    PlanError::AlignmentError {
        left: node.describe(),
        right: "row predicate".to_string(),
        reason: reason.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Dataset, SeriesKey};
    use crate::normalize::normalize;
    use crate::parse::parse;
    use crate::series::{Collection, Series};
    use crate::typecheck::typecheck;

    fn tf(raw: &str) -> Timeframe {
        Timeframe::parse(raw, None).unwrap()
    }

    fn schema_with_candles(bars: usize) -> DatasetSchema {
        let mut dataset = Dataset::new();
        let key = SeriesKey::candles("BTC", tf("1h"));
        let timestamps: Vec<i64> = (0..bars as i64).map(|i| i * 3_600_000_000_000).collect();
        for field in ["open", "high", "low", "close", "volume"] {
            dataset.insert_series(
                key.clone(),
                Series::from_values(
                    timestamps.clone(),
                    timestamps.iter().map(|v| *v as f64).collect(),
                    "BTC",
                    tf("1h"),
                    SourceKind::Ohlcv,
                    field,
                ),
            );
        }
        let mut trades = Collection::new("BTC", SourceKind::Trades);
        trades.push_row(0, &[("price", 100.0), ("amount", 10.0)]);
        dataset.insert_collection(trades);
        dataset.schema()
    }

    fn compile(source: &str, schema: &DatasetSchema) -> Plan {
        let ir = typecheck(&normalize(&parse(source).unwrap()).unwrap()).unwrap();
        plan(&ir, schema).unwrap()
    }

    #[test]
    fn sma_plan_records_requirement_and_lookback() {
        let schema = schema_with_candles(100);
        let plan = compile("sma(close, period=5)", &schema);
        assert_eq!(plan.lookback(), 4);
        let reqs = plan.requirements();
        assert_eq!(reqs.len(), 1);
        assert_eq!(reqs[0].field, "close");
        assert_eq!(reqs[0].min_bars, 5);
        assert_eq!(reqs[0].symbol, "BTC");
    }

    #[test]
    fn nested_lookbacks_chain() {
        let schema = schema_with_candles(100);
        let plan = compile("sma(sma(close, 3), 3)", &schema);
        assert_eq!(plan.lookback(), 4);
        assert_eq!(plan.requirements()[0].min_bars, 5);
    }

    #[test]
    fn shared_subexpressions_plan_once() {
        let schema = schema_with_candles(100);
        let plan = compile("sma(close, 20) - sma(close, 20)", &schema);
        let kernel_nodes = plan
            .nodes
            .iter()
            .filter(|node| matches!(node.kind, PlanNodeKind::Kernel { .. }))
            .count();
        assert_eq!(kernel_nodes, 1, "CSE should fold identical calls");
    }

    #[test]
    fn plans_are_deterministic() {
        let schema = schema_with_candles(100);
        let first = compile("crossup(sma(close, 20), sma(close, 50))", &schema);
        let second = compile("crossup(sma(close, 20), sma(close, 50))", &schema);
        assert_eq!(first.to_canonical_json(), second.to_canonical_json());
    }

    #[test]
    fn macd_composite_lookback_includes_signal() {
        let schema = schema_with_candles(100);
        let plan = compile("macd(close, 12, 26, 9)", &schema);
        assert_eq!(plan.lookback(), 33);
    }

    #[test]
    fn trades_aggregate_plans_a_collection_reduce() {
        let schema = schema_with_candles(100);
        let plan = compile(
            "sma(BTC.trades.filter(amount > 1_000_000).sum(amount), period=5)",
            &schema,
        );
        let reduce = plan
            .nodes
            .iter()
            .find_map(|node| match &node.kind {
                PlanNodeKind::CollectionReduce {
                    source,
                    field,
                    predicate,
                    ..
                } => Some((source, field, predicate)),
                _ => None,
            })
            .expect("plan should contain a collection reduction");
        assert_eq!(*reduce.0, SourceKind::Trades);
        assert_eq!(reduce.1, "amount");
        assert!(reduce.2.is_some());
        let reqs = plan.requirements();
        let trades_req = reqs
            .iter()
            .find(|req| req.source == SourceKind::Trades)
            .expect("trades requirement recorded");
        assert_eq!(trades_req.min_bars, 5);
        assert_eq!(trades_req.field, "amount");
    }

    #[test]
    fn capability_manifest_lists_usage() {
        let schema = schema_with_candles(100);
        let plan = compile("rsi(close, 14) > 70", &schema);
        assert!(plan.capability_manifest.indicators.contains("rsi"));
        assert!(plan.capability_manifest.operators.contains(">"));
        assert!(plan.capability_manifest.sources.contains("ohlcv"));
        assert!(plan.capability_manifest.fields.contains("close"));
    }

    #[test]
    fn ambiguous_symbol_is_an_alignment_error() {
        let mut dataset = Dataset::new();
        for symbol in ["BTC", "ETH"] {
            dataset.insert_series(
                SeriesKey::candles(symbol, tf("1h")),
                Series::from_values(
                    vec![0],
                    vec![1.0],
                    symbol,
                    tf("1h"),
                    SourceKind::Ohlcv,
                    "close",
                ),
            );
        }
        let schema = dataset.schema();
        let ir = typecheck(&normalize(&parse("sma(close, 5)").unwrap()).unwrap()).unwrap();
        let err = plan(&ir, &schema).unwrap_err();
        assert_eq!(err.kind(), "AlignmentError");
    }

    #[test]
    fn empty_schema_cannot_resolve_symbol() {
        let schema = DatasetSchema::default();
        let ir = typecheck(&normalize(&parse("sma(close, 5)").unwrap()).unwrap()).unwrap();
        let err = plan(&ir, &schema).unwrap_err();
        assert_eq!(err.kind(), "AlignmentError");
    }
}
