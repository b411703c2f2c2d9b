//! Compiled execution plan: the immutable, serializable product of planning.

use crate::kernels::KernelId;
use crate::types::{BinaryOp, Reducer, SourceKind, Timeframe, TypedParams, UnaryOp};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

pub const PLAN_SCHEMA_VERSION: u32 = 1;

/// Stable node identity: hex of the resolved-node signature hash.
pub type NodeId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlignmentPolicy {
    Inner,
    Ffill,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alignment {
    pub policy: AlignmentPolicy,
    pub timeframe: Timeframe,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DataRequirement {
    pub symbol: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub exchange: Option<String>,
    pub timeframe: Timeframe,
    pub source: SourceKind,
    pub field: String,
    pub min_bars: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelBinding {
    pub id: KernelId,
    pub params: TypedParams,
}

/// Restricted predicate over collection columns, compiled from filter IR.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum RowPredicate {
    Column { name: String },
    Const { value: f64 },
    Compare {
        cmp: BinaryOp,
        lhs: Box<RowPredicate>,
        rhs: Box<RowPredicate>,
    },
    Logic {
        logic: BinaryOp,
        lhs: Box<RowPredicate>,
        rhs: Box<RowPredicate>,
    },
    Not { child: Box<RowPredicate> },
}

impl RowPredicate {
    /// Evaluate against one collection row. Rows with NaN in a referenced
    /// column never match.
    pub fn matches(&self, lookup: &dyn Fn(&str) -> Option<f64>) -> bool {
        self.eval(lookup).unwrap_or(false)
    }

    fn eval(&self, lookup: &dyn Fn(&str) -> Option<f64>) -> Option<bool> {
        match self {
            Self::Column { .. } | Self::Const { .. } => None,
            Self::Compare { cmp, lhs, rhs } => {
                let lhs = lhs.numeric(lookup)?;
                let rhs = rhs.numeric(lookup)?;
                Some(match cmp {
                    BinaryOp::Eq => lhs == rhs,
                    BinaryOp::Ne => lhs != rhs,
                    BinaryOp::Lt => lhs < rhs,
                    BinaryOp::Le => lhs <= rhs,
                    BinaryOp::Gt => lhs > rhs,
                    BinaryOp::Ge => lhs >= rhs,
                    _ => return None,
                })
            }
            Self::Logic { logic, lhs, rhs } => {
                let lhs = lhs.eval(lookup)?;
                let rhs = rhs.eval(lookup)?;
                Some(match logic {
                    BinaryOp::And => lhs && rhs,
                    BinaryOp::Or => lhs || rhs,
                    _ => return None,
                })
            }
            Self::Not { child } => Some(!child.eval(lookup)?),
        }
    }

    fn numeric(&self, lookup: &dyn Fn(&str) -> Option<f64>) -> Option<f64> {
        match self {
            Self::Column { name } => {
                let value = lookup(name)?;
                value.is_finite().then_some(value)
            }
            Self::Const { value } => Some(*value),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum PlanNodeKind {
    Source {
        requirement: DataRequirement,
    },
    Constant {
        value: f64,
        boolean: bool,
    },
    Kernel {
        indicator: String,
        binding: KernelBinding,
    },
    Operator {
        op: BinaryOp,
    },
    UnaryOperator {
        op: UnaryOp,
    },
    Shift {
        bars: i64,
    },
    /// Fused filter chain + per-bar reduction over a tick collection.
    CollectionReduce {
        symbol: String,
        source: SourceKind,
        field: String,
        reducer: Reducer,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        predicate: Option<RowPredicate>,
        /// Reference bars the reduction must cover; the collection's data
        /// requirement.
        min_bars: usize,
    },
    Member {
        name: String,
        index: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputField {
    pub name: String,
    pub boolean: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanNode {
    pub node_id: NodeId,
    pub ir_hash: String,
    pub parents: Vec<NodeId>,
    #[serde(flatten)]
    pub kind: PlanNodeKind,
    pub output_schema: Vec<OutputField>,
    /// Bars of history before the current bar this node's subtree needs.
    pub lookback: usize,
    pub alignment: Alignment,
}

impl PlanNode {
    pub fn is_boolean(&self) -> bool {
        self.output_schema.len() == 1 && self.output_schema[0].boolean
    }
}

/// Which sources, fields, operators, and indicators a plan touches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilityManifest {
    pub sources: BTreeSet<String>,
    pub fields: BTreeSet<String>,
    pub operators: BTreeSet<String>,
    pub indicators: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub schema_version: u32,
    /// Topologically sorted: parents precede children.
    pub nodes: Vec<PlanNode>,
    /// Node ids of the requested expression roots, in request order.
    pub outputs: Vec<NodeId>,
    pub capability_manifest: CapabilityManifest,
    #[serde(skip)]
    index: HashMap<NodeId, usize>,
}

impl Plan {
    pub fn new(nodes: Vec<PlanNode>, outputs: Vec<NodeId>, manifest: CapabilityManifest) -> Self {
        let index = nodes
            .iter()
            .enumerate()
            .map(|(idx, node)| (node.node_id.clone(), idx))
            .collect();
        Self {
            schema_version: PLAN_SCHEMA_VERSION,
            nodes,
            outputs,
            capability_manifest: manifest,
            index,
        }
    }

    pub fn node(&self, id: &str) -> Option<&PlanNode> {
        self.index.get(id).map(|idx| &self.nodes[*idx])
    }

    pub fn node_index(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Total bars of history the plan needs before its first available
    /// output: the max lookback over the output roots.
    pub fn lookback(&self) -> usize {
        self.outputs
            .iter()
            .filter_map(|id| self.node(id))
            .map(|node| node.lookback)
            .max()
            .unwrap_or(0)
    }

    pub fn requirements(&self) -> Vec<DataRequirement> {
        let mut out: Vec<DataRequirement> = self
            .nodes
            .iter()
            .filter_map(|node| match &node.kind {
                PlanNodeKind::Source { requirement } => Some(requirement.clone()),
                PlanNodeKind::CollectionReduce {
                    symbol,
                    source,
                    field,
                    min_bars,
                    ..
                } => Some(DataRequirement {
                    symbol: symbol.clone(),
                    exchange: None,
                    timeframe: node.alignment.timeframe,
                    source: *source,
                    field: field.clone(),
                    min_bars: *min_bars,
                }),
                _ => None,
            })
            .collect();
        out.sort();
        out
    }

    /// Canonical JSON with sorted keys; byte-identical for identical plans.
    pub fn to_canonical_json(&self) -> String {
        serde_json::to_value(self)
            .expect("plan serialization is infallible")
            .to_string()
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        let mut plan: Plan = serde_json::from_str(raw)?;
        plan.index = plan
            .nodes
            .iter()
            .enumerate()
            .map(|(idx, node)| (node.node_id.clone(), idx))
            .collect();
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_predicate_evaluates_rows() {
        let predicate = RowPredicate::Logic {
            logic: BinaryOp::And,
            lhs: Box::new(RowPredicate::Compare {
                cmp: BinaryOp::Gt,
                lhs: Box::new(RowPredicate::Column {
                    name: "amount".to_string(),
                }),
                rhs: Box::new(RowPredicate::Const { value: 100.0 }),
            }),
            rhs: Box::new(RowPredicate::Not {
                child: Box::new(RowPredicate::Compare {
                    cmp: BinaryOp::Eq,
                    lhs: Box::new(RowPredicate::Column {
                        name: "side".to_string(),
                    }),
                    rhs: Box::new(RowPredicate::Const { value: -1.0 }),
                }),
            }),
        };
        let row = |amount: f64, side: f64| {
            move |name: &str| match name {
                "amount" => Some(amount),
                "side" => Some(side),
                _ => None,
            }
        };
        assert!(predicate.matches(&row(150.0, 1.0)));
        assert!(!predicate.matches(&row(150.0, -1.0)));
        assert!(!predicate.matches(&row(50.0, 1.0)));
        assert!(!predicate.matches(&row(f64::NAN, 1.0)));
    }

    #[test]
    fn plan_round_trips_through_json() {
        let tf = Timeframe::parse("1h", None).unwrap();
        let node = PlanNode {
            node_id: "abc123".to_string(),
            ir_hash: "ffee".to_string(),
            parents: vec![],
            kind: PlanNodeKind::Source {
                requirement: DataRequirement {
                    symbol: "BTC".to_string(),
                    exchange: None,
                    timeframe: tf,
                    source: SourceKind::Ohlcv,
                    field: "close".to_string(),
                    min_bars: 20,
                },
            },
            output_schema: vec![OutputField {
                name: "value".to_string(),
                boolean: false,
            }],
            lookback: 0,
            alignment: Alignment {
                policy: AlignmentPolicy::Inner,
                timeframe: tf,
            },
        };
        let plan = Plan::new(
            vec![node],
            vec!["abc123".to_string()],
            CapabilityManifest::default(),
        );
        let json = plan.to_canonical_json();
        let back = Plan::from_json(&json).unwrap();
        assert_eq!(plan, back);
        assert_eq!(json, back.to_canonical_json());
        assert!(back.node("abc123").is_some());
    }
}
