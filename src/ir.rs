//! Canonical expression IR.
//!
//! Every frontend (text DSL, programmatic builder, JSON) lowers to this one
//! node algebra. Nodes are value types: structural equality ignores spans
//! and cached type tags, and structurally equal nodes share one stable
//! 64-bit hash, which drives CSE and plan caching.

use crate::error::CompileError;
use crate::types::{
    BinaryOp, ParamValue, Reducer, ScalarKind, ShiftDelta, SourceKind, Span, Timeframe, TypeTag,
    UnaryOp,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LiteralValue {
    Bool(bool),
    Int(i64),
    Number(f64),
}

impl LiteralValue {
    pub fn kind(self) -> ScalarKind {
        match self {
            Self::Number(_) => ScalarKind::Number,
            Self::Int(_) => ScalarKind::Int,
            Self::Bool(_) => ScalarKind::Bool,
        }
    }

    pub fn as_f64(self) -> f64 {
        match self {
            Self::Number(v) => v,
            Self::Int(v) => v as f64,
            Self::Bool(v) => {
                if v {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Expr {
    Literal {
        value: LiteralValue,
        kind: ScalarKind,
    },
    SourceRef {
        #[serde(skip_serializing_if = "Option::is_none", default)]
        symbol: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        exchange: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        timeframe: Option<Timeframe>,
        source: SourceKind,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        field: Option<String>,
    },
    Call {
        indicator: String,
        #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
        params: BTreeMap<String, ParamValue>,
        /// Scalar args not yet bound to parameter names; emptied by the
        /// positional-to-named normalize pass.
        #[serde(skip_serializing_if = "Vec::is_empty", default)]
        positional: Vec<ParamValue>,
        #[serde(skip_serializing_if = "Vec::is_empty", default)]
        inputs: Vec<Node>,
    },
    BinaryOp {
        op: BinaryOp,
        lhs: Box<Node>,
        rhs: Box<Node>,
    },
    UnaryOp {
        op: UnaryOp,
        child: Box<Node>,
    },
    TimeShift {
        child: Box<Node>,
        delta: ShiftDelta,
    },
    Filter {
        collection: Box<Node>,
        predicate: Box<Node>,
    },
    Aggregate {
        collection: Box<Node>,
        field: String,
        reducer: Reducer,
    },
    MemberAccess {
        child: Box<Node>,
        name: String,
    },
}

/// One IR node: the expression variant plus diagnostic span and the type tag
/// cached by the typechecker. Span and type are excluded from structural
/// equality and hashing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    #[serde(flatten)]
    pub expr: Expr,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub span: Option<Span>,
    #[serde(rename = "type_tag", skip_serializing_if = "Option::is_none", default)]
    pub ty: Option<TypeTag>,
}

impl Node {
    pub fn new(expr: Expr) -> Self {
        Self {
            expr,
            span: None,
            ty: None,
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn literal(value: LiteralValue) -> Self {
        Self::new(Expr::Literal {
            kind: value.kind(),
            value,
        })
    }

    pub fn number(value: f64) -> Self {
        Self::literal(LiteralValue::Number(value))
    }

    pub fn int(value: i64) -> Self {
        Self::literal(LiteralValue::Int(value))
    }

    pub fn boolean(value: bool) -> Self {
        Self::literal(LiteralValue::Bool(value))
    }

    /// Bare field reference; symbol/source/timeframe resolved by normalize.
    pub fn field(field: impl Into<String>) -> Self {
        Self::new(Expr::SourceRef {
            symbol: None,
            exchange: None,
            timeframe: None,
            source: SourceKind::Ohlcv,
            field: Some(field.into()),
        })
    }

    pub fn collection_ref(symbol: impl Into<String>, source: SourceKind) -> Self {
        Self::new(Expr::SourceRef {
            symbol: Some(symbol.into()),
            exchange: None,
            timeframe: None,
            source,
            field: None,
        })
    }

    pub fn call(indicator: impl Into<String>, inputs: Vec<Node>) -> Self {
        Self::new(Expr::Call {
            indicator: indicator.into(),
            params: BTreeMap::new(),
            positional: Vec::new(),
            inputs,
        })
    }

    pub fn call_with(
        indicator: impl Into<String>,
        inputs: Vec<Node>,
        params: impl IntoIterator<Item = (&'static str, ParamValue)>,
    ) -> Self {
        Self::new(Expr::Call {
            indicator: indicator.into(),
            params: params
                .into_iter()
                .map(|(name, value)| (name.to_string(), value))
                .collect(),
            positional: Vec::new(),
            inputs,
        })
    }

    pub fn binary(op: BinaryOp, lhs: Node, rhs: Node) -> Self {
        Self::new(Expr::BinaryOp {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    pub fn unary(op: UnaryOp, child: Node) -> Self {
        Self::new(Expr::UnaryOp {
            op,
            child: Box::new(child),
        })
    }

    pub fn shift(child: Node, delta: ShiftDelta) -> Self {
        Self::new(Expr::TimeShift {
            child: Box::new(child),
            delta,
        })
    }

    pub fn filter(collection: Node, predicate: Node) -> Self {
        Self::new(Expr::Filter {
            collection: Box::new(collection),
            predicate: Box::new(predicate),
        })
    }

    pub fn aggregate(collection: Node, field: impl Into<String>, reducer: Reducer) -> Self {
        Self::new(Expr::Aggregate {
            collection: Box::new(collection),
            field: field.into(),
            reducer,
        })
    }

    pub fn member(child: Node, name: impl Into<String>) -> Self {
        Self::new(Expr::MemberAccess {
            child: Box::new(child),
            name: name.into(),
        })
    }

    /// Short label for diagnostics, e.g. `Call(sma)` or `BinaryOp(+)`.
    pub fn describe(&self) -> String {
        match &self.expr {
            Expr::Literal { value, .. } => format!("Literal({value:?})"),
            Expr::SourceRef { source, field, .. } => match field {
                Some(field) => format!("SourceRef({source}.{field})"),
                None => format!("SourceRef({source})"),
            },
            Expr::Call { indicator, .. } => format!("Call({indicator})"),
            Expr::BinaryOp { op, .. } => format!("BinaryOp({})", op.as_str()),
            Expr::UnaryOp { op, .. } => format!("UnaryOp({op:?})"),
            Expr::TimeShift { .. } => "TimeShift".to_string(),
            Expr::Filter { .. } => "Filter".to_string(),
            Expr::Aggregate { reducer, .. } => format!("Aggregate({})", reducer.as_str()),
            Expr::MemberAccess { name, .. } => format!("MemberAccess({name})"),
        }
    }

    pub fn children(&self) -> Vec<&Node> {
        match &self.expr {
            Expr::Literal { .. } | Expr::SourceRef { .. } => Vec::new(),
            Expr::Call { inputs, .. } => inputs.iter().collect(),
            Expr::BinaryOp { lhs, rhs, .. } => vec![lhs, rhs],
            Expr::UnaryOp { child, .. }
            | Expr::TimeShift { child, .. }
            | Expr::MemberAccess { child, .. } => vec![child],
            Expr::Filter {
                collection,
                predicate,
            } => vec![collection, predicate],
            Expr::Aggregate { collection, .. } => vec![collection],
        }
    }

    pub fn children_mut(&mut self) -> Vec<&mut Node> {
        match &mut self.expr {
            Expr::Literal { .. } | Expr::SourceRef { .. } => Vec::new(),
            Expr::Call { inputs, .. } => inputs.iter_mut().collect(),
            Expr::BinaryOp { lhs, rhs, .. } => vec![lhs, rhs],
            Expr::UnaryOp { child, .. }
            | Expr::TimeShift { child, .. }
            | Expr::MemberAccess { child, .. } => vec![child],
            Expr::Filter {
                collection,
                predicate,
            } => vec![collection, predicate],
            Expr::Aggregate { collection, .. } => vec![collection],
        }
    }

    /// Stable 64-bit structural hash, ignoring spans and cached types.
    pub fn structural_hash(&self) -> u64 {
        let mut hasher = Fnv64::new();
        hash_node(self, &mut hasher);
        hasher.finish()
    }

    /// Structural equality: same shape and payload, spans/types ignored.
    pub fn structural_eq(&self, other: &Node) -> bool {
        // Hash collisions are possible in principle; compare canonical
        // encodings when hashes agree.
        self.structural_hash() == other.structural_hash()
            && strip_meta(self) == strip_meta(other)
    }

    /// Canonical JSON: tagged-union objects with sorted keys.
    pub fn to_canonical_json(&self) -> String {
        let value = serde_json::to_value(self).expect("IR serialization is infallible");
        value.to_string()
    }

    pub fn from_json(raw: &str) -> Result<Node, CompileError> {
        serde_json::from_str(raw).map_err(|err| CompileError::Parse {
            message: format!("invalid IR JSON: {err}"),
            span: None,
        })
    }
}

fn strip_meta(node: &Node) -> Node {
    let mut out = node.clone();
    fn walk(node: &mut Node) {
        node.span = None;
        node.ty = None;
        for child in node.children_mut() {
            walk(child);
        }
    }
    walk(&mut out);
    out
}

/// FNV-1a, 64-bit. Deterministic across runs and platforms, which `node_id`
/// stability and byte-identical plan serialization require.
#[derive(Debug, Clone)]
pub(crate) struct Fnv64 {
    state: u64,
}

impl Fnv64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    pub(crate) fn new() -> Self {
        Self {
            state: Self::OFFSET,
        }
    }

    #[inline]
    pub(crate) fn write(&mut self, bytes: &[u8]) {
        for byte in bytes {
            self.state ^= u64::from(*byte);
            self.state = self.state.wrapping_mul(Self::PRIME);
        }
    }

    #[inline]
    pub(crate) fn write_u8(&mut self, value: u8) {
        self.write(&[value]);
    }

    #[inline]
    pub(crate) fn write_u64(&mut self, value: u64) {
        self.write(&value.to_le_bytes());
    }

    #[inline]
    pub(crate) fn write_str(&mut self, value: &str) {
        self.write_u64(value.len() as u64);
        self.write(value.as_bytes());
    }

    pub(crate) fn finish(&self) -> u64 {
        self.state
    }
}

fn hash_node(node: &Node, h: &mut Fnv64) {
    match &node.expr {
        Expr::Literal { value, .. } => {
            h.write_u8(0);
            match value {
                LiteralValue::Number(v) => {
                    h.write_u8(0);
                    h.write_u64(v.to_bits());
                }
                LiteralValue::Int(v) => {
                    h.write_u8(1);
                    h.write_u64(*v as u64);
                }
                LiteralValue::Bool(v) => {
                    h.write_u8(2);
                    h.write_u8(u8::from(*v));
                }
            }
        }
        Expr::SourceRef {
            symbol,
            exchange,
            timeframe,
            source,
            field,
        } => {
            h.write_u8(1);
            h.write_str(symbol.as_deref().unwrap_or(""));
            h.write_str(exchange.as_deref().unwrap_or(""));
            h.write_u64(timeframe.map(Timeframe::secs).unwrap_or(0));
            h.write_str(source.as_str());
            h.write_str(field.as_deref().unwrap_or(""));
        }
        Expr::Call {
            indicator,
            params,
            positional,
            inputs,
        } => {
            h.write_u8(2);
            h.write_str(indicator);
            h.write_u64(params.len() as u64);
            for (name, value) in params {
                h.write_str(name);
                hash_param(value, h);
            }
            h.write_u64(positional.len() as u64);
            for value in positional {
                hash_param(value, h);
            }
            h.write_u64(inputs.len() as u64);
            for input in inputs {
                hash_node(input, h);
            }
        }
        Expr::BinaryOp { op, lhs, rhs } => {
            h.write_u8(3);
            h.write_str(op.as_str());
            hash_node(lhs, h);
            hash_node(rhs, h);
        }
        Expr::UnaryOp { op, child } => {
            h.write_u8(4);
            h.write_u8(match op {
                UnaryOp::Neg => 0,
                UnaryOp::Not => 1,
            });
            hash_node(child, h);
        }
        Expr::TimeShift { child, delta } => {
            h.write_u8(5);
            match delta {
                ShiftDelta::Bars(n) => {
                    h.write_u8(0);
                    h.write_u64(*n as u64);
                }
                ShiftDelta::Nanos(n) => {
                    h.write_u8(1);
                    h.write_u64(*n as u64);
                }
            }
            hash_node(child, h);
        }
        Expr::Filter {
            collection,
            predicate,
        } => {
            h.write_u8(6);
            hash_node(collection, h);
            hash_node(predicate, h);
        }
        Expr::Aggregate {
            collection,
            field,
            reducer,
        } => {
            h.write_u8(7);
            h.write_str(field);
            h.write_str(reducer.as_str());
            hash_node(collection, h);
        }
        Expr::MemberAccess { child, name } => {
            h.write_u8(8);
            h.write_str(name);
            hash_node(child, h);
        }
    }
}

fn hash_param(value: &ParamValue, h: &mut Fnv64) {
    match value {
        ParamValue::Int(v) => {
            h.write_u8(0);
            h.write_u64(*v as u64);
        }
        ParamValue::Float(v) => {
            h.write_u8(1);
            h.write_u64(v.to_bits());
        }
        ParamValue::Bool(v) => {
            h.write_u8(2);
            h.write_u8(u8::from(*v));
        }
        ParamValue::Text(v) => {
            h.write_u8(3);
            h.write_str(v);
        }
    }
}
