use crate::error::CompileError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Byte-offset pair into the expression source, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: u32,
    pub end: u32,
}

impl Span {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Ohlcv,
    Trades,
    Orderbook,
    Liquidation,
}

impl SourceKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ohlcv => "ohlcv",
            Self::Trades => "trades",
            Self::Orderbook => "orderbook",
            Self::Liquidation => "liquidation",
        }
    }

    /// Whether series of this source are bar-aligned (vs raw tick collections).
    pub const fn is_candle(self) -> bool {
        matches!(self, Self::Ohlcv)
    }

    pub fn parse(raw: &str, span: Option<Span>) -> Result<Self, CompileError> {
        match raw {
            "ohlcv" => Ok(Self::Ohlcv),
            "trades" => Ok(Self::Trades),
            "orderbook" => Ok(Self::Orderbook),
            "liquidation" | "liquidations" => Ok(Self::Liquidation),
            _ => Err(CompileError::UnknownSource {
                source_name: raw.to_string(),
                span,
            }),
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bar duration, parsed from the compact `"30s" | "5m" | "1h" | "1d"` form.
///
/// Ordering is by duration, so "finest timeframe" is the minimum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Timeframe {
    secs: u64,
}

impl Timeframe {
    pub const fn from_secs(secs: u64) -> Self {
        Self { secs }
    }

    pub const fn secs(self) -> u64 {
        self.secs
    }

    pub const fn nanos(self) -> i64 {
        (self.secs as i64) * 1_000_000_000
    }

    pub fn parse(raw: &str, span: Option<Span>) -> Result<Self, CompileError> {
        let raw = raw.trim();
        let invalid = || CompileError::Parse {
            message: format!("invalid timeframe `{raw}`"),
            span,
        };
        if raw.len() < 2 {
            return Err(invalid());
        }
        let (digits, unit) = raw.split_at(raw.len() - 1);
        let count: u64 = digits.parse().map_err(|_| invalid())?;
        if count == 0 {
            return Err(invalid());
        }
        let unit_secs = match unit {
            "s" => 1,
            "m" => 60,
            "h" => 3_600,
            "d" => 86_400,
            "w" => 604_800,
            _ => return Err(invalid()),
        };
        Ok(Self {
            secs: count * unit_secs,
        })
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.secs;
        if secs % 604_800 == 0 {
            write!(f, "{}w", secs / 604_800)
        } else if secs % 86_400 == 0 {
            write!(f, "{}d", secs / 86_400)
        } else if secs % 3_600 == 0 {
            write!(f, "{}h", secs / 3_600)
        } else if secs % 60 == 0 {
            write!(f, "{}m", secs / 60)
        } else {
            write!(f, "{secs}s")
        }
    }
}

impl Serialize for Timeframe {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Timeframe {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Timeframe::parse(&raw, None).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarKind {
    Number,
    Int,
    Bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeriesKind {
    Number,
    Bool,
}

/// Static type attached to IR nodes by the typechecker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "lowercase")]
pub enum TypeTag {
    Scalar { kind: ScalarKind },
    Series { kind: SeriesKind },
    Collection { source: SourceKind },
    Structured { fields: BTreeMap<String, TypeTag> },
}

impl TypeTag {
    pub const NUM_SERIES: TypeTag = TypeTag::Series {
        kind: SeriesKind::Number,
    };
    pub const BOOL_SERIES: TypeTag = TypeTag::Series {
        kind: SeriesKind::Bool,
    };

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            TypeTag::Scalar {
                kind: ScalarKind::Number | ScalarKind::Int
            } | TypeTag::Series {
                kind: SeriesKind::Number
            }
        )
    }

    pub fn is_boolean(&self) -> bool {
        matches!(
            self,
            TypeTag::Scalar {
                kind: ScalarKind::Bool
            } | TypeTag::Series {
                kind: SeriesKind::Bool
            }
        )
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeTag::Scalar { kind } => write!(f, "Scalar<{kind:?}>"),
            TypeTag::Series { kind } => write!(f, "Series<{kind:?}>"),
            TypeTag::Collection { source } => write!(f, "Collection<{source}>"),
            TypeTag::Structured { fields } => {
                write!(f, "Structured{{")?;
                for (idx, name) in fields.keys().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    #[serde(rename = "+")]
    Add,
    #[serde(rename = "-")]
    Sub,
    #[serde(rename = "*")]
    Mul,
    #[serde(rename = "/")]
    Div,
    #[serde(rename = "%")]
    Rem,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "&")]
    And,
    #[serde(rename = "|")]
    Or,
}

impl BinaryOp {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::And => "&",
            Self::Or => "|",
        }
    }

    pub const fn is_arithmetic(self) -> bool {
        matches!(self, Self::Add | Self::Sub | Self::Mul | Self::Div | Self::Rem)
    }

    pub const fn is_comparison(self) -> bool {
        matches!(
            self,
            Self::Eq | Self::Ne | Self::Lt | Self::Le | Self::Gt | Self::Ge
        )
    }

    pub const fn is_logical(self) -> bool {
        matches!(self, Self::And | Self::Or)
    }

    /// Whether operand order can be canonicalized without changing meaning.
    pub const fn is_commutative(self) -> bool {
        matches!(self, Self::Add | Self::Mul | Self::Eq | Self::Ne | Self::And | Self::Or)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnaryOp {
    Neg,
    Not,
}

/// Reducers accepted by `Aggregate` over trade/book collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reducer {
    Sum,
    Mean,
    Count,
    Min,
    Max,
}

impl Reducer {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Mean => "mean",
            Self::Count => "count",
            Self::Min => "min",
            Self::Max => "max",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "sum" => Some(Self::Sum),
            "mean" | "avg" => Some(Self::Mean),
            "count" => Some(Self::Count),
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            _ => None,
        }
    }
}

/// TimeShift distance: whole bars of the child's timeframe, or an absolute
/// duration snapped to that timeframe at plan time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "unit", content = "amount", rename_all = "lowercase")]
pub enum ShiftDelta {
    Bars(i64),
    Nanos(i64),
}

/// A coerced, typed indicator parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
}

impl ParamValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v.as_str()),
            _ => None,
        }
    }
}

/// Parameter record after catalog coercion: alias-resolved, defaults filled,
/// ranges checked. `BTreeMap` keeps serialization canonical.
pub type TypedParams = BTreeMap<String, ParamValue>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeframe_parses_and_round_trips_display() {
        for raw in ["30s", "1m", "5m", "1h", "4h", "1d", "1w"] {
            let tf = Timeframe::parse(raw, None).expect("parse should succeed");
            assert_eq!(tf.to_string(), raw);
        }
        assert_eq!(Timeframe::parse("1h", None).unwrap().secs(), 3_600);
        assert!(Timeframe::parse("0m", None).is_err());
        assert!(Timeframe::parse("h", None).is_err());
        assert!(Timeframe::parse("3x", None).is_err());
    }

    #[test]
    fn timeframe_orders_by_duration() {
        let m5 = Timeframe::parse("5m", None).unwrap();
        let h1 = Timeframe::parse("1h", None).unwrap();
        assert!(m5 < h1);
    }

    #[test]
    fn binary_op_families_are_disjoint() {
        for op in [
            BinaryOp::Add,
            BinaryOp::Sub,
            BinaryOp::Mul,
            BinaryOp::Div,
            BinaryOp::Rem,
            BinaryOp::Eq,
            BinaryOp::Ne,
            BinaryOp::Lt,
            BinaryOp::Le,
            BinaryOp::Gt,
            BinaryOp::Ge,
            BinaryOp::And,
            BinaryOp::Or,
        ] {
            let families = [op.is_arithmetic(), op.is_comparison(), op.is_logical()];
            assert_eq!(families.iter().filter(|v| **v).count(), 1, "{op:?}");
        }
    }

    #[test]
    fn param_value_coercions() {
        assert_eq!(ParamValue::Int(14).as_float(), Some(14.0));
        assert_eq!(ParamValue::Float(2.0).as_int(), Some(2));
        assert_eq!(ParamValue::Float(2.5).as_int(), None);
        assert_eq!(ParamValue::Text("session".into()).as_text(), Some("session"));
    }
}
