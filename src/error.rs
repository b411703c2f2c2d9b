use crate::types::Span;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while turning raw IR into a typed, normalized expression.
///
/// Every variant carries a stable `kind` string used by the wire envelope;
/// see [`CompileError::kind`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error("parse error: {message}")]
    Parse { message: String, span: Option<Span> },
    #[error("unknown indicator `{name}`")]
    UnknownIndicator { name: String, span: Option<Span> },
    #[error("unknown field `{field}` for source `{source_name}`")]
    UnknownField {
        field: String,
        source_name: String,
        span: Option<Span>,
    },
    #[error("unknown source `{source_name}`")]
    UnknownSource {
        source_name: String,
        span: Option<Span>,
    },
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter {
        name: String,
        reason: String,
        span: Option<Span>,
    },
    #[error("parameter `{name}` = {value} outside [{min}, {max}]")]
    ParameterOutOfRange {
        name: String,
        value: f64,
        min: f64,
        max: f64,
        span: Option<Span>,
    },
    #[error("type mismatch at `{node}`: expected {expected}, got {actual}")]
    TypeMismatch {
        node: String,
        expected: String,
        actual: String,
        span: Option<Span>,
    },
}

impl CompileError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Parse { .. } => "ParseError",
            Self::UnknownIndicator { .. } => "UnknownIndicator",
            Self::UnknownField { .. } => "UnknownField",
            Self::UnknownSource { .. } => "UnknownSource",
            Self::InvalidParameter { .. } => "InvalidParameter",
            Self::ParameterOutOfRange { .. } => "ParameterOutOfRange",
            Self::TypeMismatch { .. } => "TypeMismatch",
        }
    }

    pub fn span(&self) -> Option<Span> {
        match self {
            Self::Parse { span, .. }
            | Self::UnknownIndicator { span, .. }
            | Self::UnknownField { span, .. }
            | Self::UnknownSource { span, .. }
            | Self::InvalidParameter { span, .. }
            | Self::ParameterOutOfRange { span, .. }
            | Self::TypeMismatch { span, .. } => *span,
        }
    }
}

/// Errors raised while deriving an execution plan from typed IR.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlanError {
    #[error("cannot align `{left}` with `{right}`: {reason}")]
    AlignmentError {
        left: String,
        right: String,
        reason: String,
    },
    #[error("dependency cycle: {}", cycle.join(" -> "))]
    CycleError { cycle: Vec<String> },
    #[error(
        "missing data for {symbol}/{timeframe}/{source_name}/{field}: have {have_bars}, need {need_bars}"
    )]
    MissingData {
        symbol: String,
        timeframe: String,
        source_name: String,
        field: String,
        have_bars: usize,
        need_bars: usize,
    },
}

impl PlanError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AlignmentError { .. } => "AlignmentError",
            Self::CycleError { .. } => "CycleError",
            Self::MissingData { .. } => "MissingData",
        }
    }
}

/// Errors raised by an evaluator session.
///
/// `DivisionByZero` never escapes a session: kernels and operator nodes
/// convert it to an unavailable output at the emit boundary. It exists so
/// arithmetic helpers can report the condition with a stable kind.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("out-of-order event on leaf `{leaf}`: last ts {last_ts}, incoming ts {incoming_ts}")]
    OrderingViolation {
        leaf: String,
        last_ts: i64,
        incoming_ts: i64,
    },
    #[error("snapshot schema mismatch: expected {expected_schema}, got {got_schema}")]
    SnapshotMismatch {
        expected_schema: u32,
        got_schema: u32,
    },
    #[error("division by zero")]
    DivisionByZero,
    #[error("internal invariant violation: {message}")]
    Internal { message: String },
}

impl EvalError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::OrderingViolation { .. } => "OrderingViolation",
            Self::SnapshotMismatch { .. } => "SnapshotMismatch",
            Self::DivisionByZero => "DivisionByZero",
            Self::Internal { .. } => "InternalError",
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

/// Unified error for the public entry points in [`crate::api`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error(transparent)]
    Eval(#[from] EvalError),
}

impl EngineError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Compile(e) => e.kind(),
            Self::Plan(e) => e.kind(),
            Self::Eval(e) => e.kind(),
        }
    }

    pub fn span(&self) -> Option<Span> {
        match self {
            Self::Compile(e) => e.span(),
            _ => None,
        }
    }
}

/// Wire form of an error inside the response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub span: Option<Span>,
    #[serde(skip_serializing_if = "serde_json::Map::is_empty", default)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

impl From<&EngineError> for ErrorBody {
    fn from(err: &EngineError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
            span: err.span(),
            details: error_details(err),
        }
    }
}

fn error_details(err: &EngineError) -> serde_json::Map<String, serde_json::Value> {
    let mut details = serde_json::Map::new();
    match err {
        EngineError::Plan(PlanError::MissingData {
            symbol,
            timeframe,
            source_name,
            field,
            have_bars,
            need_bars,
        }) => {
            details.insert("symbol".into(), symbol.as_str().into());
            details.insert("timeframe".into(), timeframe.as_str().into());
            details.insert("source".into(), source_name.as_str().into());
            details.insert("field".into(), field.as_str().into());
            details.insert("have_bars".into(), (*have_bars).into());
            details.insert("need_bars".into(), (*need_bars).into());
        }
        EngineError::Plan(PlanError::CycleError { cycle }) => {
            details.insert(
                "cycle".into(),
                cycle
                    .iter()
                    .map(|id| serde_json::Value::from(id.as_str()))
                    .collect::<Vec<_>>()
                    .into(),
            );
        }
        EngineError::Eval(EvalError::OrderingViolation {
            leaf,
            last_ts,
            incoming_ts,
        }) => {
            details.insert("leaf".into(), leaf.as_str().into());
            details.insert("last_ts".into(), (*last_ts).into());
            details.insert("incoming_ts".into(), (*incoming_ts).into());
        }
        _ => {}
    }
    details
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable_strings() {
        let err = CompileError::UnknownIndicator {
            name: "sma_oops".to_string(),
            span: None,
        };
        assert_eq!(err.kind(), "UnknownIndicator");

        let err = PlanError::CycleError {
            cycle: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(err.kind(), "CycleError");
        assert!(err.to_string().contains("a -> b"));

        assert_eq!(EvalError::DivisionByZero.kind(), "DivisionByZero");
        assert_eq!(EvalError::internal("bug").kind(), "InternalError");
    }

    #[test]
    fn error_body_carries_missing_data_details() {
        let err = EngineError::Plan(PlanError::MissingData {
            symbol: "BTC".to_string(),
            timeframe: "1h".to_string(),
            source_name: "ohlcv".to_string(),
            field: "close".to_string(),
            have_bars: 10,
            need_bars: 30,
        });
        let body = ErrorBody::from(&err);
        assert_eq!(body.kind, "MissingData");
        assert_eq!(body.details["need_bars"], 30);
    }
}
