//! IR canonicalization.
//!
//! Applies, in order: indicator/param alias expansion, positional-to-named
//! parameter binding, default filling, source canonicalization (including
//! elided-input filling and sub-DAG expansion of composite indicators),
//! literal constant folding, and commutative operand ordering so that
//! equal-meaning subtrees land on equal structural hashes for downstream
//! CSE. The whole pass is idempotent: `normalize(normalize(e)) ==
//! normalize(e)`.

use crate::catalog::{Binding, Catalog};
use crate::error::CompileError;
use crate::ir::{Expr, LiteralValue, Node};
use crate::types::{BinaryOp, SourceKind, UnaryOp};

pub fn normalize(node: &Node) -> Result<Node, CompileError> {
    normalize_node(node, None)
}

/// `collection_scope` carries the source kind of the enclosing collection so
/// bare field references inside `Filter` predicates resolve against the
/// collection's columns instead of the candle default.
fn normalize_node(
    node: &Node,
    collection_scope: Option<SourceKind>,
) -> Result<Node, CompileError> {
    let span = node.span;
    let expr = match &node.expr {
        Expr::Literal { .. } => node.expr.clone(),
        Expr::SourceRef {
            symbol,
            exchange,
            timeframe,
            source,
            field,
        } => {
            let mut source = *source;
            if let (Some(scope), None) = (collection_scope, symbol.as_ref()) {
                // Bare ref in a predicate: a column of the collection.
                if source == SourceKind::Ohlcv {
                    source = scope;
                }
            }
            let field = match field {
                Some(field) => Some(field.clone()),
                // A candle reference without a field means the close.
                None if source.is_candle() => Some("close".to_string()),
                None => None,
            };
            Expr::SourceRef {
                symbol: symbol.clone(),
                exchange: exchange.clone(),
                timeframe: *timeframe,
                source,
                field,
            }
        }
        Expr::Call {
            indicator,
            params,
            positional,
            inputs,
        } => {
            let meta = Catalog::find(indicator).ok_or_else(|| CompileError::UnknownIndicator {
                name: indicator.clone(),
                span,
            })?;
            let typed = Catalog::coerce_params(meta, params, positional, span)?;

            let mut resolved_inputs = Vec::with_capacity(meta.input_slots);
            if inputs.is_empty() && !meta.semantics.required_fields.is_empty() {
                for field in meta.semantics.required_fields {
                    resolved_inputs.push(Node::field(*field));
                }
            } else {
                for input in inputs {
                    resolved_inputs.push(input.clone());
                }
            }
            if resolved_inputs.len() != meta.input_slots {
                return Err(CompileError::TypeMismatch {
                    node: format!("Call({})", meta.id),
                    expected: format!("{} input(s)", meta.input_slots),
                    actual: format!("{} input(s)", resolved_inputs.len()),
                    span,
                });
            }
            let resolved_inputs = resolved_inputs
                .iter()
                .map(|input| normalize_node(input, collection_scope))
                .collect::<Result<Vec<_>, _>>()?;

            if let Binding::SubDag(expand) = meta.binding {
                let expanded = expand(&typed, resolved_inputs);
                return normalize_node(&expanded, collection_scope);
            }
            Expr::Call {
                indicator: meta.id.to_string(),
                params: typed,
                positional: Vec::new(),
                inputs: resolved_inputs,
            }
        }
        Expr::BinaryOp { op, lhs, rhs } => {
            let lhs = normalize_node(lhs, collection_scope)?;
            let rhs = normalize_node(rhs, collection_scope)?;
            if let Some(folded) = fold_binary(*op, &lhs, &rhs) {
                return Ok(Node {
                    expr: folded,
                    span,
                    ty: None,
                });
            }
            let (lhs, rhs) = order_commutative(*op, lhs, rhs);
            Expr::BinaryOp {
                op: *op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            }
        }
        Expr::UnaryOp { op, child } => {
            let child = normalize_node(child, collection_scope)?;
            if let Some(folded) = fold_unary(*op, &child) {
                return Ok(Node {
                    expr: folded,
                    span,
                    ty: None,
                });
            }
            Expr::UnaryOp {
                op: *op,
                child: Box::new(child),
            }
        }
        Expr::TimeShift { child, delta } => Expr::TimeShift {
            child: Box::new(normalize_node(child, collection_scope)?),
            delta: *delta,
        },
        Expr::Filter {
            collection,
            predicate,
        } => {
            let collection = normalize_node(collection, collection_scope)?;
            let scope = collection_source(&collection).or(collection_scope);
            Expr::Filter {
                predicate: Box::new(normalize_node(predicate, scope)?),
                collection: Box::new(collection),
            }
        }
        Expr::Aggregate {
            collection,
            field,
            reducer,
        } => Expr::Aggregate {
            collection: Box::new(normalize_node(collection, collection_scope)?),
            field: field.clone(),
            reducer: *reducer,
        },
        Expr::MemberAccess { child, name } => Expr::MemberAccess {
            child: Box::new(normalize_node(child, collection_scope)?),
            name: name.clone(),
        },
    };
    Ok(Node {
        expr,
        span,
        ty: None,
    })
}

/// Source kind of the collection a filter runs over, if the tree bottoms
/// out in a collection reference.
fn collection_source(node: &Node) -> Option<SourceKind> {
    match &node.expr {
        Expr::SourceRef { source, field, .. } if !source.is_candle() && field.is_none() => {
            Some(*source)
        }
        Expr::Filter { collection, .. } => collection_source(collection),
        _ => None,
    }
}

fn literal_of(node: &Node) -> Option<LiteralValue> {
    match &node.expr {
        Expr::Literal { value, .. } => Some(*value),
        _ => None,
    }
}

/// Literal arithmetic only; comparisons and logic stay symbolic.
fn fold_binary(op: BinaryOp, lhs: &Node, rhs: &Node) -> Option<Expr> {
    if !op.is_arithmetic() {
        return None;
    }
    let lhs = literal_of(lhs)?;
    let rhs = literal_of(rhs)?;
    if matches!(lhs, LiteralValue::Bool(_)) || matches!(rhs, LiteralValue::Bool(_)) {
        return None;
    }

    if let (LiteralValue::Int(a), LiteralValue::Int(b)) = (lhs, rhs) {
        let folded = match op {
            BinaryOp::Add => a.checked_add(b),
            BinaryOp::Sub => a.checked_sub(b),
            BinaryOp::Mul => a.checked_mul(b),
            BinaryOp::Rem if b != 0 => a.checked_rem(b),
            _ => None,
        };
        if let Some(value) = folded {
            let value = LiteralValue::Int(value);
            return Some(Expr::Literal {
                kind: value.kind(),
                value,
            });
        }
    }

    let a = lhs.as_f64();
    let b = rhs.as_f64();
    let folded = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div if b != 0.0 => a / b,
        BinaryOp::Rem if b != 0.0 => a % b,
        _ => return None,
    };
    if !folded.is_finite() {
        return None;
    }
    let value = LiteralValue::Number(folded);
    Some(Expr::Literal {
        kind: value.kind(),
        value,
    })
}

fn fold_unary(op: UnaryOp, child: &Node) -> Option<Expr> {
    let value = literal_of(child)?;
    let folded = match (op, value) {
        (UnaryOp::Neg, LiteralValue::Number(v)) => LiteralValue::Number(-v),
        (UnaryOp::Neg, LiteralValue::Int(v)) => LiteralValue::Int(v.checked_neg()?),
        (UnaryOp::Not, LiteralValue::Bool(v)) => LiteralValue::Bool(!v),
        _ => return None,
    };
    Some(Expr::Literal {
        kind: folded.kind(),
        value: folded,
    })
}

/// Order commutative operands by structural hash so `a + b` and `b + a`
/// share one hash. Deterministic and idempotent.
fn order_commutative(op: BinaryOp, lhs: Node, rhs: Node) -> (Node, Node) {
    if !op.is_commutative() {
        return (lhs, rhs);
    }
    if rhs.structural_hash() < lhs.structural_hash() {
        (rhs, lhs)
    } else {
        (lhs, rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse;
    use crate::types::{ParamValue, Reducer};

    fn normalized(source: &str) -> Node {
        normalize(&parse(source).expect("parse")).expect("normalize")
    }

    #[test]
    fn normalize_is_idempotent() {
        for source in [
            "sma(close, 20)",
            "mean(close, length=20)",
            "rsi() > 70 & close < bollinger(close).lower",
            "crossup(sma(close, 20), sma(close, 50))",
            "BTC.trades.filter(amount > 2 * 500000).sum(amount)",
            "macd(close).histogram + 1 - 1",
            "fib_retracement(high, low)",
        ] {
            let once = normalized(source);
            let twice = normalize(&once).expect("re-normalize");
            assert_eq!(once, twice, "{source}");
        }
    }

    #[test]
    fn aliases_and_positionals_become_canonical() {
        let node = normalized("mean(close, length=20)");
        let Expr::Call {
            indicator,
            params,
            positional,
            ..
        } = &node.expr
        else {
            panic!("expected call");
        };
        assert_eq!(indicator, "sma");
        assert!(positional.is_empty());
        assert_eq!(params.get("period"), Some(&ParamValue::Int(20)));

        assert_eq!(normalized("mean(close, 20)"), normalized("sma(close, period=20)"));
    }

    #[test]
    fn elided_inputs_fill_from_required_fields() {
        let node = normalized("atr(period=7)");
        let Expr::Call { inputs, .. } = &node.expr else {
            panic!("expected call");
        };
        assert_eq!(inputs.len(), 3);
        let fields: Vec<_> = inputs
            .iter()
            .map(|input| match &input.expr {
                Expr::SourceRef { field, .. } => field.clone().unwrap(),
                other => panic!("expected source ref, got {other:?}"),
            })
            .collect();
        assert_eq!(fields, vec!["high", "low", "close"]);
    }

    #[test]
    fn defaults_fill_and_candle_refs_get_close() {
        let node = normalized("rsi()");
        let Expr::Call { params, inputs, .. } = &node.expr else {
            panic!("expected call");
        };
        assert_eq!(params.get("period"), Some(&ParamValue::Int(14)));
        let Expr::SourceRef { field, source, .. } = &inputs[0].expr else {
            panic!("expected source ref input");
        };
        assert_eq!(field.as_deref(), Some("close"));
        assert!(source.is_candle());
    }

    #[test]
    fn constant_arithmetic_folds() {
        let node = normalized("sma(close, 20) + (2 * 3 + 4)");
        let Expr::BinaryOp { lhs, rhs, .. } = &node.expr else {
            panic!("expected binary");
        };
        // Commutative ordering may move the literal; one side must be 10.
        let folded = [lhs, rhs]
            .into_iter()
            .find_map(|side| literal_of(side))
            .expect("folded literal");
        assert_eq!(folded, LiteralValue::Int(10));
    }

    #[test]
    fn division_by_zero_is_not_folded() {
        let node = normalized("close + 1 / 0");
        let Expr::BinaryOp { rhs, .. } = &node.expr else {
            panic!("expected binary");
        };
        assert!(matches!(rhs.expr, Expr::BinaryOp { op: BinaryOp::Div, .. }));
    }

    #[test]
    fn commutative_operands_share_a_hash() {
        let ab = normalized("sma(close, 5) + rsi(close, 7)");
        let ba = normalized("rsi(close, 7) + sma(close, 5)");
        assert_eq!(ab.structural_hash(), ba.structural_hash());

        let sub_ab = normalized("sma(close, 5) - rsi(close, 7)");
        let sub_ba = normalized("rsi(close, 7) - sma(close, 5)");
        assert_ne!(sub_ab.structural_hash(), sub_ba.structural_hash());
    }

    #[test]
    fn filter_predicate_fields_resolve_to_collection_columns() {
        let node = normalized("BTC.trades.filter(amount > 1_000_000).sum(amount)");
        let Expr::Aggregate {
            collection,
            field,
            reducer,
        } = &node.expr
        else {
            panic!("expected aggregate");
        };
        assert_eq!(field, "amount");
        assert_eq!(*reducer, Reducer::Sum);
        let Expr::Filter { predicate, .. } = &collection.expr else {
            panic!("expected filter");
        };
        let Expr::BinaryOp { lhs, .. } = &predicate.expr else {
            panic!("expected comparison predicate");
        };
        let Expr::SourceRef { source, field, .. } = &lhs.expr else {
            panic!("expected source ref in predicate");
        };
        assert_eq!(*source, SourceKind::Trades);
        assert_eq!(field.as_deref(), Some("amount"));
    }

    #[test]
    fn fib_retracement_expands_to_swing_sub_dag() {
        let node = normalized("fib_retracement(high, low, left=3, right=2)");
        let Expr::Call { indicator, inputs, .. } = &node.expr else {
            panic!("expected call");
        };
        assert_eq!(indicator, "fib_levels");
        for input in inputs {
            let Expr::MemberAccess { child, .. } = &input.expr else {
                panic!("expected member access into swing points");
            };
            let Expr::Call { indicator, params, .. } = &child.expr else {
                panic!("expected swing call");
            };
            assert_eq!(indicator, "swing_points");
            assert_eq!(params.get("left"), Some(&ParamValue::Int(3)));
        }
    }

    #[test]
    fn unknown_indicator_is_reported() {
        let err = normalize(&parse("sma_oops(close, 3)").unwrap()).unwrap_err();
        assert_eq!(err.kind(), "UnknownIndicator");
    }

    #[test]
    fn wrong_input_arity_is_reported() {
        let err = normalize(&parse("crossup(close)").unwrap()).unwrap_err();
        assert_eq!(err.kind(), "TypeMismatch");
    }
}
