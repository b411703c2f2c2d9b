//! Text-DSL frontend adapter.
//!
//! Lexes and parses expressions such as
//! `crossup(sma(close, 20), sma(close, 50))` or
//! `BTC.trades.filter(amount > 1000000).sum(amount)` into canonical IR and
//! nothing else. All validation, default filling, and canonicalization
//! happen downstream in normalize/typecheck.

use crate::error::CompileError;
use crate::ir::{LiteralValue, Node};
use crate::types::{BinaryOp, ParamValue, Reducer, SourceKind, Span, UnaryOp};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
enum TokKind {
    Ident(String),
    Int(i64),
    Number(f64),
    Str(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Amp,
    Pipe,
    Tilde,
    Lt,
    Le,
    Gt,
    Ge,
    EqEq,
    NotEq,
    Comma,
    Equal,
    Dot,
    LParen,
    RParen,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
struct Tok {
    kind: TokKind,
    span: Span,
}

struct Lexer<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            bytes: source.as_bytes(),
            pos: 0,
        }
    }

    fn next_token(&mut self) -> Result<Tok, CompileError> {
        self.skip_ws();
        let start = self.pos as u32;
        let Some(&ch) = self.bytes.get(self.pos) else {
            return Ok(Tok {
                kind: TokKind::Eof,
                span: Span::new(start, start),
            });
        };
        let kind = match ch {
            b'+' => self.single(TokKind::Plus),
            b'-' => self.single(TokKind::Minus),
            b'*' => self.single(TokKind::Star),
            b'/' => self.single(TokKind::Slash),
            b'%' => self.single(TokKind::Percent),
            b'&' => self.single(TokKind::Amp),
            b'|' => self.single(TokKind::Pipe),
            b'~' => self.single(TokKind::Tilde),
            b',' => self.single(TokKind::Comma),
            b'.' => self.single(TokKind::Dot),
            b'(' => self.single(TokKind::LParen),
            b')' => self.single(TokKind::RParen),
            b'<' => self.one_or_eq(TokKind::Lt, TokKind::Le),
            b'>' => self.one_or_eq(TokKind::Gt, TokKind::Ge),
            b'=' => self.one_or_eq(TokKind::Equal, TokKind::EqEq),
            b'!' => {
                self.pos += 1;
                if self.bytes.get(self.pos) == Some(&b'=') {
                    self.pos += 1;
                    TokKind::NotEq
                } else {
                    return Err(self.error(start, "unexpected `!` (did you mean `!=`?)"));
                }
            }
            b'"' | b'\'' => self.read_string(ch)?,
            c if c.is_ascii_alphabetic() || c == b'_' => self.read_ident(),
            c if c.is_ascii_digit() => self.read_number(start)?,
            other => {
                return Err(self.error(start, &format!("unexpected character `{}`", other as char)))
            }
        };
        Ok(Tok {
            kind,
            span: Span::new(start, self.pos as u32),
        })
    }

    fn single(&mut self, kind: TokKind) -> TokKind {
        self.pos += 1;
        kind
    }

    fn one_or_eq(&mut self, bare: TokKind, with_eq: TokKind) -> TokKind {
        self.pos += 1;
        if self.bytes.get(self.pos) == Some(&b'=') {
            self.pos += 1;
            with_eq
        } else {
            bare
        }
    }

    fn skip_ws(&mut self) {
        while matches!(self.bytes.get(self.pos), Some(c) if c.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn read_ident(&mut self) -> TokKind {
        let start = self.pos;
        while matches!(
            self.bytes.get(self.pos),
            Some(c) if c.is_ascii_alphanumeric() || *c == b'_'
        ) {
            self.pos += 1;
        }
        let raw = std::str::from_utf8(&self.bytes[start..self.pos])
            .expect("identifier bytes are ASCII")
            .to_string();
        TokKind::Ident(raw)
    }

    fn read_string(&mut self, quote: u8) -> Result<TokKind, CompileError> {
        let start = self.pos as u32;
        self.pos += 1;
        let content_start = self.pos;
        while let Some(&c) = self.bytes.get(self.pos) {
            if c == quote {
                let raw = std::str::from_utf8(&self.bytes[content_start..self.pos])
                    .map_err(|_| self.error(start, "string literal must be UTF-8"))?
                    .to_string();
                self.pos += 1;
                return Ok(TokKind::Str(raw));
            }
            self.pos += 1;
        }
        Err(self.error(start, "unterminated string literal"))
    }

    fn read_number(&mut self, start: u32) -> Result<TokKind, CompileError> {
        let begin = self.pos;
        let mut seen_dot = false;
        let mut seen_exp = false;
        while let Some(&c) = self.bytes.get(self.pos) {
            match c {
                b'0'..=b'9' | b'_' => self.pos += 1,
                // A dot starting a method call (`1.filter`) is not part of
                // the number; only digit-led fractions are.
                b'.' if !seen_dot
                    && !seen_exp
                    && matches!(self.bytes.get(self.pos + 1), Some(d) if d.is_ascii_digit()) =>
                {
                    seen_dot = true;
                    self.pos += 1;
                }
                b'e' | b'E' if !seen_exp => {
                    seen_exp = true;
                    self.pos += 1;
                    if matches!(self.bytes.get(self.pos), Some(b'+') | Some(b'-')) {
                        self.pos += 1;
                    }
                }
                _ => break,
            }
        }
        let raw: String = std::str::from_utf8(&self.bytes[begin..self.pos])
            .expect("number bytes are ASCII")
            .chars()
            .filter(|c| *c != '_')
            .collect();
        if !seen_dot && !seen_exp {
            raw.parse::<i64>()
                .map(TokKind::Int)
                .map_err(|_| self.error(start, &format!("invalid integer `{raw}`")))
        } else {
            raw.parse::<f64>()
                .map(TokKind::Number)
                .map_err(|_| self.error(start, &format!("invalid number `{raw}`")))
        }
    }

    fn error(&self, start: u32, message: &str) -> CompileError {
        CompileError::Parse {
            message: message.to_string(),
            span: Some(Span::new(start, self.pos as u32)),
        }
    }
}

/// Parse one expression into raw IR.
pub fn parse(source: &str) -> Result<Node, CompileError> {
    let mut parser = Parser::new(source);
    let expr = parser.parse_expr()?;
    let trailing = parser.next_token()?;
    if trailing.kind != TokKind::Eof {
        return Err(CompileError::Parse {
            message: format!("unexpected trailing token {:?}", trailing.kind),
            span: Some(trailing.span),
        });
    }
    Ok(expr)
}

struct Parser<'a> {
    lexer: Lexer<'a>,
    lookahead: Option<Tok>,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            lexer: Lexer::new(source),
            lookahead: None,
        }
    }

    fn next_token(&mut self) -> Result<Tok, CompileError> {
        if let Some(tok) = self.lookahead.take() {
            return Ok(tok);
        }
        self.lexer.next_token()
    }

    fn peek(&mut self) -> Result<&Tok, CompileError> {
        if self.lookahead.is_none() {
            self.lookahead = Some(self.lexer.next_token()?);
        }
        Ok(self.lookahead.as_ref().expect("lookahead just filled"))
    }

    fn parse_expr(&mut self) -> Result<Node, CompileError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Node, CompileError> {
        let mut lhs = self.parse_and()?;
        while self.peek()?.kind == TokKind::Pipe {
            self.next_token()?;
            let rhs = self.parse_and()?;
            lhs = spanned_binary(BinaryOp::Or, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Node, CompileError> {
        let mut lhs = self.parse_compare()?;
        while self.peek()?.kind == TokKind::Amp {
            self.next_token()?;
            let rhs = self.parse_compare()?;
            lhs = spanned_binary(BinaryOp::And, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_compare(&mut self) -> Result<Node, CompileError> {
        let mut lhs = self.parse_add_sub()?;
        loop {
            let op = match self.peek()?.kind {
                TokKind::Lt => BinaryOp::Lt,
                TokKind::Le => BinaryOp::Le,
                TokKind::Gt => BinaryOp::Gt,
                TokKind::Ge => BinaryOp::Ge,
                TokKind::EqEq => BinaryOp::Eq,
                TokKind::NotEq => BinaryOp::Ne,
                _ => break,
            };
            self.next_token()?;
            let rhs = self.parse_add_sub()?;
            lhs = spanned_binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_add_sub(&mut self) -> Result<Node, CompileError> {
        let mut lhs = self.parse_mul_div()?;
        loop {
            let op = match self.peek()?.kind {
                TokKind::Plus => BinaryOp::Add,
                TokKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.next_token()?;
            let rhs = self.parse_mul_div()?;
            lhs = spanned_binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_mul_div(&mut self) -> Result<Node, CompileError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek()?.kind {
                TokKind::Star => BinaryOp::Mul,
                TokKind::Slash => BinaryOp::Div,
                TokKind::Percent => BinaryOp::Rem,
                _ => break,
            };
            self.next_token()?;
            let rhs = self.parse_unary()?;
            lhs = spanned_binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Node, CompileError> {
        let tok = self.peek()?.clone();
        match tok.kind {
            TokKind::Plus => {
                self.next_token()?;
                self.parse_unary()
            }
            TokKind::Minus => {
                self.next_token()?;
                let child = self.parse_unary()?;
                Ok(Node::unary(UnaryOp::Neg, child).with_span(tok.span))
            }
            TokKind::Tilde => {
                self.next_token()?;
                let child = self.parse_unary()?;
                Ok(Node::unary(UnaryOp::Not, child).with_span(tok.span))
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Result<Node, CompileError> {
        let mut node = self.parse_primary()?;
        while self.peek()?.kind == TokKind::Dot {
            self.next_token()?;
            let tok = self.next_token()?;
            let TokKind::Ident(name) = tok.kind else {
                return Err(CompileError::Parse {
                    message: "expected member or method name after `.`".to_string(),
                    span: Some(tok.span),
                });
            };
            if self.peek()?.kind == TokKind::LParen {
                self.next_token()?;
                let args = self.parse_arg_list()?;
                node = self.apply_method(node, &name, args, tok.span)?;
            } else {
                node = extend_path_or_member(node, &name, tok.span)?;
            }
        }
        Ok(node)
    }

    fn parse_primary(&mut self) -> Result<Node, CompileError> {
        let tok = self.next_token()?;
        match tok.kind {
            TokKind::Ident(name) => match name.as_str() {
                "true" => Ok(Node::boolean(true).with_span(tok.span)),
                "false" => Ok(Node::boolean(false).with_span(tok.span)),
                _ => {
                    if self.peek()?.kind == TokKind::LParen {
                        self.next_token()?;
                        let args = self.parse_arg_list()?;
                        build_call(&name, args, tok.span)
                    } else {
                        Ok(path_root(&name).with_span(tok.span))
                    }
                }
            },
            TokKind::Int(value) => Ok(Node::int(value).with_span(tok.span)),
            TokKind::Number(value) => Ok(Node::number(value).with_span(tok.span)),
            TokKind::LParen => {
                let expr = self.parse_expr()?;
                let close = self.next_token()?;
                if close.kind != TokKind::RParen {
                    return Err(CompileError::Parse {
                        message: format!("expected `)`, got {:?}", close.kind),
                        span: Some(close.span),
                    });
                }
                Ok(expr)
            }
            other => Err(CompileError::Parse {
                message: format!("unexpected token {other:?}"),
                span: Some(tok.span),
            }),
        }
    }

    /// Arguments up to and including the closing paren.
    fn parse_arg_list(&mut self) -> Result<Args, CompileError> {
        let mut args = Args::default();
        loop {
            match self.peek()?.kind {
                TokKind::RParen => {
                    self.next_token()?;
                    break;
                }
                TokKind::Eof => {
                    let tok = self.next_token()?;
                    return Err(CompileError::Parse {
                        message: "unexpected end of input in argument list".to_string(),
                        span: Some(tok.span),
                    });
                }
                _ => {}
            }

            if let TokKind::Str(raw) = &self.peek()?.kind {
                let raw = raw.clone();
                self.next_token()?;
                args.positional_params.push(ParamValue::Text(raw));
            } else {
                let expr = self.parse_expr()?;
                if is_bare_ident(&expr) && self.peek()?.kind == TokKind::Equal {
                    self.next_token()?;
                    let name = bare_ident_name(&expr).expect("checked bare identifier");
                    let value_span = self.peek()?.span;
                    let value = if let TokKind::Str(raw) = &self.peek()?.kind {
                        let raw = raw.clone();
                        self.next_token()?;
                        ParamValue::Text(raw)
                    } else {
                        let value_expr = self.parse_expr()?;
                        scalar_param(&value_expr).ok_or_else(|| CompileError::Parse {
                            message: format!("keyword argument `{name}` must be a scalar literal"),
                            span: value_expr.span.or(Some(value_span)),
                        })?
                    };
                    args.kwargs.insert(name, value);
                } else if let Some(value) = scalar_param(&expr) {
                    args.positional_params.push(value);
                } else {
                    args.inputs.push(expr);
                }
            }

            match self.peek()?.kind {
                TokKind::Comma => {
                    self.next_token()?;
                }
                TokKind::RParen => {
                    self.next_token()?;
                    break;
                }
                _ => {
                    let tok = self.next_token()?;
                    return Err(CompileError::Parse {
                        message: format!("expected `,` or `)`, got {:?}", tok.kind),
                        span: Some(tok.span),
                    });
                }
            }
        }
        Ok(args)
    }

    fn apply_method(
        &mut self,
        receiver: Node,
        name: &str,
        args: Args,
        span: Span,
    ) -> Result<Node, CompileError> {
        match name {
            "filter" => {
                if args.inputs.len() != 1
                    || !args.positional_params.is_empty()
                    || !args.kwargs.is_empty()
                {
                    return Err(CompileError::Parse {
                        message: "filter takes exactly one predicate expression".to_string(),
                        span: Some(span),
                    });
                }
                let mut inputs = args.inputs;
                Ok(Node::filter(receiver, inputs.remove(0)).with_span(span))
            }
            _ if Reducer::parse(name).is_some() => {
                let reducer = Reducer::parse(name).expect("checked above");
                let field = aggregate_field(&args, span)?;
                Ok(Node::aggregate(receiver, field, reducer).with_span(span))
            }
            _ => {
                // Method call sugar: receiver becomes the first input.
                let mut inputs = vec![receiver];
                inputs.extend(args.inputs);
                build_call(
                    name,
                    Args {
                        inputs,
                        positional_params: args.positional_params,
                        kwargs: args.kwargs,
                    },
                    span,
                )
            }
        }
    }
}

#[derive(Debug, Default)]
struct Args {
    inputs: Vec<Node>,
    positional_params: Vec<ParamValue>,
    kwargs: BTreeMap<String, ParamValue>,
}

fn build_call(name: &str, args: Args, span: Span) -> Result<Node, CompileError> {
    let mut node = Node::call(name.to_ascii_lowercase(), args.inputs);
    if let crate::ir::Expr::Call {
        params, positional, ..
    } = &mut node.expr
    {
        *positional = args.positional_params;
        *params = args.kwargs;
    }
    Ok(node.with_span(span))
}

fn spanned_binary(op: BinaryOp, lhs: Node, rhs: Node) -> Node {
    let span = match (lhs.span, rhs.span) {
        (Some(l), Some(r)) => Some(Span::new(l.start, r.end)),
        (l, r) => l.or(r),
    };
    let mut node = Node::binary(op, lhs, rhs);
    node.span = span;
    node
}

/// A leading identifier: a field name, or the start of a dotted source path.
fn path_root(name: &str) -> Node {
    if let Ok(source) = SourceKind::parse(name, None) {
        Node::new(crate::ir::Expr::SourceRef {
            symbol: None,
            exchange: None,
            timeframe: None,
            source,
            field: None,
        })
    } else {
        Node::field(name)
    }
}

/// Grow a dotted path (`BTC` -> `BTC.trades` -> `BTC.trades.amount`) or fall
/// back to member access for non-path receivers.
fn extend_path_or_member(node: Node, name: &str, span: Span) -> Result<Node, CompileError> {
    use crate::ir::Expr;
    match node.expr {
        Expr::SourceRef {
            symbol,
            exchange,
            timeframe,
            source,
            field,
        } => {
            // `close` parsed as a bare field; a following `.x` reinterprets
            // it as `symbol.x`.
            if symbol.is_none() && field.is_some() && source == SourceKind::Ohlcv {
                let symbol = field;
                if let Ok(next_source) = SourceKind::parse(name, None) {
                    return Ok(Node::new(Expr::SourceRef {
                        symbol,
                        exchange,
                        timeframe,
                        source: next_source,
                        field: None,
                    })
                    .with_span(span));
                }
                return Ok(Node::new(Expr::SourceRef {
                    symbol,
                    exchange,
                    timeframe,
                    source: SourceKind::Ohlcv,
                    field: Some(name.to_string()),
                })
                .with_span(span));
            }
            if field.is_none() {
                return Ok(Node::new(Expr::SourceRef {
                    symbol,
                    exchange,
                    timeframe,
                    source,
                    field: Some(name.to_string()),
                })
                .with_span(span));
            }
            Err(CompileError::Parse {
                message: format!("unexpected path segment `{name}` after a full source reference"),
                span: Some(span),
            })
        }
        expr => Ok(Node {
            expr: Expr::MemberAccess {
                child: Box::new(Node {
                    expr,
                    span: node.span,
                    ty: None,
                }),
                name: name.to_string(),
            },
            span: Some(span),
            ty: None,
        }),
    }
}

fn is_bare_ident(node: &Node) -> bool {
    bare_ident_name(node).is_some()
}

fn bare_ident_name(node: &Node) -> Option<String> {
    match &node.expr {
        crate::ir::Expr::SourceRef {
            symbol: None,
            exchange: None,
            timeframe: None,
            source: SourceKind::Ohlcv,
            field: Some(field),
        } => Some(field.clone()),
        _ => None,
    }
}

fn scalar_param(node: &Node) -> Option<ParamValue> {
    match &node.expr {
        crate::ir::Expr::Literal { value, .. } => Some(match value {
            LiteralValue::Number(v) => ParamValue::Float(*v),
            LiteralValue::Int(v) => ParamValue::Int(*v),
            LiteralValue::Bool(v) => ParamValue::Bool(*v),
        }),
        crate::ir::Expr::UnaryOp {
            op: UnaryOp::Neg,
            child,
        } => match scalar_param(child)? {
            ParamValue::Float(v) => Some(ParamValue::Float(-v)),
            ParamValue::Int(v) => Some(ParamValue::Int(-v)),
            _ => None,
        },
        _ => None,
    }
}

fn aggregate_field(args: &Args, span: Span) -> Result<String, CompileError> {
    if args.inputs.len() != 1 || !args.positional_params.is_empty() || !args.kwargs.is_empty() {
        return Err(CompileError::Parse {
            message: "aggregate takes exactly one field name".to_string(),
            span: Some(span),
        });
    }
    bare_ident_name(&args.inputs[0]).ok_or_else(|| CompileError::Parse {
        message: "aggregate field must be a bare identifier".to_string(),
        span: args.inputs[0].span.or(Some(span)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Expr;

    #[test]
    fn parses_call_with_positional_and_kwargs() {
        let node = parse("sma(close, period=3)").expect("parse should succeed");
        let Expr::Call {
            indicator,
            params,
            inputs,
            positional,
        } = &node.expr
        else {
            panic!("expected call, got {node:?}");
        };
        assert_eq!(indicator, "sma");
        assert_eq!(inputs.len(), 1);
        assert!(positional.is_empty());
        assert_eq!(params.get("period"), Some(&ParamValue::Int(3)));
    }

    #[test]
    fn parses_arithmetic_precedence() {
        let node = parse("close + volume * 2").unwrap();
        let Expr::BinaryOp {
            op: BinaryOp::Add, ..
        } = &node.expr
        else {
            panic!("expected top-level add: {node:?}");
        };
    }

    #[test]
    fn parses_collection_filter_aggregate_chain() {
        let node = parse("BTC.trades.filter(amount > 1_000_000).sum(amount)").unwrap();
        let Expr::Aggregate {
            collection,
            field,
            reducer,
        } = &node.expr
        else {
            panic!("expected aggregate: {node:?}");
        };
        assert_eq!(field, "amount");
        assert_eq!(*reducer, Reducer::Sum);
        let Expr::Filter {
            collection: inner, ..
        } = &collection.expr
        else {
            panic!("expected filter under aggregate");
        };
        let Expr::SourceRef { symbol, source, .. } = &inner.expr else {
            panic!("expected collection source ref");
        };
        assert_eq!(symbol.as_deref(), Some("BTC"));
        assert_eq!(*source, SourceKind::Trades);
    }

    #[test]
    fn parses_member_access_on_call() {
        let node = parse("macd(close, fast=12, slow=26, signal=9).histogram").unwrap();
        let Expr::MemberAccess { child, name } = &node.expr else {
            panic!("expected member access: {node:?}");
        };
        assert_eq!(name, "histogram");
        assert!(matches!(child.expr, Expr::Call { .. }));
    }

    #[test]
    fn parses_logic_and_comparison() {
        let node = parse("rsi(close, 14) > 70 & close < sma(close, 20)").unwrap();
        let Expr::BinaryOp {
            op: BinaryOp::And, ..
        } = &node.expr
        else {
            panic!("expected top-level and: {node:?}");
        };
    }

    #[test]
    fn negative_scalar_becomes_param() {
        let node = parse("shift(close, -2)").unwrap();
        let Expr::Call { positional, .. } = &node.expr else {
            panic!("expected call");
        };
        assert_eq!(positional, &vec![ParamValue::Int(-2)]);
    }

    #[test]
    fn string_kwarg_becomes_text_param() {
        let node = parse("vwap(anchor=\"session\")").unwrap();
        let Expr::Call { params, .. } = &node.expr else {
            panic!("expected call");
        };
        assert_eq!(
            params.get("anchor"),
            Some(&ParamValue::Text("session".to_string()))
        );
    }

    #[test]
    fn rejects_trailing_garbage_and_bad_tokens() {
        assert!(parse("close close").is_err());
        assert!(parse("sma(close,").is_err());
        assert!(parse("a ! b").is_err());
        assert!(parse("\"unterminated").is_err());
    }

    #[test]
    fn spans_cover_source_ranges() {
        let node = parse("sma(close, 20)").unwrap();
        let span = node.span.expect("call should carry a span");
        assert_eq!(span.start, 0);
    }
}
