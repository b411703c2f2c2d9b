//! Bottom-up static type inference over normalized IR.

use crate::catalog::Catalog;
use crate::error::CompileError;
use crate::ir::{Expr, Node};
use crate::types::{ScalarKind, TypeTag};
use std::collections::BTreeMap;

/// Infer and cache a type tag on every node. Expects normalized IR (canonical
/// indicator ids, filled inputs); unknown names at this stage are bugs in the
/// caller and still reported as compile errors.
pub fn typecheck(node: &Node) -> Result<Node, CompileError> {
    let mut typed = node.clone();
    check(&mut typed)?;
    Ok(typed)
}

/// Convenience for the type of an already typechecked node.
pub fn type_of(node: &Node) -> Option<&TypeTag> {
    node.ty.as_ref()
}

fn check(node: &mut Node) -> Result<TypeTag, CompileError> {
    let span = node.span;
    let ty = match &mut node.expr {
        Expr::Literal { kind, .. } => TypeTag::Scalar { kind: *kind },
        Expr::SourceRef { source, field, .. } => match field {
            // Tick-collection columns type as numeric series here; the
            // planner rejects them outside a filter/aggregate context.
            Some(_) => TypeTag::NUM_SERIES,
            None if !source.is_candle() => TypeTag::Collection { source: *source },
            None => {
                return Err(CompileError::UnknownField {
                    field: "<missing>".to_string(),
                    source_name: source.as_str().to_string(),
                    span,
                })
            }
        },
        Expr::Call {
            indicator, inputs, ..
        } => {
            let meta = Catalog::find(indicator).ok_or_else(|| CompileError::UnknownIndicator {
                name: indicator.clone(),
                span,
            })?;
            for input in inputs.iter_mut() {
                let input_ty = check(input)?;
                if !input_ty.is_numeric() {
                    return Err(CompileError::TypeMismatch {
                        node: input.describe(),
                        expected: "numeric series or scalar".to_string(),
                        actual: input_ty.to_string(),
                        span: input.span.or(span),
                    });
                }
            }
            indicator_output_type(meta)
        }
        Expr::BinaryOp { op, lhs, rhs } => {
            let lhs_ty = check(lhs)?;
            let rhs_ty = check(rhs)?;
            let op = *op;
            let series = matches!(lhs_ty, TypeTag::Series { .. })
                || matches!(rhs_ty, TypeTag::Series { .. });
            if op.is_arithmetic() {
                require_numeric(lhs, &lhs_ty)?;
                require_numeric(rhs, &rhs_ty)?;
                if series {
                    TypeTag::NUM_SERIES
                } else {
                    TypeTag::Scalar {
                        kind: ScalarKind::Number,
                    }
                }
            } else if op.is_comparison() {
                require_numeric(lhs, &lhs_ty)?;
                require_numeric(rhs, &rhs_ty)?;
                if series {
                    TypeTag::BOOL_SERIES
                } else {
                    TypeTag::Scalar {
                        kind: ScalarKind::Bool,
                    }
                }
            } else {
                require_boolean(lhs, &lhs_ty)?;
                require_boolean(rhs, &rhs_ty)?;
                if series {
                    TypeTag::BOOL_SERIES
                } else {
                    TypeTag::Scalar {
                        kind: ScalarKind::Bool,
                    }
                }
            }
        }
        Expr::UnaryOp { op, child } => {
            let child_ty = check(child)?;
            match op {
                crate::types::UnaryOp::Neg => {
                    require_numeric(child, &child_ty)?;
                    child_ty
                }
                crate::types::UnaryOp::Not => {
                    require_boolean(child, &child_ty)?;
                    child_ty
                }
            }
        }
        Expr::TimeShift { child, .. } => {
            let child_ty = check(child)?;
            if !matches!(child_ty, TypeTag::Series { .. }) {
                return Err(CompileError::TypeMismatch {
                    node: child.describe(),
                    expected: "series".to_string(),
                    actual: child_ty.to_string(),
                    span: child.span.or(span),
                });
            }
            child_ty
        }
        Expr::Filter {
            collection,
            predicate,
        } => {
            let collection_ty = check(collection)?;
            let TypeTag::Collection { source } = collection_ty else {
                return Err(CompileError::TypeMismatch {
                    node: collection.describe(),
                    expected: "collection".to_string(),
                    actual: collection_ty.to_string(),
                    span: collection.span.or(span),
                });
            };
            let predicate_ty = check(predicate)?;
            require_boolean(predicate, &predicate_ty)?;
            TypeTag::Collection { source }
        }
        Expr::Aggregate { collection, .. } => {
            let collection_ty = check(collection)?;
            if !matches!(collection_ty, TypeTag::Collection { .. }) {
                return Err(CompileError::TypeMismatch {
                    node: collection.describe(),
                    expected: "collection".to_string(),
                    actual: collection_ty.to_string(),
                    span: collection.span.or(span),
                });
            }
            TypeTag::NUM_SERIES
        }
        Expr::MemberAccess { child, name } => {
            let child_ty = check(child)?;
            let TypeTag::Structured { fields } = &child_ty else {
                return Err(CompileError::TypeMismatch {
                    node: child.describe(),
                    expected: "structured output".to_string(),
                    actual: child_ty.to_string(),
                    span,
                });
            };
            fields
                .get(name.as_str())
                .cloned()
                .ok_or_else(|| CompileError::TypeMismatch {
                    node: format!("MemberAccess({name})"),
                    expected: format!(
                        "one of {{{}}}",
                        fields.keys().cloned().collect::<Vec<_>>().join(", ")
                    ),
                    actual: format!("`{name}`"),
                    span,
                })?
        }
    };
    node.ty = Some(ty.clone());
    Ok(ty)
}

/// The user-visible output type of an indicator: a single series, or a
/// structured record of named series for multi-output indicators.
pub fn indicator_output_type(meta: &crate::catalog::IndicatorMeta) -> TypeTag {
    if meta.outputs.len() == 1 {
        output_series_type(meta.outputs[0].kind)
    } else {
        let fields: BTreeMap<String, TypeTag> = meta
            .outputs
            .iter()
            .map(|out| (out.name.to_string(), output_series_type(out.kind)))
            .collect();
        TypeTag::Structured { fields }
    }
}

fn output_series_type(kind: crate::catalog::OutputKind) -> TypeTag {
    if kind.is_boolean() {
        TypeTag::BOOL_SERIES
    } else {
        TypeTag::NUM_SERIES
    }
}

fn require_numeric(node: &Node, ty: &TypeTag) -> Result<(), CompileError> {
    if ty.is_numeric() {
        Ok(())
    } else {
        Err(CompileError::TypeMismatch {
            node: node.describe(),
            expected: "numeric operand".to_string(),
            actual: ty.to_string(),
            span: node.span,
        })
    }
}

fn require_boolean(node: &Node, ty: &TypeTag) -> Result<(), CompileError> {
    if ty.is_boolean() {
        Ok(())
    } else {
        Err(CompileError::TypeMismatch {
            node: node.describe(),
            expected: "boolean operand".to_string(),
            actual: ty.to_string(),
            span: node.span,
        })
    }
}
