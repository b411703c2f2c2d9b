//! Public orchestration surface: compile, validate, analyze, preview.

use crate::catalog::{Catalog, Category, IndicatorMeta, OutputKind};
use crate::dataset::{Dataset, DatasetSchema};
use crate::error::{CompileError, EngineError, ErrorBody, PlanError};
use crate::eval::batch::{evaluate_batch, BatchResult};
use crate::eval::Frame;
use crate::ir::{Expr, Node};
use crate::kernels::binding_warmup_hint;
use crate::normalize::normalize;
use crate::parse::parse;
use crate::plan::{DataRequirement, Plan};
use crate::planner::{plan_with, PlanOptions};
use crate::typecheck::typecheck;
use serde::Serialize;
use std::collections::BTreeMap;

/// Standard wire envelope wrapping every public entry point result.
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    pub warnings: Vec<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(value: T, warnings: Vec<String>) -> Self {
        Self {
            ok: true,
            value: Some(value),
            error: None,
            warnings,
        }
    }

    pub fn failure(error: &EngineError) -> Self {
        Self {
            ok: false,
            value: None,
            error: Some(ErrorBody::from(error)),
            warnings: Vec::new(),
        }
    }
}

impl<T> From<Result<(T, Vec<String>), EngineError>> for ApiResponse<T> {
    fn from(result: Result<(T, Vec<String>), EngineError>) -> Self {
        match result {
            Ok((value, warnings)) => Self::success(value, warnings),
            Err(error) => Self::failure(&error),
        }
    }
}

/// Parse a DSL expression into normalized, typechecked IR.
pub fn compile_text(source: &str) -> Result<Node, EngineError> {
    let parsed = parse(source)?;
    compile_ir(&parsed)
}

/// Normalize and typecheck raw IR from any frontend.
pub fn compile_ir(ir: &Node) -> Result<Node, EngineError> {
    let normalized = normalize(ir)?;
    Ok(typecheck(&normalized)?)
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<ErrorBody>,
    pub warnings: Vec<String>,
    pub indicators: Vec<String>,
}

/// Run normalize + typecheck (+ planning when a schema is given) without
/// executing anything.
pub fn validate(ir: &Node, schema: Option<&DatasetSchema>) -> ValidationReport {
    let mut report = ValidationReport {
        valid: true,
        errors: Vec::new(),
        warnings: Vec::new(),
        indicators: Vec::new(),
    };
    let typed = match compile_ir(ir) {
        Ok(typed) => typed,
        Err(err) => {
            report.valid = false;
            report.errors.push(ErrorBody::from(&err));
            return report;
        }
    };
    report.indicators = collect_indicators(&typed);

    let Some(schema) = schema else {
        report
            .warnings
            .push("no dataset schema given; planning skipped".to_string());
        return report;
    };
    let compiled = match plan_with(&typed, schema, PlanOptions::default()) {
        Ok(compiled) => compiled,
        Err(err) => {
            report.valid = false;
            report.errors.push(ErrorBody::from(&err));
            return report;
        }
    };
    for requirement in compiled.requirements() {
        let have = schema
            .bars(
                &requirement.symbol,
                requirement.timeframe,
                requirement.source,
                &requirement.field,
            )
            .unwrap_or_else(|| {
                if requirement.source.is_candle() {
                    0
                } else {
                    // Tick collections do not report bar counts.
                    requirement.min_bars
                }
            });
        if !requirement.source.is_candle() {
            if !schema.has_collection_field(
                &requirement.symbol,
                requirement.source,
                &requirement.field,
            ) {
                report.valid = false;
                report.errors.push(ErrorBody::from(&EngineError::from(
                    missing_data(&requirement, 0),
                )));
            }
            continue;
        }
        if have == 0 {
            report.valid = false;
            report.errors.push(ErrorBody::from(&EngineError::from(
                missing_data(&requirement, have),
            )));
        } else if have < requirement.min_bars {
            report.warnings.push(format!(
                "{}/{}/{}/{} has {have} bars, {} needed for full warmup",
                requirement.symbol,
                requirement.timeframe,
                requirement.source,
                requirement.field,
                requirement.min_bars
            ));
        }
    }
    report
}

fn missing_data(requirement: &DataRequirement, have: usize) -> PlanError {
    PlanError::MissingData {
        symbol: requirement.symbol.clone(),
        timeframe: requirement.timeframe.to_string(),
        source_name: requirement.source.as_str().to_string(),
        field: requirement.field.clone(),
        have_bars: have,
        need_bars: requirement.min_bars,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Analysis {
    pub indicators: Vec<String>,
    pub lookback: usize,
    pub max_period: usize,
    pub min_bars_recommended: usize,
}

/// Lookback summary without a dataset: how much history an expression wants.
pub fn analyze(ir: &Node) -> Result<Analysis, EngineError> {
    let typed = compile_ir(ir)?;
    let lookback = ir_lookback(&typed)?;
    let max_period = max_lookback_param(&typed);
    let safety_buffer = (lookback / 10).max(20);
    Ok(Analysis {
        indicators: collect_indicators(&typed),
        lookback,
        max_period,
        min_bars_recommended: lookback + safety_buffer,
    })
}

fn ir_lookback(node: &Node) -> Result<usize, EngineError> {
    let own = match &node.expr {
        Expr::Call {
            indicator, params, ..
        } => {
            let meta = Catalog::find(indicator).ok_or_else(|| CompileError::UnknownIndicator {
                name: indicator.clone(),
                span: node.span,
            })?;
            match meta.kernel_id() {
                Some(kernel_id) => binding_warmup_hint(kernel_id, params)?.lookback_bars(),
                None => 0,
            }
        }
        Expr::TimeShift { delta, .. } => match delta {
            crate::types::ShiftDelta::Bars(bars) => (*bars).max(0) as usize,
            crate::types::ShiftDelta::Nanos(_) => 0,
        },
        _ => 0,
    };
    let mut deepest = 0usize;
    for child in node.children() {
        deepest = deepest.max(ir_lookback(child)?);
    }
    Ok(own + deepest)
}

fn max_lookback_param(node: &Node) -> usize {
    let mut max_period = 0usize;
    if let Expr::Call {
        indicator, params, ..
    } = &node.expr
    {
        if let Some(meta) = Catalog::find(indicator) {
            for name in meta.semantics.lookback_params {
                if let Some(value) = params.get(*name).and_then(|v| v.as_int()) {
                    max_period = max_period.max(value.max(0) as usize);
                }
            }
        }
    }
    for child in node.children() {
        max_period = max_period.max(max_lookback_param(child));
    }
    max_period
}

fn collect_indicators(node: &Node) -> Vec<String> {
    fn walk(node: &Node, out: &mut Vec<String>) {
        if let Expr::Call { indicator, .. } = &node.expr {
            if !out.iter().any(|seen| seen == indicator) {
                out.push(indicator.clone());
            }
        }
        for child in node.children() {
            walk(child, out);
        }
    }
    let mut out = Vec::new();
    walk(node, &mut out);
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaneHint {
    PriceOverlay,
    Volume,
    Pane,
}

#[derive(Debug, Clone, Serialize)]
pub struct RenderHints {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub pane_hint: PaneHint,
    pub style_hint: String,
}

/// Per-output metadata: where a rendered series comes from and how to draw
/// it.
#[derive(Debug, Clone, Serialize)]
pub struct Emission {
    pub node_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indicator: Option<String>,
    pub output_name: String,
    pub resolved_input_binding: String,
    pub render_hints: RenderHints,
}

#[derive(Debug, Clone, Serialize)]
pub struct Preview {
    pub series_by_output: BTreeMap<String, Frame>,
    pub emissions: Vec<Emission>,
    /// Leading rows still inside warmup on the root output.
    pub trim: usize,
    pub requirements: Vec<DataRequirement>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PreviewOptions {
    pub plan: PlanOptions,
}

/// Compile, plan, and batch-evaluate an expression over a dataset.
pub fn preview(
    ir: &Node,
    dataset: &Dataset,
    options: PreviewOptions,
) -> Result<(Preview, Vec<String>), EngineError> {
    let typed = compile_ir(ir)?;
    let compiled = plan_with(&typed, &dataset.schema(), options.plan)?;
    let result = evaluate_batch(&compiled, dataset)?;
    let preview = build_preview(&typed, &compiled, &result)?;
    Ok((preview, result.warnings.clone()))
}

fn build_preview(
    typed: &Node,
    compiled: &Plan,
    result: &BatchResult,
) -> Result<Preview, EngineError> {
    let root_id = compiled
        .outputs
        .first()
        .cloned()
        .unwrap_or_default();
    let root_frame = result.frame(&root_id).cloned().unwrap_or_default();
    let root_node = compiled.node(&root_id);

    let trim = root_frame
        .columns
        .first()
        .map(|column| {
            column
                .available
                .iter()
                .position(|available| *available)
                .unwrap_or(column.available.len())
        })
        .unwrap_or(0);

    let primary = primary_indicator(typed);
    let input_binding = compiled
        .requirements()
        .iter()
        .map(|req| {
            format!(
                "{}/{}/{}/{}",
                req.symbol, req.timeframe, req.source, req.field
            )
        })
        .collect::<Vec<_>>()
        .join(", ");

    let mut series_by_output = BTreeMap::new();
    let mut emissions = Vec::new();
    if let Some(node) = root_node {
        for (idx, field) in node.output_schema.iter().enumerate() {
            let mut frame = Frame::with_schema(std::slice::from_ref(field));
            for row in 0..root_frame.len() {
                let sample = root_frame.row(row)[idx];
                frame.push_emit(
                    root_frame.timestamps[row],
                    &crate::kernels::Emit::single(sample.value, sample.available),
                );
            }
            series_by_output.insert(field.name.clone(), frame);

            let (role, style_hint) = output_hints(primary, &field.name, field.boolean);
            emissions.push(Emission {
                node_id: root_id.clone(),
                indicator: primary.map(|meta| meta.id.to_string()),
                output_name: field.name.clone(),
                resolved_input_binding: input_binding.clone(),
                render_hints: RenderHints {
                    role,
                    pane_hint: pane_hint(primary, compiled),
                    style_hint,
                },
            });
        }
    }

    Ok(Preview {
        series_by_output,
        emissions,
        trim,
        requirements: compiled.requirements(),
    })
}

/// The outermost indicator call, looking through member access.
fn primary_indicator(node: &Node) -> Option<&'static IndicatorMeta> {
    match &node.expr {
        Expr::Call { indicator, .. } => Catalog::find(indicator),
        Expr::MemberAccess { child, .. } => primary_indicator(child),
        _ => None,
    }
}

/// Deterministic pane derivation: oscillators pane out, volume-driven
/// indicators join the volume pane, price-shaped outputs overlay price.
fn pane_hint(primary: Option<&IndicatorMeta>, compiled: &Plan) -> PaneHint {
    let fields = &compiled.capability_manifest.fields;
    let volume_driven = fields.contains("volume") && fields.len() == 1;
    match primary {
        Some(meta) if meta.category.is_oscillator() => PaneHint::Pane,
        Some(meta) if meta.category == Category::Volume => {
            if volume_driven {
                PaneHint::Volume
            } else {
                PaneHint::Pane
            }
        }
        Some(_) => PaneHint::PriceOverlay,
        None => PaneHint::Pane,
    }
}

fn output_hints(
    primary: Option<&IndicatorMeta>,
    output_name: &str,
    boolean: bool,
) -> (Option<String>, String) {
    if let Some(meta) = primary {
        if let Some(spec) = meta.outputs.iter().find(|out| out.name == output_name) {
            return (
                spec.role.map(str::to_string),
                spec.kind.as_str().to_string(),
            );
        }
    }
    let style = if boolean {
        OutputKind::Signal.as_str()
    } else {
        OutputKind::Line.as_str()
    };
    (None, style.to_string())
}
