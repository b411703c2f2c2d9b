//! Static indicator catalog.
//!
//! One `const` table of metadata records drives planning, validation, and
//! the user-visible schemas. The index over it is built once and validated
//! on first access: registry mistakes (duplicate ids, aliases shadowing
//! ids, parameter/binding mismatches) panic at startup rather than
//! surfacing as query-time errors.

use crate::error::CompileError;
use crate::ir::Node;
use crate::kernels::{KernelId, WarmupPolicy};
use crate::types::{ParamValue, Span, TypedParams};
use serde_json::json;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Trend,
    Momentum,
    Volatility,
    Volume,
    Event,
    Statistic,
    Pattern,
}

impl Category {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trend => "trend",
            Self::Momentum => "momentum",
            Self::Volatility => "volatility",
            Self::Volume => "volume",
            Self::Event => "event",
            Self::Statistic => "statistic",
            Self::Pattern => "pattern",
        }
    }

    /// Oscillators render in their own pane rather than on price.
    pub const fn is_oscillator(self) -> bool {
        matches!(self, Self::Momentum | Self::Event | Self::Statistic)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamKind {
    Int,
    Float,
    Bool,
    Choice(&'static [&'static str]),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DefaultValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(&'static str),
}

impl DefaultValue {
    fn to_param(self) -> ParamValue {
        match self {
            Self::Int(v) => ParamValue::Int(v),
            Self::Float(v) => ParamValue::Float(v),
            Self::Bool(v) => ParamValue::Bool(v),
            Self::Text(v) => ParamValue::Text(v.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
    pub default: Option<DefaultValue>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl ParamSpec {
    const fn int(name: &'static str, default: i64) -> Self {
        Self {
            name,
            kind: ParamKind::Int,
            required: false,
            default: Some(DefaultValue::Int(default)),
            min: Some(1.0),
            max: Some(100_000.0),
        }
    }

    const fn int_min(name: &'static str, default: i64, min: f64) -> Self {
        Self {
            name,
            kind: ParamKind::Int,
            required: false,
            default: Some(DefaultValue::Int(default)),
            min: Some(min),
            max: Some(100_000.0),
        }
    }

    const fn float(name: &'static str, default: f64, min: f64, max: f64) -> Self {
        Self {
            name,
            kind: ParamKind::Float,
            required: false,
            default: Some(DefaultValue::Float(default)),
            min: Some(min),
            max: Some(max),
        }
    }

    const fn required_float(name: &'static str, min: f64, max: f64) -> Self {
        Self {
            name,
            kind: ParamKind::Float,
            required: true,
            default: None,
            min: Some(min),
            max: Some(max),
        }
    }

    const fn choice(
        name: &'static str,
        options: &'static [&'static str],
        default: &'static str,
    ) -> Self {
        Self {
            name,
            kind: ParamKind::Choice(options),
            required: false,
            default: Some(DefaultValue::Text(default)),
            min: None,
            max: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    Line,
    Band,
    Signal,
    Histogram,
}

impl OutputKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Line => "line",
            Self::Band => "band",
            Self::Signal => "signal",
            Self::Histogram => "histogram",
        }
    }

    pub const fn is_boolean(self) -> bool {
        matches!(self, Self::Signal)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OutputSpec {
    pub name: &'static str,
    pub kind: OutputKind,
    pub role: Option<&'static str>,
}

impl OutputSpec {
    const fn line(name: &'static str) -> Self {
        Self {
            name,
            kind: OutputKind::Line,
            role: None,
        }
    }

    const fn band(name: &'static str, role: &'static str) -> Self {
        Self {
            name,
            kind: OutputKind::Band,
            role: Some(role),
        }
    }

    const fn signal(name: &'static str) -> Self {
        Self {
            name,
            kind: OutputKind::Signal,
            role: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Semantics {
    /// Default input fields, in input-slot order, used to fill elided
    /// inputs during normalization.
    pub required_fields: &'static [&'static str],
    pub optional_fields: &'static [&'static str],
    /// Parameter names that stretch the lookback window.
    pub lookback_params: &'static [&'static str],
    /// Lookback under default parameters, for analyze-style summaries.
    pub default_lookback: usize,
    pub warmup_policy: WarmupPolicy,
    /// Accepted batch/incremental divergence for this kernel's outputs.
    pub tolerance_ulps: u32,
}

/// How a call is realized: one kernel instance, or rewritten into a
/// sub-graph of further calls.
#[derive(Clone, Copy)]
pub enum Binding {
    Kernel(KernelId),
    SubDag(fn(&TypedParams, Vec<Node>) -> Node),
}

impl std::fmt::Debug for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Kernel(id) => write!(f, "Kernel({id:?})"),
            Self::SubDag(_) => write!(f, "SubDag(..)"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct IndicatorMeta {
    pub id: &'static str,
    pub display_name: &'static str,
    pub category: Category,
    pub aliases: &'static [&'static str],
    /// `(alias, canonical)` parameter name pairs.
    pub param_aliases: &'static [(&'static str, &'static str)],
    pub params: &'static [ParamSpec],
    pub outputs: &'static [OutputSpec],
    /// Number of series input expressions the indicator consumes.
    pub input_slots: usize,
    pub semantics: Semantics,
    pub binding: Binding,
}

impl IndicatorMeta {
    pub fn kernel_id(&self) -> Option<KernelId> {
        match self.binding {
            Binding::Kernel(id) => Some(id),
            Binding::SubDag(_) => None,
        }
    }

    pub fn is_multi_output(&self) -> bool {
        self.outputs.len() > 1
    }

    pub fn output_index(&self, name: &str) -> Option<usize> {
        self.outputs.iter().position(|out| out.name == name)
    }
}

pub struct Catalog;

impl Catalog {
    /// All records in stable id order.
    pub fn list() -> Vec<&'static IndicatorMeta> {
        let index = index();
        index.sorted.iter().map(|idx| &METAS[*idx]).collect()
    }

    pub fn find(name_or_alias: &str) -> Option<&'static IndicatorMeta> {
        let index = index();
        index
            .by_name
            .get(name_or_alias)
            .map(|idx| &METAS[*idx])
    }

    /// Alias resolution, positional binding, type/range checks, default
    /// fill. The result is the complete canonical parameter record.
    pub fn coerce_params(
        meta: &IndicatorMeta,
        named: &BTreeMap<String, ParamValue>,
        positional: &[ParamValue],
        span: Option<Span>,
    ) -> Result<TypedParams, CompileError> {
        let mut out: TypedParams = BTreeMap::new();

        if positional.len() > meta.params.len() {
            return Err(CompileError::InvalidParameter {
                name: meta.id.to_string(),
                reason: format!(
                    "takes at most {} parameters, got {} positional",
                    meta.params.len(),
                    positional.len()
                ),
                span,
            });
        }
        for (spec, value) in meta.params.iter().zip(positional.iter()) {
            out.insert(spec.name.to_string(), value.clone());
        }

        for (raw_name, value) in named {
            let canonical = resolve_param_name(meta, raw_name);
            let Some(spec) = meta.params.iter().find(|p| p.name == canonical) else {
                return Err(CompileError::InvalidParameter {
                    name: raw_name.clone(),
                    reason: format!("unknown parameter for `{}`", meta.id),
                    span,
                });
            };
            if out.contains_key(spec.name) {
                return Err(CompileError::InvalidParameter {
                    name: raw_name.clone(),
                    reason: "given both positionally and by name".to_string(),
                    span,
                });
            }
            out.insert(spec.name.to_string(), value.clone());
        }

        for spec in meta.params {
            match out.get(spec.name) {
                Some(value) => {
                    let coerced = coerce_value(spec, value, span)?;
                    out.insert(spec.name.to_string(), coerced);
                }
                None => {
                    if let Some(default) = spec.default {
                        out.insert(spec.name.to_string(), default.to_param());
                    } else if spec.required {
                        return Err(CompileError::InvalidParameter {
                            name: spec.name.to_string(),
                            reason: "required parameter missing".to_string(),
                            span,
                        });
                    }
                }
            }
        }
        Ok(out)
    }

    /// Deterministic JSON export of the whole catalog, keys sorted. Feeds
    /// drift tests and external UIs.
    pub fn export_json() -> String {
        let records: Vec<serde_json::Value> = Self::list()
            .into_iter()
            .map(|meta| {
                json!({
                    "id": meta.id,
                    "display_name": meta.display_name,
                    "category": meta.category.as_str(),
                    "aliases": meta.aliases,
                    "param_aliases": meta
                        .param_aliases
                        .iter()
                        .map(|(alias, canonical)| json!({"alias": alias, "param": canonical}))
                        .collect::<Vec<_>>(),
                    "params": meta
                        .params
                        .iter()
                        .map(|p| {
                            json!({
                                "name": p.name,
                                "kind": match p.kind {
                                    ParamKind::Int => json!("int"),
                                    ParamKind::Float => json!("float"),
                                    ParamKind::Bool => json!("bool"),
                                    ParamKind::Choice(options) => json!({"enum": options}),
                                },
                                "required": p.required,
                                "default": p.default.map(|d| match d {
                                    DefaultValue::Int(v) => json!(v),
                                    DefaultValue::Float(v) => json!(v),
                                    DefaultValue::Bool(v) => json!(v),
                                    DefaultValue::Text(v) => json!(v),
                                }),
                                "min": p.min,
                                "max": p.max,
                            })
                        })
                        .collect::<Vec<_>>(),
                    "outputs": meta
                        .outputs
                        .iter()
                        .map(|o| json!({
                            "name": o.name,
                            "kind": o.kind.as_str(),
                            "role": o.role,
                        }))
                        .collect::<Vec<_>>(),
                    "semantics": {
                        "required_fields": meta.semantics.required_fields,
                        "optional_fields": meta.semantics.optional_fields,
                        "lookback_params": meta.semantics.lookback_params,
                        "default_lookback": meta.semantics.default_lookback,
                        "warmup_policy": match meta.semantics.warmup_policy {
                            WarmupPolicy::Window => "window",
                            WarmupPolicy::Recursive => "recursive",
                            WarmupPolicy::Cumulative => "cumulative",
                            WarmupPolicy::None => "none",
                        },
                        "tolerance_ulps": meta.semantics.tolerance_ulps,
                    },
                    "runtime_binding": match meta.binding {
                        Binding::Kernel(id) => json!({"kernel": id}),
                        Binding::SubDag(_) => json!({"sub_dag": true}),
                    },
                })
            })
            .collect();
        serde_json::Value::Array(records).to_string()
    }
}

fn resolve_param_name(meta: &IndicatorMeta, raw: &str) -> &'static str {
    for (alias, canonical) in meta.param_aliases {
        if *alias == raw {
            return canonical;
        }
    }
    meta.params
        .iter()
        .find(|p| p.name == raw)
        .map(|p| p.name)
        .unwrap_or("")
}

fn coerce_value(
    spec: &ParamSpec,
    value: &ParamValue,
    span: Option<Span>,
) -> Result<ParamValue, CompileError> {
    let coerced = match spec.kind {
        ParamKind::Int => value.as_int().map(ParamValue::Int),
        ParamKind::Float => value.as_float().map(ParamValue::Float),
        ParamKind::Bool => value.as_bool().map(ParamValue::Bool),
        ParamKind::Choice(options) => value.as_text().and_then(|text| {
            options
                .iter()
                .find(|opt| **opt == text)
                .map(|opt| ParamValue::Text((*opt).to_string()))
        }),
    };
    let Some(coerced) = coerced else {
        return Err(CompileError::InvalidParameter {
            name: spec.name.to_string(),
            reason: format!("expected {:?}, got {value:?}", spec.kind),
            span,
        });
    };
    if let (Some(numeric), (Some(min), Some(max))) = (coerced.as_float(), (spec.min, spec.max)) {
        if numeric < min || numeric > max {
            return Err(CompileError::ParameterOutOfRange {
                name: spec.name.to_string(),
                value: numeric,
                min,
                max,
                span,
            });
        }
    }
    Ok(coerced)
}

struct RegistryIndex {
    by_name: HashMap<&'static str, usize>,
    sorted: Vec<usize>,
}

static REGISTRY_INDEX: OnceLock<RegistryIndex> = OnceLock::new();

fn index() -> &'static RegistryIndex {
    REGISTRY_INDEX.get_or_init(build_index)
}

fn build_index() -> RegistryIndex {
    let mut by_name: HashMap<&'static str, usize> = HashMap::new();
    for (idx, meta) in METAS.iter().enumerate() {
        validate_meta(meta);
        if by_name.insert(meta.id, idx).is_some() {
            panic!("duplicate indicator id in catalog: {}", meta.id);
        }
    }
    for (idx, meta) in METAS.iter().enumerate() {
        for alias in meta.aliases {
            if by_name.insert(alias, idx).is_some() {
                panic!(
                    "alias `{alias}` of `{}` collides with another entry",
                    meta.id
                );
            }
        }
    }
    let mut sorted: Vec<usize> = (0..METAS.len()).collect();
    sorted.sort_by_key(|idx| METAS[*idx].id);
    RegistryIndex { by_name, sorted }
}

fn validate_meta(meta: &IndicatorMeta) {
    if meta.outputs.is_empty() {
        panic!("indicator `{}` declares no outputs", meta.id);
    }
    if meta.outputs.len() > crate::kernels::MAX_OUTPUTS {
        panic!("indicator `{}` exceeds MAX_OUTPUTS", meta.id);
    }
    if meta.input_slots == 0 {
        panic!("indicator `{}` must consume at least one input", meta.id);
    }
    if meta.input_slots > 1
        && !meta.semantics.required_fields.is_empty()
        && meta.semantics.required_fields.len() != meta.input_slots
    {
        panic!(
            "indicator `{}` default fields must cover every input slot",
            meta.id
        );
    }
    for (alias, canonical) in meta.param_aliases {
        if !meta.params.iter().any(|p| p.name == *canonical) {
            panic!(
                "indicator `{}` aliases `{alias}` to unknown param `{canonical}`",
                meta.id
            );
        }
    }
    for lookback in meta.semantics.lookback_params {
        if !meta.params.iter().any(|p| p.name == *lookback) {
            panic!(
                "indicator `{}` lookback param `{lookback}` is not declared",
                meta.id
            );
        }
    }
}

const NO_FIELDS: &[&str] = &[];
const CLOSE: &[&str] = &["close"];
const HL: &[&str] = &["high", "low"];
const HLC: &[&str] = &["high", "low", "close"];
const HLCV: &[&str] = &["high", "low", "close", "volume"];
const CV: &[&str] = &["close", "volume"];
const NO_ALIASES: &[&str] = &[];
const NO_PARAM_ALIASES: &[(&str, &str)] = &[];
const PERIOD_ALIASES: &[(&str, &str)] = &[("length", "period"), ("window", "period"), ("n", "period")];
const VALUE_OUT: &[OutputSpec] = &[OutputSpec::line("value")];
const SIGNAL_OUT: &[OutputSpec] = &[OutputSpec::signal("value")];

const fn rolling_meta(
    id: &'static str,
    display_name: &'static str,
    aliases: &'static [&'static str],
    default_period: i64,
    kernel: KernelId,
) -> IndicatorMeta {
    IndicatorMeta {
        id,
        display_name,
        category: Category::Statistic,
        aliases,
        param_aliases: PERIOD_ALIASES,
        params: {
            const P: [ParamSpec; 1] = [ParamSpec::int("period", 14)];
            &P
        },
        outputs: VALUE_OUT,
        input_slots: 1,
        semantics: Semantics {
            required_fields: CLOSE,
            optional_fields: NO_FIELDS,
            lookback_params: &["period"],
            default_lookback: default_period as usize,
            warmup_policy: WarmupPolicy::Window,
            tolerance_ulps: 4,
        },
        binding: Binding::Kernel(kernel),
    }
}

const fn smoother_meta(
    id: &'static str,
    display_name: &'static str,
    aliases: &'static [&'static str],
    kernel: KernelId,
) -> IndicatorMeta {
    IndicatorMeta {
        id,
        display_name,
        category: Category::Trend,
        aliases,
        param_aliases: PERIOD_ALIASES,
        params: {
            const P: [ParamSpec; 1] = [ParamSpec::int("period", 14)];
            &P
        },
        outputs: VALUE_OUT,
        input_slots: 1,
        semantics: Semantics {
            required_fields: CLOSE,
            optional_fields: NO_FIELDS,
            lookback_params: &["period"],
            default_lookback: 14,
            warmup_policy: WarmupPolicy::Recursive,
            tolerance_ulps: 64,
        },
        binding: Binding::Kernel(kernel),
    }
}

const fn event_meta(
    id: &'static str,
    display_name: &'static str,
    input_slots: usize,
    params: &'static [ParamSpec],
    kernel: KernelId,
) -> IndicatorMeta {
    IndicatorMeta {
        id,
        display_name,
        category: Category::Event,
        aliases: NO_ALIASES,
        param_aliases: NO_PARAM_ALIASES,
        params,
        outputs: SIGNAL_OUT,
        input_slots,
        semantics: Semantics {
            required_fields: NO_FIELDS,
            optional_fields: NO_FIELDS,
            lookback_params: &[],
            default_lookback: 2,
            warmup_policy: WarmupPolicy::Window,
            tolerance_ulps: 0,
        },
        binding: Binding::Kernel(kernel),
    }
}

fn expand_fib_retracement(params: &TypedParams, inputs: Vec<Node>) -> Node {
    let left = params
        .get("left")
        .and_then(ParamValue::as_int)
        .unwrap_or(2);
    let right = params
        .get("right")
        .and_then(ParamValue::as_int)
        .unwrap_or(2);
    let swings = Node::call_with(
        "swing_points",
        inputs,
        [
            ("left", ParamValue::Int(left)),
            ("right", ParamValue::Int(right)),
        ],
    );
    Node::call(
        "fib_levels",
        vec![
            Node::member(swings.clone(), "high_level"),
            Node::member(swings, "low_level"),
        ],
    )
}

const METAS: [IndicatorMeta; 55] = [
    // Rolling reducers.
    rolling_meta("sum", "Rolling Sum", &["rolling_sum"], 14, KernelId::RollingSum),
    rolling_meta("sma", "Simple Moving Average", &["mean", "rolling_mean"], 14, KernelId::RollingMean),
    rolling_meta("std", "Rolling Standard Deviation", &["stddev", "stdev"], 14, KernelId::RollingStd),
    rolling_meta("min", "Rolling Minimum", &["lowest"], 14, KernelId::RollingMin),
    rolling_meta("max", "Rolling Maximum", &["highest"], 14, KernelId::RollingMax),
    rolling_meta("argmax", "Bars Since Maximum", NO_ALIASES, 14, KernelId::RollingArgMax),
    rolling_meta("argmin", "Bars Since Minimum", NO_ALIASES, 14, KernelId::RollingArgMin),
    rolling_meta("median", "Rolling Median", NO_ALIASES, 14, KernelId::RollingMedian),
    // Smoothers.
    smoother_meta("ema", "Exponential Moving Average", NO_ALIASES, KernelId::Ema),
    smoother_meta("rma", "Wilder Moving Average", &["smma"], KernelId::Rma),
    IndicatorMeta {
        id: "wma",
        display_name: "Weighted Moving Average",
        category: Category::Trend,
        aliases: NO_ALIASES,
        param_aliases: PERIOD_ALIASES,
        params: &[ParamSpec::int("period", 14)],
        outputs: VALUE_OUT,
        input_slots: 1,
        semantics: Semantics {
            required_fields: CLOSE,
            optional_fields: NO_FIELDS,
            lookback_params: &["period"],
            default_lookback: 14,
            warmup_policy: WarmupPolicy::Window,
            tolerance_ulps: 4,
        },
        binding: Binding::Kernel(KernelId::Wma),
    },
    IndicatorMeta {
        id: "hma",
        display_name: "Hull Moving Average",
        category: Category::Trend,
        aliases: NO_ALIASES,
        param_aliases: PERIOD_ALIASES,
        params: &[ParamSpec::int("period", 14)],
        outputs: VALUE_OUT,
        input_slots: 1,
        semantics: Semantics {
            required_fields: CLOSE,
            optional_fields: NO_FIELDS,
            lookback_params: &["period"],
            default_lookback: 17,
            warmup_policy: WarmupPolicy::Window,
            tolerance_ulps: 8,
        },
        binding: Binding::Kernel(KernelId::Hma),
    },
    // Cumulative.
    IndicatorMeta {
        id: "cumsum",
        display_name: "Cumulative Sum",
        category: Category::Statistic,
        aliases: NO_ALIASES,
        param_aliases: NO_PARAM_ALIASES,
        params: &[],
        outputs: VALUE_OUT,
        input_slots: 1,
        semantics: Semantics {
            required_fields: CLOSE,
            optional_fields: NO_FIELDS,
            lookback_params: &[],
            default_lookback: 1,
            warmup_policy: WarmupPolicy::Cumulative,
            tolerance_ulps: 4,
        },
        binding: Binding::Kernel(KernelId::CumSum),
    },
    IndicatorMeta {
        id: "obv",
        display_name: "On-Balance Volume",
        category: Category::Volume,
        aliases: NO_ALIASES,
        param_aliases: NO_PARAM_ALIASES,
        params: &[],
        outputs: VALUE_OUT,
        input_slots: 2,
        semantics: Semantics {
            required_fields: CV,
            optional_fields: NO_FIELDS,
            lookback_params: &[],
            default_lookback: 1,
            warmup_policy: WarmupPolicy::Cumulative,
            tolerance_ulps: 4,
        },
        binding: Binding::Kernel(KernelId::Obv),
    },
    IndicatorMeta {
        id: "vwap",
        display_name: "Volume-Weighted Average Price",
        category: Category::Volume,
        aliases: NO_ALIASES,
        param_aliases: PERIOD_ALIASES,
        params: &[
            ParamSpec::int("period", 14),
            ParamSpec::choice("anchor", &["rolling", "session"], "rolling"),
        ],
        outputs: VALUE_OUT,
        input_slots: 4,
        semantics: Semantics {
            required_fields: HLCV,
            optional_fields: NO_FIELDS,
            lookback_params: &["period"],
            default_lookback: 14,
            warmup_policy: WarmupPolicy::Window,
            tolerance_ulps: 8,
        },
        binding: Binding::Kernel(KernelId::Vwap),
    },
    // Differencing / transforms.
    IndicatorMeta {
        id: "diff",
        display_name: "Difference",
        category: Category::Statistic,
        aliases: &["delta"],
        param_aliases: &[("k", "bars"), ("lag", "bars")],
        params: &[ParamSpec::int("bars", 1)],
        outputs: VALUE_OUT,
        input_slots: 1,
        semantics: Semantics {
            required_fields: CLOSE,
            optional_fields: NO_FIELDS,
            lookback_params: &["bars"],
            default_lookback: 2,
            warmup_policy: WarmupPolicy::Window,
            tolerance_ulps: 0,
        },
        binding: Binding::Kernel(KernelId::Diff),
    },
    IndicatorMeta {
        id: "roc",
        display_name: "Rate of Change",
        category: Category::Momentum,
        aliases: NO_ALIASES,
        param_aliases: PERIOD_ALIASES,
        params: &[ParamSpec::int("period", 10)],
        outputs: VALUE_OUT,
        input_slots: 1,
        semantics: Semantics {
            required_fields: CLOSE,
            optional_fields: NO_FIELDS,
            lookback_params: &["period"],
            default_lookback: 11,
            warmup_policy: WarmupPolicy::Window,
            tolerance_ulps: 4,
        },
        binding: Binding::Kernel(KernelId::Roc),
    },
    IndicatorMeta {
        id: "shift",
        display_name: "Shift",
        category: Category::Statistic,
        aliases: &["lag"],
        param_aliases: &[("k", "bars")],
        params: &[ParamSpec::int_min("bars", 1, 0.0)],
        outputs: VALUE_OUT,
        input_slots: 1,
        semantics: Semantics {
            required_fields: CLOSE,
            optional_fields: NO_FIELDS,
            lookback_params: &["bars"],
            default_lookback: 2,
            warmup_policy: WarmupPolicy::Window,
            tolerance_ulps: 0,
        },
        binding: Binding::Kernel(KernelId::Shift),
    },
    IndicatorMeta {
        id: "true_range",
        display_name: "True Range",
        category: Category::Volatility,
        aliases: &["tr"],
        param_aliases: NO_PARAM_ALIASES,
        params: &[],
        outputs: VALUE_OUT,
        input_slots: 3,
        semantics: Semantics {
            required_fields: HLC,
            optional_fields: NO_FIELDS,
            lookback_params: &[],
            default_lookback: 1,
            warmup_policy: WarmupPolicy::None,
            tolerance_ulps: 0,
        },
        binding: Binding::Kernel(KernelId::TrueRange),
    },
    IndicatorMeta {
        id: "positive_values",
        display_name: "Positive Values",
        category: Category::Statistic,
        aliases: &["gains"],
        param_aliases: NO_PARAM_ALIASES,
        params: &[],
        outputs: VALUE_OUT,
        input_slots: 1,
        semantics: Semantics {
            required_fields: CLOSE,
            optional_fields: NO_FIELDS,
            lookback_params: &[],
            default_lookback: 1,
            warmup_policy: WarmupPolicy::None,
            tolerance_ulps: 0,
        },
        binding: Binding::Kernel(KernelId::PositiveValues),
    },
    IndicatorMeta {
        id: "negative_values",
        display_name: "Negative Values",
        category: Category::Statistic,
        aliases: &["losses"],
        param_aliases: NO_PARAM_ALIASES,
        params: &[],
        outputs: VALUE_OUT,
        input_slots: 1,
        semantics: Semantics {
            required_fields: CLOSE,
            optional_fields: NO_FIELDS,
            lookback_params: &[],
            default_lookback: 1,
            warmup_policy: WarmupPolicy::None,
            tolerance_ulps: 0,
        },
        binding: Binding::Kernel(KernelId::NegativeValues),
    },
    // Events.
    event_meta("crossup", "Cross Above", 2, &[], KernelId::CrossUp),
    event_meta("crossdown", "Cross Below", 2, &[], KernelId::CrossDown),
    event_meta(
        "rising",
        "Rising Run",
        1,
        &[ParamSpec::int("bars", 1)],
        KernelId::Rising,
    ),
    event_meta(
        "falling",
        "Falling Run",
        1,
        &[ParamSpec::int("bars", 1)],
        KernelId::Falling,
    ),
    event_meta(
        "rising_pct",
        "Rising by Percent",
        1,
        &[
            ParamSpec::int("bars", 1),
            ParamSpec::required_float("pct", 0.0, 10.0),
        ],
        KernelId::RisingPct,
    ),
    event_meta(
        "falling_pct",
        "Falling by Percent",
        1,
        &[
            ParamSpec::int("bars", 1),
            ParamSpec::required_float("pct", 0.0, 10.0),
        ],
        KernelId::FallingPct,
    ),
    event_meta("in_channel", "Inside Channel", 3, &[], KernelId::InChannel),
    event_meta("enter", "Enter Channel", 3, &[], KernelId::Enter),
    event_meta("exit", "Exit Channel", 3, &[], KernelId::Exit),
    // Momentum composites.
    IndicatorMeta {
        id: "rsi",
        display_name: "Relative Strength Index",
        category: Category::Momentum,
        aliases: NO_ALIASES,
        param_aliases: PERIOD_ALIASES,
        params: &[ParamSpec::int("period", 14)],
        outputs: VALUE_OUT,
        input_slots: 1,
        semantics: Semantics {
            required_fields: CLOSE,
            optional_fields: NO_FIELDS,
            lookback_params: &["period"],
            default_lookback: 15,
            warmup_policy: WarmupPolicy::Recursive,
            tolerance_ulps: 64,
        },
        binding: Binding::Kernel(KernelId::Rsi),
    },
    IndicatorMeta {
        id: "cmo",
        display_name: "Chande Momentum Oscillator",
        category: Category::Momentum,
        aliases: NO_ALIASES,
        param_aliases: PERIOD_ALIASES,
        params: &[ParamSpec::int("period", 14)],
        outputs: VALUE_OUT,
        input_slots: 1,
        semantics: Semantics {
            required_fields: CLOSE,
            optional_fields: NO_FIELDS,
            lookback_params: &["period"],
            default_lookback: 15,
            warmup_policy: WarmupPolicy::Window,
            tolerance_ulps: 8,
        },
        binding: Binding::Kernel(KernelId::Cmo),
    },
    IndicatorMeta {
        id: "stochastic",
        display_name: "Stochastic Oscillator",
        category: Category::Momentum,
        aliases: &["stoch"],
        param_aliases: &[("k_period", "k"), ("d_period", "d")],
        params: &[
            ParamSpec::int("k", 14),
            ParamSpec::int("d", 3),
            ParamSpec::int("smooth", 3),
        ],
        outputs: &[OutputSpec::line("k"), OutputSpec {
            name: "d",
            kind: OutputKind::Line,
            role: Some("signal"),
        }],
        input_slots: 3,
        semantics: Semantics {
            required_fields: HLC,
            optional_fields: NO_FIELDS,
            lookback_params: &["k", "d", "smooth"],
            default_lookback: 19,
            warmup_policy: WarmupPolicy::Window,
            tolerance_ulps: 8,
        },
        binding: Binding::Kernel(KernelId::Stochastic),
    },
    IndicatorMeta {
        id: "williams_r",
        display_name: "Williams %R",
        category: Category::Momentum,
        aliases: &["willr", "wpr"],
        param_aliases: PERIOD_ALIASES,
        params: &[ParamSpec::int("period", 14)],
        outputs: VALUE_OUT,
        input_slots: 3,
        semantics: Semantics {
            required_fields: HLC,
            optional_fields: NO_FIELDS,
            lookback_params: &["period"],
            default_lookback: 14,
            warmup_policy: WarmupPolicy::Window,
            tolerance_ulps: 8,
        },
        binding: Binding::Kernel(KernelId::WilliamsR),
    },
    IndicatorMeta {
        id: "cci",
        display_name: "Commodity Channel Index",
        category: Category::Momentum,
        aliases: NO_ALIASES,
        param_aliases: PERIOD_ALIASES,
        params: &[ParamSpec::int("period", 20)],
        outputs: VALUE_OUT,
        input_slots: 3,
        semantics: Semantics {
            required_fields: HLC,
            optional_fields: NO_FIELDS,
            lookback_params: &["period"],
            default_lookback: 20,
            warmup_policy: WarmupPolicy::Window,
            tolerance_ulps: 16,
        },
        binding: Binding::Kernel(KernelId::Cci),
    },
    IndicatorMeta {
        id: "mfi",
        display_name: "Money Flow Index",
        category: Category::Momentum,
        aliases: NO_ALIASES,
        param_aliases: PERIOD_ALIASES,
        params: &[ParamSpec::int("period", 14)],
        outputs: VALUE_OUT,
        input_slots: 4,
        semantics: Semantics {
            required_fields: HLCV,
            optional_fields: NO_FIELDS,
            lookback_params: &["period"],
            default_lookback: 15,
            warmup_policy: WarmupPolicy::Window,
            tolerance_ulps: 16,
        },
        binding: Binding::Kernel(KernelId::Mfi),
    },
    IndicatorMeta {
        id: "ao",
        display_name: "Awesome Oscillator",
        category: Category::Momentum,
        aliases: NO_ALIASES,
        param_aliases: NO_PARAM_ALIASES,
        params: &[ParamSpec::int("fast", 5), ParamSpec::int("slow", 34)],
        outputs: &[OutputSpec {
            name: "value",
            kind: OutputKind::Histogram,
            role: None,
        }],
        input_slots: 2,
        semantics: Semantics {
            required_fields: HL,
            optional_fields: NO_FIELDS,
            lookback_params: &["fast", "slow"],
            default_lookback: 34,
            warmup_policy: WarmupPolicy::Window,
            tolerance_ulps: 8,
        },
        binding: Binding::Kernel(KernelId::Ao),
    },
    IndicatorMeta {
        id: "coppock",
        display_name: "Coppock Curve",
        category: Category::Momentum,
        aliases: NO_ALIASES,
        param_aliases: NO_PARAM_ALIASES,
        params: &[
            ParamSpec::int("wma", 10),
            ParamSpec::int("long", 14),
            ParamSpec::int("short", 11),
        ],
        outputs: VALUE_OUT,
        input_slots: 1,
        semantics: Semantics {
            required_fields: CLOSE,
            optional_fields: NO_FIELDS,
            lookback_params: &["wma", "long", "short"],
            default_lookback: 24,
            warmup_policy: WarmupPolicy::Window,
            tolerance_ulps: 16,
        },
        binding: Binding::Kernel(KernelId::Coppock),
    },
    IndicatorMeta {
        id: "vortex",
        display_name: "Vortex Indicator",
        category: Category::Momentum,
        aliases: NO_ALIASES,
        param_aliases: PERIOD_ALIASES,
        params: &[ParamSpec::int("period", 14)],
        outputs: &[OutputSpec::line("plus"), OutputSpec::line("minus")],
        input_slots: 3,
        semantics: Semantics {
            required_fields: HLC,
            optional_fields: NO_FIELDS,
            lookback_params: &["period"],
            default_lookback: 15,
            warmup_policy: WarmupPolicy::Window,
            tolerance_ulps: 16,
        },
        binding: Binding::Kernel(KernelId::Vortex),
    },
    // Trend composites.
    IndicatorMeta {
        id: "macd",
        display_name: "Moving Average Convergence Divergence",
        category: Category::Trend,
        aliases: NO_ALIASES,
        param_aliases: &[("fast_period", "fast"), ("slow_period", "slow"), ("signal_period", "signal")],
        params: &[
            ParamSpec::int("fast", 12),
            ParamSpec::int("slow", 26),
            ParamSpec::int("signal", 9),
        ],
        outputs: &[
            OutputSpec::line("macd"),
            OutputSpec {
                name: "signal",
                kind: OutputKind::Line,
                role: Some("signal"),
            },
            OutputSpec {
                name: "histogram",
                kind: OutputKind::Histogram,
                role: None,
            },
        ],
        input_slots: 1,
        semantics: Semantics {
            required_fields: CLOSE,
            optional_fields: NO_FIELDS,
            lookback_params: &["fast", "slow", "signal"],
            default_lookback: 34,
            warmup_policy: WarmupPolicy::Recursive,
            tolerance_ulps: 64,
        },
        binding: Binding::Kernel(KernelId::Macd),
    },
    IndicatorMeta {
        id: "adx",
        display_name: "Average Directional Index",
        category: Category::Trend,
        aliases: NO_ALIASES,
        param_aliases: PERIOD_ALIASES,
        params: &[ParamSpec::int("period", 14)],
        outputs: &[
            OutputSpec::line("adx"),
            OutputSpec::line("plus_di"),
            OutputSpec::line("minus_di"),
        ],
        input_slots: 3,
        semantics: Semantics {
            required_fields: HLC,
            optional_fields: NO_FIELDS,
            lookback_params: &["period"],
            default_lookback: 28,
            warmup_policy: WarmupPolicy::Recursive,
            tolerance_ulps: 64,
        },
        binding: Binding::Kernel(KernelId::Adx),
    },
    IndicatorMeta {
        id: "ichimoku",
        display_name: "Ichimoku Cloud",
        category: Category::Trend,
        aliases: NO_ALIASES,
        param_aliases: NO_PARAM_ALIASES,
        params: &[
            ParamSpec::int("tenkan", 9),
            ParamSpec::int("kijun", 26),
            ParamSpec::int("senkou", 52),
        ],
        outputs: &[
            OutputSpec::line("tenkan"),
            OutputSpec::line("kijun"),
            OutputSpec::band("senkou_a", "upper"),
            OutputSpec::band("senkou_b", "lower"),
            OutputSpec::line("chikou"),
        ],
        input_slots: 3,
        semantics: Semantics {
            required_fields: HLC,
            optional_fields: NO_FIELDS,
            lookback_params: &["tenkan", "kijun", "senkou"],
            default_lookback: 52,
            warmup_policy: WarmupPolicy::Window,
            tolerance_ulps: 8,
        },
        binding: Binding::Kernel(KernelId::Ichimoku),
    },
    IndicatorMeta {
        id: "supertrend",
        display_name: "Supertrend",
        category: Category::Trend,
        aliases: NO_ALIASES,
        param_aliases: &[("multiplier", "mult"), ("factor", "mult")],
        params: &[
            ParamSpec::int("period", 10),
            ParamSpec::float("mult", 3.0, 0.1, 50.0),
        ],
        outputs: &[OutputSpec::line("line"), OutputSpec::line("direction")],
        input_slots: 3,
        semantics: Semantics {
            required_fields: HLC,
            optional_fields: NO_FIELDS,
            lookback_params: &["period"],
            default_lookback: 11,
            warmup_policy: WarmupPolicy::Recursive,
            tolerance_ulps: 64,
        },
        binding: Binding::Kernel(KernelId::Supertrend),
    },
    IndicatorMeta {
        id: "psar",
        display_name: "Parabolic SAR",
        category: Category::Trend,
        aliases: NO_ALIASES,
        param_aliases: &[("af", "af_start"), ("max_af", "af_max")],
        params: &[
            ParamSpec::float("af_start", 0.02, 0.001, 1.0),
            ParamSpec::float("af_step", 0.02, 0.001, 1.0),
            ParamSpec::float("af_max", 0.2, 0.01, 1.0),
        ],
        outputs: VALUE_OUT,
        input_slots: 2,
        semantics: Semantics {
            required_fields: HL,
            optional_fields: NO_FIELDS,
            lookback_params: &[],
            default_lookback: 2,
            warmup_policy: WarmupPolicy::Recursive,
            tolerance_ulps: 64,
        },
        binding: Binding::Kernel(KernelId::Psar),
    },
    IndicatorMeta {
        id: "elder_ray",
        display_name: "Elder Ray",
        category: Category::Trend,
        aliases: NO_ALIASES,
        param_aliases: PERIOD_ALIASES,
        params: &[ParamSpec::int("period", 13)],
        outputs: &[
            OutputSpec::line("bull_power"),
            OutputSpec::line("bear_power"),
        ],
        input_slots: 3,
        semantics: Semantics {
            required_fields: HLC,
            optional_fields: NO_FIELDS,
            lookback_params: &["period"],
            default_lookback: 13,
            warmup_policy: WarmupPolicy::Recursive,
            tolerance_ulps: 64,
        },
        binding: Binding::Kernel(KernelId::ElderRay),
    },
    IndicatorMeta {
        id: "fisher",
        display_name: "Fisher Transform",
        category: Category::Trend,
        aliases: NO_ALIASES,
        param_aliases: PERIOD_ALIASES,
        params: &[ParamSpec::int("period", 9)],
        outputs: &[OutputSpec::line("fisher"), OutputSpec {
            name: "trigger",
            kind: OutputKind::Line,
            role: Some("signal"),
        }],
        input_slots: 2,
        semantics: Semantics {
            required_fields: HL,
            optional_fields: NO_FIELDS,
            lookback_params: &["period"],
            default_lookback: 10,
            warmup_policy: WarmupPolicy::Recursive,
            tolerance_ulps: 64,
        },
        binding: Binding::Kernel(KernelId::Fisher),
    },
    // Pattern layer.
    IndicatorMeta {
        id: "swing_points",
        display_name: "Swing Points",
        category: Category::Pattern,
        aliases: NO_ALIASES,
        param_aliases: NO_PARAM_ALIASES,
        params: &[ParamSpec::int("left", 2), ParamSpec::int("right", 2)],
        outputs: &[
            OutputSpec::line("high_level"),
            OutputSpec::line("low_level"),
        ],
        input_slots: 2,
        semantics: Semantics {
            required_fields: HL,
            optional_fields: NO_FIELDS,
            lookback_params: &["left", "right"],
            default_lookback: 5,
            warmup_policy: WarmupPolicy::Window,
            tolerance_ulps: 0,
        },
        binding: Binding::Kernel(KernelId::SwingPoints),
    },
    IndicatorMeta {
        id: "fib_levels",
        display_name: "Fibonacci Levels",
        category: Category::Pattern,
        aliases: NO_ALIASES,
        param_aliases: NO_PARAM_ALIASES,
        params: &[],
        outputs: &[
            OutputSpec::band("level_236", "upper"),
            OutputSpec::line("level_382"),
            OutputSpec::line("level_500"),
            OutputSpec::line("level_618"),
            OutputSpec::band("level_786", "lower"),
        ],
        input_slots: 2,
        semantics: Semantics {
            required_fields: NO_FIELDS,
            optional_fields: NO_FIELDS,
            lookback_params: &[],
            default_lookback: 1,
            warmup_policy: WarmupPolicy::None,
            tolerance_ulps: 0,
        },
        binding: Binding::Kernel(KernelId::FibLevels),
    },
    IndicatorMeta {
        id: "fib_retracement",
        display_name: "Fibonacci Retracement",
        category: Category::Pattern,
        aliases: NO_ALIASES,
        param_aliases: NO_PARAM_ALIASES,
        params: &[ParamSpec::int("left", 2), ParamSpec::int("right", 2)],
        outputs: &[
            OutputSpec::band("level_236", "upper"),
            OutputSpec::line("level_382"),
            OutputSpec::line("level_500"),
            OutputSpec::line("level_618"),
            OutputSpec::band("level_786", "lower"),
        ],
        input_slots: 2,
        semantics: Semantics {
            required_fields: HL,
            optional_fields: NO_FIELDS,
            lookback_params: &["left", "right"],
            default_lookback: 5,
            warmup_policy: WarmupPolicy::Window,
            tolerance_ulps: 0,
        },
        binding: Binding::SubDag(expand_fib_retracement),
    },
    // Volatility.
    IndicatorMeta {
        id: "atr",
        display_name: "Average True Range",
        category: Category::Volatility,
        aliases: NO_ALIASES,
        param_aliases: PERIOD_ALIASES,
        params: &[ParamSpec::int("period", 14)],
        outputs: VALUE_OUT,
        input_slots: 3,
        semantics: Semantics {
            required_fields: HLC,
            optional_fields: NO_FIELDS,
            lookback_params: &["period"],
            default_lookback: 14,
            warmup_policy: WarmupPolicy::Recursive,
            tolerance_ulps: 64,
        },
        binding: Binding::Kernel(KernelId::Atr),
    },
    IndicatorMeta {
        id: "bbands",
        display_name: "Bollinger Bands",
        category: Category::Volatility,
        aliases: &["bollinger"],
        param_aliases: &[("length", "period"), ("stddev", "mult"), ("std", "mult")],
        params: &[
            ParamSpec::int("period", 20),
            ParamSpec::float("mult", 2.0, 0.1, 10.0),
        ],
        outputs: &[
            OutputSpec::band("upper", "upper"),
            OutputSpec::line("middle"),
            OutputSpec::band("lower", "lower"),
        ],
        input_slots: 1,
        semantics: Semantics {
            required_fields: CLOSE,
            optional_fields: NO_FIELDS,
            lookback_params: &["period"],
            default_lookback: 20,
            warmup_policy: WarmupPolicy::Window,
            tolerance_ulps: 8,
        },
        binding: Binding::Kernel(KernelId::BBands),
    },
    IndicatorMeta {
        id: "donchian",
        display_name: "Donchian Channel",
        category: Category::Volatility,
        aliases: NO_ALIASES,
        param_aliases: PERIOD_ALIASES,
        params: &[ParamSpec::int("period", 20)],
        outputs: &[
            OutputSpec::band("upper", "upper"),
            OutputSpec::line("middle"),
            OutputSpec::band("lower", "lower"),
        ],
        input_slots: 2,
        semantics: Semantics {
            required_fields: HL,
            optional_fields: NO_FIELDS,
            lookback_params: &["period"],
            default_lookback: 20,
            warmup_policy: WarmupPolicy::Window,
            tolerance_ulps: 0,
        },
        binding: Binding::Kernel(KernelId::Donchian),
    },
    IndicatorMeta {
        id: "keltner",
        display_name: "Keltner Channel",
        category: Category::Volatility,
        aliases: NO_ALIASES,
        param_aliases: &[("length", "period"), ("multiplier", "mult")],
        params: &[
            ParamSpec::int("period", 20),
            ParamSpec::int("atr_period", 10),
            ParamSpec::float("mult", 2.0, 0.1, 10.0),
        ],
        outputs: &[
            OutputSpec::band("upper", "upper"),
            OutputSpec::line("middle"),
            OutputSpec::band("lower", "lower"),
        ],
        input_slots: 3,
        semantics: Semantics {
            required_fields: HLC,
            optional_fields: NO_FIELDS,
            lookback_params: &["period", "atr_period"],
            default_lookback: 20,
            warmup_policy: WarmupPolicy::Recursive,
            tolerance_ulps: 64,
        },
        binding: Binding::Kernel(KernelId::Keltner),
    },
    // Volume composites.
    IndicatorMeta {
        id: "cmf",
        display_name: "Chaikin Money Flow",
        category: Category::Volume,
        aliases: NO_ALIASES,
        param_aliases: PERIOD_ALIASES,
        params: &[ParamSpec::int("period", 20)],
        outputs: VALUE_OUT,
        input_slots: 4,
        semantics: Semantics {
            required_fields: HLCV,
            optional_fields: NO_FIELDS,
            lookback_params: &["period"],
            default_lookback: 20,
            warmup_policy: WarmupPolicy::Window,
            tolerance_ulps: 16,
        },
        binding: Binding::Kernel(KernelId::Cmf),
    },
    IndicatorMeta {
        id: "klinger",
        display_name: "Klinger Volume Oscillator",
        category: Category::Volume,
        aliases: &["kvo"],
        param_aliases: NO_PARAM_ALIASES,
        params: &[
            ParamSpec::int("fast", 34),
            ParamSpec::int("slow", 55),
            ParamSpec::int("signal", 13),
        ],
        outputs: &[OutputSpec::line("kvo"), OutputSpec {
            name: "signal",
            kind: OutputKind::Line,
            role: Some("signal"),
        }],
        input_slots: 4,
        semantics: Semantics {
            required_fields: HLCV,
            optional_fields: NO_FIELDS,
            lookback_params: &["fast", "slow", "signal"],
            default_lookback: 68,
            warmup_policy: WarmupPolicy::Recursive,
            tolerance_ulps: 64,
        },
        binding: Binding::Kernel(KernelId::Klinger),
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_spec_indicator_is_registered() {
        for id in [
            "sum", "sma", "std", "min", "max", "argmax", "argmin", "median", "ema", "rma", "wma",
            "hma", "cumsum", "obv", "vwap", "diff", "roc", "shift", "true_range",
            "positive_values", "negative_values", "crossup", "crossdown", "rising", "falling",
            "in_channel", "enter", "exit", "rsi", "macd", "bbands", "stochastic", "adx", "atr",
            "cci", "mfi", "vortex", "ichimoku", "supertrend", "psar", "donchian", "keltner",
            "klinger", "fisher", "elder_ray", "cmf", "williams_r", "ao", "coppock",
            "swing_points", "fib_retracement",
        ] {
            assert!(Catalog::find(id).is_some(), "missing indicator `{id}`");
        }
    }

    #[test]
    fn aliases_resolve_to_canonical_entries() {
        assert_eq!(Catalog::find("mean").unwrap().id, "sma");
        assert_eq!(Catalog::find("bollinger").unwrap().id, "bbands");
        assert_eq!(Catalog::find("stoch").unwrap().id, "stochastic");
        assert_eq!(Catalog::find("willr").unwrap().id, "williams_r");
        assert!(Catalog::find("nope").is_none());
    }

    #[test]
    fn list_is_sorted_and_stable() {
        let ids: Vec<&str> = Catalog::list().iter().map(|m| m.id).collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted);
        assert_eq!(ids.len(), METAS.len());
    }

    #[test]
    fn coerce_fills_defaults_and_binds_positionals() {
        let meta = Catalog::find("macd").unwrap();
        let named = BTreeMap::new();
        let params =
            Catalog::coerce_params(meta, &named, &[ParamValue::Int(10)], None).unwrap();
        assert_eq!(params.get("fast"), Some(&ParamValue::Int(10)));
        assert_eq!(params.get("slow"), Some(&ParamValue::Int(26)));
        assert_eq!(params.get("signal"), Some(&ParamValue::Int(9)));
    }

    #[test]
    fn coerce_resolves_param_aliases() {
        let meta = Catalog::find("sma").unwrap();
        let named: BTreeMap<String, ParamValue> =
            [("length".to_string(), ParamValue::Int(50))].into();
        let params = Catalog::coerce_params(meta, &named, &[], None).unwrap();
        assert_eq!(params.get("period"), Some(&ParamValue::Int(50)));
    }

    #[test]
    fn coerce_rejects_unknown_out_of_range_and_duplicates() {
        let meta = Catalog::find("sma").unwrap();
        let named: BTreeMap<String, ParamValue> =
            [("bogus".to_string(), ParamValue::Int(3))].into();
        let err = Catalog::coerce_params(meta, &named, &[], None).unwrap_err();
        assert_eq!(err.kind(), "InvalidParameter");

        let named: BTreeMap<String, ParamValue> =
            [("period".to_string(), ParamValue::Int(0))].into();
        let err = Catalog::coerce_params(meta, &named, &[], None).unwrap_err();
        assert_eq!(err.kind(), "ParameterOutOfRange");

        let named: BTreeMap<String, ParamValue> =
            [("period".to_string(), ParamValue::Int(5))].into();
        let err = Catalog::coerce_params(meta, &named, &[ParamValue::Int(5)], None).unwrap_err();
        assert_eq!(err.kind(), "InvalidParameter");
    }

    #[test]
    fn required_param_without_default_errors() {
        let meta = Catalog::find("rising_pct").unwrap();
        let err = Catalog::coerce_params(meta, &BTreeMap::new(), &[], None).unwrap_err();
        assert_eq!(err.kind(), "InvalidParameter");
    }

    #[test]
    fn export_json_is_deterministic() {
        let first = Catalog::export_json();
        let second = Catalog::export_json();
        assert_eq!(first, second);
        assert!(first.contains("\"id\":\"rsi\""));
    }

    #[test]
    fn fib_retracement_expands_to_sub_dag() {
        let meta = Catalog::find("fib_retracement").unwrap();
        let Binding::SubDag(expand) = meta.binding else {
            panic!("fib_retracement must declare a sub-DAG binding");
        };
        let params = Catalog::coerce_params(meta, &BTreeMap::new(), &[], None).unwrap();
        let node = expand(
            &params,
            vec![Node::field("high"), Node::field("low")],
        );
        let crate::ir::Expr::Call { indicator, inputs, .. } = &node.expr else {
            panic!("expansion should be a call");
        };
        assert_eq!(indicator, "fib_levels");
        assert_eq!(inputs.len(), 2);
    }

    #[test]
    fn kernel_bindings_construct() {
        for meta in Catalog::list() {
            let Some(kernel_id) = meta.kernel_id() else {
                continue;
            };
            let params = Catalog::coerce_params(
                meta,
                &BTreeMap::from([(
                    "pct".to_string(),
                    ParamValue::Float(0.05),
                )]),
                &[],
                None,
            )
            .or_else(|_| Catalog::coerce_params(meta, &BTreeMap::new(), &[], None))
            .expect("defaults should coerce");
            let kernel = crate::kernels::build_kernel(kernel_id, &params)
                .expect("binding should construct");
            let hint = kernel.warmup_hint();
            assert!(hint.length >= 1, "{} warmup hint", meta.id);
        }
    }
}
