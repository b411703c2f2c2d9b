pub mod api;
pub mod catalog;
pub mod dataset;
pub mod error;
pub mod eval;
pub mod ir;
pub mod kernels;
pub mod normalize;
pub mod parse;
pub mod plan;
pub mod planner;
pub mod series;
pub mod typecheck;
pub mod types;

pub use api::{analyze, compile_ir, compile_text, preview, validate, ApiResponse};
pub use catalog::{Catalog, IndicatorMeta};
pub use dataset::{Dataset, DatasetSchema, SeriesKey};
pub use error::{CompileError, EngineError, EvalError, PlanError};
pub use eval::batch::{evaluate_batch, evaluate_batch_cached, BatchCache, BatchResult};
pub use eval::incremental::{
    events_from_dataset, CancelToken, Event, EvaluatorSession, LeafUpdate, SessionOptions,
    SnapshotEnvelope, StepOutcome,
};
pub use eval::{Frame, WarmupStatus};
pub use ir::Node;
pub use plan::{AlignmentPolicy, DataRequirement, Plan};
pub use planner::{plan, plan_with, PlanOptions};
pub use series::{Collection, Series};
pub use types::{ParamValue, SourceKind, Timeframe, TypeTag};
