//! Site-suitability analysis pipeline.
//!
//! A request names a study area, exclusion constraints and weighted
//! criteria. The pipeline removes constrained land from the study area,
//! turns every criterion into a 1..N suitability raster, combines them with
//! a weighted sum and clips the vectorized scores to buildable land. All
//! spatial work is delegated to a [`ToolExecutor`](crate::geoprocessing::ToolExecutor).

pub mod classify;
pub mod distance;
pub mod domain;
pub mod error;
pub mod import;
pub mod land;
pub mod orchestrator;
pub mod reclass;
pub mod router;
pub mod scoring;
pub mod validation;

#[cfg(test)]
mod tests;

pub use classify::classify;
pub use distance::{
    CancellingIntervalEditor, ClassificationMethod, ClassifiedRaster,
    DistanceClassificationStage, IntervalEditor, PresetIntervalEditor,
};
pub use domain::{
    AnalysisPhase, AnalysisRequest, ConstraintSpec, DataType, IntervalClassRule, PoiCriterion,
    RESULT_FILENAME,
};
pub use error::{ErrorKind, SuitabilityError};
pub use import::{criteria_from_path, interval_table_from_path, parse_criteria, ImportError};
pub use land::{LandDivision, LandDivisionStage};
pub use orchestrator::{AnalysisFailure, AnalysisOutcome, PhaseTransition, SuitabilityAnalysis};
pub use reclass::{
    accept_custom_rules, build_remap_expression, compute_equal_interval_rules,
    parse_remap_expression, validate_rules, IntervalPreview, ReclassError, RuleValidation,
    ValueDomain,
};
pub use router::{analysis_router, status_for, IntervalPreviewRequest};
pub use scoring::{build_weighted_sum_expression, ScoringOutput, WeightedScoringStage};
pub use validation::{validate_request, weight_sum_is_valid, ValidationError};
