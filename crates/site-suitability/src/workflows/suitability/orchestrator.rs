use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use super::distance::{
    ClassifiedRaster, DistanceClassificationStage, IntervalEditor, PresetIntervalEditor,
};
use super::domain::{AnalysisPhase, AnalysisRequest, PoiCriterion, RATING_FIELD};
use super::error::SuitabilityError;
use super::land::LandDivisionStage;
use super::scoring::WeightedScoringStage;
use super::validation::validate_request;
use crate::config::{AnalysisConfig, ScratchConfig};
use crate::geoprocessing::ToolExecutor;
use crate::scratch::ScratchSpace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PhaseTransition {
    pub phase: AnalysisPhase,
    pub at: DateTime<Utc>,
}

/// Run report for a successful analysis.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisOutcome {
    pub result_path: PathBuf,
    pub rating_field: &'static str,
    pub buildable_land_path: PathBuf,
    pub classified_rasters: Vec<ClassifiedRaster>,
    pub simplified: bool,
    pub phases: Vec<PhaseTransition>,
    pub elapsed_seconds: f64,
    pub scratch_files: Vec<PathBuf>,
    pub scratch_retained: bool,
}

#[derive(Debug, thiserror::Error)]
#[error("analysis failed during {}: {error}", .phase.label())]
pub struct AnalysisFailure {
    /// Phase the run was in when it failed.
    pub phase: AnalysisPhase,
    pub phases: Vec<PhaseTransition>,
    #[source]
    pub error: SuitabilityError,
}

#[derive(Debug)]
struct PhaseTracker {
    current: AnalysisPhase,
    transitions: Vec<PhaseTransition>,
}

impl PhaseTracker {
    fn start() -> Self {
        let mut tracker = Self {
            current: AnalysisPhase::Validating,
            transitions: Vec::new(),
        };
        tracker.record(AnalysisPhase::Validating);
        tracker
    }

    fn advance(&mut self, phase: AnalysisPhase) {
        if self.current.is_terminal() {
            return;
        }
        self.current = phase;
        self.record(phase);
        info!(phase = phase.label(), "analysis phase started");
    }

    fn record(&mut self, phase: AnalysisPhase) {
        self.transitions.push(PhaseTransition {
            phase,
            at: Utc::now(),
        });
    }

    fn fail(mut self, phase: AnalysisPhase, error: SuitabilityError) -> AnalysisFailure {
        self.advance(AnalysisPhase::Failed);
        error!(phase = phase.label(), kind = ?error.kind(), error = %error, "analysis failed");
        AnalysisFailure {
            phase,
            phases: self.transitions,
            error,
        }
    }
}

struct StageOutputs {
    buildable_land: PathBuf,
    classified: Vec<ClassifiedRaster>,
    result: PathBuf,
    simplified: bool,
}

/// Drives one analysis request from validation to the result dataset.
///
/// Land division and criteria classification run side by side; scoring
/// starts once both have finished. Scratch artifacts are released at the end
/// of every run.
#[derive(Clone)]
pub struct SuitabilityAnalysis {
    executor: Arc<dyn ToolExecutor>,
    config: AnalysisConfig,
    scratch: ScratchConfig,
}

impl SuitabilityAnalysis {
    pub fn new(executor: Arc<dyn ToolExecutor>, config: AnalysisConfig, scratch: ScratchConfig) -> Self {
        Self {
            executor,
            config,
            scratch,
        }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Runs with the interval tables carried by the request.
    pub async fn run(&self, request: AnalysisRequest) -> Result<AnalysisOutcome, AnalysisFailure> {
        let editor = Arc::new(PresetIntervalEditor::new(request.custom_intervals.clone()));
        self.run_with_editor(request, editor).await
    }

    pub async fn run_with_editor(
        &self,
        request: AnalysisRequest,
        editor: Arc<dyn IntervalEditor>,
    ) -> Result<AnalysisOutcome, AnalysisFailure> {
        let started = Instant::now();
        let mut tracker = PhaseTracker::start();
        let request = request.normalized();

        if let Err(err) = validate_request(&request, &self.config) {
            return Err(tracker.fail(AnalysisPhase::Validating, err));
        }

        let scratch = match ScratchSpace::for_run(&self.scratch) {
            Ok(scratch) => Arc::new(scratch),
            Err(err) => return Err(tracker.fail(AnalysisPhase::Validating, err.into())),
        };

        let outcome = self
            .execute_stages(&request, Arc::clone(&scratch), editor, &mut tracker)
            .await;
        let scratch_files = scratch.tracked();
        self.release(&scratch);

        match outcome {
            Ok(outputs) => {
                tracker.advance(AnalysisPhase::Done);
                let elapsed_seconds = started.elapsed().as_secs_f64();
                info!(
                    result = %outputs.result.display(),
                    elapsed_seconds,
                    "analysis finished"
                );
                Ok(AnalysisOutcome {
                    result_path: outputs.result,
                    rating_field: RATING_FIELD,
                    buildable_land_path: outputs.buildable_land,
                    classified_rasters: outputs.classified,
                    simplified: outputs.simplified,
                    phases: tracker.transitions,
                    elapsed_seconds,
                    scratch_files,
                    scratch_retained: self.scratch.keep_artifacts,
                })
            }
            Err(err) => {
                let phase = err.stage().unwrap_or(tracker.current);
                Err(tracker.fail(phase, err))
            }
        }
    }

    async fn execute_stages(
        &self,
        request: &AnalysisRequest,
        scratch: Arc<ScratchSpace>,
        editor: Arc<dyn IntervalEditor>,
        tracker: &mut PhaseTracker,
    ) -> Result<StageOutputs, SuitabilityError> {
        let land = LandDivisionStage::new(Arc::clone(&self.executor), Arc::clone(&scratch));
        let criteria_stage = DistanceClassificationStage::new(
            Arc::clone(&self.executor),
            Arc::clone(&scratch),
            editor,
            self.config.clone(),
        )
        .with_extent(Some(request.processing_extent()));

        let constraints: Vec<PathBuf> = request
            .active_constraints()
            .map(|constraint| constraint.path.clone())
            .collect();
        let criteria: Vec<PoiCriterion> = request.active_criteria().cloned().collect();

        tracker.advance(AnalysisPhase::DividingLand);
        tracker.advance(AnalysisPhase::ComputingCriteria);

        let land_branch = async {
            land.execute(&request.study_area, &constraints)
                .await
                .map_err(|err| err.in_stage(AnalysisPhase::DividingLand))
        };
        let criteria_branch = async {
            criteria_stage
                .execute(&criteria)
                .await
                .map_err(|err| err.in_stage(AnalysisPhase::ComputingCriteria))
        };
        let (division, classified) = tokio::try_join!(land_branch, criteria_branch)?;

        tracker.advance(AnalysisPhase::Scoring);
        let scoring = WeightedScoringStage::new(
            Arc::clone(&self.executor),
            scratch,
            self.config.simplify_tolerance,
        )
        .execute(
            &classified,
            &request.weights(),
            &division.buildable_land,
            &request.output,
        )
        .await
        .map_err(|err| err.in_stage(AnalysisPhase::Scoring))?;

        Ok(StageOutputs {
            buildable_land: division.buildable_land,
            classified,
            result: scoring.result,
            simplified: scoring.simplified,
        })
    }

    fn release(&self, scratch: &ScratchSpace) {
        if self.scratch.keep_artifacts {
            info!(directory = %scratch.directory().display(), "keeping scratch artifacts");
            return;
        }
        scratch.cleanup_all();
        let leftover = scratch.tracked();
        if !leftover.is_empty() {
            warn!(count = leftover.len(), "some scratch artifacts could not be removed");
        }
    }
}
