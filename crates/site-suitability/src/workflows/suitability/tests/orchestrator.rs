use std::collections::BTreeMap;
use std::sync::Arc;

use super::common::*;
use crate::config::ScratchConfig;
use crate::geoprocessing::GeoTool;
use crate::workflows::suitability::domain::{
    AnalysisPhase, ConstraintSpec, IntervalClassRule, PoiCriterion,
};
use crate::workflows::suitability::error::{ErrorKind, SuitabilityError};
use crate::workflows::suitability::orchestrator::SuitabilityAnalysis;
use crate::workflows::suitability::validation::ValidationError;

fn analysis(engine: &Arc<RecordingEngine>, scratch: ScratchConfig) -> SuitabilityAnalysis {
    SuitabilityAnalysis::new(engine.clone(), analysis_config(), scratch)
}

fn phases(outcome_phases: &[crate::workflows::suitability::PhaseTransition]) -> Vec<AnalysisPhase> {
    outcome_phases.iter().map(|transition| transition.phase).collect()
}

#[tokio::test]
async fn successful_run_walks_every_phase() {
    let workspace = Workspace::new("orchestrate");
    let engine = Arc::new(RecordingEngine::default());
    let request = workspace.request(vec![
        PoiCriterion::new(workspace.shapefile("schools"))
            .with_distance(1000)
            .with_weight(1.0),
    ]);

    let outcome = analysis(&engine, workspace.scratch_config())
        .run(request.clone())
        .await
        .expect("analysis succeeds");

    assert_eq!(
        phases(&outcome.phases),
        vec![
            AnalysisPhase::Validating,
            AnalysisPhase::DividingLand,
            AnalysisPhase::ComputingCriteria,
            AnalysisPhase::Scoring,
            AnalysisPhase::Done,
        ]
    );
    assert!(outcome
        .phases
        .windows(2)
        .all(|pair| pair[0].at <= pair[1].at));
    assert_eq!(outcome.result_path, request.output);
    assert_eq!(outcome.rating_field, "gridcode");
    assert_eq!(outcome.classified_rasters.len(), 1);
    assert!(!outcome.scratch_files.is_empty());
    assert!(outcome.scratch_files.iter().all(|path| !path.exists()));
    assert_eq!(engine.calls_for(GeoTool::Intersect).len(), 1);
}

#[tokio::test]
async fn validation_failure_invokes_no_tool() {
    let workspace = Workspace::new("orchestrate-invalid");
    let engine = Arc::new(RecordingEngine::default());
    let request = workspace.request(vec![
        PoiCriterion::new(workspace.shapefile("schools"))
            .with_distance(1000)
            .with_weight(0.6),
        PoiCriterion::new(workspace.shapefile("parks"))
            .with_distance(500)
            .with_weight(0.39),
    ]);

    let failure = analysis(&engine, workspace.scratch_config())
        .run(request)
        .await
        .expect_err("weights do not sum to one");

    assert_eq!(failure.phase, AnalysisPhase::Validating);
    assert_eq!(
        phases(&failure.phases),
        vec![AnalysisPhase::Validating, AnalysisPhase::Failed]
    );
    assert!(matches!(
        failure.error,
        SuitabilityError::Validation(ValidationError::WeightSum { .. })
    ));
    assert!(engine.calls().is_empty());
    assert!(!workspace.path("scratch").exists());
}

#[tokio::test]
async fn land_failure_is_reported_in_its_phase() {
    let workspace = Workspace::new("orchestrate-land");
    let engine = Arc::new(RecordingEngine::default().failing(GeoTool::Erase, "locked"));
    let request = workspace.request(vec![
        PoiCriterion::new(workspace.shapefile("schools"))
            .with_distance(1000)
            .with_weight(1.0),
    ]);

    let failure = analysis(&engine, workspace.scratch_config())
        .run(request)
        .await
        .expect_err("erase fails");

    assert_eq!(failure.phase, AnalysisPhase::DividingLand);
    assert_eq!(failure.error.kind(), ErrorKind::ExternalToolFailure);
    assert_eq!(failure.phases.last().map(|t| t.phase), Some(AnalysisPhase::Failed));
    assert!(!engine.tools().contains(&GeoTool::Intersect));
}

#[tokio::test]
async fn criterion_failure_is_reported_with_its_name() {
    let workspace = Workspace::new("orchestrate-criterion");
    let engine =
        Arc::new(RecordingEngine::default().failing(GeoTool::EuclideanDistance, "no license"));
    let request = workspace.request(vec![
        PoiCriterion::new(workspace.shapefile("schools"))
            .with_distance(1000)
            .with_weight(1.0),
    ]);

    let failure = analysis(&engine, workspace.scratch_config())
        .run(request)
        .await
        .expect_err("distance fails");

    assert_eq!(failure.phase, AnalysisPhase::ComputingCriteria);
    assert!(failure.to_string().contains("criterion 'schools' failed"));
}

#[tokio::test]
async fn request_tables_drive_custom_intervals() {
    let workspace = Workspace::new("orchestrate-custom");
    let engine = Arc::new(RecordingEngine::default());
    let table = vec![
        IntervalClassRule::new(0.0, 300.0, 5),
        IntervalClassRule::new(300.0, 1000.0, 1),
    ];
    let mut request = workspace.request(vec![
        PoiCriterion::new(workspace.shapefile("schools"))
            .with_distance(1000)
            .with_weight(1.0)
            .with_custom_interval(true),
    ]);
    request.custom_intervals = BTreeMap::from([("schools".to_string(), table.clone())]);

    let outcome = analysis(&engine, workspace.scratch_config())
        .run(request)
        .await
        .expect("analysis succeeds");

    assert_eq!(outcome.classified_rasters[0].rules, table);
}

#[tokio::test]
async fn kept_scratch_survives_the_run() {
    let workspace = Workspace::new("orchestrate-keep");
    let engine = Arc::new(RecordingEngine::default());
    let mut request = workspace.request(vec![
        PoiCriterion::new(workspace.shapefile("schools"))
            .with_distance(1000)
            .with_weight(1.0),
    ]);
    request
        .constraints
        .push(ConstraintSpec::new(workspace.shapefile("roads")));
    let scratch = ScratchConfig {
        keep_artifacts: true,
        ..workspace.scratch_config()
    };

    let outcome = analysis(&engine, scratch)
        .run(request)
        .await
        .expect("analysis succeeds");

    assert!(outcome.scratch_retained);
    assert!(outcome.buildable_land_path.exists());
    assert_eq!(engine.calls_for(GeoTool::Union).len(), 1);
}

fn assert_send<T: Send>(_: &T) {}

#[tokio::test]
async fn run_future_can_be_spawned() {
    let workspace = Workspace::new("orchestrate-spawn");
    let engine = Arc::new(RecordingEngine::default());
    let request = workspace.request(vec![
        PoiCriterion::new(workspace.shapefile("schools"))
            .with_distance(1000)
            .with_weight(0.5),
        PoiCriterion::new(workspace.shapefile("parks"))
            .with_distance(800)
            .with_weight(0.5),
    ]);
    let analysis = Arc::new(analysis(&engine, workspace.scratch_config()));

    let future = {
        let analysis = analysis.clone();
        async move { analysis.run(request).await }
    };
    assert_send(&future);

    let outcome = tokio::spawn(future)
        .await
        .expect("task joins")
        .expect("analysis succeeds");
    assert_eq!(outcome.classified_rasters.len(), 2);
}

#[tokio::test]
async fn first_broken_rule_is_reported_without_tool_calls() {
    let workspace = Workspace::new("orchestrate-order");
    let engine = Arc::new(RecordingEngine::default());
    let mut request = workspace.request(vec![PoiCriterion::new(workspace.shapefile("schools"))
        .with_distance(0)
        .with_weight(1.0)]);
    request.constraints = vec![ConstraintSpec::new(workspace.path("missing_water.shp"))];

    let failure = analysis(&engine, workspace.scratch_config())
        .run(request)
        .await
        .expect_err("constraint is absent");

    assert_eq!(failure.phase, AnalysisPhase::Validating);
    assert!(matches!(
        failure.error,
        SuitabilityError::Validation(ValidationError::ConstraintNotFound(_))
    ));
    assert!(engine.calls().is_empty());
}
