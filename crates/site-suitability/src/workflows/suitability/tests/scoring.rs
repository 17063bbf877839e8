use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::json;

use super::common::*;
use crate::geoprocessing::GeoTool;
use crate::workflows::suitability::distance::{ClassificationMethod, ClassifiedRaster};
use crate::workflows::suitability::domain::DataType;
use crate::workflows::suitability::error::ErrorKind;
use crate::workflows::suitability::scoring::WeightedScoringStage;

fn classified(workspace: &Workspace, name: &str) -> ClassifiedRaster {
    ClassifiedRaster {
        name: name.to_string(),
        data_type: DataType::Vector,
        distance_raster: None,
        reclassified_raster: workspace.path(&format!("{name}_reclassification.tif")),
        path: workspace.path(&format!("{name}_reclassification_ND.tif")),
        method: ClassificationMethod::EqualInterval,
        rules: Vec::new(),
        nodata_value: 0.0,
    }
}

fn weights(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
    pairs
        .iter()
        .map(|(name, weight)| (name.to_string(), *weight))
        .collect()
}

#[tokio::test]
async fn scoring_runs_calculator_polygon_and_intersect() {
    let workspace = Workspace::new("scoring");
    let engine = Arc::new(RecordingEngine::default());
    let buildable = workspace.shapefile("Suitable_Area");
    let output = workspace.path("result.shp");
    let rasters = vec![classified(&workspace, "schools"), classified(&workspace, "parks")];

    let scored = WeightedScoringStage::new(engine.clone(), workspace.scratch(), None)
        .execute(
            &rasters,
            &weights(&[("schools", 0.7), ("parks", 0.3)]),
            &buildable,
            &output,
        )
        .await
        .expect("scoring succeeds");

    assert_eq!(
        engine.tools(),
        vec![
            GeoTool::RasterCalculator,
            GeoTool::RasterToPolygon,
            GeoTool::Intersect
        ]
    );
    let calculator = &engine.calls_for(GeoTool::RasterCalculator)[0];
    assert_eq!(
        calculator.parameters.get_str("expression"),
        Some(r#"(0.7 * "schools_reclassification_ND") + (0.3 * "parks_reclassification_ND")"#)
    );

    let intersect = &engine.calls_for(GeoTool::Intersect)[0];
    assert_eq!(
        intersect.parameters.get("in_features"),
        Some(&json!([
            scored.score_polygons.display().to_string(),
            buildable.display().to_string()
        ]))
    );
    assert_eq!(intersect.parameters.get_str("join_attributes"), Some("ALL"));
    assert_eq!(scored.result, output);
    assert!(!scored.simplified);
    assert_eq!(file_name(&scored.composite_raster), "rating.tif");
}

#[tokio::test]
async fn simplify_failure_keeps_unsimplified_polygons() {
    let workspace = Workspace::new("simplify");
    let engine = Arc::new(
        RecordingEngine::default().failing(GeoTool::SimplifyPolygon, "tolerance too large"),
    );
    let rasters = vec![classified(&workspace, "schools")];

    let scored = WeightedScoringStage::new(engine.clone(), workspace.scratch(), Some(10.0))
        .execute(
            &rasters,
            &weights(&[("schools", 1.0)]),
            &workspace.shapefile("Suitable_Area"),
            &workspace.path("result.shp"),
        )
        .await
        .expect("simplify failure is tolerated");

    assert!(!scored.simplified);
    assert_eq!(file_name(&scored.score_polygons), "rating.shp");
    assert!(engine.tools().contains(&GeoTool::Intersect));
}

#[tokio::test]
async fn simplify_success_feeds_intersect() {
    let workspace = Workspace::new("simplify-ok");
    let engine = Arc::new(RecordingEngine::default());
    let rasters = vec![classified(&workspace, "schools")];

    let scored = WeightedScoringStage::new(engine.clone(), workspace.scratch(), Some(10.0))
        .execute(
            &rasters,
            &weights(&[("schools", 1.0)]),
            &workspace.shapefile("Suitable_Area"),
            &workspace.path("result.shp"),
        )
        .await
        .expect("scoring succeeds");

    assert!(scored.simplified);
    let simplify = &engine.calls_for(GeoTool::SimplifyPolygon)[0];
    assert_eq!(simplify.parameters.get_str("tolerance"), Some("10 Meters"));
    assert_eq!(file_name(&scored.score_polygons), "simplified.shp");
}

#[tokio::test]
async fn weight_without_raster_stops_before_any_tool() {
    let workspace = Workspace::new("mismatch");
    let engine = Arc::new(RecordingEngine::default());
    let rasters = vec![classified(&workspace, "schools")];

    let err = WeightedScoringStage::new(engine.clone(), workspace.scratch(), None)
        .execute(
            &rasters,
            &weights(&[("schools", 0.5), ("parks", 0.5)]),
            &PathBuf::from("buildable.shp"),
            &PathBuf::from("result.shp"),
        )
        .await
        .expect_err("parks has no raster");

    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(engine.calls().is_empty());
}

#[tokio::test]
async fn intersect_failure_aborts() {
    let workspace = Workspace::new("intersect");
    let engine = Arc::new(RecordingEngine::default().failing(GeoTool::Intersect, "schema lock"));
    let rasters = vec![classified(&workspace, "schools")];

    let err = WeightedScoringStage::new(engine.clone(), workspace.scratch(), None)
        .execute(
            &rasters,
            &weights(&[("schools", 1.0)]),
            &workspace.shapefile("Suitable_Area"),
            &workspace.path("result.shp"),
        )
        .await
        .expect_err("intersect fails");

    assert_eq!(err.kind(), ErrorKind::ExternalToolFailure);
    assert!(err.to_string().contains("analysis.Intersect"));
}
