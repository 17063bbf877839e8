use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use super::distance::ClassifiedRaster;
use super::domain::VALUE_FIELD;
use super::error::SuitabilityError;
use super::validation::ValidationError;
use crate::geoprocessing::{run_tool, EnvironmentOptions, GeoTool, ToolExecutor, ToolParameters};
use crate::scratch::ScratchSpace;

const RATING_RASTER_FILENAME: &str = "rating.tif";
const RATING_POLYGONS_FILENAME: &str = "rating.shp";
const SIMPLIFIED_FILENAME: &str = "simplified.shp";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoringOutput {
    pub composite_raster: PathBuf,
    pub score_polygons: PathBuf,
    pub simplified: bool,
    pub result: PathBuf,
}

/// Map algebra for the weighted sum, e.g. `(0.6 * "schools") + (0.4 * "slope")`.
///
/// Every classified raster needs a weight and every weight a raster.
pub fn build_weighted_sum_expression(
    rasters: &[ClassifiedRaster],
    weights: &HashMap<String, f64>,
) -> Result<String, ValidationError> {
    if rasters.is_empty() {
        return Err(ValidationError::NoCriteria);
    }

    let mut missing_weights: Vec<String> = rasters
        .iter()
        .filter(|raster| !weights.contains_key(&raster.name))
        .map(|raster| raster.name.clone())
        .collect();
    let mut missing_rasters: Vec<String> = weights
        .keys()
        .filter(|name| !rasters.iter().any(|raster| &raster.name == *name))
        .cloned()
        .collect();
    if !missing_weights.is_empty() || !missing_rasters.is_empty() {
        missing_weights.sort();
        missing_rasters.sort();
        return Err(ValidationError::WeightRasterMismatch {
            missing_weights,
            missing_rasters,
        });
    }

    Ok(rasters
        .iter()
        .map(|raster| {
            let stem = raster
                .path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| raster.name.clone());
            format!("({} * \"{stem}\")", weights[&raster.name])
        })
        .collect::<Vec<_>>()
        .join(" + "))
}

/// Weighted overlay, vectorization and clip to buildable land.
pub struct WeightedScoringStage {
    executor: Arc<dyn ToolExecutor>,
    scratch: Arc<ScratchSpace>,
    simplify_tolerance: Option<f64>,
}

impl WeightedScoringStage {
    pub fn new(
        executor: Arc<dyn ToolExecutor>,
        scratch: Arc<ScratchSpace>,
        simplify_tolerance: Option<f64>,
    ) -> Self {
        Self {
            executor,
            scratch,
            simplify_tolerance,
        }
    }

    pub async fn execute(
        &self,
        rasters: &[ClassifiedRaster],
        weights: &HashMap<String, f64>,
        buildable_land: &Path,
        output: &Path,
    ) -> Result<ScoringOutput, SuitabilityError> {
        let expression = build_weighted_sum_expression(rasters, weights)?;
        let composite_raster = self.weighted_sum(&expression).await?;
        let polygons = self.to_polygons(&composite_raster).await?;
        let (score_polygons, simplified) = match self.simplify_tolerance {
            Some(tolerance) => self.simplify(&polygons, tolerance).await,
            None => (polygons, false),
        };
        let result = self.intersect(&score_polygons, buildable_land, output).await?;

        info!(result = %result.display(), "scoring finished");
        Ok(ScoringOutput {
            composite_raster,
            score_polygons,
            simplified,
            result,
        })
    }

    async fn weighted_sum(&self, expression: &str) -> Result<PathBuf, SuitabilityError> {
        let output = self.scratch.create_tracked_path(RATING_RASTER_FILENAME);
        let parameters = ToolParameters::new()
            .with("expression", expression)
            .with_path("output_raster", &output);
        run_tool(
            self.executor.as_ref(),
            GeoTool::RasterCalculator,
            parameters,
            EnvironmentOptions::overwriting(),
        )
        .await?;
        Ok(output)
    }

    async fn to_polygons(&self, raster: &Path) -> Result<PathBuf, SuitabilityError> {
        let output = self.scratch.create_tracked_path(RATING_POLYGONS_FILENAME);
        let parameters = ToolParameters::new()
            .with_path("in_raster", raster)
            .with_path("out_polygon_features", &output)
            .with("simplify", "DATA")
            .with("raster_field", VALUE_FIELD);
        run_tool(
            self.executor.as_ref(),
            GeoTool::RasterToPolygon,
            parameters,
            EnvironmentOptions::overwriting(),
        )
        .await?;
        Ok(output)
    }

    /// Falls back to the unsimplified polygons when the tool fails.
    async fn simplify(&self, polygons: &Path, tolerance: f64) -> (PathBuf, bool) {
        let output = self.scratch.create_tracked_path(SIMPLIFIED_FILENAME);
        let parameters = ToolParameters::new()
            .with_path("in_features", polygons)
            .with_path("out_feature_class", &output)
            .with("algorithm", "POINT_REMOVE")
            .with("tolerance", format!("{tolerance} Meters"))
            .with("minimum_area", "0 SquareMeters");

        match run_tool(
            self.executor.as_ref(),
            GeoTool::SimplifyPolygon,
            parameters,
            EnvironmentOptions::overwriting(),
        )
        .await
        {
            Ok(_) => (output, true),
            Err(failure) => {
                warn!(error = %failure, "simplification failed, keeping original polygons");
                (polygons.to_path_buf(), false)
            }
        }
    }

    async fn intersect(
        &self,
        score_polygons: &Path,
        buildable_land: &Path,
        output: &Path,
    ) -> Result<PathBuf, SuitabilityError> {
        let inputs = [score_polygons.to_path_buf(), buildable_land.to_path_buf()];
        let parameters = ToolParameters::new()
            .with_paths("in_features", &inputs)
            .with_path("out_feature_class", output)
            .with("join_attributes", "ALL")
            .with("output_type", "INPUT");
        run_tool(
            self.executor.as_ref(),
            GeoTool::Intersect,
            parameters,
            EnvironmentOptions::overwriting(),
        )
        .await?;
        Ok(output.to_path_buf())
    }
}
