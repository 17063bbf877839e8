use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use super::domain::SUITABLE_AREA_FILENAME;
use super::error::SuitabilityError;
use super::validation::ValidationError;
use crate::geoprocessing::{run_tool, EnvironmentOptions, GeoTool, ToolExecutor, ToolParameters};
use crate::scratch::ScratchSpace;

const MERGED_CONSTRAINTS_FILENAME: &str = "Merged_Constraints.shp";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LandDivision {
    pub merged_constraints: PathBuf,
    pub buildable_land: PathBuf,
}

/// Splits the study area into excluded and buildable land.
pub struct LandDivisionStage {
    executor: Arc<dyn ToolExecutor>,
    scratch: Arc<ScratchSpace>,
}

impl LandDivisionStage {
    pub fn new(executor: Arc<dyn ToolExecutor>, scratch: Arc<ScratchSpace>) -> Self {
        Self { executor, scratch }
    }

    pub async fn execute(
        &self,
        study_area: &Path,
        constraints: &[PathBuf],
    ) -> Result<LandDivision, SuitabilityError> {
        let merged_constraints = self.merge_constraints(constraints).await?;
        let buildable_land = self.buildable_land(study_area, &merged_constraints).await?;
        info!(buildable = %buildable_land.display(), "land division finished");
        Ok(LandDivision {
            merged_constraints,
            buildable_land,
        })
    }

    /// A single layer passes through untouched.
    pub async fn merge_constraints(
        &self,
        constraints: &[PathBuf],
    ) -> Result<PathBuf, SuitabilityError> {
        match constraints {
            [] => Err(ValidationError::NoConstraints.into()),
            [only] => Ok(only.clone()),
            many => {
                let output = self.scratch.create_tracked_path(MERGED_CONSTRAINTS_FILENAME);
                let parameters = ToolParameters::new()
                    .with_paths("in_features", many)
                    .with_path("out_feature_class", &output);
                run_tool(
                    self.executor.as_ref(),
                    GeoTool::Union,
                    parameters,
                    EnvironmentOptions::overwriting(),
                )
                .await?;
                Ok(output)
            }
        }
    }

    pub async fn buildable_land(
        &self,
        study_area: &Path,
        merged_constraints: &Path,
    ) -> Result<PathBuf, SuitabilityError> {
        let output = self.scratch.create_tracked_path(SUITABLE_AREA_FILENAME);
        let parameters = ToolParameters::new()
            .with_path("in_features", study_area)
            .with_path("erase_features", merged_constraints)
            .with_path("out_feature_class", &output);
        run_tool(
            self.executor.as_ref(),
            GeoTool::Erase,
            parameters,
            EnvironmentOptions::overwriting(),
        )
        .await?;
        Ok(output)
    }
}
