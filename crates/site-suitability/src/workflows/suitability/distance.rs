//! Per-criterion pipeline: distance transform, reclassification, NoData
//! patch.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::classify::{extension_of, DISTANCE_SOURCE_EXTENSIONS};
use super::domain::{
    DataType, IntervalClassRule, PoiCriterion, DISTANCE_SUFFIX, NODATA_SUFFIX,
    RECLASSIFICATION_SUFFIX, VALUE_FIELD,
};
use super::error::SuitabilityError;
use super::reclass::{
    accept_custom_rules, build_remap_expression, compute_equal_interval_rules, invert_classes,
    ReclassError, ValueDomain,
};
use crate::config::AnalysisConfig;
use crate::geoprocessing::{
    run_tool, EnvironmentOptions, Extent, GeoTool, ToolExecutor, ToolParameters,
};
use crate::scratch::ScratchSpace;

/// Supplies a custom interval table for a criterion. `None` means the user
/// cancelled and the equal-interval proposal is used instead.
#[async_trait]
pub trait IntervalEditor: Send + Sync {
    async fn edit(
        &self,
        criterion: &PoiCriterion,
        proposal: &[IntervalClassRule],
    ) -> Option<Vec<IntervalClassRule>>;
}

/// Answers with tables supplied up front, keyed by criterion name.
#[derive(Debug, Clone, Default)]
pub struct PresetIntervalEditor {
    tables: BTreeMap<String, Vec<IntervalClassRule>>,
}

impl PresetIntervalEditor {
    pub fn new(tables: BTreeMap<String, Vec<IntervalClassRule>>) -> Self {
        Self { tables }
    }
}

#[async_trait]
impl IntervalEditor for PresetIntervalEditor {
    async fn edit(
        &self,
        criterion: &PoiCriterion,
        _proposal: &[IntervalClassRule],
    ) -> Option<Vec<IntervalClassRule>> {
        self.tables.get(&criterion.data_name()).cloned()
    }
}

/// Always cancels.
#[derive(Debug, Clone, Copy, Default)]
pub struct CancellingIntervalEditor;

#[async_trait]
impl IntervalEditor for CancellingIntervalEditor {
    async fn edit(
        &self,
        _criterion: &PoiCriterion,
        _proposal: &[IntervalClassRule],
    ) -> Option<Vec<IntervalClassRule>> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationMethod {
    EqualInterval,
    Custom,
}

/// Output of one criterion pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassifiedRaster {
    pub name: String,
    pub data_type: DataType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_raster: Option<PathBuf>,
    pub reclassified_raster: PathBuf,
    /// Final, NoData-patched raster used for scoring.
    pub path: PathBuf,
    pub method: ClassificationMethod,
    pub rules: Vec<IntervalClassRule>,
    pub nodata_value: f64,
}

/// Value written into NoData cells. Cells beyond the distance ceiling are the
/// worst class for proximity criteria and the best for avoidance criteria.
pub fn nodata_patch_value(distance: Option<i32>, num_classes: u32) -> f64 {
    match distance {
        Some(distance) if distance < 0 => f64::from(num_classes),
        _ => 0.0,
    }
}

pub fn nodata_expression(raster: &Path, value: f64) -> String {
    let raster = raster.display();
    format!(r#"Con(IsNull(Raster(r"{raster}")), {value}, Raster(r"{raster}"))"#)
}

/// Fails before any tool call when a vector source cannot feed the distance
/// transform.
pub fn check_vector_source(path: &Path) -> Result<(), SuitabilityError> {
    std::fs::metadata(path).map_err(|source| {
        SuitabilityError::io(format!("cannot read {}", path.display()), source)
    })?;

    let extension = extension_of(path).unwrap_or_default();
    if !DISTANCE_SOURCE_EXTENSIONS.contains(&extension.as_str()) {
        return Err(SuitabilityError::UnsupportedVectorFormat {
            path: path.to_path_buf(),
            extension,
        });
    }

    if extension == "shp" {
        for sidecar in ["shx", "dbf"] {
            let companion = path.with_extension(sidecar);
            if !companion.exists() {
                return Err(SuitabilityError::MissingAssociatedFile { path: companion });
            }
        }
    }
    Ok(())
}

pub struct DistanceClassificationStage {
    executor: Arc<dyn ToolExecutor>,
    scratch: Arc<ScratchSpace>,
    editor: Arc<dyn IntervalEditor>,
    config: AnalysisConfig,
    extent: Option<Extent>,
}

impl DistanceClassificationStage {
    pub fn new(
        executor: Arc<dyn ToolExecutor>,
        scratch: Arc<ScratchSpace>,
        editor: Arc<dyn IntervalEditor>,
        config: AnalysisConfig,
    ) -> Self {
        Self {
            executor,
            scratch,
            editor,
            config,
            extent: None,
        }
    }

    pub fn with_extent(mut self, extent: Option<Extent>) -> Self {
        self.extent = extent;
        self
    }

    /// Runs every non-empty criterion, at most `criteria_concurrency` at a
    /// time. Results keep request order; the first failure stops the rest.
    pub async fn execute(
        &self,
        criteria: &[PoiCriterion],
    ) -> Result<Vec<ClassifiedRaster>, SuitabilityError> {
        let active: Vec<&PoiCriterion> = criteria.iter().filter(|c| !c.is_empty()).collect();
        info!(criteria = active.len(), "classifying criteria");

        let pending: Vec<_> = active
            .into_iter()
            .map(|criterion| self.process_criterion(criterion))
            .collect();
        stream::iter(pending)
            .buffered(self.config.criteria_concurrency.max(1))
            .try_collect()
            .await
    }

    pub async fn process_criterion(
        &self,
        criterion: &PoiCriterion,
    ) -> Result<ClassifiedRaster, SuitabilityError> {
        let name = criterion.data_name();
        self.classify_criterion(criterion, &name)
            .await
            .map_err(|err| err.for_criterion(&name))
    }

    async fn classify_criterion(
        &self,
        criterion: &PoiCriterion,
        name: &str,
    ) -> Result<ClassifiedRaster, SuitabilityError> {
        let data_type = criterion.data_type();
        let distance_raster = match data_type {
            DataType::Unknown => {
                return Err(SuitabilityError::UnrecognizedDataType {
                    path: criterion.data_path.clone(),
                })
            }
            DataType::Vector => {
                check_vector_source(&criterion.data_path)?;
                Some(self.euclidean_distance(criterion, name).await?)
            }
            DataType::Raster => None,
        };
        let source = distance_raster
            .clone()
            .unwrap_or_else(|| criterion.data_path.clone());

        let (rules, method) = self.class_rules(criterion, &source).await?;
        let reclassified_raster = self.reclassify(name, &source, &rules).await?;

        let nodata_value = nodata_patch_value(criterion.distance, self.config.num_classes);
        let path = self
            .patch_nodata(name, &reclassified_raster, nodata_value)
            .await?;

        info!(criterion = name, method = ?method, "criterion classified");
        Ok(ClassifiedRaster {
            name: name.to_string(),
            data_type,
            distance_raster,
            reclassified_raster,
            path,
            method,
            rules,
            nodata_value,
        })
    }

    async fn euclidean_distance(
        &self,
        criterion: &PoiCriterion,
        name: &str,
    ) -> Result<PathBuf, SuitabilityError> {
        let maximum_distance = criterion
            .distance
            .map(|distance| f64::from(distance).abs())
            .unwrap_or(self.config.default_max_distance);
        let output = self
            .scratch
            .create_tracked_path(&format!("{name}{DISTANCE_SUFFIX}"));

        let parameters = ToolParameters::new()
            .with_path("in_source_data", &criterion.data_path)
            .with_path("out_distance_raster", &output)
            .with("maximum_distance", maximum_distance)
            .with("cell_size", self.config.cell_size);
        let environment = EnvironmentOptions::overwriting().with_extent(self.extent.clone());

        run_tool(
            self.executor.as_ref(),
            GeoTool::EuclideanDistance,
            parameters,
            environment,
        )
        .await?;
        Ok(output)
    }

    async fn class_rules(
        &self,
        criterion: &PoiCriterion,
        source: &Path,
    ) -> Result<(Vec<IntervalClassRule>, ClassificationMethod), SuitabilityError> {
        let domain = self.value_domain(criterion, source).await;
        let invert = invert_classes(criterion, &self.config);
        let proposal =
            compute_equal_interval_rules(domain.min, domain.max, self.config.num_classes, invert)?;

        if criterion.use_custom_interval {
            match self.editor.edit(criterion, &proposal).await {
                Some(table) => {
                    return Ok((accept_custom_rules(table)?, ClassificationMethod::Custom));
                }
                None => {
                    info!(
                        criterion = %criterion.data_name(),
                        "custom intervals cancelled, using equal intervals"
                    );
                }
            }
        }

        Ok((proposal, ClassificationMethod::EqualInterval))
    }

    async fn value_domain(&self, criterion: &PoiCriterion, source: &Path) -> ValueDomain {
        if criterion.data_type() != DataType::Raster {
            return ValueDomain::for_distance(
                criterion
                    .distance
                    .map(f64::from)
                    .unwrap_or(self.config.default_max_distance),
            );
        }

        let domain = ValueDomain::from_statistics(self.raster_statistics(source).await);
        if domain.is_fallback() {
            warn!(
                raster = %source.display(),
                "raster statistics unavailable, using the default value range"
            );
        }
        domain
    }

    async fn raster_statistics(&self, raster: &Path) -> Option<(f64, f64)> {
        let min = self.raster_property(raster, "MINIMUM").await?;
        let max = self.raster_property(raster, "MAXIMUM").await?;
        Some((min, max))
    }

    async fn raster_property(&self, raster: &Path, property: &str) -> Option<f64> {
        let parameters = ToolParameters::new()
            .with_path("in_raster", raster)
            .with("property_type", property);
        match run_tool(
            self.executor.as_ref(),
            GeoTool::GetRasterProperties,
            parameters,
            EnvironmentOptions::default(),
        )
        .await
        {
            Ok(result) => result
                .first_value()
                .and_then(|value| value.trim().parse::<f64>().ok()),
            Err(failure) => {
                debug!(property, error = %failure, "raster property query failed");
                None
            }
        }
    }

    async fn reclassify(
        &self,
        name: &str,
        source: &Path,
        rules: &[IntervalClassRule],
    ) -> Result<PathBuf, SuitabilityError> {
        let remap = build_remap_expression(rules);
        if remap.is_empty() {
            return Err(ReclassError::EmptyTable.into());
        }

        let output = self
            .scratch
            .create_tracked_path(&format!("{name}{RECLASSIFICATION_SUFFIX}"));
        let parameters = ToolParameters::new()
            .with_path("in_raster", source)
            .with("reclass_field", VALUE_FIELD)
            .with("remap", remap)
            .with_path("out_raster", &output)
            .with("missing_values", "DATA");

        run_tool(
            self.executor.as_ref(),
            GeoTool::Reclassify,
            parameters,
            EnvironmentOptions::overwriting(),
        )
        .await?;
        Ok(output)
    }

    async fn patch_nodata(
        &self,
        name: &str,
        raster: &Path,
        value: f64,
    ) -> Result<PathBuf, SuitabilityError> {
        let output = self
            .scratch
            .create_tracked_path(&format!("{name}{NODATA_SUFFIX}"));
        let parameters = ToolParameters::new()
            .with("expression", nodata_expression(raster, value))
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
}
