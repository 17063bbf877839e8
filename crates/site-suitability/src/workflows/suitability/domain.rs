use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::classify::classify;
use crate::geoprocessing::{Envelope, Extent};

/// Field holding the suitability class in the result polygons.
pub const RATING_FIELD: &str = "gridcode";
/// Raster field reclassification reads from.
pub const VALUE_FIELD: &str = "VALUE";
pub const SUITABLE_AREA_FILENAME: &str = "Suitable_Area.shp";
pub const RESULT_FILENAME: &str = "Result_Rating_Suitable_Area.shp";

pub const DISTANCE_SUFFIX: &str = "_distance.tif";
pub const RECLASSIFICATION_SUFFIX: &str = "_reclassification.tif";
pub const NODATA_SUFFIX: &str = "_reclassification_ND.tif";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Vector,
    Raster,
    Unknown,
}

impl DataType {
    pub const fn label(self) -> &'static str {
        match self {
            DataType::Vector => "vector",
            DataType::Raster => "raster",
            DataType::Unknown => "unknown",
        }
    }
}

/// Phases of one analysis run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisPhase {
    Validating,
    DividingLand,
    ComputingCriteria,
    Scoring,
    Done,
    Failed,
}

impl AnalysisPhase {
    pub const fn label(self) -> &'static str {
        match self {
            AnalysisPhase::Validating => "validation",
            AnalysisPhase::DividingLand => "land division",
            AnalysisPhase::ComputingCriteria => "criteria computation",
            AnalysisPhase::Scoring => "scoring",
            AnalysisPhase::Done => "done",
            AnalysisPhase::Failed => "failed",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, AnalysisPhase::Done | AnalysisPhase::Failed)
    }
}

/// Rounds a weight to two decimals.
pub fn round_weight(weight: f64) -> f64 {
    (weight * 100.0).round() / 100.0
}

/// One weighted point-of-interest or raster criterion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoiCriterion {
    pub data_path: PathBuf,
    /// Metres. The sign selects the scoring direction; rasters carry none.
    #[serde(default)]
    pub distance: Option<i32>,
    #[serde(default)]
    pub weight: Option<f64>,
    #[serde(default)]
    pub use_custom_interval: bool,
}

impl PoiCriterion {
    pub fn new(data_path: impl Into<PathBuf>) -> Self {
        let mut criterion = Self {
            data_path: data_path.into(),
            ..Self::default()
        };
        criterion.set_distance(None);
        criterion
    }

    pub fn with_distance(mut self, distance: i32) -> Self {
        self.set_distance(Some(distance));
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.set_weight(weight);
        self
    }

    pub fn with_custom_interval(mut self, enabled: bool) -> Self {
        self.use_custom_interval = enabled;
        self
    }

    pub fn set_weight(&mut self, weight: f64) {
        self.weight = Some(round_weight(weight));
    }

    /// Raster criteria never keep a distance.
    pub fn set_distance(&mut self, distance: Option<i32>) {
        self.distance = if self.is_raster_data() { None } else { distance };
    }

    pub fn data_name(&self) -> String {
        self.data_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().trim().to_string())
            .unwrap_or_default()
    }

    pub fn data_type(&self) -> DataType {
        classify(&self.data_path)
    }

    pub fn is_raster_data(&self) -> bool {
        self.data_type() == DataType::Raster
    }

    /// Rows with a blank path are placeholders and are ignored.
    pub fn is_empty(&self) -> bool {
        is_blank(&self.data_path)
    }

    /// Applies the assignment rules to a criterion that bypassed the
    /// setters, e.g. one deserialized from a request body.
    pub fn normalized(mut self) -> Self {
        let distance = self.distance;
        self.set_distance(distance);
        self.weight = self.weight.map(round_weight);
        self
    }
}

/// Exclusion layer removed from the study area.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConstraintSpec {
    pub path: PathBuf,
}

impl ConstraintSpec {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn is_empty(&self) -> bool {
        is_blank(&self.path)
    }
}

/// One band of a reclassification table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct IntervalClassRule {
    pub start_value: f64,
    pub end_value: f64,
    pub class_score: i32,
}

impl IntervalClassRule {
    pub fn new(start_value: f64, end_value: f64, class_score: i32) -> Self {
        Self {
            start_value,
            end_value,
            class_score,
        }
    }

    /// An untouched row: every field still holds its zero default.
    pub fn is_empty(&self) -> bool {
        self.start_value == 0.0 && self.end_value == 0.0 && self.class_score == 0
    }
}

/// Everything one analysis run needs, validated as a unit before any tool
/// runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub study_area: PathBuf,
    #[serde(default)]
    pub constraints: Vec<ConstraintSpec>,
    #[serde(default)]
    pub criteria: Vec<PoiCriterion>,
    pub output: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extent: Option<Envelope>,
    /// Interval tables for criteria flagged `use_custom_interval`, keyed by
    /// criterion name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom_intervals: BTreeMap<String, Vec<IntervalClassRule>>,
}

impl AnalysisRequest {
    pub fn normalized(mut self) -> Self {
        self.criteria = self
            .criteria
            .into_iter()
            .map(PoiCriterion::normalized)
            .collect();
        self
    }

    pub fn active_constraints(&self) -> impl Iterator<Item = &ConstraintSpec> {
        self.constraints.iter().filter(|constraint| !constraint.is_empty())
    }

    pub fn active_criteria(&self) -> impl Iterator<Item = &PoiCriterion> {
        self.criteria.iter().filter(|criterion| !criterion.is_empty())
    }

    /// Weights of the active criteria keyed by criterion name.
    pub fn weights(&self) -> HashMap<String, f64> {
        self.active_criteria()
            .filter_map(|criterion| {
                criterion
                    .weight
                    .map(|weight| (criterion.data_name(), weight))
            })
            .collect()
    }

    /// An explicit envelope wins; otherwise the study area bounds processing.
    pub fn processing_extent(&self) -> Extent {
        match self.extent {
            Some(envelope) => Extent::Envelope(envelope),
            None => Extent::Dataset(self.study_area.clone()),
        }
    }
}

pub(crate) fn is_blank(path: &Path) -> bool {
    path.as_os_str().to_string_lossy().trim().is_empty()
}
