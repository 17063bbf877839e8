use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::domain::{is_blank, AnalysisRequest, DataType};
use super::error::SuitabilityError;
use crate::config::AnalysisConfig;

/// Float slack on top of the configured weight tolerance, so that sums such
/// as `0.999` compare as in range.
const SUM_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("a study area is required")]
    MissingStudyArea,
    #[error("study area {} does not exist", .0.display())]
    StudyAreaNotFound(PathBuf),
    #[error("at least one constraint layer is required")]
    NoConstraints,
    #[error("constraint layer {} does not exist", .0.display())]
    ConstraintNotFound(PathBuf),
    #[error("at least one criterion is required")]
    NoCriteria,
    #[error("criterion dataset {} does not exist", .0.display())]
    CriterionNotFound(PathBuf),
    #[error("criterion '{0}' uses vector data and needs a distance")]
    MissingDistance(String),
    #[error("criterion '{0}' has a distance of zero")]
    ZeroDistance(String),
    #[error("criterion '{0}' has no weight")]
    MissingWeight(String),
    #[error("criterion '{name}' has weight {weight}, expected a value between 0 and 1")]
    WeightOutOfRange { name: String, weight: f64 },
    #[error("criterion name '{0}' is used by more than one dataset")]
    DuplicateCriterionName(String),
    #[error("criteria weights sum to {sum:.3}, expected 1.0")]
    WeightSum { sum: f64 },
    #[error("an output path is required")]
    MissingOutput,
    #[error("output directory {} does not exist", .0.display())]
    OutputDirectoryNotFound(PathBuf),
    #[error(
        "weights and classified rasters disagree (no raster for {missing_rasters:?}, no weight for {missing_weights:?})"
    )]
    WeightRasterMismatch {
        missing_weights: Vec<String>,
        missing_rasters: Vec<String>,
    },
}

/// True when the weights add up to 1.0 within `tolerance`. No weights at all
/// is vacuously valid.
pub fn weight_sum_is_valid(weights: &[f64], tolerance: f64) -> bool {
    if weights.is_empty() {
        return true;
    }
    let sum: f64 = weights.iter().sum();
    (sum - 1.0).abs() <= tolerance + SUM_EPSILON
}

pub fn weight_in_range(weight: f64) -> bool {
    (0.0..=1.0).contains(&weight)
}

/// Checks a request before any tool runs; the first failure wins.
pub fn validate_request(
    request: &AnalysisRequest,
    config: &AnalysisConfig,
) -> Result<(), SuitabilityError> {
    if is_blank(&request.study_area) {
        return Err(ValidationError::MissingStudyArea.into());
    }
    if !request.study_area.exists() {
        return Err(ValidationError::StudyAreaNotFound(request.study_area.clone()).into());
    }

    let mut constraints = request.active_constraints().peekable();
    if constraints.peek().is_none() {
        return Err(ValidationError::NoConstraints.into());
    }
    for constraint in constraints {
        if !constraint.path.exists() {
            return Err(ValidationError::ConstraintNotFound(constraint.path.clone()).into());
        }
        if super::classify::classify(&constraint.path) != DataType::Vector {
            return Err(SuitabilityError::UnrecognizedDataType {
                path: constraint.path.clone(),
            });
        }
    }

    let criteria: Vec<_> = request.active_criteria().collect();
    if criteria.is_empty() {
        return Err(ValidationError::NoCriteria.into());
    }

    for criterion in &criteria {
        let name = criterion.data_name();
        if !criterion.data_path.exists() {
            return Err(ValidationError::CriterionNotFound(criterion.data_path.clone()).into());
        }
        match criterion.data_type() {
            DataType::Unknown => {
                return Err(SuitabilityError::UnrecognizedDataType {
                    path: criterion.data_path.clone(),
                })
            }
            DataType::Vector => match criterion.distance {
                None => return Err(ValidationError::MissingDistance(name).into()),
                Some(0) => return Err(ValidationError::ZeroDistance(name).into()),
                Some(_) => {}
            },
            DataType::Raster => {}
        }
        let weight = criterion
            .weight
            .ok_or_else(|| ValidationError::MissingWeight(name.clone()))?;
        if !weight_in_range(weight) {
            return Err(ValidationError::WeightOutOfRange { name, weight }.into());
        }
    }

    let mut seen = HashSet::new();
    for criterion in &criteria {
        let name = criterion.data_name();
        if !seen.insert(name.clone()) {
            return Err(ValidationError::DuplicateCriterionName(name).into());
        }
    }

    let weights: Vec<f64> = criteria.iter().filter_map(|c| c.weight).collect();
    if !weight_sum_is_valid(&weights, config.weight_tolerance) {
        return Err(ValidationError::WeightSum {
            sum: weights.iter().sum(),
        }
        .into());
    }

    validate_output(&request.output)?;

    debug!(criteria = criteria.len(), "analysis request is valid");
    Ok(())
}

fn validate_output(output: &Path) -> Result<(), ValidationError> {
    if is_blank(output) {
        return Err(ValidationError::MissingOutput);
    }
    let parent = match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    if !parent.is_dir() {
        return Err(ValidationError::OutputDirectoryNotFound(parent.to_path_buf()));
    }
    Ok(())
}
