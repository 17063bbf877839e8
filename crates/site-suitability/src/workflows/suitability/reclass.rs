//! Reclassification tables: equal-interval generation, remap expressions
//! and validation of user supplied tables.

use serde::{Deserialize, Serialize};

use super::domain::{DataType, IntervalClassRule, PoiCriterion};
use crate::config::{AnalysisConfig, MAX_NUM_CLASSES};

/// Largest gap tolerated between the end of one band and the start of the
/// next.
pub const CONTIGUITY_TOLERANCE: f64 = 1e-4;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReclassError {
    #[error("number of classes must be at least 1")]
    NoClasses,
    #[error("number of classes must be at most {max}, got {requested}")]
    TooManyClasses { requested: u32, max: u32 },
    #[error("value range [{min}, {max}] is empty")]
    EmptyDomain { min: f64, max: f64 },
    #[error("interval table is empty")]
    EmptyTable,
    #[error("interval table has overlapping, reversed or non-contiguous rows: {rows:?}")]
    InvalidTable { rows: Vec<usize> },
    #[error("remap entry '{0}' is not a 'start end score' triplet")]
    MalformedRemap(String),
}

/// Closed value range a criterion's raster spans.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueDomain {
    pub min: f64,
    pub max: f64,
}

impl ValueDomain {
    /// Used whenever raster statistics are unavailable.
    pub const FALLBACK: ValueDomain = ValueDomain {
        min: 0.0,
        max: 1000.0,
    };

    pub fn for_distance(distance: f64) -> Self {
        Self {
            min: 0.0,
            max: distance.abs(),
        }
    }

    /// Accepts engine statistics unless they are missing, degenerate, or the
    /// engine's own `(0, 1000)` placeholder.
    pub fn from_statistics(statistics: Option<(f64, f64)>) -> Self {
        match statistics {
            Some((min, max))
                if min.is_finite()
                    && max.is_finite()
                    && max > min
                    && !(min == Self::FALLBACK.min && max == Self::FALLBACK.max) =>
            {
                Self { min, max }
            }
            _ => Self::FALLBACK,
        }
    }

    pub fn is_fallback(&self) -> bool {
        *self == Self::FALLBACK
    }
}

/// Whether high scores go to low values.
///
/// Vector criteria follow the sign of their distance (proximity is good for
/// positive distances); raster criteria follow the configured policy.
pub fn invert_classes(criterion: &PoiCriterion, config: &AnalysisConfig) -> bool {
    match criterion.data_type() {
        DataType::Raster => config.invert_raster_classes,
        _ => criterion.distance.map(|distance| distance > 0).unwrap_or(true),
    }
}

/// Splits `[domain_min, domain_max]` into `num_classes` equal bands.
///
/// Band `i` starts at `min + i * interval`; the previous band ends at the
/// same expression so neighbouring bounds are bit-identical, and the last
/// band ends exactly at `domain_max`.
pub fn compute_equal_interval_rules(
    domain_min: f64,
    domain_max: f64,
    num_classes: u32,
    invert: bool,
) -> Result<Vec<IntervalClassRule>, ReclassError> {
    if num_classes == 0 {
        return Err(ReclassError::NoClasses);
    }
    let too_many = || ReclassError::TooManyClasses {
        requested: num_classes,
        max: MAX_NUM_CLASSES,
    };
    if num_classes > MAX_NUM_CLASSES {
        return Err(too_many());
    }
    let classes = i32::try_from(num_classes).map_err(|_| too_many())?;
    if !(domain_min.is_finite() && domain_max.is_finite() && domain_max > domain_min) {
        return Err(ReclassError::EmptyDomain {
            min: domain_min,
            max: domain_max,
        });
    }

    let interval = (domain_max - domain_min) / f64::from(num_classes);

    Ok((0..classes)
        .map(|position| {
            let index = position.unsigned_abs();
            let start_value = domain_min + f64::from(index) * interval;
            let end_value = if index + 1 == num_classes {
                domain_max
            } else {
                domain_min + f64::from(index + 1) * interval
            };
            let class_score = if invert {
                classes - position
            } else {
                position + 1
            };
            IntervalClassRule::new(start_value, end_value, class_score)
        })
        .collect())
}

/// Serializes rules as `start end score` triplets joined by `;`, ascending
/// by start. Returns an empty string for an empty or degenerate table.
pub fn build_remap_expression(rules: &[IntervalClassRule]) -> String {
    let degenerate = rules.iter().all(IntervalClassRule::is_empty)
        || rules.iter().any(|rule| {
            !rule.start_value.is_finite()
                || !rule.end_value.is_finite()
                || rule.start_value >= rule.end_value
        });
    if degenerate {
        return String::new();
    }

    let mut ordered = rules.to_vec();
    ordered.sort_by(|a, b| a.start_value.total_cmp(&b.start_value));
    ordered
        .iter()
        .map(|rule| format!("{} {} {}", rule.start_value, rule.end_value, rule.class_score))
        .collect::<Vec<_>>()
        .join(";")
}

pub fn parse_remap_expression(text: &str) -> Result<Vec<IntervalClassRule>, ReclassError> {
    text.split(';')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let malformed = || ReclassError::MalformedRemap(entry.to_string());
            let parts: Vec<&str> = entry.split_whitespace().collect();
            let [start, end, score] = parts.as_slice() else {
                return Err(malformed());
            };
            Ok(IntervalClassRule::new(
                start.parse().map_err(|_| malformed())?,
                end.parse().map_err(|_| malformed())?,
                score.parse().map_err(|_| malformed())?,
            ))
        })
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RuleFlags {
    pub start_error: bool,
    pub end_error: bool,
}

impl RuleFlags {
    pub fn is_clear(&self) -> bool {
        !self.start_error && !self.end_error
    }
}

/// Per-row outcome of [`validate_rules`]. Built fresh on every call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleValidation {
    pub flags: Vec<RuleFlags>,
}

impl RuleValidation {
    pub fn is_valid(&self) -> bool {
        !self.flags.is_empty() && self.flags.iter().all(RuleFlags::is_clear)
    }

    /// Zero-based indices of rows with at least one flag.
    pub fn flagged_rows(&self) -> Vec<usize> {
        self.flags
            .iter()
            .enumerate()
            .filter(|(_, flags)| !flags.is_clear())
            .map(|(index, _)| index)
            .collect()
    }
}

/// Flags non-finite bounds on their own side and reversed bands on both
/// sides; flags gaps or overlaps between consecutive bands on the start of
/// the later band and the end of the earlier one. A band flagged for its own
/// bounds is not checked against its predecessor.
pub fn validate_rules(rules: &[IntervalClassRule]) -> RuleValidation {
    let mut flags = vec![RuleFlags::default(); rules.len()];

    for (index, rule) in rules.iter().enumerate() {
        if !rule.start_value.is_finite() || !rule.end_value.is_finite() {
            flags[index].start_error = !rule.start_value.is_finite();
            flags[index].end_error = !rule.end_value.is_finite();
            continue;
        }
        if rule.start_value >= rule.end_value {
            flags[index].start_error = true;
            flags[index].end_error = true;
            continue;
        }

        if index > 0 {
            let previous = &rules[index - 1];
            if (rule.start_value - previous.end_value).abs() > CONTIGUITY_TOLERANCE {
                flags[index].start_error = true;
                flags[index - 1].end_error = true;
            }
        }
    }

    RuleValidation { flags }
}

/// Accepts a user table verbatim once it validates. Unfilled rows are
/// dropped first.
pub fn accept_custom_rules(
    rules: Vec<IntervalClassRule>,
) -> Result<Vec<IntervalClassRule>, ReclassError> {
    let rules: Vec<IntervalClassRule> = rules.into_iter().filter(|rule| !rule.is_empty()).collect();
    if rules.is_empty() {
        return Err(ReclassError::EmptyTable);
    }

    let validation = validate_rules(&rules);
    if !validation.is_valid() {
        return Err(ReclassError::InvalidTable {
            rows: validation.flagged_rows(),
        });
    }
    Ok(rules)
}

/// Equal-interval table a criterion would get, without consulting the
/// engine. Rasters use `domain` when known, otherwise the fallback range.
pub fn preview_rules(
    criterion: &PoiCriterion,
    config: &AnalysisConfig,
    num_classes: Option<u32>,
    domain: Option<ValueDomain>,
) -> Result<Vec<IntervalClassRule>, ReclassError> {
    let domain = match criterion.data_type() {
        DataType::Raster => domain.unwrap_or(ValueDomain::FALLBACK),
        _ => ValueDomain::for_distance(
            criterion
                .distance
                .map(f64::from)
                .unwrap_or(config.default_max_distance),
        ),
    };
    compute_equal_interval_rules(
        domain.min,
        domain.max,
        num_classes.unwrap_or(config.num_classes),
        invert_classes(criterion, config),
    )
}

/// Equal-interval table for display, with its remap expression.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntervalPreview {
    pub criterion: String,
    pub inverted: bool,
    pub rules: Vec<IntervalClassRule>,
    pub remap: String,
}

impl IntervalPreview {
    pub fn build(
        criterion: &PoiCriterion,
        config: &AnalysisConfig,
        num_classes: Option<u32>,
        domain: Option<ValueDomain>,
    ) -> Result<Self, ReclassError> {
        let rules = preview_rules(criterion, config, num_classes, domain)?;
        Ok(Self {
            criterion: criterion.data_name(),
            inverted: invert_classes(criterion, config),
            remap: build_remap_expression(&rules),
            rules,
        })
    }
}
