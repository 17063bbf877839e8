use crate::infra::build_analysis;
use chrono::Local;
use clap::Args;
use site_suitability::config::AppConfig;
use site_suitability::error::AppError;
use site_suitability::telemetry;
use site_suitability::workflows::suitability::{
    criteria_from_path, interval_table_from_path, AnalysisOutcome, AnalysisRequest,
    ClassificationMethod, ConstraintSpec, IntervalPreview, PoiCriterion, RESULT_FILENAME,
};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Args, Debug, Default)]
pub(crate) struct RunArgs {
    /// JSON analysis request. Replaces the individual input flags.
    #[arg(long, conflicts_with_all = ["study_area", "constraints", "criteria"])]
    pub(crate) request: Option<PathBuf>,
    /// Study area polygon dataset
    #[arg(long, required_unless_present = "request")]
    pub(crate) study_area: Option<PathBuf>,
    /// Exclusion constraint dataset (repeatable)
    #[arg(long = "constraint")]
    pub(crate) constraints: Vec<PathBuf>,
    /// Criteria CSV with data_path, distance, weight, custom_interval columns
    #[arg(long, required_unless_present = "request")]
    pub(crate) criteria: Option<PathBuf>,
    /// Result dataset, or a directory to receive the default result name
    #[arg(long, required_unless_present = "request")]
    pub(crate) output: Option<PathBuf>,
    /// Custom class table for a criterion, as NAME=CSV (repeatable)
    #[arg(long = "interval", value_parser = parse_interval_source)]
    pub(crate) intervals: Vec<(String, PathBuf)>,
    /// Keep intermediate datasets after the run
    #[arg(long)]
    pub(crate) keep_scratch: bool,
    /// Print the run report as JSON
    #[arg(long)]
    pub(crate) json: bool,
}

#[derive(Args, Debug)]
pub(crate) struct IntervalArgs {
    /// Maximum distance in meters; negative values reverse the scores
    #[arg(long, allow_negative_numbers = true)]
    pub(crate) distance: i32,
    /// Number of classes (defaults to the configured count)
    #[arg(long)]
    pub(crate) classes: Option<u32>,
    /// Criterion name shown in the table
    #[arg(long, default_value = "criterion")]
    pub(crate) name: String,
}

pub(crate) async fn run_analysis(args: RunArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;
    if args.keep_scratch {
        config.scratch.keep_artifacts = true;
    }
    telemetry::init(&config.telemetry)?;

    let request = build_request(&args)?;
    let analysis = build_analysis(&config)?;
    let outcome = analysis.run(request).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        for line in outcome_lines(&outcome) {
            println!("{line}");
        }
    }
    Ok(())
}

pub(crate) fn run_interval_preview(args: IntervalArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    let criterion =
        PoiCriterion::new(format!("{}.shp", args.name.trim())).with_distance(args.distance);
    let preview = IntervalPreview::build(&criterion, &config.analysis, args.classes, None)?;

    println!(
        "Classes for '{}' ({})",
        preview.criterion,
        if preview.inverted {
            "nearer scores higher"
        } else {
            "farther scores higher"
        }
    );
    for rule in &preview.rules {
        println!(
            "  {:>10.2} - {:<10.2} => {}",
            rule.start_value, rule.end_value, rule.class_score
        );
    }
    println!("Remap: {}", preview.remap);
    Ok(())
}

pub(crate) fn build_request(args: &RunArgs) -> Result<AnalysisRequest, AppError> {
    let mut request = match &args.request {
        Some(path) => {
            let raw = fs::read_to_string(path)?;
            serde_json::from_str::<AnalysisRequest>(&raw)?
        }
        None => AnalysisRequest {
            study_area: args.study_area.clone().unwrap_or_default(),
            constraints: args
                .constraints
                .iter()
                .cloned()
                .map(ConstraintSpec::new)
                .collect(),
            criteria: match &args.criteria {
                Some(path) => criteria_from_path(path)?,
                None => Vec::new(),
            },
            ..AnalysisRequest::default()
        },
    };

    if let Some(output) = &args.output {
        request.output = resolve_output(output);
    }

    for (name, path) in &args.intervals {
        let table = interval_table_from_path(path)?;
        for criterion in request
            .criteria
            .iter_mut()
            .filter(|criterion| criterion.data_name() == *name)
        {
            criterion.use_custom_interval = true;
        }
        request.custom_intervals.insert(name.clone(), table);
    }

    Ok(request)
}

fn resolve_output(output: &Path) -> PathBuf {
    if output.is_dir() {
        output.join(RESULT_FILENAME)
    } else {
        output.to_path_buf()
    }
}

fn parse_interval_source(raw: &str) -> Result<(String, PathBuf), String> {
    let (name, path) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=CSV, got '{raw}'"))?;
    let (name, path) = (name.trim(), path.trim());
    if name.is_empty() || path.is_empty() {
        return Err(format!("expected NAME=CSV, got '{raw}'"));
    }
    Ok((name.to_string(), PathBuf::from(path)))
}

fn outcome_lines(outcome: &AnalysisOutcome) -> Vec<String> {
    let mut lines = vec![
        "Site suitability analysis".to_string(),
        format!(
            "- result: {} (score field '{}')",
            outcome.result_path.display(),
            outcome.rating_field
        ),
        format!("- buildable land: {}", outcome.buildable_land_path.display()),
        format!(
            "- finished in {:.1}s{}",
            outcome.elapsed_seconds,
            if outcome.simplified {
                ", polygons simplified"
            } else {
                ""
            }
        ),
        "Criteria:".to_string(),
    ];

    for raster in &outcome.classified_rasters {
        let method = match raster.method {
            ClassificationMethod::EqualInterval => "equal interval",
            ClassificationMethod::Custom => "custom",
        };
        lines.push(format!(
            "  - {} ({}, {} classes, {}) | NoData -> {}",
            raster.name,
            raster.data_type.label(),
            raster.rules.len(),
            method,
            raster.nodata_value
        ));
    }

    lines.push("Phases:".to_string());
    for transition in &outcome.phases {
        lines.push(format!(
            "  - {} at {}",
            transition.phase.label(),
            transition.at.with_timezone(&Local).format("%H:%M:%S")
        ));
    }

    lines.push(format!(
        "Scratch: {} artifacts {}",
        outcome.scratch_files.len(),
        if outcome.scratch_retained {
            "kept"
        } else {
            "removed"
        }
    ));
    lines
}
