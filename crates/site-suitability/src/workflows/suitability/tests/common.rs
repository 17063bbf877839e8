use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::response::Response;
use serde_json::Value;

use crate::config::{AnalysisConfig, ScratchConfig};
use crate::geoprocessing::{
    EnvironmentOptions, ExecutorError, GeoTool, ToolExecutor, ToolMessage, ToolParameters,
    ToolResult,
};
use crate::scratch::ScratchSpace;
use crate::workflows::suitability::domain::{AnalysisRequest, ConstraintSpec, PoiCriterion};

static WORKSPACE_SEQUENCE: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone)]
pub(super) struct RecordedCall {
    pub(super) tool: GeoTool,
    pub(super) parameters: ToolParameters,
    pub(super) environment: EnvironmentOptions,
}

/// In-memory engine: records every call, touches output files and answers
/// raster statistics queries from a canned pair.
#[derive(Default)]
pub(super) struct RecordingEngine {
    calls: Mutex<Vec<RecordedCall>>,
    failures: HashMap<GeoTool, Vec<ToolMessage>>,
    statistics: Option<(f64, f64)>,
}

impl RecordingEngine {
    pub(super) fn failing(mut self, tool: GeoTool, message: &str) -> Self {
        self.failures
            .insert(tool, vec![ToolMessage::error(999999, message)]);
        self
    }

    pub(super) fn with_statistics(mut self, min: f64, max: f64) -> Self {
        self.statistics = Some((min, max));
        self
    }

    pub(super) fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().expect("engine mutex poisoned").clone()
    }

    pub(super) fn tools(&self) -> Vec<GeoTool> {
        self.calls().into_iter().map(|call| call.tool).collect()
    }

    pub(super) fn calls_for(&self, tool: GeoTool) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.tool == tool)
            .collect()
    }
}

#[async_trait]
impl ToolExecutor for RecordingEngine {
    async fn execute(
        &self,
        tool: GeoTool,
        parameters: ToolParameters,
        environment: EnvironmentOptions,
    ) -> Result<ToolResult, ExecutorError> {
        self.calls
            .lock()
            .expect("engine mutex poisoned")
            .push(RecordedCall {
                tool,
                parameters: parameters.clone(),
                environment,
            });

        if let Some(messages) = self.failures.get(&tool) {
            return Ok(ToolResult::failed(messages.clone()));
        }

        if tool == GeoTool::GetRasterProperties {
            return Ok(match (self.statistics, parameters.get_str("property_type")) {
                (Some((min, _)), Some("MINIMUM")) => ToolResult::succeeded().with_value(min.to_string()),
                (Some((_, max)), Some("MAXIMUM")) => ToolResult::succeeded().with_value(max.to_string()),
                _ => ToolResult::failed(Vec::new()),
            });
        }

        for parameter in parameters.iter().filter(|p| p.name.starts_with("out")) {
            if let Some(path) = parameter.value.as_str() {
                fs::write(path, b"").ok();
            }
        }
        Ok(ToolResult::succeeded())
    }
}

/// Throwaway directory with GIS-looking fixture files.
pub(super) struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub(super) fn new(label: &str) -> Self {
        let sequence = WORKSPACE_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let root = std::env::temp_dir().join(format!(
            "site-suitability-unit-{label}-{}-{sequence}",
            std::process::id()
        ));
        fs::create_dir_all(&root).expect("create workspace");
        Self { root }
    }

    pub(super) fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub(super) fn file(&self, name: &str) -> PathBuf {
        let path = self.path(name);
        fs::write(&path, b"").expect("write fixture");
        path
    }

    /// A `.shp` with its `.shx` and `.dbf` companions.
    pub(super) fn shapefile(&self, stem: &str) -> PathBuf {
        for extension in ["shx", "dbf"] {
            self.file(&format!("{stem}.{extension}"));
        }
        self.file(&format!("{stem}.shp"))
    }

    pub(super) fn scratch(&self) -> Arc<ScratchSpace> {
        Arc::new(ScratchSpace::new(self.path("scratch")).expect("scratch dir"))
    }

    pub(super) fn scratch_config(&self) -> ScratchConfig {
        ScratchConfig {
            directory: self.path("scratch"),
            keep_artifacts: false,
        }
    }

    pub(super) fn request(&self, criteria: Vec<PoiCriterion>) -> AnalysisRequest {
        AnalysisRequest {
            study_area: self.shapefile("study_area"),
            constraints: vec![ConstraintSpec::new(self.shapefile("water"))],
            criteria,
            output: self.path("result.shp"),
            ..AnalysisRequest::default()
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        fs::remove_dir_all(&self.root).ok();
    }
}

pub(super) fn analysis_config() -> AnalysisConfig {
    AnalysisConfig::default()
}

pub(super) fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 1 << 20)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
