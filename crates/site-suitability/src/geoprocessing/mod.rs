//! Contract between the pipeline and the external geoprocessing engine.
//!
//! Spatial algorithms (distance transforms, overlays, map algebra) are never
//! computed here. Stages describe a tool call as a [`GeoTool`] plus ordered
//! [`ToolParameters`] and hand it to a [`ToolExecutor`].

mod process;

pub use process::ProcessToolExecutor;

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Geoprocessing tools the pipeline relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeoTool {
    EuclideanDistance,
    Union,
    Erase,
    Reclassify,
    RasterCalculator,
    RasterToPolygon,
    SimplifyPolygon,
    Intersect,
    GetRasterProperties,
}

impl GeoTool {
    /// Engine-side tool identifier.
    pub const fn identifier(self) -> &'static str {
        match self {
            GeoTool::EuclideanDistance => "sa.EucDistance",
            GeoTool::Union => "analysis.Union",
            GeoTool::Erase => "analysis.Erase",
            GeoTool::Reclassify => "sa.Reclassify",
            GeoTool::RasterCalculator => "sa.RasterCalculator",
            GeoTool::RasterToPolygon => "conversion.RasterToPolygon",
            GeoTool::SimplifyPolygon => "cartography.SimplifyPolygon",
            GeoTool::Intersect => "analysis.Intersect",
            GeoTool::GetRasterProperties => "management.GetRasterProperties",
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            GeoTool::EuclideanDistance => "Euclidean distance",
            GeoTool::Union => "Union",
            GeoTool::Erase => "Erase",
            GeoTool::Reclassify => "Reclassify",
            GeoTool::RasterCalculator => "Raster calculator",
            GeoTool::RasterToPolygon => "Raster to polygon",
            GeoTool::SimplifyPolygon => "Simplify polygon",
            GeoTool::Intersect => "Intersect",
            GeoTool::GetRasterProperties => "Get raster properties",
        }
    }
}

impl fmt::Display for GeoTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.identifier())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    pub value: Value,
}

/// Positional tool arguments. Order matters to the engine, names are kept
/// for logging and for tests that inspect recorded calls.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolParameters(Vec<ToolParameter>);

impl ToolParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.0.push(ToolParameter {
            name: name.to_string(),
            value: value.into(),
        });
        self
    }

    pub fn with_path(self, name: &str, path: &Path) -> Self {
        self.with(name, path_value(path))
    }

    pub fn with_paths(self, name: &str, paths: &[PathBuf]) -> Self {
        let values: Vec<Value> = paths.iter().map(|path| path_value(path)).collect();
        self.with(name, Value::Array(values))
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0
            .iter()
            .find(|parameter| parameter.name == name)
            .map(|parameter| &parameter.value)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToolParameter> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn path_value(path: &Path) -> Value {
    Value::String(path.display().to_string())
}

/// Axis-aligned envelope in the dataset's coordinate system.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
}

impl Envelope {
    pub fn is_valid(&self) -> bool {
        [self.x_min, self.y_min, self.x_max, self.y_max]
            .iter()
            .all(|value| value.is_finite())
            && self.x_max > self.x_min
            && self.y_max > self.y_min
    }
}

/// Processing extent handed to the engine environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Extent {
    Envelope(Envelope),
    /// Use the extent of an existing dataset.
    Dataset(PathBuf),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extent: Option<Extent>,
    #[serde(default)]
    pub overwrite_output: bool,
}

impl EnvironmentOptions {
    pub fn overwriting() -> Self {
        Self {
            extent: None,
            overwrite_output: true,
        }
    }

    pub fn with_extent(mut self, extent: Option<Extent>) -> Self {
        self.extent = extent;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageSeverity {
    Informative,
    Warning,
    Error,
}

impl MessageSeverity {
    pub const fn as_str(self) -> &'static str {
        match self {
            MessageSeverity::Informative => "Informative",
            MessageSeverity::Warning => "Warning",
            MessageSeverity::Error => "Error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolMessage {
    pub code: i32,
    pub severity: MessageSeverity,
    pub text: String,
}

impl ToolMessage {
    pub fn error(code: i32, text: impl Into<String>) -> Self {
        Self {
            code,
            severity: MessageSeverity::Error,
            text: text.into(),
        }
    }
}

impl fmt::Display for ToolMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Code: {}, Type: {}, Message: {}",
            self.code,
            self.severity.as_str(),
            self.text
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub is_failed: bool,
    #[serde(default)]
    pub messages: Vec<ToolMessage>,
    /// Return values, e.g. the statistic queried by `GetRasterProperties`.
    #[serde(default)]
    pub values: Vec<String>,
}

impl ToolResult {
    pub fn succeeded() -> Self {
        Self::default()
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.values.push(value.into());
        self
    }

    pub fn failed(messages: Vec<ToolMessage>) -> Self {
        Self {
            is_failed: true,
            messages,
            values: Vec::new(),
        }
    }

    pub fn first_value(&self) -> Option<&str> {
        self.values.first().map(String::as_str)
    }
}

/// Transport-level failure talking to the engine, as opposed to a tool that
/// ran and reported failure.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("no geoprocessing engine command is configured (set APP_ENGINE_COMMAND)")]
    NotConfigured,
    #[error("failed to start geoprocessing engine '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("i/o error talking to geoprocessing engine: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not encode tool invocation: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("geoprocessing engine exited with status {status:?}: {stderr}")]
    Exit { status: Option<i32>, stderr: String },
    #[error("geoprocessing engine returned malformed output: {source}")]
    Protocol {
        #[source]
        source: serde_json::Error,
        output: String,
    },
}

/// Runs geoprocessing tools on behalf of the pipeline.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(
        &self,
        tool: GeoTool,
        parameters: ToolParameters,
        environment: EnvironmentOptions,
    ) -> Result<ToolResult, ExecutorError>;
}

/// A tool call that did not produce its output.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{} ({}) failed: {detail}", .tool.label(), .tool.identifier())]
pub struct ToolFailure {
    pub tool: GeoTool,
    pub detail: String,
}

impl ToolFailure {
    /// Aggregates every diagnostic the engine returned into one message.
    pub fn from_messages(tool: GeoTool, messages: &[ToolMessage]) -> Self {
        let detail = if messages.is_empty() {
            "the tool reported failure without diagnostics".to_string()
        } else {
            messages
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ")
        };
        Self { tool, detail }
    }
}

/// Executes a tool and turns both transport errors and failed results into
/// a [`ToolFailure`].
pub async fn run_tool(
    executor: &dyn ToolExecutor,
    tool: GeoTool,
    parameters: ToolParameters,
    environment: EnvironmentOptions,
) -> Result<ToolResult, ToolFailure> {
    debug!(tool = tool.identifier(), parameters = parameters.len(), "running geoprocessing tool");

    let result = executor
        .execute(tool, parameters, environment)
        .await
        .map_err(|err| ToolFailure {
            tool,
            detail: err.to_string(),
        })?;

    if result.is_failed {
        return Err(ToolFailure::from_messages(tool, &result.messages));
    }

    debug!(tool = tool.identifier(), "geoprocessing tool finished");
    Ok(result)
}
