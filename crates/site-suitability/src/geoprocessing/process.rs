use std::io::ErrorKind;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{EnvironmentOptions, ExecutorError, GeoTool, ToolExecutor, ToolParameters, ToolResult};
use crate::config::EngineConfig;

/// Bridges tool calls to an engine process.
///
/// Every call spawns `program args... <tool identifier>`, writes one JSON
/// invocation to its stdin and expects a JSON [`ToolResult`] on stdout.
#[derive(Debug, Clone)]
pub struct ProcessToolExecutor {
    program: String,
    args: Vec<String>,
}

#[derive(Serialize)]
struct Invocation<'a> {
    tool: &'static str,
    parameters: &'a ToolParameters,
    environment: &'a EnvironmentOptions,
}

impl ProcessToolExecutor {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self, ExecutorError> {
        let program = config.command.clone().ok_or(ExecutorError::NotConfigured)?;
        Ok(Self::new(program, config.args.clone()))
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

#[async_trait]
impl ToolExecutor for ProcessToolExecutor {
    async fn execute(
        &self,
        tool: GeoTool,
        parameters: ToolParameters,
        environment: EnvironmentOptions,
    ) -> Result<ToolResult, ExecutorError> {
        let payload = serde_json::to_vec(&Invocation {
            tool: tool.identifier(),
            parameters: &parameters,
            environment: &environment,
        })
        .map_err(ExecutorError::Encode)?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(tool.identifier())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExecutorError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            match stdin.write_all(&payload).await {
                Ok(()) => {}
                // An engine may answer without reading its input.
                Err(err) if err.kind() == ErrorKind::BrokenPipe => {
                    debug!(tool = tool.identifier(), "engine closed stdin early");
                }
                Err(err) => return Err(ExecutorError::Io(err)),
            }
        }

        let output = child.wait_with_output().await?;
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !stderr.is_empty() {
            warn!(tool = tool.identifier(), %stderr, "engine wrote to stderr");
        }

        parse_output(output.status.success(), output.status.code(), &output.stdout, stderr)
    }
}

fn parse_output(
    success: bool,
    status: Option<i32>,
    stdout: &[u8],
    stderr: String,
) -> Result<ToolResult, ExecutorError> {
    let text = String::from_utf8_lossy(stdout);
    let trimmed = text.trim();

    match serde_json::from_str::<ToolResult>(trimmed) {
        Ok(result) => Ok(result),
        Err(_) if !success => Err(ExecutorError::Exit { status, stderr }),
        Err(source) => Err(ExecutorError::Protocol {
            source,
            output: trimmed.to_string(),
        }),
    }
}
