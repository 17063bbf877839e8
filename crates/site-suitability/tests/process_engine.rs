//! Runs the pipeline against a scripted engine process to cover the
//! stdin/stdout contract of `ProcessToolExecutor`.
#![cfg(unix)]

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use site_suitability::config::{AnalysisConfig, EngineConfig, ScratchConfig};
use site_suitability::geoprocessing::{ExecutorError, ProcessToolExecutor};
use site_suitability::workflows::suitability::{
    AnalysisRequest, ConstraintSpec, ErrorKind, PoiCriterion, SuitabilityAnalysis,
};

struct Sandbox {
    root: PathBuf,
}

impl Sandbox {
    fn new(label: &str) -> Self {
        let root = std::env::temp_dir().join(format!(
            "site-suitability-engine-{label}-{}",
            std::process::id()
        ));
        fs::create_dir_all(&root).expect("create sandbox");
        Self { root }
    }

    fn shapefile(&self, stem: &str) -> PathBuf {
        for extension in ["shx", "dbf"] {
            fs::write(self.root.join(format!("{stem}.{extension}")), b"").expect("sidecar");
        }
        let path = self.root.join(format!("{stem}.shp"));
        fs::write(&path, b"").expect("shapefile");
        path
    }

    /// Script that logs the requested tool and answers with `response`.
    fn engine_script(&self, response: &str) -> PathBuf {
        let log = self.root.join("calls.log");
        let script = self.root.join("engine.sh");
        fs::write(
            &script,
            format!(
                "cat > /dev/null\necho \"$1\" >> '{}'\necho '{}'\n",
                log.display(),
                response
            ),
        )
        .expect("write script");
        script
    }

    fn logged_tools(&self) -> Vec<String> {
        fs::read_to_string(self.root.join("calls.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn analysis(&self, script: PathBuf) -> SuitabilityAnalysis {
        let executor = ProcessToolExecutor::new("sh", vec![script.display().to_string()]);
        SuitabilityAnalysis::new(
            Arc::new(executor),
            AnalysisConfig::default(),
            ScratchConfig {
                directory: self.root.join("scratch"),
                keep_artifacts: false,
            },
        )
    }

    fn request(&self) -> AnalysisRequest {
        AnalysisRequest {
            study_area: self.shapefile("study_area"),
            constraints: vec![ConstraintSpec::new(self.shapefile("water"))],
            criteria: vec![PoiCriterion::new(self.shapefile("schools"))
                .with_distance(1000)
                .with_weight(1.0)],
            output: self.root.join("result.shp"),
            ..AnalysisRequest::default()
        }
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        fs::remove_dir_all(&self.root).ok();
    }
}

#[tokio::test]
async fn scripted_engine_completes_a_run() {
    let sandbox = Sandbox::new("ok");
    let script = sandbox.engine_script(r#"{"is_failed": false}"#);

    let outcome = sandbox
        .analysis(script)
        .run(sandbox.request())
        .await
        .expect("analysis succeeds");

    let tools = sandbox.logged_tools();
    assert_eq!(tools.len(), 7);
    assert!(tools.contains(&"analysis.Erase".to_string()));
    assert!(tools.contains(&"sa.EucDistance".to_string()));
    assert_eq!(tools.last().map(String::as_str), Some("analysis.Intersect"));
    assert_eq!(outcome.result_path, sandbox.root.join("result.shp"));
}

#[tokio::test]
async fn engine_diagnostics_surface_in_the_failure() {
    let sandbox = Sandbox::new("failed");
    let script = sandbox.engine_script(
        r#"{"is_failed": true, "messages": [{"code": 10, "severity": "error", "text": "license unavailable"}]}"#,
    );

    let failure = sandbox
        .analysis(script)
        .run(sandbox.request())
        .await
        .expect_err("engine reports failure");

    assert_eq!(failure.error.kind(), ErrorKind::ExternalToolFailure);
    assert!(failure
        .to_string()
        .contains("Code: 10, Type: Error, Message: license unavailable"));
}

#[test]
fn unconfigured_engine_is_rejected() {
    let err = ProcessToolExecutor::from_config(&EngineConfig::default())
        .expect_err("no command configured");
    assert!(matches!(err, ExecutorError::NotConfigured));
}
