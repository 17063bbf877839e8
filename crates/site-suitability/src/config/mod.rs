use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;

/// Number of suitability classes produced by equal-interval reclassification.
pub const DEFAULT_NUM_CLASSES: u32 = 10;
/// Upper bound on the class count, wherever it comes from.
pub const MAX_NUM_CLASSES: u32 = 1000;
/// Cell size, in metres, for distance rasters.
pub const DEFAULT_CELL_SIZE: f64 = 50.0;
/// Distance ceiling used when a vector criterion carries no distance.
pub const DEFAULT_MAX_DISTANCE: f64 = 1000.0;
pub const DEFAULT_WEIGHT_TOLERANCE: f64 = 0.001;
pub const DEFAULT_CRITERIA_CONCURRENCY: usize = 4;

const SCRATCH_FOLDER_NAME: &str = "site_suitability";

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub analysis: AnalysisConfig,
    pub scratch: ScratchConfig,
    pub engine: EngineConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let log_format = match env::var("APP_LOG_FORMAT") {
            Ok(raw) => LogFormat::parse(&raw).ok_or(ConfigError::InvalidValue {
                variable: "APP_LOG_FORMAT",
                value: raw,
            })?,
            Err(_) => LogFormat::Compact,
        };

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig {
                log_level,
                format: log_format,
            },
            analysis: AnalysisConfig::from_env()?,
            scratch: ScratchConfig::from_env()?,
            engine: EngineConfig::from_env(),
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Pretty,
}

impl LogFormat {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "compact" => Some(Self::Compact),
            "pretty" => Some(Self::Pretty),
            _ => None,
        }
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub format: LogFormat,
}

/// Knobs of the suitability pipeline itself.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisConfig {
    pub num_classes: u32,
    pub cell_size: f64,
    pub default_max_distance: f64,
    pub weight_tolerance: f64,
    /// Upper bound on criteria processed at the same time.
    pub criteria_concurrency: usize,
    /// Simplification is skipped while unset.
    pub simplify_tolerance: Option<f64>,
    /// Scoring direction for raster criteria, shared by previews and runs.
    pub invert_raster_classes: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            num_classes: DEFAULT_NUM_CLASSES,
            cell_size: DEFAULT_CELL_SIZE,
            default_max_distance: DEFAULT_MAX_DISTANCE,
            weight_tolerance: DEFAULT_WEIGHT_TOLERANCE,
            criteria_concurrency: DEFAULT_CRITERIA_CONCURRENCY,
            simplify_tolerance: None,
            invert_raster_classes: true,
        }
    }
}

impl AnalysisConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let num_classes = env_or("APP_NUM_CLASSES", defaults.num_classes)?;
        if num_classes == 0 || num_classes > MAX_NUM_CLASSES {
            return Err(ConfigError::InvalidValue {
                variable: "APP_NUM_CLASSES",
                value: num_classes.to_string(),
            });
        }

        let cell_size = positive("APP_CELL_SIZE", env_or("APP_CELL_SIZE", defaults.cell_size)?)?;
        let default_max_distance = positive(
            "APP_DEFAULT_MAX_DISTANCE",
            env_or("APP_DEFAULT_MAX_DISTANCE", defaults.default_max_distance)?,
        )?;
        let weight_tolerance = positive(
            "APP_WEIGHT_TOLERANCE",
            env_or("APP_WEIGHT_TOLERANCE", defaults.weight_tolerance)?,
        )?;

        let criteria_concurrency =
            env_or("APP_CRITERIA_CONCURRENCY", defaults.criteria_concurrency)?;
        if criteria_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                variable: "APP_CRITERIA_CONCURRENCY",
                value: "0".to_string(),
            });
        }

        let simplify_tolerance = match non_blank("APP_SIMPLIFY_TOLERANCE") {
            Some(raw) => Some(positive(
                "APP_SIMPLIFY_TOLERANCE",
                raw.trim()
                    .parse::<f64>()
                    .map_err(|_| ConfigError::InvalidValue {
                        variable: "APP_SIMPLIFY_TOLERANCE",
                        value: raw.clone(),
                    })?,
            )?),
            None => None,
        };

        let invert_raster_classes =
            flag_or("APP_INVERT_RASTER_CLASSES", defaults.invert_raster_classes)?;

        Ok(Self {
            num_classes,
            cell_size,
            default_max_distance,
            weight_tolerance,
            criteria_concurrency,
            simplify_tolerance,
            invert_raster_classes,
        })
    }
}

/// Where intermediate datasets are written and whether they survive a run.
#[derive(Debug, Clone, PartialEq)]
pub struct ScratchConfig {
    pub directory: PathBuf,
    pub keep_artifacts: bool,
}

impl Default for ScratchConfig {
    fn default() -> Self {
        Self {
            directory: env::temp_dir().join(SCRATCH_FOLDER_NAME),
            keep_artifacts: false,
        }
    }
}

impl ScratchConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            directory: non_blank("APP_SCRATCH_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.directory),
            keep_artifacts: flag_or("APP_KEEP_SCRATCH", defaults.keep_artifacts)?,
        })
    }
}

/// Command line of the external geoprocessing engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineConfig {
    pub command: Option<String>,
    pub args: Vec<String>,
}

impl EngineConfig {
    fn from_env() -> Self {
        Self {
            command: non_blank("APP_ENGINE_COMMAND").map(|raw| raw.trim().to_string()),
            args: env::var("APP_ENGINE_ARGS")
                .map(|raw| raw.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
        }
    }
}

fn non_blank(variable: &str) -> Option<String> {
    env::var(variable)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn env_or<T: FromStr>(variable: &'static str, default: T) -> Result<T, ConfigError> {
    match non_blank(variable) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue {
                variable,
                value: raw,
            }),
        None => Ok(default),
    }
}

fn flag_or(variable: &'static str, default: bool) -> Result<bool, ConfigError> {
    match non_blank(variable) {
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue {
                variable,
                value: raw,
            }),
        },
        None => Ok(default),
    }
}

fn positive(variable: &'static str, value: f64) -> Result<f64, ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(ConfigError::InvalidValue {
            variable,
            value: value.to_string(),
        })
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidValue {
        variable: &'static str,
        value: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidValue { variable, value } => {
                write!(f, "{variable} has an invalid value '{value}'")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidPort | ConfigError::InvalidValue { .. } => None,
            ConfigError::InvalidHost { source } => Some(source),
        }
    }
}

/// Serializes tests that mutate process environment variables.
#[cfg(test)]
pub(crate) fn env_guard() -> &'static std::sync::Mutex<()> {
    static GUARD: std::sync::OnceLock<std::sync::Mutex<()>> = std::sync::OnceLock::new();
    GUARD.get_or_init(|| std::sync::Mutex::new(()))
}
