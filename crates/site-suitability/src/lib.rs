pub mod config;
pub mod error;
pub mod geoprocessing;
pub mod scratch;
pub mod telemetry;
pub mod workflows;
