mod common;
mod orchestrator;
mod scoring;
