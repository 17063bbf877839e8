use std::io;
use std::path::PathBuf;

use serde::Serialize;

use super::domain::AnalysisPhase;
use super::reclass::ReclassError;
use super::validation::ValidationError;
use crate::geoprocessing::ToolFailure;
use crate::scratch::ScratchError;

/// Root categories of an analysis failure, independent of where it was
/// wrapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    UnrecognizedDataType,
    ExternalToolFailure,
    MissingAssociatedFile,
    Io,
}

#[derive(Debug, thiserror::Error)]
pub enum SuitabilityError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("unrecognized data type for {}", .path.display())]
    UnrecognizedDataType { path: PathBuf },
    #[error("{} is a .{extension} dataset, which the distance tool cannot read", .path.display())]
    UnsupportedVectorFormat { path: PathBuf, extension: String },
    #[error("missing associated file {}", .path.display())]
    MissingAssociatedFile { path: PathBuf },
    #[error(transparent)]
    ExternalTool(#[from] ToolFailure),
    #[error(transparent)]
    Reclassification(#[from] ReclassError),
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Scratch(#[from] ScratchError),
    #[error("criterion '{name}' failed: {source}")]
    Criterion {
        name: String,
        #[source]
        source: Box<SuitabilityError>,
    },
    #[error("{} failed: {source}", .stage.label())]
    Stage {
        stage: AnalysisPhase,
        #[source]
        source: Box<SuitabilityError>,
    },
}

impl SuitabilityError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn for_criterion(self, name: &str) -> Self {
        Self::Criterion {
            name: name.to_string(),
            source: Box::new(self),
        }
    }

    /// Tags the error with the phase it escaped from; the innermost tag wins.
    pub fn in_stage(self, stage: AnalysisPhase) -> Self {
        match self {
            already @ Self::Stage { .. } => already,
            other => Self::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    pub fn stage(&self) -> Option<AnalysisPhase> {
        match self {
            Self::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// The unwrapped error beneath any `Stage`/`Criterion` wrappers.
    pub fn root(&self) -> &SuitabilityError {
        match self {
            Self::Stage { source, .. } | Self::Criterion { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Stage { source, .. } | Self::Criterion { source, .. } => source.kind(),
            Self::Validation(_) | Self::Reclassification(_) => ErrorKind::Validation,
            Self::UnrecognizedDataType { .. } | Self::UnsupportedVectorFormat { .. } => {
                ErrorKind::UnrecognizedDataType
            }
            Self::MissingAssociatedFile { .. } => ErrorKind::MissingAssociatedFile,
            Self::ExternalTool(_) => ErrorKind::ExternalToolFailure,
            Self::Io { .. } | Self::Scratch(_) => ErrorKind::Io,
        }
    }
}
