use std::path::PathBuf;

use facerec_vision::AcquisitionError;
use thiserror::Error;

/// Stage of per-face processing that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaceStage {
    Crop,
    Embed,
    Match,
}

impl std::fmt::Display for FaceStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            FaceStage::Crop => "crop",
            FaceStage::Embed => "embed",
            FaceStage::Match => "match",
        })
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("gallery directory not found at {} - run `facerec enroll` first", .0.display())]
    GalleryNotFound(PathBuf),
    #[error("no usable person records under {}", .0.display())]
    EmptyGallery(PathBuf),
    #[error("failed to initialize {component}: {source:#}")]
    ModelInit {
        component: &'static str,
        #[source]
        source: anyhow::Error,
    },
    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),
    #[error("face {index}: {stage} failed: {source:#}")]
    PerFace {
        index: usize,
        stage: FaceStage,
        #[source]
        source: anyhow::Error,
    },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{}: {source}", .path.display())]
    Codec {
        path: PathBuf,
        #[source]
        source: postcard::Error,
    },
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
