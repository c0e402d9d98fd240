pub mod config;
pub mod display;
pub mod enroll;
pub mod error;
pub mod gallery;
pub mod geo;
pub mod matcher;
pub mod overlay;
pub mod pipeline;
pub mod session;
pub mod storage;

pub use error::{Error, Result};
pub use gallery::{Gallery, PersonRecord};
pub use matcher::{find_best_match, MatchResult};

// Re-export vision types for convenience
pub use facerec_vision::{augment, face, Detection, Detector, Embedder, Embedding, FaceBox};
