pub mod augment;
pub mod camera;
pub mod face;
pub mod model;
pub mod source;
pub mod yunet;

// Re-export commonly used types
pub use face::{Detection, Detector, Embedder, Embedding, FaceBox};
pub use source::{AcquisitionError, FrameRead, FrameSource, Source, SourceKind};
