use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Face bounding box in original image coordinates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceBbox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
}

/// One detected face: where it is and its fixed-length embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedFace {
    pub bbox: FaceBbox,
    pub embedding: Vec<f32>,
}

/// Per-photo extraction failure. The scheduler records it on the photo row
/// and keeps going; it never aborts sibling photos.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("not a decodable image: {0}")]
    Decode(String),
    #[error("face models unavailable")]
    ModelUnavailable,
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("extraction timed out after {0}s")]
    Timeout(u64),
}

/// The detect-and-embed capability the pipeline consumes. Implementations
/// may block (CPU/GPU inference); callers run them on a blocking thread.
pub trait EmbeddingExtractor: Send + Sync {
    /// Given raw image bytes, return every detected face with its embedding.
    /// An empty vec means the image decoded fine but contains no faces.
    fn extract(&self, bytes: &[u8]) -> Result<Vec<DetectedFace>, ExtractError>;
}

/// Stand-in when the crate is built without the `facial-recognition`
/// feature: every photo fails with a model-unavailable error.
pub struct UnavailableExtractor;

impl EmbeddingExtractor for UnavailableExtractor {
    fn extract(&self, _bytes: &[u8]) -> Result<Vec<DetectedFace>, ExtractError> {
        Err(ExtractError::ModelUnavailable)
    }
}
