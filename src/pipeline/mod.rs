pub mod extractor;
pub mod matcher;
pub mod scheduler;
pub mod ingest;
#[cfg(feature = "facial-recognition")]
pub mod onnx;
