pub mod photo;
pub mod person;

use serde::{Serialize, Deserialize};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Paged<T> {
    pub total: i64,
    pub items: Vec<T>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct QueueStatus {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub total: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub total_photos: i64,
    pub processed_photos: i64,
    pub total_persons: i64,
    pub total_faces: i64,
    pub queue: QueueStatus,
}
