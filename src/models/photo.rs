use serde::{Serialize, Deserialize};

/// Processing state of a photo. Transitions only move forward along
/// `pending -> processing -> completed | failed`; the one sanctioned
/// back-edge is an explicit retry of a failed photo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhotoState {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl PhotoState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhotoState::Pending => "pending",
            PhotoState::Processing => "processing",
            PhotoState::Completed => "completed",
            PhotoState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PhotoState::Pending),
            "processing" => Some(PhotoState::Processing),
            "completed" => Some(PhotoState::Completed),
            "failed" => Some(PhotoState::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Photo {
    pub id: i64,
    pub file_name: String,
    pub storage_key: String,
    pub size_bytes: i64,
    pub uploaded_at: i64,
    pub state: PhotoState,
    /// Defined only once the photo reached `completed`.
    pub face_count: Option<i64>,
    pub last_error: Option<String>,
    pub updated_at: i64,
}

impl Photo {
    pub fn processed(&self) -> bool {
        self.state == PhotoState::Completed
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FaceRecord {
    pub id: i64,
    pub photo_id: i64,
    pub person_id: Option<i64>,
    pub bbox: serde_json::Value,
    pub distance: f64,
    pub created_at: i64,
}
