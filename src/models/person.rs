use serde::{Serialize, Deserialize};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Person {
    pub id: i64,
    pub name: String,
    pub face_count: i64,
    pub thumbnail_key: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}
