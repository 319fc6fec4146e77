use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use omoide_backend::db;
use omoide_backend::pipeline::extractor::{DetectedFace, EmbeddingExtractor, ExtractError, FaceBbox};
use omoide_backend::pipeline::ingest;
use omoide_backend::utils::config::Config;
use omoide_backend::{AppPaths, AppState};
use tempfile::TempDir;

/// Extractor for tests: the "photo" bytes are a JSON array of embeddings,
/// one per face. Bytes starting with `CORRUPT` fail like an undecodable
/// image would.
pub struct StubExtractor;

impl EmbeddingExtractor for StubExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<Vec<DetectedFace>, ExtractError> {
        let text = std::str::from_utf8(bytes).map_err(|e| ExtractError::Decode(e.to_string()))?;
        if text.starts_with("CORRUPT") {
            return Err(ExtractError::Decode("not a decodable image".into()));
        }
        let embeddings: Vec<Vec<f32>> =
            serde_json::from_str(text).map_err(|e| ExtractError::Decode(e.to_string()))?;
        Ok(embeddings
            .into_iter()
            .map(|embedding| DetectedFace {
                bbox: FaceBbox { x1: 0.0, y1: 0.0, x2: 32.0, y2: 32.0, confidence: 0.99 },
                embedding,
            })
            .collect())
    }
}

/// Stub variant whose extract calls block until the gate opens. Lets a
/// test observe queue state while workers hold their claims.
pub struct GatedExtractor {
    pub gate: Arc<AtomicBool>,
}

impl EmbeddingExtractor for GatedExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<Vec<DetectedFace>, ExtractError> {
        while !self.gate.load(Ordering::SeqCst) {
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        StubExtractor.extract(bytes)
    }
}

/// Encode a fake photo containing the given face embeddings.
pub fn photo_with_faces(embeddings: &[&[f32]]) -> Vec<u8> {
    let v: Vec<Vec<f32>> = embeddings.iter().map(|e| e.to_vec()).collect();
    serde_json::to_vec(&v).unwrap()
}

pub fn test_config(data: PathBuf) -> Config {
    Config {
        data,
        port: 0,
        workers: 2,
        max_upload_batch: 500,
        match_threshold: 0.55,
        extract_timeout_secs: 30,
        thumb_size: 64,
    }
}

/// Fresh state on a temp dir with the stub extractor. Keep the TempDir
/// alive for the duration of the test.
pub fn setup_state() -> (TempDir, Arc<AppState>) {
    setup_state_with(|_| {})
}

pub fn setup_state_with(tweak: impl FnOnce(&mut Config)) -> (TempDir, Arc<AppState>) {
    setup_state_with_extractor(Arc::new(StubExtractor), tweak)
}

pub fn setup_state_with_extractor(
    extractor: Arc<dyn EmbeddingExtractor>,
    tweak: impl FnOnce(&mut Config),
) -> (TempDir, Arc<AppState>) {
    let tmp = TempDir::new().unwrap();
    let data = tmp.path().join("omoide-data");
    let paths = AppPaths::under(data.clone());
    std::fs::create_dir_all(paths.db_path.parent().unwrap()).unwrap();
    std::fs::create_dir_all(&paths.uploads).unwrap();
    std::fs::create_dir_all(&paths.derived).unwrap();
    let pool = db::create_pool(&paths.db_path, 5).unwrap();
    let mut cfg = test_config(data);
    tweak(&mut cfg);
    let state = Arc::new(AppState::new(cfg, paths, pool, extractor));
    (tmp, state)
}

/// Upload a batch straight through the ingest layer.
pub async fn upload_batch(
    state: &Arc<AppState>,
    files: Vec<(&str, Vec<u8>)>,
) -> ingest::UploadOutcome {
    let files = files.into_iter().map(|(n, b)| (n.to_string(), b)).collect();
    ingest::store_batch(state, files).await.unwrap()
}

/// Serve the router on an ephemeral port and return its base URL.
pub async fn spawn_server(state: Arc<AppState>) -> String {
    let app = omoide_backend::api::routes::router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// Poll until `condition` holds or the attempts run out.
pub async fn wait_for<F>(mut condition: F, max_attempts: usize)
where
    F: FnMut() -> bool,
{
    for _ in 0..max_attempts {
        if condition() {
            return;
        }
        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
    }
    panic!("condition never became true");
}
