use std::net::SocketAddr;
use std::sync::Arc;

use omoide_backend::db;
use omoide_backend::utils::config::Config;
use omoide_backend::utils::logging;
use omoide_backend::{AppPaths, AppState};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();
    let cfg = Config::from_env();
    let paths = AppPaths::under(cfg.data.clone());
    std::fs::create_dir_all(paths.db_path.parent().unwrap_or(&paths.data))?;
    std::fs::create_dir_all(&paths.uploads)?;
    std::fs::create_dir_all(&paths.derived)?;

    // 10 connections is plenty for SQLite in WAL mode.
    let pool = db::create_pool(&paths.db_path, 10)?;

    // Photos left in `processing` by a previous run can never finish;
    // put them back in the queue before accepting traffic.
    {
        let conn = pool.get()?;
        let reset = db::writer::reset_stale_processing(&conn)?;
        if reset > 0 {
            info!(reset, "requeued photos stuck in processing");
        }
    }

    #[cfg(feature = "facial-recognition")]
    let extractor: Arc<dyn omoide_backend::pipeline::extractor::EmbeddingExtractor> = {
        let models_dir = paths.data.join("models");
        let mut onnx = omoide_backend::pipeline::onnx::OnnxExtractor::new(models_dir);
        onnx.initialize().await?;
        Arc::new(onnx)
    };
    #[cfg(not(feature = "facial-recognition"))]
    let extractor: Arc<dyn omoide_backend::pipeline::extractor::EmbeddingExtractor> =
        Arc::new(omoide_backend::pipeline::extractor::UnavailableExtractor);

    let port = cfg.port;
    let state = Arc::new(AppState::new(cfg, paths, pool, extractor));

    let app = omoide_backend::api::routes::router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}
