pub mod utils;
pub mod error;
pub mod stats;
pub mod models;
pub mod db;
pub mod pipeline;
pub mod api;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::Arc;

use crate::pipeline::extractor::EmbeddingExtractor;
use crate::pipeline::matcher::Matcher;
use crate::utils::config::Config;

#[derive(Clone)]
pub struct AppPaths {
    pub data: PathBuf,
    pub db_path: PathBuf,
    pub uploads: PathBuf,
    pub derived: PathBuf,
}

impl AppPaths {
    pub fn under(data: PathBuf) -> Self {
        let db_path = data.join("db").join("omoide.db");
        let uploads = data.join("uploads");
        let derived = data.join("derived");
        Self { data, db_path, uploads, derived }
    }
}

pub struct AppState {
    pub cfg: Config,
    pub paths: AppPaths,
    pub pool: db::Pool,
    pub stats: Arc<stats::Stats>,
    pub extractor: Arc<dyn EmbeddingExtractor>,
    pub matcher: Arc<Matcher>,
    pub drain_running: Arc<AtomicBool>,
    pub stop_flag: Arc<AtomicBool>,
    pub upload_seq: AtomicU64,
}

impl AppState {
    pub fn new(
        cfg: Config,
        paths: AppPaths,
        pool: db::Pool,
        extractor: Arc<dyn EmbeddingExtractor>,
    ) -> Self {
        let matcher = Arc::new(Matcher::new(cfg.match_threshold));
        Self {
            cfg,
            paths,
            pool,
            stats: Arc::new(stats::Stats::new()),
            extractor,
            matcher,
            drain_running: Arc::new(AtomicBool::new(false)),
            stop_flag: Arc::new(AtomicBool::new(false)),
            upload_seq: AtomicU64::new(0),
        }
    }
}
