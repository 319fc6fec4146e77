use std::env;
use std::path::PathBuf;

#[derive(Clone, Debug)]
pub struct Config {
    pub data: PathBuf,
    pub port: u16,
    pub workers: usize,
    pub max_upload_batch: usize,
    pub match_threshold: f32,
    pub extract_timeout_secs: u64,
    pub thumb_size: u32,
}

impl Config {
    pub fn from_env() -> Self {
        let data = env::var("OMOIDE_DATA").unwrap_or_else(|_| "/omoide-data".to_string());
        let port = env::var("OMOIDE_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(9172);
        let workers = env::var("OMOIDE_WORKERS").ok().and_then(|v| v.parse().ok()).unwrap_or(4);
        let max_upload_batch = env::var("OMOIDE_MAX_UPLOAD_BATCH").ok().and_then(|v| v.parse().ok()).unwrap_or(500);
        let match_threshold = env::var("OMOIDE_MATCH_THRESHOLD").ok().and_then(|v| v.parse().ok()).unwrap_or(0.55);
        let extract_timeout_secs = env::var("OMOIDE_EXTRACT_TIMEOUT_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(120);
        let thumb_size = env::var("OMOIDE_THUMB_SIZE").ok().and_then(|v| v.parse().ok()).unwrap_or(200);
        Self {
            data: PathBuf::from(data),
            port,
            workers,
            max_upload_batch,
            match_threshold,
            extract_timeout_secs,
            thumb_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // These tests mutate process env; the lock keeps them from racing
    // each other under the parallel test runner.
    static ENV_LOCK: parking_lot::Mutex<()> = parking_lot::Mutex::new(());

    fn clear_vars(vars: &[&str]) -> Vec<(String, Option<String>)> {
        let mut saved = Vec::new();
        for &k in vars {
            let prev = env::var(k).ok();
            saved.push((k.to_string(), prev));
            env::remove_var(k);
        }
        saved
    }

    fn restore_vars(saved: Vec<(String, Option<String>)>) {
        for (k, v) in saved {
            if let Some(val) = v {
                env::set_var(k, val);
            } else {
                env::remove_var(k);
            }
        }
    }

    const ALL_VARS: &[&str] = &[
        "OMOIDE_DATA",
        "OMOIDE_PORT",
        "OMOIDE_WORKERS",
        "OMOIDE_MAX_UPLOAD_BATCH",
        "OMOIDE_MATCH_THRESHOLD",
        "OMOIDE_EXTRACT_TIMEOUT_SECS",
        "OMOIDE_THUMB_SIZE",
    ];

    #[test]
    fn test_config_defaults() {
        let _guard = ENV_LOCK.lock();
        let saved = clear_vars(ALL_VARS);

        let config = Config::from_env();
        assert_eq!(config.data, PathBuf::from("/omoide-data"));
        assert_eq!(config.port, 9172);
        assert_eq!(config.workers, 4);
        assert_eq!(config.max_upload_batch, 500);
        assert!((config.match_threshold - 0.55).abs() < f32::EPSILON);
        assert_eq!(config.extract_timeout_secs, 120);
        assert_eq!(config.thumb_size, 200);

        restore_vars(saved);
    }

    #[test]
    fn test_config_from_env() {
        let _guard = ENV_LOCK.lock();
        let saved = clear_vars(ALL_VARS);

        env::set_var("OMOIDE_DATA", "/custom/data");
        env::set_var("OMOIDE_PORT", "8080");
        env::set_var("OMOIDE_WORKERS", "2");
        env::set_var("OMOIDE_MAX_UPLOAD_BATCH", "100");
        env::set_var("OMOIDE_MATCH_THRESHOLD", "0.4");
        env::set_var("OMOIDE_EXTRACT_TIMEOUT_SECS", "30");
        env::set_var("OMOIDE_THUMB_SIZE", "128");

        let config = Config::from_env();
        assert_eq!(config.data, PathBuf::from("/custom/data"));
        assert_eq!(config.port, 8080);
        assert_eq!(config.workers, 2);
        assert_eq!(config.max_upload_batch, 100);
        assert!((config.match_threshold - 0.4).abs() < f32::EPSILON);
        assert_eq!(config.extract_timeout_secs, 30);
        assert_eq!(config.thumb_size, 128);

        restore_vars(saved);
    }
}
