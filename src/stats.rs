use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// In-memory process counters for the /metrics endpoint. Durable aggregates
/// (total photos, persons, faces) come from `db::query::statistics`; these
/// only track what this process has done since it started.
pub struct Stats {
    photos_uploaded: AtomicU64,
    photos_completed: AtomicU64,
    photos_failed: AtomicU64,
    faces_detected: AtomicU64,
    persons_created: AtomicU64,
    started: Instant,
    last_drain_error: parking_lot::Mutex<Option<String>>,
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

impl Stats {
    pub fn new() -> Self {
        Self {
            photos_uploaded: AtomicU64::new(0),
            photos_completed: AtomicU64::new(0),
            photos_failed: AtomicU64::new(0),
            faces_detected: AtomicU64::new(0),
            persons_created: AtomicU64::new(0),
            started: Instant::now(),
            last_drain_error: parking_lot::Mutex::new(None),
        }
    }

    pub fn inc_uploaded(&self, n: u64) { self.photos_uploaded.fetch_add(n, Ordering::Relaxed); }
    pub fn inc_completed(&self, n: u64) { self.photos_completed.fetch_add(n, Ordering::Relaxed); }
    pub fn inc_failed(&self, n: u64) { self.photos_failed.fetch_add(n, Ordering::Relaxed); }
    pub fn inc_faces(&self, n: u64) { self.faces_detected.fetch_add(n, Ordering::Relaxed); }
    pub fn inc_persons(&self, n: u64) { self.persons_created.fetch_add(n, Ordering::Relaxed); }

    pub fn photos_uploaded(&self) -> u64 { self.photos_uploaded.load(Ordering::Relaxed) }
    pub fn photos_completed(&self) -> u64 { self.photos_completed.load(Ordering::Relaxed) }
    pub fn photos_failed(&self) -> u64 { self.photos_failed.load(Ordering::Relaxed) }
    pub fn faces_detected(&self) -> u64 { self.faces_detected.load(Ordering::Relaxed) }
    pub fn persons_created(&self) -> u64 { self.persons_created.load(Ordering::Relaxed) }
    pub fn uptime_secs(&self) -> u64 { self.started.elapsed().as_secs() }

    /// Pipeline-level failure from the most recent drain, kept for
    /// diagnostics; cleared when a drain completes cleanly.
    pub fn set_drain_error(&self, err: Option<String>) {
        *self.last_drain_error.lock() = err;
    }

    pub fn last_drain_error(&self) -> Option<String> {
        self.last_drain_error.lock().clone()
    }

    pub fn metrics_text(&self) -> String {
        let mut s = String::new();
        s.push_str(&format!("omoide_uptime_seconds {}\n", self.uptime_secs()));
        s.push_str(&format!("omoide_photos_uploaded_total {}\n", self.photos_uploaded()));
        s.push_str(&format!("omoide_photos_completed_total {}\n", self.photos_completed()));
        s.push_str(&format!("omoide_photos_failed_total {}\n", self.photos_failed()));
        s.push_str(&format!("omoide_faces_detected_total {}\n", self.faces_detected()));
        s.push_str(&format!("omoide_persons_created_total {}\n", self.persons_created()));
        s
    }
}
