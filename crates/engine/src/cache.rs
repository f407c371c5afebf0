//! TTL-based memo of final answers, keyed by normalized question text.
//!
//! Each entry carries the fingerprint of the plan+results that produced
//! it.  A lookup with a fingerprint constraint only hits when the stored
//! fingerprint matches; a lookup without one trusts the entry as a full
//! bypass of the pipeline.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sha2::{Digest, Sha256};

struct AnswerEntry {
    answer: String,
    fingerprint: Option<String>,
    stored_at: Instant,
}

pub struct AnswerCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, AnswerEntry>>,
}

impl AnswerCache {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, entries: Mutex::new(HashMap::new()) }
    }

    fn key(question: &str) -> String {
        let normalized = question.trim().to_lowercase();
        let mut hasher = Sha256::new();
        hasher.update(normalized.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Look up a cached answer.  Expired entries are evicted on read;
    /// a fingerprint mismatch suppresses the hit without evicting.
    pub fn get(&self, question: &str, fingerprint: Option<&str>) -> Option<String> {
        let key = Self::key(question);
        let mut entries = self.entries.lock();
        let entry = entries.get(&key)?;

        if entry.stored_at.elapsed() >= self.ttl {
            entries.remove(&key);
            return None;
        }

        if let (Some(wanted), Some(stored)) = (fingerprint, entry.fingerprint.as_deref()) {
            if wanted != stored {
                return None;
            }
        }

        Some(entry.answer.clone())
    }

    pub fn set(&self, question: &str, answer: &str, fingerprint: Option<String>) {
        self.entries.lock().insert(
            Self::key(question),
            AnswerEntry { answer: answer.to_string(), fingerprint, stored_at: Instant::now() },
        );
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Drop expired entries, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.stored_at.elapsed() < self.ttl);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
