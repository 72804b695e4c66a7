use chrono::{SecondsFormat, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use serde_json::json;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::services::text::truncate_chars;

pub const DEFAULT_DEDUP_CAPACITY: usize = 256;
const MAX_LOGGED_QUESTION: usize = 2000;
const MAX_LOGGED_SCHEMA: usize = 6000;

/// Bounded set of warning signatures already emitted. Oldest signatures
/// are evicted once the capacity is reached.
pub struct WarningDedup {
    seen: Mutex<LruCache<String, ()>>,
}

impl WarningDedup {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self { seen: Mutex::new(LruCache::new(capacity)) }
    }

    /// True the first time a signature is seen (again, after eviction).
    pub fn first_time(&self, signature: &str) -> bool {
        let mut seen = self.seen.lock();
        if seen.get(signature).is_some() {
            return false;
        }
        seen.put(signature.to_string(), ());
        true
    }

    pub fn warn_once(&self, signature: &str, message: &str) {
        if self.first_time(signature) {
            tracing::warn!("{}", message);
        }
    }

    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for WarningDedup {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_CAPACITY)
    }
}

/// Append-only JSON-lines record of questions the engine could not answer.
pub struct UnhandledLog {
    path: PathBuf,
    dedup: Arc<WarningDedup>,
}

impl UnhandledLog {
    pub fn new(path: impl Into<PathBuf>, dedup: Arc<WarningDedup>) -> Self {
        Self { path: path.into(), dedup }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Never fails; write errors are warned about once per signature.
    pub fn record(&self, question: &str, schema_summary: &str, reason: &str) {
        tracing::warn!("Unhandled question ({}): {}", reason, truncate_chars(question, 200));
        if let Err(e) = self.append(question, schema_summary, reason) {
            let signature = format!("unhandled_log:{}:{}", self.path.display(), e.kind());
            self.dedup
                .warn_once(&signature, &format!("Could not write {}: {}", self.path.display(), e));
        }
    }

    fn append(&self, question: &str, schema_summary: &str, reason: &str) -> std::io::Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let entry = json!({
            "ts": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            "reason": reason,
            "question": truncate_chars(question, MAX_LOGGED_QUESTION),
            "schema_summary": truncate_chars(schema_summary, MAX_LOGGED_SCHEMA),
        });
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{}", entry)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn dedup_reports_each_signature_once_until_evicted() {
        let dedup = WarningDedup::new(2);
        assert!(dedup.first_time("a"));
        assert!(!dedup.first_time("a"));
        assert!(dedup.first_time("b"));
        assert!(dedup.first_time("c"));
        assert_eq!(dedup.len(), 2);
        assert!(dedup.first_time("a"));
    }

    #[test]
    fn records_are_truncated_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/unhandled.jsonl");
        let log = UnhandledLog::new(&path, Arc::new(WarningDedup::default()));

        log.record(&"q".repeat(2500), "schema", "no_plan");
        log.record("segunda", "schema", "duplicates:no_column");

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<Value> = text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["reason"], "no_plan");
        assert_eq!(lines[0]["question"].as_str().unwrap().len(), 2000);
        assert!(lines[0]["ts"].as_str().unwrap().ends_with('Z'));
        assert_eq!(lines[1]["question"], "segunda");
    }

    #[test]
    fn write_failures_are_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, "x").unwrap();
        let dedup = Arc::new(WarningDedup::default());
        let log = UnhandledLog::new(blocker.join("log.jsonl"), dedup.clone());
        log.record("q", "s", "no_plan");
        log.record("q", "s", "no_plan");
        assert_eq!(dedup.len(), 1);
    }
}
