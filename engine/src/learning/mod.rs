//! Learning tracker
//!
//! Derives lessons from verifier verdicts and gate decisions, and persists
//! them as append-only logs in the memory store:
//!
//! - `entities/successful_patterns.md`: `### Pattern <key>` sections,
//!   appended when a checkpoint is approved and verification passed
//! - `entities/planning_errors.md`: `### Error <key>` sections, appended on
//!   a revise decision or a failed verification
//! - `entities/execution_log.md`: one tab-separated line per state
//!   transition
//!
//! Entries are never edited or deleted; monotonic growth is the audit trail.
//! Appends take a per-file advisory lock (a `create_new` lock file with
//! bounded wait and stale-lock recovery) so concurrent sessions interleave
//! at entry granularity only. Reads do not lock.

pub mod keys;

pub use keys::KeyGen;

use crate::memory::MemoryStore;
use sdk::errors::CoreError;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, warn};

/// Process-wide ring of recent entries kept for session-start injection
const RING_CAP: usize = 200;

/// How long an append waits for the advisory lock
const LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// A lock file older than this is presumed crashed and removed
const STALE_LOCK_AGE: Duration = Duration::from_secs(10);

/// Which log an entry belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LessonKind {
    Pattern,
    Error,
}

impl LessonKind {
    fn log_file(&self) -> &'static str {
        match self {
            LessonKind::Pattern => "successful_patterns",
            LessonKind::Error => "planning_errors",
        }
    }

    fn heading(&self) -> &'static str {
        match self {
            LessonKind::Pattern => "Pattern",
            LessonKind::Error => "Error",
        }
    }
}

/// One learning-log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningEntry {
    pub key: String,
    pub kind: LessonKind,
    pub domain: String,
    pub goal_digest: String,
    pub iteration: u32,
    pub summary: String,
    pub evidence: Vec<String>,
    pub timestamp: String,
}

/// Guard for the per-file advisory lock; removes the lock file on drop
struct LockGuard {
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("failed to release lock {}: {}", self.path.display(), e);
        }
    }
}

/// Append-only learning store
pub struct LearningTracker {
    store: MemoryStore,
    keys: KeyGen,
    ring: Mutex<VecDeque<LearningEntry>>,
    append_limit: usize,
}

impl LearningTracker {
    pub fn new(store: MemoryStore, append_limit: usize) -> Self {
        Self {
            store,
            keys: KeyGen::new(),
            ring: Mutex::new(VecDeque::with_capacity(RING_CAP)),
            append_limit,
        }
    }

    /// Hex-encoded, truncated digest identifying a goal across sessions
    pub fn goal_digest(goal: &str) -> String {
        use sha2::{Digest, Sha256};
        let digest = Sha256::digest(goal.as_bytes());
        hex::encode(&digest[..8])
    }

    /// Load existing log entries into the recall ring. Called once at
    /// process start; returns how many entries were loaded.
    pub fn warm_from_disk(&self) -> usize {
        let mut loaded = 0;
        for kind in [LessonKind::Pattern, LessonKind::Error] {
            let path = self.store.log_path(kind.log_file());
            let Ok(contents) = std::fs::read_to_string(&path) else {
                continue;
            };
            for entry in parse_entries(&contents, kind) {
                self.push_ring(entry);
                loaded += 1;
            }
        }
        // Ring order is recency; disk order is append order, so re-sort by key
        let mut ring = self.lock_ring();
        let mut entries: Vec<LearningEntry> = ring.drain(..).collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        for entry in entries.into_iter().rev().take(RING_CAP).rev() {
            ring.push_back(entry);
        }
        loaded
    }

    /// Append a success pattern. Exactly one per successful iteration.
    pub fn record_success(
        &self,
        domain: &str,
        goal: &str,
        iteration: u32,
        summary: &str,
        evidence: &[String],
    ) -> Result<String, CoreError> {
        self.record(LessonKind::Pattern, domain, goal, iteration, summary, evidence)
    }

    /// Append a planning error (verifier reject or user revise)
    pub fn record_error(
        &self,
        domain: &str,
        goal: &str,
        iteration: u32,
        summary: &str,
        evidence: &[String],
    ) -> Result<String, CoreError> {
        self.record(LessonKind::Error, domain, goal, iteration, summary, evidence)
    }

    fn record(
        &self,
        kind: LessonKind,
        domain: &str,
        goal: &str,
        iteration: u32,
        summary: &str,
        evidence: &[String],
    ) -> Result<String, CoreError> {
        let path = self.store.log_path(kind.log_file());

        // The key is minted while holding the file lock so append order and
        // key order can never disagree
        let guard = acquire_lock(&path)?;
        let key = self.keys.next_key();
        let entry = LearningEntry {
            key: key.clone(),
            kind,
            domain: domain.to_string(),
            goal_digest: Self::goal_digest(goal),
            iteration,
            summary: summary.to_string(),
            evidence: evidence.to_vec(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        let text = self.render_bounded(&entry);
        append_bytes(&path, &text)?;
        drop(guard);
        debug!("appended {} entry {}", kind.log_file(), key);

        self.push_ring(entry);
        Ok(key)
    }

    /// Append one state-transition line to the execution log:
    /// `<key>\t<session_id>\t<state>\t<reason?>`
    pub fn log_transition(
        &self,
        session_id: &str,
        state: &str,
        reason: Option<&str>,
    ) -> Result<String, CoreError> {
        let path = self.store.log_path("execution_log");
        let _guard = acquire_lock(&path)?;
        let key = self.keys.next_key();
        let line = match reason {
            Some(reason) => format!("{}\t{}\t{}\t{}\n", key, session_id, state, reason),
            None => format!("{}\t{}\t{}\n", key, session_id, state),
        };
        append_bytes(&path, &line)?;
        Ok(key)
    }

    /// Most recent entries for the domain, newest first, at most `n`.
    /// Injected into the Proposer's context at session start.
    pub fn recall(&self, domain: &str, n: usize) -> Vec<LearningEntry> {
        let ring = self.lock_ring();
        ring.iter()
            .rev()
            .filter(|entry| entry.domain == domain)
            .take(n)
            .cloned()
            .collect()
    }

    /// Most recent entries across all domains, newest first
    pub fn recent(&self, n: usize) -> Vec<LearningEntry> {
        let ring = self.lock_ring();
        ring.iter().rev().take(n).cloned().collect()
    }

    fn push_ring(&self, entry: LearningEntry) {
        let mut ring = self.lock_ring();
        if ring.len() >= RING_CAP {
            ring.pop_front();
        }
        ring.push_back(entry);
    }

    fn lock_ring(&self) -> std::sync::MutexGuard<'_, VecDeque<LearningEntry>> {
        self.ring
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Render an entry, truncating the summary so the append never exceeds
    /// the configured byte cap
    fn render_bounded(&self, entry: &LearningEntry) -> String {
        let render = |summary: &str| {
            format!(
                "### {} {}\n- time: {}\n- domain: {}\n- goal: {}\n- iteration: {}\n- summary: {}\n- evidence: {}\n\n",
                entry.kind.heading(),
                entry.key,
                entry.timestamp,
                entry.domain,
                entry.goal_digest,
                entry.iteration,
                summary,
                entry.evidence.join("; "),
            )
        };

        let full = render(&entry.summary);
        if full.len() <= self.append_limit {
            return full;
        }

        // Reserve room for the ellipsis (3 bytes) when cutting the summary
        let overshoot = full.len() - self.append_limit;
        let keep = entry.summary.len().saturating_sub(overshoot + '…'.len_utf8());
        let mut cut = keep;
        while cut > 0 && !entry.summary.is_char_boundary(cut) {
            cut -= 1;
        }
        render(&format!("{}…", &entry.summary[..cut]))
    }
}

/// Acquire the advisory lock for a log file
fn acquire_lock(log_path: &Path) -> Result<LockGuard, CoreError> {
    let lock_path = log_path.with_extension("lock");
    let start = Instant::now();

    loop {
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
        {
            Ok(_) => return Ok(LockGuard { path: lock_path }),
            Err(_) => {
                // Remove a lock left behind by a crashed writer
                if let Ok(meta) = std::fs::metadata(&lock_path) {
                    if let Ok(modified) = meta.modified() {
                        if let Ok(age) = SystemTime::now().duration_since(modified) {
                            if age > STALE_LOCK_AGE {
                                let _ = std::fs::remove_file(&lock_path);
                                continue;
                            }
                        }
                    }
                }
                if start.elapsed() > LOCK_TIMEOUT {
                    return Err(CoreError::LogLocked(lock_path.display().to_string()));
                }
                std::thread::sleep(Duration::from_millis(20));
            }
        }
    }
}

/// Append text to a log. The caller holds the advisory lock; the file is
/// opened in append mode so no existing byte is ever rewritten.
fn append_bytes(path: &Path, text: &str) -> Result<(), CoreError> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(text.as_bytes())?;
    file.flush()?;
    Ok(())
}

/// Parse `### Pattern <key>` / `### Error <key>` sections back into entries
fn parse_entries(contents: &str, kind: LessonKind) -> Vec<LearningEntry> {
    let marker = format!("### {} ", kind.heading());
    let mut entries = Vec::new();

    for section in contents.split(&marker).skip(1) {
        let mut lines = section.lines();
        let Some(key) = lines.next().map(|l| l.trim().to_string()) else {
            continue;
        };

        let mut entry = LearningEntry {
            key,
            kind,
            domain: String::new(),
            goal_digest: String::new(),
            iteration: 0,
            summary: String::new(),
            evidence: Vec::new(),
            timestamp: String::new(),
        };

        for line in lines {
            let Some(rest) = line.strip_prefix("- ") else {
                continue;
            };
            let Some((field, value)) = rest.split_once(": ") else {
                continue;
            };
            match field {
                "time" => entry.timestamp = value.to_string(),
                "domain" => entry.domain = value.to_string(),
                "goal" => entry.goal_digest = value.to_string(),
                "iteration" => entry.iteration = value.parse().unwrap_or(0),
                "summary" => entry.summary = value.to_string(),
                "evidence" => {
                    entry.evidence = value
                        .split("; ")
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                        .collect()
                }
                _ => {}
            }
        }
        entries.push(entry);
    }
    entries
}
