//! Gatekeeper between unvalidated engine output and the [`Store`]:
//! validates, sanitizes, hashes, deduplicates, batches, and routes
//! incoming violations.

use std::sync::{LazyLock, Mutex};

use chrono::Utc;
use compact_str::CompactString;
use lru::LruCache;
use rayon::prelude::*;
use regex::Regex;
use sha2::{Digest, Sha256};
use smallvec::SmallVec;

use crate::{
    domain::{Violation, ViolationInput, ViolationStatus},
    error::AppResult,
    store::Store
};

const DEFAULT_CACHE_CAPACITY: usize = 10_000;

static LINE_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bline \d+\b").expect("static regex"));
static LINE_COLUMN_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d+:\d+\b").expect("static regex"));

/// A rule's validation rejects at most a handful of fields at once, so
/// this stays inline rather than spilling to the heap.
pub type MessageList = SmallVec<[String; 4]>;

/// Outcome of [`ViolationTracker::validate_violation`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors:   MessageList,
    pub warnings: MessageList
}

/// Outcome of [`ViolationTracker::process_violations`].
#[derive(Debug, Clone, Default)]
pub struct ProcessResult {
    pub processed:    usize,
    pub inserted:     usize,
    pub updated:      usize,
    pub deduplicated: usize,
    pub errors:       Vec<String>
}

/// Point-in-time counts of the tracker's two memoization caches.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hash_entries:       usize,
    pub validation_entries: usize
}

/// Key used to memoize `generate_violation_hash` and `validate_violation`.
/// Built from exactly the fields each computation actually reads, so two
/// inputs that only differ in `line`/`column` share a hash cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct HashCacheKey {
    file_path: String,
    rule_id:   String,
    message:   String
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ValidationCacheKey {
    file_path: String,
    message:   String,
    severity:  String,
    line:      Option<i64>,
    column:    Option<i64>
}

/// Validates, sanitizes, hashes, deduplicates, batches, and stores
/// incoming violation findings.
pub struct ViolationTracker {
    store:             Store,
    batch_size:        usize,
    hash_cache:        Mutex<LruCache<HashCacheKey, String>>,
    validation_cache:  Mutex<LruCache<ValidationCacheKey, ValidationResult>>,
    silent:            Mutex<bool>
}

impl ViolationTracker {
    /// Build a tracker over `store`, batching `process_violations` calls
    /// into chunks of `batch_size` (from `Config.performance.batch_size`).
    pub fn new(store: Store, batch_size: usize) -> Self {
        let capacity = std::num::NonZeroUsize::new(DEFAULT_CACHE_CAPACITY)
            .expect("DEFAULT_CACHE_CAPACITY is nonzero");
        Self {
            store,
            batch_size: batch_size.max(1),
            hash_cache: Mutex::new(LruCache::new(capacity)),
            validation_cache: Mutex::new(LruCache::new(capacity)),
            silent: Mutex::new(false)
        }
    }

    /// Suppress any future console output this tracker would otherwise
    /// produce. The tracker itself never prints directly today, but
    /// callers (the demo CLI, watch mode) consult this flag before
    /// reporting per-violation detail.
    pub fn set_silent_mode(&self, silent: bool) {
        *self.silent.lock().expect("tracker mutex poisoned") = silent;
    }

    pub fn is_silent(&self) -> bool {
        *self.silent.lock().expect("tracker mutex poisoned")
    }

    /// SHA-256 of `file_path | rule_id | normalized(message)`, lowercase
    /// hex. Line and column are intentionally excluded so edits that only
    /// shift line numbers do not resurrect the same logical finding.
    pub fn generate_violation_hash(&self, v: &ViolationInput) -> String {
        let key = HashCacheKey {
            file_path: v.file.clone(),
            rule_id:   v.rule.clone().unwrap_or_default(),
            message:   v.message.clone()
        };
        if let Some(hash) = self.hash_cache.lock().expect("tracker mutex poisoned").get(&key) {
            return hash.clone();
        }

        let normalized = normalize_message(&v.message);
        let mut hasher = Sha256::new();
        hasher.update(key.file_path.as_bytes());
        hasher.update(b"|");
        hasher.update(key.rule_id.as_bytes());
        hasher.update(b"|");
        hasher.update(normalized.as_bytes());
        let hash = hex::encode(hasher.finalize());

        self.hash_cache
            .lock()
            .expect("tracker mutex poisoned")
            .put(key, hash.clone());
        hash
    }

    /// Rejects a violation if `file_path` is empty/whitespace, `message`
    /// is empty, `line`/`column` are negative, or the severity string
    /// doesn't round-trip. Results are memoized.
    pub fn validate_violation(&self, v: &ViolationInput) -> ValidationResult {
        let key = ValidationCacheKey {
            file_path: v.file.clone(),
            message:   v.message.clone(),
            severity:  v.severity.to_string(),
            line:      v.line,
            column:    v.column
        };
        if let Some(cached) = self
            .validation_cache
            .lock()
            .expect("tracker mutex poisoned")
            .get(&key)
        {
            return cached.clone();
        }

        let mut errors = MessageList::new();
        let warnings = MessageList::new();
        if v.file.trim().is_empty() {
            errors.push("File path is required".to_string());
        }
        if v.message.trim().is_empty() {
            errors.push("Message is required".to_string());
        }
        if v.line.is_some_and(|l| l < 0) {
            errors.push("Line number must be a positive integer".to_string());
        }
        if v.column.is_some_and(|c| c < 0) {
            errors.push("Column number must be a positive integer".to_string());
        }

        let result = ValidationResult {
            is_valid: errors.is_empty(),
            errors,
            warnings
        };
        self.validation_cache
            .lock()
            .expect("tracker mutex poisoned")
            .put(key, result.clone());
        result
    }

    /// Trims whitespace around `file_path`, `message`, `rule`, `category`,
    /// `code`; converts empty optional strings to absent. All other
    /// fields pass through untouched.
    pub fn sanitize_violation(&self, v: &ViolationInput) -> ViolationInput {
        ViolationInput {
            file:     v.file.trim().to_string(),
            line:     v.line,
            column:   v.column,
            message:  v.message.trim().to_string(),
            category: v.category.trim().to_string(),
            severity: v.severity,
            source:   v.source,
            rule:     v.rule.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(String::from),
            code:     v.code.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(String::from)
        }
    }

    /// Preserves the first occurrence of each hash in input order; stable.
    pub fn deduplicate_violations(&self, vs: Vec<ViolationInput>) -> Vec<ViolationInput> {
        let mut seen = std::collections::HashSet::with_capacity(vs.len());
        vs.into_iter()
            .filter(|v| seen.insert(self.generate_violation_hash(v)))
            .collect()
    }

    /// validate → sanitize → deduplicate by hash → batch → store.
    /// Records one `violation_processing` metric (swallowed on failure).
    pub async fn process_violations(&self, inputs: Vec<ViolationInput>) -> AppResult<ProcessResult> {
        let started = std::time::Instant::now();
        let total_received = inputs.len();

        // Validation and sanitization are CPU-bound and embarrassingly
        // parallel; rayon fans them out across worker threads.
        let (valid, error_batches): (Vec<_>, Vec<Vec<String>>) = inputs
            .into_par_iter()
            .map(|v| {
                let validation = self.validate_violation(&v);
                if validation.is_valid {
                    Ok(self.sanitize_violation(&v))
                } else {
                    Err(validation.errors.into_iter().collect::<Vec<_>>())
                }
            })
            .partition_map(|r| match r {
                Ok(v) => rayon::iter::Either::Left(v),
                Err(e) => rayon::iter::Either::Right(e)
            });
        let mut errors: Vec<String> = error_batches.into_iter().flatten().collect();

        let deduplicated_input_len = valid.len();
        let deduped = self.deduplicate_violations(valid);
        let deduplicated = deduplicated_input_len - deduped.len();

        let now = Utc::now();
        let violations: Vec<Violation> = deduped
            .iter()
            .map(|v| {
                let hash = self.generate_violation_hash(v);
                Violation {
                    id: None,
                    file_path: CompactString::from(v.file.as_str()),
                    rule_id: CompactString::from(v.rule.as_deref().unwrap_or("unknown")),
                    category: CompactString::from(v.category.as_str()),
                    severity: v.severity,
                    source: v.source,
                    message: CompactString::from(v.message.as_str()),
                    line: v.line,
                    column: v.column,
                    code_snippet: v.code.as_deref().map(CompactString::from),
                    hash,
                    first_seen_at: now,
                    last_seen_at: now,
                    status: ViolationStatus::Active
                }
            })
            .collect();

        let mut result = ProcessResult {
            processed: total_received,
            deduplicated,
            ..Default::default()
        };

        for chunk in violations.chunks(self.batch_size) {
            // A storage failure is isolated to this batch: it is recorded
            // into `errors` rather than aborting the whole call, so a
            // transient fault in one cycle never prevents the next.
            match self.store.store_violations(chunk).await {
                Ok(chunk_result) => {
                    result.inserted += chunk_result.inserted;
                    result.updated += chunk_result.updated;
                    result.errors.extend(chunk_result.errors);
                }
                Err(e) => result.errors.push(e.to_string())
            }
        }
        result.errors.append(&mut errors);

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        let _ = self
            .store
            .record_metric(
                "violation_processing",
                elapsed_ms,
                "ms",
                Some(&format!("processed={total_received}"))
            )
            .await;

        Ok(result)
    }

    pub async fn mark_as_resolved(&self, hashes: &[String]) -> AppResult<usize> {
        self.store.resolve_violations(hashes).await
    }

    pub async fn mark_as_ignored(&self, hashes: &[String]) -> AppResult<usize> {
        self.store.ignore_violations(hashes).await
    }

    pub async fn reactivate_violations(&self, hashes: &[String]) -> AppResult<usize> {
        self.store.reactivate_violations(hashes).await
    }

    pub fn get_cache_stats(&self) -> CacheStats {
        CacheStats {
            hash_entries:       self.hash_cache.lock().expect("tracker mutex poisoned").len(),
            validation_entries: self
                .validation_cache
                .lock()
                .expect("tracker mutex poisoned")
                .len()
        }
    }

    pub fn clear_caches(&self) {
        self.hash_cache.lock().expect("tracker mutex poisoned").clear();
        self.validation_cache.lock().expect("tracker mutex poisoned").clear();
    }
}

fn normalize_message(message: &str) -> String {
    let replaced = LINE_TOKEN.replace_all(message, "line X");
    LINE_COLUMN_TOKEN.replace_all(&replaced, "X:Y").into_owned()
}
