//! Process-wide score and failure bookkeeping.
//!
//! One [`Score`] is constructed at start-up and shared by every session via
//! `Arc`. Counter updates take the write half of a `RwLock`; snapshots only
//! take the read half so report readers never block each other.
use std::fmt;
use std::sync::{PoisonError, RwLock};
use tracing::{debug, trace};

/// A recorded failure: what went wrong and which request produced it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FailRecord {
    pub method: String,
    pub path: String,
    pub message: String,
}

impl FailRecord {
    pub fn new(
        method: impl Into<String>,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FailRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} {})", self.message, self.method, self.path)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScoreSnapshot {
    pub score: i64,
    pub successes: u64,
    pub fails: u64,
}

impl ScoreSnapshot {
    /// Score as reported to participants, which never goes below zero.
    pub fn reported_score(&self) -> i64 {
        self.score.max(0)
    }
}

#[derive(Default)]
struct Counters {
    score: i64,
    successes: u64,
    fails: u64,
}

#[derive(Default)]
pub struct Score {
    counters: RwLock<Counters>,
    errors: RwLock<Vec<FailRecord>>,
}

impl Score {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one successful play worth `points`.
    pub fn record_success(&self, points: i64) {
        {
            let mut counters = self.counters.write().unwrap_or_else(PoisonError::into_inner);
            counters.score += points;
            counters.successes += 1;
        }
        trace!("success +{points}");

        #[cfg(feature = "metrics")]
        metrics::counter!(crate::metrics::SUCCESS).increment(1);
    }

    /// Adds `points` to the score without counting another play.
    ///
    /// Used for the extra credit a state-changing or upload play earns on top
    /// of its success.
    pub fn record_bonus(&self, points: i64) {
        {
            let mut counters = self.counters.write().unwrap_or_else(PoisonError::into_inner);
            counters.score += points;
        }

        #[cfg(feature = "metrics")]
        metrics::counter!(crate::metrics::BONUS_POINTS).increment(points.max(0) as u64);
    }

    /// Counts one failed play, subtracting `points` and keeping `record`.
    pub fn record_failure(&self, points: i64, record: FailRecord) {
        {
            let mut counters = self.counters.write().unwrap_or_else(PoisonError::into_inner);
            counters.score -= points;
            counters.fails += 1;
        }
        debug!("fail -{points}: {record}");

        self.errors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);

        #[cfg(feature = "metrics")]
        metrics::counter!(crate::metrics::FAIL).increment(1);
    }

    pub fn snapshot(&self) -> ScoreSnapshot {
        let counters = self.counters.read().unwrap_or_else(PoisonError::into_inner);
        ScoreSnapshot {
            score: counters.score,
            successes: counters.successes,
            fails: counters.fails,
        }
    }

    pub fn score(&self) -> i64 {
        self.snapshot().score
    }

    pub fn successes(&self) -> u64 {
        self.snapshot().successes
    }

    pub fn fails(&self) -> u64 {
        self.snapshot().fails
    }

    /// Failures sorted by message with consecutive duplicates collapsed.
    pub fn fail_messages(&self) -> Vec<String> {
        let mut messages = self.raw_fail_messages();
        messages.sort();
        messages.dedup();
        messages
    }

    /// Every failure in the order it was recorded.
    pub fn raw_fail_messages(&self) -> Vec<String> {
        self.errors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    pub fn raw_failures(&self) -> Vec<FailRecord> {
        self.errors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl fmt::Debug for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn success_and_failure_adjust_counters() {
        let score = Score::new();
        score.record_success(1);
        score.record_success(1);
        score.record_bonus(2);
        score.record_failure(10, FailRecord::new("GET", "/", "boom"));

        let snap = score.snapshot();
        assert_eq!(snap.score, -6);
        assert_eq!(snap.successes, 2);
        assert_eq!(snap.fails, 1);
        assert_eq!(snap.reported_score(), 0);
    }

    #[tracing_test::traced_test]
    #[test]
    fn failures_are_logged_with_their_record() {
        let score = Score::new();
        score.record_failure(20, FailRecord::new("GET", "/", "request timed out"));
        assert!(logs_contain("fail -20: request timed out (GET /)"));
    }

    #[test]
    fn fail_record_format() {
        let record = FailRecord::new("POST", "/login", "response code should be 200, got 500");
        assert_eq!(
            record.to_string(),
            "response code should be 200, got 500 (POST /login)"
        );
    }

    #[test]
    fn dedup_view_is_sorted_and_stable() {
        let score = Score::new();
        score.record_failure(10, FailRecord::new("GET", "/b", "second"));
        score.record_failure(10, FailRecord::new("GET", "/a", "first"));
        score.record_failure(10, FailRecord::new("GET", "/b", "second"));

        let first = score.fail_messages();
        assert_eq!(first, vec!["first (GET /a)", "second (GET /b)"]);
        assert_eq!(first, score.fail_messages());

        score.record_failure(10, FailRecord::new("GET", "/a", "first"));
        assert_eq!(score.fail_messages().len(), 2);
    }

    #[test]
    fn raw_view_is_chronological() {
        let score = Score::new();
        score.record_failure(10, FailRecord::new("GET", "/b", "z"));
        score.record_failure(10, FailRecord::new("GET", "/a", "a"));
        score.record_failure(10, FailRecord::new("GET", "/b", "z"));

        assert_eq!(
            score.raw_fail_messages(),
            vec!["z (GET /b)", "a (GET /a)", "z (GET /b)"]
        );
        // Reading the dedup view must not reorder the raw one.
        let _ = score.fail_messages();
        assert_eq!(score.raw_failures()[0].path, "/b");
    }

    #[test]
    fn concurrent_updates_are_not_lost() {
        let score = Arc::new(Score::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let score = score.clone();
                thread::spawn(move || {
                    for _ in 0..1_000 {
                        if i % 2 == 0 {
                            score.record_success(1);
                        } else {
                            score.record_failure(1, FailRecord::new("GET", "/", "x"));
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let snap = score.snapshot();
        assert_eq!(snap.successes, 4_000);
        assert_eq!(snap.fails, 4_000);
        assert_eq!(snap.score, 0);
        assert_eq!(score.raw_fail_messages().len(), 4_000);
    }
}
