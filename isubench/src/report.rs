use isubench_core::Score;
use serde::Serialize;
use std::fmt;

/// Final outcome of a run, as printed on stdout.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Report {
    pub pass: bool,
    /// Never below zero.
    pub score: i64,
    pub success: u64,
    pub fail: u64,
    pub messages: Vec<String>,
}

impl Report {
    /// Deduplicated messages normally, the raw chronological list when
    /// `debug` is set.
    pub fn from_score(score: &Score, fail_threshold: u64, debug: bool) -> Self {
        let snapshot = score.snapshot();
        let messages = if debug {
            score.raw_fail_messages()
        } else {
            score.fail_messages()
        };

        Self {
            pass: snapshot.fails < fail_threshold,
            score: snapshot.reported_score(),
            success: snapshot.successes,
            fail: snapshot.fails,
            messages,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn exit_code(&self) -> i32 {
        if self.pass {
            0
        } else {
            1
        }
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "score: {}, success: {}, fail: {}",
            self.score, self.success, self.fail
        )?;
        for message in &self.messages {
            write!(f, "\n{message}")?;
        }
        Ok(())
    }
}
