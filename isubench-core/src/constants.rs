use std::time::Duration;

/// User-Agent sent with every request.
pub const USER_AGENT: &str = "benchmarker";

pub const DEFAULT_BENCHMARK_DURATION: Duration = Duration::from_secs(30);

/// Per-request timeout. A play that exceeds it is scored as an exceptional failure.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub const DEFAULT_INITIALIZE_TIMEOUT: Duration = Duration::from_secs(10);

/// How long in-flight scenarios get to settle after the stop signal.
pub const DEFAULT_DRAIN: Duration = Duration::from_secs(3);

/// Number of ready sessions kept by the session producer.
pub const DEFAULT_POOL_CAPACITY: usize = 20;

/// A run with this many failures (or more) does not pass.
pub const DEFAULT_FAIL_THRESHOLD: u64 = 5;

pub const DEFAULT_SUCCESS_GET: i64 = 1;
pub const DEFAULT_BONUS_POST: i64 = 2;
pub const DEFAULT_BONUS_UPLOAD: i64 = 5;
pub const DEFAULT_FAIL_ERROR: i64 = 10;
pub const DEFAULT_FAIL_EXCEPTION: i64 = 20;
