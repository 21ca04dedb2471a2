//! Counter names emitted when the `metrics` feature is enabled.
//!
//! No exporter is installed here; binaries that want the numbers install a
//! recorder of their choice.

pub const SUCCESS: &str = "isubench_success";
pub const FAIL: &str = "isubench_fail";
pub const BONUS_POINTS: &str = "isubench_bonus_points";
