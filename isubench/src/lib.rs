//! A load-generating correctness checker.
//!
//! Scripted HTTP interactions ([`Action`]s) are played through per-actor
//! [`Session`]s. Named [`Flow`]s repeat them concurrently under one time
//! budget, and every play lands exactly once in the shared score.
//!
//! ```ignore
//! let ctx = BenchContext::new(BenchConfig::new(TargetHost::parse("localhost:8080")?)).shared();
//! let snapshot = Orchestrator::new(ctx)
//!     .flow(flows::toppage_not_login())
//!     .flow(flows::static_files())
//!     .run()
//!     .await?;
//! ```
pub mod action;
pub mod context;
pub mod error;
pub mod fixtures;
pub mod flows;
pub mod orchestrator;
pub mod pool;
pub mod report;
pub mod session;

pub use action::{Action, AssetAction, Location, UploadAction};
pub use context::BenchContext;
pub use error::{Failure, FailureKind, FixtureError, OrchestratorError, SessionError};
pub use fixtures::{Asset, User, Userdata};
pub use orchestrator::{Flow, Orchestrator};
pub use pool::{LeasedSession, SessionPool};
pub use report::Report;
pub use session::Session;

pub use isubench_core::{BenchConfig, ScoreTable, TargetHost};

pub mod prelude {
    pub use crate::action::{Action, AssetAction, UploadAction};
    pub use crate::context::BenchContext;
    pub use crate::orchestrator::{Flow, Orchestrator};
    pub use crate::session::Session;
    pub use isubench_core::{BenchConfig, TargetHost};
}
