//! Runs named flows repeatedly, in parallel, under one time budget.
use crate::context::BenchContext;
use crate::error::{Failure, OrchestratorError};
use crate::pool::SessionPool;
use crate::session::Session;
use isubench_core::{ConfigError, ScoreSnapshot, USER_AGENT};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
#[allow(unused_imports)]
use tracing::{debug, error, info, instrument, trace, warn, Instrument};

pub type FlowFuture = Pin<Box<dyn Future<Output = Result<(), Failure>> + Send>>;
pub type FlowFn = Arc<dyn Fn(Vec<Session>) -> FlowFuture + Send + Sync>;

/// A named user journey.
///
/// Every iteration receives `sessions` fresh Sessions. A returned `Failure`
/// only ends that iteration; it has already been scored.
#[derive(Clone)]
pub struct Flow {
    name: String,
    workers: usize,
    sessions: usize,
    pause: Duration,
    run: FlowFn,
}

impl Flow {
    pub fn new<F, Fut>(name: impl Into<String>, run: F) -> Self
    where
        F: Fn(Vec<Session>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Failure>> + Send + 'static,
    {
        Self {
            name: name.into(),
            workers: 1,
            sessions: 1,
            pause: Duration::ZERO,
            run: Arc::new(move |sessions| Box::pin(run(sessions)) as FlowFuture),
        }
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn sessions(mut self, sessions: usize) -> Self {
        self.sessions = sessions;
        self
    }

    /// Delay between two iterations of the same worker.
    pub fn pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn session_count(&self) -> usize {
        self.sessions
    }

    pub fn worker_count(&self) -> usize {
        self.workers
    }

    pub async fn run(&self, sessions: Vec<Session>) -> Result<(), Failure> {
        (self.run)(sessions).await
    }
}

impl fmt::Debug for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flow")
            .field("name", &self.name)
            .field("workers", &self.workers)
            .field("sessions", &self.sessions)
            .field("pause", &humantime::format_duration(self.pause).to_string())
            .finish()
    }
}

#[derive(Debug)]
pub struct Orchestrator {
    ctx: Arc<BenchContext>,
    flows: Vec<Flow>,
}

impl Orchestrator {
    pub fn new(ctx: Arc<BenchContext>) -> Self {
        Self { ctx, flows: vec![] }
    }

    pub fn flow(mut self, flow: Flow) -> Self {
        self.flows.push(flow);
        self
    }

    pub fn flows(&self) -> &[Flow] {
        &self.flows
    }

    pub fn context(&self) -> &Arc<BenchContext> {
        &self.ctx
    }

    fn validate(&self) -> Result<(), OrchestratorError> {
        let config = self.ctx.config();
        config.validate()?;

        if self.flows.is_empty() {
            return Err(OrchestratorError::NoFlows);
        }

        for flow in &self.flows {
            if flow.sessions > config.pool_capacity {
                return Err(ConfigError::PoolTooSmall {
                    name: flow.name.clone(),
                    needed: flow.sessions,
                    capacity: config.pool_capacity,
                }
                .into());
            }
        }

        Ok(())
    }

    /// Plays every flow once, sequentially, each on its own fresh Sessions.
    ///
    /// Returns `true` when no failure was recorded.
    #[instrument(name = "preflight", skip_all)]
    pub async fn preflight(&self) -> Result<bool, OrchestratorError> {
        self.validate()?;

        let fails_before = self.ctx.score().fails();
        for flow in &self.flows {
            let sessions = (0..flow.sessions)
                .map(|_| Session::new(self.ctx.clone()))
                .collect::<Result<Vec<_>, _>>()?;

            debug!("Checking {}", flow.name);
            if let Err(failure) = flow.run(sessions).await {
                info!("{} failed: {failure}", flow.name);
            }
        }

        Ok(self.ctx.score().fails() == fails_before)
    }

    /// Runs every flow's workers until the configured duration elapses.
    ///
    /// Once time is up no new iteration starts. An iteration still running
    /// may finish its in-flight request, so stragglers are only aborted after
    /// the request timeout plus the drain interval.
    #[instrument(name = "load", skip_all)]
    pub async fn run(&self) -> Result<ScoreSnapshot, OrchestratorError> {
        self.validate()?;
        let config = self.ctx.config();

        info!("Running {} flows with {config}", self.flows.len());

        let cancel = CancellationToken::new();
        let pool = Arc::new(SessionPool::spawn(
            self.ctx.clone(),
            config.pool_capacity,
            cancel.child_token(),
        ));

        let mut workers = JoinSet::new();
        for flow in &self.flows {
            for id in 0..flow.workers {
                workers.spawn(
                    worker(flow.clone(), id, pool.clone(), cancel.clone()).in_current_span(),
                );
            }
        }

        tokio::time::sleep(config.duration).await;
        info!("Benchmark time is up");
        cancel.cancel();
        let stopped_at = Instant::now();

        let producer = pool.shutdown().await;

        let grace = config.request_timeout + config.drain;
        let drained = tokio::time::timeout(grace, async {
            while let Some(joined) = workers.join_next().await {
                if let Err(err) = joined {
                    error!("Flow worker panicked: {err}");
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                "{} flow workers still running after {}, aborting",
                workers.len(),
                humantime::format_duration(grace)
            );
            workers.shutdown().await;
        }
        debug!("Shut down in {:?}", stopped_at.elapsed());

        producer?;

        let snapshot = self.ctx.score().snapshot();
        info!(
            "Finished with score {}, {} successes, {} failures",
            snapshot.score, snapshot.successes, snapshot.fails
        );
        Ok(snapshot)
    }
}

/// `GET /initialize` on a dedicated client with the initialize timeout.
///
/// Never scored. Returns whether the target answered at all.
#[instrument(name = "initialize", skip_all)]
pub async fn initialize(ctx: &BenchContext) -> bool {
    let url = match ctx.target().resolve("/initialize") {
        Ok(url) => url,
        Err(err) => {
            warn!("Unable to build initialize URL: {err}");
            return false;
        }
    };

    let client = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(ctx.config().initialize_timeout)
        .build();

    let sent = match client {
        Ok(client) => client.get(url).send().await,
        Err(err) => Err(err),
    };

    match sent {
        Ok(res) => {
            info!("Initialize answered {}", res.status());
            true
        }
        Err(err) => {
            warn!("Initialize failed: {err}");
            false
        }
    }
}

#[instrument(name = "flow", skip_all, fields(name = %flow.name, worker = id))]
async fn worker(flow: Flow, id: usize, pool: Arc<SessionPool>, cancel: CancellationToken) {
    let mut iterations = 0u64;

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let leases = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            leases = pool.acquire_many(flow.sessions) => match leases {
                Some(leases) => leases,
                None => break,
            },
        };

        let sessions = leases.iter().map(|lease| lease.session().clone()).collect();
        if let Err(failure) = flow.run(sessions).await {
            debug!("Iteration aborted: {failure}");
        }
        drop(leases);
        iterations += 1;

        if !flow.pause.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(flow.pause) => {}
            }
        }
    }

    debug!("Worker stopped after {iterations} iterations");
}
