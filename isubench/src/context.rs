use isubench_core::{BenchConfig, Score, ScoreTable, TargetHost, UrlCacheStore};
use std::sync::Arc;

/// Everything a run shares between its sessions: configuration, the score
/// aggregator and the URL cache store.
///
/// Built once at start-up and handed out as `Arc<BenchContext>`.
#[derive(Debug)]
pub struct BenchContext {
    config: BenchConfig,
    score: Score,
    cache: UrlCacheStore,
}

impl BenchContext {
    pub fn new(config: BenchConfig) -> Self {
        Self {
            config,
            score: Score::new(),
            cache: UrlCacheStore::new(),
        }
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn config(&self) -> &BenchConfig {
        &self.config
    }

    pub fn target(&self) -> &TargetHost {
        &self.config.target
    }

    pub fn scores(&self) -> &ScoreTable {
        &self.config.scores
    }

    pub fn score(&self) -> &Score {
        &self.score
    }

    pub fn cache(&self) -> &UrlCacheStore {
        &self.cache
    }
}
