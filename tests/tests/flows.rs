mod utils;
#[allow(unused)]
use utils::*;

mod tests {
    use super::*;

    use isubench::orchestrator::{self, Orchestrator};
    use isubench::{flows, Report, Userdata};
    use isubench_core::DEFAULT_FAIL_THRESHOLD;
    use std::sync::Arc;
    use std::time::Duration;

    async fn setup(
        duration: Duration,
    ) -> (
        Orchestrator,
        Arc<mock_service::AppState>,
        tempfile::TempDir,
    ) {
        init();
        let names = names(12);
        let (addr, state) = mock(&names, 40).await;

        let dir = tempfile::tempdir().unwrap();
        write_userdata(dir.path(), &names);
        let data = Arc::new(Userdata::load(dir.path()).unwrap());

        let ctx = context(addr, duration, 8);
        assert!(orchestrator::initialize(&ctx).await);

        let orchestrator = flows::all(data)
            .into_iter()
            .fold(Orchestrator::new(ctx), Orchestrator::flow);
        (orchestrator, state, dir)
    }

    #[tokio::test]
    #[ntest::timeout(20_000)]
    async fn every_flow_passes_preflight_against_a_correct_target() {
        let (orchestrator, state, _dir) = setup(Duration::from_secs(1)).await;
        assert_eq!(state.stats.initialized.load(std::sync::atomic::Ordering::Relaxed), 1);

        let passed = orchestrator.preflight().await.unwrap();
        let score = orchestrator.context().score();
        assert!(passed, "unexpected failures: {:?}", score.raw_fail_messages());
        assert_eq!(score.fails(), 0);
        assert!(score.score() > 0);

        // post_data and ban_user each post an image and comment on it.
        assert_eq!(state.post_count(), 42);
        assert_eq!(state.comment_count(), 2);
    }

    #[tokio::test]
    #[ntest::timeout(30_000)]
    async fn short_load_run_scores_without_failures() {
        let (orchestrator, _state, _dir) = setup(Duration::from_secs(2)).await;

        let snapshot = orchestrator.run().await.unwrap();
        let report = Report::from_score(
            orchestrator.context().score(),
            DEFAULT_FAIL_THRESHOLD,
            false,
        );

        assert_eq!(snapshot.fails, 0, "{report}");
        assert!(snapshot.successes > 10);
        assert!(report.pass);
        assert_eq!(report.score, snapshot.score);
        assert!(report.messages.is_empty());
    }
}
