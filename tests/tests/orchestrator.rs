mod utils;
#[allow(unused)]
use utils::*;

mod tests {
    use super::*;

    use isubench::{Action, Flow, Orchestrator, Session, SessionPool};
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    #[ntest::timeout(5_000)]
    async fn pool_never_hands_out_more_than_its_capacity() {
        init();
        let (addr, _state) = mock(&names(1), 0).await;
        let ctx = context(addr, Duration::from_secs(1), 3);
        let cancel = CancellationToken::new();
        let pool = Arc::new(SessionPool::spawn(ctx.clone(), 3, cancel.clone()));

        let mut leases = vec![];
        for _ in 0..3 {
            leases.push(pool.acquire().await.unwrap());
        }
        assert_eq!(pool.in_use(), 3);

        let blocked = tokio::time::timeout(Duration::from_millis(200), pool.acquire()).await;
        assert!(blocked.is_err());

        let index = Action::get("/");
        for lease in &leases {
            index.play(lease.session()).await.unwrap();
        }

        leases.pop();
        let lease = tokio::time::timeout(Duration::from_secs(1), pool.acquire())
            .await
            .unwrap()
            .unwrap();
        drop(lease);
        drop(leases);

        assert_eq!(pool.peak_in_use(), 3);
        assert_eq!(ctx.score().successes(), 3);
        cancel.cancel();
        pool.shutdown().await.unwrap();
    }

    #[tracing_test::traced_test]
    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn no_requests_after_the_run_returns() {
        let (addr, state) = mock(&names(1), 5).await;
        let ctx = context(addr, Duration::from_millis(500), 4);

        let index = Action::get("/");
        let flow = Flow::new("index", move |sessions: Vec<Session>| {
            let index = index.clone();
            async move {
                index.play(&sessions[0]).await?;
                Ok(())
            }
        })
        .workers(4);

        let snapshot = Orchestrator::new(ctx).flow(flow).run().await.unwrap();
        assert!(snapshot.successes > 0);
        assert_eq!(snapshot.fails, 0);

        let served = state.stats.requests.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(state.stats.requests.load(Ordering::SeqCst), served);
        assert!(logs_contain("Benchmark time is up"));
    }
}
