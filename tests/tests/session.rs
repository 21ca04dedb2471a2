mod utils;
#[allow(unused)]
use utils::*;

mod tests {
    use super::*;

    use isubench::flows::html;
    use isubench::orchestrator;
    use isubench::{Action, FailureKind, Session, User};
    use reqwest::Method;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    #[tokio::test]
    async fn login_keeps_cookies_per_session() {
        init();
        let names = names(3);
        let (addr, _state) = mock(&names, 5).await;
        let ctx = context(addr, Duration::from_secs(1), 2);

        let user = User::seeded(&names[2]);
        let alice = Session::new(ctx.clone()).unwrap();
        let anonymous = Session::new(ctx.clone()).unwrap();

        Action::post("/login")
            .expect_location("/")
            .with_form(user.login_form())
            .play(&alice)
            .await
            .unwrap();
        assert!(alice.cookies(&ctx.target().resolve("/").unwrap()).is_some());
        assert!(anonymous.cookies(&ctx.target().resolve("/").unwrap()).is_none());

        let account_name = user.account_name.clone();
        Action::get("/")
            .check(move |_, body| {
                let account_name = account_name.clone();
                async move {
                    let shown = html::class_texts(&body, "isu-account-name");
                    anyhow::ensure!(shown == vec![account_name], "not logged in");
                    Ok(())
                }
            })
            .play(&alice)
            .await
            .unwrap();

        let snapshot = ctx.score().snapshot();
        assert_eq!(snapshot.fails, 0);
        // login: success and post bonus. top page: success.
        assert_eq!(snapshot.score, 1 + 2 + 1);
    }

    #[tokio::test]
    async fn wrong_password_is_an_assertion_failure() {
        init();
        let names = names(2);
        let (addr, _state) = mock(&names, 0).await;
        let ctx = context(addr, Duration::from_secs(1), 2);
        let session = Session::new(ctx.clone()).unwrap();

        let failure = Action::post("/login")
            .expect_location("/")
            .with_form(User::new(names[0].clone(), "nope").login_form())
            .play(&session)
            .await
            .unwrap_err();

        assert_eq!(failure.kind, FailureKind::Assertion);
        assert_eq!(
            ctx.score().fail_messages(),
            vec!["redirect location is incorrect: expected '/', got '/login' (POST /login)"]
        );
        assert_eq!(ctx.score().score(), -10);
    }

    #[tokio::test]
    async fn repeated_failures_are_reported_once() {
        init();
        let (addr, _state) = mock(&names(1), 0).await;
        let ctx = context(addr, Duration::from_secs(1), 2);
        let session = Session::new(ctx.clone()).unwrap();

        let missing = Action::get("/@nobody");
        for _ in 0..3 {
            assert!(missing.play(&session).await.is_err());
        }

        let score = ctx.score();
        assert_eq!(score.fails(), 3);
        assert_eq!(
            score.fail_messages(),
            vec!["response code should be 200, got 404 (GET /@nobody)"]
        );
        assert_eq!(score.raw_fail_messages().len(), 3);
    }

    #[tokio::test]
    async fn initialize_is_never_scored() {
        init();
        let (addr, state) = mock(&names(1), 0).await;
        let ctx = context(addr, Duration::from_secs(1), 2);

        assert!(orchestrator::initialize(&ctx).await);
        assert_eq!(state.stats.initialized.load(Ordering::Relaxed), 1);
        assert_eq!(ctx.score().snapshot(), Default::default());

        let unreachable = context("127.0.0.1:1".parse().unwrap(), Duration::from_secs(1), 2);
        assert!(!orchestrator::initialize(&unreachable).await);
        assert_eq!(unreachable.score().fails(), 0);
    }

    #[tokio::test]
    async fn unreachable_target_is_an_exception() {
        init();
        let ctx = context("127.0.0.1:1".parse().unwrap(), Duration::from_secs(1), 2);
        let session = Session::new(ctx.clone()).unwrap();

        let failure = Action::get("/").play(&session).await.unwrap_err();
        assert_eq!(failure.kind, FailureKind::Exception);
        assert_eq!(failure.record.method, Method::GET.as_str());
        assert_eq!(ctx.score().score(), -20);
    }
}
