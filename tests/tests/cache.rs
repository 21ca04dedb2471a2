mod utils;
#[allow(unused)]
use utils::*;

mod tests {
    use super::*;

    use isubench::{AssetAction, Session};
    use mock_service::AppState;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    #[tokio::test]
    async fn cached_assets_are_revalidated_by_later_sessions() {
        init();
        let (addr, state) = mock(&names(1), 0).await;
        let ctx = context(addr, Duration::from_secs(1), 2);

        let first = Session::new(ctx.clone()).unwrap();
        let second = Session::new(ctx.clone()).unwrap();
        let style = AssetAction::new("/css/style.css");

        style.play(&first).await.unwrap();
        assert_eq!(ctx.cache().len(), 1);
        assert_eq!(state.stats.not_modified.load(Ordering::Relaxed), 0);

        // The store is shared, so a fresh session revalidates too.
        style.play(&second).await.unwrap();
        assert_eq!(state.stats.not_modified.load(Ordering::Relaxed), 1);

        let snapshot = ctx.score().snapshot();
        assert_eq!(snapshot.successes, 2);
        assert_eq!(snapshot.fails, 0);
    }

    #[tokio::test]
    async fn no_store_assets_are_never_cached() {
        init();
        let (addr, state) =
            serve(AppState::new(mock_service::Seed::default()).with_cache_control("no-store"))
                .await;
        let ctx = context(addr, Duration::from_secs(1), 2);
        let session = Session::new(ctx.clone()).unwrap();

        let favicon = AssetAction::new("/favicon.ico");
        favicon.play(&session).await.unwrap();
        favicon.play(&session).await.unwrap();

        assert!(ctx.cache().is_empty());
        assert_eq!(state.stats.not_modified.load(Ordering::Relaxed), 0);
        assert_eq!(ctx.score().successes(), 2);
    }

    #[tokio::test]
    async fn uncached_image_must_match_its_hash() {
        init();
        let (addr, _state) = serve(
            AppState::new(mock_service::Seed::from_names(&names(1), 0, 1))
                .with_cache_control("no-store"),
        )
        .await;
        let ctx = context(addr, Duration::from_secs(1), 2);
        let session = Session::new(ctx.clone()).unwrap();

        let image = AssetAction::new("/image/1.jpg");
        image
            .with_hash(isubench_core::content_hash(b"seed-image-0"))
            .play(&session)
            .await
            .unwrap();

        let failure = image
            .with_hash(isubench_core::content_hash(b"something else"))
            .play(&session)
            .await
            .unwrap_err();
        assert_eq!(failure.record.message, "static file is not correct");
        assert_eq!(failure.record.path, "/image/1.jpg");
        assert_eq!(ctx.score().fails(), 1);
    }
}
