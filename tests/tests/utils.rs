use isubench::{BenchConfig, BenchContext, TargetHost};
use mock_service::{AppState, Seed};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[allow(unused)]
pub const ADMINS: usize = 10;

#[allow(unused)]
pub fn init() {
    static ONCE_LOCK: OnceLock<()> = OnceLock::new();

    ONCE_LOCK.get_or_init(|| {
        // Tests using `traced_test` may have installed theirs already.
        let _ = FmtSubscriber::builder()
            .with_max_level(Level::DEBUG)
            .with_env_filter("isubench=debug,mock_service=debug,axum::rejection=trace")
            .try_init();
    });
}

#[allow(unused)]
pub fn names(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("user{i:03}")).collect()
}

/// Starts a mock seeded with `names`, the first ten of them admins.
#[allow(unused)]
pub async fn mock(names: &[String], posts: usize) -> (SocketAddr, Arc<AppState>) {
    serve(AppState::new(Seed::from_names(names, ADMINS, posts))).await
}

#[allow(unused)]
pub async fn serve(state: AppState) -> (SocketAddr, Arc<AppState>) {
    let state = state.shared();
    let addr = mock_service::spawn(state.clone()).await.unwrap();
    (addr, state)
}

#[allow(unused)]
pub fn context(addr: SocketAddr, duration: Duration, pool_capacity: usize) -> Arc<BenchContext> {
    let mut config = BenchConfig::new(TargetHost::parse(&addr.to_string()).unwrap());
    config.duration = duration;
    config.drain = Duration::from_secs(2);
    config.pool_capacity = pool_capacity;
    BenchContext::new(config).shared()
}

/// Writes a userdata directory matching what the mock seeds.
#[allow(unused)]
pub fn write_userdata(dir: &Path, names: &[String]) {
    std::fs::write(dir.join("names.txt"), names.join("\n")).unwrap();
    std::fs::write(dir.join("kaomoji.txt"), "(^_^)\n(T_T)\n(*'-')\n").unwrap();
    std::fs::create_dir(dir.join("img")).unwrap();
    std::fs::write(dir.join("img/00001.jpg"), b"\xff\xd8\xff\xe0first-image").unwrap();
    std::fs::write(dir.join("img/00002.png"), b"\x89PNGsecond-image").unwrap();
}
