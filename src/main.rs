use gradewise_lib::config::AppConfig;
use sentry::ClientInitGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(LevelFilter::INFO.into()))
        .with(sentry_tracing::layer())
        .init();

    // 初始化 Sentry（若有环境变量 SENTRY_DSN）
    let _sentry_guard: Option<ClientInitGuard> = std::env::var("SENTRY_DSN")
        .ok()
        .filter(|dsn| !dsn.trim().is_empty())
        .map(|dsn| {
            let guard = sentry::init((
                dsn,
                sentry::ClientOptions {
                    release: Some(env!("CARGO_PKG_VERSION").into()),
                    ..Default::default()
                },
            ));
            tracing::info!("sentry initialized");
            guard
        });

    let cfg = AppConfig::from_env_and_file()?;
    gradewise_lib::run(cfg).await
}
