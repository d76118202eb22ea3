use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;

mod config;
mod routes;
mod server;
mod trace;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() -> anyhow::Result<()> {
    if let Err(e) = rlimit::increase_nofile_limit(u64::MAX) {
        tracing::warn!("Failed to raise ulimit: {e}");
    }

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> anyhow::Result<()> {
    trace::init_tracing()?;

    let config = config::Config::from_env();
    let state = routes::AppState::new(&config)?;

    let prometheus = PrometheusBuilder::new().install_recorder()?;
    let upkeep = prometheus.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(5)).await;
            upkeep.run_upkeep();
        }
    });

    server::serve(routes::router(&state, prometheus), config.port).await
}
