#![deny(warnings)]

use std::sync::{Arc, LazyLock};

use axum_metrics_server::{
    config::{Config, Param},
    handler::{AppState, build_router},
    metrics::Metrics,
    new_server,
    task::HeavyTask,
    wait_signal,
};
use clap::Parser;

type DynError = Box<dyn std::error::Error + Send + Sync>;

pub(crate) static PARAM: LazyLock<Param> = LazyLock::new(Param::parse);

#[tokio::main]
pub async fn main() -> Result<(), DynError> {
    axum_metrics_server::init_log::tracing::init(env!("CARGO_CRATE_NAME"))?;
    let config = Config::from_param(&PARAM)?;
    log::info!("slow task delays {:?}ms, failure rate {}", config.slow_task.delays_ms, config.slow_task.failure_rate);

    let app_state = AppState {
        metrics: Arc::new(Metrics::new()),
        task: Arc::new(HeavyTask::new(&config.slow_task)),
        app_name: config.app_name.clone(),
    };
    let (server, shutdown_tx) = new_server(config.port, build_router(app_state));
    let server = server.with_timeout(config.idle_timeout);

    tokio::spawn(async move {
        match wait_signal().await {
            Ok(()) => {
                let _ = shutdown_tx.send(()).await;
            }
            Err(e) => {
                log::warn!("failed to listen for shutdown signal: {e}");
                // 保持 sender 存活，否则 server 会立即退出
                std::future::pending::<()>().await;
                drop(shutdown_tx);
            }
        }
    });

    server.run().await?;
    Ok(())
}
