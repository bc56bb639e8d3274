use anyhow::{Context, Result};
use log::{error, info};
use std::sync::Arc;
use tokio::runtime::Builder;

use chive_backend::api::build_rocket;
use chive_backend::background::processors::{ArtifactStore, CvExecutable};
use chive_backend::background::queue::JobQueue;
use chive_backend::bootstrap::setup::{check_executable, initialize_folder, initialize_logger};
use chive_backend::config::AppConfig;

fn main() -> Result<()> {
    initialize_logger();
    let config = AppConfig::from_env()?;
    info!("Starting with {:?}", config);

    let runtime = Builder::new_multi_thread()
        .thread_name("rocket-io-worker")
        .enable_all()
        .build()
        .context("Failed to build Tokio runtime")?;

    runtime.block_on(serve(config))
}

async fn serve(config: AppConfig) -> Result<()> {
    let store = ArtifactStore::new(&config.work_root);
    initialize_folder(&store)?;
    check_executable(&config.cv_executable);

    let queue = JobQueue::new(store, Arc::new(CvExecutable::new(&config.cv_executable)));
    queue.initialize(config.workers, config.queue_capacity);

    let rocket_instance = build_rocket(&config, queue.clone()).ignite().await?;
    let shutdown_handle = rocket_instance.shutdown();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received ctrl-c, shutting down");
                shutdown_handle.notify();
            }
            Err(e) => error!("Failed to listen for ctrl-c: {}", e),
        }
    });

    let result = rocket_instance.launch().await;

    info!("Waiting for queued jobs to finish");
    queue.shutdown().await;

    if let Err(e) = result {
        error!("Rocket server failed: {}", e);
        return Err(anyhow::Error::from(e));
    }
    Ok(())
}
