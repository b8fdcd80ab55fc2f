pub mod config;
pub mod error;
pub mod routes;
pub mod runtime;
pub mod state;

pub use config::AppConfig;
pub use runtime::RuntimeDescriptor;
pub use state::AppState;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

/// Bind, write the runtime descriptor, and serve until shutdown.
pub async fn serve(config: AppConfig, shutdown: CancellationToken) -> brain_core::Result<()> {
  let state = Arc::new(AppState::build(&config).await?);

  // The worker owns indexing; requests never block on it
  let worker = queue::Worker::new(
    Arc::clone(&state.queue),
    Arc::clone(&state.runner),
    queue::WorkerConfig::default(),
  );
  let worker_handle = tokio::spawn(worker.run(shutdown.clone()));

  let app = routes::router(Arc::clone(&state));

  let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port))
    .await
    .map_err(brain_core::Error::Io)?;
  let addr = listener.local_addr().map_err(brain_core::Error::Io)?;

  // Descriptor is on disk before the first request can arrive
  let descriptor = RuntimeDescriptor::for_addr(&config.host, addr.port(), config.foreground);
  descriptor.write(&state.state_dir)?;

  info!(%addr, "Listening");

  let shutdown_signal = shutdown.clone();
  axum::serve(listener, app)
    .with_graceful_shutdown(async move { shutdown_signal.cancelled().await })
    .await
    .map_err(brain_core::Error::Io)?;

  let _ = worker_handle.await;
  RuntimeDescriptor::remove(&state.state_dir)?;
  info!("Shutdown complete");

  Ok(())
}
