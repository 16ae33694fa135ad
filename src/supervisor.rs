//! Per-path session supervisor
//!
//! Keeps one muxer session alive for a path: start it, publish it, wait for
//! it to fail, close it and start a new one after a pause.

use std::sync::Arc;
use std::time::Duration;

use hls_live_lib::{EngineFactory, MuxerConfig, MuxerInstance, Stream};
use tokio::sync::watch;
use tracing::Instrument;

use crate::ingest::wait_for_shutdown;
use crate::state::AppState;

pub struct PathSupervisor {
    pub state: Arc<AppState>,
    pub config: MuxerConfig,
    pub stream: Arc<dyn Stream>,
    pub engines: Arc<dyn EngineFactory>,
    pub retry_pause: Duration,
}

impl PathSupervisor {
    /// Run sessions until shutdown. The last session is closed before this
    /// returns.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let span = tracing::info_span!("supervisor", path = %self.config.path_name);
        async move {
            loop {
                self.run_session(&mut shutdown).await;

                if *shutdown.borrow() {
                    break;
                }
                tracing::info!("restarting in {:?}", self.retry_pause);
                tokio::select! {
                    _ = tokio::time::sleep(self.retry_pause) => {}
                    _ = wait_for_shutdown(&mut shutdown) => break,
                }
            }
            tracing::debug!("supervisor stopped");
        }
        .instrument(span)
        .await
    }

    async fn run_session(&self, shutdown: &mut watch::Receiver<bool>) {
        let muxer = match MuxerInstance::new(
            self.config.clone(),
            self.stream.clone(),
            self.engines.clone(),
            self.state.bytes_counter(&self.config.path_name),
        ) {
            Ok(muxer) => muxer,
            Err(e) => {
                tracing::error!("{}", e);
                return;
            }
        };

        if let Err(e) = muxer.initialize() {
            tracing::error!("{}", e);
            return;
        }

        let errors = muxer.error_channel();
        self.state.publish(muxer.clone());
        self.state.metrics.record_session_start(muxer.path_name());

        tokio::select! {
            result = errors => match result {
                Ok(e) => tracing::warn!("session ended: {}", e),
                Err(_) => tracing::warn!("session ended"),
            },
            _ = wait_for_shutdown(shutdown) => {}
        }

        self.state.unpublish(muxer.path_name(), muxer.id());
        muxer.close();
    }
}
