use std::{sync::Arc, time::Instant};

use anyhow::Context;

use crate::{
    config::Config,
    gate::GateSnapshot,
    session::SessionPipeline,
    source::{MediaExtractor, YtDlpExtractor},
};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub pipeline: SessionPipeline,
    pub started_at: Instant,
}

impl AppState {
    pub async fn initialize(config: Config) -> anyhow::Result<Self> {
        let extractor = YtDlpExtractor::new(
            config.extractor.clone(),
            config.storage.cookies_file.clone(),
        );
        Self::with_extractor(config, Arc::new(extractor)).await
    }

    /// Builds the state around any extractor; the workspace root is created
    /// up front so the static file layer has something to serve from.
    pub async fn with_extractor(
        config: Config,
        extractor: Arc<dyn MediaExtractor>,
    ) -> anyhow::Result<Self> {
        let pipeline = SessionPipeline::new(&config, extractor);
        pipeline.workspaces().ensure_root().await.with_context(|| {
            format!(
                "failed to create HLS root {}",
                pipeline.workspaces().root().display()
            )
        })?;

        Ok(Self {
            config,
            pipeline,
            started_at: Instant::now(),
        })
    }

    pub fn gate_snapshot(&self) -> GateSnapshot {
        self.pipeline.gate().snapshot()
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
