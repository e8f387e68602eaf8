use std::env;

use anyhow::Context;
use serde_json::json;

use hls_stream_service::{
    app_state::AppState, config::Config, http, logging::init_logger,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let logger = init_logger("hls-stream-service");

    let config = Config::load().context("failed to load configuration")?;

    if matches!(env::args().nth(1).as_deref(), Some("check-config")) {
        logger.info(
            "config.check_passed",
            serde_json::to_value(&config).unwrap_or_else(|_| json!({ "status": "ok" })),
        );
        return Ok(());
    }

    let state = AppState::initialize(config.clone())
        .await
        .context("failed to initialize application state")?;

    logger.info(
        "server.initialized",
        json!({
            "port": config.port,
            "hlsRoot": config.storage.hls_root.display().to_string(),
            "mountPrefix": config.storage.mount_prefix,
            "maxConcurrentSessions": config.gate.max_concurrent_sessions,
            "transcodeMode": config.transcoder.mode,
        }),
    );

    http::serve(state).await.context("http server failed")
}
