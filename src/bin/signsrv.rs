//! Standalone sign server.
//!
//! Usage: `signsrv [config.json]`. The config path may also come from
//! `SIGNSRV_CONFIG`; `SIGNSRV_*` variables override individual fields.

use std::sync::Arc;

use signclient_rs::config::SignServiceConfig;
use signclient_rs::sign_service::{LocalSignService, router};
use signclient_rs::signing::SigningEngine;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("SIGNSRV_CONFIG").ok());
    let config = match path {
        Some(path) => SignServiceConfig::from_json_file(&path)?,
        None => SignServiceConfig::default(),
    }
    .apply_env()?;

    let engine = Arc::new(SigningEngine::from_config(&config));
    let service = Arc::new(LocalSignService::new(engine));

    let listener = tokio::net::TcpListener::bind(&config.bind).await?;
    log::info!("signsrv listening on {}", listener.local_addr()?);
    axum::serve(listener, router(service)).await?;
    Ok(())
}
