//! analyzerd - equipment risk analysis daemon
//!
//! Serves the loopback analysis API and purges expired results once a
//! minute until Ctrl-C.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::sync::{mpsc, Arc};
use std::time::Duration;

use equipment_risk::{
    api::{ApiConfig, ApiServer},
    now_s, AnalyzerConfig, Pipeline,
};

const PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Parser, Debug)]
#[command(author, version, about = "Broadcast equipment risk analysis daemon")]
struct Args {
    /// Config file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "ANALYZER_CONFIG")]
    config: Option<std::path::PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if let Some(path) = &args.config {
        std::env::set_var("ANALYZER_CONFIG", path);
    }
    let cfg = AnalyzerConfig::load()?;
    log::info!("configuration: {:?}", cfg);

    let pipeline = Arc::new(Pipeline::from_config(&cfg)?);
    let api_handle = ApiServer::new(ApiConfig::from(&cfg.api), pipeline.clone()).spawn()?;
    if let Some(path) = &api_handle.token_path {
        log::info!("analysis api capability token written to {}", path.display());
    } else {
        log::warn!(
            "analysis api capability token (handle securely): {}",
            api_handle.token
        );
    }

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    log::info!("analyzerd running. writing to {}", cfg.db_path);
    loop {
        match rx.recv_timeout(PURGE_INTERVAL) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                match pipeline.store().purge_expired(now_s()?) {
                    Ok(0) => {}
                    Ok(removed) => log::info!("purged {} expired analyses", removed),
                    Err(err) => log::error!("retention purge failed: {}", err),
                }
            }
        }
    }

    log::info!("shutdown signal received, stopping API server...");
    api_handle.stop()?;
    Ok(())
}
