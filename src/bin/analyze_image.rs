//! analyze_image - analyse one stored image and print the handler response.

use anyhow::Result;
use clap::Parser;

use equipment_risk::{handle_key, AnalyzerConfig, Pipeline};

#[derive(Parser, Debug)]
#[command(author, version, about = "Analyse one equipment photo")]
struct Args {
    /// Image key, relative to the configured image source.
    #[arg(long)]
    key: String,

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
    let pipeline = Pipeline::from_config(&cfg)?;

    let response = handle_key(&pipeline, &args.key);
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "statusCode": response.status_code,
            "body": response.body,
        }))?
    );
    if response.status_code != 200 {
        std::process::exit(1);
    }
    Ok(())
}
