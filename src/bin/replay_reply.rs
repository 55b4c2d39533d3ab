//! replay_reply - validate and fuse a saved model reply offline.
//!
//! Useful when tuning the prompt: capture a reply once, then replay it
//! against the detections it was prompted with.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;

use equipment_risk::equipment::is_percentage;
use equipment_risk::{analyze_reply, build_prompt, DetectedObject, DEFAULT_FREEFORM_CONFIDENCE};

#[derive(Parser, Debug)]
#[command(author, version, about = "Replay a saved vision model reply")]
struct Args {
    /// Saved model reply text.
    #[arg(long, required_unless_present = "print_prompt")]
    reply: Option<PathBuf>,

    /// Detections as a JSON array of {label, confidence, bbox}.
    #[arg(long)]
    detections: Option<PathBuf>,

    /// Print the prompt for the detections and exit.
    #[arg(long)]
    print_prompt: bool,

    /// Confidence for model-asserted geometry.
    #[arg(
        long,
        env = "ANALYZER_FREEFORM_CONFIDENCE",
        default_value_t = DEFAULT_FREEFORM_CONFIDENCE,
        value_parser = parse_percentage
    )]
    freeform_confidence: f64,
}

fn parse_percentage(raw: &str) -> Result<f64, String> {
    let value: f64 = raw.parse().map_err(|e| format!("{}", e))?;
    if !is_percentage(value) {
        return Err(format!("{} is outside 0..=100", value));
    }
    Ok(value)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let objects: Vec<DetectedObject> = match &args.detections {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| anyhow!("failed to read {}: {}", path.display(), e))?;
            serde_json::from_str(&raw)
                .map_err(|e| anyhow!("invalid detections file {}: {}", path.display(), e))?
        }
        None => Vec::new(),
    };
    for (index, object) in objects.iter().enumerate() {
        object
            .check()
            .map_err(|e| anyhow!("detection {} rejected: {}", index, e))?;
    }

    if args.print_prompt {
        println!("{}", build_prompt(&objects));
        return Ok(());
    }

    let path = args
        .reply
        .as_ref()
        .ok_or_else(|| anyhow!("--reply is required"))?;
    let reply = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read {}: {}", path.display(), e))?;
    let analysis = analyze_reply(&objects, &reply, args.freeform_confidence);

    for warning in &analysis.validation_warnings {
        eprintln!("validation: {}", warning);
    }
    for warning in &analysis.fusion_warnings {
        eprintln!("fusion: {}", warning);
    }
    println!("{}", serde_json::to_string_pretty(&analysis.result)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freeform_confidence_must_be_a_percentage() {
        assert_eq!(parse_percentage("40"), Ok(40.0));
        assert_eq!(parse_percentage("100"), Ok(100.0));
        assert!(parse_percentage("150").is_err());
        assert!(parse_percentage("-5").is_err());
        assert!(parse_percentage("NaN").is_err());
        assert!(parse_percentage("high").is_err());
    }

    #[test]
    fn out_of_range_detections_are_rejected_on_load() {
        let raw = r#"[{"label": "Electronics", "confidence": 92.0,
                       "bbox": {"x": 10, "y": 10, "width": 150, "height": 40}}]"#;
        let objects: Vec<DetectedObject> = serde_json::from_str(raw).unwrap();
        assert!(objects[0].check().is_err());
    }
}
