use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use equipment_risk::config::AnalyzerConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "ANALYZER_CONFIG",
        "ANALYZER_DB_PATH",
        "ANALYZER_API_ADDR",
        "ANALYZER_API_TOKEN_PATH",
        "ANALYZER_IMAGES_URL",
        "ANALYZER_DETECTOR_URL",
        "ANALYZER_MODEL_URL",
        "ANALYZER_MODEL_ID",
        "ANALYZER_MODEL_API_KEY",
        "ANALYZER_RETENTION_SECS",
        "ANALYZER_FREEFORM_CONFIDENCE",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn defaults_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = AnalyzerConfig::load().expect("load defaults");
    assert_eq!(cfg.db_path, "analysis.db");
    assert_eq!(cfg.api.addr, "127.0.0.1:8787");
    assert_eq!(cfg.api.max_concurrent, 4);
    assert_eq!(cfg.retention, Duration::from_secs(259_200));
    assert_eq!(cfg.detector.url, "none://");
    assert_eq!(cfg.detector.min_confidence, 70.0);
    assert_eq!(cfg.detector.max_labels, 50);
    assert_eq!(cfg.detector.timeout, Duration::from_secs(15));
    assert_eq!(cfg.model.model_id, "anthropic.claude-sonnet-4-5");
    assert_eq!(cfg.model.max_tokens, 2000);
    assert_eq!(cfg.model.timeout, Duration::from_secs(60));
    assert_eq!(cfg.freeform_confidence, 50.0);
}

#[test]
fn loads_json_config_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "db_path": "prod.db",
        "freeform_confidence": 40,
        "api": {"addr": "127.0.0.1:9100", "token_path": "/run/analyzer/api.token", "max_concurrent": 8},
        "images": {"url": "https://images.example.test/uploads/", "timeout_secs": 10},
        "detector": {"url": "http://127.0.0.1:9200/detect", "min_confidence": 80, "max_labels": 20},
        "model": {"url": "http://127.0.0.1:9300/invoke", "model_id": "vision-small", "max_tokens": 1000},
        "retention": {"seconds": 3600}
    }"#;
    file.write_all(json.as_bytes()).expect("write config");

    std::env::set_var("ANALYZER_CONFIG", file.path());
    std::env::set_var("ANALYZER_MODEL_ID", "vision-large");
    std::env::set_var("ANALYZER_MODEL_API_KEY", "key-123");
    std::env::set_var("ANALYZER_RETENTION_SECS", "86400");

    let cfg = AnalyzerConfig::load().expect("load config");
    assert_eq!(cfg.db_path, "prod.db");
    assert_eq!(cfg.freeform_confidence, 40.0);
    assert_eq!(cfg.api.addr, "127.0.0.1:9100");
    assert_eq!(
        cfg.api.token_path,
        Some(PathBuf::from("/run/analyzer/api.token"))
    );
    assert_eq!(cfg.api.max_concurrent, 8);
    assert_eq!(cfg.images.url, "https://images.example.test/uploads/");
    assert_eq!(cfg.images.timeout, Duration::from_secs(10));
    assert_eq!(cfg.detector.url, "http://127.0.0.1:9200/detect");
    assert_eq!(cfg.detector.min_confidence, 80.0);
    assert_eq!(cfg.detector.max_labels, 20);
    assert_eq!(cfg.model.model_id, "vision-large");
    assert_eq!(cfg.model.api_key.as_deref(), Some("key-123"));
    assert_eq!(cfg.model.max_tokens, 1000);
    assert_eq!(cfg.retention, Duration::from_secs(86_400));

    clear_env();
}

#[test]
fn loads_toml_config() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    let toml = r#"
db_path = "toml.db"

[detector]
url = "https://detector.example.test/labels"
timeout_secs = 5

[retention]
seconds = 7200
"#;
    file.write_all(toml.as_bytes()).expect("write config");
    std::env::set_var("ANALYZER_CONFIG", file.path());
    std::env::set_var("ANALYZER_FREEFORM_CONFIDENCE", "25.5");

    let cfg = AnalyzerConfig::load().expect("load config");
    assert_eq!(cfg.db_path, "toml.db");
    assert_eq!(cfg.detector.url, "https://detector.example.test/labels");
    assert_eq!(cfg.detector.timeout, Duration::from_secs(5));
    assert_eq!(cfg.retention, Duration::from_secs(7200));
    assert_eq!(cfg.freeform_confidence, 25.5);

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();

    for (key, value) in [
        ("ANALYZER_RETENTION_SECS", "0"),
        ("ANALYZER_RETENTION_SECS", "three days"),
        ("ANALYZER_FREEFORM_CONFIDENCE", "101"),
        ("ANALYZER_DETECTOR_URL", "ftp://detector"),
        ("ANALYZER_MODEL_URL", "not a url"),
        ("ANALYZER_API_ADDR", "localhost"),
    ] {
        clear_env();
        std::env::set_var(key, value);
        assert!(
            AnalyzerConfig::load().is_err(),
            "{key}={value} should be rejected"
        );
    }

    clear_env();
    let mut file = NamedTempFile::new().expect("temp config");
    file.write_all(br#"{"unknown_section": {}}"#)
        .expect("write config");
    std::env::set_var("ANALYZER_CONFIG", file.path());
    assert!(AnalyzerConfig::load().is_err());

    clear_env();
}
