use anyhow::Result;
use serde_json::Value;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

use equipment_risk::api::{ApiConfig, ApiHandle, ApiServer};
use equipment_risk::{
    FileImageSource, InMemoryResultStore, NoneDetector, Pipeline, PipelineSettings,
    StubVisionModel,
};

const PNG_HEADER: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44, 0x52,
];

const REPLY: &str = r#"{"equipment": [
    {"source": "model", "name": "電源タップ", "bbox": {"x": 70, "y": 80, "width": 10, "height": 10},
     "risk_level": "DANGER", "description": "容量超過の恐れ"}
]}"#;

struct TestApi {
    dir: tempfile::TempDir,
    api_handle: Option<ApiHandle>,
}

impl TestApi {
    fn new() -> Result<Self> {
        let dir = tempdir()?;
        std::fs::write(dir.path().join("photo.png"), PNG_HEADER)?;
        let pipeline = Pipeline::new(
            Arc::new(FileImageSource::new(dir.path())),
            Arc::new(NoneDetector),
            Arc::new(StubVisionModel::replying(REPLY)),
            Arc::new(InMemoryResultStore::new()),
            PipelineSettings {
                freeform_confidence: 50.0,
                retention: Duration::from_secs(600),
            },
        );
        let api_config = ApiConfig {
            addr: "127.0.0.1:0".to_string(),
            token_path: Some(dir.path().join("api.token")),
            ..ApiConfig::default()
        };
        let api_handle = ApiServer::new(api_config, Arc::new(pipeline)).spawn()?;
        Ok(Self {
            dir,
            api_handle: Some(api_handle),
        })
    }

    fn handle(&self) -> &ApiHandle {
        self.api_handle
            .as_ref()
            .expect("test API handle should be initialized")
    }

    fn send(&self, request: &str) -> Result<(String, Value)> {
        self.send_bytes(request.as_bytes())
    }

    fn send_bytes(&self, request: &[u8]) -> Result<(String, Value)> {
        let mut stream = TcpStream::connect(self.handle().addr)?;
        stream.write_all(request)?;
        let mut response = String::new();
        stream.read_to_string(&mut response)?;
        let mut parts = response.splitn(2, "\r\n\r\n");
        let headers = parts.next().unwrap_or("").to_string();
        let body = parts.next().unwrap_or("");
        let body = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(body)?
        };
        Ok((headers, body))
    }

    fn post_event(&self, token: Option<&str>, key: &str) -> Result<(String, Value)> {
        let body = format!(
            r#"{{"Records": [{{"s3": {{"bucket": {{"name": "uploads"}}, "object": {{"key": "{}"}}}}}}]}}"#,
            key
        );
        let auth = token
            .map(|token| format!("Authorization: Bearer {}\r\n", token))
            .unwrap_or_default();
        self.send(&format!(
            "POST /analyze HTTP/1.1\r\nHost: localhost\r\n{}Content-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
            auth,
            body.len(),
            body
        ))
    }

    fn upload(&self, token: Option<&str>, image: &[u8]) -> Result<(String, Value)> {
        let auth = token
            .map(|token| format!("Authorization: Bearer {}\r\n", token))
            .unwrap_or_default();
        let mut request = format!(
            "POST /upload HTTP/1.1\r\nHost: localhost\r\n{}Content-Type: application/octet-stream\r\nContent-Length: {}\r\n\r\n",
            auth,
            image.len()
        )
        .into_bytes();
        request.extend_from_slice(image);
        self.send_bytes(&request)
    }

    fn status(&self, key: &str) -> Result<(String, Value)> {
        self.send(&format!(
            "GET /analysis-status?key={} HTTP/1.1\r\nHost: localhost\r\nAuthorization: Bearer {}\r\n\r\n",
            key,
            self.handle().token
        ))
    }
}

impl Drop for TestApi {
    fn drop(&mut self) {
        if let Some(handle) = self.api_handle.take() {
            handle.stop().expect("failed to stop API server");
        }
    }
}

#[test]
fn health_needs_no_token() -> Result<()> {
    let api = TestApi::new()?;
    let (headers, body) = api.send("GET /health HTTP/1.1\r\nHost: localhost\r\n\r\n")?;
    assert!(headers.contains("200 OK"));
    assert_eq!(body["status"], "ok");
    Ok(())
}

#[test]
fn analyze_requires_valid_token() -> Result<()> {
    let api = TestApi::new()?;
    let (headers, _) = api.post_event(None, "photo.png")?;
    assert!(headers.contains("401 Unauthorized"));

    let (headers, _) = api.post_event(Some(&"ab".repeat(32)), "photo.png")?;
    assert!(headers.contains("401 Unauthorized"));
    Ok(())
}

#[test]
fn token_file_matches_handle() -> Result<()> {
    let api = TestApi::new()?;
    let path = api.handle().token_path.clone().expect("token path");
    let written = std::fs::read_to_string(path)?;
    assert_eq!(written.trim(), api.handle().token);
    Ok(())
}

#[test]
fn analyze_then_poll_status() -> Result<()> {
    let api = TestApi::new()?;

    let (headers, body) = api.status("photo.png")?;
    assert!(headers.contains("200 OK"));
    assert_eq!(body["status"], "processing");

    let token = api.handle().token.clone();
    let (headers, body) = api.post_event(Some(&token), "photo.png")?;
    assert!(headers.contains("200 OK"));
    assert_eq!(body["imageKey"], "photo.png");
    assert_eq!(body["equipmentCount"], 1);

    let (_, body) = api.status("photo.png")?;
    assert_eq!(body["status"], "completed");
    assert_eq!(body["imageKey"], "photo.png");
    assert_eq!(body["equipment"][0]["risk_level"], "DANGER");
    assert_eq!(body["equipment"][0]["confidence"], 50.0);
    assert!(body["timestamp"].is_u64());
    Ok(())
}

#[test]
fn missing_image_maps_to_not_found() -> Result<()> {
    let api = TestApi::new()?;
    let token = api.handle().token.clone();
    let (headers, body) = api.post_event(Some(&token), "absent.png")?;
    assert!(headers.contains("404 Not Found"));
    assert!(body["error"].is_string());
    Ok(())
}

#[test]
fn rejects_unknown_routes_and_methods() -> Result<()> {
    let api = TestApi::new()?;
    let (headers, _) = api.send("GET /events HTTP/1.1\r\nHost: localhost\r\n\r\n")?;
    assert!(headers.contains("404 Not Found"));

    let (headers, _) = api.send("GET /analyze HTTP/1.1\r\nHost: localhost\r\n\r\n")?;
    assert!(headers.contains("405 Method Not Allowed"));

    let (headers, body) = api.send(&format!(
        "GET /analysis-status HTTP/1.1\r\nHost: localhost\r\nAuthorization: Bearer {}\r\n\r\n",
        api.handle().token
    ))?;
    assert!(headers.contains("400 Bad Request"));
    assert_eq!(body["error"], "missing_key");
    Ok(())
}

#[test]
fn upload_stores_image_and_analyses_it() -> Result<()> {
    let api = TestApi::new()?;
    let token = api.handle().token.clone();

    let (headers, body) = api.upload(Some(&token), PNG_HEADER)?;
    assert!(headers.contains("200 OK"));
    assert_eq!(body["status"], "processing");
    let key = body["key"].as_str().expect("upload key").to_string();
    assert!(key.starts_with("uploads/"));
    assert!(key.ends_with(".png"));
    assert_eq!(std::fs::read(api.dir.path().join(&key))?, PNG_HEADER);

    let mut status = Value::Null;
    for _ in 0..50 {
        let (_, body) = api.status(&key)?;
        if body["status"] == "completed" {
            status = body;
            break;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    assert_eq!(status["imageKey"], key.as_str());
    assert_eq!(status["equipment"][0]["name"], "電源タップ");
    Ok(())
}

#[test]
fn upload_rejects_missing_token_and_non_images() -> Result<()> {
    let api = TestApi::new()?;
    let (headers, _) = api.upload(None, PNG_HEADER)?;
    assert!(headers.contains("401 Unauthorized"));

    let token = api.handle().token.clone();
    let (headers, body) = api.upload(Some(&token), b"not an image at all")?;
    assert!(headers.contains("400 Bad Request"));
    assert_eq!(body["error"], "unsupported_image");
    assert!(!api.dir.path().join("uploads").exists());

    let (headers, _) = api.send("GET /upload HTTP/1.1\r\nHost: localhost\r\n\r\n")?;
    assert!(headers.contains("405 Method Not Allowed"));
    Ok(())
}
