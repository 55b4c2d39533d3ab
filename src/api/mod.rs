//! Loopback HTTP surface.
//!
//! Routes:
//! - `GET /health`
//! - `POST /analyze` (upload event body)
//! - `POST /upload` (raw image body; analysed after the key is returned)
//! - `GET /analysis-status?key=<imageKey>`
//!
//! Everything but `/health` requires the bearer capability token minted at
//! spawn time.

use crate::config::ApiSettings;
use crate::handler::{handle_event, handle_key};
use crate::ingest::{SourceImage, MAX_IMAGE_BYTES};
use crate::pipeline::Pipeline;
use anyhow::{anyhow, Result};
use rand::RngCore;
use serde_json::json;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use url::Url;

const MAX_HEADER_BYTES: usize = 8192;
const MAX_BODY_BYTES: usize = 64 * 1024;
const READ_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    pub token_path: Option<PathBuf>,
    pub max_concurrent: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8787".to_string(),
            token_path: None,
            max_concurrent: 4,
        }
    }
}

impl From<&ApiSettings> for ApiConfig {
    fn from(settings: &ApiSettings) -> Self {
        Self {
            addr: settings.addr.clone(),
            token_path: settings.token_path.clone(),
            max_concurrent: settings.max_concurrent,
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    pub token: String,
    pub token_path: Option<PathBuf>,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

/// Process-lifetime bearer token.
#[derive(Clone, Debug)]
pub struct CapabilityToken {
    token: [u8; 32],
}

impl CapabilityToken {
    pub fn generate() -> Self {
        let mut token = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut token);
        Self { token }
    }

    pub fn token_hex(&self) -> String {
        hex::encode(self.token)
    }

    pub fn validate(&self, presented: &str) -> Result<()> {
        let presented = parse_hex32(presented)?;
        if presented != self.token {
            return Err(anyhow!("capability token invalid"));
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    pipeline: Arc<Pipeline>,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, pipeline: Arc<Pipeline>) -> Self {
        Self { cfg, pipeline }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        if configured_addr.ip().is_loopback() && !addr.ip().is_loopback() {
            return Err(anyhow!(
                "api configured for loopback address '{}', but bound to non-loopback address '{}'",
                configured_addr,
                addr
            ));
        }
        listener.set_nonblocking(true)?;

        let token = CapabilityToken::generate();
        let token_hex = token.token_hex();
        if let Some(path) = &self.cfg.token_path {
            write_token_file(path, &token_hex)?;
        }

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let token_path = self.cfg.token_path.clone();
        let state = Arc::new(ServerState {
            pipeline: self.pipeline,
            token,
            in_flight: AtomicUsize::new(0),
            max_concurrent: self.cfg.max_concurrent.max(1),
        });
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, state, shutdown_thread) {
                log::error!("analysis api stopped: {}", err);
            }
        });

        log::info!("analysis api listening on {}", addr);
        Ok(ApiHandle {
            addr,
            token: token_hex,
            token_path,
            shutdown,
            join: Some(join),
        })
    }
}

struct ServerState {
    pipeline: Arc<Pipeline>,
    token: CapabilityToken,
    in_flight: AtomicUsize,
    max_concurrent: usize,
}

/// Releases an in-flight slot when the request thread finishes.
struct InFlightSlot {
    state: Arc<ServerState>,
}

impl InFlightSlot {
    fn acquire(state: &Arc<ServerState>) -> Option<Self> {
        let mut current = state.in_flight.load(Ordering::SeqCst);
        loop {
            if current >= state.max_concurrent {
                return None;
            }
            match state.in_flight.compare_exchange(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => {
                    return Some(Self {
                        state: state.clone(),
                    })
                }
                Err(actual) => current = actual,
            }
        }
    }
}

impl Drop for InFlightSlot {
    fn drop(&mut self) {
        self.state.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

fn run_api(listener: TcpListener, state: Arc<ServerState>, shutdown: Arc<AtomicBool>) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((mut stream, _)) => {
                stream.set_nonblocking(false)?;
                let Some(slot) = InFlightSlot::acquire(&state) else {
                    log::warn!("analysis api at capacity; rejecting request");
                    if let Err(err) = write_json_response(&mut stream, 503, r#"{"error":"busy"}"#) {
                        log::warn!("failed to write busy response: {}", err);
                    }
                    continue;
                };
                std::thread::spawn(move || {
                    if let Err(err) = handle_connection(stream, &slot.state) {
                        log::warn!("analysis api request rejected: {}", err);
                    }
                    drop(slot);
                });
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, state: &ServerState) -> Result<()> {
    let peer = stream.peer_addr()?;
    let local = stream.local_addr()?;
    if local.ip().is_loopback() && !peer.ip().is_loopback() {
        write_json_response(&mut stream, 403, r#"{"error":"forbidden"}"#)?;
        return Ok(());
    }

    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            write_json_response(&mut stream, 400, r#"{"error":"bad_request"}"#)?;
            return Err(err);
        }
    };

    let expected_method = match request.path.as_str() {
        "/health" => "GET",
        "/analyze" => "POST",
        "/upload" => "POST",
        "/analysis-status" => "GET",
        _ => {
            write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#)?;
            return Ok(());
        }
    };
    if request.method != expected_method {
        write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#)?;
        return Ok(());
    }
    if request.path == "/health" {
        write_json_response(&mut stream, 200, r#"{"status":"ok"}"#)?;
        return Ok(());
    }

    if request.query_param("token").is_some() {
        write_json_response(
            &mut stream,
            400,
            r#"{"error":"token_query_param_not_allowed"}"#,
        )?;
        return Ok(());
    }
    let token = match request.bearer_token() {
        Some(token) => token,
        None => {
            write_json_response(&mut stream, 401, r#"{"error":"missing_token"}"#)?;
            return Ok(());
        }
    };
    if let Err(err) = state.token.validate(&token) {
        write_json_response(&mut stream, 401, r#"{"error":"invalid_token"}"#)?;
        return Err(err);
    }

    if request.path == "/analyze" {
        let response = handle_event(&state.pipeline, &request.body);
        let payload = serde_json::to_vec(&response.body)?;
        write_response(&mut stream, response.status_code, "application/json", &payload)?;
        return Ok(());
    }

    if request.path == "/upload" {
        return handle_upload(stream, state, request.body);
    }

    let Some(image_key) = request.query_param("key").filter(|key| !key.is_empty()) else {
        write_json_response(&mut stream, 400, r#"{"error":"missing_key"}"#)?;
        return Ok(());
    };
    let stored = match state.pipeline.store().get(&image_key) {
        Ok(stored) => stored,
        Err(err) => {
            write_json_response(&mut stream, 500, r#"{"error":"store_unavailable"}"#)?;
            return Err(err);
        }
    };
    let payload = match stored {
        Some(stored) => json!({
            "imageKey": stored.image_key,
            "equipment": stored.result.equipment,
            "timestamp": stored.created_at,
            "status": stored.status,
        }),
        None => json!({ "status": "processing" }),
    };
    write_response(
        &mut stream,
        200,
        "application/json",
        &serde_json::to_vec(&payload)?,
    )?;
    Ok(())
}

fn handle_upload(mut stream: TcpStream, state: &ServerState, body: Vec<u8>) -> Result<()> {
    let image = match SourceImage::from_bytes("upload", body) {
        Ok(image) => image,
        Err(err) => {
            log::warn!("rejected upload: {}", err);
            write_json_response(&mut stream, 400, r#"{"error":"unsupported_image"}"#)?;
            return Ok(());
        }
    };
    let key = match state.pipeline.upload(image) {
        Ok(key) => key,
        Err(err) => {
            let kind = err.kind();
            let payload = json!({ "error": kind.user_message() });
            write_response(
                &mut stream,
                kind.status_code(),
                "application/json",
                &serde_json::to_vec(&payload)?,
            )?;
            return Ok(());
        }
    };

    let payload = json!({ "key": key, "status": "processing" });
    write_response(
        &mut stream,
        200,
        "application/json",
        &serde_json::to_vec(&payload)?,
    )?;
    drop(stream);

    // Analysis runs after the connection closes. The caller polls
    // /analysis-status and the in-flight slot stays held until it finishes.
    let response = handle_key(&state.pipeline, &key);
    log::info!("upload {} analysed: status {}", key, response.status_code);
    Ok(())
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(READ_TIMEOUT))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    let header_end = loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before end of headers"));
        }
        data.extend_from_slice(&buf[..n]);
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        if data.len() > MAX_HEADER_BYTES {
            return Err(anyhow!("request headers too large"));
        }
    };

    let text = String::from_utf8_lossy(&data[..header_end]).into_owned();
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }

    let url = Url::parse("http://localhost")?.join(raw_path)?;
    let body_limit = if url.path() == "/upload" {
        MAX_IMAGE_BYTES
    } else {
        MAX_BODY_BYTES
    };
    let content_length = match headers.get("content-length") {
        Some(value) => value
            .parse::<usize>()
            .map_err(|_| anyhow!("invalid content-length"))?,
        None => 0,
    };
    if content_length > body_limit {
        return Err(anyhow!("request body too large"));
    }
    let mut body = data[header_end + 4..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before end of body"));
        }
        body.extend_from_slice(&buf[..n]);
    }
    body.truncate(content_length);

    Ok(HttpRequest {
        method: method.to_string(),
        path: url.path().to_string(),
        query: url.query_pairs().into_owned().collect(),
        headers,
        body,
    })
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "application/json", body.as_bytes())
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        401 => "HTTP/1.1 401 Unauthorized",
        403 => "HTTP/1.1 403 Forbidden",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        503 => "HTTP/1.1 503 Service Unavailable",
        504 => "HTTP/1.1 504 Gateway Timeout",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    query: Vec<(String, String)>,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

impl HttpRequest {
    fn bearer_token(&self) -> Option<String> {
        if let Some(value) = self.headers.get("authorization") {
            let parts: Vec<&str> = value.split_whitespace().collect();
            if parts.len() == 2 && parts[0].eq_ignore_ascii_case("bearer") {
                return Some(parts[1].to_string());
            }
        }
        None
    }

    fn query_param(&self, name: &str) -> Option<String> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
    }
}

fn write_token_file(path: &Path, token: &str) -> Result<()> {
    std::fs::write(path, format!("{token}\n"))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(path, perms)?;
    }
    Ok(())
}

fn parse_hex32(value: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(value)?;
    if bytes.len() != 32 {
        return Err(anyhow!("token must be 32 bytes"));
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}
