//! HTTP/1.1 request handling for the plain and TLS web ports.
//!
//! A minimal hand-rolled codec: enough of HTTP/1.1 to read
//! `Content-Length`-framed requests, keep connections alive, and
//! write responses. The operation comes from the last path segment
//! and the payload family from the `Content-Type` header, with SOAP
//! taking precedence over plain XML and JSON as the fallback.

use crate::delay::DelayConfig;
use crate::reply::ReplyQueue;
use crate::store::{Protocol, ResponseStore};
use crate::template;
use bytes::{Buf, Bytes, BytesMut};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const READ_BUFFER_SIZE: usize = 16 * 1024;
const MAX_HEAD_SIZE: usize = 32 * 1024;

/// One parsed request. Header names are lowercased at parse time.
#[derive(Debug)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Path with any query string removed.
    pub fn path_only(&self) -> &str {
        self.path.split('?').next().unwrap_or(&self.path)
    }

    /// Decoded query parameters; last duplicate wins.
    pub fn query_params(&self) -> HashMap<String, String> {
        let Some((_, query)) = self.path.split_once('?') else {
            return HashMap::new();
        };
        query
            .split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| match pair.split_once('=') {
                Some((k, v)) => (k.to_string(), v.to_string()),
                None => (pair.to_string(), String::new()),
            })
            .collect()
    }

    fn wants_close(&self) -> bool {
        self.header("connection")
            .map(|v| v.eq_ignore_ascii_case("close"))
            .unwrap_or(false)
    }
}

/// Result of one parse attempt against the connection buffer.
#[derive(Debug)]
pub enum ParseResult {
    /// A full request plus the total bytes consumed.
    Complete(HttpRequest, usize),
    /// Head or body still arriving; nothing was consumed.
    Incomplete,
    /// Malformed head; the connection must be closed.
    Error(String),
}

/// Try to parse one request from the front of `buf`.
pub fn parse_request(buf: &[u8]) -> ParseResult {
    let Some(head_end) = find_head_end(buf) else {
        if buf.len() > MAX_HEAD_SIZE {
            return ParseResult::Error("Request head too large".to_string());
        }
        return ParseResult::Incomplete;
    };

    let head = match std::str::from_utf8(&buf[..head_end]) {
        Ok(head) => head,
        Err(_) => return ParseResult::Error("Request head is not UTF-8".to_string()),
    };

    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or("");
    let mut parts = request_line.split_ascii_whitespace();
    let (Some(method), Some(path), Some(_version)) = (parts.next(), parts.next(), parts.next())
    else {
        return ParseResult::Error(format!("Malformed request line: {}", request_line));
    };

    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let Some((name, value)) = line.split_once(':') else {
            return ParseResult::Error(format!("Malformed header line: {}", line));
        };
        headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
    }

    let content_length = match headers.get("content-length") {
        Some(value) => match value.parse::<usize>() {
            Ok(len) => len,
            Err(_) => return ParseResult::Error(format!("Bad Content-Length: {}", value)),
        },
        None => 0,
    };

    let body_start = head_end + 4;
    let total = body_start + content_length;
    if buf.len() < total {
        return ParseResult::Incomplete;
    }

    let request = HttpRequest {
        method: method.to_string(),
        path: path.to_string(),
        headers,
        body: Bytes::copy_from_slice(&buf[body_start..total]),
    };
    ParseResult::Complete(request, total)
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Serialize a response with keep-alive framing.
pub fn encode_response(status: u16, reason: &str, content_type: &str, body: &[u8]) -> Bytes {
    let mut out = Vec::with_capacity(128 + body.len());
    out.extend_from_slice(format!("HTTP/1.1 {} {}\r\n", status, reason).as_bytes());
    out.extend_from_slice(format!("Content-Type: {}; charset=UTF-8\r\n", content_type).as_bytes());
    out.extend_from_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());
    out.extend_from_slice(b"Connection: keep-alive\r\n\r\n");
    out.extend_from_slice(body);
    Bytes::from(out)
}

/// Map a `Content-Type` header to a payload family. SOAP wins over
/// XML, XML over JSON, and an absent or unrecognized type means JSON.
pub fn protocol_from_content_type(content_type: Option<&str>) -> Protocol {
    let Some(value) = content_type else {
        return Protocol::Json;
    };
    let lowered = value.to_ascii_lowercase();
    if lowered.contains("soap") {
        Protocol::Soap
    } else if lowered.contains("xml") {
        Protocol::Xml
    } else {
        Protocol::Json
    }
}

/// Operation name from the request path: the last non-empty segment,
/// or `default` for `/`.
pub fn operation_from_path(path: &str) -> &str {
    let path = path.split('?').next().unwrap_or(path);
    path.rsplit('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or("default")
}

fn not_found_body(operation: &str) -> Vec<u8> {
    serde_json::json!({
        "error": format!("No response template found for operation: {}", operation),
        "status": 404,
    })
    .to_string()
    .into_bytes()
}

/// Produce the full wire response for one request.
pub fn respond(store: &ResponseStore, request: &HttpRequest) -> Bytes {
    let protocol = protocol_from_content_type(request.header("content-type"));
    let operation = operation_from_path(&request.path);

    match store.get(protocol, operation) {
        Some(tmpl) => {
            let rendered = template::render(&tmpl, &template::standard_vars());
            debug!(%protocol, operation, "HTTP reply rendered");
            encode_response(200, "OK", protocol.content_type(), rendered.as_bytes())
        }
        None => {
            info!(%protocol, operation, "No response template for operation");
            encode_response(404, "Not Found", "application/json", &not_found_body(operation))
        }
    }
}

/// Serve one HTTP connection with keep-alive. Generic over the stream
/// so the TLS listener can reuse it. A shutdown signal ends the
/// connection at the next read so idle keep-alive peers cannot hold
/// up the drain.
pub async fn handle_connection<S>(
    stream: S,
    store: Arc<ResponseStore>,
    delays: Arc<DelayConfig>,
    port: u16,
    mut shutdown: broadcast::Receiver<()>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut read_half, write_half) = tokio::io::split(stream);
    let queue = ReplyQueue::spawn(write_half);
    let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);

    loop {
        match parse_request(&buf) {
            ParseResult::Complete(request, consumed) => {
                buf.advance(consumed);
                let close = request.wants_close();
                let response = respond(&store, &request);
                let delay = delays.delay_for_port(port);
                if !queue.push(response, delay) {
                    debug!(port, "Writer gone, closing connection");
                    return;
                }
                if close {
                    return;
                }
                continue;
            }
            ParseResult::Incomplete => {}
            ParseResult::Error(e) => {
                warn!(port, error = %e, "Unparseable request, closing connection");
                let body = serde_json::json!({"error": e, "status": 400})
                    .to_string()
                    .into_bytes();
                queue.push_immediate(encode_response(400, "Bad Request", "application/json", &body));
                return;
            }
        }

        let read = tokio::select! {
            read = read_half.read_buf(&mut buf) => read,
            _ = shutdown.recv() => {
                debug!(port, "Shutdown, closing connection");
                return;
            }
        };
        match read {
            Ok(0) => {
                debug!(port, "Connection closed by peer");
                return;
            }
            Ok(_) => {}
            Err(e) => {
                debug!(port, error = %e, "Read failed");
                return;
            }
        }
    }
}
