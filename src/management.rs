//! Management API served on its own listener.
//!
//! A small HTTP surface for steering a running instance: inspect and
//! upsert response templates, read liveness and store statistics, and
//! reconfigure delays without a restart. Replies are never delayed,
//! whatever the delay configuration says, so the API stays usable
//! while slow responses are being simulated.

use crate::delay::DelayConfig;
use crate::loader;
use crate::protocols::http::{self, HttpRequest, ParseResult};
use crate::store::{Protocol, ResponseStore};
use bytes::{Buf, Bytes, BytesMut};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const DEFAULT_PERSIST_STAGE: &str = "stage4";

/// Shared state behind the management listener.
pub struct ManagementApi {
    store: Arc<ResponseStore>,
    delays: Arc<DelayConfig>,
    response_dir: PathBuf,
    started: Instant,
}

impl ManagementApi {
    pub fn new(
        store: Arc<ResponseStore>,
        delays: Arc<DelayConfig>,
        response_dir: PathBuf,
    ) -> Arc<Self> {
        Arc::new(ManagementApi {
            store,
            delays,
            response_dir,
            started: Instant::now(),
        })
    }

    /// Route one request to its handler and serialize the response.
    pub fn handle(&self, request: &HttpRequest) -> Bytes {
        debug!(method = %request.method, path = %request.path, "Management request");
        match (request.method.as_str(), request.path_only()) {
            ("GET", "/api/response") => self.get_response(request),
            ("POST", "/api/response") => self.post_response(request),
            ("GET", "/api/status") => self.status(),
            ("GET", "/api/stats") => self.stats(),
            ("GET", "/api/delay") => self.get_delay(request),
            ("POST", "/api/delay") => self.post_delay(request),
            (_, path) => error_response(404, format!("Unknown endpoint: {}", path)),
        }
    }

    fn get_response(&self, request: &HttpRequest) -> Bytes {
        let params = request.query_params();
        // without a protocol the endpoint reports the store's shape
        let Some(protocol_tag) = params.get("protocol") else {
            return self.stats();
        };
        let Some(protocol) = Protocol::from_tag(protocol_tag) else {
            return error_response(400, format!("Unknown protocol: {}", protocol_tag));
        };

        let Some(operation) = params.get("operation") else {
            let operations = self.store.snapshot(protocol);
            return json_response(
                200,
                "OK",
                &json!({
                    "protocol": protocol.tag(),
                    "count": operations.len(),
                    "operations": operations,
                }),
            );
        };

        match self.store.get(protocol, operation) {
            Some(content) => http::encode_response(
                200,
                "OK",
                protocol.content_type(),
                content.as_bytes(),
            ),
            None => error_response(
                404,
                format!("No response template found for operation: {}", operation),
            ),
        }
    }

    fn post_response(&self, request: &HttpRequest) -> Bytes {
        let body: Value = match serde_json::from_slice(&request.body) {
            Ok(body) => body,
            Err(e) => return error_response(400, format!("Invalid JSON body: {}", e)),
        };

        let Some(protocol_tag) = body.get("protocol").and_then(Value::as_str) else {
            return error_response(400, "Missing field: protocol".to_string());
        };
        let Some(operation) = body.get("operation").and_then(Value::as_str) else {
            return error_response(400, "Missing field: operation".to_string());
        };
        let Some(content) = body.get("content").and_then(Value::as_str) else {
            return error_response(400, "Missing field: content".to_string());
        };
        let Some(protocol) = Protocol::from_tag(protocol_tag) else {
            return error_response(400, format!("Unknown protocol: {}", protocol_tag));
        };

        self.store.put(protocol, operation, content.to_string());
        info!(%protocol, operation, "Template upserted via management API");

        let mut persisted_to = None;
        if body.get("persist").and_then(Value::as_bool).unwrap_or(false) {
            let stage = body
                .get("stage")
                .and_then(Value::as_str)
                .unwrap_or(DEFAULT_PERSIST_STAGE);
            if !loader::STAGES.contains(&stage) {
                return error_response(400, format!("Unknown stage: {}", stage));
            }
            match loader::save_template(&self.response_dir, stage, protocol, operation, content) {
                Ok(path) => persisted_to = Some(path.display().to_string()),
                Err(e) => {
                    warn!(error = %e, "Failed to persist template");
                    return error_response(500, format!("Failed to persist template: {}", e));
                }
            }
        }

        json_response(
            200,
            "OK",
            &json!({
                "result": "ok",
                "protocol": protocol.tag(),
                "operation": operation,
                "persisted_to": persisted_to,
            }),
        )
    }

    fn status(&self) -> Bytes {
        json_response(
            200,
            "OK",
            &json!({
                "status": "UP",
                "timestamp": chrono::Local::now().to_rfc3339(),
                "uptime_ms": self.started.elapsed().as_millis() as u64,
            }),
        )
    }

    fn stats(&self) -> Bytes {
        let stats = self.store.stats();
        let mut protocols = serde_json::Map::new();
        for (protocol, count) in stats.per_protocol {
            protocols.insert(protocol.tag().to_string(), json!(count));
        }
        json_response(
            200,
            "OK",
            &json!({
                "total_templates": stats.total,
                "protocols": protocols,
            }),
        )
    }

    fn delay_snapshot(&self) -> Bytes {
        let snapshot = self.delays.snapshot();
        match serde_json::to_value(&snapshot) {
            Ok(value) => json_response(200, "OK", &value),
            Err(e) => error_response(500, format!("Failed to serialize snapshot: {}", e)),
        }
    }

    fn get_delay(&self, request: &HttpRequest) -> Bytes {
        let params = request.query_params();
        if params.is_empty() {
            return self.delay_snapshot();
        }

        // query-parameter form: ?enable=..&min=..&max=..[&port=..]
        let enable_raw = params.get("enable").or_else(|| params.get("enabled"));
        let enabled = match enable_raw.map(|v| v.parse::<bool>()) {
            Some(Ok(enabled)) => Some(enabled),
            Some(Err(_)) => {
                return error_response(400, "Bad query parameter: enable".to_string());
            }
            None => None,
        };
        let min = match parse_u64_param(&params, "min") {
            Ok(min) => min,
            Err(response) => return response,
        };
        let max = match parse_u64_param(&params, "max") {
            Ok(max) => max,
            Err(response) => return response,
        };

        if let Some(port_raw) = params.get("port") {
            let Ok(port) = port_raw.parse::<u16>() else {
                return error_response(400, format!("Bad query parameter: port={}", port_raw));
            };
            let enabled = enabled.unwrap_or(true);
            if !enabled {
                self.delays.remove_port(port);
            } else if let Err(e) =
                self.delays
                    .set_port(port, true, min.unwrap_or(0), max.unwrap_or(0))
            {
                return error_response(400, e.to_string());
            }
        } else {
            if let Some(enabled) = enabled {
                self.delays.set_global_enabled(enabled);
            }
            if let (Some(min), Some(max)) = (min, max) {
                if let Err(e) = self.delays.set_global_range(min, max) {
                    return error_response(400, e.to_string());
                }
            }
        }

        // answer with the configuration as applied
        self.delay_snapshot()
    }

    fn post_delay(&self, request: &HttpRequest) -> Bytes {
        let body: Value = match serde_json::from_slice(&request.body) {
            Ok(body) => body,
            Err(e) => return error_response(400, format!("Invalid JSON body: {}", e)),
        };
        match self.delays.apply_json(&body) {
            Ok(()) => self.delay_snapshot(),
            Err(e) => error_response(400, e.to_string()),
        }
    }

    /// Serve one management connection. Responses bypass the delay
    /// machinery entirely.
    pub async fn handle_connection(
        self: Arc<Self>,
        mut stream: TcpStream,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut buf = BytesMut::with_capacity(8 * 1024);

        loop {
            match http::parse_request(&buf) {
                ParseResult::Complete(request, consumed) => {
                    buf.advance(consumed);
                    let response = self.handle(&request);
                    if stream.write_all(&response).await.is_err() {
                        return;
                    }
                    continue;
                }
                ParseResult::Incomplete => {}
                ParseResult::Error(e) => {
                    warn!(error = %e, "Unparseable management request");
                    let _ = stream.write_all(&error_response(400, e)).await;
                    return;
                }
            }

            let read = tokio::select! {
                read = stream.read_buf(&mut buf) => read,
                _ = shutdown.recv() => return,
            };
            match read {
                Ok(0) => return,
                Ok(_) => {}
                Err(_) => return,
            }
        }
    }
}

fn parse_u64_param(
    params: &std::collections::HashMap<String, String>,
    name: &str,
) -> Result<Option<u64>, Bytes> {
    match params.get(name) {
        Some(raw) => raw.parse::<u64>().map(Some).map_err(|_| {
            error_response(400, format!("Bad query parameter: {}={}", name, raw))
        }),
        None => Ok(None),
    }
}

fn json_response(status: u16, reason: &str, body: &Value) -> Bytes {
    http::encode_response(status, reason, "application/json", body.to_string().as_bytes())
}

fn error_response(status: u16, message: String) -> Bytes {
    let reason = match status {
        400 => "Bad Request",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Error",
    };
    json_response(status, reason, &json!({"error": message, "status": status}))
}
