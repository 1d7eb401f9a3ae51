//! Ampersand key/value payloads on the binary framed ports.
//!
//! Requests look like `&opcode=406&ctn=01012345678&transaction_id=7`.
//! The opcode selects the response template; for a couple of reserved
//! opcodes the subscriber number participates in the lookup key so
//! different numbers can be staged with different answers. The reply
//! always leads with the echoed `transaction_id` so callers can match
//! responses on a pipelined connection.

use crate::delay::DelayConfig;
use crate::store::{Protocol, ResponseStore};
use crate::template;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Opcodes whose lookup key is namespaced by the `ctn` field.
const RESERVED_OPCODES: [&str; 2] = ["406", "435"];

const DEFAULT_TRANSACTION_ID: &str = "1";

/// Split a `&k=v&k2=v2` payload into fields.
///
/// A leading `&` or `/` is tolerated, a token without `=` becomes an
/// empty-valued field, and the last occurrence of a repeated key wins.
pub fn parse_fields(body: &str) -> HashMap<String, String> {
    let trimmed = body.trim_start_matches(['&', '/']);
    let mut fields = HashMap::new();
    for token in trimmed.split('&') {
        if token.is_empty() {
            continue;
        }
        match token.split_once('=') {
            Some((key, value)) => fields.insert(key.to_string(), value.to_string()),
            None => fields.insert(token.to_string(), String::new()),
        };
    }
    fields
}

/// Build the store lookup key from the parsed fields.
///
/// Plain opcodes map to `OPCODE_<op>`; reserved opcodes with a `ctn`
/// map to `OPCODE_<op>_<ctn>`. Returns `None` when `opcode` is absent
/// or empty.
pub fn response_key(fields: &HashMap<String, String>) -> Option<String> {
    let opcode = fields.get("opcode").filter(|op| !op.is_empty())?;
    if RESERVED_OPCODES.contains(&opcode.as_str()) {
        if let Some(ctn) = fields.get("ctn").filter(|c| !c.is_empty()) {
            return Some(format!("OPCODE_{}_{}", opcode, ctn));
        }
    }
    Some(format!("OPCODE_{}", opcode))
}

fn transaction_id(fields: &HashMap<String, String>) -> &str {
    fields
        .get("transaction_id")
        .filter(|id| !id.is_empty())
        .map(String::as_str)
        .unwrap_or(DEFAULT_TRANSACTION_ID)
}

fn error_body(transaction_id: &str, message: &str) -> String {
    format!(
        "transaction_id={}&response=f&code=999&RT=1&RT_MSG={}",
        transaction_id, message
    )
}

/// Produce the reply body for one decoded frame.
pub fn respond(store: &ResponseStore, body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    let fields = parse_fields(&text);
    let txid = transaction_id(&fields);

    let Some(key) = response_key(&fields) else {
        warn!("Request without opcode field");
        return error_body(txid, "Missing opcode");
    };

    let Some(tmpl) = store.get(Protocol::KeyValue, &key) else {
        info!(key, "No response template for opcode");
        return error_body(txid, &format!("No response template found: {}", key));
    };

    let mut vars = template::standard_vars();
    for (k, v) in &fields {
        vars.insert(k.clone(), v.clone());
    }
    let rendered = template::render(&tmpl, &vars);
    debug!(key, txid, "Key/value reply rendered");
    format!("transaction_id={}&{}", txid, rendered)
}

/// Serve one framed key/value connection.
pub async fn handle_connection(
    stream: TcpStream,
    store: Arc<ResponseStore>,
    delays: Arc<DelayConfig>,
    port: u16,
    shutdown: broadcast::Receiver<()>,
) {
    super::drive_framed(stream, delays, port, shutdown, move |body| {
        respond(&store, body)
    })
    .await;
}
