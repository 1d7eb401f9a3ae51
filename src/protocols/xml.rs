//! XML payloads on the binary framed ports.
//!
//! The root element name is the operation: `<getVasOfAllSubscpn ...>`
//! selects the `getVasOfAllSubscpn` template. Documents may carry an
//! XML prolog, comments, or a DOCTYPE ahead of the root element; none
//! of those participate in the lookup.

use crate::delay::DelayConfig;
use crate::store::{Protocol, ResponseStore};
use crate::template;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Pull the root element name out of an XML document.
///
/// Returns `None` when no element opens the document (after skipping
/// prolog, comments, and DOCTYPE). Namespaces are kept as written, so
/// `<soap:Envelope>` yields `soap:Envelope`.
pub fn extract_root_tag(document: &str) -> Option<String> {
    let mut rest = document;
    loop {
        let start = rest.find('<')?;
        let after = &rest[start + 1..];

        // skip prolog / processing instructions
        if let Some(tail) = after.strip_prefix('?') {
            let end = tail.find("?>")?;
            rest = &tail[end + 2..];
            continue;
        }
        // skip comments
        if let Some(tail) = after.strip_prefix("!--") {
            let end = tail.find("-->")?;
            rest = &tail[end + 3..];
            continue;
        }
        // skip DOCTYPE and other declarations
        if let Some(tail) = after.strip_prefix('!') {
            let end = tail.find('>')?;
            rest = &tail[end + 1..];
            continue;
        }
        // a closing tag before any opening tag is not a document
        if after.starts_with('/') {
            return None;
        }

        let name_end = after
            .find(|c: char| c.is_whitespace() || c == '>')
            .unwrap_or(after.len());
        let name = after[..name_end].trim_end_matches('/');
        if name.is_empty() {
            return None;
        }
        return Some(name.to_string());
    }
}

fn error_body(message: &str) -> String {
    format!("<error><message>{}</message></error>", message)
}

/// Produce the reply body for one decoded frame.
pub fn respond(store: &ResponseStore, body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);

    let Some(operation) = extract_root_tag(&text) else {
        warn!("Payload without a root element");
        return error_body("Unable to determine operation from request");
    };

    let Some(tmpl) = store.get(Protocol::Xml, &operation) else {
        info!(operation, "No response template for operation");
        return error_body(&format!(
            "No response template found for operation: {}",
            operation
        ));
    };

    debug!(operation, "XML reply rendered");
    template::render(&tmpl, &template::standard_vars())
}

/// Serve one framed XML connection.
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
