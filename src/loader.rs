//! Filesystem seeding for the response store.
//!
//! Templates live in a `<base>/<stage>/<protocol>/` hierarchy, one
//! file per operation, with the file stem as the operation name and
//! the extension fixed by protocol. Stages are loaded in ascending
//! order so a stage2 file overrides a stage1 file for the same key;
//! the store itself is order-agnostic, the override comes entirely
//! from this walk order.

use crate::store::{Protocol, ResponseStore};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Override tiers, lowest priority first.
pub const STAGES: [&str; 4] = ["stage1", "stage2", "stage3", "stage4"];

/// Load every template for one stage/protocol directory.
///
/// A missing directory is created and yields an empty map; files with
/// the wrong extension or blank content are skipped.
pub fn load_all(
    base: &Path,
    stage: &str,
    protocol: Protocol,
) -> std::io::Result<HashMap<String, String>> {
    let dir = directory_path(base, stage, protocol);
    let mut templates = HashMap::new();

    if !dir.exists() {
        fs::create_dir_all(&dir)?;
        debug!(dir = %dir.display(), "Created empty template directory");
        return Ok(templates);
    }

    let extension = protocol.file_extension();
    for entry in fs::read_dir(&dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(operation) = name.strip_suffix(extension) else {
            continue;
        };

        match fs::read_to_string(&path) {
            Ok(content) if !content.trim().is_empty() => {
                debug!(file = %path.display(), operation, "Loaded template file");
                templates.insert(operation.to_string(), content);
            }
            Ok(_) => {
                debug!(file = %path.display(), "Skipping empty template file");
            }
            Err(e) => {
                warn!(file = %path.display(), error = %e, "Failed to read template file");
            }
        }
    }

    Ok(templates)
}

/// Seed the store from the whole hierarchy, ascending stage order.
/// Returns the number of entries loaded (before overrides collapse).
pub fn seed(base: &Path, store: &ResponseStore) -> std::io::Result<usize> {
    let mut loaded = 0;
    for stage in STAGES {
        for protocol in Protocol::ALL {
            let templates = load_all(base, stage, protocol)?;
            let count = templates.len();
            for (operation, content) in templates {
                store.put(protocol, &operation, content);
            }
            if count > 0 {
                debug!(stage, %protocol, count, "Seeded templates");
            }
            loaded += count;
        }
    }
    info!(loaded, "Response store seeded");
    Ok(loaded)
}

/// Write a single template back into the hierarchy, creating parent
/// directories as needed.
pub fn save_template(
    base: &Path,
    stage: &str,
    protocol: Protocol,
    operation: &str,
    content: &str,
) -> std::io::Result<PathBuf> {
    let dir = directory_path(base, stage, protocol);
    fs::create_dir_all(&dir)?;
    let path = dir.join(format!("{}{}", operation, protocol.file_extension()));
    fs::write(&path, content)?;
    info!(file = %path.display(), "Template file saved");
    Ok(path)
}

fn directory_path(base: &Path, stage: &str, protocol: Protocol) -> PathBuf {
    base.join(stage).join(protocol.tag())
}
