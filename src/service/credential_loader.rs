use crate::error::KeeperError;
use crate::google_oauth::credentials::CredentialRecord;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::{fs, path::Path};
use tracing::{info, warn};

/// Load credential JSON files from a directory into canonical records.
pub fn load_from_dir(dir: &Path, now: DateTime<Utc>) -> Result<Vec<CredentialRecord>, KeeperError> {
    if !dir.exists() {
        info!(path = %dir.display(), "credentials directory not found; skipping load");
        return Ok(Vec::new());
    }

    let loaded: Vec<CredentialRecord> = fs::read_dir(dir)?
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry.path()),
            Err(e) => {
                warn!(error = %e, "failed to read credentials dir entry");
                None
            }
        })
        .filter(|path| is_json_file(path))
        .filter_map(|path| {
            load_credential(&path, now)
                .inspect_err(|e| {
                    warn!(path = %path.display(), error = %e, "failed to load credential");
                })
                .ok()
        })
        .collect();

    Ok(loaded)
}

fn is_json_file(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

fn load_credential(path: &Path, now: DateTime<Utc>) -> Result<CredentialRecord, KeeperError> {
    let contents = fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&contents)?;
    CredentialRecord::from_payload(&value, now)
}
