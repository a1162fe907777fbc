use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use crate::MetadataConfig;
use crate::metadata::REQUESTED_TAGS;

/// Failures at the exiftool boundary. Callers decide the degrade policy;
/// nothing here is fatal to a request.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("exiftool could not be spawned: {0}")]
    Spawn(std::io::Error),

    #[error("exiftool exited with status {0}")]
    NonZeroExit(i32),

    #[error("exiftool timed out after {0:?}")]
    Timeout(Duration),

    #[error("exiftool output was not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Invokes the external exiftool binary and parses its JSON output.
pub struct MetadataExtractor {
    config: MetadataConfig,
}

impl MetadataExtractor {
    pub fn new(config: MetadataConfig) -> Self {
        Self { config }
    }

    /// Extract raw metadata for a single file.
    pub async fn extract_one(&self, path: &Path) -> Result<Map<String, Value>, ExtractError> {
        let results = self.extract_batch(&[path]).await?;
        // Single invocation yields at most one object; no need to match
        // against the SourceFile spelling exiftool chose.
        Ok(results.into_values().next().unwrap_or_default())
    }

    /// Extract raw metadata for many files in one invocation, keyed by the
    /// path exiftool reports in `SourceFile`.
    pub async fn extract_batch<P: AsRef<Path>>(
        &self,
        paths: &[P],
    ) -> Result<HashMap<PathBuf, Map<String, Value>>, ExtractError> {
        if paths.is_empty() {
            return Ok(HashMap::new());
        }

        let timeout = Duration::from_secs(self.config.extractor_timeout_secs.max(1));

        let mut cmd = Command::new(&self.config.exiftool_path);
        cmd.arg("-j")
            .args(["-api", "jsonUnicode=1"])
            .arg("-m")
            .arg("-fast2")
            .arg("-n");
        for tag in REQUESTED_TAGS {
            cmd.arg(format!("-{}", tag));
        }
        for path in paths {
            cmd.arg(path.as_ref());
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(timeout, cmd.output())
            .await
            .map_err(|_| ExtractError::Timeout(timeout))?
            .map_err(ExtractError::Spawn)?;

        // exiftool exits 1 when some files had errors but still emits JSON
        // for the rest; only a missing payload is treated as failure.
        if !output.status.success() && output.stdout.is_empty() {
            return Err(ExtractError::NonZeroExit(
                output.status.code().unwrap_or(-1),
            ));
        }

        let parsed: Value = serde_json::from_slice(&output.stdout)?;
        let objects = match parsed {
            Value::Array(objects) => objects,
            _ => Vec::new(),
        };

        let mut results = HashMap::new();
        for object in objects {
            if let Value::Object(map) = object {
                let source = map
                    .get("SourceFile")
                    .and_then(Value::as_str)
                    .map(PathBuf::from);
                if let Some(source) = source {
                    results.insert(source, map);
                }
            }
        }

        debug!(
            "exiftool returned metadata for {}/{} files",
            results.len(),
            paths.len()
        );
        Ok(results)
    }
}
