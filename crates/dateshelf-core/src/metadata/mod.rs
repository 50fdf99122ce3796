//! Metadata extraction through `exiftool`.
//!
//! One long-lived `exiftool -stay_open` worker serves every request of a run
//! (see [`session`]). When it cannot be started, dies, or stops answering,
//! each request falls back to a one-shot invocation (see [`oneshot`]). Either
//! way the caller only sees `Option<MetadataRecord>`: every failure of the
//! metadata subsystem degrades to "no metadata".

pub mod oneshot;
pub mod session;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use self::session::Session;

/// Flags sent with every request: fast scan, numeric values, all time tags
/// plus the MIME type, as a JSON array.
pub const EXIFTOOL_FLAGS: [&str; 5] = ["-fast2", "-n", "-time:all", "-mimetype", "-j"];

/// A single tag value as emitted by `exiftool -j -n`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Text(String),
    Number(f64),
    /// Booleans, arrays, objects and nulls; never interpreted.
    Other(serde_json::Value),
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

/// Tag name -> value for exactly one file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct MetadataRecord(HashMap<String, MetadataValue>);

impl MetadataRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        self.0.get(key)
    }

    /// The value of `key` if, and only if, it is a string.
    pub fn text(&self, key: &str) -> Option<&str> {
        match self.0.get(key) {
            Some(MetadataValue::Text(s)) => Some(s),
            _ => None,
        }
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.text("MIMEType")
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<MetadataValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<MetadataValue>> FromIterator<(K, V)> for MetadataRecord {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Parse `exiftool -j` output: a JSON array whose first element describes the
/// requested file.
pub fn parse_output(data: &str) -> Option<MetadataRecord> {
    let data = data.trim();
    if data.is_empty() {
        return None;
    }
    let records: Vec<MetadataRecord> = serde_json::from_str(data).ok()?;
    records.into_iter().next()
}

/// Anything able to produce metadata for a file on disk.
pub trait MetadataSource: Send + Sync {
    fn fetch(&self, path: &Path) -> Option<MetadataRecord>;
}

fn default_program() -> PathBuf {
    PathBuf::from("exiftool")
}

fn default_timeout_secs() -> u64 {
    30
}

/// How to launch `exiftool`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExifToolConfig {
    /// Executable name or path, resolved through `PATH`.
    #[serde(default = "default_program")]
    pub program: PathBuf,
    /// Arguments placed before everything else, e.g. the script path when
    /// `program` is an interpreter.
    #[serde(default)]
    pub prefix_args: Vec<String>,
    /// Upper bound for one request/response exchange with the worker.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ExifToolConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            prefix_args: Vec::new(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ExifToolConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Handle to `exiftool`: a lazily started persistent worker plus the one-shot
/// fallback.
pub struct ExifTool {
    config: ExifToolConfig,
    timeout: Duration,
    available: bool,
    session: OnceLock<Option<Session>>,
}

impl ExifTool {
    /// Resolve the configured program. A missing executable is not an error:
    /// every fetch then yields `None`.
    pub fn new(mut config: ExifToolConfig) -> Self {
        let available = match which::which(&config.program) {
            Ok(resolved) => {
                tracing::debug!(program = %resolved.display(), "found exiftool");
                config.program = resolved;
                true
            }
            Err(e) => {
                tracing::warn!(
                    program = %config.program.display(),
                    error = %e,
                    "exiftool not found; media files will be treated as undated"
                );
                false
            }
        };
        let timeout = config.timeout();
        Self {
            config,
            timeout,
            available,
            session: OnceLock::new(),
        }
    }

    /// Override the exchange timeout (mostly useful for tests).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    fn session(&self) -> Option<&Session> {
        self.session
            .get_or_init(|| Session::spawn(&self.config, self.timeout))
            .as_ref()
    }
}

impl MetadataSource for ExifTool {
    fn fetch(&self, path: &Path) -> Option<MetadataRecord> {
        if !self.available {
            return None;
        }
        // The worker's working directory is not ours.
        let path = std::path::absolute(path).ok()?;
        if let Some(record) = self.session().and_then(|s| s.fetch(&path)) {
            return Some(record);
        }
        oneshot::fetch(&self.config, &path)
    }
}
