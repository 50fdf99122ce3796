pub mod cancel;
pub mod date;
pub mod dedup;
pub mod error;
pub mod media;
pub mod metadata;
pub mod pipeline;
pub mod stats;
pub mod walk;
pub mod writer;

use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::date::format::DirFormat;
use crate::date::DateResolver;
use crate::writer::Destinations;

pub use cancel::CancellationToken;
pub use error::ConfigError;
pub use media::FileType;
pub use metadata::{ExifTool, ExifToolConfig, MetadataRecord, MetadataSource};
pub use pipeline::{FileReport, Outcome, Pipeline};
pub use stats::RunSummary;
pub use writer::TransferMode;

/// Directory for files whose date could not be determined.
pub const DEFAULT_NO_DATE_DIR: &str = "unknown";
pub const DEFAULT_DIR_FORMAT: &str = "YYYY/MM/DD";

fn default_no_date_dir() -> String {
    DEFAULT_NO_DATE_DIR.to_string()
}

fn default_dir_format() -> String {
    DEFAULT_DIR_FORMAT.to_string()
}

fn default_concurrency() -> usize {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessOptions {
    pub input: PathBuf,
    pub output: PathBuf,
    #[serde(default)]
    pub output_prefix: Option<String>,
    #[serde(default)]
    pub output_suffix: Option<String>,
    #[serde(default = "default_no_date_dir")]
    pub no_date_dir: String,
    /// Directory template, see [`DirFormat`].
    #[serde(default = "default_dir_format")]
    pub dir_format: String,
    #[serde(default)]
    pub mode: TransferMode,
    /// Keep source names instead of `YYYYMMDD-HHMMSS.ext`.
    #[serde(default)]
    pub original_filenames: bool,
    /// Regex with `year`, `month`, `day` (and optionally `hour`, `minute`,
    /// `second`) groups for dating files by name.
    #[serde(default)]
    pub date_regex: Option<String>,
    /// Fall back to the file's modification time.
    #[serde(default)]
    pub timestamp: bool,
    /// Whitespace-separated metadata tags to read the date from.
    #[serde(default)]
    pub date_field: Option<String>,
    #[serde(default)]
    pub skip_unknown: bool,
    /// Delete sources found to be duplicates (move mode with skip-unknown only).
    #[serde(default)]
    pub movedel: bool,
    /// Remove emptied input directories after a move.
    #[serde(default)]
    pub rmdirs: bool,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_concurrency")]
    pub max_concurrency: usize,
    /// Directory levels below the input root to descend; `None` is unlimited.
    #[serde(default)]
    pub max_depth: Option<usize>,
    /// Inclusive `YYYY-MM-DD` window on the resolved date.
    #[serde(default)]
    pub from_date: Option<String>,
    #[serde(default)]
    pub to_date: Option<String>,
    #[serde(default)]
    pub file_type: Option<FileType>,
    #[serde(default)]
    pub exiftool: ExifToolConfig,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            input: PathBuf::new(),
            output: PathBuf::new(),
            output_prefix: None,
            output_suffix: None,
            no_date_dir: default_no_date_dir(),
            dir_format: default_dir_format(),
            mode: TransferMode::default(),
            original_filenames: false,
            date_regex: None,
            timestamp: false,
            date_field: None,
            skip_unknown: false,
            movedel: false,
            rmdirs: false,
            dry_run: false,
            max_concurrency: default_concurrency(),
            max_depth: None,
            from_date: None,
            to_date: None,
            file_type: None,
            exiftool: ExifToolConfig::default(),
        }
    }
}

impl ProcessOptions {
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            ..Self::default()
        }
    }

    /// Check the options and compile what needs compiling. The output root is
    /// created here unless this is a dry run.
    pub fn validate(&self) -> Result<ValidatedOptions, ConfigError> {
        let mut options = self.clone();
        options.input = absolute(&self.input);
        options.output = absolute(&self.output);

        if !options.input.exists() {
            return Err(ConfigError::InputMissing(options.input));
        }
        if !options.input.is_dir() {
            return Err(ConfigError::InputNotDirectory(options.input));
        }
        if !options.output.exists() {
            tracing::warn!(
                path = %options.output.display(),
                "output directory does not exist, creating now"
            );
            if !options.dry_run {
                std::fs::create_dir_all(&options.output).map_err(|source| {
                    ConfigError::OutputCreate {
                        path: options.output.clone(),
                        source,
                    }
                })?;
            }
        }

        let date_regex = options
            .date_regex
            .as_deref()
            .filter(|r| !r.is_empty())
            .map(Regex::new)
            .transpose()?;

        let from = options
            .from_date
            .as_deref()
            .map(|d| parse_bound(d, "00:00:00"))
            .transpose()?;
        let to = options
            .to_date
            .as_deref()
            .map(|d| parse_bound(d, "23:59:59"))
            .transpose()?;
        if let (Some(from), Some(to)) = (from, to) {
            if from > to {
                return Err(ConfigError::EmptyDateRange {
                    from: from.date().to_string(),
                    to: to.date().to_string(),
                });
            }
        }

        Ok(ValidatedOptions {
            dir_format: DirFormat::parse(&options.dir_format),
            options,
            date_regex,
            from,
            to,
        })
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

fn parse_bound(date: &str, time: &str) -> Result<NaiveDateTime, ConfigError> {
    NaiveDateTime::parse_from_str(&format!("{date} {time}"), "%Y-%m-%d %H:%M:%S").map_err(
        |source| ConfigError::InvalidDate {
            value: date.to_string(),
            source,
        },
    )
}

/// Options that passed [`ProcessOptions::validate`], with absolute roots.
#[derive(Debug, Clone)]
pub struct ValidatedOptions {
    pub options: ProcessOptions,
    pub date_regex: Option<Regex>,
    pub dir_format: DirFormat,
    /// Start of the date window, at 00:00:00.
    pub from: Option<NaiveDateTime>,
    /// End of the date window, at 23:59:59.
    pub to: Option<NaiveDateTime>,
}

impl ValidatedOptions {
    pub fn resolver(&self) -> DateResolver {
        DateResolver::new()
            .with_fields(self.options.date_field.as_deref().unwrap_or_default())
            .with_filename_regex(self.date_regex.clone())
            .with_timestamp_fallback(self.options.timestamp)
    }

    pub fn destinations(&self) -> Destinations {
        Destinations::new(&self.options.output)
            .with_prefix(self.options.output_prefix.clone())
            .with_suffix(self.options.output_suffix.clone())
            .with_no_date_dir(self.options.no_date_dir.clone())
            .with_format(self.dir_format.clone())
            .with_original_filenames(self.options.original_filenames)
            .with_dry_run(self.options.dry_run)
    }

    pub fn in_range(&self, instant: NaiveDateTime) -> bool {
        self.from.map_or(true, |from| instant >= from) && self.to.map_or(true, |to| instant <= to)
    }
}

/// Control options for process execution.
#[derive(Debug, Clone, Default)]
pub struct ProcessControl {
    /// Cancellation token, typically wired to Ctrl-C.
    pub cancel_token: Option<CancellationToken>,
}

impl ProcessControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = Some(token);
        self
    }
}

/// Called once per finished file, from whichever worker finished it.
pub type FileCallback<'a> = dyn Fn(&FileReport) + Send + Sync + 'a;

/// Run the full pipeline.
pub fn process(options: &ProcessOptions, callback: &FileCallback<'_>) -> Result<RunSummary, ConfigError> {
    process_with_control(options, &ProcessControl::default(), callback)
}

/// Run the full pipeline with cancellation support.
pub fn process_with_control(
    options: &ProcessOptions,
    control: &ProcessControl,
    callback: &FileCallback<'_>,
) -> Result<RunSummary, ConfigError> {
    let validated = options.validate()?;
    if validated.options.dry_run {
        tracing::warn!("dry run: no permanent changes will be made");
    }
    let input = validated.options.input.clone();
    let max_depth = validated.options.max_depth;
    let prune = validated.options.mode == TransferMode::Move
        && validated.options.rmdirs
        && !validated.options.dry_run;

    let pipeline = Pipeline::new(validated);
    let summary = pipeline.run(control.cancel_token.as_ref(), callback)?;

    if prune && !summary.cancelled {
        walk::prune_empty_dirs(&input, max_depth);
    }
    Ok(summary)
}
