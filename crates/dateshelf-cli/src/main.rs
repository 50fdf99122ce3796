use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use clap::{ArgAction, Parser};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use dateshelf_core::{
    CancellationToken, ExifToolConfig, FileType, ProcessControl, ProcessOptions, RunSummary,
    TransferMode,
};

#[derive(Parser)]
#[command(
    name = "dateshelf",
    version,
    about = "Sort photos and videos into a dated directory tree using exiftool metadata"
)]
struct Cli {
    /// Directory to read media from
    input: PathBuf,

    /// Root of the dated tree
    output: PathBuf,

    /// Directory layout: YYYY, YY, MM, M (month name), m (short month name),
    /// DDD (day of year), DD, U and W (week numbers)
    #[arg(short = 'd', long = "date", default_value = dateshelf_core::DEFAULT_DIR_FORMAT)]
    dir_format: String,

    /// Move files instead of copying them
    #[arg(short, long = "move")]
    move_files: bool,

    /// Hard-link files instead of copying them
    #[arg(short, long, conflicts_with = "move_files")]
    link: bool,

    /// Keep original file names
    #[arg(short, long = "original-names")]
    original_filenames: bool,

    /// Use the file's modification time when no other date is found
    #[arg(short, long)]
    timestamp: bool,

    /// Regex with year, month, day (and optionally hour, minute, second)
    /// named groups for dating files by name
    #[arg(short = 'r', long = "regex")]
    date_regex: Option<String>,

    /// Metadata tags to read the date from, whitespace separated
    #[arg(short = 'f', long)]
    date_field: Option<String>,

    /// Directory name for files without a date
    #[arg(long, default_value = dateshelf_core::DEFAULT_NO_DATE_DIR)]
    no_date_dir: String,

    /// Leave files without a date where they are
    #[arg(long)]
    skip_unknown: bool,

    /// Delete duplicates from the input (needs --move and --skip-unknown)
    #[arg(long)]
    movedel: bool,

    /// Remove emptied input directories after a move
    #[arg(long)]
    rmdirs: bool,

    /// Directory inserted between the output root and the date directories
    #[arg(long)]
    output_prefix: Option<String>,

    /// Directory appended below the date directories
    #[arg(long)]
    output_suffix: Option<String>,

    /// Only files dated on or after this day (YYYY-MM-DD)
    #[arg(long)]
    from_date: Option<String>,

    /// Only files dated on or before this day (YYYY-MM-DD)
    #[arg(long)]
    to_date: Option<String>,

    /// Only process images or only videos
    #[arg(long)]
    file_type: Option<FileType>,

    /// How many directory levels below the input to descend
    #[arg(long = "maxdepth")]
    max_depth: Option<usize>,

    /// Worker threads
    #[arg(short = 'c', long, default_value_t = 1)]
    max_concurrency: usize,

    /// Show what would happen without touching any file
    #[arg(short = 'y', long)]
    dry_run: bool,

    /// exiftool executable
    #[arg(long, env = "DATESHELF_EXIFTOOL", default_value = "exiftool")]
    exiftool: PathBuf,

    /// Seconds to wait for one exiftool answer
    #[arg(long, default_value_t = 30)]
    exiftool_timeout: u64,

    /// Show a progress bar
    #[arg(short, long)]
    progress: bool,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

impl Cli {
    fn mode(&self) -> TransferMode {
        if self.move_files {
            TransferMode::Move
        } else if self.link {
            TransferMode::Link
        } else {
            TransferMode::Copy
        }
    }

    fn into_options(self) -> ProcessOptions {
        ProcessOptions {
            mode: self.mode(),
            input: self.input,
            output: self.output,
            output_prefix: self.output_prefix,
            output_suffix: self.output_suffix,
            no_date_dir: self.no_date_dir,
            dir_format: self.dir_format,
            original_filenames: self.original_filenames,
            date_regex: self.date_regex,
            timestamp: self.timestamp,
            date_field: self.date_field,
            skip_unknown: self.skip_unknown,
            movedel: self.movedel,
            rmdirs: self.rmdirs,
            dry_run: self.dry_run,
            max_concurrency: self.max_concurrency,
            max_depth: self.max_depth,
            from_date: self.from_date,
            to_date: self.to_date,
            file_type: self.file_type,
            exiftool: ExifToolConfig {
                program: self.exiftool,
                timeout_secs: self.exiftool_timeout,
                ..ExifToolConfig::default()
            },
        }
    }
}

/// Log sink that hides the progress bar while a line is written.
struct LogWriter(Option<ProgressBar>);

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &self.0 {
            Some(bar) => bar.suspend(|| io::stderr().write_all(buf)).map(|()| buf.len()),
            None => io::stderr().write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }
}

fn init_logging(verbose: u8, quiet: bool, bar: Option<ProgressBar>) {
    let level = match (quiet, verbose) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_target(false)
        .with_writer(move || LogWriter(bar.clone()))
        .init();
}

fn print_summary(summary: &RunSummary, seconds: f64) {
    let status = match (summary.cancelled, summary.dry_run) {
        (true, _) => "Cancelled",
        (false, true) => "Dry run done",
        (false, false) => "Done",
    };
    eprintln!(
        "{}! {} files processed: {} moved, {} copied, {} linked, {} duplicates, {} unknown, {} failed ({:.2}s)",
        status,
        summary.processed,
        summary.moved,
        summary.copied,
        summary.linked,
        summary.duplicates,
        summary.unknown,
        summary.failed,
        seconds
    );
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let t_total = Instant::now();

    let bar = if cli.progress {
        let bar = ProgressBar::new(0);
        bar.set_style(ProgressStyle::default_bar().template("[{bar:40}] {pos}/{len} {msg}")?);
        Some(bar)
    } else {
        None
    };
    init_logging(cli.verbose, cli.quiet, bar.clone());

    let options = cli.into_options();
    if let Some(bar) = &bar {
        if options.input.is_dir() {
            bar.set_length(dateshelf_core::walk::count_files(&options.input, options.max_depth));
        }
    }

    let token = CancellationToken::new();
    let handler_token = token.clone();
    ctrlc::set_handler(move || handler_token.cancel()).context("cannot install Ctrl-C handler")?;
    let control = ProcessControl::new().with_cancel_token(token);

    let summary = dateshelf_core::process_with_control(&options, &control, &|report| {
        if let Some(bar) = &bar {
            bar.inc(1);
            if let Some(name) = report.source.file_name() {
                bar.set_message(name.to_string_lossy().into_owned());
            }
        }
    })?;

    if let Some(bar) = &bar {
        bar.finish_and_clear();
    }
    summary.log_report(t_total.elapsed());
    print_summary(&summary, t_total.elapsed().as_secs_f64());

    Ok(())
}
