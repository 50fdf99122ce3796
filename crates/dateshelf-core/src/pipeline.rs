use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::NaiveDateTime;
use rayon::iter::{ParallelBridge, ParallelIterator};

use crate::cancel::CancellationToken;
use crate::date::{DateResolver, ResolvedDate};
use crate::dedup;
use crate::error::ConfigError;
use crate::media::{self, FileType};
use crate::metadata::{ExifTool, MetadataRecord, MetadataSource};
use crate::stats::{Counter, RunStatistics, RunSummary};
use crate::walk::MediaWalk;
use crate::writer::{self, Destinations, TransferMode};
use crate::{FileCallback, ProcessOptions, ValidatedOptions};

/// What happened to one input file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// Moved, linked or copied (or would have been, in a dry run).
    Relocated {
        destination: PathBuf,
        mode: TransferMode,
    },
    /// Identical to a file already in the output tree.
    Duplicate { existing: PathBuf, deleted: bool },
    SkippedUnknownDate,
    SkippedOutOfRange { date: NaiveDateTime },
    SkippedFileType { found: Option<FileType> },
    /// Sidecars only travel with their primary file.
    Sidecar,
    /// Disappeared between listing and handling.
    Vanished,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct FileReport {
    pub source: PathBuf,
    pub outcome: Outcome,
}

/// Sorts the files of one input tree into the output tree.
pub struct Pipeline {
    options: ValidatedOptions,
    metadata: Box<dyn MetadataSource>,
    resolver: DateResolver,
    destinations: Destinations,
    stats: RunStatistics,
}

impl Pipeline {
    /// Pipeline backed by `exiftool` as configured in the options.
    pub fn new(options: ValidatedOptions) -> Self {
        let exiftool = ExifTool::new(options.options.exiftool.clone());
        Self::with_source(options, Box::new(exiftool))
    }

    pub fn with_source(options: ValidatedOptions, metadata: Box<dyn MetadataSource>) -> Self {
        Self {
            resolver: options.resolver(),
            destinations: options.destinations(),
            options,
            metadata,
            stats: RunStatistics::new(),
        }
    }

    pub fn options(&self) -> &ProcessOptions {
        &self.options.options
    }

    pub fn stats(&self) -> &RunStatistics {
        &self.stats
    }

    /// Walk the input tree and process every file, sequentially or on a
    /// pool of `max_concurrency` workers. `callback` sees each file as it
    /// finishes. Cancellation stops the walk; files already handed to a
    /// worker still finish.
    pub fn run(
        &self,
        cancel: Option<&CancellationToken>,
        callback: &FileCallback<'_>,
    ) -> Result<RunSummary, ConfigError> {
        let opts = self.options();
        let is_cancelled = move || cancel.is_some_and(CancellationToken::is_cancelled);
        let files = MediaWalk::new(&opts.input)
            .with_max_depth(opts.max_depth)
            .files()
            .take_while(move |_| !is_cancelled());

        let handle = |path: PathBuf| {
            let outcome = self.process_file(&path);
            callback(&FileReport {
                source: path,
                outcome,
            });
        };

        if opts.max_concurrency <= 1 {
            files.for_each(handle);
        } else {
            tracing::info!("using {} workers to process files", opts.max_concurrency);
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(opts.max_concurrency)
                .thread_name(|i| format!("dateshelf-worker-{i}"))
                .build()?;
            pool.install(|| files.par_bridge().for_each(handle));
        }

        let cancelled = is_cancelled();
        if cancelled {
            tracing::warn!("received interrupt, stopped dispatching files");
        }
        Ok(self.stats.snapshot(opts.dry_run, cancelled))
    }

    /// Process a single file. Never fails: errors become [`Outcome::Failed`].
    pub fn process_file(&self, path: &Path) -> Outcome {
        if media::is_sidecar(path) {
            tracing::debug!(path = %path.display(), "sidecar, left for its primary file");
            return Outcome::Sidecar;
        }

        let outcome = self
            .sort_file(path)
            .unwrap_or_else(|e| Outcome::Failed(format!("{e:#}")));
        self.account(&outcome);
        log_outcome(path, &outcome);
        outcome
    }

    /// File type and date. Only media files are shown to exiftool, and only
    /// files it recognizes as images or videos get a date.
    fn inspect(&self, path: &Path) -> (Option<FileType>, ResolvedDate) {
        if !media::is_media(path) {
            return (None, ResolvedDate::unknown());
        }
        let record = self.metadata.fetch(path);
        let file_type = record
            .as_ref()
            .and_then(MetadataRecord::mime_type)
            .and_then(FileType::from_mime);
        match file_type {
            Some(_) => (file_type, self.resolver.resolve(record.as_ref(), path)),
            None => (None, ResolvedDate::unknown()),
        }
    }

    fn sort_file(&self, path: &Path) -> anyhow::Result<Outcome> {
        let opts = self.options();
        let (file_type, date) = self.inspect(path);
        let mut task = self
            .destinations
            .plan(path, file_type, date)
            .context("cannot create destination directory")?;

        if let Some(wanted) = opts.file_type {
            if task.file_type != Some(wanted) {
                return Ok(Outcome::SkippedFileType {
                    found: task.file_type,
                });
            }
        }

        if opts.skip_unknown && task.undated {
            return Ok(Outcome::SkippedUnknownDate);
        }

        if let Some(instant) = task.date.instant.filter(|_| !task.undated) {
            if !self.options.in_range(instant) {
                return Ok(Outcome::SkippedOutOfRange { date: instant });
            }
        }

        loop {
            let target = task.target_path();

            if fs::symlink_metadata(&target).is_ok() {
                if target.is_file() {
                    match dedup::is_duplicate(path, &target) {
                        Ok(true) => return self.duplicate(path, target),
                        Ok(false) => {}
                        Err(e) if e.kind() == io::ErrorKind::NotFound => {
                            return Ok(Outcome::Vanished)
                        }
                        Err(e) => {
                            return Err(e)
                                .with_context(|| format!("cannot compare with {}", target.display()))
                        }
                    }
                }
                task.suffix += 1;
                continue;
            }

            if !opts.dry_run {
                match writer::transfer(opts.mode, path, &target) {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Outcome::Vanished),
                    // Another worker took the name first; look at it again.
                    Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                    Err(e) => {
                        return Err(e)
                            .with_context(|| format!("cannot {} to {}", opts.mode, target.display()))
                    }
                }
            }

            writer::transfer_companions(opts.mode, opts.dry_run, &task);

            return Ok(Outcome::Relocated {
                destination: target,
                mode: opts.mode,
            });
        }
    }

    fn duplicate(&self, path: &Path, existing: PathBuf) -> anyhow::Result<Outcome> {
        let opts = self.options();
        let deleted = opts.mode == TransferMode::Move && opts.movedel && opts.skip_unknown;
        if deleted && !opts.dry_run {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Outcome::Vanished),
                Err(e) => return Err(e).context("cannot delete duplicate"),
            }
        }
        Ok(Outcome::Duplicate { existing, deleted })
    }

    fn account(&self, outcome: &Outcome) {
        self.stats.bump(Counter::Processed);
        let counter = match outcome {
            Outcome::Relocated { mode, .. } => match mode {
                TransferMode::Move => Counter::Moved,
                TransferMode::Link => Counter::Linked,
                TransferMode::Copy => Counter::Copied,
            },
            Outcome::Duplicate { .. } => Counter::Duplicate,
            Outcome::SkippedUnknownDate => Counter::Unknown,
            Outcome::Failed(_) => Counter::Failed,
            _ => return,
        };
        self.stats.bump(counter);
    }
}

fn log_outcome(path: &Path, outcome: &Outcome) {
    let path = path.display();
    match outcome {
        Outcome::Relocated { destination, .. } => {
            tracing::info!(%path, destination = %destination.display(), "relocated");
        }
        Outcome::Duplicate { existing, deleted } => {
            let action = if *deleted { "deleted" } else { "skipped" };
            tracing::info!(
                %path,
                destination = %existing.display(),
                "{action}, duplicated file"
            );
        }
        Outcome::SkippedUnknownDate => {
            tracing::info!(%path, reason = "unknown date", "skipped");
        }
        Outcome::SkippedOutOfRange { date } => {
            tracing::info!(%path, reason = "outside date range", %date, "skipped");
        }
        Outcome::SkippedFileType { found } => {
            tracing::info!(%path, reason = "file type", ?found, "skipped");
        }
        Outcome::Sidecar => {}
        Outcome::Vanished => {
            tracing::warn!(%path, reason = "no such file or directory", "skipped");
        }
        Outcome::Failed(error) => {
            tracing::warn!(%path, %error, "failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::{Arc, Mutex};

    /// Metadata keyed by file name.
    #[derive(Default)]
    struct Stub(HashMap<String, MetadataRecord>);

    impl Stub {
        fn with(mut self, name: &str, mime: &str, date: Option<&str>) -> Self {
            let mut record = MetadataRecord::new();
            record.insert("MIMEType", mime);
            if let Some(date) = date {
                record.insert("CreateDate", date);
            }
            self.0.insert(name.to_string(), record);
            self
        }

        fn jpeg(self, name: &str, date: &str) -> Self {
            self.with(name, "image/jpeg", Some(date))
        }
    }

    impl MetadataSource for Stub {
        fn fetch(&self, path: &Path) -> Option<MetadataRecord> {
            let name = path.file_name()?.to_str()?;
            self.0.get(name).cloned()
        }
    }

    struct Fixture {
        input: tempfile::TempDir,
        output: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                input: tempfile::tempdir().unwrap(),
                output: tempfile::tempdir().unwrap(),
            }
        }

        fn file(&self, rel: &str, content: &[u8]) -> PathBuf {
            let path = self.input.path().join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, content).unwrap();
            path
        }

        fn options(&self) -> ProcessOptions {
            ProcessOptions::new(self.input.path(), self.output.path())
        }

        fn out(&self, rel: &str) -> PathBuf {
            rel.split('/').fold(self.output.path().to_path_buf(), |p, c| p.join(c))
        }
    }

    fn pipeline(options: ProcessOptions, stub: Stub) -> Pipeline {
        Pipeline::with_source(options.validate().unwrap(), Box::new(stub))
    }

    fn run(pipeline: &Pipeline) -> (RunSummary, Vec<FileReport>) {
        let reports = Mutex::new(Vec::new());
        let summary = pipeline
            .run(None, &|r: &FileReport| reports.lock().unwrap().push(r.clone()))
            .unwrap();
        (summary, reports.into_inner().unwrap())
    }

    #[test]
    fn test_dated_image_is_copied_into_date_tree() {
        let fx = Fixture::new();
        let source = fx.file("IMG_0001.JPG", b"pixels");
        let p = pipeline(fx.options(), Stub::default().jpeg("IMG_0001.JPG", "2017:01:01 01:01:01"));

        let (summary, reports) = run(&p);
        let expected = fx.out("2017/01/01/20170101-010101.jpg");
        assert_eq!(
            reports[0].outcome,
            Outcome::Relocated {
                destination: expected.clone(),
                mode: TransferMode::Copy
            }
        );
        assert_eq!(fs::read(&expected).unwrap(), b"pixels");
        assert!(source.exists());
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.copied, 1);
    }

    #[test]
    fn test_undated_files_keep_their_names() {
        let fx = Fixture::new();
        fx.file("Holiday.JPG", b"no date");
        fx.file("Notes.TXT", b"text");
        let p = pipeline(fx.options(), Stub::default().with("Holiday.JPG", "image/jpeg", None));

        let (summary, _) = run(&p);
        assert!(fx.out("unknown/holiday.jpg").exists());
        assert!(fx.out("unknown/Notes.TXT").exists());
        assert_eq!(summary.copied, 2);
        assert_eq!(summary.unknown, 0);
    }

    #[test]
    fn test_name_clash_gets_suffix() {
        let fx = Fixture::new();
        fx.file("a.jpg", b"first");
        fx.file("b.jpg", b"second");
        let stub = Stub::default()
            .jpeg("a.jpg", "2017:01:01 01:01:01")
            .jpeg("b.jpg", "2017:01:01 01:01:01");
        let p = pipeline(fx.options(), stub);

        run(&p);
        assert_eq!(fs::read(fx.out("2017/01/01/20170101-010101.jpg")).unwrap(), b"first");
        assert_eq!(fs::read(fx.out("2017/01/01/20170101-010101-2.jpg")).unwrap(), b"second");
    }

    #[test]
    fn test_duplicate_is_detected_by_content() {
        let fx = Fixture::new();
        let source = fx.file("a.jpg", b"same");
        let existing = fx.out("2017/01/01/20170101-010101.jpg");
        fs::create_dir_all(existing.parent().unwrap()).unwrap();
        fs::write(&existing, b"same").unwrap();

        let mut options = fx.options();
        options.mode = TransferMode::Move;
        let p = pipeline(options, Stub::default().jpeg("a.jpg", "2017:01:01 01:01:01"));

        let (summary, reports) = run(&p);
        assert_eq!(
            reports[0].outcome,
            Outcome::Duplicate {
                existing: existing.clone(),
                deleted: false
            }
        );
        assert!(source.exists());
        assert_eq!(summary.duplicates, 1);
        assert_eq!(summary.moved, 0);
    }

    #[test]
    fn test_movedel_needs_move_and_skip_unknown() {
        let fx = Fixture::new();
        let source = fx.file("a.jpg", b"same");
        let existing = fx.out("2017/01/01/20170101-010101.jpg");
        fs::create_dir_all(existing.parent().unwrap()).unwrap();
        fs::write(&existing, b"same").unwrap();
        let stub = || Stub::default().jpeg("a.jpg", "2017:01:01 01:01:01");

        let mut options = fx.options();
        options.mode = TransferMode::Move;
        options.movedel = true;
        run(&pipeline(options.clone(), stub()));
        assert!(source.exists());

        options.skip_unknown = true;
        let (_, reports) = run(&pipeline(options, stub()));
        assert_eq!(
            reports[0].outcome,
            Outcome::Duplicate {
                existing,
                deleted: true
            }
        );
        assert!(!source.exists());
    }

    #[test]
    fn test_dry_run_mapping_is_independent_of_concurrency() {
        let fx = Fixture::new();
        let mut stub = Stub::default();
        for i in 0..24 {
            let name = format!("dir{}/img{i:02}.jpg", i % 3);
            fx.file(&name, format!("content {i}").as_bytes());
            stub = stub.jpeg(&format!("img{i:02}.jpg"), &format!("2017:01:{:02} 10:00:{i:02}", i % 5 + 1));
        }
        fx.file("dir0/notes.txt", b"notes");
        let stub = Arc::new(stub);

        let mapping = |workers: usize| {
            let mut options = fx.options();
            options.dry_run = true;
            options.mode = TransferMode::Move;
            options.max_concurrency = workers;
            let p = Pipeline::with_source(options.validate().unwrap(), Box::new(Arc::clone(&stub)));
            let (summary, reports) = run(&p);
            assert_eq!(summary.processed, 25);
            assert_eq!(summary.moved, 25);
            reports
                .into_iter()
                .map(|r| (r.source, r.outcome))
                .collect::<HashSet<_>>()
        };

        let sequential = mapping(1);
        let parallel = mapping(4);
        assert_eq!(sequential.len(), 25);
        assert_eq!(sequential, parallel);
        assert_eq!(fs::read_dir(fx.output.path()).unwrap().count(), 0);
        assert_eq!(crate::walk::count_files(fx.input.path(), None), 25);
    }

    impl MetadataSource for Arc<Stub> {
        fn fetch(&self, path: &Path) -> Option<MetadataRecord> {
            self.as_ref().fetch(path)
        }
    }

    #[test]
    fn test_parallel_run_moves_everything_once() {
        let fx = Fixture::new();
        let mut stub = Stub::default();
        for i in 0..16 {
            // Distinct sizes: files written this quickly can share an mtime.
            let name = format!("img{i:02}.jpg");
            fx.file(&name, "x".repeat(i + 1).as_bytes());
            stub = stub.jpeg(&name, "2017:01:01 01:01:01");
        }
        let mut options = fx.options();
        options.mode = TransferMode::Move;
        options.max_concurrency = 4;
        let p = pipeline(options, stub);

        let (summary, reports) = run(&p);
        assert_eq!(summary.moved, 16);
        let destinations: HashSet<_> = reports
            .iter()
            .filter_map(|r| match &r.outcome {
                Outcome::Relocated { destination, .. } => Some(destination.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(destinations.len(), 16);
        let day = fx.out("2017/01/01");
        assert_eq!(fs::read_dir(&day).unwrap().count(), 16);
        assert_eq!(crate::walk::count_files(fx.input.path(), None), 0);
    }

    #[test]
    fn test_parallel_identical_copies_are_duplicates() {
        let fx = Fixture::new();
        let content = vec![0x5au8; 8 * 1024 * 1024];
        let mut stub = Stub::default();
        for i in 0..6 {
            let name = format!("copy{i}.jpg");
            let path = fx.file(&name, &content);
            let mtime = filetime::FileTime::from_unix_time(1_500_000_000 + i as i64 * 60, 0);
            filetime::set_file_mtime(&path, mtime).unwrap();
            stub = stub.jpeg(&name, "2017:01:01 01:01:01");
        }
        let mut options = fx.options();
        options.max_concurrency = 6;
        let p = pipeline(options, stub);

        let (summary, _) = run(&p);
        assert_eq!(summary.copied, 1);
        assert_eq!(summary.duplicates, 5);
        let day = fx.out("2017/01/01");
        let names: Vec<_> = fs::read_dir(&day)
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec!["20170101-010101.jpg"]);
    }

    #[test]
    fn test_companions_follow_primary() {
        let fx = Fixture::new();
        fx.file("IMG_1.HEIC", b"heic");
        fx.file("IMG_1.MOV", b"mov");
        fx.file("IMG_1.aae", b"aae");
        fx.file("IMG_1.HEIC.xmp", b"xmp");
        let mut options = fx.options();
        options.mode = TransferMode::Move;
        let stub = Stub::default().with("IMG_1.HEIC", "image/heic", Some("2017:01:01 01:01:01"));
        let p = pipeline(options, stub);

        let (summary, reports) = run(&p);
        for name in ["20170101-010101.heic", "20170101-010101.mov", "20170101-010101.aae", "20170101-010101.heic.xmp"] {
            assert!(fx.out(&format!("2017/01/01/{name}")).exists(), "{name}");
        }
        let mov = reports
            .iter()
            .find(|r| r.source.ends_with("IMG_1.MOV"))
            .unwrap();
        assert_eq!(mov.outcome, Outcome::Vanished);
        assert!(reports
            .iter()
            .filter(|r| r.outcome == Outcome::Sidecar)
            .all(|r| media::is_sidecar(&r.source)));
        assert_eq!(summary.moved, 1);
        assert_eq!(summary.processed, 2);
    }

    #[test]
    fn test_filters() {
        let fx = Fixture::new();
        let old = fx.file("old.jpg", b"old");
        fx.file("new.jpg", b"new");
        fx.file("nodate.jpg", b"?");
        let stub = || {
            Stub::default()
                .jpeg("old.jpg", "2016:06:01 12:00:00")
                .jpeg("new.jpg", "2018:06:01 12:00:00")
                .with("nodate.jpg", "image/jpeg", None)
        };

        let mut options = fx.options();
        options.from_date = Some("2017-01-01".into());
        options.skip_unknown = true;
        let (summary, reports) = run(&pipeline(options, stub()));
        let outcome = |name: &str| {
            reports
                .iter()
                .find(|r| r.source.ends_with(name))
                .map(|r| r.outcome.clone())
                .unwrap()
        };
        assert!(matches!(outcome("old.jpg"), Outcome::SkippedOutOfRange { .. }));
        assert_eq!(outcome("nodate.jpg"), Outcome::SkippedUnknownDate);
        assert!(matches!(outcome("new.jpg"), Outcome::Relocated { .. }));
        assert_eq!(summary.unknown, 1);
        assert_eq!(summary.copied, 1);
        assert!(old.exists());
        assert!(!fx.out("unknown/nodate.jpg").exists());

        let mut options = fx.options();
        options.file_type = Some(FileType::Video);
        let (summary, reports) = run(&pipeline(options, stub()));
        assert!(reports.iter().all(|r| r.outcome
            == Outcome::SkippedFileType {
                found: Some(FileType::Image)
            }));
        assert_eq!(summary.processed, 3);
        assert_eq!(summary.relocated(), 0);
    }

    #[test]
    fn test_link_mode() {
        let fx = Fixture::new();
        let source = fx.file("a.jpg", b"linked");
        let mut options = fx.options();
        options.mode = TransferMode::Link;
        let (summary, _) = run(&pipeline(options, Stub::default().jpeg("a.jpg", "2017:01:01 01:01:01")));
        assert_eq!(summary.linked, 1);
        assert!(source.exists());
        assert_eq!(fs::read(fx.out("2017/01/01/20170101-010101.jpg")).unwrap(), b"linked");
    }

    #[test]
    fn test_vanished_file() {
        let fx = Fixture::new();
        let p = pipeline(fx.options(), Stub::default().jpeg("gone.jpg", "2017:01:01 01:01:01"));
        let outcome = p.process_file(&fx.input.path().join("gone.jpg"));
        assert_eq!(outcome, Outcome::Vanished);
        assert_eq!(p.stats().snapshot(false, false).processed, 1);
    }

    #[test]
    fn test_cancelled_run_stops_dispatching() {
        let fx = Fixture::new();
        fx.file("a.jpg", b"a");
        let p = pipeline(fx.options(), Stub::default());
        let token = CancellationToken::new();
        token.cancel();

        let summary = p.run(Some(&token), &|_| {}).unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.processed, 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_end_to_end_with_worker() {
        let fx = Fixture::new();
        let tools = tempfile::tempdir().unwrap();
        fx.file("DSC_0001.JPG", b"jpeg");
        fx.file("sub/DSC_0002.JPG", b"other jpeg");

        let mut options = fx.options();
        options.exiftool = crate::metadata::fake::config(tools.path(), "exiftool.sh", crate::metadata::fake::STAY_OPEN);
        let summary = crate::process(&options, &|_| {}).unwrap();

        assert_eq!(summary.copied, 2);
        assert_eq!(fs::read(fx.out("2017/01/01/20170101-010101.jpg")).unwrap(), b"jpeg");
        assert_eq!(fs::read(fx.out("2017/01/01/20170101-010101-2.jpg")).unwrap(), b"other jpeg");
    }
}
