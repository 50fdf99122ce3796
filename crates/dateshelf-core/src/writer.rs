use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf, MAIN_SEPARATOR};

use chrono::NaiveDate;
use filetime::FileTime;
use serde::{Deserialize, Serialize};

use crate::date::format::DirFormat;
use crate::date::ResolvedDate;
use crate::media::{self, FileTask, FileType};

/// What happens to a file once its destination is free.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferMode {
    Move,
    Link,
    #[default]
    Copy,
}

impl std::fmt::Display for TransferMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Move => f.write_str("move"),
            Self::Link => f.write_str("link"),
            Self::Copy => f.write_str("copy"),
        }
    }
}

/// Builds destination directories and names under the output root.
#[derive(Debug, Clone)]
pub struct Destinations {
    output: PathBuf,
    prefix: Option<String>,
    suffix: Option<String>,
    no_date_dir: String,
    format: DirFormat,
    original_filenames: bool,
    dry_run: bool,
}

impl Destinations {
    pub fn new(output: impl Into<PathBuf>) -> Self {
        Self {
            output: output.into(),
            prefix: None,
            suffix: None,
            no_date_dir: crate::DEFAULT_NO_DATE_DIR.to_string(),
            format: DirFormat::default(),
            original_filenames: false,
            dry_run: false,
        }
    }

    pub fn with_prefix(mut self, prefix: Option<String>) -> Self {
        self.prefix = prefix.filter(|p| !p.is_empty());
        self
    }

    pub fn with_suffix(mut self, suffix: Option<String>) -> Self {
        self.suffix = suffix.filter(|s| !s.is_empty());
        self
    }

    pub fn with_no_date_dir(mut self, name: impl Into<String>) -> Self {
        self.no_date_dir = name.into();
        self
    }

    pub fn with_format(mut self, format: DirFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_original_filenames(mut self, enabled: bool) -> Self {
        self.original_filenames = enabled;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// `output/[prefix]/<date dir or no-date dir>/[suffix]`, created unless
    /// this is a dry run. The flag is true for the no-date directory.
    pub fn directory(&self, date: Option<NaiveDate>) -> io::Result<(PathBuf, bool)> {
        let dated = date.and_then(|d| self.format.format(d));
        let undated = dated.is_none();
        let middle = dated.unwrap_or_else(|| self.no_date_dir.clone());

        let mut dir = self.output.clone();
        for part in [self.prefix.as_deref(), Some(middle.as_str()), self.suffix.as_deref()]
            .into_iter()
            .flatten()
        {
            // A leading separator would make `join` discard everything before it.
            let part = part.trim_start_matches(|c| c == '/' || c == '\\' || c == MAIN_SEPARATOR);
            if !part.is_empty() {
                dir.push(part);
            }
        }

        if !self.dry_run && !dir.is_dir() {
            fs::create_dir_all(&dir)?;
        }
        Ok((dir, undated))
    }

    /// Destination name for a media file: `YYYYMMDD-HHMMSS<subseconds><.ext>`
    /// lowercased, the lowercased base name when the date is unknown, or the
    /// untouched base name when original names are kept.
    pub fn media_name(&self, source: &Path, date: &ResolvedDate) -> String {
        let base = base_name(source);
        if self.original_filenames {
            return base;
        }
        let name = match date.instant {
            Some(instant) => {
                let ext = source
                    .extension()
                    .map(|e| format!(".{}", e.to_string_lossy()))
                    .unwrap_or_default();
                format!("{}{}{}", instant.format("%Y%m%d-%H%M%S"), date.subseconds, ext)
            }
            None => base,
        };
        name.to_lowercase()
    }

    /// Work out where `source` goes. Files without a media type keep their
    /// name and land in the no-date directory.
    pub fn plan(
        &self,
        source: &Path,
        file_type: Option<FileType>,
        date: ResolvedDate,
    ) -> io::Result<FileTask> {
        let (date, file_name) = match file_type {
            Some(_) => {
                let name = self.media_name(source, &date);
                (date, name)
            }
            None => (ResolvedDate::unknown(), base_name(source)),
        };
        let (directory, undated) = self.directory(date.instant.map(|i| i.date()))?;
        Ok(FileTask {
            source: source.to_path_buf(),
            file_type,
            date,
            directory,
            undated,
            file_name,
            suffix: 1,
        })
    }
}

fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

const COPY_BUFFER: usize = 8 * 1024 * 1024;

/// Move, link or copy `source` to `target`. Never replaces an existing
/// target: a taken name fails with `AlreadyExists`, so concurrent workers
/// racing for the same name can retry with the next suffix.
pub fn transfer(mode: TransferMode, source: &Path, target: &Path) -> io::Result<()> {
    match mode {
        TransferMode::Move => move_file(source, target),
        TransferMode::Link => fs::hard_link(source, target),
        TransferMode::Copy => copy_file(source, target),
    }
}

/// Link `source` in at `target`, then drop the old name. Falls back to copy
/// plus delete when the link cannot be made (across file systems, or on
/// file systems without hard links).
fn move_file(source: &Path, target: &Path) -> io::Result<()> {
    match fs::hard_link(source, target) {
        Ok(()) => {}
        Err(e) if matches!(e.kind(), io::ErrorKind::AlreadyExists | io::ErrorKind::NotFound) => {
            return Err(e)
        }
        Err(e) => {
            tracing::debug!(
                path = %source.display(),
                error = %e,
                "cannot link, copying instead"
            );
            copy_file(source, target)?;
        }
    }
    match fs::remove_file(source) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Copy content, permissions and times into a staging file next to
/// `target`, then give it the final name only if that name is still free.
/// The target never exists half-written; the staging file is removed on any
/// failure.
pub fn copy_file(source: &Path, target: &Path) -> io::Result<()> {
    let meta = fs::metadata(source)?;
    let mut reader = File::open(source)?;
    let dir = target.parent().unwrap_or_else(|| Path::new("."));
    let mut staged = tempfile::Builder::new()
        .prefix(".dateshelf-")
        .suffix(".part")
        .tempfile_in(dir)?;

    let mut writer = BufWriter::with_capacity(COPY_BUFFER, staged.as_file_mut());
    io::copy(&mut reader, &mut writer)?;
    writer.into_inner().map_err(io::IntoInnerError::into_error)?;

    filetime::set_file_times(
        staged.path(),
        FileTime::from_last_access_time(&meta),
        FileTime::from_last_modification_time(&meta),
    )?;
    fs::set_permissions(staged.path(), meta.permissions())?;
    staged.persist_noclobber(target).map_err(|e| e.error)?;
    Ok(())
}

/// A file that travels with a primary one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Companion {
    pub source: PathBuf,
    pub target: PathBuf,
}

/// Every place a companion of `task.source` could be, paired with where it
/// would go. Candidates are not checked for existence.
pub fn companion_candidates(task: &FileTask) -> Vec<Companion> {
    let source = &task.source;
    let stem = source.with_extension("");
    let target_name = task.target_name();
    let (dest_stem, _) = media::split_name(&task.file_name);
    let tag = task.suffix_tag();
    let mut out = Vec::new();

    // photo.jpg.xmp
    for ext in ["xmp", "XMP"] {
        out.push(Companion {
            source: append_ext(source, ext),
            target: task.directory.join(format!("{target_name}.xmp")),
        });
    }

    // photo.xmp, photo.aae, photo.json
    for ext in media::SIDECAR_EXTENSIONS {
        for variant in [ext.to_string(), ext.to_ascii_uppercase()] {
            out.push(Companion {
                source: append_ext(&stem, &variant),
                target: task.directory.join(format!("{dest_stem}{tag}.{ext}")),
            });
        }
    }

    // Live photo videos
    let ext = media::extension_lower(source).unwrap_or_default();
    for video in media::paired_video_extensions(&ext) {
        for variant in [video.to_string(), video.to_ascii_uppercase()] {
            out.push(Companion {
                source: append_ext(&stem, &variant),
                target: task.directory.join(format!("{dest_stem}{tag}.{video}")),
            });
        }
    }

    out
}

fn append_ext(path: &Path, ext: &str) -> PathBuf {
    let mut s = OsString::from(path.as_os_str());
    s.push(".");
    s.push(ext);
    PathBuf::from(s)
}

/// Transfer the companions of `task` that exist. A companion whose target is
/// taken is left alone, and one that fails is logged without holding up the
/// rest. Returns how many were transferred (or would have been, in a dry
/// run).
pub fn transfer_companions(mode: TransferMode, dry_run: bool, task: &FileTask) -> usize {
    let mut count = 0;
    for companion in companion_candidates(task) {
        // Re-probed per candidate: on case-insensitive file systems both
        // spellings name the same file, and a move empties the second.
        if !companion.source.is_file() {
            continue;
        }
        tracing::info!(
            path = %companion.source.display(),
            destination = %companion.target.display(),
            "companion"
        );
        if dry_run {
            count += 1;
            continue;
        }
        match transfer(mode, &companion.source, &companion.target) {
            Ok(()) => count += 1,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                tracing::info!(
                    destination = %companion.target.display(),
                    "skipping companion, target exists"
                );
            }
            Err(e) => {
                tracing::warn!(
                    path = %companion.source.display(),
                    error = %e,
                    "companion transfer failed"
                );
            }
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32, h: u32, mi: u32, s: u32, sub: &str) -> ResolvedDate {
        ResolvedDate {
            instant: NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(h, mi, s),
            subseconds: sub.to_string(),
            offset: None,
        }
    }

    #[test]
    fn test_directory_layout() {
        let out = tempfile::tempdir().unwrap();
        let dest = Destinations::new(out.path());
        let day = NaiveDate::from_ymd_opt(2017, 1, 1);

        let (dir, undated) = dest.directory(day).unwrap();
        assert_eq!(dir, out.path().join("2017").join("01").join("01"));
        assert!(!undated);
        assert!(dir.is_dir());

        let (dir, undated) = dest.directory(None).unwrap();
        assert_eq!(dir, out.path().join("unknown"));
        assert!(undated);
    }

    #[test]
    fn test_directory_prefix_suffix_and_dry_run() {
        let out = tempfile::tempdir().unwrap();
        let dest = Destinations::new(out.path())
            .with_prefix(Some("phone".into()))
            .with_suffix(Some("raw".into()))
            .with_no_date_dir("undated")
            .with_format(DirFormat::parse("/YYYY-MM"))
            .with_dry_run(true);

        let (dir, _) = dest.directory(NaiveDate::from_ymd_opt(2020, 7, 4)).unwrap();
        assert_eq!(dir, out.path().join("phone").join("2020-07").join("raw"));
        assert!(!dir.exists());

        let (dir, undated) = dest.directory(None).unwrap();
        assert_eq!(dir, out.path().join("phone").join("undated").join("raw"));
        assert!(undated);
    }

    #[test]
    fn test_media_names() {
        let dest = Destinations::new("/out");
        let source = Path::new("/in/IMG_0001.JPG");
        assert_eq!(dest.media_name(source, &date(2017, 1, 1, 1, 1, 1, "")), "20170101-010101.jpg");
        assert_eq!(
            dest.media_name(source, &date(2017, 1, 1, 1, 1, 1, "047")),
            "20170101-010101047.jpg"
        );
        assert_eq!(dest.media_name(source, &ResolvedDate::unknown()), "img_0001.jpg");

        let dest = dest.with_original_filenames(true);
        assert_eq!(dest.media_name(source, &date(2017, 1, 1, 1, 1, 1, "")), "IMG_0001.JPG");
    }

    #[test]
    fn test_plan_passthrough_keeps_name() {
        let out = tempfile::tempdir().unwrap();
        let dest = Destinations::new(out.path());
        let task = dest
            .plan(Path::new("/in/Notes.TXT"), None, date(2017, 1, 1, 1, 1, 1, ""))
            .unwrap();
        assert_eq!(task.file_name, "Notes.TXT");
        assert!(task.undated);
        assert!(!task.date.is_known());
        assert_eq!(task.target_path(), out.path().join("unknown").join("Notes.TXT"));
    }

    #[test]
    fn test_copy_preserves_times() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.jpg");
        let dst = dir.path().join("b.jpg");
        fs::write(&src, b"pixels").unwrap();
        let mtime = FileTime::from_unix_time(1_483_232_461, 0);
        filetime::set_file_mtime(&src, mtime).unwrap();

        transfer(TransferMode::Copy, &src, &dst).unwrap();
        assert!(src.exists());
        assert_eq!(fs::read(&dst).unwrap(), b"pixels");
        let meta = fs::metadata(&dst).unwrap();
        assert_eq!(FileTime::from_last_modification_time(&meta), mtime);
    }

    #[test]
    fn test_move_and_link() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.jpg");
        fs::write(&src, b"pixels").unwrap();

        let linked = dir.path().join("linked.jpg");
        transfer(TransferMode::Link, &src, &linked).unwrap();
        assert!(src.exists());
        assert_eq!(fs::read(&linked).unwrap(), b"pixels");

        let moved = dir.path().join("moved.jpg");
        transfer(TransferMode::Move, &src, &moved).unwrap();
        assert!(!src.exists());
        assert_eq!(fs::read(&moved).unwrap(), b"pixels");

        let err = transfer(TransferMode::Move, &src, &dir.path().join("again.jpg")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_transfers_never_replace_a_taken_name() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.jpg");
        let taken = dir.path().join("taken.jpg");
        fs::write(&src, b"pixels").unwrap();
        fs::write(&taken, b"already here").unwrap();

        for mode in [TransferMode::Copy, TransferMode::Move, TransferMode::Link] {
            let err = transfer(mode, &src, &taken).unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::AlreadyExists, "{mode}");
        }
        assert_eq!(fs::read(&taken).unwrap(), b"already here");
        assert_eq!(fs::read(&src).unwrap(), b"pixels");

        // No staging file is left behind.
        let mut names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        names.sort();
        assert_eq!(names, vec!["a.jpg", "taken.jpg"]);
    }

    #[test]
    fn test_copy_leaves_only_the_target() {
        let input = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let src = input.path().join("a.jpg");
        fs::write(&src, vec![7u8; 3 * COPY_BUFFER / 2]).unwrap();

        let dst = out.path().join("b.jpg");
        copy_file(&src, &dst).unwrap();
        assert_eq!(fs::read(&dst).unwrap(), fs::read(&src).unwrap());
        assert_eq!(fs::read_dir(out.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_companion_targets() {
        let task = FileTask {
            source: PathBuf::from("/in/IMG_1.HEIC"),
            file_type: Some(FileType::Image),
            date: date(2017, 1, 1, 1, 1, 1, ""),
            directory: PathBuf::from("/out/2017"),
            undated: false,
            file_name: "20170101-010101.heic".into(),
            suffix: 2,
        };
        let candidates = companion_candidates(&task);
        let find = |src: &str| {
            candidates
                .iter()
                .find(|c| c.source == Path::new(src))
                .map(|c| c.target.clone())
        };

        assert_eq!(
            find("/in/IMG_1.HEIC.xmp"),
            Some(PathBuf::from("/out/2017/20170101-010101-2.heic.xmp"))
        );
        assert_eq!(
            find("/in/IMG_1.XMP"),
            Some(PathBuf::from("/out/2017/20170101-010101-2.xmp"))
        );
        assert_eq!(
            find("/in/IMG_1.aae"),
            Some(PathBuf::from("/out/2017/20170101-010101-2.aae"))
        );
        assert_eq!(
            find("/in/IMG_1.MOV"),
            Some(PathBuf::from("/out/2017/20170101-010101-2.mov"))
        );
        assert_eq!(find("/in/IMG_1.mkv"), None);
    }

    #[test]
    fn test_transfer_companions_skips_taken_targets() {
        let input = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let source = input.path().join("IMG_1.jpg");
        fs::write(&source, b"jpg").unwrap();
        fs::write(input.path().join("IMG_1.xmp"), b"xmp").unwrap();
        fs::write(input.path().join("IMG_1.mov"), b"mov").unwrap();
        fs::write(out.path().join("20170101-010101.mov"), b"other").unwrap();

        let task = FileTask {
            source,
            file_type: Some(FileType::Image),
            date: date(2017, 1, 1, 1, 1, 1, ""),
            directory: out.path().to_path_buf(),
            undated: false,
            file_name: "20170101-010101.jpg".into(),
            suffix: 1,
        };

        assert_eq!(transfer_companions(TransferMode::Move, true, &task), 2);
        assert!(input.path().join("IMG_1.xmp").exists());

        assert_eq!(transfer_companions(TransferMode::Move, false, &task), 1);
        assert!(!input.path().join("IMG_1.xmp").exists());
        assert_eq!(fs::read(out.path().join("20170101-010101.xmp")).unwrap(), b"xmp");
        assert!(input.path().join("IMG_1.mov").exists());
        assert_eq!(fs::read(out.path().join("20170101-010101.mov")).unwrap(), b"other");
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_companion_does_not_stop_the_rest() {
        let input = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let source = input.path().join("a.jpg");
        fs::write(&source, b"jpg").unwrap();
        fs::write(input.path().join("a.jpg.xmp"), b"xmp").unwrap();
        fs::write(input.path().join("a.aae"), b"aae").unwrap();

        // `<name>.jpg.xmp` runs past the file name limit, `<name>.aae` does not.
        let stem = "x".repeat(248);
        let task = FileTask {
            source,
            file_type: Some(FileType::Image),
            date: date(2017, 1, 1, 1, 1, 1, ""),
            directory: out.path().to_path_buf(),
            undated: false,
            file_name: format!("{stem}.jpg"),
            suffix: 1,
        };

        assert_eq!(transfer_companions(TransferMode::Link, false, &task), 1);
        assert_eq!(fs::read(out.path().join(format!("{stem}.aae"))).unwrap(), b"aae");
    }
}
