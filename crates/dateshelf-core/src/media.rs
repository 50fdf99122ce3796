use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::date::ResolvedDate;

/// Extensions worth asking exiftool about (lowercase, without the dot).
pub const MEDIA_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "jpe", "png", "gif", "bmp", "tif", "tiff", "heic", "heif", "avif", "jxl", "dng",
    "cr2", "cr3", "nef", "arw", "orf", "raf", "rw2", "srw", "pef", "mp4", "mov", "m4v", "avi",
    "mts", "m2ts", "3gp", "mkv",
];

/// Metadata sidecars (Adobe XMP, Apple AAE, Google JSON). They only travel
/// with their primary file.
pub const SIDECAR_EXTENSIONS: &[&str] = &["xmp", "aae", "json"];

/// Still formats that phones pair with a short "live" video of the same stem.
const PAIRED_VIDEO_EXTENSIONS: &[(&str, &[&str])] = &[
    ("heic", &["mov", "mp4"]),
    ("heif", &["mov", "mp4"]),
    ("jpg", &["mov", "mp4"]),
    ("jpeg", &["mov", "mp4"]),
    ("dng", &["mov", "mp4"]),
    ("raf", &["mov", "mp4"]),
];

/// OS clutter never worth sorting.
pub const IGNORED_FILES: &[&str] = &[".DS_Store", "Thumbs.db"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Image,
    Video,
}

impl FileType {
    /// Classify a MIME type reported by exiftool.
    pub fn from_mime(mime: &str) -> Option<Self> {
        let (kind, subtype) = mime.split_once('/')?;
        match kind {
            "image" if !subtype.is_empty() => Some(Self::Image),
            "application" if subtype == "vnd.adobe.photoshop" => Some(Self::Image),
            "video" => Some(Self::Video),
            _ => None,
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Image => f.write_str("image"),
            Self::Video => f.write_str("video"),
        }
    }
}

impl FromStr for FileType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "image" => Ok(Self::Image),
            "video" => Ok(Self::Video),
            other => Err(format!("unknown file type '{other}', expected image or video")),
        }
    }
}

/// Lowercased extension of `path`, without the dot.
pub fn extension_lower(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

pub fn is_media(path: &Path) -> bool {
    extension_lower(path).is_some_and(|e| MEDIA_EXTENSIONS.contains(&e.as_str()))
}

pub fn is_sidecar(path: &Path) -> bool {
    extension_lower(path).is_some_and(|e| SIDECAR_EXTENSIONS.contains(&e.as_str()))
}

pub fn is_ignored(file_name: &str) -> bool {
    IGNORED_FILES.contains(&file_name)
}

/// Live-video extensions that may accompany a still with extension `ext`.
pub fn paired_video_extensions(ext: &str) -> &'static [&'static str] {
    PAIRED_VIDEO_EXTENSIONS
        .iter()
        .find(|(still, _)| *still == ext)
        .map(|(_, videos)| *videos)
        .unwrap_or(&[])
}

/// One input file on its way to the output tree.
#[derive(Debug, Clone)]
pub struct FileTask {
    /// Where the file is now
    pub source: PathBuf,
    /// From the MIME type; `None` for non-media or unreadable files
    pub file_type: Option<FileType>,
    /// Resolved capture date (unknown for passthrough files)
    pub date: ResolvedDate,
    /// Destination directory
    pub directory: PathBuf,
    /// Whether `directory` is the no-date directory
    pub undated: bool,
    /// Destination name before disambiguation
    pub file_name: String,
    /// 1 for the plain name, 2.. for `name-2.ext`, ...
    pub suffix: u32,
}

impl FileTask {
    /// Destination name with the current disambiguation suffix.
    pub fn target_name(&self) -> String {
        with_suffix(&self.file_name, self.suffix)
    }

    pub fn target_path(&self) -> PathBuf {
        self.directory.join(self.target_name())
    }

    /// `-N` for suffixed targets, empty otherwise.
    pub fn suffix_tag(&self) -> String {
        if self.suffix > 1 {
            format!("-{}", self.suffix)
        } else {
            String::new()
        }
    }
}

/// `photo.jpg` -> `photo-3.jpg` for `suffix` 3; suffix 1 leaves the name alone.
pub fn with_suffix(file_name: &str, suffix: u32) -> String {
    if suffix <= 1 {
        return file_name.to_string();
    }
    let (stem, ext) = split_name(file_name);
    format!("{stem}-{suffix}{ext}")
}

/// Split `name.ext` into `("name", ".ext")`; names without an extension (or
/// dot files) get an empty extension.
pub fn split_name(file_name: &str) -> (&str, &str) {
    match file_name.rfind('.') {
        Some(pos) if pos > 0 => file_name.split_at(pos),
        _ => (file_name, ""),
    }
}
