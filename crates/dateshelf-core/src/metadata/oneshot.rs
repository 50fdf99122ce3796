//! One `exiftool` process per file, used when the persistent worker is
//! unavailable.

use std::path::{Path, MAIN_SEPARATOR};
use std::process::{Command, Stdio};

use super::{parse_output, ExifToolConfig, MetadataRecord, EXIFTOOL_FLAGS};

/// Run `exiftool` once for `path` (already absolute).
pub fn fetch(config: &ExifToolConfig, path: &Path) -> Option<MetadataRecord> {
    tracing::debug!(command = %command_line(config, path), "running one-shot exiftool");

    let output = match Command::new(&config.program)
        .args(&config.prefix_args)
        .args(EXIFTOOL_FLAGS)
        .arg(path)
        .stdin(Stdio::null())
        .output()
    {
        Ok(output) => output,
        Err(e) => {
            tracing::debug!(error = %e, "cannot run exiftool");
            return None;
        }
    };

    if !output.status.success() {
        tracing::debug!(
            status = ?output.status.code(),
            stderr = %String::from_utf8_lossy(&output.stderr).trim(),
            path = %path.display(),
            "exiftool failed"
        );
        return None;
    }

    let data = String::from_utf8(output.stdout).ok()?;
    parse_output(&data)
}

/// The equivalent shell command line, for logs.
pub fn command_line(config: &ExifToolConfig, path: &Path) -> String {
    let mut parts = vec![quote_path(&config.program.to_string_lossy())];
    parts.extend(config.prefix_args.iter().map(|a| quote_path(a)));
    parts.extend(EXIFTOOL_FLAGS.iter().map(|f| f.to_string()));
    parts.push(quote_path(&path.to_string_lossy()));
    parts.join(" ")
}

/// Quote a path for the host shell.
pub fn quote_path(path: &str) -> String {
    quote_path_for(path, MAIN_SEPARATOR)
}

/// Hosts with `\` separators get double quotes; everything else gets POSIX
/// single quoting.
pub fn quote_path_for(path: &str, separator: char) -> String {
    if separator == '\\' {
        return format!("\"{path}\"");
    }
    if !path.is_empty()
        && path
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "@%+=:,./_-".contains(c))
    {
        return path.to_string();
    }
    format!("'{}'", path.replace('\'', r#"'"'"'"#))
}
