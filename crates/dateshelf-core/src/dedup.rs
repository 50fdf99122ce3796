use std::fs::{self, File};
use std::io;
use std::path::Path;

use sha2::{Digest, Sha256};

/// Whether `source` is a copy of the file already at `target`.
///
/// Sizes must match. Equal modification times are taken as proof; otherwise
/// the SHA-256 digests of both contents decide. Errors (typically
/// `NotFound` when one side vanished) are left to the caller.
pub fn is_duplicate(source: &Path, target: &Path) -> io::Result<bool> {
    let source_meta = fs::metadata(source)?;
    let target_meta = fs::metadata(target)?;

    if source_meta.len() != target_meta.len() {
        return Ok(false);
    }

    if let (Ok(a), Ok(b)) = (source_meta.modified(), target_meta.modified()) {
        if a == b {
            return Ok(true);
        }
    }

    let source_hash = content_hash(source)?;
    let target_hash = content_hash(target)?;
    tracing::trace!(
        source = %source.display(),
        %source_hash,
        %target_hash,
        "compared contents"
    );
    Ok(source_hash == target_hash)
}

/// Hex SHA-256 of a file, streamed.
pub fn content_hash(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}
