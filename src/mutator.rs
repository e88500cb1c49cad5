use std::ffi::OsString;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::codec::Codec;
use crate::encoding::EncodingKind;
use crate::error::{BackupError, FileError};
use crate::line_endings::{to_crlf, to_lf};

const BACKUP_SUFFIX: &str = ".bak";

#[derive(Debug, Clone, Copy, Default)]
pub struct MutateOptions {
    /// Count matches but never back up or write.
    pub dry_run: bool,
    /// Rewrite files whose decoding substituted U+FFFD.
    pub allow_lossy: bool,
}

#[derive(Debug)]
pub enum BackupStatus {
    Created(PathBuf),
    Failed(BackupError),
}

/// What happened to one file that did not fail outright.
#[derive(Debug)]
pub struct FileReport {
    pub replacements: usize,
    pub encoding: EncodingKind,
    pub had_bom: bool,
    pub backup: Option<BackupStatus>,
    pub written: bool,
    /// The file was rewritten even though decoding was lossy.
    pub lossy_decode: bool,
    /// Some replaced characters have no representation in the file's encoding.
    pub lossy_encode: bool,
}

impl FileReport {
    fn untouched(replacements: usize, encoding: EncodingKind, had_bom: bool) -> Self {
        Self {
            replacements,
            encoding,
            had_bom,
            backup: None,
            written: false,
            lossy_decode: false,
            lossy_encode: false,
        }
    }
}

/// Replaces every literal occurrence of `search` with `replace` in the file
/// at `path`, keeping its encoding and BOM.
///
/// Both texts are expected in LF-only form, and `replace` must not end with
/// an LF; callers enforce that before a run starts. An empty `search` is a
/// no-op. A file with no match is left alone. Otherwise the file is
/// converted to CRLF breaks, copied to `<path>.bak` (best effort, a failed
/// backup does not stop the write) and overwritten in place.
pub fn process_file(
    path: &Path,
    search: &[u16],
    replace: &[u16],
    codec: &Codec,
    options: &MutateOptions,
) -> Result<FileReport, FileError> {
    let bytes = fs::read(path).map_err(|source| FileError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let decoded = codec.read(&bytes);
    let encoding = decoded.encoding;
    let had_bom = decoded.had_bom;
    debug_assert!(!had_bom || encoding.supports_bom());
    let text = to_lf(&decoded.text);

    if search.is_empty() {
        return Ok(FileReport::untouched(0, encoding, had_bom));
    }

    let (replaced, count) = replace_literal(&text, search, replace);
    if count == 0 {
        return Ok(FileReport::untouched(0, encoding, had_bom));
    }
    if decoded.lossy && !options.allow_lossy {
        return Err(FileError::Decode {
            path: path.to_path_buf(),
            encoding,
        });
    }
    if options.dry_run {
        return Ok(FileReport::untouched(count, encoding, had_bom));
    }

    let output = to_crlf(&replaced);
    let backup = Some(create_backup(path));
    let encoded = codec.encode(&output, encoding, had_bom);
    write_in_place(path, &encoded.bytes).map_err(|source| FileError::Write {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(FileReport {
        replacements: count,
        encoding,
        had_bom,
        backup,
        written: true,
        lossy_decode: decoded.lossy,
        lossy_encode: encoded.had_errors,
    })
}

/// Non-overlapping, left-to-right literal replacement. Scanning resumes
/// after the matched input, so inserted text is never searched again.
pub fn replace_literal(text: &[u16], search: &[u16], replace: &[u16]) -> (Vec<u16>, usize) {
    if search.is_empty() {
        return (text.to_vec(), 0);
    }
    let mut output = Vec::with_capacity(text.len());
    let mut cursor = 0;
    let mut count = 0;
    while let Some(offset) = find(&text[cursor..], search) {
        output.extend_from_slice(&text[cursor..cursor + offset]);
        output.extend_from_slice(replace);
        cursor += offset + search.len();
        count += 1;
    }
    output.extend_from_slice(&text[cursor..]);
    (output, count)
}

fn find(haystack: &[u16], needle: &[u16]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(BACKUP_SUFFIX);
    PathBuf::from(name)
}

/// Copies the file as it is on disk, replacing any older backup.
fn create_backup(path: &Path) -> BackupStatus {
    let backup = backup_path(path);
    match fs::copy(path, &backup) {
        Ok(_) => BackupStatus::Created(backup),
        Err(source) => BackupStatus::Failed(BackupError { backup, source }),
    }
}

// Truncates and rewrites the original file. A failure part way through
// leaves the file contents undefined; the backup is the recovery path.
fn write_in_place(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(data)?;
    file.sync_all()
}
