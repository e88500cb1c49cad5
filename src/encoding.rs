use std::fmt;

use serde::Serialize;

pub const UTF8_BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];
pub const UTF16LE_BOM: [u8; 2] = [0xFF, 0xFE];
pub const UTF16BE_BOM: [u8; 2] = [0xFE, 0xFF];

/// The five encoding families a file can be classified into. Detection
/// happens once per file and the same kind is used to write it back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EncodingKind {
    Utf8WithBom,
    Utf8NoBom,
    Utf16Le,
    Utf16Be,
    Legacy,
}

impl EncodingKind {
    /// Whether this family can carry a byte-order mark at all.
    pub fn supports_bom(self) -> bool {
        !matches!(self, EncodingKind::Utf8NoBom | EncodingKind::Legacy)
    }
}

impl fmt::Display for EncodingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EncodingKind::Utf8WithBom => "utf-8 (bom)",
            EncodingKind::Utf8NoBom => "utf-8",
            EncodingKind::Utf16Le => "utf-16le",
            EncodingKind::Utf16Be => "utf-16be",
            EncodingKind::Legacy => "legacy",
        };
        f.write_str(label)
    }
}

/// Classifies a raw buffer: BOM first, then the structural UTF-8 check,
/// then the legacy fallback. An empty buffer is `Legacy`.
pub fn detect(bytes: &[u8]) -> EncodingKind {
    if bytes.starts_with(&UTF8_BOM) {
        return EncodingKind::Utf8WithBom;
    }
    if bytes.starts_with(&UTF16LE_BOM) {
        return EncodingKind::Utf16Le;
    }
    if bytes.starts_with(&UTF16BE_BOM) {
        return EncodingKind::Utf16Be;
    }
    if !bytes.is_empty() && is_structurally_utf8(bytes) {
        return EncodingKind::Utf8NoBom;
    }

    EncodingKind::Legacy
}

/// Checks lead/continuation byte shapes only. Overlong forms, surrogate
/// code points and values above U+10FFFF pass as long as the bit patterns
/// line up; detection of existing files depends on this leniency.
pub fn is_structurally_utf8(bytes: &[u8]) -> bool {
    let mut idx = 0;
    while idx < bytes.len() {
        let lead = bytes[idx];
        let width = match lead {
            b if b <= 0x7F => 1,
            b if b >> 5 == 0b110 => 2,
            b if b >> 4 == 0b1110 => 3,
            b if b >> 3 == 0b1_1110 => 4,
            _ => return false,
        };
        let Some(tail) = bytes.get(idx + 1..idx + width) else {
            return false;
        };
        if !tail.iter().all(|b| b >> 6 == 0b10) {
            return false;
        }
        idx += width;
    }
    true
}
