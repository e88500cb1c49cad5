use anyhow::{Result, anyhow, bail};
use encoding_rs::{EncoderResult, Encoding, UTF_8, WINDOWS_1252};

use crate::encoding::{EncodingKind, UTF8_BOM, UTF16BE_BOM, UTF16LE_BOM, detect};

pub const DEFAULT_LEGACY_LABEL: &str = "windows-1252";

/// A decoded file: UTF-16 code units plus what is needed to write it back
/// in the same shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedDocument {
    pub text: Vec<u16>,
    pub encoding: EncodingKind,
    pub had_bom: bool,
    /// Some input bytes were replaced with U+FFFD while decoding.
    pub lossy: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedText {
    pub bytes: Vec<u8>,
    /// Some characters could not be represented and were substituted.
    pub had_errors: bool,
}

/// Byte/text transform for the five encoding families. The only
/// configurable part is which code page stands in for `Legacy`.
#[derive(Debug, Clone, Copy)]
pub struct Codec {
    legacy: &'static Encoding,
}

impl Default for Codec {
    fn default() -> Self {
        Self {
            legacy: WINDOWS_1252,
        }
    }
}

impl Codec {
    pub fn new(legacy_label: Option<&str>) -> Result<Self> {
        let Some(label) = legacy_label else {
            return Ok(Self::default());
        };
        let trimmed = label.trim();
        let encoding = Encoding::for_label(trimmed.as_bytes())
            .ok_or_else(|| anyhow!("unknown legacy encoding '{trimmed}'"))?;
        // UTF-16 and "replacement" cannot be encoded back to themselves.
        if encoding.output_encoding() != encoding {
            bail!(
                "'{trimmed}' ({}) cannot be used as the legacy code page",
                encoding.name()
            );
        }
        Ok(Self { legacy: encoding })
    }

    pub fn legacy(&self) -> &'static Encoding {
        self.legacy
    }

    pub fn describe(&self) -> String {
        format!("BOM → UTF-8 check → legacy ({})", self.legacy().name())
    }

    /// Detects the encoding of `bytes` and decodes them with it.
    pub fn read(&self, bytes: &[u8]) -> DecodedDocument {
        self.decode(bytes, detect(bytes))
    }

    pub fn decode(&self, bytes: &[u8], encoding: EncodingKind) -> DecodedDocument {
        match encoding {
            EncodingKind::Utf8WithBom | EncodingKind::Utf8NoBom => {
                let (payload, had_bom) = match bytes.strip_prefix(&UTF8_BOM) {
                    Some(rest) if encoding == EncodingKind::Utf8WithBom => (rest, true),
                    _ => (bytes, false),
                };
                let (text, lossy) = decode_with(UTF_8, payload);
                DecodedDocument {
                    text,
                    encoding,
                    had_bom,
                    lossy,
                }
            }
            EncodingKind::Utf16Le => decode_utf16(bytes, encoding, &UTF16LE_BOM, u16::from_le_bytes),
            EncodingKind::Utf16Be => decode_utf16(bytes, encoding, &UTF16BE_BOM, u16::from_be_bytes),
            EncodingKind::Legacy => {
                let (text, lossy) = decode_with(self.legacy, bytes);
                DecodedDocument {
                    text,
                    encoding,
                    had_bom: false,
                    lossy,
                }
            }
        }
    }

    pub fn encode(&self, text: &[u16], encoding: EncodingKind, write_bom: bool) -> EncodedText {
        match encoding {
            EncodingKind::Utf8WithBom | EncodingKind::Utf8NoBom => {
                let (string, had_errors) = units_to_string(text);
                let mut bytes = Vec::with_capacity(string.len() + UTF8_BOM.len());
                if write_bom {
                    bytes.extend_from_slice(&UTF8_BOM);
                }
                bytes.extend_from_slice(string.as_bytes());
                EncodedText { bytes, had_errors }
            }
            EncodingKind::Utf16Le => encode_utf16(text, write_bom, &UTF16LE_BOM, u16::to_le_bytes),
            EncodingKind::Utf16Be => encode_utf16(text, write_bom, &UTF16BE_BOM, u16::to_be_bytes),
            EncodingKind::Legacy => {
                let (string, lossy) = units_to_string(text);
                let (bytes, had_errors) = encode_legacy(self.legacy, &string);
                EncodedText {
                    bytes,
                    had_errors: lossy || had_errors,
                }
            }
        }
    }
}

fn decode_with(encoding: &'static Encoding, bytes: &[u8]) -> (Vec<u16>, bool) {
    let (text, had_errors) = encoding.decode_without_bom_handling(bytes);
    (text.encode_utf16().collect(), had_errors)
}

/// Characters the code page cannot represent are written as `?`.
fn encode_legacy(encoding: &'static Encoding, text: &str) -> (Vec<u8>, bool) {
    let mut encoder = encoding.new_encoder();
    let mut bytes = Vec::with_capacity(text.len());
    let mut remaining = text;
    let mut had_errors = false;
    loop {
        let needed = encoder
            .max_buffer_length_from_utf8_without_replacement(remaining.len())
            .unwrap_or(remaining.len());
        bytes.reserve(needed.max(16));
        let (result, read) =
            encoder.encode_from_utf8_to_vec_without_replacement(remaining, &mut bytes, true);
        remaining = &remaining[read..];
        match result {
            EncoderResult::InputEmpty => break,
            EncoderResult::OutputFull => {}
            EncoderResult::Unmappable(_) => {
                had_errors = true;
                bytes.reserve(16);
                // through the encoder so stateful code pages stay in sync
                let _ = encoder.encode_from_utf8_to_vec_without_replacement("?", &mut bytes, false);
            }
        }
    }
    (bytes, had_errors)
}

fn decode_utf16(
    bytes: &[u8],
    encoding: EncodingKind,
    bom: &[u8; 2],
    unit: fn([u8; 2]) -> u16,
) -> DecodedDocument {
    let (payload, had_bom) = match bytes.strip_prefix(bom) {
        Some(rest) => (rest, true),
        None => (bytes, false),
    };
    // chunks_exact leaves an odd trailing byte in the remainder, which is dropped.
    let text = payload
        .chunks_exact(2)
        .map(|pair| unit([pair[0], pair[1]]))
        .collect();
    DecodedDocument {
        text,
        encoding,
        had_bom,
        lossy: false,
    }
}

fn encode_utf16(
    text: &[u16],
    write_bom: bool,
    bom: &[u8; 2],
    bytes_of: fn(u16) -> [u8; 2],
) -> EncodedText {
    let mut bytes = Vec::with_capacity(text.len() * 2 + bom.len());
    if write_bom {
        bytes.extend_from_slice(bom);
    }
    for &unit in text {
        bytes.extend_from_slice(&bytes_of(unit));
    }
    EncodedText {
        bytes,
        had_errors: false,
    }
}

/// Lone surrogates only appear in text read from UTF-16 files, which are
/// written back as UTF-16; anywhere else they become U+FFFD.
fn units_to_string(text: &[u16]) -> (String, bool) {
    let mut had_errors = false;
    let string: String = char::decode_utf16(text.iter().copied())
        .map(|unit| {
            unit.unwrap_or_else(|_| {
                had_errors = true;
                char::REPLACEMENT_CHARACTER
            })
        })
        .collect();
    (string, had_errors)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn units(text: &str) -> Vec<u16> {
        text.encode_utf16().collect()
    }

    #[test]
    fn legacy_override_validation() {
        let codec = Codec::new(Some(" windows-1250 ")).expect("valid encoding");
        assert_eq!(codec.legacy().name(), "windows-1250");
        assert!(Codec::new(Some("no-such-encoding")).is_err());
        assert!(Codec::new(Some("utf-16le")).is_err());
        assert_eq!(Codec::new(None).expect("default").legacy().name(), "windows-1252");
    }

    #[test]
    fn utf8_bom_is_stripped_and_remembered() {
        let codec = Codec::default();
        let doc = codec.read(&[0xEF, 0xBB, 0xBF, b'h', b'i']);
        assert_eq!(doc.encoding, EncodingKind::Utf8WithBom);
        assert!(doc.had_bom);
        assert_eq!(doc.text, units("hi"));
    }

    #[test]
    fn utf16_documents_decode_in_byte_order() {
        let codec = Codec::default();
        let le = codec.read(&[0xFF, 0xFE, b'a', 0x00, 0x42, 0x01]);
        assert_eq!(le.encoding, EncodingKind::Utf16Le);
        assert!(le.had_bom);
        assert_eq!(le.text, units("ał"));

        let be = codec.read(&[0xFE, 0xFF, 0x00, b'a', 0x01, 0x42]);
        assert_eq!(be.encoding, EncodingKind::Utf16Be);
        assert_eq!(be.text, units("ał"));
    }

    #[test]
    fn utf16_without_bom_decodes_whole_buffer() {
        let doc = Codec::default().decode(&[b'a', 0x00, b'b', 0x00], EncodingKind::Utf16Le);
        assert!(!doc.had_bom);
        assert_eq!(doc.text, units("ab"));
    }

    #[test]
    fn utf16_odd_trailing_byte_is_dropped() {
        let doc = Codec::default().read(&[0xFF, 0xFE, b'a', 0x00, b'b']);
        assert_eq!(doc.text, units("a"));
        assert!(!doc.lossy);
    }

    #[test]
    fn utf16_lone_surrogate_round_trips() {
        let codec = Codec::default();
        let bytes = [0xFF, 0xFE, 0x00, 0xD8, b'x', 0x00];
        let doc = codec.read(&bytes);
        assert_eq!(doc.text, vec![0xD800, u16::from(b'x')]);
        let encoded = codec.encode(&doc.text, doc.encoding, doc.had_bom);
        assert_eq!(encoded.bytes, bytes);
        assert!(!encoded.had_errors);
    }

    #[test]
    fn legacy_uses_configured_code_page() {
        let codec = Codec::new(Some("windows-1250")).expect("valid encoding");
        let doc = codec.read(&[b'a', 0xB3, b'b']);
        assert_eq!(doc.encoding, EncodingKind::Legacy);
        assert!(!doc.had_bom);
        assert_eq!(doc.text, units("ałb"));
        let encoded = codec.encode(&doc.text, EncodingKind::Legacy, false);
        assert_eq!(encoded.bytes, vec![b'a', 0xB3, b'b']);
    }

    #[test]
    fn legacy_unmappable_characters_become_question_marks() {
        let encoded = Codec::default().encode(&units("café 漢字!"), EncodingKind::Legacy, false);
        assert!(encoded.had_errors);
        assert_eq!(encoded.bytes, vec![b'c', b'a', b'f', 0xE9, b' ', b'?', b'?', b'!']);

        let clean = Codec::default().encode(&units("naïve"), EncodingKind::Legacy, false);
        assert!(!clean.had_errors);
        assert_eq!(clean.bytes, vec![b'n', b'a', 0xEF, b'v', b'e']);
    }

    #[test]
    fn overlong_utf8_decodes_lossy() {
        let doc = Codec::default().read(&[b'a', 0xC0, 0xAF]);
        assert_eq!(doc.encoding, EncodingKind::Utf8NoBom);
        assert!(doc.lossy);
        assert_eq!(doc.text[0], u16::from(b'a'));
        assert!(doc.text[1..].contains(&0xFFFD));
    }

    #[test]
    fn round_trip_law_per_encoding() {
        let codec = Codec::default();
        let text = units("first line\nzażółć gęślą jaźń\n😀 end");
        let cases = [
            (EncodingKind::Utf8WithBom, true),
            (EncodingKind::Utf8NoBom, false),
            (EncodingKind::Utf16Le, true),
            (EncodingKind::Utf16Le, false),
            (EncodingKind::Utf16Be, true),
            (EncodingKind::Utf16Be, false),
        ];
        for (kind, bom) in cases {
            let encoded = codec.encode(&text, kind, bom);
            assert!(!encoded.had_errors, "{kind}");
            let decoded = codec.decode(&encoded.bytes, kind);
            assert_eq!(decoded.text, text, "{kind} bom={bom}");
            assert_eq!(decoded.had_bom, bom, "{kind} bom={bom}");
        }

        let latin = units("café\r\nnaïve");
        let encoded = codec.encode(&latin, EncodingKind::Legacy, false);
        let decoded = codec.decode(&encoded.bytes, EncodingKind::Legacy);
        assert_eq!(decoded.text, latin);
        assert!(!decoded.had_bom);
    }

    #[test]
    fn bom_written_only_when_requested() {
        let codec = Codec::default();
        let text = units("x");
        assert_eq!(
            codec.encode(&text, EncodingKind::Utf8WithBom, true).bytes,
            vec![0xEF, 0xBB, 0xBF, b'x']
        );
        assert_eq!(codec.encode(&text, EncodingKind::Utf8NoBom, false).bytes, b"x");
        assert_eq!(
            codec.encode(&text, EncodingKind::Utf16Be, true).bytes,
            vec![0xFE, 0xFF, 0x00, b'x']
        );
        assert_eq!(
            codec.encode(&text, EncodingKind::Utf16Le, false).bytes,
            vec![b'x', 0x00]
        );
    }
}
