use std::borrow::Cow;

const CR: u16 = b'\r' as u16;
const LF: u16 = b'\n' as u16;

/// Collapses every CRLF pair into a single LF. Lone CR and lone LF are kept.
pub fn to_lf(text: &[u16]) -> Cow<'_, [u16]> {
    if !text.windows(2).any(|pair| pair == [CR, LF]) {
        return Cow::Borrowed(text);
    }
    let mut normalized = Vec::with_capacity(text.len());
    let mut units = text.iter().copied().peekable();
    while let Some(unit) = units.next() {
        if unit == CR && units.peek() == Some(&LF) {
            continue;
        }
        normalized.push(unit);
    }
    Cow::Owned(normalized)
}

/// Expands every LF not already preceded by CR into CRLF.
///
/// `to_crlf(to_lf(x)) == x` holds when `x` uses only CRLF or only LF breaks.
/// Mixed input comes back with every break as CRLF, and a lone CR that
/// happens to sit right before an LF produced by `to_lf` is merged into it.
pub fn to_crlf(text: &[u16]) -> Cow<'_, [u16]> {
    let bare_lf = |idx: usize| text[idx] == LF && (idx == 0 || text[idx - 1] != CR);
    if !(0..text.len()).any(bare_lf) {
        return Cow::Borrowed(text);
    }
    let mut expanded = Vec::with_capacity(text.len() + text.len() / 8);
    for (idx, &unit) in text.iter().enumerate() {
        if bare_lf(idx) {
            expanded.push(CR);
        }
        expanded.push(unit);
    }
    Cow::Owned(expanded)
}

/// Convenience for caller-supplied search/replacement text.
pub fn str_to_lf(text: &str) -> Cow<'_, str> {
    if text.contains("\r\n") {
        Cow::Owned(text.replace("\r\n", "\n"))
    } else {
        Cow::Borrowed(text)
    }
}
