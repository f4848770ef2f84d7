//! Text-vs-binary classification
//!
//! Binary files are excluded from upload. Classification looks only at the
//! first 1 KiB: a NUL byte marks the buffer binary, and so does a high ratio
//! of other control characters.

/// How many leading bytes are inspected
const PREFIX_LEN: usize = 1024;

/// Fraction of non-printable bytes above which the buffer counts as binary
const NON_PRINTABLE_THRESHOLD: f64 = 0.3;

/// Classify a byte buffer as binary.
///
/// An empty buffer is not binary. Any NUL in the first [`PREFIX_LEN`] bytes
/// marks it binary; otherwise bytes below 0x20 other than tab, newline, and
/// carriage return are counted and the buffer is binary when their share of
/// the prefix exceeds [`NON_PRINTABLE_THRESHOLD`].
#[must_use]
pub fn is_binary(content: &[u8]) -> bool {
    if content.is_empty() {
        return false;
    }

    let prefix = &content[..content.len().min(PREFIX_LEN)];

    if prefix.contains(&0) {
        return true;
    }

    let non_printable = prefix
        .iter()
        .filter(|&&b| b < 32 && b != b'\t' && b != b'\n' && b != b'\r')
        .count();

    non_printable as f64 / prefix.len() as f64 > NON_PRINTABLE_THRESHOLD
}
