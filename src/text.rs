//! Post-processing for summarizer output

/// Trim `text` so it ends at its second-to-last sentence boundary.
///
/// A boundary is a `.` that is either the last character or is followed by a
/// space. With fewer than two boundaries the input is returned untouched;
/// otherwise the prefix up to and including the second-to-last boundary is
/// returned with surrounding whitespace removed.
///
/// Summarizer models tend to cut off mid-sentence at their token limit, so the
/// final "sentence" is dropped even when it looks complete.
pub fn trim_to_boundary(text: &str) -> String {
    let bytes = text.as_bytes();
    let boundaries: Vec<usize> = bytes
        .iter()
        .enumerate()
        .filter(|&(i, &b)| b == b'.' && (i + 1 == bytes.len() || bytes[i + 1] == b' '))
        .map(|(i, _)| i)
        .collect();

    match boundaries.len() {
        0 | 1 => text.to_string(),
        n => text[..=boundaries[n - 2]].trim().to_string(),
    }
}
