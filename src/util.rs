/// Shorten a response body for an error message.
///
/// Whitespace runs collapse to one space and the result is cut on a char
/// boundary at `max_bytes`, with `...` marking a cut.
pub fn body_excerpt(text: &str, max_bytes: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.len() <= max_bytes {
        return collapsed;
    }
    let end = collapsed
        .char_indices()
        .map(|(idx, ch)| idx + ch.len_utf8())
        .take_while(|end| *end <= max_bytes)
        .last()
        .unwrap_or(0);
    format!("{}...", &collapsed[..end])
}
