use std::borrow::Cow;

/// Bytes before the cut in which a newline is preferred as the cut point.
pub const TAIL_MARGIN: usize = 100;

/// Fit `text` into `max_len` bytes, appending `marker` when anything is cut.
///
/// The cut lands on the last newline within [`TAIL_MARGIN`] bytes of the
/// limit when there is one, otherwise on the last char boundary.
#[must_use]
pub fn truncate_message<'a>(text: &'a str, max_len: usize, marker: &str) -> Cow<'a, str> {
    if text.len() <= max_len {
        return Cow::Borrowed(text);
    }
    if marker.len() >= max_len {
        return Cow::Borrowed(&text[..text.floor_char_boundary(max_len)]);
    }

    let budget = text.floor_char_boundary(max_len - marker.len());
    let head = &text[..budget];
    let cut = match head.rfind('\n') {
        Some(nl) if budget - nl <= TAIL_MARGIN => nl,
        _ => budget,
    };

    let kept = head[..cut].trim_end();
    let mut out = String::with_capacity(kept.len() + marker.len());
    out.push_str(kept);
    out.push_str(marker);
    Cow::Owned(out)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    const MARKER: &str = "\n[cut]";

    #[test]
    fn short_text_is_untouched() {
        assert!(matches!(
            truncate_message("hello", 10, MARKER),
            Cow::Borrowed("hello")
        ));
    }

    #[rstest]
    #[case(50)]
    #[case(100)]
    #[case(333)]
    #[case(4_096)]
    fn result_never_exceeds_limit(#[case] limit: usize) {
        let text = "word ".repeat(2_000);
        let out = truncate_message(&text, limit, MARKER);
        assert!(out.len() <= limit, "{} > {limit}", out.len());
        assert!(out.ends_with(MARKER));
    }

    #[test]
    fn prefers_newline_inside_tail_margin() {
        let text = format!("{}\n{}", "a".repeat(950), "b".repeat(200));
        let out = truncate_message(&text, 1_000, MARKER);
        assert_eq!(out, format!("{}{MARKER}", "a".repeat(950)));
    }

    #[test]
    fn ignores_newline_outside_tail_margin() {
        let text = format!("{}\n{}", "a".repeat(500), "b".repeat(1_000));
        let out = truncate_message(&text, 1_000, MARKER);
        assert_eq!(out.len(), 1_000);
        assert!(out.starts_with(&"a".repeat(500)));
        assert!(out.trim_end_matches(MARKER).ends_with('b'));
    }

    #[test]
    fn never_splits_a_multibyte_char() {
        let text = format!("{}л{}", "a".repeat(4_089), "z".repeat(10));
        let out = truncate_message(&text, 4_096, MARKER);
        assert!(out.len() <= 4_096);
        assert_eq!(out, format!("{}{MARKER}", "a".repeat(4_089)));
    }

    #[test]
    fn oversized_marker_falls_back_to_plain_cut() {
        let out = truncate_message("abcdefgh", 4, "[truncated]");
        assert_eq!(out, "abcd");
    }
}
