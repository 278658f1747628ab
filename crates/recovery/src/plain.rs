//! Reduce markdown-style rich text to its literal content.
//!
//! Used when the platform rejects a formatted update: the same text goes out
//! again with every formatting marker removed. Markers without a closing
//! counterpart are left alone, so `2 * 3` or `snake_case` survive intact.

/// Paired inline markers, longest first.
const PAIRED: &[&str] = &["**", "__", "~~", "||", "*", "_"];

/// Strip bold, italic, underline, strikethrough, spoiler, inline code and
/// links, de-fence code blocks, drop heading hashes and markdown escapes.
#[must_use]
pub fn strip_rich_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    strip_into(text, &mut out);
    out
}

fn strip_into(text: &str, out: &mut String) {
    let mut rest = text;
    while let Some(ch) = rest.chars().next() {
        let at_line_start = out.is_empty() || out.ends_with('\n');

        // Heading: "## Title" at the start of a line.
        if at_line_start && ch == '#' {
            let hashes = rest.bytes().take_while(|&b| b == b'#').count();
            if hashes <= 6 && rest[hashes..].starts_with(' ') {
                rest = &rest[hashes + 1..];
                continue;
            }
        }

        // Fenced code: keep the body, drop the fences and language tag.
        if let Some(after) = rest.strip_prefix("```") {
            let line_end = after.find('\n');
            match after.find("```") {
                // Single-line ```code```.
                Some(close) if line_end.is_none_or(|nl| close < nl) => {
                    out.push_str(&after[..close]);
                    rest = &after[close + 3..];
                },
                _ => {
                    let body = line_end.map_or("", |nl| &after[nl + 1..]);
                    match body.find("```") {
                        Some(close) => {
                            out.push_str(body[..close].trim_end_matches('\n'));
                            rest = &body[close + 3..];
                        },
                        None => {
                            out.push_str(body.trim_end_matches('\n'));
                            rest = "";
                        },
                    }
                },
            }
            continue;
        }

        // Inline code: contents are literal.
        if ch == '`'
            && let Some(close) = rest[1..].find('`')
        {
            out.push_str(&rest[1..=close]);
            rest = &rest[close + 2..];
            continue;
        }

        // Escaped punctuation: "\*" -> "*".
        if ch == '\\'
            && let Some(next) = rest[1..].chars().next()
            && next.is_ascii_punctuation()
        {
            out.push(next);
            rest = &rest[1 + next.len_utf8()..];
            continue;
        }

        // Link: [text](url) -> "text (url)".
        if ch == '['
            && let Some((label, url, consumed)) = parse_link(rest)
        {
            strip_into(label, out);
            if !url.is_empty() && url != label {
                out.push_str(" (");
                out.push_str(url);
                out.push(')');
            }
            rest = &rest[consumed..];
            continue;
        }

        if let Some((inner, consumed)) = paired_marker(rest, out) {
            strip_into(inner, out);
            rest = &rest[consumed..];
            continue;
        }

        out.push(ch);
        rest = &rest[ch.len_utf8()..];
    }
}

/// Match `[label](url)` at the start of `text`.
fn parse_link(text: &str) -> Option<(&str, &str, usize)> {
    let close_label = text.find(']')?;
    let after_label = &text[close_label + 1..];
    if !after_label.starts_with('(') {
        return None;
    }
    let close_url = after_label.find(')')?;
    let label = &text[1..close_label];
    let url = &after_label[1..close_url];
    if label.contains('\n') || url.contains(char::is_whitespace) {
        return None;
    }
    Some((label, url, close_label + 1 + close_url + 1))
}

/// Match an inline marker pair at the start of `text`, returning the enclosed
/// text and the number of bytes consumed.
fn paired_marker<'a>(text: &'a str, out: &str) -> Option<(&'a str, usize)> {
    let marker = PAIRED.iter().find(|m| text.starts_with(**m))?;
    let body = &text[marker.len()..];

    // An opening marker must hug its content: "* item" and "a * b" are literal.
    if body.starts_with(char::is_whitespace) || body.is_empty() {
        return None;
    }
    // Underscores inside words (snake_case) are not emphasis.
    if marker.starts_with('_') && out.chars().next_back().is_some_and(char::is_alphanumeric) {
        return None;
    }

    let close = find_closing(body, marker)?;
    let inner = &body[..close];
    if inner.is_empty() || inner.contains("\n\n") {
        return None;
    }
    Some((inner, marker.len() + close + marker.len()))
}

fn find_closing(body: &str, marker: &str) -> Option<usize> {
    let mut from = 0;
    while let Some(found) = body[from..].find(marker) {
        let at = from + found;
        let before = body[..at].chars().next_back();
        let after = body[at + marker.len()..].chars().next();
        let closes = before.is_some_and(|c| !c.is_whitespace())
            // "**bold**" must not close a single "*" at its first star.
            && !(marker.len() == 1 && after == marker.chars().next())
            && !(marker == "_" && after.is_some_and(char::is_alphanumeric));
        if closes {
            // "***both***": close at the end of the run so the inner "*" pairs up.
            if marker.len() == 2 {
                let unit = &marker[..1];
                let run = body[at..].len() - body[at..].trim_start_matches(unit).len();
                return Some(at + run - marker.len());
            }
            return Some(at);
        }
        from = at + marker.len();
    }
    None
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[rstest]
    #[case("**bold**", "bold")]
    #[case("*italic* text", "italic text")]
    #[case("_italic_ text", "italic text")]
    #[case("__underline__", "underline")]
    #[case("~~gone~~", "gone")]
    #[case("||spoiler||", "spoiler")]
    #[case("use `cargo build` here", "use cargo build here")]
    #[case("***both***", "both")]
    #[case("**bold _and italic_**", "bold and italic")]
    #[case("see [docs](https://example.com)", "see docs (https://example.com)")]
    #[case("[https://x.io](https://x.io)", "https://x.io")]
    #[case("## Heading\nbody", "Heading\nbody")]
    #[case("escaped \\*star\\*", "escaped *star*")]
    fn strips_markers(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(strip_rich_text(input), expected);
    }

    #[rstest]
    #[case("2 * 3 = 6")]
    #[case("snake_case_name")]
    #[case("a lone ** pair")]
    #[case("[not a link] (spaced)")]
    #[case("#hashtag")]
    #[case("plain words only")]
    #[case("")]
    fn leaves_literal_text_alone(#[case] input: &str) {
        assert_eq!(strip_rich_text(input), input);
    }

    #[test]
    fn defences_code_blocks() {
        let input = "Example:\n```rust\nfn main() {\n    println!(\"**hi**\");\n}\n```\ndone";
        assert_eq!(
            strip_rich_text(input),
            "Example:\nfn main() {\n    println!(\"**hi**\");\n}\ndone"
        );
    }

    #[test]
    fn unterminated_code_block_keeps_body() {
        let input = "```python\nprint(1)\n";
        assert_eq!(strip_rich_text(input), "print(1)");
    }

    #[test]
    fn single_line_fence() {
        assert_eq!(strip_rich_text("run ```ls -la``` now"), "run ls -la now");
    }

    #[test]
    fn multibyte_content_survives() {
        assert_eq!(strip_rich_text("**héllo** wörld 👋"), "héllo wörld 👋");
    }
}
