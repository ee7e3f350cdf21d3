//! Pure text helpers used at the chat boundary.
//!
//! Markdown escaping for untrusted game text, size-bounded chunking for chat
//! and in-game broadcasts, and the compact duration syntax (`3h50m`, `30m`)
//! accepted by moderator commands.

use std::time::Duration;

/// Maximum size of a single chat reply before it is split on line boundaries.
pub const CHAT_MESSAGE_LIMIT: usize = 1800;

/// Maximum width of an in-game `say` broadcast (without the `say ` prefix).
pub const SERVER_MESSAGE_WIDTH: usize = 63 - 3;

const MARKDOWN_SPECIAL: &[char] = &[
    '\\', '`', '*', '_', '{', '}', '[', ']', '(', ')', '#', '+', '-', '.', '!',
];

/// Escapes untrusted input for use outside of inline code blocks.
pub fn escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + input.len() / 4);
    for c in input.chars() {
        if MARKDOWN_SPECIAL.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Wraps input in an inline code block with enough backticks to contain it.
pub fn wrap_in_inline_code(input: &str) -> String {
    if input.is_empty() {
        return String::new();
    }
    let fence = "`".repeat(input.matches('`').count() + 1);
    format!("{fence}{input}{fence}")
}

/// Splits `text` into chunks of at most `max_chars` bytes, cutting only at
/// `delimiter`. The delimiter stays attached to the token before it.
///
/// A single token longer than `max_chars` is emitted as an oversized chunk
/// rather than being cut in half.
pub fn split(text: &str, delimiter: &str, max_chars: usize) -> Vec<String> {
    if text.len() <= max_chars {
        return vec![text.to_string()];
    }

    let tokens: Vec<&str> = text.split(delimiter).collect();
    let mut result = Vec::with_capacity(text.len() / max_chars.max(1) + 1);
    let mut current = String::with_capacity(max_chars + max_chars / 2);

    for (idx, token) in tokens.iter().enumerate() {
        let suffix = if idx + 1 < tokens.len() { delimiter } else { "" };
        let growth = token.len() + suffix.len();

        if growth <= max_chars && current.len() + growth > max_chars && !current.is_empty() {
            result.push(std::mem::take(&mut current));
        }
        current.push_str(token);
        current.push_str(suffix);
    }

    if !current.is_empty() {
        result.push(current);
    }
    result
}

/// Splits a message into word-boundary chunks of at most `width` bytes,
/// rejoined with single spaces. Words are never broken; a lone word wider
/// than `width` becomes its own chunk.
pub fn split_words(text: &str, width: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut buffer: Vec<&str> = Vec::new();
    let mut buffered_len = 0;

    for word in text.split(' ').filter(|w| !w.is_empty()) {
        if !buffer.is_empty() && buffered_len + buffer.len() + word.len() > width {
            chunks.push(buffer.join(" "));
            buffer.clear();
            buffered_len = 0;
        }
        buffer.push(word);
        buffered_len += word.len();
    }

    if !buffer.is_empty() {
        chunks.push(buffer.join(" "));
    }
    chunks
}

/// Parses a duration in the compact `1h30m`, `45m`, `90s`, `1.5h` syntax.
///
/// Supported units are `h`, `m`, `s`, `ms`, `us`, `ns`. A bare `0` is allowed.
/// Returns `None` for anything else, including negative values.
pub fn parse_duration(input: &str) -> Option<Duration> {
    let input = input.trim();
    if input == "0" {
        return Some(Duration::ZERO);
    }
    if input.is_empty() {
        return None;
    }

    let mut total = 0f64;
    let mut rest = input;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return None;
        }
        let value: f64 = rest[..number_len].parse().ok()?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let seconds_per_unit = match &rest[..unit_len] {
            "h" => 3600.0,
            "m" => 60.0,
            "s" => 1.0,
            "ms" => 1e-3,
            "us" | "µs" => 1e-6,
            "ns" => 1e-9,
            _ => return None,
        };
        rest = &rest[unit_len..];
        total += value * seconds_per_unit;
    }

    Duration::try_from_secs_f64(total).ok()
}

/// Formats a duration rounded to whole seconds as `1h2m3s`, `5m0s` or `42s`.
pub fn format_duration(duration: Duration) -> String {
    let secs = (duration.as_millis() + 500) / 1000;
    let (hours, minutes, seconds) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if hours > 0 {
        format!("{hours}h{minutes}m{seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m{seconds}s")
    } else {
        format!("{seconds}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_markdown() {
        assert_eq!(escape("*bold* _it_"), "\\*bold\\* \\_it\\_");
        assert_eq!(escape("plain"), "plain");
        assert_eq!(escape("a.b-c!"), "a\\.b\\-c\\!");
    }

    #[test]
    fn test_inline_code_grows_fence() {
        assert_eq!(wrap_in_inline_code("abc"), "`abc`");
        assert_eq!(wrap_in_inline_code("a`b"), "``a`b``");
        assert_eq!(wrap_in_inline_code(""), "");
    }

    #[test]
    fn test_split_on_delimiter() {
        assert_eq!(split("1 2 3 4 5 6 ", " ", 20), vec!["1 2 3 4 5 6 "]);
        assert_eq!(
            split("1 2 3 4 5 6 ", " ", 2),
            vec!["1 ", "2 ", "3 ", "4 ", "5 ", "6 "]
        );
        assert_eq!(
            split("123 2 3 4 5 6 ", " ", 2),
            vec!["123 ", "2 ", "3 ", "4 ", "5 ", "6 "]
        );
        assert_eq!(
            split("123 1234 12345 123456 1234567 12345678 ", " ", 9),
            vec!["123 1234 ", "12345 ", "123456 ", "1234567 ", "12345678 "]
        );
    }

    #[test]
    fn test_split_never_exceeds_limit_for_short_words() {
        let text = vec!["a"; 100].join(" ");
        let chunks = split(&text, " ", 63);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.len() <= 63));
        assert_eq!(chunks.concat(), text);

        let words = split_words(&text, 63);
        assert!(words.iter().all(|c| c.len() <= 63));
        assert_eq!(words.join(" "), text);
    }

    #[test]
    fn test_split_words_matches_broadcast_width() {
        let exact = "123456789012345678901234567890123456789012345678901234567890";
        assert_eq!(split_words(exact, SERVER_MESSAGE_WIDTH), vec![exact]);
        assert_eq!(
            split_words("this is some short text", SERVER_MESSAGE_WIDTH),
            vec!["this is some short text"]
        );
        assert_eq!(
            split_words(
                "this is some rather ultra super duper long long text that should have some unnecessary characters.",
                SERVER_MESSAGE_WIDTH
            ),
            vec![
                "this is some rather ultra super duper long long text that",
                "should have some unnecessary characters.",
            ]
        );
        assert!(split_words("", SERVER_MESSAGE_WIDTH).is_empty());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30m"), Some(Duration::from_secs(1800)));
        assert_eq!(parse_duration("3h50m"), Some(Duration::from_secs(13800)));
        assert_eq!(parse_duration("1.5h"), Some(Duration::from_secs(5400)));
        assert_eq!(parse_duration("59s"), Some(Duration::from_secs(59)));
        assert_eq!(parse_duration("0"), Some(Duration::ZERO));
        assert_eq!(parse_duration("abc"), None);
        assert_eq!(parse_duration("10"), None);
        assert_eq!(parse_duration("-5m"), None);
        assert_eq!(parse_duration("5x"), None);
        assert_eq!(parse_duration("99999999999999999999999h"), None);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(3600)), "1h0m0s");
        assert_eq!(format_duration(Duration::from_secs(300)), "5m0s");
        assert_eq!(format_duration(Duration::from_secs(42)), "42s");
        assert_eq!(format_duration(Duration::from_millis(59_700)), "1m0s");
    }
}
