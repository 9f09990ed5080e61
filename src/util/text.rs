use std::borrow::Cow;
use std::sync::OnceLock;

use regex::Regex;

/// Ellipsis appended to text cut by [`truncate_chars`]
const ELLIPSIS: &str = "...";

fn markup_regex() -> &'static Regex {
    static MARKUP: OnceLock<Regex> = OnceLock::new();
    MARKUP.get_or_init(|| Regex::new(r"<[^>]+>").expect("static markup pattern"))
}

fn whitespace_regex() -> &'static Regex {
    static WHITESPACE: OnceLock<Regex> = OnceLock::new();
    WHITESPACE.get_or_init(|| Regex::new(r"\s+").expect("static whitespace pattern"))
}

fn img_src_regex() -> &'static Regex {
    static IMG_SRC: OnceLock<Regex> = OnceLock::new();
    IMG_SRC.get_or_init(|| {
        Regex::new(r#"(?i)<img[^>]+src=["']([^"']+)["']"#).expect("static img pattern")
    })
}

/// Turns an HTML fragment from a feed into a short plain-text excerpt.
///
/// HTML entities are decoded before tags are removed, so escaped markup is
/// stripped too. Control characters are then removed and runs of whitespace
/// collapsed to a single space. The result is cut to
/// `max_chars` characters with `...` appended when anything was dropped.
///
/// # Examples
///
/// ```
/// use feedrelay::util::clean_description;
///
/// let text = clean_description("<p>Rust&nbsp;1.80\n\n is <b>out</b></p>", 200);
/// assert_eq!(text, "Rust 1.80 is out");
/// ```
pub fn clean_description(html: &str, max_chars: usize) -> String {
    let decoded = html_escape::decode_html_entities(html);
    let without_tags = markup_regex().replace_all(&decoded, " ");
    let safe = strip_control_chars(&without_tags);
    let collapsed = whitespace_regex().replace_all(&safe, " ");
    truncate_chars(collapsed.trim(), max_chars).into_owned()
}

/// Cuts `s` to at most `max_chars` characters, appending `...` if it was cut.
///
/// Counts Unicode scalar values, so multi-byte text is never split inside a
/// code point. Returns `Cow::Borrowed` when the string already fits.
pub fn truncate_chars(s: &str, max_chars: usize) -> Cow<'_, str> {
    match s.char_indices().nth(max_chars) {
        None => Cow::Borrowed(s),
        Some((byte_idx, _)) => Cow::Owned(format!("{}{}", &s[..byte_idx], ELLIPSIS)),
    }
}

/// Returns the `src` of the first `<img>` tag in an HTML fragment.
pub fn first_image_src(html: &str) -> Option<String> {
    img_src_regex()
        .captures(html)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|src| !src.is_empty())
}

/// SEC-001: Strip terminal control characters and ANSI escape sequences from text.
///
/// Feed titles and summaries end up in log lines, console digests and webhook
/// payloads, so anything that could drive a terminal is removed first.
///
/// Strips:
/// - ASCII control chars: 0x00-0x08, 0x0B-0x0C, 0x0E-0x1F, 0x7F
/// - ANSI CSI sequences: `\x1b[` ... (terminal byte 0x40-0x7E)
/// - ANSI OSC sequences: `\x1b]` ... (until BEL 0x07 or ST `\x1b\\`)
/// - Bare ESC (0x1b) not followed by `[` or `]`
///
/// Preserves: tab (0x09), newline (0x0A), carriage return (0x0D).
///
/// Returns `Cow::Borrowed` when the input contains no control characters (common case).
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    let bytes = s.as_bytes();
    let len = bytes.len();

    let is_control =
        |b: u8| b == 0x1b || b == 0x7f || (b < 0x20 && b != 0x09 && b != 0x0a && b != 0x0d);

    if !bytes.iter().any(|&b| is_control(b)) {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(len);
    let mut i = 0;

    while i < len {
        let b = bytes[i];

        if b == 0x1b {
            if i + 1 < len && bytes[i + 1] == b'[' {
                // CSI: parameter/intermediate bytes until the final byte
                i += 2;
                while i < len {
                    let c = bytes[i];
                    i += 1;
                    if (0x40..=0x7e).contains(&c) {
                        break;
                    }
                }
            } else if i + 1 < len && bytes[i + 1] == b']' {
                // OSC: everything until BEL or ST
                i += 2;
                while i < len {
                    if bytes[i] == 0x07 {
                        i += 1;
                        break;
                    }
                    if bytes[i] == 0x1b && i + 1 < len && bytes[i + 1] == b'\\' {
                        i += 2;
                        break;
                    }
                    i += 1;
                }
            } else {
                i += 1;
            }
        } else if is_control(b) {
            i += 1;
        } else {
            let start = i;
            i += 1;
            while i < len && !is_control(bytes[i]) {
                i += 1;
            }
            // SAFETY: we only break on ASCII control bytes, which cannot appear
            // mid-codepoint in valid UTF-8, so s[start..i] is valid UTF-8.
            out.push_str(&s[start..i]);
        }
    }

    Cow::Owned(out)
}
