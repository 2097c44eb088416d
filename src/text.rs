/// Invisible characters that show up in caption payloads and break copy/paste.
const INVISIBLE: [char; 4] = ['\u{200B}', '\u{200C}', '\u{200D}', '\u{FEFF}'];

/// Decode HTML entities, strip zero-width characters and collapse whitespace.
///
/// Decoding and stripping repeat until the text stops changing, so
/// double-escaped captions (`&amp;#39;`) come out fully decoded and the
/// function is idempotent. Every changing pass makes the string shorter,
/// which bounds the loop.
pub fn normalize_text(raw: &str) -> String {
    let mut current = strip_invisible(raw);
    loop {
        let decoded = strip_invisible(&html_escape::decode_html_entities(&current));
        if decoded == current {
            break;
        }
        current = decoded;
    }
    collapse_whitespace(&current)
}

fn strip_invisible(s: &str) -> String {
    s.chars().filter(|c| !INVISIBLE.contains(c)).collect()
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
