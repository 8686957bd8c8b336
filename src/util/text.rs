use std::borrow::Cow;

fn is_stripped_control(c: char) -> bool {
    c == '\u{7f}' || (c < '\u{20}' && c != '\t' && c != '\n' && c != '\r')
}

/// Removes control characters and ANSI escape sequences from feed text.
///
/// Tabs, newlines and carriage returns are preserved. CSI (`ESC [ ... final`)
/// and OSC (`ESC ] ... BEL|ST`) sequences are removed whole so no parameter
/// bytes leak into the digest.
///
/// Returns `Cow::Borrowed` when nothing needed stripping.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    if !s.chars().any(is_stripped_control) {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\u{1b}' {
            match chars.peek() {
                Some('[') => {
                    chars.next();
                    // Parameter and intermediate bytes run until a final byte in 0x40..=0x7e
                    for n in chars.by_ref() {
                        if ('\u{40}'..='\u{7e}').contains(&n) {
                            break;
                        }
                    }
                }
                Some(']') => {
                    chars.next();
                    while let Some(n) = chars.next() {
                        if n == '\u{07}' {
                            break;
                        }
                        if n == '\u{1b}' && chars.peek() == Some(&'\\') {
                            chars.next();
                            break;
                        }
                    }
                }
                _ => {}
            }
        } else if !is_stripped_control(c) {
            out.push(c);
        }
    }

    Cow::Owned(out)
}

/// Flattens an HTML snippet from a feed into a single line of plain text.
///
/// Tags are dropped, the handful of entities that news aggregators actually
/// emit are decoded, control characters are removed and whitespace runs are
/// collapsed to a single space.
///
/// ```
/// use newsbrief::util::flatten_snippet;
///
/// let raw = r#"<a href="https://x">Chip exports rise</a>&nbsp;&nbsp;<font>Reuters</font>"#;
/// assert_eq!(flatten_snippet(raw), "Chip exports rise Reuters");
/// ```
pub fn flatten_snippet(s: &str) -> String {
    let mut text = String::with_capacity(s.len());
    let mut in_tag = false;

    for c in s.chars() {
        match c {
            '<' => {
                in_tag = true;
                // Adjacent block elements would otherwise glue words together
                text.push(' ');
            }
            '>' if in_tag => in_tag = false,
            _ if !in_tag => text.push(c),
            _ => {}
        }
    }

    let decoded = decode_entities(&text);
    let cleaned = strip_control_chars(&decoded);
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn decode_entities(s: &str) -> Cow<'_, str> {
    if !s.contains('&') {
        return Cow::Borrowed(s);
    }

    // &amp; goes last so "&amp;lt;" decodes to the literal "&lt;"
    Cow::Owned(
        s.replace("&nbsp;", " ")
            .replace("&#160;", " ")
            .replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&quot;", "\"")
            .replace("&#39;", "'")
            .replace("&#x27;", "'")
            .replace("&apos;", "'")
            .replace("&amp;", "&"),
    )
}

/// Escapes text for inclusion in HTML element content or a quoted attribute.
pub fn escape_html(s: &str) -> Cow<'_, str> {
    if !s.contains(['&', '<', '>', '"', '\'']) {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len() + 16);
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    Cow::Owned(out)
}
