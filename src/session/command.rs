//! Outbound command normalization.
//!
//! The engine evaluates statements terminated by `;` (display result) or
//! `$` (suppress result). Comments are stripped before sending because an
//! unterminated comment would swallow every following command.

/// Prefix of commands evaluated by the lisp reader; sent untouched.
const LISP_PREFIX: &str = ":lisp";

/// Turn submitted text into the statement written to the socket.
///
/// Returns `None` when nothing but whitespace and comments remains.
#[must_use]
pub fn normalize(text: &str) -> Option<String> {
    let stripped = strip_comments(text);
    let statement = stripped.trim();
    if statement.is_empty() {
        return None;
    }

    if statement.starts_with(LISP_PREFIX) || statement.ends_with(';') || statement.ends_with('$')
    {
        Some(statement.to_owned())
    } else {
        Some(format!("{statement};"))
    }
}

/// Remove `/* … */` comments, honouring nesting and string literals.
///
/// An unterminated comment runs to the end of the text.
#[must_use]
pub fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut depth = 0usize;
    let mut in_string = false;

    while let Some(ch) = chars.next() {
        if depth > 0 {
            match (ch, chars.peek()) {
                ('*', Some('/')) => {
                    chars.next();
                    depth -= 1;
                }
                ('/', Some('*')) => {
                    chars.next();
                    depth += 1;
                }
                _ => {}
            }
            continue;
        }

        if in_string {
            out.push(ch);
            match ch {
                '\\' => {
                    if let Some(escaped) = chars.next() {
                        out.push(escaped);
                    }
                }
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match (ch, chars.peek()) {
            ('/', Some('*')) => {
                chars.next();
                depth = 1;
            }
            ('"', _) => {
                in_string = true;
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }

    out
}
