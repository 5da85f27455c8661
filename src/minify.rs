//! Conservative minifiers for production builds.
//!
//! Both minifiers only strip comments and collapse whitespace; identifiers
//! and statements are never rewritten. Comments opening with `/*!` are kept,
//! as are line breaks that automatic semicolon insertion may depend on.

/// Whitespace seen between two tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gap {
    Space,
    Newline,
}

impl Gap {
    fn widen(current: Option<Gap>, next: Gap) -> Option<Gap> {
        match (current, next) {
            (Some(Gap::Newline), _) | (_, Gap::Newline) => Some(Gap::Newline),
            _ => Some(Gap::Space),
        }
    }
}

/// Keywords after which a `/` starts a regular expression
const REGEX_KEYWORDS: &[&str] = &[
    "return", "typeof", "case", "do", "else", "in", "instanceof", "new", "void", "delete", "throw",
    "yield", "await",
];

#[inline]
fn is_word_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_' || ch == '$'
}

/// Minify JavaScript by removing comments and redundant whitespace
pub fn js(source: &str) -> String {
    let chars: Vec<char> = source.chars().collect();
    let mut out = String::with_capacity(source.len());
    let mut gap: Option<Gap> = None;
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        let next = chars.get(i + 1).copied();

        match ch {
            '"' | '\'' | '`' => {
                flush_js_gap(&mut out, &mut gap, ch);
                let end = skip_string(&chars, i);
                out.extend(&chars[i..end]);
                i = end;
            }
            '/' if next == Some('/') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                gap = Gap::widen(gap, Gap::Space);
            }
            '/' if next == Some('*') => {
                let end = find_block_end(&chars, i + 2);
                let comment = &chars[i..end];
                if chars.get(i + 2) == Some(&'!') {
                    flush_js_gap(&mut out, &mut gap, '/');
                    out.extend(comment);
                    gap = Some(Gap::Newline);
                } else if comment.contains(&'\n') {
                    gap = Gap::widen(gap, Gap::Newline);
                } else {
                    gap = Gap::widen(gap, Gap::Space);
                }
                i = end;
            }
            '/' if regex_allowed(&out) => match skip_regex(&chars, i) {
                Some(end) => {
                    flush_js_gap(&mut out, &mut gap, '/');
                    out.extend(&chars[i..end]);
                    i = end;
                }
                None => {
                    flush_js_gap(&mut out, &mut gap, '/');
                    out.push('/');
                    i += 1;
                }
            },
            c if c.is_whitespace() => {
                let kind = if c == '\n' || c == '\r' {
                    Gap::Newline
                } else {
                    Gap::Space
                };
                gap = Gap::widen(gap, kind);
                i += 1;
            }
            c => {
                flush_js_gap(&mut out, &mut gap, c);
                out.push(c);
                i += 1;
            }
        }
    }

    out
}

fn flush_js_gap(out: &mut String, gap: &mut Option<Gap>, next: char) {
    let Some(kind) = gap.take() else {
        return;
    };
    let Some(prev) = out.chars().last() else {
        return;
    };

    if kind == Gap::Newline && newline_matters(prev, next) {
        out.push('\n');
    } else if needs_space(prev, next) {
        out.push(' ');
    }
}

/// Separator needed to keep two tokens apart
fn needs_space(prev: char, next: char) -> bool {
    (is_word_char(prev) && is_word_char(next))
        || (prev == '+' && next == '+')
        || (prev == '-' && next == '-')
        || (prev == '/' && next == '/')
}

/// Line breaks between a possible statement end and a possible statement start
fn newline_matters(prev: char, next: char) -> bool {
    let ends_statement = is_word_char(prev) || matches!(prev, ')' | ']' | '}' | '"' | '\'' | '`' | '+' | '-' | '/');
    let starts_statement =
        is_word_char(next) || matches!(next, '(' | '[' | '{' | '"' | '\'' | '`' | '+' | '-' | '/' | '!' | '~');
    ends_statement && starts_statement
}

/// Index just past the closing quote of the literal starting at `start`
fn skip_string(chars: &[char], start: usize) -> usize {
    let quote = chars[start];
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            c if c == quote => return i + 1,
            _ => i += 1,
        }
    }
    chars.len()
}

/// Index just past `*/`, or the end of input for an unterminated comment
fn find_block_end(chars: &[char], from: usize) -> usize {
    let mut i = from;
    while i + 1 < chars.len() {
        if chars[i] == '*' && chars[i + 1] == '/' {
            return i + 2;
        }
        i += 1;
    }
    chars.len()
}

/// A `/` opens a regex literal after an operator, an opening bracket, or a keyword
fn regex_allowed(out: &str) -> bool {
    let trimmed = out.trim_end();
    let Some(prev) = trimmed.chars().last() else {
        return true;
    };
    if is_word_char(prev) {
        let word: String = trimmed
            .chars()
            .rev()
            .take_while(|c| is_word_char(*c))
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        return REGEX_KEYWORDS.contains(&word.as_str());
    }
    !matches!(prev, ')' | ']' | '}' | '"' | '\'' | '`')
}

/// End of the regex literal at `start` (flags included); `None` if the line ends first
fn skip_regex(chars: &[char], start: usize) -> Option<usize> {
    let mut i = start + 1;
    let mut in_class = false;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            '\n' | '\r' => return None,
            '[' => {
                in_class = true;
                i += 1;
            }
            ']' => {
                in_class = false;
                i += 1;
            }
            '/' if !in_class => {
                i += 1;
                while i < chars.len() && chars[i].is_ascii_alphabetic() {
                    i += 1;
                }
                return Some(i);
            }
            _ => i += 1,
        }
    }
    None
}

/// Minify CSS by removing comments and whitespace around punctuation
pub fn css(source: &str) -> String {
    let chars: Vec<char> = source.chars().collect();
    let mut out = String::with_capacity(source.len());
    let mut pending_space = false;
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        match ch {
            '"' | '\'' => {
                flush_css_space(&mut out, &mut pending_space, ch);
                let end = skip_string(&chars, i);
                out.extend(&chars[i..end]);
                i = end;
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                let end = find_block_end(&chars, i + 2);
                if chars.get(i + 2) == Some(&'!') {
                    flush_css_space(&mut out, &mut pending_space, '/');
                    out.extend(&chars[i..end]);
                } else {
                    pending_space = true;
                }
                i = end;
            }
            c if c.is_whitespace() => {
                pending_space = true;
                i += 1;
            }
            '}' => {
                pending_space = false;
                if out.ends_with(';') {
                    out.pop();
                }
                out.push('}');
                i += 1;
            }
            c => {
                flush_css_space(&mut out, &mut pending_space, c);
                out.push(c);
                i += 1;
            }
        }
    }

    out
}

fn flush_css_space(out: &mut String, pending: &mut bool, next: char) {
    if !std::mem::take(pending) {
        return;
    }
    let Some(prev) = out.chars().last() else {
        return;
    };
    let tight_after = matches!(prev, '{' | '}' | ';' | ',' | ':' | '>' | '(');
    let tight_before = matches!(next, '{' | '}' | ';' | ',' | '>' | ')' | '!');
    if !tight_after && !tight_before {
        out.push(' ');
    }
}
