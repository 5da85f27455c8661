//! `compilePOT`: extract translatable strings from the built PHP files into
//! a gettext catalog template.
//!
//! Calls to the WordPress i18n functions are found with a regex and their
//! arguments read with a small PHP literal parser. Only calls whose strings
//! and text domain are plain literals (or concatenations of literals) are
//! extracted; anything computed at runtime is left out, as are calls for
//! other text domains.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::iter::Peekable;
use std::path::PathBuf;
use std::str::Chars;

use chrono::{DateTime, Datelike, Utc};
use regex::Regex;

use super::{substitute_text_domain, Asset, CompileOutput, FileFailure};
use crate::error::BuildError;

/// Argument positions (zero based) of one i18n function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Keyword {
    msgid: usize,
    plural: Option<usize>,
    context: Option<usize>,
    domain: usize,
}

const fn simple(domain: usize) -> Keyword {
    Keyword {
        msgid: 0,
        plural: None,
        context: None,
        domain,
    }
}

const fn contextual(domain: usize) -> Keyword {
    Keyword {
        msgid: 0,
        plural: None,
        context: Some(1),
        domain,
    }
}

fn keyword(name: &str) -> Option<Keyword> {
    let kw = match name {
        "__" | "_e" | "esc_html__" | "esc_html_e" | "esc_attr__" | "esc_attr_e" => simple(1),
        "_x" | "_ex" | "esc_html_x" | "esc_attr_x" => contextual(2),
        "_n" => Keyword {
            msgid: 0,
            plural: Some(1),
            context: None,
            domain: 3,
        },
        "_nx" => Keyword {
            msgid: 0,
            plural: Some(1),
            context: Some(3),
            domain: 4,
        },
        "_n_noop" => Keyword {
            msgid: 0,
            plural: Some(1),
            context: None,
            domain: 2,
        },
        "_nx_noop" => Keyword {
            msgid: 0,
            plural: Some(1),
            context: Some(2),
            domain: 3,
        },
        _ => return None,
    };
    Some(kw)
}

// The leading group rejects method calls, static calls and longer names
const CALL_PATTERN: &str = r"(?:^|[^\w$>:])(__|_e|_x|_ex|_n|_nx|_n_noop|_nx_noop|esc_html__|esc_html_e|esc_html_x|esc_attr__|esc_attr_e|esc_attr_x)\s*\(";

/// Catalog header values
#[derive(Debug, Clone)]
pub struct PotOptions {
    pub domain: String,
    /// `Project-Id-Version`; the domain when unset
    pub package: Option<String>,
    /// `Report-Msgid-Bugs-To`
    pub bug_report: Option<String>,
    /// `Language-Team`
    pub team: Option<String>,
    /// `POT-Creation-Date`
    pub created: DateTime<Utc>,
}

impl PotOptions {
    pub fn new(domain: &str, created: DateTime<Utc>) -> Self {
        Self {
            domain: domain.to_string(),
            package: None,
            bug_report: None,
            team: None,
            created,
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.pot", self.domain)
    }
}

/// One translatable string with every place it occurs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PotEntry {
    pub context: Option<String>,
    pub msgid: String,
    pub plural: Option<String>,
    /// `file:line`
    pub references: Vec<String>,
}

/// A parsed call argument
#[derive(Debug, Clone, PartialEq, Eq)]
enum Arg {
    Literal(String),
    Dynamic,
}

impl Arg {
    fn literal(&self) -> Option<&str> {
        match self {
            Arg::Literal(s) => Some(s),
            Arg::Dynamic => None,
        }
    }
}

/// Extract entries for `domain` from PHP sources, in source order,
/// merging duplicates by context and msgid
pub fn extract(sources: &[Asset], domain: &str) -> Result<Vec<PotEntry>, BuildError> {
    let call = Regex::new(CALL_PATTERN)?;
    let mut entries: Vec<PotEntry> = Vec::new();
    let mut index: HashMap<(Option<String>, String), usize> = HashMap::new();

    for asset in sources {
        let text = substitute_text_domain(&asset.text(), domain);
        let file = asset.path.to_string_lossy().replace('\\', "/");
        let line_starts = line_starts(&text);

        for caps in call.captures_iter(&text) {
            let (Some(name), Some(whole)) = (caps.get(1), caps.get(0)) else {
                continue;
            };
            let Some(kw) = keyword(name.as_str()) else {
                continue;
            };
            let Some(args) = parse_args(&text, whole.end()) else {
                continue;
            };

            let arg = |i: usize| args.get(i).and_then(Arg::literal);
            if arg(kw.domain) != Some(domain) {
                continue;
            }
            let Some(msgid) = arg(kw.msgid).filter(|s| !s.is_empty()) else {
                continue;
            };
            let context = match kw.context {
                Some(i) => match arg(i) {
                    Some(ctx) => Some(ctx.to_string()),
                    None => continue,
                },
                None => None,
            };
            let plural = match kw.plural {
                Some(i) => match arg(i) {
                    Some(p) => Some(p.to_string()),
                    None => continue,
                },
                None => None,
            };

            let line = line_of(&line_starts, name.start());
            let reference = format!("{file}:{line}");
            let key = (context.clone(), msgid.to_string());

            match index.get(&key) {
                Some(&i) => {
                    let entry = &mut entries[i];
                    if !entry.references.contains(&reference) {
                        entry.references.push(reference);
                    }
                    if entry.plural.is_none() {
                        entry.plural = plural;
                    }
                }
                None => {
                    index.insert(key, entries.len());
                    entries.push(PotEntry {
                        context,
                        msgid: msgid.to_string(),
                        plural,
                        references: vec![reference],
                    });
                }
            }
        }
    }

    Ok(entries)
}

/// Build the `.pot` for the given PHP files. No PHP files, no catalog.
pub fn compile(sources: &[Asset], options: &PotOptions) -> CompileOutput {
    if sources.is_empty() {
        return CompileOutput::default();
    }
    match extract(sources, &options.domain) {
        Ok(entries) => CompileOutput::single(Asset::new(options.file_name(), render(&entries, options))),
        Err(error) => CompileOutput {
            files: Vec::new(),
            failures: vec![FileFailure {
                path: PathBuf::from(options.file_name()),
                error,
            }],
        },
    }
}

/// Serialize a catalog template
pub fn render(entries: &[PotEntry], options: &PotOptions) -> String {
    let package = options.package.as_deref().unwrap_or(&options.domain);
    let mut out = String::new();

    let _ = writeln!(out, "# Copyright (C) {} {}", options.created.year(), package);
    let _ = writeln!(
        out,
        "# This file is distributed under the same license as the {package} package."
    );
    out.push_str("msgid \"\"\nmsgstr \"\"\n");

    let mut header = vec![format!("Project-Id-Version: {package}")];
    if let Some(bugs) = &options.bug_report {
        header.push(format!("Report-Msgid-Bugs-To: {bugs}"));
    }
    header.push("Last-Translator: FULL NAME <EMAIL@ADDRESS>".to_string());
    header.push(format!(
        "Language-Team: {}",
        options.team.as_deref().unwrap_or("LANGUAGE <LL@li.org>")
    ));
    header.push("MIME-Version: 1.0".to_string());
    header.push("Content-Type: text/plain; charset=UTF-8".to_string());
    header.push("Content-Transfer-Encoding: 8bit".to_string());
    header.push(format!(
        "POT-Creation-Date: {}",
        options.created.format("%Y-%m-%d %H:%M%z")
    ));
    header.push("PO-Revision-Date: YEAR-MO-DA HO:MI+ZONE".to_string());
    for line in header {
        let _ = writeln!(out, "\"{}\\n\"", escape(&line));
    }

    for entry in entries {
        out.push('\n');
        for reference in &entry.references {
            let _ = writeln!(out, "#: {reference}");
        }
        if let Some(context) = &entry.context {
            let _ = writeln!(out, "msgctxt \"{}\"", escape(context));
        }
        let _ = writeln!(out, "msgid \"{}\"", escape(&entry.msgid));
        match &entry.plural {
            Some(plural) => {
                let _ = writeln!(out, "msgid_plural \"{}\"", escape(plural));
                out.push_str("msgstr[0] \"\"\nmsgstr[1] \"\"\n");
            }
            None => out.push_str("msgstr \"\"\n"),
        }
    }

    out
}

/// Quote a string for a PO file
pub fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out
}

fn line_starts(text: &str) -> Vec<usize> {
    std::iter::once(0)
        .chain(text.match_indices('\n').map(|(i, _)| i + 1))
        .collect()
}

/// 1-based line of a byte offset
fn line_of(starts: &[usize], offset: usize) -> usize {
    match starts.binary_search(&offset) {
        Ok(i) => i + 1,
        Err(i) => i,
    }
}

/// Parse call arguments from just after `(` up to the matching `)`.
/// `None` when the call is not closed.
fn parse_args(text: &str, start: usize) -> Option<Vec<Arg>> {
    let mut chars = text.get(start..)?.chars().peekable();
    let mut args = Vec::new();
    let mut parts: Vec<String> = Vec::new();
    let mut literal = true;
    let mut empty = true;
    let mut depth = 0usize;

    while let Some(ch) = chars.next() {
        match ch {
            '\'' | '"' => {
                let (value, dynamic) = parse_string(ch, &mut chars)?;
                if depth > 0 || dynamic {
                    literal = false;
                } else {
                    parts.push(value);
                }
                empty = false;
            }
            '.' if depth == 0 => {}
            c if c.is_whitespace() => {}
            '(' | '[' | '{' => {
                depth += 1;
                literal = false;
                empty = false;
            }
            ')' | ']' | '}' if depth > 0 => depth -= 1,
            ')' | ',' => {
                if !empty {
                    args.push(if literal && !parts.is_empty() {
                        Arg::Literal(parts.concat())
                    } else {
                        Arg::Dynamic
                    });
                }
                if ch == ')' {
                    return Some(args);
                }
                parts.clear();
                literal = true;
                empty = true;
            }
            _ => {
                literal = false;
                empty = false;
            }
        }
    }
    None
}

/// Decode a PHP string literal whose opening `quote` was just consumed,
/// leaving `chars` after the closing quote. Returns the value and whether
/// it interpolates variables.
fn parse_string(quote: char, chars: &mut Peekable<Chars<'_>>) -> Option<(String, bool)> {
    let mut value = String::new();
    let mut dynamic = false;

    while let Some(ch) = chars.next() {
        if ch == quote {
            return Some((value, dynamic));
        }
        if ch == '\\' {
            let next = *chars.peek()?;
            let decoded = if quote == '\'' {
                match next {
                    '\'' | '\\' => Some(next),
                    _ => None,
                }
            } else {
                match next {
                    'n' => Some('\n'),
                    't' => Some('\t'),
                    'r' => Some('\r'),
                    'v' => Some('\u{0b}'),
                    'f' => Some('\u{0c}'),
                    '\\' | '"' | '$' => Some(next),
                    _ => None,
                }
            };
            match decoded {
                Some(c) => {
                    value.push(c);
                    chars.next();
                }
                None => value.push('\\'),
            }
            continue;
        }
        if quote == '"'
            && ch == '$'
            && chars
                .peek()
                .is_some_and(|n| n.is_alphabetic() || *n == '_' || *n == '{')
        {
            dynamic = true;
        }
        value.push(ch);
    }
    None
}
