//! `compilePO`: turn gettext `.po` catalogs into binary `.mo` files.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::{Asset, CompileOutput, FileFailure};
use crate::error::BuildError;

const MO_MAGIC: u32 = 0x9504_12de;
const MO_HEADER_SIZE: u32 = 28;
const CONTEXT_SEPARATOR: char = '\u{04}';

/// One catalog entry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    pub context: Option<String>,
    pub msgid: String,
    pub plural: Option<String>,
    /// `msgstr`, or `msgstr[n]` in index order for plural entries
    pub msgstr: Vec<String>,
    pub fuzzy: bool,
}

impl Message {
    /// The catalog header is the entry with an empty msgid and no context
    pub fn is_header(&self) -> bool {
        self.msgid.is_empty() && self.context.is_none()
    }

    pub fn is_translated(&self) -> bool {
        self.msgstr.iter().any(|s| !s.is_empty())
    }

    /// Lookup key in a `.mo` file
    fn mo_key(&self) -> String {
        let mut key = String::new();
        if let Some(context) = &self.context {
            key.push_str(context);
            key.push(CONTEXT_SEPARATOR);
        }
        key.push_str(&self.msgid);
        if let Some(plural) = &self.plural {
            key.push('\0');
            key.push_str(plural);
        }
        key
    }

    fn mo_value(&self) -> String {
        self.msgstr.join("\0")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    None,
    Context,
    Id,
    Plural,
    Str(usize),
}

#[derive(Default)]
struct EntryBuilder {
    context: Option<String>,
    msgid: Option<String>,
    plural: Option<String>,
    msgstr: BTreeMap<usize, String>,
    fuzzy: bool,
}

impl EntryBuilder {
    fn has_msgstr(&self) -> bool {
        !self.msgstr.is_empty()
    }

    fn is_blank(&self) -> bool {
        self.context.is_none() && self.msgid.is_none() && self.msgstr.is_empty()
    }

    fn finish(&mut self, messages: &mut Vec<Message>) {
        let builder = std::mem::take(self);
        if let Some(msgid) = builder.msgid {
            messages.push(Message {
                context: builder.context,
                msgid,
                plural: builder.plural,
                msgstr: builder.msgstr.into_values().collect(),
                fuzzy: builder.fuzzy,
            });
        }
    }
}

/// Parse a `.po` file. Obsolete (`#~`) entries are dropped.
pub fn parse(source: &str) -> Result<Vec<Message>, BuildError> {
    let mut messages = Vec::new();
    let mut entry = EntryBuilder::default();
    let mut field = Field::None;

    for (index, raw) in source.lines().enumerate() {
        let line_no = index + 1;
        let line = raw.trim();

        if line.is_empty() {
            entry.finish(&mut messages);
            field = Field::None;
            continue;
        }

        if line.starts_with("#~") {
            continue;
        }

        if let Some(flags) = line.strip_prefix("#,") {
            if entry.has_msgstr() {
                entry.finish(&mut messages);
            }
            if flags.split(',').any(|flag| flag.trim() == "fuzzy") {
                entry.fuzzy = true;
            }
            field = Field::None;
            continue;
        }

        if line.starts_with('#') {
            if entry.has_msgstr() {
                entry.finish(&mut messages);
                field = Field::None;
            }
            continue;
        }

        if line.starts_with('"') {
            let value = unquote(line, line_no)?;
            let target = match field {
                Field::Context => entry.context.as_mut(),
                Field::Id => entry.msgid.as_mut(),
                Field::Plural => entry.plural.as_mut(),
                Field::Str(n) => entry.msgstr.get_mut(&n),
                Field::None => None,
            };
            match target {
                Some(target) => target.push_str(&value),
                None => {
                    return Err(BuildError::InvalidCatalog {
                        line: line_no,
                        message: "continuation line without a keyword".to_string(),
                    })
                }
            }
            continue;
        }

        let (keyword, rest) = line
            .split_once(|c: char| c.is_whitespace())
            .ok_or_else(|| BuildError::InvalidCatalog {
                line: line_no,
                message: format!("expected a keyword and a string, got '{line}'"),
            })?;
        let value = unquote(rest.trim(), line_no)?;

        match keyword {
            "msgctxt" => {
                if !entry.is_blank() {
                    entry.finish(&mut messages);
                }
                entry.context = Some(value);
                field = Field::Context;
            }
            "msgid" => {
                if entry.msgid.is_some() {
                    entry.finish(&mut messages);
                }
                entry.msgid = Some(value);
                field = Field::Id;
            }
            "msgid_plural" => {
                entry.plural = Some(value);
                field = Field::Plural;
            }
            "msgstr" => {
                entry.msgstr.insert(0, value);
                field = Field::Str(0);
            }
            other => {
                let n = other
                    .strip_prefix("msgstr[")
                    .and_then(|s| s.strip_suffix(']'))
                    .and_then(|s| s.parse::<usize>().ok())
                    .ok_or_else(|| BuildError::InvalidCatalog {
                        line: line_no,
                        message: format!("unknown keyword '{other}'"),
                    })?;
                entry.msgstr.insert(n, value);
                field = Field::Str(n);
            }
        }

        if entry.msgid.is_none() && matches!(field, Field::Plural | Field::Str(_)) {
            return Err(BuildError::InvalidCatalog {
                line: line_no,
                message: format!("'{keyword}' before msgid"),
            });
        }
    }

    entry.finish(&mut messages);
    Ok(messages)
}

/// Decode a quoted PO string
fn unquote(quoted: &str, line: usize) -> Result<String, BuildError> {
    let inner = quoted
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .filter(|_| quoted.len() >= 2)
        .ok_or_else(|| BuildError::InvalidCatalog {
            line,
            message: format!("expected a quoted string, got '{quoted}'"),
        })?;

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('a') => out.push('\u{07}'),
            Some('b') => out.push('\u{08}'),
            Some('f') => out.push('\u{0c}'),
            Some('v') => out.push('\u{0b}'),
            Some(c @ ('\\' | '"' | '\'' | '?')) => out.push(c),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => {
                return Err(BuildError::InvalidCatalog {
                    line,
                    message: "dangling escape".to_string(),
                })
            }
        }
    }
    Ok(out)
}

/// Encode messages as a little-endian GNU `.mo` file. The header and every
/// translated, non-fuzzy entry are written; keys are sorted so lookups can
/// binary search.
pub fn write_mo(messages: &[Message]) -> Vec<u8> {
    let mut pairs: Vec<(String, String)> = messages
        .iter()
        .filter(|m| m.is_header() || (!m.fuzzy && m.is_translated()))
        .map(|m| (m.mo_key(), m.mo_value()))
        .collect();
    pairs.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));
    pairs.dedup_by(|a, b| a.0 == b.0);

    let count = pairs.len() as u32;
    let originals_offset = MO_HEADER_SIZE;
    let translations_offset = originals_offset + 8 * count;
    let strings_offset = translations_offset + 8 * count;

    let mut table = Vec::with_capacity(16 * pairs.len());
    let mut strings = Vec::new();
    let mut translation_table = Vec::with_capacity(8 * pairs.len());

    for (key, _) in &pairs {
        push_string(&mut table, &mut strings, strings_offset, key);
    }
    for (_, value) in &pairs {
        push_string(&mut translation_table, &mut strings, strings_offset, value);
    }
    table.extend(translation_table);

    let mut out = Vec::with_capacity(strings_offset as usize + strings.len());
    for word in [
        MO_MAGIC,
        0,
        count,
        originals_offset,
        translations_offset,
        0,
        strings_offset,
    ] {
        out.extend_from_slice(&word.to_le_bytes());
    }
    out.extend(table);
    out.extend(strings);
    out
}

/// Append `(length, offset)` to the table and the NUL-terminated string to the pool
fn push_string(table: &mut Vec<u8>, pool: &mut Vec<u8>, pool_offset: u32, value: &str) {
    let offset = pool_offset + pool.len() as u32;
    table.extend_from_slice(&(value.len() as u32).to_le_bytes());
    table.extend_from_slice(&offset.to_le_bytes());
    pool.extend_from_slice(value.as_bytes());
    pool.push(0);
}

/// `fr_FR.po` -> `fr_FR.mo`
pub fn output_path(path: &Path) -> PathBuf {
    path.with_extension("mo")
}

/// Compile every catalog; a malformed one is a failure of that file only
pub fn compile(catalogs: &[Asset]) -> CompileOutput {
    let mut output = CompileOutput::default();
    for catalog in catalogs {
        match parse(&catalog.text()) {
            Ok(messages) => output.files.push(Asset::from_source(
                output_path(&catalog.path),
                catalog.origin.clone(),
                write_mo(&messages),
            )),
            Err(error) => output.failures.push(FileFailure {
                path: catalog.origin.clone(),
                error,
            }),
        }
    }
    output
}
