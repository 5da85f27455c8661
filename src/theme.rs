//! Theme metadata from `themes/<theme>/config.json`.
//!
//! The metadata feeds the WordPress stylesheet header and the catalog
//! template header. It is optional: a theme without the file simply gets no
//! header.

use serde::Serialize;
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;

use crate::error::BuildError;

pub const TEXT_DOMAIN_KEY: &str = "text-domain";
pub const AUTHOR_KEY: &str = "author";
pub const AUTHOR_URI_KEY: &str = "author-uri";

/// Words that stay upper case in header names
const ACRONYMS: &[&str] = &["uri", "url", "php", "id", "rtl"];

/// Ordered key/value record describing the theme
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThemeMeta {
    fields: Map<String, Value>,
}

/// One `Name: value` line of the stylesheet header
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeaderField {
    pub name: String,
    pub value: String,
}

impl ThemeMeta {
    pub fn from_map(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// Load metadata; `Ok(None)` when the theme has no config file
    pub fn load(path: &Path) -> Result<Option<Self>, BuildError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(BuildError::ReadFailed {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };

        let fields: Map<String, Value> =
            serde_json::from_str(&content).map_err(|source| BuildError::InvalidJson {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Some(Self { fields }))
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// String form of a field; non-string scalars are stringified
    pub fn get(&self, key: &str) -> Option<String> {
        self.fields.get(key).and_then(display_value)
    }

    pub fn author(&self) -> Option<String> {
        self.get(AUTHOR_KEY)
    }

    pub fn author_uri(&self) -> Option<String> {
        self.get(AUTHOR_URI_KEY)
    }

    /// Fill `text-domain` when the theme leaves it unset
    pub fn with_default_text_domain(mut self, domain: &str) -> Self {
        if self.fields.get(TEXT_DOMAIN_KEY).map_or(true, Value::is_null) {
            self.fields
                .insert(TEXT_DOMAIN_KEY.to_string(), Value::String(domain.to_string()));
        }
        self
    }

    /// Header lines in file order, e.g. `author-uri` becomes `Author URI`
    pub fn header_fields(&self) -> Vec<HeaderField> {
        self.fields
            .iter()
            .filter_map(|(key, value)| {
                display_value(value).map(|value| HeaderField {
                    name: header_name(key),
                    value,
                })
            })
            .collect()
    }
}

/// `theme-name` -> `Theme Name`, `author-uri` -> `Author URI`
pub fn header_name(key: &str) -> String {
    key.split(|c: char| c == '-' || c == '_' || c.is_whitespace())
        .filter(|word| !word.is_empty())
        .map(|word| {
            if ACRONYMS.contains(&word.to_ascii_lowercase().as_str()) {
                word.to_ascii_uppercase()
            } else {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect(),
                    None => String::new(),
                }
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn display_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(display_value).collect();
            Some(parts.join(", "))
        }
        Value::Null | Value::Object(_) => None,
    }
}
