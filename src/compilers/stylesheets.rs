//! `compileStylesheets`: compile `style.styl` into the theme's `style.css`.
//!
//! WordPress reads the theme name, author and text domain from the comment
//! block at the top of `style.css`, so when the theme has metadata the
//! compiled CSS is wrapped in a header. Minification runs on the compiled
//! body only and never touches that header.

use std::path::PathBuf;

use tera::{Context, Tera};

use super::{Asset, CompileOutput, FileFailure, Tool};
use crate::error::BuildError;
use crate::minify;
use crate::theme::ThemeMeta;

/// Entry stylesheet, relative to the stylesheets folder
pub const ENTRY: &str = "style.styl";

/// Output file, relative to the theme destination
pub const OUTPUT: &str = "style.css";

/// Optional header template in the project root
pub const HEADER_TEMPLATE_FILE: &str = "css-template.txt";

/// Used when the project has no `css-template.txt`
pub const DEFAULT_HEADER: &str = "/*\n{% for field in meta %}{{ field.name }}: {{ field.value }}\n{% endfor %}*/\n\n{{ contents }}";

/// Theme metadata plus the template that renders it around the CSS
#[derive(Debug, Clone)]
pub struct StyleHeader {
    pub meta: ThemeMeta,
    /// Custom template; [`DEFAULT_HEADER`] when `None`
    pub template: Option<String>,
}

impl StyleHeader {
    /// Template variables: `meta` (ordered `name`/`value` header lines),
    /// `theme` (raw metadata) and `contents` (the compiled CSS)
    pub fn render(&self, contents: &str) -> Result<String, BuildError> {
        let mut context = Context::new();
        context.insert("meta", &self.meta.header_fields());
        context.insert("theme", self.meta.fields());
        context.insert("contents", contents);

        let template = self.template.as_deref().unwrap_or(DEFAULT_HEADER);
        Tera::one_off(template, &context, false).map_err(|e| BuildError::Template {
            name: HEADER_TEMPLATE_FILE.to_string(),
            message: e.to_string(),
        })
    }
}

/// Compile the entry with `stylus`. A theme without `style.styl` produces
/// nothing; a compiler error is a failure of the entry file.
pub fn compile(
    entry: Option<Asset>,
    stylus: &dyn Tool,
    header: Option<&StyleHeader>,
    production: bool,
) -> CompileOutput {
    let Some(entry) = entry else {
        return CompileOutput::default();
    };

    let result = stylus.run(&entry).and_then(|css| {
        let css = String::from_utf8_lossy(&css).into_owned();
        let css = if production { minify::css(&css) } else { css };
        match header {
            Some(header) => header.render(&css),
            None => Ok(css),
        }
    });

    match result {
        Ok(css) => CompileOutput::single(Asset::from_source(PathBuf::from(OUTPUT), entry.origin, css.into_bytes())),
        Err(error) => CompileOutput {
            files: Vec::new(),
            failures: vec![FileFailure {
                path: entry.origin,
                error,
            }],
        },
    }
}
