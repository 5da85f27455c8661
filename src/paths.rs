//! Source and destination locations derived from the theme name.

use globset::{GlobBuilder, GlobMatcher, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};

use crate::error::BuildError;

/// Asset subfolders handled by a dedicated compiler
pub const ASSET_FOLDERS: [&str; 5] = ["templates", "javascripts", "stylesheets", "languages", "images"];

/// Top-level theme files handled by a dedicated compiler
pub const CONFIG_FILES: [&str; 2] = ["config.json", "functions.php"];

/// A directory plus a glob evaluated relative to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceGlob {
    /// Directory that output paths are made relative to
    pub base: PathBuf,
    /// Pattern relative to `base`, `/`-separated
    pub pattern: String,
}

impl SourceGlob {
    pub fn new(base: PathBuf, pattern: &str) -> Self {
        Self {
            base,
            pattern: pattern.to_string(),
        }
    }

    /// Matcher for paths relative to `base`
    pub fn matcher(&self) -> Result<GlobMatcher, BuildError> {
        Ok(compile_glob(&self.pattern)?.compile_matcher())
    }

    /// `base/pattern` as one pattern string
    pub fn full_pattern(&self) -> String {
        join_pattern(&self.base, &self.pattern)
    }
}

/// Everything under the theme root except the asset folders and config files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MiscGlob {
    pub base: PathBuf,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl MiscGlob {
    fn new(base: PathBuf) -> Self {
        let folders = ASSET_FOLDERS.join(",");
        let mut exclude = vec![format!("{{{folders}}}/**"), format!("{{{folders}}}")];
        exclude.extend(CONFIG_FILES.iter().map(|f| f.to_string()));

        Self {
            base,
            include: vec!["**/*".to_string()],
            exclude,
        }
    }

    pub fn matcher(&self) -> Result<MiscMatcher, BuildError> {
        Ok(MiscMatcher {
            include: build_set(&self.include)?,
            exclude: build_set(&self.exclude)?,
        })
    }
}

/// Compiled include/exclude pair for [`MiscGlob`]
#[derive(Debug, Clone)]
pub struct MiscMatcher {
    include: GlobSet,
    exclude: GlobSet,
}

impl MiscMatcher {
    /// `relative` is a path below the theme root
    pub fn is_match(&self, relative: &Path) -> bool {
        self.include.is_match(relative) && !self.exclude.is_match(relative)
    }
}

/// All locations used by the build, derived from the theme name only
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTable {
    /// themes/<theme>
    pub root: PathBuf,
    /// themes/<theme>/config.json
    pub config: PathBuf,
    /// themes/<theme>/stylesheets
    pub stylesheets: PathBuf,
    /// themes/<theme>/languages/*.po
    pub languages: SourceGlob,
    /// themes/<theme>/javascripts/**/*.js
    pub javascripts: SourceGlob,
    /// themes/<theme>/templates/**/*.tera
    pub templates: SourceGlob,
    /// themes/<theme>/images/**/*
    pub images: SourceGlob,
    /// themes/<theme>/functions.php
    pub functions: PathBuf,
    /// public/wp-content/themes/<theme>
    pub destination: PathBuf,
    /// Files copied verbatim
    pub misc: MiscGlob,
}

impl PathTable {
    /// Relative path table for `theme`; no I/O
    pub fn new(theme: &str) -> Self {
        let root = PathBuf::from("themes").join(theme);

        Self {
            config: root.join("config.json"),
            stylesheets: root.join("stylesheets"),
            languages: SourceGlob::new(root.join("languages"), "*.po"),
            javascripts: SourceGlob::new(root.join("javascripts"), "**/*.js"),
            templates: SourceGlob::new(root.join("templates"), "**/*.tera"),
            images: SourceGlob::new(root.join("images"), "**/*"),
            functions: root.join("functions.php"),
            destination: PathBuf::from("public")
                .join("wp-content")
                .join("themes")
                .join(theme),
            misc: MiscGlob::new(root.clone()),
            root,
        }
    }

    /// Same table with every location placed under `project_root`
    pub fn within(&self, project_root: &Path) -> Self {
        let glob = |g: &SourceGlob| SourceGlob {
            base: project_root.join(&g.base),
            pattern: g.pattern.clone(),
        };

        Self {
            root: project_root.join(&self.root),
            config: project_root.join(&self.config),
            stylesheets: project_root.join(&self.stylesheets),
            languages: glob(&self.languages),
            javascripts: glob(&self.javascripts),
            templates: glob(&self.templates),
            images: glob(&self.images),
            functions: project_root.join(&self.functions),
            destination: project_root.join(&self.destination),
            misc: MiscGlob {
                base: project_root.join(&self.misc.base),
                ..self.misc.clone()
            },
        }
    }

    /// Entry stylesheet compiled by `compileStylesheets`
    pub fn style_entry(&self) -> PathBuf {
        self.stylesheets.join("style.styl")
    }

    /// Output folder for compiled catalogs
    pub fn destination_languages(&self) -> PathBuf {
        self.destination.join("languages")
    }

    /// Catalog template copy kept in the theme sources
    pub fn source_languages(&self) -> PathBuf {
        self.root.join("languages")
    }
}

/// Glob with `/`-aware wildcards: `*` never crosses a directory
pub fn compile_glob(pattern: &str) -> Result<globset::Glob, BuildError> {
    GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map_err(|source| BuildError::InvalidGlob {
            pattern: pattern.to_string(),
            source,
        })
}

pub fn build_set(patterns: &[String]) -> Result<GlobSet, BuildError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(compile_glob(pattern)?);
    }
    builder.build().map_err(|source| BuildError::InvalidGlob {
        pattern: patterns.join(" "),
        source,
    })
}

fn join_pattern(base: &Path, pattern: &str) -> String {
    let base = base.to_string_lossy();
    let base = base.trim_end_matches('/');
    if base.is_empty() {
        pattern.to_string()
    } else {
        format!("{base}/{pattern}")
    }
}
