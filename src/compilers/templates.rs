//! `compileTemplates`: render theme templates with the configured locals.

use std::collections::HashSet;
use std::error::Error as _;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde_json::{Map, Value};
use tera::{Context, Tera};

use super::{Asset, CompileOutput, FileFailure};
use crate::error::BuildError;

/// Extension stripped from every rendered template
pub const TEMPLATE_EXTENSION: &str = "tera";

/// Partials start with `_`; they can be included but are never rendered alone
pub fn is_partial(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with('_'))
}

/// `header.php.tera` -> `header.php`
pub fn output_path(path: &Path) -> PathBuf {
    match path.extension() {
        Some(ext) if ext == TEMPLATE_EXTENSION => path.with_extension(""),
        _ => path.to_path_buf(),
    }
}

/// Template name as used by `{% include %}` and `{% extends %}`
fn template_name(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn describe(err: &tera::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Load `sources` into one template set. A batch that fails to parse is
/// loaded file by file, partials first, so only the files that do not parse
/// (and templates that extend them) are lost.
fn load(sources: &[Asset]) -> (Tera, Vec<FileFailure>) {
    let mut tera = Tera::default();
    tera.autoescape_on(vec![]);

    let raw: Vec<(String, String)> = sources
        .iter()
        .map(|asset| (template_name(&asset.path), asset.text()))
        .collect();
    let mut batch = tera.clone();
    if batch.add_raw_templates(raw).is_ok() {
        return (batch, Vec::new());
    }

    let mut remaining: Vec<&Asset> = sources.iter().filter(|asset| is_partial(&asset.path)).collect();
    remaining.extend(sources.iter().filter(|asset| !is_partial(&asset.path)));

    // Retry until a pass adds nothing, so a parent listed after its child
    // still loads
    loop {
        let mut rejected = Vec::new();
        let mut errors = Vec::new();
        for asset in &remaining {
            let mut candidate = tera.clone();
            match candidate.add_raw_template(&template_name(&asset.path), &asset.text()) {
                Ok(()) => tera = candidate,
                Err(e) => {
                    rejected.push(*asset);
                    errors.push(e);
                }
            }
        }

        if rejected.is_empty() || rejected.len() == remaining.len() {
            let failures = rejected
                .iter()
                .zip(errors.iter())
                .map(|(asset, e)| FileFailure {
                    path: asset.origin.clone(),
                    error: BuildError::Template {
                        name: template_name(&asset.path),
                        message: describe(e),
                    },
                })
                .collect();
            return (tera, failures);
        }
        remaining = rejected;
    }
}

/// Render every non-partial template. A file that does not parse fails on
/// its own; a render error only fails its own file.
pub fn compile(sources: &[Asset], locals: &Map<String, Value>) -> CompileOutput {
    let (tera, load_failures) = load(sources);
    let loaded: HashSet<&str> = tera.get_template_names().collect();

    let context = match Context::from_serialize(locals) {
        Ok(context) => context,
        Err(e) => {
            return CompileOutput {
                files: Vec::new(),
                failures: vec![FileFailure {
                    path: PathBuf::from("locals"),
                    error: BuildError::Template {
                        name: "locals".to_string(),
                        message: describe(&e),
                    },
                }],
            }
        }
    };

    let rendered: Vec<Result<Asset, FileFailure>> = sources
        .par_iter()
        .filter(|asset| !is_partial(&asset.path))
        .filter(|asset| loaded.contains(template_name(&asset.path).as_str()))
        .map(|asset| {
            let name = template_name(&asset.path);
            tera.render(&name, &context)
                .map(|html| Asset::from_source(output_path(&asset.path), asset.origin.clone(), html.into_bytes()))
                .map_err(|e| FileFailure {
                    path: asset.origin.clone(),
                    error: BuildError::Template {
                        name,
                        message: describe(&e),
                    },
                })
        })
        .collect();

    let mut output = CompileOutput {
        files: Vec::new(),
        failures: load_failures,
    };
    for result in rendered {
        match result {
            Ok(asset) => output.files.push(asset),
            Err(failure) => output.failures.push(failure),
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn template(path: &str, body: &str) -> Asset {
        Asset::from_source(PathBuf::from(path), PathBuf::from("templates").join(path), body.as_bytes().to_vec())
    }

    fn locals(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn test_output_path_strips_extension() {
        assert_eq!(output_path(Path::new("index.php.tera")), PathBuf::from("index.php"));
        assert_eq!(output_path(Path::new("parts/footer.php.tera")), PathBuf::from("parts/footer.php"));
        assert_eq!(output_path(Path::new("raw.php")), PathBuf::from("raw.php"));
    }

    #[test]
    fn test_is_partial() {
        assert!(is_partial(Path::new("_header.php.tera")));
        assert!(is_partial(Path::new("parts/_nav.php.tera")));
        assert!(!is_partial(Path::new("index.php.tera")));
    }

    #[test]
    fn test_renders_locals() {
        let sources = vec![template("index.php.tera", "<h1>{{ title }}</h1> v{{ version }}")];
        let out = compile(&sources, &locals(json!({"title": "Blog", "version": 3})));

        assert!(out.failures.is_empty());
        assert_eq!(out.files.len(), 1);
        assert_eq!(out.files[0].path, PathBuf::from("index.php"));
        assert_eq!(out.files[0].text(), "<h1>Blog</h1> v3");
    }

    #[test]
    fn test_no_html_escaping() {
        let sources = vec![template("index.php.tera", "{{ markup }}")];
        let out = compile(&sources, &locals(json!({"markup": "<?php the_title(); ?>"})));
        assert_eq!(out.files[0].text(), "<?php the_title(); ?>");
    }

    #[test]
    fn test_partials_are_included_not_emitted() {
        let sources = vec![
            template("_header.php.tera", "<header>{{ title }}</header>"),
            template("page.php.tera", "{% include \"_header.php.tera\" %}<main></main>"),
        ];
        let out = compile(&sources, &locals(json!({"title": "T"})));

        assert!(out.failures.is_empty());
        assert_eq!(out.files.len(), 1);
        assert_eq!(out.files[0].path, PathBuf::from("page.php"));
        assert_eq!(out.files[0].text(), "<header>T</header><main></main>");
    }

    #[test]
    fn test_render_error_only_fails_that_file() {
        let sources = vec![
            template("good.php.tera", "ok"),
            template("bad.php.tera", "{{ missing_variable }}"),
        ];
        let out = compile(&sources, &Map::new());

        assert_eq!(out.files.len(), 1);
        assert_eq!(out.files[0].path, PathBuf::from("good.php"));
        assert_eq!(out.failures.len(), 1);
        assert_eq!(out.failures[0].path, PathBuf::from("templates/bad.php.tera"));
    }

    #[test]
    fn test_syntax_error_only_fails_that_template() {
        let sources = vec![
            template("good.php.tera", "ok"),
            template("broken.php.tera", "{% if %}"),
        ];
        let out = compile(&sources, &Map::new());

        assert_eq!(out.files.len(), 1);
        assert_eq!(out.files[0].path, PathBuf::from("good.php"));
        assert_eq!(out.files[0].text(), "ok");
        assert_eq!(out.failures.len(), 1);
        assert_eq!(out.failures[0].path, PathBuf::from("templates/broken.php.tera"));
        assert!(matches!(out.failures[0].error, BuildError::Template { .. }));
    }

    #[test]
    fn test_broken_partial_fails_its_includers_at_render() {
        let sources = vec![
            template("_nav.php.tera", "{% for %}"),
            template("page.php.tera", "{% include \"_nav.php.tera\" %}"),
            template("plain.php.tera", "plain"),
        ];
        let out = compile(&sources, &Map::new());

        assert_eq!(out.files.len(), 1);
        assert_eq!(out.files[0].path, PathBuf::from("plain.php"));
        let failed: Vec<&Path> = out.failures.iter().map(|f| f.path.as_path()).collect();
        assert!(failed.contains(&Path::new("templates/_nav.php.tera")));
        assert!(failed.contains(&Path::new("templates/page.php.tera")));
    }

    #[test]
    fn test_parent_listed_after_child_still_loads() {
        let sources = vec![
            template("child.php.tera", "{% extends \"base.php.tera\" %}{% block body %}child{% endblock %}"),
            template("base.php.tera", "<{% block body %}{% endblock %}>"),
            template("broken.php.tera", "{{ "),
        ];
        let out = compile(&sources, &Map::new());

        assert_eq!(out.failures.len(), 1);
        let child = out.files.iter().find(|f| f.path == Path::new("child.php")).unwrap();
        assert_eq!(child.text(), "<child>");
    }

    #[test]
    fn test_empty_input() {
        assert!(compile(&[], &Map::new()).is_empty());
    }
}
