//! `compileJavascripts`: bundle every script into `core.js`.

use std::path::Path;

use super::{Asset, CompileOutput};
use crate::minify;

/// Name of the bundle written to the theme destination
pub const BUNDLE_NAME: &str = "core.js";

/// Script that must open the bundle when present
pub const FIRST_SCRIPT: &str = "jquery.js";

fn is_first(path: &Path) -> bool {
    path.file_name().is_some_and(|name| name == FIRST_SCRIPT)
}

/// Move every `jquery.js` to the front, keeping the relative order of the rest
pub fn order(mut scripts: Vec<Asset>) -> Vec<Asset> {
    // stable: equal keys keep scan order
    scripts.sort_by_key(|asset| !is_first(&asset.path));
    scripts
}

/// Concatenate (and in production, minify) the scripts. No scripts, no bundle.
pub fn compile(scripts: Vec<Asset>, production: bool) -> CompileOutput {
    if scripts.is_empty() {
        return CompileOutput::default();
    }

    let bundle = order(scripts)
        .iter()
        .map(Asset::text)
        .collect::<Vec<_>>()
        .join("\n");

    let bundle = if production { minify::js(&bundle) } else { bundle };
    CompileOutput::single(Asset::new(BUNDLE_NAME, bundle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn script(path: &str, body: &str) -> Asset {
        Asset::new(path, body)
    }

    fn paths(assets: &[Asset]) -> Vec<PathBuf> {
        assets.iter().map(|a| a.path.clone()).collect()
    }

    #[test]
    fn test_order_puts_jquery_first() {
        let ordered = order(vec![
            script("app.js", ""),
            script("vendor/jquery.js", ""),
            script("menu.js", ""),
        ]);
        assert_eq!(
            paths(&ordered),
            vec![
                PathBuf::from("vendor/jquery.js"),
                PathBuf::from("app.js"),
                PathBuf::from("menu.js")
            ]
        );
    }

    #[test]
    fn test_order_without_jquery_is_unchanged() {
        let ordered = order(vec![script("b.js", ""), script("a.js", "")]);
        assert_eq!(paths(&ordered), vec![PathBuf::from("b.js"), PathBuf::from("a.js")]);
    }

    #[test]
    fn test_order_does_not_match_similar_names() {
        let ordered = order(vec![script("a.js", ""), script("jquery.js.map.js", "")]);
        assert_eq!(paths(&ordered)[0], PathBuf::from("a.js"));
    }

    #[test]
    fn test_compile_concatenates_with_newline() {
        let out = compile(
            vec![script("app.js", "app();"), script("jquery.js", "jq();")],
            false,
        );
        assert_eq!(out.files.len(), 1);
        assert_eq!(out.files[0].path, PathBuf::from(BUNDLE_NAME));
        assert_eq!(out.files[0].text(), "jq();\napp();");
    }

    #[test]
    fn test_compile_minifies_in_production() {
        let out = compile(
            vec![script("app.js", "// setup\nfunction go ( ) {\n  return 1 ;\n}\n")],
            true,
        );
        assert_eq!(out.files[0].text(), "function go(){return 1;}");
    }

    #[test]
    fn test_compile_no_scripts() {
        assert!(compile(Vec::new(), true).is_empty());
    }
}
