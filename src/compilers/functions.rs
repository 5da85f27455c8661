//! `compileFunctions`: publish `functions.php` with the text domain set.

use super::{substitute_text_domain, Asset, CompileOutput};

/// PHP prologue defining the global text domain
pub fn prologue(domain: &str) -> String {
    format!("<?php global $text_domain; $text_domain = \"{domain}\"; ?>")
}

pub fn patch(source: &str, domain: &str) -> String {
    let mut out = prologue(domain);
    out.push_str(&substitute_text_domain(source, domain));
    out
}

/// A theme without `functions.php` produces nothing
pub fn compile(source: Option<Asset>, domain: &str) -> CompileOutput {
    match source {
        Some(asset) => {
            let patched = patch(&asset.text(), domain);
            CompileOutput::single(Asset::from_source(asset.path, asset.origin, patched.into_bytes()))
        }
        None => CompileOutput::default(),
    }
}
