//! `compileImages`: optimize theme images with external tools.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rayon::prelude::*;
use sha2::{Digest, Sha256};

use super::{Asset, CommandTool, CompileOutput, FileFailure, Tool, ToolMode};
use crate::error::BuildError;

/// Content hashes of images already optimized in this process
#[derive(Debug, Default)]
pub struct ImageCache {
    digests: Mutex<HashMap<PathBuf, [u8; 32]>>,
    warned: Mutex<HashSet<String>>,
}

impl ImageCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn digest(contents: &[u8]) -> [u8; 32] {
        Sha256::digest(contents).into()
    }

    /// True when `path` was already processed with exactly these contents
    pub fn is_unchanged(&self, path: &Path, digest: &[u8; 32]) -> bool {
        self.digests
            .lock()
            .map(|digests| digests.get(path) == Some(digest))
            .unwrap_or(false)
    }

    pub fn record(&self, path: PathBuf, digest: [u8; 32]) {
        if let Ok(mut digests) = self.digests.lock() {
            digests.insert(path, digest);
        }
    }

    pub fn len(&self) -> usize {
        self.digests.lock().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True the first time a missing program is reported
    fn first_warning(&self, program: &str) -> bool {
        self.warned
            .lock()
            .map(|mut warned| warned.insert(program.to_string()))
            .unwrap_or(true)
    }
}

/// Optimizer per lowercase file extension
#[derive(Default)]
pub struct Optimizers {
    tools: BTreeMap<String, Box<dyn Tool>>,
}

impl Optimizers {
    /// Commands that rewrite the image in place, keyed by extension
    pub fn from_commands(commands: &BTreeMap<String, Vec<String>>) -> Self {
        let mut optimizers = Self::default();
        for (ext, command) in commands {
            if let Some(tool) = CommandTool::from_command(command, ToolMode::InPlace) {
                optimizers.insert(ext, tool);
            }
        }
        optimizers
    }

    pub fn insert(&mut self, ext: &str, tool: impl Tool + 'static) {
        self.tools.insert(ext.to_ascii_lowercase(), Box::new(tool));
    }

    pub fn for_path(&self, path: &Path) -> Option<&dyn Tool> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        self.tools.get(&ext).map(|tool| tool.as_ref())
    }
}

/// Compiled images plus the source digest of every produced file. Digests go
/// into the cache once the file has been written.
#[derive(Debug, Default)]
pub struct ImageOutput {
    pub output: CompileOutput,
    pub digests: HashMap<PathBuf, [u8; 32]>,
}

/// Optimize changed images in parallel. Files without an optimizer, or whose
/// optimizer is not installed, are passed through unchanged. The cache is
/// only read here.
pub fn compile(images: Vec<Asset>, optimizers: &Optimizers, cache: &ImageCache) -> ImageOutput {
    let results: Vec<Option<Result<(Asset, [u8; 32]), FileFailure>>> = images
        .into_par_iter()
        .map(|image| {
            let digest = ImageCache::digest(&image.contents);
            if cache.is_unchanged(&image.path, &digest) {
                tracing::debug!(path = %image.path.display(), "image unchanged");
                return None;
            }

            let contents = match optimizers.for_path(&image.path) {
                None => image.contents.clone(),
                Some(tool) => match tool.run(&image) {
                    Ok(optimized) => optimized,
                    Err(e) if e.is_missing_tool() => {
                        if let BuildError::ToolSpawn { program, .. } = &e {
                            if cache.first_warning(program) {
                                tracing::warn!(%program, "image optimizer not installed, copying images as is");
                            }
                        }
                        image.contents.clone()
                    }
                    Err(error) => {
                        return Some(Err(FileFailure {
                            path: image.origin.clone(),
                            error,
                        }))
                    }
                },
            };

            Some(Ok((Asset::from_source(image.path, image.origin, contents), digest)))
        })
        .collect();

    let mut compiled = ImageOutput::default();
    for result in results.into_iter().flatten() {
        match result {
            Ok((asset, digest)) => {
                compiled.digests.insert(asset.path.clone(), digest);
                compiled.output.files.push(asset);
            }
            Err(failure) => compiled.output.failures.push(failure),
        }
    }
    compiled
}
