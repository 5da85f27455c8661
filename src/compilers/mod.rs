//! Asset compilers.
//!
//! Every compiler is a pure function from source assets to a
//! [`CompileOutput`]. Reading sources and writing results is left to the task
//! layer, so the compilers can be tested without touching the filesystem
//! (the external-tool ones aside).

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::BuildError;

pub mod functions;
pub mod images;
pub mod javascripts;
pub mod po;
pub mod pot;
pub mod stylesheets;
pub mod templates;

/// Placeholder for the theme text domain in PHP sources
pub const TEXT_DOMAIN_PLACEHOLDER: &str = "$text_domain";

/// A named buffer flowing through a compiler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    /// Output path, relative to the compiler's destination folder
    pub path: PathBuf,
    /// File the contents came from; empty for generated assets
    pub origin: PathBuf,
    pub contents: Vec<u8>,
}

impl Asset {
    /// Generated asset with no source file
    pub fn new(path: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            origin: PathBuf::new(),
            contents: contents.into(),
        }
    }

    pub fn from_source(path: PathBuf, origin: PathBuf, contents: Vec<u8>) -> Self {
        Self {
            path,
            origin,
            contents,
        }
    }

    /// Contents as UTF-8, invalid sequences replaced
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.contents).into_owned()
    }
}

/// A source file a compiler could not process
#[derive(Debug)]
pub struct FileFailure {
    pub path: PathBuf,
    pub error: BuildError,
}

/// Files produced by one compiler run, plus the inputs it skipped
#[derive(Debug, Default)]
pub struct CompileOutput {
    pub files: Vec<Asset>,
    pub failures: Vec<FileFailure>,
}

impl CompileOutput {
    pub fn single(asset: Asset) -> Self {
        Self {
            files: vec![asset],
            failures: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.failures.is_empty()
    }
}

/// Replace the `$text_domain` placeholder with the quoted domain
pub fn substitute_text_domain(source: &str, domain: &str) -> String {
    source.replace(TEXT_DOMAIN_PLACEHOLDER, &format!("\"{domain}\""))
}

/// An opaque transform from one asset to new contents
pub trait Tool: Send + Sync {
    fn run(&self, input: &Asset) -> Result<Vec<u8>, BuildError>;
}

impl<F> Tool for F
where
    F: Fn(&Asset) -> Result<Vec<u8>, BuildError> + Send + Sync,
{
    fn run(&self, input: &Asset) -> Result<Vec<u8>, BuildError> {
        self(input)
    }
}

/// How an external program receives its input and hands back its output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolMode {
    /// Source path appended to the arguments; result read from stdout
    Stdout,
    /// Contents copied to a scratch file that the program rewrites
    InPlace,
}

/// External program invoked once per asset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTool {
    pub program: String,
    pub args: Vec<String>,
    pub mode: ToolMode,
}

impl CommandTool {
    /// `command[0]` is the program, the rest its arguments; `None` if empty
    pub fn from_command(command: &[String], mode: ToolMode) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
            mode,
        })
    }

    fn execute(&self, path: &Path) -> Result<Vec<u8>, BuildError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(path)
            .output()
            .map_err(|source| BuildError::ToolSpawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(BuildError::ToolFailed {
                program: self.program.clone(),
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output.stdout)
    }

    fn run_in_place(&self, input: &Asset) -> Result<Vec<u8>, BuildError> {
        let suffix = input
            .path
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();
        let mut scratch = tempfile::Builder::new()
            .prefix("wp-theme-builder-")
            .suffix(&suffix)
            .tempfile()?;
        scratch.write_all(&input.contents)?;
        scratch.flush()?;

        self.execute(scratch.path())?;

        std::fs::read(scratch.path()).map_err(|source| BuildError::ReadFailed {
            path: scratch.path().to_path_buf(),
            source,
        })
    }
}

impl Tool for CommandTool {
    fn run(&self, input: &Asset) -> Result<Vec<u8>, BuildError> {
        match self.mode {
            ToolMode::Stdout => self.execute(&input.origin),
            ToolMode::InPlace => self.run_in_place(input),
        }
    }
}
