use std::error::Error as _;
use std::path::PathBuf;
use thiserror::Error;

/// Build error types
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("No theme configured: set \"theme\" in {settings} or pass --theme")]
    MissingTheme { settings: PathBuf },

    #[error("Invalid JSON in {path}")]
    InvalidJson {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Failed to read {path}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No space left on device for {path}")]
    DiskFull { path: PathBuf },

    #[error("Failed to copy {src} to {dst}")]
    CopyFailed {
        src: PathBuf,
        dst: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create directory: {path}")]
    CreateDirFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove {path}")]
    RemoveFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Download of {url} failed")]
    DownloadFailed {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Download of {url} failed with HTTP status {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("Invalid archive: {path}")]
    InvalidArchive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("Failed to run {program}")]
    ToolSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} failed with exit code {code}: {stderr}")]
    ToolFailed {
        program: String,
        code: i32,
        stderr: String,
    },

    #[error("Template {name}: {message}")]
    Template { name: String, message: String },

    #[error("Invalid catalog at line {line}: {message}")]
    InvalidCatalog { line: usize, message: String },

    #[error("Invalid glob pattern '{pattern}'")]
    InvalidGlob {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error("Invalid pattern")]
    Pattern(#[from] regex::Error),

    #[error("Unknown task: {name}")]
    UnknownTask { name: String },

    #[error("Task graph has a cycle through {task}")]
    CycleDetected { task: String },

    #[error("Task {task} panicked: {message}")]
    TaskPanicked { task: String, message: String },

    #[error("Live reload needs a \"server.proxy\" target")]
    MissingProxy,

    #[error("Failed to create proxy client for {upstream}")]
    ProxyClient {
        upstream: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to start server on port {port}")]
    ServerStart {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("File watcher failed")]
    Watch(#[from] notify::Error),

    #[error("Build cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BuildError {
    /// True when an external tool could not be started because it is not installed.
    pub fn is_missing_tool(&self) -> bool {
        matches!(
            self,
            BuildError::ToolSpawn { source, .. } if source.kind() == std::io::ErrorKind::NotFound
        )
    }

    /// Message including every source in the chain, `outer: inner: ...`.
    pub fn chain(&self) -> String {
        let mut message = self.to_string();
        let mut source = self.source();
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        message
    }
}
