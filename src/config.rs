//! Settings resolution and CLI argument parsing.
//!
//! The effective settings are built once per run by overlaying three sources,
//! lowest priority first: built-in defaults, the project `config.json`, and the
//! command line. After the merge, a missing `domain` is derived from `theme`.

use clap::Parser;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::BuildError;
use crate::graph::TaskId;
use crate::paths::PathTable;

/// Settings file name, looked up in the project root
pub const SETTINGS_FILE: &str = "config.json";

/// Base package fetched by the installer
pub const DEFAULT_PACKAGE_URL: &str = "https://wordpress.org/latest.zip";

/// Directory holding the installed WordPress tree
pub const RUNTIME_ROOT: &str = "public";

/// Build pipeline for WordPress themes
#[derive(Parser, Debug)]
#[command(name = "wp-theme-builder")]
#[command(version)]
#[command(about = "Build pipeline for WordPress themes: install, compile, watch and live reload")]
pub struct Cli {
    /// Task to run (default, compile, watch, install, compileTemplates, ...)
    #[arg(default_value = "default")]
    pub task: String,

    /// Project root directory
    #[arg(long, default_value = ".")]
    pub root: PathBuf,

    /// Settings file (defaults to <root>/config.json)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Theme folder name under themes/
    #[arg(short, long)]
    pub theme: Option<String>,

    /// Text domain (defaults to the kebab-cased theme name)
    #[arg(long)]
    pub domain: Option<String>,

    /// Production build: minify, no install, no live reload
    #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    pub production: Option<bool>,

    /// URL of the WordPress archive to install
    #[arg(long)]
    pub latest_wordpress_url: Option<String>,

    /// Live reload server port
    #[arg(long)]
    pub port: Option<u16>,

    /// Upstream WordPress server proxied by live reload
    #[arg(long)]
    pub proxy: Option<String>,

    /// Open a browser when live reload starts
    #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    pub open: Option<bool>,

    /// Show an in-page notice on reload
    #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    pub notify: Option<bool>,

    /// Prefix for live reload log lines
    #[arg(long)]
    pub log_prefix: Option<String>,

    /// Override any settings field, e.g. --set locals.title=Blog (repeatable)
    #[arg(long = "set", value_name = "KEY=VALUE")]
    pub overrides: Vec<String>,

    /// Number of parallel workers
    #[arg(short, long, default_value_t = num_cpus::get())]
    pub jobs: usize,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

/// Live reload server settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerSettings {
    pub port: u16,
    pub open: bool,
    pub notify: bool,
    pub proxy: Option<String>,
    pub log_prefix: String,
}

/// External programs used by the stylesheet and image compilers
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ToolSettings {
    /// Stylus invocation; the entry stylesheet path is appended
    pub stylus: Vec<String>,
    /// Optimizer per lowercase image extension; the file is optimized in place
    pub images: BTreeMap<String, Vec<String>>,
}

/// Merged project settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Settings {
    #[serde(rename = "latestWordpressURL")]
    pub latest_wordpress_url: String,
    pub production: bool,
    pub theme: Option<String>,
    pub domain: Option<String>,
    pub locals: Map<String, Value>,
    pub server: ServerSettings,
    pub tools: ToolSettings,
}

/// Runtime configuration for one run; never mutated after construction
#[derive(Debug, Clone)]
pub struct Config {
    /// Task requested on the command line
    pub task: TaskId,
    /// Project root directory
    pub root: PathBuf,
    /// Settings file that was consulted
    pub settings_path: PathBuf,
    /// Merged settings
    pub settings: Settings,
    /// Number of parallel workers
    pub jobs: usize,
    /// Enable verbose output
    pub verbose: bool,
}

impl Config {
    /// Create Config from CLI arguments and the project settings file
    pub fn from_cli(cli: Cli) -> anyhow::Result<Self> {
        let task: TaskId = cli.task.parse()?;
        let root = cli.root.canonicalize().unwrap_or_else(|_| cli.root.clone());
        let settings_path = cli
            .config
            .clone()
            .unwrap_or_else(|| root.join(SETTINGS_FILE));

        let file = load_settings_file(&settings_path)?;
        let overrides = cli_overrides(&cli)?;
        let settings = resolve(default_settings(build_timestamp()), file, overrides)?;

        Ok(Config {
            task,
            root,
            settings_path,
            settings,
            jobs: cli.jobs.max(1),
            verbose: cli.verbose,
        })
    }

    #[inline]
    pub fn production(&self) -> bool {
        self.settings.production
    }

    /// Text domain; empty when neither `domain` nor `theme` is configured
    pub fn domain(&self) -> &str {
        self.settings.domain.as_deref().unwrap_or_default()
    }

    /// Path table rooted at the project directory
    pub fn paths(&self) -> Result<PathTable, BuildError> {
        match self.settings.theme.as_deref() {
            Some(theme) if !theme.is_empty() => Ok(PathTable::new(theme).within(&self.root)),
            _ => Err(BuildError::MissingTheme {
                settings: self.settings_path.clone(),
            }),
        }
    }

    pub fn runtime_root(&self) -> PathBuf {
        self.root.join(RUNTIME_ROOT)
    }

    /// Whether `compile` must install WordPress first
    pub fn needs_install(&self) -> bool {
        crate::installer::should_install(self.runtime_root().exists(), self.production())
    }
}

fn build_timestamp() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Built-in defaults, the lowest priority source
pub fn default_settings(version: i64) -> Value {
    json!({
        "latestWordpressURL": DEFAULT_PACKAGE_URL,
        "production": false,
        "locals": {
            "version": version
        },
        "server": {
            "logPrefix": "Server",
            "port": 8080,
            "open": false,
            "notify": false
        },
        "tools": {
            "stylus": ["stylus", "--use", "nib", "--use", "jeet", "--print"],
            "images": {
                "png": ["optipng", "-quiet", "-o2"],
                "jpg": ["jpegoptim", "--quiet", "--strip-all"],
                "jpeg": ["jpegoptim", "--quiet", "--strip-all"],
                "gif": ["gifsicle", "--batch", "-O2"],
                "svg": ["svgo", "--quiet"]
            }
        }
    })
}

/// Read the project settings file. A missing file counts as `{}`; unreadable
/// or malformed files are errors.
pub fn load_settings_file(path: &Path) -> Result<Value, BuildError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(Value::Object(Map::new()))
        }
        Err(e) => {
            return Err(BuildError::ReadFailed {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };

    let object: Map<String, Value> =
        serde_json::from_str(&content).map_err(|source| BuildError::InvalidJson {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(Value::Object(object))
}

/// Overlay `defaults < file < cli`, derive the domain, and type the result
pub fn resolve(defaults: Value, file: Value, cli: Value) -> Result<Settings, BuildError> {
    let mut merged = defaults;
    merge(&mut merged, file);
    merge(&mut merged, cli);
    derive_domain(&mut merged);

    serde_json::from_value(merged).map_err(|e| BuildError::InvalidConfig {
        message: e.to_string(),
    })
}

/// Recursive merge: objects merge key by key, everything else is replaced.
pub fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Set `domain` from `theme` when only the latter is present
pub fn derive_domain(settings: &mut Value) {
    let Some(object) = settings.as_object_mut() else {
        return;
    };
    if object.get("domain").is_some_and(|d| !d.is_null()) {
        return;
    }
    let Some(theme) = object.get("theme").and_then(Value::as_str) else {
        return;
    };
    let domain = kebab_case(theme);
    object.insert("domain".to_string(), Value::String(domain));
}

/// Convert a name to kebab-case: "MyTheme 2" -> "my-theme-2".
///
/// Words split on non-alphanumerics, lower-to-upper transitions, acronym
/// ends ("XMLHttp" -> "xml", "http") and letter/digit boundaries. Apostrophes
/// are dropped without splitting.
pub fn kebab_case(input: &str) -> String {
    let chars: Vec<char> = input.chars().filter(|c| *c != '\'' && *c != '\u{2019}').collect();
    let mut words: Vec<String> = Vec::new();
    let mut current = String::new();

    for (i, &c) in chars.iter().enumerate() {
        if !c.is_alphanumeric() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            continue;
        }

        if !current.is_empty() {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            let boundary = (prev.is_lowercase() && c.is_uppercase())
                || (prev.is_alphabetic() && c.is_numeric())
                || (prev.is_numeric() && c.is_alphabetic())
                || (prev.is_uppercase() && c.is_uppercase() && next_is_lower);
            if boundary {
                words.push(std::mem::take(&mut current));
            }
        }
        current.extend(c.to_lowercase());
    }
    if !current.is_empty() {
        words.push(current);
    }

    words.join("-")
}

/// Turn the flags that were actually passed into a settings overlay
pub fn cli_overrides(cli: &Cli) -> Result<Value, BuildError> {
    let mut overlay = Value::Object(Map::new());

    if let Some(theme) = &cli.theme {
        set_path(&mut overlay, "theme", json!(theme));
    }
    if let Some(domain) = &cli.domain {
        set_path(&mut overlay, "domain", json!(domain));
    }
    if let Some(production) = cli.production {
        set_path(&mut overlay, "production", json!(production));
    }
    if let Some(url) = &cli.latest_wordpress_url {
        set_path(&mut overlay, "latestWordpressURL", json!(url));
    }
    if let Some(port) = cli.port {
        set_path(&mut overlay, "server.port", json!(port));
    }
    if let Some(proxy) = &cli.proxy {
        set_path(&mut overlay, "server.proxy", json!(proxy));
    }
    if let Some(open) = cli.open {
        set_path(&mut overlay, "server.open", json!(open));
    }
    if let Some(notify) = cli.notify {
        set_path(&mut overlay, "server.notify", json!(notify));
    }
    if let Some(prefix) = &cli.log_prefix {
        set_path(&mut overlay, "server.logPrefix", json!(prefix));
    }

    for assignment in &cli.overrides {
        let Some((key, raw)) = assignment.split_once('=') else {
            return Err(BuildError::InvalidConfig {
                message: format!("expected KEY=VALUE, got '{assignment}'"),
            });
        };
        if key.is_empty() {
            return Err(BuildError::InvalidConfig {
                message: format!("empty key in '{assignment}'"),
            });
        }
        // Values that are not valid JSON are taken as plain strings
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        set_path(&mut overlay, key, value);
    }

    Ok(overlay)
}

/// Set a dotted key path, creating intermediate objects
fn set_path(target: &mut Value, key: &str, value: Value) {
    let mut current = target;
    let mut segments = key.split('.').peekable();
    while let Some(segment) = segments.next() {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        let Value::Object(map) = current else {
            return;
        };
        if segments.peek().is_none() {
            map.insert(segment.to_string(), value);
            return;
        }
        current = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
}
