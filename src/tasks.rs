//! Task bodies for every node of the task graph.
//!
//! Each compile task follows the same shape: read its sources, hand them to
//! the pure compiler, write the produced files under the theme destination,
//! log per-file failures, and pass the written paths to the reload bridge.
//! Per-file failures leave the task successful; a write failure fails it.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::compilers::images::{ImageCache, Optimizers};
use crate::compilers::pot::PotOptions;
use crate::compilers::stylesheets::{StyleHeader, HEADER_TEMPLATE_FILE};
use crate::compilers::{
    functions, images, javascripts, po, pot, stylesheets, templates, CommandTool, CompileOutput, ToolMode,
};
use crate::config::Config;
use crate::copier::{copy_matching, write_file};
use crate::error::BuildError;
use crate::graph::TaskId;
use crate::installer;
use crate::paths::{PathTable, SourceGlob};
use crate::scanner::{read_glob, read_optional};
use crate::server::ReloadBridge;
use crate::theme::ThemeMeta;

/// Result of one task run
#[derive(Debug)]
pub struct TaskResult {
    /// Which task this result belongs to
    pub task: TaskId,
    /// Success or failure status
    pub status: TaskStatus,
    /// Number of files written
    pub file_count: u64,
    /// Time taken for this task
    pub duration: Duration,
}

impl TaskResult {
    pub fn new(task: TaskId, status: TaskStatus, file_count: u64, duration: Duration) -> Self {
        Self {
            task,
            status,
            file_count,
            duration,
        }
    }

    /// Not run because a prerequisite did not succeed
    pub fn skipped(task: TaskId) -> Self {
        Self::new(task, TaskStatus::Skipped, 0, Duration::ZERO)
    }
}

/// Task outcome
#[derive(Debug)]
pub enum TaskStatus {
    /// Completed; per-file failures may still have been logged
    Success,
    /// Failed with error
    Failed(BuildError),
    /// A prerequisite failed or was skipped
    Skipped,
    /// Cancelled by user (SIGINT)
    Cancelled,
}

impl TaskStatus {
    #[inline]
    pub fn is_success(&self) -> bool {
        matches!(self, TaskStatus::Success)
    }
}

/// Cache-line aligned atomic counter to prevent false sharing
/// Each counter is on its own 64-byte cache line
#[repr(align(64))]
pub struct CacheAlignedAtomic(pub AtomicU64);

impl CacheAlignedAtomic {
    pub const fn new(val: u64) -> Self {
        Self(AtomicU64::new(val))
    }

    #[inline]
    pub fn add(&self, val: u64) {
        self.0.fetch_add(val, Ordering::Relaxed);
    }

    #[inline]
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Counters shared by concurrently running tasks
pub struct BuildStats {
    pub files_written: CacheAlignedAtomic,
    pub bytes_written: CacheAlignedAtomic,
    /// Per-file failures and failed tasks
    pub errors: CacheAlignedAtomic,
}

impl BuildStats {
    pub fn new() -> Self {
        Self {
            files_written: CacheAlignedAtomic::new(0),
            bytes_written: CacheAlignedAtomic::new(0),
            errors: CacheAlignedAtomic::new(0),
        }
    }
}

impl Default for BuildStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything a task needs; shared by reference across the scheduler threads
pub struct BuildContext {
    pub config: Config,
    pub bridge: Arc<dyn ReloadBridge>,
    pub stats: BuildStats,
    pub shutdown: Arc<AtomicBool>,
    /// Survives across watch-triggered runs
    pub images: ImageCache,
    pub optimizers: Optimizers,
    /// Show the download progress bar
    pub show_progress: bool,
}

impl BuildContext {
    pub fn new(config: Config, bridge: Arc<dyn ReloadBridge>, shutdown: Arc<AtomicBool>) -> Self {
        let optimizers = Optimizers::from_commands(&config.settings.tools.images);
        Self {
            config,
            bridge,
            stats: BuildStats::new(),
            shutdown,
            images: ImageCache::new(),
            optimizers,
            show_progress: true,
        }
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    fn paths(&self) -> Result<PathTable, BuildError> {
        self.config.paths()
    }
}

/// Run one task to completion
pub fn run_task(task: TaskId, ctx: &BuildContext) -> TaskResult {
    let start = Instant::now();

    if ctx.is_cancelled() {
        return TaskResult::new(task, TaskStatus::Cancelled, 0, start.elapsed());
    }

    tracing::debug!(task = %task, "starting");
    let outcome = match task {
        TaskId::Download => download(ctx),
        TaskId::Unzip => installer::unzip(&ctx.config.root),
        TaskId::Rename => installer::rename(&ctx.config.root, &ctx.shutdown).map(|report| report.files),
        TaskId::Delete => installer::delete(&ctx.config.root).map(|()| 0),
        TaskId::HardClean => hard_clean(ctx),
        TaskId::CompileTemplates => compile_templates(ctx),
        TaskId::CompileStylesheets => compile_stylesheets(ctx),
        TaskId::CompileJavascripts => compile_javascripts(ctx),
        TaskId::CompilePot => compile_pot(ctx),
        TaskId::CompilePo => compile_po(ctx),
        TaskId::CompileImages => compile_images(ctx),
        TaskId::CompileFunctions => compile_functions(ctx),
        TaskId::CompileMisc => compile_misc(ctx),
        // Aggregates only order their prerequisites; watch and live reload
        // run after the graph
        TaskId::Install | TaskId::Compile | TaskId::Default | TaskId::Watch | TaskId::LiveReload => Ok(0),
    };
    let duration = start.elapsed();

    match outcome {
        Ok(files) => {
            if !task.is_aggregate() {
                tracing::info!(task = %task, files, elapsed_ms = duration.as_millis() as u64, "finished");
            }
            TaskResult::new(task, TaskStatus::Success, files, duration)
        }
        Err(BuildError::Cancelled) => TaskResult::new(task, TaskStatus::Cancelled, 0, duration),
        Err(e) => {
            ctx.stats.errors.add(1);
            tracing::error!(task = %task, "{}", e.chain());
            TaskResult::new(task, TaskStatus::Failed(e), 0, duration)
        }
    }
}

/// Write compiled files below `dest`, report per-file failures, and notify
/// the bridge when `notify` is set. Returns the number of files written.
fn emit(ctx: &BuildContext, task: TaskId, dest: &Path, output: CompileOutput, notify: bool) -> Result<u64, BuildError> {
    emit_with(ctx, task, dest, output, notify, |_| {})
}

/// [`emit`], calling `on_written` with the relative path of every file
/// once it is on disk
fn emit_with<F>(
    ctx: &BuildContext,
    task: TaskId,
    dest: &Path,
    output: CompileOutput,
    notify: bool,
    mut on_written: F,
) -> Result<u64, BuildError>
where
    F: FnMut(&Path),
{
    for failure in &output.failures {
        ctx.stats.errors.add(1);
        tracing::warn!(task = %task, path = %failure.path.display(), "{}", failure.error.chain());
    }

    let mut written = Vec::with_capacity(output.files.len());
    for file in output.files {
        if ctx.is_cancelled() {
            return Err(BuildError::Cancelled);
        }
        let target = dest.join(&file.path);
        let bytes = write_file(&target, &file.contents)?;
        ctx.stats.files_written.add(1);
        ctx.stats.bytes_written.add(bytes);
        on_written(&file.path);
        written.push(target);
    }

    let count = written.len() as u64;
    if notify {
        ctx.bridge.stream(written);
    }
    Ok(count)
}

fn download(ctx: &BuildContext) -> Result<u64, BuildError> {
    let url = &ctx.config.settings.latest_wordpress_url;
    let bytes = installer::download(url, &ctx.config.root, ctx.show_progress)?;
    tracing::info!(url = %url, bytes, "downloaded");
    Ok(1)
}

fn hard_clean(ctx: &BuildContext) -> Result<u64, BuildError> {
    let removed = installer::hard_clean(&ctx.config.root)?;
    for path in &removed {
        tracing::info!(path = %path.display(), "removed");
    }
    Ok(removed.len() as u64)
}

fn compile_templates(ctx: &BuildContext) -> Result<u64, BuildError> {
    let paths = ctx.paths()?;
    let sources = read_glob(&paths.templates)?;
    let output = templates::compile(&sources, &ctx.config.settings.locals);
    emit(ctx, TaskId::CompileTemplates, &paths.destination, output, true)
}

fn compile_stylesheets(ctx: &BuildContext) -> Result<u64, BuildError> {
    let paths = ctx.paths()?;
    let stylus = CommandTool::from_command(&ctx.config.settings.tools.stylus, ToolMode::Stdout).ok_or_else(|| {
        BuildError::InvalidConfig {
            message: "tools.stylus is empty".to_string(),
        }
    })?;

    let header = match ThemeMeta::load(&paths.config)? {
        Some(meta) => {
            let template = read_optional(&ctx.config.root.join(HEADER_TEMPLATE_FILE))?.map(|asset| asset.text());
            Some(StyleHeader {
                meta: meta.with_default_text_domain(ctx.config.domain()),
                template,
            })
        }
        None => None,
    };

    let entry = read_optional(&paths.style_entry())?;
    let output = stylesheets::compile(entry, &stylus, header.as_ref(), ctx.config.production());
    emit(ctx, TaskId::CompileStylesheets, &paths.destination, output, true)
}

fn compile_javascripts(ctx: &BuildContext) -> Result<u64, BuildError> {
    let paths = ctx.paths()?;
    let scripts = read_glob(&paths.javascripts)?;
    let output = javascripts::compile(scripts, ctx.config.production());
    emit(ctx, TaskId::CompileJavascripts, &paths.destination, output, true)
}

/// Catalog template extracted from the compiled PHP in the destination.
/// Written next to the compiled catalogs and back into the theme sources.
fn compile_pot(ctx: &BuildContext) -> Result<u64, BuildError> {
    let paths = ctx.paths()?;
    let mut sources = read_glob(&SourceGlob::new(paths.destination.clone(), "**/*.php"))?;
    sources.sort_by(|a, b| a.path.cmp(&b.path));

    let mut options = PotOptions::new(ctx.config.domain(), chrono::Utc::now());
    if let Some(meta) = ThemeMeta::load(&paths.config)? {
        options.bug_report = meta.author_uri();
        options.team = meta.author();
    }

    let output = pot::compile(&sources, &options);
    let copies: Vec<(PathBuf, Vec<u8>)> = output
        .files
        .iter()
        .map(|file| (paths.source_languages().join(&file.path), file.contents.clone()))
        .collect();

    let written = emit(ctx, TaskId::CompilePot, &paths.destination_languages(), output, false)?;
    for (target, contents) in copies {
        write_file(&target, &contents)?;
    }
    Ok(written)
}

fn compile_po(ctx: &BuildContext) -> Result<u64, BuildError> {
    let paths = ctx.paths()?;
    let catalogs = read_glob(&paths.languages)?;
    let output = po::compile(&catalogs);
    emit(ctx, TaskId::CompilePo, &paths.destination_languages(), output, true)
}

fn compile_images(ctx: &BuildContext) -> Result<u64, BuildError> {
    let paths = ctx.paths()?;
    let sources = read_glob(&paths.images)?;
    let images::ImageOutput { output, mut digests } = images::compile(sources, &ctx.optimizers, &ctx.images);
    emit_with(ctx, TaskId::CompileImages, &paths.destination.join("images"), output, true, |path| {
        if let Some(digest) = digests.remove(path) {
            ctx.images.record(path.to_path_buf(), digest);
        }
    })
}

fn compile_functions(ctx: &BuildContext) -> Result<u64, BuildError> {
    let paths = ctx.paths()?;
    let source = read_optional(&paths.functions)?;
    let output = functions::compile(source, ctx.config.domain());
    emit(ctx, TaskId::CompileFunctions, &paths.destination, output, true)
}

/// Verbatim copy of everything no other compiler handles; browsers are not notified
fn compile_misc(ctx: &BuildContext) -> Result<u64, BuildError> {
    let paths = ctx.paths()?;
    let matcher = paths.misc.matcher()?;
    let report = copy_matching(&paths.root, &paths.destination, &ctx.shutdown, |relative| {
        matcher.is_match(relative)
    })?;
    ctx.stats.files_written.add(report.files);
    ctx.stats.bytes_written.add(report.bytes);
    Ok(report.files)
}

/// Collect and aggregate task results
pub fn collect_results(results: Vec<TaskResult>) -> (Vec<TaskResult>, bool, bool) {
    let mut all_results = Vec::with_capacity(results.len());
    let mut has_success = false;
    let mut has_failure = false;

    for result in results {
        match &result.status {
            TaskStatus::Success => has_success = true,
            TaskStatus::Failed(_) | TaskStatus::Skipped => has_failure = true,
            TaskStatus::Cancelled => {}
        }
        all_results.push(result);
    }

    (all_results, has_success, has_failure)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{default_settings, resolve};
    use crate::graph::TaskGraph;
    use crate::server::NoopBridge;
    use serde_json::{json, Value};
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Records every path handed to the bridge
    #[derive(Default)]
    struct RecordingBridge {
        streamed: Mutex<Vec<PathBuf>>,
    }

    impl ReloadBridge for RecordingBridge {
        fn stream(&self, written: Vec<PathBuf>) -> Vec<PathBuf> {
            self.streamed.lock().unwrap().extend(written.iter().cloned());
            written
        }

        fn serve(&self, _: &crate::config::ServerSettings) -> Result<crate::server::ServerHandle, BuildError> {
            Ok(crate::server::ServerHandle::inactive())
        }
    }

    fn touch(root: &Path, relative: &str, contents: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn config(root: &Path, file: Value) -> Config {
        let settings = resolve(default_settings(1), file, json!({})).unwrap();
        Config {
            task: TaskId::Compile,
            root: root.to_path_buf(),
            settings_path: root.join("config.json"),
            settings,
            jobs: 2,
            verbose: false,
        }
    }

    fn context(root: &Path, file: Value, bridge: Arc<dyn ReloadBridge>) -> BuildContext {
        let mut ctx = BuildContext::new(config(root, file), bridge, Arc::new(AtomicBool::new(false)));
        ctx.show_progress = false;
        ctx
    }

    fn theme_fixture(root: &Path) {
        touch(root, "themes/blog/config.json", r#"{"theme-name": "Blog", "author": "Ann", "author-uri": "https://ann.dev"}"#);
        touch(root, "themes/blog/templates/index.php.tera", "<h1>{{ title }}</h1><?php _e('Hello', $text_domain); ?>");
        touch(root, "themes/blog/templates/_nav.tera", "nav");
        touch(root, "themes/blog/javascripts/app.js", "app();");
        touch(root, "themes/blog/javascripts/jquery.js", "jq();");
        touch(root, "themes/blog/functions.php", "<?php load_theme_textdomain($text_domain);");
        touch(root, "themes/blog/screenshot.png", "png");
        touch(root, "themes/blog/parts/footer.php", "<footer/>");
        touch(root, "themes/blog/images/logo.webp", "RIFF");
    }

    fn blog() -> Value {
        json!({"theme": "blog", "locals": {"title": "Blog"}, "tools": {"images": {}}})
    }

    // ==================== CacheAlignedAtomic / BuildStats tests ====================

    #[test]
    fn test_cache_aligned_atomic_alignment() {
        assert_eq!(std::mem::align_of::<CacheAlignedAtomic>(), 64);
    }

    #[test]
    fn test_build_stats_increment() {
        let stats = BuildStats::default();
        stats.files_written.add(3);
        stats.bytes_written.add(1024);
        stats.errors.add(1);
        assert_eq!(stats.files_written.get(), 3);
        assert_eq!(stats.bytes_written.get(), 1024);
        assert_eq!(stats.errors.get(), 1);
    }

    // ==================== compile task tests ====================

    #[test]
    fn test_compile_templates_writes_and_notifies() {
        let temp = TempDir::new().unwrap();
        theme_fixture(temp.path());
        let bridge = Arc::new(RecordingBridge::default());
        let ctx = context(temp.path(), blog(), bridge.clone());

        let result = run_task(TaskId::CompileTemplates, &ctx);

        assert!(result.status.is_success());
        assert_eq!(result.file_count, 1);
        let out = temp.path().join("public/wp-content/themes/blog/index.php");
        assert!(fs::read_to_string(&out).unwrap().starts_with("<h1>Blog</h1>"));
        assert!(!temp.path().join("public/wp-content/themes/blog/_nav").exists());
        assert_eq!(*bridge.streamed.lock().unwrap(), vec![out]);
    }

    #[test]
    fn test_compile_javascripts_bundle_order() {
        let temp = TempDir::new().unwrap();
        theme_fixture(temp.path());
        let ctx = context(temp.path(), blog(), Arc::new(NoopBridge));

        assert!(run_task(TaskId::CompileJavascripts, &ctx).status.is_success());

        let bundle = fs::read_to_string(temp.path().join("public/wp-content/themes/blog/core.js")).unwrap();
        assert_eq!(bundle, "jq();\napp();");
    }

    #[test]
    fn test_compile_functions_sets_text_domain() {
        let temp = TempDir::new().unwrap();
        theme_fixture(temp.path());
        let ctx = context(temp.path(), blog(), Arc::new(NoopBridge));

        run_task(TaskId::CompileFunctions, &ctx);

        let php = fs::read_to_string(temp.path().join("public/wp-content/themes/blog/functions.php")).unwrap();
        assert!(php.starts_with("<?php global $text_domain; $text_domain = \"blog\"; ?>"));
        assert!(php.ends_with("load_theme_textdomain(\"blog\");"));
    }

    #[test]
    fn test_compile_misc_copies_without_notifying() {
        let temp = TempDir::new().unwrap();
        theme_fixture(temp.path());
        let bridge = Arc::new(RecordingBridge::default());
        let ctx = context(temp.path(), blog(), bridge.clone());

        let result = run_task(TaskId::CompileMisc, &ctx);

        assert_eq!(result.file_count, 2);
        let dest = temp.path().join("public/wp-content/themes/blog");
        assert!(dest.join("screenshot.png").exists());
        assert!(dest.join("parts/footer.php").exists());
        assert!(!dest.join("config.json").exists());
        assert!(!dest.join("functions.php").exists());
        assert!(bridge.streamed.lock().unwrap().is_empty());
    }

    #[test]
    fn test_compile_images_without_optimizers() {
        let temp = TempDir::new().unwrap();
        theme_fixture(temp.path());
        let ctx = context(temp.path(), blog(), Arc::new(NoopBridge));

        assert_eq!(run_task(TaskId::CompileImages, &ctx).file_count, 1);
        assert!(temp.path().join("public/wp-content/themes/blog/images/logo.webp").exists());

        // unchanged images are not rewritten in the same process
        assert_eq!(run_task(TaskId::CompileImages, &ctx).file_count, 0);
    }

    #[test]
    fn test_failed_image_write_is_retried() {
        let temp = TempDir::new().unwrap();
        theme_fixture(temp.path());
        // a file where the images directory should go makes the write fail
        let images = temp.path().join("public/wp-content/themes/blog/images");
        touch(temp.path(), "public/wp-content/themes/blog/images", "in the way");
        let ctx = context(temp.path(), blog(), Arc::new(NoopBridge));

        let result = run_task(TaskId::CompileImages, &ctx);
        assert!(matches!(result.status, TaskStatus::Failed(_)));
        assert!(ctx.images.is_empty());

        fs::remove_file(&images).unwrap();
        assert_eq!(run_task(TaskId::CompileImages, &ctx).file_count, 1);
        assert!(images.join("logo.webp").exists());
        assert_eq!(ctx.images.len(), 1);
    }

    #[test]
    fn test_compile_pot_writes_both_locations() {
        let temp = TempDir::new().unwrap();
        theme_fixture(temp.path());
        let ctx = context(temp.path(), blog(), Arc::new(NoopBridge));

        run_task(TaskId::CompileTemplates, &ctx);
        let result = run_task(TaskId::CompilePot, &ctx);

        assert!(result.status.is_success());
        let built = temp.path().join("public/wp-content/themes/blog/languages/blog.pot");
        let source = temp.path().join("themes/blog/languages/blog.pot");
        let pot = fs::read_to_string(&built).unwrap();
        assert!(pot.contains("msgid \"Hello\""));
        assert!(pot.contains("Report-Msgid-Bugs-To: https://ann.dev"));
        assert!(pot.contains("Language-Team: Ann"));
        assert_eq!(fs::read_to_string(source).unwrap(), pot);
    }

    #[test]
    fn test_compile_po_writes_mo() {
        let temp = TempDir::new().unwrap();
        theme_fixture(temp.path());
        touch(
            temp.path(),
            "themes/blog/languages/nl_NL.po",
            "msgid \"\"\nmsgstr \"Content-Type: text/plain; charset=UTF-8\\n\"\n\nmsgid \"Hello\"\nmsgstr \"Hallo\"\n",
        );
        let ctx = context(temp.path(), blog(), Arc::new(NoopBridge));

        let result = run_task(TaskId::CompilePo, &ctx);

        assert_eq!(result.file_count, 1);
        assert!(temp.path().join("public/wp-content/themes/blog/languages/nl_NL.mo").exists());
    }

    #[test]
    fn test_malformed_catalog_is_not_a_task_failure() {
        let temp = TempDir::new().unwrap();
        theme_fixture(temp.path());
        touch(temp.path(), "themes/blog/languages/de_DE.po", "msgstr \"orphan\"\n");
        let ctx = context(temp.path(), blog(), Arc::new(NoopBridge));

        let result = run_task(TaskId::CompilePo, &ctx);

        assert!(result.status.is_success());
        assert_eq!(result.file_count, 0);
        assert_eq!(ctx.stats.errors.get(), 1);
    }

    #[test]
    fn test_missing_stylus_fails_only_its_file() {
        let temp = TempDir::new().unwrap();
        theme_fixture(temp.path());
        touch(temp.path(), "themes/blog/stylesheets/style.styl", "body\n  color red");
        let mut file = blog();
        file["tools"]["stylus"] = json!(["wp-theme-builder-missing-stylus"]);
        let ctx = context(temp.path(), file, Arc::new(NoopBridge));

        let result = run_task(TaskId::CompileStylesheets, &ctx);

        assert!(result.status.is_success());
        assert_eq!(result.file_count, 0);
        assert_eq!(ctx.stats.errors.get(), 1);
    }

    #[test]
    fn test_missing_theme_fails_task() {
        let temp = TempDir::new().unwrap();
        let ctx = context(temp.path(), json!({}), Arc::new(NoopBridge));

        let result = run_task(TaskId::CompileTemplates, &ctx);

        assert!(matches!(result.status, TaskStatus::Failed(BuildError::MissingTheme { .. })));
        assert_eq!(ctx.stats.errors.get(), 1);
    }

    #[test]
    fn test_cancelled_before_start() {
        let temp = TempDir::new().unwrap();
        let ctx = context(temp.path(), blog(), Arc::new(NoopBridge));
        ctx.shutdown.store(true, Ordering::SeqCst);

        let result = run_task(TaskId::CompileMisc, &ctx);

        assert!(matches!(result.status, TaskStatus::Cancelled));
    }

    #[test]
    fn test_graph_compile_without_install_gate() {
        let temp = TempDir::new().unwrap();
        theme_fixture(temp.path());
        let ctx = context(temp.path(), blog(), Arc::new(NoopBridge));
        let graph = TaskGraph::new(false).unwrap();

        let results = graph.execute(&[TaskId::Compile], |task| run_task(task, &ctx));
        let (results, has_success, has_failure) = collect_results(results);

        assert!(has_success);
        assert!(!has_failure, "{results:?}");
        assert_eq!(results.last().unwrap().task, TaskId::Compile);
        assert!(temp.path().join("public/wp-content/themes/blog/languages/blog.pot").exists());
    }

    #[test]
    fn test_hard_clean_task() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "public/index.php", "<?php");
        touch(temp.path(), "tmp/latest.zip", "zip");
        let ctx = context(temp.path(), blog(), Arc::new(NoopBridge));

        let result = run_task(TaskId::HardClean, &ctx);

        assert_eq!(result.file_count, 2);
        assert!(!temp.path().join("public").exists());
    }

    // ==================== collect_results tests ====================

    fn make_result(status: TaskStatus) -> TaskResult {
        TaskResult::new(TaskId::CompileMisc, status, 0, Duration::from_secs(1))
    }

    #[test]
    fn test_collect_results_mixed() {
        let results = vec![
            make_result(TaskStatus::Success),
            make_result(TaskStatus::Failed(BuildError::Cancelled)),
            make_result(TaskStatus::Skipped),
        ];

        let (collected, has_success, has_failure) = collect_results(results);

        assert_eq!(collected.len(), 3);
        assert!(has_success);
        assert!(has_failure);
    }

    #[test]
    fn test_collect_results_cancelled_no_success_no_failure() {
        let (_, has_success, has_failure) = collect_results(vec![make_result(TaskStatus::Cancelled)]);
        assert!(!has_success);
        assert!(!has_failure);
    }

    #[test]
    fn test_collect_results_empty() {
        let (collected, has_success, has_failure) = collect_results(Vec::new());
        assert!(collected.is_empty());
        assert!(!has_success);
        assert!(!has_failure);
    }
}
