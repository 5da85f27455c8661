//! Watch mode: re-run compile tasks when theme sources change.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

use globset::GlobSet;
use notify::{Event, EventKind, RecursiveMode, Watcher};

use crate::error::BuildError;
use crate::graph::{TaskGraph, TaskId};
use crate::paths::{build_set, PathTable};
use crate::tasks::{collect_results, run_task, BuildContext, TaskStatus};

/// Quiet period after the last event before tasks run
const DEBOUNCE: Duration = Duration::from_millis(120);

/// Upper bound on how long a cancel request goes unnoticed
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Sources that trigger a set of tasks
#[derive(Debug, Clone)]
pub struct WatchRule {
    set: GlobSet,
    pub tasks: Vec<TaskId>,
}

impl WatchRule {
    fn new(patterns: Vec<String>, tasks: &[TaskId]) -> Result<Self, BuildError> {
        Ok(Self {
            set: build_set(&patterns)?,
            tasks: tasks.to_vec(),
        })
    }

    /// `path` is relative to the project root
    pub fn matches(&self, path: &Path) -> bool {
        self.set.is_match(path)
    }
}

/// Rules for a path table relative to the project root
pub fn rules(paths: &PathTable) -> Result<Vec<WatchRule>, BuildError> {
    let literal = |path: &Path| path.to_string_lossy().replace('\\', "/");
    let stylesheets = format!("{}/**/*.styl", literal(&paths.stylesheets));

    Ok(vec![
        WatchRule::new(vec![stylesheets, literal(&paths.config)], &[TaskId::CompileStylesheets])?,
        WatchRule::new(
            vec![paths.templates.full_pattern()],
            &[TaskId::CompileTemplates, TaskId::CompilePot],
        )?,
        WatchRule::new(vec![paths.javascripts.full_pattern()], &[TaskId::CompileJavascripts])?,
        WatchRule::new(vec![paths.images.full_pattern()], &[TaskId::CompileImages])?,
        WatchRule::new(vec![literal(&paths.functions)], &[TaskId::CompileFunctions])?,
        WatchRule::new(vec![paths.languages.full_pattern()], &[TaskId::CompilePo])?,
    ])
}

/// Tasks triggered by any of `changed`, in task order
pub fn triggered<'a, I>(rules: &[WatchRule], changed: I) -> Vec<TaskId>
where
    I: IntoIterator<Item = &'a PathBuf>,
{
    let mut tasks = BTreeSet::new();
    for path in changed {
        for rule in rules.iter().filter(|rule| rule.matches(path)) {
            tasks.extend(rule.tasks.iter().copied());
        }
    }
    tasks.into_iter().collect()
}

fn is_relevant(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

/// Watch the theme sources until Ctrl+C. Every debounced batch of changes
/// runs the triggered tasks as a fresh graph execution without the install
/// gate.
pub fn run(ctx: &BuildContext) -> Result<(), BuildError> {
    let absolute = ctx.config.paths()?;
    let theme = ctx.config.settings.theme.as_deref().unwrap_or_default();
    let rules = rules(&PathTable::new(theme))?;
    let graph = TaskGraph::new(false)?;

    let (tx, rx) = mpsc::channel::<notify::Result<Event>>();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        let _ = tx.send(res);
    })?;
    watcher.watch(&absolute.root, RecursiveMode::Recursive)?;
    tracing::info!(path = %absolute.root.display(), "watching for changes");

    let mut changed: BTreeSet<PathBuf> = BTreeSet::new();
    let mut deadline: Option<Instant> = None;

    loop {
        if ctx.is_cancelled() {
            return Ok(());
        }

        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(Ok(event)) if is_relevant(&event) => {
                for path in event.paths {
                    if let Ok(relative) = path.strip_prefix(&ctx.config.root) {
                        changed.insert(relative.to_path_buf());
                    }
                }
                deadline = Some(Instant::now() + DEBOUNCE);
            }
            Ok(Ok(_)) | Err(RecvTimeoutError::Timeout) => {}
            Ok(Err(e)) => tracing::warn!("watch error: {e}"),
            Err(RecvTimeoutError::Disconnected) => return Ok(()),
        }

        if deadline.is_some_and(|at| Instant::now() >= at) {
            deadline = None;
            let tasks = triggered(&rules, &changed);
            changed.clear();
            if tasks.is_empty() {
                continue;
            }

            tracing::debug!(?tasks, "change detected");
            let results = graph.execute(&tasks, |task| run_task(task, ctx));
            let (results, _, has_failure) = collect_results(results);
            if has_failure {
                for result in &results {
                    if let TaskStatus::Failed(e) = &result.status {
                        tracing::warn!(task = %result.task, "{}", e.chain());
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triggered_by(path: &str) -> Vec<TaskId> {
        let rules = rules(&PathTable::new("blog")).unwrap();
        triggered(&rules, &[PathBuf::from(path)])
    }

    #[test]
    fn test_stylesheet_rules() {
        assert_eq!(triggered_by("themes/blog/stylesheets/style.styl"), vec![TaskId::CompileStylesheets]);
        assert_eq!(
            triggered_by("themes/blog/stylesheets/partials/grid.styl"),
            vec![TaskId::CompileStylesheets]
        );
        // theme metadata feeds the stylesheet header
        assert_eq!(triggered_by("themes/blog/config.json"), vec![TaskId::CompileStylesheets]);
        assert!(triggered_by("themes/blog/stylesheets/notes.txt").is_empty());
    }

    #[test]
    fn test_template_change_also_refreshes_pot() {
        assert_eq!(
            triggered_by("themes/blog/templates/parts/header.php.tera"),
            vec![TaskId::CompileTemplates, TaskId::CompilePot]
        );
    }

    #[test]
    fn test_other_rules() {
        assert_eq!(triggered_by("themes/blog/javascripts/lib/menu.js"), vec![TaskId::CompileJavascripts]);
        assert_eq!(triggered_by("themes/blog/images/icons/x.png"), vec![TaskId::CompileImages]);
        assert_eq!(triggered_by("themes/blog/functions.php"), vec![TaskId::CompileFunctions]);
        assert_eq!(triggered_by("themes/blog/languages/nl_NL.po"), vec![TaskId::CompilePo]);
    }

    #[test]
    fn test_unwatched_paths() {
        assert!(triggered_by("themes/blog/languages/blog.pot").is_empty());
        assert!(triggered_by("themes/blog/screenshot.png").is_empty());
        assert!(triggered_by("themes/other/functions.php").is_empty());
        assert!(triggered_by("public/wp-content/themes/blog/style.css").is_empty());
    }

    #[test]
    fn test_batch_is_deduplicated() {
        let rules = rules(&PathTable::new("blog")).unwrap();
        let changed = [
            PathBuf::from("themes/blog/javascripts/a.js"),
            PathBuf::from("themes/blog/javascripts/b.js"),
            PathBuf::from("themes/blog/functions.php"),
        ];
        assert_eq!(
            triggered(&rules, &changed),
            vec![TaskId::CompileJavascripts, TaskId::CompileFunctions]
        );
    }
}
