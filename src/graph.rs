//! Task identifiers, the dependency graph between them, and the scheduler.
//!
//! The graph is fixed for a run. Edges point from a prerequisite to the task
//! that needs it, so a topological order lists prerequisites first.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::mpsc;
use std::time::Duration;

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

use crate::error::BuildError;
use crate::tasks::{TaskResult, TaskStatus};

/// Every task the pipeline knows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskId {
    Install,
    Download,
    Unzip,
    Rename,
    Delete,
    CompileJavascripts,
    CompileStylesheets,
    CompileTemplates,
    CompilePot,
    CompilePo,
    CompileImages,
    CompileFunctions,
    CompileMisc,
    Compile,
    Watch,
    LiveReload,
    HardClean,
    Default,
}

impl TaskId {
    pub const ALL: [TaskId; 18] = [
        TaskId::Install,
        TaskId::Download,
        TaskId::Unzip,
        TaskId::Rename,
        TaskId::Delete,
        TaskId::CompileJavascripts,
        TaskId::CompileStylesheets,
        TaskId::CompileTemplates,
        TaskId::CompilePot,
        TaskId::CompilePo,
        TaskId::CompileImages,
        TaskId::CompileFunctions,
        TaskId::CompileMisc,
        TaskId::Compile,
        TaskId::Watch,
        TaskId::LiveReload,
        TaskId::HardClean,
        TaskId::Default,
    ];

    /// The asset compilers aggregated by `compile`
    pub const COMPILERS: [TaskId; 8] = [
        TaskId::CompileTemplates,
        TaskId::CompileStylesheets,
        TaskId::CompileJavascripts,
        TaskId::CompileImages,
        TaskId::CompileFunctions,
        TaskId::CompilePot,
        TaskId::CompilePo,
        TaskId::CompileMisc,
    ];

    /// Installer stages, in execution order
    pub const INSTALL_STAGES: [TaskId; 4] = [
        TaskId::Download,
        TaskId::Unzip,
        TaskId::Rename,
        TaskId::Delete,
    ];

    /// Name used on the command line
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskId::Install => "install",
            TaskId::Download => "download",
            TaskId::Unzip => "unzip",
            TaskId::Rename => "rename",
            TaskId::Delete => "delete",
            TaskId::CompileJavascripts => "compileJavascripts",
            TaskId::CompileStylesheets => "compileStylesheets",
            TaskId::CompileTemplates => "compileTemplates",
            TaskId::CompilePot => "compilePOT",
            TaskId::CompilePo => "compilePO",
            TaskId::CompileImages => "compileImages",
            TaskId::CompileFunctions => "compileFunctions",
            TaskId::CompileMisc => "compileMisc",
            TaskId::Compile => "compile",
            TaskId::Watch => "watch",
            TaskId::LiveReload => "live-reload",
            TaskId::HardClean => "hard-clean",
            TaskId::Default => "default",
        }
    }

    /// Entry points that install WordPress first when it is missing.
    /// Individual compilers never install.
    pub fn gates_install(&self) -> bool {
        matches!(self, TaskId::Compile | TaskId::Default)
    }

    /// Tasks that only group their prerequisites
    pub fn is_aggregate(&self) -> bool {
        matches!(self, TaskId::Install | TaskId::Compile | TaskId::Default)
    }
}

impl FromStr for TaskId {
    type Err = BuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskId::ALL
            .iter()
            .copied()
            .find(|task| task.as_str() == s)
            .ok_or_else(|| BuildError::UnknownTask { name: s.to_string() })
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `(task, prerequisite)` pairs of the pipeline. With `install_gate`,
/// `compile` and every compiler wait for the installer.
pub fn pipeline_edges(install_gate: bool) -> Vec<(TaskId, TaskId)> {
    let mut edges = vec![
        (TaskId::Unzip, TaskId::Download),
        (TaskId::Rename, TaskId::Unzip),
        (TaskId::Delete, TaskId::Rename),
        (TaskId::CompilePot, TaskId::CompileTemplates),
        (TaskId::Default, TaskId::Compile),
    ];
    edges.extend(TaskId::INSTALL_STAGES.iter().map(|stage| (TaskId::Install, *stage)));
    edges.extend(TaskId::COMPILERS.iter().map(|compiler| (TaskId::Compile, *compiler)));

    if install_gate {
        edges.push((TaskId::Compile, TaskId::Install));
        edges.extend(TaskId::COMPILERS.iter().map(|compiler| (*compiler, TaskId::Install)));
    }
    edges
}

/// A task that panicked counts as failed, so its dependents are skipped
/// and the scheduler keeps going
fn panicked(task: TaskId, payload: Box<dyn Any + Send>) -> TaskResult {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    tracing::error!(task = %task, "panicked: {message}");
    TaskResult::new(
        task,
        TaskStatus::Failed(BuildError::TaskPanicked {
            task: task.to_string(),
            message,
        }),
        0,
        Duration::ZERO,
    )
}

/// Acyclic dependency graph over [`TaskId`]
#[derive(Debug, Clone)]
pub struct TaskGraph {
    graph: DiGraph<TaskId, ()>,
    nodes: HashMap<TaskId, NodeIndex>,
    /// Topological position of every task
    rank: HashMap<TaskId, usize>,
}

impl TaskGraph {
    pub fn new(install_gate: bool) -> Result<Self, BuildError> {
        Self::from_edges(&pipeline_edges(install_gate))
    }

    /// Graph for running `targets`; the install gate only applies when a
    /// target that installs is requested and WordPress is missing
    pub fn for_targets(targets: &[TaskId], needs_install: bool) -> Result<Self, BuildError> {
        let install_gate = needs_install && targets.iter().any(TaskId::gates_install);
        Self::new(install_gate)
    }

    /// Build a graph from `(task, prerequisite)` pairs, rejecting cycles
    pub fn from_edges(edges: &[(TaskId, TaskId)]) -> Result<Self, BuildError> {
        let mut graph = DiGraph::new();
        let mut nodes = HashMap::new();
        for task in TaskId::ALL {
            nodes.insert(task, graph.add_node(task));
        }
        for (task, prerequisite) in edges {
            graph.update_edge(nodes[prerequisite], nodes[task], ());
        }

        let order = toposort(&graph, None).map_err(|cycle| BuildError::CycleDetected {
            task: graph[cycle.node_id()].to_string(),
        })?;
        let rank = order
            .iter()
            .enumerate()
            .map(|(position, index)| (graph[*index], position))
            .collect();

        Ok(Self { graph, nodes, rank })
    }

    /// Direct prerequisites of `task`
    pub fn dependencies(&self, task: TaskId) -> BTreeSet<TaskId> {
        self.neighbors(task, Direction::Incoming).collect()
    }

    /// Tasks that directly wait for `task`
    pub fn dependents(&self, task: TaskId) -> BTreeSet<TaskId> {
        self.neighbors(task, Direction::Outgoing).collect()
    }

    fn neighbors(&self, task: TaskId, direction: Direction) -> impl Iterator<Item = TaskId> + '_ {
        self.graph
            .neighbors_directed(self.nodes[&task], direction)
            .map(|index| self.graph[index])
    }

    /// `targets` and everything they transitively need, prerequisites first
    pub fn plan(&self, targets: &[TaskId]) -> Vec<TaskId> {
        let mut seen: HashSet<TaskId> = HashSet::new();
        let mut stack: Vec<TaskId> = targets.to_vec();
        while let Some(task) = stack.pop() {
            if seen.insert(task) {
                stack.extend(self.dependencies(task));
            }
        }

        let mut plan: Vec<TaskId> = seen.into_iter().collect();
        plan.sort_by_key(|task| self.rank[task]);
        plan
    }

    /// Run the plan for `targets`. Every task whose prerequisites succeeded
    /// starts on its own scoped thread; dependents of a task that did not
    /// succeed are reported as skipped without running. Results come back in
    /// plan order.
    pub fn execute<F>(&self, targets: &[TaskId], run: F) -> Vec<TaskResult>
    where
        F: Fn(TaskId) -> TaskResult + Sync,
    {
        let plan = self.plan(targets);
        let in_plan: HashSet<TaskId> = plan.iter().copied().collect();
        let mut waiting_on: HashMap<TaskId, usize> = plan
            .iter()
            .map(|task| (*task, self.dependencies(*task).len()))
            .collect();
        let mut pending: HashSet<TaskId> = in_plan.clone();
        let mut results: HashMap<TaskId, TaskResult> = HashMap::new();

        std::thread::scope(|scope| {
            let (tx, rx) = mpsc::channel::<TaskResult>();
            let run = &run;
            let mut running = 0usize;

            loop {
                let ready: Vec<TaskId> = plan
                    .iter()
                    .copied()
                    .filter(|task| pending.contains(task) && waiting_on[task] == 0)
                    .collect();
                for task in ready {
                    pending.remove(&task);
                    running += 1;
                    let tx = tx.clone();
                    scope.spawn(move || {
                        let result = panic::catch_unwind(AssertUnwindSafe(|| run(task)))
                            .unwrap_or_else(|payload| panicked(task, payload));
                        let _ = tx.send(result);
                    });
                }

                if running == 0 {
                    break;
                }
                let Ok(result) = rx.recv() else {
                    break;
                };
                running -= 1;

                let succeeded = result.status.is_success();
                for dependent in self.dependents(result.task) {
                    if !in_plan.contains(&dependent) {
                        continue;
                    }
                    if succeeded {
                        if let Some(count) = waiting_on.get_mut(&dependent) {
                            *count = count.saturating_sub(1);
                        }
                    } else {
                        self.skip_from(dependent, &mut pending, &mut results);
                    }
                }
                results.insert(result.task, result);
            }
        });

        plan.into_iter()
            .map(|task| results.remove(&task).unwrap_or_else(|| TaskResult::skipped(task)))
            .collect()
    }

    /// Mark `task` and its pending dependents as skipped
    fn skip_from(
        &self,
        task: TaskId,
        pending: &mut HashSet<TaskId>,
        results: &mut HashMap<TaskId, TaskResult>,
    ) {
        let mut stack = vec![task];
        while let Some(task) = stack.pop() {
            if !pending.remove(&task) {
                continue;
            }
            tracing::debug!(task = %task, "skipped, a prerequisite did not succeed");
            results.insert(task, TaskResult::skipped(task));
            stack.extend(self.dependents(task));
        }
    }
}
