//! Task execution graph
//!
//! Tasks are accumulated with [`TaskExecutionGraph::add_tasks`], each call
//! forming a batch. Uses petgraph to hold the DAG (edges run from a
//! dependency to the task depending on it), detects cycles with strongly
//! connected components and orders tasks with Kahn's algorithm: batches in
//! call order, ties broken by insertion order.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::error::{KilnError, Result};
use crate::task::{Task, TaskDependencyResolver};

/// Lifecycle of a [`TaskExecutionGraph`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphState {
    Empty,
    /// Tasks were added and may still be added
    Populating,
    /// Ordered and about to run
    Ready,
    Executing,
}

/// Scheduling options
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Tasks run at the same time; 1 runs strictly in order
    pub parallelism: usize,
    /// Keep running independent tasks after a failure
    pub continue_on_failure: bool,
    /// Record the plan without running actions
    pub dry_run: bool,
    /// Print spinners and per-task results
    pub progress: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            parallelism: 1,
            continue_on_failure: false,
            dry_run: false,
            progress: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Success,
    Failed(String),
    /// A dependency failed or was skipped
    Skipped,
    DryRun,
}

/// Result of executing a single task
#[derive(Debug, Clone)]
pub struct TaskResult {
    pub task: String,
    pub outcome: TaskOutcome,
    pub duration: Duration,
}

#[derive(Debug)]
struct TaskNode {
    task: Arc<Task>,
    batch: usize,
    /// Order in which the walk from the requested tasks first reached this one
    discovered: usize,
}

struct Discovered {
    task: Arc<Task>,
    dependencies: Vec<Arc<Task>>,
    discovered: usize,
}

/// Accumulated build plan
pub struct TaskExecutionGraph {
    resolver: Arc<dyn TaskDependencyResolver>,
    config: ExecutorConfig,
    graph: DiGraph<TaskNode, ()>,
    index: HashMap<String, NodeIndex>,
    batches: usize,
    discovered: usize,
    state: GraphState,
}

impl TaskExecutionGraph {
    pub fn new(resolver: Arc<dyn TaskDependencyResolver>, config: ExecutorConfig) -> Self {
        Self {
            resolver,
            config,
            graph: DiGraph::new(),
            index: HashMap::new(),
            batches: 0,
            discovered: 0,
            state: GraphState::Empty,
        }
    }

    pub fn state(&self) -> GraphState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn has_task(&self, path: &str) -> bool {
        self.index.contains_key(path)
    }

    /// Add `tasks` and everything they depend on as one batch. Dependencies
    /// are inserted depth-first ahead of the task needing them, so insertion
    /// order follows the order tasks were requested in. Tasks already in the
    /// graph are ignored. Nothing is added if a dependency cannot be found.
    pub fn add_tasks<I>(&mut self, tasks: I) -> Result<()>
    where
        I: IntoIterator<Item = Arc<Task>>,
    {
        let mut seen: HashSet<String> = HashSet::new();
        let mut added: Vec<Discovered> = Vec::new();
        for task in tasks {
            self.discover(task, &mut seen, &mut added)?;
        }

        if added.is_empty() {
            return Ok(());
        }

        let batch = self.batches;
        self.batches += 1;
        for entry in &added {
            let node = self.graph.add_node(TaskNode {
                task: Arc::clone(&entry.task),
                batch,
                discovered: entry.discovered,
            });
            self.index.insert(entry.task.path.to_string(), node);
        }
        for entry in &added {
            let node = self.index[&entry.task.path.to_string()];
            for dependency in &entry.dependencies {
                let dep = self.index[&dependency.path.to_string()];
                self.graph.update_edge(dep, node, ());
            }
        }
        self.discovered += added.len();

        debug!(batch, added = added.len(), total = self.len(), "added tasks to graph");
        self.state = GraphState::Populating;
        Ok(())
    }

    /// Post-order walk: every dependency lands in `added` before `task`
    fn discover(&self, task: Arc<Task>, seen: &mut HashSet<String>, added: &mut Vec<Discovered>) -> Result<()> {
        let path = task.path.to_string();
        if self.index.contains_key(&path) || !seen.insert(path) {
            return Ok(());
        }
        let discovered = self.discovered + seen.len() - 1;
        let dependencies = self.resolver.resolve_dependencies(&task)?;
        for dependency in &dependencies {
            self.discover(Arc::clone(dependency), seen, added)?;
        }
        added.push(Discovered {
            task,
            dependencies,
            discovered,
        });
        Ok(())
    }

    /// Every task in execution order
    pub fn all_tasks(&self) -> Result<Vec<Arc<Task>>> {
        Ok(self
            .execution_order()?
            .into_iter()
            .map(|node| Arc::clone(&self.graph[node].task))
            .collect())
    }

    /// Add `tasks` as a new batch, then execute the graph
    pub async fn execute_tasks<I>(&mut self, tasks: I) -> Result<Vec<TaskResult>>
    where
        I: IntoIterator<Item = Arc<Task>>,
    {
        if let Err(e) = self.add_tasks(tasks) {
            self.clear();
            return Err(e);
        }
        self.execute().await
    }

    /// Run every task in the graph. The graph is empty afterwards, whether
    /// execution succeeded or not.
    pub async fn execute(&mut self) -> Result<Vec<TaskResult>> {
        let result = self.run().await;
        self.clear();
        result
    }

    fn clear(&mut self) {
        self.graph.clear();
        self.index.clear();
        self.batches = 0;
        self.discovered = 0;
        self.state = GraphState::Empty;
    }

    async fn run(&mut self) -> Result<Vec<TaskResult>> {
        let order = self.execution_order()?;
        self.state = GraphState::Ready;
        info!(tasks = order.len(), "executing task graph");

        if self.config.dry_run {
            return Ok(self.dry_run(&order));
        }

        self.state = GraphState::Executing;
        let started = Instant::now();
        let (results, first_failure) = self.schedule(&order).await?;

        if self.config.progress {
            print_summary(&results, started.elapsed());
        }

        if let Some((task, message)) = first_failure {
            if !self.config.continue_on_failure {
                return Err(KilnError::TaskFailed { task, message });
            }
            let paths = |wanted: fn(&TaskOutcome) -> bool| {
                results
                    .iter()
                    .filter(|r| wanted(&r.outcome))
                    .map(|r| r.task.clone())
                    .collect::<Vec<_>>()
            };
            return Err(KilnError::BuildFailed {
                failed: paths(|o| matches!(o, TaskOutcome::Failed(_))),
                skipped: paths(|o| matches!(o, TaskOutcome::Skipped)),
            });
        }

        Ok(results)
    }

    fn dry_run(&self, order: &[NodeIndex]) -> Vec<TaskResult> {
        if self.config.progress {
            println!("{}", style("Execution plan (dry run):").bold().cyan());
        }
        order
            .iter()
            .map(|&node| {
                let task = &self.graph[node].task;
                if self.config.progress {
                    println!("  {}", style(task.path.to_string()).bold());
                    for step in task.action.iter().flat_map(|a| a.describe()) {
                        println!("    {} {}", style("→").dim(), step);
                    }
                }
                TaskResult {
                    task: task.path.to_string(),
                    outcome: TaskOutcome::DryRun,
                    duration: Duration::ZERO,
                }
            })
            .collect()
    }

    /// Start tasks as their dependencies succeed, at most `parallelism` at a
    /// time. Batches run one after the other.
    async fn schedule(&self, order: &[NodeIndex]) -> Result<(Vec<TaskResult>, Option<(String, String)>)> {
        let semaphore = Arc::new(Semaphore::new(self.config.parallelism.max(1)));
        let multi_progress = MultiProgress::new();
        let mut outcomes: HashMap<NodeIndex, TaskResult> = HashMap::new();
        let mut first_failure: Option<(String, String)> = None;

        let mut batch_start = 0;
        while batch_start < order.len() && (first_failure.is_none() || self.config.continue_on_failure) {
            let batch = self.graph[order[batch_start]].batch;
            let batch_end = order[batch_start..]
                .iter()
                .position(|&n| self.graph[n].batch != batch)
                .map_or(order.len(), |p| batch_start + p);

            let mut waiting: Vec<NodeIndex> = order[batch_start..batch_end].to_vec();
            let mut running = JoinSet::new();
            let mut spawned: HashMap<tokio::task::Id, (NodeIndex, Instant)> = HashMap::new();

            loop {
                let stopped = first_failure.is_some() && !self.config.continue_on_failure;
                let mut i = 0;
                while !stopped && i < waiting.len() {
                    let node = waiting[i];
                    match self.readiness(node, &outcomes) {
                        Readiness::Blocked => i += 1,
                        Readiness::Skip => {
                            waiting.remove(i);
                            let path = self.graph[node].task.path.to_string();
                            debug!(task = %path, "skipping task, a dependency did not succeed");
                            outcomes.insert(
                                node,
                                TaskResult {
                                    task: path,
                                    outcome: TaskOutcome::Skipped,
                                    duration: Duration::ZERO,
                                },
                            );
                            i = 0;
                        }
                        Readiness::Ready => {
                            let Ok(permit) = Arc::clone(&semaphore).try_acquire_owned() else {
                                break;
                            };
                            waiting.remove(i);
                            let task = Arc::clone(&self.graph[node].task);
                            let spinner = self.config.progress.then(|| spinner(&multi_progress, &task));
                            let handle = running.spawn(async move {
                                let _permit = permit;
                                let started = Instant::now();
                                debug!(task = %task.path, "starting task");
                                let result = match &task.action {
                                    Some(action) => action.execute(&task).await,
                                    None => Ok(()),
                                };
                                if let Some(spinner) = spinner {
                                    spinner.finish_and_clear();
                                }
                                (node, started.elapsed(), result)
                            });
                            spawned.insert(handle.id(), (node, Instant::now()));
                        }
                    }
                }

                let Some(joined) = running.join_next_with_id().await else {
                    break;
                };
                let (node, duration, result) = match joined {
                    Ok((id, finished)) => {
                        spawned.remove(&id);
                        finished
                    }
                    Err(e) => {
                        let Some((node, started)) = spawned.remove(&e.id()) else {
                            continue;
                        };
                        let failure = KilnError::TaskFailed {
                            task: self.graph[node].task.path.to_string(),
                            message: join_failure(e),
                        };
                        (node, started.elapsed(), Err(failure))
                    }
                };

                let path = self.graph[node].task.path.to_string();
                let outcome = match result {
                    Ok(()) => TaskOutcome::Success,
                    Err(e) => {
                        let message = match e {
                            KilnError::TaskFailed { message, .. } => message,
                            other => other.to_string(),
                        };
                        if first_failure.is_none() {
                            first_failure = Some((path.clone(), message.clone()));
                        }
                        TaskOutcome::Failed(message)
                    }
                };
                let result = TaskResult {
                    task: path,
                    outcome,
                    duration,
                };
                if self.config.progress {
                    print_task_result(&result);
                }
                outcomes.insert(node, result);
            }

            batch_start = batch_end;
        }

        let results = order.iter().filter_map(|node| outcomes.remove(node)).collect();
        Ok((results, first_failure))
    }

    fn readiness(&self, node: NodeIndex, outcomes: &HashMap<NodeIndex, TaskResult>) -> Readiness {
        let mut ready = true;
        for dep in self.graph.neighbors_directed(node, Direction::Incoming) {
            match outcomes.get(&dep).map(|r| &r.outcome) {
                Some(TaskOutcome::Success) => {}
                Some(_) => return Readiness::Skip,
                None => ready = false,
            }
        }
        if ready {
            Readiness::Ready
        } else {
            Readiness::Blocked
        }
    }

    /// Kahn's algorithm, smallest (batch, insertion index) first
    fn execution_order(&self) -> Result<Vec<NodeIndex>> {
        self.check_cycles()?;

        let mut in_degree: HashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|n| (n, self.graph.neighbors_directed(n, Direction::Incoming).count()))
            .collect();
        let key = |n: NodeIndex| Reverse((self.graph[n].batch, n.index()));

        let mut ready: BinaryHeap<_> = in_degree
            .iter()
            .filter(|&(_, &d)| d == 0)
            .map(|(&n, _)| key(n))
            .collect();
        let mut order = Vec::with_capacity(self.graph.node_count());

        while let Some(Reverse((_, index))) = ready.pop() {
            let node = NodeIndex::new(index);
            order.push(node);
            for dependent in self.graph.neighbors_directed(node, Direction::Outgoing) {
                if let Some(degree) = in_degree.get_mut(&dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push(key(dependent));
                    }
                }
            }
        }

        Ok(order)
    }

    /// Fail with the cycle containing the earliest-discovered task, listed
    /// from that task along its dependencies back to itself
    fn check_cycles(&self) -> Result<()> {
        let discovered = |n: &NodeIndex| self.graph[*n].discovered;
        let cyclic = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|scc| scc.len() > 1 || self.graph.contains_edge(scc[0], scc[0]))
            .min_by_key(|scc| scc.iter().map(discovered).min());

        let Some(scc) = cyclic else {
            return Ok(());
        };
        let members: HashSet<NodeIndex> = scc.iter().copied().collect();
        let start = scc.iter().copied().min_by_key(discovered).unwrap_or(scc[0]);

        // breadth-first search along depends-on edges for the shortest way back
        let mut parent: HashMap<NodeIndex, NodeIndex> = HashMap::new();
        let mut queue = VecDeque::from([start]);
        let mut closing = None;
        while let Some(node) = queue.pop_front() {
            let mut deps: Vec<NodeIndex> = self
                .graph
                .neighbors_directed(node, Direction::Incoming)
                .filter(|d| members.contains(d))
                .collect();
            deps.sort_by_key(discovered);
            deps.dedup();
            if deps.contains(&start) {
                closing = Some(node);
                break;
            }
            for dep in deps {
                if dep != start && !parent.contains_key(&dep) {
                    parent.insert(dep, node);
                    queue.push_back(dep);
                }
            }
        }

        let mut cycle = vec![self.graph[start].task.path.to_string()];
        if let Some(mut node) = closing {
            let mut tail = Vec::new();
            while node != start {
                tail.push(self.graph[node].task.path.to_string());
                node = parent[&node];
            }
            cycle.extend(tail.into_iter().rev());
        }
        cycle.push(self.graph[start].task.path.to_string());

        Err(KilnError::CyclicDependency { cycle })
    }
}

/// A panicking or cancelled action counts as a failure of its task
fn join_failure(e: tokio::task::JoinError) -> String {
    if !e.is_panic() {
        return "task action was cancelled".to_string();
    }
    let payload = e.into_panic();
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown cause".to_string());
    format!("task action panicked: {}", detail)
}

enum Readiness {
    Ready,
    Blocked,
    Skip,
}

fn spinner(multi_progress: &MultiProgress, task: &Task) -> ProgressBar {
    let pb = multi_progress.add(ProgressBar::new_spinner());
    if let Ok(template) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
        pb.set_style(template);
    }
    pb.set_message(format!("Running {}", task.path));
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn print_task_result(result: &TaskResult) {
    let status = match &result.outcome {
        TaskOutcome::Success => style("✓").green(),
        TaskOutcome::Failed(_) => style("✗").red(),
        TaskOutcome::Skipped => style("-").yellow(),
        TaskOutcome::DryRun => style("·").dim(),
    };
    let duration = format!("{:.2}s", result.duration.as_secs_f64());

    println!("{} {} {}", status, style(&result.task).bold(), style(duration).dim());
    if let TaskOutcome::Failed(error) = &result.outcome {
        eprintln!("  {}", style(error).red());
    }
}

fn print_summary(results: &[TaskResult], elapsed: Duration) {
    let succeeded = results.iter().filter(|r| r.outcome == TaskOutcome::Success).count();
    let failed = results
        .iter()
        .filter(|r| matches!(r.outcome, TaskOutcome::Failed(_)))
        .count();
    let skipped = results.iter().filter(|r| r.outcome == TaskOutcome::Skipped).count();

    println!();
    if failed == 0 {
        println!(
            "{} {} tasks completed in {:.2}s",
            style("✓").green().bold(),
            succeeded,
            elapsed.as_secs_f64()
        );
    } else {
        println!(
            "{} {} succeeded, {} failed, {} skipped in {:.2}s",
            style("✗").red().bold(),
            succeeded,
            failed,
            skipped,
            elapsed.as_secs_f64()
        );
    }
}
