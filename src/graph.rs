//! The task graph runner.
//!
//! A task is a named unit of build work with declared dependencies and a
//! fallible action. Tasks form a Directed Acyclic Graph; [`TaskGraph::run`]
//! executes every transitive dependency of the requested task exactly once,
//! with dependencies fully completed before their dependents start.
//! Independent siblings run concurrently on the rayon pool.
//!
//! Invalid graphs (unknown names, duplicate registrations, cycles) are
//! rejected before any action executes. The first failing action aborts the
//! remaining graph and propagates to the caller. Concurrent `run` calls for
//! the same task are not guarded; callers serialize builds.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crossbeam_channel::unbounded;
use indicatif::{ProgressBar, ProgressStyle};
use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, Reversed};

use crate::Context;
use crate::error::GraphError;
use crate::io::as_overhead;

type TaskAction = Arc<dyn Fn(&Context) -> anyhow::Result<()> + Send + Sync>;

struct Task {
    name: &'static str,
    deps: Vec<&'static str>,
    action: TaskAction,
}

/// An explicit task registry, constructed once at startup and passed by
/// reference to the orchestrating code.
#[derive(Default)]
pub struct TaskGraph {
    tasks: Vec<Task>,
    index: HashMap<&'static str, usize>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task under a unique name with its direct dependencies.
    ///
    /// Dependencies may be registered later; they are resolved when `run` is
    /// called.
    pub fn register<F>(
        &mut self,
        name: &'static str,
        deps: &[&'static str],
        action: F,
    ) -> Result<(), GraphError>
    where
        F: Fn(&Context) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        if self.index.contains_key(name) {
            return Err(GraphError::DuplicateTask(name.to_string()));
        }

        self.index.insert(name, self.tasks.len());
        self.tasks.push(Task {
            name,
            deps: deps.to_vec(),
            action: Arc::new(action),
        });

        Ok(())
    }

    /// Resolve dependency names into graph edges, rejecting unknown names and
    /// cycles. Runs on every `run` call, before any action.
    fn resolve(&self) -> Result<(DiGraph<usize, ()>, Vec<NodeIndex>), GraphError> {
        let mut graph = DiGraph::new();
        let nodes: Vec<NodeIndex> = (0..self.tasks.len()).map(|i| graph.add_node(i)).collect();

        for (i, task) in self.tasks.iter().enumerate() {
            for dep in &task.deps {
                let dep_index = self.index.get(dep).ok_or(GraphError::UnknownDependency {
                    task: task.name.to_string(),
                    dependency: dep.to_string(),
                })?;
                graph.add_edge(nodes[*dep_index], nodes[i], ());
            }
        }

        // We run toposort primarily to detect any cycles in the graph.
        toposort(&graph, None)
            .map_err(|cycle| GraphError::Cycle(self.tasks[graph[cycle.node_id()]].name.to_string()))?;

        Ok((graph, nodes))
    }

    /// Run the named task after all of its transitive dependencies.
    pub fn run(&self, name: &str, context: &Context) -> Result<(), GraphError> {
        let s = Instant::now();

        let (graph, nodes) = self.resolve()?;
        let target = *self
            .index
            .get(name)
            .ok_or_else(|| GraphError::UnknownTask(name.to_string()))?;

        // The target plus everything it transitively depends on.
        let mut to_run: HashSet<NodeIndex> = HashSet::new();
        let reversed = Reversed(&graph);
        let mut dfs = Dfs::new(reversed, nodes[target]);
        while let Some(nx) = dfs.next(reversed) {
            to_run.insert(nx);
        }

        self.execute(&graph, &to_run, context)?;

        tracing::info!("Finished '{name}' {}", as_overhead(s));

        Ok(())
    }

    /// Executes the selected subgraph on the rayon pool. Tasks are spawned as
    /// soon as their dependency count reaches zero; results come back over a
    /// channel and unlock dependents. The first error stops all further
    /// spawning and is returned once in-flight tasks have drained.
    fn execute(
        &self,
        graph: &DiGraph<usize, ()>,
        to_run: &HashSet<NodeIndex>,
        context: &Context,
    ) -> Result<(), GraphError> {
        let mut dependency_counts: HashMap<NodeIndex, usize> = to_run
            .iter()
            .map(|&i| {
                (
                    i,
                    graph
                        .neighbors_directed(i, Direction::Incoming)
                        .filter(|dep| to_run.contains(dep))
                        .count(),
                )
            })
            .collect();

        let total = to_run.len() as u64;
        let mut completed = 0;

        let bar = ProgressBar::new(total).with_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .expect("invalid progress bar template")
                .progress_chars("#>-"),
        );

        let active = Arc::new(Mutex::new(HashSet::new()));
        let (result_sender, result_receiver) = unbounded::<(NodeIndex, anyhow::Result<()>)>();

        rayon::scope(|s| -> Result<(), GraphError> {
            let spawn_task = |index: NodeIndex| {
                let task = &self.tasks[graph[index]];
                let action = task.action.clone();
                let name = task.name;
                let sender = result_sender.clone();
                let active = active.clone();
                let bar = bar.clone();

                s.spawn(move |_| {
                    {
                        let mut active = active.lock().unwrap();
                        active.insert(name);
                        bar.set_message(format_active(&active));
                    }

                    let result = action(context);

                    {
                        let mut active = active.lock().unwrap();
                        active.remove(name);
                        bar.set_message(format_active(&active));
                    }

                    let _ = sender.send((index, result));
                });
            };

            for &index in to_run {
                if dependency_counts.get(&index).copied().unwrap_or(0) == 0 {
                    spawn_task(index);
                }
            }

            while completed < total {
                let (completed_index, result) = result_receiver
                    .recv()
                    .expect("scheduler channel closed with tasks outstanding");

                result.map_err(|e| GraphError::Task {
                    name: self.tasks[graph[completed_index]].name.to_string(),
                    source: e,
                })?;

                completed += 1;
                bar.inc(1);

                for dependent in graph.neighbors_directed(completed_index, Direction::Outgoing) {
                    if let Some(count) = dependency_counts.get_mut(&dependent) {
                        *count -= 1;
                        if *count == 0 {
                            spawn_task(dependent);
                        }
                    }
                }
            }

            Ok(())
        })?;

        bar.finish_and_clear();

        Ok(())
    }
}

fn format_active(active: &HashSet<&'static str>) -> String {
    let mut names: Vec<_> = active.iter().copied().collect();
    names.sort_unstable();
    names.join(", ")
}
