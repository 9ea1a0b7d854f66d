//! The task graph.
//!
//! A [`Blueprint`] collects named tasks. Each task has a list of
//! prerequisites and either a leaf action (an async closure over the shared
//! context `C`) or a composite body: a [`sequence`](TaskDef::sequence) of
//! steps run strictly left to right, or a [`parallel`](TaskDef::parallel)
//! group whose members start together and are joined at the end.
//!
//! [`Blueprint::finish`] resolves every name into a `petgraph` node, rejects
//! unknown references and cycles, and yields an immutable [`TaskGraph`]. The
//! graph is passed explicitly to whoever runs it; there is no global task
//! table.
//!
//! Edges point from a prerequisite (or a composite member) to the task that
//! waits on it.

mod diagnostics;
mod phase;
mod runner;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use petgraph::Graph;
use petgraph::graph::NodeIndex;

use crate::error::{GraphError, StepError};

pub use diagnostics::{Diagnostics, TaskExecution};
pub use phase::{Phase, PhaseTracker};

/// Result of a single task's own action.
pub type TaskResult = Result<(), StepError>;

type ActionFn<C> = Arc<dyn Fn(Arc<C>) -> BoxFuture<'static, TaskResult> + Send + Sync>;

/// One element of a sequence: a single task, or a group of tasks started
/// together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Task(Arc<str>),
    Parallel(Vec<Arc<str>>),
}

impl Step {
    pub fn parallel<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Arc<str>>,
    {
        Step::Parallel(names.into_iter().map(Into::into).collect())
    }

    fn names(&self) -> &[Arc<str>] {
        match self {
            Step::Task(name) => std::slice::from_ref(name),
            Step::Parallel(names) => names,
        }
    }
}

impl From<&str> for Step {
    fn from(name: &str) -> Self {
        Step::Task(name.into())
    }
}

enum Body<C> {
    Action(ActionFn<C>),
    Sequence(Vec<Step>),
}

struct TaskSpec<C> {
    name: Arc<str>,
    about: Option<String>,
    phase: Option<Phase>,
    dependencies: Vec<Arc<str>>,
    body: Body<C>,
}

/// Collects task definitions.
pub struct Blueprint<C> {
    tasks: Vec<TaskSpec<C>>,
}

impl<C: Send + Sync + 'static> Blueprint<C> {
    pub fn new() -> Self {
        Self { tasks: Vec::new() }
    }

    /// Starts the definition of a task.
    pub fn task(&mut self, name: impl Into<Arc<str>>) -> TaskDef<'_, C> {
        TaskDef {
            blueprint: self,
            name: name.into(),
            about: None,
            phase: None,
            dependencies: Vec::new(),
        }
    }

    /// Validates the definitions and builds the executable graph.
    pub fn finish(self) -> Result<TaskGraph<C>, GraphError> {
        let mut graph = Graph::new();
        let mut index = HashMap::new();
        let mut pending = Vec::new();

        for spec in self.tasks {
            if index.contains_key(&spec.name) {
                return Err(GraphError::Duplicate(spec.name.to_string()));
            }

            let references: Vec<Arc<str>> = match &spec.body {
                Body::Action(_) => spec.dependencies.clone(),
                Body::Sequence(steps) => spec
                    .dependencies
                    .iter()
                    .chain(steps.iter().flat_map(Step::names))
                    .cloned()
                    .collect(),
            };

            let node = graph.add_node(Node {
                name: spec.name.clone(),
                about: spec.about,
                phase: spec.phase,
                dependencies: Vec::new(),
                body: NodeBody::Sequence(Vec::new()),
            });
            index.insert(spec.name.clone(), node);
            pending.push((node, spec.dependencies, spec.body, references));
        }

        let lookup = |task: &Arc<str>, name: &Arc<str>| {
            index.get(name).copied().ok_or_else(|| GraphError::UnknownTask {
                task: task.to_string(),
                missing: name.to_string(),
            })
        };

        for (node, dependencies, body, references) in pending {
            let name = graph[node].name.clone();

            for reference in &references {
                let source = lookup(&name, reference)?;
                graph.add_edge(source, node, ());
            }

            graph[node].dependencies = dependencies
                .iter()
                .map(|dep| lookup(&name, dep))
                .collect::<Result<_, _>>()?;

            graph[node].body = match body {
                Body::Action(action) => NodeBody::Action(action),
                Body::Sequence(steps) => NodeBody::Sequence(
                    steps
                        .iter()
                        .map(|step| {
                            step.names()
                                .iter()
                                .map(|member| lookup(&name, member))
                                .collect::<Result<Vec<_>, _>>()
                        })
                        .collect::<Result<_, _>>()?,
                ),
            };
        }

        if let Err(cycle) = petgraph::algo::toposort(&graph, None) {
            return Err(GraphError::Cycle(graph[cycle.node_id()].name.to_string()));
        }

        Ok(TaskGraph { graph, index })
    }
}

impl<C: Send + Sync + 'static> Default for Blueprint<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for a single task, returned by [`Blueprint::task`].
pub struct TaskDef<'a, C> {
    blueprint: &'a mut Blueprint<C>,
    name: Arc<str>,
    about: Option<String>,
    phase: Option<Phase>,
    dependencies: Vec<Arc<str>>,
}

impl<'a, C: Send + Sync + 'static> TaskDef<'a, C> {
    /// One-line description shown by `--list`.
    pub fn about(mut self, about: impl Into<String>) -> Self {
        self.about = Some(about.into());
        self
    }

    /// The pipeline phase entered when this task's action starts.
    pub fn phase(mut self, phase: Phase) -> Self {
        self.phase = Some(phase);
        self
    }

    /// Tasks that must complete before this one starts. They are started
    /// together.
    pub fn depends_on<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Arc<str>>,
    {
        self.dependencies.extend(names.into_iter().map(Into::into));
        self
    }

    /// Registers a leaf task running `action`.
    pub fn run<F, Fut>(self, action: F)
    where
        F: Fn(Arc<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        let action: ActionFn<C> = Arc::new(move |ctx| action(ctx).boxed());
        self.register(Body::Action(action));
    }

    /// Registers a composite task running `steps` strictly in order.
    pub fn sequence<I, S>(self, steps: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<Step>,
    {
        let steps = steps.into_iter().map(Into::into).collect();
        self.register(Body::Sequence(steps));
    }

    /// Registers a composite task starting every member together.
    pub fn parallel<I, S>(self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<Arc<str>>,
    {
        self.register(Body::Sequence(vec![Step::parallel(names)]));
    }

    fn register(self, body: Body<C>) {
        self.blueprint.tasks.push(TaskSpec {
            name: self.name,
            about: self.about,
            phase: self.phase,
            dependencies: self.dependencies,
            body,
        });
    }
}

pub(crate) enum NodeBody<C> {
    Action(ActionFn<C>),
    /// Each entry is one step; a step with several members is a parallel group.
    Sequence(Vec<Vec<NodeIndex>>),
}

pub(crate) struct Node<C> {
    pub(crate) name: Arc<str>,
    pub(crate) about: Option<String>,
    pub(crate) phase: Option<Phase>,
    pub(crate) dependencies: Vec<NodeIndex>,
    pub(crate) body: NodeBody<C>,
}

/// A validated, immutable task graph.
pub struct TaskGraph<C> {
    pub(crate) graph: Graph<Node<C>, ()>,
    index: HashMap<Arc<str>, NodeIndex>,
}

impl<C> TaskGraph<C> {
    pub(crate) fn lookup(&self, name: &str) -> Option<NodeIndex> {
        self.index.get(name).copied()
    }

    /// Registered tasks with their descriptions, in registration order.
    pub fn tasks(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.graph
            .node_indices()
            .map(|i| (&*self.graph[i].name, self.graph[i].about.as_deref()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }
}

impl<C> std::fmt::Display for TaskGraph<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "graph LR")?;

        for index in self.graph.node_indices() {
            let task = &self.graph[index];
            let name = task.name.replace('"', "\\\"");
            match task.body {
                NodeBody::Action(_) => writeln!(f, "    {:?}[\"{}\"]", index.index(), name)?,
                NodeBody::Sequence(_) => writeln!(f, "    {:?}([\"{}\"])", index.index(), name)?,
            }
        }

        for edge in self.graph.raw_edges() {
            writeln!(
                f,
                "    {:?} --> {:?}",
                edge.source().index(),
                edge.target().index()
            )?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(blueprint: &mut Blueprint<()>, name: &str, deps: &[&str]) {
        blueprint
            .task(name)
            .depends_on(deps.iter().copied())
            .run(|_| async { Ok(()) });
    }

    #[test]
    fn rejects_duplicates() {
        let mut blueprint = Blueprint::new();
        noop(&mut blueprint, "a", &[]);
        noop(&mut blueprint, "a", &[]);

        assert!(matches!(blueprint.finish(), Err(GraphError::Duplicate(name)) if name == "a"));
    }

    #[test]
    fn rejects_unknown_prerequisites() {
        let mut blueprint = Blueprint::new();
        noop(&mut blueprint, "a", &["ghost"]);

        let err = blueprint.finish().err().unwrap();
        assert!(matches!(
            err,
            GraphError::UnknownTask { ref task, ref missing } if task == "a" && missing == "ghost"
        ));
    }

    #[test]
    fn rejects_unknown_sequence_members() {
        let mut blueprint = Blueprint::<()>::new();
        blueprint.task("all").sequence([Step::parallel(["x", "y"])]);

        assert!(matches!(blueprint.finish(), Err(GraphError::UnknownTask { .. })));
    }

    #[test]
    fn rejects_cycles() {
        let mut blueprint = Blueprint::new();
        noop(&mut blueprint, "a", &["c"]);
        noop(&mut blueprint, "b", &["a"]);
        noop(&mut blueprint, "c", &["b"]);

        assert!(matches!(blueprint.finish(), Err(GraphError::Cycle(_))));
    }

    #[test]
    fn rejects_cycles_through_composites() {
        let mut blueprint = Blueprint::new();
        noop(&mut blueprint, "a", &["all"]);
        blueprint.task("all").sequence(["a"]);

        assert!(matches!(blueprint.finish(), Err(GraphError::Cycle(_))));
    }

    #[test]
    fn renders_mermaid() {
        let mut blueprint = Blueprint::new();
        noop(&mut blueprint, "a", &[]);
        noop(&mut blueprint, "b", &["a"]);
        blueprint.task("all").sequence(["a", "b"]);

        let graph = blueprint.finish().unwrap();
        let text = graph.to_string();

        assert!(text.starts_with("graph LR\n"));
        assert!(text.contains("0[\"a\"]"));
        assert!(text.contains("2([\"all\"])"));
        assert!(text.contains("0 --> 1"));
        assert_eq!(graph.tasks().count(), 3);
    }
}
