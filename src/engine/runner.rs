use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures::FutureExt;
use futures::future::{BoxFuture, try_join_all};
use indicatif::ProgressStyle;
use petgraph::graph::NodeIndex;
use tokio::sync::OnceCell;
use tracing::{Instrument, Level};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::engine::{Diagnostics, NodeBody, PhaseTracker, TaskExecution, TaskGraph};
use crate::error::{BuildError, TaskError};

type Outcome = Result<(), TaskError>;

/// State of one invocation of the graph.
///
/// Every task owns a cell that is initialised by the first waiter; later
/// waiters (a second dependant, a sequence naming an already finished task)
/// get the memoized outcome, including a memoized failure. Nothing is ever
/// retried within a run.
struct Run<'g, C> {
    graph: &'g TaskGraph<C>,
    ctx: Arc<C>,
    cells: HashMap<NodeIndex, OnceCell<Outcome>>,
    executions: Mutex<HashMap<Arc<str>, TaskExecution>>,
    tracker: Mutex<PhaseTracker>,
    style: ProgressStyle,
    root: tracing::Span,
}

impl<C: Send + Sync + 'static> TaskGraph<C> {
    /// Runs the named tasks one after another, each with all of its
    /// prerequisites. The first failure aborts the run.
    pub async fn run(&self, ctx: Arc<C>, names: &[&str]) -> Result<Diagnostics, BuildError> {
        let targets = names
            .iter()
            .map(|name| {
                self.lookup(name)
                    .ok_or_else(|| BuildError::UnknownTask(name.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let root = tracing::span!(Level::INFO, "pipeline");
        root.pb_set_length(self.graph.node_count() as u64);
        root.pb_set_style(&crate::utils::get_style_pipeline());
        root.pb_set_message("Running tasks...");

        let run = Run {
            graph: self,
            ctx,
            cells: self
                .graph
                .node_indices()
                .map(|index| (index, OnceCell::new()))
                .collect(),
            executions: Mutex::new(HashMap::new()),
            tracker: Mutex::new(PhaseTracker::default()),
            style: crate::utils::get_style_task(),
            root: root.clone(),
        };

        let outcome = async {
            for &target in &targets {
                run.node(target).await?;
            }
            Ok::<_, TaskError>(())
        }
        .instrument(root.clone())
        .await;

        let mut tracker = run.tracker.into_inner().unwrap_or_else(|e| e.into_inner());
        let execution_times = run.executions.into_inner().unwrap_or_else(|e| e.into_inner());

        match outcome {
            Ok(()) => {
                tracker.finish();
                tracing::info!("Pipeline complete!");
                Ok(Diagnostics {
                    execution_times,
                    phases: tracker.history().to_vec(),
                })
            }
            Err(err) => {
                let phase = tracker.current();
                tracker.fail();
                tracing::error!(task = %err.task, %phase, "pipeline failed");
                Err(BuildError::Task(err))
            }
        }
    }
}

impl<C: Send + Sync + 'static> Run<'_, C> {
    /// Resolves a task, executing it if nobody has yet.
    fn node(&self, index: NodeIndex) -> BoxFuture<'_, Outcome> {
        async move {
            self.cells[&index]
                .get_or_init(|| self.execute(index))
                .await
                .clone()
        }
        .boxed()
    }

    /// Starts every member together and waits for all of them. The first
    /// failure drops the remaining members.
    async fn group(&self, members: &[NodeIndex]) -> Outcome {
        match members {
            [] => Ok(()),
            [single] => self.node(*single).await,
            _ => try_join_all(members.iter().map(|&index| self.node(index)))
                .await
                .map(|_| ()),
        }
    }

    async fn execute(&self, index: NodeIndex) -> Outcome {
        let task = &self.graph.graph[index];

        self.group(&task.dependencies).await?;

        match &task.body {
            NodeBody::Sequence(steps) => {
                tracing::debug!(task = %task.name, "running sequence");
                for step in steps {
                    self.group(step).await?;
                }
            }
            NodeBody::Action(action) => {
                if let Some(phase) = task.phase {
                    self.tracker
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .enter(phase);
                }

                let span = tracing::span!(Level::INFO, "task", name = %task.name);
                span.pb_set_style(&self.style);
                span.pb_set_message(&format!("Running {}", task.name));

                let start = Instant::now();
                let result = action(self.ctx.clone()).instrument(span).await;
                let duration = start.elapsed();

                self.executions
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(task.name.clone(), TaskExecution { start, duration });

                result.map_err(|err| TaskError::new(task.name.clone(), err))?;
                let overhead = crate::io::as_overhead(start);
                tracing::info!(task = %task.name, "finished {} {overhead}", task.name);
            }
        }

        self.root.pb_inc(1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::engine::{Blueprint, Phase, Step};
    use crate::error::{FileError, StepError};

    use super::*;

    /// Shared log of task events.
    #[derive(Default)]
    struct Journal {
        events: Mutex<Vec<String>>,
        runs: AtomicUsize,
    }

    impl Journal {
        fn push(&self, event: impl Into<String>) {
            self.events.lock().unwrap().push(event.into());
        }

        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }

        fn position(&self, event: &str) -> usize {
            self.events()
                .iter()
                .position(|e| e == event)
                .unwrap_or_else(|| panic!("{event} never happened"))
        }
    }

    fn recording(
        blueprint: &mut Blueprint<Journal>,
        name: &'static str,
        deps: &[&'static str],
        delay: u64,
    ) {
        blueprint
            .task(name)
            .depends_on(deps.iter().copied())
            .run(move |journal: Arc<Journal>| async move {
                journal.runs.fetch_add(1, Ordering::SeqCst);
                journal.push(format!("start {name}"));
                tokio::time::sleep(Duration::from_millis(delay)).await;
                journal.push(format!("end {name}"));
                Ok(())
            });
    }

    fn failing(blueprint: &mut Blueprint<Journal>, name: &'static str) {
        blueprint.task(name).run(move |journal: Arc<Journal>| async move {
            journal.push(format!("start {name}"));
            Err(StepError::from(FileError::Io {
                op: "read",
                path: "missing".into(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            }))
        });
    }

    #[tokio::test]
    async fn dependant_waits_for_prerequisite_completion() {
        let mut blueprint = Blueprint::new();
        recording(&mut blueprint, "a", &[], 30);
        recording(&mut blueprint, "b", &["a"], 0);
        blueprint.task("all").sequence(["a", "b"]);
        let graph = blueprint.finish().unwrap();

        let journal = Arc::new(Journal::default());
        graph.run(journal.clone(), &["all"]).await.unwrap();

        assert!(journal.position("end a") < journal.position("start b"));
        assert_eq!(journal.runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn diamond_runs_shared_prerequisite_once() {
        let mut blueprint = Blueprint::new();
        recording(&mut blueprint, "root", &[], 10);
        recording(&mut blueprint, "left", &["root"], 5);
        recording(&mut blueprint, "right", &["root"], 5);
        recording(&mut blueprint, "top", &["left", "right"], 0);
        let graph = blueprint.finish().unwrap();

        let journal = Arc::new(Journal::default());
        let diagnostics = graph.run(journal.clone(), &["top", "root"]).await.unwrap();

        assert_eq!(journal.runs.load(Ordering::SeqCst), 4);
        assert_eq!(diagnostics.execution_times.len(), 4);
        assert!(journal.position("end left") < journal.position("start top"));
        assert!(journal.position("end right") < journal.position("start top"));
    }

    #[tokio::test]
    async fn parallel_group_starts_members_together() {
        let mut blueprint = Blueprint::new();
        recording(&mut blueprint, "x", &[], 40);
        recording(&mut blueprint, "y", &[], 40);
        blueprint.task("both").parallel(["x", "y"]);
        let graph = blueprint.finish().unwrap();

        let journal = Arc::new(Journal::default());
        graph.run(journal.clone(), &["both"]).await.unwrap();

        // both started before either finished
        assert!(journal.position("start x") < journal.position("end y"));
        assert!(journal.position("start y") < journal.position("end x"));
    }

    #[tokio::test]
    async fn sequence_steps_settle_before_the_next() {
        let mut blueprint = Blueprint::new();
        recording(&mut blueprint, "a", &[], 20);
        recording(&mut blueprint, "b", &[], 5);
        recording(&mut blueprint, "c", &[], 0);
        blueprint
            .task("all")
            .sequence([Step::parallel(["a", "b"]), Step::from("c")]);
        let graph = blueprint.finish().unwrap();

        let journal = Arc::new(Journal::default());
        graph.run(journal.clone(), &["all"]).await.unwrap();

        assert!(journal.position("end a") < journal.position("start c"));
        assert!(journal.position("end b") < journal.position("start c"));
    }

    #[tokio::test]
    async fn failure_aborts_rest_of_sequence() {
        let mut blueprint = Blueprint::new();
        recording(&mut blueprint, "first", &[], 0);
        failing(&mut blueprint, "broken");
        recording(&mut blueprint, "never", &[], 0);
        blueprint.task("all").sequence(["first", "broken", "never"]);
        let graph = blueprint.finish().unwrap();

        let journal = Arc::new(Journal::default());
        let err = graph.run(journal.clone(), &["all"]).await.unwrap_err();

        match err {
            BuildError::Task(err) => {
                assert_eq!(&*err.task, "broken");
                assert!(matches!(&*err.source, StepError::File(FileError::Io { op: "read", .. })));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!journal.events().contains(&"start never".to_string()));
    }

    #[tokio::test]
    async fn failing_prerequisite_blocks_dependant() {
        let mut blueprint = Blueprint::new();
        failing(&mut blueprint, "broken");
        recording(&mut blueprint, "after", &["broken"], 0);
        let graph = blueprint.finish().unwrap();

        let journal = Arc::new(Journal::default());
        let err = graph.run(journal.clone(), &["after"]).await.unwrap_err();

        assert!(matches!(err, BuildError::Task(ref e) if &*e.task == "broken"));
        assert_eq!(journal.runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_target_is_rejected_before_running() {
        let mut blueprint = Blueprint::new();
        recording(&mut blueprint, "a", &[], 0);
        let graph = blueprint.finish().unwrap();

        let journal = Arc::new(Journal::default());
        let err = graph.run(journal.clone(), &["a", "zzz"]).await.unwrap_err();

        assert!(matches!(err, BuildError::UnknownTask(name) if name == "zzz"));
        assert_eq!(journal.runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn phases_advance_with_tasks() {
        let mut blueprint = Blueprint::<()>::new();
        blueprint.task("t").phase(Phase::Transforming).run(|_| async { Ok(()) });
        blueprint
            .task("p")
            .phase(Phase::Packaging)
            .depends_on(["t"])
            .run(|_| async { Ok(()) });
        let graph = blueprint.finish().unwrap();

        let diagnostics = graph.run(Arc::new(()), &["p"]).await.unwrap();

        assert_eq!(
            diagnostics.phases,
            [Phase::Idle, Phase::Transforming, Phase::Packaging, Phase::Done]
        );
    }
}
