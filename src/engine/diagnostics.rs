use std::collections::HashMap;
use std::fmt::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::engine::{Phase, TaskGraph};

#[derive(Debug, Clone)]
pub struct TaskExecution {
    pub start: Instant,
    pub duration: Duration,
}

/// Build diagnostics and performance metrics.
///
/// Returned by [`TaskGraph::run`] on success. Only leaf tasks that actually
/// ran appear in `execution_times`.
#[derive(Debug, Default)]
pub struct Diagnostics {
    /// Execution metrics keyed by task name.
    pub execution_times: HashMap<Arc<str>, TaskExecution>,
    /// Phases entered during the run, starting with `Idle`.
    pub phases: Vec<Phase>,
}

impl Diagnostics {
    /// Executed tasks ordered by start time.
    pub fn timeline(&self) -> Vec<(&str, &TaskExecution)> {
        let mut ran: Vec<_> = self
            .execution_times
            .iter()
            .map(|(name, exec)| (&**name, exec))
            .collect();
        ran.sort_by_key(|(_, exec)| exec.start);
        ran
    }

    /// Plain text summary, one line per executed task.
    pub fn render_summary(&self) -> String {
        let timeline = self.timeline();
        let Some(first) = timeline.first() else {
            return "No tasks ran".to_string();
        };
        let origin = first.1.start;
        let width = timeline.iter().map(|(name, _)| name.len()).max().unwrap_or(0);

        let mut out = String::new();
        for (name, exec) in timeline {
            let offset = exec.start.duration_since(origin);
            let _ = writeln!(
                out,
                "{name:<width$}  +{:.2?}  {:.2?}",
                offset, exec.duration
            );
        }
        out
    }

    /// Renders the task graph as a Mermaid diagram, color-coded by execution
    /// duration.
    ///
    /// * **Green**: Fast
    /// * **Yellow**: Moderate
    /// * **Red**: Slow
    /// * **Grey**: Did not run
    pub fn render_mermaid<C>(&self, graph: &TaskGraph<C>) -> String {
        let mut f = String::new();
        let _ = writeln!(f, "graph LR");

        let times = &self.execution_times;
        let (mut min_time, mut max_time) = times
            .values()
            .map(|t| t.duration.as_secs_f64())
            .fold((f64::MAX, f64::MIN), |(lo, hi), secs| (lo.min(secs), hi.max(secs)));

        if min_time > max_time {
            min_time = 0.0;
            max_time = 0.0;
        }

        // Avoid divide by zero if all tasks took same time
        if (max_time - min_time).abs() < f64::EPSILON {
            max_time = min_time + 1.0;
        }

        for index in graph.graph.node_indices() {
            let task = &graph.graph[index];
            let name = task.name.replace('"', "\\\"");

            let (label_extra, color_code) = match times.get(&task.name) {
                Some(exec) => {
                    let t = (exec.duration.as_secs_f64() - min_time) / (max_time - min_time);

                    // 0.0 (Green) -> 0.5 (Yellow) -> 1.0 (Red)
                    let (r, g) = if t < 0.5 {
                        ((255.0 * t * 2.0) as u8, 255)
                    } else {
                        (255, (255.0 * (1.0 - (t - 0.5) * 2.0)) as u8)
                    };

                    (format!("{:.2?}", exec.duration), format!("#{r:02X}{g:02X}00"))
                }
                None => ("-".to_string(), "#D3D3D3".to_string()),
            };

            let _ = writeln!(f, "    {:?}[\"{}\\n{}\"]", index.index(), name, label_extra);
            let _ = writeln!(f, "    style {:?} fill:{}", index.index(), color_code);
        }

        for edge in graph.graph.raw_edges() {
            let _ = writeln!(
                f,
                "    {:?} --> {:?}",
                edge.source().index(),
                edge.target().index()
            );
        }

        f
    }
}
