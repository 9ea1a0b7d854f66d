use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use camino::Utf8PathBuf;
use clap::Parser;
use console::style;

use hakobu::{BuildError, Options, Project, pipeline};

/// Builds, packages and releases the application.
#[derive(Parser, Debug)]
#[command(name = "hakobu", version, about)]
struct Cli {
    /// Project root.
    #[arg(long, default_value = ".")]
    root: Utf8PathBuf,

    /// Configuration file (default: `<root>/hakobu.toml` if present).
    #[arg(long)]
    config: Option<Utf8PathBuf>,

    /// Run `clean` before the requested tasks.
    #[arg(long)]
    clean: bool,

    /// Slim the output and package from the slim tree.
    #[arg(long)]
    slim: bool,

    /// List the registered tasks and exit.
    #[arg(long)]
    list: bool,

    /// Print the task graph as a Mermaid diagram and exit.
    #[arg(long)]
    graph: bool,

    /// After the run, print the task graph colored by task duration.
    #[arg(long)]
    timings: bool,

    /// Tasks to run, in order.
    #[arg(value_name = "TASK")]
    tasks: Vec<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    hakobu::init_logging();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:?}", style("error:").red().bold());
            match err.downcast_ref::<BuildError>() {
                Some(BuildError::Task(_)) => ExitCode::from(1),
                _ => ExitCode::from(2),
            }
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if cli.list || cli.graph {
        let graph = pipeline::graph().map_err(BuildError::from)?;
        if cli.list {
            for (name, about) in graph.tasks() {
                println!("{} {}", style(format!("{name:<16}")).bold(), about.unwrap_or(""));
            }
        } else {
            print!("{graph}");
        }
        return Ok(());
    }

    let project = Project::load(&cli.root, cli.config.as_deref())
        .map_err(BuildError::from)
        .with_context(|| format!("Couldn't load the project at '{}'", cli.root))?
        .with_options(Options { slim: cli.slim });
    let graph = pipeline::graph_for(&project).map_err(BuildError::from)?;

    let mut tasks: Vec<&str> = Vec::new();
    if cli.clean {
        tasks.push("clean");
    }
    if cli.slim {
        tasks.push("slim");
    }
    if cli.tasks.is_empty() {
        tasks.push(pipeline::DEFAULT_TASK);
    } else {
        tasks.extend(cli.tasks.iter().map(String::as_str));
    }

    let diagnostics = graph.run(Arc::new(project), &tasks).await?;

    tracing::debug!("\n{}", diagnostics.render_summary());
    if cli.timings {
        print!("{}", diagnostics.render_mermaid(&graph));
    }
    Ok(())
}
