use std::io;
use std::sync::Arc;

use camino::Utf8PathBuf;
use thiserror::Error;

/// Any error raised inside a task's action.
///
/// Every variant wraps a dedicated error type, so callers can match on the
/// failing concern (tool, file, manifest, packaging, template) without parsing
/// messages.
#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error(transparent)]
    File(#[from] FileError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Packaging(#[from] PackagingError),

    #[error(transparent)]
    Template(#[from] TemplateError),
}

/// An external process (transformer, resolver, bundler, installer builder)
/// could not be started, exited non-zero, or lacked a credential it needs.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Couldn't start '{program}'.\n{source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("'{program}' failed ({status}):\n{stderr}")]
    Failed {
        program: String,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("'{tool}' needs the {variable} environment variable, which is not set")]
    MissingCredential { tool: String, variable: String },
}

#[derive(Debug, Error)]
pub enum FileError {
    #[error("Couldn't compile glob pattern '{pattern}'.\n{source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("Couldn't run glob.\n{0}")]
    Glob(#[from] glob::GlobError),

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),

    #[error("Couldn't {op} '{path}'.\n{source}")]
    Io {
        op: &'static str,
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Couldn't write archive '{path}'.\n{source}")]
    Archive {
        path: Utf8PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("Blocking file work did not complete.\n{0}")]
    Blocking(#[from] tokio::task::JoinError),
}

impl FileError {
    /// Builds a `map_err` adapter tagging an I/O error with the operation and
    /// the path it touched.
    pub(crate) fn io(
        op: &'static str,
        path: impl Into<Utf8PathBuf>,
    ) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| FileError::Io { op, path, source }
    }
}

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Malformed manifest '{path}'.\n{source}")]
    Parse {
        path: Utf8PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Manifest '{path}' has no {field}")]
    MissingField { path: Utf8PathBuf, field: &'static str },
}

#[derive(Debug, Error)]
pub enum PackagingError {
    #[error("Target {target}: source tree '{path}' does not exist")]
    MissingSource { target: &'static str, path: Utf8PathBuf },

    #[error("Target {target}: icon '{path}' does not exist")]
    MissingIcon { target: &'static str, path: Utf8PathBuf },

    #[error("Target {target}: metadata field '{field}' is empty")]
    EmptyMetadata { target: &'static str, field: &'static str },

    #[error("Target {target}: bundler finished but '{path}' was not produced")]
    NoBundle { target: &'static str, path: Utf8PathBuf },
}

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Replacement '{value}' contains the placeholder '{token}' itself")]
    Recursive { token: String, value: String },

    #[error("The version placeholder is empty")]
    EmptyToken,
}

/// The failure of a single task, shared between every waiter on that task.
///
/// The task named here is the one whose own action failed; composites and
/// dependants hand the same value upwards untouched.
#[derive(Debug, Error, Clone)]
#[error("Task '{task}' failed.\n{source}")]
pub struct TaskError {
    pub task: Arc<str>,
    #[source]
    pub source: Arc<StepError>,
}

impl TaskError {
    pub fn new(task: impl Into<Arc<str>>, source: impl Into<StepError>) -> Self {
        Self {
            task: task.into(),
            source: Arc::new(source.into()),
        }
    }
}

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Task '{0}' is registered twice")]
    Duplicate(String),

    #[error("Task '{task}' refers to unknown task '{missing}'")]
    UnknownTask { task: String, missing: String },

    #[error("Task graph has a cycle through '{0}'")]
    Cycle(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Couldn't read config '{path}'.\n{source}")]
    Read {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Couldn't parse config '{path}'.\n{source}")]
    Parse {
        path: Utf8PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Config '{path}': '{key}' must not be empty")]
    Empty { path: Utf8PathBuf, key: &'static str },

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    File(#[from] FileError),
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Error while assembling the task graph.\n{0}")]
    Graph(#[from] GraphError),

    #[error("Error while loading the configuration.\n{0}")]
    Config(#[from] ConfigError),

    #[error("No task named '{0}'")]
    UnknownTask(String),

    #[error(transparent)]
    Task(#[from] TaskError),
}
