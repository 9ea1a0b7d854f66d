//! Invocation of external tools.
//!
//! Every collaborator the pipeline shells out to (transformer, dependency
//! resolver, bundler, installer builders, the runtime itself) goes through
//! [`ToolCommand`]: an explicit program plus argument vector, so nothing is
//! ever re-parsed by a shell.

use std::collections::BTreeMap;
use std::process::{ExitStatus, Stdio};

use camino::{Utf8Path, Utf8PathBuf};
use tokio::process::Command;

use crate::error::ToolError;

/// Captured result of a successful tool run.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

/// A typed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    program: String,
    args: Vec<String>,
    envs: BTreeMap<String, String>,
    cwd: Option<Utf8PathBuf>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: BTreeMap::new(),
            cwd: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Appends `--name=value`.
    pub fn flag(self, name: &str, value: impl AsRef<str>) -> Self {
        self.arg(format!("--{name}={}", value.as_ref()))
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.insert(key.into(), value.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    pub fn get_env(&self, key: &str) -> Option<&str> {
        self.envs.get(key).map(String::as_str)
    }

    pub fn get_current_dir(&self) -> Option<&Utf8Path> {
        self.cwd.as_deref()
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args).envs(&self.envs).kill_on_drop(true);

        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }

        command
    }

    /// Runs the tool to completion, capturing its output. A non-zero exit is
    /// an error carrying the captured stderr.
    pub async fn output(&self) -> Result<ToolOutput, ToolError> {
        tracing::debug!(program = %self.program, args = ?self.args, "running tool");

        let output = self
            .command()
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| ToolError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            return Err(ToolError::Failed {
                program: self.program.clone(),
                status: output.status,
                stderr,
            });
        }

        Ok(ToolOutput {
            status: output.status,
            stdout,
            stderr,
        })
    }

    /// Runs the tool with inherited stdio, for long-running interactive
    /// processes such as the application itself.
    pub async fn status(&self) -> Result<ExitStatus, ToolError> {
        tracing::debug!(program = %self.program, args = ?self.args, "launching tool");

        let status = self
            .command()
            .status()
            .await
            .map_err(|source| ToolError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !status.success() {
            return Err(ToolError::Failed {
                program: self.program.clone(),
                status,
                stderr: String::new(),
            });
        }

        Ok(status)
    }
}

impl std::fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg:?}")?;
        }
        Ok(())
    }
}

/// Replaces `{name}` placeholders inside each configured argument.
///
/// Substitution is per argument, never across the joined command line, so a
/// path containing spaces stays a single argument.
pub(crate) fn expand_args<'a>(
    args: &'a [String],
    vars: &'a [(&'a str, &'a str)],
) -> impl Iterator<Item = String> + 'a {
    args.iter().map(move |arg| {
        vars.iter().fold(arg.clone(), |acc, (key, value)| {
            acc.replace(&format!("{{{key}}}"), value)
        })
    })
}
