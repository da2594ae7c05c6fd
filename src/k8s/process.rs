//! External process execution for kind and kubectl
//!
//! Every invocation is bounded by a timeout, has its stdout/stderr drained and
//! logged at debug level, and turns a non-zero exit into a [`CommandError`]
//! carrying the command line and whatever the process wrote to stderr.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Failed to spawn [{command}]: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error while talking to [{command}]: {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Timeout after {}s while executing [{command}]", timeout.as_secs())]
    Timeout { command: String, timeout: Duration },

    #[error(
        "Process termination was abnormal, exit value: [{code}], command: [{command}] error returned: [{stderr}]"
    )]
    Failed {
        code: i32,
        command: String,
        stderr: String,
    },
}

/// A single program invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub stdin: Option<String>,
    pub timeout: Duration,
}

impl Invocation {
    pub fn new<I, S>(program: &str, args: I, timeout: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
            stdin: None,
            timeout,
        }
    }

    /// Feed `input` to the process on stdin
    pub fn with_stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Shell-quoted command line, used for logging and error messages
    pub fn command_line(&self) -> String {
        shell_words::join(
            std::iter::once(self.program.as_str()).chain(self.args.iter().map(String::as_str)),
        )
    }
}

/// Captured process output, trimmed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Something that can run an [`Invocation`]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput, CommandError>;
}

/// Runs invocations as real child processes
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput, CommandError> {
        run_command(invocation).await
    }
}

/// Spawn the process, wait for it to finish within its timeout and check the exit code
pub async fn run_command(invocation: &Invocation) -> Result<CommandOutput, CommandError> {
    let command = invocation.command_line();
    tracing::debug!(command = %command, "request");

    let mut cmd = Command::new(&invocation.program);
    cmd.args(&invocation.args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(if invocation.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|source| CommandError::Spawn {
        command: command.clone(),
        source,
    })?;

    let stdin = child.stdin.take().zip(invocation.stdin.as_deref());
    let feed = async move {
        if let Some((mut pipe, input)) = stdin {
            pipe.write_all(input.as_bytes()).await?;
            // closing stdin lets the child see EOF
            drop(pipe);
        }
        Ok::<_, std::io::Error>(())
    };

    // stdin is fed while the output is drained, both under the timeout;
    // the child is killed when the timed-out future drops it
    let finished = tokio::time::timeout(invocation.timeout, async {
        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output = output?;
        fed?;
        Ok::<_, std::io::Error>(output)
    })
    .await;

    let output = match finished {
        Ok(result) => result.map_err(|source| CommandError::Io {
            command: command.clone(),
            source,
        })?,
        Err(_) => {
            return Err(CommandError::Timeout {
                command,
                timeout: invocation.timeout,
            });
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

    for line in stdout.lines() {
        tracing::debug!(command = %command, "stdout: {}", line);
    }
    for line in stderr.lines() {
        tracing::debug!(command = %command, "stderr: {}", line);
    }

    if !output.status.success() {
        return Err(CommandError::Failed {
            code: output.status.code().unwrap_or(-1),
            command,
            stderr,
        });
    }

    Ok(CommandOutput { stdout, stderr })
}
